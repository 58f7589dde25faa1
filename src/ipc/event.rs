//! 事件
//!
//! 事件由生产者创建并长期持有，内核只负责把它在队列间传递，从不释放。
//! 同一事件同一时刻最多在一个队列里；对已入队的事件再次投递不做任何事。

use super::EventQId;
use crate::error::{Result, RtosError};
use crate::hal::Port;
use crate::kernel::{Kernel, KernelState};
use crate::utils::{alloc_slot, define_handle};

define_handle!(
    /// 事件句柄
    EventId
);

/// 事件处理函数
pub type EventHandler = fn(Event);

/// 消费者看到的事件快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    /// 事件类型，由应用自行约定
    pub kind: u16,
    pub arg: usize,
}

pub(crate) struct EventCb {
    pub(crate) kind: u16,
    pub(crate) arg: usize,
    pub(crate) handler: Option<EventHandler>,
    /// 所在队列，`Some` 即已入队
    pub(crate) queue: Option<EventQId>,
    pub(crate) next: Option<EventId>,
}

impl KernelState {
    pub(crate) fn event_cb(&mut self, ev: EventId) -> Result<&mut EventCb> {
        self.events
            .get_mut(ev.index())
            .and_then(Option::as_mut)
            .ok_or(RtosError::InvalidHandle)
    }

    pub(crate) fn event_snapshot(&self, ev: EventId) -> Option<Event> {
        let cb = self.events.get(ev.index())?.as_ref()?;
        Some(Event { id: ev, kind: cb.kind, arg: cb.arg })
    }

    pub(crate) fn event_alloc(&mut self, kind: u16, arg: usize, handler: Option<EventHandler>) -> Result<EventId> {
        let cb = EventCb { kind, arg, handler, queue: None, next: None };
        alloc_slot(&mut self.events, cb)
            .map(EventId::from_index)
            .ok_or(RtosError::EventSlotsFull)
    }
}

impl<P: Port> Kernel<P> {
    /// 创建事件
    ///
    /// # 参数
    /// - `kind`: 事件类型
    /// - `arg`: 附带参数
    /// - `handler`: [`Kernel::eventq_run`] 取到该事件时调用的处理函数
    pub fn event_init(&self, kind: u16, arg: usize, handler: Option<EventHandler>) -> Result<EventId> {
        self.with_state(|s| s.event_alloc(kind, arg, handler))
    }

    pub fn event_get(&self, ev: EventId) -> Result<Event> {
        self.with_state(|s| s.event_snapshot(ev).ok_or(RtosError::InvalidHandle))
    }

    /// 修改事件参数，已入队的事件在被取出时看到新值
    pub fn event_set_arg(&self, ev: EventId, arg: usize) -> Result<()> {
        self.with_state(|s| {
            s.event_cb(ev)?.arg = arg;
            Ok(())
        })
    }

    /// 事件当前是否在某个队列里
    pub fn event_is_queued(&self, ev: EventId) -> Result<bool> {
        self.with_state(|s| s.event_cb(ev).map(|cb| cb.queue.is_some()))
    }
}
