//! Callout（软件定时器）
//!
//! callout 到期时把自带的事件投递到指定的事件队列，由等待该队列的任务
//! 处理。已启动的 callout 按到期时刻排成一条链表，节拍推进时从表头
//! 依次处理。重新设定会取代之前的设定；停止会连同已投递但尚未取走的
//! 事件一起撤销。

use super::tick::{Tick, MAX_DELAY_TICKS};
use crate::error::{Result, RtosError};
use crate::hal::Port;
use crate::ipc::{EventHandler, EventId, EventQId};
use crate::kernel::{Isr, Kernel, KernelState};
use crate::utils::{alloc_slot, define_handle};

define_handle!(
    /// Callout 句柄
    CalloutId
);

pub(crate) struct CalloutCb {
    event: EventId,
    evq: EventQId,
    armed: bool,
    expiry: Tick,
    next: Option<CalloutId>,
}

impl KernelState {
    fn callout_cb(&mut self, c: CalloutId) -> Result<&mut CalloutCb> {
        self.callouts
            .get_mut(c.index())
            .and_then(Option::as_mut)
            .ok_or(RtosError::InvalidHandle)
    }

    pub(crate) fn callout_first_expiry(&self) -> Option<Tick> {
        let head = self.callout_head?;
        self.callouts[head.index()].as_ref().map(|cb| cb.expiry)
    }

    /// 表头 callout 到期：摘下并投递事件
    pub(crate) fn callout_expire_first(&mut self) {
        let Some(head) = self.callout_head else { return };
        let Some(cb) = self.callouts[head.index()].as_mut() else {
            self.callout_head = None;
            return;
        };
        self.callout_head = cb.next.take();
        cb.armed = false;
        let (evq, ev) = (cb.evq, cb.event);
        // 队列和事件都随 callout 一起创建，投递不会失败
        let _ = self.eventq_post(evq, ev);
    }

    fn callout_unlink(&mut self, c: CalloutId) {
        let mut prev: Option<CalloutId> = None;
        let mut cur = self.callout_head;
        while let Some(x) = cur {
            let next = self.callouts[x.index()].as_ref().and_then(|cb| cb.next);
            if x == c {
                match prev {
                    Some(p) => {
                        if let Some(pcb) = self.callouts[p.index()].as_mut() {
                            pcb.next = next;
                        }
                    }
                    None => self.callout_head = next,
                }
                if let Some(cb) = self.callouts[x.index()].as_mut() {
                    cb.next = None;
                }
                return;
            }
            prev = cur;
            cur = next;
        }
    }

    /// 按到期时刻插入，相同时刻排在已有项之后
    fn callout_arm(&mut self, c: CalloutId, at: Tick) -> Result<()> {
        if self.callout_cb(c)?.armed {
            self.callout_unlink(c);
        }
        let mut prev: Option<CalloutId> = None;
        let mut cur = self.callout_head;
        while let Some(x) = cur {
            let Some(xcb) = self.callouts[x.index()].as_ref() else { break };
            if at.is_before(xcb.expiry) {
                break;
            }
            prev = cur;
            cur = xcb.next;
        }
        let cb = self.callout_cb(c)?;
        cb.expiry = at;
        cb.armed = true;
        cb.next = cur;
        match prev {
            Some(p) => {
                if let Some(pcb) = self.callouts[p.index()].as_mut() {
                    pcb.next = Some(c);
                }
            }
            None => self.callout_head = Some(c),
        }
        Ok(())
    }

    fn callout_reset_inner(&mut self, c: CalloutId, ticks: u32) -> Result<()> {
        if ticks > MAX_DELAY_TICKS {
            return Err(RtosError::InvalidArgument);
        }
        let at = self.now.wrapping_add(ticks);
        self.callout_arm(c, at)
    }

    fn callout_stop_inner(&mut self, c: CalloutId) -> Result<()> {
        let cb = self.callout_cb(c)?;
        let (armed, evq, ev) = (cb.armed, cb.evq, cb.event);
        if armed {
            self.callout_unlink(c);
            self.callout_cb(c)?.armed = false;
        }
        self.eventq_unlink(evq, ev)
    }
}

impl<P: Port> Kernel<P> {
    /// 创建 callout
    ///
    /// # 参数
    /// - `evq`: 到期时投递事件的队列
    /// - `kind`, `arg`, `handler`: 自带事件的类型、参数和处理函数
    pub fn callout_init(
        &self,
        evq: EventQId,
        kind: u16,
        arg: usize,
        handler: Option<EventHandler>,
    ) -> Result<CalloutId> {
        self.with_state(|s| {
            if s.eventqs.get(evq.index()).and_then(Option::as_ref).is_none() {
                return Err(RtosError::InvalidHandle);
            }
            if s.callouts.iter().all(Option::is_some) {
                return Err(RtosError::CalloutSlotsFull);
            }
            let event = s.event_alloc(kind, arg, handler)?;
            let cb = CalloutCb { event, evq, armed: false, expiry: Tick::ZERO, next: None };
            alloc_slot(&mut s.callouts, cb)
                .map(CalloutId::from_index)
                .ok_or(RtosError::CalloutSlotsFull)
        })
    }

    /// 设定 callout 在 `ticks` 个节拍后到期
    ///
    /// 已启动的 callout 先撤销原设定。
    pub fn callout_reset(&self, c: CalloutId, ticks: u32) -> Result<()> {
        self.with_state(|s| s.callout_reset_inner(c, ticks))
    }

    /// 设定 callout 在绝对时刻 `at` 到期
    ///
    /// `at` 必须在当前时刻前后 2^31 节拍以内；不晚于当前时刻的会在下一次
    /// 节拍推进时到期。
    pub fn callout_reset_at(&self, c: CalloutId, at: Tick) -> Result<()> {
        self.with_state(|s| s.callout_arm(c, at))
    }

    /// 停止 callout
    ///
    /// 已投递但尚未被取走的事件也会从队列中撤下。
    pub fn callout_stop(&self, c: CalloutId) -> Result<()> {
        self.with_state(|s| s.callout_stop_inner(c))
    }

    pub fn callout_is_active(&self, c: CalloutId) -> Result<bool> {
        self.with_state(|s| s.callout_cb(c).map(|cb| cb.armed))
    }

    /// 距离到期的节拍数，未启动时为 `None`
    pub fn callout_remaining_ticks(&self, c: CalloutId) -> Result<Option<u32>> {
        self.with_state(|s| {
            let now = s.now;
            let cb = s.callout_cb(c)?;
            Ok(cb.armed.then(|| cb.expiry.since(now).max(0) as u32))
        })
    }

    /// callout 自带的事件
    pub fn callout_event(&self, c: CalloutId) -> Result<EventId> {
        self.with_state(|s| s.callout_cb(c).map(|cb| cb.event))
    }
}

impl<P: Port> Isr<'_, P> {
    pub fn callout_reset(&self, c: CalloutId, ticks: u32) -> Result<()> {
        self.kernel().with_state(|s| s.callout_reset_inner(c, ticks))
    }

    pub fn callout_stop(&self, c: CalloutId) -> Result<()> {
        self.kernel().with_state(|s| s.callout_stop_inner(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::task::{TaskState, WaitResult};
    use crate::kernel::time::Timeout;
    use crate::utils::fixture::{host_kernel, spawn};

    #[test]
    fn test_fires_exactly_once() {
        let k = host_kernel();
        let q = k.eventq_init().unwrap();
        let c = k.callout_init(q, 1, 0, None).unwrap();
        let ev = k.callout_event(c).unwrap();

        k.callout_reset(c, 10).unwrap();
        assert_eq!(k.callout_remaining_ticks(c), Ok(Some(10)));
        k.tick_advance(9);
        assert!(k.eventq_is_empty(q).unwrap());
        assert_eq!(k.callout_remaining_ticks(c), Ok(Some(1)));
        k.tick_advance(1);
        assert!(!k.callout_is_active(c).unwrap());
        assert_eq!(k.eventq_get_no_wait(q).unwrap().map(|e| e.id), Some(ev));

        k.tick_advance(100);
        assert_eq!(k.eventq_get_no_wait(q), Ok(None));
    }

    #[test]
    fn test_reset_replaces_previous_arm() {
        let k = host_kernel();
        let q = k.eventq_init().unwrap();
        let c = k.callout_init(q, 1, 0, None).unwrap();

        k.callout_reset(c, 5).unwrap();
        k.callout_reset(c, 20).unwrap();
        k.tick_advance(5);
        assert!(k.eventq_is_empty(q).unwrap());
        assert!(k.callout_is_active(c).unwrap());
        k.tick_advance(15);
        assert!(!k.eventq_is_empty(q).unwrap());
    }

    #[test]
    fn test_stop_withdraws_posted_event() {
        let k = host_kernel();
        let q = k.eventq_init().unwrap();
        let c = k.callout_init(q, 1, 0, None).unwrap();

        k.callout_reset(c, 3).unwrap();
        k.tick_advance(3);
        assert!(!k.eventq_is_empty(q).unwrap());
        k.callout_stop(c).unwrap();
        assert!(k.eventq_is_empty(q).unwrap());

        k.callout_reset(c, 3).unwrap();
        k.callout_stop(c).unwrap();
        k.tick_advance(10);
        assert!(k.eventq_is_empty(q).unwrap());
        assert_eq!(k.callout_remaining_ticks(c), Ok(None));
    }

    #[test]
    fn test_callouts_fire_in_expiry_order() {
        let k = host_kernel();
        let q = k.eventq_init().unwrap();
        let late = k.callout_init(q, 2, 0, None).unwrap();
        let early = k.callout_init(q, 1, 0, None).unwrap();
        let same = k.callout_init(q, 3, 0, None).unwrap();

        k.callout_reset(late, 8).unwrap();
        k.callout_reset(early, 4).unwrap();
        k.callout_reset(same, 8).unwrap();
        k.tick_advance(10);

        let kinds: std::vec::Vec<u16> = core::iter::from_fn(|| k.eventq_get_no_wait(q).unwrap())
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, [1, 2, 3]);
    }

    #[test]
    fn test_fires_across_tick_wrap() {
        let k = host_kernel();
        let q = k.eventq_init().unwrap();
        let c = k.callout_init(q, 1, 0, None).unwrap();

        k.tick_advance(u32::MAX - 4);
        assert_eq!(k.time_get(), Tick::new(u32::MAX - 4));
        k.callout_reset(c, 10).unwrap();
        k.tick_advance(9);
        assert!(k.eventq_is_empty(q).unwrap());
        k.tick_advance(1);
        assert_eq!(k.time_get(), Tick::new(5));
        assert!(!k.eventq_is_empty(q).unwrap());
    }

    #[test]
    fn test_expiry_wakes_waiting_task() {
        let k = host_kernel();
        let t = spawn(&k, "timer_user", 7);
        k.start().unwrap();
        let q = k.eventq_init().unwrap();
        let c = k.callout_init(q, 4, 0, None).unwrap();
        let ev = k.callout_event(c).unwrap();

        k.callout_reset(c, 2).unwrap();
        assert_eq!(k.eventq_get(q, Timeout::Forever), Err(RtosError::WouldBlock));
        k.enter_isr().tick_advance(2);
        assert_eq!(k.task_state(t), Ok(TaskState::Running));
        match k.take_wait_result(t) {
            Some(WaitResult::Event(e)) => assert_eq!(e.id, ev),
            other => panic!("unexpected wait result {:?}", other),
        }
    }

    #[test]
    fn test_callout_slots_full_keeps_events() {
        let k = host_kernel();
        let q = k.eventq_init().unwrap();
        for _ in 0..crate::config::MAX_CALLOUTS {
            k.callout_init(q, 0, 0, None).unwrap();
        }
        assert_eq!(k.callout_init(q, 0, 0, None), Err(RtosError::CalloutSlotsFull));
        // 失败的创建没有占用事件槽位
        let remaining = crate::config::MAX_EVENTS - crate::config::MAX_CALLOUTS;
        for _ in 0..remaining {
            k.event_init(0, 0, None).unwrap();
        }
    }
}
