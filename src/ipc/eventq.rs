//! 事件队列
//!
//! FIFO 顺序投递事件。每个队列最多一个等待任务；任务在等待时，投递
//! 直接把事件交给它，不经过队列。`eventq_poll` 可以同时等待多个队列，
//! 多个队列都有事件时按传入顺序取第一个非空队列。

use super::event::{Event, EventId};
use crate::config::MAX_POLL_QUEUES;
use crate::error::{Fault, Result, RtosError};
use crate::hal::Port;
use crate::kernel::task::{TaskId, TaskState, WaitObj, WaitResult};
use crate::kernel::time::Timeout;
use crate::kernel::{Isr, Kernel, KernelState};
use crate::utils::{alloc_slot, define_handle};

define_handle!(
    /// 事件队列句柄
    EventQId
);

pub(crate) struct EventQCb {
    head: Option<EventId>,
    tail: Option<EventId>,
    /// 正在等待的任务
    pub(crate) waiter: Option<TaskId>,
}

impl EventQCb {
    const fn new() -> Self {
        Self { head: None, tail: None, waiter: None }
    }
}

enum Get {
    Ready(Event),
    Parked(TaskId),
}

impl KernelState {
    fn eventq_cb(&mut self, q: EventQId) -> Result<&mut EventQCb> {
        self.eventqs
            .get_mut(q.index())
            .and_then(Option::as_mut)
            .ok_or(RtosError::InvalidHandle)
    }

    /// 投递事件
    ///
    /// 已入队的事件不会重复入队。有任务在等待时直接交给它。
    pub(crate) fn eventq_post(&mut self, q: EventQId, ev: EventId) -> Result<()> {
        self.eventq_cb(q)?;
        if self.event_cb(ev)?.queue.is_some() {
            return Ok(());
        }
        if let Some(t) = self.eventq_cb(q)?.waiter {
            let snapshot = self.event_snapshot(ev).ok_or(RtosError::InvalidHandle)?;
            self.clear_queue_waits(t);
            self.complete_wait(t, WaitResult::Event(snapshot));
            return Ok(());
        }

        let cb = self.event_cb(ev)?;
        cb.queue = Some(q);
        cb.next = None;
        let qcb = self.eventq_cb(q)?;
        let old_tail = qcb.tail.replace(ev);
        match old_tail {
            Some(tail) => {
                if let Some(tail_cb) = self.events[tail.index()].as_mut() {
                    tail_cb.next = Some(ev);
                }
            }
            None => qcb.head = Some(ev),
        }
        Ok(())
    }

    /// 取出队首事件
    fn eventq_pop(&mut self, q: EventQId) -> Option<Event> {
        let qcb = self.eventqs.get_mut(q.index())?.as_mut()?;
        let ev = qcb.head?;
        let cb = self.events[ev.index()].as_mut()?;
        qcb.head = cb.next.take();
        if qcb.head.is_none() {
            qcb.tail = None;
        }
        cb.queue = None;
        self.event_snapshot(ev)
    }

    /// 把事件从队列中摘除，不在该队列中时不做任何事
    pub(crate) fn eventq_unlink(&mut self, q: EventQId, ev: EventId) -> Result<()> {
        self.eventq_cb(q)?;
        if self.event_cb(ev)?.queue != Some(q) {
            return Ok(());
        }
        let mut prev: Option<EventId> = None;
        let mut cur = self.eventq_cb(q)?.head;
        while let Some(c) = cur {
            let next = self.events[c.index()].as_ref().and_then(|cb| cb.next);
            if c == ev {
                match prev {
                    Some(p) => {
                        if let Some(pcb) = self.events[p.index()].as_mut() {
                            pcb.next = next;
                        }
                    }
                    None => self.eventq_cb(q)?.head = next,
                }
                let qcb = self.eventq_cb(q)?;
                if qcb.tail == Some(ev) {
                    qcb.tail = prev;
                }
                let cb = self.event_cb(ev)?;
                cb.queue = None;
                cb.next = None;
                return Ok(());
            }
            prev = cur;
            cur = next;
        }
        Ok(())
    }

    /// 撤销任务在各事件队列上的等待登记
    pub(crate) fn clear_queue_waits(&mut self, t: TaskId) {
        let poll = core::mem::replace(&mut self.tcb_mut(t).poll, [None; MAX_POLL_QUEUES]);
        for q in poll.into_iter().flatten() {
            if let Some(qcb) = self.eventqs[q.index()].as_mut() {
                if qcb.waiter == Some(t) {
                    qcb.waiter = None;
                }
            }
        }
    }

    fn eventq_wait_begin(&mut self, queues: &[EventQId], timeout: Timeout) -> core::result::Result<Get, Fault> {
        if queues.is_empty() || queues.len() > MAX_POLL_QUEUES {
            return Err(RtosError::InvalidArgument.into());
        }
        for &q in queues {
            self.eventq_cb(q)?;
        }
        for &q in queues {
            if let Some(ev) = self.eventq_pop(q) {
                return Ok(Get::Ready(ev));
            }
        }
        if timeout.is_no_wait() {
            return Err(RtosError::Timeout.into());
        }
        for &q in queues {
            if self.eventq_cb(q)?.waiter.is_some() {
                return Err(RtosError::EventQueueBusy.into());
            }
        }
        let ticks = timeout.ticks()?;

        let obj = match queues {
            [q] => WaitObj::EventQ(*q),
            _ => WaitObj::Poll,
        };
        let me = self.park_current(TaskState::Blocked(obj))?;
        let mut poll = [None; MAX_POLL_QUEUES];
        for (slot, &q) in poll.iter_mut().zip(queues) {
            *slot = Some(q);
            self.eventq_cb(q)?.waiter = Some(me);
        }
        self.tcb_mut(me).poll = poll;
        if let Some(n) = ticks {
            self.arm_timeout(me, n);
        }
        Ok(Get::Parked(me))
    }
}

impl<P: Port> Kernel<P> {
    /// 创建事件队列
    pub fn eventq_init(&self) -> Result<EventQId> {
        self.with_state(|s| {
            alloc_slot(&mut s.eventqs, EventQCb::new())
                .map(EventQId::from_index)
                .ok_or(RtosError::EventQueueSlotsFull)
        })
    }

    /// 投递事件到队列尾部
    ///
    /// 事件已经在某个队列中时什么也不做。
    pub fn eventq_put(&self, q: EventQId, ev: EventId) -> Result<()> {
        self.with_state(|s| s.eventq_post(q, ev))?;
        self.reschedule();
        Ok(())
    }

    /// 取出事件，不阻塞
    pub fn eventq_get_no_wait(&self, q: EventQId) -> Result<Option<Event>> {
        self.with_state(|s| {
            s.eventq_cb(q)?;
            Ok(s.eventq_pop(q))
        })
    }

    /// 取出事件，队列为空时等待
    ///
    /// # 返回值
    /// - `Ok(Event)`: 取到的事件
    /// - `Err(RtosError::Timeout)`: 超时
    /// - `Err(RtosError::EventQueueBusy)`: 已有其他任务在等待该队列
    /// - `Err(RtosError::WouldBlock)`: 主机移植层上已挂起
    pub fn eventq_get(&self, q: EventQId, timeout: Timeout) -> Result<Event> {
        self.eventq_poll(&[q], timeout)
    }

    /// 同时等待多个队列
    ///
    /// 多个队列都有事件时，取 `queues` 中排在最前的非空队列。
    pub fn eventq_poll(&self, queues: &[EventQId], timeout: Timeout) -> Result<Event> {
        match self.run_blocking(|s| s.eventq_wait_begin(queues, timeout))? {
            Get::Ready(ev) => Ok(ev),
            Get::Parked(me) => {
                self.reschedule();
                match self.finish_wait(me)? {
                    WaitResult::Event(ev) => Ok(ev),
                    _ => Err(RtosError::Timeout),
                }
            }
        }
    }

    /// 从队列中移除尚未被取走的事件
    pub fn eventq_remove(&self, q: EventQId, ev: EventId) -> Result<()> {
        self.with_state(|s| s.eventq_unlink(q, ev))
    }

    pub fn eventq_is_empty(&self, q: EventQId) -> Result<bool> {
        self.with_state(|s| s.eventq_cb(q).map(|cb| cb.head.is_none()))
    }

    /// 取出一个事件并调用它的处理函数
    ///
    /// 处理函数在临界区之外执行。
    pub fn eventq_run(&self, q: EventQId) -> Result<Event> {
        let ev = self.eventq_get(q, Timeout::Forever)?;
        let handler = self.with_state(|s| s.event_cb(ev.id).ok().and_then(|cb| cb.handler));
        if let Some(handler) = handler {
            handler(ev);
        }
        Ok(ev)
    }
}

impl<P: Port> Isr<'_, P> {
    /// 在中断中投递事件
    pub fn eventq_put(&self, q: EventQId, ev: EventId) -> Result<()> {
        self.kernel().with_state(|s| s.eventq_post(q, ev))
    }
}
