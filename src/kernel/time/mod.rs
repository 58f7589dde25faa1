//! 时间管理
//!
//! 节拍推进时按到期先后依次处理三类到期项：callout、睡眠任务、
//! 等待超时。到期时刻相同时先处理 callout，再处理睡眠，最后是超时。

pub mod tick;
pub mod callout;

pub use tick::{ms_to_ticks, ticks_to_ms, Tick, Timeout, MAX_DELAY_TICKS};

use crate::hal::Port;
use crate::kernel::task::{TaskState, WaitObj, WaitResult};
use crate::kernel::{Isr, Kernel, KernelState};

#[derive(Clone, Copy)]
enum Expiry {
    Callout,
    Sleep,
    Timeout,
}

impl KernelState {
    /// 推进节拍计数并处理所有已到期项
    pub(crate) fn advance(&mut self, ticks: u32) {
        // 每一步不超过 2^31-1，保证带符号比较有效
        let mut remaining = ticks;
        while remaining > 0 {
            let step = remaining.min(MAX_DELAY_TICKS);
            remaining -= step;
            self.now = self.now.wrapping_add(step);
            self.expire_due();
        }
    }

    fn expire_due(&mut self) {
        while let Some(kind) = self.next_due() {
            match kind {
                Expiry::Callout => self.callout_expire_first(),
                Expiry::Sleep => {
                    if let Some(t) = self.sleeping.pop_front(&mut self.tasks) {
                        self.tcb_mut(t).wait_result = Some(WaitResult::Elapsed);
                        self.make_ready(t);
                    }
                }
                Expiry::Timeout => {
                    if let Some(t) = self.timeouts.pop_front(&mut self.tasks) {
                        self.tcb_mut(t).timed = false;
                        self.abandon_wait(t);
                        self.tcb_mut(t).wait_result = Some(WaitResult::TimedOut);
                        self.make_ready(t);
                    }
                }
            }
        }
    }

    /// 找出最早到期的一项
    fn next_due(&self) -> Option<Expiry> {
        let now = self.now;
        let candidates = [
            (Expiry::Callout, self.callout_first_expiry()),
            (Expiry::Sleep, self.sleeping.first().map(|t| self.tcb(t).wake_at)),
            (Expiry::Timeout, self.timeouts.first().map(|t| self.tcb(t).wake_at)),
        ];
        let mut best: Option<(Expiry, i32)> = None;
        for (kind, at) in candidates {
            let Some(at) = at else { continue };
            if !now.has_reached(at) {
                continue;
            }
            let overdue = now.since(at);
            if best.is_none_or(|(_, b)| overdue > b) {
                best = Some((kind, overdue));
            }
        }
        best.map(|(kind, _)| kind)
    }

    /// 超时的任务从所等待对象上撤下
    fn abandon_wait(&mut self, t: crate::kernel::task::TaskId) {
        match self.tcb(t).state {
            TaskState::Blocked(WaitObj::Sem(s)) => {
                if let Some(cb) = self.sems[s.index()].as_mut() {
                    cb.waiters.remove(&mut self.tasks, t);
                }
            }
            TaskState::Blocked(WaitObj::Mutex(m)) => {
                // 持有者保留已继承的优先级，下一次完全释放互斥锁时重新计算
                if let Some(cb) = self.mutexes[m.index()].as_mut() {
                    cb.waiters.remove(&mut self.tasks, t);
                }
            }
            TaskState::Blocked(WaitObj::EventQ(_)) | TaskState::Blocked(WaitObj::Poll) => {
                self.clear_queue_waits(t);
            }
            _ => {}
        }
    }
}

impl<P: Port> Kernel<P> {
    /// 当前节拍
    pub fn time_get(&self) -> Tick {
        self.with_state(|s| s.now)
    }

    /// 推进节拍
    ///
    /// 通常由节拍中断通过 [`Isr::tick_advance`] 调用；低功耗空闲
    /// 唤醒后也可以在任务上下文中一次补上多个节拍。
    pub fn tick_advance(&self, ticks: u32) {
        self.with_state(|s| s.advance(ticks));
        self.reschedule();
    }
}

impl<P: Port> Isr<'_, P> {
    pub fn time_get(&self) -> Tick {
        self.kernel().time_get()
    }

    /// 节拍中断：推进节拍，调度检查推迟到中断返回
    pub fn tick_advance(&self, ticks: u32) {
        self.kernel().with_state(|s| s.advance(ticks));
    }
}
