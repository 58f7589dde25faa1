//! 计数信号量
//!
//! 释放时如果有等待者，令牌直接交给优先级最高的等待者，计数不变；
//! 没有等待者才增加计数。

use super::wait::WaitList;
use super::SemId;
use crate::config::SEM_MAX_TOKENS;
use crate::error::{Fault, Result, RtosError};
use crate::hal::Port;
use crate::kernel::task::{TaskId, WaitObj, TaskState, WaitResult};
use crate::kernel::time::Timeout;
use crate::kernel::{Isr, Kernel, KernelState};
use crate::utils::alloc_slot;

pub(crate) struct SemCb {
    pub(crate) tokens: u16,
    pub(crate) waiters: WaitList,
}

/// 获取操作的走向
pub(crate) enum Pend {
    /// 立即成功
    Done,
    /// 调用者已挂起
    Parked(TaskId),
}

impl KernelState {
    fn sem_cb(&mut self, sem: SemId) -> Result<&mut SemCb> {
        self.sems
            .get_mut(sem.index())
            .and_then(Option::as_mut)
            .ok_or(RtosError::InvalidHandle)
    }

    fn sem_pend_begin(&mut self, sem: SemId, timeout: Timeout) -> core::result::Result<Pend, Fault> {
        let cb = self.sem_cb(sem)?;
        if cb.tokens > 0 {
            cb.tokens -= 1;
            return Ok(Pend::Done);
        }
        if timeout.is_no_wait() {
            return Err(RtosError::Timeout.into());
        }
        let ticks = timeout.ticks()?;
        let me = self.park_current(TaskState::Blocked(WaitObj::Sem(sem)))?;
        if let Some(cb) = self.sems[sem.index()].as_mut() {
            cb.waiters.insert(&mut self.tasks, me);
        }
        if let Some(n) = ticks {
            self.arm_timeout(me, n);
        }
        Ok(Pend::Parked(me))
    }

    pub(crate) fn sem_release_inner(&mut self, sem: SemId) -> Result<()> {
        let cb = self.sems
            .get_mut(sem.index())
            .and_then(Option::as_mut)
            .ok_or(RtosError::InvalidHandle)?;
        match cb.waiters.pop_front(&mut self.tasks) {
            Some(t) => {
                self.complete_wait(t, WaitResult::Acquired);
                Ok(())
            }
            None if cb.tokens == SEM_MAX_TOKENS => Err(RtosError::SemaphoreOverflow),
            None => {
                cb.tokens += 1;
                Ok(())
            }
        }
    }
}

impl<P: Port> Kernel<P> {
    /// 创建信号量
    ///
    /// # 参数
    /// - `tokens`: 初始令牌数
    pub fn sem_init(&self, tokens: u16) -> Result<SemId> {
        self.with_state(|s| {
            let cb = SemCb { tokens, waiters: WaitList::new() };
            alloc_slot(&mut s.sems, cb)
                .map(SemId::from_index)
                .ok_or(RtosError::SemaphoreSlotsFull)
        })
    }

    /// 获取一个令牌
    ///
    /// # 返回值
    /// - `Ok(())`: 获得令牌
    /// - `Err(RtosError::Timeout)`: 超时，或 `NoWait` 时没有令牌
    /// - `Err(RtosError::NotStarted)`: 需要阻塞但调度器未启动
    /// - `Err(RtosError::WouldBlock)`: 主机移植层上已挂起，结果稍后用
    ///   [`Kernel::take_wait_result`] 取回
    pub fn sem_pend(&self, sem: SemId, timeout: Timeout) -> Result<()> {
        match self.run_blocking(|s| s.sem_pend_begin(sem, timeout))? {
            Pend::Done => Ok(()),
            Pend::Parked(me) => {
                self.reschedule();
                self.finish_wait(me).map(|_| ())
            }
        }
    }

    /// 释放一个令牌
    ///
    /// # 返回值
    /// - `Err(RtosError::SemaphoreOverflow)`: 计数已达上限
    pub fn sem_release(&self, sem: SemId) -> Result<()> {
        self.with_state(|s| s.sem_release_inner(sem))?;
        self.reschedule();
        Ok(())
    }

    /// 当前令牌数
    pub fn sem_count(&self, sem: SemId) -> Result<u16> {
        self.with_state(|s| s.sem_cb(sem).map(|cb| cb.tokens))
    }

    /// 等待者数量
    pub fn sem_waiters(&self, sem: SemId) -> Result<usize> {
        self.with_state(|s| {
            let cb = s.sems
                .get(sem.index())
                .and_then(Option::as_ref)
                .ok_or(RtosError::InvalidHandle)?;
            Ok(cb.waiters.len(&s.tasks))
        })
    }
}

impl<P: Port> Isr<'_, P> {
    /// 在中断中释放令牌，调度检查推迟到中断返回
    pub fn sem_release(&self, sem: SemId) -> Result<()> {
        self.kernel().with_state(|s| s.sem_release_inner(sem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::fixture::{host_kernel, spawn};

    #[test]
    fn test_fast_path_allowed_in_interrupt_context() {
        let k = host_kernel();
        let _t = spawn(&k, "t", 4);
        k.start().unwrap();
        let sem = k.sem_init(1).unwrap();
        k.port().set_in_isr(true);
        k.sem_pend(sem, Timeout::Forever).unwrap();
        assert_eq!(k.sem_pend(sem, Timeout::NoWait), Err(RtosError::Timeout));
        k.port().set_in_isr(false);
    }

    #[test]
    #[should_panic(expected = "blocking call from interrupt context")]
    fn test_blocking_in_interrupt_context_halts() {
        let k = host_kernel();
        let _t = spawn(&k, "t", 4);
        k.start().unwrap();
        let sem = k.sem_init(0).unwrap();
        k.port().set_in_isr(true);
        let _ = k.sem_pend(sem, Timeout::Forever);
    }

    #[test]
    fn test_counting_without_waiters() {
        let k = host_kernel();
        let sem = k.sem_init(2).unwrap();
        assert_eq!(k.sem_pend(sem, Timeout::NoWait), Ok(()));
        assert_eq!(k.sem_pend(sem, Timeout::NoWait), Ok(()));
        assert_eq!(k.sem_pend(sem, Timeout::NoWait), Err(RtosError::Timeout));
        assert_eq!(k.sem_count(sem), Ok(0));
        k.sem_release(sem).unwrap();
        assert_eq!(k.sem_count(sem), Ok(1));
    }

    #[test]
    fn test_pend_needs_started_scheduler_to_block() {
        let k = host_kernel();
        let sem = k.sem_init(0).unwrap();
        assert_eq!(k.sem_pend(sem, Timeout::Forever), Err(RtosError::NotStarted));
    }

    #[test]
    fn test_release_hands_token_to_waiter() {
        let k = host_kernel();
        let a = spawn(&k, "a", 5);
        k.start().unwrap();
        let sem = k.sem_init(0).unwrap();

        assert_eq!(k.sem_pend(sem, Timeout::Forever), Err(RtosError::WouldBlock));
        assert_eq!(k.task_state(a), Ok(TaskState::Blocked(WaitObj::Sem(sem))));
        assert_eq!(k.sem_waiters(sem), Ok(1));
        assert_ne!(k.current_task(), Some(a));

        k.sem_release(sem).unwrap();
        assert_eq!(k.sem_count(sem), Ok(0));
        assert_eq!(k.sem_waiters(sem), Ok(0));
        assert_eq!(k.current_task(), Some(a));
        assert_eq!(k.take_wait_result(a), Some(WaitResult::Acquired));
    }

    #[test]
    fn test_highest_priority_waiter_wins() {
        let k = host_kernel();
        let hi = spawn(&k, "hi", 2);
        let lo = spawn(&k, "lo", 6);
        k.start().unwrap();
        let sem = k.sem_init(0).unwrap();

        assert_eq!(k.current_task(), Some(hi));
        assert_eq!(k.sem_pend(sem, Timeout::Forever), Err(RtosError::WouldBlock));
        assert_eq!(k.current_task(), Some(lo));
        assert_eq!(k.sem_pend(sem, Timeout::Forever), Err(RtosError::WouldBlock));
        assert_eq!(k.sem_waiters(sem), Ok(2));

        k.sem_release(sem).unwrap();
        assert_eq!(k.current_task(), Some(hi));
        assert_eq!(k.task_state(lo), Ok(TaskState::Blocked(WaitObj::Sem(sem))));
    }

    #[test]
    fn test_pend_times_out() {
        let k = host_kernel();
        let a = spawn(&k, "a", 5);
        k.start().unwrap();
        let sem = k.sem_init(0).unwrap();

        assert_eq!(k.sem_pend(sem, Timeout::Ticks(5)), Err(RtosError::WouldBlock));
        k.tick_advance(4);
        assert_eq!(k.task_state(a), Ok(TaskState::Blocked(WaitObj::Sem(sem))));
        k.tick_advance(1);
        assert_eq!(k.current_task(), Some(a));
        assert_eq!(k.take_wait_result(a), Some(WaitResult::TimedOut));
        assert_eq!(k.sem_waiters(sem), Ok(0));

        // 超时后的释放只增加计数
        k.sem_release(sem).unwrap();
        assert_eq!(k.sem_count(sem), Ok(1));
    }

    #[test]
    fn test_release_overflow() {
        let k = host_kernel();
        let sem = k.sem_init(SEM_MAX_TOKENS).unwrap();
        assert_eq!(k.sem_release(sem), Err(RtosError::SemaphoreOverflow));
        assert_eq!(k.sem_count(sem), Ok(SEM_MAX_TOKENS));
    }

    #[test]
    fn test_isr_release_defers_switch() {
        let k = host_kernel();
        let a = spawn(&k, "a", 5);
        k.start().unwrap();
        let sem = k.sem_init(0).unwrap();
        assert_eq!(k.sem_pend(sem, Timeout::Forever), Err(RtosError::WouldBlock));
        let before = k.port().switch_requests();

        {
            let isr = k.enter_isr();
            isr.sem_release(sem).unwrap();
            assert_eq!(k.port().switch_requests(), before);
        }
        assert_eq!(k.port().switch_requests(), before + 1);
        assert_eq!(k.current_task(), Some(a));
    }

    #[test]
    fn test_invalid_handle() {
        let k = host_kernel();
        let bogus = SemId::from_index(crate::config::MAX_SEMAPHORES - 1);
        assert_eq!(k.sem_release(bogus), Err(RtosError::InvalidHandle));
    }
}
