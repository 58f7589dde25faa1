//! 互斥锁
//!
//! 支持递归持有和优先级继承：高优先级任务等待时，持有者的有效优先级
//! 提升到等待者的优先级。继承只作用于直接持有者，不沿等待链传递。
//! 持有者最后一次释放时，有效优先级重新取自身优先级和它仍持有的其他
//! 互斥锁上等待者中的最高者；锁直接交给优先级最高的等待者。

use super::guard::MutexGuard;
use super::semaphore::Pend;
use super::wait::WaitList;
use super::MutexId;
use crate::error::{FatalError, Fault, Result, RtosError};
use crate::hal::Port;
use crate::kernel::task::{Priority, TaskId, TaskState, WaitObj, WaitResult};
use crate::kernel::time::Timeout;
use crate::kernel::{Kernel, KernelState};
use crate::utils::alloc_slot;

pub(crate) struct MutexCb {
    pub(crate) owner: Option<TaskId>,
    /// 递归持有层数，0 表示空闲
    pub(crate) level: u16,
    pub(crate) waiters: WaitList,
}

impl MutexCb {
    const fn new() -> Self {
        Self {
            owner: None,
            level: 0,
            waiters: WaitList::new(),
        }
    }
}

impl KernelState {
    fn mutex_cb(&mut self, m: MutexId) -> Result<&mut MutexCb> {
        self.mutexes
            .get_mut(m.index())
            .and_then(Option::as_mut)
            .ok_or(RtosError::InvalidHandle)
    }

    /// 任务应有的有效优先级：自身优先级与它持有的各互斥锁上等待者的最高者
    fn inherited_priority(&self, t: TaskId) -> Priority {
        let mut prio = self.tcb(t).base_prio;
        for cb in self.mutexes.iter().flatten() {
            if cb.owner != Some(t) {
                continue;
            }
            if let Some(p) = cb.waiters.highest(&self.tasks) {
                if p.is_higher_than(prio) {
                    prio = p;
                }
            }
        }
        prio
    }

    fn mutex_pend_begin(&mut self, m: MutexId, timeout: Timeout) -> core::result::Result<Pend, Fault> {
        self.mutex_cb(m)?;
        if !self.started {
            return Err(RtosError::NotStarted.into());
        }
        let me = self.current.ok_or(RtosError::NotStarted)?;
        let my_prio = self.tcb(me).prio;

        let cb = self.mutex_cb(m)?;
        if cb.level == 0 {
            cb.owner = Some(me);
            cb.level = 1;
            return Ok(Pend::Done);
        }
        let owner = match cb.owner {
            Some(owner) if owner == me => {
                cb.level = cb.level.checked_add(1).ok_or(RtosError::InvalidArgument)?;
                return Ok(Pend::Done);
            }
            Some(owner) => owner,
            None => return Err(FatalError::MutexCorrupt.into()),
        };
        if timeout.is_no_wait() {
            return Err(RtosError::Timeout.into());
        }
        let ticks = timeout.ticks()?;

        if my_prio.is_higher_than(self.tcb(owner).prio) {
            self.set_effective_priority(owner, my_prio);
        }
        let me = self.park_current(TaskState::Blocked(WaitObj::Mutex(m)))?;
        if let Some(cb) = self.mutexes[m.index()].as_mut() {
            cb.waiters.insert(&mut self.tasks, me);
        }
        if let Some(n) = ticks {
            self.arm_timeout(me, n);
        }
        Ok(Pend::Parked(me))
    }

    fn mutex_release_inner(&mut self, m: MutexId) -> core::result::Result<(), Fault> {
        self.mutex_cb(m)?;
        if !self.started {
            return Err(RtosError::NotStarted.into());
        }
        let me = self.current.ok_or(RtosError::NotStarted)?;
        let cb = self.mutex_cb(m)?;
        if cb.level == 0 || cb.owner != Some(me) {
            return Err(FatalError::MutexNotOwner.into());
        }
        cb.level -= 1;
        if cb.level > 0 {
            return Ok(());
        }
        cb.owner = None;
        let next = match self.mutexes[m.index()].as_mut() {
            Some(cb) => cb.waiters.pop_front(&mut self.tasks),
            None => None,
        };

        let restore = self.inherited_priority(me);
        self.set_effective_priority(me, restore);

        if let Some(next) = next {
            if let Some(cb) = self.mutexes[m.index()].as_mut() {
                cb.owner = Some(next);
                cb.level = 1;
            }
            self.complete_wait(next, WaitResult::Acquired);
            let prio = self.inherited_priority(next);
            if prio.is_higher_than(self.tcb(next).prio) {
                self.set_effective_priority(next, prio);
            }
        }
        Ok(())
    }
}

impl<P: Port> Kernel<P> {
    /// 创建互斥锁
    pub fn mutex_init(&self) -> Result<MutexId> {
        self.with_state(|s| {
            alloc_slot(&mut s.mutexes, MutexCb::new())
                .map(MutexId::from_index)
                .ok_or(RtosError::MutexSlotsFull)
        })
    }

    /// 获取互斥锁
    ///
    /// 当前任务已持有时层数加一并立即返回。
    ///
    /// # 返回值
    /// - `Ok(())`: 获得锁
    /// - `Err(RtosError::Timeout)`: 超时，或 `NoWait` 时锁被占用
    /// - `Err(RtosError::NotStarted)`: 调度器未启动
    /// - `Err(RtosError::WouldBlock)`: 主机移植层上已挂起
    pub fn mutex_pend(&self, m: MutexId, timeout: Timeout) -> Result<()> {
        match self.run_blocking(|s| s.mutex_pend_begin(m, timeout))? {
            Pend::Done => Ok(()),
            Pend::Parked(me) => {
                self.reschedule();
                self.finish_wait(me).map(|_| ())
            }
        }
    }

    /// 获取互斥锁并返回守卫，守卫丢弃时释放一层
    pub fn mutex_lock(&self, m: MutexId, timeout: Timeout) -> Result<MutexGuard<'_, P>> {
        self.mutex_pend(m, timeout)?;
        Ok(MutexGuard::new(self, m))
    }

    /// 释放互斥锁
    ///
    /// 非持有者释放会导致停机。
    pub fn mutex_release(&self, m: MutexId) -> Result<()> {
        self.run(|s| s.mutex_release_inner(m))?;
        self.reschedule();
        Ok(())
    }

    /// 当前持有者
    pub fn mutex_owner(&self, m: MutexId) -> Result<Option<TaskId>> {
        self.with_state(|s| s.mutex_cb(m).map(|cb| cb.owner))
    }

    /// 递归持有层数
    pub fn mutex_level(&self, m: MutexId) -> Result<u16> {
        self.with_state(|s| s.mutex_cb(m).map(|cb| cb.level))
    }

    pub fn mutex_waiters(&self, m: MutexId) -> Result<usize> {
        self.with_state(|s| {
            let cb = s.mutexes
                .get(m.index())
                .and_then(Option::as_ref)
                .ok_or(RtosError::InvalidHandle)?;
            Ok(cb.waiters.len(&s.tasks))
        })
    }
}
