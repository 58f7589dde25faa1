//! 内核上下文
//!
//! [`Kernel`] 持有调度器以及全部内核对象（任务、信号量、互斥锁、
//! 事件队列、事件、callout）的状态。状态放在
//! `critical_section::Mutex<RefCell<_>>` 中，任何修改都发生在临界区里，
//! 所以任务和中断可以安全地共享同一个内核。
//!
//! 可以存在多个互不相干的 `Kernel`，主机测试里每个测试各建一个。

pub mod task;
pub mod scheduler;
pub mod time;

use core::cell::RefCell;
use critical_section::Mutex;

use crate::config::{MAX_CALLOUTS, MAX_EVENTQS, MAX_EVENTS, MAX_MUTEXES, MAX_SEMAPHORES, MAX_TASKS};
use crate::error::{resolve, FatalError, Fault, Result, RtosError};
use crate::hal::Port;
use crate::ipc::event::EventCb;
use crate::ipc::eventq::EventQCb;
use crate::sync::mutex::MutexCb;
use crate::sync::semaphore::SemCb;
use self::scheduler::{ReadyQueue, TimedList};
use self::task::{Link, TaskId, Tcb, WaitResult};
use self::time::callout::{CalloutCb, CalloutId};
use self::time::Tick;

/// 内核全部可变状态，只在临界区内访问
pub(crate) struct KernelState {
    pub(crate) tasks: [Tcb; MAX_TASKS],
    pub(crate) ready: ReadyQueue,
    /// 睡眠任务，按唤醒时刻排序
    pub(crate) sleeping: TimedList,
    /// 限时等待的任务，按超时时刻排序
    pub(crate) timeouts: TimedList,
    /// 调度器选定的任务
    pub(crate) current: Option<TaskId>,
    /// 上下文实际加载在 CPU 上的任务
    pub(crate) on_cpu: Option<TaskId>,
    pub(crate) idle: Option<TaskId>,
    pub(crate) started: bool,
    pub(crate) now: Tick,
    pub(crate) sems: [Option<SemCb>; MAX_SEMAPHORES],
    pub(crate) mutexes: [Option<MutexCb>; MAX_MUTEXES],
    pub(crate) eventqs: [Option<EventQCb>; MAX_EVENTQS],
    pub(crate) events: [Option<EventCb>; MAX_EVENTS],
    pub(crate) callouts: [Option<CalloutCb>; MAX_CALLOUTS],
    /// 已启动的 callout，按到期时刻排序
    pub(crate) callout_head: Option<CalloutId>,
    /// 正在执行的可阻塞操作是否来自中断上下文
    pub(crate) caller_in_isr: bool,
}

impl KernelState {
    const fn new() -> Self {
        Self {
            tasks: [const { Tcb::EMPTY }; MAX_TASKS],
            ready: ReadyQueue::new(),
            sleeping: TimedList::new(Link::Sched),
            timeouts: TimedList::new(Link::Timeout),
            current: None,
            on_cpu: None,
            idle: None,
            started: false,
            now: Tick::ZERO,
            sems: [const { None }; MAX_SEMAPHORES],
            mutexes: [const { None }; MAX_MUTEXES],
            eventqs: [const { None }; MAX_EVENTQS],
            events: [const { None }; MAX_EVENTS],
            callouts: [const { None }; MAX_CALLOUTS],
            callout_head: None,
            caller_in_isr: false,
        }
    }

    #[inline]
    pub(crate) fn tcb(&self, t: TaskId) -> &Tcb {
        &self.tasks[t.index()]
    }

    #[inline]
    pub(crate) fn tcb_mut(&mut self, t: TaskId) -> &mut Tcb {
        &mut self.tasks[t.index()]
    }

    /// 校验外部传入的任务句柄
    pub(crate) fn check_task(&self, t: TaskId) -> Result<()> {
        match self.tasks.get(t.index()) {
            Some(tcb) if tcb.used => Ok(()),
            _ => Err(RtosError::InvalidHandle),
        }
    }
}

/// 内核
///
/// # 示例
/// ```rust,ignore
/// static KERNEL: Kernel<CortexM3Port> = Kernel::new(CortexM3Port::new());
///
/// KERNEL.init(idle_stack)?;
/// KERNEL.task_init("net", net_task, 0, Priority::new(3), net_stack)?;
/// KERNEL.start()?;
/// ```
pub struct Kernel<P: Port> {
    port: P,
    state: Mutex<RefCell<KernelState>>,
}

impl<P: Port> Kernel<P> {
    pub const fn new(port: P) -> Self {
        Self {
            port,
            state: Mutex::new(RefCell::new(KernelState::new())),
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// 在临界区内访问内核状态
    #[inline]
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut KernelState) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }

    /// 在临界区内执行内部操作，临界区外处理致命错误
    #[inline]
    #[track_caller]
    pub(crate) fn run<T>(
        &self,
        f: impl FnOnce(&mut KernelState) -> core::result::Result<T, Fault>,
    ) -> Result<T> {
        resolve(self.with_state(f))
    }

    /// 执行可能挂起调用者的操作
    ///
    /// 先向移植层确认调用者是否处于中断上下文，中断里真正挂起会停机。
    #[inline]
    #[track_caller]
    pub(crate) fn run_blocking<T>(
        &self,
        f: impl FnOnce(&mut KernelState) -> core::result::Result<T, Fault>,
    ) -> Result<T> {
        let in_isr = self.port.in_isr();
        self.run(|s| {
            s.caller_in_isr = in_isr;
            f(s)
        })
    }

    /// 调度点：需要切换时通知移植层
    pub(crate) fn reschedule(&self) {
        if let Ok(true) = self.run(|s| s.sched()) {
            self.port.trigger_switch();
        }
    }

    /// 上下文切换回调，由移植层的切换处理程序调用
    ///
    /// # 参数
    /// - `saved_sp`: 被换出任务保存完寄存器后的栈指针
    ///
    /// # 返回值
    /// 下一个任务的栈指针
    ///
    /// 换出任务的栈底填充字被破坏时停机。
    pub fn switch_context(&self, saved_sp: usize) -> usize {
        let next = self.run(|s| {
            if let Some(prev) = s.on_cpu {
                s.tcb_mut(prev).sp = saved_sp;
                if s.tcb(prev).stack_overflowed() {
                    return Err(FatalError::StackOverflow(prev).into());
                }
            }
            let next = s.current.ok_or(Fault::Fatal(FatalError::NoReadyTask))?;
            s.on_cpu = Some(next);
            Ok(s.tcb(next).sp)
        });
        next.unwrap_or(saved_sp)
    }

    /// 进入中断上下文
    ///
    /// 返回的 [`Isr`] 只提供不会阻塞的操作；它被丢弃时（中断返回）
    /// 是一个调度点。
    pub fn enter_isr(&self) -> Isr<'_, P> {
        Isr { kernel: self }
    }

    /// 取走任务最近一次等待的结果
    ///
    /// 主机移植层上阻塞调用返回 `WouldBlock` 后，用它读取最终结果。
    pub fn take_wait_result(&self, task: TaskId) -> Option<WaitResult> {
        self.with_state(|s| {
            s.check_task(task).ok()?;
            s.tcb_mut(task).wait_result.take()
        })
    }

    /// 阻塞调用在调度点之后收尾
    pub(crate) fn finish_wait(&self, me: TaskId) -> Result<WaitResult> {
        match self.with_state(|s| s.tcb_mut(me).wait_result.take()) {
            Some(WaitResult::TimedOut) => Err(RtosError::Timeout),
            Some(r) => Ok(r),
            None => Err(RtosError::WouldBlock),
        }
    }
}

/// 中断上下文
///
/// 只暴露可以在中断里调用的操作。丢弃时触发调度检查，
/// 对应中断返回时的抢占点。
pub struct Isr<'k, P: Port> {
    kernel: &'k Kernel<P>,
}

impl<'k, P: Port> Isr<'k, P> {
    pub(crate) fn kernel(&self) -> &'k Kernel<P> {
        self.kernel
    }
}

impl<P: Port> Drop for Isr<'_, P> {
    fn drop(&mut self) {
        self.kernel.reschedule();
    }
}
