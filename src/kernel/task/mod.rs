//! 任务管理
//!
//! 任务控制块保存在内核的定长槽位里。每个任务在任意时刻恰好处于
//! 一个位置：就绪集合、睡眠链表，或者某个同步对象的等待链表。
//! 限时等待的任务另外挂在超时链表上，使用独立的链接字段。

use crate::config::{MAX_POLL_QUEUES, MAX_TASKS, STACK_PATTERN, TICKS_PER_SEC};
use crate::error::{FatalError, Fault, Result, RtosError};
use crate::hal::{Port, StackWord, TaskEntry, CONTEXT_WORDS};
use crate::ipc::{Event, EventQId};
use crate::kernel::time::tick::MAX_DELAY_TICKS;
use crate::kernel::{Kernel, KernelState};
use crate::sync::{MutexId, SemId};
use crate::utils::define_handle;

// 子模块
pub mod priority;
pub mod builder;

// 重新导出
pub use priority::Priority;
pub use builder::TaskBuilder;

define_handle!(
    /// 任务句柄
    TaskId
);

/// 任务栈的最小字数：初始上下文加上一些余量
pub const MIN_STACK_WORDS: usize = CONTEXT_WORDS + 16;

/// 任务正在等待的对象
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitObj {
    Sem(SemId),
    Mutex(MutexId),
    EventQ(EventQId),
    /// 同时等待多个事件队列
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Sleeping,
    Blocked(WaitObj),
}

/// 一次阻塞等待的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// 获得了信号量或互斥锁
    Acquired,
    /// 从事件队列收到事件
    Event(Event),
    /// 睡眠时间到
    Elapsed,
    /// 等待超时
    TimedOut,
}

/// 任务信息快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: &'static str,
    /// 创建时的优先级
    pub base_priority: Priority,
    /// 当前有效优先级（可能因优先级继承而提升）
    pub priority: Priority,
    pub state: TaskState,
    /// 被调度运行的次数
    pub ctx_switches: u32,
    pub stack_words: usize,
    /// 栈使用量的历史最高值（字）
    pub stack_used: usize,
}

/// 链接字段选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    /// 就绪、睡眠、等待链表共用的字段
    Sched,
    /// 超时链表
    Timeout,
}

/// 任务控制块
pub(crate) struct Tcb {
    pub(crate) used: bool,
    pub(crate) name: &'static str,
    pub(crate) state: TaskState,
    pub(crate) base_prio: Priority,
    pub(crate) prio: Priority,
    pub(crate) sp: usize,
    /// 栈最低地址，保存为整数以便内核状态可以跨上下文共享
    pub(crate) stack_base: usize,
    pub(crate) stack_words: usize,
    /// 唤醒或超时时刻
    pub(crate) wake_at: crate::kernel::time::Tick,
    /// 是否挂在超时链表上
    pub(crate) timed: bool,
    pub(crate) next: Option<TaskId>,
    pub(crate) tmo_next: Option<TaskId>,
    pub(crate) wait_result: Option<WaitResult>,
    /// 正在等待的事件队列
    pub(crate) poll: [Option<EventQId>; MAX_POLL_QUEUES],
    pub(crate) ctx_switches: u32,
}

impl Tcb {
    pub(crate) const EMPTY: Tcb = Tcb {
        used: false,
        name: "",
        state: TaskState::Ready,
        base_prio: Priority::IDLE,
        prio: Priority::IDLE,
        sp: 0,
        stack_base: 0,
        stack_words: 0,
        wake_at: crate::kernel::time::Tick::ZERO,
        timed: false,
        next: None,
        tmo_next: None,
        wait_result: None,
        poll: [None; MAX_POLL_QUEUES],
        ctx_switches: 0,
    };

    #[inline]
    pub(crate) fn link(&self, link: Link) -> Option<TaskId> {
        match link {
            Link::Sched => self.next,
            Link::Timeout => self.tmo_next,
        }
    }

    #[inline]
    pub(crate) fn set_link(&mut self, link: Link, to: Option<TaskId>) {
        match link {
            Link::Sched => self.next = to,
            Link::Timeout => self.tmo_next = to,
        }
    }

    fn stack_word(&self, index: usize) -> StackWord {
        // SAFETY: 栈在创建任务时以 &'static mut 交给内核，之后只通过这个地址访问
        unsafe { (self.stack_base as *const StackWord).add(index).read_volatile() }
    }

    /// 栈底填充字是否被覆盖
    pub(crate) fn stack_overflowed(&self) -> bool {
        self.stack_base != 0 && self.stack_word(0) != STACK_PATTERN
    }

    fn stack_used(&self) -> usize {
        let unused = (0..self.stack_words)
            .take_while(|&i| self.stack_word(i) == STACK_PATTERN)
            .count();
        self.stack_words - unused
    }

    fn info(&self, id: TaskId) -> TaskInfo {
        TaskInfo {
            id,
            name: self.name,
            base_priority: self.base_prio,
            priority: self.prio,
            state: self.state,
            ctx_switches: self.ctx_switches,
            stack_words: self.stack_words,
            stack_used: self.stack_used(),
        }
    }
}

impl<P: Port> Kernel<P> {
    /// 初始化内核并创建空闲任务
    ///
    /// # 参数
    /// - `idle_stack`: 空闲任务的栈
    ///
    /// # 返回值
    /// 空闲任务的句柄
    pub fn init(&self, idle_stack: &'static mut [StackWord]) -> Result<TaskId> {
        let entry = self.port().idle_entry();
        self.spawn("idle", entry, 0, Priority::IDLE, idle_stack)
    }

    /// 启动调度器
    ///
    /// 选出最高优先级的就绪任务，启动节拍源并布置第一次上下文切换。
    /// 必须先调用 [`Kernel::init`]。
    pub fn start(&self) -> Result<()> {
        let sp = self.run(|s| {
            if s.idle.is_none() || s.started {
                return Err(RtosError::InvalidArgument.into());
            }
            s.started = true;
            s.sched()?;
            let first = s.current.ok_or(Fault::Fatal(FatalError::NoReadyTask))?;
            Ok(s.tcb(first).sp)
        })?;
        crate::info!("kernel started");
        self.port().start_tick(TICKS_PER_SEC);
        self.port().start_first_task(sp);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.with_state(|s| s.started)
    }

    /// 创建任务
    ///
    /// # 参数
    /// - `name`: 任务名称
    /// - `entry`: 任务入口函数
    /// - `arg`: 传给入口函数的参数
    /// - `prio`: 优先级，不能与已有任务重复，255 保留给空闲任务
    /// - `stack`: 任务栈，至少 [`MIN_STACK_WORDS`] 字
    ///
    /// # 返回值
    /// - `Ok(TaskId)`: 新任务的句柄，任务已就绪
    /// - `Err(RtosError::PriorityInUse)`: 优先级已被占用
    /// - `Err(RtosError::TaskSlotsFull)`: 任务槽位已满
    ///
    /// 调度器已启动时，新任务优先级更高会立即抢占调用者。
    pub fn task_init(
        &self,
        name: &'static str,
        entry: TaskEntry,
        arg: usize,
        prio: Priority,
        stack: &'static mut [StackWord],
    ) -> Result<TaskId> {
        if prio.is_idle() {
            return Err(RtosError::InvalidArgument);
        }
        self.spawn(name, entry, arg, prio, stack)
    }

    fn spawn(
        &self,
        name: &'static str,
        entry: TaskEntry,
        arg: usize,
        prio: Priority,
        stack: &'static mut [StackWord],
    ) -> Result<TaskId> {
        if stack.len() < MIN_STACK_WORDS {
            crate::warn!("task '{}': stack of {} words too small", name, stack.len());
            return Err(RtosError::InvalidArgument);
        }
        // 检查通过之前不写调用者的栈
        self.run(|s| s.free_task_slot(prio))?;
        stack.fill(STACK_PATTERN);
        let sp = self.port().init_task_stack(stack, entry, arg);
        let stack_base = stack.as_mut_ptr() as usize;
        let stack_words = stack.len();

        let id = self.run(|s| {
            let id = TaskId::from_index(s.free_task_slot(prio)?);
            *s.tcb_mut(id) = Tcb {
                used: true,
                name,
                base_prio: prio,
                prio,
                sp,
                stack_base,
                stack_words,
                ..Tcb::EMPTY
            };
            if prio.is_idle() {
                s.idle = Some(id);
            }
            s.make_ready(id);
            Ok(id)
        })?;

        crate::info!("task '{}' created, prio {}", name, prio.as_u8());
        self.reschedule();
        Ok(id)
    }

    /// 当前运行的任务
    pub fn current_task(&self) -> Option<TaskId> {
        self.with_state(|s| s.current)
    }

    pub fn task_state(&self, task: TaskId) -> Result<TaskState> {
        self.with_state(|s| {
            s.check_task(task)?;
            Ok(s.tcb(task).state)
        })
    }

    /// 任务当前的有效优先级
    pub fn task_priority(&self, task: TaskId) -> Result<Priority> {
        self.with_state(|s| {
            s.check_task(task)?;
            Ok(s.tcb(task).prio)
        })
    }

    pub fn task_info(&self, task: TaskId) -> Result<TaskInfo> {
        self.with_state(|s| {
            s.check_task(task)?;
            Ok(s.tcb(task).info(task))
        })
    }

    /// 遍历所有任务的信息快照
    pub fn task_info_iter(&self) -> impl Iterator<Item = TaskInfo> + '_ {
        (0..MAX_TASKS).filter_map(move |i| self.task_info(TaskId::from_index(i)).ok())
    }

    /// 让出处理器
    ///
    /// 当前任务排到同优先级就绪任务之后；没有同级任务时继续运行。
    pub fn task_yield(&self) {
        self.with_state(|s| {
            if !s.started {
                return;
            }
            if let Some(me) = s.current {
                s.ready.remove(&mut s.tasks, me);
                s.ready.push_back(&mut s.tasks, me);
            }
        });
        self.reschedule();
    }

    /// 当前任务睡眠 `ticks` 个节拍
    ///
    /// `ticks` 为 0 时等同于 [`Kernel::task_yield`]。
    pub fn task_sleep(&self, ticks: u32) -> Result<()> {
        if ticks == 0 {
            self.task_yield();
            return Ok(());
        }
        if ticks > MAX_DELAY_TICKS {
            return Err(RtosError::InvalidArgument);
        }
        let me = self.run_blocking(|s| {
            let me = s.park_current(TaskState::Sleeping)?;
            s.tcb_mut(me).wake_at = s.now.wrapping_add(ticks);
            s.sleeping.insert(&mut s.tasks, me);
            Ok(me)
        })?;
        self.reschedule();
        self.finish_wait(me).map(|_| ())
    }

    /// [`Kernel::task_sleep`] 的别名
    pub fn time_delay(&self, ticks: u32) -> Result<()> {
        self.task_sleep(ticks)
    }
}

impl KernelState {
    /// 新任务可用的槽位，优先级冲突或槽位用尽时返回错误
    fn free_task_slot(&self, prio: Priority) -> core::result::Result<usize, Fault> {
        if prio.is_idle() && self.idle.is_some() {
            return Err(RtosError::InvalidArgument.into());
        }
        if self.tasks.iter().any(|t| t.used && t.base_prio == prio) {
            return Err(RtosError::PriorityInUse.into());
        }
        let index = self
            .tasks
            .iter()
            .position(|t| !t.used)
            .ok_or(RtosError::TaskSlotsFull)?;
        Ok(index)
    }

    /// 把当前任务移出就绪集合，准备阻塞或睡眠
    pub(crate) fn park_current(&mut self, state: TaskState) -> core::result::Result<TaskId, Fault> {
        if !self.started {
            return Err(RtosError::NotStarted.into());
        }
        if self.caller_in_isr {
            return Err(FatalError::BlockedInIsr.into());
        }
        let me = self.current.ok_or(RtosError::NotStarted)?;
        if self.idle == Some(me) {
            return Err(FatalError::IdleBlocked.into());
        }
        self.ready.remove(&mut self.tasks, me);
        let tcb = self.tcb_mut(me);
        tcb.state = state;
        tcb.wait_result = None;
        Ok(me)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::HostPort;
    use std::boxed::Box;
    use std::vec;

    fn stack(words: usize) -> &'static mut [StackWord] {
        Box::leak(vec![0; words].into_boxed_slice())
    }

    fn entry(_arg: usize) {}

    fn kernel() -> Kernel<HostPort> {
        let k = Kernel::new(HostPort::new());
        k.init(stack(64)).unwrap();
        k
    }

    #[test]
    fn test_task_init_rejects_duplicate_priority() {
        let k = kernel();
        k.task_init("a", entry, 0, Priority::new(4), stack(64)).unwrap();
        assert_eq!(
            k.task_init("b", entry, 0, Priority::new(4), stack(64)),
            Err(RtosError::PriorityInUse)
        );
    }

    #[test]
    fn test_rejected_task_leaves_stack_untouched() {
        let k = kernel();
        k.task_init("a", entry, 0, Priority::new(4), stack(64)).unwrap();
        let rejected = stack(64);
        let base = rejected.as_ptr();
        assert_eq!(
            k.task_init("b", entry, 0, Priority::new(4), rejected),
            Err(RtosError::PriorityInUse)
        );
        // SAFETY: 栈是泄漏的堆内存，内核没有保留它
        let words = unsafe { core::slice::from_raw_parts(base, 64) };
        assert!(words.iter().all(|&w| w == 0));
    }

    #[test]
    fn test_task_init_rejects_idle_priority_and_small_stack() {
        let k = kernel();
        assert_eq!(
            k.task_init("a", entry, 0, Priority::IDLE, stack(64)),
            Err(RtosError::InvalidArgument)
        );
        assert_eq!(
            k.task_init("b", entry, 0, Priority::new(1), stack(MIN_STACK_WORDS - 1)),
            Err(RtosError::InvalidArgument)
        );
    }

    #[test]
    fn test_task_slots_full() {
        let k = kernel();
        for i in 1..MAX_TASKS {
            k.task_init("t", entry, 0, Priority::new(i as u8), stack(48)).unwrap();
        }
        assert_eq!(
            k.task_init("extra", entry, 0, Priority::new(200), stack(48)),
            Err(RtosError::TaskSlotsFull)
        );
    }

    #[test]
    fn test_init_twice_fails() {
        let k = kernel();
        assert_eq!(k.init(stack(64)), Err(RtosError::InvalidArgument));
    }

    #[test]
    fn test_task_info_reports_stack_usage() {
        let k = kernel();
        let t = k.task_init("worker", entry, 7, Priority::new(9), stack(128)).unwrap();
        let info = k.task_info(t).unwrap();
        assert_eq!(info.name, "worker");
        assert_eq!(info.base_priority, Priority::new(9));
        assert_eq!(info.state, TaskState::Ready);
        assert_eq!(info.stack_words, 128);
        assert!(info.stack_used >= CONTEXT_WORDS);
        assert!(info.stack_used < 128);
        assert_eq!(k.task_info_iter().count(), 2);
    }

    #[test]
    fn test_sleep_before_start_is_not_started() {
        let k = kernel();
        assert_eq!(k.task_sleep(3), Err(RtosError::NotStarted));
    }

    #[test]
    fn test_start_picks_highest_priority() {
        let k = kernel();
        let lo = k.task_init("lo", entry, 0, Priority::new(20), stack(64)).unwrap();
        let hi = k.task_init("hi", entry, 0, Priority::new(2), stack(64)).unwrap();
        k.start().unwrap();
        assert_eq!(k.current_task(), Some(hi));
        assert_eq!(k.task_state(hi), Ok(TaskState::Running));
        assert_eq!(k.task_state(lo), Ok(TaskState::Ready));
        assert!(k.port().first_task_sp().is_some());
        assert_eq!(k.port().tick_rate(), TICKS_PER_SEC);
        assert_eq!(k.start(), Err(RtosError::InvalidArgument));
    }

    #[test]
    fn test_start_requires_init() {
        let k = Kernel::new(HostPort::new());
        assert_eq!(k.start(), Err(RtosError::InvalidArgument));
    }

    #[test]
    #[should_panic(expected = "idle task attempted to block")]
    fn test_idle_cannot_sleep() {
        let k = kernel();
        k.start().unwrap();
        let _ = k.task_sleep(5);
    }
}
