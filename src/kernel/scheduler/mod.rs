//! 调度器
//!
//! 固定优先级抢占式调度：任何时刻运行的都是就绪集合中优先级最高的
//! 任务，同优先级按就绪先后轮流（FIFO）。正在运行的任务仍然留在就绪
//! 集合中，位于其优先级队列的队首。
//!
//! 调度决定在临界区内做出并立即提交（更新 `current`），真正的寄存器
//! 切换由移植层在之后完成。

use crate::config::PRIO_LEVELS;
use crate::error::{FatalError, Fault};
use crate::kernel::task::{Link, Priority, TaskId, TaskState, Tcb, WaitResult};
use crate::kernel::KernelState;

const BITMAP_WORDS: usize = PRIO_LEVELS / 32;

/// 就绪队列
///
/// 使用位图 + 每优先级一个 FIFO 链表实现：
/// - `bitmap`: 第 i 位为 1 表示优先级 i 有就绪任务
/// - 查找最高优先级：找最低的置位，使用 `trailing_zeros()`
/// - 入队 O(1)，出队需要在同一优先级内遍历
pub(crate) struct ReadyQueue {
    bitmap: [u32; BITMAP_WORDS],
    heads: [Option<TaskId>; PRIO_LEVELS],
    tails: [Option<TaskId>; PRIO_LEVELS],
}

impl ReadyQueue {
    pub(crate) const fn new() -> Self {
        Self {
            bitmap: [0; BITMAP_WORDS],
            heads: [None; PRIO_LEVELS],
            tails: [None; PRIO_LEVELS],
        }
    }

    /// 按任务当前的有效优先级排到队尾 - O(1)
    pub(crate) fn push_back(&mut self, tasks: &mut [Tcb], t: TaskId) {
        let level = tasks[t.index()].prio.level();
        tasks[t.index()].next = None;
        match self.tails[level] {
            Some(tail) => tasks[tail.index()].next = Some(t),
            None => self.heads[level] = Some(t),
        }
        self.tails[level] = Some(t);
        self.bitmap[level / 32] |= 1 << (level % 32);
    }

    /// 从任务当前有效优先级的队列中摘除
    ///
    /// 修改任务优先级之前必须先摘除。
    pub(crate) fn remove(&mut self, tasks: &mut [Tcb], t: TaskId) -> bool {
        let level = tasks[t.index()].prio.level();
        let mut prev: Option<TaskId> = None;
        let mut cur = self.heads[level];
        while let Some(c) = cur {
            if c == t {
                let next = tasks[c.index()].next.take();
                match prev {
                    Some(p) => tasks[p.index()].next = next,
                    None => self.heads[level] = next,
                }
                if self.tails[level] == Some(t) {
                    self.tails[level] = prev;
                }
                if self.heads[level].is_none() {
                    self.bitmap[level / 32] &= !(1 << (level % 32));
                }
                return true;
            }
            prev = cur;
            cur = tasks[c.index()].next;
        }
        false
    }

    /// 最高优先级队列的队首
    pub(crate) fn highest(&self) -> Option<TaskId> {
        self.bitmap
            .iter()
            .enumerate()
            .find(|(_, word)| **word != 0)
            .and_then(|(i, word)| self.heads[i * 32 + word.trailing_zeros() as usize])
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bitmap.iter().all(|w| *w == 0)
    }
}

/// 按时刻排序的任务链表（睡眠链表、超时链表）
///
/// 时刻相同的按插入先后排列。比较使用带符号差值，计数器回绕不影响顺序。
pub(crate) struct TimedList {
    head: Option<TaskId>,
    link: Link,
}

impl TimedList {
    pub(crate) const fn new(link: Link) -> Self {
        Self { head: None, link }
    }

    pub(crate) fn first(&self) -> Option<TaskId> {
        self.head
    }

    /// 按 `wake_at` 插入
    pub(crate) fn insert(&mut self, tasks: &mut [Tcb], t: TaskId) {
        let at = tasks[t.index()].wake_at;
        let mut prev: Option<TaskId> = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            if at.is_before(tasks[c.index()].wake_at) {
                break;
            }
            prev = cur;
            cur = tasks[c.index()].link(self.link);
        }
        tasks[t.index()].set_link(self.link, cur);
        match prev {
            Some(p) => tasks[p.index()].set_link(self.link, Some(t)),
            None => self.head = Some(t),
        }
    }

    pub(crate) fn remove(&mut self, tasks: &mut [Tcb], t: TaskId) -> bool {
        let mut prev: Option<TaskId> = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            let next = tasks[c.index()].link(self.link);
            if c == t {
                match prev {
                    Some(p) => tasks[p.index()].set_link(self.link, next),
                    None => self.head = next,
                }
                tasks[c.index()].set_link(self.link, None);
                return true;
            }
            prev = cur;
            cur = next;
        }
        false
    }

    pub(crate) fn pop_front(&mut self, tasks: &mut [Tcb]) -> Option<TaskId> {
        let t = self.head?;
        self.head = tasks[t.index()].link(self.link);
        tasks[t.index()].set_link(self.link, None);
        Some(t)
    }
}

impl KernelState {
    /// 任务进入就绪集合，排在同优先级队尾
    pub(crate) fn make_ready(&mut self, t: TaskId) {
        self.tcb_mut(t).state = TaskState::Ready;
        self.ready.push_back(&mut self.tasks, t);
    }

    /// 限时等待：挂到超时链表
    pub(crate) fn arm_timeout(&mut self, t: TaskId, ticks: u32) {
        let at = self.now.wrapping_add(ticks);
        let tcb = self.tcb_mut(t);
        tcb.wake_at = at;
        tcb.timed = true;
        self.timeouts.insert(&mut self.tasks, t);
    }

    /// 等待结束：撤销超时、记录结果并重新就绪
    ///
    /// 调用者负责先把任务从所等待对象的等待链表中摘下。
    pub(crate) fn complete_wait(&mut self, t: TaskId, result: WaitResult) {
        if self.tcb(t).timed {
            self.timeouts.remove(&mut self.tasks, t);
            self.tcb_mut(t).timed = false;
        }
        self.tcb_mut(t).wait_result = Some(result);
        self.make_ready(t);
    }

    /// 修改任务的有效优先级
    ///
    /// 就绪中的任务移到新优先级队列的队尾；在等待链表中的任务保持
    /// 原位置。
    pub(crate) fn set_effective_priority(&mut self, t: TaskId, prio: Priority) {
        if self.tcb(t).prio == prio {
            return;
        }
        let queued = matches!(self.tcb(t).state, TaskState::Ready | TaskState::Running);
        if queued {
            self.ready.remove(&mut self.tasks, t);
        }
        self.tcb_mut(t).prio = prio;
        if queued {
            self.ready.push_back(&mut self.tasks, t);
        }
    }

    /// 调度决定
    ///
    /// 选出就绪集合中优先级最高的任务并提交为当前任务。
    ///
    /// # 返回值
    /// 是否需要上下文切换
    pub(crate) fn sched(&mut self) -> core::result::Result<bool, Fault> {
        if !self.started {
            return Ok(false);
        }
        let next = self.ready.highest().ok_or(FatalError::NoReadyTask)?;
        if self.current == Some(next) {
            self.tcb_mut(next).state = TaskState::Running;
            return Ok(false);
        }
        if let Some(prev) = self.current {
            if self.tcb(prev).state == TaskState::Running {
                self.tcb_mut(prev).state = TaskState::Ready;
            }
        }
        let tcb = self.tcb_mut(next);
        tcb.state = TaskState::Running;
        tcb.ctx_switches = tcb.ctx_switches.wrapping_add(1);
        self.current = Some(next);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::time::Tick;

    fn tasks_with(prios: &[u8]) -> [Tcb; 8] {
        let mut tasks = [const { Tcb::EMPTY }; 8];
        for (i, p) in prios.iter().enumerate() {
            tasks[i].used = true;
            tasks[i].prio = Priority::new(*p);
        }
        tasks
    }

    fn id(i: usize) -> TaskId {
        TaskId::from_index(i)
    }

    #[test]
    fn test_ready_queue_picks_lowest_value() {
        let mut tasks = tasks_with(&[40, 3, 200, 3]);
        let mut rq = ReadyQueue::new();
        assert!(rq.is_empty());
        for i in 0..4 {
            rq.push_back(&mut tasks, id(i));
        }
        assert_eq!(rq.highest(), Some(id(1)));
        assert!(rq.remove(&mut tasks, id(1)));
        assert_eq!(rq.highest(), Some(id(3)));
        assert!(rq.remove(&mut tasks, id(3)));
        assert_eq!(rq.highest(), Some(id(0)));
        assert!(!rq.remove(&mut tasks, id(3)));
    }

    #[test]
    fn test_ready_queue_fifo_within_level() {
        let mut tasks = tasks_with(&[5, 5, 5]);
        let mut rq = ReadyQueue::new();
        for i in 0..3 {
            rq.push_back(&mut tasks, id(i));
        }
        assert_eq!(rq.highest(), Some(id(0)));
        rq.remove(&mut tasks, id(0));
        rq.push_back(&mut tasks, id(0));
        assert_eq!(rq.highest(), Some(id(1)));
        rq.remove(&mut tasks, id(2));
        rq.remove(&mut tasks, id(1));
        assert_eq!(rq.highest(), Some(id(0)));
        rq.remove(&mut tasks, id(0));
        assert!(rq.is_empty());
    }

    #[test]
    fn test_timed_list_orders_across_wrap() {
        let mut tasks = tasks_with(&[1, 2, 3, 4]);
        tasks[0].wake_at = Tick::new(5);
        tasks[1].wake_at = Tick::new(u32::MAX - 2);
        tasks[2].wake_at = Tick::new(5);
        tasks[3].wake_at = Tick::new(0);
        let mut list = TimedList::new(Link::Timeout);
        for i in 0..4 {
            list.insert(&mut tasks, id(i));
        }
        assert_eq!(list.pop_front(&mut tasks), Some(id(1)));
        assert_eq!(list.pop_front(&mut tasks), Some(id(3)));
        assert_eq!(list.pop_front(&mut tasks), Some(id(0)));
        assert_eq!(list.pop_front(&mut tasks), Some(id(2)));
        assert_eq!(list.pop_front(&mut tasks), None);
    }

    #[test]
    fn test_timed_list_remove_middle() {
        let mut tasks = tasks_with(&[1, 2, 3]);
        for i in 0..3 {
            tasks[i].wake_at = Tick::new(i as u32 * 10);
        }
        let mut list = TimedList::new(Link::Sched);
        for i in 0..3 {
            list.insert(&mut tasks, id(i));
        }
        assert!(list.remove(&mut tasks, id(1)));
        assert!(!list.remove(&mut tasks, id(1)));
        assert_eq!(list.first(), Some(id(0)));
        list.pop_front(&mut tasks);
        assert_eq!(list.first(), Some(id(2)));
    }
}
