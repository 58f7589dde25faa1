//! 等待链表
//!
//! 按有效优先级排序，同优先级按到达先后排列。链表节点就是任务控制块
//! 的 `next` 字段，所以任务在等待链表中时不可能同时在就绪集合或睡眠
//! 链表中。

use crate::kernel::task::{Priority, TaskId, Tcb};

pub(crate) struct WaitList {
    head: Option<TaskId>,
}

impl WaitList {
    pub(crate) const fn new() -> Self {
        Self { head: None }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// 插入到所有优先级不低于它的等待者之后
    pub(crate) fn insert(&mut self, tasks: &mut [Tcb], t: TaskId) {
        let prio = tasks[t.index()].prio;
        let mut prev: Option<TaskId> = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            if prio.is_higher_than(tasks[c.index()].prio) {
                break;
            }
            prev = cur;
            cur = tasks[c.index()].next;
        }
        tasks[t.index()].next = cur;
        match prev {
            Some(p) => tasks[p.index()].next = Some(t),
            None => self.head = Some(t),
        }
    }

    pub(crate) fn pop_front(&mut self, tasks: &mut [Tcb]) -> Option<TaskId> {
        let t = self.head?;
        self.head = tasks[t.index()].next.take();
        Some(t)
    }

    pub(crate) fn remove(&mut self, tasks: &mut [Tcb], t: TaskId) -> bool {
        let mut prev: Option<TaskId> = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            let next = tasks[c.index()].next;
            if c == t {
                match prev {
                    Some(p) => tasks[p.index()].next = next,
                    None => self.head = next,
                }
                tasks[c.index()].next = None;
                return true;
            }
            prev = cur;
            cur = next;
        }
        false
    }

    /// 等待者中最高的有效优先级
    ///
    /// 等待期间优先级可能被继承改变，所以逐个比较而不只看链首。
    pub(crate) fn highest(&self, tasks: &[Tcb]) -> Option<Priority> {
        let mut best: Option<Priority> = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            let p = tasks[c.index()].prio;
            if best.is_none_or(|b| p.is_higher_than(b)) {
                best = Some(p);
            }
            cur = tasks[c.index()].next;
        }
        best
    }

    pub(crate) fn len(&self, tasks: &[Tcb]) -> usize {
        let mut n = 0;
        let mut cur = self.head;
        while let Some(c) = cur {
            n += 1;
            cur = tasks[c.index()].next;
        }
        n
    }
}
