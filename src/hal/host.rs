//! 主机端移植层
//!
//! 不做真正的寄存器切换：只记录切换请求。调度决定仍在内核中照常
//! 提交，所以主机上可以完整地检查调度行为。需要阻塞的调用在任务
//! 挂起后返回 `Err(RtosError::WouldBlock)`，最终结果用
//! [`Kernel::take_wait_result`](crate::kernel::Kernel::take_wait_result) 取回。

use super::traits::{Port, StackWord, TaskEntry};
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

pub struct HostPort {
    switch_requests: AtomicUsize,
    first_sp: AtomicUsize,
    tick_rate: AtomicU32,
    in_isr: AtomicBool,
}

impl HostPort {
    pub const fn new() -> Self {
        Self {
            switch_requests: AtomicUsize::new(0),
            first_sp: AtomicUsize::new(0),
            tick_rate: AtomicU32::new(0),
            in_isr: AtomicBool::new(false),
        }
    }

    /// 累计的上下文切换请求次数
    pub fn switch_requests(&self) -> usize {
        self.switch_requests.load(Ordering::Relaxed)
    }

    /// `start_first_task` 收到的栈指针，未启动时为 `None`
    pub fn first_task_sp(&self) -> Option<usize> {
        match self.first_sp.load(Ordering::Relaxed) {
            0 => None,
            sp => Some(sp),
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate.load(Ordering::Relaxed)
    }

    /// 模拟进入或离开中断上下文
    pub fn set_in_isr(&self, in_isr: bool) {
        self.in_isr.store(in_isr, Ordering::Relaxed);
    }
}

impl Default for HostPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for HostPort {
    fn init_task_stack(&self, stack: &mut [StackWord], entry: TaskEntry, arg: usize) -> usize {
        // 主机指针可能是 64 位，这里只保留低 32 位，帧内容仅用于栈用量统计
        super::init_context_frame(stack, entry as usize as u32, 0, arg as u32)
    }

    fn trigger_switch(&self) {
        self.switch_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn start_first_task(&self, sp: usize) {
        self.first_sp.store(sp, Ordering::Relaxed);
    }

    fn start_tick(&self, ticks_per_sec: u32) {
        self.tick_rate.store(ticks_per_sec, Ordering::Relaxed);
    }

    fn in_isr(&self) -> bool {
        self.in_isr.load(Ordering::Relaxed)
    }
}
