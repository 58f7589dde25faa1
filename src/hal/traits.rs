//! 硬件抽象层 Trait 定义
//!
//! 内核与底层硬件之间只有一个接口：[`Port`]。
//! 不同架构（Cortex-M3、主机模拟）各自实现它。

/// 栈字
pub type StackWord = u32;

/// 任务入口函数，参数为创建任务时传入的 `arg`
pub type TaskEntry = fn(usize);

/// 移植层接口
///
/// 调度器在临界区内决定并提交下一个任务，移植层负责稍后真正
/// 切换寄存器上下文：在切换处理程序里调用
/// [`Kernel::switch_context`](crate::kernel::Kernel::switch_context)
/// 保存当前栈指针并取回下一个任务的栈指针。
pub trait Port: Sync {
    /// 初始化任务栈
    ///
    /// 在任务栈上构建初始上下文，使任务可以被调度执行
    ///
    /// # 参数
    /// - `stack`: 任务栈，低地址在前
    /// - `entry`: 任务入口函数
    /// - `arg`: 传递给任务的参数
    ///
    /// # 返回值
    /// 初始化后的栈指针
    fn init_task_stack(&self, stack: &mut [StackWord], entry: TaskEntry, arg: usize) -> usize;

    /// 触发上下文切换
    ///
    /// 通常通过挂起 PendSV 实现，切换在退出临界区和所有中断之后发生
    fn trigger_switch(&self);

    /// 启动第一个任务
    ///
    /// 布置好第一次切换后返回，`sp` 是第一个任务的初始栈指针
    fn start_first_task(&self, sp: usize);

    /// 启动周期性节拍源
    fn start_tick(&self, _ticks_per_sec: u32) {}

    /// 当前是否处于中断上下文
    fn in_isr(&self) -> bool {
        false
    }

    /// 空闲任务入口
    fn idle_entry(&self) -> TaskEntry {
        idle_spin
    }
}

fn idle_spin(_arg: usize) {
    loop {
        core::hint::spin_loop();
    }
}
