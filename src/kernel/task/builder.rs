//! 任务构建器
//!
//! 提供链式 API 创建任务，支持设置优先级、参数和栈。

use super::TaskId;
use super::priority::Priority;
use crate::error::{Result, RtosError};
use crate::hal::{Port, StackWord, TaskEntry};
use crate::kernel::Kernel;

/// 任务构建器
///
/// 使用 Builder 模式创建任务。栈必须显式提供，内核不分配内存。
///
/// # 示例
///
/// ```rust,ignore
/// let task = TaskBuilder::new("sensor")
///     .priority(Priority::new(4))
///     .arg(2)
///     .stack(sensor_stack)
///     .spawn(&KERNEL, sensor_task)?;
/// ```
pub struct TaskBuilder {
    name: &'static str,
    priority: Priority,
    arg: usize,
    stack: Option<&'static mut [StackWord]>,
}

impl TaskBuilder {
    /// 创建新的任务构建器
    ///
    /// # 默认值
    /// - 优先级: `Priority::default()`
    /// - 参数: 0
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            priority: Priority::default(),
            arg: 0,
            stack: None,
        }
    }

    /// 设置任务优先级
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// 设置传给入口函数的参数
    pub fn arg(mut self, arg: usize) -> Self {
        self.arg = arg;
        self
    }

    /// 设置任务栈
    pub fn stack(mut self, stack: &'static mut [StackWord]) -> Self {
        self.stack = Some(stack);
        self
    }

    /// 获取配置的任务名称
    pub fn get_name(&self) -> &str {
        self.name
    }

    /// 获取配置的优先级
    pub fn get_priority(&self) -> Priority {
        self.priority
    }

    /// 获取配置的栈大小（字）
    pub fn get_stack_words(&self) -> usize {
        self.stack.as_ref().map_or(0, |s| s.len())
    }

    /// 创建任务
    ///
    /// # 返回值
    /// - `Ok(TaskId)`: 成功创建的任务句柄
    /// - `Err(RtosError::InvalidArgument)`: 没有设置栈
    /// - 其余错误同 [`Kernel::task_init`]
    pub fn spawn<P: Port>(self, kernel: &Kernel<P>, entry: TaskEntry) -> Result<TaskId> {
        let stack = self.stack.ok_or(RtosError::InvalidArgument)?;
        kernel.task_init(self.name, entry, self.arg, self.priority, stack)
    }
}
