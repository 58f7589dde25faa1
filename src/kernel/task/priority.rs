//! 任务优先级定义

/// 任务优先级
///
/// 数值越小，优先级越高：0 最高，255 保留给空闲任务。
/// 派生的 `Ord` 按数值比较，判断紧急程度请用 [`Priority::is_higher_than`]。
///
/// # 示例
/// ```rust
/// use newt_kernel::Priority;
///
/// let high = Priority::new(1);
/// assert!(high.is_higher_than(Priority::new(5)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    /// 最高优先级
    pub const HIGHEST: Priority = Priority(0);

    /// 最低的用户优先级
    pub const LOWEST: Priority = Priority(254);

    /// 空闲任务专用
    pub const IDLE: Priority = Priority(255);

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// 获取优先级数值
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    pub(crate) const fn level(self) -> usize {
        self.0 as usize
    }

    /// 是否比 `other` 更紧急
    pub const fn is_higher_than(self, other: Priority) -> bool {
        self.0 < other.0
    }

    /// 检查是否为空闲优先级
    pub const fn is_idle(self) -> bool {
        self.0 == Self::IDLE.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority(127)
    }
}
