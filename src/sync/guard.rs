//! RAII 互斥锁守卫
//!
//! 当 MutexGuard 被 drop 时，会自动释放一层锁。

use super::MutexId;
use crate::hal::Port;
use crate::kernel::Kernel;

/// RAII 互斥锁守卫
///
/// 通过 [`Kernel::mutex_lock`] 获取。持有 MutexGuard 期间锁保持被持有，
/// 离开作用域时释放一层。
///
/// # 示例
///
/// ```rust,ignore
/// {
///     let _guard = KERNEL.mutex_lock(m, Timeout::Forever)?;
///     // 临界区代码
/// }
/// ```
pub struct MutexGuard<'k, P: Port> {
    kernel: &'k Kernel<P>,
    mutex: MutexId,
}

impl<'k, P: Port> MutexGuard<'k, P> {
    pub(crate) fn new(kernel: &'k Kernel<P>, mutex: MutexId) -> Self {
        Self { kernel, mutex }
    }

    /// 获取关联的互斥锁句柄
    pub fn mutex(&self) -> MutexId {
        self.mutex
    }
}

impl<P: Port> Drop for MutexGuard<'_, P> {
    fn drop(&mut self) {
        // 守卫存在说明调度器已启动且当前任务持有锁，释放不会失败
        let _ = self.kernel.mutex_release(self.mutex);
    }
}
