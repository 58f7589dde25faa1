//! 同步原语：信号量与互斥锁

pub mod semaphore;
pub mod mutex;
pub mod guard;
pub(crate) mod wait;

use crate::utils::define_handle;

define_handle!(
    /// 信号量句柄
    SemId
);

define_handle!(
    /// 互斥锁句柄
    MutexId
);

// 重新导出常用类型
pub use guard::MutexGuard;
