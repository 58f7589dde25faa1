//! 内存管理
//!
//! 没有堆。所有内存都来自调用者提供的区域，按固定大小切块：
//! - `mempool`: 定长块内存池
//! - `mbuf`: 建立在内存池上的链式缓冲区
//! - `msys`: 按数据区大小选择 mbuf 池的系统注册表

pub mod macros;
pub mod mbuf;
pub mod mempool;
pub mod msys;

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::OS_ALIGNMENT;

pub use mbuf::{MbufChain, MbufPool, MBUF_HDR_SIZE, PKTHDR_SIZE};
pub use mempool::{MemBlock, MemPool, MemPoolInfo, ReleaseHook};
pub use msys::Msys;

/// 向上对齐到 `OS_ALIGNMENT`
pub const fn align_up(n: usize) -> usize {
    (n + OS_ALIGNMENT - 1) & !(OS_ALIGNMENT - 1)
}

/// 容纳 `count` 个 `block_size` 字节块所需的区域大小
pub const fn mempool_bytes(block_size: usize, count: usize) -> usize {
    align_up(block_size) * count
}

/// 内存池的静态存储
///
/// 一般由 [`mempool_storage!`](crate::mempool_storage) 声明。区域只能取出一次。
#[repr(C, align(8))]
pub struct PoolStorage<const N: usize> {
    buf: UnsafeCell<[u8; N]>,
    taken: AtomicBool,
}

// SAFETY: 缓冲区只通过 `take` 交出一次，之后由唯一的 `&mut` 持有
unsafe impl<const N: usize> Sync for PoolStorage<N> {}

impl<const N: usize> PoolStorage<N> {
    pub const fn new() -> Self {
        Self { buf: UnsafeCell::new([0; N]), taken: AtomicBool::new(false) }
    }

    /// 取出整个区域，第二次调用返回 `None`
    pub fn take(&'static self) -> Option<&'static mut [u8]> {
        if self.taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        // SAFETY: `taken` 保证只有这一个可变引用
        Some(unsafe { &mut *self.buf.get() })
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }
}

impl<const N: usize> Default for PoolStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mempool_bytes_rounds_block_size() {
        assert_eq!(mempool_bytes(16, 4), 64);
        assert_eq!(mempool_bytes(13, 2), 32);
        assert_eq!(mempool_bytes(0, 8), 0);
    }

    #[test]
    fn test_storage_taken_once() {
        static STORE: PoolStorage<32> = PoolStorage::new();
        let region = STORE.take().unwrap();
        assert_eq!(region.len(), 32);
        assert_eq!(region.as_ptr() as usize % 8, 0);
        assert!(STORE.take().is_none());
    }
}
