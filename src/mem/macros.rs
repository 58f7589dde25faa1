//! 内存池声明宏

/// 声明一块静态内存池存储及其构造函数
///
/// ```rust
/// use newt_kernel::mempool_storage;
///
/// mempool_storage!(pub RX_BUFS, 64, 8);
///
/// let pool = rx_bufs_pool("rx").unwrap();
/// assert_eq!(pool.block_count(), RX_BUFS_BLOCK_COUNT);
/// assert_eq!(pool.block_size(), RX_BUFS_BLOCK_SIZE);
/// assert!(rx_bufs_pool("rx").is_err());
/// ```
#[macro_export]
macro_rules! mempool_storage {
    ($vis:vis $name:ident, $block_size:expr, $count:expr) => {
        $crate::paste::paste! {
            $vis const [<$name _BLOCK_SIZE>]: usize = $block_size;
            $vis const [<$name _BLOCK_COUNT>]: usize = $count;

            $vis static $name: $crate::mem::PoolStorage<
                { $crate::mem::mempool_bytes($block_size, $count) },
            > = $crate::mem::PoolStorage::new();

            /// 取出存储建立内存池，只能调用一次
            #[allow(dead_code)]
            $vis fn [<$name:lower _pool>](
                name: &'static str,
            ) -> $crate::Result<$crate::mem::MemPool<'static>> {
                let region = $name.take().ok_or($crate::RtosError::InvalidArgument)?;
                $crate::mem::MemPool::new(
                    name,
                    region,
                    $crate::mem::align_up([<$name _BLOCK_SIZE>]),
                    [<$name _BLOCK_COUNT>],
                )
            }
        }
    };
}
