//! 内核内部的小工具：句柄类型生成与槽位分配

/// 生成内核对象句柄类型
///
/// 句柄只是槽位下标的包装，可复制、可比较，本身不持有任何资源。
macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u8);

        impl $name {
            /// 槽位下标
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            #[inline]
            pub(crate) const fn from_index(index: usize) -> Self {
                Self(index as u8)
            }
        }
    };
}

pub(crate) use define_handle;

/// 在定长槽位数组中找一个空位放入 `value`
///
/// # 返回值
/// - `Some(index)`: 放入的槽位下标
/// - `None`: 没有空位
pub(crate) fn alloc_slot<T>(slots: &mut [Option<T>], value: T) -> Option<usize> {
    let index = slots.iter().position(Option::is_none)?;
    slots[index] = Some(value);
    Some(index)
}


#[cfg(test)]
mod tests {
    use super::*;

    define_handle!(
        /// 测试用句柄
        DemoId
    );

    #[test]
    fn test_alloc_slot_fills_first_hole() {
        let mut slots: [Option<u32>; 3] = [Some(1), None, None];
        assert_eq!(alloc_slot(&mut slots, 7), Some(1));
        assert_eq!(alloc_slot(&mut slots, 8), Some(2));
        assert_eq!(alloc_slot(&mut slots, 9), None);
        slots[0] = None;
        assert_eq!(alloc_slot(&mut slots, 10), Some(0));
    }

    #[test]
    fn test_handle_roundtrip() {
        let id = DemoId::from_index(5);
        assert_eq!(id.index(), 5);
        assert!(DemoId::from_index(1) < id);
    }
}
