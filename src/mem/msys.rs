//! 系统 mbuf 注册表
//!
//! 登记若干个 mbuf 池，按数据区从小到大排列。分配时选能装下请求大小且还有
//! 空闲块的最小池；没有这样的池就用最大的池。

use core::cell::RefCell;

use critical_section::Mutex;

use super::mbuf::{MbufChain, MbufPool, PKTHDR_SIZE};
use crate::error::{Result, RtosError};

pub struct Msys<'p, const N: usize> {
    pools: Mutex<RefCell<[Option<&'p MbufPool<'p>>; N]>>,
}

impl<'p, const N: usize> Msys<'p, N> {
    pub const fn new() -> Self {
        Self { pools: Mutex::new(RefCell::new([None; N])) }
    }

    /// 登记一个池
    ///
    /// 表满或重复登记返回 `InvalidArgument`。
    pub fn register(&self, pool: &'p MbufPool<'p>) -> Result<()> {
        critical_section::with(|cs| {
            let mut pools = self.pools.borrow_ref_mut(cs);
            if pools.iter().flatten().any(|p| core::ptr::eq(*p, pool)) {
                return Err(RtosError::InvalidArgument);
            }
            let used = pools.iter().take_while(|p| p.is_some()).count();
            if used == N {
                return Err(RtosError::InvalidArgument);
            }
            let at = pools[..used]
                .iter()
                .flatten()
                .position(|p| p.databuf_len() > pool.databuf_len())
                .unwrap_or(used);
            pools[at..=used].rotate_right(1);
            pools[at] = Some(pool);
            Ok(())
        })
    }

    /// 清空注册表
    pub fn reset(&self) {
        critical_section::with(|cs| *self.pools.borrow_ref_mut(cs) = [None; N]);
    }

    pub fn count(&self) -> usize {
        critical_section::with(|cs| self.pools.borrow_ref(cs).iter().flatten().count())
    }

    /// 所有池的空闲块总数
    pub fn num_free(&self) -> usize {
        critical_section::with(|cs| self.pools.borrow_ref(cs).iter().flatten().map(|p| p.num_free()).sum())
    }

    fn find(&self, dsize: usize) -> Option<&'p MbufPool<'p>> {
        critical_section::with(|cs| {
            let pools = self.pools.borrow_ref(cs);
            pools
                .iter()
                .flatten()
                .find(|p| p.databuf_len() >= dsize && p.num_free() > 0)
                .or_else(|| pools.iter().flatten().last())
                .copied()
        })
    }

    /// 按数据大小选池取一个 mbuf
    pub fn get(&self, dsize: usize, leading_space: usize) -> Result<MbufChain<'p>> {
        self.find(dsize).ok_or(RtosError::OutOfMemory)?.get(leading_space)
    }

    /// 按数据大小选池取一个带包头的 mbuf，选池时计入包头长度
    pub fn get_pkthdr(&self, dsize: usize, user_hdr_len: usize) -> Result<MbufChain<'p>> {
        self.find(dsize + PKTHDR_SIZE + user_hdr_len)
            .ok_or(RtosError::OutOfMemory)?
            .get_pkthdr(user_hdr_len)
    }
}

impl<const N: usize> Default for Msys<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(8))]
    struct Region<const N: usize>([u8; N]);

    #[test]
    fn test_best_fit_then_fallback() {
        let mut small = Region([0u8; 64]);
        let mut large = Region([0u8; 128]);
        let sp = MbufPool::new("small", &mut small.0, 32, 2).unwrap();
        let lp = MbufPool::new("large", &mut large.0, 64, 2).unwrap();
        let msys: Msys<'_, 4> = Msys::new();
        msys.register(&lp).unwrap();
        msys.register(&sp).unwrap();
        assert_eq!(msys.count(), 2);
        assert_eq!(msys.register(&sp), Err(RtosError::InvalidArgument));

        let a = msys.get(10, 0).unwrap();
        assert!(core::ptr::eq(a.pool(), &sp));
        let b = msys.get(40, 0).unwrap();
        assert!(core::ptr::eq(b.pool(), &lp));
        let c = msys.get(10, 0).unwrap();
        assert!(core::ptr::eq(c.pool(), &sp));

        // 小池用完后小请求落到大池
        let d = msys.get(10, 0).unwrap();
        assert!(core::ptr::eq(d.pool(), &lp));
        assert_eq!(msys.num_free(), 0);
        assert_eq!(msys.get(10, 0).unwrap_err(), RtosError::OutOfMemory);
        drop((a, b, c, d));

        // 没有池装得下时用最大的池
        let e = msys.get(1000, 0).unwrap();
        assert!(core::ptr::eq(e.pool(), &lp));
    }

    #[test]
    fn test_pkthdr_counts_header_size() {
        let mut small = Region([0u8; 64]);
        let mut large = Region([0u8; 128]);
        let sp = MbufPool::new("small", &mut small.0, 32, 2).unwrap();
        let lp = MbufPool::new("large", &mut large.0, 64, 2).unwrap();
        let msys: Msys<'_, 2> = Msys::new();
        msys.register(&sp).unwrap();
        msys.register(&lp).unwrap();
        let m = msys.get_pkthdr(20, 0).unwrap();
        assert!(core::ptr::eq(m.pool(), &lp));
        assert!(m.is_pkthdr());
    }

    #[test]
    fn test_empty_registry() {
        let msys: Msys<'_, 2> = Msys::new();
        assert_eq!(msys.get(1, 0).unwrap_err(), RtosError::OutOfMemory);
        msys.reset();
        assert_eq!(msys.count(), 0);
    }
}
