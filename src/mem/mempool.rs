//! 定长块内存池
//!
//! 区域由调用者提供，切成 `block_count` 个 `block_size` 字节的块。空闲块
//! 通过各自的第一个字串成单链表，链上存的是块序号而不是指针。
//!
//! 取出的块是拥有所有权的 [`MemBlock`]，归还时按值交回，所以同一个块
//! 不会被归还两次。需要把块交给外部代码时可以走裸指针路径
//! ([`MemBlock::into_raw`] / [`MemPool::block_from_raw`])，这条路径总是
//! 检查地址范围和块边界，调试构建下还会遍历空闲链检查重复归还。

use core::cell::Cell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use critical_section::Mutex;

use crate::config::OS_ALIGNMENT;
use crate::error::{fatal, FatalError, Result, RtosError};

const NIL: u32 = u32::MAX;

/// 归还钩子
///
/// 设置了钩子的池在 `put` 时不直接回收，而是把块交给钩子决定去向。
/// 钩子若要真正释放，调用 [`MemPool::put_from_hook`]。
pub trait ReleaseHook: Sync {
    fn on_release<'a>(&self, pool: &MemPool<'a>, block: MemBlock<'a>) -> Result<()>;
}

#[derive(Clone, Copy)]
struct FreeList {
    head: u32,
    num_free: usize,
    min_free: usize,
}

/// 内存池统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemPoolInfo {
    pub name: &'static str,
    pub block_size: usize,
    pub block_count: usize,
    pub num_free: usize,
    pub min_free: usize,
}

pub struct MemPool<'a> {
    name: &'static str,
    base: NonNull<u8>,
    block_size: usize,
    block_count: usize,
    free: Mutex<Cell<FreeList>>,
    hook: Option<&'a dyn ReleaseHook>,
    _region: PhantomData<&'a mut [u8]>,
}

// SAFETY: 空闲链只在临界区内修改；已分配块由各自的 `MemBlock` 独占
unsafe impl Sync for MemPool<'_> {}
unsafe impl Send for MemPool<'_> {}

/// 从池中取出的一块内存
pub struct MemBlock<'a> {
    ptr: NonNull<u8>,
    len: usize,
    _region: PhantomData<&'a mut [u8]>,
}

// SAFETY: 块内存由该句柄独占
unsafe impl Send for MemBlock<'_> {}
unsafe impl Sync for MemBlock<'_> {}

impl MemBlock<'_> {
    /// 放弃所有权，得到块首地址
    pub fn into_raw(self) -> NonNull<u8> {
        self.ptr
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }
}

impl Deref for MemBlock<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: ptr/len 描述池区域内一个独占的块
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for MemBlock<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: 同上
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl core::fmt::Debug for MemBlock<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemBlock").field("ptr", &self.ptr).field("len", &self.len).finish()
    }
}

impl<'a> MemPool<'a> {
    /// 在 `region` 上建立内存池
    ///
    /// `block_size` 必须是 `OS_ALIGNMENT` 的非零倍数，区域首地址必须对齐。
    pub fn new(
        name: &'static str,
        region: &'a mut [u8],
        block_size: usize,
        block_count: usize,
    ) -> Result<Self> {
        if block_size == 0 || block_size % OS_ALIGNMENT != 0 {
            crate::warn!("mempool '{}': bad block size {}", name, block_size);
            return Err(RtosError::InvalidBlockSize);
        }
        if block_count >= NIL as usize {
            return Err(RtosError::InvalidArgument);
        }
        if region.as_ptr() as usize % OS_ALIGNMENT != 0 {
            crate::warn!("mempool '{}': region misaligned", name);
            return Err(RtosError::MisalignedRegion);
        }
        let need = block_size.checked_mul(block_count).ok_or(RtosError::RegionTooSmall)?;
        if region.len() < need {
            crate::warn!("mempool '{}': region {} < {} bytes", name, region.len(), need);
            return Err(RtosError::RegionTooSmall);
        }

        let pool = Self {
            name,
            base: NonNull::from(region).cast(),
            block_size,
            block_count,
            free: Mutex::new(Cell::new(FreeList { head: NIL, num_free: 0, min_free: 0 })),
            hook: None,
            _region: PhantomData,
        };
        pool.thread_free_list();
        crate::debug!("mempool '{}': {} x {} bytes", name, block_count, block_size);
        Ok(pool)
    }

    /// 设置归还钩子
    pub fn with_release_hook(mut self, hook: &'a dyn ReleaseHook) -> Self {
        self.hook = Some(hook);
        self
    }

    fn thread_free_list(&self) {
        for i in 0..self.block_count {
            let next = if i + 1 == self.block_count { NIL } else { (i + 1) as u32 };
            self.write_link(i, next);
        }
        let head = if self.block_count == 0 { NIL } else { 0 };
        let n = self.block_count;
        critical_section::with(|cs| {
            self.free.borrow(cs).set(FreeList { head, num_free: n, min_free: n });
        });
    }

    fn block_ptr(&self, index: usize) -> NonNull<u8> {
        // SAFETY: index < block_count，偏移落在区域内
        unsafe { self.base.add(index * self.block_size) }
    }

    fn read_link(&self, index: usize) -> u32 {
        // SAFETY: 空闲块的首字归空闲链所有，块首按 OS_ALIGNMENT 对齐
        unsafe { self.block_ptr(index).cast::<u32>().as_ptr().read() }
    }

    fn write_link(&self, index: usize, next: u32) {
        // SAFETY: 同上
        unsafe { self.block_ptr(index).cast::<u32>().as_ptr().write(next) }
    }

    fn block(&self, index: usize) -> MemBlock<'a> {
        MemBlock { ptr: self.block_ptr(index), len: self.block_size, _region: PhantomData }
    }

    /// 按地址求块序号；地址不在区域内或不在块边界上返回 `None`
    fn index_of(&self, ptr: *const u8) -> Option<usize> {
        let base = self.base.as_ptr() as usize;
        let off = (ptr as usize).checked_sub(base)?;
        if off >= self.block_size * self.block_count || off % self.block_size != 0 {
            return None;
        }
        Some(off / self.block_size)
    }

    fn is_free(&self, list: FreeList, index: usize) -> bool {
        let mut cur = list.head;
        while cur != NIL {
            if cur as usize == index {
                return true;
            }
            cur = self.read_link(cur as usize);
        }
        false
    }

    /// 取一块
    pub fn get(&self) -> Result<MemBlock<'a>> {
        let index = critical_section::with(|cs| {
            let cell = self.free.borrow(cs);
            let mut list = cell.get();
            if list.head == NIL {
                return None;
            }
            let index = list.head as usize;
            list.head = self.read_link(index);
            list.num_free -= 1;
            list.min_free = list.min_free.min(list.num_free);
            cell.set(list);
            Some(index)
        });
        index.map(|i| self.block(i)).ok_or(RtosError::OutOfMemory)
    }

    /// 归还一块
    ///
    /// 设置了钩子时交给钩子处理。
    pub fn put(&self, block: MemBlock<'a>) -> Result<()> {
        match self.hook {
            Some(hook) => hook.on_release(self, block),
            None => self.put_from_hook(block),
        }
    }

    /// 绕过钩子直接回收
    pub fn put_from_hook(&self, block: MemBlock<'a>) -> Result<()> {
        let index = match self.index_of(block.as_ptr()) {
            Some(i) => i,
            None if cfg!(debug_assertions) => fatal(FatalError::ForeignBlock),
            None => return Err(RtosError::NotInPool),
        };
        self.release_index(index);
        Ok(())
    }

    fn release_index(&self, index: usize) {
        let double = critical_section::with(|cs| {
            let cell = self.free.borrow(cs);
            let mut list = cell.get();
            if cfg!(debug_assertions) && self.is_free(list, index) {
                return true;
            }
            self.write_link(index, list.head);
            list.head = index as u32;
            list.num_free += 1;
            cell.set(list);
            false
        });
        if double {
            fatal(FatalError::DoubleFree);
        }
    }

    /// 由 [`MemBlock::into_raw`] 得到的地址重建块
    ///
    /// # Safety
    ///
    /// `ptr` 必须来自本池的 `into_raw`，且之后没有别的 `MemBlock` 指向同一块。
    pub unsafe fn block_from_raw(&self, ptr: NonNull<u8>) -> Result<MemBlock<'a>> {
        let index = self.index_of(ptr.as_ptr()).ok_or(RtosError::NotInPool)?;
        if cfg!(debug_assertions) {
            let free = critical_section::with(|cs| self.is_free(self.free.borrow(cs).get(), index));
            if free {
                fatal(FatalError::DoubleFree);
            }
        }
        Ok(self.block(index))
    }

    /// 块是否属于本池（只检查地址范围和块边界）
    pub fn is_from(&self, ptr: *const u8) -> bool {
        self.index_of(ptr).is_some()
    }

    /// 重新串起所有块，低水位一并复位
    ///
    /// 还有块在外面时返回 `InvalidArgument`。
    pub fn clear(&self) -> Result<()> {
        if self.num_free() != self.block_count {
            return Err(RtosError::InvalidArgument);
        }
        self.thread_free_list();
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn num_free(&self) -> usize {
        critical_section::with(|cs| self.free.borrow(cs).get().num_free)
    }

    /// 历史最少空闲块数
    pub fn min_free(&self) -> usize {
        critical_section::with(|cs| self.free.borrow(cs).get().min_free)
    }

    pub fn info(&self) -> MemPoolInfo {
        let list = critical_section::with(|cs| self.free.borrow(cs).get());
        MemPoolInfo {
            name: self.name,
            block_size: self.block_size,
            block_count: self.block_count,
            num_free: list.num_free,
            min_free: list.min_free,
        }
    }

    /// 序号形式的分配，供 mbuf 层按序号串链
    pub(crate) fn get_index(&self) -> Result<usize> {
        let block = self.get()?;
        let ptr = block.into_raw();
        self.index_of(ptr.as_ptr()).ok_or(RtosError::NotInPool)
    }

    /// 归还 `get_index` 得到的块，经过钩子
    pub(crate) fn put_index(&self, index: usize) -> Result<()> {
        self.put(self.block(index))
    }

    /// 块首地址
    pub(crate) fn index_ptr(&self, index: usize) -> *mut u8 {
        self.block_ptr(index).as_ptr()
    }
}

impl core::fmt::Debug for MemPool<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemPool")
            .field("name", &self.name)
            .field("block_size", &self.block_size)
            .field("block_count", &self.block_count)
            .field("num_free", &self.num_free())
            .finish()
    }
}
