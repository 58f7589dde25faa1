//! 链式缓冲区 (mbuf)
//!
//! 每个 mbuf 是内存池里的一块，块首 8 字节是头部：
//!
//! | 偏移 | 字段 |
//! |------|------|
//! | 0 | 链上下一块的序号 (u16, 0xFFFF 表示结尾) |
//! | 2 | 本段数据长度 (u16) |
//! | 4 | 数据起点相对块首的偏移 (u16) |
//! | 6 | 标志 (u8) |
//! | 7 | 包头总长度 (u8, 0 表示不是包头) |
//!
//! 链的第一块可以带包头，紧跟在 mbuf 头部之后：包总长 (u16)、包标志
//! (u16)、队列中下一个包 (u16)、保留 (u16)，然后是用户包头。带包头的链
//! 总长始终等于各段长度之和。
//!
//! [`MbufChain`] 拥有整条链，drop 时把所有块还给池。

use core::cmp::Ordering;
use core::ptr;

use super::mempool::MemPool;
use crate::error::{Result, RtosError};

/// mbuf 头部大小
pub const MBUF_HDR_SIZE: usize = 8;
/// 包头固定部分大小
pub const PKTHDR_SIZE: usize = 8;

pub(crate) const NIL: u16 = u16::MAX;

const PKT_LEN: usize = MBUF_HDR_SIZE;
const PKT_FLAGS: usize = MBUF_HDR_SIZE + 2;
const PKT_NEXT: usize = MBUF_HDR_SIZE + 4;

#[derive(Clone, Copy)]
struct Hdr {
    next: u16,
    len: u16,
    data_off: u16,
    flags: u8,
    pkthdr_len: u8,
}

impl Hdr {
    fn empty(data_off: usize) -> Self {
        Self { next: NIL, len: 0, data_off: data_off as u16, flags: 0, pkthdr_len: 0 }
    }

    fn decode(b: [u8; MBUF_HDR_SIZE]) -> Self {
        Self {
            next: u16::from_le_bytes([b[0], b[1]]),
            len: u16::from_le_bytes([b[2], b[3]]),
            data_off: u16::from_le_bytes([b[4], b[5]]),
            flags: b[6],
            pkthdr_len: b[7],
        }
    }

    fn encode(&self) -> [u8; MBUF_HDR_SIZE] {
        let [n0, n1] = self.next.to_le_bytes();
        let [l0, l1] = self.len.to_le_bytes();
        let [d0, d1] = self.data_off.to_le_bytes();
        [n0, n1, l0, l1, d0, d1, self.flags, self.pkthdr_len]
    }

    fn end(&self) -> usize {
        self.data_off as usize + self.len as usize
    }

    fn leading_space(&self) -> usize {
        self.data_off as usize - MBUF_HDR_SIZE - self.pkthdr_len as usize
    }
}

/// mbuf 池
pub struct MbufPool<'a> {
    pool: MemPool<'a>,
}

impl<'a> MbufPool<'a> {
    pub fn new(
        name: &'static str,
        region: &'a mut [u8],
        block_size: usize,
        block_count: usize,
    ) -> Result<Self> {
        Self::from_pool(MemPool::new(name, region, block_size, block_count)?)
    }

    /// 在已有内存池上建立 mbuf 池
    pub fn from_pool(pool: MemPool<'a>) -> Result<Self> {
        let bs = pool.block_size();
        if bs <= MBUF_HDR_SIZE + PKTHDR_SIZE || bs > u16::MAX as usize {
            crate::warn!("mbuf pool '{}': bad block size {}", pool.name(), bs);
            return Err(RtosError::InvalidBlockSize);
        }
        if pool.block_count() >= NIL as usize {
            return Err(RtosError::InvalidArgument);
        }
        Ok(Self { pool })
    }

    pub fn mempool(&self) -> &MemPool<'a> {
        &self.pool
    }

    /// 每块可用的数据区大小
    pub fn databuf_len(&self) -> usize {
        self.pool.block_size() - MBUF_HDR_SIZE
    }

    pub fn num_free(&self) -> usize {
        self.pool.num_free()
    }

    /// 取一个普通 mbuf，数据区前留出 `leading_space` 字节
    pub fn get(&self, leading_space: usize) -> Result<MbufChain<'_>> {
        if leading_space > self.databuf_len() {
            return Err(RtosError::InvalidArgument);
        }
        let idx = self.alloc()?;
        self.write_hdr(idx, Hdr::empty(MBUF_HDR_SIZE + leading_space));
        Ok(MbufChain { pool: self, head: idx })
    }

    /// 取一个带包头的 mbuf，另留 `user_hdr_len` 字节用户包头
    pub fn get_pkthdr(&self, user_hdr_len: usize) -> Result<MbufChain<'_>> {
        let total = PKTHDR_SIZE + user_hdr_len;
        if total > u8::MAX as usize || total > self.databuf_len() {
            return Err(RtosError::InvalidArgument);
        }
        let idx = self.alloc()?;
        self.write_hdr(idx, Hdr { pkthdr_len: total as u8, ..Hdr::empty(MBUF_HDR_SIZE + total) });
        self.write_u16(idx, PKT_LEN, 0);
        self.write_u16(idx, PKT_FLAGS, 0);
        self.write_u16(idx, PKT_NEXT, NIL);
        // SAFETY: 新分配的块由调用者独占
        unsafe {
            ptr::write_bytes(self.block_ptr(idx).add(MBUF_HDR_SIZE + PKTHDR_SIZE), 0, user_hdr_len);
        }
        Ok(MbufChain { pool: self, head: idx })
    }

    fn alloc(&self) -> Result<u16> {
        Ok(self.pool.get_index()? as u16)
    }

    /// 分配 `n` 块串成一段，失败时已分配的全部退回
    fn alloc_run(&self, n: usize) -> Result<u16> {
        let mut head = NIL;
        for _ in 0..n {
            match self.alloc() {
                Ok(idx) => {
                    self.write_hdr(idx, Hdr { next: head, ..Hdr::empty(MBUF_HDR_SIZE) });
                    head = idx;
                }
                Err(e) => {
                    self.free_run(head);
                    return Err(e);
                }
            }
        }
        Ok(head)
    }

    pub(crate) fn free_run(&self, mut idx: u16) {
        while idx != NIL {
            let next = self.read_hdr(idx).next;
            let _ = self.pool.put_index(idx as usize);
            idx = next;
        }
    }

    fn block_ptr(&self, idx: u16) -> *mut u8 {
        self.pool.index_ptr(idx as usize)
    }

    fn read_hdr(&self, idx: u16) -> Hdr {
        let mut b = [0u8; MBUF_HDR_SIZE];
        // SAFETY: 块首 8 字节是头部，块至少有这么大
        unsafe { ptr::copy_nonoverlapping(self.block_ptr(idx), b.as_mut_ptr(), MBUF_HDR_SIZE) };
        Hdr::decode(b)
    }

    fn write_hdr(&self, idx: u16, h: Hdr) {
        // SAFETY: 同上
        unsafe { ptr::copy_nonoverlapping(h.encode().as_ptr(), self.block_ptr(idx), MBUF_HDR_SIZE) };
    }

    fn read_u16(&self, idx: u16, off: usize) -> u16 {
        let mut b = [0u8; 2];
        // SAFETY: 包头字段在块内
        unsafe { ptr::copy_nonoverlapping(self.block_ptr(idx).add(off), b.as_mut_ptr(), 2) };
        u16::from_le_bytes(b)
    }

    fn write_u16(&self, idx: u16, off: usize, v: u16) {
        // SAFETY: 同上
        unsafe { ptr::copy_nonoverlapping(v.to_le_bytes().as_ptr(), self.block_ptr(idx).add(off), 2) };
    }

    pub(crate) fn next_pkt(&self, idx: u16) -> u16 {
        self.read_u16(idx, PKT_NEXT)
    }

    pub(crate) fn set_next_pkt(&self, idx: u16, next: u16) {
        self.write_u16(idx, PKT_NEXT, next)
    }
}

impl core::fmt::Debug for MbufPool<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MbufPool").field("pool", &self.pool).finish()
    }
}

/// 一条 mbuf 链
pub struct MbufChain<'p> {
    pool: &'p MbufPool<'p>,
    head: u16,
}

impl<'p> MbufChain<'p> {
    pub(crate) fn from_head(pool: &'p MbufPool<'p>, head: u16) -> Self {
        Self { pool, head }
    }

    pub(crate) fn into_head(self) -> u16 {
        let head = self.head;
        core::mem::forget(self);
        head
    }

    pub(crate) fn head_index(&self) -> u16 {
        self.head
    }

    pub fn pool(&self) -> &'p MbufPool<'p> {
        self.pool
    }

    fn hdr(&self, idx: u16) -> Hdr {
        self.pool.read_hdr(idx)
    }

    fn set_hdr(&mut self, idx: u16, h: Hdr) {
        self.pool.write_hdr(idx, h)
    }

    fn buf(&self, idx: u16) -> &[u8] {
        // SAFETY: idx 属于本链，块内容由本链独占
        unsafe { core::slice::from_raw_parts(self.pool.block_ptr(idx), self.pool.pool.block_size()) }
    }

    fn buf_mut(&mut self, idx: u16) -> &mut [u8] {
        // SAFETY: 同上，且 &mut self 保证没有别的引用
        unsafe { core::slice::from_raw_parts_mut(self.pool.block_ptr(idx), self.pool.pool.block_size()) }
    }

    fn copy_across(&mut self, src: u16, src_off: usize, dst: u16, dst_off: usize, n: usize) {
        let bs = self.pool.pool.block_size();
        debug_assert!(src != dst && src_off + n <= bs && dst_off + n <= bs);
        // SAFETY: 两块不同且都归本链所有，范围在块内
        unsafe {
            ptr::copy_nonoverlapping(
                self.pool.block_ptr(src).add(src_off),
                self.pool.block_ptr(dst).add(dst_off),
                n,
            )
        }
    }

    fn seg_trailing(&self, h: &Hdr) -> usize {
        self.pool.pool.block_size() - h.end()
    }

    fn last(&self) -> u16 {
        let mut cur = self.head;
        loop {
            let next = self.hdr(cur).next;
            if next == NIL {
                return cur;
            }
            cur = next;
        }
    }

    pub fn is_pkthdr(&self) -> bool {
        self.hdr(self.head).pkthdr_len > 0
    }

    /// 包头记录的总长度，不是包头时为 `None`
    pub fn pkt_len(&self) -> Option<usize> {
        self.is_pkthdr().then(|| self.pool.read_u16(self.head, PKT_LEN) as usize)
    }

    fn add_pkt_len(&mut self, delta: isize) {
        if self.is_pkthdr() {
            let cur = self.pool.read_u16(self.head, PKT_LEN) as isize;
            self.pool.write_u16(self.head, PKT_LEN, (cur + delta) as u16);
        }
    }

    fn check_grow(&self, add: usize) -> Result<()> {
        if self.is_pkthdr() && self.len() + add > u16::MAX as usize {
            return Err(RtosError::OutOfRange);
        }
        Ok(())
    }

    pub fn pkt_flags(&self) -> Option<u16> {
        self.is_pkthdr().then(|| self.pool.read_u16(self.head, PKT_FLAGS))
    }

    pub fn set_pkt_flags(&mut self, flags: u16) -> Result<()> {
        if !self.is_pkthdr() {
            return Err(RtosError::NotPacketHeader);
        }
        self.pool.write_u16(self.head, PKT_FLAGS, flags);
        Ok(())
    }

    /// 用户包头，不是包头时为空
    pub fn user_header(&self) -> &[u8] {
        let pk = self.hdr(self.head).pkthdr_len as usize;
        let start = MBUF_HDR_SIZE + PKTHDR_SIZE;
        if pk == 0 { &[] } else { &self.buf(self.head)[start..MBUF_HDR_SIZE + pk] }
    }

    pub fn user_header_mut(&mut self) -> &mut [u8] {
        let head = self.head;
        let pk = self.hdr(head).pkthdr_len as usize;
        let start = MBUF_HDR_SIZE + PKTHDR_SIZE;
        if pk == 0 { &mut [] } else { &mut self.buf_mut(head)[start..MBUF_HDR_SIZE + pk] }
    }

    /// 各段数据长度之和
    pub fn len(&self) -> usize {
        self.segments().map(<[u8]>::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments().all(<[u8]>::is_empty)
    }

    pub fn seg_count(&self) -> usize {
        self.segments().count()
    }

    /// 按顺序遍历各段数据
    pub fn segments(&self) -> Segments<'_, 'p> {
        Segments { chain: self, cur: self.head }
    }

    /// 第一段前面的空闲字节数
    pub fn leading_space(&self) -> usize {
        self.hdr(self.head).leading_space()
    }

    /// 最后一段后面的空闲字节数
    pub fn trailing_space(&self) -> usize {
        let h = self.hdr(self.last());
        self.seg_trailing(&h)
    }

    /// 第一段数据
    pub fn head_data(&self) -> &[u8] {
        let h = self.hdr(self.head);
        &self.buf(self.head)[h.data_off as usize..h.end()]
    }

    pub fn head_data_mut(&mut self) -> &mut [u8] {
        let head = self.head;
        let h = self.hdr(head);
        &mut self.buf_mut(head)[h.data_off as usize..h.end()]
    }

    /// 在链尾追加 `n` 字节，`fill(pos, dst)` 负责写入第 `pos` 字节起的一段
    ///
    /// 需要的新块全部先分配好，分配失败时链保持原样。
    fn append_with(&mut self, n: usize, mut fill: impl FnMut(usize, &mut [u8])) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        self.check_grow(n)?;
        let last = self.last();
        let lh = self.hdr(last);
        let first = self.seg_trailing(&lh).min(n);
        let per = self.pool.databuf_len();
        let run = self.pool.alloc_run((n - first).div_ceil(per))?;

        if first > 0 {
            let start = lh.end();
            fill(0, &mut self.buf_mut(last)[start..start + first]);
        }
        let mut pos = first;
        let mut cur = run;
        while cur != NIL {
            let mut h = self.hdr(cur);
            let take = per.min(n - pos);
            let off = h.data_off as usize;
            fill(pos, &mut self.buf_mut(cur)[off..off + take]);
            h.len = take as u16;
            self.set_hdr(cur, h);
            pos += take;
            cur = h.next;
        }
        let next = if run == NIL { lh.next } else { run };
        self.set_hdr(last, Hdr { len: lh.len + first as u16, next, ..lh });
        self.add_pkt_len(n as isize);
        Ok(())
    }

    /// 追加数据，必要时从池里再取块
    ///
    /// 池不够时返回 `OutOfMemory`，链不变。
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.append_with(data.len(), |pos, dst| dst.copy_from_slice(&data[pos..pos + dst.len()]))
    }

    /// 把 `src` 中 `[off, off + len)` 的数据追加到本链
    pub fn append_from(&mut self, src: &MbufChain<'_>, off: usize, len: usize) -> Result<()> {
        if off.checked_add(len).is_none_or(|end| end > src.len()) {
            return Err(RtosError::OutOfRange);
        }
        self.append_with(len, |pos, dst| {
            src.read_at(off + pos, dst);
        })
    }

    fn read_at(&self, off: usize, dst: &mut [u8]) -> usize {
        let mut skip = off;
        let mut done = 0;
        for seg in self.segments() {
            if done == dst.len() {
                break;
            }
            if skip >= seg.len() {
                skip -= seg.len();
                continue;
            }
            let n = (seg.len() - skip).min(dst.len() - done);
            dst[done..done + n].copy_from_slice(&seg[skip..skip + n]);
            done += n;
            skip = 0;
        }
        done
    }

    /// 从偏移 `off` 起复制 `dst.len()` 字节
    pub fn copy_data(&self, off: usize, dst: &mut [u8]) -> Result<()> {
        if off.checked_add(dst.len()).is_none_or(|end| end > self.len()) {
            return Err(RtosError::OutOfRange);
        }
        self.read_at(off, dst);
        Ok(())
    }

    /// 从偏移 `off` 起写入 `src`，超出链尾的部分追加
    ///
    /// 追加部分先做，失败时链不变。
    pub fn copy_into(&mut self, off: usize, src: &[u8]) -> Result<()> {
        let total = self.len();
        if off > total {
            return Err(RtosError::OutOfRange);
        }
        let overlap = (total - off).min(src.len());
        self.append(&src[overlap..])?;

        let mut cur = self.head;
        let mut skip = off;
        let mut done = 0;
        while cur != NIL && done < overlap {
            let h = self.hdr(cur);
            let len = h.len as usize;
            if skip >= len {
                skip -= len;
            } else {
                let n = (len - skip).min(overlap - done);
                let s = h.data_off as usize + skip;
                self.buf_mut(cur)[s..s + n].copy_from_slice(&src[done..done + n]);
                done += n;
                skip = 0;
            }
            cur = h.next;
        }
        Ok(())
    }

    /// 与 `data` 比较从 `off` 开始的同长度数据，链不够长时返回 `None`
    pub fn cmp_flat(&self, off: usize, data: &[u8]) -> Option<Ordering> {
        if off.checked_add(data.len()).is_none_or(|end| end > self.len()) {
            return None;
        }
        let mut skip = off;
        let mut done = 0;
        for seg in self.segments() {
            if done == data.len() {
                break;
            }
            if skip >= seg.len() {
                skip -= seg.len();
                continue;
            }
            let n = (seg.len() - skip).min(data.len() - done);
            match seg[skip..skip + n].cmp(&data[done..done + n]) {
                Ordering::Equal => {}
                other => return Some(other),
            }
            done += n;
            skip = 0;
        }
        Some(Ordering::Equal)
    }

    /// 裁剪：`req >= 0` 从头部去掉 `req` 字节，`req < 0` 从尾部去掉 `-req` 字节
    ///
    /// 超出链长时整条链变为空。清空的块仍留在链上。
    pub fn adj(&mut self, req: isize) {
        let total = self.len();
        let mut cur = self.head;
        if req >= 0 {
            let mut left = req as usize;
            while cur != NIL && left > 0 {
                let mut h = self.hdr(cur);
                let n = (h.len as usize).min(left);
                h.len -= n as u16;
                h.data_off += n as u16;
                left -= n;
                self.set_hdr(cur, h);
                cur = h.next;
            }
            self.add_pkt_len(-((req as usize - left) as isize));
        } else {
            let keep = total.saturating_sub(req.unsigned_abs());
            let mut acc = 0;
            while cur != NIL {
                let mut h = self.hdr(cur);
                let seg = h.len as usize;
                if acc + seg > keep {
                    h.len = keep.saturating_sub(acc) as u16;
                    self.set_hdr(cur, h);
                }
                acc += seg;
                cur = h.next;
            }
            self.add_pkt_len(-((total - keep) as isize));
        }
    }

    /// 在链首前插入 `n` 个零字节
    ///
    /// 第一块前面的空间不够时取新块放在链首，包头随之移到新的第一块。
    pub fn prepend(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        self.check_grow(n)?;
        let head = self.head;
        let mut hh = self.hdr(head);
        let lead = hh.leading_space();
        if lead >= n {
            hh.data_off -= n as u16;
            hh.len += n as u16;
            self.set_hdr(head, hh);
            let s = hh.data_off as usize;
            self.buf_mut(head)[s..s + n].fill(0);
            self.add_pkt_len(n as isize);
            return Ok(());
        }

        let pk = hh.pkthdr_len as usize;
        let per = self.pool.databuf_len();
        let bs = self.pool.pool.block_size();
        let rest = n - lead;
        let head_part = rest.min(per - pk);
        let run = self.pool.alloc_run(1 + (rest - head_part).div_ceil(per))?;

        if lead > 0 {
            hh.data_off -= lead as u16;
            hh.len += lead as u16;
            let s = hh.data_off as usize;
            self.buf_mut(head)[s..s + lead].fill(0);
        }
        if pk > 0 {
            self.copy_across(head, MBUF_HDR_SIZE, run, MBUF_HDR_SIZE, pk);
            hh.pkthdr_len = 0;
        }
        self.set_hdr(head, hh);

        let mut left = rest;
        let mut cur = run;
        loop {
            let mut h = self.hdr(cur);
            let next = h.next;
            let take = if cur == run { head_part } else { per.min(left) };
            h.data_off = (bs - take) as u16;
            h.len = take as u16;
            if cur == run {
                h.pkthdr_len = pk as u8;
            }
            if next == NIL {
                h.next = head;
            }
            self.set_hdr(cur, h);
            self.buf_mut(cur)[bs - take..].fill(0);
            left -= take;
            if next == NIL {
                break;
            }
            cur = next;
        }
        self.head = run;
        self.add_pkt_len(n as isize);
        Ok(())
    }

    /// 在链尾延长 `n` 字节连续空间并返回它（已清零）
    ///
    /// 最后一块放不下时取一块新的，`n` 不能超过一块的数据区。
    pub fn extend(&mut self, n: usize) -> Result<&mut [u8]> {
        if n > self.pool.databuf_len() {
            return Err(RtosError::InvalidArgument);
        }
        self.check_grow(n)?;
        let last = self.last();
        let mut lh = self.hdr(last);
        let target = if self.seg_trailing(&lh) >= n {
            last
        } else {
            let fresh = self.pool.alloc_run(1)?;
            lh.next = fresh;
            self.set_hdr(last, lh);
            fresh
        };
        let mut th = self.hdr(target);
        let start = th.end();
        th.len += n as u16;
        self.set_hdr(target, th);
        self.add_pkt_len(n as isize);
        let region = &mut self.buf_mut(target)[start..start + n];
        region.fill(0);
        Ok(region)
    }

    /// 把 `other` 接到链尾，`other` 的包头被去掉
    ///
    /// 两条链必须来自同一个池；出错时 `other` 被释放。
    pub fn concat(&mut self, other: MbufChain<'p>) -> Result<()> {
        if !ptr::eq(self.pool, other.pool) {
            return Err(RtosError::InvalidArgument);
        }
        let add = other.len();
        self.check_grow(add)?;
        let second = other.into_head();
        let mut sh = self.hdr(second);
        if sh.pkthdr_len > 0 {
            sh.pkthdr_len = 0;
            self.set_hdr(second, sh);
        }
        let last = self.last();
        let lh = self.hdr(last);
        self.set_hdr(last, Hdr { next: second, ..lh });
        self.add_pkt_len(add as isize);
        Ok(())
    }

    /// 复制整条链，包括各块的前导空间和包头
    pub fn dup(&self) -> Result<MbufChain<'p>> {
        let run = self.pool.alloc_run(self.seg_count())?;
        let bs = self.pool.pool.block_size();
        let mut src = self.head;
        let mut dst = run;
        while src != NIL {
            let dst_next = self.pool.read_hdr(dst).next;
            // SAFETY: src 属于本链，dst 是刚分配的块，两者不同
            unsafe { ptr::copy_nonoverlapping(self.pool.block_ptr(src), self.pool.block_ptr(dst), bs) };
            let h = self.pool.read_hdr(dst);
            self.pool.write_hdr(dst, Hdr { next: dst_next, ..h });
            src = h.next;
            dst = dst_next;
        }
        let copy = MbufChain { pool: self.pool, head: run };
        if copy.is_pkthdr() {
            self.pool.set_next_pkt(run, NIL);
        }
        Ok(copy)
    }

    /// 让前 `n` 字节在第一块里连续，返回这段数据
    ///
    /// 数据从后续块搬过来，搬空的块被释放。
    pub fn pullup(&mut self, n: usize) -> Result<&mut [u8]> {
        let head = self.head;
        let mut hh = self.hdr(head);
        let front = MBUF_HDR_SIZE + hh.pkthdr_len as usize;
        if n > self.pool.pool.block_size() - front {
            return Err(RtosError::InvalidArgument);
        }
        if n > self.len() {
            return Err(RtosError::OutOfRange);
        }
        if (hh.len as usize) < n {
            let off = hh.data_off as usize;
            if off > front {
                self.buf_mut(head).copy_within(off..off + hh.len as usize, front);
                hh.data_off = front as u16;
            }
            while (hh.len as usize) < n {
                let next = hh.next;
                let mut nh = self.hdr(next);
                let take = (n - hh.len as usize).min(nh.len as usize);
                self.copy_across(next, nh.data_off as usize, head, hh.end(), take);
                hh.len += take as u16;
                nh.data_off += take as u16;
                nh.len -= take as u16;
                if nh.len == 0 {
                    hh.next = nh.next;
                    let _ = self.pool.pool.put_index(next as usize);
                } else {
                    self.set_hdr(next, nh);
                }
            }
            self.set_hdr(head, hh);
        }
        let s = hh.data_off as usize;
        Ok(&mut self.buf_mut(head)[s..s + n])
    }

    /// 在链首前插入 `n` 个零字节，并让它们在第一块里连续
    ///
    /// `n` 超过第一块能容纳的数据时返回 `InvalidArgument`，链不变。
    pub fn prepend_pullup(&mut self, n: usize) -> Result<&mut [u8]> {
        let front = MBUF_HDR_SIZE + self.hdr(self.head).pkthdr_len as usize;
        if n > self.pool.pool.block_size() - front {
            return Err(RtosError::InvalidArgument);
        }
        self.prepend(n)?;
        self.pullup(n)
    }

    /// 比较本链 `off` 起和 `other` 的 `other_off` 起各 `len` 字节
    ///
    /// 任一条链不够长时返回 `None`。两条链可以来自不同的池。
    pub fn cmp_chain(
        &self,
        off: usize,
        other: &MbufChain<'_>,
        other_off: usize,
        len: usize,
    ) -> Option<Ordering> {
        if off.checked_add(len).is_none_or(|end| end > self.len())
            || other_off.checked_add(len).is_none_or(|end| end > other.len())
        {
            return None;
        }
        let mut segs_a = self.segments();
        let mut segs_b = other.segments();
        let (mut a, mut b): (&[u8], &[u8]) = (&[], &[]);
        let (mut skip_a, mut skip_b) = (off, other_off);
        let mut left = len;
        while left > 0 {
            while a.is_empty() {
                let seg = segs_a.next()?;
                let s = skip_a.min(seg.len());
                skip_a -= s;
                a = &seg[s..];
            }
            while b.is_empty() {
                let seg = segs_b.next()?;
                let s = skip_b.min(seg.len());
                skip_b -= s;
                b = &seg[s..];
            }
            let n = a.len().min(b.len()).min(left);
            match a[..n].cmp(&b[..n]) {
                Ordering::Equal => {}
                other => return Some(other),
            }
            a = &a[n..];
            b = &b[n..];
            left -= n;
        }
        Some(Ordering::Equal)
    }

    /// 定位偏移 `off`：返回 (段序号, 段内偏移)
    ///
    /// `off` 等于链长时返回最后一段的末尾。
    pub fn off(&self, off: usize) -> Option<(usize, usize)> {
        let mut left = off;
        let mut cur = self.head;
        let mut seg = 0;
        while cur != NIL {
            let h = self.hdr(cur);
            let len = h.len as usize;
            if len > left || (len == left && h.next == NIL) {
                return Some((seg, left));
            }
            left -= len;
            cur = h.next;
            seg += 1;
        }
        None
    }

    /// 释放链首的空块
    ///
    /// 第一个非空块放得下包头时，包头移过去，原来的第一块也被释放。
    pub fn trim_front(&mut self) {
        let head = self.head;
        let mut hh = self.hdr(head);
        if hh.len != 0 {
            return;
        }
        let mut cur = hh.next;
        while cur != NIL {
            let h = self.hdr(cur);
            if h.len != 0 {
                break;
            }
            hh.next = h.next;
            let _ = self.pool.pool.put_index(cur as usize);
            cur = h.next;
        }
        self.set_hdr(head, hh);
        if cur == NIL {
            return;
        }
        let pk = hh.pkthdr_len;
        let ch = self.hdr(cur);
        if ch.leading_space() >= pk as usize {
            if pk > 0 {
                self.copy_across(head, MBUF_HDR_SIZE, cur, MBUF_HDR_SIZE, pk as usize);
            }
            self.set_hdr(cur, Hdr { pkthdr_len: pk, ..ch });
            let _ = self.pool.pool.put_index(head as usize);
            self.head = cur;
        }
    }

    /// 释放整条链
    pub fn free_chain(self) {
        drop(self)
    }
}

impl Drop for MbufChain<'_> {
    fn drop(&mut self) {
        self.pool.free_run(self.head);
    }
}

impl core::fmt::Debug for MbufChain<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MbufChain")
            .field("len", &self.len())
            .field("segments", &self.seg_count())
            .field("pkt_len", &self.pkt_len())
            .finish()
    }
}

/// [`MbufChain::segments`] 的迭代器
pub struct Segments<'c, 'p> {
    chain: &'c MbufChain<'p>,
    cur: u16,
}

impl<'c> Iterator for Segments<'c, '_> {
    type Item = &'c [u8];

    fn next(&mut self) -> Option<&'c [u8]> {
        if self.cur == NIL {
            return None;
        }
        let chain = self.chain;
        let h = chain.hdr(self.cur);
        let data = &chain.buf(self.cur)[h.data_off as usize..h.end()];
        self.cur = h.next;
        Some(data)
    }
}
