//! # 内存池与 mbuf 集成测试
//!
//! 静态存储声明、mbuf 跨块读写、msys 选池，以及包经由 mbuf 队列在任务
//! 之间传递。

use newt_kernel::hal::HostPort;
use newt_kernel::mem::{MemBlock, MemPool, ReleaseHook};
use newt_kernel::{
    mempool_storage, Kernel, MbufPool, MbufQueue, Msys, Priority, Result, RtosError, StackWord,
    Timeout, WaitResult,
};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};

mempool_storage!(SMALL_BLOCKS, 16, 4);
mempool_storage!(PKT_BUFS, 64, 16);
mempool_storage!(HOOKED_BUFS, 32, 8);

fn stack(words: usize) -> &'static mut [StackWord] {
    Box::leak(vec![0; words].into_boxed_slice())
}

fn entry(_arg: usize) {}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

#[repr(align(8))]
struct Region<const N: usize>([u8; N]);

#[test]
fn test_static_pool_exhausts_and_reuses_addresses() {
    let pool = small_blocks_pool("small").unwrap();
    assert_eq!(pool.block_count(), 4);
    let mut blocks: Vec<MemBlock<'static>> = (0..4).map(|_| pool.get().unwrap()).collect();
    assert_eq!(pool.get().unwrap_err(), RtosError::OutOfMemory);
    assert_eq!(pool.info().min_free, 0);

    let addrs: Vec<*const u8> = blocks.iter().map(MemBlock::as_ptr).collect();
    for (i, a) in addrs.iter().enumerate() {
        for b in &addrs[i + 1..] {
            assert!((*a as usize).abs_diff(*b as usize) >= 16);
        }
        assert!(pool.is_from(*a));
    }

    let third = blocks.remove(2);
    let freed = third.as_ptr();
    pool.put(third).unwrap();
    let again = pool.get().unwrap();
    assert_eq!(again.as_ptr(), freed);

    blocks.push(again);
    for b in blocks {
        pool.put(b).unwrap();
    }
    assert_eq!(pool.num_free(), 4);
    assert_eq!(pool.min_free(), 0);
}

#[test]
fn test_mbuf_data_survives_block_boundaries() {
    let pool = MbufPool::from_pool(pkt_bufs_pool("pkt").unwrap()).unwrap();
    assert_eq!(pool.databuf_len(), 56);

    // 带包头的首块能放 48 字节，后续每块 56 字节
    for (len, segs) in [(1, 1), (48, 1), (49, 2), (104, 2), (105, 3), (200, 4)] {
        let data = pattern(len);
        let mut m = pool.get_pkthdr(0).unwrap();
        m.append(&data).unwrap();
        assert_eq!(m.pkt_len(), Some(len));
        assert_eq!(m.len(), len);
        assert_eq!(m.seg_count(), segs, "len {}", len);

        let mut out = vec![0u8; len];
        m.copy_data(0, &mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(m.cmp_flat(0, &data), Some(CmpOrdering::Equal));
        let flat: Vec<u8> = m.segments().flat_map(|s| s.iter().copied()).collect();
        assert_eq!(flat, data);
    }
    assert_eq!(pool.num_free(), 16);
}

#[test]
fn test_mbuf_header_edit_cycle() {
    let mut region = Region([0u8; 64 * 8]);
    let pool = MbufPool::new("edit", &mut region.0, 64, 8).unwrap();
    let payload = pattern(90);

    let mut m = pool.get_pkthdr(4).unwrap();
    m.user_header_mut().copy_from_slice(&[1, 2, 3, 4]);
    m.append(&payload).unwrap();

    // 在前面加一个 6 字节的头，再拉平到首块
    m.prepend(6).unwrap();
    m.copy_into(0, b"HDR:01").unwrap();
    assert_eq!(m.pkt_len(), Some(96));
    assert_eq!(m.user_header(), &[1, 2, 3, 4]);
    let front = m.pullup(20).unwrap();
    assert_eq!(&front[..6], b"HDR:01");
    assert_eq!(&front[6..], &payload[..14]);

    // 剥掉头和最后 10 字节
    m.adj(6);
    m.adj(-10);
    assert_eq!(m.pkt_len(), Some(80));
    assert_eq!(m.cmp_flat(0, &payload[..80]), Some(CmpOrdering::Equal));

    let copy = m.dup().unwrap();
    assert_eq!(copy.pkt_len(), Some(80));
    assert_eq!(copy.user_header(), &[1, 2, 3, 4]);
    drop(m);
    assert_eq!(copy.cmp_flat(0, &payload[..80]), Some(CmpOrdering::Equal));
    drop(copy);
    assert_eq!(pool.num_free(), 8);
}

#[test]
fn test_failed_append_leaves_chain_untouched() {
    let mut region = Region([0u8; 32 * 3]);
    let pool = MbufPool::new("tight", &mut region.0, 32, 3).unwrap();
    let mut m = pool.get(0).unwrap();
    m.append(&pattern(30)).unwrap();
    assert_eq!(pool.num_free(), 1);

    assert_eq!(m.append(&[0u8; 50]), Err(RtosError::OutOfMemory));
    assert_eq!(m.len(), 30);
    assert_eq!(pool.num_free(), 1);
    assert_eq!(m.cmp_flat(0, &pattern(30)), Some(CmpOrdering::Equal));
}

struct CountingHook {
    released: AtomicUsize,
}

impl ReleaseHook for CountingHook {
    fn on_release<'a>(&self, pool: &MemPool<'a>, block: MemBlock<'a>) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        pool.put_from_hook(block)
    }
}

#[test]
fn test_mbuf_frees_go_through_release_hook() {
    static HOOK: CountingHook = CountingHook { released: AtomicUsize::new(0) };
    let mem = hooked_bufs_pool("hooked").unwrap().with_release_hook(&HOOK);
    let pool = MbufPool::from_pool(mem).unwrap();

    let mut m = pool.get_pkthdr(0).unwrap();
    m.append(&pattern(50)).unwrap();
    assert_eq!(m.seg_count(), 3);
    drop(m);
    assert_eq!(HOOK.released.load(Ordering::SeqCst), 3);
    assert_eq!(pool.num_free(), 8);
}

#[test]
fn test_packets_flow_from_msys_through_queue() {
    let mut small_mem = Region([0u8; 32 * 4]);
    let mut large_mem = Region([0u8; 128 * 2]);
    let small = MbufPool::new("small", &mut small_mem.0, 32, 4).unwrap();
    let large = MbufPool::new("large", &mut large_mem.0, 128, 2).unwrap();
    let msys: Msys<'_, 2> = Msys::new();
    msys.register(&small).unwrap();
    msys.register(&large).unwrap();

    let k = Kernel::new(HostPort::new());
    k.init(stack(64)).unwrap();
    let consumer = k.task_init("rx", entry, 0, Priority::new(2), stack(128)).unwrap();
    let _producer = k.task_init("tx", entry, 0, Priority::new(5), stack(128)).unwrap();
    k.start().unwrap();
    let q = k.eventq_init().unwrap();
    let rx_small = MbufQueue::new(&k, &small, 1, 0, None).unwrap();
    let rx_large = MbufQueue::new(&k, &large, 2, 0, None).unwrap();

    // rx 等待，tx 投递一个大包和一个小包
    assert_eq!(k.eventq_get(q, Timeout::Forever), Err(RtosError::WouldBlock));
    let mut big = msys.get_pkthdr(60, 4).unwrap();
    assert!(std::ptr::eq(big.pool(), &large));
    big.user_header_mut().copy_from_slice(b"big!");
    big.append(&pattern(60)).unwrap();
    rx_large.put(&k, q, big).unwrap();
    assert_eq!(k.current_task(), Some(consumer));
    let Some(WaitResult::Event(ev)) = k.take_wait_result(consumer) else {
        panic!("consumer was not handed an event");
    };
    assert_eq!(ev.id, rx_large.event());

    let got = rx_large.get().unwrap();
    assert_eq!(got.user_header(), b"big!");
    assert_eq!(got.pkt_len(), Some(60));
    assert_eq!(got.cmp_flat(0, &pattern(60)), Some(CmpOrdering::Equal));
    assert!(rx_large.get().is_none());
    drop(got);

    let mut tiny = msys.get_pkthdr(10, 0).unwrap();
    assert!(std::ptr::eq(tiny.pool(), &small));
    tiny.append(b"0123456789").unwrap();
    rx_small.put(&k, q, tiny).unwrap();
    assert_eq!(k.eventq_get(q, Timeout::NoWait).map(|e| e.kind), Ok(1));
    assert_eq!(rx_small.get().map(|p| p.pkt_len()), Some(Some(10)));

    // 来自别的池的包被拒绝并释放
    let stray = large.get_pkthdr(0).unwrap();
    assert_eq!(rx_small.put(&k, q, stray), Err(RtosError::InvalidArgument));
    assert_eq!(large.num_free(), 2);
    assert_eq!(small.num_free(), 4);
}
