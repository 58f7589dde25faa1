//! # 性质测试
//!
//! 节拍回绕、内存池计数、信号量计数和 mbuf 数据完整性在随机输入下的不变式。

use newt_kernel::hal::HostPort;
use newt_kernel::kernel::time::MAX_DELAY_TICKS;
use newt_kernel::{
    Kernel, MbufPool, MemBlock, MemPool, Priority, RtosError, StackWord, TaskState, Tick, Timeout,
};
use quickcheck_macros::quickcheck;

fn stack(words: usize) -> &'static mut [StackWord] {
    Box::leak(vec![0; words].into_boxed_slice())
}

fn entry(_arg: usize) {}

fn kernel() -> Kernel<HostPort> {
    let k = Kernel::new(HostPort::new());
    k.init(stack(64)).unwrap();
    k
}

#[repr(align(8))]
struct Region<const N: usize>([u8; N]);

#[quickcheck]
fn tick_order_holds_across_wrap(start: u32, delta: u32) -> bool {
    let delta = delta % MAX_DELAY_TICKS + 1;
    let from = Tick::new(start);
    let to = from.wrapping_add(delta);
    from.is_before(to)
        && !to.is_before(from)
        && to.has_reached(to)
        && !from.has_reached(to)
        && to.since(from) == delta as i32
}

#[quickcheck]
fn sleeper_wakes_exactly_at_deadline(offset: u32, delay: u16) {
    let delay = u32::from(delay) + 1;
    let k = kernel();
    let t = k.task_init("sleeper", entry, 0, Priority::new(5), stack(128)).unwrap();
    k.start().unwrap();
    k.tick_advance(offset);

    assert_eq!(k.task_sleep(delay), Err(RtosError::WouldBlock));
    k.tick_advance(delay - 1);
    assert_eq!(k.task_state(t), Ok(TaskState::Sleeping));
    k.tick_advance(1);
    assert_eq!(k.current_task(), Some(t));
    assert_eq!(k.time_get(), Tick::new(offset.wrapping_add(delay)));
}

/// `true` 取一块，`false` 归还最近取出的一块
#[quickcheck]
fn pool_accounting_matches_outstanding(ops: Vec<bool>) {
    const COUNT: usize = 6;
    let mut region = Region([0u8; 16 * COUNT]);
    let pool = MemPool::new("qc", &mut region.0, 16, COUNT).unwrap();
    let mut held: Vec<MemBlock<'_>> = Vec::new();
    let mut low = COUNT;

    for take in ops {
        if take {
            match pool.get() {
                Ok(b) => held.push(b),
                Err(e) => {
                    assert_eq!(e, RtosError::OutOfMemory);
                    assert_eq!(held.len(), COUNT);
                }
            }
        } else if let Some(b) = held.pop() {
            pool.put(b).unwrap();
        }
        low = low.min(COUNT - held.len());
        assert_eq!(pool.num_free() + held.len(), COUNT);
        assert_eq!(pool.min_free(), low);
    }
    for b in held.drain(..) {
        pool.put(b).unwrap();
    }
    assert!(pool.clear().is_ok());
}

/// `true` 不等待地获取，`false` 释放
#[quickcheck]
fn semaphore_count_tracks_model(initial: u8, ops: Vec<bool>) {
    let k = kernel();
    let sem = k.sem_init(u16::from(initial)).unwrap();
    let mut model = u16::from(initial);
    for pend in ops {
        if pend {
            let r = k.sem_pend(sem, Timeout::NoWait);
            if model == 0 {
                assert_eq!(r, Err(RtosError::Timeout));
            } else {
                assert_eq!(r, Ok(()));
                model -= 1;
            }
        } else {
            k.sem_release(sem).unwrap();
            model += 1;
        }
        assert_eq!(k.sem_count(sem), Ok(model));
    }
}

/// 分两次追加后整体读回，再从前面裁掉 `cut` 字节
#[quickcheck]
fn mbuf_keeps_bytes_in_order(data: Vec<u8>, split: usize, cut: usize) {
    let mut region = Region([0u8; 48 * 16]);
    let pool = MbufPool::new("qc", &mut region.0, 48, 16).unwrap();
    let data = &data[..data.len().min(400)];
    let split = if data.is_empty() { 0 } else { split % (data.len() + 1) };

    let mut m = pool.get_pkthdr(0).unwrap();
    m.append(&data[..split]).unwrap();
    m.append(&data[split..]).unwrap();
    assert_eq!(m.pkt_len(), Some(data.len()));
    let mut out = vec![0u8; data.len()];
    m.copy_data(0, &mut out).unwrap();
    assert_eq!(out, data);

    let cut = if data.is_empty() { 0 } else { cut % (data.len() + 1) };
    m.adj(cut as isize);
    assert_eq!(m.pkt_len(), Some(data.len() - cut));
    assert_eq!(m.cmp_flat(0, &data[cut..]), Some(core::cmp::Ordering::Equal));
    drop(m);
    assert_eq!(pool.num_free(), 16);
}
