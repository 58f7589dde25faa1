//! mbuf 包队列
//!
//! 包（带包头的 mbuf 链）通过包头里的 next 字段串成 FIFO。每次入队都会把
//! 队列自带的事件投递到指定的事件队列，消费者收到事件后用 `get` 取包。
//! 事件已经在队列里时不会重复投递，所以一次事件可能对应多个包。

use core::cell::Cell;

use critical_section::Mutex;

use super::event::{EventHandler, EventId};
use super::eventq::EventQId;
use crate::error::{Result, RtosError};
use crate::hal::Port;
use crate::kernel::{Isr, Kernel};
use crate::mem::mbuf::{MbufChain, MbufPool, NIL};

pub struct MbufQueue<'p> {
    pool: &'p MbufPool<'p>,
    event: EventId,
    /// (队首, 队尾) 块序号
    list: Mutex<Cell<(u16, u16)>>,
}

impl<'p> MbufQueue<'p> {
    /// 建立队列并分配它的通知事件
    pub fn new<P: Port>(
        kernel: &Kernel<P>,
        pool: &'p MbufPool<'p>,
        kind: u16,
        arg: usize,
        handler: Option<EventHandler>,
    ) -> Result<Self> {
        let event = kernel.event_init(kind, arg, handler)?;
        Ok(Self { pool, event, list: Mutex::new(Cell::new((NIL, NIL))) })
    }

    /// 通知事件
    pub fn event(&self) -> EventId {
        self.event
    }

    fn enqueue(&self, pkt: MbufChain<'p>) -> Result<()> {
        if !core::ptr::eq(pkt.pool(), self.pool) {
            return Err(RtosError::InvalidArgument);
        }
        if !pkt.is_pkthdr() {
            return Err(RtosError::NotPacketHeader);
        }
        let idx = pkt.into_head();
        self.pool.set_next_pkt(idx, NIL);
        critical_section::with(|cs| {
            let cell = self.list.borrow(cs);
            let (head, tail) = cell.get();
            if tail == NIL {
                cell.set((idx, idx));
            } else {
                self.pool.set_next_pkt(tail, idx);
                cell.set((head, idx));
            }
        });
        Ok(())
    }

    /// 入队并通知 `evq`
    ///
    /// 包必须带包头且来自本队列的池，否则包被释放并返回错误。
    pub fn put<P: Port>(&self, kernel: &Kernel<P>, evq: EventQId, pkt: MbufChain<'p>) -> Result<()> {
        self.enqueue(pkt)?;
        kernel.eventq_put(evq, self.event)
    }

    /// 中断上下文里入队
    pub fn put_from_isr<P: Port>(&self, isr: &Isr<'_, P>, evq: EventQId, pkt: MbufChain<'p>) -> Result<()> {
        self.enqueue(pkt)?;
        isr.eventq_put(evq, self.event)
    }

    /// 取出队首的包
    pub fn get(&self) -> Option<MbufChain<'p>> {
        let idx = critical_section::with(|cs| {
            let cell = self.list.borrow(cs);
            let (head, tail) = cell.get();
            if head == NIL {
                return None;
            }
            let next = self.pool.next_pkt(head);
            cell.set(if head == tail { (NIL, NIL) } else { (next, tail) });
            Some(head)
        })?;
        self.pool.set_next_pkt(idx, NIL);
        Some(MbufChain::from_head(self.pool, idx))
    }

    pub fn is_empty(&self) -> bool {
        critical_section::with(|cs| self.list.borrow(cs).get().0 == NIL)
    }
}

impl Drop for MbufQueue<'_> {
    fn drop(&mut self) {
        while let Some(pkt) = self.get() {
            drop(pkt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::time::Timeout;
    use crate::utils::fixture::host_kernel;

    #[repr(align(8))]
    struct Region([u8; 256]);

    #[test]
    fn test_packets_in_order_with_one_event() {
        let k = host_kernel();
        let mut r = Region([0; 256]);
        let pool = MbufPool::new("mq", &mut r.0, 32, 8).unwrap();
        let q = k.eventq_init().unwrap();
        let mq = MbufQueue::new(&k, &pool, 9, 0, None).unwrap();

        for tag in [b"one", b"two"] {
            let mut pkt = pool.get_pkthdr(0).unwrap();
            pkt.append(tag).unwrap();
            mq.put(&k, q, pkt).unwrap();
        }
        let ev = k.eventq_get(q, Timeout::NoWait).unwrap();
        assert_eq!(ev.id, mq.event());
        assert_eq!(ev.kind, 9);
        assert_eq!(k.eventq_get(q, Timeout::NoWait), Err(RtosError::Timeout));

        let first = mq.get().unwrap();
        assert_eq!(first.head_data(), b"one");
        let second = mq.get().unwrap();
        assert_eq!(second.head_data(), b"two");
        assert!(mq.get().is_none());
        assert!(mq.is_empty());
    }

    #[test]
    fn test_rejects_plain_mbuf() {
        let k = host_kernel();
        let mut r = Region([0; 256]);
        let pool = MbufPool::new("mq", &mut r.0, 32, 8).unwrap();
        let q = k.eventq_init().unwrap();
        let mq = MbufQueue::new(&k, &pool, 0, 0, None).unwrap();
        let plain = pool.get(0).unwrap();
        assert_eq!(mq.put(&k, q, plain), Err(RtosError::NotPacketHeader));
        assert_eq!(pool.num_free(), 8);
        assert_eq!(k.eventq_is_empty(q), Ok(true));
    }

    #[test]
    fn test_drop_frees_queued_packets() {
        let k = host_kernel();
        let mut r = Region([0; 256]);
        let pool = MbufPool::new("mq", &mut r.0, 32, 8).unwrap();
        let q = k.eventq_init().unwrap();
        {
            let mq = MbufQueue::new(&k, &pool, 0, 0, None).unwrap();
            let mut pkt = pool.get_pkthdr(0).unwrap();
            pkt.append(&[0u8; 40]).unwrap();
            mq.put(&k, q, pkt).unwrap();
            assert_eq!(pool.num_free(), 6);
        }
        assert_eq!(pool.num_free(), 8);
    }
}
