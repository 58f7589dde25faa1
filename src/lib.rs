//! 抢占式实时内核
//!
//! 固定优先级抢占调度、事件队列、信号量、带优先级继承的互斥锁、
//! 软件定时器（callout）、固定块内存池以及 mbuf 链。
//!
//! 所有内核对象都保存在 [`kernel::Kernel`] 内部的定长槽位中，
//! 通过可复制的句柄访问；内核本身不使用堆。

#![cfg_attr(not(test), no_std)]
#[cfg(test)]
extern crate std;

pub mod error;
pub mod log;
pub mod config;
pub mod utils;
pub mod hal;
pub mod kernel;
pub mod sync;
pub mod ipc;
pub mod mem;

pub use paste;

pub use error::{Result, RtosError, FatalError};
pub use hal::{Port, StackWord, TaskEntry};
pub use kernel::{Isr, Kernel};
pub use kernel::task::{Priority, TaskId, TaskInfo, TaskState, TaskBuilder, WaitResult};
pub use kernel::time::{Tick, Timeout};
pub use kernel::time::callout::CalloutId;
pub use sync::{SemId, MutexId};
pub use ipc::{Event, EventHandler, EventId, EventQId};
pub use ipc::MbufQueue;
pub use mem::{MbufChain, MbufPool, MemBlock, MemPool, Msys, ReleaseHook};
