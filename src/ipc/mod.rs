//! 任务间通信
//!
//! - `event`: 事件对象
//! - `eventq`: 事件队列及多队列等待
//! - `mqueue`: 带事件通知的 mbuf 包队列

pub mod event;
pub mod eventq;
pub mod mqueue;

pub use event::{Event, EventHandler, EventId};
pub use eventq::EventQId;
pub use mqueue::MbufQueue;
