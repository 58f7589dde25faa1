use crate::kernel::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtosError {
    // 任务相关
    TaskSlotsFull,
    PriorityInUse,
    NotStarted,

    // 同步相关
    SemaphoreSlotsFull,
    SemaphoreOverflow,
    MutexSlotsFull,

    // IPC 相关
    EventQueueSlotsFull,
    EventSlotsFull,
    EventQueueBusy,
    InvalidHandle,

    // 定时器相关
    CalloutSlotsFull,
    Timeout,

    // 内存相关
    OutOfMemory,
    RegionTooSmall,
    MisalignedRegion,
    InvalidBlockSize,
    NotInPool,
    NotPacketHeader,
    OutOfRange,

    // 通用错误
    WouldBlock,
    InvalidArgument,
}

impl core::fmt::Display for RtosError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            // 任务
            RtosError::TaskSlotsFull => write!(f, "Task slots full"),
            RtosError::PriorityInUse => write!(f, "Priority already in use"),
            RtosError::NotStarted => write!(f, "Scheduler not started"),

            // Semaphore / Mutex
            RtosError::SemaphoreSlotsFull => write!(f, "Semaphore slots full"),
            RtosError::SemaphoreOverflow => write!(f, "Semaphore overflow"),
            RtosError::MutexSlotsFull => write!(f, "Mutex slots full"),

            // IPC
            RtosError::EventQueueSlotsFull => write!(f, "Event queue slots full"),
            RtosError::EventSlotsFull => write!(f, "Event slots full"),
            RtosError::EventQueueBusy => write!(f, "Event queue already has a waiter"),
            RtosError::InvalidHandle => write!(f, "Invalid handle"),

            // Callout
            RtosError::CalloutSlotsFull => write!(f, "Callout slots full"),
            RtosError::Timeout => write!(f, "Operation timed out"),

            // Memory
            RtosError::OutOfMemory => write!(f, "Out of memory"),
            RtosError::RegionTooSmall => write!(f, "Memory region too small"),
            RtosError::MisalignedRegion => write!(f, "Memory region misaligned"),
            RtosError::InvalidBlockSize => write!(f, "Invalid block size"),
            RtosError::NotInPool => write!(f, "Block does not belong to pool"),
            RtosError::NotPacketHeader => write!(f, "Mbuf is not a packet header"),
            RtosError::OutOfRange => write!(f, "Offset out of range"),

            // Generic
            RtosError::WouldBlock => write!(f, "Operation would block"),
            RtosError::InvalidArgument => write!(f, "Invalid argument"),
        }
    }
}

pub type Result<T> = core::result::Result<T, RtosError>;

/// 不可恢复的内核错误
///
/// 出现这些情况说明内核不变量已被破坏，继续运行没有意义。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// 非持有者释放互斥锁
    MutexNotOwner,
    /// 互斥锁记录了嵌套层数却没有持有者
    MutexCorrupt,
    /// 空闲任务试图阻塞
    IdleBlocked,
    /// 就绪集合为空
    NoReadyTask,
    /// 内存块被重复归还
    DoubleFree,
    /// 归还的内存块不属于该内存池
    ForeignBlock,
    /// 任务栈底的填充字被覆盖
    StackOverflow(TaskId),
    /// 任务入口函数返回
    TaskReturned,
    /// 中断上下文里调用了会阻塞的操作
    BlockedInIsr,
}

impl core::fmt::Display for FatalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FatalError::MutexNotOwner => write!(f, "mutex released by non-owner"),
            FatalError::MutexCorrupt => write!(f, "mutex nested without owner"),
            FatalError::IdleBlocked => write!(f, "idle task attempted to block"),
            FatalError::NoReadyTask => write!(f, "ready set is empty"),
            FatalError::DoubleFree => write!(f, "memory block released twice"),
            FatalError::ForeignBlock => write!(f, "memory block from another pool"),
            FatalError::StackOverflow(id) => write!(f, "stack overflow in task {}", id.index()),
            FatalError::TaskReturned => write!(f, "task returned from its entry"),
            FatalError::BlockedInIsr => write!(f, "blocking call from interrupt context"),
        }
    }
}

/// 内核内部操作的失败结果：可返回的错误或致命错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    Error(RtosError),
    Fatal(FatalError),
}

impl From<RtosError> for Fault {
    fn from(e: RtosError) -> Self {
        Fault::Error(e)
    }
}

impl From<FatalError> for Fault {
    fn from(e: FatalError) -> Self {
        Fault::Fatal(e)
    }
}
