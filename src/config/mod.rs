// 内核对象容量配置，均为编译期常量
pub const MAX_TASKS: usize = 16;
pub const MAX_SEMAPHORES: usize = 16;
pub const MAX_MUTEXES: usize = 16;
pub const MAX_EVENTQS: usize = 8;
pub const MAX_EVENTS: usize = 32;
pub const MAX_CALLOUTS: usize = 16;
/// 一次 `eventq_poll` 最多同时等待的队列数
pub const MAX_POLL_QUEUES: usize = 4;

// 时钟
pub const TICKS_PER_SEC: u32 = 1000;

// 任务栈（单位：字）
pub const DEFAULT_STACK_WORDS: usize = 256;
pub const IDLE_STACK_WORDS: usize = 64;
/// 栈填充值，用于栈溢出检测和栈使用量统计
pub const STACK_PATTERN: u32 = 0xdead_beef;

/// 内存池区域与块大小的对齐要求（字节）
pub const OS_ALIGNMENT: usize = 4;

pub const SEM_MAX_TOKENS: u16 = u16::MAX;
/// 优先级数量，0 最高，255 保留给空闲任务
pub const PRIO_LEVELS: usize = 256;

// 句柄使用 u8 编码
const _: () = assert!(MAX_TASKS <= 255);
const _: () = assert!(MAX_SEMAPHORES <= 255);
const _: () = assert!(MAX_MUTEXES <= 255);
const _: () = assert!(MAX_EVENTQS <= 255);
const _: () = assert!(MAX_EVENTS <= 255);
const _: () = assert!(MAX_CALLOUTS <= 255);
