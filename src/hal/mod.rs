//! 硬件抽象层 (HAL)
//!
//! 提供与底层硬件交互的抽象接口，支持多种架构。

pub mod traits;
pub mod host;

#[cfg(all(feature = "cortex_m3", target_arch = "arm"))]
pub mod cortex_m3;

// 重新导出 traits
pub use traits::*;
pub use host::HostPort;

/// 异常帧加上 r4-r11 的字数
pub(crate) const CONTEXT_WORDS: usize = 16;

/// 按 Cortex-M 的异常返回布局构建初始上下文
///
/// 从栈顶（8 字节对齐）往下依次是 xPSR、PC、LR、r12、r3、r2、r1、r0，
/// 再往下是 r4-r11。
///
/// # 返回值
/// 上下文底部的地址，即任务的初始栈指针
pub(crate) fn init_context_frame(stack: &mut [StackWord], pc: u32, lr: u32, r0: u32) -> usize {
    let base = stack.as_ptr() as usize;
    let word = core::mem::size_of::<StackWord>();
    let mut top = stack.len();
    if (base + top * word) & 7 != 0 {
        top -= 1;
    }
    let frame = top - CONTEXT_WORDS;

    stack[frame..top].fill(0);
    stack[top - 1] = 0x0100_0000; // xPSR: Thumb 位
    stack[top - 2] = pc & !1;
    stack[top - 3] = lr;
    stack[top - 8] = r0;

    base + frame * word
}
