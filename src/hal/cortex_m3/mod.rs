//! Cortex-M3 移植层
//!
//! PendSV 处理程序在 `asm/context.s` 中：保存 r4-r11 到当前任务栈，调用
//! [`newt_switch_context`] 换栈，再恢复下一个任务的 r4-r11。SysTick 推进
//! 内核节拍。两者都通过 [`register`] 登记的全局内核工作。

use cortex_m::peripheral::scb::{SystemHandler, VectActive};
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SCB;
use cortex_m::register::psp;
use cortex_m_rt::{exception, ExceptionFrame};
use critical_section::RawRestoreState;
use spin::Once;

use super::traits::{Port, StackWord, TaskEntry};
use crate::error::{fatal, FatalError};
use crate::kernel::Kernel;

/// 最低的异常优先级
const LOWEST_PRIORITY: u8 = 0xFF;

static KERNEL: Once<&'static Kernel<CortexM3Port>> = Once::new();

/// 登记全局内核，SysTick 和 PendSV 都通过它找到调度器
pub fn register(kernel: &'static Kernel<CortexM3Port>) {
    KERNEL.call_once(|| kernel);
}

fn kernel() -> Option<&'static Kernel<CortexM3Port>> {
    KERNEL.get().copied()
}

pub struct CortexM3Port {
    sys_clock_hz: u32,
}

impl CortexM3Port {
    /// `sys_clock_hz` 是 SysTick 的时钟源频率
    pub const fn new(sys_clock_hz: u32) -> Self {
        Self { sys_clock_hz }
    }
}

impl Port for CortexM3Port {
    fn init_task_stack(&self, stack: &mut [StackWord], entry: TaskEntry, arg: usize) -> usize {
        super::init_context_frame(stack, entry as usize as u32, task_exit as usize as u32, arg as u32)
    }

    fn trigger_switch(&self) {
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
        SCB::set_pendsv();
    }

    fn start_first_task(&self, sp: usize) {
        // SAFETY: 只在启动时调用一次，此时没有别的代码持有外设
        let mut p = unsafe { cortex_m::Peripherals::steal() };
        unsafe {
            p.SCB.set_priority(SystemHandler::PendSV, LOWEST_PRIORITY);
            p.SCB.set_priority(SystemHandler::SysTick, LOWEST_PRIORITY);
            // PendSV 第一次会在这里压入 r4-r11，随后换到第一个任务
            psp::write((sp + 8 * core::mem::size_of::<StackWord>()) as u32);
        }
        self.trigger_switch();
    }

    fn start_tick(&self, ticks_per_sec: u32) {
        // SAFETY: SysTick 只由本移植层配置
        let mut syst = unsafe { cortex_m::Peripherals::steal() }.SYST;
        syst.set_clock_source(SystClkSource::Core);
        syst.set_reload(self.sys_clock_hz / ticks_per_sec - 1);
        syst.clear_current();
        syst.enable_counter();
        syst.enable_interrupt();
    }

    fn in_isr(&self) -> bool {
        SCB::vect_active() != VectActive::ThreadMode
    }

    fn idle_entry(&self) -> TaskEntry {
        idle_wfi
    }
}

fn idle_wfi(_arg: usize) {
    loop {
        cortex_m::asm::wfi();
    }
}

fn task_exit() -> ! {
    fatal(FatalError::TaskReturned)
}

/// PendSV 调用的换栈函数
#[unsafe(no_mangle)]
extern "C" fn newt_switch_context(psp: u32) -> u32 {
    match kernel() {
        Some(k) => k.switch_context(psp as usize) as u32,
        None => psp,
    }
}

#[exception]
fn SysTick() {
    if let Some(k) = kernel() {
        k.enter_isr().tick_advance(1);
    }
}

#[exception]
unsafe fn HardFault(ef: &ExceptionFrame) -> ! {
    crate::error!("hard fault at pc {:#010x}", ef.pc());
    loop {
        cortex_m::asm::bkpt();
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    cortex_m::interrupt::disable();
    cortex_m_semihosting::hprintln!("{}", info);
    loop {
        cortex_m::asm::bkpt();
    }
}

struct PrimaskCriticalSection;
critical_section::set_impl!(PrimaskCriticalSection);

unsafe impl critical_section::Impl for PrimaskCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let was_enabled = cortex_m::register::primask::read().is_inactive();
        cortex_m::interrupt::disable();
        was_enabled
    }

    unsafe fn release(was_enabled: RawRestoreState) {
        // 只恢复进入前的状态，嵌套临界区不会提前开中断
        if was_enabled {
            unsafe { cortex_m::interrupt::enable() };
        }
    }
}
