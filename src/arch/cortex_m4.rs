//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements context switching via PendSV, SysTick timer configuration,
//! and interrupt masking through PRIMASK.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by exception handlers only
//! - **PSP** (Process Stack Pointer): used by every thread, including root
//!
//! On exception entry the hardware stacks R0–R3, R12, LR, PC and xPSR on the
//! process stack; PendSV saves and restores R4–R11 by hand, which completes
//! the full context. A thread's [`Context`] is just its saved PSP.
//!
//! [`Port::switch`] does not switch by itself. It records the pair of
//! contexts and pends PendSV, which fires as soon as the kernel's critical
//! section restores PRIMASK. From a thread that is the end of the kernel
//! call; from SysTick it is the exception tail-chain.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: Priority 0xFF (lowest)
//! - PendSV: Priority 0xFF (lowest); wins over a simultaneously pending
//!   SysTick by exception number, so a recorded switch always completes
//!   before the next tick is processed
//!
//! Built for `thumbv7em-none-eabi`: threads must not touch the FPU, the
//! switch assumes basic (non-FP) exception frames.

use core::arch::{asm, global_asm};
use core::mem::size_of;
use core::ptr::{addr_of, addr_of_mut};

use cortex_m::interrupt;
use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};
use cortex_m::register::primask;

use super::{Port, StartFn};
use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::error::{KernelError, KernelResult};

/// Words in the initial frame: R4–R11, then the hardware frame.
const FRAME_WORDS: usize = 16;

/// xPSR with only the Thumb bit set.
const XPSR_THUMB: u32 = 0x0100_0000;

/// Bytes of MSP reserved for exception handlers once threads run on PSP.
const HANDLER_STACK_SIZE: usize = 2048;

#[repr(C, align(8))]
struct HandlerStack([u8; HANDLER_STACK_SIZE]);

static mut HANDLER_STACK: HandlerStack = HandlerStack([0; HANDLER_STACK_SIZE]);

// ---------------------------------------------------------------------------
// Pending switch (shared with the PendSV handler)
// ---------------------------------------------------------------------------

/// Switch recorded by the kernel for PendSV to carry out. A null `from`
/// means the outgoing thread is gone and its registers are not saved.
#[repr(C)]
struct PendingSwitch {
    from: *mut Context,
    to: *const Context,
}

#[no_mangle]
static mut TICKTHREADS_PENDING: PendingSwitch = PendingSwitch {
    from: core::ptr::null_mut(),
    to: core::ptr::null(),
};

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Saved state of a thread that is not running: its process stack pointer,
/// pointing at the saved R4–R11.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Context {
    sp: usize,
}

impl Context {
    /// Saved PSP; zero before the thread was first switched away from.
    pub fn stack_pointer(&self) -> usize {
        self.sp
    }
}

/// Port for ARMv7E-M cores.
pub struct CortexM4 {
    _private: (),
}

impl CortexM4 {
    pub const fn new() -> Self {
        Self { _private: () }
    }

    fn record_switch(from: *mut Context, to: *const Context) {
        // SAFETY: only written with interrupts masked, read by PendSV with
        // interrupts masked
        let pending = unsafe { &mut *addr_of_mut!(TICKTHREADS_PENDING) };
        // A switch that has not run yet still leaves from the same thread
        if pending.to.is_null() || from.is_null() {
            pending.from = from;
        }
        pending.to = to;
        SCB::set_pendsv();
    }
}

impl Default for CortexM4 {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for CortexM4 {
    type Context = Context;

    const EMPTY_CONTEXT: Context = Context { sp: 0 };

    /// One full frame plus 8-byte alignment slack.
    const MIN_STACK_SIZE: usize = FRAME_WORDS * 4 + 8;

    unsafe fn init(&self) {
        // SAFETY: only the address is taken
        let handler_top = unsafe { addr_of!(HANDLER_STACK) } as usize + size_of::<HandlerStack>();

        // SAFETY: moves the running code from MSP to PSP without changing the
        // stack pointer value, then gives MSP a stack of its own
        unsafe {
            asm!(
                "mrs {tmp}, msp",
                "msr psp, {tmp}",
                "mrs {tmp}, control",
                "orr {tmp}, {tmp}, #2",
                "msr control, {tmp}",
                "isb",
                "msr msp, {top}",
                tmp = out(reg) _,
                top = in(reg) handler_top,
            );
        }

        // SAFETY: the kernel owns SCB priorities and SYST from here on
        let mut p = unsafe { cortex_m::Peripherals::steal() };
        unsafe {
            p.SCB.set_priority(SystemHandler::PendSV, 0xFF);
            p.SCB.set_priority(SystemHandler::SysTick, 0xFF);
        }
        configure_systick(&mut p.SYST);
    }

    fn root_context(&self) -> Context {
        // Filled in by the first switch away from the root
        Context { sp: 0 }
    }

    /// Lay out a frame that PendSV "returns" into.
    ///
    /// ```text
    /// [Hardware stacked frame]     <- high address
    ///   xPSR  (Thumb bit set)
    ///   PC    (start)
    ///   LR    (thread_teardown)
    ///   R12, R3, R2, R1  (0)
    ///   R0    (arg)
    /// [Software saved context]
    ///   R11 … R4  (0)              <- saved sp
    /// ```
    unsafe fn init_context(
        &self,
        stack: *mut u8,
        size: usize,
        start: StartFn,
        arg: usize,
    ) -> KernelResult<Context> {
        let base = stack as usize;
        // Align to 8 bytes (AAPCS requirement)
        let top = (base + size) & !0x07;
        let frame_addr = top
            .checked_sub(FRAME_WORDS * 4)
            .filter(|&a| a >= base)
            .ok_or(KernelError::StackTooSmall {
                size,
                min: Self::MIN_STACK_SIZE,
            })?;
        let frame = frame_addr as *mut u32;

        // SAFETY: the frame lies inside the caller's stack region
        unsafe {
            for i in 0..8 {
                frame.add(i).write(0); // R4–R11
            }
            frame.add(8).write(arg as u32); // R0
            for i in 9..13 {
                frame.add(i).write(0); // R1–R3, R12
            }
            frame.add(13).write(thread_teardown as usize as u32 | 1); // LR
            frame.add(14).write(start as usize as u32 & !1); // PC
            frame.add(15).write(XPSR_THUMB);
        }

        Ok(Context { sp: frame_addr })
    }

    unsafe fn switch(&self, from: *mut Context, to: *const Context) {
        Self::record_switch(from, to);
    }

    unsafe fn switch_without_save(&self, to: *const Context) {
        Self::record_switch(core::ptr::null_mut(), to);
    }

    fn mask_interrupts(&self) -> bool {
        let was_masked = !primask::read().is_active();
        interrupt::disable();
        was_masked
    }

    unsafe fn restore_interrupts(&self, was_masked: bool) {
        if !was_masked {
            // SAFETY: restoring the state saved by `mask_interrupts`
            unsafe { interrupt::enable() };
        }
    }

    unsafe fn thread_started(&self) {
        // SAFETY: the dispatching critical section is over
        unsafe { interrupt::enable() };
    }

    fn wait_for_interrupt(&self) -> bool {
        cortex_m::asm::wfi();
        false
    }
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `TICK_HZ` from the processor clock. The
/// application's `SysTick` handler calls `Kernel::tick`.
fn configure_systick(syst: &mut SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Return address of a fresh frame. Unreachable: thread entries never return
/// to it.
extern "C" fn thread_teardown() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------
//
// 1. Mask interrupts and load the pending pair
// 2. Unless `from` is null: push R4–R11 on the PSP, store PSP into `from`
// 3. Clear the pending pair
// 4. Load PSP from `to`, pop R4–R11
// 5. Unmask and return to Thread mode on PSP (EXC_RETURN = 0xFFFFFFFD)

global_asm!(
    ".section .text.PendSV,\"ax\",%progbits",
    ".global PendSV",
    ".type PendSV,%function",
    ".thumb_func",
    "PendSV:",
    "    cpsid i",
    "    movw r2, :lower16:TICKTHREADS_PENDING",
    "    movt r2, :upper16:TICKTHREADS_PENDING",
    "    ldr r0, [r2]",
    "    ldr r1, [r2, #4]",
    "    cbz r0, 1f",
    "    mrs r3, psp",
    "    stmdb r3!, {{r4-r11}}",
    "    str r3, [r0]",
    "1:",
    "    movs r3, #0",
    "    str r3, [r2]",
    "    str r3, [r2, #4]",
    "    ldr r3, [r1]",
    "    ldmia r3!, {{r4-r11}}",
    "    msr psp, r3",
    "    cpsie i",
    "    mvn lr, #2",
    "    bx lr",
    ".size PendSV, . - PendSV",
);
