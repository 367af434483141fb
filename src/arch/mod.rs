//! # Architecture Abstraction Layer
//!
//! The scheduler is architecture-neutral. Everything that touches registers,
//! stack frames or the interrupt mask lives behind [`Port`]:
//!
//! - building the synthetic context a new thread starts from
//! - switching away while saving the outgoing context
//! - switching away without saving (the outgoing thread is dead)
//! - masking and restoring interrupt delivery
//! - waiting for the next interrupt in the idle thread
//!
//! Ports:
//! - [`cortex_m4`]: PendSV/PSP context switch on ARMv7E-M (bare metal only)
//! - [`hosted`]: one std thread per kernel thread, used for host testing

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;

#[cfg(any(test, feature = "hosted"))]
pub mod hosted;

use crate::error::KernelResult;

/// Entry point a fresh context begins executing. The argument is the one
/// passed to [`Port::init_context`].
pub type StartFn = extern "C" fn(usize) -> !;

/// Hardware port used by the kernel.
///
/// # Switch protocol
///
/// The kernel calls [`Port::switch`] and [`Port::switch_without_save`] with
/// interrupts masked, as the last action inside a critical section. A port
/// may perform the switch synchronously (the call returns once the outgoing
/// thread is dispatched again) or defer it until the critical section
/// restores the mask (the call returns immediately and the switch happens on
/// unmask). The kernel does no work between the call and the end of the
/// critical section, so both behave identically.
pub trait Port: Sync + 'static {
    /// Saved execution state of a thread that is not running.
    type Context: Copy;

    /// Placeholder for unused TCB slots.
    const EMPTY_CONTEXT: Self::Context;

    /// Smallest stack that can hold the initial saved-register frame,
    /// including the two return addresses (thread entry and teardown).
    const MIN_STACK_SIZE: usize;

    /// Prepare the CPU for threading and install the periodic tick source.
    ///
    /// Called once from the root context, with interrupts masked.
    ///
    /// # Safety
    /// Must only be called once, before any context is created.
    unsafe fn init(&self);

    /// Context describing the caller (the root thread). Filled in by the
    /// first switch away from it.
    fn root_context(&self) -> Self::Context;

    /// Build a context that starts executing `start(arg)` on `stack`.
    ///
    /// # Safety
    /// `stack..stack + size` must be writable memory owned by the new thread
    /// for as long as it runs.
    unsafe fn init_context(
        &self,
        stack: *mut u8,
        size: usize,
        start: StartFn,
        arg: usize,
    ) -> KernelResult<Self::Context>;

    /// Save the running thread's state into `from` and resume `to`.
    ///
    /// # Safety
    /// Interrupts must be masked. Both pointers must reference live TCB
    /// contexts, `to` must have been produced by `init_context`,
    /// `root_context` or a previous save, and `from` must belong to the
    /// running thread.
    unsafe fn switch(&self, from: *mut Self::Context, to: *const Self::Context);

    /// Resume `to` and abandon the running thread for good.
    ///
    /// # Safety
    /// As for [`Port::switch`]; the running thread must never be resumed.
    unsafe fn switch_without_save(&self, to: *const Self::Context);

    /// Mask interrupt delivery. Returns whether it was already masked.
    fn mask_interrupts(&self) -> bool;

    /// Restore the mask state returned by [`Port::mask_interrupts`].
    ///
    /// # Safety
    /// Must pair with the most recent unrestored `mask_interrupts` call of
    /// the running thread.
    unsafe fn restore_interrupts(&self, was_masked: bool);

    /// Called first thing by every new thread. Unmasks interrupts that the
    /// dispatching critical section left masked.
    ///
    /// # Safety
    /// Only from the kernel's thread trampoline.
    unsafe fn thread_started(&self);

    /// Sleep until an interrupt arrives. Returns `true` when the port has no
    /// asynchronous tick source and the idle thread should deliver the
    /// elapsed tick itself.
    fn wait_for_interrupt(&self) -> bool;
}
