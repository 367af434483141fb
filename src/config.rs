//! # Configuration
//!
//! Compile-time constants governing the scheduler and system behavior.
//! All limits are fixed at compile time; there is no dynamic allocation.

/// Number of thread control blocks in the pool, including the root and
/// idle threads. Slot indices are stored as `u8`, so this must stay below 256.
pub const MAX_THREADS: usize = 16;

/// Default time slice in ticks. A thread runs for this many ticks before
/// the scheduler rotates it behind threads of equal priority.
pub const DEFAULT_QUANTUM: u8 = 5;

/// Number of library-owned stacks handed out by [`Kernel::spawn`].
///
/// [`Kernel::spawn`]: crate::Kernel::spawn
pub const POOLED_STACKS: usize = 8;

/// Size in bytes of each pooled stack. Must be large enough for the
/// deepest call chain plus the exception frame (32 bytes) and the
/// software-saved context (32 bytes for R4–R11).
pub const DEFAULT_STACK_SIZE: usize = 1024;

/// Stack reserved for the idle thread. The idle loop only waits for
/// interrupts and yields.
pub const IDLE_STACK_SIZE: usize = 256;

/// Offset subtracted from a readers-writer lock's reader counter while a
/// writer holds or waits for the lock. Must exceed the number of threads
/// that can ever hold a read lock at once.
pub const RW_BIAS: i32 = 1 << 12;

/// SysTick frequency in Hz. Determines scheduler tick granularity.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

const _: () = assert!(MAX_THREADS < u8::MAX as usize);
const _: () = assert!(POOLED_STACKS <= 32);
const _: () = assert!(RW_BIAS as usize > MAX_THREADS);
