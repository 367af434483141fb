//! # tickthreads
//!
//! A small preemptive threading kernel for single-core microcontrollers,
//! driven by a periodic tick.
//!
//! ## Overview
//!
//! The calling context becomes the *root thread* when the kernel is
//! initialized; further threads are created with an entry function, an
//! argument, a stack and a priority above `Idle`. The highest-priority
//! runnable thread always runs, and threads of equal priority share the CPU
//! in round-robin time slices.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                  Application Threads                   │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                 │
//! │   init · spawn · yield · sleep · join · pause · cancel │
//! ├──────────────────────────────┬─────────────────────────┤
//! │  Scheduler (scheduler.rs)    │  Sync Primitives (sync/)│
//! │  ─ tick()                    │  ─ Mutex                │
//! │  ─ reschedule()              │  ─ ReentrantMutex       │
//! │  ─ park / wake               │  ─ Semaphore · RwLock   │
//! ├──────────────────────────────┴─────────────────────────┤
//! │  Thread Model (thread.rs) · Queues (run/sleep/wait)    │
//! │      TCB pool · ThreadId · ThreadState · Priority      │
//! ├────────────────────────────────────────────────────────┤
//! │  Port (arch/)                                          │
//! │    cortex_m4: PendSV · SysTick · PRIMASK               │
//! │    hosted:    std threads with baton hand-off          │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: the kernel is a `static`, all state is inline
//! - **Fixed-size TCB arena**: [`config::MAX_THREADS`] slots, linked by index
//! - **Stacks**: caller-supplied through [`Kernel::create`], or taken from a
//!   small built-in pool by [`Kernel::spawn`]
//! - **Critical sections**: interrupt masking through the [`Port`]
//!
//! ## Example
//!
//! ```ignore
//! static KERNEL: Kernel<CortexM4> = Kernel::new(CortexM4::new());
//!
//! fn worker(kernel: &'static Kernel<CortexM4>, _arg: usize) {
//!     loop {
//!         kernel.sleep(100);
//!     }
//! }
//!
//! KERNEL.init(Priority::Normal)?;
//! let id = KERNEL.spawn(worker, 0, Priority::High)?;
//! KERNEL.join(id)?;
//! ```

#![cfg_attr(not(any(test, feature = "hosted")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod sync;
pub mod thread;

mod run_queue;
mod scheduler;
mod sleep_queue;
mod wait_queue;

pub use arch::Port;
pub use error::{KernelError, KernelResult};
pub use kernel::{Kernel, ThreadEntry};
pub use sync::{Mutex, ReentrantMutex, RwLock, Semaphore};
pub use thread::{Priority, ThreadId, ThreadState};

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use arch::cortex_m4::CortexM4;

#[cfg(any(test, feature = "hosted"))]
pub use arch::hosted::Hosted;
