//! # Hosted Port
//!
//! Runs kernel threads on the host for testing. Each kernel thread is backed
//! by its own OS thread, and exactly one of them holds the "CPU" at a time:
//! a switch hands a baton to the incoming thread and blocks the outgoing one
//! on its own baton. Scheduling decisions are untouched; only the
//! register-level switch is simulated.
//!
//! There is no timer interrupt. Tests drive [`Kernel::tick`] explicitly, and
//! the idle thread delivers a tick each time it runs so sleepers eventually
//! wake when nothing else is ready.

use std::boxed::Box;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;
use std::vec::Vec;

use super::{Port, StartFn};
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::thread::Priority;

/// OS stack reserved for each simulated thread.
const HOST_STACK_SIZE: usize = 256 * 1024;

/// How long the root thread waits for the CPU before declaring a stall.
const ROOT_WATCHDOG: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Baton
// ---------------------------------------------------------------------------

/// Permission to run, passed from one simulated thread to the next.
struct Baton {
    ready: Mutex<bool>,
    signal: Condvar,
    watchdog: Option<Duration>,
}

impl Baton {
    fn new(watchdog: Option<Duration>) -> Self {
        Self {
            ready: Mutex::new(false),
            signal: Condvar::new(),
            watchdog,
        }
    }

    fn pass(&self) {
        let mut ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        *ready = true;
        self.signal.notify_one();
    }

    /// Block until the baton is passed to this thread.
    fn take(&self) {
        let mut ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        while !*ready {
            ready = match self.watchdog {
                Some(limit) => {
                    let (guard, timeout) = self
                        .signal
                        .wait_timeout(ready, limit)
                        .unwrap_or_else(PoisonError::into_inner);
                    if timeout.timed_out() && !*guard {
                        panic!("hosted kernel stalled: no thread handed the CPU back");
                    }
                    guard
                }
                None => self.signal.wait(ready).unwrap_or_else(PoisonError::into_inner),
            };
        }
        *ready = false;
    }
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Saved context of a simulated thread: the index of its baton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostedContext(usize);

/// Port backed by OS threads.
///
/// Resources are never returned: the OS thread behind an exited or
/// cancelled kernel thread stays parked for the life of the process, and
/// every created context keeps its baton. Suited to tests and short-lived
/// simulations, not to long-running programs that churn through threads.
pub struct Hosted {
    masked: AtomicBool,
    batons: Mutex<Vec<Arc<Baton>>>,
}

impl Hosted {
    pub const fn new() -> Self {
        Self {
            masked: AtomicBool::new(false),
            batons: Mutex::new(Vec::new()),
        }
    }

    /// Whether the simulated interrupt mask is set.
    pub fn is_masked(&self) -> bool {
        self.masked.load(Ordering::SeqCst)
    }

    fn register(&self, watchdog: Option<Duration>) -> (HostedContext, Arc<Baton>) {
        let baton = Arc::new(Baton::new(watchdog));
        let mut batons = self.batons.lock().unwrap_or_else(PoisonError::into_inner);
        batons.push(baton.clone());
        (HostedContext(batons.len() - 1), baton)
    }

    fn baton(&self, context: HostedContext) -> Arc<Baton> {
        let batons = self.batons.lock().unwrap_or_else(PoisonError::into_inner);
        batons[context.0].clone()
    }
}

impl Default for Hosted {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for Hosted {
    type Context = HostedContext;

    const EMPTY_CONTEXT: HostedContext = HostedContext(usize::MAX);

    /// Same frame budget as the Cortex-M4 port, so size checks behave alike.
    const MIN_STACK_SIZE: usize = 72;

    unsafe fn init(&self) {}

    fn root_context(&self) -> HostedContext {
        self.register(Some(ROOT_WATCHDOG)).0
    }

    unsafe fn init_context(
        &self,
        _stack: *mut u8,
        _size: usize,
        start: StartFn,
        arg: usize,
    ) -> KernelResult<HostedContext> {
        let (context, baton) = self.register(None);
        std::thread::Builder::new()
            .name(std::format!("kthread-{}", context.0))
            .stack_size(HOST_STACK_SIZE)
            .spawn(move || {
                baton.take();
                start(arg)
            })
            .map_err(|_| KernelError::ContextUnavailable)?;
        Ok(context)
    }

    unsafe fn switch(&self, from: *mut HostedContext, to: *const HostedContext) {
        // SAFETY: the kernel passes pointers to live TCB contexts
        let (from, to) = unsafe { (self.baton(*from), self.baton(*to)) };
        to.pass();
        from.take();
    }

    unsafe fn switch_without_save(&self, to: *const HostedContext) {
        // SAFETY: as for `switch`
        unsafe { self.baton(*to) }.pass();
        loop {
            std::thread::park();
        }
    }

    fn mask_interrupts(&self) -> bool {
        self.masked.swap(true, Ordering::SeqCst)
    }

    unsafe fn restore_interrupts(&self, was_masked: bool) {
        self.masked.store(was_masked, Ordering::SeqCst);
    }

    unsafe fn thread_started(&self) {
        self.masked.store(false, Ordering::SeqCst);
    }

    fn wait_for_interrupt(&self) -> bool {
        std::thread::yield_now();
        true
    }
}

impl Kernel<Hosted> {
    /// Allocate a kernel for the rest of the process and make the caller its
    /// root thread.
    pub fn boot(root_priority: Priority) -> KernelResult<&'static Kernel<Hosted>> {
        let kernel: &'static Kernel<Hosted> = Box::leak(Box::new(Kernel::new(Hosted::new())));
        kernel.init(root_priority)?;
        Ok(kernel)
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// A value leaked for the rest of the process so its address can travel as a
/// thread argument.
#[cfg(test)]
#[repr(transparent)]
pub(crate) struct Shared<T>(T);

#[cfg(test)]
impl<T> Shared<T> {
    /// The value's address, for use as a thread argument.
    pub(crate) fn arg(&'static self) -> usize {
        self as *const Self as usize
    }
}

#[cfg(test)]
impl<T> core::ops::Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

#[cfg(test)]
pub(crate) fn share<T: Sync + 'static>(value: T) -> &'static Shared<T> {
    Box::leak(Box::new(Shared(value)))
}

/// Recover a value passed with [`Shared::arg`]. Unchecked: `arg` must come
/// from `share::<T>`.
#[cfg(test)]
pub(crate) fn shared<T: Sync + 'static>(arg: usize) -> &'static T {
    // SAFETY: `Shared<T>` is transparent over `T` and leaked for 'static
    unsafe { &*(arg as *const T) }
}

/// Append-only record of events, cloneable across threads.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct Log(Arc<Mutex<Vec<usize>>>);

#[cfg(test)]
impl Log {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, value: usize) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);
    }

    /// Drain everything recorded so far.
    pub(crate) fn take(&self) -> Vec<usize> {
        core::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
