//! Basic mutual-exclusion lock: a flag and a FIFO of blocked threads.
//!
//! The lock has no owner. Releasing it wakes every waiter; they race for it
//! again when they next run, in priority order.

use core::cell::UnsafeCell;

use log::warn;

use crate::arch::Port;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::scheduler::Scheduler;
use crate::wait_queue::WaitQueue;

pub struct Mutex<P: Port> {
    kernel: &'static Kernel<P>,
    locked: UnsafeCell<bool>,
    waiters: UnsafeCell<WaitQueue>,
}

// SAFETY: interior state is only touched inside the kernel's critical section
unsafe impl<P: Port> Sync for Mutex<P> {}

impl<P: Port> Mutex<P> {
    pub const fn new(kernel: &'static Kernel<P>) -> Self {
        Self {
            kernel,
            locked: UnsafeCell::new(false),
            waiters: UnsafeCell::new(WaitQueue::new()),
        }
    }

    /// Acquire the lock, blocking while another thread holds it.
    pub fn lock(&self) {
        self.kernel.block_until(|s| {
            // SAFETY: inside the kernel's critical section
            let (locked, waiters) = unsafe { (&mut *self.locked.get(), &mut *self.waiters.get()) };
            if *locked {
                s.park_current(waiters);
                None
            } else {
                *locked = true;
                Some(())
            }
        })
    }

    /// Acquire the lock if it is free.
    pub fn try_lock(&self) -> bool {
        self.kernel.with_scheduler(|_| {
            // SAFETY: inside the kernel's critical section
            let locked = unsafe { &mut *self.locked.get() };
            !core::mem::replace(locked, true)
        })
    }

    /// Release the lock and wake every waiter.
    pub fn unlock(&self) -> KernelResult<()> {
        self.kernel.with_scheduler(|s| self.release(s))
    }

    /// Release from inside a critical section that already holds the
    /// scheduler.
    pub(crate) fn release(&self, s: &mut Scheduler<P>) -> KernelResult<()> {
        // SAFETY: the caller holds the kernel's critical section
        let (locked, waiters) = unsafe { (&mut *self.locked.get(), &mut *self.waiters.get()) };
        if !*locked {
            warn!("unlock of a mutex that is not locked");
            return Err(KernelError::NotLocked);
        }
        *locked = false;
        s.wake_all(waiters);
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        // SAFETY: inside the kernel's critical section
        self.kernel.with_scheduler(|_| unsafe { *self.locked.get() })
    }
}

impl<P: Port> Drop for Mutex<P> {
    fn drop(&mut self) {
        debug_assert!(self.waiters.get_mut().is_empty(), "mutex dropped with blocked threads");
    }
}
