//! Owner-tracked, re-entrant mutex.
//!
//! The owner may lock again without blocking; each lock needs a matching
//! unlock. On the final unlock ownership passes straight to the first
//! waiter, so a released lock is never up for grabs while threads queue on
//! it. Owners are counted in their TCB so they cannot be cancelled.

use core::cell::UnsafeCell;

use log::{trace, warn};

use crate::arch::Port;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::scheduler::Scheduler;
use crate::thread::ThreadId;
use crate::wait_queue::WaitQueue;

pub struct ReentrantMutex<P: Port> {
    kernel: &'static Kernel<P>,
    state: UnsafeCell<Ownership>,
    waiters: UnsafeCell<WaitQueue>,
}

struct Ownership {
    owner: Option<ThreadId>,
    count: u32,
}

// SAFETY: interior state is only touched inside the kernel's critical section
unsafe impl<P: Port> Sync for ReentrantMutex<P> {}

impl<P: Port> ReentrantMutex<P> {
    pub const fn new(kernel: &'static Kernel<P>) -> Self {
        Self {
            kernel,
            state: UnsafeCell::new(Ownership { owner: None, count: 0 }),
            waiters: UnsafeCell::new(WaitQueue::new()),
        }
    }

    /// Acquire the lock, or deepen the caller's hold on it.
    pub fn lock(&self) {
        let mut queued = false;
        self.kernel.block_until(|s| {
            let me = s.current_id();
            // SAFETY: inside the kernel's critical section
            let state = unsafe { &mut *self.state.get() };
            let owner = state.owner;
            match owner {
                None => {
                    self.grant(s, state, me);
                    Some(())
                }
                // Handed over by the previous owner's unlock
                Some(owner) if owner == me && queued => Some(()),
                Some(owner) if owner == me => {
                    state.count += 1;
                    Some(())
                }
                Some(_) => {
                    // SAFETY: as above
                    s.park_current(unsafe { &mut *self.waiters.get() });
                    queued = true;
                    None
                }
            }
        })
    }

    /// Acquire or deepen without blocking.
    pub fn try_lock(&self) -> bool {
        self.kernel.with_scheduler(|s| {
            let me = s.current_id();
            // SAFETY: inside the kernel's critical section
            let state = unsafe { &mut *self.state.get() };
            let owner = state.owner;
            match owner {
                None => {
                    self.grant(s, state, me);
                    true
                }
                Some(owner) if owner == me => {
                    state.count += 1;
                    true
                }
                Some(_) => false,
            }
        })
    }

    /// Drop one level of the caller's hold. The last one releases the lock.
    pub fn unlock(&self) -> KernelResult<()> {
        self.kernel.with_scheduler(|s| {
            let me = s.current_id();
            // SAFETY: inside the kernel's critical section
            let (state, waiters) = unsafe { (&mut *self.state.get(), &mut *self.waiters.get()) };
            if state.owner != Some(me) {
                warn!("unlock of a mutex owned by {:?} attempted by {}", state.owner, me);
                return Err(KernelError::NotOwner);
            }

            state.count -= 1;
            if state.count > 0 {
                return Ok(());
            }

            let tcb = &mut s.pool[me.slot()];
            tcb.locks_held = tcb.locks_held.saturating_sub(1);
            state.owner = None;
            if let Some(next) = s.wake_one(waiters) {
                let heir = s.pool.id_of(next);
                trace!("mutex handed from {} to {}", me, heir);
                self.grant(s, state, heir);
            }
            Ok(())
        })
    }

    /// Current owner, if the lock is held.
    pub fn owner(&self) -> Option<ThreadId> {
        // SAFETY: inside the kernel's critical section
        self.kernel.with_scheduler(|_| unsafe { (*self.state.get()).owner })
    }

    fn grant(&self, s: &mut Scheduler<P>, state: &mut Ownership, to: ThreadId) {
        state.owner = Some(to);
        state.count = 1;
        let tcb = &mut s.pool[to.slot()];
        tcb.locks_held = tcb.locks_held.saturating_add(1);
    }
}

impl<P: Port> Drop for ReentrantMutex<P> {
    fn drop(&mut self) {
        debug_assert!(self.waiters.get_mut().is_empty(), "mutex dropped with blocked threads");
    }
}
