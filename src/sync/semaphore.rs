//! Counting semaphore.
//!
//! The count is guarded by an internal [`Mutex`]. `up` wakes exactly one
//! blocked thread, which then competes for the count like any other caller;
//! `down` never drives the count below zero.

use core::cell::UnsafeCell;

use log::trace;

use super::Mutex;
use crate::arch::Port;
use crate::kernel::Kernel;
use crate::scheduler::Switch;
use crate::wait_queue::WaitQueue;

pub struct Semaphore<P: Port> {
    kernel: &'static Kernel<P>,
    count: UnsafeCell<i32>,
    lock: Mutex<P>,
    waiters: UnsafeCell<WaitQueue>,
}

// SAFETY: `count` and `waiters` are only touched while holding `lock` inside
// the kernel's critical section
unsafe impl<P: Port> Sync for Semaphore<P> {}

impl<P: Port> Semaphore<P> {
    pub const fn new(kernel: &'static Kernel<P>, initial: i32) -> Self {
        Self {
            kernel,
            count: UnsafeCell::new(initial),
            lock: Mutex::new(kernel),
            waiters: UnsafeCell::new(WaitQueue::new()),
        }
    }

    /// Take one unit, blocking while the count is zero.
    pub fn down(&self) {
        loop {
            self.lock.lock();
            // Queue, release the guard lock and switch in one critical
            // section so an `up` in between cannot be missed
            let acquired = self.kernel.with_switch(|s| {
                // SAFETY: inside the kernel's critical section, holding `lock`
                let (count, waiters) = unsafe { (&mut *self.count.get(), &mut *self.waiters.get()) };
                let acquired = if *count > 0 {
                    *count -= 1;
                    true
                } else {
                    s.park_current(waiters);
                    false
                };
                // We hold `lock`, so this cannot fail
                let _ = self.lock.release(s);
                let switch = if acquired { Switch::Stay } else { s.reschedule() };
                (acquired, switch)
            });
            if acquired {
                return;
            }
        }
    }

    /// Take one unit if available.
    pub fn try_down(&self) -> bool {
        self.lock.lock();
        self.kernel.with_scheduler(|s| {
            // SAFETY: inside the kernel's critical section, holding `lock`
            let count = unsafe { &mut *self.count.get() };
            let acquired = *count > 0;
            if acquired {
                *count -= 1;
            }
            let _ = self.lock.release(s);
            acquired
        })
    }

    /// Return one unit and wake one blocked thread.
    pub fn up(&self) {
        self.lock.lock();
        self.kernel.with_scheduler(|s| {
            // SAFETY: inside the kernel's critical section, holding `lock`
            let (count, waiters) = unsafe { (&mut *self.count.get(), &mut *self.waiters.get()) };
            *count += 1;
            if let Some(slot) = s.wake_one(waiters) {
                trace!("semaphore up released {}", slot);
            }
            let _ = self.lock.release(s);
        })
    }

    pub fn count(&self) -> i32 {
        // SAFETY: inside the kernel's critical section
        self.kernel.with_scheduler(|_| unsafe { *self.count.get() })
    }
}

impl<P: Port> Drop for Semaphore<P> {
    fn drop(&mut self) {
        debug_assert!(self.waiters.get_mut().is_empty(), "semaphore dropped with blocked threads");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::hosted::{share, shared, Hosted, Log};
    use crate::error::KernelError;
    use crate::thread::{Priority, ThreadState};

    type K = &'static Kernel<Hosted>;

    struct Fixture {
        sem: Semaphore<Hosted>,
        log: Log,
    }

    fn consumer(k: K, arg: usize) {
        let f = shared::<Fixture>(arg);
        f.sem.down();
        f.log.push(k.current().map_or(0, |id| id.index()));
    }

    #[test]
    fn test_up_wakes_exactly_one() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        let f = share(Fixture {
            sem: Semaphore::new(k, 0),
            log: Log::new(),
        });
        let a = k.spawn(consumer, f.arg(), Priority::High).unwrap();
        let b = k.spawn(consumer, f.arg(), Priority::High).unwrap();
        assert_eq!(k.state(a), ThreadState::Waiting);
        assert_eq!(k.state(b), ThreadState::Waiting);

        f.sem.up();
        assert_eq!(k.state(a), ThreadState::Runnable);
        assert_eq!(k.state(b), ThreadState::Waiting);
        k.join(a).unwrap();
        assert_eq!(f.log.take(), [a.index()]);
        assert_eq!(f.sem.count(), 0);
        assert_eq!(k.state(b), ThreadState::Waiting);

        f.sem.up();
        k.join(b).unwrap();
        assert_eq!(f.log.take(), [b.index()]);
    }

    #[test]
    fn test_initial_count_and_try_down() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        let sem = Semaphore::new(k, 2);
        sem.down();
        assert!(sem.try_down());
        assert!(!sem.try_down());
        assert_eq!(sem.count(), 0);
        sem.up();
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn test_released_waiter_cannot_be_cancelled() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        let f = share(Fixture {
            sem: Semaphore::new(k, 0),
            log: Log::new(),
        });
        let a = k.spawn(consumer, f.arg(), Priority::High).unwrap();
        let b = k.spawn(consumer, f.arg(), Priority::High).unwrap();
        assert_eq!(k.cancel(a), Err(KernelError::Blocked));

        // A holds the wakeup for the unit; dropping it would strand B
        f.sem.up();
        assert_eq!(k.state(a), ThreadState::Runnable);
        assert_eq!(k.cancel(a), Err(KernelError::Blocked));

        k.join(a).unwrap();
        f.sem.up();
        k.join(b).unwrap();
        assert_eq!(f.log.take(), [a.index(), b.index()]);
        assert_eq!(f.sem.count(), 0);
    }
}
