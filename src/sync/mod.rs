//! # Synchronization Primitives
//!
//! Interrupt masking and the blocking primitives built on the scheduler.
//!
//! Every primitive follows the same pattern: test and update its state inside
//! a critical section; on failure park the caller on the primitive's
//! [`WaitQueue`](crate::wait_queue::WaitQueue), switch away while still
//! masked, and test again once woken. Wakeups never preempt the waker; a
//! woken higher-priority thread takes over at the next tick or yield.

mod mutex;
mod reentrant;
mod rwlock;
mod semaphore;

pub use mutex::Mutex;
pub use reentrant::ReentrantMutex;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;

use core::marker::PhantomData;

use crate::arch::Port;

// ---------------------------------------------------------------------------
// Critical sections
// ---------------------------------------------------------------------------

/// Token proving that interrupts are masked. Restores the previous mask
/// state when dropped, on every exit path.
pub struct CriticalSection<'a, P: Port> {
    port: &'a P,
    was_masked: bool,
    // Mask state belongs to the execution context that took it
    _not_send: PhantomData<*const ()>,
}

impl<'a, P: Port> CriticalSection<'a, P> {
    /// Mask interrupts until the returned guard is dropped. Nests.
    #[inline]
    pub fn enter(port: &'a P) -> Self {
        let was_masked = port.mask_interrupts();
        Self {
            port,
            was_masked,
            _not_send: PhantomData,
        }
    }
}

impl<P: Port> Drop for CriticalSection<'_, P> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: pairs with the mask taken in `enter` on this context
        unsafe { self.port.restore_interrupts(self.was_masked) }
    }
}

/// Execute a closure with interrupts masked.
///
/// # Example
/// ```ignore
/// sync::critical_section(kernel.port(), |_cs| {
///     // Access shared state safely
/// });
/// ```
#[inline]
pub fn critical_section<P: Port, F, R>(port: &P, f: F) -> R
where
    F: FnOnce(&CriticalSection<'_, P>) -> R,
{
    let cs = CriticalSection::enter(port);
    f(&cs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::hosted::Hosted;

    #[test]
    fn test_guard_nests_and_restores() {
        let port = Hosted::new();
        assert!(!port.is_masked());
        {
            let _outer = CriticalSection::enter(&port);
            assert!(port.is_masked());
            critical_section(&port, |_cs| assert!(port.is_masked()));
            assert!(port.is_masked());
        }
        assert!(!port.is_masked());
    }

    #[test]
    fn test_guard_restores_on_unwind() {
        let port = Hosted::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            critical_section(&port, |_cs| panic!("inside"));
        }));
        assert!(result.is_err());
        assert!(!port.is_masked());
    }
}
