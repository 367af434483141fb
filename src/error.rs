//! Error type shared by every kernel operation.

use core::fmt;

use crate::thread::ThreadState;

/// Result alias used across the crate.
pub type KernelResult<T> = Result<T, KernelError>;

/// Everything a kernel call can refuse to do.
///
/// Two families: resource exhaustion (see [`KernelError::is_exhaustion`]),
/// which callers may recover from by degrading, and misuse, which signals a
/// programming error. Nothing is retried by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KernelError {
    /// `Kernel::init` has not run yet.
    NotInitialized,
    /// `Kernel::init` was called a second time.
    AlreadyInitialized,
    /// The supplied stack cannot hold the initial saved context.
    StackTooSmall {
        /// Bytes supplied.
        size: usize,
        /// Bytes required by the port.
        min: usize,
    },
    /// Every TCB slot is in use.
    PoolExhausted,
    /// Every pooled stack is in use.
    StackPoolExhausted,
    /// The port could not prepare an execution context.
    ContextUnavailable,
    /// `Priority::Idle` is reserved for the idle thread.
    InvalidPriority,
    /// A quantum of zero ticks.
    InvalidQuantum,
    /// The handle refers to a terminated or never-created thread.
    InvalidThread,
    /// The thread is in a state the operation does not accept.
    InvalidState(ThreadState),
    /// A thread tried to cancel itself; use `exit` instead.
    CancelSelf,
    /// The root thread cannot be cancelled.
    RootThread,
    /// A thread tried to join itself.
    JoinSelf,
    /// The caller does not own the mutex it tried to release.
    NotOwner,
    /// Release of a lock that is not held.
    NotLocked,
    /// The thread owns a mutex and cannot be cancelled safely.
    HoldsLock,
    /// The thread is inside a blocking primitive call: queued on it, or
    /// released by it and not yet back. It cannot be cancelled until the
    /// call returns.
    Blocked,
}

impl KernelError {
    /// Whether the error reports a depleted resource rather than misuse.
    pub const fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            KernelError::StackTooSmall { .. }
                | KernelError::PoolExhausted
                | KernelError::StackPoolExhausted
                | KernelError::ContextUnavailable
        )
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::NotInitialized => write!(f, "kernel is not initialized"),
            KernelError::AlreadyInitialized => write!(f, "kernel is already initialized"),
            KernelError::StackTooSmall { size, min } => {
                write!(f, "stack of {} bytes is smaller than the {} byte minimum", size, min)
            }
            KernelError::PoolExhausted => write!(f, "thread pool exhausted"),
            KernelError::StackPoolExhausted => write!(f, "stack pool exhausted"),
            KernelError::ContextUnavailable => write!(f, "port could not prepare a thread context"),
            KernelError::InvalidPriority => write!(f, "idle priority is reserved"),
            KernelError::InvalidQuantum => write!(f, "quantum must be at least one tick"),
            KernelError::InvalidThread => write!(f, "thread handle is not valid"),
            KernelError::InvalidState(state) => write!(f, "operation not allowed in state {:?}", state),
            KernelError::CancelSelf => write!(f, "a thread cannot cancel itself"),
            KernelError::RootThread => write!(f, "the root thread cannot be cancelled"),
            KernelError::JoinSelf => write!(f, "a thread cannot join itself"),
            KernelError::NotOwner => write!(f, "caller does not own the mutex"),
            KernelError::NotLocked => write!(f, "lock is not held"),
            KernelError::HoldsLock => write!(f, "thread owns a mutex"),
            KernelError::Blocked => write!(f, "thread is blocked in a synchronization primitive"),
        }
    }
}
