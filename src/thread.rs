//! # Thread Control Block
//!
//! Defines the thread model: handles, the per-thread state machine,
//! priorities, and the fixed-capacity TCB pool.
//!
//! TCBs live in an arena indexed by small integers. Queues link TCBs by
//! index, and a [`ThreadId`] carries the slot's generation so a handle to a
//! reclaimed slot can never reach the thread that reuses it.

use core::fmt;
use core::ops::{Index, IndexMut};

use crate::arch::Port;
use crate::config::{DEFAULT_QUANTUM, MAX_THREADS};
use crate::kernel::ThreadEntry;

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Handle to a thread.
///
/// Stays valid as a value after the thread terminates; operations on a
/// terminated thread report it as [`ThreadState::Invalid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ThreadId {
    index: u8,
    generation: u16,
}

impl ThreadId {
    pub(crate) const fn new(index: u8, generation: u16) -> Self {
        Self { index, generation }
    }

    /// Slot index in the TCB pool.
    #[inline]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    pub(crate) const fn slot(self) -> u8 {
        self.index
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

// ---------------------------------------------------------------------------
// Thread state machine
// ---------------------------------------------------------------------------

/// Execution state of a thread.
///
/// ```text
///              create()
///   Invalid ─────────────► Runnable ◄──────────────┐
///      ▲                    │  │ pause / sleep /    │ resume / timer /
///      │ exit / reclaim     │  │ join / block       │ join target ends /
///      │                    │  ▼                    │ release
///      │                    │  Paused | Sleeping | Joined | Waiting
///      │        cancel()    ▼        │
///      └──────────────── Cancelled ◄─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThreadState {
    /// Slot is free: never created, or terminated and reclaimed.
    Invalid,
    /// Ready to run, or running.
    Runnable,
    /// Suspended by `pause` until `resume`.
    Paused,
    /// Waiting on the sleep queue.
    Sleeping,
    /// Waiting for another thread to terminate.
    Joined,
    /// Marked for teardown; reclaimed the next time it would be dispatched.
    Cancelled,
    /// Blocked on a synchronization primitive.
    Waiting,
}

// ---------------------------------------------------------------------------
// Priorities
// ---------------------------------------------------------------------------

/// Scheduling priority. Higher variants win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Priority {
    /// Reserved for the idle thread.
    Idle = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

// ---------------------------------------------------------------------------
// Stack region
// ---------------------------------------------------------------------------

/// Memory a thread runs on.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StackRegion {
    pub(crate) base: *mut u8,
    pub(crate) size: usize,
    /// Index into the kernel's stack pool, for library-owned stacks.
    pub(crate) pooled: Option<u8>,
}

impl StackRegion {
    pub(crate) const NONE: Self = Self {
        base: core::ptr::null_mut(),
        size: 0,
        pooled: None,
    };
}

// ---------------------------------------------------------------------------
// Thread Control Block
// ---------------------------------------------------------------------------

/// Thread Control Block (TCB): everything the scheduler knows about one
/// thread. Queue links are slot indices into the owning [`TcbPool`].
pub(crate) struct Tcb<P: Port> {
    pub(crate) state: ThreadState,
    pub(crate) priority: Priority,
    pub(crate) generation: u16,

    pub(crate) stack: StackRegion,
    /// Saved context. Valid only while the thread is not active.
    pub(crate) context: P::Context,

    pub(crate) entry: Option<ThreadEntry<P>>,
    pub(crate) arg: usize,

    /// Remaining ticks in the current time slice.
    pub(crate) ticks_remaining: u8,
    /// Reset value for `ticks_remaining`.
    pub(crate) quantum: u8,
    /// Delta to the previous sleep-queue node.
    pub(crate) sleep_ticks: u32,

    pub(crate) run_prev: Option<u8>,
    pub(crate) run_next: Option<u8>,
    pub(crate) sleep_next: Option<u8>,
    pub(crate) wait_next: Option<u8>,

    /// First thread waiting for this one to terminate.
    pub(crate) join_head: Option<u8>,
    /// Next joiner of the same target.
    pub(crate) join_next: Option<u8>,
    /// Thread this one is joined to.
    pub(crate) join_target: Option<u8>,

    /// Owner-tracked mutexes currently held.
    pub(crate) locks_held: u8,
    /// Parked on a primitive, or released by one and not yet dispatched.
    pub(crate) in_primitive: bool,
}

impl<P: Port> Clone for Tcb<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: Port> Copy for Tcb<P> {}

impl<P: Port> Tcb<P> {
    /// An unallocated slot.
    pub(crate) const EMPTY: Self = Self {
        state: ThreadState::Invalid,
        priority: Priority::Idle,
        generation: 0,
        stack: StackRegion::NONE,
        context: P::EMPTY_CONTEXT,
        entry: None,
        arg: 0,
        ticks_remaining: 0,
        quantum: DEFAULT_QUANTUM,
        sleep_ticks: 0,
        run_prev: None,
        run_next: None,
        sleep_next: None,
        wait_next: None,
        join_head: None,
        join_next: None,
        join_target: None,
        locks_held: 0,
        in_primitive: false,
    };

    /// Fill a free slot for a new thread. The generation survives.
    pub(crate) fn init(
        &mut self,
        priority: Priority,
        stack: StackRegion,
        context: P::Context,
        entry: Option<ThreadEntry<P>>,
        arg: usize,
    ) {
        let generation = self.generation;
        *self = Self::EMPTY;
        self.generation = generation;
        self.state = ThreadState::Runnable;
        self.priority = priority;
        self.stack = stack;
        self.context = context;
        self.entry = entry;
        self.arg = arg;
        self.ticks_remaining = self.quantum;
    }

    /// Start a fresh time slice.
    #[inline]
    pub(crate) fn reset_quantum(&mut self) {
        self.ticks_remaining = self.quantum;
    }
}

// ---------------------------------------------------------------------------
// TCB pool
// ---------------------------------------------------------------------------

/// Fixed-capacity arena of TCBs.
pub(crate) struct TcbPool<P: Port> {
    slots: [Tcb<P>; MAX_THREADS],
}

impl<P: Port> TcbPool<P> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [Tcb::EMPTY; MAX_THREADS],
        }
    }

    /// First free slot, if any.
    pub(crate) fn find_free(&self) -> Option<u8> {
        self.slots
            .iter()
            .position(|tcb| tcb.state == ThreadState::Invalid)
            .map(|i| i as u8)
    }

    /// Map a handle to its slot while the thread it names is alive.
    pub(crate) fn resolve(&self, id: ThreadId) -> Option<u8> {
        let tcb = self.slots.get(id.index())?;
        if tcb.generation == id.generation && tcb.state != ThreadState::Invalid {
            Some(id.slot())
        } else {
            None
        }
    }

    /// Handle for the thread currently in `slot`.
    pub(crate) fn id_of(&self, slot: u8) -> ThreadId {
        ThreadId::new(slot, self[slot].generation)
    }

    /// Free a slot. Outstanding handles to it become stale.
    pub(crate) fn release(&mut self, slot: u8) {
        let tcb = &mut self[slot];
        let generation = tcb.generation.wrapping_add(1);
        *tcb = Tcb::EMPTY;
        tcb.generation = generation;
    }

    /// Raw pointers to two contexts, for handing to the port.
    pub(crate) fn context_ptrs(&mut self, from: u8, to: u8) -> (*mut P::Context, *const P::Context) {
        let base = self.slots.as_mut_ptr();
        // SAFETY: both indices are in bounds (slot indices always are)
        unsafe {
            (
                core::ptr::addr_of_mut!((*base.add(from as usize)).context),
                core::ptr::addr_of!((*base.add(to as usize)).context),
            )
        }
    }

    pub(crate) fn context_ptr(&self, slot: u8) -> *const P::Context {
        core::ptr::addr_of!(self[slot].context)
    }

    #[cfg(test)]
    pub(crate) fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|tcb| tcb.state != ThreadState::Invalid)
            .count()
    }
}

impl<P: Port> Index<u8> for TcbPool<P> {
    type Output = Tcb<P>;

    #[inline]
    fn index(&self, slot: u8) -> &Tcb<P> {
        &self.slots[slot as usize]
    }
}

impl<P: Port> IndexMut<u8> for TcbPool<P> {
    #[inline]
    fn index_mut(&mut self, slot: u8) -> &mut Tcb<P> {
        &mut self.slots[slot as usize]
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::hosted::Hosted;

    #[test]
    fn test_tcb_initialization() {
        let mut tcb = Tcb::<Hosted>::EMPTY;
        assert_eq!(tcb.state, ThreadState::Invalid);

        tcb.init(Priority::High, StackRegion::NONE, Hosted::EMPTY_CONTEXT, None, 7);

        assert_eq!(tcb.state, ThreadState::Runnable);
        assert_eq!(tcb.priority, Priority::High);
        assert_eq!(tcb.arg, 7);
        assert_eq!(tcb.ticks_remaining, DEFAULT_QUANTUM);
        assert!(tcb.run_next.is_none() && tcb.join_head.is_none());
    }

    #[test]
    fn test_quantum_reset() {
        let mut tcb = Tcb::<Hosted>::EMPTY;
        tcb.init(Priority::Low, StackRegion::NONE, Hosted::EMPTY_CONTEXT, None, 0);
        tcb.quantum = 3;
        tcb.ticks_remaining = 0;
        tcb.reset_quantum();
        assert_eq!(tcb.ticks_remaining, 3);
    }

    #[test]
    fn test_release_invalidates_handles() {
        let mut pool = TcbPool::<Hosted>::new();
        let slot = pool.find_free().unwrap();
        pool[slot].init(Priority::Normal, StackRegion::NONE, Hosted::EMPTY_CONTEXT, None, 0);
        let id = pool.id_of(slot);
        assert_eq!(pool.resolve(id), Some(slot));

        pool.release(slot);
        assert_eq!(pool.resolve(id), None);

        // Reusing the slot yields a different handle
        pool[slot].init(Priority::Normal, StackRegion::NONE, Hosted::EMPTY_CONTEXT, None, 0);
        let reused = pool.id_of(slot);
        assert_eq!(reused.index(), id.index());
        assert_ne!(reused, id);
        assert_eq!(pool.resolve(id), None);
    }

    #[test]
    fn test_find_free_exhaustion() {
        let mut pool = TcbPool::<Hosted>::new();
        for _ in 0..MAX_THREADS {
            let slot = pool.find_free().unwrap();
            pool[slot].init(Priority::Low, StackRegion::NONE, Hosted::EMPTY_CONTEXT, None, 0);
        }
        assert_eq!(pool.find_free(), None);
        assert_eq!(pool.live_count(), MAX_THREADS);
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert!(Priority::Low > Priority::Idle);
    }
}
