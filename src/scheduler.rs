//! # Scheduler
//!
//! Architecture-neutral scheduling state machine. Every operation here
//! mutates TCBs and queues and returns a [`Switch`] decision; the kernel
//! carries the decision out through the port while still inside the
//! critical section that produced it.
//!
//! ## Dispatch
//!
//! 1. **Requeue**: a Runnable outgoing thread goes behind its equals
//! 2. **Select**: pop the run-queue head, reclaiming Cancelled threads met on
//!    the way; fall back to the idle thread when nothing is ready
//! 3. **Switch**: same thread means a fresh time slice and no switch;
//!    otherwise switch with save, or without save when the outgoing thread
//!    has already been torn down
//!
//! ## Preemption
//!
//! [`Scheduler::tick`] is the only involuntary switch point: a sleeper that
//! wakes with higher priority takes over at once, and threads of equal
//! priority rotate when their quantum runs out. A higher-priority thread
//! that never blocks starves everything below it.

use log::{debug, trace, warn};

use crate::arch::Port;
use crate::config::POOLED_STACKS;
use crate::error::{KernelError, KernelResult};
use crate::kernel::ThreadEntry;
use crate::run_queue::RunQueue;
use crate::sleep_queue::SleepQueue;
use crate::thread::{Priority, StackRegion, TcbPool, ThreadId, ThreadState};
use crate::wait_queue::WaitQueue;

/// Slot of the thread that called `Kernel::init`.
const ROOT_SLOT: u8 = 0;
/// Slot of the idle thread.
const IDLE_SLOT: u8 = 1;

// ---------------------------------------------------------------------------
// Switch decisions
// ---------------------------------------------------------------------------

/// What the port has to do once the scheduler state is updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Switch {
    /// Keep running the active thread.
    Stay,
    /// Save `from` and resume `to`.
    Save { from: u8, to: u8 },
    /// Resume `to`; the outgoing thread's slot is already free.
    Discard { to: u8 },
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// All scheduling state: the TCB arena, both queues and the active slot.
/// Owned by the kernel and only touched inside a critical section.
pub(crate) struct Scheduler<P: Port> {
    pub(crate) pool: TcbPool<P>,
    run: RunQueue,
    sleep: SleepQueue,
    active: u8,
    initialized: bool,
    ticks: u64,
    /// Bit `i` set: pooled stack `i` belongs to a live thread.
    stacks_in_use: u32,
}

impl<P: Port> Scheduler<P> {
    pub(crate) const fn new() -> Self {
        Self {
            pool: TcbPool::new(),
            run: RunQueue::new(),
            sleep: SleepQueue::new(),
            active: ROOT_SLOT,
            initialized: false,
            ticks: 0,
            stacks_in_use: 0,
        }
    }

    #[inline]
    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Register the caller as the root thread and install the idle thread.
    pub(crate) fn init(
        &mut self,
        root_priority: Priority,
        root_context: P::Context,
        idle_stack: StackRegion,
        idle_context: P::Context,
        idle_entry: Option<ThreadEntry<P>>,
    ) -> ThreadId {
        self.pool[ROOT_SLOT].init(root_priority, StackRegion::NONE, root_context, None, 0);
        self.pool[IDLE_SLOT].init(Priority::Idle, idle_stack, idle_context, idle_entry, 0);
        self.active = ROOT_SLOT;
        self.initialized = true;

        let root = self.pool.id_of(ROOT_SLOT);
        debug!("scheduler up: root {} at {:?}", root, root_priority);
        root
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Check that a thread of `priority` could be admitted right now.
    pub(crate) fn check_admission(&self, priority: Priority) -> KernelResult<()> {
        if !self.initialized {
            return Err(KernelError::NotInitialized);
        }
        if priority == Priority::Idle {
            warn!("create rejected: idle priority is reserved");
            return Err(KernelError::InvalidPriority);
        }
        if self.pool.find_free().is_none() {
            return Err(KernelError::PoolExhausted);
        }
        Ok(())
    }

    /// Admit a new Runnable thread. `build` produces its initial context and
    /// runs only once admission has been checked. The returned decision
    /// preempts the creator when the new thread outranks it.
    pub(crate) fn create(
        &mut self,
        priority: Priority,
        stack: StackRegion,
        entry: ThreadEntry<P>,
        arg: usize,
        build: impl FnOnce(&StackRegion) -> KernelResult<P::Context>,
    ) -> KernelResult<(ThreadId, Switch)> {
        self.check_admission(priority)?;
        let slot = self.pool.find_free().ok_or(KernelError::PoolExhausted)?;
        let context = build(&stack)?;

        self.pool[slot].init(priority, stack, context, Some(entry), arg);
        self.run.push(&mut self.pool, slot);

        let id = self.pool.id_of(slot);
        debug!("created {} at {:?}", id, priority);

        let switch = if priority > self.pool[self.active].priority {
            self.reschedule()
        } else {
            Switch::Stay
        };
        Ok((id, switch))
    }

    /// Reserve one of the kernel's pooled stacks.
    pub(crate) fn alloc_stack(&mut self) -> Option<u8> {
        let free = !self.stacks_in_use;
        let index = free.trailing_zeros() as usize;
        if index >= POOLED_STACKS {
            return None;
        }
        self.stacks_in_use |= 1 << index;
        Some(index as u8)
    }

    pub(crate) fn free_stack(&mut self, index: u8) {
        self.stacks_in_use &= !(1 << index);
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Pick the next thread and decide how to get there.
    pub(crate) fn reschedule(&mut self) -> Switch {
        if !self.initialized {
            return Switch::Stay;
        }

        let current = self.active;
        if current != IDLE_SLOT && self.pool[current].state == ThreadState::Runnable {
            self.run.push(&mut self.pool, current);
        }

        let next = self.next_to_run();
        if next == current {
            self.pool[current].reset_quantum();
            return Switch::Stay;
        }

        self.active = next;
        self.pool[next].reset_quantum();
        // Back in its primitive's retry loop: counters it touched are settled
        self.pool[next].in_primitive = false;

        if self.pool[current].state == ThreadState::Invalid {
            trace!("switch {} (discard) -> {}", current, next);
            Switch::Discard { to: next }
        } else {
            self.pool[current].reset_quantum();
            trace!("switch {} -> {}", current, next);
            Switch::Save {
                from: current,
                to: next,
            }
        }
    }

    /// Pop the run queue until a live thread turns up.
    fn next_to_run(&mut self) -> u8 {
        while let Some(slot) = self.run.pop(&mut self.pool) {
            if self.pool[slot].state == ThreadState::Cancelled {
                debug!("reclaiming cancelled {}", self.pool.id_of(slot));
                self.retire(slot);
                continue;
            }
            return slot;
        }
        IDLE_SLOT
    }

    /// Periodic tick: wake due sleepers, then preempt or charge the quantum.
    pub(crate) fn tick(&mut self) -> Switch {
        self.ticks = self.ticks.wrapping_add(1);
        if !self.initialized {
            return Switch::Stay;
        }

        if self.sleep.advance(&mut self.pool) {
            while let Some(slot) = self.sleep.pop_expired(&mut self.pool) {
                trace!("woke {} at tick {}", slot, self.ticks);
                self.make_runnable(slot);
            }
        }

        let active_priority = self.pool[self.active].priority;
        if self
            .run
            .peek_priority(&self.pool)
            .map_or(false, |p| p > active_priority)
        {
            return self.reschedule();
        }

        let tcb = &mut self.pool[self.active];
        tcb.ticks_remaining = tcb.ticks_remaining.saturating_sub(1);
        if tcb.ticks_remaining == 0 {
            self.reschedule()
        } else {
            Switch::Stay
        }
    }

    /// Put the active thread to sleep for `ticks` ticks.
    pub(crate) fn sleep_current(&mut self, ticks: u32) -> Switch {
        if ticks == 0 || !self.initialized {
            return self.reschedule();
        }
        let slot = self.active;
        self.pool[slot].state = ThreadState::Sleeping;
        self.sleep.insert(&mut self.pool, slot, ticks);
        trace!("{} sleeps for {} ticks", slot, ticks);
        self.reschedule()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Resolve a handle to a live, user-visible thread.
    fn resolve(&self, id: ThreadId) -> KernelResult<u8> {
        match self.pool.resolve(id) {
            Some(slot) if slot != IDLE_SLOT => Ok(slot),
            _ => Err(KernelError::InvalidThread),
        }
    }

    pub(crate) fn pause(&mut self, id: ThreadId) -> KernelResult<Switch> {
        let slot = self.resolve(id)?;
        match self.pool[slot].state {
            ThreadState::Runnable if slot == self.active => {
                self.pool[slot].state = ThreadState::Paused;
                debug!("{} paused itself", id);
                return Ok(self.reschedule());
            }
            ThreadState::Runnable => self.run.remove(&mut self.pool, slot),
            ThreadState::Sleeping => {
                self.sleep.remove(&mut self.pool, slot);
            }
            ThreadState::Joined => self.unlink_joiner(slot),
            other => {
                warn!("pause of {} rejected in state {:?}", id, other);
                return Err(KernelError::InvalidState(other));
            }
        }
        self.pool[slot].state = ThreadState::Paused;
        debug!("{} paused", id);
        Ok(Switch::Stay)
    }

    pub(crate) fn resume(&mut self, id: ThreadId) -> KernelResult<Switch> {
        let slot = self.resolve(id)?;
        let state = self.pool[slot].state;
        if state != ThreadState::Paused {
            warn!("resume of {} rejected in state {:?}", id, state);
            return Err(KernelError::InvalidState(state));
        }
        self.make_runnable(slot);
        debug!("{} resumed", id);

        if self.pool[slot].priority > self.pool[self.active].priority {
            Ok(self.reschedule())
        } else {
            Ok(Switch::Stay)
        }
    }

    /// Mark a thread for teardown. Reclamation happens when the dispatcher
    /// next reaches it.
    pub(crate) fn cancel(&mut self, id: ThreadId) -> KernelResult<()> {
        let slot = self.resolve(id)?;
        if slot == self.active {
            return Err(KernelError::CancelSelf);
        }
        if slot == ROOT_SLOT {
            return Err(KernelError::RootThread);
        }

        let (state, locks_held) = (self.pool[slot].state, self.pool[slot].locks_held);
        match state {
            ThreadState::Cancelled => return Err(KernelError::InvalidState(ThreadState::Cancelled)),
            _ if locks_held > 0 => {
                warn!("cancel of {} rejected: owns {} mutex(es)", id, locks_held);
                return Err(KernelError::HoldsLock);
            }
            // Queued on a primitive, or released by one but not yet run
            _ if self.pool[slot].in_primitive => {
                warn!("cancel of {} rejected: inside a blocking primitive", id);
                return Err(KernelError::Blocked);
            }
            ThreadState::Sleeping => {
                self.sleep.remove(&mut self.pool, slot);
                self.run.push(&mut self.pool, slot);
            }
            ThreadState::Paused => self.run.push(&mut self.pool, slot),
            ThreadState::Joined => {
                self.unlink_joiner(slot);
                self.run.push(&mut self.pool, slot);
            }
            // Runnable: already queued
            _ => {}
        }

        self.pool[slot].state = ThreadState::Cancelled;
        self.wake_joiners(slot);
        debug!("{} cancelled", id);
        Ok(())
    }

    /// Tear down the active thread. The returned switch never saves it.
    ///
    /// # Panics
    /// When called by the root thread.
    pub(crate) fn exit_current(&mut self) -> Switch {
        let slot = self.active;
        assert!(
            self.initialized && slot != ROOT_SLOT,
            "the root thread cannot exit"
        );
        debug!("{} exited", self.pool.id_of(slot));
        self.retire(slot);
        self.reschedule()
    }

    /// Wake joiners and give the slot and its pooled stack back.
    fn retire(&mut self, slot: u8) {
        if self.pool[slot].locks_held > 0 {
            warn!("{} terminated while owning a mutex", self.pool.id_of(slot));
        }
        self.wake_joiners(slot);
        if let Some(index) = self.pool[slot].stack.pooled {
            self.free_stack(index);
        }
        self.pool.release(slot);
    }

    // -----------------------------------------------------------------------
    // Join
    // -----------------------------------------------------------------------

    /// Queue the active thread behind `id`'s termination. Returns `false`
    /// when there is nothing to wait for.
    pub(crate) fn join(&mut self, id: ThreadId) -> KernelResult<bool> {
        let target = match self.pool.resolve(id) {
            Some(IDLE_SLOT) => return Err(KernelError::InvalidThread),
            Some(slot) => slot,
            None => return Ok(false),
        };
        if target == self.active {
            return Err(KernelError::JoinSelf);
        }
        if self.pool[target].state == ThreadState::Cancelled {
            return Ok(false);
        }

        let me = self.active;
        self.pool[me].join_next = None;
        self.pool[me].join_target = Some(target);
        match self.pool[target].join_head {
            None => self.pool[target].join_head = Some(me),
            Some(mut tail) => {
                while let Some(next) = self.pool[tail].join_next {
                    tail = next;
                }
                self.pool[tail].join_next = Some(me);
            }
        }
        self.pool[me].state = ThreadState::Joined;
        trace!("{} joined {}", me, target);
        Ok(true)
    }

    fn wake_joiners(&mut self, slot: u8) {
        let mut cur = self.pool[slot].join_head.take();
        while let Some(joiner) = cur {
            cur = self.pool[joiner].join_next.take();
            self.pool[joiner].join_target = None;
            if self.pool[joiner].state == ThreadState::Joined {
                self.make_runnable(joiner);
            }
        }
    }

    /// Remove a Joined thread from its target's join list.
    fn unlink_joiner(&mut self, slot: u8) {
        let Some(target) = self.pool[slot].join_target.take() else {
            return;
        };
        let next = self.pool[slot].join_next.take();
        if self.pool[target].join_head == Some(slot) {
            self.pool[target].join_head = next;
            return;
        }
        let mut cur = self.pool[target].join_head;
        while let Some(c) = cur {
            if self.pool[c].join_next == Some(slot) {
                self.pool[c].join_next = next;
                return;
            }
            cur = self.pool[c].join_next;
        }
    }

    // -----------------------------------------------------------------------
    // Wait queues
    // -----------------------------------------------------------------------

    /// Block the active thread on `queue`. The caller follows up with a
    /// reschedule.
    ///
    /// # Panics
    /// Before `init`: there is no other thread to release the caller.
    pub(crate) fn park_current(&mut self, queue: &mut WaitQueue) {
        assert!(self.initialized, "primitive used before Kernel::init");
        let slot = self.active;
        let tcb = &mut self.pool[slot];
        tcb.state = ThreadState::Waiting;
        tcb.in_primitive = true;
        queue.push_back(&mut self.pool, slot);
    }

    /// Make the first waiter Runnable. Waiters cannot be cancelled, so
    /// every thread in a wait queue is still Waiting.
    pub(crate) fn wake_one(&mut self, queue: &mut WaitQueue) -> Option<u8> {
        let slot = queue.pop_front(&mut self.pool)?;
        debug_assert_eq!(self.pool[slot].state, ThreadState::Waiting);
        trace!("released {}", slot);
        self.make_runnable(slot);
        Some(slot)
    }

    pub(crate) fn wake_all(&mut self, queue: &mut WaitQueue) {
        while self.wake_one(queue).is_some() {}
    }

    fn make_runnable(&mut self, slot: u8) {
        self.pool[slot].state = ThreadState::Runnable;
        self.run.push(&mut self.pool, slot);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    #[cfg(test)]
    pub(crate) fn active_slot(&self) -> u8 {
        self.active
    }

    /// Handle of the running thread. Before `init` this names the slot the
    /// root thread will occupy.
    pub(crate) fn current_id(&self) -> ThreadId {
        self.pool.id_of(self.active)
    }

    pub(crate) fn current(&self) -> Option<ThreadId> {
        self.initialized.then(|| self.current_id())
    }

    pub(crate) fn state(&self, id: ThreadId) -> ThreadState {
        match self.pool.resolve(id) {
            Some(slot) => self.pool[slot].state,
            None => ThreadState::Invalid,
        }
    }

    pub(crate) fn priority(&self, id: ThreadId) -> Option<Priority> {
        self.pool.resolve(id).map(|slot| self.pool[slot].priority)
    }

    pub(crate) fn set_quantum(&mut self, id: ThreadId, quantum: u8) -> KernelResult<()> {
        if quantum == 0 {
            return Err(KernelError::InvalidQuantum);
        }
        let slot = self.pool.resolve(id).ok_or(KernelError::InvalidThread)?;
        let tcb = &mut self.pool[slot];
        tcb.quantum = quantum;
        tcb.ticks_remaining = tcb.ticks_remaining.min(quantum);
        Ok(())
    }

    /// Entry point and argument of the active thread.
    pub(crate) fn active_entry(&self) -> (Option<ThreadEntry<P>>, usize) {
        let tcb = &self.pool[self.active];
        (tcb.entry, tcb.arg)
    }

    #[inline]
    pub(crate) fn ticks(&self) -> u64 {
        self.ticks
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
