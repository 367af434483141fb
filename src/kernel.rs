//! # Kernel
//!
//! Public thread API. A [`Kernel`] owns the scheduler, the pooled stacks and
//! the hardware port; every operation masks interrupts, asks the scheduler
//! for a decision and carries it out through the port before unmasking.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset (cortex-m-rt)
//!   └─► main()                      ← becomes the root thread
//!         ├─► KERNEL.init(prio)     ← port setup, idle thread, tick source
//!         ├─► KERNEL.spawn(..)      ← register threads (×N)
//!         └─► root keeps running as an ordinary thread
//!
//! SysTick ──► KERNEL.tick()          ← wakeups, preemption, time slices
//! ```
//!
//! ## Thread Start and Teardown
//!
//! New contexts enter [`thread_start`], which unmasks interrupts, runs the
//! thread's entry function and falls into [`Kernel::exit`] if it returns.

use core::cell::UnsafeCell;

use log::debug;

use crate::arch::{Port, StartFn};
use crate::config::{DEFAULT_STACK_SIZE, IDLE_STACK_SIZE, POOLED_STACKS};
use crate::error::{KernelError, KernelResult};
use crate::scheduler::{Scheduler, Switch};
use crate::sync::CriticalSection;
use crate::thread::{Priority, StackRegion, ThreadId, ThreadState};

/// Body of a thread. Receives the kernel it runs on and the argument given
/// at creation. Returning terminates the thread.
pub type ThreadEntry<P> = fn(&'static Kernel<P>, usize);

// ---------------------------------------------------------------------------
// Stack pool
// ---------------------------------------------------------------------------

#[repr(C, align(8))]
struct StackSlot(UnsafeCell<[u8; DEFAULT_STACK_SIZE]>);

#[repr(C, align(8))]
struct IdleStack(UnsafeCell<[u8; IDLE_STACK_SIZE]>);

/// Library-owned stacks for [`Kernel::spawn`] and the idle thread.
/// Ownership of each slot is tracked by the scheduler.
struct StackPool {
    slots: [StackSlot; POOLED_STACKS],
    idle: IdleStack,
}

impl StackPool {
    const fn new() -> Self {
        const EMPTY: StackSlot = StackSlot(UnsafeCell::new([0; DEFAULT_STACK_SIZE]));
        Self {
            slots: [EMPTY; POOLED_STACKS],
            idle: IdleStack(UnsafeCell::new([0; IDLE_STACK_SIZE])),
        }
    }

    fn region(&self, index: u8) -> StackRegion {
        StackRegion {
            base: self.slots[index as usize].0.get().cast(),
            size: DEFAULT_STACK_SIZE,
            pooled: Some(index),
        }
    }

    fn idle_region(&self) -> StackRegion {
        StackRegion {
            base: self.idle.0.get().cast(),
            size: IDLE_STACK_SIZE,
            pooled: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// A threading kernel running on port `P`.
///
/// Designed to live in a `static`:
///
/// ```ignore
/// static KERNEL: Kernel<CortexM4> = Kernel::new(CortexM4::new());
/// ```
pub struct Kernel<P: Port> {
    port: P,
    sched: UnsafeCell<Scheduler<P>>,
    stacks: StackPool,
}

// SAFETY: the scheduler and stack pool are only accessed with interrupts
// masked on a single core, where exactly one thread runs at a time.
unsafe impl<P: Port> Sync for Kernel<P> {}

impl<P: Port> Kernel<P> {
    pub const fn new(port: P) -> Self {
        Self {
            port,
            sched: UnsafeCell::new(Scheduler::new()),
            stacks: StackPool::new(),
        }
    }

    /// The hardware port this kernel runs on.
    #[inline]
    pub fn port(&self) -> &P {
        &self.port
    }

    // -----------------------------------------------------------------------
    // Critical-section plumbing
    // -----------------------------------------------------------------------

    /// Run `f` on the scheduler with interrupts masked.
    pub(crate) fn with_scheduler<R>(&self, f: impl FnOnce(&mut Scheduler<P>) -> R) -> R {
        let _cs = CriticalSection::enter(&self.port);
        // SAFETY: interrupts are masked and nothing else holds a reference
        f(unsafe { &mut *self.sched.get() })
    }

    /// Run `f` with interrupts masked and perform the switch it decides on
    /// before unmasking. Returns once the caller is dispatched again.
    pub(crate) fn with_switch<R>(&self, f: impl FnOnce(&mut Scheduler<P>) -> (R, Switch)) -> R {
        let cs = CriticalSection::enter(&self.port);
        // SAFETY: as in `with_scheduler`; the borrow ends before the switch
        let (result, switch) = f(unsafe { &mut *self.sched.get() });
        self.dispatch(switch, cs);
        result
    }

    /// Retry `attempt` until it yields a value. On `None` the attempt must
    /// have parked the caller; the kernel switches away and tries again
    /// after the caller is woken.
    pub(crate) fn block_until<R>(&self, mut attempt: impl FnMut(&mut Scheduler<P>) -> Option<R>) -> R {
        loop {
            let done = self.with_switch(|s| match attempt(s) {
                Some(value) => (Some(value), Switch::Stay),
                None => (None, s.reschedule()),
            });
            if let Some(value) = done {
                return value;
            }
        }
    }

    fn dispatch(&self, switch: Switch, cs: CriticalSection<'_, P>) {
        match switch {
            Switch::Stay => drop(cs),
            Switch::Save { from, to } => {
                let (from, to) = {
                    // SAFETY: still masked; no other reference is live
                    let sched = unsafe { &mut *self.sched.get() };
                    sched.pool.context_ptrs(from, to)
                };
                // SAFETY: both contexts belong to live TCBs, `from` is the
                // running thread and interrupts are masked
                unsafe { self.port.switch(from, to) };
                drop(cs);
            }
            Switch::Discard { to } => {
                let to = {
                    // SAFETY: as above
                    let sched = unsafe { &*self.sched.get() };
                    sched.pool.context_ptr(to)
                };
                // SAFETY: the running thread's slot is already reclaimed
                unsafe { self.port.switch_without_save(to) };
                drop(cs);
                // A deferring port switches away on unmask
                loop {
                    self.port.wait_for_interrupt();
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Setup and creation
    // -----------------------------------------------------------------------

    /// Turn the calling context into the root thread and start the tick
    /// source. Must run once, before any other operation.
    pub fn init(&'static self, root_priority: Priority) -> KernelResult<ThreadId> {
        if root_priority == Priority::Idle {
            return Err(KernelError::InvalidPriority);
        }
        self.with_scheduler(|s| {
            if s.is_initialized() {
                return Err(KernelError::AlreadyInitialized);
            }
            // SAFETY: first and only initialization, interrupts masked
            unsafe { self.port.init() };

            let idle = self.stacks.idle_region();
            let idle_context = self.prepare_context(&idle)?;
            let root_context = self.port.root_context();
            Ok(s.init(root_priority, root_context, idle, idle_context, Some(idle_body::<P>)))
        })
    }

    fn prepare_context(&'static self, stack: &StackRegion) -> KernelResult<P::Context> {
        if stack.size < P::MIN_STACK_SIZE {
            return Err(KernelError::StackTooSmall {
                size: stack.size,
                min: P::MIN_STACK_SIZE,
            });
        }
        let start: StartFn = thread_start::<P>;
        // SAFETY: the region is exclusively owned by the thread being built
        unsafe {
            self.port
                .init_context(stack.base, stack.size, start, self as *const Self as usize)
        }
    }

    /// Create a thread running `entry(kernel, arg)` on a caller-supplied
    /// stack. If it outranks the caller it runs before this returns.
    pub fn create(
        &'static self,
        entry: ThreadEntry<P>,
        arg: usize,
        stack: &'static mut [u8],
        priority: Priority,
    ) -> KernelResult<ThreadId> {
        let region = StackRegion {
            base: stack.as_mut_ptr(),
            size: stack.len(),
            pooled: None,
        };
        self.with_switch(|s| {
            match s.create(priority, region, entry, arg, |r| self.prepare_context(r)) {
                Ok((id, switch)) => (Ok(id), switch),
                Err(e) => (Err(e), Switch::Stay),
            }
        })
    }

    /// Create a thread on one of the kernel's pooled stacks.
    pub fn spawn(&'static self, entry: ThreadEntry<P>, arg: usize, priority: Priority) -> KernelResult<ThreadId> {
        self.with_switch(|s| {
            if let Err(e) = s.check_admission(priority) {
                return (Err(e), Switch::Stay);
            }
            let Some(index) = s.alloc_stack() else {
                return (Err(KernelError::StackPoolExhausted), Switch::Stay);
            };
            let region = self.stacks.region(index);
            match s.create(priority, region, entry, arg, |r| self.prepare_context(r)) {
                Ok((id, switch)) => (Ok(id), switch),
                Err(e) => {
                    s.free_stack(index);
                    (Err(e), Switch::Stay)
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Give up the CPU to the next ready thread of equal or higher priority.
    pub fn yield_now(&self) {
        self.with_switch(|s| ((), s.reschedule()));
    }

    /// Block the caller for `ticks` ticks. Zero only yields.
    pub fn sleep(&self, ticks: u32) {
        self.with_switch(|s| ((), s.sleep_current(ticks)));
    }

    /// Advance time by one tick. Called from the periodic interrupt.
    pub fn tick(&self) {
        self.with_switch(|s| ((), s.tick()));
    }

    /// Ticks delivered since boot.
    pub fn ticks(&self) -> u64 {
        self.with_scheduler(|s| s.ticks())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Suspend `thread` until [`Kernel::resume`]. A thread may pause itself.
    pub fn pause(&self, thread: ThreadId) -> KernelResult<()> {
        self.with_switch(|s| match s.pause(thread) {
            Ok(switch) => (Ok(()), switch),
            Err(e) => (Err(e), Switch::Stay),
        })
    }

    /// Make a paused thread ready again. Yields if it outranks the caller.
    pub fn resume(&self, thread: ThreadId) -> KernelResult<()> {
        self.with_switch(|s| match s.resume(thread) {
            Ok(switch) => (Ok(()), switch),
            Err(e) => (Err(e), Switch::Stay),
        })
    }

    /// Terminate another thread. Its resources are reclaimed the next time
    /// the scheduler would have run it.
    ///
    /// A thread inside a blocking primitive call is refused with
    /// [`KernelError::Blocked`] until the call returns, and an owner of a
    /// [`ReentrantMutex`](crate::ReentrantMutex) with
    /// [`KernelError::HoldsLock`].
    pub fn cancel(&self, thread: ThreadId) -> KernelResult<()> {
        self.with_scheduler(|s| s.cancel(thread))
    }

    /// Terminate the calling thread.
    ///
    /// # Panics
    /// When called from the root thread.
    pub fn exit(&self) -> ! {
        self.with_switch(|s| ((), s.exit_current()));
        // A discarding switch never returns
        unreachable!("exited thread was dispatched again")
    }

    /// Block until `thread` has terminated. Returns at once if it already has.
    pub fn join(&self, thread: ThreadId) -> KernelResult<()> {
        loop {
            let parked = self.with_switch(|s| match s.join(thread) {
                Ok(true) => (Ok(true), s.reschedule()),
                other => (other, Switch::Stay),
            })?;
            if !parked {
                return Ok(());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The running thread, once the kernel is initialized.
    pub fn current(&self) -> Option<ThreadId> {
        self.with_scheduler(|s| s.current())
    }

    /// State of `thread`; terminated or stale handles report `Invalid`.
    pub fn state(&self, thread: ThreadId) -> ThreadState {
        self.with_scheduler(|s| s.state(thread))
    }

    pub fn priority(&self, thread: ThreadId) -> Option<Priority> {
        self.with_scheduler(|s| s.priority(thread))
    }

    /// Change the time slice of `thread`, in ticks.
    pub fn set_quantum(&self, thread: ThreadId, quantum: u8) -> KernelResult<()> {
        self.with_scheduler(|s| s.set_quantum(thread, quantum))
    }
}

// ---------------------------------------------------------------------------
// Trampoline and idle thread
// ---------------------------------------------------------------------------

/// First code every thread runs. `kernel` is the address of its [`Kernel`].
extern "C" fn thread_start<P: Port>(kernel: usize) -> ! {
    // SAFETY: `prepare_context` passes the address of a `&'static Kernel<P>`
    let kernel: &'static Kernel<P> = unsafe { &*(kernel as *const Kernel<P>) };
    // SAFETY: called once, first thing on the new context
    unsafe { kernel.port.thread_started() };

    let (entry, arg) = kernel.with_scheduler(|s| s.active_entry());
    if let Some(entry) = entry {
        entry(kernel, arg);
    }
    debug!("thread returned from its entry");
    kernel.exit()
}

/// Runs when nothing else is ready.
fn idle_body<P: Port>(kernel: &'static Kernel<P>, _arg: usize) {
    loop {
        if kernel.port.wait_for_interrupt() {
            kernel.tick();
        }
        kernel.yield_now();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::hosted::{share, shared, Hosted, Log};

    type K = &'static Kernel<Hosted>;

    fn leak_stack(size: usize) -> &'static mut [u8] {
        Box::leak(vec![0u8; size].into_boxed_slice())
    }

    fn noop(_k: K, _arg: usize) {}

    fn record(k: K, arg: usize) {
        shared::<Log>(arg).push(k.current().map_or(0, |id| id.index()));
    }

    #[test]
    fn test_init_twice() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        assert_eq!(k.init(Priority::Normal), Err(KernelError::AlreadyInitialized));
    }

    #[test]
    fn test_create_before_init() {
        let k: K = Box::leak(Box::new(Kernel::new(Hosted::new())));
        assert_eq!(k.spawn(noop, 0, Priority::Normal), Err(KernelError::NotInitialized));
        assert_eq!(k.current(), None);
    }

    #[test]
    fn test_idle_priority_is_reserved() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        assert_eq!(k.spawn(noop, 0, Priority::Idle), Err(KernelError::InvalidPriority));
        assert_eq!(Kernel::boot(Priority::Idle).err(), Some(KernelError::InvalidPriority));
    }

    #[test]
    fn test_stack_too_small() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        let err = k
            .create(noop, 0, leak_stack(Hosted::MIN_STACK_SIZE - 1), Priority::Low)
            .unwrap_err();
        assert!(matches!(err, KernelError::StackTooSmall { .. }));
        assert!(err.is_exhaustion());
        assert!(k.create(noop, 0, leak_stack(Hosted::MIN_STACK_SIZE), Priority::Low).is_ok());
    }

    #[test]
    fn test_thread_pool_exhaustion() {
        let k = Kernel::boot(Priority::High).unwrap();
        // Root and idle take two slots
        for _ in 0..crate::config::MAX_THREADS - 2 {
            k.create(noop, 0, leak_stack(256), Priority::Low).unwrap();
        }
        assert_eq!(
            k.create(noop, 0, leak_stack(256), Priority::Low),
            Err(KernelError::PoolExhausted)
        );
    }

    #[test]
    fn test_stack_pool_exhaustion_and_reuse() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        let ids: Vec<ThreadId> = (0..POOLED_STACKS)
            .map(|_| k.spawn(noop, 0, Priority::Low).unwrap())
            .collect();
        assert_eq!(k.spawn(noop, 0, Priority::Low), Err(KernelError::StackPoolExhausted));

        // A finished thread gives its stack back
        k.join(ids[0]).unwrap();
        assert!(k.spawn(noop, 0, Priority::Low).is_ok());
    }

    #[test]
    fn test_create_preempts_creator() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        let log = share(Log::new());
        let high = k.spawn(record, log.arg(), Priority::High).unwrap();
        // The high thread already ran to completion
        assert_eq!(log.take(), [high.index()]);
        assert_eq!(k.state(high), ThreadState::Invalid);

        let low = k.spawn(record, log.arg(), Priority::Low).unwrap();
        assert!(log.take().is_empty());
        k.join(low).unwrap();
        assert_eq!(log.take(), [low.index()]);
    }

    fn critical_a(k: K, arg: usize) {
        let log = shared::<Log>(arg);
        for i in 0..3 {
            log.push(100 + i);
            if i == 1 {
                k.yield_now();
            }
        }
    }

    fn normal_b(k: K, arg: usize) {
        let log = shared::<Log>(arg);
        log.push(0);
        log.push(1);
        k.spawn(critical_a, arg, Priority::Critical).unwrap();
        for i in 2..5 {
            log.push(i);
        }
    }

    #[test]
    fn test_priority_preemption_order() {
        let k = Kernel::boot(Priority::Low).unwrap();
        let log = share(Log::new());
        let b = k.spawn(normal_b, log.arg(), Priority::Normal).unwrap();
        k.join(b).unwrap();
        // A yields at i == 1 but nothing outranks it, so it keeps the CPU
        assert_eq!(log.take(), [0, 1, 100, 101, 102, 2, 3, 4]);
    }

    fn bursty_critical(k: K, arg: usize) {
        let log = shared::<Log>(arg);
        for _ in 0..2 {
            for i in 0..3 {
                log.push(100 + i);
                k.yield_now();
            }
            k.sleep(1);
        }
    }

    fn ticking_normal(k: K, arg: usize) {
        let log = shared::<Log>(arg);
        for i in 0..4 {
            log.push(i);
            k.tick();
            k.yield_now();
        }
    }

    #[test]
    fn test_tick_preempts_for_woken_higher_priority() {
        let k = Kernel::boot(Priority::Low).unwrap();
        let log = share(Log::new());
        let a = k.spawn(bursty_critical, log.arg(), Priority::Critical).unwrap();
        assert_eq!(k.state(a), ThreadState::Sleeping);
        let b = k.spawn(ticking_normal, log.arg(), Priority::Normal).unwrap();
        k.join(a).unwrap();
        k.join(b).unwrap();
        // Each tick wakes A, whose whole burst runs before B's next round
        assert_eq!(log.take(), [100, 101, 102, 0, 100, 101, 102, 1, 2, 3]);
    }

    fn sleeper(k: K, arg: usize) {
        k.sleep(10);
        shared::<Log>(arg).push(k.ticks() as usize);
    }

    #[test]
    fn test_sleep_wakes_after_exact_ticks() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        let log = share(Log::new());
        let t = k.spawn(sleeper, log.arg(), Priority::High).unwrap();
        assert_eq!(k.state(t), ThreadState::Sleeping);

        for _ in 0..9 {
            k.tick();
        }
        assert!(log.take().is_empty());
        assert_eq!(k.state(t), ThreadState::Sleeping);

        // The tenth tick preempts the root
        k.tick();
        assert_eq!(log.take(), [10]);
        assert_eq!(k.state(t), ThreadState::Invalid);
    }

    #[test]
    fn test_idle_advances_time_while_everyone_sleeps() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        k.sleep(25);
        assert!(k.ticks() >= 25);
    }

    fn joiner(k: K, arg: usize) {
        let (target, log) = shared::<(ThreadId, Log)>(arg);
        k.join(*target).unwrap();
        log.push(k.current().map_or(0, |id| id.index()));
    }

    fn nap(k: K, _arg: usize) {
        k.sleep(3);
    }

    #[test]
    fn test_join_wakes_every_joiner() {
        let k = Kernel::boot(Priority::Low).unwrap();
        let target = k.spawn(nap, 0, Priority::Normal).unwrap();
        let state = share((target, Log::new()));
        let j: Vec<ThreadId> = (0..3)
            .map(|_| k.spawn(joiner, state.arg(), Priority::Normal).unwrap())
            .collect();
        for &id in &j {
            assert_eq!(k.state(id), ThreadState::Joined);
        }

        k.join(target).unwrap();
        for &id in &j {
            k.join(id).unwrap();
        }
        assert_eq!(state.1.take(), [j[0].index(), j[1].index(), j[2].index()]);
    }

    #[test]
    fn test_join_terminated_and_self() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        let t = k.spawn(noop, 0, Priority::High).unwrap();
        assert_eq!(k.state(t), ThreadState::Invalid);
        assert_eq!(k.join(t), Ok(()));
        let me = k.current().unwrap();
        assert_eq!(k.join(me), Err(KernelError::JoinSelf));
    }

    fn forever(k: K, arg: usize) {
        loop {
            shared::<Log>(arg).push(1);
            k.yield_now();
        }
    }

    #[test]
    fn test_cancel_runnable_and_sleeping() {
        let k = Kernel::boot(Priority::High).unwrap();
        let log = share(Log::new());

        let runnable = k.spawn(forever, log.arg(), Priority::Normal).unwrap();
        let sleeping = k.spawn(nap, 0, Priority::Critical).unwrap();
        assert_eq!(k.state(sleeping), ThreadState::Sleeping);

        k.cancel(runnable).unwrap();
        k.cancel(sleeping).unwrap();
        assert_eq!(k.state(runnable), ThreadState::Cancelled);
        assert_eq!(k.state(sleeping), ThreadState::Cancelled);

        // Both are reclaimed once the root stops running
        k.sleep(1);
        assert_eq!(k.state(runnable), ThreadState::Invalid);
        assert_eq!(k.state(sleeping), ThreadState::Invalid);
        assert!(log.take().is_empty());
    }

    #[test]
    fn test_cancel_rejections() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        let me = k.current().unwrap();
        assert_eq!(k.cancel(me), Err(KernelError::CancelSelf));

        let t = k.spawn(noop, 0, Priority::High).unwrap();
        assert_eq!(k.cancel(t), Err(KernelError::InvalidThread));
    }

    fn cancel_root(k: K, arg: usize) {
        let root = *shared::<ThreadId>(arg);
        assert_eq!(k.cancel(root), Err(KernelError::RootThread));
    }

    #[test]
    fn test_root_cannot_be_cancelled() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        let root = share(k.current().unwrap());
        let t = k.spawn(cancel_root, root.arg(), Priority::High).unwrap();
        assert_eq!(k.state(t), ThreadState::Invalid);
    }

    fn pause_self(k: K, arg: usize) {
        let log = shared::<Log>(arg);
        log.push(1);
        k.pause(k.current().unwrap()).unwrap();
        log.push(2);
    }

    #[test]
    fn test_pause_and_resume() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        let log = share(Log::new());
        let t = k.spawn(pause_self, log.arg(), Priority::High).unwrap();
        assert_eq!(log.take(), [1]);
        assert_eq!(k.state(t), ThreadState::Paused);
        assert_eq!(k.pause(t), Err(KernelError::InvalidState(ThreadState::Paused)));

        k.resume(t).unwrap();
        assert_eq!(log.take(), [2]);
        assert_eq!(k.resume(t), Err(KernelError::InvalidThread));
    }

    #[test]
    fn test_resume_requires_paused() {
        let k = Kernel::boot(Priority::High).unwrap();
        let t = k.spawn(noop, 0, Priority::Low).unwrap();
        assert_eq!(k.resume(t), Err(KernelError::InvalidState(ThreadState::Runnable)));
        k.pause(t).unwrap();
        k.yield_now();
        assert_eq!(k.state(t), ThreadState::Paused);
        k.resume(t).unwrap();
        k.join(t).unwrap();
    }

    #[test]
    #[should_panic(expected = "root thread cannot exit")]
    fn test_root_exit_panics() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        k.exit();
    }

    fn spin(k: K, arg: usize) {
        let (id, log) = shared::<(usize, Log)>(arg);
        for _ in 0..6 {
            log.push(*id);
            k.tick();
        }
    }

    #[test]
    fn test_time_slice_round_robin() {
        // The root outranks both so it can start them together
        let k = Kernel::boot(Priority::Critical).unwrap();
        let log = Log::new();
        let one = share((1, log.clone()));
        let two = share((2, log.clone()));
        let a = k.spawn(spin, one.arg(), Priority::Normal).unwrap();
        let b = k.spawn(spin, two.arg(), Priority::Normal).unwrap();
        k.join(a).unwrap();
        k.join(b).unwrap();
        assert_eq!(log.take(), [1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 1, 2]);
    }

    fn hog(k: K, arg: usize) {
        for _ in 0..20 {
            k.tick();
        }
        shared::<Log>(arg).push(2);
    }

    #[test]
    fn test_busy_high_priority_starves_low() {
        let k = Kernel::boot(Priority::High).unwrap();
        let log = share(Log::new());
        let low = k.create(record, log.arg(), leak_stack(256), Priority::Low).unwrap();
        let busy = k.spawn(hog, log.arg(), Priority::High).unwrap();
        k.join(busy).unwrap();
        // The low thread never ran while the hog was busy
        assert_eq!(log.take(), [2]);
        k.join(low).unwrap();
        assert_eq!(log.take(), [low.index()]);
    }

    #[test]
    fn test_set_quantum() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        let me = k.current().unwrap();
        assert_eq!(k.set_quantum(me, 0), Err(KernelError::InvalidQuantum));
        assert_eq!(k.set_quantum(me, 2), Ok(()));
        assert_eq!(k.priority(me), Some(Priority::Normal));
    }
}
