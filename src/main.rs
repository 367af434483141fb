//! # tickthreads Demo Firmware
//!
//! Runs a small sensor pipeline on a Cortex-M4 board:
//!
//! | Thread | Priority | Stack | Behavior |
//! |--------|----------|-------|----------|
//! | root (`main`) | Normal | MSP → PSP | Supervises: pauses, resumes and restarts workers |
//! | `sampler` | Normal | pool | Takes a reading every 10 ticks, signals `render` |
//! | `render` | High | pool | Waits on the semaphore, publishes under the write lock |
//! | `reporter` | Low | caller-supplied | Reads the published value under the read lock |
//! | `heartbeat` | Low | pool | Sleeps 500 ticks, counts beats |
//!
//! ## Expected Behavior
//!
//! 1. A reading signalled by `sampler` readies `render`, which takes over as
//!    soon as `sampler` goes back to sleep.
//! 2. `reporter` and `heartbeat` share the Low level in round-robin slices
//!    and only run while every Normal and High thread is blocked.
//! 3. Every 2000 ticks the root pauses `heartbeat` for one second, and every
//!    5000 ticks it cancels `sampler`, joins it and spawns a fresh one.

#![no_std]
#![no_main]

use core::ptr::addr_of_mut;
use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::{entry, exception};
use panic_halt as _;

use tickthreads::{CortexM4, Kernel, Priority, ReentrantMutex, RwLock, Semaphore};

static KERNEL: Kernel<CortexM4> = Kernel::new(CortexM4::new());

static SAMPLE_LOCK: ReentrantMutex<CortexM4> = ReentrantMutex::new(&KERNEL);
static READY: Semaphore<CortexM4> = Semaphore::new(&KERNEL, 0);
static PUBLISHED: RwLock<CortexM4> = RwLock::new(&KERNEL);

static LATEST_SAMPLE: AtomicU32 = AtomicU32::new(0);
static PUBLISHED_VALUE: AtomicU32 = AtomicU32::new(0);
static REPORTED: AtomicU32 = AtomicU32::new(0);
static HEARTBEATS: AtomicU32 = AtomicU32::new(0);

const REPORTER_STACK_SIZE: usize = 512;

#[repr(C, align(8))]
struct ReporterStack([u8; REPORTER_STACK_SIZE]);

static mut REPORTER_STACK: ReporterStack = ReporterStack([0; REPORTER_STACK_SIZE]);

type K = &'static Kernel<CortexM4>;

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

/// Produces a reading every 10 ticks. `arg` seeds the fake sensor.
fn sampler(kernel: K, arg: usize) {
    let mut value = arg as u32;
    loop {
        value = value.wrapping_mul(1_103_515_245).wrapping_add(12_345);

        SAMPLE_LOCK.lock();
        LATEST_SAMPLE.store(value >> 16, Ordering::Relaxed);
        let _ = SAMPLE_LOCK.unlock();

        READY.up();
        kernel.sleep(10);
    }
}

/// Publishes each signalled reading.
fn render(_kernel: K, _arg: usize) {
    loop {
        READY.down();

        SAMPLE_LOCK.lock();
        let sample = LATEST_SAMPLE.load(Ordering::Relaxed);
        let _ = SAMPLE_LOCK.unlock();

        PUBLISHED.write_lock();
        PUBLISHED_VALUE.store(sample, Ordering::Relaxed);
        let _ = PUBLISHED.write_unlock();
    }
}

/// Background consumer of the published value.
fn reporter(kernel: K, _arg: usize) {
    loop {
        PUBLISHED.read_lock();
        REPORTED.store(PUBLISHED_VALUE.load(Ordering::Relaxed), Ordering::Relaxed);
        let _ = PUBLISHED.read_unlock();
        kernel.yield_now();
    }
}

fn heartbeat(kernel: K, _arg: usize) {
    loop {
        kernel.sleep(500);
        HEARTBEATS.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Interrupts
// ---------------------------------------------------------------------------

/// Row counter of the multiplexed display driven from the tick.
static DISPLAY_ROW: AtomicU32 = AtomicU32::new(0);

const DISPLAY_ROWS: u32 = 8;

/// Stand-in for a display driver that shares the tick interrupt: advances
/// the active row. A real driver would drive the row and column pins here.
fn refresh_display() {
    let row = DISPLAY_ROW.load(Ordering::Relaxed);
    DISPLAY_ROW.store((row + 1) % DISPLAY_ROWS, Ordering::Relaxed);
}

#[exception]
fn SysTick() {
    refresh_display();
    KERNEL.tick();
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Firmware entry point. Becomes the root thread and supervises the
/// workers. Does not return.
#[entry]
fn main() -> ! {
    KERNEL.init(Priority::Normal).expect("kernel init failed");

    // SAFETY: the only reference ever taken to the reporter stack
    let reporter_stack: &'static mut [u8] = unsafe { &mut (*addr_of_mut!(REPORTER_STACK)).0 };
    KERNEL
        .create(reporter, 0, reporter_stack, Priority::Low)
        .expect("failed to create reporter");

    KERNEL.spawn(render, 0, Priority::High).expect("failed to spawn render");
    let heart = KERNEL.spawn(heartbeat, 0, Priority::Low).expect("failed to spawn heartbeat");
    let mut sampler_id = KERNEL.spawn(sampler, 1, Priority::Normal).expect("failed to spawn sampler");

    let mut generation = 1;
    loop {
        KERNEL.sleep(1000);
        let now = KERNEL.ticks();

        if now % 2000 < 1000 {
            let _ = KERNEL.pause(heart);
        } else {
            let _ = KERNEL.resume(heart);
        }

        if now % 5000 < 1000 {
            // Refused while the sampler owns or waits on SAMPLE_LOCK; retried
            // next round
            if KERNEL.cancel(sampler_id).is_ok() {
                let _ = KERNEL.join(sampler_id);
                generation += 1;
                sampler_id = KERNEL
                    .spawn(sampler, generation, Priority::Normal)
                    .expect("failed to respawn sampler");
            }
        }
    }
}
