//! Readers-writer lock using the reader-bias technique.
//!
//! `readers` counts active readers. A writer subtracts [`RW_BIAS`] from it,
//! which turns the counter negative and sends new readers to `reader_sem`.
//! The writer then waits on `writer_sem` until the readers that were already
//! inside have left; `departing` counts them down. Writers are serialized by
//! a plain [`Mutex`].
//!
//! Readers never block unless a writer holds or waits for the lock.

use core::cell::UnsafeCell;

use log::warn;

use super::{critical_section, Mutex, Semaphore};
use crate::arch::Port;
use crate::config::RW_BIAS;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;

pub struct RwLock<P: Port> {
    kernel: &'static Kernel<P>,
    writer: Mutex<P>,
    writer_sem: Semaphore<P>,
    reader_sem: Semaphore<P>,
    readers: UnsafeCell<i32>,
    departing: UnsafeCell<i32>,
}

// SAFETY: the counters are only modified with interrupts masked
unsafe impl<P: Port> Sync for RwLock<P> {}

impl<P: Port> RwLock<P> {
    pub const fn new(kernel: &'static Kernel<P>) -> Self {
        Self {
            kernel,
            writer: Mutex::new(kernel),
            writer_sem: Semaphore::new(kernel, 0),
            reader_sem: Semaphore::new(kernel, 0),
            readers: UnsafeCell::new(0),
            departing: UnsafeCell::new(0),
        }
    }

    /// Add `delta` to a counter with interrupts masked; returns the new value.
    fn add(&self, counter: &UnsafeCell<i32>, delta: i32) -> i32 {
        critical_section(self.kernel.port(), |_cs| {
            // SAFETY: interrupts are masked
            let value = unsafe { &mut *counter.get() };
            *value += delta;
            *value
        })
    }

    pub fn read_lock(&self) {
        if self.add(&self.readers, 1) < 0 {
            // A writer is pending; it lets us in when it leaves
            self.reader_sem.down();
        }
    }

    pub fn read_unlock(&self) -> KernelResult<()> {
        let r = self.add(&self.readers, -1);
        if r >= 0 {
            return Ok(());
        }
        if r + 1 == 0 || r + 1 == -RW_BIAS {
            self.add(&self.readers, 1);
            warn!("read_unlock without a matching read_lock");
            return Err(KernelError::NotLocked);
        }
        // The last reader a pending writer waits for lets it in
        if self.add(&self.departing, -1) == 0 {
            self.writer_sem.up();
        }
        Ok(())
    }

    pub fn write_lock(&self) {
        self.writer.lock();
        // Announce the writer, then wait for readers already inside
        let active = self.add(&self.readers, -RW_BIAS) + RW_BIAS;
        if active != 0 && self.add(&self.departing, active) != 0 {
            self.writer_sem.down();
        }
    }

    pub fn write_unlock(&self) -> KernelResult<()> {
        let r = self.add(&self.readers, RW_BIAS);
        if r >= RW_BIAS {
            self.add(&self.readers, -RW_BIAS);
            warn!("write_unlock without a matching write_lock");
            return Err(KernelError::NotLocked);
        }
        // Let in every reader that queued behind the writer
        for _ in 0..r {
            self.reader_sem.up();
        }
        self.writer.unlock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::hosted::{share, shared, Hosted, Log};
    use crate::thread::{Priority, ThreadState};

    type K = &'static Kernel<Hosted>;

    const READ: usize = 1;
    const WRITE: usize = 2;

    struct Fixture {
        lock: RwLock<Hosted>,
        log: Log,
    }

    fn reader(_k: K, arg: usize) {
        let f = shared::<Fixture>(arg);
        f.lock.read_lock();
        f.log.push(READ);
        f.lock.read_unlock().unwrap();
    }

    fn writer(k: K, arg: usize) {
        let f = shared::<Fixture>(arg);
        f.lock.write_lock();
        f.log.push(WRITE);
        k.sleep(2);
        f.log.push(WRITE);
        f.lock.write_unlock().unwrap();
    }

    fn fixture(k: K) -> &'static crate::arch::hosted::Shared<Fixture> {
        share(Fixture {
            lock: RwLock::new(k),
            log: Log::new(),
        })
    }

    #[test]
    fn test_writer_excludes_readers() {
        let k = Kernel::boot(Priority::Low).unwrap();
        let f = fixture(k);
        let w = k.spawn(writer, f.arg(), Priority::Normal).unwrap();
        // The writer holds the lock and sleeps; the reader must queue
        let r = k.spawn(reader, f.arg(), Priority::High).unwrap();
        assert_eq!(k.state(r), ThreadState::Waiting);

        k.join(w).unwrap();
        k.join(r).unwrap();
        assert_eq!(f.log.take(), [WRITE, WRITE, READ]);
    }

    fn hold_read(k: K, arg: usize) {
        let f = shared::<Fixture>(arg);
        f.lock.read_lock();
        f.log.push(READ);
        k.sleep(3);
        f.lock.read_unlock().unwrap();
    }

    #[test]
    fn test_readers_share_and_writer_waits_for_them() {
        let k = Kernel::boot(Priority::Low).unwrap();
        let f = fixture(k);
        let r1 = k.spawn(hold_read, f.arg(), Priority::High).unwrap();
        let r2 = k.spawn(hold_read, f.arg(), Priority::High).unwrap();
        // Both readers got in without blocking
        assert_eq!(f.log.take(), [READ, READ]);

        let w = k.spawn(writer, f.arg(), Priority::Normal).unwrap();
        assert_eq!(k.state(w), ThreadState::Waiting);

        for t in [r1, r2, w] {
            k.join(t).unwrap();
        }
        assert_eq!(f.log.take(), [WRITE, WRITE]);
    }

    #[test]
    fn test_queued_reader_cannot_be_cancelled() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        let f = fixture(k);
        f.lock.write_lock();
        let r = k.spawn(reader, f.arg(), Priority::High).unwrap();
        assert_eq!(k.state(r), ThreadState::Waiting);
        assert_eq!(k.cancel(r), Err(KernelError::Blocked));

        f.lock.write_unlock().unwrap();
        k.join(r).unwrap();
        assert_eq!(f.log.take(), [READ]);

        // The reader left nothing behind, so a writer gets straight in
        f.lock.write_lock();
        f.log.push(WRITE);
        f.lock.write_unlock().unwrap();
        assert_eq!(f.log.take(), [WRITE]);
    }

    #[test]
    fn test_unbalanced_unlocks() {
        let k = Kernel::boot(Priority::Normal).unwrap();
        let lock = RwLock::new(k);
        assert_eq!(lock.read_unlock(), Err(KernelError::NotLocked));
        assert_eq!(lock.write_unlock(), Err(KernelError::NotLocked));

        lock.write_lock();
        assert_eq!(lock.read_unlock(), Err(KernelError::NotLocked));
        assert_eq!(lock.write_unlock(), Ok(()));

        lock.read_lock();
        lock.read_lock();
        assert_eq!(lock.read_unlock(), Ok(()));
        assert_eq!(lock.read_unlock(), Ok(()));
        assert_eq!(lock.read_unlock(), Err(KernelError::NotLocked));
    }
}
