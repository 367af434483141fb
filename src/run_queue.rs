//! # Run Queue
//!
//! Ready threads, ordered by descending priority and FIFO among equals.
//! The list is doubly linked through the TCBs' `run_prev`/`run_next` slots so
//! `pause` can unlink an arbitrary entry without a scan for its predecessor.

use crate::arch::Port;
use crate::thread::{Priority, TcbPool};

/// Head of the ready list. Nodes live in the [`TcbPool`].
#[derive(Debug, Default)]
pub(crate) struct RunQueue {
    head: Option<u8>,
}

impl RunQueue {
    pub(crate) const fn new() -> Self {
        Self { head: None }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Priority of the thread that would be dispatched next.
    pub(crate) fn peek_priority<P: Port>(&self, pool: &TcbPool<P>) -> Option<Priority> {
        self.head.map(|slot| pool[slot].priority)
    }

    /// Insert behind the last entry of equal or higher priority.
    pub(crate) fn push<P: Port>(&mut self, pool: &mut TcbPool<P>, slot: u8) {
        let priority = pool[slot].priority;

        let mut prev = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            if pool[c].priority < priority {
                break;
            }
            prev = cur;
            cur = pool[c].run_next;
        }

        pool[slot].run_prev = prev;
        pool[slot].run_next = cur;
        if let Some(c) = cur {
            pool[c].run_prev = Some(slot);
        }
        match prev {
            Some(p) => pool[p].run_next = Some(slot),
            None => self.head = Some(slot),
        }
    }

    /// Take the highest-priority entry.
    pub(crate) fn pop<P: Port>(&mut self, pool: &mut TcbPool<P>) -> Option<u8> {
        let slot = self.head?;
        self.remove(pool, slot);
        Some(slot)
    }

    /// Unlink `slot`, which must be queued.
    pub(crate) fn remove<P: Port>(&mut self, pool: &mut TcbPool<P>, slot: u8) {
        let prev = pool[slot].run_prev.take();
        let next = pool[slot].run_next.take();

        match prev {
            Some(p) => pool[p].run_next = next,
            None => {
                debug_assert_eq!(self.head, Some(slot));
                self.head = next;
            }
        }
        if let Some(n) = next {
            pool[n].run_prev = prev;
        }
    }

    /// Iterate queued slots in dispatch order.
    #[cfg(test)]
    pub(crate) fn slots<'a, P: Port>(&self, pool: &'a TcbPool<P>) -> impl Iterator<Item = u8> + 'a {
        let mut cur = self.head;
        core::iter::from_fn(move || {
            let slot = cur?;
            cur = pool[slot].run_next;
            Some(slot)
        })
    }
}
