//! # Sleep Queue
//!
//! Timer list of sleeping threads in wake order. Each node stores its wake
//! time as a delta to the node before it, so a tick only touches the head.
//!
//! ```text
//!   sleep(5), sleep(3), sleep(8), sleep(3)
//!   head ─► [3] ─► [0] ─► [2] ─► [3]
//!            B      D      A      C
//! ```

use crate::arch::Port;
use crate::thread::TcbPool;

#[derive(Debug, Default)]
pub(crate) struct SleepQueue {
    head: Option<u8>,
}

impl SleepQueue {
    pub(crate) const fn new() -> Self {
        Self { head: None }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Queue `slot` to wake `ticks` ticks from now. Threads with the same
    /// wake time wake in insertion order.
    pub(crate) fn insert<P: Port>(&mut self, pool: &mut TcbPool<P>, slot: u8, ticks: u32) {
        let mut remaining = ticks;
        let mut prev = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            if remaining < pool[c].sleep_ticks {
                break;
            }
            remaining -= pool[c].sleep_ticks;
            prev = cur;
            cur = pool[c].sleep_next;
        }

        pool[slot].sleep_ticks = remaining;
        pool[slot].sleep_next = cur;
        if let Some(c) = cur {
            pool[c].sleep_ticks -= remaining;
        }
        match prev {
            Some(p) => pool[p].sleep_next = Some(slot),
            None => self.head = Some(slot),
        }
    }

    /// Count one tick off the head. Returns whether anything is due.
    pub(crate) fn advance<P: Port>(&mut self, pool: &mut TcbPool<P>) -> bool {
        match self.head {
            Some(h) => {
                let tcb = &mut pool[h];
                tcb.sleep_ticks = tcb.sleep_ticks.saturating_sub(1);
                tcb.sleep_ticks == 0
            }
            None => false,
        }
    }

    /// Unlink the head if its delta has run out.
    pub(crate) fn pop_expired<P: Port>(&mut self, pool: &mut TcbPool<P>) -> Option<u8> {
        let h = self.head?;
        if pool[h].sleep_ticks != 0 {
            return None;
        }
        self.head = pool[h].sleep_next.take();
        Some(h)
    }

    /// Unlink `slot`, handing its delta to its successor. Returns whether
    /// `slot` was queued.
    pub(crate) fn remove<P: Port>(&mut self, pool: &mut TcbPool<P>, slot: u8) -> bool {
        let mut prev = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            if c == slot {
                let next = pool[c].sleep_next.take();
                if let Some(n) = next {
                    pool[n].sleep_ticks += pool[c].sleep_ticks;
                }
                match prev {
                    Some(p) => pool[p].sleep_next = next,
                    None => self.head = next,
                }
                pool[c].sleep_ticks = 0;
                return true;
            }
            prev = cur;
            cur = pool[c].sleep_next;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::hosted::Hosted;
    use crate::arch::Port;
    use crate::thread::{Priority, StackRegion};
    use proptest::prelude::*;
    use std::vec::Vec;

    fn pool(n: usize) -> TcbPool<Hosted> {
        let mut pool = TcbPool::new();
        for _ in 0..n {
            let slot = pool.find_free().unwrap();
            pool[slot].init(Priority::Normal, StackRegion::NONE, Hosted::EMPTY_CONTEXT, None, 0);
        }
        pool
    }

    /// Tick until empty, recording (tick, slot) for each wakeup.
    fn drain(q: &mut SleepQueue, pool: &mut TcbPool<Hosted>) -> Vec<(u32, u8)> {
        let mut woken = Vec::new();
        let mut now = 0;
        while !q.is_empty() {
            now += 1;
            if q.advance(pool) {
                while let Some(slot) = q.pop_expired(pool) {
                    woken.push((now, slot));
                }
            }
        }
        woken
    }

    #[test]
    fn test_deltas_after_inserts() {
        let mut pool = pool(4);
        let mut q = SleepQueue::new();
        q.insert(&mut pool, 0, 5);
        q.insert(&mut pool, 1, 3);
        q.insert(&mut pool, 2, 8);
        q.insert(&mut pool, 3, 3);

        assert_eq!(q.head, Some(1));
        assert_eq!(pool[1].sleep_ticks, 3);
        assert_eq!(pool[1].sleep_next, Some(3));
        assert_eq!(pool[3].sleep_ticks, 0);
        assert_eq!(pool[0].sleep_ticks, 2);
        assert_eq!(pool[2].sleep_ticks, 3);
    }

    #[test]
    fn test_wakes_in_time_order() {
        let mut pool = pool(3);
        let mut q = SleepQueue::new();
        q.insert(&mut pool, 0, 5);
        q.insert(&mut pool, 1, 3);
        q.insert(&mut pool, 2, 8);
        assert_eq!(drain(&mut q, &mut pool), [(3, 1), (5, 0), (8, 2)]);
    }

    #[test]
    fn test_remove_preserves_later_wake_times() {
        let mut pool = pool(3);
        let mut q = SleepQueue::new();
        q.insert(&mut pool, 0, 2);
        q.insert(&mut pool, 1, 4);
        q.insert(&mut pool, 2, 7);
        assert!(q.remove(&mut pool, 1));
        assert!(!q.remove(&mut pool, 1));
        assert_eq!(drain(&mut q, &mut pool), [(2, 0), (7, 2)]);
    }

    proptest! {
        #[test]
        fn prop_each_thread_wakes_on_its_tick(ticks in proptest::collection::vec(1u32..40, 1..14)) {
            let mut pool = pool(ticks.len());
            let mut q = SleepQueue::new();
            for (slot, &t) in ticks.iter().enumerate() {
                q.insert(&mut pool, slot as u8, t);
            }

            let woken = drain(&mut q, &mut pool);
            prop_assert_eq!(woken.len(), ticks.len());
            for &(at, slot) in &woken {
                prop_assert_eq!(at, ticks[slot as usize]);
            }
            // Equal wake times keep insertion order
            for pair in woken.windows(2) {
                if pair[0].0 == pair[1].0 {
                    prop_assert!(pair[0].1 < pair[1].1);
                }
            }
        }
    }
}
