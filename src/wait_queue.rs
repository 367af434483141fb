//! FIFO of threads blocked on a synchronization primitive, linked through
//! the TCBs' `wait_next` slot.

use crate::arch::Port;
use crate::thread::TcbPool;

#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    head: Option<u8>,
    tail: Option<u8>,
}

impl WaitQueue {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn push_back<P: Port>(&mut self, pool: &mut TcbPool<P>, slot: u8) {
        pool[slot].wait_next = None;
        match self.tail {
            Some(t) => pool[t].wait_next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    pub(crate) fn pop_front<P: Port>(&mut self, pool: &mut TcbPool<P>) -> Option<u8> {
        let slot = self.head?;
        self.head = pool[slot].wait_next.take();
        if self.head.is_none() {
            self.tail = None;
        }
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::hosted::Hosted;
    use crate::arch::Port;
    use crate::thread::{Priority, StackRegion};

    #[test]
    fn test_fifo_order() {
        let mut pool = TcbPool::<Hosted>::new();
        for _ in 0..3 {
            let slot = pool.find_free().unwrap();
            pool[slot].init(Priority::Low, StackRegion::NONE, Hosted::EMPTY_CONTEXT, None, 0);
        }

        let mut q = WaitQueue::new();
        q.push_back(&mut pool, 1);
        q.push_back(&mut pool, 0);
        assert_eq!(q.pop_front(&mut pool), Some(1));
        q.push_back(&mut pool, 2);
        assert_eq!(q.pop_front(&mut pool), Some(0));
        assert_eq!(q.pop_front(&mut pool), Some(2));
        assert_eq!(q.pop_front(&mut pool), None);
        assert!(q.is_empty());
    }
}
