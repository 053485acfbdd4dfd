//! A small lock-free multi-producer/multi-consumer FIFO (Michael-Scott
//! queue), used internally as the awaiter registry for
//! [`crate::adapter::CollectionAdapter`]. Unlike [`crate::queue::SegmentQueue`]
//! it has no rendezvous protocol of its own — just synchronous
//! `try_push`/`try_pop` — which is all the adapter's balance-driven
//! arbitration needs from its awaiter side.

use std::sync::atomic::{AtomicPtr, Ordering};

struct Node<T> {
    value: Option<T>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn sentinel() -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            value: None,
            next: AtomicPtr::new(std::ptr::null_mut()),
        }))
    }
}

/// A lock-free FIFO queue suitable for many producers and many consumers.
pub(crate) struct MpmcFifo<T> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
}

impl<T> MpmcFifo<T> {
    pub(crate) fn new() -> Self {
        let sentinel = Node::sentinel();
        Self {
            head: AtomicPtr::new(sentinel),
            tail: AtomicPtr::new(sentinel),
        }
    }

    pub(crate) fn push(&self, value: T) {
        let new_node = Box::into_raw(Box::new(Node {
            value: Some(value),
            next: AtomicPtr::new(std::ptr::null_mut()),
        }));
        let mut backoff = crate::backoff::Backoff::new();
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: `tail` is always a live node owned by this queue.
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };
            if next.is_null() {
                // SAFETY: only the thread that observes `next == null` on
                // the current tail attempts to link; losers retry.
                let result = unsafe {
                    (*tail).next.compare_exchange(
                        std::ptr::null_mut(),
                        new_node,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                };
                if result.is_ok() {
                    let _ = self.tail.compare_exchange(
                        tail,
                        new_node,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    );
                    return;
                }
            } else {
                // Tail lagged behind; help advance it before retrying.
                let _ =
                    self.tail
                        .compare_exchange(tail, next, Ordering::AcqRel, Ordering::Relaxed);
            }
            backoff.spin();
        }
    }

    pub(crate) fn pop(&self) -> Option<T> {
        let mut backoff = crate::backoff::Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: `head` is always a live sentinel node owned by this
            // queue until some `pop` retires it below.
            let next = unsafe { (*head).next.load(Ordering::Acquire) };
            if head == tail {
                if next.is_null() {
                    return None;
                }
                // Tail lagged behind; help advance it before retrying.
                let _ =
                    self.tail
                        .compare_exchange(tail, next, Ordering::AcqRel, Ordering::Relaxed);
                backoff.spin();
                continue;
            }
            if self
                .head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: we won the CAS, so `next` becomes the new
                // sentinel and we hold exclusive rights to its value; `head`
                // (the old sentinel) is no longer reachable from any other
                // thread's `pop` and can be freed.
                let value = unsafe { (*next).value.take() };
                unsafe {
                    drop(Box::from_raw(head));
                }
                return value;
            }
            backoff.spin();
        }
    }
}

impl<T> Drop for MpmcFifo<T> {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            // SAFETY: exclusive access during drop; every node on the chain
            // was allocated via `Box::into_raw` and not yet freed.
            unsafe {
                let next = *(*current).next.get_mut();
                drop(Box::from_raw(current));
                current = next;
            }
        }
    }
}

unsafe impl<T: Send> Send for MpmcFifo<T> {}
unsafe impl<T: Send> Sync for MpmcFifo<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_single_threaded() {
        let q: MpmcFifo<u32> = MpmcFifo::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn interleaved_push_pop() {
        let q: MpmcFifo<u32> = MpmcFifo::new();
        q.push(1);
        assert_eq!(q.pop(), Some(1));
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), Some(2));
        q.push(4);
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), Some(4));
    }
}
