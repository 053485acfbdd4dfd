//! The async collection adapter (component D): turns any thread-safe
//! producer/consumer container into an async-consumable collection using a
//! signed-balance arbitration protocol between items and pending consumers.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::awaiter::Completable;
use crate::backoff::Backoff;
use crate::cancel::CancelSignal;
use crate::collections::ConcurrentCollection;
use crate::mpmc_fifo::MpmcFifo;
use crate::queue::TakeFuture;

/// Wraps a [`ConcurrentCollection`] item store with an awaiter FIFO and a
/// signed balance counter arbitrating between the two.
///
/// The awaiter side is a plain lock-free FIFO of `Arc<dyn Completable<T>>` —
/// it has no rendezvous protocol of its own, unlike
/// [`crate::queue::SegmentQueue`]; `balance` alone decides whether
/// `add`/`take` pair directly or go through the FIFO. Storing a trait object
/// rather than a concrete `Arc<Awaiter<T>>` lets `take_from_any` register a
/// [`crate::exclusive_group::GroupChild`] here without this type knowing
/// anything about groups.
pub struct CollectionAdapter<T, C> {
    container: C,
    awaiters: MpmcFifo<Arc<dyn Completable<T>>>,
    balance: AtomicI64,
}

impl<T: Send + 'static, C: ConcurrentCollection<T>> CollectionAdapter<T, C> {
    /// Builds an adapter over an initially empty container.
    pub fn new(container: C) -> Self {
        Self {
            container,
            awaiters: MpmcFifo::new(),
            balance: AtomicI64::new(0),
        }
    }

    /// Builds an adapter over a container already seeded with items,
    /// initializing `balance` from its length so an immediate `take()`
    /// resolves synchronously rather than registering an awaiter.
    pub fn new_with_seed(container: C) -> Self {
        let len = container.len() as i64;
        Self {
            container,
            awaiters: MpmcFifo::new(),
            balance: AtomicI64::new(len),
        }
    }

    /// Enqueues `item`. Never suspends the caller.
    pub fn add(&self, mut item: T) {
        let mut backoff = Backoff::new();
        loop {
            let post = self.balance.fetch_add(1, Ordering::AcqRel) + 1;
            if post > 0 {
                self.container.try_add(item);
                return;
            }
            // An awaiter is registered (or about to be); hand the item to
            // whichever one we can dequeue.
            match self.awaiters.pop() {
                Some(awaiter) => match awaiter.try_complete_with_value(item) {
                    Ok(()) => return,
                    Err(returned) => {
                        // Cancelled awaiter; its balance decrement is
                        // reclaimed by this retry.
                        item = returned;
                        backoff.spin();
                        continue;
                    }
                },
                None => {
                    // The registering consumer's `fetch_sub` has landed but
                    // its `push` onto the FIFO hasn't become visible yet;
                    // spin briefly and retry.
                    backoff.spin();
                    continue;
                }
            }
        }
    }

    /// Returns a future resolving to the next item, or `None` if `cancel`
    /// fires first.
    pub fn take(&self, cancel: CancelSignal) -> TakeFuture<T> {
        let post = self.balance.fetch_sub(1, Ordering::AcqRel) - 1;
        if post >= 0 {
            let mut backoff = Backoff::new();
            loop {
                if let Some(item) = self.container.try_take() {
                    return TakeFuture::Ready(Some(item));
                }
                backoff.spin();
            }
        }
        let awaiter = crate::cancel::cancel_aware_awaiter(cancel);
        self.awaiters.push(Arc::clone(&awaiter));
        TakeFuture::Pending(awaiter.result())
    }

    /// Non-blocking take that only succeeds if an item is already resident,
    /// without ever registering an awaiter. Used by `take_from_any`'s
    /// pre-pass so a priority scan of several adapters never itself creates
    /// a pending registration on collections it passes over.
    pub(crate) fn try_take_now(&self) -> Option<T> {
        loop {
            let current = self.balance.load(Ordering::Acquire);
            if current <= 0 {
                return None;
            }
            if self
                .balance
                .compare_exchange_weak(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let mut backoff = Backoff::new();
                loop {
                    if let Some(item) = self.container.try_take() {
                        return Some(item);
                    }
                    backoff.spin();
                }
            }
        }
    }

    /// Registers an externally-built completion target rather than a fresh
    /// `Awaiter`. Used by [`crate::take_from_any`] to share one
    /// [`crate::exclusive_group::ExclusiveGroup`] child across several
    /// adapters instead of each adapter owning its own consumer-visible
    /// future.
    pub(crate) fn register(&self, completable: Arc<dyn Completable<T>>) {
        let post = self.balance.fetch_sub(1, Ordering::AcqRel) - 1;
        if post >= 0 {
            let mut backoff = Backoff::new();
            loop {
                if let Some(item) = self.container.try_take() {
                    let _ = completable.try_complete_with_value(item);
                    return;
                }
                backoff.spin();
            }
        }
        self.awaiters.push(completable);
    }

    /// Racy snapshot of the number of resident items in the container.
    pub fn count(&self) -> usize {
        self.container.len()
    }

    /// Racy snapshot of the number of pending consumers.
    pub fn awaiter_count(&self) -> i64 {
        (-self.balance.load(Ordering::Acquire)).max(0)
    }
}
