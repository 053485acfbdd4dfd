//! The segmented async queue (component C): a lock-free multi-producer,
//! multi-consumer FIFO whose slots double as item storage and pending-
//! consumer registration.
//!
//! `add` never suspends the caller. `take` returns immediately with a
//! resolved value when one is available, or a deferred that resolves once a
//! producer arrives (or the caller's cancellation signal fires).

use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::awaiter::{Awaiter, AwaiterFuture};
use crate::backoff::Backoff;
use crate::cancel::CancelSignal;
use crate::config::SegmentConfig;
use crate::metrics::Metrics;
use crate::segment::{EnumerationBalance, Segment, SegmentPool, SLOT_HAS_ITEM, SLOT_NONE};

/// A lock-free, multi-producer/multi-consumer FIFO with async consumption.
pub struct SegmentQueue<T> {
    segment_size: usize,
    /// The trailing of `item_tail`/`awaiter_tail`: the earliest segment not
    /// yet fully retired. Bounds enumeration and the `count`/`awaiter_count`
    /// accounting; never ahead of either tail.
    head: AtomicPtr<Segment<T>>,
    item_tail: AtomicPtr<Segment<T>>,
    awaiter_tail: AtomicPtr<Segment<T>>,
    pool: SegmentPool<T>,
    enumeration: EnumerationBalance,
    metrics: Metrics,
}

unsafe impl<T: Send> Send for SegmentQueue<T> {}
unsafe impl<T: Send> Sync for SegmentQueue<T> {}

impl<T> SegmentQueue<T> {
    pub fn new() -> Self {
        Self::with_config(SegmentConfig::default())
    }

    pub fn with_config(config: SegmentConfig) -> Self {
        let pool = SegmentPool::new(config.segment_size);
        let first = pool.allocate();
        Self {
            segment_size: config.segment_size,
            head: AtomicPtr::new(first),
            item_tail: AtomicPtr::new(first),
            awaiter_tail: AtomicPtr::new(first),
            pool,
            enumeration: EnumerationBalance::default(),
            metrics: Metrics::new(),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Enqueues `item`. Never blocks beyond bounded spinning; never fails.
    pub fn add(&self, mut item: T) {
        let mut backoff = Backoff::new();
        loop {
            let segment_ptr = self.item_tail.load(Ordering::Acquire);
            // SAFETY: segments are never freed while reachable from a tail
            // pointer; queue drop is the only deallocation point and it
            // requires `&mut self`.
            let segment = unsafe { &*segment_ptr };
            let claim = segment.claim_item();
            let capacity = segment.capacity() as i64;

            if claim >= capacity {
                self.advance_item_tail(segment_ptr, segment);
                backoff.spin();
                continue;
            }

            let i = claim as usize;
            match segment.producer_arrive(i, item) {
                Ok(()) => {
                    self.metrics.record_producer_win();
                    self.maybe_retire_slot_owner(segment, i, claim, capacity, true);
                    return;
                }
                Err(returned) => {
                    item = returned;
                    // A consumer beat us here; spin until its awaiter is
                    // visible, then hand the item straight to it.
                    let mut inner_backoff = Backoff::new();
                    let awaiter = loop {
                        if let Some(a) = segment.take_awaiter(i) {
                            break a;
                        }
                        inner_backoff.spin();
                    };
                    segment.clear_slot(i);
                    self.maybe_retire_slot_owner(segment, i, claim, capacity, true);
                    match awaiter.try_complete_with_value(item) {
                        Ok(()) => {
                            self.metrics.record_consumer_win();
                            return;
                        }
                        Err(returned) => {
                            // Consumer had already been cancelled: retry the
                            // whole add with a fresh claim.
                            item = returned;
                            backoff.spin();
                            continue;
                        }
                    }
                }
            }
        }
    }

    /// Returns a future resolving to the next item in (per-segment) FIFO
    /// order, or to `None` if `cancel` fires first.
    pub fn take(&self, cancel: CancelSignal) -> TakeFuture<T> {
        let mut backoff = Backoff::new();
        loop {
            let segment_ptr = self.awaiter_tail.load(Ordering::Acquire);
            let segment = unsafe { &*segment_ptr };
            let claim = segment.claim_awaiter();
            let capacity = segment.capacity() as i64;

            if claim >= capacity {
                self.advance_awaiter_tail(segment_ptr, segment);
                backoff.spin();
                continue;
            }

            let i = claim as usize;
            return match segment.consumer_arrive(i) {
                Ok(()) => {
                    let awaiter = crate::cancel::cancel_aware_awaiter(cancel);
                    segment.consumer_publish_awaiter(i, Arc::clone(&awaiter));
                    self.maybe_retire_slot_owner(segment, i, claim, capacity, false);
                    TakeFuture::Pending(awaiter.result())
                }
                Err(()) => {
                    let item = segment.take_item(i);
                    segment.clear_slot(i);
                    self.metrics.record_consumer_win();
                    self.maybe_retire_slot_owner(segment, i, claim, capacity, false);
                    TakeFuture::Ready(Some(item))
                }
            };
        }
    }

    /// Whichever party loses the rendezvous at the LAST slot (`i ==
    /// capacity - 1`) is responsible for advancing `head` and attempting to
    /// release the segment to the pool. "Losing" here means: for a
    /// producer, it means a consumer had already claimed the slot (or vice
    /// versa). We approximate that by having whichever claim (`claim ==
    /// capacity - 1`) observes the OTHER index already having passed this
    /// segment drive retirement, which is equivalent in effect and avoids
    /// re-deriving win/loss here.
    fn maybe_retire_slot_owner(
        &self,
        segment: &Segment<T>,
        _i: usize,
        claim: i64,
        capacity: i64,
        _is_item_path: bool,
    ) {
        if claim == capacity - 1 && segment.is_spent() {
            self.advance_head(segment);
        }
    }

    /// Advances `head` past a just-spent segment (both tails have already
    /// moved off it, so its `next` is guaranteed published) and attempts to
    /// release it to the pool.
    fn advance_head(&self, segment: &Segment<T>) {
        let segment_ptr = segment as *const Segment<T> as *mut Segment<T>;
        let next = segment.next.load(Ordering::Acquire);
        let _ = self.head.compare_exchange(
            segment_ptr,
            next,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        self.retire(segment);
    }

    fn retire(&self, segment: &Segment<T>) {
        if self.enumeration.pooling_allowed() {
            // SAFETY: `segment` came from a raw pointer owned by this
            // queue; releasing it to the pool transfers ownership there.
            let ptr = segment as *const Segment<T> as *mut Segment<T>;
            self.pool.release(ptr);
            self.metrics.record_segment_pooled();
        }
    }

    fn advance_item_tail(&self, current: *mut Segment<T>, segment: &Segment<T>) {
        let mut backoff = Backoff::new();
        loop {
            let next = segment.next.load(Ordering::Acquire);
            if !next.is_null() {
                let _ = self.item_tail.compare_exchange(
                    current,
                    next,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
                return;
            }
            // No successor published yet: attempt to grow.
            if self.grow_next(current, segment) {
                return;
            }
            backoff.spin();
        }
    }

    fn advance_awaiter_tail(&self, current: *mut Segment<T>, segment: &Segment<T>) {
        let mut backoff = Backoff::new();
        loop {
            let next = segment.next.load(Ordering::Acquire);
            if !next.is_null() {
                let _ = self.awaiter_tail.compare_exchange(
                    current,
                    next,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
                return;
            }
            if self.grow_next(current, segment) {
                return;
            }
            backoff.spin();
        }
    }

    /// Attempts to publish a successor segment. Always returns `true`: either
    /// this call won the race to publish, or a concurrent caller already did
    /// (in which case the allocation here is handed back to the pool).
    fn grow_next(&self, _current: *mut Segment<T>, segment: &Segment<T>) -> bool {
        let fresh = match self.pool.acquire() {
            Some(reused) => {
                self.metrics.record_segment_reused();
                reused
            }
            None => {
                self.metrics.record_segment_created();
                self.pool.allocate()
            }
        };
        if segment
            .next
            .compare_exchange(
                std::ptr::null_mut(),
                fresh,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // Someone else published first; return our allocation to the
            // pool instead of leaking it.
            self.pool.release(fresh);
        }
        true
    }

    /// Approximate, racy snapshot of the number of resident items:
    /// item-tail's item-count, plus awaiter-tail's residual capacity, plus
    /// one full segment for each segment strictly between the two tails.
    pub fn count(&self) -> i64 {
        let item_ptr = self.item_tail.load(Ordering::Acquire);
        let awaiter_ptr = self.awaiter_tail.load(Ordering::Acquire);
        if item_ptr == awaiter_ptr {
            // SAFETY: live segment owned by this queue.
            let seg = unsafe { &*item_ptr };
            return (seg.item_claims() - seg.awaiter_claims()).max(0);
        }
        // SAFETY: both pointers are live segments owned by this queue.
        let (item_seg, awaiter_seg) = unsafe { (&*item_ptr, &*awaiter_ptr) };
        if item_seg.id() < awaiter_seg.id() {
            return 0;
        }
        let capacity = self.segment_size as i64;
        let mut total = capacity - awaiter_seg.awaiter_claims();
        // SAFETY: segments strictly between `awaiter_ptr` and `item_ptr` have
        // had their item tail pass but not yet their awaiter tail, so
        // `is_spent` is false for them and they cannot be concurrently reset
        // or pooled while this walk is in progress.
        let mut cursor = awaiter_seg.next.load(Ordering::Acquire);
        while cursor != item_ptr {
            let seg = unsafe { &*cursor };
            total += capacity;
            cursor = seg.next.load(Ordering::Acquire);
        }
        total += item_seg.item_claims();
        total.max(0)
    }

    /// Approximate, racy snapshot of the number of pending consumers,
    /// symmetric with [`Self::count`].
    pub fn awaiter_count(&self) -> i64 {
        let item_ptr = self.item_tail.load(Ordering::Acquire);
        let awaiter_ptr = self.awaiter_tail.load(Ordering::Acquire);
        if item_ptr == awaiter_ptr {
            let seg = unsafe { &*item_ptr };
            return (seg.awaiter_claims() - seg.item_claims()).max(0);
        }
        let (item_seg, awaiter_seg) = unsafe { (&*item_ptr, &*awaiter_ptr) };
        if awaiter_seg.id() < item_seg.id() {
            return 0;
        }
        let capacity = self.segment_size as i64;
        let mut total = capacity - item_seg.item_claims();
        // SAFETY: see `count` above, mirrored.
        let mut cursor = item_seg.next.load(Ordering::Acquire);
        while cursor != awaiter_ptr {
            let seg = unsafe { &*cursor };
            total += capacity;
            cursor = seg.next.load(Ordering::Acquire);
        }
        total += awaiter_seg.awaiter_claims();
        total.max(0)
    }

    /// Iterates the items currently resident without removing them. Items
    /// already paired with an awaiter are skipped; items produced after
    /// iteration begins may or may not be observed.
    pub fn iter(&self) -> QueueIter<'_, T>
    where
        T: Clone,
    {
        self.enumeration.enter_enumeration();
        let start = self.head.load(Ordering::Acquire);
        QueueIter {
            queue: self,
            segment: start,
            index: 0,
        }
    }
}

impl<T> Default for SegmentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SegmentQueue<T> {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut();
        // Walk forward from the earliest segment we can reach; segments
        // before it (if any were already retired into the pool) are freed
        // by the pool's own drop.
        let mut seen = std::collections::HashSet::new();
        while !current.is_null() {
            let id = unsafe { (*current).id() };
            if !seen.insert(id) {
                break;
            }
            let next = unsafe { (*current).next.load(Ordering::Relaxed) };
            // SAFETY: this segment was allocated via `Box::into_raw` and is
            // reachable only from this queue (not also linked into the
            // pool's free list, since a segment is either live-in-chain or
            // pooled, never both).
            unsafe {
                drop(Box::from_raw(current));
            }
            current = next;
        }
    }
}

/// The result of [`SegmentQueue::take`]: either an immediately available
/// item, or a future that resolves once a producer or cancellation arrives.
pub enum TakeFuture<T> {
    Ready(Option<T>),
    Pending(AwaiterFuture<T>),
}

impl<T> std::future::Future for TakeFuture<T> {
    type Output = Option<T>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        // SAFETY: we only ever match on the variant and, for `Pending`,
        // project into its field without moving `self` out; `AwaiterFuture`
        // is itself `Unpin` (it holds only an `Arc`).
        let this = unsafe { self.get_unchecked_mut() };
        match this {
            TakeFuture::Ready(value) => std::task::Poll::Ready(value.take()),
            TakeFuture::Pending(fut) => std::pin::Pin::new(fut).poll(cx),
        }
    }
}

pub struct QueueIter<'a, T: Clone> {
    queue: &'a SegmentQueue<T>,
    segment: *mut Segment<T>,
    index: usize,
}

impl<'a, T: Clone> Iterator for QueueIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if self.segment.is_null() {
                return None;
            }
            // SAFETY: segments reachable from a live tail are never freed
            // while this iterator holds an enumeration-balance permit.
            let segment = unsafe { &*self.segment };
            if self.index >= segment.capacity() {
                self.segment = segment.next.load(Ordering::Acquire);
                self.index = 0;
                continue;
            }
            let state = segment.slot_state(self.index);
            if state == SLOT_NONE {
                return None;
            }
            let i = self.index;
            self.index += 1;
            if state == SLOT_HAS_ITEM {
                // Peek without consuming: items are cloned for iteration
                // rather than removed.
                let peeked = segment.peek_item(i);
                if let Some(value) = peeked {
                    return Some(value);
                }
            }
            // HasAwaiter / Cleared slots are skipped.
        }
    }
}

impl<'a, T: Clone> Drop for QueueIter<'a, T> {
    fn drop(&mut self) {
        self.queue.enumeration.exit_enumeration();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSignal;

    #[tokio::test]
    async fn single_threaded_add_then_take() {
        let queue = SegmentQueue::<u32>::new();
        queue.add(42);
        let value = queue.take(CancelSignal::never()).await;
        assert_eq!(value, Some(42));
        assert_eq!(queue.count(), 0);
        assert_eq!(queue.awaiter_count(), 0);
    }

    #[tokio::test]
    async fn take_then_add_resolves_consumer_first() {
        let queue = Arc::new(SegmentQueue::<u32>::new());
        let q2 = Arc::clone(&queue);
        let consumer = tokio::spawn(async move { q2.take(CancelSignal::never()).await });
        tokio::task::yield_now().await;
        queue.add(42);
        let value = consumer.await.unwrap();
        assert_eq!(value, Some(42));
    }

    #[tokio::test]
    async fn cancel_before_add_leaves_item_resident() {
        let queue = SegmentQueue::<u32>::new();
        let (mut handle, signal) = CancelSignal::new();
        let fut = queue.take(signal);
        handle.cancel();
        let result = fut.await;
        assert_eq!(result, None);
        queue.add(42);
        assert_eq!(queue.count(), 1);
    }

    #[tokio::test]
    async fn count_and_iter_span_a_segment_boundary() {
        let queue = SegmentQueue::<u32>::with_config(SegmentConfig::new(4, false));
        for i in 0..=4u32 {
            queue.add(i);
        }
        assert_eq!(queue.count(), 5);
        let mut seen: Vec<_> = queue.iter().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..=4).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn many_items_segment_transition() {
        let queue = SegmentQueue::<u32>::with_config(SegmentConfig::new(4, false));
        for i in 0..20u32 {
            queue.add(i);
        }
        let mut seen = Vec::new();
        for _ in 0..20 {
            seen.push(queue.take(CancelSignal::never()).await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }
}
