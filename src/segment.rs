//! Fixed-capacity segments and their lock-free pool.
//!
//! =============================================================================
//! MEMORY ORDERING & SYNCHRONIZATION STRATEGY
//! =============================================================================
//!
//! Each segment is a slot array shared by racing producers and consumers.
//! Every slot is claimed at most once by a producer and at most once by a
//! consumer via an independent fetch-add on `item_index`/`awaiter_index`.
//! Two parties can claim the SAME slot index (one via each counter) — that
//! is the rendezvous this module exists to support; `queue.rs` drives the
//! actual protocol, this module only provides the claim/publish primitives.
//!
//! **Producer claiming slot i:**
//! 1. `fetch_add` `item_index` (Relaxed is sufficient; only the returned
//!    value is used, ordering of the write to `items[i]` is what matters)
//! 2. Write `items[i]` (plain write — protected by the CAS below)
//! 3. `compare_exchange` `slot_state[i]` None -> HasItem with Release (on
//!    success, publishes the write above to whichever consumer observes
//!    HasItem with Acquire)
//!
//! **Consumer claiming slot i:**
//! 1. `fetch_add` `awaiter_index` (Relaxed)
//! 2. `compare_exchange` `slot_state[i]` None -> HasAwaiter with AcqRel (the
//!    Acquire half observes a producer's Release if it raced ahead; the
//!    Release half publishes to a producer that arrives later)
//! 3. On success, write `awaiters[i]` with Release ordering — producers that
//!    lose the CAS above must not read `awaiters[i]` until they have
//!    observed this write, so they spin (see `queue.rs`) until it is
//!    visible.
//!
//! The producer writes its payload BEFORE its CAS; the consumer writes its
//! awaiter handle AFTER its CAS. This asymmetry lets a losing consumer read
//! the item directly with no further synchronization (the winning CAS
//! Release already published it), while a losing producer must briefly spin
//! for the awaiter handle to appear.
//!
//! Segments are never deallocated individually: once linked into a queue's
//! chain they live for the lifetime of the queue, reused via the pool below.
//! Only `SegmentQueue::drop` frees the underlying allocations.

use std::sync::atomic::{AtomicI64, AtomicPtr, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::awaiter::Awaiter;
use crate::invariants::{debug_assert_monotonic_claim, debug_assert_segment_reset};
use crate::metrics::Metrics;

pub(crate) const SLOT_NONE: u8 = 0;
pub(crate) const SLOT_HAS_ITEM: u8 = 1;
pub(crate) const SLOT_HAS_AWAITER: u8 = 2;
pub(crate) const SLOT_CLEARED: u8 = 3;

/// 128-byte alignment to keep the two claim counters (hit by every producer
/// and every consumer respectively) off each other's cache line.
#[repr(align(128))]
pub(crate) struct CacheAligned<T> {
    value: T,
}

impl<T> CacheAligned<T> {
    const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CacheAligned<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

struct Slot<T> {
    state: AtomicU8,
    item: std::cell::UnsafeCell<Option<T>>,
    // Published via `Arc::into_raw`/`Arc::from_raw` instead of a plain
    // `UnsafeCell<Option<Arc<_>>>`: the winning consumer's write must have a
    // Release edge a losing producer's spin-read can Acquire, which a bare
    // cell cannot provide.
    awaiter: AtomicPtr<Awaiter<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(SLOT_NONE),
            item: std::cell::UnsafeCell::new(None),
            awaiter: AtomicPtr::new(std::ptr::null_mut()),
        }
    }
}

// SAFETY: `item` access is gated by the `state` protocol described above —
// a slot has exactly one writer for the entire lifetime between resets.
// `awaiter` is synchronized directly through the `AtomicPtr` itself.
unsafe impl<T: Send> Send for Slot<T> {}
unsafe impl<T: Send> Sync for Slot<T> {}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        let ptr = *self.awaiter.get_mut();
        if !ptr.is_null() {
            // SAFETY: any pointer still resident here was produced by
            // `Arc::into_raw` and never reclaimed via `take_awaiter`/
            // `clear_slot`.
            drop(unsafe { Arc::from_raw(ptr) });
        }
    }
}

pub(crate) struct Segment<T> {
    id: AtomicU64,
    slots: Box<[Slot<T>]>,
    item_index: CacheAligned<AtomicI64>,
    awaiter_index: CacheAligned<AtomicI64>,
    pub(crate) next: AtomicPtr<Segment<T>>,
    pool_next: AtomicPtr<Segment<T>>,
}

impl<T> Segment<T> {
    fn new(id: u64, capacity: usize) -> Box<Self> {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        Box::new(Self {
            id: AtomicU64::new(id),
            slots: slots.into_boxed_slice(),
            item_index: CacheAligned::new(AtomicI64::new(-1)),
            awaiter_index: CacheAligned::new(AtomicI64::new(-1)),
            next: AtomicPtr::new(std::ptr::null_mut()),
            pool_next: AtomicPtr::new(std::ptr::null_mut()),
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claims the next item-claim index. May return a value `>= capacity`,
    /// signaling the caller to transition to the next segment.
    #[inline]
    pub(crate) fn claim_item(&self) -> i64 {
        let old = self.item_index.fetch_add(1, Ordering::Relaxed);
        debug_assert_monotonic_claim!("item_index", old, old + 1);
        old + 1
    }

    /// Claims the next awaiter-claim index. May return a value `>= capacity`.
    #[inline]
    pub(crate) fn claim_awaiter(&self) -> i64 {
        let old = self.awaiter_index.fetch_add(1, Ordering::Relaxed);
        debug_assert_monotonic_claim!("awaiter_index", old, old + 1);
        old + 1
    }

    #[inline]
    pub(crate) fn item_claims(&self) -> i64 {
        self.item_index.load(Ordering::Relaxed) + 1
    }

    #[inline]
    pub(crate) fn awaiter_claims(&self) -> i64 {
        self.awaiter_index.load(Ordering::Relaxed) + 1
    }

    /// Writes `value` into slot `i` then attempts to mark it `HasItem`.
    /// Returns `Ok(())` if this producer won the rendezvous, `Err(value)`
    /// if a consumer had already claimed the slot (the item is handed back
    /// untouched for the caller to deliver directly to that consumer).
    pub(crate) fn producer_arrive(&self, i: usize, value: T) -> Result<(), T> {
        let slot = &self.slots[i];
        // SAFETY: only one producer ever claims index i (enforced by the
        // fetch-add claim protocol), and no reader touches `item` before
        // observing HasItem.
        unsafe {
            *slot.item.get() = Some(value);
        }
        match slot.state.compare_exchange(
            SLOT_NONE,
            SLOT_HAS_ITEM,
            Ordering::Release,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(_) => {
                // A consumer already marked HasAwaiter; take our value back.
                // SAFETY: we are the sole writer of `item` for this slot.
                let value = unsafe { (*slot.item.get()).take().expect("producer wrote item") };
                Err(value)
            }
        }
    }

    /// Attempts to claim slot `i` for a consumer. Returns `Ok(())` if this
    /// consumer won (caller should then call `consumer_publish_awaiter`), or
    /// `Err(())` if a producer had already placed an item (caller should
    /// call `take_item`).
    pub(crate) fn consumer_arrive(&self, i: usize) -> Result<(), ()> {
        let slot = &self.slots[i];
        slot.state
            .compare_exchange(
                SLOT_NONE,
                SLOT_HAS_AWAITER,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| ())
    }

    /// Publishes the winning consumer's awaiter handle. Must only be called
    /// after `consumer_arrive` returned `Ok`.
    pub(crate) fn consumer_publish_awaiter(&self, i: usize, awaiter: Arc<Awaiter<T>>) {
        let slot = &self.slots[i];
        let ptr = Arc::into_raw(awaiter) as *mut Awaiter<T>;
        // Release: a losing producer's Acquire swap in `take_awaiter` must
        // observe this write.
        slot.awaiter.store(ptr, Ordering::Release);
    }

    /// Spin-reads the awaiter a losing producer must hand its item to.
    /// Returns `None` until the winning consumer's `consumer_publish_awaiter`
    /// becomes visible; the swap both observes the publish and claims the
    /// handle so it is taken exactly once.
    pub(crate) fn take_awaiter(&self, i: usize) -> Option<Arc<Awaiter<T>>> {
        let slot = &self.slots[i];
        let ptr = slot.awaiter.swap(std::ptr::null_mut(), Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            // SAFETY: `ptr` was produced by `Arc::into_raw` above and this
            // swap is the only path that reclaims it.
            Some(unsafe { Arc::from_raw(ptr) })
        }
    }

    /// Reads the item a losing consumer is entitled to (state is HasItem).
    pub(crate) fn take_item(&self, i: usize) -> T {
        let slot = &self.slots[i];
        // SAFETY: state is HasItem, so the producer's write happened-before
        // via the Release/Acquire pair in `consumer_arrive`/`producer_arrive`.
        unsafe { (*slot.item.get()).take().expect("item present for HasItem slot") }
    }

    #[inline]
    pub(crate) fn slot_state(&self, i: usize) -> u8 {
        self.slots[i].state.load(Ordering::Acquire)
    }

    /// Clones the item at a `HasItem` slot without consuming it, for
    /// iteration. Returns `None` if the slot has since been cleared (a
    /// concurrent consumer raced ahead of the iterator).
    pub(crate) fn peek_item(&self, i: usize) -> Option<T>
    where
        T: Clone,
    {
        let slot = &self.slots[i];
        // SAFETY: we only read; a racing `take_item`/`clear_slot` may run
        // concurrently, in which case we may observe `None`, which is an
        // accepted outcome for best-effort iteration.
        unsafe { (*slot.item.get()).clone() }
    }

    /// Clears a resolved slot back to `Cleared`, dropping any residual item.
    pub(crate) fn clear_slot(&self, i: usize) {
        let slot = &self.slots[i];
        // SAFETY: called only once the rendezvous at `i` is fully resolved
        // (both parties have returned), so no concurrent access to `item`
        // remains.
        unsafe {
            *slot.item.get() = None;
        }
        let leftover = slot.awaiter.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if !leftover.is_null() {
            // SAFETY: a pointer still resident here was published but never
            // claimed by `take_awaiter`; reclaim it to avoid leaking.
            drop(unsafe { Arc::from_raw(leftover) });
        }
        slot.state.store(SLOT_CLEARED, Ordering::Release);
    }

    /// `true` once every slot has been claimed by both a producer and a
    /// consumer — the segment is fully spent and eligible for pooling.
    pub(crate) fn is_spent(&self) -> bool {
        self.item_claims() as usize >= self.capacity() && self.awaiter_claims() as usize >= self.capacity()
    }

    /// Resets a pooled segment for reuse: clears every slot to `None` and
    /// rewinds both claim counters. Must only be called while no other
    /// reference to the segment is reachable from a live queue.
    fn reset(&self, id: u64) {
        for slot in self.slots.iter() {
            slot.state.store(SLOT_NONE, Ordering::Relaxed);
        }
        self.item_index.store(-1, Ordering::Relaxed);
        self.awaiter_index.store(-1, Ordering::Relaxed);
        self.next.store(std::ptr::null_mut(), Ordering::Relaxed);
        debug_assert_segment_reset!(
            self.item_index.load(Ordering::Relaxed),
            self.awaiter_index.load(Ordering::Relaxed)
        );
        self.id.store(id, Ordering::Relaxed);
    }
}

impl<T> Drop for Segment<T> {
    fn drop(&mut self) {
        // Each `Slot<T>` reclaims its own `item`/`awaiter` contents via its
        // own `Drop` impl; nothing left to do here.
    }
}

/// A lock-free Treiber stack of spent segments, reused to avoid repeated
/// allocation under sustained load.
pub(crate) struct SegmentPool<T> {
    head: AtomicPtr<Segment<T>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl<T> SegmentPool<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            head: AtomicPtr::new(std::ptr::null_mut()),
            next_id: AtomicU64::new(0),
            capacity,
        }
    }

    /// Pushes a spent segment onto the pool.
    pub(crate) fn release(&self, segment: *mut Segment<T>) {
        let mut backoff = crate::backoff::Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            // SAFETY: `segment` is a live allocation owned by the caller's
            // queue; `pool_next` is only touched while a segment is either
            // exclusively held by the releasing party or sitting in the
            // pool, never concurrently with chain traversal.
            unsafe {
                (*segment).pool_next.store(head, Ordering::Relaxed);
            }
            if self
                .head
                .compare_exchange_weak(head, segment, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            backoff.spin();
        }
    }

    /// Pops a segment from the pool if one is available, resetting it for
    /// reuse. Returns `None` if the pool is empty (caller should allocate a
    /// fresh segment instead).
    pub(crate) fn acquire(&self) -> Option<*mut Segment<T>> {
        let mut backoff = crate::backoff::Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }
            // SAFETY: `head` was pushed by `release` and nothing frees
            // pooled segments; reading `pool_next` is safe.
            let next = unsafe { (*head).pool_next.load(Ordering::Relaxed) };
            if self
                .head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                // SAFETY: we exclusively own `head` having just popped it.
                unsafe {
                    (*head).reset(id);
                }
                return Some(head);
            }
            backoff.spin();
        }
    }

    /// Allocates a brand-new segment (pool was empty).
    pub(crate) fn allocate(&self) -> *mut Segment<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Box::into_raw(Segment::new(id, self.capacity))
    }
}

impl<T> Drop for SegmentPool<T> {
    fn drop(&mut self) {
        let mut current = self.head.load(Ordering::Relaxed);
        while !current.is_null() {
            // SAFETY: we own the pool exclusively during drop; each pointer
            // was produced by `Box::into_raw` and not yet freed.
            unsafe {
                let next = (*current).pool_next.load(Ordering::Relaxed);
                drop(Box::from_raw(current));
                current = next;
            }
        }
    }
}

/// Tracks whether enumeration (`iterate`) is currently in progress, gating
/// whether spent segments may be returned to the pool. Positive means
/// active enumerations; negative means a pooling transfer is underway.
#[derive(Default)]
pub(crate) struct EnumerationBalance(AtomicI64);

impl EnumerationBalance {
    pub(crate) fn enter_enumeration(&self) {
        let mut backoff = crate::backoff::Backoff::new();
        loop {
            let current = self.0.load(Ordering::Acquire);
            if current < 0 {
                backoff.spin();
                continue;
            }
            if self
                .0
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            backoff.spin();
        }
    }

    pub(crate) fn exit_enumeration(&self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }

    /// `true` if no enumeration is active, i.e. pooling may proceed.
    pub(crate) fn pooling_allowed(&self) -> bool {
        self.0.load(Ordering::Acquire) <= 0
    }
}

/// A 32-bit bitset used by the exclusive awaiter group to track which child
/// indices have produced an awaiter. Re-exported here because `Segment`'s
/// pool-capacity cap and the group's collection cap share the same width.
pub(crate) struct Bitset32(AtomicU32);

impl Bitset32 {
    pub(crate) const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub(crate) fn set(&self, index: u32) -> u32 {
        self.0.fetch_or(1 << index, Ordering::AcqRel)
    }

    pub(crate) fn is_set(&self, index: u32) -> bool {
        self.0.load(Ordering::Acquire) & (1 << index) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_then_consumer_rendezvous() {
        let segment = Segment::<u32>::new(0, 4);
        assert!(segment.producer_arrive(0, 42).is_ok());
        assert_eq!(segment.slot_state(0), SLOT_HAS_ITEM);
        assert_eq!(segment.consumer_arrive(0), Err(()));
        assert_eq!(segment.take_item(0), 42);
    }

    #[test]
    fn consumer_then_producer_rendezvous() {
        let segment = Segment::<u32>::new(0, 4);
        assert!(segment.consumer_arrive(0).is_ok());
        let awaiter = Awaiter::new();
        segment.consumer_publish_awaiter(0, Arc::clone(&awaiter));
        let handed_back = segment.producer_arrive(0, 7);
        assert_eq!(handed_back, Err(7));
        let got = segment.take_awaiter(0).unwrap();
        assert!(Arc::ptr_eq(&got, &awaiter));
        assert!(got.try_complete_with_value(7).is_ok());
    }

    #[test]
    fn pool_round_trip_resets_claims() {
        let pool: SegmentPool<u32> = SegmentPool::new(4);
        let raw = pool.allocate();
        // SAFETY: test-owned pointer, freed via pool drop or explicit release.
        unsafe {
            (*raw).claim_item();
            (*raw).claim_item();
        }
        pool.release(raw);
        let reused = pool.acquire().unwrap();
        assert_eq!(reused, raw);
        // SAFETY: just reset by acquire().
        unsafe {
            assert_eq!((*reused).item_claims(), 0);
            assert_eq!((*reused).awaiter_claims(), 0);
        }
    }
}
