//! Batch queue (component G): producers fill fixed-size batches; once a
//! batch is full, or explicitly flushed, it is frozen and handed to an
//! inner segmented queue for consumers to take as one read-only sequence.
//!
//! The reservation-then-write idiom mirrors `reservation.rs`'s
//! reserve-then-`commit` split, generalized so each producer commits its own
//! single slot rather than a caller-chosen run; the swap of the "current"
//! batch on rotation uses `arc-swap`, the way the broader ecosystem swaps a
//! hot `Arc<T>` without a lock (this crate's lineage has no direct
//! equivalent, since its ring buffers rotate in place instead of handing off
//! ownership).

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::backoff::Backoff;
use crate::cancel::CancelSignal;
use crate::error::CollectionError;
use crate::invariants::debug_assert_batch_slot_finalized;
use crate::metrics::Metrics;
use crate::queue::{SegmentQueue, TakeFuture};

/// A fixed-size, append-only batch of items. Producers claim a slot via
/// [`Batch::reserve`], write into it, and mark it finalized; a batch becomes
/// readable once [`Batch::freeze`] fixes its length.
pub struct Batch<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    finalized: Box<[AtomicBool]>,
    reservation: AtomicIsize,
    count: AtomicIsize,
}

// SAFETY: each slot has exactly one writer (the producer that wins its
// index), gated by `finalized`; readers only touch a slot after observing
// its flag set with Acquire ordering.
unsafe impl<T: Send> Send for Batch<T> {}
unsafe impl<T: Send> Sync for Batch<T> {}

impl<T> Batch<T> {
    fn new(batch_size: usize) -> Self {
        let mut slots = Vec::with_capacity(batch_size);
        slots.resize_with(batch_size, || UnsafeCell::new(MaybeUninit::uninit()));
        let mut finalized = Vec::with_capacity(batch_size);
        finalized.resize_with(batch_size, || AtomicBool::new(false));
        Self {
            slots: slots.into_boxed_slice(),
            finalized: finalized.into_boxed_slice(),
            reservation: AtomicIsize::new(-1),
            count: AtomicIsize::new(-1),
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claims the next write index. The caller must check the result
    /// against `capacity()` before writing — an out-of-range claim means
    /// this batch is already full or being rotated.
    fn reserve(&self) -> usize {
        let old = self.reservation.fetch_add(1, Ordering::AcqRel);
        (old + 1) as usize
    }

    /// Writes `value` into `index` and publishes it. `index` must have come
    /// from a winning [`Batch::reserve`] call on this batch.
    fn write(&self, index: usize, value: T) {
        // SAFETY: `index` was exclusively claimed by `reserve`; no other
        // party writes this slot.
        unsafe {
            (*self.slots[index].get()).write(value);
        }
        // Full fence: the finalized flag below must not become visible to a
        // reader before the item write above does.
        std::sync::atomic::fence(Ordering::SeqCst);
        self.finalized[index].store(true, Ordering::Release);
    }

    /// Fixes the batch's length, making it readable.
    fn freeze(&self, count: usize) {
        self.count.store(count as isize, Ordering::Release);
    }

    /// The batch's frozen length, or 0 if not yet frozen.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads the item at `index`, spin-waiting if a producer is still
    /// mid-write on a slot reserved before the batch was frozen.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::IndexOutOfRange`] if `index >= len()`.
    pub fn get(&self, index: usize) -> Result<&T, CollectionError> {
        let len = self.len();
        if index >= len {
            return Err(CollectionError::IndexOutOfRange { index, len });
        }
        let mut backoff = Backoff::new();
        while !self.finalized[index].load(Ordering::Acquire) {
            backoff.spin();
        }
        #[cfg(debug_assertions)]
        debug_assert_batch_slot_finalized!(index, self.finalized[index].load(Ordering::Relaxed));
        // SAFETY: `finalized[index]` observed true under Acquire; the
        // producer's full fence before that store makes the write visible.
        Ok(unsafe { (*self.slots[index].get()).assume_init_ref() })
    }
}

impl<T> Drop for Batch<T> {
    fn drop(&mut self) {
        for (slot, flag) in self.slots.iter().zip(self.finalized.iter_mut()) {
            if *flag.get_mut() {
                // SAFETY: `flag` recorded a completed write to `slot`.
                unsafe {
                    (*slot.get()).assume_init_drop();
                }
            }
        }
    }
}

/// Wraps a [`SegmentQueue`] of frozen [`Batch`]es with fixed-size,
/// reservation-based batching on the producer side.
pub struct BatchQueue<T> {
    batch_size: usize,
    current: ArcSwap<Batch<T>>,
    inner: SegmentQueue<Arc<Batch<T>>>,
    metrics: Metrics,
}

impl<T: Send + Sync + 'static> BatchQueue<T> {
    /// Builds a batch queue with the given fixed batch size.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is 0.
    pub fn new(batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        Self {
            batch_size,
            current: ArcSwap::from_pointee(Batch::new(batch_size)),
            inner: SegmentQueue::new(),
            metrics: Metrics::new(),
        }
    }

    /// Diagnostic counters for this batch queue (rotations, etc.).
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Builds a batch queue from a [`crate::config::BatchConfig`].
    pub fn with_config(config: crate::config::BatchConfig) -> Self {
        Self::new(config.batch_size)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Adds `item` to the current batch, rotating to a fresh batch and
    /// publishing the filled one if this call claims the last slot.
    pub fn add(&self, item: T) {
        let mut backoff = Backoff::new();
        loop {
            let batch = self.current.load_full();
            let index = batch.reserve();
            if index >= self.batch_size {
                // Lost the race onto a batch that is already full or being
                // rotated by someone else; reload `current` and retry.
                backoff.spin();
                continue;
            }
            batch.write(index, item);
            if index == self.batch_size - 1 {
                batch.freeze(self.batch_size);
                self.current.store(Arc::new(Batch::new(self.batch_size)));
                self.inner.add(batch);
                self.metrics.record_batch_rotation();
            }
            return;
        }
    }

    /// Forces a rotation of the current batch even if it is not full.
    /// Returns `true`, since an empty or near-complete batch is treated as
    /// a trivial success rather than an error.
    pub fn flush(&self) -> bool {
        loop {
            let batch = self.current.load_full();
            let reserved = batch.reservation.load(Ordering::Acquire);
            if reserved < 0 {
                return true;
            }
            if reserved as usize >= self.batch_size - 1 {
                return true;
            }
            let frozen_count = (reserved + 1) as usize;
            match batch.reservation.compare_exchange(
                reserved,
                self.batch_size as isize,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    batch.freeze(frozen_count);
                    self.current.store(Arc::new(Batch::new(self.batch_size)));
                    self.inner.add(batch);
                    self.metrics.record_batch_rotation();
                    return true;
                }
                Err(_) => continue,
            }
        }
    }

    /// Returns a future resolving to the next frozen batch, or `None` if
    /// `cancel` fires first.
    pub fn take(&self, cancel: CancelSignal) -> TakeFuture<Arc<Batch<T>>> {
        self.inner.take(cancel)
    }

    /// Number of frozen batches currently queued for consumers.
    pub fn count(&self) -> i64 {
        self.inner.count()
    }
}
