//! One-shot completion handles for pending consumers.
//!
//! An [`Awaiter<T>`] is the handle a consumer leaves behind when it finds no
//! item available. Exactly one of `try_complete_with_value` /
//! `try_complete_with_cancel` may ever win; the loser observes `false` and
//! must retry its own protocol (see `queue.rs`, `adapter.rs`).
//!
//! The continuation registered on the returned future is driven through a
//! [`futures_util::task::AtomicWaker`], the same single-slot waker idiom used
//! for `Notify`-based backpressure elsewhere in this crate's lineage. Waking
//! only enqueues the task on the executor's run queue — it never invokes the
//! consumer's continuation on the producer thread that completed the
//! awaiter.

use std::cell::UnsafeCell;
use std::future::Future;
use std::mem::MaybeUninit;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::task::AtomicWaker;

const PENDING: u8 = 0;
const COMPLETING: u8 = 1;
const VALUE: u8 = 2;
const CANCELED: u8 = 3;

/// A one-shot completion cell shared between the consumer that created it
/// and whichever producer (or group) eventually settles it.
pub struct Awaiter<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
    waker: AtomicWaker,
}

// SAFETY: access to `value` is gated by the `state` CAS protocol below —
// exactly one writer transitions PENDING -> COMPLETING -> VALUE, and readers
// only load the value after observing VALUE.
unsafe impl<T: Send> Send for Awaiter<T> {}
unsafe impl<T: Send> Sync for Awaiter<T> {}

impl<T> Awaiter<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(PENDING),
            value: UnsafeCell::new(MaybeUninit::uninit()),
            waker: AtomicWaker::new(),
        })
    }

    /// Attempts to deliver `value` to the pending consumer.
    ///
    /// Returns `true` if this call won the race (the consumer will observe
    /// `value`); returns `false` if the awaiter was already canceled or
    /// already completed by another party, in which case `value` is
    /// returned to the caller via the `Err` variant so the producer can
    /// retry with it.
    pub fn try_complete_with_value(self: &Arc<Self>, value: T) -> Result<(), T> {
        if self
            .state
            .compare_exchange(PENDING, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(value);
        }
        // SAFETY: we hold the COMPLETING state exclusively; no other party
        // may write `value` until we publish VALUE below.
        unsafe {
            (*self.value.get()).write(value);
        }
        self.state.store(VALUE, Ordering::Release);
        self.waker.wake();
        Ok(())
    }

    /// Attempts to mark the awaiter canceled. Returns `true` if this call
    /// won the race, `false` if the awaiter had already completed (with a
    /// value) or was already canceled.
    pub fn try_complete_with_cancel(self: &Arc<Self>) -> bool {
        if self
            .state
            .compare_exchange(PENDING, CANCELED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.waker.wake();
        true
    }

    /// `true` once the awaiter has reached either terminal state.
    #[inline]
    pub fn is_resolved(&self) -> bool {
        matches!(self.state.load(Ordering::Acquire), VALUE | CANCELED)
    }

    /// Returns a future that resolves to `Some(value)` on completion or
    /// `None` on cancellation.
    pub fn result(self: &Arc<Self>) -> AwaiterFuture<T> {
        AwaiterFuture {
            inner: Arc::clone(self),
        }
    }
}

/// A one-shot completion target that a producer (or group resolution) can
/// hand a value to without knowing whether it is a plain [`Awaiter<T>`] or
/// some other party racing on its own completion protocol, e.g.
/// [`crate::exclusive_group::GroupChild`].
pub(crate) trait Completable<T: 'static>: Send + Sync {
    /// Attempts to deliver `value`. Returns `Err(value)` if this target was
    /// already settled by someone else, so the caller can retry elsewhere.
    fn try_complete_with_value(self: Arc<Self>, value: T) -> Result<(), T>;
}

impl<T: Send + 'static> Completable<T> for Awaiter<T> {
    fn try_complete_with_value(self: Arc<Self>, value: T) -> Result<(), T> {
        Awaiter::try_complete_with_value(&self, value)
    }
}

impl<T> Drop for Awaiter<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == VALUE {
            // SAFETY: VALUE is only reached after a completed write, and no
            // further write happens once VALUE is visible.
            unsafe {
                (*self.value.get()).assume_init_drop();
            }
        }
    }
}

/// The deferred result of a [`Awaiter::take`]-style registration.
pub struct AwaiterFuture<T> {
    inner: Arc<Awaiter<T>>,
}

impl<T> Future for AwaiterFuture<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = &self.inner;
        // Register first so we never miss a wake that races with this poll.
        inner.waker.register(cx.waker());
        match inner.state.load(Ordering::Acquire) {
            VALUE => {
                // SAFETY: VALUE observed under Acquire; the writing
                // Release store happens-before this load.
                let value = unsafe { (*inner.value.get()).assume_init_read() };
                // Prevent Drop from dropping the value a second time: flip
                // to a state Drop does not special-case. CANCELED is unused
                // from here on for this awaiter, so repurpose it as "taken".
                inner.state.store(CANCELED, Ordering::Release);
                Poll::Ready(Some(value))
            }
            CANCELED => Poll::Ready(None),
            _ => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_then_poll_observes_value() {
        let awaiter = Awaiter::new();
        assert!(awaiter.try_complete_with_value(42).is_ok());
        assert!(awaiter.is_resolved());

        let fut = awaiter.result();
        futures::pin_mut!(fut);
        let waker = futures_util::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready(Some(42)));
    }

    #[test]
    fn cancel_then_poll_observes_none() {
        let awaiter: Arc<Awaiter<u32>> = Awaiter::new();
        assert!(awaiter.try_complete_with_cancel());

        let fut = awaiter.result();
        futures::pin_mut!(fut);
        let waker = futures_util::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready(None));
    }

    #[test]
    fn only_one_completion_wins() {
        let awaiter = Awaiter::new();
        assert!(awaiter.try_complete_with_value(1).is_ok());
        assert_eq!(awaiter.try_complete_with_value(2), Err(2));
        assert!(!awaiter.try_complete_with_cancel());
    }

    #[test]
    fn cancel_blocks_later_completion() {
        let awaiter: Arc<Awaiter<u32>> = Awaiter::new();
        assert!(awaiter.try_complete_with_cancel());
        assert_eq!(awaiter.try_complete_with_value(7), Err(7));
    }
}
