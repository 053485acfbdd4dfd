//! Exclusive awaiter group (component E): lets one consumer wait on several
//! adapters at once and resolve with the first one that produces a value.
//!
//! A group starts `Locked` so that no child can settle while the caller is
//! still registering the rest of the set — children become reachable by
//! producers the moment their adapter's `take` returns, which can be before
//! every child has even been created. `unlock()` opens the group for
//! resolution once registration is complete; cancellation can pre-empt that
//! at any point before a child wins. Mirrors the CAS-guarded one-time-state
//! transition idiom of `ringmpsc-stream/src/shutdown.rs`'s `ShutdownState`,
//! generalized from two booleans to a four-state machine that also carries
//! a winning index.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::task::AtomicWaker;

use crate::awaiter::Completable;
use crate::invariants::debug_assert_group_resolved_once;
use crate::metrics::Metrics;
use crate::segment::Bitset32;

const LOCKED: u8 = 0;
const UNLOCKED: u8 = 1;
const TAKEN: u8 = 254;
const CANCELED: u8 = 255;
/// Resolved states encode the winning child index as `RESOLVED_BASE + index`.
const RESOLVED_BASE: u8 = 2;

/// Shared state for a `take_from_any` registration.
pub(crate) struct ExclusiveGroup<T> {
    state: AtomicU8,
    slot: UnsafeCell<MaybeUninit<T>>,
    waker: AtomicWaker,
    created: Bitset32,
    metrics: Metrics,
}

// SAFETY: `slot` is only written by the single party that wins the CAS to a
// RESOLVED state, and only read after that transition is observed.
unsafe impl<T: Send> Send for ExclusiveGroup<T> {}
unsafe impl<T: Send> Sync for ExclusiveGroup<T> {}

impl<T> ExclusiveGroup<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(LOCKED),
            slot: UnsafeCell::new(MaybeUninit::uninit()),
            waker: AtomicWaker::new(),
            created: Bitset32::new(),
            metrics: Metrics::new(),
        })
    }

    /// Builds the `index`-th child completion handle.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not in `0..32`.
    pub(crate) fn create_awaiter(self: &Arc<Self>, index: usize) -> Arc<GroupChild<T>> {
        assert!(index < 32, "exclusive group supports at most 32 members");
        self.created.set(index as u32);
        Arc::new(GroupChild {
            group: Arc::clone(self),
            index,
        })
    }

    /// Opens the group for resolution. A no-op if cancellation already won.
    pub(crate) fn unlock(&self) {
        let _ = self
            .state
            .compare_exchange(LOCKED, UNLOCKED, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Cancels the group. Returns `true` if this call won the race.
    pub(crate) fn cancel(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current != LOCKED && current != UNLOCKED {
                return false;
            }
            if self
                .state
                .compare_exchange(current, CANCELED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.waker.wake();
                return true;
            }
        }
    }

    fn try_resolve(&self, index: usize, value: T) -> Result<(), T> {
        let target = RESOLVED_BASE + index as u8;
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current != LOCKED && current != UNLOCKED {
                return Err(value);
            }
            if self
                .state
                .compare_exchange(current, target, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // `current` was LOCKED or UNLOCKED (checked above), so this
                // CAS is the first and only write to the completion slot.
                #[cfg(debug_assertions)]
                debug_assert_group_resolved_once!(false);
                // SAFETY: we hold the exclusive resolution slot; no other
                // party may write `slot` since `state` left LOCKED/UNLOCKED.
                unsafe {
                    (*self.slot.get()).write(value);
                }
                self.waker.wake();
                self.metrics.record_group_resolution();
                return Ok(());
            }
        }
    }

    fn poll(&self, cx: &mut Context<'_>) -> Poll<Option<(T, usize)>> {
        self.waker.register(cx.waker());
        let state = self.state.load(Ordering::Acquire);
        if state == CANCELED || state == TAKEN {
            return Poll::Ready(None);
        }
        if state >= RESOLVED_BASE {
            let index = (state - RESOLVED_BASE) as usize;
            // SAFETY: RESOLVED states are reached only after `slot` is
            // written under the CAS in `try_resolve`, with Release ordering
            // visible via this Acquire load.
            let value = unsafe { (*self.slot.get()).assume_init_read() };
            self.state.store(TAKEN, Ordering::Release);
            return Poll::Ready(Some((value, index)));
        }
        Poll::Pending
    }
}

impl<T> Drop for ExclusiveGroup<T> {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if state >= RESOLVED_BASE && state != TAKEN && state != CANCELED {
            // SAFETY: a RESOLVED state that was never polled to completion
            // still holds its written value.
            unsafe {
                (*self.slot.get_mut()).assume_init_drop();
            }
        }
    }
}

/// One member's completion handle within an [`ExclusiveGroup`].
pub(crate) struct GroupChild<T> {
    group: Arc<ExclusiveGroup<T>>,
    index: usize,
}

impl<T: Send + 'static> Completable<T> for GroupChild<T> {
    fn try_complete_with_value(self: Arc<Self>, value: T) -> Result<(), T> {
        self.group.try_resolve(self.index, value)
    }
}

/// The deferred result of a `take_from_any` registration: resolves to the
/// winning `(value, index)` pair, or `None` if cancelled first.
pub(crate) struct GroupFuture<T> {
    group: Arc<ExclusiveGroup<T>>,
}

impl<T> GroupFuture<T> {
    pub(crate) fn new(group: Arc<ExclusiveGroup<T>>) -> Self {
        Self { group }
    }
}

impl<T> std::future::Future for GroupFuture<T> {
    type Output = Option<(T, usize)>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.group.poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::task::noop_waker;

    #[test]
    fn first_child_to_resolve_wins() {
        let group = ExclusiveGroup::new();
        let a = group.create_awaiter(0);
        let b = group.create_awaiter(1);
        group.unlock();

        assert!(Arc::clone(&a).try_complete_with_value(10).is_ok());
        assert_eq!(Arc::clone(&b).try_complete_with_value(20), Err(20));

        let mut fut = GroupFuture::new(Arc::clone(&group));
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let polled = Pin::new(&mut fut).poll(&mut cx);
        assert_eq!(polled, Poll::Ready(Some((10, 0))));
    }

    #[test]
    fn locked_group_rejects_resolution_before_unlock() {
        let group = ExclusiveGroup::new();
        let a = group.create_awaiter(0);
        assert_eq!(Arc::clone(&a).try_complete_with_value(1), Err(1));
    }

    #[test]
    fn cancel_before_any_resolution_wins() {
        let group = ExclusiveGroup::new();
        let a = group.create_awaiter(0);
        group.unlock();
        assert!(group.cancel());
        assert_eq!(Arc::clone(&a).try_complete_with_value(5), Err(5));

        let mut fut = GroupFuture::new(Arc::clone(&group));
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert_eq!(Pin::new(&mut fut).poll(&mut cx), Poll::Ready(None));
    }

    #[test]
    fn cancel_after_resolution_has_no_effect() {
        let group = ExclusiveGroup::new();
        let a = group.create_awaiter(0);
        group.unlock();
        assert!(Arc::clone(&a).try_complete_with_value(7).is_ok());
        assert!(!group.cancel());
    }
}
