//! Cancel-aware awaiter construction.
//!
//! Pairs an [`Awaiter<T>`] with an external cancellation signal: a oneshot
//! receiver (or any future resolving to `()`) that, once ready, cancels the
//! awaiter if it has not already completed. Mirrors the oneshot-plus-Notify
//! shutdown plumbing this crate's lineage uses for graceful teardown, scoped
//! down to a single awaiter instead of a whole channel.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::awaiter::Awaiter;

/// A cancellation signal: resolves once, after which any awaiter wired to it
/// should be treated as cancelled.
pub struct CancelSignal {
    rx: oneshot::Receiver<()>,
}

impl CancelSignal {
    pub fn new() -> (CancelHandle, Self) {
        let (tx, rx) = oneshot::channel();
        (CancelHandle { tx: Some(tx) }, Self { rx })
    }

    /// A signal that never fires — for callers with no cancellation need.
    pub fn never() -> Self {
        let (_handle, signal) = Self::new();
        signal
    }
}

/// The triggering half of a [`CancelSignal`].
pub struct CancelHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl CancelHandle {
    /// Fires the signal. Idempotent: a second call is a no-op.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Builds an awaiter pre-wired to `signal`: once `signal` resolves, the
/// awaiter is cancelled unless it has already completed with a value.
///
/// If `signal` is already resolved (a pre-cancelled token), the awaiter is
/// completed synchronously before this function returns, so callers never
/// observe a `Pending` awaiter for an already-cancelled registration.
pub fn cancel_aware_awaiter<T>(signal: CancelSignal) -> Arc<Awaiter<T>>
where
    T: Send + 'static,
{
    let awaiter = Awaiter::new();

    match signal.rx.try_recv() {
        Ok(()) | Err(oneshot::error::TryRecvError::Closed) => {
            awaiter.try_complete_with_cancel();
            awaiter
        }
        Err(oneshot::error::TryRecvError::Empty) => {
            let watched = Arc::clone(&awaiter);
            tokio::spawn(async move {
                let _ = signal.rx.await;
                watched.try_complete_with_cancel();
            });
            awaiter
        }
    }
}

/// Wires an arbitrary cancellation effect to `signal`: `on_cancel` runs once
/// `signal` fires. If `signal` is already resolved, `on_cancel` runs
/// synchronously before this function returns, matching
/// [`cancel_aware_awaiter`]'s treatment of a pre-cancelled token.
///
/// Used by [`crate::take_from_any`] to cancel an
/// [`crate::exclusive_group::ExclusiveGroup`], which settles via its own CAS
/// protocol rather than an [`Awaiter`]'s.
pub(crate) fn watch_cancellation<F>(signal: CancelSignal, on_cancel: F)
where
    F: FnOnce() + Send + 'static,
{
    match signal.rx.try_recv() {
        Ok(()) | Err(oneshot::error::TryRecvError::Closed) => on_cancel(),
        Err(oneshot::error::TryRecvError::Empty) => {
            tokio::spawn(async move {
                let _ = signal.rx.await;
                on_cancel();
            });
        }
    }
}

/// Wraps an arbitrary future as a cancellation signal, for callers that
/// don't need a [`CancelHandle`] (e.g. a `tokio_util`-style token's
/// `cancelled()` future).
pub fn cancel_aware_awaiter_from_future<T, F>(signal: F) -> Arc<Awaiter<T>>
where
    T: Send + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let awaiter = Awaiter::new();
    let watched = Arc::clone(&awaiter);
    tokio::spawn(async move {
        signal.await;
        watched.try_complete_with_cancel();
    });
    awaiter
}
