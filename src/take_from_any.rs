//! Take-from-any (component F): waits on several adapters at once and
//! resolves with whichever produces a value first, preferring earlier
//! indices when more than one already has an item resident.

use crate::adapter::CollectionAdapter;
use crate::cancel::CancelSignal;
use crate::collections::ConcurrentCollection;
use crate::error::CollectionError;
use crate::exclusive_group::{ExclusiveGroup, GroupFuture};

/// Waits on `adapters` and resolves to `(value, index)` for the first one to
/// produce an item, or [`CollectionError::Canceled`] if `cancel` fires
/// first.
///
/// # Errors
///
/// Returns [`CollectionError::InvalidArgument`] if `adapters` is empty or
/// has more than 32 entries, and [`CollectionError::Canceled`] if `cancel`
/// wins the race before any adapter produces a value.
pub async fn take_from_any<T, C>(
    adapters: &[CollectionAdapter<T, C>],
    cancel: CancelSignal,
) -> Result<(T, usize), CollectionError>
where
    T: Send + 'static,
    C: ConcurrentCollection<T>,
{
    if adapters.is_empty() || adapters.len() > 32 {
        return Err(CollectionError::InvalidArgument(
            "take_from_any requires between 1 and 32 collections",
        ));
    }

    // Fast pre-pass in priority (array index) order: if any collection
    // already has an item resident, take it without ever creating a group
    // or registering an awaiter anywhere.
    for (index, adapter) in adapters.iter().enumerate() {
        if let Some(item) = adapter.try_take_now() {
            return Ok((item, index));
        }
    }

    let group = ExclusiveGroup::new();
    for (index, adapter) in adapters.iter().enumerate() {
        let child = group.create_awaiter(index);
        adapter.register(child);
    }
    group.unlock();

    let cancel_target = std::sync::Arc::clone(&group);
    crate::cancel::watch_cancellation(cancel, move || {
        cancel_target.cancel();
    });

    match GroupFuture::new(group).await {
        Some((value, index)) => Ok((value, index)),
        None => Err(CollectionError::Canceled),
    }
}
