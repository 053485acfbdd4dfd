//! Debug assertion macros for this crate's concurrency invariants.
//!
//! These macros provide runtime checks only in debug builds
//! (`#[cfg(debug_assertions)]`), so there is zero overhead in release builds.

// =============================================================================
// INV-SLOT-01: Monotonic claim indices
// =============================================================================

/// Assert a per-segment claim counter only ever moves forward.
///
/// **Invariant**: each fetch-add of `item_index`/`awaiter_index` yields a
/// strictly increasing sequence of claims.
///
/// Used in: `Segment::claim_item`, `Segment::claim_awaiter`.
macro_rules! debug_assert_monotonic_claim {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new > $old,
            "INV-SLOT-01 violated: {} claim did not advance ({} -> {})",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// INV-SLOT-02: Balanced count/awaiter_count
// =============================================================================

/// Assert that a queue never observes both a positive item count and a
/// positive awaiter count simultaneously at a quiescent snapshot.
///
/// **Invariant**: `count * awaiter_count == 0`
///
/// Used in: `SegmentQueue::count`/`awaiter_count` debug-only cross-checks,
/// property tests.
macro_rules! debug_assert_count_awaiter_exclusive {
    ($count:expr, $awaiter_count:expr) => {
        debug_assert!(
            $count == 0 || $awaiter_count == 0,
            "INV-SLOT-02 violated: count {} and awaiter_count {} both positive",
            $count,
            $awaiter_count
        )
    };
}

// =============================================================================
// INV-POOL-01: Segment clean before reuse
// =============================================================================

/// Assert a segment popped from the pool has had its claim counters reset
/// before being linked back into the chain.
///
/// **Invariant**: pooled segments are reset to the "fresh" state
/// (`item_index == awaiter_index == -1`) before being exposed to producers.
///
/// Used in: `SegmentPool::acquire`.
macro_rules! debug_assert_segment_reset {
    ($item_index:expr, $awaiter_index:expr) => {
        debug_assert!(
            $item_index == -1 && $awaiter_index == -1,
            "INV-POOL-01 violated: reused segment not reset (item_index={}, awaiter_index={})",
            $item_index,
            $awaiter_index
        )
    };
}

// =============================================================================
// INV-GROUP-01: At-most-one group completion
// =============================================================================

/// Assert an exclusive awaiter group's completion slot is written at most
/// once.
///
/// **Invariant**: exactly one of {a child completion, cancellation} ever
/// publishes to the group's completion slot.
///
/// Used in: `ExclusiveGroup::try_resolve`.
macro_rules! debug_assert_group_resolved_once {
    ($already_resolved:expr) => {
        debug_assert!(
            !$already_resolved,
            "INV-GROUP-01 violated: group completion slot written more than once"
        )
    };
}

// =============================================================================
// INV-BATCH-01: Finalized flag precedes read
// =============================================================================

/// Assert that every index below a batch's frozen count is finalized before
/// being read.
///
/// **Invariant**: `finalized[i] == true` for all `i < count` once the batch
/// has been published.
///
/// Used in: `Batch::get`.
macro_rules! debug_assert_batch_slot_finalized {
    ($index:expr, $finalized:expr) => {
        debug_assert!(
            $finalized,
            "INV-BATCH-01 violated: reading unfinalized batch slot {}",
            $index
        )
    };
}

pub(crate) use debug_assert_batch_slot_finalized;
pub(crate) use debug_assert_count_awaiter_exclusive;
pub(crate) use debug_assert_group_resolved_once;
pub(crate) use debug_assert_monotonic_claim;
pub(crate) use debug_assert_segment_reset;
