//! Lock-free, thread-safe, single-ended producer/consumer containers whose
//! consumers retrieve items asynchronously.
//!
//! # Key Features
//!
//! - Segmented async queue (`queue::SegmentQueue`): a lock-free MPMC queue
//!   whose consumers receive items through async awaiters rather than
//!   blocking, built from fixed-capacity, pooled segments.
//! - Async collection adapter (`adapter::CollectionAdapter`): wraps any
//!   thread-safe producer/consumer container (a `Vec`-backed stack, a
//!   priority-lane store, ...) with the same async-take behavior, via a
//!   signed-balance arbitration protocol.
//! - Exclusive awaiter group / take-from-any (`take_from_any`): wait on
//!   several collections at once and resolve with whichever produces a
//!   value first.
//! - Batch queue (`batch_queue::BatchQueue`) and a timer overlay
//!   (`timer_overlay::TimerOverlay`) for fixed-size, time-bounded batching
//!   on top of the segmented queue.
//!
//! All producer-side operations (`add`) are non-suspending; only the
//! consumer-side deferred returned by `take` may suspend, and its
//! continuation is never invoked on the completing thread.
//!
//! # Example
//!
//! ```ignore
//! use async_collections::queue::SegmentQueue;
//! use async_collections::cancel::CancelSignal;
//!
//! # async fn run() {
//! let queue = SegmentQueue::new();
//! queue.add(42);
//! let value = queue.take(CancelSignal::never()).await;
//! assert_eq!(value, Some(42));
//! # }
//! ```

pub mod adapter;
pub mod awaiter;
pub mod batch_queue;
pub mod cancel;
pub mod collections;
pub mod config;
pub mod error;
pub mod queue;
pub mod take_from_any;
pub mod timer_overlay;

mod backoff;
mod exclusive_group;
mod invariants;
mod metrics;
mod mpmc_fifo;
mod segment;

pub use adapter::CollectionAdapter;
pub use awaiter::{Awaiter, AwaiterFuture};
pub use backoff::Backoff;
pub use batch_queue::{Batch, BatchQueue};
pub use cancel::{CancelHandle, CancelSignal};
pub use collections::{ConcurrentCollection, LifoStack, PriorityLanes};
pub use config::{BatchConfig, GroupConfig, SegmentConfig, TimerConfig};
pub use error::CollectionError;
pub use metrics::{Metrics, Snapshot};
pub use queue::{QueueIter, SegmentQueue, TakeFuture};
pub use take_from_any::take_from_any;
pub use timer_overlay::TimerOverlay;
