//! Timer overlay (component H): periodically flushes a [`BatchQueue`] on a
//! background task, for producers that want a time-bounded upper latency on
//! partially-filled batches instead of waiting for them to fill.
//!
//! Spawns and tears down its background task the way
//! `ringmpsc-stream::receiver::RingReceiver` owns its `poll_timer: Interval`
//! and `shutdown.rs`'s handles spawn/stop a coordination task, scoped down
//! to a single periodic action instead of a whole stream's lifecycle.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::batch_queue::BatchQueue;
use crate::config::TimerConfig;

/// Owns a periodic timer that calls [`BatchQueue::flush`] at a fixed period.
/// Dropping the overlay stops the timer; it does not affect the batch queue
/// itself, which keeps accepting `add`/`take` calls directly.
pub struct TimerOverlay {
    handle: JoinHandle<()>,
}

impl TimerOverlay {
    /// Spawns a background task that flushes `queue` every `config.period`.
    pub fn new<T>(queue: Arc<BatchQueue<T>>, config: TimerConfig) -> Self
    where
        T: Send + Sync + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(config.period);
            // The first tick fires immediately; skip it so the first flush
            // happens one full period after the overlay starts.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracing::trace!("timer overlay flushing batch queue");
                queue.flush();
            }
        });
        Self { handle }
    }
}

impl Drop for TimerOverlay {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSignal;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn periodic_flush_rotates_a_partial_batch() {
        let queue = Arc::new(BatchQueue::new(8));
        queue.add(1);
        let overlay = TimerOverlay::new(Arc::clone(&queue), TimerConfig::new(Duration::from_millis(10)));

        tokio::time::advance(Duration::from_millis(11)).await;
        tokio::task::yield_now().await;

        let batch = queue.take(CancelSignal::never()).await.unwrap();
        assert_eq!(batch.len(), 1);
        drop(overlay);
    }

    #[tokio::test]
    async fn dropping_overlay_stops_further_flushes() {
        let queue = Arc::new(BatchQueue::new(8));
        let overlay = TimerOverlay::new(Arc::clone(&queue), TimerConfig::new(Duration::from_millis(5)));
        drop(overlay);
        queue.add(1);
        assert_eq!(queue.count(), 0);
    }
}
