//! End-to-end tests exercising the segmented queue, the collection adapter,
//! take-from-any, and batching across a real multi-threaded tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use async_collections::{
    take_from_any, BatchQueue, CancelSignal, CollectionAdapter, LifoStack, SegmentQueue,
    TimerConfig, TimerOverlay,
};

#[tokio::test]
async fn many_producers_one_consumer_segment_queue() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: u64 = 2_000;

    let queue = Arc::new(SegmentQueue::new());
    let mut handles = Vec::new();
    for producer in 0..PRODUCERS {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move {
            for i in 0..PER_PRODUCER {
                queue.add((producer, i));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut seen = vec![0u64; PRODUCERS];
    let mut total = 0usize;
    while total < PRODUCERS * PER_PRODUCER as usize {
        if let Some((producer, value)) = queue.take(CancelSignal::never()).await {
            assert_eq!(value, seen[producer], "out-of-order delivery within producer {producer}");
            seen[producer] += 1;
            total += 1;
        }
    }
    assert!(seen.iter().all(|&count| count == PER_PRODUCER));
}

#[tokio::test]
async fn waiting_consumers_are_resolved_in_registration_order_per_adapter() {
    let adapter = Arc::new(CollectionAdapter::new(LifoStack::new()));
    let mut consumers = Vec::new();
    for _ in 0..4 {
        let adapter = Arc::clone(&adapter);
        consumers.push(tokio::spawn(async move {
            adapter.take(CancelSignal::never()).await
        }));
    }
    tokio::task::yield_now().await;
    for i in 0..4 {
        adapter.add(i);
    }
    let mut results: Vec<u32> = Vec::new();
    for consumer in consumers {
        results.push(consumer.await.unwrap().unwrap());
    }
    results.sort_unstable();
    assert_eq!(results, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn take_from_any_picks_up_whichever_collection_fills_first() {
    let adapters: Vec<CollectionAdapter<u32, LifoStack<u32>>> =
        (0..3).map(|_| CollectionAdapter::new(LifoStack::new())).collect();
    let adapters = Arc::new(adapters);

    let waiter = {
        let adapters = Arc::clone(&adapters);
        tokio::spawn(async move { take_from_any(&adapters, CancelSignal::never()).await })
    };
    tokio::task::yield_now().await;
    adapters[2].add(7);

    let (value, index) = waiter.await.unwrap().unwrap();
    assert_eq!((value, index), (7, 2));
}

#[tokio::test]
async fn batch_queue_rotation_and_flush_round_trip() {
    let queue = BatchQueue::new(4);
    for i in 0..10u32 {
        queue.add(i);
    }
    // Two full batches have rotated; one partial batch of 2 remains.
    assert!(queue.flush());
    assert_eq!(queue.count(), 3);

    let mut collected = Vec::new();
    for _ in 0..3 {
        let batch = queue.take(CancelSignal::never()).await.unwrap();
        for i in 0..batch.len() {
            collected.push(*batch.get(i).unwrap());
        }
    }
    assert_eq!(collected, (0..10).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn timer_overlay_flushes_partial_batches_on_schedule() {
    let queue = Arc::new(BatchQueue::new(16));
    queue.add(1);
    queue.add(2);
    assert_eq!(queue.count(), 0, "batch should still be open before the timer fires");

    let overlay = TimerOverlay::new(Arc::clone(&queue), TimerConfig::new(Duration::from_millis(20)));
    tokio::time::advance(Duration::from_millis(21)).await;
    tokio::task::yield_now().await;

    let batch = queue.take(CancelSignal::never()).await.unwrap();
    assert_eq!(batch.len(), 2);
    drop(overlay);
}

#[tokio::test]
async fn cancelling_a_take_lets_a_later_producer_win_the_slot() {
    let queue = SegmentQueue::new();
    let (mut handle, signal) = CancelSignal::new();
    let pending = queue.take(signal);
    handle.cancel();
    assert_eq!(pending.await, None);

    queue.add(99);
    assert_eq!(queue.take(CancelSignal::never()).await, Some(99));
}
