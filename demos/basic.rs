//! Walks through the library's surface: a segmented queue used directly,
//! the collection adapter wrapping a plain stack, take-from-any across
//! several adapters, and a batch queue with a timer overlay.

use std::sync::Arc;
use std::time::Duration;

use async_collections::{
    take_from_any, BatchQueue, CancelSignal, CollectionAdapter, LifoStack, SegmentQueue,
    TimerConfig, TimerOverlay,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    segment_queue_roundtrip().await;
    adapter_over_a_stack().await;
    first_collection_to_fill_wins().await;
    batching_with_a_background_flush().await;
}

async fn segment_queue_roundtrip() {
    let queue = SegmentQueue::new();
    queue.add(1);
    queue.add(2);
    queue.add(3);
    while let Some(item) = queue.take(CancelSignal::never()).await {
        println!("segment queue yielded {item}");
    }
}

async fn adapter_over_a_stack() {
    let adapter = Arc::new(CollectionAdapter::new(LifoStack::new()));
    let waiting = {
        let adapter = Arc::clone(&adapter);
        tokio::spawn(async move { adapter.take(CancelSignal::never()).await })
    };
    tokio::task::yield_now().await;
    adapter.add("late arrival");
    println!("adapter delivered {:?}", waiting.await.unwrap());
}

async fn first_collection_to_fill_wins() {
    let adapters: Vec<CollectionAdapter<u32, LifoStack<u32>>> =
        (0..3).map(|_| CollectionAdapter::new(LifoStack::new())).collect();
    let adapters = Arc::new(adapters);

    let waiting = {
        let adapters = Arc::clone(&adapters);
        tokio::spawn(async move { take_from_any(&adapters, CancelSignal::never()).await })
    };
    tokio::task::yield_now().await;
    adapters[1].add(99);

    match waiting.await.unwrap() {
        Ok((value, index)) => println!("collection {index} produced {value} first"),
        Err(err) => println!("take_from_any failed: {err}"),
    }
}

async fn batching_with_a_background_flush() {
    let queue = Arc::new(BatchQueue::new(16));
    queue.add(1);
    queue.add(2);
    queue.add(3);

    let overlay = TimerOverlay::new(Arc::clone(&queue), TimerConfig::new(Duration::from_millis(50)));
    if let Some(batch) = queue.take(CancelSignal::never()).await {
        println!("flushed a partial batch of {} items", batch.len());
    }
    drop(overlay);
}
