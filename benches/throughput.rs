use async_collections::{BatchQueue, CancelSignal, CollectionAdapter, LifoStack, SegmentQueue};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tokio::runtime::Runtime;

const MSG_PER_PRODUCER: u64 = 100_000;

fn rt() -> Runtime {
    tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap()
}

fn bench_spsc_segment_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc_segment_queue");
    group.throughput(Throughput::Elements(MSG_PER_PRODUCER));

    group.bench_function("single_producer_consumer", |b| {
        b.to_async(rt()).iter(|| async {
            let queue = Arc::new(SegmentQueue::<u64>::new());
            let producer = {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    for i in 0..MSG_PER_PRODUCER {
                        queue.add(i);
                    }
                })
            };

            let mut received = 0u64;
            while received < MSG_PER_PRODUCER {
                if let Some(item) = queue.take(CancelSignal::never()).await {
                    black_box(item);
                    received += 1;
                }
            }
            producer.await.unwrap();
        });
    });

    group.finish();
}

fn bench_mpmc_segment_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpmc_segment_queue");

    for num_producers in [2, 4, 8].iter() {
        let total_msgs = MSG_PER_PRODUCER * (*num_producers as u64);
        group.throughput(Throughput::Elements(total_msgs));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{num_producers}P_1C")),
            num_producers,
            |b, &n| {
                b.to_async(rt()).iter(|| async move {
                    let queue = Arc::new(SegmentQueue::<u64>::new());
                    let mut producers = Vec::new();
                    for _ in 0..n {
                        let queue = Arc::clone(&queue);
                        producers.push(tokio::spawn(async move {
                            for i in 0..MSG_PER_PRODUCER {
                                queue.add(i);
                            }
                        }));
                    }

                    let target = MSG_PER_PRODUCER * (n as u64);
                    let mut received = 0u64;
                    while received < target {
                        if let Some(item) = queue.take(CancelSignal::never()).await {
                            black_box(item);
                            received += 1;
                        }
                    }
                    for producer in producers {
                        producer.await.unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_adapter_over_lifo_stack(c: &mut Criterion) {
    let mut group = c.benchmark_group("adapter");
    group.throughput(Throughput::Elements(MSG_PER_PRODUCER));

    group.bench_function("lifo_stack_round_trip", |b| {
        b.to_async(rt()).iter(|| async {
            let adapter = Arc::new(CollectionAdapter::new(LifoStack::<u64>::new()));
            let producer = {
                let adapter = Arc::clone(&adapter);
                tokio::spawn(async move {
                    for i in 0..MSG_PER_PRODUCER {
                        adapter.add(i);
                    }
                })
            };

            let mut received = 0u64;
            while received < MSG_PER_PRODUCER {
                if let Some(item) = adapter.take(CancelSignal::never()).await {
                    black_box(item);
                    received += 1;
                }
            }
            producer.await.unwrap();
        });
    });

    group.finish();
}

fn bench_batch_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_queue");
    group.throughput(Throughput::Elements(MSG_PER_PRODUCER));

    for batch_size in [16, 64, 256, 1024].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("batch_{batch_size}")),
            batch_size,
            |b, &batch_size| {
                b.to_async(rt()).iter(|| async move {
                    let queue = Arc::new(BatchQueue::<u64>::new(batch_size));
                    let producer = {
                        let queue = Arc::clone(&queue);
                        tokio::spawn(async move {
                            for i in 0..MSG_PER_PRODUCER {
                                queue.add(i);
                            }
                            queue.flush();
                        })
                    };

                    let mut received = 0u64;
                    while received < MSG_PER_PRODUCER {
                        if let Some(batch) = queue.take(CancelSignal::never()).await {
                            received += batch.len() as u64;
                            black_box(&batch);
                        }
                    }
                    producer.await.unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_spsc_segment_queue,
    bench_mpmc_segment_queue,
    bench_adapter_over_lifo_stack,
    bench_batch_sizes
);
criterion_main!(benches);
