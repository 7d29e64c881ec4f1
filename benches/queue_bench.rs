#![allow(missing_docs, clippy::similar_names, clippy::cast_possible_truncation)]

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{runtime::Runtime, task};

// Import queue implementations
use quiver::{
    QueueError,
    block_list::BlockQueue,
    list::ListQueue,
    multi::MultiQueue,
    ring::RingQueue,
    traits::{ConsumerQueue, UnboundedQueue},
};

#[cfg(feature = "dev-profiling")]
mod profiling {
    use criterion::profiler::Profiler;
    use pprof::ProfilerGuard;
    use std::{fs::File, path::Path};

    pub struct FlamegraphProfiler<'a> {
        frequency: i32,
        active_profiler: Option<ProfilerGuard<'a>>,
    }

    impl FlamegraphProfiler<'_> {
        #[allow(dead_code)]
        pub const fn new(frequency: i32) -> Self {
            FlamegraphProfiler {
                frequency,
                active_profiler: None,
            }
        }
    }

    impl Profiler for FlamegraphProfiler<'_> {
        fn start_profiling(&mut self, _benchmark_id: &str, _benchmark_dir: &Path) {
            self.active_profiler = Some(ProfilerGuard::new(self.frequency).unwrap());
        }

        fn stop_profiling(&mut self, _benchmark_id: &str, benchmark_dir: &Path) {
            std::fs::create_dir_all(benchmark_dir).unwrap();
            let flamegraph_path = benchmark_dir.join("flamegraph.svg");
            let flamegraph_file = File::create(&flamegraph_path)
                .expect("File system error while creating flamegraph.svg");

            if let Some(profiler) = self.active_profiler.take() {
                profiler
                    .report()
                    .build()
                    .unwrap()
                    .flamegraph(flamegraph_file)
                    .expect("Error writing flamegraph");
            }
        }
    }
}

/// Single-threaded latency benchmark - measures ns per operation
fn bench_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("latency_ns_per_op");
    group.measurement_time(Duration::from_secs(10));
    group.warm_up_time(Duration::from_secs(3));

    group.bench_function("ring", |b| {
        let queue = RingQueue::with_capacity(1024).unwrap();
        b.iter(|| {
            queue.mp_enqueue(black_box(42u64)).unwrap();
            black_box(queue.mc_dequeue().unwrap());
        });
    });

    group.bench_function("list", |b| {
        let queue = ListQueue::new();
        b.iter(|| {
            queue.mp_enqueue(black_box(42u64));
            black_box(queue.mc_dequeue().unwrap());
        });
    });

    group.bench_function("block_list", |b| {
        let queue = BlockQueue::new();
        b.iter(|| {
            queue.mp_enqueue(black_box(42u64));
            black_box(queue.mc_dequeue().unwrap());
        });
    });

    group.bench_function("multi_list_4shards", |b| {
        let queue: MultiQueue<u64, ListQueue<u64>> = MultiQueue::new(4);
        b.iter(|| {
            queue.mp_enqueue(black_box(42u64));
            black_box(queue.mc_dequeue().unwrap());
        });
    });

    group.finish();
}

/// Multi-threaded throughput benchmark
fn bench_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("throughput_ops_per_sec");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(15));
    group.warm_up_time(Duration::from_secs(5));

    // Test configurations: (producers, consumers, ops_per_producer)
    let configs = vec![
        (1, 1, 100_000), // Single producer/consumer baseline
        (2, 2, 50_000),  // Low contention
        (4, 4, 25_000),  // Medium contention
        (8, 8, 12_500),  // High contention
    ];

    for (producers, consumers, ops_per_producer) in configs {
        let total_ops = producers * ops_per_producer;
        let config_name = format!("{producers}p_{consumers}c");

        group.throughput(Throughput::Elements(total_ops as u64));

        group.bench_with_input(
            BenchmarkId::new("ring", &config_name),
            &(producers, consumers, ops_per_producer),
            |b, &(producers, consumers, ops_per_producer)| {
                b.to_async(&rt).iter(|| async {
                    bench_ring(producers, consumers, ops_per_producer).await;
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("list", &config_name),
            &(producers, consumers, ops_per_producer),
            |b, &(producers, consumers, ops_per_producer)| {
                b.to_async(&rt).iter(|| async {
                    bench_list(producers, consumers, ops_per_producer).await;
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("multi_list_4shards", &config_name),
            &(producers, consumers, ops_per_producer),
            |b, &(producers, consumers, ops_per_producer)| {
                b.to_async(&rt).iter(|| async {
                    bench_multi::<4>(producers, consumers, ops_per_producer).await;
                });
            },
        );

        // Wider sharding only makes sense once there is real contention.
        if producers >= 4 {
            group.bench_with_input(
                BenchmarkId::new("multi_list_8shards", &config_name),
                &(producers, consumers, ops_per_producer),
                |b, &(producers, consumers, ops_per_producer)| {
                    b.to_async(&rt).iter(|| async {
                        bench_multi::<8>(producers, consumers, ops_per_producer).await;
                    });
                },
            );
        }
    }

    group.finish();
}

async fn bench_ring(producers: usize, consumers: usize, ops_per_producer: usize) {
    let queue = Arc::new(RingQueue::with_capacity(262_144).unwrap());

    let total_ops = producers * ops_per_producer;
    let consumed = Arc::new(AtomicUsize::new(0));

    // Spawn producers
    let producer_handles: Vec<_> = (0..producers)
        .map(|_| {
            let queue = queue.clone();
            task::spawn(async move {
                for i in 0..ops_per_producer {
                    loop {
                        match queue.mp_enqueue(i as u64) {
                            Ok(()) => break,
                            Err((_, QueueError::Full)) => task::yield_now().await,
                            Err((_, e)) => panic!("Unexpected queue error: {e:?}"),
                        }
                    }
                }
            })
        })
        .collect();

    // Spawn consumers
    let consumer_handles: Vec<_> = (0..consumers)
        .map(|_| {
            let queue = queue.clone();
            let consumed = consumed.clone();
            task::spawn(async move {
                loop {
                    if consumed.load(Ordering::Relaxed) >= total_ops {
                        break;
                    }

                    match queue.mc_dequeue() {
                        Ok(_) => {
                            consumed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(QueueError::Empty) => task::yield_now().await,
                        Err(e) => panic!("Unexpected queue error: {e:?}"),
                    }
                }
            })
        })
        .collect();

    // Wait for completion
    for handle in producer_handles {
        handle.await.unwrap();
    }

    while consumed.load(Ordering::Relaxed) < total_ops {
        task::yield_now().await;
    }

    for handle in consumer_handles {
        handle.await.unwrap();
    }
}

async fn bench_list(producers: usize, consumers: usize, ops_per_producer: usize) {
    let queue = Arc::new(ListQueue::new());

    let total_ops = producers * ops_per_producer;
    let consumed = Arc::new(AtomicUsize::new(0));

    // Spawn producers
    let producer_handles: Vec<_> = (0..producers)
        .map(|_| {
            let queue = queue.clone();
            task::spawn(async move {
                for i in 0..ops_per_producer {
                    queue.mp_enqueue(i as u64);
                }
            })
        })
        .collect();

    // Spawn consumers
    let consumer_handles: Vec<_> = (0..consumers)
        .map(|_| {
            let queue = queue.clone();
            let consumed = consumed.clone();
            task::spawn(async move {
                loop {
                    if consumed.load(Ordering::Relaxed) >= total_ops {
                        break;
                    }

                    match queue.mc_dequeue_uncontended() {
                        Ok(_) => {
                            consumed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => task::yield_now().await,
                    }
                }
            })
        })
        .collect();

    // Wait for completion
    for handle in producer_handles {
        handle.await.unwrap();
    }

    while consumed.load(Ordering::Relaxed) < total_ops {
        task::yield_now().await;
    }

    for handle in consumer_handles {
        handle.await.unwrap();
    }
}

async fn bench_multi<const SHARDS: usize>(
    producers: usize,
    consumers: usize,
    ops_per_producer: usize,
) {
    let queue: Arc<MultiQueue<u64, ListQueue<u64>>> = Arc::new(MultiQueue::new(SHARDS));

    let total_ops = producers * ops_per_producer;
    let consumed = Arc::new(AtomicUsize::new(0));

    // Spawn producers
    let producer_handles: Vec<_> = (0..producers)
        .map(|_| {
            let queue = queue.clone();
            task::spawn(async move {
                for i in 0..ops_per_producer {
                    queue.mp_enqueue(i as u64);
                }
            })
        })
        .collect();

    // Spawn consumers
    let consumer_handles: Vec<_> = (0..consumers)
        .map(|_| {
            let queue = queue.clone();
            let consumed = consumed.clone();
            task::spawn(async move {
                loop {
                    if consumed.load(Ordering::Relaxed) >= total_ops {
                        break;
                    }

                    match queue.mc_dequeue() {
                        Ok(_) => {
                            consumed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => task::yield_now().await,
                    }
                }
            })
        })
        .collect();

    // Wait for completion
    for handle in producer_handles {
        handle.await.unwrap();
    }

    while consumed.load(Ordering::Relaxed) < total_ops {
        task::yield_now().await;
    }

    for handle in consumer_handles {
        handle.await.unwrap();
    }
}

#[cfg(feature = "dev-profiling")]
criterion_group! {
    name = benches;
    config = Criterion::default()
        .significance_level(0.01)
        .noise_threshold(0.05)
        .with_profiler(profiling::FlamegraphProfiler::new(100));
    targets = bench_latency, bench_throughput
}

#[cfg(not(feature = "dev-profiling"))]
criterion_group!(benches, bench_latency, bench_throughput);

criterion_main!(benches);
