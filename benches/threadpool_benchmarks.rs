use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use slotpool::{Config as PoolConfig, MainThreadDispatcher, PoolContext, WorkerPool};
use std::hint::black_box;

// Benchmark 1: submit + ожидание завершения одного задания
fn bench_submit_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_roundtrip");
    let ctx = PoolContext::new();

    for workers in [1, 4, num_cpus::get()] {
        let pool = WorkerPool::with_context(&ctx, PoolConfig::new(workers)).unwrap();

        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, _| {
            b.iter(|| {
                black_box(pool.submit(|| {
                    black_box(42);
                }));
                pool.wait_idle();
            });
        });
    }

    group.finish();
}

// Benchmark 2: заполнение всех воркеров за один проход
fn bench_fill_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill_pool");
    let ctx = PoolContext::new();

    for workers in [2, 8, 16] {
        let pool = WorkerPool::with_context(&ctx, PoolConfig::new(workers)).unwrap();
        group.throughput(Throughput::Elements(workers as u64));

        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &workers| {
            b.iter(|| {
                for i in 0..workers {
                    black_box(pool.submit_tagged(i as u64, move || {
                        black_box(i);
                    }));
                }
                pool.wait_idle();
            });
        });
    }

    group.finish();
}

// Benchmark 3: стоимость cancel_all на простаивающем пуле
fn bench_cancel_idle(c: &mut Criterion) {
    let ctx = PoolContext::new();
    let pool = WorkerPool::with_context(&ctx, PoolConfig::cpu_bound()).unwrap();

    c.bench_function("cancel_all_idle", |b| {
        b.iter(|| pool.cancel_all());
    });
}

// Benchmark 4: очередь главного потока
fn bench_dispatcher(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatcher");

    for size in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("enqueue_drain", size), &size, |b, &size| {
            let dispatcher = MainThreadDispatcher::new();
            b.iter(|| {
                for i in 0..size {
                    dispatcher.enqueue(move || {
                        black_box(i);
                    });
                }
                black_box(dispatcher.drain());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_submit_roundtrip,
    bench_fill_pool,
    bench_cancel_idle,
    bench_dispatcher,
);
criterion_main!(benches);
