//! Counter increment benchmarks
//!
//! | Benchmark | Path |
//! |-----------|------|
//! | single_thread/norec | NOrec engine directly |
//! | single_thread/hybrid_emulated | Hybrid runtime over the emulated HTM |
//! | single_thread/hybrid_no_htm | Hybrid runtime stuck in software |
//! | contended/* | 4 threads on one counter |
//!
//! ```bash
//! cargo bench --bench counter
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hytm_htm::{EmulatedHtm, HtmCapability, NoHtm};
use hytm_hybrid::{HybridConfig, HybridRuntime};
use hytm_norec::{Norec, NorecConfig};
use hytm_primitives::{TmWord, FULL_MASK};
use std::time::Duration;

const THREADS: usize = 4;
const PER_THREAD: u64 = 1_000;

fn single_thread_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_thread");
    group.throughput(Throughput::Elements(1));

    group.bench_function("norec", |b| {
        let norec = Norec::new(NorecConfig::default());
        let mut ctx = norec.thread_context();
        let counter = TmWord::new(0);
        b.iter(|| {
            norec.atomically(&mut ctx, |tx| {
                let v = tx.read(&counter, FULL_MASK)?;
                tx.write(&counter, v + 1, FULL_MASK);
                Ok(())
            })
        });
        black_box(counter.get());
    });

    group.bench_function("hybrid_emulated", |b| {
        let runtime = HybridRuntime::new(EmulatedHtm::new(), HybridConfig::default())
            .expect("default config is valid");
        let mut worker = runtime.worker();
        let counter = TmWord::new(0);
        b.iter(|| {
            worker.atomically(|tx| {
                let v = tx.read(&counter, FULL_MASK)?;
                tx.write(&counter, v + 1, FULL_MASK)
            })
        });
        black_box(counter.get());
    });

    group.bench_function("hybrid_no_htm", |b| {
        let runtime =
            HybridRuntime::new(NoHtm, HybridConfig::default()).expect("default config is valid");
        let mut worker = runtime.worker();
        let counter = TmWord::new(0);
        b.iter(|| {
            worker.atomically(|tx| {
                let v = tx.read(&counter, FULL_MASK)?;
                tx.write(&counter, v + 1, FULL_MASK)
            })
        });
        black_box(counter.get());
    });

    group.finish();
}

fn contended_run<H: HtmCapability>(runtime: &HybridRuntime<H>, counter: &TmWord) {
    std::thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let mut worker = runtime.worker();
                hytm_metrics::timed!(runtime.metrics(), "bench.thread_ticks", {
                    for _ in 0..PER_THREAD {
                        worker.atomically(|tx| {
                            let v = tx.read(counter, FULL_MASK)?;
                            tx.write(counter, v + 1, FULL_MASK)
                        });
                    }
                })
            });
        }
    });
}

fn contended_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended");
    group.throughput(Throughput::Elements(THREADS as u64 * PER_THREAD));

    group.bench_with_input(BenchmarkId::new("hybrid", "emulated"), &(), |b, _| {
        let runtime = HybridRuntime::new(EmulatedHtm::new(), HybridConfig::default())
            .expect("default config is valid");
        let counter = TmWord::new(0);
        b.iter(|| contended_run(&runtime, &counter));
    });

    group.bench_with_input(BenchmarkId::new("hybrid", "no_htm"), &(), |b, _| {
        let runtime =
            HybridRuntime::new(NoHtm, HybridConfig::default()).expect("default config is valid");
        let counter = TmWord::new(0);
        b.iter(|| contended_run(&runtime, &counter));
    });

    group.bench_function("norec", |b| {
        let norec = Norec::new(NorecConfig::default());
        let counter = TmWord::new(0);
        b.iter(|| {
            std::thread::scope(|s| {
                for _ in 0..THREADS {
                    s.spawn(|| {
                        let mut ctx = norec.thread_context();
                        for _ in 0..PER_THREAD {
                            norec.atomically(&mut ctx, |tx| {
                                let v = tx.read(&counter, FULL_MASK)?;
                                tx.write(&counter, v + 1, FULL_MASK);
                                Ok(())
                            });
                        }
                    });
                }
            })
        });
    });

    group.finish();
}

criterion_group!(
    name = single;
    config = Criterion::default().measurement_time(Duration::from_secs(5));
    targets = single_thread_benchmarks
);

criterion_group!(
    name = contended;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(20);
    targets = contended_benchmarks
);

criterion_main!(single, contended);
