//! Benchmarks for the VM scheduler.
//!
//! Benchmarks cover:
//! - Eligible-queue operations (offer/take, duplicate suppression, removal)
//! - Job submission and drain through the full scheduler
//! - Fan-out of jobs across many VMs

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vm_scheduler::config::SchedulerConfig;
use vm_scheduler::core::{
    BindingValue, BoundedDistinctQueue, Entry, EvalError, Evaluator, Job, NoopSink,
    SpeciesRegistry, VmBindings, VmScheduler,
};

// ============================================================================
// Test Evaluator
// ============================================================================

struct EchoEvaluator;

#[async_trait]
impl Evaluator for EchoEvaluator {
    async fn evaluate(
        &mut self,
        source: &str,
        _bindings: &mut VmBindings,
    ) -> Result<BindingValue, EvalError> {
        Ok(BindingValue::String(source.to_owned()))
    }
}

fn build_scheduler(sequencers: usize, max_vms: usize) -> VmScheduler {
    let registry = SpeciesRegistry::new().with("echo", || Box::new(EchoEvaluator));
    VmScheduler::new(
        SchedulerConfig::new()
            .with_max_vms(max_vms)
            .with_max_jobs_per_vm(10_000)
            .with_sequencer_count(sequencers)
            .with_time_slice_ms(10),
        Arc::new(registry),
        Arc::new(NoopSink),
        Arc::new(NoopSink),
    )
    .unwrap()
}

// ============================================================================
// Queue Benchmarks
// ============================================================================

fn bench_queue_offer_take(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_offer_take");

    for size in [100u64, 1_000, 10_000] {
        let items: Vec<Arc<u64>> = (0..size).map(Arc::new).collect();
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &items, |b, items| {
            b.iter(|| {
                let q = BoundedDistinctQueue::new(items.len());
                for item in items {
                    q.offer_distinct(item);
                }
                while !q.is_empty() {
                    if let Entry::Item(item) = q.take() {
                        black_box(item);
                    }
                }
            });
        });
    }
    group.finish();
}

fn bench_queue_duplicate_offers(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_duplicate_offers");

    for size in [10u64, 100, 1_000] {
        let items: Vec<Arc<u64>> = (0..size).map(Arc::new).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &items, |b, items| {
            let q = BoundedDistinctQueue::new(items.len());
            for item in items {
                q.offer_distinct(item);
            }
            b.iter(|| black_box(q.offer_distinct(&items[items.len() - 1])));
        });
    }
    group.finish();
}

fn bench_queue_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_remove");

    for size in [100u64, 1_000] {
        let items: Vec<Arc<u64>> = (0..size).map(Arc::new).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &items, |b, items| {
            b.iter(|| {
                let q = BoundedDistinctQueue::new(items.len());
                for item in items {
                    q.offer_distinct(item);
                }
                for item in items.iter().rev() {
                    black_box(q.remove(item));
                }
            });
        });
    }
    group.finish();
}

// ============================================================================
// Scheduler Benchmarks
// ============================================================================

fn bench_scheduler_single_vm_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_single_vm_drain");
    let scheduler = build_scheduler(1, 1);
    scheduler.spawn("vm", "echo").unwrap();

    for jobs in [10u64, 100, 1_000] {
        group.throughput(Throughput::Elements(jobs));
        group.bench_with_input(BenchmarkId::from_parameter(jobs), &jobs, |b, &jobs| {
            b.iter(|| {
                for _ in 0..jobs {
                    scheduler
                        .schedule_job("vm", Job::with_generated_id("x"))
                        .unwrap();
                }
                black_box(scheduler.drain_timeout(Duration::from_secs(30)));
            });
        });
    }
    group.finish();
    scheduler.shutdown().unwrap();
}

fn bench_scheduler_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_fan_out");
    group.sample_size(20);

    for sequencers in [1usize, 2, 4] {
        let scheduler = build_scheduler(sequencers, 64);
        let vms: Vec<String> = (0..64).map(|i| format!("vm-{i}")).collect();
        for vm in &vms {
            scheduler.spawn(vm, "echo").unwrap();
        }

        group.throughput(Throughput::Elements(640));
        group.bench_with_input(
            BenchmarkId::new("sequencers", sequencers),
            &vms,
            |b, vms| {
                b.iter(|| {
                    for _ in 0..10 {
                        for vm in vms {
                            scheduler
                                .schedule_job(vm, Job::with_generated_id("x"))
                                .unwrap();
                        }
                    }
                    black_box(scheduler.drain_timeout(Duration::from_secs(30)));
                });
            },
        );
        scheduler.shutdown().unwrap();
    }
    group.finish();
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(
    queue_benches,
    bench_queue_offer_take,
    bench_queue_duplicate_offers,
    bench_queue_remove
);

criterion_group!(
    scheduler_benches,
    bench_scheduler_single_vm_drain,
    bench_scheduler_fan_out
);

criterion_main!(queue_benches, scheduler_benches);
