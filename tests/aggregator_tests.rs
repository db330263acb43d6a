// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Aggregator Tests
//!
//! Recomputation is driven by a real [`Scheduler`] on tokio's paused clock;
//! with a 100ms delay and interval, ticks land at 100ms, 200ms, 300ms, ...

use perfdrive::{AggregatorSettings, PerformanceAggregator, Scheduler};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn settings() -> AggregatorSettings {
    AggregatorSettings::default()
        .with_initial_delay(ms(100))
        .with_interval(ms(100))
}

#[tokio::test(start_paused = true)]
async fn test_ticks_derive_throughput_and_averages() {
    init_logger();
    let aggregator = PerformanceAggregator::new("perf", settings(), Scheduler::new()).unwrap();
    assert!(aggregator.start().unwrap());
    assert!(!aggregator.start().unwrap());
    assert!(aggregator.is_running());

    for rt in [10.0, 20.0, 30.0, 40.0, 50.0] {
        aggregator.increment_key_count("k", rt);
    }
    sleep(ms(150)).await;
    let first = aggregator.key_performance("k").unwrap();
    assert_eq!(first.total_count, 5);
    assert_eq!(first.throughput, 5);
    assert_eq!(first.average_throughput, 5);
    assert!((first.rt - 30.0).abs() < 1e-9);

    for _ in 0..7 {
        aggregator.increment_key_count("k", 60.0);
    }
    sleep(ms(100)).await;
    let second = aggregator.key_performance("k").unwrap();
    assert_eq!(second.total_count, 12);
    assert_eq!(second.throughput, 7);
    assert_eq!(second.average_throughput, 6);
    assert!((second.rt - 60.0).abs() < 1e-9);
    assert!((second.average_rt - 570.0 / 12.0).abs() < 1e-9);

    // an idle tick neither dilutes the average nor resets rt
    sleep(ms(100)).await;
    let idle = aggregator.key_performance("k").unwrap();
    assert_eq!(idle.throughput, 0);
    assert_eq!(idle.average_throughput, 6);
    assert!((idle.rt - 60.0).abs() < 1e-9);

    assert!(aggregator.stop());
    assert!(!aggregator.stop());
    assert!(!aggregator.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_average_throughput_over_positive_ticks() {
    init_logger();
    let aggregator = PerformanceAggregator::new(
        "perf",
        settings().with_auto_logging(false),
        Scheduler::new(),
    )
    .unwrap();
    aggregator.start().unwrap();

    let mut rng = rand::rng();
    let mut total = 0u64;
    let mut positive_ticks = 0u64;
    sleep(ms(50)).await;
    for _ in 0..8 {
        // about half the ticks see no traffic
        let burst: u64 = if rng.random_bool(0.5) { rng.random_range(1..50) } else { 0 };
        for _ in 0..burst {
            aggregator.increment_key_count("k", rng.random_range(0.1..100.0));
        }
        total += burst;
        if burst > 0 {
            positive_ticks += 1;
        }
        sleep(ms(100)).await;

        if positive_ticks > 0 {
            let snapshot = aggregator.key_performance("k").unwrap();
            assert_eq!(snapshot.total_count, total);
            assert_eq!(snapshot.throughput, burst);
            assert_eq!(snapshot.average_throughput, total / positive_ticks);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_are_not_lost() {
    init_logger();
    let aggregator = PerformanceAggregator::new(
        "perf",
        AggregatorSettings::default().with_auto_logging(false),
        Scheduler::new(),
    )
    .unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let aggregator = aggregator.clone();
            tokio::spawn(async move {
                for i in 0..1_000 {
                    aggregator.increment_key_count("shared", 1.0);
                    if i % 100 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(aggregator.key_total_count("shared"), Some(8_000));
}

#[tokio::test(start_paused = true)]
async fn test_handler_stops_recompute_at_target() {
    init_logger();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let aggregator = PerformanceAggregator::new(
        "perf",
        settings().with_snapshot_handler(move |ctx| {
            counted.fetch_add(1, Ordering::SeqCst);
            if ctx.snapshot().total_count == 10 {
                assert!(ctx.stop_recompute());
            }
            Ok(())
        }),
        Scheduler::new(),
    )
    .unwrap();
    aggregator.start().unwrap();

    for _ in 0..4 {
        aggregator.increment_key_count("k", 1.0);
    }
    sleep(ms(150)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(aggregator.is_running());

    for _ in 0..6 {
        aggregator.increment_key_count("k", 1.0);
    }
    sleep(ms(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!aggregator.is_running());

    // producers may keep recording, but no further ticks happen
    aggregator.increment_key_count("k", 1.0);
    sleep(ms(500)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(aggregator.key_performance("k").unwrap().total_count, 10);
    assert_eq!(aggregator.key_total_count("k"), Some(11));
}

#[tokio::test(start_paused = true)]
async fn test_update_key_count_reports_absolute_totals() {
    init_logger();
    let aggregator = PerformanceAggregator::new("batch", settings(), Scheduler::new()).unwrap();
    aggregator.start().unwrap();

    aggregator.update_key_count("batch.rows", 250, 500.0);
    sleep(ms(150)).await;
    let first = aggregator.key_performance("batch.rows").unwrap();
    assert_eq!(first.total_count, 250);
    assert_eq!(first.throughput, 250);
    assert!((first.rt - 2.0).abs() < 1e-9);

    aggregator.update_key_count("batch.rows", 400, 300.0);
    sleep(ms(100)).await;
    let second = aggregator.key_performance("batch.rows").unwrap();
    assert_eq!(second.total_count, 400);
    assert_eq!(second.throughput, 150);
    assert_eq!(second.average_throughput, 200);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_aggregator_stops_its_task() {
    init_logger();
    let scheduler = Scheduler::new();
    {
        let aggregator = PerformanceAggregator::new("scoped", settings(), scheduler.clone()).unwrap();
        aggregator.start().unwrap();
        assert!(scheduler.is_scheduled("scoped.task"));
    }
    assert!(!scheduler.is_scheduled("scoped.task"));
}

#[tokio::test(start_paused = true)]
async fn test_same_name_aggregator_leaves_running_task_alone() {
    init_logger();
    let scheduler = Scheduler::new();
    let first = PerformanceAggregator::new("shared", settings(), scheduler.clone()).unwrap();
    assert!(first.start().unwrap());
    {
        let twin = PerformanceAggregator::new("shared", settings(), scheduler.clone()).unwrap();
        assert!(!twin.start().unwrap());
        assert!(!twin.is_running());
        assert!(!twin.stop());
        assert!(first.is_running());
    }
    assert!(first.is_running());
    assert!(scheduler.is_scheduled("shared.task"));

    first.increment_key_count("k", 1.0);
    sleep(ms(150)).await;
    assert_eq!(first.key_performance("k").unwrap().total_count, 1);

    assert!(first.stop());
    assert!(!scheduler.is_scheduled("shared.task"));
}
