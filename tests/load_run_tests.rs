// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Load Run Tests
//!
//! End-to-end runs on tokio's paused clock: dispatch finishes long before
//! the first one-second tick, so that tick sees the whole volume.

use perfdrive::{AggregatorSettings, Error, LoadRun, RunConfig, Scheduler, StatusCodeCounter};
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

#[tokio::test(start_paused = true)]
async fn test_run_auto_stops_at_target() {
    init_logger();
    let scheduler = Scheduler::new();
    let run = LoadRun::new("CommonTps", "CommonTps.Count", RunConfig::new(3, 9))
        .unwrap()
        .with_scheduler(scheduler.clone());
    let status = run.status_counter().clone();

    let report = run
        .run(move || {
            let status = status.clone();
            async move {
                sleep(ms(10)).await;
                status.record(200);
                Ok(())
            }
        })
        .await
        .unwrap();

    assert!(report.auto_stopped);
    assert_eq!(report.dispatch.completed, 9);
    let snapshot = report.snapshot.unwrap();
    assert_eq!(snapshot.total_count, 9);
    assert_eq!(snapshot.throughput, 9);
    assert_eq!(snapshot.average_throughput, 9);
    assert_eq!(report.status_summary, "[StatusCode: 200, Count: 9]\n");
    assert!(scheduler.task_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_user_snapshot_handler_still_runs() {
    init_logger();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let config = RunConfig::new(2, 4).with_aggregator_settings(
        AggregatorSettings::default()
            .with_auto_logging(false)
            .with_snapshot_handler(move |ctx| {
                assert_eq!(ctx.aggregator(), "handled");
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
    );
    let run = LoadRun::new("handled", "handled.Count", config).unwrap();

    let report = run.run(|| async { Ok(()) }).await.unwrap();

    assert!(report.auto_stopped);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.status_summary, "");
}

#[tokio::test(start_paused = true)]
async fn test_failing_unit_returns_error_and_stops_recompute() {
    init_logger();
    let scheduler = Scheduler::new();
    let run = LoadRun::new("broken", "broken.Count", RunConfig::new(2, 6))
        .unwrap()
        .with_scheduler(scheduler.clone());

    let err = run
        .run(|| async {
            sleep(ms(5)).await;
            Err(anyhow::anyhow!("503 from upstream"))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Work { .. }));
    assert!(scheduler.task_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shared_status_counter_accumulates_across_runs() {
    init_logger();
    let status = StatusCodeCounter::new();
    for (name, code) in [("first", 200u16), ("second", 404u16)] {
        let run = LoadRun::new(name, format!("{name}.Count"), RunConfig::new(1, 2))
            .unwrap()
            .with_status_counter(status.clone());
        let recorder = run.status_counter().clone();
        run.run(move || {
            let recorder = recorder.clone();
            async move {
                recorder.record(code);
                Ok(())
            }
        })
        .await
        .unwrap();
    }

    assert_eq!(status.total(), 4);
    assert_eq!(
        status.summary(),
        "[StatusCode: 200, Count: 2]\n[StatusCode: 404, Count: 2]\n"
    );
}

#[tokio::test(start_paused = true)]
async fn test_same_name_run_on_shared_scheduler_is_rejected() {
    init_logger();
    let scheduler = Scheduler::new();
    let first = LoadRun::new("CommonTps", "CommonTps.Count", RunConfig::new(3, 9))
        .unwrap()
        .with_scheduler(scheduler.clone());
    let second = LoadRun::new("CommonTps", "CommonTps.Count", RunConfig::new(3, 9))
        .unwrap()
        .with_scheduler(scheduler.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    let unit = |calls: Arc<AtomicUsize>| {
        move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(ms(10)).await;
                anyhow::Ok(())
            }
        }
    };
    let (first_result, second_result) = tokio::join!(
        first.run(unit(calls.clone())),
        second.run(unit(calls.clone()))
    );

    let report = first_result.unwrap();
    assert!(report.auto_stopped);
    assert_eq!(report.snapshot.unwrap().total_count, 9);
    assert!(second_result.unwrap_err().is_invalid_argument());
    // the rejected run dispatched nothing
    assert_eq!(calls.load(Ordering::SeqCst), 9);
    assert!(scheduler.task_names().is_empty());
}
