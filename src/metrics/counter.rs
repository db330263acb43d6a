// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::PerformanceSnapshot;

/// Converts fractional milliseconds to whole microseconds.
///
/// Negative and NaN inputs become zero; the fraction below one microsecond
/// is truncated.
#[inline]
pub(crate) fn millis_to_micros(rt_millis: f64) -> u64 {
    // float-to-int `as` saturates and maps NaN to 0
    (rt_millis * 1000.0) as u64
}

/// Per-key counter state.
///
/// Producers touch only the raw atomic accumulators. The derived fields are
/// written only by [`recompute`](CounterState::recompute), which the
/// scheduler never runs concurrently for the same aggregator.
///
/// Response times are accumulated as integer microseconds so that many
/// additions do not drift; derived values are reported in milliseconds.
#[derive(Debug)]
pub(crate) struct CounterState {
    /// Cumulative units recorded (or the last absolute count set)
    total_count: AtomicU64,
    /// Units recorded since the last tick
    rt_count_since_tick: AtomicU64,
    /// Response time recorded since the last tick, in microseconds
    rt_micros_since_tick: AtomicU64,
    /// Response time recorded since creation, in microseconds (saturating)
    total_rt_micros: AtomicU64,
    derived: Mutex<Derived>,
}

#[derive(Debug, Default)]
struct Derived {
    previous_count: u64,
    throughput: u64,
    average_throughput: u64,
    positive_ticks: u64,
    rt: f64,
    average_rt: f64,
    rt_samples: u64,
    last_snapshot: Option<PerformanceSnapshot>,
}

impl CounterState {
    /// Creates a counter seeded with `initial_count` units taking `rt_millis` in total.
    pub fn new(initial_count: u64, rt_millis: f64) -> Self {
        let micros = millis_to_micros(rt_millis);
        Self {
            total_count: AtomicU64::new(initial_count),
            rt_count_since_tick: AtomicU64::new(initial_count),
            rt_micros_since_tick: AtomicU64::new(micros),
            total_rt_micros: AtomicU64::new(micros),
            derived: Mutex::new(Derived::default()),
        }
    }

    /// Records one unit that took `rt_millis`.
    #[inline]
    pub fn increment(&self, rt_millis: f64) {
        self.total_count.fetch_add(1, Ordering::Relaxed);
        self.rt_count_since_tick.fetch_add(1, Ordering::Relaxed);
        self.add_rt(millis_to_micros(rt_millis));
    }

    /// Sets the absolute count and adds `rt_millis` to the response time.
    #[inline]
    pub fn update(&self, count: u64, rt_millis: f64) {
        self.total_count.store(count, Ordering::Relaxed);
        self.rt_count_since_tick.store(count, Ordering::Relaxed);
        self.add_rt(millis_to_micros(rt_millis));
    }

    fn add_rt(&self, micros: u64) {
        self.rt_micros_since_tick.fetch_add(micros, Ordering::Relaxed);
        let _ = self.total_rt_micros.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |current| Some(current.saturating_add(micros)),
        );
    }

    fn derived(&self) -> MutexGuard<'_, Derived> {
        self.derived.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the live cumulative count.
    #[inline]
    pub fn total_count(&self) -> u64 {
        self.total_count.load(Ordering::Relaxed)
    }

    /// Returns the snapshot derived by the most recent tick.
    pub fn last_snapshot(&self) -> Option<PerformanceSnapshot> {
        self.derived().last_snapshot.clone()
    }

    /// Derives throughput and response time for the tick that just ended.
    ///
    /// The per-tick accumulators are swapped to zero, so each recording is
    /// attributed to exactly one tick.
    pub fn recompute(&self) -> PerformanceSnapshot {
        let mut derived = self.derived();

        let total_count = self.total_count.load(Ordering::Relaxed);
        // an absolute update below the previous count yields an idle tick
        derived.throughput = total_count.saturating_sub(derived.previous_count);
        derived.previous_count = total_count;
        if derived.throughput > 0 {
            derived.positive_ticks += 1;
            derived.average_throughput = total_count / derived.positive_ticks;
        }

        let rt_micros = self.rt_micros_since_tick.swap(0, Ordering::Relaxed);
        let rt_count = self.rt_count_since_tick.swap(0, Ordering::Relaxed);
        if rt_count > 0 {
            derived.rt = rt_micros as f64 / 1000.0 / rt_count as f64;
            derived.rt_samples = derived.rt_samples.saturating_add(rt_count);
            let total_rt_micros = self.total_rt_micros.load(Ordering::Relaxed);
            derived.average_rt = total_rt_micros as f64 / 1000.0 / derived.rt_samples as f64;
        }

        let snapshot = PerformanceSnapshot {
            total_count,
            throughput: derived.throughput,
            average_throughput: derived.average_throughput,
            rt: derived.rt,
            average_rt: derived.average_rt,
        };
        derived.last_snapshot = Some(snapshot.clone());
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_to_micros() {
        assert_eq!(millis_to_micros(1.5), 1500);
        assert_eq!(millis_to_micros(0.0004), 0);
        assert_eq!(millis_to_micros(-3.0), 0);
        assert_eq!(millis_to_micros(f64::NAN), 0);
    }

    #[test]
    fn test_seeded_state() {
        let counter = CounterState::new(1, 12.0);

        assert_eq!(counter.total_count(), 1);
        assert!(counter.last_snapshot().is_none());

        let snapshot = counter.recompute();
        assert_eq!(snapshot.total_count, 1);
        assert_eq!(snapshot.throughput, 1);
        assert_eq!(snapshot.average_throughput, 1);
        assert!((snapshot.rt - 12.0).abs() < 1e-9);
        assert!((snapshot.average_rt - 12.0).abs() < 1e-9);
        assert_eq!(counter.last_snapshot(), Some(snapshot));
    }

    #[test]
    fn test_throughput_is_delta_between_ticks() {
        let counter = CounterState::new(1, 1.0);
        for _ in 0..4 {
            counter.increment(1.0);
        }
        assert_eq!(counter.recompute().throughput, 5);

        for _ in 0..3 {
            counter.increment(1.0);
        }
        let snapshot = counter.recompute();
        assert_eq!(snapshot.total_count, 8);
        assert_eq!(snapshot.throughput, 3);
        assert_eq!(snapshot.average_throughput, 4);
    }

    #[test]
    fn test_idle_ticks_do_not_dilute_average() {
        let counter = CounterState::new(1, 1.0);
        for _ in 0..9 {
            counter.increment(1.0);
        }
        counter.recompute();

        let idle = counter.recompute();
        assert_eq!(idle.throughput, 0);
        assert_eq!(idle.average_throughput, 10);

        for _ in 0..10 {
            counter.increment(1.0);
        }
        let busy = counter.recompute();
        assert_eq!(busy.throughput, 10);
        assert_eq!(busy.average_throughput, 10);
    }

    #[test]
    fn test_rt_window_resets_each_tick() {
        let counter = CounterState::new(1, 10.0);
        counter.increment(30.0);
        let first = counter.recompute();
        assert!((first.rt - 20.0).abs() < 1e-9);
        assert!((first.average_rt - 20.0).abs() < 1e-9);

        counter.increment(50.0);
        let second = counter.recompute();
        assert!((second.rt - 50.0).abs() < 1e-9);
        assert!((second.average_rt - 30.0).abs() < 1e-9);

        // no samples: per-tick rt keeps its last value
        let idle = counter.recompute();
        assert!((idle.rt - 50.0).abs() < 1e-9);
        assert!((idle.average_rt - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_update_sets_absolute_count() {
        let counter = CounterState::new(5, 10.0);
        counter.recompute();

        counter.update(20, 30.0);
        let snapshot = counter.recompute();
        assert_eq!(snapshot.total_count, 20);
        assert_eq!(snapshot.throughput, 15);
        assert!((snapshot.rt - 30.0 / 20.0).abs() < 1e-9);

        counter.update(12, 0.0);
        let lowered = counter.recompute();
        assert_eq!(lowered.total_count, 12);
        assert_eq!(lowered.throughput, 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let counter = std::sync::Arc::new(CounterState::new(0, 0.0));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.increment(0.5);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(counter.total_count(), 8000);
        let snapshot = counter.recompute();
        assert_eq!(snapshot.throughput, 8000);
        assert!((snapshot.rt - 0.5).abs() < 1e-9);
    }
}
