//! Rolling timing samples for score calculations and analytics queries.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Samples older than this are dropped.
const WINDOW_SECS: i64 = 3600;
/// Hard cap per series so a busy hour can't grow memory unbounded.
const MAX_SAMPLES: usize = 100_000;

#[derive(Debug, Default)]
struct Series {
    samples: VecDeque<(DateTime<Utc>, Duration)>,
}

impl Series {
    fn push(&mut self, at: DateTime<Utc>, took: Duration) {
        self.samples.push_back((at, took));
        if self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.prune(at);
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        while let Some((at, _)) = self.samples.front() {
            if (now - *at).num_seconds() > WINDOW_SECS {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn count_since(&self, since: DateTime<Utc>) -> usize {
        self.samples.iter().filter(|(at, _)| *at >= since).count()
    }

    fn average_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: f64 = self.samples.iter().map(|(_, d)| d.as_secs_f64() * 1000.0).sum();
        total / self.samples.len() as f64
    }

    fn last(&self) -> Option<DateTime<Utc>> {
        self.samples.back().map(|(at, _)| *at)
    }
}

/// Shared between the scoring engine and the analytics aggregator.
#[derive(Debug, Default)]
pub struct TimingRecorder {
    calculations: Mutex<Series>,
    queries: Mutex<Series>,
}

/// Snapshot of the recorder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingSnapshot {
    pub calculations_last_hour: usize,
    pub avg_calculation_ms: f64,
    pub avg_query_ms: f64,
    pub last_calculation: Option<DateTime<Utc>>,
}

impl TimingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_calculation(&self, took: Duration) {
        if let Ok(mut series) = self.calculations.lock() {
            series.push(Utc::now(), took);
        }
    }

    pub fn record_query(&self, took: Duration) {
        if let Ok(mut series) = self.queries.lock() {
            series.push(Utc::now(), took);
        }
    }

    pub fn snapshot(&self) -> TimingSnapshot {
        let now = Utc::now();
        let since = now - chrono::Duration::seconds(WINDOW_SECS);
        let mut snapshot = TimingSnapshot::default();
        if let Ok(mut series) = self.calculations.lock() {
            series.prune(now);
            snapshot.calculations_last_hour = series.count_since(since);
            snapshot.avg_calculation_ms = series.average_ms();
            snapshot.last_calculation = series.last();
        }
        if let Ok(mut series) = self.queries.lock() {
            series.prune(now);
            snapshot.avg_query_ms = series.average_ms();
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let recorder = TimingRecorder::new();
        assert_eq!(recorder.snapshot(), TimingSnapshot::default());
    }

    #[test]
    fn test_averages() {
        let recorder = TimingRecorder::new();
        recorder.record_calculation(Duration::from_millis(2));
        recorder.record_calculation(Duration::from_millis(4));
        recorder.record_query(Duration::from_millis(10));

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.calculations_last_hour, 2);
        assert!((snapshot.avg_calculation_ms - 3.0).abs() < 1e-6);
        assert!((snapshot.avg_query_ms - 10.0).abs() < 1e-6);
        assert!(snapshot.last_calculation.is_some());
    }

    #[test]
    fn test_old_samples_are_pruned() {
        let mut series = Series::default();
        let now = Utc::now();
        series.push(now - chrono::Duration::seconds(WINDOW_SECS + 10), Duration::from_millis(1));
        series.push(now, Duration::from_millis(1));
        assert_eq!(series.samples.len(), 1);
    }
}
