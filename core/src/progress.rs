//! Throughput reporting for long-running builds.

use std::fmt;
use std::time::{Duration, Instant};

/// One throughput report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub processed: u64,
    pub elapsed: Duration,
    /// Records/second since the start of the run.
    pub avg_speed: f64,
    /// Records/second since the previous report.
    pub section_speed: f64,
}

/// Split a duration into whole minutes and the remaining seconds.
pub fn minutes_seconds(d: Duration) -> (u64, f64) {
    let secs = d.as_secs_f64();
    let minutes = (secs / 60.0).floor();
    (minutes as u64, secs - minutes * 60.0)
}

fn rate(count: u64, d: Duration) -> f64 {
    let secs = d.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (min, sec) = minutes_seconds(self.elapsed);
        write!(
            f,
            "processed {} new records. Time: {} min, {:.2} sec. Avg. speed: {:.2}/s. Section speed: {:.2}/s",
            self.processed, min, sec, self.avg_speed, self.section_speed
        )
    }
}

/// Counts written records and reports once every `report_every` of them.
/// Owned and updated by the consuming loop only.
#[derive(Debug)]
pub struct Progress {
    unit: &'static str,
    report_every: u64,
    started: Instant,
    last_report: Instant,
    last_count: u64,
    count: u64,
    reports: u64,
}

impl Progress {
    pub fn new(unit: &'static str, report_every: u64) -> Self {
        let now = Instant::now();
        Self { unit, report_every: report_every.max(1), started: now, last_report: now, last_count: 0, count: 0, reports: 0 }
    }

    /// Add `n` written records; returns the report if a multiple of
    /// `report_every` was crossed.
    pub fn record(&mut self, n: u64) -> Option<Throughput> {
        if n == 0 { return None; }
        let before = self.count;
        self.count += n;
        if before / self.report_every == self.count / self.report_every {
            return None;
        }

        let now = Instant::now();
        let report = Throughput {
            processed: self.count,
            elapsed: now - self.started,
            avg_speed: rate(self.count, now - self.started),
            section_speed: rate(self.count - self.last_count, now - self.last_report),
        };
        self.last_report = now;
        self.last_count = self.count;
        self.reports += 1;
        tracing::info!(unit = self.unit, "{report}");
        Some(report)
    }

    pub fn count(&self) -> u64 { self.count }

    pub fn reports(&self) -> u64 { self.reports }

    pub fn elapsed(&self) -> Duration { self.started.elapsed() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_once_per_interval() {
        let mut progress = Progress::new("pages", 1000);
        let mut reports = 0;
        for _ in 0..2500 {
            if progress.record(1).is_some() { reports += 1; }
        }
        assert_eq!(reports, 2);
        assert_eq!(progress.reports(), 2);
        assert_eq!(progress.count(), 2500);
    }

    #[test]
    fn empty_results_never_report() {
        let mut progress = Progress::new("pages", 1);
        assert!(progress.record(0).is_none());
        assert_eq!(progress.count(), 0);
        assert!(progress.record(1).is_some());
    }

    #[test]
    fn batches_crossing_one_boundary_report_once() {
        let mut progress = Progress::new("edges", 100);
        assert!(progress.record(99).is_none());
        let report = progress.record(250).unwrap();
        assert_eq!(report.processed, 349);
        assert!(progress.record(10).is_none());
        assert!(progress.record(50).is_some());
    }

    #[test]
    fn splits_minutes() {
        let (min, sec) = minutes_seconds(Duration::from_millis(125_500));
        assert_eq!(min, 2);
        assert!((sec - 5.5).abs() < 1e-9);
    }
}
