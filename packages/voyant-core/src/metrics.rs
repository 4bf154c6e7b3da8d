//! Metrics Registry (§4.8): counters/histograms/gauges gated by a mode
//! read from configuration, owned by [`crate::context::CoreContext`]
//! rather than a bare global static so tests can construct their own.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsMode {
    /// Registers nothing; zero overhead.
    Off,
    /// Job counters and duration histograms only.
    Basic,
    /// Everything `Basic` has, plus quality/drift/KPI-latency/sufficiency
    /// gauges and the DuckDB-waiters queue-depth gauge.
    Full,
}

impl std::str::FromStr for MetricsMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(MetricsMode::Off),
            "basic" => Ok(MetricsMode::Basic),
            "full" => Ok(MetricsMode::Full),
            other => Err(format!("unknown metrics_mode '{other}'")),
        }
    }
}

/// A small hand-rolled counter/gauge set. `Off` mode makes every record_*
/// call a cheap no-op (a single atomic-mode branch) rather than omitting
/// the calls at call sites, matching the original implementation's
/// mode-gated metrics module.
pub struct MetricsRegistry {
    mode: MetricsMode,
    jobs_started: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    job_duration_ms_total: AtomicU64,
    event_publish_dropped: AtomicU64,
    // Full-mode-only gauges.
    quality_alerts: AtomicU64,
    duckdb_waiters_depth: AtomicI64,
}

impl MetricsRegistry {
    pub fn new(mode: MetricsMode) -> Self {
        Self {
            mode,
            jobs_started: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            job_duration_ms_total: AtomicU64::new(0),
            event_publish_dropped: AtomicU64::new(0),
            quality_alerts: AtomicU64::new(0),
            duckdb_waiters_depth: AtomicI64::new(0),
        }
    }

    pub fn mode(&self) -> MetricsMode {
        self.mode
    }

    fn basic_or_above(&self) -> bool {
        !matches!(self.mode, MetricsMode::Off)
    }

    fn full_only(&self) -> bool {
        matches!(self.mode, MetricsMode::Full)
    }

    pub fn record_job_started(&self) {
        if self.basic_or_above() {
            self.jobs_started.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_job_completed(&self, duration_ms: u64) {
        if self.basic_or_above() {
            self.jobs_completed.fetch_add(1, Ordering::Relaxed);
            self.job_duration_ms_total.fetch_add(duration_ms, Ordering::Relaxed);
        }
    }

    pub fn record_job_failed(&self, duration_ms: u64) {
        if self.basic_or_above() {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
            self.job_duration_ms_total.fetch_add(duration_ms, Ordering::Relaxed);
        }
    }

    pub fn record_event_publish_dropped(&self) {
        if self.basic_or_above() {
            self.event_publish_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_quality_alert(&self) {
        if self.full_only() {
            self.quality_alerts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn set_duckdb_waiters_depth(&self, depth: i64) {
        if self.full_only() {
            self.duckdb_waiters_depth.store(depth, Ordering::Relaxed);
        }
    }

    pub fn jobs_started(&self) -> u64 {
        self.jobs_started.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_mode_records_nothing() {
        let metrics = MetricsRegistry::new(MetricsMode::Off);
        metrics.record_job_started();
        metrics.record_job_completed(10);
        assert_eq!(metrics.jobs_started(), 0);
        assert_eq!(metrics.jobs_completed(), 0);
    }

    #[test]
    fn basic_mode_records_job_counters_but_not_full_gauges() {
        let metrics = MetricsRegistry::new(MetricsMode::Basic);
        metrics.record_job_started();
        metrics.record_quality_alert();
        assert_eq!(metrics.jobs_started(), 1);
        assert_eq!(metrics.quality_alerts.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn full_mode_records_everything() {
        let metrics = MetricsRegistry::new(MetricsMode::Full);
        metrics.record_quality_alert();
        metrics.set_duckdb_waiters_depth(3);
        assert_eq!(metrics.quality_alerts.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.duckdb_waiters_depth.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn mode_parses_from_str() {
        use std::str::FromStr;
        assert_eq!(MetricsMode::from_str("full").unwrap(), MetricsMode::Full);
        assert!(MetricsMode::from_str("bogus").is_err());
    }
}
