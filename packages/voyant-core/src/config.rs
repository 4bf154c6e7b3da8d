//! Settings (§6.3, §10.3): typed configuration loaded once from the
//! environment. No key is required — every field has a documented
//! default, so a bare `voyant-worker` with no `.env` and no exported
//! variables still starts.

use std::time::Duration;

use crate::metrics::MetricsMode;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Every ambient knob named in §6.3. Constructed once at process start via
/// [`Settings::from_env`] and then shared read-only for the life of the
/// worker.
#[derive(Debug, Clone)]
pub struct Settings {
    pub metrics_mode: MetricsMode,
    pub enable_quality: bool,
    pub enable_charts: bool,
    pub enable_narrative: bool,
    pub enable_analyzers: bool,
    pub enable_kpis: bool,
    pub max_concurrent_jobs: u32,
    /// Default 300s (§9 Open Question, decided).
    pub lease_ttl_seconds: u64,
    pub heartbeat_timeout_seconds: u64,
    pub prune_interval_seconds: u64,
    pub artifact_retention_days: u32,
    pub tenant_header_name: String,
}

impl Settings {
    /// Loads `.env` (if present, via `dotenvy`) then reads every key from
    /// the process environment, falling back to its default on absence or
    /// parse failure. Never panics and never requires a key to be set.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            metrics_mode: std::env::var("VOYANT_METRICS_MODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(MetricsMode::Basic),
            enable_quality: env_bool("VOYANT_ENABLE_QUALITY", true),
            enable_charts: env_bool("VOYANT_ENABLE_CHARTS", true),
            enable_narrative: env_bool("VOYANT_ENABLE_NARRATIVE", false),
            enable_analyzers: env_bool("VOYANT_ENABLE_ANALYZERS", true),
            enable_kpis: env_bool("VOYANT_ENABLE_KPIS", true),
            max_concurrent_jobs: env_or("VOYANT_MAX_CONCURRENT_JOBS", 10u32),
            lease_ttl_seconds: env_or("VOYANT_LEASE_TTL_SECONDS", 300u64),
            heartbeat_timeout_seconds: env_or("VOYANT_HEARTBEAT_TIMEOUT_SECONDS", 30u64),
            prune_interval_seconds: env_or("VOYANT_PRUNE_INTERVAL_SECONDS", 60u64),
            artifact_retention_days: env_or("VOYANT_ARTIFACT_RETENTION_DAYS", 90u32),
            tenant_header_name: std::env::var("VOYANT_TENANT_HEADER_NAME")
                .unwrap_or_else(|_| "X-Voyant-Tenant".to_string()),
        }
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_ttl_seconds as i64)
    }

    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_timeout_seconds as i64)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_seconds)
    }

    /// The feature-flag map [`crate::plugin::run_generators`] and
    /// [`crate::plugin::run_analyzers`] consult.
    pub fn feature_flags(&self) -> crate::plugin::FeatureFlags {
        let mut flags = crate::plugin::FeatureFlags::new();
        flags.insert("enable_quality".to_string(), self.enable_quality);
        flags.insert("enable_charts".to_string(), self.enable_charts);
        flags.insert("enable_narrative".to_string(), self.enable_narrative);
        flags
    }
}

impl Default for Settings {
    /// Same defaults as `from_env` would produce with no environment set;
    /// does not touch `.env` or the process environment.
    fn default() -> Self {
        Self {
            metrics_mode: MetricsMode::Basic,
            enable_quality: true,
            enable_charts: true,
            enable_narrative: false,
            enable_analyzers: true,
            enable_kpis: true,
            max_concurrent_jobs: 10,
            lease_ttl_seconds: 300,
            heartbeat_timeout_seconds: 30,
            prune_interval_seconds: 60,
            artifact_retention_days: 90,
            tenant_header_name: "X-Voyant-Tenant".to_string(),
        }
    }
}
