//! Quota Manager (§4.2): pre-admission and in-flight enforcement of tier
//! limits, plus the authoritative per-tenant usage counters.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ids::TenantId;
use crate::tiers::{Tier, TierTable};
use crate::voyant_error::VoyantError;

/// The four counters named in §3, each paired with its limit name for
/// [`QuotaManager::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitName {
    JobsPerDay,
    ConcurrentJobs,
    Sources,
    ArtifactBytes,
}

impl LimitName {
    pub fn as_str(self) -> &'static str {
        match self {
            LimitName::JobsPerDay => "jobs_per_day",
            LimitName::ConcurrentJobs => "concurrent_jobs",
            LimitName::Sources => "sources",
            LimitName::ArtifactBytes => "artifact_bytes",
        }
    }
}

/// A point-in-time read of a tenant's usage. Day-bounded fields
/// (`jobs_today`) are computed lazily against the current UTC date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub jobs_today: u32,
    pub concurrent_jobs: u32,
    pub sources_count: u32,
    pub artifacts_bytes: u64,
}

struct TenantUsage {
    day: Mutex<NaiveDate>,
    jobs_today: AtomicU32,
    concurrent_jobs: AtomicU32,
    sources_count: AtomicU32,
    artifacts_bytes: AtomicU64,
}

impl TenantUsage {
    fn new() -> Self {
        Self {
            day: Mutex::new(Utc::now().date_naive()),
            jobs_today: AtomicU32::new(0),
            concurrent_jobs: AtomicU32::new(0),
            sources_count: AtomicU32::new(0),
            artifacts_bytes: AtomicU64::new(0),
        }
    }

    /// Day rollover is computed lazily on read (§4.2): if the wall-clock
    /// date has moved on from the bucket this tenant is tracking,
    /// `jobs_today` resets to zero and the bucket advances.
    fn roll_day_if_needed(&self) {
        let today = Utc::now().date_naive();
        let mut bucket = self.day.lock().unwrap();
        if *bucket != today {
            *bucket = today;
            self.jobs_today.store(0, Ordering::SeqCst);
        }
    }

    fn snapshot(&self) -> UsageSnapshot {
        self.roll_day_if_needed();
        UsageSnapshot {
            jobs_today: self.jobs_today.load(Ordering::SeqCst),
            concurrent_jobs: self.concurrent_jobs.load(Ordering::SeqCst),
            sources_count: self.sources_count.load(Ordering::SeqCst),
            artifacts_bytes: self.artifacts_bytes.load(Ordering::SeqCst),
        }
    }
}

/// Per-tenant tier assignment plus usage counters, with admission and
/// in-flight enforcement.
pub struct QuotaManager {
    tiers: TierTable,
    assignments: DashMap<TenantId, String>,
    usage: DashMap<TenantId, TenantUsage>,
    default_tier: String,
}

impl QuotaManager {
    pub fn new(tiers: TierTable) -> Self {
        Self {
            tiers,
            assignments: DashMap::new(),
            usage: DashMap::new(),
            default_tier: "free".to_string(),
        }
    }

    /// The tier a tenant currently resolves to — its explicit assignment,
    /// or the manager's default tier if none was ever set.
    pub fn tier_of(&self, tenant_id: &TenantId) -> Tier {
        let name = self
            .assignments
            .get(tenant_id)
            .map(|e| e.clone())
            .unwrap_or_else(|| self.default_tier.clone());
        self.tiers.get(&name).unwrap_or(crate::tiers::FREE)
    }

    /// Assigns a tenant to a named tier. Fails with `UnknownTier` if the
    /// name was never registered on the table this manager was built with.
    pub fn set_tier(&self, tenant_id: &TenantId, tier_name: &str) -> Result<(), VoyantError> {
        if !self.tiers.contains(tier_name) {
            return Err(VoyantError::not_found(format!("tier '{tier_name}'")));
        }
        self.assignments
            .insert(tenant_id.clone(), tier_name.to_string());
        Ok(())
    }

    fn usage_entry(&self, tenant_id: &TenantId) -> dashmap::mapref::one::Ref<'_, TenantId, TenantUsage> {
        self.usage
            .entry(tenant_id.clone())
            .or_insert_with(TenantUsage::new);
        self.usage.get(tenant_id).unwrap()
    }

    /// Pure read; no side effects.
    pub fn check(&self, tenant_id: &TenantId, limit: LimitName) -> (bool, Option<String>) {
        let tier = self.tier_of(tenant_id);
        let usage = self.usage_entry(tenant_id);
        let snap = usage.snapshot();
        let (current, max) = match limit {
            LimitName::JobsPerDay => (snap.jobs_today as u64, tier.max_jobs_per_day as u64),
            LimitName::ConcurrentJobs => {
                (snap.concurrent_jobs as u64, tier.max_concurrent_jobs as u64)
            }
            LimitName::Sources => (snap.sources_count as u64, tier.max_sources as u64),
            LimitName::ArtifactBytes => (snap.artifacts_bytes, tier.max_artifacts_bytes),
        };
        if current >= max {
            (
                false,
                Some(format!(
                    "{} at {}/{}",
                    limit.as_str(),
                    current,
                    max
                )),
            )
        } else {
            (true, None)
        }
    }

    /// Atomically checks and increments `jobs_today` *and*
    /// `concurrent_jobs`. If either would exceed its limit, no increment
    /// happens and `false` is returned.
    pub fn record_job_start(&self, tenant_id: &TenantId) -> bool {
        let tier = self.tier_of(tenant_id);
        let usage = self.usage_entry(tenant_id);
        usage.roll_day_if_needed();

        loop {
            let jobs_today = usage.jobs_today.load(Ordering::SeqCst);
            let concurrent = usage.concurrent_jobs.load(Ordering::SeqCst);
            if jobs_today >= tier.max_jobs_per_day || concurrent >= tier.max_concurrent_jobs {
                return false;
            }
            // Bounded compare-and-increment retry per §5 ("atomic
            // compare-and-increment with bounded retry").
            if usage
                .jobs_today
                .compare_exchange(
                    jobs_today,
                    jobs_today + 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_err()
            {
                continue;
            }
            usage.concurrent_jobs.fetch_add(1, Ordering::SeqCst);
            return true;
        }
    }

    /// Decrements `concurrent_jobs` only; `jobs_today` is a daily
    /// admission counter and is never decremented on completion.
    pub fn record_job_end(&self, tenant_id: &TenantId) {
        let usage = self.usage_entry(tenant_id);
        let _ = usage
            .concurrent_jobs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn record_artifact_bytes(&self, tenant_id: &TenantId, delta_bytes: i64) {
        let usage = self.usage_entry(tenant_id);
        if delta_bytes >= 0 {
            usage
                .artifacts_bytes
                .fetch_add(delta_bytes as u64, Ordering::SeqCst);
        } else {
            let _ = usage
                .artifacts_bytes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                    Some(v.saturating_sub((-delta_bytes) as u64))
                });
        }
    }

    pub fn record_source_added(&self, tenant_id: &TenantId) {
        let usage = self.usage_entry(tenant_id);
        usage.sources_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_source_removed(&self, tenant_id: &TenantId) {
        let usage = self.usage_entry(tenant_id);
        let _ = usage
            .sources_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn usage(&self, tenant_id: &TenantId) -> UsageSnapshot {
        self.usage_entry(tenant_id).snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(s: &str) -> TenantId {
        TenantId::new(s)
    }

    #[test]
    fn check_at_exactly_the_limit_is_disallowed() {
        let mut table = TierTable::builtin();
        table.register("single", Tier::new(1, 1, 1, 1024));
        let qm = QuotaManager::new(table);
        let t = tenant("t1");
        qm.set_tier(&t, "single").unwrap();
        assert!(qm.record_job_start(&t));
        let (allowed, reason) = qm.check(&t, LimitName::ConcurrentJobs);
        assert!(!allowed);
        assert!(reason.is_some());
    }

    #[test]
    fn record_job_start_is_paired_with_end() {
        let mut table = TierTable::builtin();
        table.register("single", Tier::new(10, 1, 1, 1024));
        let qm = QuotaManager::new(table);
        let t = tenant("t1");
        qm.set_tier(&t, "single").unwrap();

        assert!(qm.record_job_start(&t));
        assert!(!qm.record_job_start(&t), "concurrency cap should block a second start");
        qm.record_job_end(&t);
        assert!(qm.record_job_start(&t), "ending the first job frees the slot");
    }

    #[test]
    fn unknown_tier_is_rejected() {
        let qm = QuotaManager::new(TierTable::builtin());
        let t = tenant("t1");
        let err = qm.set_tier(&t, "legendary").unwrap_err();
        assert_eq!(err.kind(), crate::voyant_error::ErrorKind::NotFound);
    }

    #[test]
    fn artifact_bytes_accumulate_and_shrink() {
        let qm = QuotaManager::new(TierTable::builtin());
        let t = tenant("t1");
        qm.record_artifact_bytes(&t, 1000);
        qm.record_artifact_bytes(&t, 500);
        assert_eq!(qm.usage(&t).artifacts_bytes, 1500);
        qm.record_artifact_bytes(&t, -200);
        assert_eq!(qm.usage(&t).artifacts_bytes, 1300);
    }

    #[test]
    fn sources_added_and_removed() {
        let qm = QuotaManager::new(TierTable::builtin());
        let t = tenant("t1");
        qm.record_source_added(&t);
        qm.record_source_added(&t);
        qm.record_source_removed(&t);
        assert_eq!(qm.usage(&t).sources_count, 1);
    }
}
