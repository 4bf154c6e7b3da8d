//! Tier definitions: named quota profiles assigned to tenants.
//!
//! Tiers are immutable once built; the table of built-in tiers is fixed at
//! construction (§3: "Built-in tiers {free, starter, professional,
//! enterprise} with strictly increasing limits"). A tenant's assigned tier
//! is swappable at runtime via [`crate::quota::QuotaManager::set_tier`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A named profile of quota limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub max_jobs_per_day: u32,
    pub max_concurrent_jobs: u32,
    pub max_sources: u32,
    pub max_artifacts_bytes: u64,
}

impl Tier {
    pub const fn new(
        max_jobs_per_day: u32,
        max_concurrent_jobs: u32,
        max_sources: u32,
        max_artifacts_bytes: u64,
    ) -> Self {
        Self {
            max_jobs_per_day,
            max_concurrent_jobs,
            max_sources,
            max_artifacts_bytes,
        }
    }
}

pub const FREE: Tier = Tier::new(10, 1, 3, 100 * 1024 * 1024);
pub const STARTER: Tier = Tier::new(100, 3, 15, 2 * 1024 * 1024 * 1024);
pub const PROFESSIONAL: Tier = Tier::new(1_000, 10, 100, 25 * 1024 * 1024 * 1024);
pub const ENTERPRISE: Tier = Tier::new(10_000, 50, 1_000, 500 * 1024 * 1024 * 1024);

/// A registry of named tiers. Built with the four built-in tiers and
/// extensible so tests (or an operator tool) can register bespoke tiers.
#[derive(Debug, Clone)]
pub struct TierTable {
    tiers: HashMap<String, Tier>,
}

impl TierTable {
    /// The built-in table: free < starter < professional < enterprise,
    /// strictly increasing on every field.
    pub fn builtin() -> Self {
        let mut tiers = HashMap::new();
        tiers.insert("free".to_string(), FREE);
        tiers.insert("starter".to_string(), STARTER);
        tiers.insert("professional".to_string(), PROFESSIONAL);
        tiers.insert("enterprise".to_string(), ENTERPRISE);
        Self { tiers }
    }

    pub fn register(&mut self, name: impl Into<String>, tier: Tier) {
        self.tiers.insert(name.into(), tier);
    }

    pub fn get(&self, name: &str) -> Option<Tier> {
        self.tiers.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tiers.contains_key(name)
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tiers_strictly_increase() {
        let tiers = [FREE, STARTER, PROFESSIONAL, ENTERPRISE];
        for pair in tiers.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            assert!(lo.max_jobs_per_day < hi.max_jobs_per_day);
            assert!(lo.max_concurrent_jobs < hi.max_concurrent_jobs);
            assert!(lo.max_sources < hi.max_sources);
            assert!(lo.max_artifacts_bytes < hi.max_artifacts_bytes);
        }
    }

    #[test]
    fn unknown_tier_name_is_none() {
        let table = TierTable::builtin();
        assert!(table.get("legendary").is_none());
    }

    #[test]
    fn custom_tier_can_be_registered() {
        let mut table = TierTable::builtin();
        table.register("trial", Tier::new(1, 1, 1, 1024));
        assert_eq!(table.get("trial"), Some(Tier::new(1, 1, 1, 1024)));
    }
}
