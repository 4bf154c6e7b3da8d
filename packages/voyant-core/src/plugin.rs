//! Plugin Registry & Generator Pipeline (§4.4): ordered execution of
//! "core" vs "extended" stages with fail-fast vs isolate-failure
//! semantics, plus the canonical artifact-key taxonomy (§9 Open Question 1,
//! resolved: reject out-of-taxonomy registrations at registration time).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::voyant_error::VoyantError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginCategory {
    Visualization,
    Report,
    Security,
    Statistics,
}

/// Canonical artifact-key taxonomy patterns from §4.4.
static TAXONOMY: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^profile\.(html|json)$",
        r"^quality\.(html|json)$",
        r"^drift\.(html|json)$",
        r"^kpis\.json$",
        r"^chart_[A-Za-z0-9_-]+\.(html|png)$",
        r"^charts/[A-Za-z0-9_-]+\.(html|png)$",
        r"^sufficiency\.json$",
        r"^narrative\.(txt|md)$",
        r"^manifest\.json$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

pub fn is_canonical_artifact_key(key: &str) -> bool {
    TAXONOMY.iter().any(|re| re.is_match(key))
}

/// What a generator hands back for one produced artifact key: enough for
/// the runtime to build an `ArtifactReference` (§3) without re-deriving
/// anything the generator already knows about the file it wrote.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedArtifact {
    pub uri: String,
    pub size_bytes: u64,
    pub checksum: String,
}

impl GeneratedArtifact {
    pub fn new(uri: impl Into<String>, size_bytes: u64, checksum: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            size_bytes,
            checksum: checksum.into(),
        }
    }
}

/// A plugin's generate/analyze entry point. `context` and `settings` are
/// opaque JSON so the core does not need to know about analyzer-specific
/// shapes; the plugin returns `{artifact_key → GeneratedArtifact}` on
/// success.
pub trait Plugin: Send + Sync {
    fn generate(
        &self,
        context: &Value,
        settings: &Value,
    ) -> Result<HashMap<String, GeneratedArtifact>, VoyantError>;
}

#[derive(Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub category: PluginCategory,
    pub version: String,
    pub is_core: bool,
    pub order: i32,
    pub feature_flag: Option<String>,
    pub advertised_keys: Vec<String>,
}

struct RegisteredPlugin {
    descriptor: PluginDescriptor,
    factory: Arc<dyn Plugin>,
}

/// Registration is process-global and happens at startup before the
/// queue is served. Idempotent by name; re-registration with a
/// different factory fails with `DuplicatePlugin` (modeled here as
/// `VoyantError::Conflict`).
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, RegisteredPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, descriptor: PluginDescriptor, factory: Arc<dyn Plugin>) -> Result<(), VoyantError> {
        for key in &descriptor.advertised_keys {
            if !is_canonical_artifact_key(key) {
                return Err(VoyantError::validation(format!(
                    "plugin '{}' advertises out-of-taxonomy artifact key '{}'",
                    descriptor.name, key
                )));
            }
        }

        let mut plugins = self.plugins.write().unwrap();
        if plugins.contains_key(&descriptor.name) {
            return Err(VoyantError::conflict(format!(
                "plugin '{}' already registered",
                descriptor.name
            )));
        }
        plugins.insert(
            descriptor.name.clone(),
            RegisteredPlugin { descriptor, factory },
        );
        Ok(())
    }

    fn ordered(&self) -> Vec<(PluginDescriptor, Arc<dyn Plugin>)> {
        let plugins = self.plugins.read().unwrap();
        let mut all: Vec<_> = plugins
            .values()
            .map(|p| (p.descriptor.clone(), p.factory.clone()))
            .collect();
        all.sort_by_key(|(d, _)| d.order);
        all
    }

    pub fn get(&self, name: &str) -> Option<PluginDescriptor> {
        self.plugins.read().unwrap().get(name).map(|p| p.descriptor.clone())
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    pub failed_core: Option<String>,
    pub artifacts: HashMap<String, GeneratedArtifact>,
    pub errors: Vec<String>,
    pub skipped: Vec<String>,
}

/// Feature flags consulted by `feature_flag` checks: a name → bool map
/// drawn from `Settings` (`enable_quality`, `enable_charts`,
/// `enable_narrative`, §6.3).
pub type FeatureFlags = HashMap<String, bool>;

/// Runs the registered generators in `order`, honoring feature flags and
/// core/extended failure policy (§4.4).
pub fn run_generators(
    registry: &PluginRegistry,
    context: &Value,
    settings: &Value,
    flags: &FeatureFlags,
) -> PipelineResult {
    let mut artifacts = HashMap::new();
    let mut errors = Vec::new();
    let mut skipped = Vec::new();

    for (descriptor, plugin) in registry.ordered() {
        if let Some(flag) = &descriptor.feature_flag {
            if !*flags.get(flag).unwrap_or(&true) {
                skipped.push(descriptor.name.clone());
                continue;
            }
        }

        let started = std::time::Instant::now();
        let result = plugin.generate(context, settings);
        let elapsed = started.elapsed();
        tracing::debug!(plugin = %descriptor.name, elapsed_ms = elapsed.as_millis() as u64, "generator invoked");

        match result {
            Ok(produced) => {
                artifacts.extend(produced);
            }
            Err(_err) if descriptor.is_core => {
                return PipelineResult {
                    success: false,
                    failed_core: Some(descriptor.name.clone()),
                    artifacts,
                    errors,
                    skipped,
                };
            }
            Err(err) => {
                tracing::warn!(plugin = %descriptor.name, error = %err, "extended generator failed");
                errors.push(format!("{}: {}", descriptor.name, err.safe_message()));
            }
        }
    }

    PipelineResult {
        success: true,
        failed_core: None,
        artifacts,
        errors,
        skipped,
    }
}

/// Mirrors `run_generators`'s policy for the analyzer pipeline (§4.4):
/// core analyzer failure aborts, extended failures are captured.
pub fn run_analyzers(
    registry: &PluginRegistry,
    data: &Value,
    flags: &FeatureFlags,
) -> PipelineResult {
    // Analyzer and generator pipelines share identical fail-fast /
    // isolate-failure policy; only the settings argument's semantic
    // role differs (analyzer input data vs. generator settings).
    run_generators(registry, data, &Value::Null, flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OkPlugin(&'static str);
    impl Plugin for OkPlugin {
        fn generate(
            &self,
            _ctx: &Value,
            _settings: &Value,
        ) -> Result<HashMap<String, GeneratedArtifact>, VoyantError> {
            let mut out = HashMap::new();
            out.insert(
                "profile.json".to_string(),
                GeneratedArtifact::new(format!("uri://{}", self.0), 1024, "deadbeef"),
            );
            Ok(out)
        }
    }

    struct FailingPlugin;
    impl Plugin for FailingPlugin {
        fn generate(
            &self,
            _ctx: &Value,
            _settings: &Value,
        ) -> Result<HashMap<String, GeneratedArtifact>, VoyantError> {
            Err(VoyantError::internal("boom"))
        }
    }

    fn descriptor(name: &str, is_core: bool, order: i32) -> PluginDescriptor {
        PluginDescriptor {
            name: name.to_string(),
            category: PluginCategory::Report,
            version: "1.0.0".to_string(),
            is_core,
            order,
            feature_flag: None,
            advertised_keys: vec!["profile.json".to_string()],
        }
    }

    /// Scenario 4 (§8): core generator failure is fail-fast.
    #[test]
    fn core_failure_stops_pipeline() {
        let registry = PluginRegistry::new();
        registry.register(descriptor("A", true, 10), Arc::new(OkPlugin("a"))).unwrap();
        registry.register(descriptor("B", true, 20), Arc::new(FailingPlugin)).unwrap();
        registry.register(descriptor("C", false, 30), Arc::new(OkPlugin("c"))).unwrap();

        let result = run_generators(&registry, &Value::Null, &Value::Null, &FeatureFlags::new());
        assert!(!result.success);
        assert_eq!(result.failed_core.as_deref(), Some("B"));
        assert_eq!(result.artifacts.len(), 1);
    }

    /// Scenario 5 (§8): extended failure is isolated.
    #[test]
    fn extended_failure_is_isolated() {
        let registry = PluginRegistry::new();
        registry.register(descriptor("A", true, 10), Arc::new(OkPlugin("a"))).unwrap();
        registry.register(descriptor("B", false, 20), Arc::new(FailingPlugin)).unwrap();
        registry.register(descriptor("C", false, 30), Arc::new(OkPlugin("c"))).unwrap();

        let result = run_generators(&registry, &Value::Null, &Value::Null, &FeatureFlags::new());
        assert!(result.success);
        assert_eq!(result.artifacts.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains('B'));
    }

    #[test]
    fn feature_flag_skip_is_not_a_failure() {
        let registry = PluginRegistry::new();
        let mut d = descriptor("A", false, 10);
        d.feature_flag = Some("enable_charts".to_string());
        registry.register(d, Arc::new(OkPlugin("a"))).unwrap();

        let mut flags = FeatureFlags::new();
        flags.insert("enable_charts".to_string(), false);
        let result = run_generators(&registry, &Value::Null, &Value::Null, &flags);
        assert!(result.success);
        assert_eq!(result.skipped, vec!["A".to_string()]);
        assert!(result.artifacts.is_empty());
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = PluginRegistry::new();
        registry.register(descriptor("A", true, 10), Arc::new(OkPlugin("a"))).unwrap();
        let err = registry
            .register(descriptor("A", true, 10), Arc::new(OkPlugin("a")))
            .unwrap_err();
        assert_eq!(err.kind(), crate::voyant_error::ErrorKind::Conflict);
    }

    #[test]
    fn out_of_taxonomy_key_is_rejected_at_registration() {
        let registry = PluginRegistry::new();
        let mut d = descriptor("A", false, 10);
        d.advertised_keys = vec!["charts_extra".to_string()];
        let err = registry.register(d, Arc::new(OkPlugin("a"))).unwrap_err();
        assert_eq!(err.kind(), crate::voyant_error::ErrorKind::Validation);
    }

    #[test]
    fn canonical_keys_cover_taxonomy_examples() {
        assert!(is_canonical_artifact_key("profile.json"));
        assert!(is_canonical_artifact_key("chart_revenue.png"));
        assert!(is_canonical_artifact_key("charts/revenue.html"));
        assert!(!is_canonical_artifact_key("charts_extra"));
    }
}
