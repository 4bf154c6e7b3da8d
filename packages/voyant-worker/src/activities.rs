//! Placeholder [`Activity`] implementations for every name the four
//! workflows invoke. A real deployment replaces these with activities
//! that actually call the source connectors, LLM provider, and object
//! store behind each name; the workflow functions in `voyant_core` never
//! change, since they address activities purely by name through the
//! [`ActivityRegistry`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use voyant_core::activity::{
    external_service_retry, llm_retry, local_compute_retry, Activity, ActivityContext,
    ActivityDefinition,
};
use voyant_core::voyant_error::VoyantError;
use voyant_core::workflow::ActivityRegistry;

/// Echoes its input back under `result` after a short simulated delay,
/// heartbeating once at the midpoint. Stands in for the connector work
/// a production deployment wires in behind the same name.
struct DemoActivity {
    work_duration: Duration,
}

impl DemoActivity {
    fn new(work_duration_ms: u64) -> Self {
        Self {
            work_duration: Duration::from_millis(work_duration_ms),
        }
    }
}

#[async_trait]
impl Activity for DemoActivity {
    async fn execute(&self, input: Value, ctx: &ActivityContext) -> Result<Value, VoyantError> {
        tokio::time::sleep(self.work_duration / 2).await;
        ctx.heartbeat();
        tokio::time::sleep(self.work_duration / 2).await;
        Ok(json!({"input": input, "result": "ok"}))
    }
}

/// Registers every activity name named in §4.3's four workflows against a
/// [`DemoActivity`], with the retry policy and breaker service the
/// workflow's own doc comments assign it.
pub fn register_demo_activities(registry: &mut ActivityRegistry) {
    register(
        registry,
        "run_ingestion",
        "ingestion-source",
        external_service_retry(),
        300,
    );
    register(
        registry,
        "profile_data",
        "local-compute",
        local_compute_retry(),
        50,
    );
    register(
        registry,
        "fetch_sample",
        "sample-source",
        external_service_retry(),
        150,
    );
    register(registry, "run_kpis", "local-compute", local_compute_retry(), 50);
    register(
        registry,
        "fetch_page",
        "scrape-target",
        external_service_retry(),
        200,
    );
    register(registry, "extract_with_llm", "llm-provider", llm_retry(), 800);
    register(
        registry,
        "extract_basic",
        "local-compute",
        local_compute_retry(),
        50,
    );
    register(
        registry,
        "process_ocr",
        "ocr-service",
        external_service_retry(),
        400,
    );
    register(
        registry,
        "process_media",
        "media-service",
        external_service_retry(),
        400,
    );
    register(
        registry,
        "store_artifact",
        "artifact-store",
        external_service_retry(),
        150,
    );
    register(registry, "finalize_job", "local-compute", local_compute_retry(), 20);
}

fn register(
    registry: &mut ActivityRegistry,
    name: &'static str,
    service: &'static str,
    retry_policy: voyant_core::activity::RetryPolicy,
    work_duration_ms: u64,
) {
    let def = ActivityDefinition::new(name, chrono::Duration::seconds(30), retry_policy);
    registry.register(def, service, std::sync::Arc::new(DemoActivity::new(work_duration_ms)));
}
