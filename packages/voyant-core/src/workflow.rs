//! Workflow Runtime (§4.3): the four defined core workflows, each a
//! named, deterministic sequence of [`crate::activity::Activity`]
//! invocations over immutable job parameters.
//!
//! A workflow function never performs IO itself — it only decides which
//! activity runs next and how to fold each activity's output into the
//! next one's input. All IO happens inside [`crate::activity::run_activity`],
//! which applies the declared timeout, retry policy, heartbeat watchdog,
//! and circuit breaker for that activity's external service.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::activity::{Activity, ActivityDefinition, ActivityHistory, run_activity};
use crate::artifact::ArtifactReference;
use crate::breaker::CircuitBreakerRegistry;
use crate::ids::JobId;
use crate::plugin::{run_analyzers, run_generators, FeatureFlags, PluginRegistry};
use crate::queue::Job;
use crate::voyant_error::{ErrorKind, VoyantError};

/// Registers every activity a workflow may invoke, keyed by name, along
/// with the external-service name its circuit breaker is keyed under.
pub struct ActivityRegistry {
    entries: HashMap<&'static str, (ActivityDefinition, &'static str, Arc<dyn Activity>)>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// `service` is the circuit-breaker name this activity's calls are
    /// guarded under (several activities may share one breaker, e.g. all
    /// calls to the same upstream source connector).
    pub fn register(
        &mut self,
        def: ActivityDefinition,
        service: &'static str,
        activity: Arc<dyn Activity>,
    ) {
        self.entries.insert(def.name, (def, service, activity));
    }

    fn get(&self, name: &str) -> Option<&(ActivityDefinition, &'static str, Arc<dyn Activity>)> {
        self.entries.get(name)
    }
}

impl Default for ActivityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub activity: String,
    pub success: bool,
    pub error: Option<String>,
}

impl StepOutcome {
    fn ok(name: &str) -> Self {
        Self {
            activity: name.to_string(),
            success: true,
            error: None,
        }
    }

    fn failed(name: &str, err: &VoyantError) -> Self {
        Self {
            activity: name.to_string(),
            success: false,
            error: Some(err.safe_message()),
        }
    }
}

/// The structured result the runtime persists into `Job.result_summary`
/// or `Job.error` (§4.3: "the workflow outcome is a structured summary").
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOutcome {
    pub job_id: JobId,
    pub success: bool,
    pub steps: Vec<StepOutcome>,
    pub error: Option<String>,
    pub summary: Value,
}

impl WorkflowOutcome {
    fn success(job_id: JobId, steps: Vec<StepOutcome>, summary: Value) -> Self {
        Self {
            job_id,
            success: true,
            steps,
            error: None,
            summary,
        }
    }

    fn failure(job_id: JobId, steps: Vec<StepOutcome>, err: VoyantError) -> Self {
        Self {
            job_id,
            success: false,
            steps,
            error: Some(err.safe_message()),
            summary: Value::Null,
        }
    }
}

/// The per-run handle a workflow function drives activities through.
/// Bundles the activity registry, breaker registry, invocation history,
/// and this run's cancellation token (delivered cooperatively between
/// activity boundaries, §5).
pub struct WorkflowRunner<'a> {
    pub activities: &'a ActivityRegistry,
    pub breakers: &'a CircuitBreakerRegistry,
    pub history: &'a ActivityHistory,
    pub cancellation: CancellationToken,
}

impl<'a> WorkflowRunner<'a> {
    pub async fn call(&self, job_id: JobId, name: &str, input: Value) -> Result<Value, VoyantError> {
        if self.cancellation.is_cancelled() {
            return Err(VoyantError::Cancelled);
        }
        let (def, service, activity) = self
            .activities
            .get(name)
            .ok_or_else(|| VoyantError::internal(format!("activity '{name}' is not registered")))?;
        let breaker = self.breakers.get_or_create(service);
        run_activity(
            job_id,
            def,
            activity.as_ref(),
            input,
            &breaker,
            &self.cancellation,
            self.history,
        )
        .await
    }
}

/// **IngestDataWorkflow**: one activity, `run_ingestion`, under a long
/// timeout and its own retry policy.
pub async fn ingest_data_workflow(job: &Job, runner: &WorkflowRunner<'_>) -> WorkflowOutcome {
    let mut steps = Vec::new();
    match runner
        .call(job.job_id, "run_ingestion", job.parameters.clone())
        .await
    {
        Ok(result) => {
            steps.push(StepOutcome::ok("run_ingestion"));
            WorkflowOutcome::success(job.job_id, steps, result)
        }
        Err(err) => {
            steps.push(StepOutcome::failed("run_ingestion", &err));
            WorkflowOutcome::failure(job.job_id, steps, err)
        }
    }
}

/// **ProfileWorkflow**: one activity, `profile_data`, with an optional
/// `lineage.edge` emission left to the caller (the workflow function
/// itself stays free of event-bus concerns; see
/// [`crate::context::CoreContext::run_job`]).
pub async fn profile_workflow(job: &Job, runner: &WorkflowRunner<'_>) -> WorkflowOutcome {
    let mut steps = Vec::new();
    match runner
        .call(job.job_id, "profile_data", job.parameters.clone())
        .await
    {
        Ok(result) => {
            steps.push(StepOutcome::ok("profile_data"));
            WorkflowOutcome::success(job.job_id, steps, result)
        }
        Err(err) => {
            steps.push(StepOutcome::failed("profile_data", &err));
            WorkflowOutcome::failure(job.job_id, steps, err)
        }
    }
}

fn flag_enabled(params: &Value, key: &str, default: bool) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn is_present_and_nonempty(params: &Value, key: &str) -> bool {
    match params.get(key) {
        Some(Value::Null) | None => false,
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// **AnalyzeWorkflow**: conditionally runs, in order, `profile_data` →
/// `fetch_sample` → `run_analyzers` → `run_kpis` → `run_generators`. Any
/// section is skipped when its flag is false or its inputs are empty
/// (§4.3). `run_analyzers`/`run_generators` route through the plugin
/// pipeline (§4.4) rather than a single [`crate::activity::Activity`]:
/// a core-plugin failure aborts the workflow with a non-retryable error
/// kind, an extended-plugin failure is isolated into the step's summary.
pub async fn analyze_workflow(
    job: &Job,
    runner: &WorkflowRunner<'_>,
    plugins: &PluginRegistry,
    flags: &FeatureFlags,
) -> WorkflowOutcome {
    let mut steps = Vec::new();
    let mut context = job.parameters.clone();

    if flag_enabled(&job.parameters, "enable_profile", true) {
        match runner.call(job.job_id, "profile_data", context.clone()).await {
            Ok(result) => {
                merge_into(&mut context, "profile", result);
                steps.push(StepOutcome::ok("profile_data"));
            }
            Err(err) => {
                steps.push(StepOutcome::failed("profile_data", &err));
                return WorkflowOutcome::failure(job.job_id, steps, err);
            }
        }
    }

    if is_present_and_nonempty(&job.parameters, "sample_query") {
        match runner.call(job.job_id, "fetch_sample", context.clone()).await {
            Ok(result) => {
                merge_into(&mut context, "sample", result);
                steps.push(StepOutcome::ok("fetch_sample"));
            }
            Err(err) => {
                steps.push(StepOutcome::failed("fetch_sample", &err));
                return WorkflowOutcome::failure(job.job_id, steps, err);
            }
        }
    }

    if flag_enabled(&job.parameters, "enable_analyzers", true) {
        let result = run_analyzers(plugins, &context, flags);
        if !result.success {
            let err = VoyantError::internal(format!(
                "core analyzer '{}' failed",
                result.failed_core.as_deref().unwrap_or("unknown")
            ));
            steps.push(StepOutcome::failed("run_analyzers", &err));
            return WorkflowOutcome::failure(job.job_id, steps, err);
        }
        context["analyzer_errors"] = json!(result.errors);
        steps.push(StepOutcome::ok("run_analyzers"));
    }

    if flag_enabled(&job.parameters, "enable_kpis", true) {
        match runner.call(job.job_id, "run_kpis", context.clone()).await {
            Ok(result) => {
                merge_into(&mut context, "kpis", result);
                steps.push(StepOutcome::ok("run_kpis"));
            }
            Err(err) => {
                steps.push(StepOutcome::failed("run_kpis", &err));
                return WorkflowOutcome::failure(job.job_id, steps, err);
            }
        }
    }

    let generator_result = run_generators(plugins, &context, &job.parameters, flags);
    if !generator_result.success {
        let err = VoyantError::internal(format!(
            "core generator '{}' failed",
            generator_result.failed_core.as_deref().unwrap_or("unknown")
        ));
        steps.push(StepOutcome::failed("run_generators", &err));
        return WorkflowOutcome::failure(job.job_id, steps, err);
    }
    steps.push(StepOutcome::ok("run_generators"));

    let now = Utc::now();
    let artifacts: Vec<ArtifactReference> = generator_result
        .artifacts
        .into_iter()
        .map(|(kind, generated)| {
            ArtifactReference::new(
                job.job_id,
                job.tenant_id.clone(),
                kind,
                generated.uri,
                generated.size_bytes,
                generated.checksum,
                now,
            )
        })
        .collect();

    let summary = json!({
        "artifacts": artifacts,
        "generator_errors": generator_result.errors,
        "skipped_generators": generator_result.skipped,
    });
    WorkflowOutcome::success(job.job_id, steps, summary)
}

fn merge_into(context: &mut Value, key: &str, value: Value) {
    if let Some(obj) = context.as_object_mut() {
        obj.insert(key.to_string(), value);
    }
}

/// **ScrapeWorkflow**: for each URL, `fetch_page` → (`extract_with_llm`
/// | `extract_basic`) → optional `process_ocr` / `process_media` →
/// `store_artifact`; concludes with `finalize_job`. Per-URL failures are
/// collected — the workflow returns success-with-errors rather than
/// aborting on a single URL (§4.3).
pub async fn scrape_workflow(job: &Job, runner: &WorkflowRunner<'_>) -> WorkflowOutcome {
    let mut steps = Vec::new();
    let urls: Vec<String> = job
        .parameters
        .get("urls")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let use_llm = flag_enabled(&job.parameters, "use_llm_extraction", false);
    let mut per_url_errors = Vec::new();
    let mut stored_artifacts = Vec::new();

    for url in &urls {
        if runner.cancellation.is_cancelled() {
            return WorkflowOutcome::failure(job.job_id, steps, VoyantError::Cancelled);
        }

        let page_input = json!({"url": url});
        let page = match runner.call(job.job_id, "fetch_page", page_input).await {
            Ok(page) => {
                steps.push(StepOutcome::ok("fetch_page"));
                page
            }
            Err(err) => {
                steps.push(StepOutcome::failed("fetch_page", &err));
                per_url_errors.push(json!({"url": url, "step": "fetch_page", "error": err.safe_message()}));
                continue;
            }
        };

        let extract_activity = if use_llm { "extract_with_llm" } else { "extract_basic" };
        let extracted = match runner.call(job.job_id, extract_activity, page.clone()).await {
            Ok(extracted) => {
                steps.push(StepOutcome::ok(extract_activity));
                extracted
            }
            Err(err) => {
                steps.push(StepOutcome::failed(extract_activity, &err));
                per_url_errors.push(json!({"url": url, "step": extract_activity, "error": err.safe_message()}));
                continue;
            }
        };

        let mut enriched = extracted.clone();
        if is_present_and_nonempty(&page, "ocr_candidates") {
            match runner.call(job.job_id, "process_ocr", page.clone()).await {
                Ok(ocr) => {
                    merge_into(&mut enriched, "ocr", ocr);
                    steps.push(StepOutcome::ok("process_ocr"));
                }
                Err(err) => {
                    steps.push(StepOutcome::failed("process_ocr", &err));
                    per_url_errors.push(json!({"url": url, "step": "process_ocr", "error": err.safe_message()}));
                }
            }
        }
        if is_present_and_nonempty(&page, "media_candidates") {
            match runner.call(job.job_id, "process_media", page.clone()).await {
                Ok(media) => {
                    merge_into(&mut enriched, "media", media);
                    steps.push(StepOutcome::ok("process_media"));
                }
                Err(err) => {
                    steps.push(StepOutcome::failed("process_media", &err));
                    per_url_errors.push(json!({"url": url, "step": "process_media", "error": err.safe_message()}));
                }
            }
        }

        match runner.call(job.job_id, "store_artifact", enriched).await {
            Ok(stored) => {
                steps.push(StepOutcome::ok("store_artifact"));
                stored_artifacts.push(stored);
            }
            Err(err) => {
                steps.push(StepOutcome::failed("store_artifact", &err));
                per_url_errors.push(json!({"url": url, "step": "store_artifact", "error": err.safe_message()}));
            }
        }
    }

    let finalize_input = json!({
        "stored_artifacts": stored_artifacts,
        "errors": per_url_errors,
    });
    match runner.call(job.job_id, "finalize_job", finalize_input).await {
        Ok(result) => {
            steps.push(StepOutcome::ok("finalize_job"));
            let mut summary = result;
            merge_into(&mut summary, "per_url_errors", json!(per_url_errors));
            WorkflowOutcome::success(job.job_id, steps, summary)
        }
        Err(err) => {
            steps.push(StepOutcome::failed("finalize_job", &err));
            WorkflowOutcome::failure(job.job_id, steps, err)
        }
    }
}

/// Resolves the error kind a failed [`WorkflowOutcome`] should be
/// reported under when its `error` string alone is not enough context
/// (used by the status endpoint's `error.kind` field, §7). Workflow
/// outcomes store only the masked message; callers that need the kind
/// keep the original [`VoyantError`] at the point of failure instead.
pub fn default_failure_kind() -> ErrorKind {
    ErrorKind::Internal
}
