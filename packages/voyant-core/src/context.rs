//! `CoreContext` (§9 Design Note: "replace module-level global mutable
//! state with an explicit, constructible context") and `AdmissionApi`
//! (§6.1), the only facade an external HTTP/RPC crate is meant to depend
//! on.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::activity::ActivityHistory;
use crate::artifact::ArtifactReference;
use crate::breaker::CircuitBreakerRegistry;
use crate::config::Settings;
use crate::event_schema::{register_canonical_schemas, SchemaRegistry};
use crate::events::{Event, EventBus, InMemoryTopicPublisher};
use crate::ids::{Clock, JobId, SystemClock, TenantId};
use crate::metrics::MetricsRegistry;
use crate::plugin::PluginRegistry;
use crate::quota::{LimitName, QuotaManager};
use crate::queue::{InMemoryJobQueue, Job, JobStatus, JobType, QueueStats};
use crate::tiers::TierTable;
use crate::voyant_error::VoyantError;
use crate::workflow::{
    analyze_workflow, ingest_data_workflow, profile_workflow, scrape_workflow, ActivityRegistry,
    WorkflowOutcome, WorkflowRunner,
};

/// Owns one instance of every subsystem (§2's component table) and wires
/// them together. Constructed once per process; cheap to clone (every
/// field is an `Arc`) so worker tasks can each hold a copy.
#[derive(Clone)]
pub struct CoreContext {
    pub settings: Arc<Settings>,
    pub clock: Arc<dyn Clock>,
    pub queue: Arc<InMemoryJobQueue>,
    pub quota: Arc<QuotaManager>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub plugins: Arc<PluginRegistry>,
    pub schemas: Arc<SchemaRegistry>,
    pub events: Arc<EventBus>,
    pub metrics: Arc<MetricsRegistry>,
    pub activities: Arc<ActivityRegistry>,
    pub activity_history: Arc<ActivityHistory>,
}

impl CoreContext {
    /// Builds every subsystem from `settings`, registers the canonical
    /// event schemas, and seeds the built-in tier table. `activities` is
    /// supplied by the binary wiring this context (the worker decides
    /// which concrete [`crate::activity::Activity`] implementations back
    /// each named activity, e.g. a real HTTP client vs. a test double).
    pub fn new(settings: Settings, activities: ActivityRegistry) -> Self {
        let schemas = Arc::new(SchemaRegistry::new());
        register_canonical_schemas(&schemas);
        let metrics = Arc::new(MetricsRegistry::new(settings.metrics_mode));

        Self {
            queue: Arc::new(InMemoryJobQueue::new(settings.lease_ttl())),
            quota: Arc::new(QuotaManager::new(TierTable::builtin())),
            breakers: Arc::new(CircuitBreakerRegistry::default()),
            plugins: Arc::new(PluginRegistry::new()),
            events: Arc::new(EventBus::new(
                schemas.clone(),
                Arc::new(InMemoryTopicPublisher::new()),
                metrics.clone(),
            )),
            schemas,
            metrics,
            activities: Arc::new(activities),
            activity_history: Arc::new(ActivityHistory::new()),
            clock: Arc::new(SystemClock),
            settings: Arc::new(settings),
        }
    }

    fn runner(&self, cancellation: CancellationToken) -> WorkflowRunner<'_> {
        WorkflowRunner {
            activities: &self.activities,
            breakers: &self.breakers,
            history: &self.activity_history,
            cancellation,
        }
    }

    /// Dispatches `job` to the workflow its [`JobType`] names, emits
    /// `job.started` beforehand and `job.completed`/`job.failed`
    /// afterward, and releases the job's lease with the outcome. Routed
    /// by the worker pool loop (§5) once per acquired job.
    pub async fn run_job(&self, job: Job, cancellation: CancellationToken) -> WorkflowOutcome {
        let started = std::time::Instant::now();
        self.events.emit(
            "jobs",
            Event::new(
                "job.started",
                job.tenant_id.clone(),
                serde_json::json!({"job_id": job.job_id.to_string()}),
            ),
        );

        let runner = self.runner(cancellation);
        let flags = self.settings.feature_flags();
        let outcome = match job.job_type {
            JobType::Ingest => ingest_data_workflow(&job, &runner).await,
            JobType::Profile => profile_workflow(&job, &runner).await,
            JobType::Analyze | JobType::Preset => {
                analyze_workflow(&job, &runner, &self.plugins, &flags).await
            }
            JobType::Scrape => scrape_workflow(&job, &runner).await,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.quota.record_job_end(&job.tenant_id);

        if outcome.success {
            self.metrics.record_job_completed(elapsed_ms);
            self.link_artifacts(&job, &outcome);
            self.queue.release(
                &job.job_id,
                JobStatus::Completed,
                Some(outcome.summary.clone()),
            );
            self.events.emit(
                "jobs",
                Event::new(
                    "job.completed",
                    job.tenant_id.clone(),
                    serde_json::json!({"job_id": job.job_id.to_string()}),
                ),
            );
        } else {
            self.metrics.record_job_failed(elapsed_ms);
            let error = outcome.error.clone().unwrap_or_default();
            self.queue.release(
                &job.job_id,
                JobStatus::Failed,
                Some(serde_json::json!({"error": error})),
            );
            self.events.emit(
                "jobs",
                Event::new(
                    "job.failed",
                    job.tenant_id.clone(),
                    serde_json::json!({
                        "job_id": job.job_id.to_string(),
                        "error_code": crate::voyant_error::ErrorKind::Internal.code(),
                    }),
                ),
            );
        }

        outcome
    }

    /// Completes the "artifacts linked → lineage recorded" step (§2): charges
    /// each produced artifact's bytes against the tenant's quota and emits a
    /// `lineage.edge` per artifact. A `ProfileWorkflow` job additionally
    /// emits a `source → job` edge when its parameters name a `source`,
    /// covering that workflow's optional lineage emission at exit (§4.3).
    fn link_artifacts(&self, job: &Job, outcome: &WorkflowOutcome) {
        let artifacts: Vec<ArtifactReference> = outcome
            .summary
            .get("artifacts")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        for artifact in &artifacts {
            self.quota
                .record_artifact_bytes(&job.tenant_id, artifact.size_bytes as i64);
            self.events.emit(
                "lineage",
                Event::new(
                    "lineage.edge",
                    job.tenant_id.clone(),
                    serde_json::json!({
                        "from_node": format!("job:{}", job.job_id),
                        "to_node": format!("artifact:{}", artifact.artifact_id),
                        "relation": "produced",
                    }),
                ),
            );
        }

        if job.job_type == JobType::Profile {
            if let Some(source) = job.parameters.get("source").and_then(|v| v.as_str()) {
                self.events.emit(
                    "lineage",
                    Event::new(
                        "lineage.edge",
                        job.tenant_id.clone(),
                        serde_json::json!({
                            "from_node": format!("source:{source}"),
                            "to_node": format!("job:{}", job.job_id),
                            "relation": "profiled",
                        }),
                    ),
                );
            }
        }
    }
}

/// The facade an external HTTP/RPC surface is meant to depend on (§6.1):
/// submit, status, cancel, list artifacts, recent events. Enforces quota
/// admission before a job ever reaches the queue.
pub struct AdmissionApi {
    ctx: CoreContext,
}

impl AdmissionApi {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    /// Admits a job: checks and reserves `jobs_per_day` + `concurrent_jobs`
    /// before enqueueing. Returns `QuotaExceeded` without enqueueing
    /// anything if either counter is already at its tier's limit.
    pub fn submit(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
        priority: i32,
        parameters: Value,
    ) -> Result<JobId, VoyantError> {
        if !self.ctx.quota.record_job_start(&tenant_id) {
            let usage = self.ctx.quota.usage(&tenant_id);
            let tier = self.ctx.quota.tier_of(&tenant_id);
            let (limit, current, max) = if usage.jobs_today >= tier.max_jobs_per_day {
                (LimitName::JobsPerDay, usage.jobs_today as u64, tier.max_jobs_per_day as u64)
            } else {
                (
                    LimitName::ConcurrentJobs,
                    usage.concurrent_jobs as u64,
                    tier.max_concurrent_jobs as u64,
                )
            };
            return Err(VoyantError::quota_exceeded(limit.as_str(), current, max, None));
        }

        let (job_id, _position) =
            self.ctx
                .queue
                .enqueue(tenant_id.clone(), job_type, priority, parameters);

        self.ctx.events.emit(
            "jobs",
            Event::new(
                "job.created",
                tenant_id,
                serde_json::json!({
                    "job_id": job_id.to_string(),
                    "job_type": format!("{:?}", job_type).to_lowercase(),
                }),
            ),
        );

        Ok(job_id)
    }

    pub fn status(&self, job_id: &JobId) -> Option<Job> {
        self.ctx.queue.get(job_id)
    }

    pub fn cancel(&self, job_id: &JobId) -> Result<(), VoyantError> {
        if self.ctx.queue.cancel(job_id) {
            if let Some(job) = self.ctx.queue.get(job_id) {
                self.ctx.events.emit(
                    "jobs",
                    Event::new(
                        "job.cancelled",
                        job.tenant_id,
                        serde_json::json!({"job_id": job_id.to_string()}),
                    ),
                );
            }
            Ok(())
        } else {
            Err(VoyantError::not_found(format!("job '{job_id}'")))
        }
    }

    /// The artifact references produced by a completed job (§6.1), read out
    /// of its stored result summary (§4.4: the generator pipeline stage
    /// builds one `ArtifactReference` per artifact it produces).
    pub fn list_artifacts(&self, job_id: &JobId) -> Option<Vec<ArtifactReference>> {
        let job = self.ctx.queue.get(job_id)?;
        let artifacts = job.result_summary?.get("artifacts")?.clone();
        serde_json::from_value(artifacts).ok()
    }

    pub fn recent_events(&self, limit: usize) -> Vec<Event> {
        self.ctx.events.recent_events(limit)
    }

    pub fn queue_stats(&self, tenant_id: &TenantId) -> QueueStats {
        self.ctx.queue.stats(tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Activity, ActivityContext, ActivityDefinition};
    use crate::plugin::{GeneratedArtifact, Plugin, PluginCategory, PluginDescriptor};
    use crate::workflow::ActivityRegistry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;

    struct EchoActivity;

    #[async_trait]
    impl Activity for EchoActivity {
        async fn execute(&self, input: Value, _ctx: &ActivityContext) -> Result<Value, VoyantError> {
            Ok(json!({"echoed": input}))
        }
    }

    struct OneArtifactPlugin;
    impl Plugin for OneArtifactPlugin {
        fn generate(
            &self,
            _ctx: &Value,
            _settings: &Value,
        ) -> Result<HashMap<String, GeneratedArtifact>, VoyantError> {
            let mut out = HashMap::new();
            out.insert(
                "profile.json".to_string(),
                GeneratedArtifact::new("uri://profile", 2048, "abc123"),
            );
            Ok(out)
        }
    }

    fn ctx_with_ingest() -> CoreContext {
        let mut activities = ActivityRegistry::new();
        activities.register(
            ActivityDefinition::new(
                "run_ingestion",
                chrono::Duration::seconds(5),
                crate::activity::external_service_retry(),
            ),
            "ingestion-source",
            Arc::new(EchoActivity),
        );
        CoreContext::new(Settings::default(), activities)
    }

    #[test]
    fn submit_rejects_when_quota_exhausted() {
        let ctx = ctx_with_ingest();
        let api = AdmissionApi::new(ctx.clone());
        ctx.quota
            .set_tier(&TenantId::new("t1"), "free")
            .unwrap();
        for _ in 0..crate::tiers::FREE.max_concurrent_jobs {
            let _ = api.submit(TenantId::new("t1"), JobType::Ingest, 0, Value::Null);
        }
        let result = api.submit(TenantId::new("t1"), JobType::Ingest, 0, Value::Null);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn run_job_emits_completion_and_releases_the_job() {
        let ctx = ctx_with_ingest();
        let api = AdmissionApi::new(ctx.clone());
        let tenant = TenantId::new("t1");
        let job_id = api.submit(tenant.clone(), JobType::Ingest, 0, json!({"source": "x"})).unwrap();
        let job = ctx.queue.acquire_next(&tenant, "w1", 10).unwrap();
        assert_eq!(job.job_id, job_id);

        let outcome = ctx.run_job(job, CancellationToken::new()).await;
        assert!(outcome.success);

        let stored = api.status(&job_id).unwrap();
        assert_eq!(stored.status, JobStatus::Completed);

        let recent = api.recent_events(10);
        assert!(recent.iter().any(|e| e.event_type == "job.completed"));
    }

    #[tokio::test]
    async fn completed_analysis_links_artifacts_records_bytes_and_emits_lineage() {
        let ctx = ctx_with_ingest();
        ctx.plugins
            .register(
                PluginDescriptor {
                    name: "profiler".to_string(),
                    category: PluginCategory::Report,
                    version: "1.0.0".to_string(),
                    is_core: true,
                    order: 10,
                    feature_flag: None,
                    advertised_keys: vec!["profile.json".to_string()],
                },
                Arc::new(OneArtifactPlugin),
            )
            .unwrap();
        let api = AdmissionApi::new(ctx.clone());
        let tenant = TenantId::new("t1");
        let job_id = api
            .submit(
                tenant.clone(),
                JobType::Analyze,
                0,
                json!({"enable_profile": false, "enable_analyzers": false, "enable_kpis": false}),
            )
            .unwrap();
        let job = ctx.queue.acquire_next(&tenant, "w1", 10).unwrap();

        let outcome = ctx.run_job(job, CancellationToken::new()).await;
        assert!(outcome.success);

        let artifacts = api.list_artifacts(&job_id).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, "profile.json");
        assert_eq!(artifacts[0].format, "json");
        assert_eq!(artifacts[0].size_bytes, 2048);

        assert_eq!(ctx.quota.usage(&tenant).artifacts_bytes, 2048);

        let recent = api.recent_events(10);
        assert!(recent
            .iter()
            .any(|e| e.event_type == "lineage.edge" && e.payload["relation"] == "produced"));
    }
}
