//! Activity Executor (§4.3): invoke a registered activity with retry,
//! timeout, heartbeat, and cooperative cancellation, wrapped by the
//! circuit breaker for the external service it calls.
//!
//! An [`Activity`] is a named, side-effectful unit. The [`WorkflowRuntime`]
//! (see [`crate::workflow`]) drives a sequence of activities; this module
//! owns a single invocation's lifecycle: attempt bookkeeping, backoff with
//! jitter, the heartbeat watchdog, and the bounded per-job invocation
//! history used for observability (§3: "Retains at most the last N
//! attempts per job").

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::breaker::CircuitBreaker;
use crate::ids::JobId;
use crate::voyant_error::{ErrorKind, VoyantError};

/// {initial_interval, max_interval, max_attempts, multiplier,
/// non_retryable_error_kinds} from §4.3.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_attempts: u32,
    pub multiplier: f64,
    pub non_retryable_error_kinds: Vec<ErrorKind>,
}

impl RetryPolicy {
    /// Whether an error of this kind should abort immediately rather than
    /// retry. Explicit entries in `non_retryable_error_kinds` always win;
    /// absent an explicit entry, fall back to the kind's own default.
    pub fn is_non_retryable(&self, kind: ErrorKind) -> bool {
        if self.non_retryable_error_kinds.contains(&kind) {
            return true;
        }
        !kind.is_retryable_by_default()
    }

    /// Exponential backoff with full jitter: draws uniformly from
    /// `[0, min(max_interval, initial * multiplier^(attempt-1))]`. Full
    /// jitter only ever shrinks the wait relative to the un-jittered
    /// exponential curve, so collisions between retrying callers are
    /// reduced, never amplified (§4.3).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi((attempt.saturating_sub(1)) as i32);
        let uncapped_ms = (self.initial_interval.num_milliseconds() as f64) * exp;
        let capped_ms = uncapped_ms.min(self.max_interval.num_milliseconds() as f64);
        let jittered_ms = fastrand::f64() * capped_ms.max(0.0);
        Duration::milliseconds(jittered_ms.round() as i64)
    }
}

/// Network-bound activities: `fetch_page`, `run_ingestion`.
pub fn external_service_retry() -> RetryPolicy {
    RetryPolicy {
        initial_interval: Duration::milliseconds(500),
        max_interval: Duration::seconds(30),
        max_attempts: 5,
        multiplier: 2.0,
        non_retryable_error_kinds: vec![
            ErrorKind::Validation,
            ErrorKind::Unauthorized,
            ErrorKind::Forbidden,
            ErrorKind::NotFound,
        ],
    }
}

/// `extract_with_llm`: fewer attempts, longer intervals; content-policy
/// rejections surface through `ErrorKind::Validation`, already
/// non-retryable by default.
pub fn llm_retry() -> RetryPolicy {
    RetryPolicy {
        initial_interval: Duration::seconds(2),
        max_interval: Duration::seconds(60),
        max_attempts: 3,
        multiplier: 3.0,
        non_retryable_error_kinds: vec![ErrorKind::Validation, ErrorKind::Unauthorized],
    }
}

/// `profile_data`, `run_analyzers`, `run_kpis`: local failures rarely
/// self-heal, so short intervals and few attempts.
pub fn local_compute_retry() -> RetryPolicy {
    RetryPolicy {
        initial_interval: Duration::milliseconds(100),
        max_interval: Duration::seconds(2),
        max_attempts: 2,
        multiplier: 2.0,
        non_retryable_error_kinds: vec![ErrorKind::Validation],
    }
}

/// Per-invocation context handed to [`Activity::execute`]. Carries the
/// heartbeat clock the runtime's watchdog reads and the cancellation
/// token cooperative activities should poll between units of work.
#[derive(Clone)]
pub struct ActivityContext {
    heartbeat_at_millis: std::sync::Arc<AtomicI64>,
    cancellation: CancellationToken,
}

impl ActivityContext {
    fn new(cancellation: CancellationToken) -> Self {
        Self {
            heartbeat_at_millis: std::sync::Arc::new(AtomicI64::new(Utc::now().timestamp_millis())),
            cancellation,
        }
    }

    /// Resets the heartbeat deadline. Long-running activities should call
    /// this periodically; a heartbeat older than `heartbeat_timeout` is
    /// treated as a failure by the watchdog (§4.3).
    pub fn heartbeat(&self) {
        self.heartbeat_at_millis
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once cancellation has been requested; intended for use in
    /// `tokio::select!` at a cooperative checkpoint inside the activity.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancellation.cancelled()
    }

    fn last_heartbeat(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.heartbeat_at_millis.load(Ordering::SeqCst))
            .unwrap_or_else(Utc::now)
    }
}

/// A named, side-effectful unit invoked by a workflow. Implementations
/// hold no state between invocations; all context comes through `input`
/// and `ctx`.
#[async_trait]
pub trait Activity: Send + Sync {
    async fn execute(&self, input: Value, ctx: &ActivityContext) -> Result<Value, VoyantError>;
}

/// Static per-activity configuration: timeout, retry policy, heartbeat
/// deadline.
#[derive(Clone)]
pub struct ActivityDefinition {
    pub name: &'static str,
    pub start_to_close: Duration,
    pub retry_policy: RetryPolicy,
    pub heartbeat_timeout: Duration,
}

impl ActivityDefinition {
    pub fn new(name: &'static str, start_to_close: Duration, retry_policy: RetryPolicy) -> Self {
        Self {
            name,
            start_to_close,
            retry_policy,
            heartbeat_timeout: Duration::seconds(30),
        }
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

/// Ephemeral per-attempt record (§3: "Activity Invocation"). Not
/// necessarily persisted; the in-memory history below retains the last N
/// for the status endpoint / debug tooling.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityInvocation {
    pub job_id: JobId,
    pub activity_name: String,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub input_hash: u64,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub status: ActivityStatus,
    pub error: Option<String>,
}

const MAX_INVOCATIONS_PER_JOB: usize = 20;

/// Bounded per-job ring of [`ActivityInvocation`] records.
#[derive(Default)]
pub struct ActivityHistory {
    inner: Mutex<HashMap<JobId, VecDeque<ActivityInvocation>>>,
}

impl ActivityHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, invocation: ActivityInvocation) {
        let mut inner = self.inner.lock().unwrap();
        let ring = inner.entry(invocation.job_id).or_default();
        if ring.len() == MAX_INVOCATIONS_PER_JOB {
            ring.pop_front();
        }
        ring.push_back(invocation);
    }

    pub fn for_job(&self, job_id: &JobId) -> Vec<ActivityInvocation> {
        self.inner
            .lock()
            .unwrap()
            .get(job_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn hash_input(input: &Value) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.to_string().hash(&mut hasher);
    hasher.finish()
}

/// Polls the shared heartbeat clock until it goes stale by more than
/// `timeout`, then resolves. Raced against the activity future in
/// [`run_activity`] so a hung activity that stops heartbeating is treated
/// as a failure rather than hanging forever within its own timeout.
async fn heartbeat_watchdog(ctx: &ActivityContext, timeout: Duration) {
    let poll_every = StdDuration::from_millis(
        (timeout.num_milliseconds() / 4).clamp(50, 5_000) as u64,
    );
    loop {
        tokio::time::sleep(poll_every).await;
        let elapsed = Utc::now() - ctx.last_heartbeat();
        if elapsed > timeout {
            return;
        }
    }
}

/// Runs `activity` to completion, applying timeout, retry-with-jittered-
/// backoff, the heartbeat watchdog, cooperative cancellation, and the
/// circuit breaker for its declared external service, in that order.
///
/// Cancellation is checked at every attempt boundary (before dispatch and
/// before sleeping between retries), matching §5: "cancellation is
/// delivered between steps and at heartbeat checkpoints".
pub async fn run_activity(
    job_id: JobId,
    def: &ActivityDefinition,
    activity: &dyn Activity,
    input: Value,
    breaker: &CircuitBreaker,
    cancellation: &CancellationToken,
    history: &ActivityHistory,
) -> Result<Value, VoyantError> {
    let input_hash = hash_input(&input);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if cancellation.is_cancelled() {
            history.record(ActivityInvocation {
                job_id,
                activity_name: def.name.to_string(),
                attempt,
                started_at: Utc::now(),
                input_hash,
                heartbeat_at: None,
                status: ActivityStatus::Cancelled,
                error: None,
            });
            return Err(VoyantError::Cancelled);
        }

        let ctx = ActivityContext::new(cancellation.clone());
        let started_at = Utc::now();
        history.record(ActivityInvocation {
            job_id,
            activity_name: def.name.to_string(),
            attempt,
            started_at,
            input_hash,
            heartbeat_at: None,
            status: ActivityStatus::Running,
            error: None,
        });

        let timeout_std = def
            .start_to_close
            .to_std()
            .unwrap_or(StdDuration::from_secs(60));
        let attempt_input = input.clone();
        let guarded = breaker.guard(|| async {
            tokio::time::timeout(timeout_std, activity.execute(attempt_input, &ctx))
                .await
                .map_err(|_| {
                    VoyantError::Timeout {
                        elapsed_ms: def.start_to_close.num_milliseconds().max(0) as u64,
                    }
                })?
        });

        let result = tokio::select! {
            r = guarded => r,
            _ = cancellation.cancelled() => Err(VoyantError::Cancelled),
            _ = heartbeat_watchdog(&ctx, def.heartbeat_timeout) => Err(VoyantError::Timeout {
                elapsed_ms: def.heartbeat_timeout.num_milliseconds().max(0) as u64,
            }),
        };

        match result {
            Ok(value) => {
                history.record(ActivityInvocation {
                    job_id,
                    activity_name: def.name.to_string(),
                    attempt,
                    started_at,
                    input_hash,
                    heartbeat_at: Some(ctx.last_heartbeat()),
                    status: ActivityStatus::Succeeded,
                    error: None,
                });
                return Ok(value);
            }
            Err(err) => {
                let kind = err.kind();
                let final_status = match kind {
                    ErrorKind::Cancelled => ActivityStatus::Cancelled,
                    ErrorKind::Timeout => ActivityStatus::TimedOut,
                    _ => ActivityStatus::Failed,
                };
                let non_retryable =
                    matches!(kind, ErrorKind::Cancelled) || def.retry_policy.is_non_retryable(kind);

                if non_retryable || attempt >= def.retry_policy.max_attempts {
                    history.record(ActivityInvocation {
                        job_id,
                        activity_name: def.name.to_string(),
                        attempt,
                        started_at,
                        input_hash,
                        heartbeat_at: Some(ctx.last_heartbeat()),
                        status: final_status,
                        error: Some(err.safe_message()),
                    });
                    return Err(err);
                }

                history.record(ActivityInvocation {
                    job_id,
                    activity_name: def.name.to_string(),
                    attempt,
                    started_at,
                    input_hash,
                    heartbeat_at: Some(ctx.last_heartbeat()),
                    status: final_status,
                    error: Some(err.safe_message()),
                });

                let backoff = def.retry_policy.backoff_for_attempt(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(backoff.to_std().unwrap_or(StdDuration::ZERO)) => {}
                    _ = cancellation.cancelled() => return Err(VoyantError::Cancelled),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{BreakerConfig, CircuitBreaker};
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    struct FlakyActivity {
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl Activity for FlakyActivity {
        async fn execute(&self, _input: Value, _ctx: &ActivityContext) -> Result<Value, VoyantError> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(VoyantError::TransientExternal {
                    message: "flaky".to_string(),
                });
            }
            Ok(serde_json::json!({"ok": true}))
        }
    }

    struct AlwaysFailsValidation;

    #[async_trait]
    impl Activity for AlwaysFailsValidation {
        async fn execute(&self, _input: Value, _ctx: &ActivityContext) -> Result<Value, VoyantError> {
            Err(VoyantError::validation("bad input"))
        }
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("svc", BreakerConfig::default())
    }

    #[tokio::test]
    async fn retries_transient_failure_then_succeeds() {
        let activity = FlakyActivity {
            fail_times: AtomicU32::new(2),
        };
        let def = ActivityDefinition::new("fetch_page", Duration::seconds(5), external_service_retry());
        let history = ActivityHistory::new();
        let cancellation = CancellationToken::new();
        let result = run_activity(
            JobId::new(),
            &def,
            &activity,
            Value::Null,
            &breaker(),
            &cancellation,
            &history,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn non_retryable_error_aborts_immediately() {
        let activity = AlwaysFailsValidation;
        let def = ActivityDefinition::new("fetch_page", Duration::seconds(5), external_service_retry());
        let history = ActivityHistory::new();
        let job_id = JobId::new();
        let cancellation = CancellationToken::new();
        let result = run_activity(
            job_id,
            &def,
            &activity,
            Value::Null,
            &breaker(),
            &cancellation,
            &history,
        )
        .await;
        assert!(matches!(result, Err(VoyantError::Validation { .. })));
        assert_eq!(history.for_job(&job_id).len(), 1, "must not retry a non-retryable kind");
    }

    #[tokio::test]
    async fn cancellation_before_dispatch_short_circuits() {
        let activity = FlakyActivity {
            fail_times: AtomicU32::new(0),
        };
        let def = ActivityDefinition::new("fetch_page", Duration::seconds(5), external_service_retry());
        let history = ActivityHistory::new();
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let result = run_activity(
            JobId::new(),
            &def,
            &activity,
            Value::Null,
            &breaker(),
            &cancellation,
            &history,
        )
        .await;
        assert!(matches!(result, Err(VoyantError::Cancelled)));
    }

    #[test]
    fn jitter_never_exceeds_the_uncapped_exponential_curve() {
        let policy = external_service_retry();
        for attempt in 1..=5 {
            let backoff = policy.backoff_for_attempt(attempt);
            let exp = policy.multiplier.powi((attempt - 1) as i32);
            let uncapped = (policy.initial_interval.num_milliseconds() as f64) * exp;
            let ceiling = uncapped.min(policy.max_interval.num_milliseconds() as f64);
            assert!(backoff.num_milliseconds() as f64 <= ceiling + 1.0);
        }
    }

    #[test]
    fn non_retryable_list_overrides_default_retryable_kind() {
        let mut policy = local_compute_retry();
        assert!(!policy.is_non_retryable(ErrorKind::TransientExternal));
        policy.non_retryable_error_kinds.push(ErrorKind::TransientExternal);
        assert!(policy.is_non_retryable(ErrorKind::TransientExternal));
    }

    #[test]
    fn history_ring_is_bounded_per_job() {
        let history = ActivityHistory::new();
        let job_id = JobId::new();
        for attempt in 0..(MAX_INVOCATIONS_PER_JOB as u32 + 5) {
            history.record(ActivityInvocation {
                job_id,
                activity_name: "fetch_page".to_string(),
                attempt,
                started_at: Utc::now(),
                input_hash: 0,
                heartbeat_at: None,
                status: ActivityStatus::Succeeded,
                error: None,
            });
        }
        assert_eq!(history.for_job(&job_id).len(), MAX_INVOCATIONS_PER_JOB);
    }
}
