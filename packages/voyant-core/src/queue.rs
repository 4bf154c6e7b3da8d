//! Job Queue (§4.1): per-tenant FIFO/priority queue with concurrency caps
//! and lease-based ownership.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{JobId, TenantId};

/// The job types named in §3. `Preset` stands in for the "preset…" slot
/// in the data model's open-ended type list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Ingest,
    Profile,
    Analyze,
    Scrape,
    Preset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub job_type: JobType,
    pub priority: i32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub retry_count: u32,
    pub parameters: Value,
    pub result_summary: Option<Value>,
    pub error: Option<Value>,
}

impl Job {
    fn new(tenant_id: TenantId, job_type: JobType, priority: i32, parameters: Value, now: DateTime<Utc>) -> Self {
        Self {
            job_id: JobId::new(),
            tenant_id,
            job_type,
            priority,
            status: JobStatus::Queued,
            created_at: now,
            lease_expires_at: None,
            worker_id: None,
            retry_count: 0,
            parameters,
            result_summary: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub oldest_age_seconds: Option<i64>,
    pub running_ids: Vec<JobId>,
}

/// Per-tenant FIFO/priority queue plus lease-based ownership of running
/// jobs. A single `Mutex` guards both the tenant queues and the job table
/// so `acquire_next`/`release` are serializable per the concurrency model
/// in §5 ("Job queue: thread-safe; acquire and release must be
/// serializable per tenant").
pub struct InMemoryJobQueue {
    lease_ttl: Duration,
    inner: Mutex<Inner>,
}

struct Inner {
    jobs: HashMap<JobId, Job>,
    // Queued job ids per tenant, kept sorted by (priority asc, created_at
    // asc, job_id asc) on every mutation. Small-N insertion sort is fine
    // here; tenants rarely have more than a few hundred queued jobs.
    tenant_queues: HashMap<TenantId, Vec<JobId>>,
}

impl InMemoryJobQueue {
    pub fn new(lease_ttl: Duration) -> Self {
        Self {
            lease_ttl,
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                tenant_queues: HashMap::new(),
            }),
        }
    }

    fn sort_key(jobs: &HashMap<JobId, Job>, id: &JobId) -> (i32, DateTime<Utc>, String) {
        let job = &jobs[id];
        (job.priority, job.created_at, id.to_string())
    }

    /// Enqueues a newly persisted job (status must already be `Queued`
    /// by the caller's contract) and returns its 0-based position.
    pub fn enqueue(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
        priority: i32,
        parameters: Value,
    ) -> (JobId, usize) {
        let mut inner = self.inner.lock().unwrap();
        let job = Job::new(tenant_id.clone(), job_type, priority, parameters, Utc::now());
        let job_id = job.job_id;
        inner.jobs.insert(job_id, job);

        let queue = inner.tenant_queues.entry(tenant_id).or_default();
        queue.push(job_id);
        queue.sort_by(|a, b| Self::sort_key(&inner.jobs, a).cmp(&Self::sort_key(&inner.jobs, b)));
        let position = queue.iter().position(|id| *id == job_id).unwrap();
        (job_id, position)
    }

    /// Returns a job only if fewer than `max_concurrent` jobs for this
    /// tenant are currently running.
    pub fn acquire_next(&self, tenant_id: &TenantId, worker_id: &str, max_concurrent: u32) -> Option<Job> {
        let mut inner = self.inner.lock().unwrap();

        let running_count = inner
            .jobs
            .values()
            .filter(|j| &j.tenant_id == tenant_id && j.status == JobStatus::Running)
            .count() as u32;
        if running_count >= max_concurrent {
            return None;
        }

        let queue = inner.tenant_queues.get_mut(tenant_id)?;
        if queue.is_empty() {
            return None;
        }
        let job_id = queue.remove(0);

        let now = Utc::now();
        let lease_ttl = self.lease_ttl;
        let job = inner.jobs.get_mut(&job_id).expect("queued job must exist");
        job.status = JobStatus::Running;
        job.worker_id = Some(worker_id.to_string());
        job.lease_expires_at = Some(now + lease_ttl);
        Some(job.clone())
    }

    /// Extends `lease_expires_at` by the lease TTL, only if the job is
    /// still running.
    pub fn renew_lease(&self, job_id: &JobId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Running => {
                job.lease_expires_at = Some(Utc::now() + self.lease_ttl);
                true
            }
            _ => false,
        }
    }

    /// Transitions a job to a terminal status. Idempotent: re-releasing an
    /// already-terminal job is a no-op that returns `true` (first-wins).
    pub fn release(&self, job_id: &JobId, terminal_status: JobStatus, result: Option<Value>) -> bool {
        assert!(terminal_status.is_terminal(), "release requires a terminal status");
        let mut inner = self.inner.lock().unwrap();
        match inner.jobs.get_mut(job_id) {
            Some(job) => {
                if job.status.is_terminal() {
                    return true;
                }
                job.status = terminal_status;
                job.lease_expires_at = None;
                job.worker_id = None;
                match terminal_status {
                    JobStatus::Failed => job.error = result,
                    _ => job.result_summary = result,
                }
                true
            }
            None => false,
        }
    }

    /// For every running job whose lease has expired: requeue at the
    /// *front* of its tenant's queue (recovery wins over new work) and
    /// bump `retry_count`. Returns the number of jobs requeued.
    pub fn requeue_expired_leases(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let expired: Vec<(TenantId, JobId)> = inner
            .jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Running
                    && j.lease_expires_at.map(|exp| now > exp).unwrap_or(false)
            })
            .map(|j| (j.tenant_id.clone(), j.job_id))
            .collect();

        for (tenant_id, job_id) in &expired {
            if let Some(job) = inner.jobs.get_mut(job_id) {
                job.status = JobStatus::Queued;
                job.retry_count += 1;
                job.lease_expires_at = None;
                job.worker_id = None;
            }
            inner
                .tenant_queues
                .entry(tenant_id.clone())
                .or_default()
                .insert(0, *job_id);
        }
        expired.len()
    }

    /// Cancels a job in `Queued` or `Running` state. Returns `false` for
    /// unknown or already-terminal jobs.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let status = match inner.jobs.get(job_id) {
            Some(j) => j.status,
            None => return false,
        };
        match status {
            JobStatus::Queued => {
                if let Some(job) = inner.jobs.get(job_id) {
                    let tenant_id = job.tenant_id.clone();
                    if let Some(queue) = inner.tenant_queues.get_mut(&tenant_id) {
                        queue.retain(|id| id != job_id);
                    }
                }
                let job = inner.jobs.get_mut(job_id).unwrap();
                job.status = JobStatus::Cancelled;
                true
            }
            JobStatus::Running => {
                let job = inner.jobs.get_mut(job_id).unwrap();
                job.status = JobStatus::Cancelled;
                job.lease_expires_at = None;
                job.worker_id = None;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, job_id: &JobId) -> Option<Job> {
        self.inner.lock().unwrap().jobs.get(job_id).cloned()
    }

    pub fn queue_position(&self, job_id: &JobId) -> Option<usize> {
        let inner = self.inner.lock().unwrap();
        let job = inner.jobs.get(job_id)?;
        let queue = inner.tenant_queues.get(&job.tenant_id)?;
        queue.iter().position(|id| id == job_id)
    }

    /// Every tenant this queue has ever seen a job for, including ones
    /// with no queued work right now. Used by the worker pool loop (§5)
    /// to round-robin across tenants without a separate tenant registry.
    pub fn tenant_ids(&self) -> Vec<TenantId> {
        self.inner.lock().unwrap().tenant_queues.keys().cloned().collect()
    }

    pub fn stats(&self, tenant_id: &TenantId) -> QueueStats {
        let inner = self.inner.lock().unwrap();
        let queued = inner
            .tenant_queues
            .get(tenant_id)
            .map(|q| q.len())
            .unwrap_or(0);
        let running: Vec<&Job> = inner
            .jobs
            .values()
            .filter(|j| &j.tenant_id == tenant_id && j.status == JobStatus::Running)
            .collect();
        let now = Utc::now();
        let oldest_age_seconds = running
            .iter()
            .map(|j| (now - j.created_at).num_seconds())
            .max();
        QueueStats {
            queued,
            running: running.len(),
            oldest_age_seconds,
            running_ids: running.iter().map(|j| j.job_id).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(s: &str) -> TenantId {
        TenantId::new(s)
    }

    /// Scenario 1 (§8): priority preemption.
    #[test]
    fn priority_then_created_at_ordering() {
        let queue = InMemoryJobQueue::new(Duration::seconds(300));
        let t = tenant("T1");
        let (a, _) = queue.enqueue(t.clone(), JobType::Analyze, 10, Value::Null);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let (b, _) = queue.enqueue(t.clone(), JobType::Analyze, 5, Value::Null);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let (c, _) = queue.enqueue(t.clone(), JobType::Analyze, 10, Value::Null);

        let first = queue.acquire_next(&t, "w1", 10).unwrap();
        assert_eq!(first.job_id, b);
        let second = queue.acquire_next(&t, "w1", 10).unwrap();
        assert_eq!(second.job_id, a);
        let third = queue.acquire_next(&t, "w1", 10).unwrap();
        assert_eq!(third.job_id, c);
    }

    /// Scenario 2 (§8): concurrency cap.
    #[test]
    fn concurrency_cap_blocks_second_acquire() {
        let queue = InMemoryJobQueue::new(Duration::seconds(300));
        let t = tenant("T1");
        queue.enqueue(t.clone(), JobType::Ingest, 0, Value::Null);
        queue.enqueue(t.clone(), JobType::Ingest, 0, Value::Null);

        let first = queue.acquire_next(&t, "w1", 1).unwrap();
        assert!(queue.acquire_next(&t, "w1", 1).is_none());

        assert!(queue.release(&first.job_id, JobStatus::Completed, None));
        assert!(queue.acquire_next(&t, "w1", 1).is_some());
    }

    /// Scenario 3 (§8): lease expiry, front-insertion.
    #[test]
    fn expired_lease_is_requeued_at_front_with_incremented_retry() {
        let queue = InMemoryJobQueue::new(Duration::seconds(0));
        let t = tenant("T1");
        let (job_id, _) = queue.enqueue(t.clone(), JobType::Ingest, 0, Value::Null);

        let acquired = queue.acquire_next(&t, "w1", 10).unwrap();
        assert_eq!(acquired.status, JobStatus::Running);

        std::thread::sleep(std::time::Duration::from_millis(5));
        let requeued = queue.requeue_expired_leases();
        assert_eq!(requeued, 1);

        let job = queue.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, 1);
        assert_eq!(queue.stats(&t).queued, 1);
    }

    #[test]
    fn release_is_idempotent_first_wins() {
        let queue = InMemoryJobQueue::new(Duration::seconds(300));
        let t = tenant("T1");
        let (job_id, _) = queue.enqueue(t.clone(), JobType::Ingest, 0, Value::Null);
        queue.acquire_next(&t, "w1", 10);

        assert!(queue.release(&job_id, JobStatus::Completed, None));
        assert!(queue.release(&job_id, JobStatus::Failed, None));
        assert_eq!(queue.get(&job_id).unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn cancel_queued_job_removes_it_from_the_queue() {
        let queue = InMemoryJobQueue::new(Duration::seconds(300));
        let t = tenant("T1");
        let (job_id, _) = queue.enqueue(t.clone(), JobType::Ingest, 0, Value::Null);

        assert!(queue.cancel(&job_id));
        assert!(queue.acquire_next(&t, "w1", 10).is_none());
        assert_eq!(queue.get(&job_id).unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn acquire_on_empty_queue_returns_none_without_blocking() {
        let queue = InMemoryJobQueue::new(Duration::seconds(300));
        let t = tenant("T1");
        assert!(queue.acquire_next(&t, "w1", 10).is_none());
    }

    #[test]
    fn release_on_unknown_job_returns_false() {
        let queue = InMemoryJobQueue::new(Duration::seconds(300));
        assert!(!queue.release(&JobId::new(), JobStatus::Completed, None));
    }
}
