//! Worker process binary: polls the job queue round-robin across
//! tenants, runs each acquired job's workflow to completion, and runs
//! the lease-recovery scheduler loop alongside it.

mod activities;
mod scheduler;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voyant_core::queue::Job;
use voyant_core::workflow::ActivityRegistry;
use voyant_core::{CoreContext, Settings};

#[derive(Parser, Debug)]
#[command(name = "voyant-worker", about = "Voyant execution core worker process")]
struct Cli {
    /// Identifies this process in job leases and logs.
    #[arg(long, default_value_t = default_worker_id())]
    worker_id: String,

    /// Overrides VOYANT_MAX_CONCURRENT_JOBS for this process.
    #[arg(long)]
    max_concurrent_jobs: Option<u32>,
}

fn default_worker_id() -> String {
    format!("worker-{}", uuid::Uuid::new_v4())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,voyant_core=debug,voyant_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env();
    if let Some(max) = cli.max_concurrent_jobs {
        settings.max_concurrent_jobs = max;
    }

    tracing::info!(worker_id = %cli.worker_id, metrics_mode = ?settings.metrics_mode, "starting voyant-worker");

    let mut activity_registry = ActivityRegistry::new();
    activities::register_demo_activities(&mut activity_registry);

    let prune_interval = settings.prune_interval();
    let ctx = CoreContext::new(settings, activity_registry);

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    let scheduler_handle = tokio::spawn(scheduler::run(ctx.clone(), prune_interval, shutdown.clone()));

    run_worker_pool(ctx, cli.worker_id, shutdown.clone())
        .await
        .context("worker pool loop failed")?;

    scheduler_handle.await.ok();
    Ok(())
}

/// The round-robin pool loop (§5): for each tenant with queued capacity,
/// acquire the next job and spawn its workflow; if a full pass over every
/// known tenant finds no work, back off briefly before trying again.
async fn run_worker_pool(ctx: CoreContext, worker_id: String, shutdown: CancellationToken) -> Result<()> {
    let max_concurrent = ctx.settings.max_concurrent_jobs;
    let mut inflight: JoinSet<()> = JoinSet::new();
    let idle_backoff = Duration::from_millis(200);

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let mut acquired_any = false;
        for tenant_id in ctx.queue.tenant_ids() {
            if shutdown.is_cancelled() {
                break;
            }
            if let Some(job) = ctx.queue.acquire_next(&tenant_id, &worker_id, max_concurrent) {
                acquired_any = true;
                spawn_job(&mut inflight, ctx.clone(), job, shutdown.clone());
            }
        }

        // Drain any already-finished tasks without blocking on them.
        while inflight.try_join_next().is_some() {}

        if !acquired_any {
            tokio::select! {
                _ = tokio::time::sleep(idle_backoff) => {}
                _ = shutdown.cancelled() => break,
            }
        }
    }

    tracing::info!("waiting for in-flight jobs to finish");
    while inflight.join_next().await.is_some() {}
    Ok(())
}

fn spawn_job(inflight: &mut JoinSet<()>, ctx: CoreContext, job: Job, shutdown: CancellationToken) {
    let job_id = job.job_id;
    let tenant_id = job.tenant_id.clone();
    inflight.spawn(async move {
        let span = tracing::info_span!("job", tenant_id = %tenant_id, job_id = %job_id);
        let _enter = span.enter();
        tracing::info!("running job");
        let outcome = ctx.run_job(job, shutdown).await;
        if outcome.success {
            tracing::info!("job completed");
        } else {
            tracing::warn!(error = ?outcome.error, "job failed");
        }
    });
}

