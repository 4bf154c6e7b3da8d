//! Scheduler loop (§2, §5): periodically requeues jobs whose lease has
//! expired. Runs as its own task, independent of the worker pool loop,
//! so a stalled pool never delays lease recovery.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use voyant_core::CoreContext;

pub async fn run(ctx: CoreContext, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let requeued = ctx.queue.requeue_expired_leases();
                if requeued > 0 {
                    tracing::info!(requeued, "requeued jobs with expired leases");
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("scheduler loop shutting down");
                return;
            }
        }
    }
}
