use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::scheduler::Scheduler;

/// Runs one sweep off the async runtime.
pub async fn sweep_once(
    scheduler: Arc<Scheduler>,
    older_than: chrono::Duration,
) -> anyhow::Result<Vec<String>> {
    let ids = tokio::task::spawn_blocking(move || scheduler.sweep_stale_pending(older_than))
        .await
        .context("sweep task did not complete")??;
    Ok(ids)
}

/// Background task that periodically cancels PENDING appointments whose
/// payment never arrived.
pub async fn run_sweeper(scheduler: Arc<Scheduler>, every: Duration) {
    let older_than = scheduler.policy().pending_grace;
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match sweep_once(scheduler.clone(), older_than).await {
            Ok(ids) => {
                for id in ids {
                    tracing::info!(appointment_id = %id, "swept stale pending appointment");
                }
            }
            Err(e) => tracing::error!(error = ?e, "stale sweep failed"),
        }
    }
}
