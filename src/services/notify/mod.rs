pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::models::DomainEvent;

/// Delivers domain events to people (customer mail, owner alerts).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Fallback when no notification endpoint is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &DomainEvent) -> anyhow::Result<()> {
        tracing::info!(
            kind = event.kind(),
            appointment_id = event.appointment_id(),
            "notification"
        );
        Ok(())
    }
}

/// Forwards every published event to the notifier until the bus closes.
/// Delivery failures are logged and never reach the scheduler.
pub async fn run_forwarder(
    mut rx: broadcast::Receiver<DomainEvent>,
    notifier: Arc<dyn Notifier>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(e) = notifier.notify(&event).await {
                    tracing::error!(
                        error = %e,
                        kind = event.kind(),
                        appointment_id = event.appointment_id(),
                        "notification failed"
                    );
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "notification forwarder lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
