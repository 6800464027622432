use anyhow::Context;
use async_trait::async_trait;

use super::Notifier;
use crate::models::DomainEvent;

/// POSTs each event as JSON to a configured endpoint (mailer, chat hook).
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build notifier client")?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &DomainEvent) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .context("failed to deliver notification")?
            .error_for_status()
            .context("notification endpoint returned error")?;
        Ok(())
    }
}
