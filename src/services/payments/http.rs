use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::PaymentGateway;
use crate::models::PaymentIntent;

pub struct HttpPaymentGateway {
    base_url: String,
    key_id: String,
    key_secret: String,
    client: reqwest::Client,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: String,
        key_id: String,
        key_secret: String,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build payment gateway client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id,
            key_secret,
            client,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_order(&self, intent: &PaymentIntent) -> anyhow::Result<String> {
        let body = json!({
            "amount": intent.amount,
            "currency": intent.currency,
            "receipt": intent.appointment_id,
            "notes": { "purpose": intent.purpose.as_str() },
        });

        let resp = self
            .client
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .context("failed to call payment gateway")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse payment gateway response")?;

        if !status.is_success() {
            anyhow::bail!("payment gateway error ({}): {}", status, data);
        }

        data["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing order id in payment gateway response"))
    }
}
