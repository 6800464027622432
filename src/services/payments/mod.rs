pub mod http;

use async_trait::async_trait;

use crate::models::PaymentIntent;

/// Opens orders with the external payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Returns the gateway's order id for the intent.
    async fn create_order(&self, intent: &PaymentIntent) -> anyhow::Result<String>;
}

/// Used when no gateway URL is configured. Orders are only logged; settle
/// them by posting to the payment webhook.
pub struct OfflineGateway;

#[async_trait]
impl PaymentGateway for OfflineGateway {
    async fn create_order(&self, intent: &PaymentIntent) -> anyhow::Result<String> {
        let order_id = format!("offline-{}", uuid::Uuid::new_v4());
        tracing::info!(
            appointment_id = %intent.appointment_id,
            amount = intent.amount,
            currency = %intent.currency,
            order_id = %order_id,
            "offline payment order"
        );
        Ok(order_id)
    }
}
