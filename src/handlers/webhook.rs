use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;

use super::run_scheduler;
use crate::errors::{AppError, SchedulingError};
use crate::models::PaymentStatus;
use crate::scheduler::Reconciliation;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-payment-signature";

/// Gateways address events by their own `order_id`; `payment_id` is the
/// core's id for the same row.
#[derive(Deserialize)]
pub struct PaymentEvent {
    pub payment_id: Option<String>,
    pub order_id: Option<String>,
    pub status: String,
    pub method: Option<String>,
}

fn keyed_mac(secret: &str, body: &[u8]) -> Option<Hmac<Sha1>> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(mac)
}

/// base64(HMAC-SHA1(secret, body)), the signature the gateway sends.
pub fn sign_payload(secret: &str, body: &[u8]) -> Option<String> {
    let mac = keyed_mac(secret, body)?;
    Some(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

fn validate_signature(secret: &str, signature: &str, body: &[u8]) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature) else {
        return false;
    };
    keyed_mac(secret, body).is_some_and(|mac| mac.verify_slice(&expected).is_ok())
}

// POST /webhook/payment
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Reconciliation>, AppError> {
    // Empty secret skips validation (dev mode).
    let secret = &state.config.payment_webhook_secret;
    if !secret.is_empty() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if signature.is_empty() {
            tracing::warn!("missing X-Payment-Signature header");
            return Err(AppError::Unauthorized);
        }
        if !validate_signature(secret, signature, &body) {
            tracing::warn!("invalid payment webhook signature");
            return Err(AppError::Unauthorized);
        }
    }

    let event: PaymentEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid payment event: {e}")))?;
    let status = PaymentStatus::parse(&event.status)
        .ok_or_else(|| AppError::BadRequest(format!("unknown payment status: {}", event.status)))?;

    tracing::info!(
        payment_id = ?event.payment_id,
        order_id = ?event.order_id,
        status = status.as_str(),
        "payment webhook"
    );
    let reconciliation = run_scheduler(&state, move |s| {
        let payment_id = match (event.payment_id, event.order_id) {
            (Some(payment_id), _) => payment_id,
            (None, Some(order_id)) => s.get_payment_by_order(&order_id)?.id,
            (None, None) => {
                return Err(SchedulingError::InvalidInput(
                    "payment event needs payment_id or order_id".to_string(),
                ))
            }
        };
        s.on_payment_event(&payment_id, status, event.method.as_deref())
    })
    .await?;
    Ok(Json(reconciliation))
}
