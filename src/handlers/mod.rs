pub mod admin;
pub mod appointments;
pub mod events;
pub mod health;
pub mod slots;
pub mod webhook;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::errors::{AppError, SchedulingError};
use crate::scheduler::Scheduler;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/slots", get(slots::list_available))
        .route("/api/appointments", post(appointments::create_appointment))
        .route("/api/appointments/:id", get(appointments::get_appointment))
        .route(
            "/api/appointments/:id/reschedule",
            post(appointments::reschedule_appointment),
        )
        .route(
            "/api/appointments/:id/cancel",
            post(appointments::cancel_appointment),
        )
        .route("/webhook/payment", post(webhook::payment_webhook))
        .route(
            "/api/admin/slots",
            get(admin::list_slots).post(admin::create_slot),
        )
        .route("/api/admin/slots/generate", post(admin::generate_slots))
        .route("/api/admin/slots/delete", post(admin::bulk_delete_slots))
        .route("/api/admin/slots/:id", delete(admin::delete_slot))
        .route("/api/admin/slots/:id/book", post(admin::book_slot))
        .route(
            "/api/admin/appointments/:id/reschedule",
            post(admin::reschedule_appointment),
        )
        .route(
            "/api/admin/appointments/:id/cancel",
            post(admin::cancel_appointment),
        )
        .route(
            "/api/admin/appointments/:id/confirm",
            post(admin::confirm_appointment),
        )
        .route(
            "/api/admin/appointments/:id",
            delete(admin::delete_appointment),
        )
        .route("/api/admin/sweep", post(admin::sweep))
        .route("/api/admin/events", get(events::events_stream))
        .with_state(state)
}

pub(crate) fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if expected_token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

/// Runs a scheduler call on the blocking pool, bounded by the request timeout.
/// A transaction that commits after the deadline still stands.
pub(crate) async fn run_scheduler<T, F>(state: &AppState, f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&Scheduler) -> Result<T, SchedulingError> + Send + 'static,
{
    let scheduler = state.scheduler.clone();
    let task = tokio::task::spawn_blocking(move || f(&scheduler));
    match tokio::time::timeout(state.config.request_timeout, task).await {
        Ok(Ok(result)) => Ok(result?),
        Ok(Err(e)) => Err(AppError::Internal(format!("scheduler task failed: {e}"))),
        Err(_) => {
            tracing::warn!(
                timeout_ms = state.config.request_timeout.as_millis() as u64,
                "scheduler call timed out"
            );
            Err(AppError::Timeout)
        }
    }
}
