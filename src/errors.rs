use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Domain errors raised by the scheduling core.
#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("slot is no longer available")]
    SlotUnavailable,

    #[error("slot not found: {0}")]
    SlotNotFound(String),

    #[error("appointment not found: {0}")]
    AppointmentNotFound(String),

    #[error("payment not found: {0}")]
    PaymentNotFound(String),

    #[error("appointment type unavailable: {0}")]
    AppointmentTypeUnavailable(String),

    #[error("appointment has already been rescheduled the maximum of {limit} times")]
    MaxReschedulesExceeded { limit: u32 },

    #[error("not eligible: {0}")]
    NotEligible(String),

    #[error("slot already exists: {date} {time_slot}")]
    Duplicate { date: String, time_slot: String },

    #[error("slot is booked: {0}")]
    InUse(String),

    #[error("cancellation forbidden: {0}")]
    CancellationForbidden(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Lost a compare-and-set or the write lock. Retried before it reaches callers.
    #[error("concurrent update conflict")]
    Conflict,

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl SchedulingError {
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulingError::SlotUnavailable => "slot_unavailable",
            SchedulingError::SlotNotFound(_) => "slot_not_found",
            SchedulingError::AppointmentNotFound(_) => "appointment_not_found",
            SchedulingError::PaymentNotFound(_) => "payment_not_found",
            SchedulingError::AppointmentTypeUnavailable(_) => "appointment_type_unavailable",
            SchedulingError::MaxReschedulesExceeded { .. } => "max_reschedules_exceeded",
            SchedulingError::NotEligible(_) => "not_eligible",
            SchedulingError::Duplicate { .. } => "duplicate",
            SchedulingError::InUse(_) => "in_use",
            SchedulingError::CancellationForbidden(_) => "cancellation_forbidden",
            SchedulingError::InvalidInput(_) => "invalid_input",
            SchedulingError::Conflict => "conflict",
            SchedulingError::Store(_) => "store",
        }
    }

    /// Contention that is worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            SchedulingError::Conflict => true,
            SchedulingError::Store(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("request timed out")]
    Timeout,

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            AppError::Scheduling(e) => {
                let status = match e {
                    SchedulingError::SlotUnavailable
                    | SchedulingError::Conflict
                    | SchedulingError::Duplicate { .. }
                    | SchedulingError::InUse(_) => StatusCode::CONFLICT,
                    SchedulingError::SlotNotFound(_)
                    | SchedulingError::AppointmentNotFound(_)
                    | SchedulingError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
                    SchedulingError::MaxReschedulesExceeded { .. }
                    | SchedulingError::NotEligible(_)
                    | SchedulingError::CancellationForbidden(_)
                    | SchedulingError::AppointmentTypeUnavailable(_) => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    SchedulingError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    SchedulingError::Store(_) if e.is_transient() => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    SchedulingError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.kind())
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Gateway(_) => (StatusCode::BAD_GATEWAY, "gateway"),
            AppError::Timeout => (StatusCode::SERVICE_UNAVAILABLE, "timeout"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string(), "kind": kind });
        (status, axum::Json(body)).into_response()
    }
}
