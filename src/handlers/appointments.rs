use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::run_scheduler;
use crate::errors::AppError;
use crate::models::{Actor, Appointment, CancelOutcome, CancelSurface, Payment};
use crate::scheduler::BookingRequest;
use crate::state::AppState;

#[derive(Serialize)]
pub struct CreatedAppointment {
    pub appointment: Appointment,
    pub payment: Payment,
}

#[derive(Deserialize)]
pub struct RescheduleBody {
    pub slot_id: String,
}

// POST /api/appointments
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BookingRequest>,
) -> Result<(StatusCode, Json<CreatedAppointment>), AppError> {
    let booking = run_scheduler(&state, move |s| s.book(&req)).await?;
    let appointment_id = booking.appointment.id.clone();

    let order_id = match state.gateway.create_order(&booking.intent).await {
        Ok(order_id) => order_id,
        Err(e) => {
            tracing::error!(
                error = %e,
                appointment_id = %appointment_id,
                "payment order failed, releasing slot"
            );
            let id = appointment_id.clone();
            if let Err(cancel_err) =
                run_scheduler(&state, move |s| s.cancel(&id, CancelSurface::System)).await
            {
                tracing::error!(
                    error = %cancel_err,
                    appointment_id = %appointment_id,
                    "compensating cancel failed"
                );
            }
            return Err(AppError::Gateway(e.to_string()));
        }
    };

    let intent = booking.intent.clone();
    let payment = run_scheduler(&state, move |s| {
        s.record_payment(&intent.appointment_id, &order_id, intent.amount, &intent.currency)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedAppointment {
            appointment: booking.appointment,
            payment,
        }),
    ))
}

// GET /api/appointments/:id
pub async fn get_appointment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Appointment>, AppError> {
    let appointment = run_scheduler(&state, move |s| s.get_appointment(&id)).await?;
    Ok(Json(appointment))
}

// POST /api/appointments/:id/reschedule
pub async fn reschedule_appointment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RescheduleBody>,
) -> Result<Json<Appointment>, AppError> {
    let appointment =
        run_scheduler(&state, move |s| s.reschedule(&id, &body.slot_id, Actor::User)).await?;
    Ok(Json(appointment))
}

// POST /api/appointments/:id/cancel
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelOutcome>, AppError> {
    let outcome = run_scheduler(&state, move |s| s.cancel(&id, CancelSurface::User)).await?;
    Ok(Json(outcome))
}
