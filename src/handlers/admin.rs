use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::slots::parse_cursor;
use super::{check_auth, run_scheduler};
use crate::errors::AppError;
use crate::models::slot::TIME_FORMAT;
use crate::models::{
    Actor, Appointment, CancelOutcome, CancelSurface, GroupBy, PageRequest, Show, Slot, SlotFilter,
    SlotGroup, When,
};
use crate::scheduler::{
    generate_daily_ranges, group_slots, BookingRequest, BulkCreateSummary, BulkDeleteSummary,
};
use crate::state::AppState;

// GET /api/admin/slots
#[derive(Debug, Default, Deserialize)]
pub struct SlotsQuery {
    #[serde(default)]
    pub when: When,
    #[serde(default)]
    pub show: Show,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub after: Option<String>,
    pub group: Option<GroupBy>,
}

#[derive(Serialize)]
pub struct GroupedSlots {
    groups: Vec<SlotGroup>,
    total: i64,
    next_cursor: Option<String>,
}

pub async fn list_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SlotsQuery>,
) -> Result<Response, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let filter = SlotFilter {
        date_from: query.date_from,
        date_to: query.date_to,
        show: query.show,
        when: query.when,
    };
    let page = PageRequest {
        limit: query.limit,
        page: query.page,
        after: parse_cursor(query.after.as_deref())?,
    };
    let result = run_scheduler(&state, move |s| s.list_slots(&filter, &page)).await?;

    Ok(match query.group {
        Some(by) => Json(GroupedSlots {
            groups: group_slots(result.slots, by),
            total: result.total,
            next_cursor: result.next_cursor,
        })
        .into_response(),
        None => Json(result).into_response(),
    })
}

// POST /api/admin/slots
#[derive(Deserialize)]
pub struct CreateSlotBody {
    pub date: NaiveDate,
    pub time_slot: String,
}

pub async fn create_slot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateSlotBody>,
) -> Result<(StatusCode, Json<Slot>), AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let slot = run_scheduler(&state, move |s| s.create_slot(body.date, &body.time_slot)).await?;
    Ok((StatusCode::CREATED, Json(slot)))
}

// POST /api/admin/slots/generate
#[derive(Deserialize)]
pub struct GenerateBody {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub time_slots: Option<Vec<String>>,
    pub day_start: Option<String>,
    pub day_end: Option<String>,
    pub duration_minutes: Option<u32>,
}

fn parse_time(field: &str, value: Option<&str>) -> Result<NaiveTime, AppError> {
    let value = value.ok_or_else(|| AppError::BadRequest(format!("{field} is required")))?;
    NaiveTime::parse_from_str(value, TIME_FORMAT)
        .map_err(|_| AppError::BadRequest(format!("{field} must be HH:MM, got {value}")))
}

impl GenerateBody {
    fn time_slots(&self) -> Result<Vec<String>, AppError> {
        if let Some(time_slots) = &self.time_slots {
            return Ok(time_slots.clone());
        }
        let day_start = parse_time("day_start", self.day_start.as_deref())?;
        let day_end = parse_time("day_end", self.day_end.as_deref())?;
        let duration = self
            .duration_minutes
            .ok_or_else(|| AppError::BadRequest("duration_minutes is required".to_string()))?;
        Ok(generate_daily_ranges(day_start, day_end, duration))
    }
}

pub async fn generate_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<GenerateBody>,
) -> Result<Json<BulkCreateSummary>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let time_slots = body.time_slots()?;
    if time_slots.is_empty() {
        return Err(AppError::BadRequest("no time slots to create".to_string()));
    }
    let (start, end) = (body.start_date, body.end_date);
    let summary = run_scheduler(&state, move |s| s.bulk_create(start, end, &time_slots)).await?;
    Ok(Json(summary))
}

// POST /api/admin/slots/delete
#[derive(Deserialize)]
pub struct BulkDeleteBody {
    pub ids: Vec<String>,
}

pub async fn bulk_delete_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<BulkDeleteBody>,
) -> Result<Json<BulkDeleteSummary>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let summary = run_scheduler(&state, move |s| s.bulk_delete(&body.ids)).await?;
    Ok(Json(summary))
}

// DELETE /api/admin/slots/:id
pub async fn delete_slot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    run_scheduler(&state, move |s| s.delete_slot(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// POST /api/admin/slots/:id/book
#[derive(Deserialize)]
pub struct AdminBookBody {
    pub appointment_type_id: String,
    pub user_id: Option<String>,
    #[serde(default)]
    pub agenda: String,
}

pub async fn book_slot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slot_id): Path<String>,
    Json(body): Json<AdminBookBody>,
) -> Result<(StatusCode, Json<Appointment>), AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let req = BookingRequest {
        slot_id,
        appointment_type_id: body.appointment_type_id,
        user_id: body.user_id,
        agenda: body.agenda,
    };
    let appointment = run_scheduler(&state, move |s| s.admin_book(&req)).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

// POST /api/admin/appointments/:id/reschedule
#[derive(Deserialize)]
pub struct RescheduleBody {
    pub slot_id: String,
}

pub async fn reschedule_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<RescheduleBody>,
) -> Result<Json<Appointment>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let appointment =
        run_scheduler(&state, move |s| s.reschedule(&id, &body.slot_id, Actor::Admin)).await?;
    Ok(Json(appointment))
}

// POST /api/admin/appointments/:id/cancel
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CancelOutcome>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let outcome = run_scheduler(&state, move |s| s.cancel(&id, CancelSurface::Admin)).await?;
    Ok(Json(outcome))
}

// POST /api/admin/appointments/:id/confirm
#[derive(Debug, Default, Deserialize)]
pub struct ConfirmBody {
    pub meet_url: Option<String>,
}

pub async fn confirm_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<ConfirmBody>>,
) -> Result<Json<Appointment>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let meet_url = body.and_then(|Json(b)| b.meet_url);
    let appointment = run_scheduler(&state, move |s| s.confirm(&id, meet_url)).await?;
    Ok(Json(appointment))
}

// DELETE /api/admin/appointments/:id
pub async fn delete_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    run_scheduler(&state, move |s| s.delete_appointment(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// POST /api/admin/sweep
#[derive(Debug, Default, Deserialize)]
pub struct SweepBody {
    pub older_than_minutes: Option<i64>,
}

pub async fn sweep(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<SweepBody>>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let older_than = match body.and_then(|Json(b)| b.older_than_minutes) {
        None => state.config.policy.pending_grace,
        Some(minutes) if minutes <= 0 => {
            return Err(AppError::BadRequest(
                "older_than_minutes must be positive".to_string(),
            ))
        }
        Some(minutes) => chrono::Duration::try_minutes(minutes).ok_or_else(|| {
            AppError::BadRequest("older_than_minutes is too large".to_string())
        })?,
    };
    let cancelled = run_scheduler(&state, move |s| s.sweep_stale_pending(older_than)).await?;
    Ok(Json(serde_json::json!({ "cancelled": cancelled })))
}
