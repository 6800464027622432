use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;

use super::run_scheduler;
use crate::errors::AppError;
use crate::models::{PageRequest, Show, SlotCursor, SlotFilter, SlotPage, When};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AvailableQuery {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub after: Option<String>,
}

pub(crate) fn parse_cursor(after: Option<&str>) -> Result<Option<SlotCursor>, AppError> {
    after
        .filter(|s| !s.is_empty())
        .map(|s| {
            SlotCursor::decode(s).map_err(|e| AppError::BadRequest(format!("invalid cursor: {e}")))
        })
        .transpose()
}

// GET /api/slots
pub async fn list_available(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailableQuery>,
) -> Result<Json<SlotPage>, AppError> {
    let filter = SlotFilter {
        date_from: query.date_from,
        date_to: query.date_to,
        show: Show::Available,
        when: When::Upcoming,
    };
    let page = PageRequest {
        limit: query.limit,
        page: None,
        after: parse_cursor(query.after.as_deref())?,
    };

    let slots = run_scheduler(&state, move |s| s.list_slots(&filter, &page)).await?;
    Ok(Json(slots))
}
