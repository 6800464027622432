use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;

use super::Scheduler;
use crate::db::queries;
use crate::errors::SchedulingError;
use crate::models::{PageRequest, Slot, SlotCursor, SlotFilter, SlotPage, TimeRange};

pub(crate) fn parse_time_slot(s: &str) -> Result<TimeRange, SchedulingError> {
    TimeRange::parse(s).map_err(|e| SchedulingError::InvalidInput(e.to_string()))
}

/// Builds an unsaved free slot plus its `starts_at`/`ends_at` bounds.
pub(crate) fn new_slot(
    date: NaiveDate,
    range: &TimeRange,
    now: NaiveDateTime,
) -> (Slot, NaiveDateTime, NaiveDateTime) {
    let slot = Slot {
        id: uuid::Uuid::new_v4().to_string(),
        date,
        time_slot: range.to_canonical(),
        is_booked: false,
        created_at: now,
        updated_at: now,
    };
    (slot, date.and_time(range.start), date.and_time(range.end))
}

/// True once the slot's start time has been reached.
pub(crate) fn has_started(slot: &Slot, now: &NaiveDateTime) -> Result<bool, SchedulingError> {
    let starts_at = slot
        .starts_at()
        .map_err(|e| SchedulingError::InvalidInput(e.to_string()))?;
    Ok(starts_at <= *now)
}

pub(crate) fn load_slot(conn: &Connection, id: &str) -> Result<Slot, SchedulingError> {
    queries::get_slot(conn, id)?.ok_or_else(|| SchedulingError::SlotNotFound(id.to_string()))
}

/// free → booked. A miss means someone else got there first.
pub(crate) fn acquire_slot(
    conn: &Connection,
    id: &str,
    now: &NaiveDateTime,
) -> Result<(), SchedulingError> {
    if queries::set_slot_booked(conn, id, true, false, now)? {
        Ok(())
    } else {
        Err(SchedulingError::Conflict)
    }
}

/// booked → free. Releasing an already free or missing slot is logged, not fatal.
pub(crate) fn release_slot(
    conn: &Connection,
    id: &str,
    now: &NaiveDateTime,
) -> Result<(), SchedulingError> {
    if !queries::set_slot_booked(conn, id, false, true, now)? {
        tracing::warn!(slot_id = %id, "released slot was not booked");
    }
    Ok(())
}

impl Scheduler {
    pub fn create_slot(&self, date: NaiveDate, time_slot: &str) -> Result<Slot, SchedulingError> {
        let range = parse_time_slot(time_slot)?;
        let (slot, starts_at, ends_at) = new_slot(date, &range, self.now());

        self.with_conn(|conn| {
            if queries::insert_slot_if_absent(conn, &slot, &starts_at, &ends_at)? {
                tracing::info!(
                    slot_id = %slot.id,
                    date = %slot.date,
                    time_slot = %slot.time_slot,
                    "slot created"
                );
                Ok(slot.clone())
            } else {
                Err(SchedulingError::Duplicate {
                    date: slot.date.to_string(),
                    time_slot: slot.time_slot.clone(),
                })
            }
        })
    }

    pub fn get_slot(&self, id: &str) -> Result<Slot, SchedulingError> {
        self.with_conn(|conn| load_slot(conn, id))
    }

    pub fn list_slots(
        &self,
        filter: &SlotFilter,
        page: &PageRequest,
    ) -> Result<SlotPage, SchedulingError> {
        if page.after.is_none() && page.offset().is_none() {
            return Err(SchedulingError::InvalidInput(format!(
                "page {} is out of range",
                page.page.unwrap_or(1)
            )));
        }
        let now = self.now();
        self.with_conn(|conn| {
            let (slots, total) = queries::list_slots(conn, filter, page, &now)?;
            let next_cursor = if slots.len() as i64 == page.effective_limit() {
                slots.last().map(|s| SlotCursor::after(s).encode())
            } else {
                None
            };
            Ok(SlotPage {
                slots,
                total,
                next_cursor,
            })
        })
    }

    /// Low-level compare-and-set on `is_booked`. Booking, rescheduling and
    /// cancellation go through their own operations, which keep the slot and
    /// its appointment consistent.
    pub fn set_booked(&self, id: &str, value: bool, expected: bool) -> Result<(), SchedulingError> {
        let now = self.now();
        self.with_conn(|conn| {
            if queries::set_slot_booked(conn, id, value, expected, &now)? {
                return Ok(());
            }
            match queries::get_slot(conn, id)? {
                Some(_) => Err(SchedulingError::Conflict),
                None => Err(SchedulingError::SlotNotFound(id.to_string())),
            }
        })
    }

    pub fn delete_slot(&self, id: &str) -> Result<(), SchedulingError> {
        self.transaction(|tx| {
            let slot = load_slot(tx, id)?;
            if slot.is_booked || !queries::delete_free_slot(tx, id)? {
                return Err(SchedulingError::InUse(id.to_string()));
            }
            Ok(())
        })?;
        tracing::info!(slot_id = %id, "slot deleted");
        Ok(())
    }
}
