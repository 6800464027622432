use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::Serialize;

use super::slot_store::{new_slot, parse_time_slot};
use super::Scheduler;
use crate::db::queries;
use crate::errors::SchedulingError;
use crate::models::slot::TIME_FORMAT;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkCreateSummary {
    pub created: usize,
    pub skipped: usize,
}

/// Splits `[day_start, day_end)` into contiguous ranges of `duration_minutes`.
/// A trailing range shorter than the duration is dropped.
pub fn generate_daily_ranges(
    day_start: NaiveTime,
    day_end: NaiveTime,
    duration_minutes: u32,
) -> Vec<String> {
    if duration_minutes == 0 {
        return vec![];
    }
    let start = day_start.num_seconds_from_midnight() / 60;
    let end = day_end.num_seconds_from_midnight() / 60;

    let mut ranges = vec![];
    let mut cursor = start;
    while let Some(next) = cursor.checked_add(duration_minutes).filter(|next| *next <= end) {
        ranges.push(format!(
            "{}-{}",
            minutes_to_time(cursor).format(TIME_FORMAT),
            minutes_to_time(next).format(TIME_FORMAT)
        ));
        cursor = next;
    }
    ranges
}

fn minutes_to_time(minutes: u32) -> NaiveTime {
    // Callers stay below 24:00, so the fallback is unreachable.
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0).unwrap_or(NaiveTime::MIN)
}

impl Scheduler {
    /// Creates every `(date, time_slot)` pair in the inclusive date range that
    /// does not exist yet. Re-running with the same input creates nothing.
    pub fn bulk_create(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        time_slots: &[String],
    ) -> Result<BulkCreateSummary, SchedulingError> {
        if start_date > end_date {
            return Err(SchedulingError::InvalidInput(format!(
                "start date {start_date} is after end date {end_date}"
            )));
        }
        let days = (end_date - start_date).num_days() + 1;
        if days > self.policy.max_bulk_days {
            return Err(SchedulingError::InvalidInput(format!(
                "date range spans {days} days, limit is {}",
                self.policy.max_bulk_days
            )));
        }

        let ranges = time_slots
            .iter()
            .map(|s| parse_time_slot(s))
            .collect::<Result<BTreeSet<_>, _>>()?;

        let now = self.now();
        let summary = self.transaction(|tx| {
            let mut summary = BulkCreateSummary::default();
            for date in start_date.iter_days().take(days as usize) {
                for range in &ranges {
                    let (slot, starts_at, ends_at) = new_slot(date, range, now);
                    if queries::insert_slot_if_absent(tx, &slot, &starts_at, &ends_at)? {
                        summary.created += 1;
                    } else {
                        summary.skipped += 1;
                    }
                }
            }
            Ok(summary)
        })?;

        tracing::info!(
            %start_date,
            %end_date,
            created = summary.created,
            skipped = summary.skipped,
            "bulk slot generation"
        );
        Ok(summary)
    }
}
