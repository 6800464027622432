use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    pub id: String,
    pub date: NaiveDate,
    pub time_slot: String,
    pub is_booked: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Slot {
    pub fn range(&self) -> anyhow::Result<TimeRange> {
        TimeRange::parse(&self.time_slot)
    }

    pub fn starts_at(&self) -> anyhow::Result<NaiveDateTime> {
        Ok(self.date.and_time(self.range()?.start))
    }

    pub fn ends_at(&self) -> anyhow::Result<NaiveDateTime> {
        Ok(self.date.and_time(self.range()?.end))
    }
}

/// An intra-day `HH:MM-HH:MM` window. Start is inclusive, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| anyhow::anyhow!("invalid time slot (expected HH:MM-HH:MM): {s}"))?;
        let start = parse_time(start.trim())?;
        let end = parse_time(end.trim())?;
        if start >= end {
            return Err(anyhow::anyhow!("time slot must end after it starts: {s}"));
        }
        Ok(Self { start, end })
    }

    /// Canonical zero-padded form, which sorts chronologically as a string.
    pub fn to_canonical(&self) -> String {
        format!(
            "{}-{}",
            self.start.format(TIME_FORMAT),
            self.end.format(TIME_FORMAT)
        )
    }
}

fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    let (hour, minute) = s
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("invalid time format: {s}"))?;
    let hour: u32 = hour
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid hour in: {s}"))?;
    let minute: u32 = minute
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid minute in: {s}"))?;
    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| anyhow::anyhow!("time out of range: {s}"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Show {
    #[default]
    All,
    Booked,
    Available,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum When {
    #[default]
    All,
    Upcoming,
    Past,
}

#[derive(Debug, Clone, Default)]
pub struct SlotFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub show: Show,
    pub when: When,
}

/// Position in the `(date, time_slot, id)` ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCursor {
    pub date: NaiveDate,
    pub time_slot: String,
    pub id: String,
}

impl SlotCursor {
    pub fn after(slot: &Slot) -> Self {
        Self {
            date: slot.date,
            time_slot: slot.time_slot.clone(),
            id: slot.id.clone(),
        }
    }

    pub fn encode(&self) -> String {
        use base64::Engine;
        let raw = format!(
            "{}|{}|{}",
            self.date.format(DATE_FORMAT),
            self.time_slot,
            self.id
        );
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(s: &str) -> anyhow::Result<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| anyhow::anyhow!("malformed cursor"))?;
        let raw = String::from_utf8(bytes).map_err(|_| anyhow::anyhow!("malformed cursor"))?;
        let mut parts = raw.splitn(3, '|');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(date), Some(time_slot), Some(id)) => Ok(Self {
                date: NaiveDate::parse_from_str(date, DATE_FORMAT)
                    .map_err(|_| anyhow::anyhow!("malformed cursor"))?,
                time_slot: time_slot.to_string(),
                id: id.to_string(),
            }),
            _ => Err(anyhow::anyhow!("malformed cursor")),
        }
    }
}

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 200;

#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub limit: Option<i64>,
    /// 1-based page number; ignored when `after` is set.
    pub page: Option<i64>,
    pub after: Option<SlotCursor>,
}

impl PageRequest {
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }

    /// Row offset for page-number paging; None when it does not fit in an i64.
    pub fn offset(&self) -> Option<i64> {
        (self.page.unwrap_or(1).max(1) - 1).checked_mul(self.effective_limit())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotPage {
    pub slots: Vec<Slot>,
    pub total: i64,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    #[default]
    Day,
    Week,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotGroup {
    pub key: String,
    pub slots: Vec<Slot>,
}
