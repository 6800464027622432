use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::slot::{DATETIME_FORMAT, DATE_FORMAT};
use crate::models::{
    Appointment, AppointmentStatus, AppointmentType, PageRequest, Payment, PaymentPurpose,
    PaymentStatus, Show, Slot, SlotFilter, When,
};

fn fmt_ts(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

fn fmt_date(d: &NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn get_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let s: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn get_date(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

// ── Slots ──

const SLOT_COLUMNS: &str = "id, date, time_slot, is_booked, created_at, updated_at";

fn parse_slot_row(row: &rusqlite::Row) -> rusqlite::Result<Slot> {
    Ok(Slot {
        id: row.get(0)?,
        date: get_date(row, 1)?,
        time_slot: row.get(2)?,
        is_booked: row.get::<_, i32>(3)? != 0,
        created_at: get_ts(row, 4)?,
        updated_at: get_ts(row, 5)?,
    })
}

/// Inserts the slot unless `(date, time_slot)` already exists. Returns whether a row was written.
pub fn insert_slot_if_absent(
    conn: &Connection,
    slot: &Slot,
    starts_at: &NaiveDateTime,
    ends_at: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO slots (id, date, time_slot, starts_at, ends_at, is_booked, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(date, time_slot) DO NOTHING",
    )?;
    let count = stmt.execute(params![
        slot.id,
        fmt_date(&slot.date),
        slot.time_slot,
        fmt_ts(starts_at),
        fmt_ts(ends_at),
        slot.is_booked as i32,
        fmt_ts(&slot.created_at),
        fmt_ts(&slot.updated_at),
    ])?;
    Ok(count > 0)
}

pub fn get_slot(conn: &Connection, id: &str) -> rusqlite::Result<Option<Slot>> {
    conn.query_row(
        &format!("SELECT {SLOT_COLUMNS} FROM slots WHERE id = ?1"),
        params![id],
        parse_slot_row,
    )
    .optional()
}

/// Compare-and-set on `is_booked`. Returns false when the row is missing or
/// did not hold `expected`.
pub fn set_slot_booked(
    conn: &Connection,
    id: &str,
    value: bool,
    expected: bool,
    now: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE slots SET is_booked = ?1, updated_at = ?2 WHERE id = ?3 AND is_booked = ?4",
        params![value as i32, fmt_ts(now), id, expected as i32],
    )?;
    Ok(count > 0)
}

/// Deletes the slot only while it is free.
pub fn delete_free_slot(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "DELETE FROM slots WHERE id = ?1 AND is_booked = 0",
        params![id],
    )?;
    Ok(count > 0)
}

/// Filtered listing ordered by `(date, time_slot, id)`. Returns the page and
/// the total number of rows matching the filter.
pub fn list_slots(
    conn: &Connection,
    filter: &SlotFilter,
    page: &PageRequest,
    now: &NaiveDateTime,
) -> rusqlite::Result<(Vec<Slot>, i64)> {
    let mut clauses: Vec<&str> = vec![];
    let mut values: Vec<Box<dyn ToSql>> = vec![];

    if let Some(from) = &filter.date_from {
        clauses.push("date >= ?");
        values.push(Box::new(fmt_date(from)));
    }
    if let Some(to) = &filter.date_to {
        clauses.push("date <= ?");
        values.push(Box::new(fmt_date(to)));
    }
    match filter.show {
        Show::All => {}
        Show::Booked => clauses.push("is_booked = 1"),
        Show::Available => clauses.push("is_booked = 0"),
    }
    match filter.when {
        When::All => {}
        When::Upcoming => {
            clauses.push("ends_at > ?");
            values.push(Box::new(fmt_ts(now)));
        }
        When::Past => {
            clauses.push("ends_at <= ?");
            values.push(Box::new(fmt_ts(now)));
        }
    }

    let where_sql = |extra: Option<&str>| -> String {
        let mut all = clauses.clone();
        if let Some(extra) = extra {
            all.push(extra);
        }
        if all.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", all.join(" AND "))
        }
    };

    let total: i64 = {
        let refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
        conn.query_row(
            &format!("SELECT COUNT(*) FROM slots{}", where_sql(None)),
            refs.as_slice(),
            |row| row.get(0),
        )?
    };

    let limit = page.effective_limit();
    let mut page_values: Vec<Box<dyn ToSql>> = values;
    let sql = match &page.after {
        Some(cursor) => {
            page_values.push(Box::new(fmt_date(&cursor.date)));
            page_values.push(Box::new(cursor.time_slot.clone()));
            page_values.push(Box::new(cursor.id.clone()));
            page_values.push(Box::new(limit));
            format!(
                "SELECT {SLOT_COLUMNS} FROM slots{} ORDER BY date, time_slot, id LIMIT ?",
                where_sql(Some("(date, time_slot, id) > (?, ?, ?)"))
            )
        }
        None => {
            // Overflowing offsets are rejected upstream; past-the-end is empty.
            let offset = page.offset().unwrap_or(i64::MAX);
            page_values.push(Box::new(limit));
            page_values.push(Box::new(offset));
            format!(
                "SELECT {SLOT_COLUMNS} FROM slots{} ORDER BY date, time_slot, id LIMIT ? OFFSET ?",
                where_sql(None)
            )
        }
    };

    let mut stmt = conn.prepare(&sql)?;
    let refs: Vec<&dyn ToSql> = page_values.iter().map(|v| v.as_ref()).collect();
    let rows = stmt.query_map(refs.as_slice(), parse_slot_row)?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row?);
    }
    Ok((slots, total))
}

// ── Appointment Types ──

pub fn insert_appointment_type(conn: &Connection, t: &AppointmentType) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO appointment_types (id, title, price, is_active) VALUES (?1, ?2, ?3, ?4)",
        params![t.id, t.title, t.price, t.is_active as i32],
    )?;
    Ok(())
}

pub fn get_appointment_type(
    conn: &Connection,
    id: &str,
) -> rusqlite::Result<Option<AppointmentType>> {
    conn.query_row(
        "SELECT id, title, price, is_active FROM appointment_types WHERE id = ?1",
        params![id],
        |row| {
            Ok(AppointmentType {
                id: row.get(0)?,
                title: row.get(1)?,
                price: row.get(2)?,
                is_active: row.get::<_, i32>(3)? != 0,
            })
        },
    )
    .optional()
}

// ── Appointments ──

const APPOINTMENT_COLUMNS: &str =
    "id, slot_id, appointment_type_id, user_id, status, noofrescheduled, agenda, meet_url, last_payment_id, last_payment_status, created_at, updated_at, requires_payment";

fn parse_appointment_row(row: &rusqlite::Row) -> rusqlite::Result<Appointment> {
    let status: String = row.get(4)?;
    let last_payment_status: Option<String> = row.get(9)?;
    Ok(Appointment {
        id: row.get(0)?,
        slot_id: row.get(1)?,
        appointment_type_id: row.get(2)?,
        user_id: row.get(3)?,
        status: AppointmentStatus::parse(&status),
        noofrescheduled: row.get(5)?,
        agenda: row.get(6)?,
        meet_url: row.get(7)?,
        requires_payment: row.get::<_, i32>(12)? != 0,
        last_payment_id: row.get(8)?,
        last_payment_status: last_payment_status.as_deref().and_then(PaymentStatus::parse),
        created_at: get_ts(row, 10)?,
        updated_at: get_ts(row, 11)?,
    })
}

pub fn insert_appointment(conn: &Connection, a: &Appointment) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO appointments (id, slot_id, appointment_type_id, user_id, status, noofrescheduled, agenda, meet_url, last_payment_id, last_payment_status, created_at, updated_at, requires_payment)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            a.id,
            a.slot_id,
            a.appointment_type_id,
            a.user_id,
            a.status.as_str(),
            a.noofrescheduled,
            a.agenda,
            a.meet_url,
            a.last_payment_id,
            a.last_payment_status.map(|s| s.as_str()),
            fmt_ts(&a.created_at),
            fmt_ts(&a.updated_at),
            a.requires_payment as i32,
        ],
    )?;
    Ok(())
}

pub fn get_appointment(conn: &Connection, id: &str) -> rusqlite::Result<Option<Appointment>> {
    conn.query_row(
        &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"),
        params![id],
        parse_appointment_row,
    )
    .optional()
}

/// Writes back every mutable column of the appointment.
pub fn update_appointment(conn: &Connection, a: &Appointment) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE appointments SET slot_id = ?1, status = ?2, noofrescheduled = ?3, meet_url = ?4,
           last_payment_id = ?5, last_payment_status = ?6, updated_at = ?7
         WHERE id = ?8",
        params![
            a.slot_id,
            a.status.as_str(),
            a.noofrescheduled,
            a.meet_url,
            a.last_payment_id,
            a.last_payment_status.map(|s| s.as_str()),
            fmt_ts(&a.updated_at),
            a.id,
        ],
    )?;
    Ok(count > 0)
}

pub fn delete_appointment(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let count = conn.execute("DELETE FROM appointments WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

/// PENDING appointments created at or before `cutoff` whose last applied
/// payment did not succeed. Bookings made without a payment (admin
/// bookings) are not returned.
pub fn get_stale_pending(
    conn: &Connection,
    cutoff: &NaiveDateTime,
) -> rusqlite::Result<Vec<Appointment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE status = 'pending' AND created_at <= ?1
           AND (last_payment_status IS NULL OR last_payment_status != 'success')
           AND requires_payment = 1
         ORDER BY created_at ASC"
    ))?;
    let rows = stmt.query_map(params![fmt_ts(cutoff)], parse_appointment_row)?;

    let mut appointments = vec![];
    for row in rows {
        appointments.push(row?);
    }
    Ok(appointments)
}

// ── Payments ──

const PAYMENT_COLUMNS: &str =
    "id, appointment_id, order_id, status, amount, currency, method, purpose, created_at, updated_at";

fn parse_payment_row(row: &rusqlite::Row) -> rusqlite::Result<Payment> {
    let status: String = row.get(3)?;
    let purpose: String = row.get(7)?;
    Ok(Payment {
        id: row.get(0)?,
        appointment_id: row.get(1)?,
        order_id: row.get(2)?,
        status: PaymentStatus::parse(&status).unwrap_or(PaymentStatus::Pending),
        amount: row.get(4)?,
        currency: row.get(5)?,
        method: row.get(6)?,
        purpose: PaymentPurpose::parse(&purpose),
        created_at: get_ts(row, 8)?,
        updated_at: get_ts(row, 9)?,
    })
}

pub fn insert_payment(conn: &Connection, p: &Payment) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO payments (id, appointment_id, order_id, status, amount, currency, method, purpose, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            p.id,
            p.appointment_id,
            p.order_id,
            p.status.as_str(),
            p.amount,
            p.currency,
            p.method,
            p.purpose.as_str(),
            fmt_ts(&p.created_at),
            fmt_ts(&p.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_payment(conn: &Connection, id: &str) -> rusqlite::Result<Option<Payment>> {
    conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1"),
        params![id],
        parse_payment_row,
    )
    .optional()
}

/// Looks a payment up by the gateway's order id, which is what gateway events carry.
pub fn get_payment_by_order_id(
    conn: &Connection,
    order_id: &str,
) -> rusqlite::Result<Option<Payment>> {
    conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = ?1"),
        params![order_id],
        parse_payment_row,
    )
    .optional()
}

pub fn update_payment_status(
    conn: &Connection,
    id: &str,
    status: PaymentStatus,
    method: Option<&str>,
    now: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE payments SET status = ?1, method = COALESCE(?2, method), updated_at = ?3 WHERE id = ?4",
        params![status.as_str(), method, fmt_ts(now), id],
    )?;
    Ok(count > 0)
}

/// The most recent payment attempt for an appointment.
pub fn get_active_payment(
    conn: &Connection,
    appointment_id: &str,
) -> rusqlite::Result<Option<Payment>> {
    conn.query_row(
        &format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE appointment_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ),
        params![appointment_id],
        parse_payment_row,
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::SlotCursor;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn slot(id: &str, date: &str, time_slot: &str) -> Slot {
        Slot {
            id: id.to_string(),
            date: NaiveDate::parse_from_str(date, DATE_FORMAT).unwrap(),
            time_slot: time_slot.to_string(),
            is_booked: false,
            created_at: ts("2024-01-01 00:00"),
            updated_at: ts("2024-01-01 00:00"),
        }
    }

    fn insert(conn: &Connection, s: &Slot) -> bool {
        let range = s.range().unwrap();
        let (starts_at, ends_at) = (s.date.and_time(range.start), s.date.and_time(range.end));
        insert_slot_if_absent(conn, s, &starts_at, &ends_at).unwrap()
    }

    #[test]
    fn test_insert_slot_skips_duplicate_date_and_time() {
        let conn = db::init_db(":memory:").unwrap();
        assert!(insert(&conn, &slot("s1", "2024-01-01", "09:00-09:30")));
        assert!(!insert(&conn, &slot("s2", "2024-01-01", "09:00-09:30")));
        assert!(get_slot(&conn, "s2").unwrap().is_none());
    }

    #[test]
    fn test_set_slot_booked_is_compare_and_set() {
        let conn = db::init_db(":memory:").unwrap();
        insert(&conn, &slot("s1", "2024-01-01", "09:00-09:30"));
        let now = ts("2024-01-01 08:00");

        assert!(set_slot_booked(&conn, "s1", true, false, &now).unwrap());
        assert!(!set_slot_booked(&conn, "s1", true, false, &now).unwrap());
        assert!(get_slot(&conn, "s1").unwrap().unwrap().is_booked);
        assert!(!set_slot_booked(&conn, "missing", true, false, &now).unwrap());
    }

    #[test]
    fn test_delete_free_slot_refuses_booked() {
        let conn = db::init_db(":memory:").unwrap();
        insert(&conn, &slot("s1", "2024-01-01", "09:00-09:30"));
        set_slot_booked(&conn, "s1", true, false, &ts("2024-01-01 08:00")).unwrap();
        assert!(!delete_free_slot(&conn, "s1").unwrap());
        assert!(get_slot(&conn, "s1").unwrap().is_some());
    }

    #[test]
    fn test_list_slots_keyset_does_not_skip_concurrent_inserts() {
        let conn = db::init_db(":memory:").unwrap();
        insert(&conn, &slot("a", "2024-01-01", "09:00-09:30"));
        insert(&conn, &slot("b", "2024-01-01", "10:00-10:30"));
        insert(&conn, &slot("c", "2024-01-02", "09:00-09:30"));
        let now = ts("2023-12-31 00:00");

        let first = PageRequest {
            limit: Some(2),
            ..Default::default()
        };
        let (page1, total) = list_slots(&conn, &SlotFilter::default(), &first, &now).unwrap();
        assert_eq!(total, 3);
        assert_eq!(page1.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), ["a", "b"]);

        // A slot sorting before the cursor appears between page fetches.
        insert(&conn, &slot("z", "2024-01-01", "08:00-08:30"));

        let second = PageRequest {
            limit: Some(2),
            after: Some(SlotCursor::after(&page1[1])),
            ..Default::default()
        };
        let (page2, _) = list_slots(&conn, &SlotFilter::default(), &second, &now).unwrap();
        assert_eq!(page2.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), ["c"]);
    }

    #[test]
    fn test_list_slots_filters_by_when_and_show() {
        let conn = db::init_db(":memory:").unwrap();
        insert(&conn, &slot("past", "2024-01-01", "09:00-09:30"));
        insert(&conn, &slot("now", "2024-01-02", "09:00-09:30"));
        insert(&conn, &slot("later", "2024-01-03", "09:00-09:30"));
        let now = ts("2024-01-02 09:15");
        set_slot_booked(&conn, "later", true, false, &now).unwrap();

        let upcoming = SlotFilter {
            when: When::Upcoming,
            ..Default::default()
        };
        let (slots, _) = list_slots(&conn, &upcoming, &PageRequest::default(), &now).unwrap();
        assert_eq!(slots.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), ["now", "later"]);

        let past = SlotFilter {
            when: When::Past,
            ..Default::default()
        };
        let (slots, _) = list_slots(&conn, &past, &PageRequest::default(), &now).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].id, "past");

        let available_upcoming = SlotFilter {
            when: When::Upcoming,
            show: Show::Available,
            ..Default::default()
        };
        let (slots, total) =
            list_slots(&conn, &available_upcoming, &PageRequest::default(), &now).unwrap();
        assert_eq!(total, 1);
        assert_eq!(slots[0].id, "now");
    }
}
