//! Slot and appointment scheduling core.
//!
//! Every mutation that touches a slot runs inside a `BEGIN IMMEDIATE`
//! transaction and flips `is_booked` with a compare-and-set, so separate
//! connections to the same database cannot both observe a free slot and
//! both book it.

mod admin;
mod booking;
mod generator;
mod reconciler;
mod reschedule;
mod slot_store;

pub use admin::{group_slots, BulkDeleteSummary};
pub use booking::{Booking, BookingRequest};
pub use generator::{generate_daily_ranges, BulkCreateSummary};
pub use reconciler::Reconciliation;

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDateTime;
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::config::Policy;
use crate::errors::SchedulingError;
use crate::models::DomainEvent;
use crate::services::clock::Clock;
use crate::services::events::EventBus;

/// Attempts per transaction before a conflict surfaces as `SlotUnavailable`.
const MAX_ATTEMPTS: u32 = 2;

pub struct Scheduler {
    db: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
    policy: Policy,
    currency: String,
    events: EventBus,
}

impl Scheduler {
    pub fn new(conn: Connection, clock: Arc<dyn Clock>, policy: Policy, events: EventBus) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            clock,
            policy,
            currency: "USD".to_string(),
            events,
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-transaction drops the Transaction, which rolls back,
        // so the connection behind a poisoned lock is still consistent.
        match self.db.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Runs a read or single-statement write outside an explicit transaction.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, SchedulingError>,
    ) -> Result<T, SchedulingError> {
        let conn = self.conn();
        f(&conn)
    }

    /// Runs `f` in an immediate transaction, retrying once on a conflict.
    pub(crate) fn transaction<T>(
        &self,
        mut f: impl FnMut(&Transaction) -> Result<T, SchedulingError>,
    ) -> Result<T, SchedulingError> {
        let mut conn = self.conn();
        let mut attempt = 1;
        loop {
            match Self::attempt(&mut conn, &mut f) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    tracing::debug!(error = %e, attempt, "transaction conflict, retrying");
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    tracing::info!(error = %e, "transaction conflict persisted");
                    return Err(SchedulingError::SlotUnavailable);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn attempt<T>(
        conn: &mut Connection,
        f: &mut impl FnMut(&Transaction) -> Result<T, SchedulingError>,
    ) -> Result<T, SchedulingError> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn publish_all(&self, events: Vec<DomainEvent>) {
        for event in events {
            self.events.publish(event);
        }
    }
}

/// Maps a unique-index violation (two live appointments on one slot) to a conflict.
pub(crate) fn constraint_as_conflict(e: rusqlite::Error) -> SchedulingError {
    match &e {
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            SchedulingError::Conflict
        }
        _ => SchedulingError::Store(e),
    }
}
