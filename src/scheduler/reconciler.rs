use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;

use super::slot_store::{has_started, load_slot, release_slot};
use super::Scheduler;
use crate::config::PaidCancellation;
use crate::db::queries;
use crate::errors::SchedulingError;
use crate::models::{
    Appointment, AppointmentStatus, CancelOutcome, CancelSurface, DomainEvent, PaymentStatus,
};

#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    /// None for payments that are not linked to an appointment.
    pub appointment: Option<Appointment>,
    /// Whether the appointment's status moved.
    pub changed: bool,
}

/// Flips the appointment to CANCELLED and frees its slot. Caller checks eligibility.
fn cancel_in_tx(
    conn: &Connection,
    appointment: &mut Appointment,
    now: &NaiveDateTime,
) -> Result<(), SchedulingError> {
    appointment.status = AppointmentStatus::Cancelled;
    appointment.updated_at = *now;
    queries::update_appointment(conn, appointment)?;
    release_slot(conn, &appointment.slot_id, now)
}

impl Scheduler {
    /// Applies a payment status change reported by the gateway webhook.
    /// Replaying an event that was already applied is a no-op.
    pub fn on_payment_event(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        method: Option<&str>,
    ) -> Result<Reconciliation, SchedulingError> {
        let now = self.now();
        let (reconciliation, event) = self.transaction(|tx| {
            let payment = queries::get_payment(tx, payment_id)?
                .ok_or_else(|| SchedulingError::PaymentNotFound(payment_id.to_string()))?;

            if payment.status != PaymentStatus::Pending && status == PaymentStatus::Pending {
                tracing::warn!(
                    payment_id = %payment_id,
                    current = payment.status.as_str(),
                    "ignoring stale pending event"
                );
                return Ok((unchanged(None), None));
            }
            queries::update_payment_status(tx, payment_id, status, method, &now)?;

            let Some(appointment_id) = payment.appointment_id.as_deref() else {
                return Ok((unchanged(None), None));
            };
            let mut appointment = queries::get_appointment(tx, appointment_id)?
                .ok_or_else(|| SchedulingError::AppointmentNotFound(appointment_id.to_string()))?;

            let is_active = queries::get_active_payment(tx, appointment_id)?
                .is_some_and(|active| active.id == payment.id);
            if !is_active {
                tracing::info!(
                    payment_id = %payment_id,
                    appointment_id = %appointment_id,
                    "event for superseded payment recorded only"
                );
                return Ok((unchanged(Some(appointment)), None));
            }

            if appointment.last_payment_id.as_deref() == Some(payment_id)
                && appointment.last_payment_status == Some(status)
            {
                return Ok((unchanged(Some(appointment)), None));
            }
            appointment.last_payment_id = Some(payment.id.clone());
            appointment.last_payment_status = Some(status);

            let event = match (appointment.status, status) {
                (AppointmentStatus::Pending, PaymentStatus::Success) => {
                    appointment.status = AppointmentStatus::Confirmed;
                    Some(DomainEvent::AppointmentConfirmed {
                        appointment_id: appointment.id.clone(),
                        slot_id: appointment.slot_id.clone(),
                    })
                }
                (AppointmentStatus::Pending, PaymentStatus::Failed | PaymentStatus::Cancelled) => {
                    cancel_in_tx(tx, &mut appointment, &now)?;
                    Some(DomainEvent::AppointmentCancelled {
                        appointment_id: appointment.id.clone(),
                        slot_id: appointment.slot_id.clone(),
                        surface: CancelSurface::System,
                        refund_eligible: false,
                    })
                }
                (AppointmentStatus::Cancelled, PaymentStatus::Success) => {
                    tracing::warn!(
                        appointment_id = %appointment.id,
                        payment_id = %payment_id,
                        "payment succeeded for cancelled appointment"
                    );
                    None
                }
                _ => None,
            };
            appointment.updated_at = now;
            queries::update_appointment(tx, &appointment)?;

            let changed = event.is_some();
            Ok((
                Reconciliation {
                    appointment: Some(appointment),
                    changed,
                },
                event,
            ))
        })?;

        tracing::info!(
            payment_id = %payment_id,
            status = status.as_str(),
            changed = reconciliation.changed,
            "payment event reconciled"
        );
        if let Some(event) = event {
            self.events.publish(event);
        }
        Ok(reconciliation)
    }

    /// Cancels a live appointment and releases its slot. Whether an already
    /// paid appointment may be cancelled depends on the surface's policy.
    pub fn cancel(
        &self,
        appointment_id: &str,
        surface: CancelSurface,
    ) -> Result<CancelOutcome, SchedulingError> {
        let now = self.now();
        let paid_policy = match surface {
            CancelSurface::User => self.policy.user_paid_cancellation,
            CancelSurface::Admin => self.policy.admin_paid_cancellation,
            CancelSurface::System => PaidCancellation::Allow,
        };
        let refund_on_cancel = self.policy.refund_on_cancel;

        let outcome = self.transaction(|tx| {
            let mut appointment = queries::get_appointment(tx, appointment_id)?
                .ok_or_else(|| SchedulingError::AppointmentNotFound(appointment_id.to_string()))?;
            if appointment.status == AppointmentStatus::Cancelled {
                return Err(SchedulingError::NotEligible(
                    "appointment is already cancelled".to_string(),
                ));
            }
            if surface == CancelSurface::User {
                let slot = load_slot(tx, &appointment.slot_id)?;
                if has_started(&slot, &now)? {
                    return Err(SchedulingError::NotEligible(
                        "appointment has already started".to_string(),
                    ));
                }
            }

            let paid = queries::get_active_payment(tx, appointment_id)?
                .is_some_and(|p| p.status == PaymentStatus::Success);
            if paid && paid_policy == PaidCancellation::Forbid {
                return Err(SchedulingError::CancellationForbidden(
                    "appointment has a successful payment".to_string(),
                ));
            }

            cancel_in_tx(tx, &mut appointment, &now)?;
            Ok(CancelOutcome {
                appointment,
                refund_eligible: paid && refund_on_cancel,
            })
        })?;

        tracing::info!(
            appointment_id = %appointment_id,
            surface = ?surface,
            refund_eligible = outcome.refund_eligible,
            "appointment cancelled"
        );
        self.events.publish(DomainEvent::AppointmentCancelled {
            appointment_id: outcome.appointment.id.clone(),
            slot_id: outcome.appointment.slot_id.clone(),
            surface,
            refund_eligible: outcome.refund_eligible,
        });
        Ok(outcome)
    }

    /// Admin review: PENDING → CONFIRMED, optionally attaching the meeting link.
    pub fn confirm(
        &self,
        appointment_id: &str,
        meet_url: Option<String>,
    ) -> Result<Appointment, SchedulingError> {
        let now = self.now();
        let (appointment, confirmed_now) = self.transaction(|tx| {
            let mut appointment = queries::get_appointment(tx, appointment_id)?
                .ok_or_else(|| SchedulingError::AppointmentNotFound(appointment_id.to_string()))?;
            let confirmed_now = match appointment.status {
                AppointmentStatus::Cancelled => {
                    return Err(SchedulingError::NotEligible(
                        "appointment is cancelled".to_string(),
                    ))
                }
                AppointmentStatus::Confirmed => false,
                AppointmentStatus::Pending => true,
            };
            if !confirmed_now && meet_url.is_none() {
                return Ok((appointment, false));
            }

            appointment.status = AppointmentStatus::Confirmed;
            if meet_url.is_some() {
                appointment.meet_url = meet_url.clone();
            }
            appointment.updated_at = now;
            queries::update_appointment(tx, &appointment)?;
            Ok((appointment, confirmed_now))
        })?;

        if confirmed_now {
            tracing::info!(appointment_id = %appointment_id, "appointment confirmed by admin");
            self.events.publish(DomainEvent::AppointmentConfirmed {
                appointment_id: appointment.id.clone(),
                slot_id: appointment.slot_id.clone(),
            });
        }
        Ok(appointment)
    }

    /// Cancels PENDING appointments older than `older_than` whose payment never
    /// succeeded, returning their ids. The window must be positive.
    pub fn sweep_stale_pending(
        &self,
        older_than: chrono::Duration,
    ) -> Result<Vec<String>, SchedulingError> {
        if older_than <= chrono::Duration::zero() {
            return Err(SchedulingError::InvalidInput(
                "sweep window must be positive".to_string(),
            ));
        }
        let now = self.now();
        let cutoff = now
            .checked_sub_signed(older_than)
            .ok_or_else(|| SchedulingError::InvalidInput("sweep window is too large".to_string()))?;

        let cancelled = self.transaction(|tx| {
            let mut cancelled = vec![];
            for mut appointment in queries::get_stale_pending(tx, &cutoff)? {
                cancel_in_tx(tx, &mut appointment, &now)?;
                cancelled.push(appointment);
            }
            Ok(cancelled)
        })?;

        if !cancelled.is_empty() {
            tracing::info!(count = cancelled.len(), %cutoff, "swept stale pending appointments");
        }
        let mut ids = Vec::with_capacity(cancelled.len());
        for appointment in cancelled {
            self.events.publish(DomainEvent::AppointmentCancelled {
                appointment_id: appointment.id.clone(),
                slot_id: appointment.slot_id.clone(),
                surface: CancelSurface::System,
                refund_eligible: false,
            });
            ids.push(appointment.id);
        }
        Ok(ids)
    }
}

fn unchanged(appointment: Option<Appointment>) -> Reconciliation {
    Reconciliation {
        appointment,
        changed: false,
    }
}
