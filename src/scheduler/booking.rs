use serde::{Deserialize, Serialize};

use super::slot_store::{acquire_slot, has_started, load_slot};
use super::{constraint_as_conflict, Scheduler};
use crate::db::queries;
use crate::errors::SchedulingError;
use crate::models::{
    Appointment, AppointmentStatus, DomainEvent, Payment, PaymentIntent, PaymentPurpose,
    PaymentStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub slot_id: String,
    pub appointment_type_id: String,
    pub user_id: Option<String>,
    #[serde(default)]
    pub agenda: String,
}

/// A reserved slot and the payment the caller should now collect.
#[derive(Debug, Clone, Serialize)]
pub struct Booking {
    pub appointment: Appointment,
    pub intent: PaymentIntent,
}

impl Scheduler {
    /// Reserves the slot for a new PENDING appointment. Reserve first, charge
    /// second: a failed booking never needs a refund.
    pub fn book(&self, req: &BookingRequest) -> Result<Booking, SchedulingError> {
        let (appointment, price) = self.reserve(req, AppointmentStatus::Pending, true)?;

        tracing::info!(
            appointment_id = %appointment.id,
            slot_id = %appointment.slot_id,
            "slot booked"
        );
        self.events.publish(DomainEvent::AppointmentBooked {
            appointment_id: appointment.id.clone(),
            slot_id: appointment.slot_id.clone(),
            user_id: appointment.user_id.clone(),
        });

        let intent = PaymentIntent {
            appointment_id: appointment.id.clone(),
            amount: price,
            currency: self.currency.clone(),
            purpose: PaymentPurpose::Appointment,
        };
        Ok(Booking { appointment, intent })
    }

    /// Operator booking with no payment step; the appointment starts CONFIRMED.
    pub fn admin_book(&self, req: &BookingRequest) -> Result<Appointment, SchedulingError> {
        let (appointment, _) = self.reserve(req, AppointmentStatus::Confirmed, false)?;

        tracing::info!(
            appointment_id = %appointment.id,
            slot_id = %appointment.slot_id,
            "slot booked by admin"
        );
        self.publish_all(vec![
            DomainEvent::AppointmentBooked {
                appointment_id: appointment.id.clone(),
                slot_id: appointment.slot_id.clone(),
                user_id: appointment.user_id.clone(),
            },
            DomainEvent::AppointmentConfirmed {
                appointment_id: appointment.id.clone(),
                slot_id: appointment.slot_id.clone(),
            },
        ]);
        Ok(appointment)
    }

    fn reserve(
        &self,
        req: &BookingRequest,
        status: AppointmentStatus,
        requires_payment: bool,
    ) -> Result<(Appointment, i64), SchedulingError> {
        let now = self.now();
        self.transaction(|tx| {
            let appointment_type = queries::get_appointment_type(tx, &req.appointment_type_id)?
                .filter(|t| t.is_active)
                .ok_or_else(|| {
                    SchedulingError::AppointmentTypeUnavailable(req.appointment_type_id.clone())
                })?;

            let slot = load_slot(tx, &req.slot_id)?;
            if slot.is_booked || has_started(&slot, &now)? {
                return Err(SchedulingError::SlotUnavailable);
            }

            let appointment = Appointment {
                id: uuid::Uuid::new_v4().to_string(),
                slot_id: slot.id.clone(),
                appointment_type_id: appointment_type.id.clone(),
                user_id: req.user_id.clone(),
                status,
                noofrescheduled: 0,
                agenda: req.agenda.clone(),
                meet_url: None,
                requires_payment,
                last_payment_id: None,
                last_payment_status: None,
                created_at: now,
                updated_at: now,
            };
            queries::insert_appointment(tx, &appointment).map_err(constraint_as_conflict)?;
            acquire_slot(tx, &slot.id, &now)?;

            Ok((appointment, appointment_type.price))
        })
    }

    /// Stores the gateway order opened for an appointment. The newest payment
    /// is the one that drives reconciliation.
    pub fn record_payment(
        &self,
        appointment_id: &str,
        order_id: &str,
        amount: i64,
        currency: &str,
    ) -> Result<Payment, SchedulingError> {
        let now = self.now();
        let payment = self.transaction(|tx| {
            let appointment = queries::get_appointment(tx, appointment_id)?
                .ok_or_else(|| SchedulingError::AppointmentNotFound(appointment_id.to_string()))?;
            if appointment.status == AppointmentStatus::Cancelled {
                return Err(SchedulingError::NotEligible(
                    "appointment is cancelled".to_string(),
                ));
            }

            let payment = Payment {
                id: uuid::Uuid::new_v4().to_string(),
                appointment_id: Some(appointment.id.clone()),
                order_id: order_id.to_string(),
                status: PaymentStatus::Pending,
                amount,
                currency: currency.to_string(),
                method: None,
                purpose: PaymentPurpose::Appointment,
                created_at: now,
                updated_at: now,
            };
            queries::insert_payment(tx, &payment)?;
            Ok(payment)
        })?;

        tracing::info!(
            appointment_id = %appointment_id,
            payment_id = %payment.id,
            order_id = %order_id,
            "payment recorded"
        );
        Ok(payment)
    }

    pub fn get_appointment(&self, id: &str) -> Result<Appointment, SchedulingError> {
        self.with_conn(|conn| {
            queries::get_appointment(conn, id)?
                .ok_or_else(|| SchedulingError::AppointmentNotFound(id.to_string()))
        })
    }

    pub fn get_payment(&self, id: &str) -> Result<Payment, SchedulingError> {
        self.with_conn(|conn| {
            queries::get_payment(conn, id)?
                .ok_or_else(|| SchedulingError::PaymentNotFound(id.to_string()))
        })
    }

    pub fn get_payment_by_order(&self, order_id: &str) -> Result<Payment, SchedulingError> {
        self.with_conn(|conn| {
            queries::get_payment_by_order_id(conn, order_id)?
                .ok_or_else(|| SchedulingError::PaymentNotFound(order_id.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::scheduler::test_support::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_book_creates_pending_appointment_and_intent() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let slot = scheduler.create_slot(date("2024-01-02"), "09:00-09:30").unwrap();
        let mut rx = scheduler.events().subscribe();

        let booking = scheduler.book(&request(&slot.id)).unwrap();
        assert_eq!(booking.appointment.status, AppointmentStatus::Pending);
        assert_eq!(booking.appointment.noofrescheduled, 0);
        assert!(booking.appointment.requires_payment);
        assert_eq!(booking.intent.amount, 5000);
        assert_eq!(booking.intent.purpose, PaymentPurpose::Appointment);
        assert!(scheduler.get_slot(&slot.id).unwrap().is_booked);

        let event = rx.try_recv().unwrap();
        assert!(matches!(event, DomainEvent::AppointmentBooked { .. }));
    }

    #[test]
    fn test_book_same_slot_twice_fails() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let slot = scheduler.create_slot(date("2024-01-02"), "09:00-09:30").unwrap();
        scheduler.book(&request(&slot.id)).unwrap();

        let err = scheduler.book(&request(&slot.id)).unwrap_err();
        assert!(matches!(err, SchedulingError::SlotUnavailable));
    }

    #[test]
    fn test_book_missing_slot() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let err = scheduler.book(&request("missing")).unwrap_err();
        assert!(matches!(err, SchedulingError::SlotNotFound(_)));
    }

    #[test]
    fn test_book_started_slot_is_unavailable() {
        let (scheduler, clock) = setup_at("2024-01-01 00:00");
        let slot = scheduler.create_slot(date("2024-01-02"), "09:00-09:30").unwrap();
        clock.set(ts("2024-01-02 09:00"));

        let err = scheduler.book(&request(&slot.id)).unwrap_err();
        assert!(matches!(err, SchedulingError::SlotUnavailable));
        assert!(!scheduler.get_slot(&slot.id).unwrap().is_booked);
    }

    #[test]
    fn test_book_inactive_type_leaves_slot_free() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let slot = scheduler.create_slot(date("2024-01-02"), "09:00-09:30").unwrap();
        let mut req = request(&slot.id);
        req.appointment_type_id = "retired".to_string();

        let err = scheduler.book(&req).unwrap_err();
        assert!(matches!(err, SchedulingError::AppointmentTypeUnavailable(_)));
        assert!(!scheduler.get_slot(&slot.id).unwrap().is_booked);
    }

    #[test]
    fn test_guest_booking_has_no_user() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let slot = scheduler.create_slot(date("2024-01-02"), "09:00-09:30").unwrap();
        let mut req = request(&slot.id);
        req.user_id = None;

        let booking = scheduler.book(&req).unwrap();
        assert!(booking.appointment.user_id.is_none());
    }

    #[test]
    fn test_admin_book_is_confirmed() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let slot = scheduler.create_slot(date("2024-01-02"), "09:00-09:30").unwrap();
        let appointment = scheduler.admin_book(&request(&slot.id)).unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Confirmed);
        assert!(!scheduler.get_appointment(&appointment.id).unwrap().requires_payment);
        assert!(scheduler.get_slot(&slot.id).unwrap().is_booked);
    }

    #[test]
    fn test_record_payment_refused_for_cancelled() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let slot = scheduler.create_slot(date("2024-01-02"), "09:00-09:30").unwrap();
        let booking = scheduler.book(&request(&slot.id)).unwrap();
        scheduler
            .cancel(&booking.appointment.id, crate::models::CancelSurface::System)
            .unwrap();

        let err = scheduler
            .record_payment(&booking.appointment.id, "order-1", 5000, "USD")
            .unwrap_err();
        assert!(matches!(err, SchedulingError::NotEligible(_)));
    }

    #[test]
    fn test_payment_lookup_by_order_id() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let slot = scheduler.create_slot(date("2024-01-02"), "09:00-09:30").unwrap();
        let (appointment_id, payment_id) = book_with_payment(&scheduler, &slot.id);

        let payment = scheduler
            .get_payment_by_order(&format!("order-{appointment_id}"))
            .unwrap();
        assert_eq!(payment.id, payment_id);
        assert!(matches!(
            scheduler.get_payment_by_order("order-unknown").unwrap_err(),
            SchedulingError::PaymentNotFound(_)
        ));
    }

    #[test]
    fn test_concurrent_bookings_across_connections() {
        let path = temp_db_path("race");
        let now = ts("2024-01-01 00:00");

        let setup = file_scheduler(&path, now);
        let slot = setup.create_slot(date("2024-01-02"), "09:00-09:30").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                let slot_id = slot.id.clone();
                std::thread::spawn(move || file_scheduler(&path, now).book(&request(&slot_id)))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, SchedulingError::SlotUnavailable)));
        assert!(setup.get_slot(&slot.id).unwrap().is_booked);
        assert_eq!(live_count(&setup, &slot.id), 1);

        let _ = std::fs::remove_file(&path);
    }
}
