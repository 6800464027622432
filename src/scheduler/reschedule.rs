use super::slot_store::{acquire_slot, has_started, release_slot};
use super::{constraint_as_conflict, Scheduler};
use crate::db::queries;
use crate::errors::SchedulingError;
use crate::models::{Actor, Appointment, AppointmentStatus, DomainEvent};

impl Scheduler {
    /// Moves an appointment to `new_slot_id`, releasing its current slot in the
    /// same transaction. Nothing changes unless every step succeeds.
    pub fn reschedule(
        &self,
        appointment_id: &str,
        new_slot_id: &str,
        actor: Actor,
    ) -> Result<Appointment, SchedulingError> {
        let now = self.now();
        let limit = self.policy.max_reschedules;
        let resets_status = match actor {
            Actor::User => self.policy.user_reschedule_resets_status,
            Actor::Admin => self.policy.admin_reschedule_resets_status,
        };

        let (appointment, from_slot_id) = self.transaction(|tx| {
            let mut appointment = queries::get_appointment(tx, appointment_id)?
                .ok_or_else(|| SchedulingError::AppointmentNotFound(appointment_id.to_string()))?;

            if appointment.status == AppointmentStatus::Cancelled {
                return Err(SchedulingError::NotEligible(
                    "appointment is cancelled".to_string(),
                ));
            }
            if appointment.noofrescheduled >= limit {
                return Err(SchedulingError::MaxReschedulesExceeded { limit });
            }

            let current = queries::get_slot(tx, &appointment.slot_id)?.ok_or_else(|| {
                SchedulingError::NotEligible("current slot no longer exists".to_string())
            })?;
            if has_started(&current, &now)? {
                return Err(SchedulingError::NotEligible(
                    "appointment has already started".to_string(),
                ));
            }
            if current.id == new_slot_id {
                return Err(SchedulingError::NotEligible(
                    "appointment is already in that slot".to_string(),
                ));
            }

            let target = queries::get_slot(tx, new_slot_id)?
                .ok_or_else(|| SchedulingError::SlotNotFound(new_slot_id.to_string()))?;
            if target.is_booked || has_started(&target, &now)? {
                return Err(SchedulingError::SlotUnavailable);
            }

            release_slot(tx, &current.id, &now)?;
            acquire_slot(tx, &target.id, &now)?;

            appointment.slot_id = target.id.clone();
            appointment.noofrescheduled += 1;
            if resets_status {
                appointment.status = AppointmentStatus::Pending;
            }
            appointment.updated_at = now;
            queries::update_appointment(tx, &appointment).map_err(constraint_as_conflict)?;

            Ok((appointment, current.id))
        })?;

        tracing::info!(
            appointment_id = %appointment.id,
            from_slot_id = %from_slot_id,
            to_slot_id = %appointment.slot_id,
            actor = ?actor,
            noofrescheduled = appointment.noofrescheduled,
            "appointment rescheduled"
        );
        self.events.publish(DomainEvent::AppointmentRescheduled {
            appointment_id: appointment.id.clone(),
            from_slot_id,
            to_slot_id: appointment.slot_id.clone(),
            actor,
        });

        Ok(appointment)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::config::Policy;
    use crate::models::PaymentStatus;
    use crate::scheduler::test_support::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn three_slots(scheduler: &Scheduler) -> (String, String, String) {
        let a = scheduler.create_slot(date("2024-01-02"), "09:00-09:30").unwrap();
        let b = scheduler.create_slot(date("2024-01-02"), "09:30-10:00").unwrap();
        let c = scheduler.create_slot(date("2024-01-02"), "10:00-10:30").unwrap();
        (a.id, b.id, c.id)
    }

    fn booked(scheduler: &Scheduler, id: &str) -> bool {
        scheduler.get_slot(id).unwrap().is_booked
    }

    #[test]
    fn test_reschedule_moves_booking() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let (a, b, _) = three_slots(&scheduler);
        let booking = scheduler.book(&request(&a)).unwrap();

        let moved = scheduler
            .reschedule(&booking.appointment.id, &b, Actor::User)
            .unwrap();
        assert_eq!(moved.slot_id, b);
        assert_eq!(moved.noofrescheduled, 1);
        assert!(!booked(&scheduler, &a));
        assert!(booked(&scheduler, &b));
    }

    #[test]
    fn test_user_reschedule_resets_to_pending_admin_preserves() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let (a, b, c) = three_slots(&scheduler);
        let (appointment_id, payment_id) = book_with_payment(&scheduler, &a);
        scheduler
            .on_payment_event(&payment_id, PaymentStatus::Success, None)
            .unwrap();

        let moved = scheduler.reschedule(&appointment_id, &b, Actor::Admin).unwrap();
        assert_eq!(moved.status, AppointmentStatus::Confirmed);

        let moved = scheduler.reschedule(&appointment_id, &c, Actor::User).unwrap();
        assert_eq!(moved.status, AppointmentStatus::Pending);
    }

    #[test]
    fn test_admin_reset_is_configurable() {
        let policy = Policy {
            admin_reschedule_resets_status: true,
            ..Policy::default()
        };
        let (scheduler, _) = setup_with_policy("2024-01-01 00:00", policy);
        let (a, b, _) = three_slots(&scheduler);
        let appointment = scheduler.admin_book(&request(&a)).unwrap();

        let moved = scheduler.reschedule(&appointment.id, &b, Actor::Admin).unwrap();
        assert_eq!(moved.status, AppointmentStatus::Pending);
    }

    #[test]
    fn test_quota_exceeded_mutates_nothing() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let (a, b, c) = three_slots(&scheduler);
        let booking = scheduler.book(&request(&a)).unwrap();
        let id = booking.appointment.id;

        scheduler.reschedule(&id, &b, Actor::User).unwrap();
        scheduler.reschedule(&id, &a, Actor::User).unwrap();
        let before = scheduler.get_appointment(&id).unwrap();
        assert_eq!(before.noofrescheduled, 2);

        let err = scheduler.reschedule(&id, &c, Actor::User).unwrap_err();
        assert!(matches!(err, SchedulingError::MaxReschedulesExceeded { limit: 2 }));
        assert_eq!(scheduler.get_appointment(&id).unwrap(), before);
        assert!(booked(&scheduler, &a));
        assert!(!booked(&scheduler, &c));
    }

    #[test]
    fn test_reschedule_onto_booked_slot_is_unavailable() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let (a, b, _) = three_slots(&scheduler);
        let first = scheduler.book(&request(&a)).unwrap();
        scheduler.book(&request(&b)).unwrap();

        let err = scheduler
            .reschedule(&first.appointment.id, &b, Actor::User)
            .unwrap_err();
        assert!(matches!(err, SchedulingError::SlotUnavailable));
        assert!(booked(&scheduler, &a));
    }

    #[test]
    fn test_reschedule_eligibility() {
        let (scheduler, clock) = setup_at("2024-01-01 00:00");
        let (a, b, c) = three_slots(&scheduler);
        let booking = scheduler.book(&request(&a)).unwrap();
        let id = booking.appointment.id;

        assert!(matches!(
            scheduler.reschedule(&id, &a, Actor::User).unwrap_err(),
            SchedulingError::NotEligible(_)
        ));
        assert!(matches!(
            scheduler.reschedule(&id, "missing", Actor::User).unwrap_err(),
            SchedulingError::SlotNotFound(_)
        ));
        assert!(matches!(
            scheduler.reschedule("missing", &b, Actor::User).unwrap_err(),
            SchedulingError::AppointmentNotFound(_)
        ));

        clock.set(ts("2024-01-02 09:05"));
        assert!(matches!(
            scheduler.reschedule(&id, &c, Actor::User).unwrap_err(),
            SchedulingError::NotEligible(_)
        ));
    }

    #[test]
    fn test_reschedule_cancelled_is_not_eligible() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let (a, b, _) = three_slots(&scheduler);
        let booking = scheduler.book(&request(&a)).unwrap();
        scheduler
            .cancel(&booking.appointment.id, crate::models::CancelSurface::User)
            .unwrap();

        let err = scheduler
            .reschedule(&booking.appointment.id, &b, Actor::User)
            .unwrap_err();
        assert!(matches!(err, SchedulingError::NotEligible(_)));
        assert!(!booked(&scheduler, &b));
    }

    #[test]
    fn test_failed_acquisition_rolls_back_release() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let (a, b, _) = three_slots(&scheduler);
        let booking = scheduler.book(&request(&a)).unwrap();

        // Fault injection: abort any attempt to book slot b after a is released.
        scheduler
            .with_conn(|conn| {
                conn.execute_batch(&format!(
                    "CREATE TRIGGER fail_acquire BEFORE UPDATE OF is_booked ON slots
                     WHEN NEW.id = '{b}' AND NEW.is_booked = 1
                     BEGIN SELECT RAISE(ABORT, 'injected fault'); END;"
                ))?;
                Ok(())
            })
            .unwrap();

        assert!(scheduler
            .reschedule(&booking.appointment.id, &b, Actor::User)
            .is_err());

        let appointment = scheduler.get_appointment(&booking.appointment.id).unwrap();
        assert_eq!(appointment.slot_id, a);
        assert_eq!(appointment.noofrescheduled, 0);
        assert!(booked(&scheduler, &a));
        assert!(!booked(&scheduler, &b));
    }

    /// Runs each job on its own connection to `path`, released together.
    fn race<F>(path: &str, jobs: Vec<F>) -> Vec<Result<(), SchedulingError>>
    where
        F: FnOnce(&Scheduler) -> Result<(), SchedulingError> + Send + 'static,
    {
        let now = ts("2024-01-01 00:00");
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(jobs.len()));
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let path = path.to_string();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let scheduler = file_scheduler(&path, now);
                    barrier.wait();
                    job(&scheduler)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    fn assert_single_winner(results: &[Result<(), SchedulingError>]) {
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, SchedulingError::SlotUnavailable)));
    }

    #[test]
    fn test_concurrent_reschedule_and_book_onto_one_slot() {
        let path = temp_db_path("reschedule-vs-book");
        let setup = file_scheduler(&path, ts("2024-01-01 00:00"));
        let (old, target, _) = three_slots(&setup);
        let moving = setup.book(&request(&old)).unwrap().appointment.id;

        let (moving_id, target_id) = (moving.clone(), target.clone());
        let mut jobs: Vec<Box<dyn FnOnce(&Scheduler) -> Result<(), SchedulingError> + Send>> =
            vec![Box::new(move |s: &Scheduler| {
                s.reschedule(&moving_id, &target_id, Actor::User).map(|_| ())
            })];
        for _ in 0..4 {
            let target_id = target.clone();
            jobs.push(Box::new(move |s: &Scheduler| s.book(&request(&target_id)).map(|_| ())));
        }
        let results = race(&path, jobs);

        assert_single_winner(&results);
        assert!(booked(&setup, &target));
        assert_eq!(live_count(&setup, &target), 1);
        let rescheduled = results[0].is_ok();
        assert_eq!(booked(&setup, &old), !rescheduled);
        let expected = if rescheduled { &target } else { &old };
        assert_eq!(&setup.get_appointment(&moving).unwrap().slot_id, expected);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_concurrent_reschedules_onto_one_slot() {
        let path = temp_db_path("reschedule-vs-reschedule");
        let setup = file_scheduler(&path, ts("2024-01-01 00:00"));
        let (first_old, second_old, target) = three_slots(&setup);
        let first = setup.book(&request(&first_old)).unwrap().appointment.id;
        let second = setup.book(&request(&second_old)).unwrap().appointment.id;

        let jobs: Vec<_> = [first.clone(), second.clone()]
            .into_iter()
            .map(|id| {
                let target_id = target.clone();
                move |s: &Scheduler| s.reschedule(&id, &target_id, Actor::User).map(|_| ())
            })
            .collect();
        let results = race(&path, jobs);

        assert_single_winner(&results);
        assert_eq!(live_count(&setup, &target), 1);
        let (winner, winner_old, loser, loser_old) = if results[0].is_ok() {
            (&first, &first_old, &second, &second_old)
        } else {
            (&second, &second_old, &first, &first_old)
        };
        assert!(!booked(&setup, winner_old));
        assert!(booked(&setup, loser_old));
        assert_eq!(&setup.get_appointment(winner).unwrap().slot_id, &target);
        let loser = setup.get_appointment(loser).unwrap();
        assert_eq!(&loser.slot_id, loser_old);
        assert_eq!(loser.noofrescheduled, 0);

        let _ = std::fs::remove_file(&path);
    }
}
