use std::collections::BTreeMap;

use chrono::Datelike;
use serde::Serialize;

use super::slot_store::release_slot;
use super::Scheduler;
use crate::config::PaidCancellation;
use crate::db::queries;
use crate::errors::SchedulingError;
use crate::models::{
    AppointmentStatus, CancelSurface, DomainEvent, GroupBy, PaymentStatus, Slot, SlotGroup,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkDeleteSummary {
    pub deleted: usize,
    pub in_use: Vec<String>,
    pub not_found: Vec<String>,
}

fn group_key(slot: &Slot, by: GroupBy) -> String {
    match by {
        GroupBy::Day => slot.date.format("%Y-%m-%d").to_string(),
        GroupBy::Week => {
            let week = slot.date.iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
    }
}

/// Buckets slots by calendar day or ISO week. Groups come out in key order and
/// keep the input order within each group.
pub fn group_slots(slots: Vec<Slot>, by: GroupBy) -> Vec<SlotGroup> {
    let mut groups: BTreeMap<String, Vec<Slot>> = BTreeMap::new();
    for slot in slots {
        groups.entry(group_key(&slot, by)).or_default().push(slot);
    }
    groups
        .into_iter()
        .map(|(key, slots)| SlotGroup { key, slots })
        .collect()
}

impl Scheduler {
    /// Deletes the free slots among `ids`. Booked slots are reported, never cascaded.
    pub fn bulk_delete(&self, ids: &[String]) -> Result<BulkDeleteSummary, SchedulingError> {
        let summary = self.transaction(|tx| {
            let mut summary = BulkDeleteSummary::default();
            for id in ids {
                if queries::delete_free_slot(tx, id)? {
                    summary.deleted += 1;
                } else if queries::get_slot(tx, id)?.is_some() {
                    summary.in_use.push(id.clone());
                } else {
                    summary.not_found.push(id.clone());
                }
            }
            Ok(summary)
        })?;

        tracing::info!(
            deleted = summary.deleted,
            in_use = summary.in_use.len(),
            not_found = summary.not_found.len(),
            "bulk slot delete"
        );
        Ok(summary)
    }

    /// Removes the appointment row. Payments stay behind, unlinked.
    pub fn delete_appointment(&self, appointment_id: &str) -> Result<(), SchedulingError> {
        let now = self.now();
        let forbid_paid = self.policy.admin_paid_cancellation == PaidCancellation::Forbid;

        let released = self.transaction(|tx| {
            let appointment = queries::get_appointment(tx, appointment_id)?
                .ok_or_else(|| SchedulingError::AppointmentNotFound(appointment_id.to_string()))?;

            let paid = queries::get_active_payment(tx, appointment_id)?
                .is_some_and(|p| p.status == PaymentStatus::Success);
            if paid && forbid_paid && appointment.status != AppointmentStatus::Cancelled {
                return Err(SchedulingError::CancellationForbidden(
                    "appointment has a successful payment".to_string(),
                ));
            }

            let live = appointment.status != AppointmentStatus::Cancelled;
            if live {
                release_slot(tx, &appointment.slot_id, &now)?;
            }
            queries::delete_appointment(tx, appointment_id)?;
            Ok(live.then_some(appointment.slot_id))
        })?;

        tracing::info!(appointment_id = %appointment_id, "appointment deleted");
        if let Some(slot_id) = released {
            self.events.publish(DomainEvent::AppointmentCancelled {
                appointment_id: appointment_id.to_string(),
                slot_id,
                surface: CancelSurface::Admin,
                refund_eligible: false,
            });
        }
        Ok(())
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
    fn test_group_by_day_and_week() {
        let (scheduler, _) = setup_at("2023-12-30 00:00");
        // 2024-01-01 is a Monday, so Dec 31 falls in ISO week 2023-W52.
        for d in ["2023-12-31", "2024-01-01", "2024-01-02"] {
            scheduler.create_slot(date(d), "09:00-09:30").unwrap();
        }
        let slots = scheduler
            .list_slots(&Default::default(), &Default::default())
            .unwrap()
            .slots;

        let by_day = group_slots(slots.clone(), GroupBy::Day);
        let keys: Vec<_> = by_day.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, ["2023-12-31", "2024-01-01", "2024-01-02"]);

        let by_week = group_slots(slots, GroupBy::Week);
        assert_eq!(by_week.len(), 2);
        assert_eq!(by_week[0].key, "2023-W52");
        assert_eq!(by_week[1].key, "2024-W01");
        assert_eq!(by_week[1].slots.len(), 2);
    }

    #[test]
    fn test_bulk_delete_reports_booked_and_missing() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let free = scheduler.create_slot(date("2024-01-02"), "09:00-09:30").unwrap();
        let taken = scheduler.create_slot(date("2024-01-02"), "09:30-10:00").unwrap();
        scheduler.book(&request(&taken.id)).unwrap();

        let summary = scheduler
            .bulk_delete(&[free.id.clone(), taken.id.clone(), "ghost".to_string()])
            .unwrap();
        assert_eq!(
            summary,
            BulkDeleteSummary {
                deleted: 1,
                in_use: vec![taken.id.clone()],
                not_found: vec!["ghost".to_string()],
            }
        );
        assert!(scheduler.get_slot(&taken.id).unwrap().is_booked);
        assert!(scheduler.get_slot(&free.id).is_err());
    }

    #[test]
    fn test_delete_appointment_releases_slot_and_keeps_payment() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let slot = scheduler.create_slot(date("2024-01-02"), "09:00-09:30").unwrap();
        let (appointment_id, payment_id) = book_with_payment(&scheduler, &slot.id);

        scheduler.delete_appointment(&appointment_id).unwrap();
        assert!(!scheduler.get_slot(&slot.id).unwrap().is_booked);
        assert!(matches!(
            scheduler.get_appointment(&appointment_id).unwrap_err(),
            SchedulingError::AppointmentNotFound(_)
        ));
        assert!(scheduler.get_payment(&payment_id).unwrap().appointment_id.is_none());
    }

    #[test]
    fn test_delete_paid_appointment_forbidden_by_default() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let slot = scheduler.create_slot(date("2024-01-02"), "09:00-09:30").unwrap();
        let (appointment_id, payment_id) = book_with_payment(&scheduler, &slot.id);
        scheduler
            .on_payment_event(&payment_id, PaymentStatus::Success, None)
            .unwrap();

        let err = scheduler.delete_appointment(&appointment_id).unwrap_err();
        assert!(matches!(err, SchedulingError::CancellationForbidden(_)));
        assert!(scheduler.get_slot(&slot.id).unwrap().is_booked);
    }

    #[test]
    fn test_delete_cancelled_appointment_leaves_rebooked_slot() {
        let (scheduler, _) = setup_at("2024-01-01 00:00");
        let slot = scheduler.create_slot(date("2024-01-02"), "09:00-09:30").unwrap();
        let first = scheduler.book(&request(&slot.id)).unwrap();
        scheduler.cancel(&first.appointment.id, CancelSurface::User).unwrap();
        scheduler.book(&request(&slot.id)).unwrap();

        scheduler.delete_appointment(&first.appointment.id).unwrap();
        assert!(scheduler.get_slot(&slot.id).unwrap().is_booked);
    }
}
