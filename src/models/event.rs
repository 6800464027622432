use serde::{Deserialize, Serialize};

use super::{Actor, CancelSurface};

/// Facts the notification layer turns into e-mails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DomainEvent {
    AppointmentBooked {
        appointment_id: String,
        slot_id: String,
        user_id: Option<String>,
    },
    AppointmentRescheduled {
        appointment_id: String,
        from_slot_id: String,
        to_slot_id: String,
        actor: Actor,
    },
    AppointmentCancelled {
        appointment_id: String,
        slot_id: String,
        surface: CancelSurface,
        refund_eligible: bool,
    },
    AppointmentConfirmed {
        appointment_id: String,
        slot_id: String,
    },
}

impl DomainEvent {
    pub fn appointment_id(&self) -> &str {
        match self {
            DomainEvent::AppointmentBooked { appointment_id, .. }
            | DomainEvent::AppointmentRescheduled { appointment_id, .. }
            | DomainEvent::AppointmentCancelled { appointment_id, .. }
            | DomainEvent::AppointmentConfirmed { appointment_id, .. } => appointment_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::AppointmentBooked { .. } => "AppointmentBooked",
            DomainEvent::AppointmentRescheduled { .. } => "AppointmentRescheduled",
            DomainEvent::AppointmentCancelled { .. } => "AppointmentCancelled",
            DomainEvent::AppointmentConfirmed { .. } => "AppointmentConfirmed",
        }
    }
}
