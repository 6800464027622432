use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::PaymentStatus;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: String,
    pub slot_id: String,
    pub appointment_type_id: String,
    pub user_id: Option<String>,
    pub status: AppointmentStatus,
    pub noofrescheduled: u32,
    pub agenda: String,
    pub meet_url: Option<String>,
    /// False for admin bookings, which never wait on a payment.
    pub requires_payment: bool,
    #[serde(skip)]
    pub last_payment_id: Option<String>,
    #[serde(skip)]
    pub last_payment_status: Option<PaymentStatus>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => AppointmentStatus::Confirmed,
            "cancelled" => AppointmentStatus::Cancelled,
            _ => AppointmentStatus::Pending,
        }
    }
}

/// Who asked for a reschedule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    User,
    Admin,
}

/// Which surface a cancellation came through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CancelSurface {
    User,
    Admin,
    /// Payment failure, stale sweep or booking compensation.
    System,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub appointment: Appointment,
    pub refund_eligible: bool,
}
