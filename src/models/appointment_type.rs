use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentType {
    pub id: String,
    pub title: String,
    /// Minor currency units.
    pub price: i64,
    pub is_active: bool,
}
