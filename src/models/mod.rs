pub mod appointment;
pub mod appointment_type;
pub mod event;
pub mod payment;
pub mod slot;

pub use appointment::{Actor, Appointment, AppointmentStatus, CancelOutcome, CancelSurface};
pub use appointment_type::AppointmentType;
pub use event::DomainEvent;
pub use payment::{Payment, PaymentIntent, PaymentPurpose, PaymentStatus};
pub use slot::{
    GroupBy, PageRequest, Show, Slot, SlotCursor, SlotFilter, SlotGroup, SlotPage, TimeRange, When,
};
