pub mod clock;
pub mod events;
pub mod notify;
pub mod payments;
pub mod sweeper;
