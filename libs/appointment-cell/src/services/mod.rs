pub mod availability;
pub mod booking;
pub mod cancellation;
pub mod ledger;
pub mod lifecycle;
