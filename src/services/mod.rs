// Services module - Business logic

pub mod booking;
pub mod checkin;
pub mod ledger;
pub mod notifier;
pub mod qr;
pub mod schedule_generator;
pub mod signature;
