// API module - HTTP endpoints

pub mod bookings;
pub mod checkin;
pub mod health;
pub mod middleware;
pub mod packages;
pub mod schedules;
