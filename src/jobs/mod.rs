// Background jobs, driven by the cron scheduler in main and re-runnable
// from the admin API.

pub mod instance_generator;
pub mod package_expiry;
