use secrecy::Secret;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    // Check-in token signing
    pub checkin_secret: Secret<String>,

    // Schedule generation horizon (months ahead of today)
    pub generate_months_ahead: u32,
    // Cron expression for the nightly generation + expiry sweep
    pub jobs_cron: String,

    // Notification webhook (fire-and-forget booking events)
    pub notify_webhook_url: Option<String>,
    pub notify_access_token: Option<Secret<String>>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        Ok(Self {
            database_url: config.get("database_url")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            checkin_secret: Secret::new(config.get("checkin_secret")?),

            generate_months_ahead: config.get("generate_months_ahead").unwrap_or(2),
            jobs_cron: config
                .get("jobs_cron")
                .unwrap_or_else(|_| "0 0 3 * * *".to_string()),

            notify_webhook_url: config.get("notify_webhook_url").ok(),
            notify_access_token: config
                .get::<String>("notify_access_token")
                .ok()
                .map(Secret::new),
        })
    }
}
