use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_service_key: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            database_url: env::var("SCHEDULE_DB_URL")
                .unwrap_or_else(|_| {
                    warn!("SCHEDULE_DB_URL not set, using empty value");
                    String::new()
                }),
            database_service_key: env::var("SCHEDULE_DB_SERVICE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SCHEDULE_DB_SERVICE_KEY not set, using empty value");
                    String::new()
                }),
        };

        if !config.is_configured() {
            warn!("Scheduling storage not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.database_url.is_empty() && !self.database_service_key.is_empty()
    }

    pub fn with_database(url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            database_url: url.into(),
            database_service_key: service_key.into(),
        }
    }
}
