use std::env;

use tracing::info;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Remote booru API
    pub booru_base_url: String,
    pub booru_user_agent: String,

    // Sync worker
    pub sync_interval_secs: u64,
    pub sync_page_size: i64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            booru_base_url: required_env("BOORU_BASE_URL"),
            // The upstream rejects requests without an identifying User-Agent.
            booru_user_agent: env::var("BOORU_USER_AGENT")
                .unwrap_or_else(|_| "boorumirror/0.1".to_string()),
            sync_interval_secs: env::var("SYNC_INTERVAL_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .expect("SYNC_INTERVAL_SECS must be a number"),
            sync_page_size: env::var("SYNC_PAGE_SIZE")
                .unwrap_or_else(|_| "320".to_string())
                .parse::<i64>()
                .ok()
                .filter(|n| *n > 0)
                .expect("SYNC_PAGE_SIZE must be a positive number"),
        }
    }

    /// Log the non-secret parts of the configuration.
    pub fn log_redacted(&self) {
        info!(
            base_url = %self.booru_base_url,
            user_agent = %self.booru_user_agent,
            interval_secs = self.sync_interval_secs,
            page_size = self.sync_page_size,
            "Configuration loaded (database url redacted)"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
