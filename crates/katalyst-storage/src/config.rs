//! Environment-driven storage configuration
//!
//! Missing or malformed configuration is a startup error - the process
//! should refuse to serve rather than run with a broken persistence layer.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Errors raised while loading or applying configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable missing
    #[error("missing environment variable: {0} (or DATABASE_URL)")]
    MissingVar(&'static str),

    /// Environment variable present but unparseable
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    /// Pool creation failed
    #[error("failed to connect to database: {0}")]
    Connect(#[from] sqlx::Error),
}

/// Connection settings for the PostgreSQL backend
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Postgres connection string
    pub database_url: String,

    /// Maximum pool size
    pub max_connections: u32,

    /// How long to wait for a connection before giving up
    pub acquire_timeout: Duration,
}

impl StorageConfig {
    /// Build a config with defaults for everything but the URL
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }

    /// Set the maximum pool size
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// Set the acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Load from the environment
    ///
    /// Reads `KATALYST_DATABASE_URL` (falling back to `DATABASE_URL`) and
    /// optionally `KATALYST_DB_MAX_CONNECTIONS`. A `.env` file in the
    /// working directory is honored when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("KATALYST_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| ConfigError::MissingVar("KATALYST_DATABASE_URL"))?;

        let mut config = Self::new(database_url);

        if let Ok(value) = std::env::var("KATALYST_DB_MAX_CONNECTIONS") {
            let max = value
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidValue {
                    name: "KATALYST_DB_MAX_CONNECTIONS",
                    value,
                })?;
            config.max_connections = max.max(1);
        }

        Ok(config)
    }

    /// Open a connection pool with these settings
    pub async fn connect(&self) -> Result<PgPool, ConfigError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.database_url)
            .await?;

        info!(
            max_connections = self.max_connections,
            "connected to database"
        );
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = StorageConfig::new("postgres://localhost/katalyst");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_builder_overrides() {
        let config = StorageConfig::new("postgres://localhost/katalyst")
            .with_max_connections(0)
            .with_acquire_timeout(Duration::from_secs(1));

        // Clamped to at least one connection
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.acquire_timeout, Duration::from_secs(1));
    }
}
