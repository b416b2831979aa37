// Process settings
//
// Connection-level settings read once at startup. Everything that tunes the
// poll loop comes from `BotConfig` instead, so it can change without a
// restart.

use std::time::Duration;

/// Startup failures that should stop the process
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("{0} environment variable required")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Settings the bot needs before it can talk to anything
#[derive(Debug, Clone)]
pub struct BotSettings {
    /// PostgreSQL connection string
    pub database_url: String,
    /// OAuth access token for the Sheets and Drive APIs
    pub google_token: String,
    /// Base URL of the hunt API; botstats go to the log when unset
    pub api_url: Option<String>,
    /// Upper bound on pooled database connections
    pub max_connections: u32,
    /// How long to wait for a pooled connection
    pub acquire_timeout: Duration,
}

impl BotSettings {
    pub const DATABASE_URL: &'static str = "DATABASE_URL";
    pub const GOOGLE_TOKEN: &'static str = "HUNTBOT_GOOGLE_TOKEN";
    pub const API_URL: &'static str = "HUNTBOT_API_URL";
    pub const MAX_CONNECTIONS: &'static str = "HUNTBOT_DB_MAX_CONNECTIONS";
    pub const ACQUIRE_TIMEOUT: &'static str = "HUNTBOT_DB_ACQUIRE_TIMEOUT_SECS";

    /// Read settings from the process environment
    ///
    /// Environment variables:
    /// - `DATABASE_URL`: required
    /// - `HUNTBOT_GOOGLE_TOKEN`: required
    /// - `HUNTBOT_API_URL`: optional botstats endpoint base
    /// - `HUNTBOT_DB_MAX_CONNECTIONS`: default 10
    /// - `HUNTBOT_DB_ACQUIRE_TIMEOUT_SECS`: default 30
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(SettingsError::Missing(name))
        };

        let database_url = required(Self::DATABASE_URL)?;
        let google_token = required(Self::GOOGLE_TOKEN)?;
        let api_url = lookup(Self::API_URL).filter(|v| !v.trim().is_empty());

        let max_connections = parse_or(&lookup, Self::MAX_CONNECTIONS, 10u32)?;
        if max_connections == 0 {
            return Err(SettingsError::Invalid {
                name: Self::MAX_CONNECTIONS,
                value: "0".to_string(),
            });
        }
        let acquire_timeout = Duration::from_secs(parse_or(&lookup, Self::ACQUIRE_TIMEOUT, 30u64)?);

        Ok(Self {
            database_url,
            google_token,
            api_url,
            max_connections,
            acquire_timeout,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, SettingsError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| SettingsError::Invalid { name, value }),
    }
}
