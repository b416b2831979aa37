// Bot configuration
//
// Settings arrive as a flat string map from one or more ConfigSources and are
// parsed into BotConfig at the start of every poll cycle. Unknown keys are
// ignored; invalid values fall back to the default with a warning so one bad
// row cannot stop the bot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::puzzle::PuzzleStatus;

/// Prefix for environment variables read by [`EnvConfigSource`].
pub const ENV_PREFIX: &str = "HUNTBOT_";

/// Configuration keys understood by [`BotConfig::from_settings`].
pub mod keys {
    pub const WORKER_COUNT: &str = "worker_count";
    pub const PUZZLE_PAUSE_MS: &str = "puzzle_pause_ms";
    pub const CYCLE_PAUSE_SECS: &str = "cycle_pause_secs";
    pub const AUTO_ASSIGN: &str = "auto_assign";
    pub const ABANDONMENT_TIMEOUT_SECS: &str = "abandonment_timeout_secs";
    pub const ABANDONMENT_STATUS: &str = "abandonment_status";
    pub const QUOTA_QPM: &str = "quota_qpm";
    pub const RETRY_MAX_ATTEMPTS: &str = "retry_max_attempts";
    pub const RETRY_DELAY_MS: &str = "retry_delay_ms";
    pub const STORAGE_FAILURE_LIMIT: &str = "storage_failure_limit";
    pub const BOT_IDENTITY: &str = "bot_identity";

    pub const ALL: [&str; 11] = [
        WORKER_COUNT,
        PUZZLE_PAUSE_MS,
        CYCLE_PAUSE_SECS,
        AUTO_ASSIGN,
        ABANDONMENT_TIMEOUT_SECS,
        ABANDONMENT_STATUS,
        QUOTA_QPM,
        RETRY_MAX_ATTEMPTS,
        RETRY_DELAY_MS,
        STORAGE_FAILURE_LIMIT,
        BOT_IDENTITY,
    ];
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The source could not be read
    #[error("config source unavailable: {0}")]
    Unavailable(String),
}

/// Runtime settings for the reconciliation bot.
#[derive(Debug, Clone, PartialEq)]
pub struct BotConfig {
    /// Number of workers draining the queue each cycle
    pub worker_count: usize,
    /// Pause a worker takes after each puzzle
    pub puzzle_pause: Duration,
    /// Sleep between poll cycles
    pub cycle_pause: Duration,
    /// Assign solvers to puzzles they are seen editing
    pub auto_assign: bool,
    /// How long an unattended "Being worked" puzzle may sit idle
    pub abandonment_timeout: Duration,
    /// Status an abandoned puzzle is moved to
    pub abandonment_status: PuzzleStatus,
    /// Outbound call budget for the activity source, per minute
    pub quota_qpm: i64,
    /// Retries after the first attempt when the activity source reports quota exhaustion
    pub retry_max_attempts: u32,
    /// Fixed delay before each retry
    pub retry_delay: Duration,
    /// Consecutive storage faults that abort the current cycle
    pub storage_failure_limit: usize,
    /// Actor name the bot itself edits documents as; its edits are ignored
    pub bot_identity: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            puzzle_pause: Duration::from_millis(1000),
            cycle_pause: Duration::from_secs(60),
            auto_assign: true,
            abandonment_timeout: Duration::from_secs(600),
            abandonment_status: PuzzleStatus::Abandoned,
            quota_qpm: 60,
            retry_max_attempts: 10,
            retry_delay: Duration::from_millis(5000),
            storage_failure_limit: 5,
            bot_identity: "puzzleboss-bot".to_string(),
        }
    }
}

impl BotConfig {
    /// Parse settings, falling back to defaults for missing or invalid values.
    pub fn from_settings(settings: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| settings.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        Self {
            worker_count: parse_or(get(keys::WORKER_COUNT), keys::WORKER_COUNT, defaults.worker_count)
                .max(1),
            puzzle_pause: Duration::from_millis(parse_or(
                get(keys::PUZZLE_PAUSE_MS),
                keys::PUZZLE_PAUSE_MS,
                defaults.puzzle_pause.as_millis() as u64,
            )),
            cycle_pause: Duration::from_secs(parse_or(
                get(keys::CYCLE_PAUSE_SECS),
                keys::CYCLE_PAUSE_SECS,
                defaults.cycle_pause.as_secs(),
            )),
            auto_assign: match get(keys::AUTO_ASSIGN) {
                None => defaults.auto_assign,
                Some(v) => parse_bool(v).unwrap_or_else(|| {
                    warn!(key = keys::AUTO_ASSIGN, value = v, "Invalid boolean, using default");
                    defaults.auto_assign
                }),
            },
            abandonment_timeout: Duration::from_secs(parse_or(
                get(keys::ABANDONMENT_TIMEOUT_SECS),
                keys::ABANDONMENT_TIMEOUT_SECS,
                defaults.abandonment_timeout.as_secs(),
            )),
            abandonment_status: parse_or(
                get(keys::ABANDONMENT_STATUS),
                keys::ABANDONMENT_STATUS,
                defaults.abandonment_status,
            ),
            quota_qpm: parse_or(get(keys::QUOTA_QPM), keys::QUOTA_QPM, defaults.quota_qpm),
            retry_max_attempts: parse_or(
                get(keys::RETRY_MAX_ATTEMPTS),
                keys::RETRY_MAX_ATTEMPTS,
                defaults.retry_max_attempts,
            ),
            retry_delay: Duration::from_millis(parse_or(
                get(keys::RETRY_DELAY_MS),
                keys::RETRY_DELAY_MS,
                defaults.retry_delay.as_millis() as u64,
            )),
            storage_failure_limit: parse_or(
                get(keys::STORAGE_FAILURE_LIMIT),
                keys::STORAGE_FAILURE_LIMIT,
                defaults.storage_failure_limit,
            )
            .max(1),
            bot_identity: get(keys::BOT_IDENTITY)
                .map(str::to_string)
                .unwrap_or(defaults.bot_identity),
        }
    }
}

fn parse_or<T>(value: Option<&str>, key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    match value {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = raw, "Invalid config value, using default");
            default
        }),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// A source of raw key/value settings, read once per cycle.
#[async_trait]
pub trait ConfigSource: Send + Sync + 'static {
    async fn load(&self) -> Result<HashMap<String, String>, ConfigError>;
}

/// Reads `HUNTBOT_<KEY>` environment variables for every known key.
#[derive(Debug, Clone, Default)]
pub struct EnvConfigSource;

impl EnvConfigSource {
    pub fn new() -> Self {
        Self
    }

    /// Collect settings from an arbitrary variable lookup.
    pub fn collect(lookup: impl Fn(&str) -> Option<String>) -> HashMap<String, String> {
        keys::ALL
            .iter()
            .filter_map(|key| {
                let var = format!("{}{}", ENV_PREFIX, key.to_ascii_uppercase());
                lookup(&var).map(|value| (key.to_string(), value))
            })
            .collect()
    }
}

#[async_trait]
impl ConfigSource for EnvConfigSource {
    async fn load(&self) -> Result<HashMap<String, String>, ConfigError> {
        Ok(Self::collect(|var| std::env::var(var).ok()))
    }
}

/// Fixed settings, mostly for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    settings: HashMap<String, String>,
}

impl StaticConfigSource {
    pub fn new(settings: HashMap<String, String>) -> Self {
        Self { settings }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn load(&self) -> Result<HashMap<String, String>, ConfigError> {
        Ok(self.settings.clone())
    }
}

/// Merges several sources; later sources override earlier ones.
///
/// A failing layer is logged and skipped unless every layer fails.
pub struct LayeredConfigSource {
    layers: Vec<Arc<dyn ConfigSource>>,
}

impl LayeredConfigSource {
    pub fn new(layers: Vec<Arc<dyn ConfigSource>>) -> Self {
        Self { layers }
    }
}

#[async_trait]
impl ConfigSource for LayeredConfigSource {
    async fn load(&self) -> Result<HashMap<String, String>, ConfigError> {
        let mut merged = HashMap::new();
        let mut last_error = None;
        let mut loaded = 0usize;

        for layer in &self.layers {
            match layer.load().await {
                Ok(settings) => {
                    loaded += 1;
                    merged.extend(settings);
                }
                Err(e) => {
                    warn!(error = %e, "Config layer failed to load");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if loaded == 0 => Err(e),
            _ => Ok(merged),
        }
    }
}
