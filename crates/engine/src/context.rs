//! Shared scheduler context
//!
//! Built once at startup and handed to every component by `Arc`. It owns the
//! only state shared across workers: the hot-reloadable configuration, the
//! rate limiter slot, and the quota-failure counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};

use huntbot_core::{BotConfig, ConfigError, ConfigSource, StaticConfigSource};

use crate::reliability::RateLimiter;

/// Process-wide context for the reconciliation engine
pub struct SchedulerContext {
    config: RwLock<BotConfig>,
    source: Arc<dyn ConfigSource>,
    rate_limiter: RateLimiter,
    quota_failures: AtomicU64,
}

impl SchedulerContext {
    /// Create a context with an initial config and the source it reloads from
    pub fn new(config: BotConfig, source: Arc<dyn ConfigSource>) -> Self {
        Self {
            config: RwLock::new(config),
            source,
            rate_limiter: RateLimiter::new(),
            quota_failures: AtomicU64::new(0),
        }
    }

    /// Create a context whose config never changes on refresh
    pub fn with_config(config: BotConfig) -> Self {
        Self::new(config, Arc::new(StaticConfigSource::default()))
    }

    /// Current configuration (a copy; never hold the lock across awaits)
    pub fn config(&self) -> BotConfig {
        self.config.read().clone()
    }

    /// Reload settings from the source and swap them in.
    ///
    /// Keys missing from the source take their defaults. On error the
    /// previous configuration stays in effect.
    pub async fn refresh(&self) -> Result<BotConfig, ConfigError> {
        let settings = self.source.load().await?;
        let fresh = BotConfig::from_settings(&settings);

        let changed = {
            let mut current = self.config.write();
            let changed = *current != fresh;
            *current = fresh.clone();
            changed
        };

        if changed {
            info!(
                worker_count = fresh.worker_count,
                auto_assign = fresh.auto_assign,
                quota_qpm = fresh.quota_qpm,
                abandonment_timeout_secs = fresh.abandonment_timeout.as_secs(),
                "Configuration changed"
            );
        } else {
            debug!("Configuration unchanged");
        }

        Ok(fresh)
    }

    /// Reserve the next outbound slot at the currently configured QPM
    pub async fn acquire_slot(&self) -> Duration {
        let qpm = self.config.read().quota_qpm;
        self.rate_limiter.acquire(qpm).await
    }

    /// Count one quota failure; returns the new total
    pub fn record_quota_failure(&self) -> u64 {
        self.quota_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Total quota failures since startup
    pub fn quota_failures(&self) -> u64 {
        self.quota_failures.load(Ordering::Relaxed)
    }
}
