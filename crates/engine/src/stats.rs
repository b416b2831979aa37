//! Bot statistics reporting
//!
//! Each poll cycle reports its timings and counters as named numeric values.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info, warn};

/// Stat keys reported after every cycle
pub mod keys {
    pub const LOOP_TIME_SETUP: &str = "loop_time_setup";
    pub const LOOP_TIME_PROCESSING: &str = "loop_time_processing";
    pub const LOOP_TIME_AVG: &str = "loop_time_avg_per_puzzle";
    pub const LOOP_PUZZLE_COUNT: &str = "loop_puzzle_count";
    pub const QUOTA_FAILURES: &str = "quota_failures";
}

/// Stats reporting errors
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
}

/// Sink for named numeric stats
#[async_trait]
pub trait StatsReporter: Send + Sync + 'static {
    async fn report(&self, key: &str, value: f64) -> Result<(), StatsError>;
}

/// Posts `{"val": <n>}` to `<api>/botstats/<key>`
#[derive(Clone)]
pub struct HttpStatsReporter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatsReporter {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StatsReporter for HttpStatsReporter {
    async fn report(&self, key: &str, value: f64) -> Result<(), StatsError> {
        let url = format!("{}/botstats/{}", self.base_url, key);
        debug!(url = %url, value, "Posting bot stat");

        let response = self
            .client
            .post(&url)
            .json(&json!({ "val": value }))
            .send()
            .await
            .map_err(|e| StatsError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(%key, status = %status, "Bot stat rejected");
            return Err(StatsError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

/// Emits stats as tracing events
#[derive(Debug, Clone, Default)]
pub struct LogStatsReporter;

#[async_trait]
impl StatsReporter for LogStatsReporter {
    async fn report(&self, key: &str, value: f64) -> Result<(), StatsError> {
        info!(stat = key, value, "Bot stat");
        Ok(())
    }
}

/// Keeps the latest value per key, for tests
#[derive(Debug, Default)]
pub struct InMemoryStatsReporter {
    values: Mutex<HashMap<String, f64>>,
    reports: Mutex<usize>,
}

impl InMemoryStatsReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value reported for `key`
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.lock().get(key).copied()
    }

    /// Total number of reports received
    pub fn report_count(&self) -> usize {
        *self.reports.lock()
    }
}

#[async_trait]
impl StatsReporter for InMemoryStatsReporter {
    async fn report(&self, key: &str, value: f64) -> Result<(), StatsError> {
        self.values.lock().insert(key.to_string(), value);
        *self.reports.lock() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_http_reporter_posts_value() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botstats/loop_puzzle_count"))
            .and(body_json(json!({"val": 12.0})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let reporter = HttpStatsReporter::new(format!("{}/", server.uri()));
        reporter.report(keys::LOOP_PUZZLE_COUNT, 12.0).await.unwrap();
    }

    #[tokio::test]
    async fn test_http_reporter_surfaces_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let reporter = HttpStatsReporter::new(server.uri());
        let err = reporter.report("x", 1.0).await.unwrap_err();
        assert!(matches!(err, StatsError::Http { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_in_memory_keeps_latest() {
        let reporter = InMemoryStatsReporter::new();
        reporter.report("a", 1.0).await.unwrap();
        reporter.report("a", 2.5).await.unwrap();
        assert_eq!(reporter.get("a"), Some(2.5));
        assert_eq!(reporter.get("b"), None);
        assert_eq!(reporter.report_count(), 2);
    }
}
