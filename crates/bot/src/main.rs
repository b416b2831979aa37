use std::sync::Arc;

use anyhow::{Context, Result};
use huntbot::BotSettings;
use huntbot_core::telemetry::{init_telemetry, TelemetryConfig};
use huntbot_core::{BotConfig, ConfigSource, EnvConfigSource, LayeredConfigSource};
use huntbot_engine::stats::{HttpStatsReporter, LogStatsReporter, StatsReporter};
use huntbot_engine::{
    ActivitySource, AssignmentStore, Poller, PostgresAssignmentStore, Reconciler,
    SchedulerContext, SheetsActivityTransport, WorkerPool,
};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "huntbot=info,...")
    // - LOG_FORMAT=json: JSON lines
    let telemetry_config = TelemetryConfig::from_env();
    init_telemetry(&telemetry_config);

    tracing::info!(service = %telemetry_config.service_name, "huntbot starting...");

    let settings = BotSettings::from_env().context("Failed to read startup settings")?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(&settings.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Connected to database");

    let store = Arc::new(PostgresAssignmentStore::new(pool));

    // Environment first, config table on top
    let config_source: Arc<dyn ConfigSource> = Arc::new(LayeredConfigSource::new(vec![
        Arc::new(EnvConfigSource::new()),
        Arc::new(store.config_source()),
    ]));
    let ctx = Arc::new(SchedulerContext::new(BotConfig::default(), config_source));
    let config = ctx
        .refresh()
        .await
        .context("Failed to load initial configuration")?;

    tracing::info!(
        workers = config.worker_count,
        cycle_pause_secs = config.cycle_pause.as_secs(),
        auto_assign = config.auto_assign,
        quota_qpm = config.quota_qpm,
        "Loaded configuration"
    );

    let transport = Arc::new(SheetsActivityTransport::new(settings.google_token.clone()));
    let source = ActivitySource::new(transport, ctx.clone());
    let store: Arc<dyn AssignmentStore> = store;
    let reconciler = Reconciler::new(store.clone(), source, ctx.clone());

    let stats: Arc<dyn StatsReporter> = match &settings.api_url {
        Some(url) => {
            tracing::info!(api_url = %url, "Reporting botstats to API");
            Arc::new(HttpStatsReporter::new(url.clone()))
        }
        None => {
            tracing::info!("HUNTBOT_API_URL not set, botstats go to the log");
            Arc::new(LogStatsReporter)
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_pool = WorkerPool::new(Arc::new(reconciler), shutdown_rx.clone());
    let poller = Poller::new(ctx, store, worker_pool, stats, shutdown_rx);

    let run = poller.run();
    tokio::pin!(run);

    tokio::select! {
        _ = &mut run => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            // Let the current cycle drain
            run.await;
        }
    }

    tracing::info!("huntbot shutdown complete");
    Ok(())
}
