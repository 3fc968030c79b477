use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use analysis_orchestrator::{ForecastEngine, PipelineRunner};
use anyhow::{Context, Result};
use history_store::{ReconciliationStore, SqliteBackend};
use ml_client::{CallOrchestrator, ChatScorerClient};
use polygon_client::PolygonClient;
use technical_analysis::{IndicatorBackend, IndicatorEngine};

mod config;

use config::AgentConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting forecast agent");

    // 2. Load configuration
    let config = AgentConfig::from_env()?;
    config.validate()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Horizon: {} sessions", config.forecast_horizon);
    tracing::info!(
        "  History: {} days of {:?} bars",
        config.history_period_days,
        config.history_interval
    );
    tracing::info!("  Call policy: {:?}", config.call_policy());

    // 3. Market data (history + headlines)
    let polygon = Arc::new(PolygonClient::new(
        config.polygon_api_key.clone(),
        config.polygon_rate_limit,
    ));

    // 4. Indicators
    let backend = IndicatorBackend::resolve(config.indicator_backend);
    tracing::info!("Indicator backend: {}", backend.name());
    let indicators = IndicatorEngine::new(backend);

    // 5. Forecaster, with the scorer when a key is configured
    let mut forecaster = ForecastEngine::new(config.forecast_horizon);
    match config.scorer_config() {
        Some(scorer_config) => {
            let client = ChatScorerClient::new(scorer_config).context("Failed to build scorer client")?;
            tracing::info!("Scorer: {} via {}", client.model(), config.scorer_base_url);
            forecaster = forecaster.with_scorer(CallOrchestrator::new(Arc::new(client), config.call_policy()));
            if config.enable_news {
                forecaster = forecaster.with_news(polygon.clone());
            }
        }
        None => {
            tracing::warn!("SCORER_API_KEY not set, every forecast will use the quantitative fallback");
        }
    }

    // 6. Store
    let store = SqliteBackend::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open history store at {}", config.database_url))?;
    tracing::info!("History store ready ({})", config.database_url);

    let runner = PipelineRunner::new(polygon, indicators, forecaster, ReconciliationStore::new(store))
        .with_history_window(config.history_period_days, config.history_interval);

    // 7. SIGINT / SIGTERM stop the run before the next ticker
    let abort = runner.abort_handle();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        tracing::warn!("Shutdown signal received, stopping after the current ticker");
        abort.store(true, Ordering::SeqCst);
    });

    // 8. Run
    let tickers = runner
        .resolve_tickers(&config.watchlist)
        .await
        .context("Failed to resolve ticker list")?;
    let report = runner.run(&tickers).await.context("Run aborted")?;

    println!("{report}");
    tracing::info!("Forecast agent finished");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM. Never resolves when no handler can be
/// installed, so a missing signal source cannot cancel the run.
#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("SIGTERM handler unavailable: {}", e);
            wait_for_ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    until_signal("SIGINT", tokio::signal::ctrl_c()).await
}

async fn until_signal(name: &str, signal: impl Future<Output = std::io::Result<()>>) {
    match signal.await {
        Ok(()) => tracing::info!("Received {}", name),
        Err(e) => {
            tracing::warn!("{} handler unavailable, it will not stop the run: {}", name, e);
            std::future::pending::<()>().await;
        }
    }
}
