// =============================================================================
// Indicator Stream — Main Entry Point
// =============================================================================
//
// Serves RSI / ATR snapshots for the tradable universe over a one-shot REST
// query and a WebSocket stream whose timeframe each client can change at
// runtime.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod binance;
mod error;
mod indicators;
mod market_data;
mod rsi_store;
mod runtime_config;
mod scanner;
mod stream;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::binance::BinanceClient;
use crate::rsi_store::PreviousRsiStore;
use crate::runtime_config::RuntimeConfig;
use crate::scanner::UniverseScanner;

const DEFAULT_CONFIG_PATH: &str = "indicator_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Indicator Stream — starting up");

    let config_path =
        std::env::var("INDICATOR_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env();

    info!(
        bind_addr = %config.bind_addr,
        default_interval = %config.default_interval,
        poll_interval_secs = config.poll_interval_secs,
        pinned_symbols = config.symbols.len(),
        quote_asset = %config.quote_asset,
        "Configuration resolved"
    );

    // ── 2. Market data + scanner ─────────────────────────────────────────
    let client = Arc::new(BinanceClient::new(&config)?);
    let scanner = Arc::new(UniverseScanner::new(
        client,
        Arc::new(PreviousRsiStore::new()),
        config.kline_limit,
        config.max_concurrent_fetches,
    ));

    // ── 3. Shared state ──────────────────────────────────────────────────
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, scanner));

    // ── 4. API server ────────────────────────────────────────────────────
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server to {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            warn!("Shutdown signal received — stopping gracefully");
            let aborted = shutdown_state.sessions.shutdown_all();
            info!(sessions = aborted, "Stream sessions stopped");
        })
        .await
        .context("API server failed")?;

    info!("Indicator Stream shut down complete.");
    Ok(())
}
