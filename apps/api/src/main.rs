mod analysis;
mod config;
mod errors;
mod export;
mod extraction;
mod llm_client;
mod models;
mod rate_limit;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::analysis::AnalysisPipeline;
use crate::config::Config;
use crate::export::ReportExporter;
use crate::extraction::DocumentExtractor;
use crate::llm_client::LlmClient;
use crate::rate_limit::RateGovernor;
use crate::routes::build_router;
use crate::state::AppState;

const LEDGER_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on a missing or malformed API key)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Screener API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize LLM client
    let llm = LlmClient::new(
        config.openai_api_key.clone(),
        &config.openai_base_url,
        config.llm_timeout,
    )?;
    info!(
        "LLM client initialized (default model: {}, timeout: {:?})",
        config.default_model, config.llm_timeout
    );

    let governor = RateGovernor::new(config.quota_limits());
    info!(
        "Quota: {}/hour, {}/day per caller",
        config.max_requests_per_hour, config.max_requests_per_day
    );
    spawn_ledger_sweep(governor.clone());

    let pipeline = AnalysisPipeline::new(
        governor,
        Arc::new(DocumentExtractor),
        Arc::new(llm),
        config.pipeline_settings(),
    );
    let exporter = ReportExporter::new(config.export_mode());
    info!("Export mode: {:?}", exporter.mode());

    // Build app state
    let state = AppState {
        pipeline,
        exporter,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Periodically drops callers whose ledgers have aged out entirely.
fn spawn_ledger_sweep(governor: RateGovernor) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LEDGER_SWEEP_INTERVAL);
        ticker.tick().await; // first tick completes immediately
        loop {
            ticker.tick().await;
            let removed = governor.sweep();
            debug!(removed, "Swept idle quota ledgers");
        }
    });
}
