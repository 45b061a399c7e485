//! Quoteflow application
//!
//! Loads the engine configuration, connects to every configured quote
//! provider and reports cross-provider arbitrage opportunities until Ctrl-C.

mod settings;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use quoteflow_core::{Engine, EngineEvent, Opportunity, OpportunityConsumer};

#[derive(Parser, Debug)]
#[command(name = "quoteflow")]
#[command(about = "Multi-provider FX quote aggregation and arbitrage scanner")]
struct Args {
    /// Engine configuration file (TOML)
    #[arg(short, long, env = "QUOTEFLOW_CONFIG", default_value = "quoteflow.toml")]
    config: PathBuf,

    /// Write each opportunity to stdout as a JSON line
    #[arg(long)]
    json: bool,

    /// Seconds between status reports, 0 to disable
    #[arg(long, default_value_t = 60)]
    status_interval: u64,
}

/// Prints opportunities as JSON lines for downstream tooling.
struct JsonLinesReporter;

#[async_trait]
impl OpportunityConsumer for JsonLinesReporter {
    fn name(&self) -> &str {
        "json-lines"
    }

    async fn on_opportunity(&self, opportunity: &Opportunity) -> Result<()> {
        println!("{}", serde_json::to_string(opportunity)?);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting quoteflow with config {}", args.config.display());
    let config = settings::load(&args.config)?;
    for provider in &config.providers {
        info!("📡 {} ({}) → {} symbols", provider.id, provider.kind, provider.symbols.len());
    }

    let engine = Arc::new(Engine::from_config(config)?);
    if args.json {
        engine.register_consumer(Arc::new(JsonLinesReporter))?;
    }

    let events_task = tokio::spawn(log_events(engine.subscribe()));
    let status_task = (args.status_interval > 0).then(|| {
        tokio::spawn(report_status(engine.clone(), Duration::from_secs(args.status_interval)))
    });

    engine.start().await?;
    info!("✅ Engine running, press Ctrl-C to stop");

    match signal::ctrl_c().await {
        Ok(()) => info!("🛑 Received Ctrl-C, shutting down"),
        Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
    }

    engine.shutdown().await?;
    if let Some(task) = status_task {
        task.abort();
    }
    events_task.abort();

    let metrics = engine.metrics();
    info!(
        "📊 Final: {} scans, {} opportunities, {} suppressed",
        metrics.scanner.scans, metrics.scanner.opportunities, metrics.scanner.suppressed_duplicates
    );
    Ok(())
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::ProviderFailed { provider, attempts, last_error }) => {
                error!("❌ {} failed after {} attempts: {}", provider, attempts, last_error);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!("Event log lagged, {} events skipped", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn report_status(engine: Arc<Engine>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        for status in engine.provider_status() {
            info!(
                "📈 {} {} (attempts {}){}",
                status.id,
                status.state,
                status.reconnect_attempts,
                status.last_error.map(|e| format!(", last error: {}", e)).unwrap_or_default()
            );
        }
        let quotes = engine.list_current_quotes(None);
        info!("💱 {} fresh quotes, {} recent opportunities", quotes.len(), engine.list_opportunities(None).len());
    }
}
