//! Bandit Trader
//!
//! Runs the decision core in paper mode:
//! - loads configuration and persisted policy state
//! - reads trade signals as JSON lines from stdin
//! - evaluates signals and monitors positions on separate timers

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

use bandit_trader::config::AppConfig;
use bandit_trader::engine::SignalInput;
use bandit_trader::events::{spawn_event_handler, Event};
use bandit_trader::telemetry::{init_logging, init_metrics};
use bandit_trader::{Broker, EventBus, PaperBroker, SharedState, TradingAgent};

/// Contextual-bandit trade decision agent
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override log level
    #[arg(long)]
    log_level: Option<String>,

    /// Fix the exploration RNG seed
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)?;

    // Apply CLI overrides
    if let Some(level) = args.log_level {
        config.telemetry.log_level = level;
    }
    if args.seed.is_some() {
        config.policy.seed = args.seed;
    }

    let _log_guard = init_logging(&config.telemetry)?;

    info!("Starting Bandit Trader v{}", env!("CARGO_PKG_VERSION"));
    info!("Paper trading: {}", config.paper_trading);
    anyhow::ensure!(
        config.paper_trading,
        "only paper trading is available; no live broker client is configured"
    );

    if config.telemetry.enable_metrics {
        init_metrics(config.telemetry.metrics_port)?;
    }

    let state = Arc::new(SharedState::new());
    let events = Arc::new(EventBus::default());
    let broker: Arc<dyn Broker> = Arc::new(PaperBroker::new(config.paper_capital));
    let config = Arc::new(config);

    let agent = Arc::new(
        TradingAgent::bootstrap(config.clone(), broker, state, events.clone())
            .await
            .context("Failed to initialize trading agent")?,
    );

    // Exit decisions and rewards as structured records
    let _event_log = spawn_event_handler(&events, "event-log", |event| async move {
        match &event {
            Event::Exit(_) | Event::Reward(_) | Event::IntentCreated(_) | Event::IntentRejected { .. } => {
                match serde_json::to_string(&event) {
                    Ok(json) => info!(target: "events", "{}", json),
                    Err(e) => warn!("Failed to serialize event: {}", e),
                }
            }
            _ => {}
        }
    });

    // Signals arrive as one JSON object per line on stdin
    let sender = agent.signal_sender();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<SignalInput>(&line) {
                    Ok(input) => {
                        if sender.send(input).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Ignoring malformed signal: {}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read signals: {}", e);
                    break;
                }
            }
        }
        info!("Signal input closed");
    });

    agent.start().await;
    info!("Agent running, awaiting signals");

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, gracefully stopping..."),
        Err(err) => error!("Error listening for shutdown signal: {}", err),
    }

    agent.stop().await.context("Failed to persist state on shutdown")?;
    info!("Bandit Trader stopped");
    Ok(())
}
