//! Prometheus metrics export

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use crate::policy::Action;
use crate::utils::types::ExitReason;

pub fn init_metrics(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    register_metrics();
    info!("Prometheus metrics server started on {}", addr);
    Ok(())
}

fn register_metrics() {
    // Signal pipeline
    describe_counter!("bandit_trader_signals_evaluated_total", "Signals run through the decision pipeline");
    describe_counter!("bandit_trader_signals_skipped_total", "Signals that produced no order");
    describe_histogram!("bandit_trader_evaluation_latency_ms", "Context-to-intent evaluation latency");

    // Orders
    describe_counter!("bandit_trader_intents_placed_total", "Order intents accepted by the broker");
    describe_counter!("bandit_trader_intents_rejected_total", "Order intents rejected by the broker");

    // Policy
    describe_counter!("bandit_trader_selections_total", "Policy selections by action and kind");
    describe_counter!("bandit_trader_policy_updates_total", "Rewards applied to the policy");
    describe_histogram!("bandit_trader_reward_r", "Observed rewards in R-multiples");

    // Positions
    describe_counter!("bandit_trader_exits_total", "Exit decisions by reason");
    describe_gauge!("bandit_trader_open_positions", "Open positions at the broker");
    describe_gauge!("bandit_trader_equity_usd", "Available capital plus open notional");

    describe_counter!("bandit_trader_errors_total", "Total number of errors");
}

pub fn record_signal_evaluated(latency_ms: f64) {
    counter!("bandit_trader_signals_evaluated_total").increment(1);
    histogram!("bandit_trader_evaluation_latency_ms").record(latency_ms);
}

pub fn record_signal_skipped(reason: &'static str) {
    counter!("bandit_trader_signals_skipped_total", "reason" => reason).increment(1);
}

pub fn record_intent_placed() {
    counter!("bandit_trader_intents_placed_total").increment(1);
}

pub fn record_intent_rejected() {
    counter!("bandit_trader_intents_rejected_total").increment(1);
}

pub fn record_selection(action: Action, kind: &'static str) {
    counter!(
        "bandit_trader_selections_total",
        "action" => action.id().to_string(),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_policy_update(action: Action, reward: f64) {
    counter!("bandit_trader_policy_updates_total", "action" => action.id().to_string()).increment(1);
    histogram!("bandit_trader_reward_r").record(reward);
}

pub fn record_exit(reason: ExitReason) {
    counter!("bandit_trader_exits_total", "reason" => reason.as_str()).increment(1);
}

pub fn record_account(open_positions: usize, equity: f64) {
    gauge!("bandit_trader_open_positions").set(open_positions as f64);
    gauge!("bandit_trader_equity_usd").set(equity);
}

pub fn record_error() {
    counter!("bandit_trader_errors_total").increment(1);
}
