//! Trade Monitor
//!
//! Re-evaluates open positions on its own cadence, from a `MarketSnapshot`
//! the caller fetched. Rules, first match wins:
//! 1. STOP_HIT: mark crossed the stop against the position
//! 2. TARGET_HIT: mark crossed the target in favor
//! 3. MAX_HOLD_TIME: held longer than `max_hold`, whatever the P&L
//! 4. EMERGENCY_LOSS_LIMIT: `|pnl_pct| > emergency_loss_pct`
//!
//! Rule 4 stays in force even though rule 1 should normally fire first:
//! broker-side stops are not trusted to be honored.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::config::MonitorConfig;
use crate::error::CoreResult;
use crate::events::{Event, EventBus};
use crate::policy::{Action, BanditPolicy};
use crate::position::{AttributionLedger, TradeJournal, TradeRecord};
use crate::risk::AccountRiskTracker;
use crate::telemetry::metrics as telemetry;
use crate::utils::types::{ExitDecision, ExitReason, OpenPosition, Quote, RewardUpdate, Side};

#[derive(Debug, Clone, Copy)]
pub struct ExitRules {
    pub max_hold: Duration,
    pub emergency_loss_pct: f64,
}

impl ExitRules {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            max_hold: Duration::seconds((config.max_hold_hours * 3600.0).round() as i64),
            emergency_loss_pct: config.emergency_loss_pct,
        }
    }
}

impl Default for ExitRules {
    fn default() -> Self {
        Self {
            max_hold: Duration::hours(24),
            emergency_loss_pct: 0.03,
        }
    }
}

/// Apply the exit rules to one position at `mark`
pub fn evaluate_position(
    position: &OpenPosition,
    mark: f64,
    now: DateTime<Utc>,
    rules: &ExitRules,
) -> Option<ExitDecision> {
    let pnl = position.unrealized_pnl(mark);
    let notional = position.notional();
    let pnl_pct = if notional > 0.0 { pnl / notional } else { 0.0 };

    let stop_hit = match position.direction {
        Side::Buy => mark <= position.stop_loss_price,
        Side::Sell => mark >= position.stop_loss_price,
    };
    let target_hit = match position.direction {
        Side::Buy => mark >= position.take_profit_price,
        Side::Sell => mark <= position.take_profit_price,
    };

    let reason = if stop_hit {
        ExitReason::StopHit
    } else if target_hit {
        ExitReason::TargetHit
    } else if now - position.opened_at > rules.max_hold {
        ExitReason::MaxHoldTime
    } else if pnl_pct.abs() > rules.emergency_loss_pct {
        ExitReason::EmergencyLossLimit
    } else {
        return None;
    };

    Some(ExitDecision {
        position_id: position.position_id.clone(),
        symbol: position.symbol.clone(),
        reason,
        exit_price: mark,
        pnl,
        pnl_pct,
        decided_at: now,
    })
}

/// Evaluate a snapshot of positions against quotes keyed by symbol.
/// Positions without a quote are left for the next pass.
pub fn evaluate(
    positions: &[OpenPosition],
    quotes: &HashMap<String, Quote>,
    now: DateTime<Utc>,
    rules: &ExitRules,
) -> Vec<ExitDecision> {
    positions
        .iter()
        .filter_map(|position| match quotes.get(&position.symbol) {
            Some(quote) => evaluate_position(position, quote.exit_price(position.direction), now, rules),
            None => {
                warn!("No quote for {}, skipping position {}", position.symbol, position.position_id);
                None
            }
        })
        .collect()
}

/// Broker state one monitor pass works from
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub positions: Vec<OpenPosition>,
    /// Quotes keyed by symbol; positions without one wait for the next pass
    pub quotes: HashMap<String, Quote>,
}

impl MarketSnapshot {
    /// Open positions plus one quote per distinct symbol.
    /// A failed quote only leaves that symbol out.
    pub async fn fetch(broker: &dyn Broker) -> CoreResult<Self> {
        let positions = broker.get_open_positions().await?;
        let mut quotes = HashMap::new();
        for position in &positions {
            if quotes.contains_key(&position.symbol) {
                continue;
            }
            match broker.get_quote(&position.symbol).await {
                Ok(quote) => {
                    quotes.insert(position.symbol.clone(), quote);
                }
                Err(e) => warn!("Quote for {} unavailable: {}", position.symbol, e),
            }
        }
        Ok(Self { positions, quotes })
    }
}

/// What one monitor pass did
#[derive(Debug, Default)]
pub struct PassReport {
    pub evaluated: usize,
    pub decisions: Vec<ExitDecision>,
    pub rewards: Vec<RewardUpdate>,
    /// Decisions the broker failed to execute; retried next pass
    pub close_failures: usize,
}

pub struct TradeMonitor {
    rules: ExitRules,
    broker: Arc<dyn Broker>,
    policy: Arc<BanditPolicy>,
    ledger: Arc<AttributionLedger>,
    journal: Arc<TradeJournal>,
    account: Arc<AccountRiskTracker>,
    events: Arc<EventBus>,
}

impl TradeMonitor {
    pub fn new(
        rules: ExitRules,
        broker: Arc<dyn Broker>,
        policy: Arc<BanditPolicy>,
        ledger: Arc<AttributionLedger>,
        journal: Arc<TradeJournal>,
        account: Arc<AccountRiskTracker>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            rules,
            broker,
            policy,
            ledger,
            journal,
            account,
            events,
        }
    }

    pub fn rules(&self) -> &ExitRules {
        &self.rules
    }

    /// Decide exits on `snapshot`, close, and route rewards.
    /// The broker is only used to execute closes.
    pub async fn run_pass(&self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> CoreResult<PassReport> {
        let positions = &snapshot.positions;
        let decisions = evaluate(positions, &snapshot.quotes, now, &self.rules);
        let mut report = PassReport {
            evaluated: positions.len(),
            ..PassReport::default()
        };

        for decision in decisions {
            let Some(position) = positions.iter().find(|p| p.position_id == decision.position_id) else {
                continue;
            };

            if let Err(e) = self.broker.close_position(&decision.position_id).await {
                warn!(
                    "Close of {} ({}) failed, retrying next pass: {}",
                    decision.position_id, decision.reason, e
                );
                telemetry::record_error();
                report.close_failures += 1;
                continue;
            }

            info!(
                "Exit {} {} {}: {} @ {:.5}, P&L ${:.2} ({:.2}%)",
                position.symbol,
                position.direction,
                decision.position_id,
                decision.reason,
                decision.exit_price,
                decision.pnl,
                decision.pnl_pct * 100.0
            );
            telemetry::record_exit(decision.reason);
            self.account.record_trade(decision.pnl, now);

            let reward = self.route_reward(&decision);
            let action_id = reward.as_ref().map(|r| r.action_id);

            let recorded = self
                .journal
                .record(TradeRecord {
                    position_id: position.position_id.clone(),
                    symbol: position.symbol.clone(),
                    direction: position.direction,
                    action_id,
                    entry_price: position.entry_price,
                    exit_price: decision.exit_price,
                    size: position.size,
                    pnl: decision.pnl,
                    pnl_pct: decision.pnl_pct,
                    reward: reward.as_ref().map(|r| r.reward),
                    reason: decision.reason,
                    opened_at: position.opened_at,
                    closed_at: now,
                })
                .await;
            if let Err(e) = recorded {
                warn!("Journal write for {} failed: {}", decision.position_id, e);
                telemetry::record_error();
            }

            self.events.publish(Event::Exit(decision.clone()));
            if let Some(reward) = reward {
                self.events.publish(Event::Reward(reward.clone()));
                report.rewards.push(reward);
            }
            report.decisions.push(decision);
        }

        debug!(
            "Monitor pass: {} positions, {} exits, {} close failures",
            report.evaluated,
            report.decisions.len(),
            report.close_failures
        );
        Ok(report)
    }

    /// Turn a realized exit into an R-multiple for the action that opened it.
    /// Only called after the broker confirmed the close.
    fn route_reward(&self, decision: &ExitDecision) -> Option<RewardUpdate> {
        let Some(entry) = self.ledger.get(&decision.position_id) else {
            warn!(
                "Position {} has no attribution, no reward recorded",
                decision.position_id
            );
            return None;
        };

        if entry.initial_risk_usd <= 0.0 {
            warn!(
                "Position {} has no initial risk, no reward recorded",
                decision.position_id
            );
            self.ledger.remove(&decision.position_id);
            self.release(entry.action_id);
            return None;
        }

        let update = RewardUpdate {
            action_id: entry.action_id,
            context: entry.context,
            reward: decision.pnl / entry.initial_risk_usd,
        };
        let result = self.policy.update(&update);
        self.ledger.remove(&decision.position_id);

        match result {
            Ok(pulls) => {
                info!(
                    "Reward {:.3}R -> action {} ({} observations)",
                    update.reward, update.action_id, pulls
                );
                Some(update)
            }
            Err(e) => {
                warn!("Reward for {} dropped: {}", decision.position_id, e);
                telemetry::record_error();
                self.release(update.action_id);
                None
            }
        }
    }

    fn release(&self, action_id: u8) {
        if let Ok(action) = Action::from_id(action_id) {
            self.policy.release(action);
        }
    }
}
