//! Decision Engine
//!
//! Turns one signal into either a sized, levelled `OrderIntent` or a skip:
//! context -> policy selection -> sizing -> stop/target levels.
//! Stateless apart from the shared policy, so signals for different symbols
//! can be evaluated concurrently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SizingConfig;
use crate::context::{build_context, ContextInputs, ContextVector};
use crate::error::{CoreError, CoreResult};
use crate::policy::{Action, BanditPolicy, Selection};
use crate::risk::{calculate_levels, calculate_position_size, PositionSize, SizingOutcome, SizingRequest};
use crate::telemetry::metrics as telemetry;
use crate::utils::helpers::{elapsed_ms, generate_id};
use crate::utils::types::{IntentStatus, OrderIntent, Quote, RewardUpdate, Signal};

/// A signal together with the market and account state it is judged in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalInput {
    pub signal: Signal,
    pub inputs: ContextInputs,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Policy chose the SKIP action
    PolicySkip,
    /// Sizer could not produce a tradeable size
    Sizing(String),
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::PolicySkip => "policy",
            SkipReason::Sizing(_) => "sizing",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::PolicySkip => write!(f, "policy selected SKIP"),
            SkipReason::Sizing(reason) => write!(f, "sizing skip: {}", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Evaluated {
    pub intent: OrderIntent,
    /// Context the action was chosen in, kept for reward attribution
    pub context: ContextVector,
    pub selection: Selection,
    pub size: PositionSize,
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub enum Decision {
    Intent(Box<Evaluated>),
    Skipped {
        symbol: String,
        action: Action,
        reason: SkipReason,
        context: ContextVector,
    },
}

impl Decision {
    pub fn symbol(&self) -> &str {
        match self {
            Decision::Intent(evaluated) => &evaluated.intent.symbol,
            Decision::Skipped { symbol, .. } => symbol,
        }
    }

    pub fn intent(&self) -> Option<&OrderIntent> {
        match self {
            Decision::Intent(evaluated) => Some(&evaluated.intent),
            Decision::Skipped { .. } => None,
        }
    }
}

pub struct DecisionEngine {
    policy: Arc<BanditPolicy>,
    sizing: SizingConfig,
}

impl DecisionEngine {
    pub fn new(policy: Arc<BanditPolicy>, sizing: SizingConfig) -> Self {
        Self { policy, sizing }
    }

    pub fn policy(&self) -> &Arc<BanditPolicy> {
        &self.policy
    }

    pub fn evaluate(
        &self,
        input: &SignalInput,
        quote: Quote,
        available_capital: f64,
        now: DateTime<Utc>,
    ) -> CoreResult<Decision> {
        let start = Instant::now();
        let signal = &input.signal;

        let built = build_context(&input.inputs, signal.timestamp);
        if built.degraded {
            warn!(
                "Context for {} degraded, neutral values used for: {}",
                signal.symbol,
                built.substituted.join(", ")
            );
        }
        let context = built.vector;

        let selection = self.policy.select(&context)?;
        debug!(
            "{} {}: selected {} ({:?}, epsilon {:.2})",
            signal.symbol, signal.side, selection.action, selection.kind, selection.epsilon
        );

        if selection.action.is_skip() {
            // SKIP pays 0R immediately so it competes with the trading arms
            self.policy.update(&RewardUpdate {
                action_id: Action::SKIP_ID,
                context: context.clone(),
                reward: 0.0,
            })?;
            telemetry::record_signal_evaluated(elapsed_ms(start));
            telemetry::record_signal_skipped(SkipReason::PolicySkip.label());
            return Ok(Decision::Skipped {
                symbol: signal.symbol.clone(),
                action: selection.action,
                reason: SkipReason::PolicySkip,
                context,
            });
        }

        let action = selection.action;
        let degraded = built.degraded;
        self.size_selection(input, selection, context, quote, available_capital, now, start, degraded)
            .map_err(|e| {
                // no reward will ever arrive for this selection
                self.policy.release(action);
                e
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn size_selection(
        &self,
        input: &SignalInput,
        selection: Selection,
        context: ContextVector,
        quote: Quote,
        available_capital: f64,
        now: DateTime<Utc>,
        start: Instant,
        degraded: bool,
    ) -> CoreResult<Decision> {
        let signal = &input.signal;
        let params = selection.action.params();
        let stop_loss_pct = self.sizing.base_stop_loss_pct * params.stop_multiplier;
        if stop_loss_pct >= 1.0 {
            return Err(CoreError::validation(
                "stop_loss_pct",
                format!("{} for action {} is not below 1", stop_loss_pct, selection.action),
            ));
        }
        let take_profit_pct = stop_loss_pct * self.sizing.risk_reward_ratio;
        let entry_price = quote.entry_price(signal.side);
        let instrument_type = signal.instrument_type.unwrap_or(self.sizing.default_instrument);

        let request = SizingRequest::new(available_capital, entry_price, stop_loss_pct, instrument_type)
            .with_limits(self.sizing.max_risk_pct, self.sizing.min_reserve_pct)
            .with_size_multiplier(params.size_multiplier);

        let size = match calculate_position_size(&request)? {
            SizingOutcome::Sized(size) => size,
            SizingOutcome::Skip { reason, warnings } => {
                info!("{} skipped by sizer: {} ({})", signal.symbol, reason, warnings.join("; "));
                // an unsizable action earns 0R so it stops winning cold start
                self.policy.update(&RewardUpdate {
                    action_id: selection.action.id(),
                    context: context.clone(),
                    reward: 0.0,
                })?;
                let reason = SkipReason::Sizing(reason);
                telemetry::record_signal_evaluated(elapsed_ms(start));
                telemetry::record_signal_skipped(reason.label());
                return Ok(Decision::Skipped {
                    symbol: signal.symbol.clone(),
                    action: selection.action,
                    reason,
                    context,
                });
            }
        };
        for warning in &size.warnings {
            debug!("{} sizing: {}", signal.symbol, warning);
        }

        let levels = calculate_levels(entry_price, signal.side, stop_loss_pct, take_profit_pct)?;

        let intent = OrderIntent {
            intent_id: generate_id(),
            symbol: signal.symbol.clone(),
            direction: signal.side,
            position_size_usd: size.position_size_usd,
            position_size_units: size.position_size_units,
            entry_price,
            stop_loss_price: levels.stop_loss_price,
            take_profit_price: levels.take_profit_price,
            risk_amount_usd: size.risk_amount_usd,
            stop_loss_pct,
            take_profit_pct,
            action_id: selection.action.id(),
            status: IntentStatus::Pending,
            created_at: now,
        };

        info!(
            "Intent {} {} {:.4} @ {:.5} | SL {:.5} TP {:.5} | risk ${:.2} | action {}",
            intent.direction,
            intent.symbol,
            intent.position_size_units,
            intent.entry_price,
            intent.stop_loss_price,
            intent.take_profit_price,
            intent.risk_amount_usd,
            selection.action
        );
        telemetry::record_signal_evaluated(elapsed_ms(start));

        Ok(Decision::Intent(Box::new(Evaluated {
            intent,
            context,
            selection,
            size,
            degraded,
        })))
    }
}
