//! Common types used throughout the application

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::ContextVector;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for long exposure, -1 for short
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Instrument class; only affects lot-size rounding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentType {
    #[default]
    Forex,
    Crypto,
    Stocks,
    Indices,
    Metals,
}

impl InstrumentType {
    /// (minimum size, size increment) in instrument units
    pub fn lot_constraints(&self) -> (f64, f64) {
        match self {
            InstrumentType::Forex => (0.01, 0.01),
            InstrumentType::Crypto => (0.001, 0.001),
            InstrumentType::Stocks => (1.0, 1.0),
            InstrumentType::Indices => (0.1, 0.1),
            InstrumentType::Metals => (0.01, 0.01),
        }
    }
}

/// Upstream trade signal. Consumed once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: Side,
    pub strategy_tag: String,
    pub strength: f64,
    pub timestamp: DateTime<Utc>,
    /// Falls back to the configured default instrument when absent
    #[serde(default)]
    pub instrument_type: Option<InstrumentType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    /// Price at which a new position in `side` would be opened
    pub fn entry_price(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.ask,
            Side::Sell => self.bid,
        }
    }

    /// Price at which an existing position in `side` would be closed
    pub fn exit_price(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.bid,
            Side::Sell => self.ask,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub available: f64,
}

/// Order intent lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IntentStatus {
    Pending,
    Executed,
    Rejected,
}

/// Sized, levelled order ready for the execution layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub intent_id: String,
    pub symbol: String,
    pub direction: Side,
    pub position_size_usd: f64,
    pub position_size_units: f64,
    pub entry_price: f64,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub risk_amount_usd: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub action_id: u8,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
}

impl OrderIntent {
    /// Move out of PENDING. Returns false if the intent was already settled.
    pub fn settle(&mut self, executed: bool) -> bool {
        if self.status != IntentStatus::Pending {
            return false;
        }
        self.status = if executed {
            IntentStatus::Executed
        } else {
            IntentStatus::Rejected
        };
        true
    }
}

/// A live position as reported by the execution layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub position_id: String,
    pub symbol: String,
    pub direction: Side,
    pub entry_price: f64,
    pub size: f64,
    pub opened_at: DateTime<Utc>,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
}

impl OpenPosition {
    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        (mark - self.entry_price) * self.size * self.direction.sign()
    }

    pub fn notional(&self) -> f64 {
        self.entry_price * self.size
    }
}

/// Why the monitor closed a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopHit,
    TargetHit,
    MaxHoldTime,
    EmergencyLossLimit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopHit => "STOP_HIT",
            ExitReason::TargetHit => "TARGET_HIT",
            ExitReason::MaxHoldTime => "MAX_HOLD_TIME",
            ExitReason::EmergencyLossLimit => "EMERGENCY_LOSS_LIMIT",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitDecision {
    pub position_id: String,
    pub symbol: String,
    pub reason: ExitReason,
    pub exit_price: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub decided_at: DateTime<Utc>,
}

/// Realized outcome fed back to the policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardUpdate {
    pub action_id: u8,
    pub context: ContextVector,
    /// R-multiple: pnl / initial risk
    pub reward: f64,
}
