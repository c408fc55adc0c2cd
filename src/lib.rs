//! Bandit Trader Library
//!
//! Decision and risk core for a signal-driven trading agent: a contextual
//! bandit picks the strategy variant, a reserve-constrained sizer and a
//! stop/target calculator turn it into an order intent, and a trade monitor
//! closes positions and feeds realized R-multiples back to the bandit.

pub mod agent;
pub mod broker;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod monitor;
pub mod policy;
pub mod position;
pub mod risk;
pub mod state;
pub mod telemetry;
pub mod utils;

// Re-export main types
pub use agent::TradingAgent;
pub use broker::{Broker, BrokerError, PaperBroker};
pub use config::AppConfig;
pub use context::{build_context, ContextInputs, ContextVector, CONTEXT_DIM};
pub use engine::{Decision, DecisionEngine, SignalInput};
pub use error::{CoreError, CoreResult};
pub use events::{Event, EventBus};
pub use monitor::{ExitRules, MarketSnapshot, TradeMonitor};
pub use policy::{Action, BanditPolicy, PolicyStore};
pub use state::SharedState;
