//! Risk module
//!
//! Position sizing, stop/target levels and account risk tracking.

pub mod account;
pub mod levels;
pub mod sizer;

pub use account::{AccountRiskTracker, RiskMetrics};
pub use levels::{calculate_levels, PriceLevels};
pub use sizer::{calculate_position_size, PositionSize, SizingOutcome, SizingRequest};
