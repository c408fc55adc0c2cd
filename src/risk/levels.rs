//! Stop/Target Calculator

use serde::{Deserialize, Serialize};

use crate::error::{ensure_positive, CoreError, CoreResult};
use crate::utils::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevels {
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
}

/// BUY: stop below entry, target above. SELL: mirrored.
pub fn calculate_levels(
    entry_price: f64,
    direction: Side,
    stop_loss_pct: f64,
    take_profit_pct: f64,
) -> CoreResult<PriceLevels> {
    ensure_positive("entry_price", entry_price)?;
    ensure_positive("stop_loss_pct", stop_loss_pct)?;
    ensure_positive("take_profit_pct", take_profit_pct)?;
    if stop_loss_pct >= 1.0 {
        return Err(CoreError::validation(
            "stop_loss_pct",
            format!("must be below 1, got {stop_loss_pct}"),
        ));
    }
    if direction == Side::Sell && take_profit_pct >= 1.0 {
        return Err(CoreError::validation(
            "take_profit_pct",
            format!("must be below 1 for a SELL, got {take_profit_pct}"),
        ));
    }

    let levels = match direction {
        Side::Buy => PriceLevels {
            stop_loss_price: entry_price * (1.0 - stop_loss_pct),
            take_profit_price: entry_price * (1.0 + take_profit_pct),
        },
        Side::Sell => PriceLevels {
            stop_loss_price: entry_price * (1.0 + stop_loss_pct),
            take_profit_price: entry_price * (1.0 - take_profit_pct),
        },
    };
    Ok(levels)
}
