//! Position Sizer
//!
//! Sizes a position so a stop-out loses at most `max_risk_pct` of capital,
//! then caps it so at least `min_reserve_pct` of capital stays undeployed.
//! Units are floored to the instrument's lot increment and the reported risk
//! is recomputed from the final units.

use serde::{Deserialize, Serialize};

use crate::error::{ensure_positive, CoreError, CoreResult};
use crate::utils::types::InstrumentType;

/// Relative slack when flooring to a lot increment, absorbs `0.3 / 0.1 = 2.9999..`
const LOT_EPSILON: f64 = 1e-9;
const LOT_STEP_RELATIVE: f64 = 1e-9;

pub const WARN_CAPPED_BY_RESERVE: &str = "capped by reserve";
pub const WARN_MULTIPLIER_CLAMPED: &str = "size multiplier clamped to risk cap";
pub const WARN_BELOW_MINIMUM: &str = "below instrument minimum size - trade skipped";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SizingRequest {
    pub available_capital: f64,
    pub current_price: f64,
    pub stop_loss_pct: f64,
    pub instrument_type: InstrumentType,
    pub max_risk_pct: f64,
    pub min_reserve_pct: f64,
    pub size_multiplier: f64,
}

impl SizingRequest {
    /// Request with the default 2% risk, 60% reserve and no size scaling.
    pub fn new(available_capital: f64, current_price: f64, stop_loss_pct: f64, instrument_type: InstrumentType) -> Self {
        Self {
            available_capital,
            current_price,
            stop_loss_pct,
            instrument_type,
            max_risk_pct: 0.02,
            min_reserve_pct: 0.60,
            size_multiplier: 1.0,
        }
    }

    pub fn with_limits(mut self, max_risk_pct: f64, min_reserve_pct: f64) -> Self {
        self.max_risk_pct = max_risk_pct;
        self.min_reserve_pct = min_reserve_pct;
        self
    }

    pub fn with_size_multiplier(mut self, size_multiplier: f64) -> Self {
        self.size_multiplier = size_multiplier;
        self
    }

    fn validate(&self) -> CoreResult<()> {
        ensure_positive("available_capital", self.available_capital)?;
        ensure_positive("current_price", self.current_price)?;
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct < 1.0) {
            return Err(CoreError::validation(
                "stop_loss_pct",
                format!("must be in (0, 1), got {}", self.stop_loss_pct),
            ));
        }
        if !(self.max_risk_pct > 0.0 && self.max_risk_pct <= 1.0) {
            return Err(CoreError::validation(
                "max_risk_pct",
                format!("must be in (0, 1], got {}", self.max_risk_pct),
            ));
        }
        if !(self.min_reserve_pct >= 0.0 && self.min_reserve_pct < 1.0) {
            return Err(CoreError::validation(
                "min_reserve_pct",
                format!("must be in [0, 1), got {}", self.min_reserve_pct),
            ));
        }
        ensure_positive("size_multiplier", self.size_multiplier)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSize {
    pub position_size_usd: f64,
    pub position_size_units: f64,
    pub risk_amount_usd: f64,
    /// Risk as a fraction of capital
    pub risk_pct_of_capital: f64,
    pub max_deployable_usd: f64,
    pub reserve_after_entry_usd: f64,
    pub reserve_pct_after_entry: f64,
    pub capped_by_reserve: bool,
    pub warnings: Vec<String>,
}

/// Sizer result. `Skip` is a normal outcome, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SizingOutcome {
    Sized(PositionSize),
    Skip { reason: String, warnings: Vec<String> },
}

impl SizingOutcome {
    pub fn is_skip(&self) -> bool {
        matches!(self, SizingOutcome::Skip { .. })
    }

    pub fn sized(&self) -> Option<&PositionSize> {
        match self {
            SizingOutcome::Sized(size) => Some(size),
            SizingOutcome::Skip { .. } => None,
        }
    }
}

pub fn calculate_position_size(request: &SizingRequest) -> CoreResult<SizingOutcome> {
    request.validate()?;

    let capital = request.available_capital;
    let price = request.current_price;
    let mut warnings = Vec::new();

    let multiplier = if request.size_multiplier > 1.0 {
        warnings.push(WARN_MULTIPLIER_CLAMPED.to_string());
        1.0
    } else {
        request.size_multiplier
    };

    let risk_budget = capital * request.max_risk_pct * multiplier;
    let ideal_usd = risk_budget / request.stop_loss_pct;
    let max_deployable = capital * (1.0 - request.min_reserve_pct);

    let capped_by_reserve = ideal_usd > max_deployable;
    if capped_by_reserve {
        warnings.push(WARN_CAPPED_BY_RESERVE.to_string());
    }
    let target_usd = ideal_usd.min(max_deployable);

    let (min_units, increment) = request.instrument_type.lot_constraints();
    let mut lots = (target_usd / price / increment + LOT_EPSILON).floor();
    while lots > 0.0 && lots * increment * price > target_usd {
        // past 2^53 whole-lot steps vanish, so fall back to a relative step
        lots = (lots - 1.0).min((lots * (1.0 - LOT_STEP_RELATIVE)).floor());
    }
    let units = lots * increment;

    if units + min_units * LOT_EPSILON < min_units {
        warnings.push(WARN_BELOW_MINIMUM.to_string());
        return Ok(SizingOutcome::Skip {
            reason: format!(
                "{:.6} units below {:?} minimum of {}",
                target_usd / price,
                request.instrument_type,
                min_units
            ),
            warnings,
        });
    }

    let position_size_usd = units * price;
    let risk_amount_usd = position_size_usd * request.stop_loss_pct;
    let reserve_after_entry_usd = capital - position_size_usd;

    Ok(SizingOutcome::Sized(PositionSize {
        position_size_usd,
        position_size_units: units,
        risk_amount_usd,
        risk_pct_of_capital: risk_amount_usd / capital,
        max_deployable_usd: max_deployable,
        reserve_after_entry_usd,
        reserve_pct_after_entry: reserve_after_entry_usd / capital,
        capped_by_reserve,
        warnings,
    }))
}
