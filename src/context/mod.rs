//! Context Builder
//!
//! Maps technical indicators, the volatility/liquidity regime and account risk
//! state into the fixed 28-feature vector the policy scores against.
//!
//! Feature layout:
//! - 0..=7   technical: SMA gaps, RSI, ATR, VWAP gap, Donchian position, RSI extreme
//! - 8..=14  volatility regime: IV rank and flags, greeks, mispricing, regime score
//! - 15..=22 session regime: time-of-day and weekday buckets, liquidity ratio
//! - 23..=27 risk: drawdown, exposure, open positions, daily loss, trades today
//!
//! Invalid or missing inputs fall back to a neutral value and mark the context
//! as degraded. The flag is informational only.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

pub const CONTEXT_DIM: usize = 28;

/// Index of the volatility regime score (High = 1, Normal = 0, Low = -1)
pub const VOL_REGIME_FEATURE: usize = 14;

/// Ordered feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextVector(Vec<f64>);

impl ContextVector {
    /// Wrap raw values. Dimension is checked by the policy, not here.
    pub fn from_vec(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_high_volatility(&self) -> bool {
        self.0.get(VOL_REGIME_FEATURE).is_some_and(|v| *v > 0.5)
    }
}

/// Raw indicator readings. `None` means the upstream calculation was unavailable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub current_price: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
    pub vwap: Option<f64>,
    pub donchian_upper: Option<f64>,
    pub donchian_lower: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityRegime {
    Low,
    #[default]
    Normal,
    High,
}

impl VolatilityRegime {
    fn score(&self) -> f64 {
        match self {
            VolatilityRegime::Low => -1.0,
            VolatilityRegime::Normal => 0.0,
            VolatilityRegime::High => 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    /// 0-100
    pub iv_rank: Option<f64>,
    #[serde(default)]
    pub high_iv: bool,
    #[serde(default)]
    pub low_iv: bool,
    #[serde(default)]
    pub vol_regime: VolatilityRegime,
    pub vega: Option<f64>,
    pub delta: Option<f64>,
    pub mispricing_proxy: Option<f64>,
    /// Current volume over its rolling average
    pub volume_ratio: Option<f64>,
}

/// Account risk state, fractions in [0, 1]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RiskState {
    pub drawdown_pct: f64,
    pub exposure_pct: f64,
    pub open_positions: u32,
    pub daily_loss_pct: f64,
    pub trades_today: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextInputs {
    pub indicators: TechnicalIndicators,
    pub regime: RegimeSnapshot,
    pub risk: RiskState,
}

/// Builder output
#[derive(Debug, Clone)]
pub struct BuiltContext {
    pub vector: ContextVector,
    /// True when any input was replaced by its neutral default
    pub degraded: bool,
    pub substituted: Vec<&'static str>,
}

/// Tracks neutral substitutions while the vector is assembled
struct Features {
    values: Vec<f64>,
    substituted: Vec<&'static str>,
}

impl Features {
    fn new() -> Self {
        Self {
            values: Vec::with_capacity(CONTEXT_DIM),
            substituted: Vec::new(),
        }
    }

    fn push(&mut self, value: f64) {
        self.values.push(value);
    }

    /// Push `value` if it is usable, otherwise `neutral` and note the feature
    fn push_checked(&mut self, name: &'static str, value: Option<f64>, neutral: f64) {
        match value {
            Some(v) if v.is_finite() => self.values.push(v),
            _ => {
                self.substituted.push(name);
                self.values.push(neutral);
            }
        }
    }

    fn note(&mut self, name: &'static str) {
        if !self.substituted.contains(&name) {
            self.substituted.push(name);
        }
    }
}

fn valid_price(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

fn in_range(value: Option<f64>, lo: f64, hi: f64) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= lo && *v <= hi)
}

fn gap(price: Option<f64>, reference: Option<f64>) -> Option<f64> {
    match (price, reference) {
        (Some(p), Some(r)) => Some((p - r) / r),
        _ => None,
    }
}

/// Build the feature vector. Same inputs and timestamp always give the same output.
pub fn build_context(inputs: &ContextInputs, timestamp: DateTime<Utc>) -> BuiltContext {
    let mut f = Features::new();
    let ind = &inputs.indicators;

    let price = valid_price(ind.current_price);
    if price.is_none() {
        f.note("current_price");
    }
    let sma_20 = valid_price(ind.sma_20);
    let sma_50 = valid_price(ind.sma_50);

    // Technical
    f.push_checked("price_sma20_gap", gap(price, sma_20), 0.0);
    f.push_checked("price_sma50_gap", gap(price, sma_50), 0.0);
    f.push_checked("sma20_sma50_gap", gap(sma_20, sma_50), 0.0);
    let rsi = in_range(ind.rsi, 0.0, 100.0);
    f.push_checked("rsi", rsi.map(|r| r / 100.0), 0.5);
    let atr_pct = match (in_range(ind.atr, 0.0, f64::MAX), price) {
        (Some(atr), Some(p)) => Some(atr / p),
        _ => None,
    };
    f.push_checked("atr_pct", atr_pct, 0.0);
    f.push_checked("price_vwap_gap", gap(price, valid_price(ind.vwap)), 0.0);
    let donchian = match (valid_price(ind.donchian_upper), valid_price(ind.donchian_lower), price) {
        (Some(upper), Some(lower), Some(p)) if upper > lower => Some((p - lower) / (upper - lower)),
        _ => None,
    };
    f.push_checked("donchian_position", donchian, 0.5);
    f.push(match rsi {
        Some(r) if !(30.0..=70.0).contains(&r) => 1.0,
        _ => 0.0,
    });

    // Volatility regime
    let regime = &inputs.regime;
    f.push_checked("iv_rank", in_range(regime.iv_rank, 0.0, 100.0).map(|r| r / 100.0), 0.5);
    f.push(if regime.high_iv { 1.0 } else { 0.0 });
    f.push(if regime.low_iv { 1.0 } else { 0.0 });
    f.push_checked("vega", regime.vega, 0.0);
    f.push_checked("delta", regime.delta.map(f64::abs), 0.0);
    f.push_checked("mispricing_proxy", regime.mispricing_proxy, 0.0);
    f.push(regime.vol_regime.score());

    // Session regime
    let bucket = TimeBucket::of(timestamp);
    f.push(flag(bucket == TimeBucket::Morning));
    f.push(flag(bucket == TimeBucket::Lunch));
    f.push(flag(bucket == TimeBucket::Afternoon));
    f.push(flag(bucket == TimeBucket::OffHours));
    let weekday = timestamp.weekday();
    f.push(flag(weekday == Weekday::Mon));
    f.push(flag(weekday == Weekday::Fri));
    f.push(flag(matches!(weekday, Weekday::Tue | Weekday::Wed | Weekday::Thu)));
    f.push_checked(
        "volume_ratio",
        in_range(regime.volume_ratio, 0.0, f64::MAX).map(|v| v.min(3.0)),
        1.0,
    );

    // Risk
    let risk = &inputs.risk;
    f.push_checked("drawdown_pct", in_range(Some(risk.drawdown_pct), 0.0, 1.0), 0.0);
    f.push_checked("exposure_pct", in_range(Some(risk.exposure_pct), 0.0, 1.0), 0.0);
    f.push(risk.open_positions as f64 / 10.0);
    f.push_checked("daily_loss_pct", in_range(Some(risk.daily_loss_pct), 0.0, 1.0), 0.0);
    f.push(risk.trades_today as f64 / 20.0);

    debug_assert_eq!(f.values.len(), CONTEXT_DIM);

    BuiltContext {
        degraded: !f.substituted.is_empty(),
        substituted: f.substituted,
        vector: ContextVector(f.values),
    }
}

fn flag(cond: bool) -> f64 {
    if cond { 1.0 } else { 0.0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeBucket {
    Morning,
    Lunch,
    Afternoon,
    OffHours,
}

impl TimeBucket {
    fn of(ts: DateTime<Utc>) -> Self {
        let minutes = ts.hour() * 60 + ts.minute();
        match minutes {
            m if m < 9 * 60 + 30 => TimeBucket::OffHours,
            m if m < 12 * 60 => TimeBucket::Morning,
            m if m < 14 * 60 => TimeBucket::Lunch,
            m if m < 16 * 60 => TimeBucket::Afternoon,
            _ => TimeBucket::OffHours,
        }
    }
}
