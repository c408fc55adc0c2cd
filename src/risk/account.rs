//! Account Risk Tracker
//!
//! Keeps the running account figures the context builder needs:
//! - drawdown from the equity high-water mark
//! - exposure of open positions
//! - realized loss and trade count for the current UTC day

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::RiskState;
use crate::state::{AtomicF64, SharedState};
use crate::utils::types::OpenPosition;

/// Risk metrics snapshot
#[derive(Debug, Clone)]
pub struct RiskMetrics {
    pub equity: f64,
    pub peak_equity: f64,
    pub drawdown_pct: f64,
    pub exposure_usd: f64,
    pub realized_pnl_today: f64,
    pub trades_today: u32,
}

pub struct AccountRiskTracker {
    state: Arc<SharedState>,
    /// High water mark
    peak_equity: AtomicF64,
    /// Equity at the start of the current day
    day_start_equity: AtomicF64,
    daily_pnl: AtomicF64,
    trades_today: AtomicU32,
    current_day: Mutex<NaiveDate>,
}

impl AccountRiskTracker {
    pub fn new(state: Arc<SharedState>) -> Self {
        Self {
            state,
            peak_equity: AtomicF64::new(0.0),
            day_start_equity: AtomicF64::new(0.0),
            daily_pnl: AtomicF64::new(0.0),
            trades_today: AtomicU32::new(0),
            current_day: Mutex::new(Utc::now().date_naive()),
        }
    }

    /// Refresh from a broker snapshot
    pub fn observe(&self, available: f64, positions: &[OpenPosition], now: DateTime<Utc>) {
        self.check_daily_reset(now);

        let exposure: f64 = positions.iter().map(OpenPosition::notional).sum();
        self.state.available_capital.store(available);
        self.state.open_exposure_usd.store(exposure);
        self.state
            .open_positions
            .store(positions.len() as u64, Ordering::SeqCst);

        let equity = self.state.equity();
        if equity > self.peak_equity.load() {
            self.peak_equity.store(equity);
        }
        if self.day_start_equity.load() <= 0.0 {
            self.day_start_equity.store(equity);
        }
        debug!(
            "Account observed: equity={:.2} exposure={:.2} positions={}",
            equity,
            exposure,
            positions.len()
        );
    }

    /// Record a closed trade
    pub fn record_trade(&self, pnl: f64, now: DateTime<Utc>) {
        self.check_daily_reset(now);
        self.trades_today.fetch_add(1, Ordering::SeqCst);
        self.daily_pnl.add(pnl);
        self.state.realized_pnl.add(pnl);
    }

    fn check_daily_reset(&self, now: DateTime<Utc>) {
        let today = now.date_naive();
        let mut current = self.current_day.lock();
        if today > *current {
            info!("Daily reset triggered");
            *current = today;
            self.daily_pnl.store(0.0);
            self.trades_today.store(0, Ordering::SeqCst);
            self.day_start_equity.store(self.state.equity());
        }
    }

    pub fn risk_state(&self) -> RiskState {
        let metrics = self.metrics();
        let equity = metrics.equity;
        let day_start = self.day_start_equity.load();

        RiskState {
            drawdown_pct: metrics.drawdown_pct,
            exposure_pct: if equity > 0.0 { metrics.exposure_usd / equity } else { 0.0 },
            open_positions: self.state.open_positions.load(Ordering::SeqCst) as u32,
            daily_loss_pct: if day_start > 0.0 {
                (-metrics.realized_pnl_today).max(0.0) / day_start
            } else {
                0.0
            },
            trades_today: metrics.trades_today,
        }
    }

    pub fn metrics(&self) -> RiskMetrics {
        let equity = self.state.equity();
        let peak = self.peak_equity.load();
        let drawdown_pct = if peak > 0.0 && equity < peak {
            (peak - equity) / peak
        } else {
            0.0
        };

        RiskMetrics {
            equity,
            peak_equity: peak,
            drawdown_pct,
            exposure_usd: self.state.open_exposure_usd.load(),
            realized_pnl_today: self.daily_pnl.load(),
            trades_today: self.trades_today.load(Ordering::SeqCst),
        }
    }
}
