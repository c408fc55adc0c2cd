//! Trade Journal
//!
//! JSON-backed log of closed trades and the performance figures derived
//! from it: win rate, expectancy in R, streaks, exits by reason and
//! per-action results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::CoreResult;
use crate::utils::helpers::write_atomic;
use crate::utils::types::{ExitReason, Side};

/// One closed trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub position_id: String,
    pub symbol: String,
    pub direction: Side,
    /// None when the position was not opened by this core
    pub action_id: Option<u8>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    /// R-multiple, when the initial risk was known
    pub reward: Option<f64>,
    pub reason: ExitReason,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }

    pub fn hold_hours(&self) -> f64 {
        (self.closed_at - self.opened_at).num_seconds() as f64 / 3600.0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionStats {
    pub trades: u32,
    pub wins: u32,
    pub net_pnl: f64,
    /// Mean R over trades with a known reward
    pub mean_reward: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalMetrics {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub net_pnl: f64,
    /// gross_profit / gross_loss
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    /// Mean R-multiple per trade
    pub expectancy_r: f64,
    pub avg_hold_hours: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    /// Positive = wins, negative = losses
    pub current_streak: i32,
    pub longest_win_streak: u32,
    pub longest_loss_streak: u32,
    pub exits_by_reason: BTreeMap<String, u32>,
    pub by_action: BTreeMap<u8, ActionStats>,
}

pub struct TradeJournal {
    path: PathBuf,
    trades: RwLock<Vec<TradeRecord>>,
    metrics: RwLock<JournalMetrics>,
}

impl TradeJournal {
    /// Open the journal at `path`, loading existing trades if present
    pub async fn open(path: &Path) -> CoreResult<Self> {
        let trades: Vec<TradeRecord> = if tokio::fs::try_exists(path).await? {
            let content = tokio::fs::read(path).await?;
            serde_json::from_slice(&content)?
        } else {
            Vec::new()
        };

        let metrics = Self::compute_metrics(&trades);
        info!("Trade journal loaded: {} trades", trades.len());

        Ok(Self {
            path: path.to_path_buf(),
            trades: RwLock::new(trades),
            metrics: RwLock::new(metrics),
        })
    }

    pub async fn record(&self, trade: TradeRecord) -> CoreResult<()> {
        info!(
            "Trade closed: {} {} | {} | P&L: ${:.2} | R: {}",
            trade.symbol,
            trade.direction,
            trade.reason,
            trade.pnl,
            trade.reward.map_or("n/a".to_string(), |r| format!("{:.2}", r))
        );

        let content = {
            let mut trades = self.trades.write().await;
            trades.push(trade);
            *self.metrics.write().await = Self::compute_metrics(&trades);
            serde_json::to_vec_pretty(&*trades)?
        };

        write_atomic(&self.path, &content).await?;
        debug!("Trade journal saved to {:?}", self.path);
        Ok(())
    }

    pub async fn metrics(&self) -> JournalMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn recent(&self, n: usize) -> Vec<TradeRecord> {
        self.trades.read().await.iter().rev().take(n).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.trades.read().await.len()
    }

    fn compute_metrics(trades: &[TradeRecord]) -> JournalMetrics {
        if trades.is_empty() {
            return JournalMetrics::default();
        }

        let total_trades = trades.len() as u32;
        let winning_trades = trades.iter().filter(|t| t.is_winner()).count() as u32;
        let losing_trades = total_trades - winning_trades;
        let win_rate = winning_trades as f64 / total_trades as f64;

        let gross_profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
        let gross_loss: f64 = trades.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl.abs()).sum();
        let net_pnl: f64 = trades.iter().map(|t| t.pnl).sum();

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = if winning_trades > 0 { gross_profit / winning_trades as f64 } else { 0.0 };
        let avg_loss = if losing_trades > 0 { gross_loss / losing_trades as f64 } else { 0.0 };

        let rewards: Vec<f64> = trades.iter().filter_map(|t| t.reward).collect();
        let expectancy_r = if rewards.is_empty() {
            0.0
        } else {
            rewards.iter().sum::<f64>() / rewards.len() as f64
        };

        let avg_hold_hours = trades.iter().map(TradeRecord::hold_hours).sum::<f64>() / total_trades as f64;
        let best_trade = trades.iter().map(|t| t.pnl).fold(f64::NEG_INFINITY, f64::max);
        let worst_trade = trades.iter().map(|t| t.pnl).fold(f64::INFINITY, f64::min);
        let (current_streak, longest_win_streak, longest_loss_streak) = Self::streaks(trades);

        let mut exits_by_reason = BTreeMap::new();
        let mut by_action: BTreeMap<u8, ActionStats> = BTreeMap::new();
        let mut reward_counts: BTreeMap<u8, u32> = BTreeMap::new();
        for trade in trades {
            *exits_by_reason.entry(trade.reason.as_str().to_string()).or_insert(0) += 1;
            if let Some(action_id) = trade.action_id {
                let stats = by_action.entry(action_id).or_default();
                stats.trades += 1;
                stats.net_pnl += trade.pnl;
                if trade.is_winner() {
                    stats.wins += 1;
                }
                if let Some(r) = trade.reward {
                    stats.mean_reward += r;
                    *reward_counts.entry(action_id).or_insert(0) += 1;
                }
            }
        }
        for (action_id, stats) in by_action.iter_mut() {
            if let Some(n) = reward_counts.get(action_id) {
                stats.mean_reward /= *n as f64;
            }
        }

        JournalMetrics {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            gross_profit,
            gross_loss,
            net_pnl,
            profit_factor,
            avg_win,
            avg_loss,
            expectancy_r,
            avg_hold_hours,
            best_trade,
            worst_trade,
            current_streak,
            longest_win_streak,
            longest_loss_streak,
            exits_by_reason,
            by_action,
        }
    }

    fn streaks(trades: &[TradeRecord]) -> (i32, u32, u32) {
        let mut longest_win = 0;
        let mut longest_loss = 0;
        let mut current_win = 0;
        let mut current_loss = 0;

        for trade in trades {
            if trade.is_winner() {
                current_win += 1;
                current_loss = 0;
                longest_win = longest_win.max(current_win);
            } else {
                current_loss += 1;
                current_win = 0;
                longest_loss = longest_loss.max(current_loss);
            }
        }

        let current = if current_win > 0 {
            current_win as i32
        } else {
            -(current_loss as i32)
        };
        (current, longest_win, longest_loss)
    }
}
