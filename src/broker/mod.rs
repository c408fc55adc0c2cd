//! Broker interface
//!
//! The execution layer the core consumes. Real broker clients live outside
//! this crate; `PaperBroker` fills everything in memory.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::utils::helpers::generate_id;
use crate::utils::types::{AccountBalance, OpenPosition, OrderIntent, Quote};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    #[error("no quote for {0}")]
    QuoteUnavailable(String),

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("position {0} not found")]
    PositionNotFound(String),

    #[error("broker transport error: {0}")]
    Transport(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    async fn get_quote(&self, symbol: &str) -> BrokerResult<Quote>;

    async fn get_account_balance(&self) -> BrokerResult<AccountBalance>;

    async fn get_open_positions(&self) -> BrokerResult<Vec<OpenPosition>>;

    /// Returns the broker's deal id, which becomes the position id
    async fn place_order(&self, intent: &OrderIntent) -> BrokerResult<String>;

    async fn close_position(&self, position_id: &str) -> BrokerResult<()>;
}

/// In-memory broker: fills at the intent's entry price, closes at the
/// current exit side of the quote.
pub struct PaperBroker {
    quotes: DashMap<String, Quote>,
    positions: DashMap<String, OpenPosition>,
    available: Mutex<f64>,
}

impl PaperBroker {
    pub fn new(capital: f64) -> Self {
        Self {
            quotes: DashMap::new(),
            positions: DashMap::new(),
            available: Mutex::new(capital),
        }
    }

    pub fn set_quote(&self, symbol: &str, bid: f64, ask: f64) {
        self.quotes.insert(symbol.to_string(), Quote { bid, ask });
    }

    /// Adopt a position opened elsewhere
    pub fn insert_position(&self, position: OpenPosition) {
        *self.available.lock() -= position.notional();
        self.positions.insert(position.position_id.clone(), position);
    }

    pub fn position(&self, position_id: &str) -> Option<OpenPosition> {
        self.positions.get(position_id).map(|p| p.clone())
    }

    pub fn available(&self) -> f64 {
        *self.available.lock()
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn get_quote(&self, symbol: &str) -> BrokerResult<Quote> {
        self.quotes
            .get(symbol)
            .map(|q| *q)
            .ok_or_else(|| BrokerError::QuoteUnavailable(symbol.to_string()))
    }

    async fn get_account_balance(&self) -> BrokerResult<AccountBalance> {
        Ok(AccountBalance {
            available: *self.available.lock(),
        })
    }

    async fn get_open_positions(&self) -> BrokerResult<Vec<OpenPosition>> {
        let mut positions: Vec<OpenPosition> = self.positions.iter().map(|p| p.clone()).collect();
        positions.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        Ok(positions)
    }

    async fn place_order(&self, intent: &OrderIntent) -> BrokerResult<String> {
        if intent.position_size_units <= 0.0 {
            return Err(BrokerError::OrderRejected("zero size".to_string()));
        }
        let cost = intent.position_size_units * intent.entry_price;
        {
            let mut available = self.available.lock();
            if cost > *available {
                return Err(BrokerError::OrderRejected(format!(
                    "insufficient funds: need {:.2}, have {:.2}",
                    cost, *available
                )));
            }
            *available -= cost;
        }

        let deal_id = generate_id();
        self.positions.insert(
            deal_id.clone(),
            OpenPosition {
                position_id: deal_id.clone(),
                symbol: intent.symbol.clone(),
                direction: intent.direction,
                entry_price: intent.entry_price,
                size: intent.position_size_units,
                opened_at: Utc::now(),
                stop_loss_price: intent.stop_loss_price,
                take_profit_price: intent.take_profit_price,
            },
        );
        info!(
            "[PAPER] Filled {} {} {:.4} @ {:.5} (deal {})",
            intent.direction, intent.symbol, intent.position_size_units, intent.entry_price, deal_id
        );
        Ok(deal_id)
    }

    async fn close_position(&self, position_id: &str) -> BrokerResult<()> {
        let (_, position) = self
            .positions
            .remove(position_id)
            .ok_or_else(|| BrokerError::PositionNotFound(position_id.to_string()))?;

        let exit = self
            .quotes
            .get(&position.symbol)
            .map(|q| q.exit_price(position.direction))
            .unwrap_or(position.entry_price);
        let pnl = position.unrealized_pnl(exit);
        *self.available.lock() += position.notional() + pnl;

        debug!("[PAPER] Closed {} at {:.5}, pnl {:.2}", position_id, exit, pnl);
        Ok(())
    }
}
