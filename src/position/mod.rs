//! Position attribution
//!
//! Maps every open position back to the action and context that opened it,
//! and the dollar risk assumed at entry, so the monitor can turn a realized
//! P&L into an R-multiple reward for the right arm.

pub mod journal;

pub use journal::{ActionStats, JournalMetrics, TradeJournal, TradeRecord};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::context::ContextVector;
use crate::error::CoreResult;
use crate::utils::helpers::write_atomic;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub position_id: String,
    pub intent_id: String,
    pub symbol: String,
    pub action_id: u8,
    /// Context the action was selected in
    pub context: ContextVector,
    pub initial_risk_usd: f64,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct AttributionLedger {
    entries: DashMap<String, LedgerEntry>,
}

impl AttributionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: LedgerEntry) {
        debug!(
            "Ledger: {} -> action {} (risk {:.2})",
            entry.position_id, entry.action_id, entry.initial_risk_usd
        );
        self.entries.insert(entry.position_id.clone(), entry);
    }

    pub fn get(&self, position_id: &str) -> Option<LedgerEntry> {
        self.entries.get(position_id).map(|e| e.clone())
    }

    pub fn remove(&self, position_id: &str) -> Option<LedgerEntry> {
        self.entries.remove(position_id).map(|(_, e)| e)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by open time
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self.entries.iter().map(|e| e.clone()).collect();
        entries.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        entries
    }

    pub async fn save(&self, path: &Path) -> CoreResult<()> {
        let content = serde_json::to_vec_pretty(&self.entries())?;
        write_atomic(path, &content).await?;
        debug!("Ledger saved: {} entries", self.len());
        Ok(())
    }

    /// Load from `path`; a missing file is an empty ledger.
    pub async fn load(path: &Path) -> CoreResult<Self> {
        let ledger = Self::new();
        if !tokio::fs::try_exists(path).await? {
            return Ok(ledger);
        }
        let content = tokio::fs::read(path).await?;
        let entries: Vec<LedgerEntry> = serde_json::from_slice(&content)?;
        for entry in entries {
            ledger.entries.insert(entry.position_id.clone(), entry);
        }
        info!("Ledger loaded: {} open attributions", ledger.len());
        Ok(ledger)
    }
}
