//! Shared State Module
//!
//! Lock-free runtime counters shared between the agent loops, the risk
//! tracker and the heartbeat.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Atomic floating point wrapper using u64 bit representation
#[derive(Debug, Default)]
pub struct AtomicF64 {
    inner: AtomicU64,
}

impl AtomicF64 {
    pub fn new(val: f64) -> Self {
        Self {
            inner: AtomicU64::new(val.to_bits()),
        }
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.inner.load(Ordering::SeqCst))
    }

    pub fn store(&self, val: f64) {
        self.inner.store(val.to_bits(), Ordering::SeqCst);
    }

    /// Add `delta` and return the new value
    pub fn add(&self, delta: f64) -> f64 {
        let mut current = self.inner.load(Ordering::SeqCst);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .inner
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return f64::from_bits(next),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Central shared state store
pub struct SharedState {
    // Account
    pub available_capital: AtomicF64,
    pub open_exposure_usd: AtomicF64,
    pub open_positions: AtomicU64,
    pub realized_pnl: AtomicF64,

    // Activity
    pub signals_evaluated: AtomicU64,
    pub intents_placed: AtomicU64,
    pub exits: AtomicU64,
    pub error_count: AtomicU64,
    pub last_signal_pass: AtomicI64,
    pub last_monitor_pass: AtomicI64,
    pub last_error: RwLock<Option<String>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            available_capital: AtomicF64::new(0.0),
            open_exposure_usd: AtomicF64::new(0.0),
            open_positions: AtomicU64::new(0),
            realized_pnl: AtomicF64::new(0.0),
            signals_evaluated: AtomicU64::new(0),
            intents_placed: AtomicU64::new(0),
            exits: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            last_signal_pass: AtomicI64::new(0),
            last_monitor_pass: AtomicI64::new(0),
            last_error: RwLock::new(None),
        }
    }

    pub fn record_error(&self, error: &str) {
        self.error_count.fetch_add(1, Ordering::SeqCst);
        *self.last_error.write() = Some(error.to_string());
    }

    pub fn mark_signal_pass(&self, evaluated: u64) {
        self.signals_evaluated.fetch_add(evaluated, Ordering::SeqCst);
        self.last_signal_pass
            .store(chrono::Utc::now().timestamp(), Ordering::SeqCst);
    }

    pub fn mark_monitor_pass(&self, exits: u64) {
        self.exits.fetch_add(exits, Ordering::SeqCst);
        self.last_monitor_pass
            .store(chrono::Utc::now().timestamp(), Ordering::SeqCst);
    }

    pub fn equity(&self) -> f64 {
        self.available_capital.load() + self.open_exposure_usd.load()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
