//! Configuration module
//!
//! Handles loading and validation of the application configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::policy::Action;
use crate::utils::types::InstrumentType;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default = "default_true")]
    pub paper_trading: bool,
    #[serde(default = "default_paper_capital")]
    pub paper_capital: f64,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        info!("Configuration loaded from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.policy;
        anyhow::ensure!(p.alpha >= 0.0 && p.alpha.is_finite(), "alpha must be non-negative");
        anyhow::ensure!(p.lambda > 0.0 && p.lambda.is_finite(), "lambda must be positive");
        anyhow::ensure!(
            (0.0..=1.0).contains(&p.epsilon),
            "epsilon must be between 0 and 1"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&p.epsilon_high_volatility),
            "epsilon_high_volatility must be between 0 and 1"
        );
        for id in &p.enabled_actions {
            anyhow::ensure!(
                (*id as usize) < Action::COUNT,
                "enabled_actions contains unknown action id {}",
                id
            );
        }

        let s = &self.sizing;
        anyhow::ensure!(
            s.max_risk_pct > 0.0 && s.max_risk_pct <= 1.0,
            "max_risk_pct must be in (0, 1]"
        );
        anyhow::ensure!(
            (0.0..1.0).contains(&s.min_reserve_pct),
            "min_reserve_pct must be in [0, 1)"
        );
        anyhow::ensure!(
            s.base_stop_loss_pct > 0.0 && s.base_stop_loss_pct < 1.0,
            "base_stop_loss_pct must be in (0, 1)"
        );
        anyhow::ensure!(
            s.risk_reward_ratio > 0.0 && s.risk_reward_ratio.is_finite(),
            "risk_reward_ratio must be positive"
        );

        let m = &self.monitor;
        anyhow::ensure!(m.interval_secs > 0, "monitor interval_secs must be positive");
        anyhow::ensure!(
            m.max_hold_hours > 0.0 && m.max_hold_hours <= MAX_HOLD_HOURS_LIMIT,
            "max_hold_hours must be in (0, {}]",
            MAX_HOLD_HOURS_LIMIT
        );
        anyhow::ensure!(
            m.emergency_loss_pct > 0.0 && m.emergency_loss_pct < 1.0,
            "emergency_loss_pct must be in (0, 1)"
        );

        anyhow::ensure!(self.agent.signal_interval_secs > 0, "signal_interval_secs must be positive");
        anyhow::ensure!(self.agent.queue_capacity > 0, "queue_capacity must be positive");
        anyhow::ensure!(
            self.paper_capital > 0.0 && self.paper_capital.is_finite(),
            "paper_capital must be positive"
        );
        Ok(())
    }

    /// Create a default config for testing
    pub fn default_for_test() -> Self {
        Self {
            policy: PolicyConfig {
                seed: Some(42),
                ..PolicyConfig::default()
            },
            sizing: SizingConfig::default(),
            monitor: MonitorConfig::default(),
            agent: AgentConfig {
                signal_interval_secs: 1,
                ..AgentConfig::default()
            },
            telemetry: TelemetryConfig {
                enable_metrics: false,
                ..TelemetryConfig::default()
            },
            paper_trading: true,
            paper_capital: default_paper_capital(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            sizing: SizingConfig::default(),
            monitor: MonitorConfig::default(),
            agent: AgentConfig::default(),
            telemetry: TelemetryConfig::default(),
            paper_trading: true,
            paper_capital: default_paper_capital(),
        }
    }
}

fn default_true() -> bool { true }
fn default_paper_capital() -> f64 { 10_000.0 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Exploration bonus weight
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Ridge regularization; `A` starts at `lambda * I`
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Used instead of `epsilon` when the context is in the high-volatility regime
    #[serde(default = "default_epsilon_high_volatility")]
    pub epsilon_high_volatility: f64,
    #[serde(default = "default_enabled_actions")]
    pub enabled_actions: Vec<u8>,
    /// Fixed RNG seed for reproducible exploration
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_policy_path")]
    pub state_path: PathBuf,
}

fn default_alpha() -> f64 { 1.0 }
fn default_lambda() -> f64 { 1.0 }
fn default_epsilon() -> f64 { 0.05 }
fn default_epsilon_high_volatility() -> f64 { 0.15 }
fn default_enabled_actions() -> Vec<u8> {
    Action::ALL.iter().map(Action::id).collect()
}
fn default_policy_path() -> PathBuf { PathBuf::from("data/policy.json") }

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            lambda: default_lambda(),
            epsilon: default_epsilon(),
            epsilon_high_volatility: default_epsilon_high_volatility(),
            enabled_actions: default_enabled_actions(),
            seed: None,
            state_path: default_policy_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    #[serde(default = "default_max_risk_pct")]
    pub max_risk_pct: f64,
    #[serde(default = "default_min_reserve_pct")]
    pub min_reserve_pct: f64,
    /// Stop distance before the action's multiplier
    #[serde(default = "default_base_stop_loss_pct")]
    pub base_stop_loss_pct: f64,
    #[serde(default = "default_risk_reward_ratio")]
    pub risk_reward_ratio: f64,
    /// Used for signals that do not name an instrument type
    #[serde(default)]
    pub default_instrument: InstrumentType,
}

fn default_max_risk_pct() -> f64 { 0.02 }
fn default_min_reserve_pct() -> f64 { 0.60 }
fn default_base_stop_loss_pct() -> f64 { 0.02 }
fn default_risk_reward_ratio() -> f64 { 2.0 }

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            max_risk_pct: default_max_risk_pct(),
            min_reserve_pct: default_min_reserve_pct(),
            base_stop_loss_pct: default_base_stop_loss_pct(),
            risk_reward_ratio: default_risk_reward_ratio(),
            default_instrument: InstrumentType::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_max_hold_hours")]
    pub max_hold_hours: f64,
    #[serde(default = "default_emergency_loss_pct")]
    pub emergency_loss_pct: f64,
}

/// One year; keeps the hold limit representable as a `chrono::Duration`
const MAX_HOLD_HOURS_LIMIT: f64 = 8760.0;

fn default_monitor_interval() -> u64 { 300 }
fn default_max_hold_hours() -> f64 { 24.0 }
fn default_emergency_loss_pct() -> f64 { 0.03 }

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            max_hold_hours: default_max_hold_hours(),
            emergency_loss_pct: default_emergency_loss_pct(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_signal_interval")]
    pub signal_interval_secs: u64,
    /// Bound of the pending signal queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,
}

fn default_signal_interval() -> u64 { 60 }
fn default_queue_capacity() -> usize { 256 }
fn default_ledger_path() -> PathBuf { PathBuf::from("data/ledger.json") }
fn default_journal_path() -> PathBuf { PathBuf::from("data/journal.json") }

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            signal_interval_secs: default_signal_interval(),
            queue_capacity: default_queue_capacity(),
            ledger_path: default_ledger_path(),
            journal_path: default_journal_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    /// Daily-rolling log file in addition to stdout
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
}

fn default_log_level() -> String { "info".to_string() }
fn default_metrics_port() -> u16 { 9090 }

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            log_file: None,
            metrics_port: default_metrics_port(),
            enable_metrics: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sizing.max_risk_pct, 0.02);
        assert_eq!(config.sizing.min_reserve_pct, 0.60);
        assert_eq!(config.monitor.interval_secs, 300);
        assert_eq!(config.policy.enabled_actions.len(), Action::COUNT);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
policy:
  alpha: 0.5
  seed: 7
sizing:
  default_instrument: crypto
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.policy.alpha, 0.5);
        assert_eq!(config.policy.seed, Some(7));
        assert_eq!(config.policy.lambda, 1.0);
        assert_eq!(config.sizing.default_instrument, InstrumentType::Crypto);
        assert_eq!(config.monitor.max_hold_hours, 24.0);
        assert!(config.paper_trading);
    }

    #[test]
    fn test_rejects_unbounded_hold_time() {
        let mut config = AppConfig::default();
        config.monitor.max_hold_hours = f64::INFINITY;
        assert!(config.validate().is_err());
        config.monitor.max_hold_hours = f64::NAN;
        assert!(config.validate().is_err());
        config.monitor.max_hold_hours = 1e300;
        assert!(config.validate().is_err());
        config.monitor.max_hold_hours = 48.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_infinity_is_rejected() {
        let yaml = "monitor:\n  max_hold_hours: .inf\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.monitor.max_hold_hours.is_infinite());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.paper_capital = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_positive_lambda() {
        let mut config = AppConfig::default();
        config.policy.lambda = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_action() {
        let mut config = AppConfig::default();
        config.policy.enabled_actions = vec![0, 12];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_reserve() {
        let mut config = AppConfig::default();
        config.sizing.min_reserve_pct = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "paper_capital: 2500\nmonitor:\n  emergency_loss_pct: 0.05\n").unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.paper_capital, 2500.0);
        assert_eq!(config.monitor.emergency_loss_pct, 0.05);

        assert!(AppConfig::load(&dir.path().join("missing.yaml")).is_err());
    }
}
