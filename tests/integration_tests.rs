//! Integration tests for the decision and risk core
//!
//! Run with: cargo test --test integration_tests

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;

use bandit_trader::config::{AppConfig, PolicyConfig};
use bandit_trader::context::{build_context, ContextInputs, ContextVector, TechnicalIndicators, CONTEXT_DIM};
use bandit_trader::events::EventProcessor;
use bandit_trader::monitor::{evaluate_position, ExitRules};
use bandit_trader::policy::{Action, BanditPolicy, PolicyStore, SelectionKind};
use bandit_trader::risk::{calculate_levels, calculate_position_size, SizingRequest};
use bandit_trader::utils::types::{ExitReason, InstrumentType, OpenPosition, RewardUpdate, Side, Signal};
use bandit_trader::{CoreError, Event, EventBus, PaperBroker, SharedState, SignalInput, TradingAgent};

fn policy_config(enabled: Vec<u8>) -> PolicyConfig {
    PolicyConfig {
        enabled_actions: enabled,
        epsilon: 0.0,
        epsilon_high_volatility: 0.0,
        seed: Some(7),
        ..PolicyConfig::default()
    }
}

fn policy(enabled: Vec<u8>) -> BanditPolicy {
    let store = Arc::new(PolicyStore::new(CONTEXT_DIM, 1.0).unwrap());
    BanditPolicy::new(store, &policy_config(enabled)).unwrap()
}

/// Deterministic, varied context in roughly the range the builder produces
fn synthetic_context(i: usize) -> ContextVector {
    let values = (0..CONTEXT_DIM)
        .map(|j| ((i * 31 + j * 7) as f64 * 0.37).sin())
        .collect();
    ContextVector::from_vec(values)
}

/// Sizing and level scenarios
#[cfg(test)]
mod sizing_tests {
    use super::*;

    /// $1000 account, 1.0850 EURUSD, 2% stop: reserve binds before risk
    #[test]
    fn test_reserve_binds_at_two_percent_stop() {
        let request = SizingRequest::new(1000.0, 1.0850, 0.02, InstrumentType::Forex);
        let outcome = calculate_position_size(&request).unwrap();
        let size = outcome.sized().unwrap();

        assert!(size.position_size_usd <= 400.0);
        assert!((size.position_size_usd - 400.0).abs() < 0.01);
        assert!((size.risk_amount_usd - 8.0).abs() < 0.01);
        assert!(size.reserve_after_entry_usd >= 600.0);

        let levels = calculate_levels(1.0850, Side::Buy, 0.02, 0.04).unwrap();
        assert!((levels.stop_loss_price - 1.0633).abs() < 1e-4);
        assert!((levels.take_profit_price - 1.1284).abs() < 1e-4);
    }

    /// A tighter 1.5% stop still hits the reserve cap, so risk shrinks
    #[test]
    fn test_tighter_stop_keeps_reserve_cap() {
        let request = SizingRequest::new(1000.0, 1.0850, 0.015, InstrumentType::Forex);
        let size = calculate_position_size(&request).unwrap().sized().cloned().unwrap();

        assert!((size.position_size_usd - 400.0).abs() < 0.01);
        assert!((size.risk_amount_usd - 6.0).abs() < 0.01);
        assert!(size.capped_by_reserve);
    }

    /// A stock priced above the deployable amount cannot be bought at all
    #[test]
    fn test_unaffordable_share_is_skip() {
        let request = SizingRequest::new(1000.0, 450.0, 0.02, InstrumentType::Stocks);
        let outcome = calculate_position_size(&request).unwrap();
        assert!(outcome.is_skip());
    }

    #[test]
    fn test_sell_levels_mirror_buy() {
        let levels = calculate_levels(1.0850, Side::Sell, 0.02, 0.04).unwrap();
        assert!(levels.stop_loss_price > 1.0850);
        assert!(levels.take_profit_price < 1.0850);
        assert!(calculate_levels(1.0850, Side::Sell, 0.02, 1.0).is_err());
    }
}

/// Exit rule scenarios
#[cfg(test)]
mod monitor_tests {
    use super::*;

    fn position(opened_hours_ago: Duration, stop: f64, target: f64) -> (OpenPosition, chrono::DateTime<Utc>) {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap();
        let position = OpenPosition {
            position_id: "deal-1".to_string(),
            symbol: "EURUSD".to_string(),
            direction: Side::Buy,
            entry_price: 1.0850,
            size: 368.66,
            opened_at: now - opened_hours_ago,
            stop_loss_price: stop,
            take_profit_price: target,
        };
        (position, now)
    }

    /// Flat position held 25 hours
    #[test]
    fn test_flat_position_past_hold_limit() {
        let (position, now) = position(Duration::hours(25), 1.0633, 1.1284);
        let decision = evaluate_position(&position, 1.0850, now, &ExitRules::default()).unwrap();
        assert_eq!(decision.reason, ExitReason::MaxHoldTime);
        assert!(decision.pnl.abs() < 1e-9);
    }

    /// Small winner held 24h10m still leaves on the hold limit
    #[test]
    fn test_small_winner_past_hold_limit() {
        let (position, now) = position(Duration::hours(24) + Duration::minutes(10), 1.0633, 1.1284);
        let mark = 1.0850 * 1.005;
        let decision = evaluate_position(&position, mark, now, &ExitRules::default()).unwrap();
        assert_eq!(decision.reason, ExitReason::MaxHoldTime);
        assert!(decision.pnl > 0.0);
    }

    /// -3.5% with a stop far away triggers the emergency limit
    #[test]
    fn test_emergency_loss_limit() {
        let (position, now) = position(Duration::hours(1), 1.0, 1.2);
        let mark = 1.0850 * 0.965;
        let decision = evaluate_position(&position, mark, now, &ExitRules::default()).unwrap();
        assert_eq!(decision.reason, ExitReason::EmergencyLossLimit);
        assert!((decision.pnl_pct + 0.035).abs() < 1e-9);
    }

    /// Stop wins over every later rule
    #[test]
    fn test_stop_takes_precedence() {
        let (position, now) = position(Duration::hours(30), 1.0633, 1.1284);
        let decision = evaluate_position(&position, 1.0500, now, &ExitRules::default()).unwrap();
        assert_eq!(decision.reason, ExitReason::StopHit);
    }

    #[test]
    fn test_nothing_to_do_inside_bounds() {
        let (position, now) = position(Duration::hours(2), 1.0633, 1.1284);
        assert!(evaluate_position(&position, 1.0900, now, &ExitRules::default()).is_none());
    }
}

/// Bandit policy behaviour through the public API
#[cfg(test)]
mod policy_tests {
    use super::*;

    /// Arms that never saw a reward are tried before any scored arm
    #[test]
    fn test_zero_pull_arm_has_priority() {
        let policy = policy(vec![0, 3, 6]);
        let context = synthetic_context(1);

        for id in [0u8, 3] {
            for _ in 0..5 {
                policy
                    .update(&RewardUpdate {
                        action_id: id,
                        context: context.clone(),
                        reward: 3.0,
                    })
                    .unwrap();
            }
        }

        let selection = policy.select(&context).unwrap();
        assert_eq!(selection.action.id(), 6);
        assert_eq!(selection.kind, SelectionKind::ColdStart);
    }

    /// Long update streams keep every arm well conditioned
    #[test]
    fn test_thousand_updates_stay_finite() {
        let policy = policy((0..=9).collect());

        for i in 0..1000 {
            let reward = ((i % 7) as f64 - 3.0) * 0.5;
            policy
                .update(&RewardUpdate {
                    action_id: (i % 10) as u8,
                    context: synthetic_context(i),
                    reward,
                })
                .unwrap();
        }

        let snapshot = policy.store().snapshot();
        assert_eq!(snapshot.version(), 1000);
        for action in Action::ALL {
            let arm = snapshot.arm(action);
            assert_eq!(arm.pulls(), 100);
            assert!(arm.min_pivot() > 0.0);
            assert!(arm.theta().iter().all(|v| v.is_finite()));
            let estimate = arm.estimate(synthetic_context(5000).as_slice(), 1.0);
            assert!(estimate.score.is_finite());
            assert!(estimate.uncertainty >= 0.0);
        }

        let selection = policy.select(&synthetic_context(42)).unwrap();
        assert_eq!(selection.kind, SelectionKind::Ucb);
        assert!(selection.estimate.unwrap().score.is_finite());
    }

    /// Readers racing a writer only ever see published snapshots
    #[test]
    fn test_concurrent_select_and_update() {
        let policy = Arc::new(policy((0..=9).collect()));
        let mut handles = Vec::new();

        for t in 0..4 {
            let policy = policy.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..250 {
                    policy
                        .update(&RewardUpdate {
                            action_id: ((t + i) % 10) as u8,
                            context: synthetic_context(t * 1000 + i),
                            reward: 1.0,
                        })
                        .unwrap();
                }
            }));
        }
        for t in 0..4 {
            let policy = policy.clone();
            handles.push(std::thread::spawn(move || {
                let mut last_version = 0;
                for i in 0..250 {
                    let selection = policy.select(&synthetic_context(t * 7 + i)).unwrap();
                    assert!(selection.snapshot_version >= last_version);
                    last_version = selection.snapshot_version;
                    if let Some(estimate) = selection.estimate {
                        assert!(estimate.score.is_finite());
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = policy.store().snapshot();
        assert_eq!(snapshot.version(), 1000);
        let total: u64 = Action::ALL.iter().map(|a| snapshot.arm(*a).pulls()).sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn test_built_context_has_fixed_dimension() {
        let built = build_context(&ContextInputs::default(), Utc::now());
        assert_eq!(built.vector.len(), CONTEXT_DIM);
        assert!(built.degraded);
        assert!(built.vector.as_slice().iter().all(|v| v.is_finite()));
    }
}

/// Policy state on disk
#[cfg(test)]
mod persistence_tests {
    use super::*;

    #[tokio::test]
    async fn test_policy_round_trip_preserves_scores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");

        let store = PolicyStore::new(CONTEXT_DIM, 1.0).unwrap();
        for i in 0..50 {
            store
                .apply(Action::from_id((i % 9) as u8).unwrap(), synthetic_context(i).as_slice(), 0.5)
                .unwrap();
        }
        store.save(&path).await.unwrap();

        let loaded = PolicyStore::load_or_new(&path, CONTEXT_DIM, 1.0).await.unwrap();
        let x = synthetic_context(99);
        for action in Action::ALL {
            let before = store.snapshot().arm(action).estimate(x.as_slice(), 1.0);
            let after = loaded.snapshot().arm(action).estimate(x.as_slice(), 1.0);
            assert_eq!(store.snapshot().arm(action).pulls(), loaded.snapshot().arm(action).pulls());
            assert!((before.score - after.score).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_missing_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = PolicyStore::load_or_new(&dir.path().join("none.json"), CONTEXT_DIM, 1.0)
            .await
            .unwrap();
        assert_eq!(store.snapshot().version(), 0);
        assert!(Action::ALL.iter().all(|a| store.snapshot().arm(*a).pulls() == 0));
    }

    #[tokio::test]
    async fn test_stored_dimension_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        PolicyStore::new(CONTEXT_DIM, 1.0).unwrap().save(&path).await.unwrap();

        let result = PolicyStore::load_or_new(&path, CONTEXT_DIM - 1, 1.0).await;
        assert!(matches!(
            result,
            Err(CoreError::DimensionMismatch { expected, actual })
                if expected == CONTEXT_DIM - 1 && actual == CONTEXT_DIM
        ));
    }

    #[test]
    fn test_example_config_loads() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config.example.yaml");
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.policy.enabled_actions.len(), Action::COUNT);
        assert_eq!(config.sizing.default_instrument, InstrumentType::Forex);
        assert!(config.paper_trading);
    }
}

/// Full loop on the paper broker: signal -> intent -> fill -> exit -> reward
#[cfg(test)]
mod agent_tests {
    use super::*;

    fn config(dir: &std::path::Path) -> Arc<AppConfig> {
        let mut config = AppConfig::default_for_test();
        config.policy = policy_config(vec![0, 3]);
        config.policy.state_path = dir.join("policy.json");
        config.agent.ledger_path = dir.join("ledger.json");
        config.agent.journal_path = dir.join("journal.json");
        Arc::new(config)
    }

    fn eurusd_buy() -> SignalInput {
        SignalInput {
            signal: Signal {
                symbol: "EURUSD".to_string(),
                side: Side::Buy,
                strategy_tag: "ORB_VWAP".to_string(),
                strength: 0.9,
                timestamp: Utc::now(),
                instrument_type: Some(InstrumentType::Forex),
            },
            inputs: ContextInputs {
                indicators: TechnicalIndicators {
                    current_price: Some(1.0850),
                    sma_20: Some(1.0840),
                    sma_50: Some(1.0810),
                    rsi: Some(58.0),
                    atr: Some(0.0040),
                    vwap: Some(1.0846),
                    donchian_upper: Some(1.0900),
                    donchian_lower: Some(1.0780),
                },
                ..ContextInputs::default()
            },
        }
    }

    #[tokio::test]
    async fn test_target_exit_rewards_opening_action() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(PaperBroker::new(1000.0));
        broker.set_quote("EURUSD", 1.0850, 1.0850);

        let agent = TradingAgent::bootstrap(
            config(dir.path()),
            broker.clone(),
            Arc::new(SharedState::new()),
            Arc::new(EventBus::default()),
        )
        .await
        .unwrap();
        let mut events = EventProcessor::new(agent.events(), "test");

        assert!(agent.submit(eurusd_buy()));
        let cycle = agent.run_signal_cycle().await.unwrap();
        assert_eq!(cycle.placed, 1);
        assert_eq!(agent.ledger().len(), 1);
        assert!(broker.available() >= 600.0 - 1e-6);

        let entry = agent.ledger().entries().pop().unwrap();
        assert_eq!(entry.action_id, 0);
        assert!((entry.initial_risk_usd - 8.0).abs() < 0.01);

        // Price through the 1.1284 target
        broker.set_quote("EURUSD", 1.1300, 1.1302);
        let pass = agent.run_monitor_cycle().await.unwrap();

        assert_eq!(pass.decisions.len(), 1);
        assert_eq!(pass.decisions[0].reason, ExitReason::TargetHit);
        assert_eq!(pass.rewards.len(), 1);
        let reward = &pass.rewards[0];
        assert_eq!(reward.action_id, 0);
        // 0.045 move on ~368.66 units against $8 risk
        assert!((reward.reward - 2.07).abs() < 0.01);

        assert!(agent.ledger().is_empty());
        assert_eq!(agent.policy().store().snapshot().arm(Action::from_id(0).unwrap()).pulls(), 1);
        assert_eq!(agent.journal().len().await, 1);
        assert!(broker.available() > 1000.0);

        let mut saw_reward = false;
        while let Some(event) = events.try_next() {
            if event.kind() == "reward" {
                saw_reward = true;
            }
        }
        assert!(saw_reward);
    }

    /// An action the account cannot size is counted and the next signal moves on
    #[tokio::test]
    async fn test_unsizable_action_is_not_retried_forever() {
        let dir = tempfile::tempdir().unwrap();
        // 40% of 10k deployable cannot buy one share at 5000
        let broker = Arc::new(PaperBroker::new(10_000.0));
        broker.set_quote("SPY", 5000.0, 5000.0);

        let agent = TradingAgent::bootstrap(
            config(dir.path()),
            broker,
            Arc::new(SharedState::new()),
            Arc::new(EventBus::default()),
        )
        .await
        .unwrap();
        let mut events = EventProcessor::new(agent.events(), "test");

        let mut skipped = Vec::new();
        for _ in 0..3 {
            let mut input = eurusd_buy();
            input.signal.symbol = "SPY".to_string();
            input.signal.instrument_type = Some(InstrumentType::Stocks);
            agent.submit(input);
            let cycle = agent.run_signal_cycle().await.unwrap();
            assert_eq!(cycle.skipped, 1);
            while let Some(event) = events.try_next() {
                if let Event::SignalSkipped { action_id, .. } = event {
                    skipped.push(action_id);
                }
            }
        }

        assert_eq!(&skipped[..2], &[0, 3]);
        let snapshot = agent.policy().store().snapshot();
        let pulls: u64 = [0u8, 3].iter().map(|id| snapshot.arm(Action::from_id(*id).unwrap()).pulls()).sum();
        assert_eq!(pulls, 3);
    }

    /// A position the agent never opened still exits, without a reward
    #[tokio::test]
    async fn test_adopted_position_exits_without_reward() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(PaperBroker::new(1000.0));
        broker.set_quote("GBPUSD", 1.2700, 1.2702);
        broker.insert_position(OpenPosition {
            position_id: "manual-1".to_string(),
            symbol: "GBPUSD".to_string(),
            direction: Side::Buy,
            entry_price: 1.2700,
            size: 100.0,
            opened_at: Utc::now() - Duration::hours(25),
            stop_loss_price: 1.2446,
            take_profit_price: 1.3208,
        });

        let agent = TradingAgent::bootstrap(
            config(dir.path()),
            broker.clone(),
            Arc::new(SharedState::new()),
            Arc::new(EventBus::default()),
        )
        .await
        .unwrap();

        let pass = agent.run_monitor_cycle().await.unwrap();
        assert_eq!(pass.decisions.len(), 1);
        assert_eq!(pass.decisions[0].reason, ExitReason::MaxHoldTime);
        assert!(pass.rewards.is_empty());
        assert!(broker.position("manual-1").is_none());

        let trades = agent.journal().recent(1).await;
        assert_eq!(trades[0].action_id, None);
        assert_eq!(trades[0].reward, None);
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(PaperBroker::new(1000.0));
        broker.set_quote("EURUSD", 1.0850, 1.0850);
        let config = config(dir.path());

        let agent = TradingAgent::bootstrap(
            config.clone(),
            broker.clone(),
            Arc::new(SharedState::new()),
            Arc::new(EventBus::default()),
        )
        .await
        .unwrap();
        agent.submit(eurusd_buy());
        agent.run_signal_cycle().await.unwrap();
        agent.stop().await.unwrap();

        let restarted = TradingAgent::bootstrap(
            config,
            broker,
            Arc::new(SharedState::new()),
            Arc::new(EventBus::default()),
        )
        .await
        .unwrap();
        assert_eq!(restarted.ledger().len(), 1);
    }
}
