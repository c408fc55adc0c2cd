//! Trading Agent
//!
//! In-process scheduler wiring the core together:
//! - signal loop: drain the signal queue, evaluate concurrently, place intents
//! - monitor loop: snapshot the broker, run the trade monitor, persist state
//!
//! The two loops run on independent timers and share only the policy, the
//! attribution ledger and the account tracker.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::config::AppConfig;
use crate::context::CONTEXT_DIM;
use crate::engine::{Decision, DecisionEngine, SignalInput};
use crate::error::CoreResult;
use crate::events::{Event, EventBus};
use crate::monitor::{ExitRules, MarketSnapshot, PassReport, TradeMonitor};
use crate::policy::{Action, BanditPolicy, PolicyStore};
use crate::position::{AttributionLedger, LedgerEntry, TradeJournal};
use crate::risk::AccountRiskTracker;
use crate::state::SharedState;
use crate::telemetry::metrics as telemetry;
use crate::utils::helpers::format_usd;

/// Outcome counts for one signal cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub evaluated: usize,
    pub placed: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub errors: usize,
}

pub struct TradingAgent {
    config: Arc<AppConfig>,
    state: Arc<SharedState>,
    broker: Arc<dyn Broker>,
    engine: Arc<DecisionEngine>,
    monitor: Arc<TradeMonitor>,
    ledger: Arc<AttributionLedger>,
    journal: Arc<TradeJournal>,
    account: Arc<AccountRiskTracker>,
    events: Arc<EventBus>,
    signal_tx: mpsc::Sender<SignalInput>,
    signal_rx: Mutex<mpsc::Receiver<SignalInput>>,
    /// Signals drained by a cycle that could not reach the broker
    backlog: Mutex<Vec<SignalInput>>,
    running: Arc<RwLock<bool>>,
}

impl TradingAgent {
    /// Load persisted policy, ledger and journal and wire the components.
    pub async fn bootstrap(
        config: Arc<AppConfig>,
        broker: Arc<dyn Broker>,
        state: Arc<SharedState>,
        events: Arc<EventBus>,
    ) -> CoreResult<Self> {
        let store = Arc::new(
            PolicyStore::load_or_new(&config.policy.state_path, CONTEXT_DIM, config.policy.lambda).await?,
        );
        let policy = Arc::new(BanditPolicy::new(store, &config.policy)?);
        let ledger = Arc::new(AttributionLedger::load(&config.agent.ledger_path).await?);
        // open positions from an earlier run still owe their action a reward
        for entry in ledger.entries() {
            if let Ok(action) = Action::from_id(entry.action_id) {
                policy.mark_pending(action);
            }
        }
        let journal = Arc::new(TradeJournal::open(&config.agent.journal_path).await?);
        let account = Arc::new(AccountRiskTracker::new(state.clone()));

        let engine = Arc::new(DecisionEngine::new(policy.clone(), config.sizing.clone()));
        let monitor = Arc::new(TradeMonitor::new(
            ExitRules::from_config(&config.monitor),
            broker.clone(),
            policy,
            ledger.clone(),
            journal.clone(),
            account.clone(),
            events.clone(),
        ));

        let (signal_tx, signal_rx) = mpsc::channel(config.agent.queue_capacity);

        Ok(Self {
            config,
            state,
            broker,
            engine,
            monitor,
            ledger,
            journal,
            account,
            events,
            signal_tx,
            signal_rx: Mutex::new(signal_rx),
            backlog: Mutex::new(Vec::new()),
            running: Arc::new(RwLock::new(false)),
        })
    }

    /// Sender for upstream signal producers
    pub fn signal_sender(&self) -> mpsc::Sender<SignalInput> {
        self.signal_tx.clone()
    }

    /// Queue a signal for the next cycle. False when the queue is full.
    pub fn submit(&self, input: SignalInput) -> bool {
        match self.signal_tx.try_send(input) {
            Ok(()) => true,
            Err(e) => {
                warn!("Signal queue rejected signal: {}", e);
                false
            }
        }
    }

    pub fn policy(&self) -> &Arc<BanditPolicy> {
        self.engine.policy()
    }

    pub fn ledger(&self) -> &Arc<AttributionLedger> {
        &self.ledger
    }

    pub fn journal(&self) -> &Arc<TradeJournal> {
        &self.journal
    }

    pub fn account(&self) -> &Arc<AccountRiskTracker> {
        &self.account
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Evaluate every queued signal and place the resulting intents.
    pub async fn run_signal_cycle(&self) -> CoreResult<CycleReport> {
        let mut inputs = std::mem::take(&mut *self.backlog.lock().await);
        {
            let mut rx = self.signal_rx.lock().await;
            while let Ok(input) = rx.try_recv() {
                inputs.push(input);
            }
        }
        let mut report = CycleReport::default();
        if inputs.is_empty() {
            return Ok(report);
        }

        let now = Utc::now();
        let fetched = match self.broker.get_account_balance().await {
            Ok(balance) => self.broker.get_open_positions().await.map(|p| (balance, p)),
            Err(e) => Err(e),
        };
        let (balance, positions) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("Account unavailable, holding {} signals for the next cycle", inputs.len());
                self.backlog.lock().await.extend(inputs);
                return Err(e.into());
            }
        };
        self.account.observe(balance.available, &positions, now);
        let risk = self.account.risk_state();

        let evaluations = join_all(inputs.into_iter().map(|mut input| {
            input.inputs.risk = risk;
            async move {
                let quote = self.broker.get_quote(&input.signal.symbol).await;
                let decision = quote
                    .map_err(Into::into)
                    .and_then(|q| self.engine.evaluate(&input, q, balance.available, now));
                (input.signal.symbol, decision)
            }
        }))
        .await;

        // Placement is sequential: each fill reduces capital for the next
        let mut available = balance.available;
        let min_reserve = self.config.sizing.min_reserve_pct;

        for (symbol, decision) in evaluations {
            report.evaluated += 1;
            match decision {
                Ok(Decision::Skipped { action, reason, .. }) => {
                    report.skipped += 1;
                    self.events.publish(Event::SignalSkipped {
                        symbol,
                        action_id: action.id(),
                        reason: reason.to_string(),
                    });
                }
                Ok(Decision::Intent(evaluated)) => {
                    let mut evaluated = *evaluated;
                    let intent = &mut evaluated.intent;

                    if intent.position_size_usd > available * (1.0 - min_reserve) {
                        intent.settle(false);
                        self.release(intent.action_id);
                        report.rejected += 1;
                        telemetry::record_intent_rejected();
                        warn!("Intent {} for {} dropped: reserve used by earlier fills", intent.intent_id, symbol);
                        self.events.publish(Event::IntentRejected {
                            intent_id: intent.intent_id.clone(),
                            symbol,
                            reason: "reserve exhausted this cycle".to_string(),
                        });
                        continue;
                    }

                    match self.broker.place_order(intent).await {
                        Ok(deal_id) => {
                            intent.settle(true);
                            available -= intent.position_size_usd;
                            report.placed += 1;
                            telemetry::record_intent_placed();
                            self.ledger.record(LedgerEntry {
                                position_id: deal_id,
                                intent_id: intent.intent_id.clone(),
                                symbol: intent.symbol.clone(),
                                action_id: intent.action_id,
                                context: evaluated.context,
                                initial_risk_usd: intent.risk_amount_usd,
                                opened_at: now,
                            });
                            self.events.publish(Event::IntentCreated(intent.clone()));
                        }
                        Err(e) => {
                            intent.settle(false);
                            self.release(intent.action_id);
                            report.rejected += 1;
                            telemetry::record_intent_rejected();
                            warn!("Broker rejected intent {} for {}: {}", intent.intent_id, symbol, e);
                            self.events.publish(Event::IntentRejected {
                                intent_id: intent.intent_id.clone(),
                                symbol,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    telemetry::record_error();
                    self.state.record_error(&e.to_string());
                    error!("Signal for {} failed: {}", symbol, e);
                }
            }
        }

        self.state.mark_signal_pass(report.evaluated as u64);
        self.state.intents_placed.fetch_add(report.placed as u64, std::sync::atomic::Ordering::SeqCst);
        if report.placed > 0 {
            self.ledger.save(&self.config.agent.ledger_path).await?;
        }
        info!(
            "Signal cycle: {} evaluated, {} placed, {} skipped, {} rejected, {} errors",
            report.evaluated, report.placed, report.skipped, report.rejected, report.errors
        );
        Ok(report)
    }

    /// Snapshot the broker once, close what the exit rules say, persist.
    pub async fn run_monitor_cycle(&self) -> CoreResult<PassReport> {
        let now = Utc::now();
        let balance = self.broker.get_account_balance().await?;
        let snapshot = MarketSnapshot::fetch(self.broker.as_ref()).await?;
        self.account.observe(balance.available, &snapshot.positions, now);
        telemetry::record_account(snapshot.positions.len(), self.state.equity());

        let report = self.monitor.run_pass(&snapshot, now).await?;
        self.state.mark_monitor_pass(report.decisions.len() as u64);

        self.persist().await?;
        self.events.publish(Event::Heartbeat {
            timestamp: now.timestamp(),
            open_positions: snapshot.positions.len().saturating_sub(report.decisions.len()) as u64,
        });
        Ok(report)
    }

    /// Give back a selection that never reached the broker
    fn release(&self, action_id: u8) {
        if let Ok(action) = Action::from_id(action_id) {
            self.policy().release(action);
        }
    }

    /// Save policy and ledger
    pub async fn persist(&self) -> CoreResult<()> {
        let store = self.policy().store();
        store.save(&self.config.policy.state_path).await?;
        self.ledger.save(&self.config.agent.ledger_path).await?;
        self.events.publish(Event::PolicyPersisted {
            version: store.snapshot().version(),
        });
        Ok(())
    }

    /// Spawn the signal and monitor loops
    pub async fn start(self: &Arc<Self>) {
        *self.running.write().await = true;
        info!(
            "Trading agent starting: signals every {}s, monitor every {}s",
            self.config.agent.signal_interval_secs, self.config.monitor.interval_secs
        );

        let agent = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(agent.config.agent.signal_interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            while *agent.running.read().await {
                interval.tick().await;
                if let Err(e) = agent.run_signal_cycle().await {
                    telemetry::record_error();
                    agent.state.record_error(&e.to_string());
                    error!("Signal cycle failed: {}", e);
                }
            }
            debug!("Signal loop stopped");
        });

        let agent = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(agent.config.monitor.interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            while *agent.running.read().await {
                interval.tick().await;
                if let Err(e) = agent.run_monitor_cycle().await {
                    telemetry::record_error();
                    agent.state.record_error(&e.to_string());
                    error!("Monitor cycle failed: {}", e);
                }
            }
            debug!("Monitor loop stopped");
        });
    }

    /// Stop both loops and flush state
    pub async fn stop(&self) -> CoreResult<()> {
        *self.running.write().await = false;
        info!("Trading agent stopping");

        let summary = self.journal.metrics().await;
        if summary.total_trades > 0 {
            info!(
                "Session: {} trades, win rate {:.1}%, net {}, expectancy {:.2}R, profit factor {:.2}",
                summary.total_trades,
                summary.win_rate * 100.0,
                format_usd(summary.net_pnl),
                summary.expectancy_r,
                summary.profit_factor
            );
        }
        self.persist().await
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerError, MockBroker, PaperBroker};
    use crate::context::ContextInputs;
    use crate::utils::types::{AccountBalance, Quote, Side, Signal};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(dir: &std::path::Path) -> Arc<AppConfig> {
        let mut config = AppConfig::default_for_test();
        config.policy.state_path = dir.join("policy.json");
        config.agent.ledger_path = dir.join("ledger.json");
        config.agent.journal_path = dir.join("journal.json");
        config.policy.epsilon = 0.0;
        config.policy.epsilon_high_volatility = 0.0;
        config.policy.enabled_actions = vec![0];
        Arc::new(config)
    }

    fn signal(symbol: &str) -> SignalInput {
        SignalInput {
            signal: Signal {
                symbol: symbol.to_string(),
                side: Side::Buy,
                strategy_tag: "ORB_VWAP".to_string(),
                strength: 1.0,
                timestamp: Utc::now(),
                instrument_type: None,
            },
            inputs: ContextInputs::default(),
        }
    }

    async fn agent(dir: &std::path::Path, broker: Arc<dyn Broker>) -> TradingAgent {
        TradingAgent::bootstrap(
            config(dir),
            broker,
            Arc::new(SharedState::new()),
            Arc::new(EventBus::default()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_queue_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(PaperBroker::new(1000.0));
        let agent = agent(dir.path(), broker).await;
        assert_eq!(agent.run_signal_cycle().await.unwrap(), CycleReport::default());
    }

    #[tokio::test]
    async fn test_second_signal_cannot_breach_reserve() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(PaperBroker::new(1000.0));
        broker.set_quote("EURUSD", 1.0850, 1.0850);
        broker.set_quote("GBPUSD", 1.2700, 1.2700);
        let agent = agent(dir.path(), broker.clone()).await;

        assert!(agent.submit(signal("EURUSD")));
        assert!(agent.submit(signal("GBPUSD")));
        let report = agent.run_signal_cycle().await.unwrap();

        assert_eq!(report.evaluated, 2);
        assert_eq!(report.placed, 1);
        assert_eq!(report.rejected, 1);
        assert!(broker.available() >= 600.0 - 1e-6);
        assert_eq!(agent.ledger().len(), 1);
    }

    #[tokio::test]
    async fn test_signals_survive_account_outage() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut broker = MockBroker::new();
        let seen = calls.clone();
        broker.expect_get_account_balance().returning(move || {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(BrokerError::Transport("connection reset".to_string()))
            } else {
                Ok(AccountBalance { available: 1000.0 })
            }
        });
        broker.expect_get_open_positions().returning(|| Ok(vec![]));
        broker
            .expect_get_quote()
            .returning(|_| Ok(Quote { bid: 1.0850, ask: 1.0850 }));
        broker
            .expect_place_order()
            .times(1)
            .returning(|_| Ok("deal-1".to_string()));

        let dir = tempfile::tempdir().unwrap();
        let agent = agent(dir.path(), Arc::new(broker)).await;

        assert!(agent.submit(signal("EURUSD")));
        assert!(agent.run_signal_cycle().await.is_err());
        assert_eq!(agent.policy().pending(Action::from_id(0).unwrap()), 0);

        let report = agent.run_signal_cycle().await.unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.placed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(agent.ledger().len(), 1);
    }

    #[tokio::test]
    async fn test_reserve_rejection_releases_selection() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(PaperBroker::new(1000.0));
        broker.set_quote("EURUSD", 1.0850, 1.0850);
        broker.set_quote("GBPUSD", 1.2700, 1.2700);
        let agent = agent(dir.path(), broker).await;

        agent.submit(signal("EURUSD"));
        agent.submit(signal("GBPUSD"));
        let report = agent.run_signal_cycle().await.unwrap();
        assert_eq!(report.rejected, 1);
        // only the filled intent is still owed a reward
        assert_eq!(agent.policy().pending(Action::from_id(0).unwrap()), 1);
    }

    #[tokio::test]
    async fn test_reload_counts_open_positions_as_pending() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(PaperBroker::new(1000.0));
        broker.set_quote("EURUSD", 1.0850, 1.0850);
        {
            let agent = agent(dir.path(), broker.clone()).await;
            agent.submit(signal("EURUSD"));
            assert_eq!(agent.run_signal_cycle().await.unwrap().placed, 1);
            agent.persist().await.unwrap();
        }
        let agent = agent(dir.path(), broker).await;
        assert_eq!(agent.policy().pending(Action::from_id(0).unwrap()), 1);
    }

    #[tokio::test]
    async fn test_missing_quote_counts_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(PaperBroker::new(1000.0));
        let agent = agent(dir.path(), broker).await;

        agent.submit(signal("USDJPY"));
        let report = agent.run_signal_cycle().await.unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.placed, 0);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(PaperBroker::new(1000.0));
        let agent = Arc::new(agent(dir.path(), broker).await);

        agent.start().await;
        assert!(agent.is_running().await);
        agent.stop().await.unwrap();
        assert!(!agent.is_running().await);
        assert!(dir.path().join("policy.json").exists());
    }

    #[tokio::test]
    async fn test_monitor_cycle_persists_policy() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(PaperBroker::new(1000.0));
        let agent = agent(dir.path(), broker).await;

        agent.run_monitor_cycle().await.unwrap();
        assert!(dir.path().join("policy.json").exists());
        assert!(dir.path().join("ledger.json").exists());
    }
}
