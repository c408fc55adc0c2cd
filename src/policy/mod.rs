//! Bandit Policy
//!
//! LinUCB over the closed action set:
//! - actions never rewarded and not awaiting a reward are tried first, lowest id first
//! - otherwise the highest `theta.x + alpha*sqrt(x^T A^-1 x)` wins, ties to the lowest id
//! - an epsilon-greedy overlay (wider in high-volatility contexts) may replace
//!   the choice with a uniformly random enabled action
//! - with nothing enabled the policy answers SKIP

pub mod actions;
pub mod linalg;
pub mod store;

pub use actions::{Action, ActionParams, Strategy, Variant};
pub use store::{ArmEstimate, PolicySnapshot, PolicyStore};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::PolicyConfig;
use crate::context::ContextVector;
use crate::error::{CoreError, CoreResult};
use crate::telemetry::metrics as telemetry;
use crate::utils::types::RewardUpdate;

/// Why an action was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    /// Action had no recorded rewards
    ColdStart,
    /// Highest upper confidence bound
    Ucb,
    /// Epsilon-greedy override
    Exploration,
    /// No enabled actions
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub action: Action,
    pub kind: SelectionKind,
    /// Present when the action was scored
    pub estimate: Option<ArmEstimate>,
    /// Epsilon in force for this context
    pub epsilon: f64,
    pub snapshot_version: u64,
}

impl Selection {
    pub fn is_exploration(&self) -> bool {
        self.kind == SelectionKind::Exploration
    }
}

pub struct BanditPolicy {
    store: Arc<PolicyStore>,
    alpha: f64,
    epsilon: f64,
    epsilon_high_volatility: f64,
    enabled: Vec<Action>,
    rng: Mutex<StdRng>,
    /// Selections per action still waiting for their reward
    pending: Vec<AtomicU64>,
}

impl BanditPolicy {
    pub fn new(store: Arc<PolicyStore>, config: &PolicyConfig) -> CoreResult<Self> {
        let mut enabled = config
            .enabled_actions
            .iter()
            .map(|id| Action::from_id(*id))
            .collect::<CoreResult<Vec<_>>>()?;
        enabled.sort_by_key(Action::id);
        enabled.dedup();

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            store,
            alpha: config.alpha,
            epsilon: config.epsilon,
            epsilon_high_volatility: config.epsilon_high_volatility,
            enabled,
            rng: Mutex::new(rng),
            pending: Action::ALL.iter().map(|_| AtomicU64::new(0)).collect(),
        })
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn enabled_actions(&self) -> &[Action] {
        &self.enabled
    }

    pub fn epsilon_for(&self, context: &ContextVector) -> f64 {
        if context.is_high_volatility() {
            self.epsilon_high_volatility
        } else {
            self.epsilon
        }
    }

    /// Pick an action for `context` and count it as pending. Never touches the ridge models.
    pub fn select(&self, context: &ContextVector) -> CoreResult<Selection> {
        let x = context.as_slice();
        if x.len() != self.store.dimension() {
            return Err(CoreError::DimensionMismatch {
                expected: self.store.dimension(),
                actual: x.len(),
            });
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::validation("context", "contains non-finite values"));
        }

        let epsilon = self.epsilon_for(context);
        let snapshot = self.store.snapshot();

        if self.enabled.is_empty() {
            return Ok(Selection {
                action: Action::Skip,
                kind: SelectionKind::Fallback,
                estimate: None,
                epsilon,
                snapshot_version: snapshot.version(),
            });
        }

        let explore_pick = {
            let mut rng = self.rng.lock();
            if rng.gen::<f64>() < epsilon {
                Some(self.enabled[rng.gen_range(0..self.enabled.len())])
            } else {
                None
            }
        };
        if let Some(action) = explore_pick {
            debug!("Exploring: {} (epsilon {:.3})", action, epsilon);
            telemetry::record_selection(action, "exploration");
            self.mark_pending(action);
            return Ok(Selection {
                action,
                kind: SelectionKind::Exploration,
                estimate: None,
                epsilon,
                snapshot_version: snapshot.version(),
            });
        }

        let pending: Vec<u64> = self.pending.iter().map(|p| p.load(Ordering::Acquire)).collect();
        let selection = Self::select_from(&snapshot, &pending, &self.enabled, x, self.alpha, epsilon);
        self.mark_pending(selection.action);
        telemetry::record_selection(
            selection.action,
            if selection.kind == SelectionKind::ColdStart { "cold_start" } else { "ucb" },
        );
        Ok(selection)
    }

    /// Deterministic part of selection: cold start, then UCB.
    /// `enabled` must be non-empty and sorted by id; `pending` is indexed by action.
    fn select_from(
        snapshot: &PolicySnapshot,
        pending: &[u64],
        enabled: &[Action],
        x: &[f64],
        alpha: f64,
        epsilon: f64,
    ) -> Selection {
        let untried = enabled
            .iter()
            .find(|a| snapshot.arm(**a).pulls() == 0 && pending[a.index()] == 0);
        if let Some(action) = untried {
            return Selection {
                action: *action,
                kind: SelectionKind::ColdStart,
                estimate: None,
                epsilon,
                snapshot_version: snapshot.version(),
            };
        }

        let mut best: Option<(Action, ArmEstimate)> = None;
        for action in enabled {
            let estimate = snapshot.arm(*action).estimate(x, alpha);
            match best {
                Some((_, current)) if estimate.score <= current.score => {}
                _ => best = Some((*action, estimate)),
            }
        }
        let (action, estimate) = best.unwrap_or((Action::Skip, ArmEstimate {
            expected_reward: 0.0,
            uncertainty: 0.0,
            score: 0.0,
        }));

        Selection {
            action,
            kind: SelectionKind::Ucb,
            estimate: Some(estimate),
            epsilon,
            snapshot_version: snapshot.version(),
        }
    }

    /// Fold an observed reward into the chosen action's model.
    pub fn update(&self, update: &RewardUpdate) -> CoreResult<u64> {
        let action = Action::from_id(update.action_id)?;
        let pulls = self.store.apply(action, update.context.as_slice(), update.reward)?;
        self.release(action);
        telemetry::record_policy_update(action, update.reward);
        Ok(pulls)
    }

    /// Selections of `action` not yet answered by a reward
    pub fn pending(&self, action: Action) -> u64 {
        self.pending[action.index()].load(Ordering::Acquire)
    }

    /// Count an outstanding selection, e.g. a position reloaded from the ledger.
    pub fn mark_pending(&self, action: Action) {
        self.pending[action.index()].fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one outstanding selection that will never be rewarded.
    pub fn release(&self, action: Action) {
        let _ = self.pending[action.index()].fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}
