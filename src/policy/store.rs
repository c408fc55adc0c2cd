//! Policy state store
//!
//! Readers take an immutable snapshot through `ArcSwap`; the single writer
//! holds a mutex, rebuilds only the touched arm, and publishes a new snapshot
//! atomically. A reader therefore never observes an `A` from one update paired
//! with a `b` from another.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, ArrayView1};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::actions::Action;
use super::linalg::{add_outer_product, scaled_identity, Cholesky};
use crate::error::{CoreError, CoreResult};
use crate::utils::helpers::write_atomic;

/// Ridge model for one action, with its factorization cached at publish time
#[derive(Debug, Clone)]
pub struct ArmModel {
    a: Array2<f64>,
    b: Array1<f64>,
    pulls: u64,
    chol: Cholesky,
    theta: Array1<f64>,
}

/// Point estimate and exploration bonus for one action
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmEstimate {
    pub expected_reward: f64,
    pub uncertainty: f64,
    pub score: f64,
}

impl ArmModel {
    fn fresh(dimension: usize, lambda: f64) -> Self {
        Self::from_parts(scaled_identity(dimension, lambda), Array1::zeros(dimension), 0)
    }

    fn from_parts(a: Array2<f64>, b: Array1<f64>, pulls: u64) -> Self {
        let chol = Cholesky::factor(&a);
        let theta = chol.solve(b.view());
        Self { a, b, pulls, chol, theta }
    }

    pub fn pulls(&self) -> u64 {
        self.pulls
    }

    pub fn theta(&self) -> &Array1<f64> {
        &self.theta
    }

    pub fn min_pivot(&self) -> f64 {
        self.chol.min_pivot()
    }

    /// `theta.x + alpha * sqrt(x^T A^-1 x)`
    pub fn estimate(&self, x: &[f64], alpha: f64) -> ArmEstimate {
        let x = ArrayView1::from(x);
        let expected_reward = self.theta.dot(&x);
        let uncertainty = self.chol.inverse_quadratic_form(x).max(0.0).sqrt();
        ArmEstimate {
            expected_reward,
            uncertainty,
            score: expected_reward + alpha * uncertainty,
        }
    }

    fn updated(&self, x: &[f64], reward: f64) -> Self {
        let x = ArrayView1::from(x);
        let mut a = self.a.clone();
        add_outer_product(&mut a, x);
        let b = &self.b + &(&x * reward);
        Self::from_parts(a, b, self.pulls + 1)
    }

    fn to_record(&self, action_id: u8) -> ArmRecord {
        ArmRecord {
            action_id,
            a: self.a.rows().into_iter().map(|row| row.to_vec()).collect(),
            b: self.b.to_vec(),
            pulls: self.pulls,
        }
    }
}

/// Immutable view of every action's model
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    dimension: usize,
    version: u64,
    arms: Vec<Arc<ArmModel>>,
}

impl PolicySnapshot {
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Incremented on every published update
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn arm(&self, action: Action) -> &ArmModel {
        &self.arms[action.index()]
    }
}

/// Persisted per-action state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmRecord {
    pub action_id: u8,
    pub a: Vec<Vec<f64>>,
    pub b: Vec<f64>,
    pub pulls: u64,
}

/// Persisted policy file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyFile {
    pub dimension: usize,
    pub lambda: f64,
    pub updated_at: DateTime<Utc>,
    pub arms: Vec<ArmRecord>,
}

pub struct PolicyStore {
    dimension: usize,
    lambda: f64,
    current: ArcSwap<PolicySnapshot>,
    writer: Mutex<()>,
}

impl PolicyStore {
    /// Fresh store: every action starts at `A = lambda*I`, `b = 0`.
    pub fn new(dimension: usize, lambda: f64) -> CoreResult<Self> {
        if dimension == 0 {
            return Err(CoreError::validation("dimension", "must be at least 1"));
        }
        crate::error::ensure_positive("lambda", lambda)?;

        let arms = Action::ALL
            .iter()
            .map(|_| Arc::new(ArmModel::fresh(dimension, lambda)))
            .collect();

        Ok(Self::with_snapshot(
            dimension,
            lambda,
            PolicySnapshot { dimension, version: 0, arms },
        ))
    }

    fn with_snapshot(dimension: usize, lambda: f64, snapshot: PolicySnapshot) -> Self {
        Self {
            dimension,
            lambda,
            current: ArcSwap::from_pointee(snapshot),
            writer: Mutex::new(()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.current.load_full()
    }

    /// Apply `A += x*x^T`, `b += r*x` to one action and publish.
    /// Returns the action's new pull count.
    pub fn apply(&self, action: Action, context: &[f64], reward: f64) -> CoreResult<u64> {
        if context.len() != self.dimension {
            return Err(CoreError::DimensionMismatch {
                expected: self.dimension,
                actual: context.len(),
            });
        }
        if !reward.is_finite() {
            return Err(CoreError::validation("reward", format!("must be finite, got {reward}")));
        }
        if context.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::validation("context", "contains non-finite values"));
        }

        let _guard = self.writer.lock();
        let current = self.current.load_full();
        let arm = Arc::new(current.arm(action).updated(context, reward));
        let pulls = arm.pulls;

        let mut arms = current.arms.clone();
        arms[action.index()] = arm;
        self.current.store(Arc::new(PolicySnapshot {
            dimension: self.dimension,
            version: current.version + 1,
            arms,
        }));

        debug!("Policy update: action={} reward={:.4} pulls={}", action, reward, pulls);
        Ok(pulls)
    }

    pub fn to_file(&self) -> PolicyFile {
        let snapshot = self.snapshot();
        PolicyFile {
            dimension: self.dimension,
            lambda: self.lambda,
            updated_at: Utc::now(),
            arms: Action::ALL
                .iter()
                .map(|action| snapshot.arm(*action).to_record(action.id()))
                .collect(),
        }
    }

    /// Rebuild a store from its persisted form. A stored dimension different
    /// from `dimension` is a configuration error.
    pub fn from_file(file: PolicyFile, dimension: usize) -> CoreResult<Self> {
        if file.dimension != dimension {
            return Err(CoreError::DimensionMismatch {
                expected: dimension,
                actual: file.dimension,
            });
        }
        let fresh = Self::new(dimension, file.lambda)?;
        let mut arms = fresh.snapshot().arms.clone();

        for record in file.arms {
            let action = Action::from_id(record.action_id)?;
            let rows_ok = record.a.len() == dimension && record.a.iter().all(|r| r.len() == dimension);
            if !rows_ok || record.b.len() != dimension {
                return Err(CoreError::DimensionMismatch {
                    expected: dimension,
                    actual: record.b.len(),
                });
            }
            let flat: Vec<f64> = record.a.into_iter().flatten().collect();
            if flat.iter().chain(&record.b).any(|v| !v.is_finite()) {
                return Err(CoreError::Persistence(format!(
                    "non-finite values stored for action {}",
                    record.action_id
                )));
            }
            let a = Array2::from_shape_vec((dimension, dimension), flat)
                .map_err(|e| CoreError::Persistence(format!("action {}: {}", record.action_id, e)))?;
            let b = Array1::from(record.b);
            arms[action.index()] = Arc::new(ArmModel::from_parts(a, b, record.pulls));
        }

        Ok(Self::with_snapshot(
            dimension,
            file.lambda,
            PolicySnapshot { dimension, version: 0, arms },
        ))
    }

    pub async fn save(&self, path: &Path) -> CoreResult<()> {
        let content = serde_json::to_vec_pretty(&self.to_file())?;
        write_atomic(path, &content).await?;
        debug!("Policy state saved to {:?}", path);
        Ok(())
    }

    /// Load from `path`, or start fresh when the file does not exist yet.
    pub async fn load_or_new(path: &Path, dimension: usize, lambda: f64) -> CoreResult<Self> {
        if !tokio::fs::try_exists(path).await? {
            info!("No policy state at {:?}, starting fresh", path);
            return Self::new(dimension, lambda);
        }
        let content = tokio::fs::read(path).await?;
        let file: PolicyFile = serde_json::from_slice(&content)?;
        let store = Self::from_file(file, dimension)?;
        let total: u64 = Action::ALL.iter().map(|a| store.snapshot().arm(*a).pulls).sum();
        info!("Policy state loaded from {:?}: {} recorded rewards", path, total);
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::actions::{Strategy, Variant};

    const ORB: Action = Action::Trade(Strategy::OrbVwap, Variant::Base);

    #[test]
    fn test_fresh_arm_estimate() {
        let store = PolicyStore::new(3, 1.0).unwrap();
        let snap = store.snapshot();
        let est = snap.arm(ORB).estimate(&[1.0, 0.0, 0.0], 2.0);
        assert_eq!(est.expected_reward, 0.0);
        assert!((est.uncertainty - 1.0).abs() < 1e-12);
        assert!((est.score - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_apply_moves_estimate_toward_reward() {
        let store = PolicyStore::new(2, 1.0).unwrap();
        for _ in 0..50 {
            store.apply(ORB, &[1.0, 0.0], 2.0).unwrap();
        }
        let snap = store.snapshot();
        let arm = snap.arm(ORB);
        assert_eq!(arm.pulls(), 50);
        // ridge estimate: 50*2 / (1 + 50)
        assert!((arm.theta()[0] - 100.0 / 51.0).abs() < 1e-9);
        assert_eq!(snap.version(), 50);
        assert_eq!(snap.arm(Action::Skip).pulls(), 0);
    }

    #[test]
    fn test_apply_rejects_dimension_mismatch() {
        let store = PolicyStore::new(3, 1.0).unwrap();
        let err = store.apply(ORB, &[1.0, 2.0], 1.0).unwrap_err();
        assert!(matches!(err, CoreError::DimensionMismatch { expected: 3, actual: 2 }));
        assert_eq!(store.snapshot().version(), 0);
    }

    #[test]
    fn test_apply_rejects_non_finite_reward() {
        let store = PolicyStore::new(2, 1.0).unwrap();
        assert!(store.apply(ORB, &[1.0, 2.0], f64::NAN).is_err());
    }

    #[test]
    fn test_lambda_must_be_positive() {
        assert!(PolicyStore::new(3, 0.0).is_err());
        assert!(PolicyStore::new(0, 1.0).is_err());
    }

    #[test]
    fn test_old_snapshot_is_unchanged_by_update() {
        let store = PolicyStore::new(2, 1.0).unwrap();
        let before = store.snapshot();
        store.apply(ORB, &[1.0, 1.0], 1.0).unwrap();
        assert_eq!(before.arm(ORB).pulls(), 0);
        assert_eq!(store.snapshot().arm(ORB).pulls(), 1);
    }

    #[test]
    fn test_file_round_trip_keeps_state() {
        let store = PolicyStore::new(2, 0.5).unwrap();
        store.apply(ORB, &[1.0, -1.0], 3.0).unwrap();
        let restored = PolicyStore::from_file(store.to_file(), 2).unwrap();

        let a = store.snapshot();
        let b = restored.snapshot();
        assert_eq!(b.arm(ORB).pulls(), 1);
        assert_eq!(a.arm(ORB).theta(), b.arm(ORB).theta());
        assert_eq!(restored.lambda(), 0.5);
    }

    #[test]
    fn test_file_dimension_mismatch_is_fatal() {
        let store = PolicyStore::new(2, 1.0).unwrap();
        let err = PolicyStore::from_file(store.to_file(), 28).err().unwrap();
        assert!(matches!(err, CoreError::DimensionMismatch { expected: 28, actual: 2 }));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");

        let store = PolicyStore::new(3, 1.0).unwrap();
        store.apply(ORB, &[0.5, 0.5, 0.0], -1.0).unwrap();
        store.save(&path).await.unwrap();

        let loaded = PolicyStore::load_or_new(&path, 3, 1.0).await.unwrap();
        assert_eq!(loaded.snapshot().arm(ORB).pulls(), 1);

        let missing = PolicyStore::load_or_new(&dir.path().join("none.json"), 3, 1.0).await.unwrap();
        assert_eq!(missing.snapshot().arm(ORB).pulls(), 0);
    }
}
