//! Gaussian MLP policy.
//!
//! Two tanh hidden layers feed a mean head for the three action components
//! and a scalar value head. The standard deviation is state independent.
//! Samples are squashed with tanh into the action ranges.

use std::path::Path;

use ndarray::{Array1, Array2};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Normal as StatsNormal};

use crate::error::{Error, Result};
use crate::types::{Action, Observation, ACTION_DIM, MAX_WEIGHT_DELTA, OBSERVATION_DIM};

use super::{evaluate_flags, InferenceMode, PolicyConfig, PolicyController, PolicyIntrospection};

/// Scale applied to raw observation features.
const COVERAGE_SCALE: f64 = 100.0;
const SNR_SCALE: f64 = 30.0;

/// Network parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpWeights {
    pub w1: Array2<f64>,
    pub b1: Array1<f64>,
    pub w2: Array2<f64>,
    pub b2: Array1<f64>,
    pub w_mean: Array2<f64>,
    pub b_mean: Array1<f64>,
    pub log_std: Array1<f64>,
    pub w_value: Array1<f64>,
    pub b_value: f64,
}

impl MlpWeights {
    /// Xavier-style random initialization.
    pub fn random(hidden_dim: usize, init_log_std: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut init = |rows: usize, cols: usize| -> Array2<f64> {
            let std = (2.0 / (rows + cols) as f64).sqrt();
            match Normal::new(0.0, std) {
                Ok(normal) => Array2::from_shape_fn((rows, cols), |_| normal.sample(&mut rng)),
                Err(_) => Array2::zeros((rows, cols)),
            }
        };

        let w1 = init(hidden_dim, OBSERVATION_DIM);
        let w2 = init(hidden_dim, hidden_dim);
        // Small output layer keeps initial actions near zero.
        let w_mean = init(ACTION_DIM, hidden_dim) * 0.01;
        let w_value = init(1, hidden_dim).row(0).to_owned();

        Self {
            w1,
            b1: Array1::zeros(hidden_dim),
            w2,
            b2: Array1::zeros(hidden_dim),
            w_mean,
            b_mean: Array1::zeros(ACTION_DIM),
            log_std: Array1::from_elem(ACTION_DIM, init_log_std),
            w_value,
            b_value: 0.0,
        }
    }

    /// Load weights saved as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let weights: Self = serde_json::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("invalid policy weights: {e}")))?;
        weights.validate()?;
        Ok(weights)
    }

    /// Check that all layer shapes line up.
    pub fn validate(&self) -> Result<()> {
        let hidden = self.b1.len();
        let checks = [
            ("w1", self.w1.dim() == (hidden, OBSERVATION_DIM)),
            ("w2", self.w2.dim() == (hidden, hidden)),
            ("b2", self.b2.len() == hidden),
            ("w_mean", self.w_mean.dim() == (ACTION_DIM, hidden)),
            ("b_mean", self.b_mean.len() == ACTION_DIM),
            ("log_std", self.log_std.len() == ACTION_DIM),
            ("w_value", self.w_value.len() == hidden),
        ];
        match checks.iter().find(|(_, ok)| !ok) {
            Some((name, _)) => Err(Error::InvalidConfig(format!(
                "policy weights: {name} has the wrong shape for hidden size {hidden}"
            ))),
            None => Ok(()),
        }
    }

    pub fn hidden_dim(&self) -> usize {
        self.b1.len()
    }

    pub fn num_parameters(&self) -> usize {
        self.w1.len()
            + self.b1.len()
            + self.w2.len()
            + self.b2.len()
            + self.w_mean.len()
            + self.b_mean.len()
            + self.log_std.len()
            + self.w_value.len()
            + 1
    }
}

/// Stochastic policy backed by [`MlpWeights`].
pub struct GaussianMlpPolicy {
    weights: MlpWeights,
    config: PolicyConfig,
    rng: Mutex<StdRng>,
}

impl GaussianMlpPolicy {
    pub fn new(weights: MlpWeights, config: PolicyConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        Self {
            weights,
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn weights(&self) -> &MlpWeights {
        &self.weights
    }

    fn features(observation: &Observation) -> Array1<f64> {
        let mut x = Array1::from(observation.to_array().to_vec());
        x[0] /= COVERAGE_SCALE;
        x[1] /= SNR_SCALE;
        x
    }

    /// Raw action mean and state value.
    fn forward(&self, observation: &Observation) -> (Array1<f64>, f64) {
        let w = &self.weights;
        let x = Self::features(observation);
        let h1 = (w.w1.dot(&x) + &w.b1).mapv(f64::tanh);
        let h2 = (w.w2.dot(&h1) + &w.b2).mapv(f64::tanh);
        let mean = w.w_mean.dot(&h2) + &w.b_mean;
        let value = w.w_value.dot(&h2) + w.b_value;
        (mean, value)
    }

    /// Map unbounded samples onto the action ranges.
    fn squash(u: &[f64; ACTION_DIM]) -> Action {
        Action::new(
            MAX_WEIGHT_DELTA * u[0].tanh(),
            MAX_WEIGHT_DELTA * u[1].tanh(),
            (u[2].tanh() + 1.0) / 2.0,
        )
    }
}

impl PolicyController for GaussianMlpPolicy {
    fn name(&self) -> &str {
        "gaussian-mlp"
    }

    fn introspect(&self, observation: &Observation, mode: InferenceMode) -> PolicyIntrospection {
        let (mean_vec, value) = self.forward(observation);

        let mut mean = [0.0; ACTION_DIM];
        let mut std = [0.0; ACTION_DIM];
        for i in 0..ACTION_DIM {
            mean[i] = mean_vec[i];
            std[i] = self.weights.log_std[i].exp();
        }

        let sample = match mode {
            InferenceMode::Deterministic => mean,
            InferenceMode::Stochastic => {
                let mut rng = self.rng.lock();
                let mut u = mean;
                for (ui, s) in u.iter_mut().zip(std) {
                    if let Ok(normal) = Normal::new(*ui, s) {
                        *ui = normal.sample(&mut *rng);
                    }
                }
                u
            }
        };

        let log_prob = (0..ACTION_DIM)
            .map(|i| {
                StatsNormal::new(mean[i], std[i])
                    .map(|n| n.ln_pdf(sample[i]))
                    .unwrap_or(f64::MIN)
            })
            .sum();

        let mean_std = std.iter().sum::<f64>() / ACTION_DIM as f64;
        let confidence = 1.0 / (1.0 + mean_std);

        let action = Self::squash(&sample);
        let flags = evaluate_flags(observation, &action, confidence, &self.config);

        PolicyIntrospection {
            action,
            value,
            log_prob,
            confidence,
            mean,
            std,
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn observation() -> Observation {
        Observation {
            coverage_pct: 72.0,
            avg_snr_db: 14.0,
            emergency_weight: 1.0,
            coverage_weight: 1.0,
            congestion: 0.6,
            mobile_ratio: 0.2,
            velocity_norm: 0.3,
        }
    }

    fn policy(seed: u64) -> GaussianMlpPolicy {
        let config = PolicyConfig {
            seed: Some(seed),
            ..Default::default()
        };
        GaussianMlpPolicy::new(MlpWeights::random(64, -0.5, seed), config)
    }

    #[test]
    fn test_random_weights_are_valid() {
        let weights = MlpWeights::random(64, -0.5, 1);
        assert!(weights.validate().is_ok());
        assert_eq!(weights.hidden_dim(), 64);
        assert_eq!(weights.num_parameters(), 64 * 7 + 64 + 64 * 64 + 64 + 3 * 64 + 3 + 3 + 64 + 1);
    }

    #[test]
    fn test_actions_in_range() {
        let policy = policy(5);
        for _ in 0..200 {
            let action = policy.propose(&observation(), InferenceMode::Stochastic);
            assert!(action.delta_emergency_weight.abs() <= MAX_WEIGHT_DELTA);
            assert!(action.delta_coverage_weight.abs() <= MAX_WEIGHT_DELTA);
            assert!((0.0..=1.0).contains(&action.offload_ratio));
        }
    }

    #[test]
    fn test_deterministic_mode_repeats() {
        let policy = policy(5);
        let a = policy.introspect(&observation(), InferenceMode::Deterministic);
        let b = policy.introspect(&observation(), InferenceMode::Deterministic);
        assert_eq!(a.action, b.action);
        // At the mean every dimension contributes its density peak.
        let peak: f64 = a
            .std
            .iter()
            .map(|s| -(s * (2.0 * std::f64::consts::PI).sqrt()).ln())
            .sum();
        assert!((a.log_prob - peak).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_from_spread() {
        let policy = policy(5);
        let info = policy.introspect(&observation(), InferenceMode::Stochastic);
        let expected = 1.0 / (1.0 + (-0.5f64).exp());
        assert!((info.confidence - expected).abs() < 1e-12);
        assert!(!info.is_low_confidence());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut weights = MlpWeights::random(16, -0.5, 2);
        weights.w_value = Array1::zeros(8);
        assert!(weights.validate().is_err());
    }

    #[test]
    fn test_load_weights() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let weights = MlpWeights::random(8, -1.0, 4);
        std::fs::write(&path, serde_json::to_string(&weights).unwrap()).unwrap();

        let loaded = MlpWeights::load(&path).unwrap();
        assert_eq!(loaded.hidden_dim(), 8);
        let max_diff = (&loaded.w2 - &weights.w2).mapv(f64::abs).fold(0.0, |a: f64, b| a.max(*b));
        assert!(max_diff < 1e-12);

        std::fs::write(&path, "{}").unwrap();
        assert!(MlpWeights::load(&path).is_err());
    }
}
