//! Policy controllers.
//!
//! A policy maps a seven-feature [`Observation`] onto an [`Action`]: changes
//! to the emergency and coverage slice weights plus an offload ratio.
//! Implementations:
//!
//! - [`GaussianMlpPolicy`]: a small feed-forward stochastic policy evaluated
//!   with `ndarray`, loaded from pre-trained JSON weights.
//! - [`HeuristicPolicy`]: deterministic rules, used when no trained weights
//!   are available.
//!
//! Besides the action, [`PolicyController::introspect`] exposes the value
//! estimate, log-probability, confidence and the per-dimension distribution
//! so downstream logic can tell a weak proposal from a dangerous one.

mod heuristic;
mod mlp;

pub use heuristic::HeuristicPolicy;
pub use mlp::{GaussianMlpPolicy, MlpWeights};

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{Action, Observation, ACTION_DIM};

/// How an action is drawn from the policy distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMode {
    /// Sample from the distribution.
    #[default]
    Stochastic,
    /// Use the distribution mean.
    Deterministic,
}

/// Which controller to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Mlp,
    Heuristic,
}

/// Policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub kind: PolicyKind,

    /// Pre-trained weights (JSON). Without it the MLP is seeded randomly.
    #[serde(default)]
    pub weights_path: Option<PathBuf>,

    #[serde(default)]
    pub mode: InferenceMode,

    /// Seed for initialization and sampling.
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,

    /// Initial log standard deviation of the action distribution.
    #[serde(default = "default_log_std")]
    pub init_log_std: f64,

    /// Confidence below which a proposal is flagged.
    #[serde(default = "default_low_confidence")]
    pub low_confidence_threshold: f64,

    /// Emergency weight below which a proposal is flagged.
    #[serde(default = "default_weight_floor")]
    pub emergency_weight_floor: f64,
}

fn default_hidden_dim() -> usize { 64 }
fn default_log_std() -> f64 { -0.5 }
fn default_low_confidence() -> f64 { 0.5 }
fn default_weight_floor() -> f64 { 0.5 }

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            kind: PolicyKind::default(),
            weights_path: None,
            mode: InferenceMode::default(),
            seed: None,
            hidden_dim: default_hidden_dim(),
            init_log_std: default_log_std(),
            low_confidence_threshold: default_low_confidence(),
            emergency_weight_floor: default_weight_floor(),
        }
    }
}

/// Conditions downstream safety logic must see.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum PolicyFlag {
    /// The action would take the emergency weight below its floor.
    EmergencyFloorBreach { projected_weight: f64, floor: f64 },
    /// The policy is unsure of its own output.
    LowConfidence { confidence: f64 },
}

/// Distribution statistics behind a proposed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyIntrospection {
    pub action: Action,
    /// State value estimate.
    pub value: f64,
    /// Log-density of the chosen pre-squash sample.
    pub log_prob: f64,
    /// Confidence (0-1), shrinking as the spread grows.
    pub confidence: f64,
    pub mean: [f64; ACTION_DIM],
    pub std: [f64; ACTION_DIM],
    pub flags: Vec<PolicyFlag>,
}

impl PolicyIntrospection {
    pub fn has_floor_breach(&self) -> bool {
        self.flags
            .iter()
            .any(|f| matches!(f, PolicyFlag::EmergencyFloorBreach { .. }))
    }

    pub fn is_low_confidence(&self) -> bool {
        self.flags
            .iter()
            .any(|f| matches!(f, PolicyFlag::LowConfidence { .. }))
    }
}

/// A controller proposing weight and offload adjustments.
pub trait PolicyController: Send + Sync {
    /// Controller name, for logs and reports.
    fn name(&self) -> &str;

    /// Action together with the statistics it was drawn from.
    fn introspect(&self, observation: &Observation, mode: InferenceMode) -> PolicyIntrospection;

    /// Propose an action.
    fn propose(&self, observation: &Observation, mode: InferenceMode) -> Action {
        self.introspect(observation, mode).action
    }
}

/// Flags for an action proposed from `observation`.
pub(crate) fn evaluate_flags(
    observation: &Observation,
    action: &Action,
    confidence: f64,
    config: &PolicyConfig,
) -> Vec<PolicyFlag> {
    let mut flags = Vec::new();
    let projected = observation.emergency_weight + action.delta_emergency_weight;
    if projected < config.emergency_weight_floor {
        flags.push(PolicyFlag::EmergencyFloorBreach {
            projected_weight: projected,
            floor: config.emergency_weight_floor,
        });
    }
    if confidence < config.low_confidence_threshold {
        flags.push(PolicyFlag::LowConfidence { confidence });
    }
    flags
}

/// Build the configured controller.
///
/// Unreadable weights fall back to the heuristic controller.
pub fn build_policy(config: &PolicyConfig) -> Arc<dyn PolicyController> {
    match config.kind {
        PolicyKind::Heuristic => Arc::new(HeuristicPolicy::new(config.clone())),
        PolicyKind::Mlp => match &config.weights_path {
            Some(path) => match MlpWeights::load(path) {
                Ok(weights) => {
                    info!("Loaded policy weights from {}", path.display());
                    Arc::new(GaussianMlpPolicy::new(weights, config.clone()))
                }
                Err(e) => {
                    warn!("Policy weights unavailable, using heuristic controller: {}", e);
                    Arc::new(HeuristicPolicy::new(config.clone()))
                }
            },
            None => {
                let seed = config.seed.unwrap_or_else(rand::random);
                Arc::new(GaussianMlpPolicy::new(
                    MlpWeights::random(config.hidden_dim, config.init_log_std, seed),
                    config.clone(),
                ))
            }
        },
    }
}
