//! Rule-based fallback controller.

use crate::congestion::offload_ratio_for;
use crate::types::{Action, Observation, ACTION_DIM};

use super::{evaluate_flags, InferenceMode, PolicyConfig, PolicyController, PolicyIntrospection};

/// Coverage the heuristic steers towards (%).
const TARGET_COVERAGE_PCT: f64 = 90.0;
/// Weight change per percentage point of coverage shortfall.
const COVERAGE_GAIN: f64 = 0.02;

/// Deterministic controller: restore the emergency floor, push coverage
/// weight towards the target, offload by the congestion heuristic.
#[derive(Debug, Clone)]
pub struct HeuristicPolicy {
    config: PolicyConfig,
}

impl HeuristicPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }
}

impl PolicyController for HeuristicPolicy {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn introspect(&self, observation: &Observation, _mode: InferenceMode) -> PolicyIntrospection {
        let floor = self.config.emergency_weight_floor;
        let delta_emergency = (floor - observation.emergency_weight).max(0.0);
        let delta_coverage = (TARGET_COVERAGE_PCT - observation.coverage_pct) * COVERAGE_GAIN;
        let action = Action::new(
            delta_emergency,
            delta_coverage,
            offload_ratio_for(observation.congestion),
        );
        let flags = evaluate_flags(observation, &action, 1.0, &self.config);

        PolicyIntrospection {
            action,
            value: 0.0,
            log_prob: 0.0,
            confidence: 1.0,
            mean: action.to_array(),
            std: [0.0; ACTION_DIM],
            flags,
        }
    }
}
