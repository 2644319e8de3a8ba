//! Values returned by the decision pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::drift::{DriftMetrics, KpiSample};
use crate::policy::PolicyIntrospection;
use crate::safety::SafeConfig;
use crate::types::{Action, Intent, Observation, RecordId};

/// Operating mode of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMode {
    /// Proposals enter the approval workflow.
    #[default]
    Active,
    /// Model drift detected; proposals are reported but never queued.
    AiFrozen,
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("ACTIVE"),
            Self::AiFrozen => f.write_str("AI_FROZEN"),
        }
    }
}

/// KPIs of one candidate action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiReport {
    pub coverage_pct: f64,
    pub static_coverage_pct: f64,
    pub mobile_coverage_pct: f64,
    /// Share of receivers able to decode the emergency pipe (0-1).
    pub alert_reliability: f64,
    pub avg_snr_db: f64,
    pub min_snr_db: f64,
    pub latency_ms: f64,
    pub packet_loss: f64,
    /// Delivered bit/s/Hz over the channel.
    pub spectral_efficiency: f64,
    pub unicast_congestion: f64,
    /// Unicast congestion after offloading.
    pub effective_congestion: f64,
    pub offload_ratio: f64,
    pub users_offloaded: u64,
    pub emergency_weight: f64,
    pub coverage_weight: f64,
    /// Intent-weighted score (0-1).
    pub reward: f64,
}

impl KpiReport {
    /// Flat key/value view for metric and web consumers.
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        BTreeMap::from([
            ("coverage", self.coverage_pct),
            ("static_coverage", self.static_coverage_pct),
            ("mobile_coverage", self.mobile_coverage_pct),
            ("alert_reliability", self.alert_reliability),
            ("avg_snr_db", self.avg_snr_db),
            ("min_snr_db", self.min_snr_db),
            ("latency_ms", self.latency_ms),
            ("packet_loss", self.packet_loss),
            ("spectral_efficiency", self.spectral_efficiency),
            ("unicast_congestion", self.unicast_congestion),
            ("effective_congestion", self.effective_congestion),
            ("offload_ratio", self.offload_ratio),
            ("users_offloaded", self.users_offloaded as f64),
            ("emergency_weight", self.emergency_weight),
            ("coverage_weight", self.coverage_weight),
            ("reward", self.reward),
        ])
    }

    /// The KPIs tracked for drift.
    pub fn drift_sample(&self) -> KpiSample {
        KpiSample {
            coverage_pct: self.coverage_pct,
            snr_db: self.avg_snr_db,
            reward: self.reward,
        }
    }
}

/// KPIs reported back by receivers in the field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservedKpis {
    pub coverage_pct: f64,
    pub snr_db: f64,
    /// Packets received in the sampling period.
    pub packets_received: u64,
    pub received_at: DateTime<Utc>,
}

impl ObservedKpis {
    /// Drift sample for these observations. The observed reward is the
    /// predicted one corrected by the coverage actually achieved.
    pub fn sample(&self, predicted: &KpiReport, intent: Intent) -> KpiSample {
        let coverage_weight = intent.reward_weights().coverage;
        KpiSample {
            coverage_pct: self.coverage_pct,
            snr_db: self.snr_db,
            reward: predicted.reward
                - coverage_weight * (predicted.coverage_pct - self.coverage_pct) / 100.0,
        }
    }
}

/// Result of one decision cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalOutcome {
    pub intent: Intent,
    pub observation: Observation,
    /// Action as proposed by the policy.
    pub action: Action,
    /// Action implied by the configuration after safety clamps.
    pub safe_action: Action,
    pub config: SafeConfig,
    /// Every clamp, fallback and policy flag, human readable.
    pub warnings: Vec<String>,
    pub policy: PolicyIntrospection,
    pub kpis: KpiReport,
    pub drift: DriftMetrics,
    pub status: ControlMode,
    /// Present only when the proposal entered the approval workflow.
    pub approval_record_id: Option<RecordId>,
}

impl ProposalOutcome {
    pub fn is_frozen(&self) -> bool {
        self.status == ControlMode::AiFrozen
    }
}
