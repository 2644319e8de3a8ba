//! Core types used throughout Svarog.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Number of features in an [`Observation`].
pub const OBSERVATION_DIM: usize = 7;

/// Number of components in an [`Action`].
pub const ACTION_DIM: usize = 3;

/// Largest weight change a single action may request.
pub const MAX_WEIGHT_DELTA: f64 = 0.5;

/// Unique identifier for an approval record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| Error::InvalidParameter(format!("invalid record id '{s}': {e}")))
    }
}

/// Constellation used by a physical layer pipe, ordered from most to least
/// robust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Modulation {
    #[serde(rename = "QPSK")]
    Qpsk,
    #[serde(rename = "16QAM")]
    Qam16,
    #[serde(rename = "64QAM")]
    Qam64,
    #[serde(rename = "256QAM")]
    Qam256,
}

impl Modulation {
    /// All supported modulations, most robust first.
    pub const ALL: [Self; 4] = [Self::Qpsk, Self::Qam16, Self::Qam64, Self::Qam256];

    /// The most robust supported modulation.
    pub const MOST_ROBUST: Self = Self::Qpsk;

    pub fn bits_per_symbol(self) -> u32 {
        match self {
            Self::Qpsk => 2,
            Self::Qam16 => 4,
            Self::Qam64 => 6,
            Self::Qam256 => 8,
        }
    }

    /// Next more robust modulation, if any.
    pub fn safer(self) -> Option<Self> {
        match self {
            Self::Qpsk => None,
            Self::Qam16 => Some(Self::Qpsk),
            Self::Qam64 => Some(Self::Qam16),
            Self::Qam256 => Some(Self::Qam64),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Qpsk => "QPSK",
            Self::Qam16 => "16QAM",
            Self::Qam64 => "64QAM",
            Self::Qam256 => "256QAM",
        }
    }
}

impl fmt::Display for Modulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modulation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase();

        match normalized.as_str() {
            "QPSK" => Ok(Self::Qpsk),
            "16QAM" | "QAM16" => Ok(Self::Qam16),
            "64QAM" | "QAM64" => Ok(Self::Qam64),
            "256QAM" | "QAM256" => Ok(Self::Qam256),
            _ => Err(Error::InvalidParameter(format!(
                "unsupported modulation '{s}'"
            ))),
        }
    }
}

/// Forward error correction code rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CodingRate {
    #[serde(rename = "1/2")]
    R1_2,
    #[serde(rename = "2/3")]
    R2_3,
    #[serde(rename = "3/4")]
    R3_4,
    #[serde(rename = "5/6")]
    R5_6,
}

impl CodingRate {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::R1_2 => 1.0 / 2.0,
            Self::R2_3 => 2.0 / 3.0,
            Self::R3_4 => 3.0 / 4.0,
            Self::R5_6 => 5.0 / 6.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::R1_2 => "1/2",
            Self::R2_3 => "2/3",
            Self::R3_4 => "3/4",
            Self::R5_6 => "5/6",
        }
    }
}

impl fmt::Display for CodingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodingRate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1/2" => Ok(Self::R1_2),
            "2/3" => Ok(Self::R2_3),
            "3/4" => Ok(Self::R3_4),
            "5/6" => Ok(Self::R5_6),
            other => Err(Error::InvalidParameter(format!(
                "unsupported coding rate '{other}'"
            ))),
        }
    }
}

/// A modulation and coding pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModCod {
    pub modulation: Modulation,
    pub coding_rate: CodingRate,
}

impl ModCod {
    pub const fn new(modulation: Modulation, coding_rate: CodingRate) -> Self {
        Self {
            modulation,
            coding_rate,
        }
    }

    /// Information bits per second per Hz.
    pub fn spectral_efficiency(&self) -> f64 {
        f64::from(self.modulation.bits_per_symbol()) * self.coding_rate.as_f64()
    }
}

impl fmt::Display for ModCod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.modulation, self.coding_rate)
    }
}

/// Traffic slice carried in its own physical layer pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceKind {
    /// Emergency alerting; must never be starved.
    Emergency,
    /// General coverage service.
    Coverage,
}

impl SliceKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::Coverage => "coverage",
        }
    }
}

impl fmt::Display for SliceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operator intent driving a decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    MaximizeCoverage,
    EmergencyReliability,
    ReduceCongestion,
    #[default]
    Balanced,
}

impl Intent {
    /// Map free operator text onto an intent by keyword.
    pub fn from_text(text: &str) -> Self {
        let text = text.to_lowercase();
        if text.contains("emergency") || text.contains("alert") || text.contains("reliab") {
            Self::EmergencyReliability
        } else if text.contains("congestion") || text.contains("offload") || text.contains("latency") {
            Self::ReduceCongestion
        } else if text.contains("coverage") || text.contains("reach") {
            Self::MaximizeCoverage
        } else {
            Self::Balanced
        }
    }

    /// Reward weights expressing what this intent values.
    pub fn reward_weights(self) -> RewardWeights {
        match self {
            Self::MaximizeCoverage => RewardWeights {
                coverage: 0.6,
                reliability: 0.2,
                congestion: 0.1,
                efficiency: 0.1,
            },
            Self::EmergencyReliability => RewardWeights {
                coverage: 0.2,
                reliability: 0.6,
                congestion: 0.1,
                efficiency: 0.1,
            },
            Self::ReduceCongestion => RewardWeights {
                coverage: 0.2,
                reliability: 0.2,
                congestion: 0.5,
                efficiency: 0.1,
            },
            Self::Balanced => RewardWeights {
                coverage: 0.3,
                reliability: 0.3,
                congestion: 0.2,
                efficiency: 0.2,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MaximizeCoverage => "maximize_coverage",
            Self::EmergencyReliability => "emergency_reliability",
            Self::ReduceCongestion => "reduce_congestion",
            Self::Balanced => "balanced",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relative importance of each KPI in the cycle reward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardWeights {
    pub coverage: f64,
    pub reliability: f64,
    pub congestion: f64,
    pub efficiency: f64,
}

/// Policy input. Field order is the feature order of [`Observation::to_array`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Observation {
    /// Coverage percentage (0-100).
    pub coverage_pct: f64,
    /// Average SNR in dB.
    pub avg_snr_db: f64,
    /// Current emergency slice weight.
    pub emergency_weight: f64,
    /// Current coverage slice weight.
    pub coverage_weight: f64,
    /// Unicast congestion (0-1).
    pub congestion: f64,
    /// Fraction of receivers that are mobile (0-1).
    pub mobile_ratio: f64,
    /// Average receiver velocity normalized to 0-1.
    pub velocity_norm: f64,
}

impl Observation {
    pub fn to_array(&self) -> [f64; OBSERVATION_DIM] {
        [
            self.coverage_pct,
            self.avg_snr_db,
            self.emergency_weight,
            self.coverage_weight,
            self.congestion,
            self.mobile_ratio,
            self.velocity_norm,
        ]
    }

    pub fn from_array(values: [f64; OBSERVATION_DIM]) -> Self {
        Self {
            coverage_pct: values[0],
            avg_snr_db: values[1],
            emergency_weight: values[2],
            coverage_weight: values[3],
            congestion: values[4],
            mobile_ratio: values[5],
            velocity_norm: values[6],
        }
    }

    /// Build from a slice, failing unless it holds exactly seven values.
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        let array: [f64; OBSERVATION_DIM] = values.try_into().map_err(|_| {
            Error::InvalidParameter(format!(
                "observation needs {OBSERVATION_DIM} values, got {}",
                values.len()
            ))
        })?;
        Ok(Self::from_array(array))
    }
}

/// Policy output: weight deltas and an offload ratio.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Action {
    /// Change to the emergency weight, in [-0.5, 0.5].
    pub delta_emergency_weight: f64,
    /// Change to the coverage weight, in [-0.5, 0.5].
    pub delta_coverage_weight: f64,
    /// Share of unicast traffic to offload onto broadcast, in [0, 1].
    pub offload_ratio: f64,
}

impl Action {
    pub fn new(delta_emergency_weight: f64, delta_coverage_weight: f64, offload_ratio: f64) -> Self {
        Self {
            delta_emergency_weight,
            delta_coverage_weight,
            offload_ratio,
        }
        .clamped()
    }

    /// Clamp every component into its documented range. NaN becomes zero.
    pub fn clamped(self) -> Self {
        let clamp = |v: f64, lo: f64, hi: f64| if v.is_nan() { 0.0 } else { v.clamp(lo, hi) };
        Self {
            delta_emergency_weight: clamp(self.delta_emergency_weight, -MAX_WEIGHT_DELTA, MAX_WEIGHT_DELTA),
            delta_coverage_weight: clamp(self.delta_coverage_weight, -MAX_WEIGHT_DELTA, MAX_WEIGHT_DELTA),
            offload_ratio: clamp(self.offload_ratio, 0.0, 1.0),
        }
    }

    pub fn to_array(&self) -> [f64; ACTION_DIM] {
        [
            self.delta_emergency_weight,
            self.delta_coverage_weight,
            self.offload_ratio,
        ]
    }
}
