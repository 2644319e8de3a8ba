//! Physical and traffic context of the simulated broadcast network.
//!
//! The environment is only ever changed by applying a named [`Hurdle`] or by
//! resetting it. Both produce a fresh [`EnvironmentState`] that replaces the
//! previous one wholesale; readers always work on a cloned snapshot.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment defaults restored by a reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Receiver noise floor over the channel (dBm).
    #[serde(default = "default_noise_floor")]
    pub noise_floor_dbm: f64,

    /// Path-loss exponent of the service area.
    #[serde(default = "default_path_loss_exponent")]
    pub path_loss_exponent: f64,

    /// Available channel bandwidth (MHz).
    #[serde(default = "default_bandwidth")]
    pub bandwidth_mhz: f64,

    /// Additional channel impairment (dB).
    #[serde(default)]
    pub channel_impairment_db: f64,

    /// Traffic load level (1.0 = nominal).
    #[serde(default = "default_traffic_load")]
    pub traffic_load: f64,
}

fn default_noise_floor() -> f64 {
    -100.0
}
fn default_path_loss_exponent() -> f64 {
    3.5
}
fn default_bandwidth() -> f64 {
    6.0
}
fn default_traffic_load() -> f64 {
    1.0
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            noise_floor_dbm: default_noise_floor(),
            path_loss_exponent: default_path_loss_exponent(),
            bandwidth_mhz: default_bandwidth(),
            channel_impairment_db: 0.0,
            traffic_load: default_traffic_load(),
        }
    }
}

/// Point-in-time view of the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub noise_floor_dbm: f64,
    pub path_loss_exponent: f64,
    pub bandwidth_mhz: f64,
    pub channel_impairment_db: f64,
    pub traffic_load: f64,
    pub emergency: bool,
    /// Name of the most recently applied hurdle.
    pub active_hurdle: Option<Hurdle>,
}

impl EnvironmentState {
    pub fn from_config(config: &EnvironmentConfig) -> Self {
        Self {
            noise_floor_dbm: config.noise_floor_dbm,
            path_loss_exponent: config.path_loss_exponent,
            bandwidth_mhz: config.bandwidth_mhz,
            channel_impairment_db: config.channel_impairment_db,
            traffic_load: config.traffic_load,
            emergency: false,
            active_hurdle: None,
        }
    }

    /// Apply a hurdle, returning the new state and a description of the change.
    pub fn with_hurdle(&self, hurdle: Hurdle) -> (Self, String) {
        let mut next = self.clone();
        next.active_hurdle = Some(hurdle);

        let description = match hurdle {
            Hurdle::CoverageDrop => {
                next.channel_impairment_db = COVERAGE_DROP_IMPAIRMENT_DB;
                format!(
                    "channel impairment raised from {:.1} dB to {:.1} dB",
                    self.channel_impairment_db, next.channel_impairment_db
                )
            }
            Hurdle::Interference => {
                next.noise_floor_dbm = INTERFERENCE_NOISE_FLOOR_DBM;
                format!(
                    "noise floor raised from {:.1} dBm to {:.1} dBm",
                    self.noise_floor_dbm, next.noise_floor_dbm
                )
            }
            Hurdle::SpectrumReduction => {
                next.bandwidth_mhz = REDUCED_BANDWIDTH_MHZ;
                format!(
                    "available bandwidth reduced from {:.1} MHz to {:.1} MHz",
                    self.bandwidth_mhz, next.bandwidth_mhz
                )
            }
            Hurdle::TrafficSurge => {
                next.traffic_load = SURGE_TRAFFIC_LOAD;
                format!(
                    "traffic load raised from {:.1}x to {:.1}x nominal",
                    self.traffic_load, next.traffic_load
                )
            }
            Hurdle::EmergencyEscalation => {
                next.emergency = true;
                "emergency mode activated; emergency alerting takes precedence".to_string()
            }
        };

        (next, description)
    }
}

impl Default for EnvironmentState {
    fn default() -> Self {
        Self::from_config(&EnvironmentConfig::default())
    }
}

const COVERAGE_DROP_IMPAIRMENT_DB: f64 = 10.0;
const INTERFERENCE_NOISE_FLOOR_DBM: f64 = -85.0;
const REDUCED_BANDWIDTH_MHZ: f64 = 3.0;
const SURGE_TRAFFIC_LOAD: f64 = 2.5;

/// Named, deterministic perturbation of the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hurdle {
    /// Raises channel impairment.
    CoverageDrop,
    /// Raises the noise floor.
    Interference,
    /// Shrinks the available bandwidth.
    SpectrumReduction,
    /// Raises the traffic load level.
    TrafficSurge,
    /// Sets the emergency flag.
    EmergencyEscalation,
}

impl Hurdle {
    pub const ALL: [Self; 5] = [
        Self::CoverageDrop,
        Self::Interference,
        Self::SpectrumReduction,
        Self::TrafficSurge,
        Self::EmergencyEscalation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::CoverageDrop => "coverage_drop",
            Self::Interference => "interference",
            Self::SpectrumReduction => "spectrum_reduction",
            Self::TrafficSurge => "traffic_surge",
            Self::EmergencyEscalation => "emergency_escalation",
        }
    }
}

impl fmt::Display for Hurdle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Hurdle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|h| h.name() == needle)
            .ok_or_else(|| Error::UnknownHurdle(s.to_string()))
    }
}
