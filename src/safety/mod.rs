//! Safety constraint layer.
//!
//! A deterministic post-filter between the optimizer and the approval
//! workflow. Recoverable violations are clamped and reported as
//! [`SafetyWarning`]s; only a request for an unauthorized band fails.
//!
//! Rules, in order:
//! 1. Frequency must lie in an authorized band (otherwise `UnsafeState`).
//! 2. Power above the ceiling is reduced to the ceiling; power below the
//!    floor is raised to the floor.
//! 3. An unrecognized modulation becomes the most robust one.
//! 4. In an emergency, modulations above the emergency limit are downgraded.
//! 5. Coding rates are snapped onto a supported operating point.
//! 6. The emergency weight is held at its floor; the offload ratio is kept in [0, 1].

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::external::PlpEntry;
use crate::optimizer::MODCOD_TABLE;
use crate::types::{CodingRate, ModCod, Modulation, SliceKind};

/// An inclusive frequency range (MHz).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    pub min_mhz: f64,
    pub max_mhz: f64,
}

impl FrequencyBand {
    pub fn contains(&self, freq_mhz: f64) -> bool {
        (self.min_mhz..=self.max_mhz).contains(&freq_mhz)
    }
}

/// Safety layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Absolute transmit power ceiling (dBm).
    #[serde(default = "default_max_power")]
    pub max_power_dbm: f64,

    /// Lowest transmit power a deployed configuration may carry (dBm).
    #[serde(default = "default_min_power")]
    pub min_power_dbm: f64,

    /// Least robust modulation allowed while an emergency is active.
    #[serde(default = "default_emergency_modulation")]
    pub emergency_max_modulation: Modulation,

    /// Bands the transmitter may use.
    #[serde(default = "default_bands")]
    pub authorized_bands: Vec<FrequencyBand>,

    /// Lowest emergency slice weight ever deployed.
    #[serde(default = "default_weight_floor")]
    pub emergency_weight_floor: f64,
}

fn default_max_power() -> f64 { 46.0 }
fn default_min_power() -> f64 { 0.0 }
fn default_emergency_modulation() -> Modulation { Modulation::Qam16 }
fn default_weight_floor() -> f64 { 0.5 }

fn default_bands() -> Vec<FrequencyBand> {
    vec![
        // VHF high band
        FrequencyBand { min_mhz: 174.0, max_mhz: 216.0 },
        // UHF
        FrequencyBand { min_mhz: 470.0, max_mhz: 698.0 },
    ]
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_power_dbm: default_max_power(),
            min_power_dbm: default_min_power(),
            emergency_max_modulation: default_emergency_modulation(),
            authorized_bands: default_bands(),
            emergency_weight_floor: default_weight_floor(),
        }
    }
}

/// A modulation as requested at the boundary, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModulationRequest {
    Supported(Modulation),
    Unrecognized(String),
}

impl From<String> for ModulationRequest {
    fn from(s: String) -> Self {
        match s.parse::<Modulation>() {
            Ok(m) => Self::Supported(m),
            Err(_) => Self::Unrecognized(s),
        }
    }
}

impl From<&str> for ModulationRequest {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<Modulation> for ModulationRequest {
    fn from(m: Modulation) -> Self {
        Self::Supported(m)
    }
}

impl From<ModulationRequest> for String {
    fn from(req: ModulationRequest) -> Self {
        match req {
            ModulationRequest::Supported(m) => m.as_str().to_string(),
            ModulationRequest::Unrecognized(s) => s,
        }
    }
}

/// Requested settings for one slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceSetting {
    pub kind: SliceKind,
    pub modulation: ModulationRequest,
    pub coding_rate: CodingRate,
    pub bandwidth_mhz: f64,
}

/// A configuration proposed for deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedConfig {
    pub power_dbm: f64,
    pub frequency_mhz: f64,
    pub emergency_weight: f64,
    pub coverage_weight: f64,
    pub offload_ratio: f64,
    pub slices: Vec<SliceSetting>,
}

/// A slice after validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafeSlice {
    pub kind: SliceKind,
    pub modcod: ModCod,
    pub bandwidth_mhz: f64,
}

/// A configuration that passed the safety layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeConfig {
    pub power_dbm: f64,
    pub frequency_mhz: f64,
    pub emergency_weight: f64,
    pub coverage_weight: f64,
    pub offload_ratio: f64,
    pub slices: Vec<SafeSlice>,
}

impl SafeConfig {
    /// PLP signaling table, one pipe per slice in order.
    pub fn plp_table(&self) -> Vec<PlpEntry> {
        self.slices
            .iter()
            .enumerate()
            .map(|(i, s)| PlpEntry {
                id: u8::try_from(i).unwrap_or(u8::MAX),
                slice: s.kind,
                modcod: s.modcod,
                bandwidth_mhz: s.bandwidth_mhz,
            })
            .collect()
    }

    pub fn slice(&self, kind: SliceKind) -> Option<&SafeSlice> {
        self.slices.iter().find(|s| s.kind == kind)
    }
}

/// Context the rules depend on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafetyContext {
    pub emergency: bool,
}

/// A clamp applied by the safety layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SafetyWarning {
    PowerCeiling { requested_dbm: f64, ceiling_dbm: f64 },
    PowerFloor { requested_dbm: f64, floor_dbm: f64 },
    UnrecognizedModulation { slice: SliceKind, requested: String, replacement: Modulation },
    EmergencyDowngrade { slice: SliceKind, from: Modulation, to: Modulation },
    CodingAdjusted { slice: SliceKind, from: ModCod, to: ModCod },
    EmergencyWeightFloor { requested: f64, floor: f64 },
    WeightClamped { slice: SliceKind, requested: f64 },
    OffloadClamped { requested: f64, clamped: f64 },
}

impl fmt::Display for SafetyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PowerCeiling { requested_dbm, ceiling_dbm } => write!(
                f,
                "power {requested_dbm:.1} dBm exceeds ceiling, clamped to {ceiling_dbm:.1} dBm"
            ),
            Self::PowerFloor { requested_dbm, floor_dbm } => write!(
                f,
                "power {requested_dbm:.1} dBm below floor, raised to {floor_dbm:.1} dBm"
            ),
            Self::UnrecognizedModulation { slice, requested, replacement } => write!(
                f,
                "{slice} slice: unrecognized modulation '{requested}' replaced by {replacement}"
            ),
            Self::EmergencyDowngrade { slice, from, to } => {
                write!(f, "{slice} slice: {from} downgraded to {to} for emergency operation")
            }
            Self::CodingAdjusted { slice, from, to } => {
                write!(f, "{slice} slice: {from} is not an operating point, using {to}")
            }
            Self::EmergencyWeightFloor { requested, floor } => write!(
                f,
                "emergency weight {requested:.2} below floor, raised to {floor:.2}"
            ),
            Self::WeightClamped { slice, requested } => {
                write!(f, "{slice} weight {requested:.2} is invalid, set to 0")
            }
            Self::OffloadClamped { requested, clamped } => {
                write!(f, "offload ratio {requested:.2} clamped to {clamped:.2}")
            }
        }
    }
}

/// Most efficient supported point for `modulation` not exceeding `rate`,
/// or its most robust point when none does.
fn supported_modcod(modulation: Modulation, rate: CodingRate) -> ModCod {
    let candidates = MODCOD_TABLE.iter().filter(|op| op.modcod.modulation == modulation);
    candidates
        .clone()
        .filter(|op| op.modcod.coding_rate <= rate)
        .last()
        .or_else(|| candidates.min_by(|a, b| a.modcod.coding_rate.cmp(&b.modcod.coding_rate)))
        .map_or(ModCod::new(modulation, rate), |op| op.modcod)
}

/// The safety constraint layer.
#[derive(Debug, Clone, Default)]
pub struct SafetyLayer {
    config: SafetyConfig,
}

impl SafetyLayer {
    pub fn new(config: SafetyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    /// Clamp a proposal into the safe envelope.
    ///
    /// Fails only when the proposal cannot be made safe: an unauthorized
    /// frequency or a power that is not a number.
    pub fn validate(
        &self,
        proposed: &ProposedConfig,
        context: &SafetyContext,
    ) -> Result<(SafeConfig, Vec<SafetyWarning>)> {
        let cfg = &self.config;
        let mut warnings = Vec::new();

        if !cfg.authorized_bands.iter().any(|b| b.contains(proposed.frequency_mhz)) {
            return Err(Error::UnsafeState(format!(
                "{} MHz is outside every authorized band",
                proposed.frequency_mhz
            )));
        }
        if proposed.power_dbm.is_nan() {
            return Err(Error::UnsafeState(format!(
                "transmit power {} is not a number",
                proposed.power_dbm
            )));
        }

        let mut power_dbm = proposed.power_dbm;
        if power_dbm > cfg.max_power_dbm {
            warnings.push(SafetyWarning::PowerCeiling {
                requested_dbm: power_dbm,
                ceiling_dbm: cfg.max_power_dbm,
            });
            power_dbm = cfg.max_power_dbm;
        } else if power_dbm < cfg.min_power_dbm {
            warnings.push(SafetyWarning::PowerFloor {
                requested_dbm: power_dbm,
                floor_dbm: cfg.min_power_dbm,
            });
            power_dbm = cfg.min_power_dbm;
        }

        let slices = proposed
            .slices
            .iter()
            .map(|setting| self.validate_slice(setting, context, &mut warnings))
            .collect();

        let mut emergency_weight = proposed.emergency_weight;
        if emergency_weight.is_nan() || emergency_weight < cfg.emergency_weight_floor {
            warnings.push(SafetyWarning::EmergencyWeightFloor {
                requested: emergency_weight,
                floor: cfg.emergency_weight_floor,
            });
            emergency_weight = cfg.emergency_weight_floor;
        }

        let mut coverage_weight = proposed.coverage_weight;
        if !(coverage_weight.is_finite() && coverage_weight >= 0.0) {
            warnings.push(SafetyWarning::WeightClamped {
                slice: SliceKind::Coverage,
                requested: coverage_weight,
            });
            coverage_weight = 0.0;
        }

        let requested_offload = proposed.offload_ratio;
        let offload_ratio = if requested_offload.is_nan() {
            0.0
        } else {
            requested_offload.clamp(0.0, 1.0)
        };
        if offload_ratio != requested_offload {
            warnings.push(SafetyWarning::OffloadClamped {
                requested: requested_offload,
                clamped: offload_ratio,
            });
        }

        for warning in &warnings {
            warn!("Safety clamp: {}", warning);
        }

        Ok((
            SafeConfig {
                power_dbm,
                frequency_mhz: proposed.frequency_mhz,
                emergency_weight,
                coverage_weight,
                offload_ratio,
                slices,
            },
            warnings,
        ))
    }

    fn validate_slice(
        &self,
        setting: &SliceSetting,
        context: &SafetyContext,
        warnings: &mut Vec<SafetyWarning>,
    ) -> SafeSlice {
        let mut modulation = match &setting.modulation {
            ModulationRequest::Supported(m) => *m,
            ModulationRequest::Unrecognized(requested) => {
                warnings.push(SafetyWarning::UnrecognizedModulation {
                    slice: setting.kind,
                    requested: requested.clone(),
                    replacement: Modulation::MOST_ROBUST,
                });
                Modulation::MOST_ROBUST
            }
        };

        let limit = self.config.emergency_max_modulation;
        if context.emergency && modulation > limit {
            warnings.push(SafetyWarning::EmergencyDowngrade {
                slice: setting.kind,
                from: modulation,
                to: limit,
            });
            modulation = limit;
        }

        let requested = ModCod::new(modulation, setting.coding_rate);
        let modcod = supported_modcod(modulation, setting.coding_rate);
        if modcod != requested {
            warnings.push(SafetyWarning::CodingAdjusted {
                slice: setting.kind,
                from: requested,
                to: modcod,
            });
        }

        SafeSlice {
            kind: setting.kind,
            modcod,
            bandwidth_mhz: setting.bandwidth_mhz,
        }
    }
}
