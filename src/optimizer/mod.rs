//! Spectrum optimizer.
//!
//! Splits a fixed channel between weighted traffic slices:
//!
//! 1. Bandwidth is shared in proportion to slice weight, with a per-slice
//!    floor so no slice is starved of spectrum.
//! 2. Power is water-filled across slices to maximize weighted Shannon
//!    capacity `Σ wᵢ·bᵢ·log2(1 + pᵢ·hᵢ / Nᵢ)` under the total power budget.
//!    The common water level is found by bisection.
//! 3. Each slice gets the most efficient operating point from
//!    [`MODCOD_TABLE`] whose SNR requirement it meets and whose spectral
//!    efficiency does not exceed its Shannon capacity.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AllocationError;
use crate::types::{CodingRate, ModCod, Modulation, SliceKind};

/// Reported power for a slice that received none (dBm).
const ZERO_POWER_DBM: f64 = -120.0;
/// Lowest SNR reported for a starved slice (dB).
const SNR_FLOOR_DB: f64 = -50.0;

/// A modulation/coding pair and the SNR it needs to decode reliably.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperatingPoint {
    pub modcod: ModCod,
    pub required_snr_db: f64,
}

impl OperatingPoint {
    /// Spectral efficiency (bit/s/Hz).
    pub fn efficiency(&self) -> f64 {
        self.modcod.spectral_efficiency()
    }
}

/// Supported operating points, ordered by increasing efficiency.
pub const MODCOD_TABLE: [OperatingPoint; 8] = [
    OperatingPoint {
        modcod: ModCod::new(Modulation::Qpsk, CodingRate::R1_2),
        required_snr_db: 1.0,
    },
    OperatingPoint {
        modcod: ModCod::new(Modulation::Qpsk, CodingRate::R3_4),
        required_snr_db: 4.0,
    },
    OperatingPoint {
        modcod: ModCod::new(Modulation::Qam16, CodingRate::R1_2),
        required_snr_db: 7.0,
    },
    OperatingPoint {
        modcod: ModCod::new(Modulation::Qam16, CodingRate::R3_4),
        required_snr_db: 11.0,
    },
    OperatingPoint {
        modcod: ModCod::new(Modulation::Qam64, CodingRate::R2_3),
        required_snr_db: 15.0,
    },
    OperatingPoint {
        modcod: ModCod::new(Modulation::Qam64, CodingRate::R5_6),
        required_snr_db: 18.5,
    },
    OperatingPoint {
        modcod: ModCod::new(Modulation::Qam256, CodingRate::R3_4),
        required_snr_db: 22.0,
    },
    OperatingPoint {
        modcod: ModCod::new(Modulation::Qam256, CodingRate::R5_6),
        required_snr_db: 25.0,
    },
];

/// Shannon capacity in bit/s/Hz for a linear SNR.
pub fn shannon_efficiency(snr_linear: f64) -> f64 {
    (1.0 + snr_linear.max(0.0)).log2()
}

/// Pick the best operating point for an SNR.
///
/// Returns the chosen point and whether the SNR actually meets it. When no
/// point qualifies the most robust one is returned with `false`.
pub fn select_modcod(snr_db: f64) -> (OperatingPoint, bool) {
    let capacity = shannon_efficiency(10f64.powf(snr_db / 10.0));
    MODCOD_TABLE
        .iter()
        .rev()
        .find(|op| op.required_snr_db <= snr_db && op.efficiency() <= capacity)
        .map_or((MODCOD_TABLE[0], false), |op| (*op, true))
}

/// Optimizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Smallest bandwidth any slice may receive (MHz).
    #[serde(default = "default_min_slice_bandwidth")]
    pub min_slice_bandwidth_mhz: f64,

    /// Maximum number of slices (one PLP each).
    #[serde(default = "default_max_slices")]
    pub max_slices: usize,

    /// Bisection iterations for the water level.
    #[serde(default = "default_iterations")]
    pub bisection_iterations: u32,
}

fn default_min_slice_bandwidth() -> f64 { 0.25 }
fn default_max_slices() -> usize { 64 }
fn default_iterations() -> u32 { 100 }

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            min_slice_bandwidth_mhz: default_min_slice_bandwidth(),
            max_slices: default_max_slices(),
            bisection_iterations: default_iterations(),
        }
    }
}

/// A slice to be allocated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceRequest {
    pub name: String,
    pub kind: SliceKind,
    /// Priority weight (> 0).
    pub weight: f64,
    /// Channel-gain factor (0, 1].
    pub gain: f64,
}

impl SliceRequest {
    pub fn new(kind: SliceKind, weight: f64, gain: f64) -> Self {
        Self {
            name: kind.name().to_string(),
            kind,
            weight,
            gain,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn validate(&self) -> Result<(), AllocationError> {
        if !(self.weight.is_finite() && self.weight > 0.0) {
            return Err(AllocationError::InvalidSlice {
                slice: self.name.clone(),
                reason: format!("weight must be positive, got {}", self.weight),
            });
        }
        if !(self.gain.is_finite() && self.gain > 0.0 && self.gain <= 1.0) {
            return Err(AllocationError::InvalidSlice {
                slice: self.name.clone(),
                reason: format!("channel gain must be in (0, 1], got {}", self.gain),
            });
        }
        Ok(())
    }
}

/// Channel-wide budgets and link conditions for one allocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelBudget {
    pub total_power_dbm: f64,
    pub bandwidth_mhz: f64,
    /// Noise floor over the whole channel (dBm).
    pub noise_floor_dbm: f64,
    /// Path loss to the reference receiver (dB).
    pub reference_path_loss_db: f64,
}

/// Allocation result for one slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceConfig {
    pub name: String,
    pub kind: SliceKind,
    pub weight: f64,
    pub gain: f64,
    pub power_dbm: f64,
    pub power_mw: f64,
    pub bandwidth_mhz: f64,
    pub snr_db: f64,
    pub modcod: ModCod,
    /// False when even the most robust operating point is out of reach.
    pub meets_threshold: bool,
    /// Shannon capacity of the slice (Mbit/s).
    pub capacity_mbps: f64,
    /// Throughput of the chosen operating point (Mbit/s).
    pub throughput_mbps: f64,
}

/// A complete allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub slices: Vec<SliceConfig>,
    pub total_power_mw: f64,
    pub power_budget_mw: f64,
    pub total_bandwidth_mhz: f64,
    pub bandwidth_budget_mhz: f64,
    /// Water level reached by the power allocation.
    pub water_level: f64,
}

impl Allocation {
    pub fn slice(&self, kind: SliceKind) -> Option<&SliceConfig> {
        self.slices.iter().find(|s| s.kind == kind)
    }

    pub fn total_throughput_mbps(&self) -> f64 {
        self.slices.iter().map(|s| s.throughput_mbps).sum()
    }

    /// Delivered bit/s/Hz over the whole channel.
    pub fn spectral_efficiency(&self) -> f64 {
        if self.bandwidth_budget_mhz > 0.0 {
            self.total_throughput_mbps() / self.bandwidth_budget_mhz
        } else {
            0.0
        }
    }

    /// Weighted capacity objective value.
    pub fn weighted_capacity(&self) -> f64 {
        self.slices.iter().map(|s| s.weight * s.capacity_mbps).sum()
    }
}

/// Weighted water-filling allocator.
#[derive(Debug, Clone, Default)]
pub struct SpectrumOptimizer {
    config: OptimizerConfig,
}

impl SpectrumOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Allocate bandwidth, power and a modcod to each slice.
    pub fn allocate(
        &self,
        slices: &[SliceRequest],
        budget: &ChannelBudget,
    ) -> Result<Allocation, AllocationError> {
        if slices.is_empty() {
            return Err(AllocationError::NoSlices);
        }
        if slices.len() > self.config.max_slices {
            return Err(AllocationError::TooManySlices {
                requested: slices.len(),
                max: self.config.max_slices,
            });
        }
        for slice in slices {
            slice.validate()?;
        }

        let power_budget_mw = 10f64.powf(budget.total_power_dbm / 10.0);
        if !(power_budget_mw.is_finite() && power_budget_mw > 0.0) {
            return Err(AllocationError::PowerBudget(power_budget_mw));
        }

        let bandwidths = self.share_bandwidth(slices, budget.bandwidth_mhz)?;

        // Noise referred to the transmitter: Nᵢ / hᵢ in mW.
        let noise_mw = 10f64.powf(budget.noise_floor_dbm / 10.0);
        let path_gain = 10f64.powf(-budget.reference_path_loss_db / 10.0);
        let floors: Vec<f64> = slices
            .iter()
            .zip(&bandwidths)
            .map(|(s, b)| noise_mw * (b / budget.bandwidth_mhz) / (s.gain * path_gain))
            .collect();
        let scales: Vec<f64> = slices.iter().zip(&bandwidths).map(|(s, b)| s.weight * b).collect();

        let (water_level, powers) =
            self.water_fill(&scales, &floors, power_budget_mw);

        let configs: Vec<SliceConfig> = slices
            .iter()
            .zip(bandwidths.iter().zip(powers.iter().zip(&floors)))
            .map(|(slice, (&bandwidth, (&power, &floor)))| {
                let snr_linear = power / floor;
                let snr_db = if snr_linear > 0.0 {
                    (10.0 * snr_linear.log10()).max(SNR_FLOOR_DB)
                } else {
                    SNR_FLOOR_DB
                };
                let (op, meets_threshold) = select_modcod(snr_db);
                SliceConfig {
                    name: slice.name.clone(),
                    kind: slice.kind,
                    weight: slice.weight,
                    gain: slice.gain,
                    power_dbm: if power > 0.0 { 10.0 * power.log10() } else { ZERO_POWER_DBM },
                    power_mw: power,
                    bandwidth_mhz: bandwidth,
                    snr_db,
                    modcod: op.modcod,
                    meets_threshold,
                    capacity_mbps: bandwidth * shannon_efficiency(snr_linear),
                    throughput_mbps: if meets_threshold { bandwidth * op.efficiency() } else { 0.0 },
                }
            })
            .collect();

        let allocation = Allocation {
            total_power_mw: powers.iter().sum(),
            power_budget_mw,
            total_bandwidth_mhz: bandwidths.iter().sum(),
            bandwidth_budget_mhz: budget.bandwidth_mhz,
            water_level,
            slices: configs,
        };

        debug!(
            "Allocated {} slices: {:.1}/{:.1} mW, {:.2}/{:.2} MHz",
            allocation.slices.len(),
            allocation.total_power_mw,
            power_budget_mw,
            allocation.total_bandwidth_mhz,
            budget.bandwidth_mhz
        );

        Ok(allocation)
    }

    /// Weight-proportional bandwidth with a per-slice floor.
    fn share_bandwidth(
        &self,
        slices: &[SliceRequest],
        bandwidth_mhz: f64,
    ) -> Result<Vec<f64>, AllocationError> {
        let min = self.config.min_slice_bandwidth_mhz;
        let required = min * slices.len() as f64;
        if !(bandwidth_mhz.is_finite() && bandwidth_mhz > 0.0) || required > bandwidth_mhz + 1e-12 {
            return Err(AllocationError::BandwidthBudget {
                required_mhz: required,
                available_mhz: bandwidth_mhz,
            });
        }

        // Pin slices below the floor and re-share the rest until stable.
        let mut pinned = vec![false; slices.len()];
        loop {
            let free_weight: f64 = slices
                .iter()
                .zip(&pinned)
                .filter(|(_, p)| !**p)
                .map(|(s, _)| s.weight)
                .sum();
            let pinned_count = pinned.iter().filter(|p| **p).count();
            let free_bandwidth = bandwidth_mhz - min * pinned_count as f64;

            let shares: Vec<f64> = slices
                .iter()
                .zip(&pinned)
                .map(|(s, &p)| if p { min } else { free_bandwidth * s.weight / free_weight })
                .collect();

            let mut changed = false;
            for (share, p) in shares.iter().zip(pinned.iter_mut()) {
                if !*p && *share < min {
                    *p = true;
                    changed = true;
                }
            }
            if !changed {
                return Ok(shares);
            }
        }
    }

    /// Solve `pᵢ = max(0, λ·sᵢ − fᵢ)` with `Σ pᵢ = P` for the water level λ.
    ///
    /// The returned powers never exceed the budget.
    fn water_fill(&self, scales: &[f64], floors: &[f64], budget: f64) -> (f64, Vec<f64>) {
        let powers_at = |level: f64| -> Vec<f64> {
            scales
                .iter()
                .zip(floors)
                .map(|(s, f)| (level * s - f).max(0.0))
                .collect()
        };

        let min_scale = scales.iter().copied().fold(f64::INFINITY, f64::min);
        let total_floor: f64 = floors.iter().sum();
        let mut lo = 0.0;
        let mut hi = (budget + total_floor) / min_scale;

        for _ in 0..self.config.bisection_iterations {
            let mid = 0.5 * (lo + hi);
            let used: f64 = powers_at(mid).iter().sum();
            if used > budget {
                hi = mid;
            } else {
                lo = mid;
            }
        }

        (lo, powers_at(lo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> ChannelBudget {
        ChannelBudget {
            total_power_dbm: 35.0,
            bandwidth_mhz: 6.0,
            noise_floor_dbm: -100.0,
            reference_path_loss_db: 120.0,
        }
    }

    fn two_slices() -> Vec<SliceRequest> {
        vec![
            SliceRequest::new(SliceKind::Emergency, 1.0, 0.9),
            SliceRequest::new(SliceKind::Coverage, 1.0, 0.6),
        ]
    }

    #[test]
    fn test_table_is_ordered() {
        for pair in MODCOD_TABLE.windows(2) {
            assert!(pair[0].efficiency() < pair[1].efficiency());
            assert!(pair[0].required_snr_db < pair[1].required_snr_db);
        }
    }

    #[test]
    fn test_select_modcod() {
        let (op, ok) = select_modcod(30.0);
        assert!(ok);
        assert_eq!(op.modcod, ModCod::new(Modulation::Qam256, CodingRate::R5_6));

        let (op, ok) = select_modcod(12.0);
        assert!(ok);
        assert_eq!(op.modcod, ModCod::new(Modulation::Qam16, CodingRate::R3_4));

        let (op, ok) = select_modcod(-3.0);
        assert!(!ok);
        assert_eq!(op.modcod, MODCOD_TABLE[0].modcod);
    }

    #[test]
    fn test_budgets_respected() {
        let optimizer = SpectrumOptimizer::default();
        let allocation = optimizer.allocate(&two_slices(), &budget()).unwrap();

        assert!(allocation.total_bandwidth_mhz <= 6.0 + 1e-9);
        assert!(allocation.total_power_mw <= allocation.power_budget_mw * (1.0 + 1e-9));
        // Water-filling spends essentially all of the power.
        assert!(allocation.total_power_mw > allocation.power_budget_mw * 0.999);
    }

    #[test]
    fn test_bandwidth_follows_weight() {
        let optimizer = SpectrumOptimizer::default();
        let slices = vec![
            SliceRequest::new(SliceKind::Emergency, 3.0, 0.9),
            SliceRequest::new(SliceKind::Coverage, 1.0, 0.6),
        ];
        let allocation = optimizer.allocate(&slices, &budget()).unwrap();
        let emergency = allocation.slice(SliceKind::Emergency).unwrap();
        let coverage = allocation.slice(SliceKind::Coverage).unwrap();
        assert!((emergency.bandwidth_mhz - 4.5).abs() < 1e-9);
        assert!((coverage.bandwidth_mhz - 1.5).abs() < 1e-9);
        assert!(emergency.power_mw > coverage.power_mw);
    }

    #[test]
    fn test_minimum_bandwidth_floor() {
        let optimizer = SpectrumOptimizer::default();
        let slices = vec![
            SliceRequest::new(SliceKind::Emergency, 100.0, 0.9),
            SliceRequest::new(SliceKind::Coverage, 0.1, 0.6),
        ];
        let allocation = optimizer.allocate(&slices, &budget()).unwrap();
        let coverage = allocation.slice(SliceKind::Coverage).unwrap();
        assert!((coverage.bandwidth_mhz - 0.25).abs() < 1e-12);
        assert!((allocation.total_bandwidth_mhz - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_bandwidth_budget_error() {
        let optimizer = SpectrumOptimizer::default();
        let slices: Vec<SliceRequest> = (0..30)
            .map(|i| SliceRequest::new(SliceKind::Coverage, 1.0, 0.5).with_name(format!("s{i}")))
            .collect();
        let err = optimizer.allocate(&slices, &budget()).unwrap_err();
        assert!(matches!(err, AllocationError::BandwidthBudget { .. }));
    }

    #[test]
    fn test_rejects_bad_requests() {
        let optimizer = SpectrumOptimizer::default();
        assert_eq!(optimizer.allocate(&[], &budget()).unwrap_err(), AllocationError::NoSlices);

        let bad = [SliceRequest::new(SliceKind::Coverage, 0.0, 0.5)];
        assert!(matches!(
            optimizer.allocate(&bad, &budget()),
            Err(AllocationError::InvalidSlice { .. })
        ));

        let many: Vec<SliceRequest> = (0..65)
            .map(|_| SliceRequest::new(SliceKind::Coverage, 1.0, 0.5))
            .collect();
        assert!(matches!(
            optimizer.allocate(&many, &budget()),
            Err(AllocationError::TooManySlices { requested: 65, max: 64 })
        ));
    }

    #[test]
    fn test_weak_slice_gets_no_power() {
        let optimizer = SpectrumOptimizer::default();
        let budget = ChannelBudget {
            total_power_dbm: 0.0,
            reference_path_loss_db: 100.0,
            ..budget()
        };
        let slices = vec![
            SliceRequest::new(SliceKind::Emergency, 10.0, 1.0),
            SliceRequest::new(SliceKind::Coverage, 0.5, 0.01),
        ];
        let allocation = optimizer.allocate(&slices, &budget).unwrap();
        let coverage = allocation.slice(SliceKind::Coverage).unwrap();
        assert_eq!(coverage.power_mw, 0.0);
        assert!(!coverage.meets_threshold);
        assert!(allocation.total_power_mw <= allocation.power_budget_mw * (1.0 + 1e-9));
    }
}
