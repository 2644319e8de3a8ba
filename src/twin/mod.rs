//! Coverage digital twin.
//!
//! A population of static and mobile receivers spread over a square service
//! area centred on the tower. Each evaluation derives per-receiver SNR from
//! the propagation model and aggregates it into a [`CoverageReport`].

mod receivers;

pub use receivers::{MotionPattern, ReceiverMotion, ReceiverPoint};

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, warn};

use crate::error::Result;
use crate::external::RoadNetworkSource;
use crate::propagation::{self, AntennaHeights, Position, TerrainModel};

/// Speed used to normalize receiver velocity (km/h).
pub const MAX_SPEED_KMH: f64 = 120.0;

/// Twin configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwinConfig {
    /// Side of the square service area (km).
    #[serde(default = "default_area")]
    pub area_km: f64,

    /// Number of static receivers.
    #[serde(default = "default_static_points")]
    pub static_points: usize,

    /// Number of mobile receivers.
    #[serde(default = "default_mobile_points")]
    pub mobile_points: usize,

    /// SNR penalty per km/h for mobile receivers (dB).
    #[serde(default = "default_doppler_penalty")]
    pub doppler_penalty_db_per_kmh: f64,

    /// Per-tick probability that a random walker picks a new heading.
    #[serde(default = "default_turn_probability")]
    pub random_turn_probability: f64,

    /// Share of mobile receivers that are vehicles on linear tracks.
    #[serde(default = "default_vehicle_share")]
    pub vehicle_share: f64,

    /// Seed for reproducible populations.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_area() -> f64 {
    4.0
}
fn default_static_points() -> usize {
    80
}
fn default_mobile_points() -> usize {
    20
}
fn default_doppler_penalty() -> f64 {
    0.05
}
fn default_turn_probability() -> f64 {
    0.05
}
fn default_vehicle_share() -> f64 {
    0.5
}

impl Default for TwinConfig {
    fn default() -> Self {
        Self {
            area_km: default_area(),
            static_points: default_static_points(),
            mobile_points: default_mobile_points(),
            doppler_penalty_db_per_kmh: default_doppler_penalty(),
            random_turn_probability: default_turn_probability(),
            vehicle_share: default_vehicle_share(),
            seed: None,
        }
    }
}

/// Transmission parameters and channel conditions for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkBudget {
    pub tx_power_dbm: f64,
    pub freq_mhz: f64,
    /// SNR a receiver needs to count as covered (dB).
    pub min_snr_db: f64,
    pub noise_floor_dbm: f64,
    pub impairment_db: f64,
}

/// Aggregate coverage of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    /// Covered share of all receivers (0-100).
    pub coverage_pct: f64,
    /// Covered share of static receivers (0-100).
    pub static_coverage_pct: f64,
    /// Covered share of mobile receivers (0-100).
    pub mobile_coverage_pct: f64,
    pub mean_snr_db: f64,
    pub min_snr_db: f64,
    pub std_snr_db: f64,
    pub covered: usize,
    pub total: usize,
    pub static_covered: usize,
    pub mobile_covered: usize,
}

/// Share of `covered` in `total` as a percentage; an empty population is
/// vacuously fully covered.
fn percentage(covered: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        (covered as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// The coverage digital twin.
pub struct CoverageTwin {
    config: TwinConfig,
    static_points: Vec<ReceiverPoint>,
    mobile_points: Vec<ReceiverPoint>,
    terrain: TerrainModel,
    heights: AntennaHeights,
    rng: StdRng,
}

impl CoverageTwin {
    /// Create a twin with receivers placed uniformly over the service area.
    pub fn new(config: TwinConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let half = config.area_km / 2.0;

        let static_points = (0..config.static_points)
            .map(|_| ReceiverPoint::fixed(uniform_position(&mut rng, half)))
            .collect();
        let mobile_points = (0..config.mobile_points)
            .map(|_| {
                let position = uniform_position(&mut rng, half);
                ReceiverPoint::mobile(position, random_motion(&mut rng, config.vehicle_share))
            })
            .collect();

        Self {
            config,
            static_points,
            mobile_points,
            terrain: TerrainModel::flat(),
            heights: AntennaHeights::default(),
            rng,
        }
    }

    /// Create a twin whose receivers sit on road-network coordinates.
    /// Falls back to uniform placement when the dataset cannot be used.
    pub fn from_road_network(config: TwinConfig, source: &dyn RoadNetworkSource) -> Self {
        let half = config.area_km / 2.0;
        let pool: Vec<Position> = match source.load_positions() {
            Ok(positions) => positions
                .into_iter()
                .filter(|p| p.x_km.abs() <= half && p.y_km.abs() <= half)
                .collect(),
            Err(e) => {
                warn!("Road network unavailable, placing receivers uniformly: {}", e);
                Vec::new()
            }
        };

        if pool.is_empty() {
            return Self::new(config);
        }

        let mut twin = Self::new(config);
        debug!("Seeding {} receivers from {} road positions", twin.total_points(), pool.len());
        for point in twin.static_points.iter_mut().chain(twin.mobile_points.iter_mut()) {
            point.position = pool[twin.rng.gen_range(0..pool.len())];
        }
        twin
    }

    pub fn with_terrain(mut self, terrain: TerrainModel) -> Self {
        self.terrain = terrain;
        self
    }

    pub fn with_heights(mut self, heights: AntennaHeights) -> Self {
        self.heights = heights;
        self
    }

    pub fn config(&self) -> &TwinConfig {
        &self.config
    }

    pub fn heights(&self) -> AntennaHeights {
        self.heights
    }

    pub fn static_points(&self) -> &[ReceiverPoint] {
        &self.static_points
    }

    pub fn mobile_points(&self) -> &[ReceiverPoint] {
        &self.mobile_points
    }

    pub fn total_points(&self) -> usize {
        self.static_points.len() + self.mobile_points.len()
    }

    /// Fraction of receivers that are mobile.
    pub fn mobile_ratio(&self) -> f64 {
        match self.total_points() {
            0 => 0.0,
            n => self.mobile_points.len() as f64 / n as f64,
        }
    }

    /// Mean speed of mobile receivers (km/h).
    pub fn average_speed_kmh(&self) -> f64 {
        if self.mobile_points.is_empty() {
            return 0.0;
        }
        self.mobile_points.iter().map(ReceiverPoint::speed_kmh).mean()
    }

    /// Mean mobile speed normalized to 0-1.
    pub fn velocity_norm(&self) -> f64 {
        (self.average_speed_kmh() / MAX_SPEED_KMH).clamp(0.0, 1.0)
    }

    /// Advance every mobile receiver by `dt_seconds`.
    pub fn tick(&mut self, dt_seconds: f64) {
        let half = self.config.area_km / 2.0;
        let turn_probability = self.config.random_turn_probability;
        for point in &mut self.mobile_points {
            point.advance(dt_seconds, half, turn_probability, &mut self.rng);
        }
    }

    /// Evaluate coverage for a candidate link budget.
    pub fn evaluate(&self, budget: &LinkBudget) -> Result<CoverageReport> {
        let static_snr = self.snr_db(&self.static_points, budget)?;
        let mut mobile_snr = self.snr_db(&self.mobile_points, budget)?;
        for (snr, point) in mobile_snr.iter_mut().zip(&self.mobile_points) {
            *snr -= point.speed_kmh() * self.config.doppler_penalty_db_per_kmh;
        }

        let covered_in = |snr: &Array1<f64>| snr.iter().filter(|s| **s >= budget.min_snr_db).count();
        let static_covered = covered_in(&static_snr);
        let mobile_covered = covered_in(&mobile_snr);
        let covered = static_covered + mobile_covered;
        let total = self.total_points();

        let all: Vec<f64> = static_snr.iter().chain(mobile_snr.iter()).copied().collect();
        let (mean_snr_db, min_snr_db, std_snr_db) = if all.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                all.iter().mean(),
                all.iter().copied().fold(f64::INFINITY, f64::min),
                all.iter().population_std_dev(),
            )
        };

        Ok(CoverageReport {
            coverage_pct: percentage(covered, total),
            static_coverage_pct: percentage(static_covered, self.static_points.len()),
            mobile_coverage_pct: percentage(mobile_covered, self.mobile_points.len()),
            mean_snr_db,
            min_snr_db,
            std_snr_db,
            covered,
            total,
            static_covered,
            mobile_covered,
        })
    }

    /// SNR before any mobility penalty for each point.
    fn snr_db(&self, points: &[ReceiverPoint], budget: &LinkBudget) -> Result<Array1<f64>> {
        let received = if self.terrain.has_terrain() {
            let mut values = Vec::with_capacity(points.len());
            for point in points {
                let link = self.terrain.received_power(
                    budget.tx_power_dbm,
                    budget.freq_mhz,
                    Position::ORIGIN,
                    point.position,
                    self.heights,
                )?;
                values.push(link.received_dbm);
            }
            Array1::from(values)
        } else {
            let distances: Array1<f64> = points.iter().map(ReceiverPoint::range_km).collect();
            propagation::received_power(budget.tx_power_dbm, budget.freq_mhz, &distances, self.heights)?
        };

        Ok(received.mapv(|rx| rx - budget.impairment_db - budget.noise_floor_dbm))
    }
}

fn uniform_position(rng: &mut StdRng, half: f64) -> Position {
    Position::new(rng.gen_range(-half..=half), rng.gen_range(-half..=half))
}

fn random_motion(rng: &mut StdRng, vehicle_share: f64) -> ReceiverMotion {
    let heading_deg = rng.gen_range(0.0..360.0);
    if rng.gen_bool(receivers::unit_probability(vehicle_share)) {
        ReceiverMotion {
            speed_kmh: rng.gen_range(30.0..90.0),
            heading_deg,
            pattern: MotionPattern::Linear,
        }
    } else {
        ReceiverMotion {
            speed_kmh: rng.gen_range(3.0..6.0),
            heading_deg,
            pattern: MotionPattern::Random,
        }
    }
}
