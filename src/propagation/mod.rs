//! Radio propagation.
//!
//! Empirical Okumura-Hata path loss for a macro transmitter, applied
//! identically to a single distance or to a whole array of distances, plus a
//! terrain-aware variant that adds an obstruction penalty when the line of
//! sight is blocked.

mod terrain;

pub use terrain::{ElevationGrid, TerrainLink, TerrainModel};

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Shortest distance the model is evaluated at (km).
pub const MIN_DISTANCE_KM: f64 = 0.01;

/// Planar position in km, tower at the origin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x_km: f64,
    pub y_km: f64,
}

impl Position {
    pub const ORIGIN: Self = Self { x_km: 0.0, y_km: 0.0 };

    pub fn new(x_km: f64, y_km: f64) -> Self {
        Self { x_km, y_km }
    }

    pub fn distance_to(&self, other: &Self) -> f64 {
        (self.x_km - other.x_km).hypot(self.y_km - other.y_km)
    }

    /// Distance from the tower.
    pub fn range_km(&self) -> f64 {
        self.distance_to(&Self::ORIGIN)
    }

    /// Point a fraction `t` of the way towards `other`.
    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        Self {
            x_km: self.x_km + (other.x_km - self.x_km) * t,
            y_km: self.y_km + (other.y_km - self.y_km) * t,
        }
    }
}

/// Transmitter and receiver antenna heights above ground.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AntennaHeights {
    /// Transmitter height (m).
    #[serde(default = "default_tx_height")]
    pub tx_m: f64,
    /// Receiver height (m).
    #[serde(default = "default_rx_height")]
    pub rx_m: f64,
}

fn default_tx_height() -> f64 {
    30.0
}
fn default_rx_height() -> f64 {
    1.5
}

impl Default for AntennaHeights {
    fn default() -> Self {
        Self {
            tx_m: default_tx_height(),
            rx_m: default_rx_height(),
        }
    }
}

/// Okumura-Hata model with the frequency and height terms precomputed.
#[derive(Debug, Clone, Copy)]
pub struct HataModel {
    /// Loss at 1 km (dB).
    intercept_db: f64,
    /// Loss per decade of distance (dB).
    slope_db: f64,
}

impl HataModel {
    pub fn new(freq_mhz: f64, heights: AntennaHeights) -> Result<Self> {
        if !(freq_mhz.is_finite() && freq_mhz > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "frequency must be positive, got {freq_mhz} MHz"
            )));
        }
        if !(heights.tx_m > 0.0 && heights.rx_m > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "antenna heights must be positive, got tx={} m rx={} m",
                heights.tx_m, heights.rx_m
            )));
        }

        let log_f = freq_mhz.log10();
        let log_hb = heights.tx_m.log10();
        // Mobile antenna correction for a small/medium city
        let a_hm = (1.1 * log_f - 0.7) * heights.rx_m - (1.56 * log_f - 0.8);

        Ok(Self {
            intercept_db: 69.55 + 26.16 * log_f - 13.82 * log_hb - a_hm,
            slope_db: 44.9 - 6.55 * log_hb,
        })
    }

    /// Path loss at `distance_km` (dB).
    #[inline]
    pub fn loss_db(&self, distance_km: f64) -> f64 {
        self.intercept_db + self.slope_db * distance_km.max(MIN_DISTANCE_KM).log10()
    }
}

/// Distance input accepted by the propagation functions: a scalar, a slice,
/// or an `ndarray` vector. All shapes go through the same per-element model.
pub trait Distances {
    type Output;

    fn validate(&self) -> Result<()>;

    fn map_km<F: Fn(f64) -> f64>(&self, f: F) -> Self::Output;
}

fn check_distance(d: f64) -> Result<()> {
    if d.is_finite() && d >= 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "distance must be finite and non-negative, got {d} km"
        )))
    }
}

impl Distances for f64 {
    type Output = f64;

    fn validate(&self) -> Result<()> {
        check_distance(*self)
    }

    fn map_km<F: Fn(f64) -> f64>(&self, f: F) -> f64 {
        f(*self)
    }
}

impl Distances for [f64] {
    type Output = Vec<f64>;

    fn validate(&self) -> Result<()> {
        self.iter().try_for_each(|d| check_distance(*d))
    }

    fn map_km<F: Fn(f64) -> f64>(&self, f: F) -> Vec<f64> {
        self.iter().map(|d| f(*d)).collect()
    }
}

impl Distances for Array1<f64> {
    type Output = Array1<f64>;

    fn validate(&self) -> Result<()> {
        self.iter().try_for_each(|d| check_distance(*d))
    }

    fn map_km<F: Fn(f64) -> f64>(&self, f: F) -> Array1<f64> {
        self.mapv(f)
    }
}

/// Path loss (dB) between a transmitter and receivers at `distances`.
pub fn path_loss<D: Distances + ?Sized>(
    freq_mhz: f64,
    distances: &D,
    heights: AntennaHeights,
) -> Result<D::Output> {
    let model = HataModel::new(freq_mhz, heights)?;
    distances.validate()?;
    Ok(distances.map_km(|d| model.loss_db(d)))
}

/// Received power (dBm) at `distances` for a transmitter at `tx_power_dbm`.
pub fn received_power<D: Distances + ?Sized>(
    tx_power_dbm: f64,
    freq_mhz: f64,
    distances: &D,
    heights: AntennaHeights,
) -> Result<D::Output> {
    let model = HataModel::new(freq_mhz, heights)?;
    distances.validate()?;
    Ok(distances.map_km(|d| tx_power_dbm - model.loss_db(d)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_loss_increases_with_distance() {
        let heights = AntennaHeights::default();
        let near = path_loss(600.0, &1.0, heights).unwrap();
        let far = path_loss(600.0, &10.0, heights).unwrap();
        assert!(far > near);
        // One decade of distance adds the slope term (~35 dB at 30 m)
        assert!((far - near - 35.23).abs() < 0.1);
    }

    #[test]
    fn test_path_loss_increases_with_frequency() {
        let heights = AntennaHeights::default();
        let low = path_loss(200.0, &2.0, heights).unwrap();
        let high = path_loss(700.0, &2.0, heights).unwrap();
        assert!(high > low);
    }

    #[test]
    fn test_rejects_non_positive_frequency() {
        let heights = AntennaHeights::default();
        assert!(matches!(
            path_loss(0.0, &1.0, heights),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            received_power(30.0, -600.0, &1.0, heights),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_rejects_negative_distance() {
        let result = path_loss(600.0, [1.0, -2.0].as_slice(), AntennaHeights::default());
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_zero_distance_is_floored() {
        let heights = AntennaHeights::default();
        let at_zero = path_loss(600.0, &0.0, heights).unwrap();
        let at_floor = path_loss(600.0, &MIN_DISTANCE_KM, heights).unwrap();
        assert_eq!(at_zero, at_floor);
        assert!(at_zero.is_finite());
    }

    #[test]
    fn test_vector_matches_scalar() {
        let heights = AntennaHeights::default();
        let distances = Array1::linspace(0.0, 25.0, 257);
        let vector = received_power(35.0, 600.0, &distances, heights).unwrap();
        for (d, v) in distances.iter().zip(vector.iter()) {
            let scalar = received_power(35.0, 600.0, d, heights).unwrap();
            assert!(((v - scalar) / scalar).abs() <= 1e-5, "d={d}");
        }

        let slice: Vec<f64> = distances.to_vec();
        let from_slice = received_power(35.0, 600.0, slice.as_slice(), heights).unwrap();
        assert_eq!(from_slice, vector.to_vec());
    }
}
