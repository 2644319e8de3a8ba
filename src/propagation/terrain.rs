//! Terrain-aware propagation.

use std::sync::Arc;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AntennaHeights, HataModel, Position};
use crate::error::{Error, Result};

/// Regular elevation grid. Row `r` lies at `min_y_km + r * cell_km`, column
/// `c` at `min_x_km + c * cell_km`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevationGrid {
    pub min_x_km: f64,
    pub min_y_km: f64,
    pub cell_km: f64,
    /// Elevations in meters, indexed `[row, col]`.
    pub elevations_m: Array2<f64>,
}

impl ElevationGrid {
    pub fn new(min_x_km: f64, min_y_km: f64, cell_km: f64, elevations_m: Array2<f64>) -> Result<Self> {
        if !(cell_km.is_finite() && cell_km > 0.0) {
            return Err(Error::Dataset(format!("grid cell size must be positive, got {cell_km}")));
        }
        let (rows, cols) = elevations_m.dim();
        if rows < 2 || cols < 2 {
            return Err(Error::Dataset(format!(
                "elevation grid needs at least 2x2 samples, got {rows}x{cols}"
            )));
        }
        Ok(Self {
            min_x_km,
            min_y_km,
            cell_km,
            elevations_m,
        })
    }

    pub fn max_x_km(&self) -> f64 {
        self.min_x_km + (self.elevations_m.ncols() - 1) as f64 * self.cell_km
    }

    pub fn max_y_km(&self) -> f64 {
        self.min_y_km + (self.elevations_m.nrows() - 1) as f64 * self.cell_km
    }

    pub fn contains(&self, p: &Position) -> bool {
        (self.min_x_km..=self.max_x_km()).contains(&p.x_km)
            && (self.min_y_km..=self.max_y_km()).contains(&p.y_km)
    }

    /// Bilinear interpolation of the elevation at `p`, `None` outside the grid.
    pub fn elevation_at(&self, p: &Position) -> Option<f64> {
        if !self.contains(p) {
            return None;
        }

        let fx = (p.x_km - self.min_x_km) / self.cell_km;
        let fy = (p.y_km - self.min_y_km) / self.cell_km;
        let c0 = (fx.floor() as usize).min(self.elevations_m.ncols() - 2);
        let r0 = (fy.floor() as usize).min(self.elevations_m.nrows() - 2);
        let tx = fx - c0 as f64;
        let ty = fy - r0 as f64;

        let e = &self.elevations_m;
        let top = e[[r0, c0]] * (1.0 - tx) + e[[r0, c0 + 1]] * tx;
        let bottom = e[[r0 + 1, c0]] * (1.0 - tx) + e[[r0 + 1, c0 + 1]] * tx;
        let value = top * (1.0 - ty) + bottom * ty;

        value.is_finite().then_some(value)
    }
}

/// Outcome of a terrain-aware link computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerrainLink {
    /// Received power (dBm).
    pub received_dbm: f64,
    /// Line of sight was blocked.
    pub obstructed: bool,
    /// Terrain was consulted; false means the plain model was used.
    pub terrain_used: bool,
}

/// Terrain-aware propagation over a cached elevation grid.
#[derive(Debug, Clone)]
pub struct TerrainModel {
    grid: Option<Arc<ElevationGrid>>,
    samples: usize,
    obstruction_db: f64,
}

impl TerrainModel {
    pub const DEFAULT_SAMPLES: usize = 32;
    pub const DEFAULT_OBSTRUCTION_DB: f64 = 20.0;

    pub fn new(grid: Option<Arc<ElevationGrid>>) -> Self {
        Self {
            grid,
            samples: Self::DEFAULT_SAMPLES,
            obstruction_db: Self::DEFAULT_OBSTRUCTION_DB,
        }
    }

    /// Model without terrain data; always uses the plain path loss.
    pub fn flat() -> Self {
        Self::new(None)
    }

    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples.max(1);
        self
    }

    pub fn with_obstruction_db(mut self, obstruction_db: f64) -> Self {
        self.obstruction_db = obstruction_db;
        self
    }

    pub fn has_terrain(&self) -> bool {
        self.grid.is_some()
    }

    /// Received power between `tx` and `rx`, adding the obstruction penalty
    /// when any sampled terrain point rises above the straight line between
    /// the antenna tops.
    pub fn received_power(
        &self,
        tx_power_dbm: f64,
        freq_mhz: f64,
        tx: Position,
        rx: Position,
        heights: AntennaHeights,
    ) -> Result<TerrainLink> {
        let model = HataModel::new(freq_mhz, heights)?;
        let plain_dbm = tx_power_dbm - model.loss_db(tx.distance_to(&rx));
        let plain = TerrainLink {
            received_dbm: plain_dbm,
            obstructed: false,
            terrain_used: false,
        };

        let Some(grid) = self.grid.as_deref() else {
            return Ok(plain);
        };
        let (Some(tx_ground), Some(rx_ground)) = (grid.elevation_at(&tx), grid.elevation_at(&rx)) else {
            debug!("Link endpoint outside terrain grid, using flat model");
            return Ok(plain);
        };

        let tx_top = tx_ground + heights.tx_m;
        let rx_top = rx_ground + heights.rx_m;

        let mut obstructed = false;
        for i in 1..self.samples {
            let t = i as f64 / self.samples as f64;
            let Some(ground) = grid.elevation_at(&tx.lerp(&rx, t)) else {
                return Ok(plain);
            };
            let sight_line = tx_top + (rx_top - tx_top) * t;
            if ground > sight_line {
                obstructed = true;
                break;
            }
        }

        let penalty = if obstructed { self.obstruction_db } else { 0.0 };
        Ok(TerrainLink {
            received_dbm: plain_dbm - penalty,
            obstructed,
            terrain_used: true,
        })
    }
}

impl Default for TerrainModel {
    fn default() -> Self {
        Self::flat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn ridge_grid() -> ElevationGrid {
        // 5x5 km grid, 1 km cells, a 500 m ridge along x = 0
        let elevations = Array2::from_shape_fn((6, 6), |(_, c)| if c == 2 { 500.0 } else { 0.0 });
        ElevationGrid::new(-2.0, -2.0, 1.0, elevations).unwrap()
    }

    #[test]
    fn test_bilinear_interpolation() {
        let grid = ridge_grid();
        assert_eq!(grid.elevation_at(&Position::new(0.0, 0.0)), Some(500.0));
        assert_eq!(grid.elevation_at(&Position::new(-0.5, 0.0)), Some(250.0));
        assert_eq!(grid.elevation_at(&Position::new(10.0, 0.0)), None);
    }

    #[test]
    fn test_obstruction_penalty() {
        let terrain = TerrainModel::new(Some(Arc::new(ridge_grid())));
        let heights = AntennaHeights::default();
        let tx = Position::new(-1.5, 0.0);
        let rx = Position::new(1.5, 0.0);

        let link = terrain.received_power(35.0, 600.0, tx, rx, heights).unwrap();
        let flat = TerrainModel::flat().received_power(35.0, 600.0, tx, rx, heights).unwrap();

        assert!(link.terrain_used);
        assert!(link.obstructed);
        assert!((flat.received_dbm - link.received_dbm - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_clear_line_of_sight() {
        let terrain = TerrainModel::new(Some(Arc::new(ridge_grid())));
        let tx = Position::new(2.5, -1.0);
        let rx = Position::new(2.5, 1.0);
        let link = terrain
            .received_power(35.0, 600.0, tx, rx, AntennaHeights::default())
            .unwrap();
        assert!(link.terrain_used);
        assert!(!link.obstructed);
    }

    #[test]
    fn test_falls_back_outside_grid() {
        let terrain = TerrainModel::new(Some(Arc::new(ridge_grid())));
        let link = terrain
            .received_power(
                35.0,
                600.0,
                Position::new(-1.5, 0.0),
                Position::new(9.0, 0.0),
                AntennaHeights::default(),
            )
            .unwrap();
        assert!(!link.terrain_used);
        assert!(!link.obstructed);
    }

    #[test]
    fn test_rejects_degenerate_grid() {
        assert!(ElevationGrid::new(0.0, 0.0, 1.0, Array2::zeros((1, 4))).is_err());
        assert!(ElevationGrid::new(0.0, 0.0, 0.0, Array2::zeros((3, 3))).is_err());
    }
}
