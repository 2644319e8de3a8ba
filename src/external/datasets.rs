//! Dataset providers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::propagation::{AntennaHeights, ElevationGrid, Position, TerrainModel};

/// Kilometers per degree of latitude.
const KM_PER_DEG_LAT: f64 = 110.574;
/// Kilometers per degree of longitude at the equator.
const KM_PER_DEG_LON: f64 = 111.320;

/// Geographic coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Project geographic points onto a local plane in km centred on their
/// centroid.
pub fn project_to_km(points: &[GeoPoint]) -> Vec<Position> {
    if points.is_empty() {
        return Vec::new();
    }
    let n = points.len() as f64;
    let lat_c = points.iter().map(|p| p.lat).sum::<f64>() / n;
    let lon_c = points.iter().map(|p| p.lon).sum::<f64>() / n;
    let lon_scale = KM_PER_DEG_LON * lat_c.to_radians().cos();

    points
        .iter()
        .map(|p| Position::new((p.lon - lon_c) * lon_scale, (p.lat - lat_c) * KM_PER_DEG_LAT))
        .collect()
}

/// Paths to optional dataset files. Missing entries use synthetic data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetsConfig {
    /// JSON array of road intersections (`lat`, `lon`).
    #[serde(default)]
    pub road_network: Option<PathBuf>,

    /// JSON elevation grid.
    #[serde(default)]
    pub terrain: Option<PathBuf>,

    /// JSON array of broadcast station records.
    #[serde(default)]
    pub stations: Option<PathBuf>,
}

/// Broadcast station record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    pub call_sign: String,
    pub lat: f64,
    pub lon: f64,
    /// Effective radiated power (kW).
    pub erp_kw: f64,
    /// Height above average terrain (m).
    pub haat_m: f64,
    #[serde(default)]
    pub channel: Option<u32>,
}

/// Source of receiver positions along a road network.
pub trait RoadNetworkSource: Send + Sync {
    /// Positions in km around the network centroid.
    fn load_positions(&self) -> Result<Vec<Position>>;
}

/// Source of an elevation grid.
pub trait TerrainSource: Send + Sync {
    fn load_grid(&self) -> Result<ElevationGrid>;
}

/// Source of broadcast station records.
pub trait StationSource: Send + Sync {
    fn load_stations(&self) -> Result<Vec<StationRecord>>;
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Dataset(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Dataset(format!("failed to parse {}: {e}", path.display())))
}

/// Road network stored as a JSON array of intersections.
#[derive(Debug, Clone)]
pub struct JsonRoadNetwork {
    path: PathBuf,
}

impl JsonRoadNetwork {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RoadNetworkSource for JsonRoadNetwork {
    fn load_positions(&self) -> Result<Vec<Position>> {
        let intersections: Vec<GeoPoint> = read_json(&self.path)?;
        if intersections.is_empty() {
            return Err(Error::Dataset(format!(
                "{} contains no intersections",
                self.path.display()
            )));
        }
        Ok(project_to_km(&intersections))
    }
}

/// Elevation grid stored as JSON.
#[derive(Debug, Clone)]
pub struct JsonTerrain {
    path: PathBuf,
}

impl JsonTerrain {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TerrainSource for JsonTerrain {
    fn load_grid(&self) -> Result<ElevationGrid> {
        let grid: ElevationGrid = read_json(&self.path)?;
        ElevationGrid::new(grid.min_x_km, grid.min_y_km, grid.cell_km, grid.elevations_m)
    }
}

/// Station list stored as JSON.
#[derive(Debug, Clone)]
pub struct JsonStations {
    path: PathBuf,
}

impl JsonStations {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StationSource for JsonStations {
    fn load_stations(&self) -> Result<Vec<StationRecord>> {
        read_json(&self.path)
    }
}

/// Load and cache terrain, or fall back to the flat model.
pub fn load_terrain(source: Option<&dyn TerrainSource>) -> TerrainModel {
    let Some(source) = source else {
        return TerrainModel::flat();
    };
    match source.load_grid() {
        Ok(grid) => {
            info!(
                "Loaded {}x{} elevation grid",
                grid.elevations_m.nrows(),
                grid.elevations_m.ncols()
            );
            TerrainModel::new(Some(Arc::new(grid)))
        }
        Err(e) => {
            warn!("Terrain unavailable, using flat propagation: {}", e);
            TerrainModel::flat()
        }
    }
}

/// Antenna heights with the transmitter at the first station's HAAT, or the
/// defaults when no usable station is available.
pub fn transmitter_heights(source: Option<&dyn StationSource>) -> AntennaHeights {
    let defaults = AntennaHeights::default();
    let Some(source) = source else {
        return defaults;
    };
    match source.load_stations() {
        Ok(stations) => stations
            .iter()
            .find(|s| s.haat_m.is_finite() && s.haat_m > 0.0)
            .map_or(defaults, |s| {
                info!("Using {} HAAT {:.0} m as transmitter height", s.call_sign, s.haat_m);
                AntennaHeights {
                    tx_m: s.haat_m,
                    ..defaults
                }
            }),
        Err(e) => {
            warn!("Stations unavailable, using default antenna heights: {}", e);
            defaults
        }
    }
}
