//! Interfaces to collaborators outside the decision core.
//!
//! - Real-world datasets (road network, terrain, stations). Every consumer
//!   tolerates their absence and falls back to synthetic data.
//! - Protocol-table validation, satisfied by an in-process implementation
//!   when no native library is present.

mod datasets;
mod protocol;

pub use datasets::{
    load_terrain, project_to_km, transmitter_heights, DatasetsConfig, GeoPoint, JsonRoadNetwork,
    JsonStations, JsonTerrain, RoadNetworkSource, StationRecord, StationSource, TerrainSource,
};
pub use protocol::{default_validator, InProcessValidator, PlpEntry, ProtocolValidator, MAX_PLPS};
