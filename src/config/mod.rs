//! Configuration management for Svarog.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::congestion::CongestionConfig;
use crate::drift::DriftConfig;
use crate::environment::EnvironmentConfig;
use crate::error::{Error, Result};
use crate::external::DatasetsConfig;
use crate::optimizer::OptimizerConfig;
use crate::pipeline::ControlConfig;
use crate::policy::PolicyConfig;
use crate::runtime::RuntimeConfig;
use crate::safety::SafetyConfig;
use crate::twin::TwinConfig;
use crate::types::Intent;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Environment restored by a reset.
    #[serde(default)]
    pub environment: EnvironmentConfig,

    /// Coverage digital twin.
    #[serde(default)]
    pub twin: TwinConfig,

    /// Unicast congestion model.
    #[serde(default)]
    pub congestion: CongestionConfig,

    /// Spectrum optimizer.
    #[serde(default)]
    pub optimizer: OptimizerConfig,

    /// Policy controller.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Safety limits.
    #[serde(default)]
    pub safety: SafetyConfig,

    /// Drift detector.
    #[serde(default)]
    pub drift: DriftConfig,

    /// Decision cycle.
    #[serde(default)]
    pub control: ControlConfig,

    /// Background tasks.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Optional dataset files.
    #[serde(default)]
    pub datasets: DatasetsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        let env = &self.environment;
        if !(env.bandwidth_mhz.is_finite() && env.bandwidth_mhz > 0.0) {
            return Err(Error::InvalidConfig(
                "environment.bandwidth_mhz must be positive".into(),
            ));
        }
        if !env.noise_floor_dbm.is_finite() || !env.channel_impairment_db.is_finite() {
            return Err(Error::InvalidConfig(
                "environment noise floor and impairment must be finite".into(),
            ));
        }
        if env.traffic_load < 0.0 {
            return Err(Error::InvalidConfig(
                "environment.traffic_load must not be negative".into(),
            ));
        }

        let twin = &self.twin;
        if !(twin.area_km.is_finite() && twin.area_km > 0.0) {
            return Err(Error::InvalidConfig("twin.area_km must be positive".into()));
        }
        if !(0.0..=1.0).contains(&twin.vehicle_share) {
            return Err(Error::InvalidConfig(
                "twin.vehicle_share must be within 0-1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&twin.random_turn_probability) {
            return Err(Error::InvalidConfig(
                "twin.random_turn_probability must be within 0-1".into(),
            ));
        }
        if !(twin.doppler_penalty_db_per_kmh.is_finite() && twin.doppler_penalty_db_per_kmh >= 0.0) {
            return Err(Error::InvalidConfig(
                "twin.doppler_penalty_db_per_kmh must not be negative".into(),
            ));
        }
        if self.twin.static_points + self.twin.mobile_points == 0 {
            return Err(Error::InvalidConfig(
                "twin needs at least one receiver point".into(),
            ));
        }

        let congestion = &self.congestion;
        if !(0.0..=1.0).contains(&congestion.base_load) || !congestion.fluctuation.is_finite() {
            return Err(Error::InvalidConfig(
                "congestion.base_load must be within 0-1 and fluctuation finite".into(),
            ));
        }

        if self.optimizer.max_slices == 0 {
            return Err(Error::InvalidConfig(
                "optimizer.max_slices must be at least 1".into(),
            ));
        }
        if self.optimizer.min_slice_bandwidth_mhz < 0.0 {
            return Err(Error::InvalidConfig(
                "optimizer.min_slice_bandwidth_mhz must not be negative".into(),
            ));
        }

        if self.safety.authorized_bands.is_empty() {
            return Err(Error::InvalidConfig(
                "safety.authorized_bands must not be empty".into(),
            ));
        }
        if let Some(band) = self.safety.authorized_bands.iter().find(|b| b.min_mhz >= b.max_mhz) {
            return Err(Error::InvalidConfig(format!(
                "safety band {}-{} MHz is empty",
                band.min_mhz, band.max_mhz
            )));
        }

        let drift = &self.drift;
        if drift.window_capacity == 0 || drift.min_samples > drift.window_capacity {
            return Err(Error::InvalidConfig(
                "drift.min_samples must fit within drift.window_capacity".into(),
            ));
        }
        if drift.recent_window == 0 {
            return Err(Error::InvalidConfig(
                "drift.recent_window must be at least 1".into(),
            ));
        }

        if self.control.reference_distance_km <= 0.0 {
            return Err(Error::InvalidConfig(
                "control.reference_distance_km must be positive".into(),
            ));
        }
        if self.control.emergency_gain <= 0.0 || self.control.coverage_gain <= 0.0 {
            return Err(Error::InvalidConfig("slice gains must be positive".into()));
        }
        if let Some(hour) = self.control.hour_of_day {
            if !(0.0..24.0).contains(&hour) {
                return Err(Error::InvalidConfig(format!(
                    "control.hour_of_day {hour} is outside 0-24"
                )));
            }
        }

        if self.runtime.heartbeat_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "runtime.heartbeat_interval must be non-zero".into(),
            ));
        }

        Ok(())
    }

    /// Get default config path.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "svarog", "svarog").map_or_else(
            || PathBuf::from("svarog.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Create example configuration.
    pub fn example() -> Self {
        Self {
            policy: PolicyConfig {
                weights_path: Some(PathBuf::from("models/policy.json")),
                ..Default::default()
            },
            runtime: RuntimeConfig {
                heartbeat_intent: Intent::EmergencyReliability,
                ..Default::default()
            },
            datasets: DatasetsConfig {
                road_network: Some(PathBuf::from("data/road_intersections.json")),
                terrain: Some(PathBuf::from("data/elevation.json")),
                stations: Some(PathBuf::from("data/stations.json")),
            },
            ..Default::default()
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_color(),
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(fmt::layer().with_ansi(config.color).with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.control.frequency_mhz, 600.0);
        assert_eq!(config.safety.max_power_dbm, 46.0);
        assert_eq!(config.runtime.heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svarog.toml");
        std::fs::write(
            &path,
            r#"
[control]
tx_power_dbm = 40.0
hour_of_day = 19.0

[runtime]
heartbeat_interval = "250ms"
heartbeat_intent = "reduce_congestion"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.control.tx_power_dbm, 40.0);
        assert_eq!(config.control.hour_of_day, Some(19.0));
        assert_eq!(config.control.frequency_mhz, 600.0);
        assert_eq!(config.runtime.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(config.runtime.heartbeat_intent, Intent::ReduceCongestion);
        assert_eq!(config.drift.window_capacity, 50);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::example();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.datasets.stations, config.datasets.stations);
        assert_eq!(loaded.runtime.heartbeat_intent, Intent::EmergencyReliability);
        assert_eq!(loaded.safety.authorized_bands.len(), 2);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.environment.bandwidth_mhz = 0.0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::default();
        config.drift.min_samples = 80;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.control.hour_of_day = Some(24.5);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.safety.authorized_bands.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_finite_twin_settings_rejected() {
        let mut config = Config::default();
        config.twin.vehicle_share = f64::NAN;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::default();
        config.twin.random_turn_probability = 1.5;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::default();
        config.twin.area_km = f64::NAN;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::default();
        config.congestion.fluctuation = f64::INFINITY;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_nan_share_never_reaches_the_twin() {
        let mut config = Config::default();
        config.twin.vehicle_share = f64::NAN;
        assert!(matches!(
            crate::pipeline::ControlContext::new(&config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[control\ntx_power_dbm = ").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }
}
