//! Competing unicast (cellular) network congestion model.
//!
//! Congestion follows a daily load profile plus surges for emergencies,
//! mobility and externally injected shocks. Latency and loss are derived
//! from the congestion level with queuing-style curves, and a baseline
//! offload heuristic suggests how much traffic broadcast should absorb.

use chrono::Timelike;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Unloaded latency (ms).
const BASE_LATENCY_MS: f64 = 20.0;
/// Latency ceiling (ms).
const MAX_LATENCY_MS: f64 = 2000.0;
/// Packet loss ceiling.
const MAX_PACKET_LOSS: f64 = 0.30;
/// Lowest congestion an offload projection may reach.
const MIN_PROJECTED_CONGESTION: f64 = 0.1;
/// Fraction of the offload ratio that actually relieves the unicast network.
const OFFLOAD_EFFECTIVENESS: f64 = 0.7;

const EMERGENCY_SURGE: f64 = 0.4;
const MOBILITY_SURGE: f64 = 0.2;
const HANDOVER_OVERHEAD: f64 = 0.15;

/// Congestion model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongestionConfig {
    /// Load at nominal traffic outside peak hours (0-1).
    #[serde(default = "default_base_load")]
    pub base_load: f64,

    /// Half-width of the random fluctuation added each call.
    #[serde(default = "default_fluctuation")]
    pub fluctuation: f64,

    /// Subscriber count at full congestion.
    #[serde(default = "default_max_users")]
    pub max_users: u64,

    /// Seed for reproducible fluctuation.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_base_load() -> f64 {
    0.35
}
fn default_fluctuation() -> f64 {
    0.05
}
fn default_max_users() -> u64 {
    10_000
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            base_load: default_base_load(),
            fluctuation: default_fluctuation(),
            max_users: default_max_users(),
            seed: None,
        }
    }
}

/// Unicast network state derived from a congestion level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnicastMetrics {
    /// Congestion level (0-1).
    pub congestion: f64,
    pub latency_ms: f64,
    /// Packet loss probability (0-1).
    pub packet_loss: f64,
    pub active_users: u64,
    /// Bandwidth utilization (0-1).
    pub bandwidth_utilization: f64,
}

/// Projected effect of offloading a share of unicast traffic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffloadBenefit {
    pub projected_congestion: f64,
    pub latency_reduction_ms: f64,
    pub packet_loss_reduction: f64,
    pub users_offloaded: u64,
}

/// Latency (ms) at congestion `c`: exponential growth centred on 50 %.
pub fn latency_ms(c: f64) -> f64 {
    (BASE_LATENCY_MS * (1.0 + (10.0 * (c - 0.5)).exp())).min(MAX_LATENCY_MS)
}

/// Packet loss at congestion `c`: near-linear below 50 %, quadratic above.
pub fn packet_loss(c: f64) -> f64 {
    let c = c.clamp(0.0, 1.0);
    let loss = if c <= 0.5 {
        0.001 + 0.02 * c
    } else {
        0.011 + 0.8 * (c - 0.5).powi(2)
    };
    loss.min(MAX_PACKET_LOSS)
}

/// Load multiplier for a time of day (hours, 0-24).
pub fn time_of_day_multiplier(hour: f64) -> f64 {
    let hour = hour.rem_euclid(24.0);
    if (17.0..=21.0).contains(&hour) {
        // Symmetric ramp peaking at 19:00
        1.0 + 0.8 * (1.0 - (hour - 19.0).abs() / 2.0)
    } else if (7.0..9.0).contains(&hour) {
        1.2
    } else if hour < 5.0 {
        0.5
    } else {
        1.0
    }
}

/// Baseline offload ratio for the current unicast state.
pub fn recommend_offload(metrics: &UnicastMetrics) -> f64 {
    offload_ratio_for(metrics.congestion)
}

/// Piecewise-linear offload heuristic over a congestion level.
pub fn offload_ratio_for(c: f64) -> f64 {
    let ratio = if c < 0.3 {
        0.0
    } else if c < 0.5 {
        (c - 0.3) / 0.2 * 0.4
    } else if c < 0.7 {
        0.4 + (c - 0.5) / 0.2 * 0.6
    } else {
        1.0
    };
    ratio.clamp(0.0, 1.0)
}

/// Project the effect of offloading `ratio` of unicast traffic.
pub fn offload_benefit(metrics: &UnicastMetrics, ratio: f64) -> OffloadBenefit {
    let ratio = ratio.clamp(0.0, 1.0);
    let projected = (metrics.congestion * (1.0 - ratio * OFFLOAD_EFFECTIVENESS)).max(MIN_PROJECTED_CONGESTION);

    OffloadBenefit {
        projected_congestion: projected,
        latency_reduction_ms: (metrics.latency_ms - latency_ms(projected)).max(0.0),
        packet_loss_reduction: (metrics.packet_loss - packet_loss(projected)).max(0.0),
        users_offloaded: (metrics.active_users as f64 * ratio).round() as u64,
    }
}

/// The unicast congestion model.
pub struct UnicastModel {
    config: CongestionConfig,
    emergency: bool,
    mobility_surge: bool,
    external_offset: f64,
    traffic_load: f64,
    rng: StdRng,
}

impl UnicastModel {
    pub fn new(config: CongestionConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            emergency: false,
            mobility_surge: false,
            external_offset: 0.0,
            traffic_load: 1.0,
            rng,
        }
    }

    pub fn set_emergency(&mut self, emergency: bool) {
        self.emergency = emergency;
    }

    pub fn set_mobility_surge(&mut self, surge: bool) {
        self.mobility_surge = surge;
    }

    pub fn set_traffic_load(&mut self, load: f64) {
        self.traffic_load = load.max(0.0);
    }

    /// Inject an external congestion shock (added to the computed level).
    pub fn inject_congestion(&mut self, offset: f64) {
        self.external_offset = offset.clamp(-1.0, 1.0);
        debug!("External congestion offset set to {:.2}", self.external_offset);
    }

    /// Clear surges and shocks.
    pub fn reset(&mut self) {
        self.emergency = false;
        self.mobility_surge = false;
        self.external_offset = 0.0;
        self.traffic_load = 1.0;
    }

    /// Current unicast state. `hour` defaults to the local wall clock.
    pub fn congestion(&mut self, hour: Option<f64>, mobile_ratio: f64) -> UnicastMetrics {
        let hour = hour.unwrap_or_else(|| {
            let now = chrono::Local::now();
            f64::from(now.hour()) + f64::from(now.minute()) / 60.0
        });

        let mut level = self.config.base_load * time_of_day_multiplier(hour) * self.traffic_load;
        if self.emergency {
            level += EMERGENCY_SURGE;
        }
        if self.mobility_surge {
            level += MOBILITY_SURGE;
        }
        level += mobile_ratio.clamp(0.0, 1.0) * HANDOVER_OVERHEAD;
        level += self.external_offset;

        let spread = self.config.fluctuation.abs();
        if spread > 0.0 {
            level += self.rng.gen_range(-spread..=spread);
        }

        self.metrics_for(level.clamp(0.0, 1.0))
    }

    /// Metrics for an exact congestion level, without fluctuation.
    pub fn metrics_for(&self, congestion: f64) -> UnicastMetrics {
        let c = congestion.clamp(0.0, 1.0);
        UnicastMetrics {
            congestion: c,
            latency_ms: latency_ms(c),
            packet_loss: packet_loss(c),
            active_users: (c * self.config.max_users as f64).round() as u64,
            bandwidth_utilization: (c * 1.1).min(1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_model() -> UnicastModel {
        UnicastModel::new(CongestionConfig {
            fluctuation: 0.0,
            seed: Some(1),
            ..Default::default()
        })
    }

    #[test]
    fn test_time_of_day_profile() {
        assert!((time_of_day_multiplier(19.0) - 1.8).abs() < 1e-12);
        assert!((time_of_day_multiplier(17.0) - 1.0).abs() < 1e-12);
        assert!((time_of_day_multiplier(18.0) - time_of_day_multiplier(20.0)).abs() < 1e-12);
        assert_eq!(time_of_day_multiplier(8.0), 1.2);
        assert_eq!(time_of_day_multiplier(3.0), 0.5);
        assert_eq!(time_of_day_multiplier(13.0), 1.0);
    }

    #[test]
    fn test_surges_add_up() {
        let mut model = quiet_model();
        let calm = model.congestion(Some(13.0), 0.0).congestion;
        assert!((calm - 0.35).abs() < 1e-12);

        model.set_emergency(true);
        let emergency = model.congestion(Some(13.0), 0.0).congestion;
        assert!((emergency - 0.75).abs() < 1e-12);

        model.set_mobility_surge(true);
        let surge = model.congestion(Some(13.0), 1.0).congestion;
        assert_eq!(surge, 1.0);
    }

    #[test]
    fn test_congestion_is_clamped() {
        let mut model = UnicastModel::new(CongestionConfig {
            seed: Some(9),
            ..Default::default()
        });
        model.inject_congestion(1.0);
        for _ in 0..100 {
            let metrics = model.congestion(Some(19.0), 1.0);
            assert!((0.0..=1.0).contains(&metrics.congestion));
            assert!(metrics.latency_ms <= MAX_LATENCY_MS);
            assert!(metrics.packet_loss <= MAX_PACKET_LOSS);
        }
        model.inject_congestion(-1.0);
        assert_eq!(model.congestion(Some(3.0), 0.0).congestion, 0.0);
    }

    #[test]
    fn test_latency_and_loss_curves() {
        assert!((latency_ms(0.5) - 40.0).abs() < 1e-9);
        assert_eq!(latency_ms(1.0), MAX_LATENCY_MS);
        assert!(latency_ms(0.2) < latency_ms(0.6));

        assert!((packet_loss(0.25) - 0.006).abs() < 1e-12);
        assert!((packet_loss(0.5) - 0.011).abs() < 1e-12);
        assert!((packet_loss(1.0) - 0.211).abs() < 1e-12);
    }

    #[test]
    fn test_recommend_offload_segments() {
        let model = quiet_model();
        assert_eq!(recommend_offload(&model.metrics_for(0.2)), 0.0);
        assert!((recommend_offload(&model.metrics_for(0.4)) - 0.2).abs() < 1e-12);
        assert!((recommend_offload(&model.metrics_for(0.5)) - 0.4).abs() < 1e-12);
        assert!((recommend_offload(&model.metrics_for(0.6)) - 0.7).abs() < 1e-12);
        assert_eq!(recommend_offload(&model.metrics_for(0.7)), 1.0);
        assert_eq!(recommend_offload(&model.metrics_for(0.95)), 1.0);
    }

    #[test]
    fn test_offload_benefit_projection() {
        let metrics = quiet_model().metrics_for(0.8);
        let benefit = offload_benefit(&metrics, 0.6);
        assert!((benefit.projected_congestion - 0.464).abs() < 1e-9);
        assert!(benefit.latency_reduction_ms >= 0.0);
        assert!(benefit.packet_loss_reduction >= 0.0);
        assert_eq!(benefit.users_offloaded, 4800);
    }

    #[test]
    fn test_offload_benefit_floor() {
        let metrics = quiet_model().metrics_for(0.12);
        let benefit = offload_benefit(&metrics, 1.0);
        assert_eq!(benefit.projected_congestion, MIN_PROJECTED_CONGESTION);
        assert!(benefit.latency_reduction_ms >= 0.0);
        assert!(benefit.packet_loss_reduction >= 0.0);
    }
}
