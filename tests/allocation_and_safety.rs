//! Allocation, safety clamp and drift scoring tests.

use ndarray::array;

use svarog::congestion::{offload_benefit, CongestionConfig, UnicastModel};
use svarog::drift::{DriftConfig, DriftDetector, KpiSample};
use svarog::error::{AllocationError, Error};
use svarog::optimizer::{ChannelBudget, SliceRequest, SpectrumOptimizer};
use svarog::propagation::{path_loss, received_power, AntennaHeights};
use svarog::safety::{
    ProposedConfig, SafetyContext, SafetyLayer, SafetyWarning, SliceSetting,
};
use svarog::types::{CodingRate, ModCod, Modulation, SliceKind};

fn budget() -> ChannelBudget {
    ChannelBudget {
        total_power_dbm: 40.0,
        bandwidth_mhz: 6.0,
        noise_floor_dbm: -100.0,
        reference_path_loss_db: 125.0,
    }
}

fn proposal(power_dbm: f64, frequency_mhz: f64, modulation: Modulation) -> ProposedConfig {
    ProposedConfig {
        power_dbm,
        frequency_mhz,
        emergency_weight: 1.0,
        coverage_weight: 1.0,
        offload_ratio: 0.2,
        slices: vec![
            SliceSetting {
                kind: SliceKind::Emergency,
                modulation: modulation.into(),
                coding_rate: CodingRate::R3_4,
                bandwidth_mhz: 3.0,
            },
            SliceSetting {
                kind: SliceKind::Coverage,
                modulation: Modulation::Qpsk.into(),
                coding_rate: CodingRate::R1_2,
                bandwidth_mhz: 3.0,
            },
        ],
    }
}

// ============================================================================
// Propagation
// ============================================================================

#[test]
fn test_vector_loss_matches_scalar() {
    let heights = AntennaHeights::default();
    let distances = [0.5, 2.0, 7.5, 20.0];

    let from_slice = path_loss(600.0, &distances[..], heights).unwrap();
    let from_array = path_loss(600.0, &array![0.5, 2.0, 7.5, 20.0], heights).unwrap();

    for (i, d) in distances.iter().enumerate() {
        let scalar = path_loss(600.0, d, heights).unwrap();
        assert!((from_slice[i] - scalar).abs() < 1e-12);
        assert!((from_array[i] - scalar).abs() < 1e-12);
    }
    assert!(from_slice.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_received_power_is_tx_minus_loss() {
    let heights = AntennaHeights::default();
    let loss = path_loss(600.0, &10.0, heights).unwrap();
    let rx = received_power(43.0, 600.0, &10.0, heights).unwrap();
    assert!((rx - (43.0 - loss)).abs() < 1e-12);
}

#[test]
fn test_negative_distance_rejected() {
    let heights = AntennaHeights::default();
    assert!(matches!(
        path_loss(600.0, &[1.0, -2.0][..], heights),
        Err(Error::InvalidParameter(_))
    ));
}

// ============================================================================
// Spectrum optimizer
// ============================================================================

#[test]
fn test_allocation_within_budgets() {
    let optimizer = SpectrumOptimizer::default();
    let slices = vec![
        SliceRequest::new(SliceKind::Emergency, 2.0, 0.9),
        SliceRequest::new(SliceKind::Coverage, 1.0, 0.6),
    ];
    let allocation = optimizer.allocate(&slices, &budget()).unwrap();

    assert!((allocation.total_bandwidth_mhz - 6.0).abs() < 1e-9);
    assert!(allocation.total_power_mw <= allocation.power_budget_mw * (1.0 + 1e-9));
    for slice in &allocation.slices {
        assert!(slice.power_mw >= 0.0);
        assert!(slice.throughput_mbps <= slice.capacity_mbps + 1e-9);
    }
}

#[test]
fn test_bandwidth_shortage_is_an_error() {
    let optimizer = SpectrumOptimizer::default();
    let tight = ChannelBudget {
        bandwidth_mhz: 0.4,
        ..budget()
    };
    let slices = vec![
        SliceRequest::new(SliceKind::Emergency, 1.0, 0.9),
        SliceRequest::new(SliceKind::Coverage, 1.0, 0.6),
    ];
    assert!(matches!(
        optimizer.allocate(&slices, &tight),
        Err(AllocationError::BandwidthBudget { .. })
    ));
}

// ============================================================================
// Safety layer
// ============================================================================

#[test]
fn test_power_clamped_to_ceiling() {
    let layer = SafetyLayer::default();
    let (safe, warnings) = layer
        .validate(&proposal(50.0, 600.0, Modulation::Qpsk), &SafetyContext::default())
        .unwrap();

    assert_eq!(safe.power_dbm, 46.0);
    assert!(warnings.iter().any(|w| matches!(
        w,
        SafetyWarning::PowerCeiling { requested_dbm, ceiling_dbm }
            if *requested_dbm == 50.0 && *ceiling_dbm == 46.0
    )));
}

#[test]
fn test_infinite_power_clamped_to_ceiling() {
    let layer = SafetyLayer::default();
    let (safe, warnings) = layer
        .validate(&proposal(f64::INFINITY, 600.0, Modulation::Qpsk), &SafetyContext::default())
        .unwrap();

    assert_eq!(safe.power_dbm, 46.0);
    assert!(warnings
        .iter()
        .any(|w| matches!(w, SafetyWarning::PowerCeiling { ceiling_dbm, .. } if *ceiling_dbm == 46.0)));
}

#[test]
fn test_unauthorized_frequency_rejected() {
    let layer = SafetyLayer::default();
    assert!(matches!(
        layer.validate(&proposal(40.0, 300.0, Modulation::Qpsk), &SafetyContext::default()),
        Err(Error::UnsafeState(_))
    ));
}

#[test]
fn test_emergency_downgrades_fragile_modulation() {
    let layer = SafetyLayer::default();
    let context = SafetyContext { emergency: true };
    let (safe, warnings) = layer
        .validate(&proposal(40.0, 600.0, Modulation::Qam256), &context)
        .unwrap();

    let emergency = safe.slice(SliceKind::Emergency).unwrap();
    assert_eq!(emergency.modcod, ModCod::new(Modulation::Qam16, CodingRate::R3_4));
    assert!(warnings.iter().any(|w| matches!(
        w,
        SafetyWarning::EmergencyDowngrade { from: Modulation::Qam256, to: Modulation::Qam16, .. }
    )));

    // Outside an emergency the same request passes untouched.
    let (calm, _) = layer
        .validate(&proposal(40.0, 600.0, Modulation::Qam256), &SafetyContext::default())
        .unwrap();
    assert_eq!(calm.slice(SliceKind::Emergency).unwrap().modcod.modulation, Modulation::Qam256);
}

#[test]
fn test_unrecognized_modulation_falls_back() {
    let layer = SafetyLayer::default();
    let mut proposed = proposal(40.0, 600.0, Modulation::Qpsk);
    proposed.slices[1].modulation = "8PSK".into();

    let (safe, warnings) = layer.validate(&proposed, &SafetyContext::default()).unwrap();
    assert_eq!(
        safe.slice(SliceKind::Coverage).unwrap().modcod.modulation,
        Modulation::MOST_ROBUST
    );
    assert!(warnings
        .iter()
        .any(|w| matches!(w, SafetyWarning::UnrecognizedModulation { .. })));
}

// ============================================================================
// Congestion and drift
// ============================================================================

#[test]
fn test_offload_projection() {
    let model = UnicastModel::new(CongestionConfig::default());
    let metrics = model.metrics_for(0.8);
    let benefit = offload_benefit(&metrics, 0.6);

    assert!((benefit.projected_congestion - 0.464).abs() < 1e-9);
    assert!(benefit.latency_reduction_ms > 0.0);
    assert!(benefit.packet_loss_reduction > 0.0);
}

#[test]
fn test_drift_neutral_below_minimum() {
    let mut detector = DriftDetector::new(DriftConfig::default());
    let predicted = KpiSample { coverage_pct: 90.0, snr_db: 20.0, reward: 0.5 };
    let observed = KpiSample { coverage_pct: 40.0, snr_db: 0.0, reward: -1.0 };

    for _ in 0..4 {
        detector.add_sample(&predicted, &observed);
    }
    let metrics = detector.detect();
    assert!(!metrics.is_drifting);
    assert_eq!(metrics.sample_count, 4);
    assert_eq!(metrics.composite_score, 0.0);

    detector.add_sample(&predicted, &observed);
    assert!(detector.detect().is_drifting);
}

#[test]
fn test_zero_residuals_never_drift() {
    let mut detector = DriftDetector::default();
    for _ in 0..60 {
        detector.add_residuals(0.0, 0.0, 0.0);
    }
    let metrics = detector.detect();
    assert_eq!(detector.len(), 50);
    assert!(!metrics.is_drifting);
    assert_eq!(metrics.composite_score, 0.0);
}
