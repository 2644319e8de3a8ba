//! End-to-end decision cycle tests.
//!
//! Drives a seeded [`ControlContext`] through hurdles, proposals, the
//! approval workflow and drift-triggered freezes.

use std::sync::Arc;

use chrono::Utc;

use svarog::approval::ApprovalStatus;
use svarog::config::Config;
use svarog::environment::{EnvironmentState, Hurdle};
use svarog::error::{Error, WorkflowError};
use svarog::pipeline::{ControlContext, ControlMode, ObservedKpis};
use svarog::policy::{HeuristicPolicy, PolicyConfig};
use svarog::types::{Action, Intent, Modulation, SliceKind};

fn seeded_config() -> Config {
    let mut config = Config::default();
    config.twin.seed = Some(42);
    config.congestion.seed = Some(42);
    config.congestion.fluctuation = 0.0;
    config.control.hour_of_day = Some(12.0);
    config.policy.seed = Some(42);
    config
}

fn context() -> ControlContext {
    ControlContext::new(&seeded_config()).unwrap()
}

fn heuristic_context() -> ControlContext {
    context().with_policy(Arc::new(HeuristicPolicy::new(PolicyConfig::default())))
}

/// Feedback matching the twin's prediction, shifted by `snr_offset_db`.
fn feedback(ctx: &ControlContext, snr_offset_db: f64) -> ObservedKpis {
    let predicted = ctx.predict_kpis().unwrap();
    ObservedKpis {
        coverage_pct: predicted.coverage_pct,
        snr_db: predicted.snr_db + snr_offset_db,
        packets_received: 1000,
        received_at: Utc::now(),
    }
}

// ============================================================================
// Hurdles
// ============================================================================

#[test]
fn test_interference_only_moves_noise_floor() {
    let ctx = context();
    let before = ctx.environment();

    let description = ctx.apply_hurdle(Hurdle::Interference);
    assert!(description.contains("-85.0"));

    let after = ctx.environment();
    assert_eq!(after.noise_floor_dbm, -85.0);
    assert_eq!(after.bandwidth_mhz, before.bandwidth_mhz);
    assert_eq!(after.channel_impairment_db, before.channel_impairment_db);
    assert_eq!(after.traffic_load, before.traffic_load);
    assert_eq!(after.emergency, before.emergency);
}

#[test]
fn test_coverage_drop_lowers_coverage() {
    let ctx = context();
    let action = Action::new(0.0, 0.0, 0.0);

    let clear = ctx.evaluate(&action, Intent::Balanced).unwrap();
    ctx.apply_hurdle(Hurdle::CoverageDrop);
    let impaired = ctx.evaluate(&action, Intent::Balanced).unwrap();

    assert!(impaired.coverage_pct < clear.coverage_pct);
    // The impairment also shifts water-filled power away from the weaker slice.
    assert!(clear.avg_snr_db - impaired.avg_snr_db >= 10.0 - 1e-9);
}

#[test]
fn test_every_hurdle_then_reset() {
    let ctx = context();
    for hurdle in Hurdle::ALL {
        ctx.apply_hurdle(hurdle);
    }
    let stressed = ctx.environment();
    assert!(stressed.emergency);
    assert_eq!(stressed.bandwidth_mhz, 3.0);
    assert_eq!(stressed.traffic_load, 2.5);

    ctx.reset_environment();
    assert_eq!(ctx.environment(), EnvironmentState::default());
    assert_eq!(ctx.mode(), ControlMode::Active);
}

#[test]
fn test_unknown_hurdle_rejected() {
    let ctx = context();
    assert!(matches!(
        ctx.apply_hurdle_named("solar_flare"),
        Err(Error::UnknownHurdle(_))
    ));
    assert_eq!(ctx.environment(), EnvironmentState::default());
}

// ============================================================================
// Evaluation
// ============================================================================

#[test]
fn test_offload_never_raises_congestion() {
    let ctx = context();
    ctx.apply_hurdle(Hurdle::TrafficSurge);

    let none = ctx.evaluate(&Action::new(0.0, 0.0, 0.0), Intent::ReduceCongestion).unwrap();
    let full = ctx.evaluate(&Action::new(0.0, 0.0, 1.0), Intent::ReduceCongestion).unwrap();

    assert_eq!(none.unicast_congestion, full.unicast_congestion);
    assert!(full.effective_congestion <= none.effective_congestion);
    assert!(full.latency_ms <= none.latency_ms);
    assert!(full.users_offloaded > 0);
}

#[test]
fn test_spectrum_reduction_keeps_allocation_within_channel() {
    let ctx = heuristic_context();
    ctx.apply_hurdle(Hurdle::SpectrumReduction);

    let outcome = ctx.propose_and_validate(Intent::Balanced).unwrap();
    let used: f64 = outcome.config.slices.iter().map(|s| s.bandwidth_mhz).sum();
    assert!(used <= 3.0 + 1e-9);
    assert!(outcome
        .config
        .slices
        .iter()
        .all(|s| s.bandwidth_mhz >= 0.25 - 1e-9));
}

// ============================================================================
// Proposals and approval
// ============================================================================

#[test]
fn test_proposal_reports_clamps_and_drift() {
    let ctx = context();
    let outcome = ctx.propose_and_validate(Intent::from_text("keep alerts reliable")).unwrap();

    assert_eq!(outcome.intent, Intent::EmergencyReliability);
    assert_eq!(outcome.status, ControlMode::Active);
    assert!(!outcome.drift.is_drifting);
    assert_eq!(outcome.drift.sample_count, 0);
    assert!(outcome.config.emergency_weight >= 0.5);
    assert!((0.0..=1.0).contains(&outcome.safe_action.offload_ratio));
    assert_eq!(outcome.config.slices.len(), 2);

    let record = ctx.record(outcome.approval_record_id.unwrap()).unwrap();
    assert_eq!(record.status, ApprovalStatus::AwaitingHumanApproval);
    assert_eq!(record.config, outcome.config);
}

#[test]
fn test_approve_then_terminal() {
    let ctx = heuristic_context();
    let outcome = ctx.propose_and_validate(Intent::MaximizeCoverage).unwrap();
    let id = outcome.approval_record_id.unwrap();

    let record = ctx.approve(id, "engineer", Some("looks good")).unwrap();
    assert_eq!(record.status, ApprovalStatus::Deployed);
    assert!(record
        .history
        .iter()
        .any(|t| t.to == ApprovalStatus::EngineerApproved && t.actor == "engineer"));
    assert_eq!(ctx.baseline().coverage_weight, outcome.config.coverage_weight);

    assert!(matches!(
        ctx.reject(id, "engineer", None),
        Err(Error::Workflow(WorkflowError::TerminalRecord { .. }))
    ));
    assert!(ctx.list_pending().is_empty());
}

#[test]
fn test_reject_leaves_baseline() {
    let ctx = heuristic_context();
    let before = ctx.baseline();
    let outcome = ctx.propose_and_validate(Intent::ReduceCongestion).unwrap();

    let record = ctx
        .reject(outcome.approval_record_id.unwrap(), "engineer", Some("too aggressive"))
        .unwrap();
    assert_eq!(record.status, ApprovalStatus::Rejected);
    assert_eq!(ctx.baseline(), before);
}

#[test]
fn test_emergency_override_requires_emergency() {
    let mut config = seeded_config();
    config.control.auto_submit = false;
    let ctx = ControlContext::new(&config)
        .unwrap()
        .with_policy(Arc::new(HeuristicPolicy::new(PolicyConfig::default())));

    let outcome = ctx.propose_and_validate(Intent::EmergencyReliability).unwrap();
    let id = outcome.approval_record_id.unwrap();
    assert_eq!(ctx.record(id).unwrap().status, ApprovalStatus::AiRecommended);

    assert!(matches!(
        ctx.emergency_override(id, "duty-officer", None),
        Err(Error::Workflow(WorkflowError::OverrideNotPermitted))
    ));
    assert_eq!(ctx.record(id).unwrap().status, ApprovalStatus::AiRecommended);

    ctx.apply_hurdle(Hurdle::EmergencyEscalation);
    let record = ctx.emergency_override(id, "duty-officer", Some("alert in progress")).unwrap();
    assert_eq!(record.status, ApprovalStatus::EmergencyOverride);
    assert!(!record.passed_review());
    assert_eq!(ctx.baseline().emergency_weight, outcome.config.emergency_weight);
}

#[test]
fn test_emergency_proposals_stay_open_for_override() {
    let ctx = heuristic_context();
    ctx.apply_hurdle(Hurdle::EmergencyEscalation);

    let outcome = ctx.propose_and_validate(Intent::EmergencyReliability).unwrap();
    let id = outcome.approval_record_id.unwrap();
    assert_eq!(ctx.record(id).unwrap().status, ApprovalStatus::AiRecommended);

    // The ordinary path still needs review first.
    assert!(matches!(
        ctx.approve(id, "engineer", None),
        Err(Error::Workflow(WorkflowError::InvalidTransition { .. }))
    ));
    let record = ctx.emergency_override(id, "duty-officer", None).unwrap();
    assert_eq!(record.status, ApprovalStatus::EmergencyOverride);
}

#[test]
fn test_emergency_slice_stays_robust() {
    let ctx = heuristic_context();
    ctx.apply_hurdle(Hurdle::EmergencyEscalation);

    let outcome = ctx.propose_and_validate(Intent::EmergencyReliability).unwrap();
    for slice in &outcome.config.slices {
        assert!(slice.modcod.modulation <= Modulation::Qam16);
    }
    assert!(outcome.config.slice(SliceKind::Emergency).is_some());
}

// ============================================================================
// Drift and freeze
// ============================================================================

#[test]
fn test_matching_feedback_never_freezes() {
    let ctx = heuristic_context();
    for _ in 0..8 {
        ctx.record_feedback(feedback(&ctx, 0.0));
        let outcome = ctx.propose_and_validate(Intent::Balanced).unwrap();
        assert_eq!(outcome.status, ControlMode::Active);
        assert!(!outcome.drift.is_drifting);
    }
    assert_eq!(ctx.drift_status().sample_count, 8);
}

#[test]
fn test_drift_freezes_until_cleared() {
    let ctx = heuristic_context();

    // Four samples stay below the minimum window.
    for _ in 0..4 {
        ctx.record_feedback(feedback(&ctx, -20.0));
        let outcome = ctx.propose_and_validate(Intent::Balanced).unwrap();
        assert_eq!(outcome.status, ControlMode::Active);
        assert!(outcome.approval_record_id.is_some());
    }

    ctx.record_feedback(feedback(&ctx, -20.0));
    let frozen = ctx.propose_and_validate(Intent::Balanced).unwrap();
    assert!(frozen.is_frozen());
    assert!(frozen.drift.is_drifting);
    assert!(frozen.approval_record_id.is_none());
    assert!(frozen.warnings.iter().any(|w| w.contains("AI frozen")));
    assert_eq!(ctx.list_pending().len(), 4);

    // Stays frozen without new feedback.
    assert_eq!(ctx.propose_and_validate(Intent::Balanced).unwrap().status, ControlMode::AiFrozen);

    ctx.clear_freeze("engineer");
    assert_eq!(ctx.mode(), ControlMode::Active);
    assert_eq!(ctx.drift_status().sample_count, 0);
    let resumed = ctx.propose_and_validate(Intent::Balanced).unwrap();
    assert!(resumed.approval_record_id.is_some());
}
