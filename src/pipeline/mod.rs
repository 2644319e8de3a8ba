//! The decision pipeline.
//!
//! [`ControlContext`] owns every piece of process-wide state (environment,
//! twin, congestion model, drift detector, approval store, deployed
//! baseline) and is passed by reference to whoever drives a cycle: the CLI,
//! the heartbeat task, or an embedding service.
//!
//! One cycle runs strictly in order:
//!
//! ```text
//! environment snapshot ─▶ policy ─▶ allocation ─▶ twin + unicast ─▶ safety ─▶ drift ─▶ approval
//! ```
//!
//! Concurrent cycles are not serialized against each other. Each stage only
//! holds its own lock while it runs, and every stage works on the
//! environment snapshot taken at the start of the cycle.

mod report;

pub use report::{ControlMode, KpiReport, ObservedKpis, ProposalOutcome};

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::approval::{ApprovalRecord, ApprovalStatus, ApprovalWorkflow};
use crate::config::Config;
use crate::congestion::{offload_benefit, UnicastMetrics, UnicastModel};
use crate::drift::{DriftDetector, DriftMetrics, KpiSample};
use crate::environment::{EnvironmentConfig, EnvironmentState, Hurdle};
use crate::error::Result;
use crate::external::{
    default_validator, load_terrain, transmitter_heights, JsonRoadNetwork, JsonStations,
    JsonTerrain, ProtocolValidator, StationSource, TerrainSource,
};
use crate::optimizer::{
    Allocation, ChannelBudget, SliceConfig, SliceRequest, SpectrumOptimizer, MODCOD_TABLE,
};
use crate::policy::{build_policy, InferenceMode, PolicyController, PolicyFlag};
use crate::propagation::path_loss;
use crate::safety::{ModulationRequest, ProposedConfig, SafeConfig, SafetyContext, SafetyLayer, SliceSetting};
use crate::twin::{CoverageTwin, LinkBudget};
use crate::types::{Action, Intent, Observation, RecordId, SliceKind};

/// Actor recorded when the pipeline submits its own proposals.
pub const PIPELINE_ACTOR: &str = "svarog";

/// Smallest weight handed to the optimizer.
const MIN_SLICE_WEIGHT: f64 = 0.01;

/// Decision-cycle parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Transmitter power (dBm).
    #[serde(default = "default_tx_power")]
    pub tx_power_dbm: f64,

    /// Carrier frequency (MHz).
    #[serde(default = "default_frequency")]
    pub frequency_mhz: f64,

    /// SNR needed for a receiver to count as covered (dB).
    #[serde(default = "default_min_snr")]
    pub min_snr_db: f64,

    /// Distance of the reference receiver used for slice SNR (km).
    #[serde(default = "default_reference_distance")]
    pub reference_distance_km: f64,

    /// Channel-gain factor of the emergency slice.
    #[serde(default = "default_emergency_gain")]
    pub emergency_gain: f64,

    /// Channel-gain factor of the coverage slice.
    #[serde(default = "default_coverage_gain")]
    pub coverage_gain: f64,

    /// Slice weights and offload ratio before anything is deployed.
    #[serde(default = "default_weight")]
    pub initial_emergency_weight: f64,

    #[serde(default = "default_weight")]
    pub initial_coverage_weight: f64,

    #[serde(default)]
    pub initial_offload_ratio: f64,

    /// Fixed hour of day for the congestion model; wall clock when unset.
    #[serde(default)]
    pub hour_of_day: Option<f64>,

    /// Move new proposals straight to human review. Ignored while an
    /// emergency is active.
    #[serde(default = "default_auto_submit")]
    pub auto_submit: bool,
}

fn default_tx_power() -> f64 { 35.0 }
fn default_frequency() -> f64 { 600.0 }
fn default_min_snr() -> f64 { 15.0 }
fn default_reference_distance() -> f64 { 1.0 }
fn default_emergency_gain() -> f64 { 0.9 }
fn default_coverage_gain() -> f64 { 0.6 }
fn default_weight() -> f64 { 1.0 }
fn default_auto_submit() -> bool { true }

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tx_power_dbm: default_tx_power(),
            frequency_mhz: default_frequency(),
            min_snr_db: default_min_snr(),
            reference_distance_km: default_reference_distance(),
            emergency_gain: default_emergency_gain(),
            coverage_gain: default_coverage_gain(),
            initial_emergency_weight: default_weight(),
            initial_coverage_weight: default_weight(),
            initial_offload_ratio: 0.0,
            hour_of_day: None,
            auto_submit: default_auto_submit(),
        }
    }
}

/// The configuration currently live on air.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub emergency_weight: f64,
    pub coverage_weight: f64,
    pub offload_ratio: f64,
}

impl Baseline {
    fn from_config(config: &ControlConfig) -> Self {
        Self {
            emergency_weight: config.initial_emergency_weight,
            coverage_weight: config.initial_coverage_weight,
            offload_ratio: config.initial_offload_ratio,
        }
    }

    fn from_safe(config: &SafeConfig) -> Self {
        Self {
            emergency_weight: config.emergency_weight,
            coverage_weight: config.coverage_weight,
            offload_ratio: config.offload_ratio,
        }
    }
}

/// Everything a candidate action was judged on.
struct Assessment {
    report: KpiReport,
    allocation: Allocation,
}

/// Shared state and stages of the control loop.
pub struct ControlContext {
    config: ControlConfig,
    environment_defaults: EnvironmentConfig,
    environment: RwLock<EnvironmentState>,
    twin: Mutex<CoverageTwin>,
    unicast: Mutex<UnicastModel>,
    optimizer: SpectrumOptimizer,
    policy: Arc<dyn PolicyController>,
    inference_mode: InferenceMode,
    safety: SafetyLayer,
    drift: Mutex<DriftDetector>,
    approvals: ApprovalWorkflow,
    validator: Arc<dyn ProtocolValidator>,
    baseline: RwLock<Baseline>,
    last_action: RwLock<Option<Action>>,
    last_intent: RwLock<Intent>,
    feedback: RwLock<Option<ObservedKpis>>,
    mode: RwLock<ControlMode>,
}

impl ControlContext {
    /// Build a context from configuration, loading whatever datasets are
    /// configured and falling back to synthetic data for the rest.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        let datasets = &config.datasets;
        let terrain_source = datasets.terrain.as_ref().map(|p| JsonTerrain::new(p));
        let terrain = load_terrain(terrain_source.as_ref().map(|s| s as &dyn TerrainSource));
        let station_source = datasets.stations.as_ref().map(|p| JsonStations::new(p));
        let heights =
            transmitter_heights(station_source.as_ref().map(|s| s as &dyn StationSource));
        let twin = match &datasets.road_network {
            Some(path) => CoverageTwin::from_road_network(config.twin.clone(), &JsonRoadNetwork::new(path)),
            None => CoverageTwin::new(config.twin.clone()),
        }
        .with_terrain(terrain)
        .with_heights(heights);

        Ok(Self {
            config: config.control.clone(),
            environment_defaults: config.environment.clone(),
            environment: RwLock::new(EnvironmentState::from_config(&config.environment)),
            twin: Mutex::new(twin),
            unicast: Mutex::new(UnicastModel::new(config.congestion.clone())),
            optimizer: SpectrumOptimizer::new(config.optimizer.clone()),
            policy: build_policy(&config.policy),
            inference_mode: config.policy.mode,
            safety: SafetyLayer::new(config.safety.clone()),
            drift: Mutex::new(DriftDetector::new(config.drift.clone())),
            approvals: ApprovalWorkflow::new(),
            validator: default_validator(),
            baseline: RwLock::new(Baseline::from_config(&config.control)),
            last_action: RwLock::new(None),
            last_intent: RwLock::new(Intent::default()),
            feedback: RwLock::new(None),
            mode: RwLock::new(ControlMode::Active),
        })
    }

    /// Replace the policy controller.
    pub fn with_policy(mut self, policy: Arc<dyn PolicyController>) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the protocol-table validator.
    pub fn with_validator(mut self, validator: Arc<dyn ProtocolValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    pub fn validator_name(&self) -> &'static str {
        self.validator.name()
    }

    /// Point-in-time copy of the environment.
    pub fn environment(&self) -> EnvironmentState {
        self.environment.read().clone()
    }

    pub fn mode(&self) -> ControlMode {
        *self.mode.read()
    }

    pub fn baseline(&self) -> Baseline {
        *self.baseline.read()
    }

    pub fn last_action(&self) -> Option<Action> {
        *self.last_action.read()
    }

    pub fn latest_feedback(&self) -> Option<ObservedKpis> {
        *self.feedback.read()
    }

    pub fn drift_status(&self) -> DriftMetrics {
        self.drift.lock().detect()
    }

    // ========================================================================
    // Environment
    // ========================================================================

    /// Apply a hurdle and describe the change.
    pub fn apply_hurdle(&self, hurdle: Hurdle) -> String {
        let mut env = self.environment.write();
        let (next, description) = env.with_hurdle(hurdle);
        *env = next;
        info!("Hurdle {} applied: {}", hurdle, description);
        description
    }

    /// Apply a hurdle by name.
    pub fn apply_hurdle_named(&self, name: &str) -> Result<String> {
        Ok(self.apply_hurdle(name.parse()?))
    }

    /// Restore environment defaults and clear all loop state.
    pub fn reset_environment(&self) {
        *self.environment.write() = EnvironmentState::from_config(&self.environment_defaults);
        self.unicast.lock().reset();
        self.drift.lock().reset();
        *self.baseline.write() = Baseline::from_config(&self.config);
        *self.last_action.write() = None;
        *self.feedback.write() = None;
        *self.mode.write() = ControlMode::Active;
        info!("Environment reset to defaults");
    }

    /// Advance receiver mobility.
    pub fn tick(&self, dt_seconds: f64) {
        self.twin.lock().tick(dt_seconds);
    }

    /// Store receiver feedback for the next drift comparison.
    pub fn record_feedback(&self, observed: ObservedKpis) {
        debug!(
            "Feedback: coverage {:.1}%, snr {:.1} dB",
            observed.coverage_pct, observed.snr_db
        );
        *self.feedback.write() = Some(observed);
    }

    /// Leave the frozen mode after human review. Drift windows start over.
    pub fn clear_freeze(&self, actor: &str) {
        self.drift.lock().reset();
        *self.mode.write() = ControlMode::Active;
        info!("AI freeze cleared by {}", actor);
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Observation the policy sees for the current environment and baseline.
    pub fn observation(&self) -> Result<Observation> {
        let env = self.environment();
        self.observe(&env)
    }

    fn observe(&self, env: &EnvironmentState) -> Result<Observation> {
        let baseline = self.baseline();
        let (coverage, mobile_ratio, velocity_norm) = {
            let twin = self.twin.lock();
            (
                twin.evaluate(&self.link_budget(env))?,
                twin.mobile_ratio(),
                twin.velocity_norm(),
            )
        };
        let congestion = self.unicast_metrics(env, mobile_ratio).congestion;

        Ok(Observation {
            coverage_pct: coverage.coverage_pct,
            avg_snr_db: coverage.mean_snr_db,
            emergency_weight: baseline.emergency_weight,
            coverage_weight: baseline.coverage_weight,
            congestion,
            mobile_ratio,
            velocity_norm,
        })
    }

    /// KPIs the twin predicts for `action` applied to the baseline.
    pub fn evaluate(&self, action: &Action, intent: Intent) -> Result<KpiReport> {
        let env = self.environment();
        Ok(self.assess(&env, &action.clamped(), intent)?.report)
    }

    /// KPIs of the deployed baseline, as the twin predicts them.
    pub fn predict_kpis(&self) -> Result<KpiSample> {
        let env = self.environment();
        let intent = *self.last_intent.read();
        Ok(self.assess(&env, &self.baseline_action(), intent)?.report.drift_sample())
    }

    /// The deployed baseline expressed as an action: no weight changes.
    fn baseline_action(&self) -> Action {
        Action::new(0.0, 0.0, self.baseline().offload_ratio)
    }

    fn link_budget(&self, env: &EnvironmentState) -> LinkBudget {
        LinkBudget {
            tx_power_dbm: self.config.tx_power_dbm,
            freq_mhz: self.config.frequency_mhz,
            min_snr_db: self.config.min_snr_db,
            noise_floor_dbm: env.noise_floor_dbm,
            impairment_db: env.channel_impairment_db,
        }
    }

    fn unicast_metrics(&self, env: &EnvironmentState, mobile_ratio: f64) -> UnicastMetrics {
        let mut unicast = self.unicast.lock();
        unicast.set_emergency(env.emergency);
        unicast.set_traffic_load(env.traffic_load);
        unicast.congestion(self.config.hour_of_day, mobile_ratio)
    }

    fn slice_requests(&self, emergency_weight: f64, coverage_weight: f64) -> Vec<SliceRequest> {
        vec![
            SliceRequest::new(SliceKind::Emergency, emergency_weight, self.config.emergency_gain),
            SliceRequest::new(SliceKind::Coverage, coverage_weight, self.config.coverage_gain),
        ]
    }

    fn assess(&self, env: &EnvironmentState, action: &Action, intent: Intent) -> Result<Assessment> {
        let baseline = self.baseline();
        let emergency_weight =
            (baseline.emergency_weight + action.delta_emergency_weight).max(MIN_SLICE_WEIGHT);
        let coverage_weight =
            (baseline.coverage_weight + action.delta_coverage_weight).max(MIN_SLICE_WEIGHT);

        let link = self.link_budget(env);
        let (allocation, coverage, alert_reliability, mobile_ratio) = {
            let twin = self.twin.lock();
            let reference_loss =
                path_loss(self.config.frequency_mhz, &self.config.reference_distance_km, twin.heights())?;
            let allocation = self.optimizer.allocate(
                &self.slice_requests(emergency_weight, coverage_weight),
                &ChannelBudget {
                    total_power_dbm: self.config.tx_power_dbm,
                    bandwidth_mhz: env.bandwidth_mhz,
                    noise_floor_dbm: env.noise_floor_dbm,
                    reference_path_loss_db: reference_loss + env.channel_impairment_db,
                },
            )?;
            // Coverage KPIs follow the power the coverage slice actually received.
            let coverage = match allocation.slice(SliceKind::Coverage) {
                Some(slice) => twin.evaluate(&slice_link(slice, &allocation, &link))?,
                None => twin.evaluate(&link)?,
            };
            let alert_reliability = match allocation.slice(SliceKind::Emergency) {
                Some(slice) => slice_decodability(&twin, slice, &allocation, &link)?,
                None => 0.0,
            };
            (allocation, coverage, alert_reliability, twin.mobile_ratio())
        };

        let metrics = self.unicast_metrics(env, mobile_ratio);
        let benefit = offload_benefit(&metrics, action.offload_ratio);
        let effective_congestion = benefit.projected_congestion.min(metrics.congestion);

        let max_efficiency = MODCOD_TABLE.iter().map(|op| op.efficiency()).fold(0.0, f64::max);
        let efficiency_score = (allocation.spectral_efficiency() / max_efficiency).clamp(0.0, 1.0);
        let weights = intent.reward_weights();
        let reward = weights.coverage * coverage.coverage_pct / 100.0
            + weights.reliability * alert_reliability
            + weights.congestion * (1.0 - effective_congestion)
            + weights.efficiency * efficiency_score;

        let report = KpiReport {
            coverage_pct: coverage.coverage_pct,
            static_coverage_pct: coverage.static_coverage_pct,
            mobile_coverage_pct: coverage.mobile_coverage_pct,
            alert_reliability,
            avg_snr_db: coverage.mean_snr_db,
            min_snr_db: coverage.min_snr_db,
            latency_ms: metrics.latency_ms - benefit.latency_reduction_ms,
            packet_loss: metrics.packet_loss - benefit.packet_loss_reduction,
            spectral_efficiency: allocation.spectral_efficiency(),
            unicast_congestion: metrics.congestion,
            effective_congestion,
            offload_ratio: action.offload_ratio,
            users_offloaded: benefit.users_offloaded,
            emergency_weight,
            coverage_weight,
            reward,
        };

        Ok(Assessment { report, allocation })
    }

    // ========================================================================
    // Decision cycle
    // ========================================================================

    /// Run one full decision cycle for an operator intent.
    ///
    /// The proposal is always returned with its clamps and drift verdict.
    /// It only enters the approval workflow while the loop is active.
    pub fn propose_and_validate(&self, intent: Intent) -> Result<ProposalOutcome> {
        *self.last_intent.write() = intent;
        let env = self.environment();

        let observation = self.observe(&env)?;
        let introspection = self.policy.introspect(&observation, self.inference_mode);
        let action = introspection.action;
        debug!(
            "Policy {} proposed {:?} (confidence {:.2})",
            self.policy.name(),
            action,
            introspection.confidence
        );

        let assessment = self.assess(&env, &action, intent)?;

        let baseline = self.baseline();
        let proposed = ProposedConfig {
            power_dbm: self.config.tx_power_dbm,
            frequency_mhz: self.config.frequency_mhz,
            emergency_weight: baseline.emergency_weight + action.delta_emergency_weight,
            coverage_weight: baseline.coverage_weight + action.delta_coverage_weight,
            offload_ratio: action.offload_ratio,
            slices: assessment
                .allocation
                .slices
                .iter()
                .map(|s| SliceSetting {
                    kind: s.kind,
                    modulation: ModulationRequest::Supported(s.modcod.modulation),
                    coding_rate: s.modcod.coding_rate,
                    bandwidth_mhz: s.bandwidth_mhz,
                })
                .collect(),
        };
        let (safe, clamps) = self.safety.validate(&proposed, &SafetyContext { emergency: env.emergency })?;
        self.validator.validate_plp_table(&safe.plp_table(), env.bandwidth_mhz)?;

        let mut warnings: Vec<String> = clamps.iter().map(ToString::to_string).collect();
        for flag in &introspection.flags {
            warnings.push(match flag {
                PolicyFlag::EmergencyFloorBreach { projected_weight, floor } => format!(
                    "policy proposed emergency weight {projected_weight:.2} below floor {floor:.2}"
                ),
                PolicyFlag::LowConfidence { confidence } => {
                    format!("policy confidence {confidence:.2} is low")
                }
            });
        }
        for slice in assessment.allocation.slices.iter().filter(|s| !s.meets_threshold) {
            warnings.push(format!(
                "{} slice SNR {:.1} dB is below every operating point",
                slice.kind, slice.snr_db
            ));
        }

        let drift = self.check_drift(&env, intent)?;
        let status = self.mode();

        let approval_record_id = match status {
            ControlMode::Active => Some(self.enqueue(
                intent,
                action,
                safe.clone(),
                warnings.clone(),
                env.emergency,
            )?),
            ControlMode::AiFrozen => {
                warnings.push("model drift detected: AI frozen, human review required".to_string());
                None
            }
        };

        *self.last_action.write() = Some(action);

        let safe_action = Action::new(
            safe.emergency_weight - baseline.emergency_weight,
            safe.coverage_weight - baseline.coverage_weight,
            safe.offload_ratio,
        );

        Ok(ProposalOutcome {
            intent,
            observation,
            action,
            safe_action,
            config: safe,
            warnings,
            policy: introspection,
            kpis: assessment.report,
            drift,
            status,
            approval_record_id,
        })
    }

    /// Compare the twin's view of the deployed baseline against the latest
    /// feedback and freeze the loop on drift.
    fn check_drift(&self, env: &EnvironmentState, intent: Intent) -> Result<DriftMetrics> {
        let observed = self.feedback.write().take();
        if let Some(observed) = observed {
            let predicted = self.assess(env, &self.baseline_action(), intent)?.report;
            self.drift
                .lock()
                .add_sample(&predicted.drift_sample(), &observed.sample(&predicted, intent));
        }
        let metrics = self.drift.lock().detect();

        if metrics.is_drifting {
            let mut mode = self.mode.write();
            if *mode != ControlMode::AiFrozen {
                warn!(
                    "Freezing AI control: drift score {:.2}, confidence {:.2}",
                    metrics.composite_score, metrics.confidence
                );
                *mode = ControlMode::AiFrozen;
            }
        }
        Ok(metrics)
    }

    fn enqueue(
        &self,
        intent: Intent,
        action: Action,
        config: SafeConfig,
        warnings: Vec<String>,
        emergency: bool,
    ) -> Result<RecordId> {
        let record = self.approvals.create(intent, action, config, warnings);
        // During an emergency the record stays open for the override path.
        if self.config.auto_submit && !emergency {
            self.approvals.submit(record.id, PIPELINE_ACTOR)?;
        }
        Ok(record.id)
    }

    // ========================================================================
    // Approval endpoints
    // ========================================================================

    pub fn record(&self, id: RecordId) -> Option<ApprovalRecord> {
        self.approvals.get(id)
    }

    pub fn submit(&self, id: RecordId, actor: &str) -> Result<ApprovalRecord> {
        self.approvals.submit(id, actor)
    }

    pub fn list_pending(&self) -> Vec<ApprovalRecord> {
        self.approvals.list_pending()
    }

    /// Approve and deploy. The deployed configuration becomes the baseline.
    pub fn approve(&self, id: RecordId, actor: &str, note: Option<&str>) -> Result<ApprovalRecord> {
        let record = self.approvals.approve(id, actor, note)?;
        self.deploy(&record);
        Ok(record)
    }

    pub fn reject(&self, id: RecordId, actor: &str, note: Option<&str>) -> Result<ApprovalRecord> {
        self.approvals.reject(id, actor, note)
    }

    /// Deploy without review. Requires an active emergency.
    pub fn emergency_override(
        &self,
        id: RecordId,
        actor: &str,
        note: Option<&str>,
    ) -> Result<ApprovalRecord> {
        let emergency = self.environment.read().emergency;
        let record = self.approvals.emergency_override(id, actor, emergency, note)?;
        self.deploy(&record);
        Ok(record)
    }

    fn deploy(&self, record: &ApprovalRecord) {
        if matches!(
            record.status,
            ApprovalStatus::Deployed | ApprovalStatus::EmergencyOverride
        ) {
            *self.baseline.write() = Baseline::from_safe(&record.config);
            info!(
                "Record {} deployed: emergency weight {:.2}, coverage weight {:.2}, offload {:.2}",
                record.id,
                record.config.emergency_weight,
                record.config.coverage_weight,
                record.config.offload_ratio
            );
        }
    }
}

/// Link budget of one slice: its allocated power over its share of the
/// channel noise.
fn slice_link(slice: &SliceConfig, allocation: &Allocation, link: &LinkBudget) -> LinkBudget {
    let noise_share_db = 10.0 * (slice.bandwidth_mhz / allocation.bandwidth_budget_mhz).log10();
    LinkBudget {
        tx_power_dbm: slice.power_dbm - noise_share_db,
        ..*link
    }
}

/// Share of receivers able to decode `slice` at its operating point.
fn slice_decodability(
    twin: &CoverageTwin,
    slice: &SliceConfig,
    allocation: &Allocation,
    link: &LinkBudget,
) -> Result<f64> {
    if slice.power_mw <= 0.0 || !slice.meets_threshold {
        return Ok(0.0);
    }
    let required_snr_db = MODCOD_TABLE
        .iter()
        .find(|op| op.modcod == slice.modcod)
        .map_or(MODCOD_TABLE[0].required_snr_db, |op| op.required_snr_db);

    let slice_budget = slice_link(slice, allocation, link);
    let report = twin.evaluate(&LinkBudget {
        tx_power_dbm: slice_budget.tx_power_dbm + 10.0 * slice.gain.log10(),
        min_snr_db: required_snr_db,
        ..slice_budget
    })?;
    Ok(report.coverage_pct / 100.0)
}
