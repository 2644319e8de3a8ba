//! Background tasks around a shared [`ControlContext`].
//!
//! Two tasks run until the runtime is shut down:
//!
//! - the heartbeat, which advances receiver mobility and runs an unattended
//!   decision cycle every `heartbeat_interval`;
//! - the receiver worker, which samples field KPIs on a jittered cadence
//!   and hands them to the context for the next drift comparison.
//!
//! Both stop on a shared [`CancellationToken`]. Shutdown waits for them
//! with a bounded timeout before aborting.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pipeline::{ControlContext, ObservedKpis};
use crate::types::Intent;

/// Packets a receiver reports per feedback period at full coverage.
const PACKETS_PER_PERIOD: f64 = 1000.0;

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Interval between unattended decision cycles.
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// Intent used by the heartbeat.
    #[serde(default)]
    pub heartbeat_intent: Intent,

    /// Receiver feedback delay range.
    #[serde(default = "default_feedback_min_delay", with = "humantime_serde")]
    pub feedback_min_delay: Duration,

    #[serde(default = "default_feedback_max_delay", with = "humantime_serde")]
    pub feedback_max_delay: Duration,

    /// Standard deviation of the fading applied to field SNR (dB).
    #[serde(default = "default_shadow_fading")]
    pub shadow_fading_db: f64,

    /// How long shutdown waits for each task.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Seed for the receiver worker.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_heartbeat_interval() -> Duration { Duration::from_secs(5) }
fn default_feedback_min_delay() -> Duration { Duration::from_millis(500) }
fn default_feedback_max_delay() -> Duration { Duration::from_secs(2) }
fn default_shadow_fading() -> f64 { 1.0 }
fn default_shutdown_timeout() -> Duration { Duration::from_secs(5) }

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_intent: Intent::default(),
            feedback_min_delay: default_feedback_min_delay(),
            feedback_max_delay: default_feedback_max_delay(),
            shadow_fading_db: default_shadow_fading(),
            shutdown_timeout: default_shutdown_timeout(),
            seed: None,
        }
    }
}

/// Running heartbeat and receiver tasks.
pub struct ControlRuntime {
    ctx: Arc<ControlContext>,
    token: CancellationToken,
    shutdown_timeout: Duration,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ControlRuntime {
    /// Spawn both tasks on the current tokio runtime.
    pub fn start(ctx: Arc<ControlContext>, config: RuntimeConfig) -> Self {
        let token = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat(
            Arc::clone(&ctx),
            token.clone(),
            config.heartbeat_interval,
            config.heartbeat_intent,
        ));
        let receiver = tokio::spawn(receiver_worker(Arc::clone(&ctx), token.clone(), config.clone()));

        info!(
            "Control runtime started: heartbeat every {:?}, intent {}",
            config.heartbeat_interval, config.heartbeat_intent
        );

        Self {
            ctx,
            token,
            shutdown_timeout: config.shutdown_timeout,
            tasks: vec![("heartbeat", heartbeat), ("receiver", receiver)],
        }
    }

    pub fn context(&self) -> &Arc<ControlContext> {
        &self.ctx
    }

    /// Token that stops every task when cancelled.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Cancel the tasks and wait for them to finish.
    ///
    /// A task still running after the timeout is aborted and reported as an
    /// error once all tasks have been dealt with.
    pub async fn shutdown(self) -> Result<()> {
        self.token.cancel();

        let mut stuck = Vec::new();
        for (name, mut handle) in self.tasks {
            match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                Ok(Ok(())) => debug!("Task {} stopped", name),
                Ok(Err(e)) => warn!("Task {} ended abnormally: {}", name, e),
                Err(_) => {
                    handle.abort();
                    stuck.push(name);
                }
            }
        }

        if stuck.is_empty() {
            info!("Control runtime stopped");
            Ok(())
        } else {
            Err(Error::Internal(format!(
                "tasks did not stop within {:?}: {}",
                self.shutdown_timeout,
                stuck.join(", ")
            )))
        }
    }
}

/// Periodic unattended decision cycle.
async fn heartbeat(
    ctx: Arc<ControlContext>,
    token: CancellationToken,
    interval: Duration,
    intent: Intent,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let dt = interval.as_secs_f64();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                ctx.tick(dt);
                match ctx.propose_and_validate(intent) {
                    Ok(outcome) if outcome.is_frozen() => warn!(
                        "Heartbeat proposal held: AI frozen (drift score {:.2})",
                        outcome.drift.composite_score
                    ),
                    Ok(outcome) => info!(
                        "Heartbeat proposal {:?}: reward {:.3}, {} warning(s)",
                        outcome.approval_record_id,
                        outcome.kpis.reward,
                        outcome.warnings.len()
                    ),
                    Err(e) => warn!("Heartbeat cycle failed: {}", e),
                }
            }
        }
    }
    debug!("Heartbeat stopped");
}

/// Simulated receiver feedback on a jittered cadence.
async fn receiver_worker(ctx: Arc<ControlContext>, token: CancellationToken, config: RuntimeConfig) {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let min = config.feedback_min_delay;
    let max = config.feedback_max_delay.max(min);

    loop {
        let delay = if max > min { rng.gen_range(min..=max) } else { min };
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {
                match simulate_observation(&ctx, &mut rng, config.shadow_fading_db) {
                    Ok(observed) => ctx.record_feedback(observed),
                    Err(e) => warn!("Receiver sampling failed: {}", e),
                }
            }
        }
    }
    debug!("Receiver worker stopped");
}

/// Field KPIs for the deployed baseline: the twin's prediction with fading.
pub fn simulate_observation<R: Rng>(
    ctx: &ControlContext,
    rng: &mut R,
    fading_db: f64,
) -> Result<ObservedKpis> {
    let predicted = ctx.predict_kpis()?;
    let snr_noise = Normal::new(0.0, fading_db.max(0.0))
        .map_err(|e| Error::InvalidParameter(format!("shadow fading: {e}")))?;
    let coverage_noise = Normal::new(0.0, fading_db.max(0.0) * 0.5)
        .map_err(|e| Error::InvalidParameter(format!("shadow fading: {e}")))?;

    let coverage_pct = (predicted.coverage_pct + coverage_noise.sample(rng)).clamp(0.0, 100.0);
    Ok(ObservedKpis {
        coverage_pct,
        snr_db: predicted.snr_db + snr_noise.sample(rng),
        packets_received: (PACKETS_PER_PERIOD * coverage_pct / 100.0).round() as u64,
        received_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn context() -> Arc<ControlContext> {
        let mut config = Config::default();
        config.twin.seed = Some(11);
        config.congestion.seed = Some(11);
        config.control.hour_of_day = Some(10.0);
        config.policy.seed = Some(11);
        Arc::new(ControlContext::new(&config).unwrap())
    }

    #[test]
    fn test_simulated_observation_tracks_prediction() {
        let ctx = context();
        let mut rng = StdRng::seed_from_u64(3);

        let exact = simulate_observation(&ctx, &mut rng, 0.0).unwrap();
        let predicted = ctx.predict_kpis().unwrap();
        assert_eq!(exact.coverage_pct, predicted.coverage_pct);
        assert_eq!(exact.snr_db, predicted.snr_db);

        let noisy = simulate_observation(&ctx, &mut rng, 1.0).unwrap();
        assert!((0.0..=100.0).contains(&noisy.coverage_pct));
        assert!(noisy.packets_received <= PACKETS_PER_PERIOD as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_queues_proposals() {
        let ctx = context();
        let config = RuntimeConfig {
            heartbeat_interval: Duration::from_secs(1),
            seed: Some(5),
            ..Default::default()
        };
        let runtime = ControlRuntime::start(Arc::clone(&ctx), config);
        assert!(runtime.is_running());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        runtime.shutdown().await.unwrap();

        // Ticks at 0s, 1s and 2s.
        assert_eq!(ctx.list_pending().len(), 3);
        assert!(ctx.last_action().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receiver_records_feedback() {
        let ctx = context();
        let config = RuntimeConfig {
            heartbeat_interval: Duration::from_secs(3600),
            seed: Some(5),
            ..Default::default()
        };
        let runtime = ControlRuntime::start(Arc::clone(&ctx), config);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(ctx.latest_feedback().is_some());
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_tasks() {
        let ctx = context();
        let runtime = ControlRuntime::start(ctx, RuntimeConfig::default());
        runtime.token().cancel();
        assert!(!runtime.is_running());
        runtime.shutdown().await.unwrap();
    }
}
