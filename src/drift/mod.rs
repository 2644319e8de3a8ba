//! Model drift detection.
//!
//! Keeps rolling windows of absolute residuals between what the digital twin
//! predicted and what receivers actually reported. Once enough samples are
//! present, the recent mean residual of each KPI is scored against a
//! baseline and span; the worst score decides whether the model is drifting.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Per-KPI residual reference values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualScale {
    /// Coverage residual (percentage points).
    pub coverage_pct: f64,
    /// SNR residual (dB).
    pub snr_db: f64,
    /// Reward residual.
    pub reward: f64,
}

/// Drift detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Samples kept per window.
    #[serde(default = "default_capacity")]
    pub window_capacity: usize,

    /// Samples needed before a verdict is given.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Most recent samples averaged for scoring.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,

    /// Composite score above which the model is drifting.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Residual expected from normal model error.
    #[serde(default = "default_baseline")]
    pub baseline: ResidualScale,

    /// Residual above baseline that scores 1.0.
    #[serde(default = "default_span")]
    pub span: ResidualScale,
}

fn default_capacity() -> usize { 50 }
fn default_min_samples() -> usize { 5 }
fn default_recent_window() -> usize { 10 }
fn default_threshold() -> f64 { 0.5 }

fn default_baseline() -> ResidualScale {
    ResidualScale {
        coverage_pct: 2.0,
        snr_db: 1.0,
        reward: 0.05,
    }
}

fn default_span() -> ResidualScale {
    ResidualScale {
        coverage_pct: 10.0,
        snr_db: 3.0,
        reward: 0.2,
    }
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            window_capacity: default_capacity(),
            min_samples: default_min_samples(),
            recent_window: default_recent_window(),
            threshold: default_threshold(),
            baseline: default_baseline(),
            span: default_span(),
        }
    }
}

/// KPIs compared between twin and field.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct KpiSample {
    pub coverage_pct: f64,
    pub snr_db: f64,
    pub reward: f64,
}

/// Drift verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftMetrics {
    /// Recent mean coverage residual (percentage points).
    pub coverage_error: f64,
    /// Recent mean SNR residual (dB).
    pub snr_residual: f64,
    /// Recent mean reward residual.
    pub reward_drift: f64,
    /// Worst per-KPI score.
    pub composite_score: f64,
    pub is_drifting: bool,
    /// Confidence in the verdict (0-1).
    pub confidence: f64,
    pub sample_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl DriftMetrics {
    fn neutral(sample_count: usize) -> Self {
        Self {
            coverage_error: 0.0,
            snr_residual: 0.0,
            reward_drift: 0.0,
            composite_score: 0.0,
            is_drifting: false,
            confidence: 0.0,
            sample_count,
            timestamp: Utc::now(),
        }
    }
}

/// Rolling-window drift detector.
pub struct DriftDetector {
    config: DriftConfig,
    coverage: VecDeque<f64>,
    snr: VecDeque<f64>,
    reward: VecDeque<f64>,
}

impl DriftDetector {
    pub fn new(config: DriftConfig) -> Self {
        let capacity = config.window_capacity.max(1);
        Self {
            coverage: VecDeque::with_capacity(capacity),
            snr: VecDeque::with_capacity(capacity),
            reward: VecDeque::with_capacity(capacity),
            config,
        }
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// Record one predicted/observed pair.
    pub fn add_sample(&mut self, predicted: &KpiSample, observed: &KpiSample) {
        self.add_residuals(
            predicted.coverage_pct - observed.coverage_pct,
            predicted.snr_db - observed.snr_db,
            predicted.reward - observed.reward,
        );
    }

    /// Record raw residuals. Signs are discarded.
    pub fn add_residuals(&mut self, coverage: f64, snr: f64, reward: f64) {
        let capacity = self.config.window_capacity.max(1);
        for (window, value) in [
            (&mut self.coverage, coverage),
            (&mut self.snr, snr),
            (&mut self.reward, reward),
        ] {
            if window.len() >= capacity {
                window.pop_front();
            }
            window.push_back(value.abs());
        }
    }

    pub fn len(&self) -> usize {
        self.coverage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coverage.is_empty()
    }

    /// Clear all windows.
    pub fn reset(&mut self) {
        self.coverage.clear();
        self.snr.clear();
        self.reward.clear();
        debug!("Drift windows cleared");
    }

    fn recent_mean(&self, window: &VecDeque<f64>) -> f64 {
        let n = self.config.recent_window.max(1).min(window.len());
        if n == 0 {
            return 0.0;
        }
        window.iter().rev().take(n).sum::<f64>() / n as f64
    }

    fn score(mean: f64, baseline: f64, span: f64) -> f64 {
        if span <= 0.0 {
            return 0.0;
        }
        ((mean - baseline) / span).max(0.0)
    }

    /// Current verdict. Neutral until `min_samples` have been recorded.
    pub fn detect(&self) -> DriftMetrics {
        let count = self.len();
        if count < self.config.min_samples {
            return DriftMetrics::neutral(count);
        }

        let coverage_error = self.recent_mean(&self.coverage);
        let snr_residual = self.recent_mean(&self.snr);
        let reward_drift = self.recent_mean(&self.reward);

        let ResidualScale { coverage_pct, snr_db, reward } = self.config.baseline;
        let span = self.config.span;
        let composite = [
            Self::score(coverage_error, coverage_pct, span.coverage_pct),
            Self::score(snr_residual, snr_db, span.snr_db),
            Self::score(reward_drift, reward, span.reward),
        ]
        .into_iter()
        .fold(0.0, f64::max);

        let threshold = self.config.threshold;
        let is_drifting = composite > threshold;
        let confidence = if threshold > 0.0 {
            (composite / (2.0 * threshold)).clamp(0.0, 1.0)
        } else {
            f64::from(u8::from(is_drifting))
        };

        if is_drifting {
            warn!(
                "Model drift detected: score {:.2} (coverage {:.2}, snr {:.2}, reward {:.3})",
                composite, coverage_error, snr_residual, reward_drift
            );
        }

        DriftMetrics {
            coverage_error,
            snr_residual,
            reward_drift,
            composite_score: composite,
            is_drifting,
            confidence,
            sample_count: count,
            timestamp: Utc::now(),
        }
    }
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::new(DriftConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_below_min_samples() {
        let mut detector = DriftDetector::default();
        for _ in 0..4 {
            detector.add_residuals(90.0, 40.0, 5.0);
        }
        let metrics = detector.detect();
        assert!(!metrics.is_drifting);
        assert_eq!(metrics.confidence, 0.0);
        assert_eq!(metrics.sample_count, 4);

        detector.add_residuals(90.0, 40.0, 5.0);
        assert!(detector.detect().is_drifting);
    }

    #[test]
    fn test_zero_residual_never_drifts() {
        let mut detector = DriftDetector::default();
        let kpis = KpiSample {
            coverage_pct: 80.0,
            snr_db: 18.0,
            reward: 0.4,
        };
        for _ in 0..12 {
            detector.add_sample(&kpis, &kpis);
        }
        let metrics = detector.detect();
        assert!(!metrics.is_drifting);
        assert_eq!(metrics.confidence, 0.0);
    }

    #[test]
    fn test_score_and_confidence() {
        let mut detector = DriftDetector::default();
        // SNR residual 2.5 dB: (2.5 - 1) / 3 = 0.5, exactly at threshold.
        for _ in 0..10 {
            detector.add_residuals(0.0, -2.5, 0.0);
        }
        let metrics = detector.detect();
        assert!((metrics.composite_score - 0.5).abs() < 1e-12);
        assert!(!metrics.is_drifting);
        assert!((metrics.confidence - 0.5).abs() < 1e-12);

        // Coverage residual 12 points: (12 - 2) / 10 = 1.0.
        for _ in 0..10 {
            detector.add_residuals(12.0, 0.0, 0.0);
        }
        let metrics = detector.detect();
        assert!(metrics.is_drifting);
        assert_eq!(metrics.confidence, 1.0);
    }

    #[test]
    fn test_only_recent_samples_count() {
        let mut detector = DriftDetector::default();
        for _ in 0..30 {
            detector.add_residuals(50.0, 0.0, 0.0);
        }
        for _ in 0..10 {
            detector.add_residuals(0.0, 0.0, 0.0);
        }
        assert!(!detector.detect().is_drifting);
    }

    #[test]
    fn test_capacity_and_reset() {
        let mut detector = DriftDetector::default();
        for i in 0..80 {
            detector.add_residuals(f64::from(i), 0.0, 0.0);
        }
        assert_eq!(detector.len(), 50);

        detector.reset();
        assert!(detector.is_empty());
        assert!(!detector.detect().is_drifting);
    }
}
