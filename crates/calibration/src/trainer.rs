//! Batch gradient-descent trainer for confidence weights and scales.
//!
//! The forward model is `score = Σ w[h] · tanh(feature[h] / σ[h])` and the
//! loss is the mean squared error of `score - target` with targets in
//! {+1, -1}. Gradients are analytic. No I/O happens here.

use crate::stats::{sample_stats, SampleStats};
use algo_signal_core::{CalibrationConfig, Direction, Horizon, OutcomeRecord, PerHorizon};
use algo_signal_engine::confidence::{clamp_scales, normalize_weights, ConfidenceConfig};
use serde::{Deserialize, Serialize};

/// Loss improvement that counts as a new best snapshot.
const BEST_IMPROVEMENT: f64 = 1e-6;

/// Loss change below which training stops.
const CONVERGENCE_DELTA: f64 = 1e-5;

/// One resolved historical outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub side: Direction,
    /// Direction-adjusted percent deltas; `None` when unknown at decision time
    pub features: PerHorizon<Option<f64>>,
    /// +1 win, -1 loss
    pub target: f64,
    pub confidence_pct: u8,
}

impl Sample {
    /// Converts a resolved record. Pending records yield `None`.
    #[must_use]
    pub fn from_record(record: &OutcomeRecord) -> Option<Self> {
        let target = record.status.target()?;
        Some(Self {
            side: record.side,
            features: record.features.map(|_, f| f.filter(|v| v.is_finite())),
            target: f64::from(target),
            confidence_pct: record.confidence_pct,
        })
    }

    /// Feature used by the model; an unknown delta contributes nothing.
    #[must_use]
    pub fn feature(&self, horizon: Horizon) -> f64 {
        self.features.get(horizon).unwrap_or(0.0)
    }
}

/// Trainer parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainerParams {
    pub min_samples: usize,
    pub max_iterations: usize,
    pub weight_learning_rate: f64,
    pub scale_learning_rate: f64,
}

impl Default for TrainerParams {
    fn default() -> Self {
        Self::from(&CalibrationConfig::default())
    }
}

impl From<&CalibrationConfig> for TrainerParams {
    fn from(config: &CalibrationConfig) -> Self {
        Self {
            min_samples: config.min_samples,
            max_iterations: config.max_iterations,
            weight_learning_rate: config.weight_learning_rate,
            scale_learning_rate: config.scale_learning_rate,
        }
    }
}

/// Fit quality of a weight/scale set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub mse: f64,
    pub mean_abs_error: f64,
    /// Fraction of samples with `sign(score) == target`
    pub accuracy: f64,
}

/// Learned parameters plus their evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub weights: PerHorizon<f64>,
    pub scales: PerHorizon<f64>,
    pub loss: f64,
    pub iterations: usize,
    pub sample_count: usize,
    pub evaluation: Evaluation,
    pub stats: SampleStats,
}

/// Why training did not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub sample_count: usize,
    pub min_samples: usize,
}

/// Result of a training attempt. Too few samples is a normal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingOutcome {
    Trained(CalibrationResult),
    Skipped { reason: String, diagnostics: Diagnostics },
}

/// Model score of one sample.
#[must_use]
pub fn model_score(sample: &Sample, weights: &PerHorizon<f64>, scales: &PerHorizon<f64>) -> f64 {
    Horizon::ALL
        .iter()
        .map(|&h| weights.get(h) * (sample.feature(h) / scales.get(h)).tanh())
        .sum()
}

/// Mean squared error over `samples`.
#[must_use]
pub fn loss(samples: &[Sample], weights: &PerHorizon<f64>, scales: &PerHorizon<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let total: f64 = samples
        .iter()
        .map(|s| (model_score(s, weights, scales) - s.target).powi(2))
        .sum();
    total / samples.len() as f64
}

/// Analytic gradients of the loss with respect to weights and scales.
///
/// Scale terms are skipped for zero features.
fn gradients(
    samples: &[Sample],
    weights: &PerHorizon<f64>,
    scales: &PerHorizon<f64>,
) -> (PerHorizon<f64>, PerHorizon<f64>) {
    let mut grad_w = PerHorizon::from_fn(|_| 0.0);
    let mut grad_s = PerHorizon::from_fn(|_| 0.0);

    for sample in samples {
        let err = model_score(sample, weights, scales) - sample.target;
        for &h in &Horizon::ALL {
            let feature = sample.feature(h);
            let scale = *scales.get(h);
            let t = (feature / scale).tanh();
            *grad_w.get_mut(h) += 2.0 * err * t;
            if feature != 0.0 {
                *grad_s.get_mut(h) += 2.0 * err * weights.get(h) * (1.0 - t * t) * (-feature / (scale * scale));
            }
        }
    }

    let n = samples.len() as f64;
    (grad_w.map(|_, g| g / n), grad_s.map(|_, g| g / n))
}

/// MSE, mean absolute error, and directional accuracy.
#[must_use]
pub fn evaluate(samples: &[Sample], weights: &PerHorizon<f64>, scales: &PerHorizon<f64>) -> Evaluation {
    if samples.is_empty() {
        return Evaluation {
            mse: 0.0,
            mean_abs_error: 0.0,
            accuracy: 0.0,
        };
    }
    let n = samples.len() as f64;
    let (mut sq, mut abs, mut hits) = (0.0, 0.0, 0_usize);
    for sample in samples {
        let score = model_score(sample, weights, scales);
        let err = score - sample.target;
        sq += err * err;
        abs += err.abs();
        if score != 0.0 && score.signum() == sample.target.signum() {
            hits += 1;
        }
    }
    Evaluation {
        mse: sq / n,
        mean_abs_error: abs / n,
        accuracy: hits as f64 / n,
    }
}

/// Trains from `initial`, returning the best snapshot seen.
///
/// Weights are clamped to `[0, 1]` and renormalized after every step; scales
/// are clamped to `[0.2, 10]`. Training stops after `max_iterations` or once
/// the loss changes by less than 1e-5 between iterations.
#[must_use]
pub fn train(samples: &[Sample], initial: &ConfidenceConfig, params: &TrainerParams) -> TrainingOutcome {
    let min = params.min_samples.max(1);
    if samples.len() < min {
        return TrainingOutcome::Skipped {
            reason: "not_enough_samples".to_string(),
            diagnostics: Diagnostics {
                sample_count: samples.len(),
                min_samples: params.min_samples,
            },
        };
    }

    let mut weights = normalize_weights(&initial.weights);
    let mut scales = clamp_scales(&initial.scales);
    let mut prev = loss(samples, &weights, &scales);
    let mut best = (weights, scales, prev);
    let mut iterations = 0;

    for _ in 0..params.max_iterations {
        iterations += 1;
        let (grad_w, grad_s) = gradients(samples, &weights, &scales);

        let stepped = weights.map(|h, w| (w - params.weight_learning_rate * grad_w.get(h)).clamp(0.0, 1.0));
        weights = normalize_weights(&stepped);
        scales = clamp_scales(&scales.map(|h, s| s - params.scale_learning_rate * grad_s.get(h)));

        let current = loss(samples, &weights, &scales);
        if current < best.2 - BEST_IMPROVEMENT {
            best = (weights, scales, current);
        }
        if (prev - current).abs() < CONVERGENCE_DELTA {
            break;
        }
        prev = current;
    }

    let (weights, scales, best_loss) = best;
    tracing::debug!(iterations, loss = best_loss, samples = samples.len(), "Calibration converged");

    TrainingOutcome::Trained(CalibrationResult {
        evaluation: evaluate(samples, &weights, &scales),
        stats: sample_stats(samples),
        weights,
        scales,
        loss: best_loss,
        iterations,
        sample_count: samples.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 64-bit LCG with 53-bit uniform output.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> f64 {
            self.0 = self
                .0
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (self.0 >> 11) as f64 / (1_u64 << 53) as f64
        }
    }

    /// Targets equal the sign of the m30 feature; other horizons are noise.
    fn m30_driven_samples(n: usize) -> Vec<Sample> {
        let mut rng = Lcg(42);
        (0..n)
            .map(|_| {
                let sign = if rng.next() < 0.5 { 1.0 } else { -1.0 };
                let m30 = sign * (0.2 + 1.8 * rng.next());
                let h1 = (rng.next() * 2.0 - 1.0) * 2.0;
                let h4 = (rng.next() * 2.0 - 1.0) * 4.0;
                let d24 = (rng.next() * 2.0 - 1.0) * 8.0;
                let d7 = (rng.next() * 2.0 - 1.0) * 15.0;
                Sample {
                    side: Direction::Long,
                    features: PerHorizon {
                        m30: Some(m30),
                        h1: Some(h1),
                        h4: Some(h4),
                        d24: Some(d24),
                        d7: Some(d7),
                    },
                    target: sign,
                    confidence_pct: 75,
                }
            })
            .collect()
    }

    fn trained(outcome: TrainingOutcome) -> CalibrationResult {
        match outcome {
            TrainingOutcome::Trained(result) => result,
            TrainingOutcome::Skipped { reason, .. } => panic!("training skipped: {reason}"),
        }
    }

    // ============================================
    // Convergence
    // ============================================

    #[test]
    fn m30_signal_dominates_after_training() {
        let samples = m30_driven_samples(400);
        let result = trained(train(&samples, &ConfidenceConfig::default(), &TrainerParams::default()));

        for h in [Horizon::H1, Horizon::H4, Horizon::D24, Horizon::D7] {
            assert!(result.weights.m30 > *result.weights.get(h), "{h}: {:?}", result.weights);
        }
        assert!(result.evaluation.accuracy > 0.9);
        assert!(result.iterations <= 160);
        assert_eq!(result.sample_count, 400);

        let initial = loss(&samples, &ConfidenceConfig::default().weights, &ConfidenceConfig::default().scales);
        assert!(result.loss < initial);
    }

    #[test]
    fn trained_parameters_stay_in_bounds() {
        let samples = m30_driven_samples(200);
        let result = trained(train(&samples, &ConfidenceConfig::default(), &TrainerParams::default()));

        let sum: f64 = result.weights.iter().map(|(_, w)| *w).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(result.weights.iter().all(|(_, w)| (0.0..=1.0).contains(w)));
        assert!(result.scales.iter().all(|(_, s)| (0.2..=10.0).contains(s)));
    }

    #[test]
    fn training_is_deterministic() {
        let samples = m30_driven_samples(150);
        let a = train(&samples, &ConfidenceConfig::default(), &TrainerParams::default());
        let b = train(&samples, &ConfidenceConfig::default(), &TrainerParams::default());
        assert_eq!(a, b);
    }

    // ============================================
    // Edge cases
    // ============================================

    #[test]
    fn too_few_samples_is_reported() {
        let samples = m30_driven_samples(119);
        match train(&samples, &ConfidenceConfig::default(), &TrainerParams::default()) {
            TrainingOutcome::Skipped { reason, diagnostics } => {
                assert_eq!(reason, "not_enough_samples");
                assert_eq!(diagnostics.sample_count, 119);
                assert_eq!(diagnostics.min_samples, 120);
            }
            TrainingOutcome::Trained(_) => panic!("expected skip"),
        }
    }

    #[test]
    fn zero_features_leave_scales_untouched() {
        let samples: Vec<Sample> = m30_driven_samples(150)
            .into_iter()
            .map(|mut s| {
                s.features.d7 = None;
                s
            })
            .collect();
        let initial = ConfidenceConfig::default();
        let result = trained(train(&samples, &initial, &TrainerParams::default()));
        assert!((result.scales.d7 - initial.scales.d7).abs() < 1e-12);
    }

    #[test]
    fn evaluation_counts_zero_score_as_miss() {
        let sample = Sample {
            side: Direction::Short,
            features: PerHorizon::from_fn(|_| None),
            target: 1.0,
            confidence_pct: 60,
        };
        let config = ConfidenceConfig::default();
        let eval = evaluate(&[sample], &config.weights, &config.scales);
        assert!(eval.accuracy.abs() < f64::EPSILON);
        assert!((eval.mse - 1.0).abs() < 1e-12);
        assert!((eval.mean_abs_error - 1.0).abs() < 1e-12);
    }

    #[test]
    fn skipped_outcome_serializes_with_reason() {
        let outcome = train(&[], &ConfidenceConfig::default(), &TrainerParams::default());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "not_enough_samples");
    }
}
