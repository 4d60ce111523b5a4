//! Offline calibration job: outcome log in, learned confidence config out.

use crate::trainer::{train, CalibrationResult, Evaluation, Sample, TrainerParams, TrainingOutcome};
use algo_signal_core::{keys, CalibrationConfig, Clock, KeyValueStore, OutcomeRecord};
use algo_signal_engine::{ConfidenceModel, OutcomeTracker};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Summary of one calibration run.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationRunReport {
    pub ok: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records: usize,
    pub sample_count: usize,
    /// Whether a learned config was written
    pub written: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Resolved samples, de-duplicated by (symbol, decision time) and capped to
/// the newest `max_samples`.
#[must_use]
pub fn collect_samples(mut records: Vec<OutcomeRecord>, max_samples: usize) -> Vec<Sample> {
    records.sort_by_key(|r| r.decided_at);
    let mut seen = HashSet::new();
    let unique: Vec<&OutcomeRecord> = records
        .iter()
        .rev()
        .filter(|r| seen.insert((r.symbol.to_uppercase(), r.decided_at)))
        .collect();

    let mut samples: Vec<Sample> = unique
        .into_iter()
        .filter_map(Sample::from_record)
        .take(max_samples)
        .collect();
    samples.reverse();
    samples
}

/// The stored calibration document.
#[must_use]
pub fn calibration_document(result: &CalibrationResult, ts: DateTime<Utc>) -> Value {
    json!({
        "weights": result.weights,
        "scales": result.scales,
        "meta": {
            "source": "learned",
            "ts": ts,
            "sample_count": result.sample_count,
            "iterations": result.iterations,
            "loss": result.loss,
            "evaluation": result.evaluation,
            "stats": result.stats,
        }
    })
}

/// Trains from the outcome log and publishes the learned config.
pub struct CalibrationJob {
    store: Arc<dyn KeyValueStore>,
    outcomes: Arc<OutcomeTracker>,
    confidence: Arc<ConfidenceModel>,
    clock: Arc<dyn Clock>,
    params: TrainerParams,
    max_samples: usize,
}

impl CalibrationJob {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        outcomes: Arc<OutcomeTracker>,
        confidence: Arc<ConfidenceModel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = CalibrationConfig::default();
        Self {
            store,
            outcomes,
            confidence,
            clock,
            params: TrainerParams::from(&config),
            max_samples: config.max_samples,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: &CalibrationConfig) -> Self {
        self.params = TrainerParams::from(config);
        self.max_samples = config.max_samples;
        self
    }

    /// Runs the job. Errors and panics become a failed report.
    pub async fn run(&self) -> CalibrationRunReport {
        let started_at = self.clock.now();
        tracing::info!("Calibration starting");

        let result = AssertUnwindSafe(self.calibrate(started_at)).catch_unwind().await;
        let finished_at = self.clock.now();

        let report = match result {
            Ok(Ok(mut report)) => {
                report.finished_at = finished_at;
                report
            }
            Ok(Err(e)) => Self::failed(started_at, finished_at, format!("{e:#}")),
            Err(_) => Self::failed(started_at, finished_at, "calibration panicked".to_string()),
        };

        match (&report.error, &report.reason) {
            (Some(error), _) => tracing::error!(error, "Calibration failed"),
            (None, Some(reason)) => tracing::info!(reason, samples = report.sample_count, "Calibration skipped"),
            (None, None) => tracing::info!(samples = report.sample_count, loss = ?report.loss, "Calibration written"),
        }
        report
    }

    fn failed(started_at: DateTime<Utc>, finished_at: DateTime<Utc>, error: String) -> CalibrationRunReport {
        CalibrationRunReport {
            ok: false,
            started_at,
            finished_at,
            records: 0,
            sample_count: 0,
            written: false,
            reason: None,
            loss: None,
            evaluation: None,
            error: Some(error),
        }
    }

    async fn calibrate(&self, now: DateTime<Utc>) -> Result<CalibrationRunReport> {
        let records = self.outcomes.load_records().await.context("Failed to load outcome log")?;
        let record_count = records.len();
        let samples = collect_samples(records, self.max_samples);

        let initial = self.confidence.effective_config().await;
        let mut report = CalibrationRunReport {
            ok: true,
            started_at: now,
            finished_at: now,
            records: record_count,
            sample_count: samples.len(),
            written: false,
            reason: None,
            loss: None,
            evaluation: None,
            error: None,
        };

        match train(&samples, &initial, &self.params) {
            TrainingOutcome::Skipped { reason, .. } => {
                report.reason = Some(reason);
            }
            TrainingOutcome::Trained(result) => {
                self.store
                    .set(keys::CONFIDENCE_CONFIG, calibration_document(&result, now), None)
                    .await
                    .context("Failed to write calibration")?;
                self.confidence.invalidate();
                report.written = true;
                report.loss = Some(result.loss);
                report.evaluation = Some(result.evaluation);
            }
        }

        Ok(report)
    }
}
