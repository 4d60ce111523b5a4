//! Offline re-learning of the confidence model from realized outcomes.
//!
//! [`trainer`] is pure numerics over resolved samples; [`job`] loads the
//! outcome log from the key-value store and publishes the learned config.

pub mod job;
pub mod stats;
pub mod trainer;

pub use job::{calibration_document, collect_samples, CalibrationJob, CalibrationRunReport};
pub use stats::{sample_stats, BucketStats, HorizonStats, SampleStats, SideStats, CONFIDENCE_BUCKETS};
pub use trainer::{
    evaluate, loss, model_score, train, CalibrationResult, Diagnostics, Evaluation, Sample,
    TrainerParams, TrainingOutcome,
};
