//! Descriptive statistics of the calibration sample set.

use crate::trainer::Sample;
use algo_signal_core::{Direction, Horizon, PerHorizon};
use serde::{Deserialize, Serialize};

/// Confidence buckets reported with every calibration, inclusive bounds.
pub const CONFIDENCE_BUCKETS: [(u8, u8); 5] = [(0, 64), (65, 74), (75, 84), (85, 94), (95, 100)];

/// Outcome statistics of one horizon for one side.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SideStats {
    /// Samples of this side with a known delta on the horizon
    pub samples: usize,
    /// Samples whose delta agreed with the side
    pub agreeing: usize,
    /// Win rate among agreeing samples
    pub win_rate: Option<f64>,
    /// Mean direction-adjusted delta, percent
    pub avg_delta: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HorizonStats {
    pub long: SideStats,
    pub short: SideStats,
}

/// Win rate of one confidence bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub range: String,
    pub samples: usize,
    pub win_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    pub horizons: PerHorizon<HorizonStats>,
    pub buckets: Vec<BucketStats>,
    pub overall_win_rate: Option<f64>,
}

fn rate(hits: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| hits as f64 / total as f64)
}

fn side_stats(samples: &[&Sample], horizon: Horizon) -> SideStats {
    let known: Vec<(f64, bool)> = samples
        .iter()
        .filter_map(|s| s.features.get(horizon).map(|f| (f, s.target > 0.0)))
        .collect();
    let agreeing: Vec<bool> = known.iter().filter(|(f, _)| *f > 0.0).map(|(_, win)| *win).collect();
    let wins = agreeing.iter().filter(|win| **win).count();

    SideStats {
        samples: known.len(),
        agreeing: agreeing.len(),
        win_rate: rate(wins, agreeing.len()),
        avg_delta: (!known.is_empty()).then(|| known.iter().map(|(f, _)| f).sum::<f64>() / known.len() as f64),
    }
}

/// Per-horizon and per-confidence-bucket statistics.
#[must_use]
pub fn sample_stats(samples: &[Sample]) -> SampleStats {
    let longs: Vec<&Sample> = samples.iter().filter(|s| s.side == Direction::Long).collect();
    let shorts: Vec<&Sample> = samples.iter().filter(|s| s.side == Direction::Short).collect();

    let horizons = PerHorizon::from_fn(|h| HorizonStats {
        long: side_stats(&longs, h),
        short: side_stats(&shorts, h),
    });

    let buckets = CONFIDENCE_BUCKETS
        .iter()
        .map(|&(lo, hi)| {
            let in_bucket: Vec<&Sample> = samples
                .iter()
                .filter(|s| (lo..=hi).contains(&s.confidence_pct))
                .collect();
            let wins = in_bucket.iter().filter(|s| s.target > 0.0).count();
            BucketStats {
                range: format!("{lo}-{hi}"),
                samples: in_bucket.len(),
                win_rate: rate(wins, in_bucket.len()),
            }
        })
        .collect();

    let wins = samples.iter().filter(|s| s.target > 0.0).count();

    SampleStats {
        horizons,
        buckets,
        overall_win_rate: rate(wins, samples.len()),
    }
}
