//! Confidence scoring.
//!
//! The base score is a weighted sum of `tanh(dir * delta / scale)` over the
//! five horizons, mapped into 55..=95 percent. Regime adjustments then add,
//! subtract, or veto. Weights and scales come from a [`ConfidenceConfig`]
//! resolved from an explicit override, the learned config in the store, or
//! the built-in default, in that order.

use algo_signal_core::{
    keys, Clock, DeltaSet, Direction, Horizon, KeyValueStore, PerHorizon, Regime, RegimeInfo,
    TimeframeStructure, VoteSet,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Scale bounds enforced on every load.
pub const MIN_SCALE: f64 = 0.2;
pub const MAX_SCALE: f64 = 10.0;

/// Default horizon weights (sum to 1).
#[must_use]
pub const fn default_weights() -> PerHorizon<f64> {
    PerHorizon {
        m30: 0.15,
        h1: 0.20,
        h4: 0.25,
        d24: 0.25,
        d7: 0.15,
    }
}

/// Default tanh scales in percent.
#[must_use]
pub const fn default_scales() -> PerHorizon<f64> {
    PerHorizon {
        m30: 0.6,
        h1: 1.0,
        h4: 2.0,
        d24: 4.0,
        d7: 8.0,
    }
}

/// Learned or default calibration of the confidence score.
///
/// Weights always sum to 1 and every scale lies in `[0.2, 10]` once the
/// config has passed through [`ConfidenceConfig::sanitize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    pub weights: PerHorizon<f64>,
    pub scales: PerHorizon<f64>,
    #[serde(default)]
    pub meta: Value,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            weights: default_weights(),
            scales: default_scales(),
            meta: serde_json::json!({ "source": "default" }),
        }
    }
}

fn usable_weight(w: f64) -> bool {
    w.is_finite() && w >= 0.0
}

fn usable_scale(s: f64) -> bool {
    s.is_finite() && s > 0.0
}

/// Renormalizes weights to sum to 1, falling back to the defaults when the sum is not positive.
#[must_use]
pub fn normalize_weights(weights: &PerHorizon<f64>) -> PerHorizon<f64> {
    let sum: f64 = weights.iter().map(|(_, w)| *w).sum();
    if !(sum.is_finite() && sum > 0.0) {
        return default_weights();
    }
    weights.map(|_, w| w / sum)
}

/// Clamps every scale to `[MIN_SCALE, MAX_SCALE]`.
#[must_use]
pub fn clamp_scales(scales: &PerHorizon<f64>) -> PerHorizon<f64> {
    scales.map(|_, s| s.clamp(MIN_SCALE, MAX_SCALE))
}

impl ConfidenceConfig {
    /// Repairs weights and scales.
    ///
    /// Missing, non-finite, or negative weights take their default and the
    /// set is renormalized to sum to 1. Non-positive scales take their
    /// default; all scales are clamped to `[0.2, 10]`.
    #[must_use]
    pub fn sanitize(mut self) -> Self {
        let default_w = default_weights();
        let default_s = default_scales();
        let weights = self
            .weights
            .map(|h, w| if usable_weight(*w) { *w } else { *default_w.get(h) });
        let scales = self
            .scales
            .map(|h, s| if usable_scale(*s) { *s } else { *default_s.get(h) });

        self.weights = normalize_weights(&weights);
        self.scales = clamp_scales(&scales);
        self
    }

    /// Reads a config from loosely-typed JSON.
    ///
    /// Accepts `{weights: {m30: ..}, scales: {..}, meta}` with any horizon
    /// missing. Returns `None` when the value is not an object.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;

        let read = |section: &str, fallback: PerHorizon<f64>| -> PerHorizon<f64> {
            let entries = object.get(section).and_then(Value::as_object);
            PerHorizon::from_fn(|h: Horizon| {
                entries
                    .and_then(|e| e.get(h.key()))
                    .and_then(Value::as_f64)
                    .unwrap_or(f64::NAN)
            })
            .map(|h, v| if v.is_nan() { *fallback.get(h) } else { *v })
        };

        Some(
            Self {
                weights: read("weights", default_weights()),
                scales: read("scales", default_scales()),
                meta: object.get("meta").cloned().unwrap_or(Value::Null),
            }
            .sanitize(),
        )
    }

    /// Parses an override string. Malformed input yields `None`.
    #[must_use]
    pub fn from_json_str(raw: &str) -> Option<Self> {
        serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| Self::from_value(&v))
    }
}

/// Weighted `tanh` score in `[-1, 1]`. Missing deltas contribute nothing.
#[must_use]
pub fn score(deltas: &DeltaSet, direction: Direction, config: &ConfidenceConfig) -> f64 {
    let sign = direction.sign();
    deltas
        .iter()
        .filter_map(|(h, delta)| {
            let delta = delta.filter(|d| d.is_finite())?;
            let scale = *config.scales.get(h);
            Some(*config.weights.get(h) * (sign * delta / scale).tanh())
        })
        .sum()
}

/// Base confidence: `round(55 + 40 * clamp01((score + 1) / 2))`, raised to
/// at least 85 when all five horizons agree.
#[must_use]
pub fn confidence_from(deltas: &DeltaSet, direction: Direction, votes: &VoteSet, config: &ConfidenceConfig) -> u8 {
    let s = score(deltas, direction, config);
    let unit = if s.is_finite() { ((s + 1.0) / 2.0).clamp(0.0, 1.0) } else { 0.5 };
    // 55..=95 always fits in u8
    let mut pct = (55.0 + 40.0 * unit).round() as u8;
    if votes.sum.unsigned_abs() == 5 {
        pct = pct.max(85);
    }
    pct
}

/// Applies the regime adjustment to a base confidence.
///
/// Returns `None` when the regime vetoes the signal.
#[must_use]
pub fn apply_regime(
    base: u8,
    direction: Direction,
    votes: &VoteSet,
    regime: &RegimeInfo,
    structure: &TimeframeStructure,
) -> Option<u8> {
    let focus = structure.get(regime.focus);
    let adjustment: i32 = match regime.regime {
        Regime::Trend => {
            if let (Some(plus), Some(minus)) = (focus.plus_di, focus.minus_di) {
                let contradicts = match direction {
                    Direction::Long => plus <= minus,
                    Direction::Short => minus <= plus,
                };
                if contradicts {
                    return None;
                }
            }
            6
        }
        Regime::Range => {
            let vol_penalty = if regime.low_vol { -6 } else { -3 };
            let hurst_adj = match focus.hurst {
                Some(h) if h < 0.45 => 2,
                Some(h) if h > 0.65 => -4,
                _ => 0,
            };
            vol_penalty + hurst_adj
        }
        Regime::Event => {
            if base < 70 || votes.sum.unsigned_abs() < 3 {
                return None;
            }
            -5
        }
    };

    // Clamped to 0..=100 so the cast cannot truncate
    Some((i32::from(base) + adjustment).clamp(0, 100) as u8)
}

/// Where the effective config came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Override,
    Remote,
    Default,
}

/// Remote config cached until `expiry`.
#[derive(Debug, Clone, Default)]
pub struct ConfigCache {
    /// `None` when the store had no learned config
    pub value: Option<Arc<ConfidenceConfig>>,
    pub expiry: Option<DateTime<Utc>>,
}

impl ConfigCache {
    fn fresh(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|at| now < at)
    }
}

/// Resolves and caches the confidence config.
pub struct ConfidenceModel {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    override_config: Option<Arc<ConfidenceConfig>>,
    ttl: chrono::Duration,
    cache: Mutex<ConfigCache>,
    default_config: Arc<ConfidenceConfig>,
}

impl ConfidenceModel {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            override_config: None,
            ttl: chrono::Duration::minutes(10),
            cache: Mutex::new(ConfigCache::default()),
            default_config: Arc::new(ConfidenceConfig::default()),
        }
    }

    /// Uses `raw` as an explicit override when it parses; otherwise it is ignored.
    #[must_use]
    pub fn with_override_json(mut self, raw: Option<&str>) -> Self {
        self.override_config = raw.and_then(|raw| match ConfidenceConfig::from_json_str(raw) {
            Some(config) => Some(Arc::new(config)),
            None => {
                tracing::warn!("Ignoring malformed confidence override");
                None
            }
        });
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.ttl = chrono::Duration::from_std(ttl).unwrap_or(self.ttl);
        self
    }

    /// Drops the cached remote config so the next resolution re-reads the store.
    pub fn invalidate(&self) {
        *self.cache.lock() = ConfigCache::default();
    }

    /// Returns the effective config and its source.
    ///
    /// Store read failures fall back to the default and are not cached.
    pub async fn resolve(&self) -> (Arc<ConfidenceConfig>, ConfigSource) {
        if let Some(config) = &self.override_config {
            return (config.clone(), ConfigSource::Override);
        }

        let now = self.clock.now();
        {
            let cache = self.cache.lock();
            if cache.fresh(now) {
                return match &cache.value {
                    Some(config) => (config.clone(), ConfigSource::Remote),
                    None => (self.default_config.clone(), ConfigSource::Default),
                };
            }
        }

        match self.store.get(keys::CONFIDENCE_CONFIG).await {
            Ok(raw) => {
                let remote = raw
                    .as_ref()
                    .and_then(ConfidenceConfig::from_value)
                    .map(Arc::new);
                *self.cache.lock() = ConfigCache {
                    value: remote.clone(),
                    expiry: now.checked_add_signed(self.ttl),
                };
                match remote {
                    Some(config) => (config, ConfigSource::Remote),
                    None => (self.default_config.clone(), ConfigSource::Default),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read confidence config, using default");
                (self.default_config.clone(), ConfigSource::Default)
            }
        }
    }

    /// Effective config without its source.
    pub async fn effective_config(&self) -> Arc<ConfidenceConfig> {
        self.resolve().await.0
    }
}
