//! Historical outcome records of emitted signals.
//!
//! Each emitted signal is logged as an [`OutcomeRecord`] keyed per asset and
//! decision timestamp. Records start `Pending` and are later resolved against
//! realized price action; resolved records are the training samples of the
//! confidence calibration.

use crate::keys;
use crate::market::PerHorizon;
use crate::signal::{Direction, Signal};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Resolution state of a logged signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Pending,
    Win,
    Loss,
    /// The decision window could not be observed in full; never trained on
    Expired,
}

impl OutcomeStatus {
    /// Training target: +1 win, -1 loss, `None` while pending or expired.
    #[must_use]
    pub const fn target(self) -> Option<i8> {
        match self {
            Self::Pending | Self::Expired => None,
            Self::Win => Some(1),
            Self::Loss => Some(-1),
        }
    }
}

/// A signal as it was decided, plus its eventual outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub symbol: String,
    pub exchange: String,
    pub pair: String,
    pub side: Direction,
    pub decided_at: DateTime<Utc>,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    /// Direction-adjusted percent deltas at decision time
    pub features: PerHorizon<Option<f64>>,
    pub confidence_pct: u8,
    pub status: OutcomeStatus,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_price: Option<f64>,
}

impl OutcomeRecord {
    /// Builds a pending record from an emitted signal.
    ///
    /// Returns `None` if a price level cannot be represented as `f64`.
    #[must_use]
    pub fn from_signal(signal: &Signal) -> Option<Self> {
        let sign = signal.direction.sign();
        Some(Self {
            symbol: signal.symbol.clone(),
            exchange: signal.exchange.clone(),
            pair: signal.pair.clone(),
            side: signal.direction,
            decided_at: signal.generated_at,
            entry: signal.levels.entry.to_f64()?,
            sl: signal.levels.sl.to_f64()?,
            tp: signal.levels.tp.to_f64()?,
            features: signal.deltas.map(|_, delta| delta.map(|d| sign * d)),
            confidence_pct: signal.confidence_pct,
            status: OutcomeStatus::Pending,
            resolved_at: None,
            exit_price: None,
        })
    }

    /// Store key of this record.
    #[must_use]
    pub fn key(&self) -> String {
        keys::outcome_key(&self.symbol, self.decided_at.timestamp_millis())
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.status, OutcomeStatus::Pending)
    }
}
