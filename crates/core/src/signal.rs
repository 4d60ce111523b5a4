//! Signal engine output types: structure snapshots, regime, votes, and the
//! assembled trade signal.

use crate::market::{DeltaSet, Horizon, PerHorizon, Timeframe};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short.
    #[must_use]
    pub const fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => f.write_str("LONG"),
            Self::Short => f.write_str("SHORT"),
        }
    }
}

/// Market structure of one candle timeframe.
///
/// Every field is `None` when there was not enough history to compute it.
/// An unknown value is never reported as zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StructureSnapshot {
    pub adx: Option<f64>,
    pub plus_di: Option<f64>,
    pub minus_di: Option<f64>,
    /// Realized volatility of simple returns, in percent
    pub vol: Option<f64>,
    pub hurst: Option<f64>,
}

impl StructureSnapshot {
    /// A snapshot with every field unknown.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            adx: None,
            plus_di: None,
            minus_di: None,
            vol: None,
            hurst: None,
        }
    }
}

/// Structure snapshots for the three candle timeframes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeframeStructure {
    pub m30: StructureSnapshot,
    pub h1: StructureSnapshot,
    pub h4: StructureSnapshot,
}

impl TimeframeStructure {
    #[must_use]
    pub const fn get(&self, timeframe: Timeframe) -> &StructureSnapshot {
        match timeframe {
            Timeframe::M30 => &self.m30,
            Timeframe::H1 => &self.h1,
            Timeframe::H4 => &self.h4,
        }
    }

    /// Realized volatility of the series that backs `horizon`, if any.
    #[must_use]
    pub const fn vol_for(&self, horizon: Horizon) -> Option<f64> {
        match horizon {
            Horizon::M30 => self.m30.vol,
            Horizon::H1 => self.h1.vol,
            Horizon::H4 => self.h4.vol,
            Horizon::D24 | Horizon::D7 => None,
        }
    }
}

/// Coarse market state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Trend,
    Range,
    Event,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trend => f.write_str("trend"),
            Self::Range => f.write_str("range"),
            Self::Event => f.write_str("event"),
        }
    }
}

/// Output of the regime classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeInfo {
    pub regime: Regime,
    /// Timeframe whose structure drives the regime adjustment
    pub focus: Timeframe,
    pub low_vol: bool,
    pub event_tf: Option<Timeframe>,
    pub best_adx: Option<f64>,
}

/// Per-horizon votes in {-1, 0, +1} and their sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoteSet {
    #[serde(flatten)]
    pub votes: PerHorizon<i8>,
    pub sum: i8,
}

impl VoteSet {
    #[must_use]
    pub fn new(votes: PerHorizon<i8>) -> Self {
        let sum = votes.iter().map(|(_, v)| *v).sum();
        Self { votes, sum }
    }

    /// Number of horizons voting `vote`.
    #[must_use]
    pub fn count(&self, vote: i8) -> usize {
        self.votes.iter().filter(|(_, v)| **v == vote).count()
    }
}

/// ATR-based price levels of a signal, rounded to the instrument tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeLevels {
    #[serde(with = "rust_decimal::serde::float")]
    pub entry: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub sl: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub tp: Decimal,
    pub atr: f64,
    /// Reward-to-risk ratio; `None` when the rounded risk is zero
    pub rr: Option<f64>,
    pub expected_move_pct: f64,
}

/// A directional trade signal for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub exchange: String,
    pub pair: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub tick_size: Decimal,
    pub deltas: DeltaSet,
    pub votes: VoteSet,
    pub direction: Direction,
    pub confidence_pct: u8,
    pub regime: RegimeInfo,
    pub structure: TimeframeStructure,
    #[serde(flatten)]
    pub levels: TradeLevels,
    pub generated_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}
