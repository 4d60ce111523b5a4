//! Market data primitives: candles, candle timeframes, and decision horizons.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One OHLC bar. Series are kept in ascending `open_time` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time, Unix milliseconds
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    #[must_use]
    pub const fn new(open_time: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
        }
    }

    /// Returns true if every price field is a finite number.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.open.is_finite() && self.high.is_finite() && self.low.is_finite() && self.close.is_finite()
    }

    /// True range against the previous close.
    #[must_use]
    pub fn true_range(&self, prev_close: f64) -> f64 {
        (self.high - self.low)
            .max((self.high - prev_close).abs())
            .max((self.low - prev_close).abs())
    }
}

/// Candle series granularity fetched from exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
}

impl Timeframe {
    pub const ALL: [Self; 3] = [Self::M30, Self::H1, Self::H4];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
        }
    }

    #[must_use]
    pub const fn duration_ms(self) -> i64 {
        match self {
            Self::M30 => 1_800_000,
            Self::H1 => 3_600_000,
            Self::H4 => 14_400_000,
        }
    }

    /// The decision horizon fed by this series' 1-bar delta.
    #[must_use]
    pub const fn horizon(self) -> Horizon {
        match self {
            Self::M30 => Horizon::M30,
            Self::H1 => Horizon::H1,
            Self::H4 => Horizon::H4,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price-change horizons that vote on direction and feed the confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Horizon {
    M30,
    H1,
    H4,
    D24,
    D7,
}

impl Horizon {
    pub const ALL: [Self; 5] = [Self::M30, Self::H1, Self::H4, Self::D24, Self::D7];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::M30 => "m30",
            Self::H1 => "h1",
            Self::H4 => "h4",
            Self::D24 => "d24",
            Self::D7 => "d7",
        }
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One value per decision horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerHorizon<T> {
    pub m30: T,
    pub h1: T,
    pub h4: T,
    pub d24: T,
    pub d7: T,
}

impl<T> PerHorizon<T> {
    /// Builds a value for every horizon from a function.
    pub fn from_fn(mut f: impl FnMut(Horizon) -> T) -> Self {
        Self {
            m30: f(Horizon::M30),
            h1: f(Horizon::H1),
            h4: f(Horizon::H4),
            d24: f(Horizon::D24),
            d7: f(Horizon::D7),
        }
    }

    #[must_use]
    pub const fn get(&self, horizon: Horizon) -> &T {
        match horizon {
            Horizon::M30 => &self.m30,
            Horizon::H1 => &self.h1,
            Horizon::H4 => &self.h4,
            Horizon::D24 => &self.d24,
            Horizon::D7 => &self.d7,
        }
    }

    pub fn get_mut(&mut self, horizon: Horizon) -> &mut T {
        match horizon {
            Horizon::M30 => &mut self.m30,
            Horizon::H1 => &mut self.h1,
            Horizon::H4 => &mut self.h4,
            Horizon::D24 => &mut self.d24,
            Horizon::D7 => &mut self.d7,
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(Horizon, &T) -> U) -> PerHorizon<U> {
        PerHorizon::from_fn(|h| f(h, self.get(h)))
    }

    /// Iterates `(horizon, value)` pairs in horizon order.
    pub fn iter(&self) -> impl Iterator<Item = (Horizon, &T)> {
        Horizon::ALL.into_iter().map(move |h| (h, self.get(h)))
    }
}

/// Percent price change per horizon; any horizon may be unknown.
pub type DeltaSet = PerHorizon<Option<f64>>;

/// Keeps a value only if it is a finite number.
#[must_use]
pub fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Percent change of the last close against the bar before it.
///
/// Returns `None` when fewer than two bars exist or the result is not finite.
#[must_use]
pub fn last_bar_delta_pct(candles: &[Candle]) -> Option<f64> {
    let [.., prior, last] = candles else {
        return None;
    };
    finite((last.close - prior.close) / prior.close * 100.0)
}
