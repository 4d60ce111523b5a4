//! ATR-based entry, stop-loss, and take-profit levels with tick rounding.

use crate::structure::atr;
use algo_signal_core::{Candle, Direction, EngineConfig, TradeLevels};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Shortest validity window of a signal.
pub const MIN_VALID_MINUTES: i64 = 15;

/// Parameters of level generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelParams {
    pub atr_period: usize,
    /// Stop-loss distance in ATR multiples before confidence tiers
    pub base_sl_atr: f64,
    /// Take-profit distance in ATR multiples before confidence tiers
    pub base_tp_atr: f64,
    pub valid_minutes: i64,
}

impl Default for LevelParams {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for LevelParams {
    fn from(engine: &EngineConfig) -> Self {
        Self {
            atr_period: engine.atr_period,
            base_sl_atr: engine.base_sl_atr,
            base_tp_atr: engine.base_tp_atr,
            valid_minutes: engine.valid_minutes,
        }
    }
}

/// Stop-loss and take-profit ATR multiples for a confidence.
#[must_use]
pub fn atr_multipliers(confidence_pct: u8, base_sl: f64, base_tp: f64) -> (f64, f64) {
    match confidence_pct {
        90.. => ((base_sl * 0.9).max(0.8), base_tp.max(1.8)),
        80..=89 => (base_sl, base_tp.max(1.9)),
        75..=79 => (base_sl.max(1.1), base_tp.max(2.0)),
        _ => (base_sl, base_tp),
    }
}

/// Rounds `price` to the nearest multiple of `tick` (half away from zero),
/// expressed with the tick's own decimal precision.
///
/// Returns `None` for a non-positive tick or a non-finite price.
#[must_use]
pub fn round_to_tick(price: f64, tick: Decimal) -> Option<Decimal> {
    if tick <= Decimal::ZERO {
        return None;
    }
    let price = Decimal::from_f64(price)?;
    let steps = price
        .checked_div(tick)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    Some(steps.checked_mul(tick)?.round_dp(tick.normalize().scale()))
}

/// Expiry of a signal generated at `now`.
#[must_use]
pub fn valid_until(now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    now + Duration::minutes(minutes.max(MIN_VALID_MINUTES))
}

/// Builds trade levels from the 30-minute series.
///
/// Needs at least `atr_period + 2` candles and a last close that does not
/// round to zero; otherwise returns `None`.
#[must_use]
pub fn generate_levels(
    k30: &[Candle],
    last_close: f64,
    tick: Decimal,
    direction: Direction,
    confidence_pct: u8,
    params: &LevelParams,
) -> Option<TradeLevels> {
    if k30.len() < params.atr_period + 2 {
        return None;
    }
    let atr = atr(k30, params.atr_period)?;

    let entry = round_to_tick(last_close, tick).filter(|e| *e > Decimal::ZERO)?;
    let entry_f = entry.to_f64()?;

    let (sl_mult, tp_mult) = atr_multipliers(confidence_pct, params.base_sl_atr, params.base_tp_atr);
    let sign = direction.sign();
    let sl = round_to_tick(entry_f - sign * sl_mult * atr, tick)?;
    let tp = round_to_tick(entry_f + sign * tp_mult * atr, tick)?;

    let risk = (entry - sl).abs();
    let reward = (tp - entry).abs();
    let rr = if risk.is_zero() {
        None
    } else {
        (reward / risk).to_f64()
    };
    let expected_move_pct = (reward / entry).to_f64()? * 100.0;

    Some(TradeLevels {
        entry,
        sl,
        tp,
        atr,
        rr,
        expected_move_pct,
    })
}
