//! Market structure analysis: ADX/DI, realized volatility, and Hurst exponent.
//!
//! Every indicator returns `None` when there is not enough usable history.
//! Unknown values are never reported as zero.

use algo_signal_core::{finite, Candle, StructureSnapshot};

/// Minimum candles for any structure value.
pub const MIN_STRUCTURE_CANDLES: usize = 5;

/// Segment lengths tried by the rescaled-range analysis.
const HURST_SCALES: [usize; 10] = [5, 10, 15, 20, 30, 45, 60, 90, 120, 150];

const EPSILON: f64 = 1e-12;

/// Lookbacks used by [`compute_timeframe_structure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureParams {
    pub adx_period: usize,
    pub vol_lookback: usize,
    pub hurst_lookback: usize,
}

impl Default for StructureParams {
    fn default() -> Self {
        Self {
            adx_period: 14,
            vol_lookback: 48,
            hurst_lookback: 240,
        }
    }
}

/// Wilder ADX with the latest directional indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdxReading {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// Computes the structure snapshot of one candle series.
///
/// Requires at least [`MIN_STRUCTURE_CANDLES`] candles; otherwise every field
/// is unknown.
#[must_use]
pub fn compute_timeframe_structure(candles: &[Candle], params: &StructureParams) -> StructureSnapshot {
    if candles.len() < MIN_STRUCTURE_CANDLES {
        return StructureSnapshot::unknown();
    }

    let adx = adx(candles, params.adx_period);
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    StructureSnapshot {
        adx: adx.map(|r| r.adx),
        plus_di: adx.map(|r| r.plus_di),
        minus_di: adx.map(|r| r.minus_di),
        vol: realized_volatility(&closes, params.vol_lookback),
        hurst: hurst_exponent(&closes, params.hurst_lookback),
    }
}

/// Directional movement and true range of each bar against its predecessor.
fn directional_moves(candles: &[Candle]) -> Vec<(f64, f64, f64)> {
    candles
        .windows(2)
        .map(|pair| {
            let (prev, cur) = (&pair[0], &pair[1]);
            let up = cur.high - prev.high;
            let down = prev.low - cur.low;
            let plus_dm = if up > down && up > 0.0 { up } else { 0.0 };
            let minus_dm = if down > up && down > 0.0 { down } else { 0.0 };
            (cur.true_range(prev.close), plus_dm, minus_dm)
        })
        .collect()
}

/// Wilder ADX over `period`.
///
/// The TR/DM sums are seeded over the first `period` bars and then smoothed
/// as `sum - sum / period + x`. A step whose smoothed TR is not positive
/// leaves the previous reading unchanged.
#[must_use]
pub fn adx(candles: &[Candle], period: usize) -> Option<AdxReading> {
    if period == 0 {
        return None;
    }
    let moves = directional_moves(candles);
    if moves.len() < period {
        return None;
    }

    let p = period as f64;
    let (seed, rest) = moves.split_at(period);
    let mut tr_sum: f64 = seed.iter().map(|m| m.0).sum();
    let mut plus_sum: f64 = seed.iter().map(|m| m.1).sum();
    let mut minus_sum: f64 = seed.iter().map(|m| m.2).sum();

    let mut reading: Option<AdxReading> = None;
    let mut update = |tr_sum: f64, plus_sum: f64, minus_sum: f64| {
        if tr_sum.is_nan() || tr_sum <= 0.0 {
            return;
        }
        let plus_di = 100.0 * plus_sum / tr_sum;
        let minus_di = 100.0 * minus_sum / tr_sum;
        let dx = 100.0 * (plus_di - minus_di).abs() / (plus_di + minus_di).max(EPSILON);
        let adx = reading.map_or(dx, |r| (r.adx * (p - 1.0) + dx) / p);
        reading = Some(AdxReading {
            adx,
            plus_di,
            minus_di,
        });
    };

    update(tr_sum, plus_sum, minus_sum);
    for &(tr, plus_dm, minus_dm) in rest {
        tr_sum = tr_sum - tr_sum / p + tr;
        plus_sum = plus_sum - plus_sum / p + plus_dm;
        minus_sum = minus_sum - minus_sum / p + minus_dm;
        update(tr_sum, plus_sum, minus_sum);
    }

    reading.filter(|r| r.adx.is_finite() && r.plus_di.is_finite() && r.minus_di.is_finite())
}

/// Wilder ATR: mean of the first `period` true ranges, then
/// `atr = (atr * (period - 1) + tr) / period`.
#[must_use]
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 {
        return None;
    }
    let ranges: Vec<f64> = candles
        .windows(2)
        .map(|pair| pair[1].true_range(pair[0].close))
        .collect();
    if ranges.len() < period {
        return None;
    }

    let p = period as f64;
    let seed = ranges[..period].iter().sum::<f64>() / p;
    let atr = ranges[period..]
        .iter()
        .fold(seed, |atr, tr| (atr * (p - 1.0) + tr) / p);
    finite(atr)
}

/// Sample standard deviation (N-1) of the most recent simple returns, in percent.
///
/// Uses `min(lookback, closes.len() - 1)` returns; needs at least two finite ones.
#[must_use]
pub fn realized_volatility(closes: &[f64], lookback: usize) -> Option<f64> {
    if closes.len() < 3 {
        return None;
    }
    let n = lookback.min(closes.len().saturating_sub(1));
    let returns: Vec<f64> = closes[closes.len() - n - 1..]
        .windows(2)
        .filter_map(|pair| finite(pair[1] / pair[0] - 1.0))
        .collect();
    if returns.len() < 2 {
        return None;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    finite(variance.sqrt() * 100.0)
}

/// Rescaled range of one segment, or `None` when the segment is flat.
fn rescaled_range(segment: &[f64]) -> Option<f64> {
    let n = segment.len() as f64;
    let mean = segment.iter().sum::<f64>() / n;

    let mut cumulative = 0.0_f64;
    let mut max = f64::NEG_INFINITY;
    let mut min = f64::INFINITY;
    for x in segment {
        cumulative += x - mean;
        max = max.max(cumulative);
        min = min.min(cumulative);
    }

    let std_dev = (segment.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
    let range = max - min;
    (std_dev > 0.0 && range > 0.0).then(|| range / std_dev)
}

/// Least-squares slope of `y` on `x`.
fn regression_slope(points: &[(f64, f64)]) -> Option<f64> {
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let denom: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    if denom <= 0.0 {
        return None;
    }
    let numer: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    finite(numer / denom)
}

/// Hurst exponent by rescaled-range analysis of log prices.
///
/// The R/S increments are the log returns of the last `lookback` closes, so
/// each segment's cumulative deviation traces its log-price path.
///
/// For every scale admitting at least two non-overlapping segments, the
/// per-segment R/S values are averaged; the estimate is the raw slope of
/// `ln(mean R/S)` on `ln(scale)`, clamped to `[0, 1]`. Needs two valid scales.
#[must_use]
pub fn hurst_exponent(closes: &[f64], lookback: usize) -> Option<f64> {
    if closes.len() < 2 {
        return None;
    }
    let n = lookback.min(closes.len().saturating_sub(1));
    let log_returns: Vec<f64> = closes[closes.len() - n - 1..]
        .windows(2)
        .map(|pair| (pair[1] / pair[0]).ln())
        .collect();
    if log_returns.iter().any(|r| !r.is_finite()) {
        return None;
    }

    let points: Vec<(f64, f64)> = HURST_SCALES
        .iter()
        .filter(|&&scale| log_returns.len() / scale >= 2)
        .filter_map(|&scale| {
            let values: Vec<f64> = log_returns
                .chunks_exact(scale)
                .filter_map(rescaled_range)
                .collect();
            if values.is_empty() {
                return None;
            }
            let mean_rs = values.iter().sum::<f64>() / values.len() as f64;
            Some(((scale as f64).ln(), mean_rs.ln()))
        })
        .collect();

    if points.len() < 2 {
        return None;
    }
    regression_slope(&points).map(|slope| slope.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================
    // Fixtures
    // ============================================

    /// 16-bar reference series (open, high, low, close).
    fn reference_bars() -> Vec<Candle> {
        [
            (100.0, 102.0, 99.0, 101.0),
            (101.0, 104.0, 100.0, 103.0),
            (103.0, 105.0, 101.0, 102.0),
            (102.0, 103.0, 98.0, 99.0),
            (99.0, 101.0, 97.0, 100.0),
            (100.0, 106.0, 99.0, 105.0),
            (105.0, 108.0, 104.0, 107.0),
            (107.0, 109.0, 105.0, 106.0),
            (106.0, 107.0, 102.0, 103.0),
            (103.0, 105.0, 101.0, 104.0),
            (104.0, 110.0, 103.0, 109.0),
            (109.0, 112.0, 107.0, 111.0),
            (111.0, 113.0, 108.0, 109.0),
            (109.0, 111.0, 106.0, 107.0),
            (107.0, 108.0, 103.0, 104.0),
            (104.0, 107.0, 102.0, 106.0),
        ]
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Candle::new(i as i64 * 1_800_000, o, h, l, c))
        .collect()
    }

    fn lcg(seed: u64) -> impl FnMut() -> f64 {
        let mut state = seed;
        move || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 11) as f64 / (1u64 << 53) as f64
        }
    }

    // ============================================
    // ADX / ATR
    // ============================================

    #[test]
    fn adx_matches_hand_computed_values() {
        let bars = reference_bars();

        let r14 = adx(&bars, 14).unwrap();
        assert!((r14.adx - 18.4738).abs() < 0.01);
        assert!((r14.plus_di - 25.8910).abs() < 0.01);
        assert!((r14.minus_di - 19.1824).abs() < 0.01);

        let r5 = adx(&bars, 5).unwrap();
        assert!((r5.adx - 26.5034).abs() < 0.01);
        assert!((r5.plus_di - 17.0702).abs() < 0.01);
        assert!((r5.minus_di - 24.0187).abs() < 0.01);
    }

    #[test]
    fn atr_matches_hand_computed_values() {
        let bars = reference_bars();
        assert!((atr(&bars, 14).unwrap() - 4.8673).abs() < 0.01);
        assert!((atr(&bars, 5).unwrap() - 4.9968).abs() < 0.01);
    }

    #[test]
    fn indicators_are_deterministic() {
        let bars = reference_bars();
        assert_eq!(adx(&bars, 14), adx(&bars, 14));
        assert_eq!(atr(&bars, 14), atr(&bars, 14));
    }

    #[test]
    fn adx_needs_period_bars() {
        let bars = reference_bars();
        assert!(adx(&bars[..14], 14).is_none());
        assert!(adx(&bars[..15], 14).is_some());
        assert!(adx(&bars, 0).is_none());
        assert!(atr(&bars[..14], 14).is_none());
    }

    #[test]
    fn flat_series_has_no_adx() {
        let flat: Vec<Candle> = (0..20).map(|i| Candle::new(i, 5.0, 5.0, 5.0, 5.0)).collect();
        assert!(adx(&flat, 14).is_none());
        assert_eq!(atr(&flat, 14), Some(0.0));
    }

    fn trend_then_flat() -> Vec<Candle> {
        let mut bars: Vec<Candle> = (0..20)
            .map(|i| {
                let close = 100.0 + i as f64;
                Candle::new(i, close - 1.0, close + 0.5, close - 0.5, close)
            })
            .collect();
        bars.extend((20..35).map(|i| Candle::new(i, 119.0, 119.0, 119.0, 119.0)));
        bars
    }

    #[test]
    fn adx_carries_through_flat_tail() {
        let bars = trend_then_flat();
        let at_trend_end = adx(&bars[..20], 14).unwrap();
        assert!(at_trend_end.adx > 99.0);

        for end in 21..=bars.len() {
            let r = adx(&bars[..end], 14).unwrap();
            assert!((r.adx - at_trend_end.adx).abs() < 1e-9, "adx moved at bar {end}");
            assert!((r.plus_di - at_trend_end.plus_di).abs() < 1e-9);
            assert!(r.minus_di.abs() < f64::EPSILON);
        }
        assert!(atr(&bars, 14).unwrap() < atr(&bars[..20], 14).unwrap());
    }

    // ============================================
    // Volatility
    // ============================================

    #[test]
    fn volatility_uses_recent_returns() {
        let closes: Vec<f64> = reference_bars().iter().map(|c| c.close).collect();
        let vol = realized_volatility(&closes, 10).unwrap();
        assert!((vol - 2.537_591_496_352_817).abs() < 1e-9);
    }

    #[test]
    fn volatility_needs_two_returns() {
        assert!(realized_volatility(&[1.0, 1.1], 48).is_none());
        assert!(realized_volatility(&[1.0], 48).is_none());
        assert!(realized_volatility(&[], 48).is_none());
        assert!(realized_volatility(&[1.0, 1.1, 1.0], 48).is_some());
    }

    // ============================================
    // Hurst
    // ============================================

    #[test]
    fn hurst_of_alternating_returns_is_mean_reverting() {
        let mut closes = vec![100.0];
        for i in 0..240 {
            let step = if i % 2 == 0 { 0.01_f64 } else { -0.01 };
            let last = closes[closes.len() - 1];
            closes.push(last * step.exp());
        }
        let h = hurst_exponent(&closes, 240).unwrap();
        assert!(h < 0.1, "expected strong mean reversion, got {h}");
    }

    #[test]
    fn hurst_of_random_walk_is_bounded() {
        let mut next = lcg(42);
        let mut closes = vec![100.0];
        for _ in 0..300 {
            let last = closes[closes.len() - 1];
            closes.push(last * ((next() - 0.5) * 0.02).exp());
        }
        let h = hurst_exponent(&closes, 240).unwrap();
        assert!((0.3..0.8).contains(&h), "random walk hurst {h}");
    }

    #[test]
    fn hurst_needs_two_scales() {
        // 15 returns admit only the 5-bar scale
        let closes: Vec<f64> = (0..16).map(|i| 100.0 + f64::from(i % 3)).collect();
        assert!(hurst_exponent(&closes, 240).is_none());
    }

    // ============================================
    // Snapshot
    // ============================================

    #[test]
    fn short_series_is_unknown() {
        let bars = reference_bars();
        let snapshot = compute_timeframe_structure(&bars[..4], &StructureParams::default());
        assert_eq!(snapshot, StructureSnapshot::unknown());
    }

    #[test]
    fn snapshot_fills_what_history_allows() {
        let bars = reference_bars();
        let params = StructureParams {
            adx_period: 14,
            vol_lookback: 10,
            hurst_lookback: 240,
        };
        let snapshot = compute_timeframe_structure(&bars, &params);

        assert!((snapshot.adx.unwrap() - 18.4738).abs() < 0.01);
        assert!(snapshot.plus_di.unwrap() > snapshot.minus_di.unwrap());
        assert!((snapshot.vol.unwrap() - 2.5376).abs() < 1e-3);
        // 15 returns are too few for two R/S scales
        assert!(snapshot.hurst.is_none());
    }
}
