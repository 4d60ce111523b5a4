//! Regime classification from per-timeframe structure.

use algo_signal_core::{Regime, RegimeInfo, Timeframe, TimeframeStructure};

/// Volatility (percent) above which a timeframe is in an event regime.
#[must_use]
pub const fn event_vol_threshold(timeframe: Timeframe) -> f64 {
    match timeframe {
        Timeframe::M30 => 1.6,
        Timeframe::H1 => 1.8,
        Timeframe::H4 => 2.2,
    }
}

/// Volatility (percent) at or below which a timeframe counts as quiet.
#[must_use]
pub const fn low_vol_threshold(timeframe: Timeframe) -> f64 {
    match timeframe {
        Timeframe::M30 => 0.55,
        Timeframe::H1 => 0.75,
        Timeframe::H4 => 0.95,
    }
}

/// Minimum ADX for a trend regime.
pub const TREND_ADX: f64 = 22.0;

/// Trend candidates in preference order; earlier timeframes win ADX ties.
const TREND_PREFERENCE: [Timeframe; 3] = [Timeframe::H4, Timeframe::H1, Timeframe::M30];

/// Classifies the regime. First match wins: event, then trend, then range.
///
/// - **event**: some timeframe's volatility exceeds its event threshold; the
///   one with the largest `vol / threshold` becomes the focus.
/// - **trend**: the highest ADX among h4, h1, m30 is at least [`TREND_ADX`].
/// - **range**: otherwise. Low-vol when at least two timeframes are quiet, in
///   which case the focus is m30; else the best-ADX timeframe (h1 when no ADX
///   is known).
#[must_use]
pub fn classify_regime(structure: &TimeframeStructure) -> RegimeInfo {
    let event = Timeframe::ALL
        .iter()
        .filter_map(|&tf| {
            let vol = structure.get(tf).vol?;
            let threshold = event_vol_threshold(tf);
            (vol > threshold).then_some((tf, vol / threshold))
        })
        .fold(None::<(Timeframe, f64)>, |best, (tf, excess)| match best {
            Some((_, best_excess)) if best_excess >= excess => best,
            _ => Some((tf, excess)),
        });

    if let Some((tf, _)) = event {
        return RegimeInfo {
            regime: Regime::Event,
            focus: tf,
            low_vol: false,
            event_tf: Some(tf),
            best_adx: structure.get(tf).adx,
        };
    }

    let best = TREND_PREFERENCE
        .iter()
        .filter_map(|&tf| structure.get(tf).adx.map(|adx| (tf, adx)))
        .fold(None::<(Timeframe, f64)>, |best, (tf, adx)| match best {
            Some((_, best_adx)) if best_adx >= adx => best,
            _ => Some((tf, adx)),
        });

    if let Some((tf, adx)) = best.filter(|(_, adx)| *adx >= TREND_ADX) {
        return RegimeInfo {
            regime: Regime::Trend,
            focus: tf,
            low_vol: false,
            event_tf: None,
            best_adx: Some(adx),
        };
    }

    let quiet = Timeframe::ALL
        .iter()
        .filter(|&&tf| {
            structure
                .get(tf)
                .vol
                .is_some_and(|vol| vol <= low_vol_threshold(tf))
        })
        .count();
    let low_vol = quiet >= 2;

    let focus = if low_vol {
        Timeframe::M30
    } else {
        best.map_or(Timeframe::H1, |(tf, _)| tf)
    };

    RegimeInfo {
        regime: Regime::Range,
        focus,
        low_vol,
        event_tf: None,
        best_adx: best.map(|(_, adx)| adx),
    }
}
