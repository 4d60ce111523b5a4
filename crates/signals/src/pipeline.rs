//! Per-asset signal evaluation.
//!
//! [`evaluate_asset`] is a pure function of one asset's candle bundle and an
//! immutable [`AssetContext`] shared by every task of a build cycle.

use crate::confidence::{apply_regime, confidence_from, ConfidenceConfig};
use crate::levels::{generate_levels, valid_until, LevelParams};
use crate::regime::classify_regime;
use crate::structure::{compute_timeframe_structure, StructureParams};
use crate::voting::{cast_votes, macro_allows, quorum_direction, vote_thresholds, VotingParams};
use algo_signal_core::{finite, DeltaSet, EngineConfig, Signal, Timeframe, TimeframeStructure};
use algo_signal_data::CandleBundle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Read-only inputs shared by all per-asset evaluations of one cycle.
#[derive(Debug, Clone)]
pub struct AssetContext {
    pub structure: StructureParams,
    pub voting: VotingParams,
    pub levels: LevelParams,
    pub confidence: Arc<ConfidenceConfig>,
    /// BTC 24h change for the macro gate; `None` disables the gate
    pub btc_change_24h: Option<f64>,
    pub now: DateTime<Utc>,
}

impl AssetContext {
    #[must_use]
    pub fn new(
        engine: &EngineConfig,
        confidence: Arc<ConfidenceConfig>,
        btc_change_24h: Option<f64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            structure: StructureParams {
                adx_period: engine.adx_period,
                vol_lookback: engine.vol_lookback,
                hurst_lookback: engine.hurst_lookback,
            },
            voting: VotingParams::from(engine),
            levels: LevelParams::from(engine),
            confidence,
            btc_change_24h,
            now,
        }
    }
}

/// Daily horizons taken from the market overview.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DailyDeltas {
    pub d24: Option<f64>,
    pub d7: Option<f64>,
}

/// Why an asset produced no signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoData,
    NoQuorum,
    MacroVeto,
    RegimeVeto,
    NoLevels,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoData => "no_data",
            Self::NoQuorum => "no_quorum",
            Self::MacroVeto => "macro_veto",
            Self::RegimeVeto => "regime_veto",
            Self::NoLevels => "no_levels",
        };
        f.write_str(s)
    }
}

/// Structure snapshots of the bundle's three series.
#[must_use]
pub fn bundle_structure(bundle: &CandleBundle, params: &StructureParams) -> TimeframeStructure {
    TimeframeStructure {
        m30: compute_timeframe_structure(bundle.series(Timeframe::M30), params),
        h1: compute_timeframe_structure(bundle.series(Timeframe::H1), params),
        h4: compute_timeframe_structure(bundle.series(Timeframe::H4), params),
    }
}

/// Full delta set: short horizons from the exchange, daily ones from the overview.
#[must_use]
pub fn delta_set(bundle: &CandleBundle, daily: DailyDeltas) -> DeltaSet {
    DeltaSet {
        m30: finite(bundle.deltas.m30),
        h1: finite(bundle.deltas.h1),
        h4: finite(bundle.deltas.h4),
        d24: daily.d24.and_then(finite),
        d7: daily.d7.and_then(finite),
    }
}

/// Runs structure, regime, voting, confidence, and levels for one asset.
///
/// # Errors
///
/// Returns the [`SkipReason`] when the asset yields no signal this cycle.
pub fn evaluate_asset(
    symbol: &str,
    bundle: &CandleBundle,
    daily: DailyDeltas,
    ctx: &AssetContext,
) -> Result<Signal, SkipReason> {
    let structure = bundle_structure(bundle, &ctx.structure);
    let regime = classify_regime(&structure);
    let deltas = delta_set(bundle, daily);

    let thresholds = vote_thresholds(&structure, &ctx.voting);
    let votes = cast_votes(&deltas, &thresholds);
    let direction = quorum_direction(&votes, &deltas, ctx.voting.quorum).ok_or(SkipReason::NoQuorum)?;
    if !macro_allows(direction, ctx.btc_change_24h, &ctx.voting) {
        return Err(SkipReason::MacroVeto);
    }

    let base = confidence_from(&deltas, direction, &votes, &ctx.confidence);
    let confidence_pct =
        apply_regime(base, direction, &votes, &regime, &structure).ok_or(SkipReason::RegimeVeto)?;

    let levels = generate_levels(
        &bundle.k30,
        bundle.last_close,
        bundle.tick_size,
        direction,
        confidence_pct,
        &ctx.levels,
    )
    .ok_or(SkipReason::NoLevels)?;

    Ok(Signal {
        symbol: symbol.to_uppercase(),
        exchange: bundle.exchange.clone(),
        pair: bundle.pair.clone(),
        tick_size: bundle.tick_size,
        deltas,
        votes,
        direction,
        confidence_pct,
        regime,
        structure,
        levels,
        generated_at: ctx.now,
        valid_until: valid_until(ctx.now, ctx.levels.valid_minutes),
    })
}


#[cfg(test)]
mod tests {
    use super::fixtures::{bundle, mirrored, uptrend};
    use super::*;
    use algo_signal_core::{Direction, Regime};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ctx(btc_change_24h: Option<f64>) -> AssetContext {
        AssetContext::new(
            &EngineConfig::default(),
            Arc::new(ConfidenceConfig::default()),
            btc_change_24h,
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        )
    }

    const UP_DAYS: DailyDeltas = DailyDeltas {
        d24: Some(3.0),
        d7: Some(6.0),
    };

    #[test]
    fn uptrend_yields_trend_long() {
        let b = bundle(uptrend(60), dec!(0.01));
        let signal = evaluate_asset("btc", &b, UP_DAYS, &ctx(Some(2.0))).unwrap();

        assert_eq!(signal.symbol, "BTC");
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.votes.sum, 5);
        assert_eq!(signal.regime.regime, Regime::Trend);
        assert!(signal.confidence_pct >= 85);
        assert!(signal.levels.sl < signal.levels.entry);
        assert!(signal.levels.tp > signal.levels.entry);
        assert_eq!(signal.valid_until - signal.generated_at, chrono::Duration::minutes(90));
    }

    #[test]
    fn downtrend_yields_short() {
        let b = bundle(mirrored(&uptrend(60)), dec!(0.01));
        let down_days = DailyDeltas {
            d24: Some(-3.0),
            d7: Some(-6.0),
        };
        let signal = evaluate_asset("eth", &b, down_days, &ctx(None)).unwrap();
        assert_eq!(signal.direction, Direction::Short);
        assert!(signal.levels.sl > signal.levels.entry);
    }

    #[test]
    fn btc_drop_vetoes_long() {
        let b = bundle(uptrend(60), dec!(0.01));
        assert_eq!(
            evaluate_asset("sol", &b, UP_DAYS, &ctx(Some(-0.5))).unwrap_err(),
            SkipReason::MacroVeto
        );
    }

    #[test]
    fn conflicting_daily_deltas_lose_quorum_only_with_high_quorum() {
        let b = bundle(uptrend(60), dec!(0.01));
        let mixed = DailyDeltas {
            d24: Some(-3.0),
            d7: Some(-6.0),
        };
        assert!(evaluate_asset("ada", &b, mixed, &ctx(None)).is_ok());

        let mut strict = ctx(None);
        strict.voting.quorum = 4;
        assert_eq!(evaluate_asset("ada", &b, mixed, &strict).unwrap_err(), SkipReason::NoQuorum);
    }

    #[test]
    fn short_history_has_no_levels() {
        let b = bundle(uptrend(10), dec!(0.01));
        assert_eq!(
            evaluate_asset("xrp", &b, UP_DAYS, &ctx(None)).unwrap_err(),
            SkipReason::NoLevels
        );
    }

    #[test]
    fn missing_daily_deltas_stay_unknown() {
        let b = bundle(uptrend(60), dec!(0.01));
        let deltas = delta_set(&b, DailyDeltas::default());
        assert!(deltas.d24.is_none() && deltas.d7.is_none());
        assert!(deltas.m30.is_some());
    }
}
