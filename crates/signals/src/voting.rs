//! Quorum voting across the five delta horizons.

use algo_signal_core::{DeltaSet, Direction, EngineConfig, Horizon, PerHorizon, TimeframeStructure, VolMultipliers, VoteSet};

/// Parameters of the voting stage.
#[derive(Debug, Clone, PartialEq)]
pub struct VotingParams {
    pub multipliers: VolMultipliers,
    /// Thresholds (percent) used for horizons without usable volatility
    pub static_thresholds: PerHorizon<f64>,
    /// Requested quorum, clamped to 3..=5
    pub quorum: usize,
    pub macro_long_veto_pct: f64,
    pub macro_short_veto_pct: f64,
}

impl Default for VotingParams {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for VotingParams {
    fn from(engine: &EngineConfig) -> Self {
        Self {
            multipliers: engine.vol_multipliers,
            static_thresholds: engine.static_thresholds,
            quorum: engine.quorum,
            macro_long_veto_pct: engine.macro_long_veto_pct,
            macro_short_veto_pct: engine.macro_short_veto_pct,
        }
    }
}

/// +1 above `threshold`, -1 below `-threshold`, else 0. The boundary is neutral.
#[must_use]
pub fn vote(x: f64, threshold: f64) -> i8 {
    if x > threshold {
        1
    } else if x < -threshold {
        -1
    } else {
        0
    }
}

fn multiplier(multipliers: &VolMultipliers, horizon: Horizon) -> Option<f64> {
    match horizon {
        Horizon::M30 => Some(multipliers.m30),
        Horizon::H1 => Some(multipliers.h1),
        Horizon::H4 => Some(multipliers.h4),
        Horizon::D24 | Horizon::D7 => None,
    }
}

/// Per-horizon vote thresholds: `vol * multiplier` where both are usable,
/// otherwise the static fallback.
#[must_use]
pub fn vote_thresholds(structure: &TimeframeStructure, params: &VotingParams) -> PerHorizon<f64> {
    PerHorizon::from_fn(|horizon| {
        let adaptive = structure
            .vol_for(horizon)
            .filter(|vol| vol.is_finite() && *vol >= 0.0)
            .zip(multiplier(&params.multipliers, horizon).filter(|m| *m > 0.0))
            .map(|(vol, m)| vol * m);
        adaptive.unwrap_or(*params.static_thresholds.get(horizon))
    })
}

/// Votes each horizon; a missing or non-finite delta votes 0.
#[must_use]
pub fn cast_votes(deltas: &DeltaSet, thresholds: &PerHorizon<f64>) -> VoteSet {
    VoteSet::new(PerHorizon::from_fn(|horizon| {
        deltas
            .get(horizon)
            .filter(|d| d.is_finite())
            .map_or(0, |d| vote(d, *thresholds.get(horizon)))
    }))
}

/// Agreeing votes needed: `max(3, min(quorum, finite deltas))`, quorum clamped to 3..=5.
#[must_use]
pub fn required_votes(quorum: usize, finite_deltas: usize) -> usize {
    quorum.clamp(3, 5).min(finite_deltas).max(3)
}

/// Direction carried by a quorum of votes. LONG is checked first.
#[must_use]
pub fn quorum_direction(votes: &VoteSet, deltas: &DeltaSet, quorum: usize) -> Option<Direction> {
    let finite = deltas.iter().filter(|(_, d)| d.is_some_and(f64::is_finite)).count();
    let need = required_votes(quorum, finite);

    if votes.count(1) >= need {
        Some(Direction::Long)
    } else if votes.count(-1) >= need {
        Some(Direction::Short)
    } else {
        None
    }
}

/// BTC macro gate: LONG is vetoed when BTC's 24h change is at or below the
/// long limit, SHORT when at or above the short limit. No BTC data disables the gate.
#[must_use]
pub fn macro_allows(direction: Direction, btc_change_24h: Option<f64>, params: &VotingParams) -> bool {
    let Some(btc) = btc_change_24h.filter(|c| c.is_finite()) else {
        return true;
    };
    match direction {
        Direction::Long => btc > params.macro_long_veto_pct,
        Direction::Short => btc < params.macro_short_veto_pct,
    }
}

/// Full voting stage: thresholds, votes, quorum, and macro gate.
///
/// Returns `None` when no direction reaches quorum or the macro gate vetoes it.
#[must_use]
pub fn decide(
    deltas: &DeltaSet,
    structure: &TimeframeStructure,
    btc_change_24h: Option<f64>,
    params: &VotingParams,
) -> Option<(VoteSet, Direction)> {
    let thresholds = vote_thresholds(structure, params);
    let votes = cast_votes(deltas, &thresholds);
    let direction = quorum_direction(&votes, deltas, params.quorum)?;
    macro_allows(direction, btc_change_24h, params).then_some((votes, direction))
}
