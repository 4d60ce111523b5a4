pub mod confidence;
pub mod cycle;
pub mod levels;
pub mod outcomes;
pub mod pipeline;
pub mod regime;
pub mod structure;
pub mod voting;

// Re-export the per-asset stages for convenience
pub use confidence::{
    apply_regime, confidence_from, default_scales, default_weights, score, ConfidenceConfig,
    ConfidenceModel, ConfigSource,
};
pub use levels::{atr_multipliers, generate_levels, round_to_tick, LevelParams};
pub use regime::classify_regime;
pub use structure::{adx, atr, compute_timeframe_structure, hurst_exponent, realized_volatility, StructureParams};
pub use voting::{decide, vote, VotingParams};

// Re-export the cycle drivers
pub use cycle::{rank_signals, CycleReport, SignalBuilder};
pub use outcomes::{resolve_outcome, OutcomeTracker, ResolveReport};
pub use pipeline::{evaluate_asset, AssetContext, DailyDeltas, SkipReason};
