//! Well-known key-value store keys.

/// Latest signal array written by each build cycle.
pub const SIGNALS_LATEST: &str = "signals:latest";

/// Learned confidence calibration document.
pub const CONFIDENCE_CONFIG: &str = "confidence:config";

/// Rolling, capped list of outcome record keys (oldest first).
pub const OUTCOME_INDEX: &str = "outcomes:index";

/// Key of one outcome record: `outcome:{SYMBOL}:{decided_at_ms}`.
#[must_use]
pub fn outcome_key(symbol: &str, decided_at_ms: i64) -> String {
    format!("outcome:{}:{decided_at_ms}", symbol.to_uppercase())
}
