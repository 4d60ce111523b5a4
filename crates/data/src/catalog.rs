//! Once-per-cycle instrument catalog.
//!
//! Tick sizes are fetched from every exchange at the start of a build cycle
//! and then shared read-only by all per-asset tasks.

use crate::exchange::{ExchangeAdapter, Instrument};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Tick sizes per exchange and pair.
///
/// An exchange missing from the catalog means its instrument list could not
/// be fetched this cycle, which is different from an exchange that lists no
/// such pair.
#[derive(Debug, Clone, Default)]
pub struct InstrumentCatalog {
    ticks: HashMap<String, HashMap<String, Decimal>>,
}

impl InstrumentCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches instrument lists from all adapters concurrently.
    ///
    /// Failed or timed-out exchanges are logged and left out of the catalog.
    pub async fn load(adapters: &[Arc<dyn ExchangeAdapter>], timeout: Duration) -> Self {
        let fetches = adapters.iter().map(|adapter| async move {
            let result = tokio::time::timeout(timeout, adapter.instruments()).await;
            (adapter.name().to_string(), result)
        });

        let mut catalog = Self::new();
        for (exchange, result) in join_all(fetches).await {
            match result {
                Ok(Ok(instruments)) => {
                    tracing::debug!(exchange = %exchange, count = instruments.len(), "Loaded instruments");
                    catalog.insert(&exchange, instruments);
                }
                Ok(Err(e)) => {
                    tracing::warn!(exchange = %exchange, error = %e, "Failed to load instruments");
                }
                Err(_) => {
                    tracing::warn!(exchange = %exchange, timeout_secs = timeout.as_secs(), "Instrument list timed out");
                }
            }
        }
        catalog
    }

    pub fn insert(&mut self, exchange: &str, instruments: Vec<Instrument>) {
        let entry = self.ticks.entry(exchange.to_string()).or_default();
        for instrument in instruments {
            entry.insert(instrument.pair, instrument.tick_size);
        }
    }

    /// Returns true if the exchange's instrument list was loaded.
    #[must_use]
    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.ticks.contains_key(exchange)
    }

    #[must_use]
    pub fn tick_size(&self, exchange: &str, pair: &str) -> Option<Decimal> {
        self.ticks.get(exchange)?.get(pair).copied()
    }

    /// Returns `Some(false)` only when the exchange's list is known and lacks
    /// the pair; `None` when the exchange list is unavailable.
    #[must_use]
    pub fn lists(&self, exchange: &str, pair: &str) -> Option<bool> {
        self.ticks.get(exchange).map(|pairs| pairs.contains_key(pair))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_lookup_and_listing() {
        let mut catalog = InstrumentCatalog::new();
        catalog.insert(
            "binance",
            vec![Instrument {
                pair: "BTCUSDT".to_string(),
                tick_size: dec!(0.01),
            }],
        );

        assert!(catalog.has_exchange("binance"));
        assert!(!catalog.has_exchange("okx"));
        assert_eq!(catalog.tick_size("binance", "BTCUSDT"), Some(dec!(0.01)));
        assert_eq!(catalog.tick_size("binance", "ETHUSDT"), None);
        assert_eq!(catalog.lists("binance", "ETHUSDT"), Some(false));
        assert_eq!(catalog.lists("okx", "BTC-USDT"), None);
    }
}
