//! Per-asset candle bundle retrieval with ordered exchange fallback.

use crate::catalog::InstrumentCatalog;
use crate::error::{DataError, DataResult};
use crate::exchange::{BinanceAdapter, BybitAdapter, ExchangeAdapter, OkxAdapter};
use algo_signal_core::{last_bar_delta_pct, AppConfig, Candle, Timeframe};
use anyhow::{Context, Result};
use nonzero_ext::nonzero;
use rust_decimal::Decimal;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Default candles per series.
pub const DEFAULT_CANDLE_LIMIT: usize = 240;

/// Default bound on one exchange attempt.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(12);

/// Last-bar percent changes of the three candle series. Always finite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeframeDeltas {
    pub m30: f64,
    pub h1: f64,
    pub h4: f64,
}

impl TimeframeDeltas {
    #[must_use]
    pub const fn get(&self, timeframe: Timeframe) -> f64 {
        match timeframe {
            Timeframe::M30 => self.m30,
            Timeframe::H1 => self.h1,
            Timeframe::H4 => self.h4,
        }
    }
}

/// Everything one exchange returned for an asset.
#[derive(Debug, Clone)]
pub struct CandleBundle {
    pub k30: Vec<Candle>,
    pub k1h: Vec<Candle>,
    pub k4h: Vec<Candle>,
    pub last_close: f64,
    pub tick_size: Decimal,
    pub exchange: String,
    pub pair: String,
    pub deltas: TimeframeDeltas,
}

impl CandleBundle {
    #[must_use]
    pub fn series(&self, timeframe: Timeframe) -> &[Candle] {
        match timeframe {
            Timeframe::M30 => &self.k30,
            Timeframe::H1 => &self.k1h,
            Timeframe::H4 => &self.k4h,
        }
    }
}

/// Tick size used when an exchange did not report one, chosen by price magnitude.
#[must_use]
pub fn fallback_tick(price: f64) -> Decimal {
    let scale = match price.abs() {
        p if p >= 10_000.0 => 1,
        p if p >= 100.0 => 2,
        p if p >= 1.0 => 4,
        p if p >= 0.01 => 6,
        _ => 8,
    };
    Decimal::new(1, scale)
}

/// Fetches candle bundles, trying exchanges in priority order.
pub struct MarketDataProvider {
    adapters: Vec<Arc<dyn ExchangeAdapter>>,
    candle_limit: usize,
    timeout: Duration,
}

impl MarketDataProvider {
    /// Creates a provider over adapters in priority order.
    #[must_use]
    pub fn new(adapters: Vec<Arc<dyn ExchangeAdapter>>) -> Self {
        Self {
            adapters,
            candle_limit: DEFAULT_CANDLE_LIMIT,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Builds the adapters named in `engine.exchange_order`.
    ///
    /// Unknown exchange names are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.engine.fetch_timeout_secs.max(1));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let rps = NonZeroU32::new(config.exchanges.requests_per_second).unwrap_or(nonzero!(10u32));
        let quote = config.engine.quote_asset.as_str();

        let mut adapters: Vec<Arc<dyn ExchangeAdapter>> = Vec::new();
        for name in &config.engine.exchange_order {
            match name.to_lowercase().as_str() {
                "binance" => adapters.push(Arc::new(
                    BinanceAdapter::new(http.clone(), rps)
                        .with_base_url(&config.exchanges.binance_url)
                        .with_quote(quote),
                )),
                "bybit" => adapters.push(Arc::new(
                    BybitAdapter::new(http.clone(), rps)
                        .with_base_url(&config.exchanges.bybit_url)
                        .with_quote(quote),
                )),
                "okx" => adapters.push(Arc::new(
                    OkxAdapter::new(http.clone(), rps)
                        .with_base_url(&config.exchanges.okx_url)
                        .with_quote(quote),
                )),
                other => tracing::warn!(exchange = other, "Unknown exchange in exchange_order, skipping"),
            }
        }

        Ok(Self::new(adapters)
            .with_candle_limit(config.engine.candle_limit)
            .with_timeout(timeout))
    }

    #[must_use]
    pub fn with_candle_limit(mut self, limit: usize) -> Self {
        self.candle_limit = limit.max(2);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn adapters(&self) -> &[Arc<dyn ExchangeAdapter>] {
        &self.adapters
    }

    /// Loads the per-cycle instrument catalog from every adapter.
    pub async fn load_catalog(&self) -> InstrumentCatalog {
        InstrumentCatalog::load(&self.adapters, self.timeout).await
    }

    /// Fetches a bundle from the first exchange that serves the asset.
    ///
    /// Returns `None` when every exchange fails; this is a skip for the
    /// current cycle, not an error.
    pub async fn fetch_bundle(&self, symbol: &str, catalog: &InstrumentCatalog) -> Option<CandleBundle> {
        for adapter in &self.adapters {
            let attempt = self.try_exchange(adapter.as_ref(), symbol, catalog);
            match tokio::time::timeout(self.timeout, attempt).await {
                Ok(Ok(bundle)) => return Some(bundle),
                Ok(Err(e)) => {
                    tracing::debug!(symbol, exchange = adapter.name(), error = %e, "Exchange attempt failed");
                }
                Err(_) => {
                    tracing::debug!(symbol, exchange = adapter.name(), "Exchange attempt timed out");
                }
            }
        }

        tracing::debug!(symbol, "No exchange served a usable bundle");
        None
    }

    /// Fetches a recent series from a named exchange.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange is not configured, the request fails,
    /// or it does not finish within the fetch timeout.
    pub async fn recent_candles(
        &self,
        exchange: &str,
        pair: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> DataResult<Vec<Candle>> {
        let adapter = self
            .adapters
            .iter()
            .find(|a| a.name() == exchange)
            .ok_or_else(|| DataError::UnknownInstrument(format!("{exchange} is not configured")))?;

        tokio::time::timeout(self.timeout, adapter.candles(pair, timeframe, limit))
            .await
            .map_err(|_| DataError::Timeout(format!("{exchange} {pair} {timeframe}")))?
    }

    async fn try_exchange(
        &self,
        adapter: &dyn ExchangeAdapter,
        symbol: &str,
        catalog: &InstrumentCatalog,
    ) -> DataResult<CandleBundle> {
        let exchange = adapter.name();
        let pair = adapter.pair_for(symbol);

        if catalog.lists(exchange, &pair) == Some(false) {
            return Err(DataError::UnknownInstrument(format!("{exchange} does not list {pair}")));
        }

        let (k30, k1h, k4h) = tokio::try_join!(
            adapter.candles(&pair, Timeframe::M30, self.candle_limit),
            adapter.candles(&pair, Timeframe::H1, self.candle_limit),
            adapter.candles(&pair, Timeframe::H4, self.candle_limit),
        )?;

        let delta = |series: &[Candle], timeframe: Timeframe| {
            last_bar_delta_pct(series)
                .ok_or_else(|| DataError::InvalidSeries(format!("{pair} {timeframe} has no finite last-bar delta")))
        };
        let deltas = TimeframeDeltas {
            m30: delta(&k30, Timeframe::M30)?,
            h1: delta(&k1h, Timeframe::H1)?,
            h4: delta(&k4h, Timeframe::H4)?,
        };

        let last_close = k30
            .last()
            .map(|c| c.close)
            .filter(|c| c.is_finite() && *c > 0.0)
            .ok_or_else(|| DataError::InvalidSeries(format!("{pair} has no positive last close")))?;

        let tick_size = catalog
            .tick_size(exchange, &pair)
            .unwrap_or_else(|| fallback_tick(last_close));

        Ok(CandleBundle {
            k30,
            k1h,
            k4h,
            last_close,
            tick_size,
            exchange: exchange.to_string(),
            pair,
            deltas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Instrument;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn binance_rows(closes: &[f64]) -> serde_json::Value {
        let rows: Vec<serde_json::Value> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                serde_json::json!([
                    1_700_000_000_000_i64 + i as i64 * 1_800_000,
                    c.to_string(),
                    (c + 1.0).to_string(),
                    (c - 1.0).to_string(),
                    c.to_string(),
                    "1"
                ])
            })
            .collect();
        serde_json::Value::Array(rows)
    }

    async fn binance_server(closes: &[f64]) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .respond_with(ResponseTemplate::new(200).set_body_json(binance_rows(closes)))
            .mount(&server)
            .await;
        server
    }

    fn binance(server: &MockServer) -> Arc<dyn ExchangeAdapter> {
        Arc::new(BinanceAdapter::new(reqwest::Client::new(), nonzero!(100u32)).with_base_url(server.uri()))
    }

    fn okx(server: &MockServer) -> Arc<dyn ExchangeAdapter> {
        Arc::new(OkxAdapter::new(reqwest::Client::new(), nonzero!(100u32)).with_base_url(server.uri()))
    }

    // ============================================
    // Tick fallback
    // ============================================

    #[test]
    fn test_fallback_tick_by_magnitude() {
        assert_eq!(fallback_tick(65_000.0), dec!(0.1));
        assert_eq!(fallback_tick(3_000.0), dec!(0.01));
        assert_eq!(fallback_tick(1.5), dec!(0.0001));
        assert_eq!(fallback_tick(0.2), dec!(0.000001));
        assert_eq!(fallback_tick(0.00002), dec!(0.00000001));
    }

    // ============================================
    // Bundle retrieval
    // ============================================

    #[tokio::test]
    async fn test_bundle_from_first_exchange() {
        let server = binance_server(&[100.0, 102.0]).await;
        let provider = MarketDataProvider::new(vec![binance(&server)]);

        let mut catalog = InstrumentCatalog::new();
        catalog.insert(
            "binance",
            vec![Instrument {
                pair: "BTCUSDT".to_string(),
                tick_size: dec!(0.01),
            }],
        );

        let bundle = provider.fetch_bundle("BTC", &catalog).await.unwrap();
        assert_eq!(bundle.exchange, "binance");
        assert_eq!(bundle.pair, "BTCUSDT");
        assert_eq!(bundle.tick_size, dec!(0.01));
        assert!((bundle.last_close - 102.0).abs() < f64::EPSILON);
        assert!((bundle.deltas.m30 - 2.0).abs() < 1e-9);
        assert!((bundle.deltas.get(Timeframe::H4) - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_falls_back_to_next_exchange() {
        let failing = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&failing)
            .await;

        let okx_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v5/market/candles"))
            .and(query_param("instId", "SOL-USDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": "0",
                "data": [
                    ["1700001800000", "20", "21", "19", "20.5", "1", "1", "1", "0"],
                    ["1700000000000", "19", "20.5", "18.5", "20", "1", "1", "1", "1"]
                ]
            })))
            .mount(&okx_server)
            .await;

        let provider = MarketDataProvider::new(vec![binance(&failing), okx(&okx_server)]);
        let bundle = provider
            .fetch_bundle("SOL", &InstrumentCatalog::new())
            .await
            .unwrap();

        assert_eq!(bundle.exchange, "okx");
        assert_eq!(bundle.pair, "SOL-USDT");
        // No catalog entry: tick chosen by price magnitude
        assert_eq!(bundle.tick_size, dec!(0.0001));
    }

    #[tokio::test]
    async fn test_unlisted_pair_skips_exchange() {
        let server = binance_server(&[100.0, 101.0]).await;
        let provider = MarketDataProvider::new(vec![binance(&server)]);

        let mut catalog = InstrumentCatalog::new();
        catalog.insert("binance", Vec::new());

        assert!(provider.fetch_bundle("BTC", &catalog).await.is_none());
    }

    #[tokio::test]
    async fn test_non_finite_delta_drops_asset() {
        // Prior close of zero makes the last-bar delta infinite
        let server = binance_server(&[0.0, 1.0]).await;
        let provider = MarketDataProvider::new(vec![binance(&server)]);

        assert!(provider.fetch_bundle("ABC", &InstrumentCatalog::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_slow_exchange_times_out() {
        let slow = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(binance_rows(&[1.0, 2.0]))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&slow)
            .await;

        let provider =
            MarketDataProvider::new(vec![binance(&slow)]).with_timeout(Duration::from_millis(200));

        assert!(provider.fetch_bundle("BTC", &InstrumentCatalog::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_recent_candles_requires_configured_exchange() {
        let provider = MarketDataProvider::new(Vec::new());
        let err = provider
            .recent_candles("kraken", "XBTUSD", Timeframe::M30, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::UnknownInstrument(_)));
    }

    #[test]
    fn test_from_config_skips_unknown_exchanges() {
        let mut config = AppConfig::default();
        config.engine.exchange_order = vec!["okx".to_string(), "kraken".to_string(), "Binance".to_string()];

        let provider = MarketDataProvider::from_config(&config).unwrap();
        let names: Vec<&str> = provider.adapters().iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["okx", "binance"]);
    }
}
