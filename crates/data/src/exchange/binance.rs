use super::{parse_tick, series_from_rows, ExchangeAdapter, HttpSource, Instrument};
use crate::error::DataResult;
use algo_signal_core::{Candle, Timeframe};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::num::NonZeroU32;

/// Binance spot API base URL.
pub const BINANCE_API_URL: &str = "https://api.binance.com";

/// Binance allows at most 1000 klines per request.
const MAX_KLINES: usize = 1000;

/// Binance spot market adapter.
pub struct BinanceAdapter {
    http: HttpSource,
    quote: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    filters: Vec<Value>,
}

impl BinanceAdapter {
    #[must_use]
    pub fn new(http: Client, requests_per_second: NonZeroU32) -> Self {
        Self {
            http: HttpSource::new(http, BINANCE_API_URL, requests_per_second),
            quote: "USDT".to_string(),
        }
    }

    /// Sets a custom base URL (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.http.set_base_url(&url.into());
        self
    }

    #[must_use]
    pub fn with_quote(mut self, quote: impl Into<String>) -> Self {
        self.quote = quote.into().to_uppercase();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    const fn interval(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
        }
    }
}

fn price_filter_tick(filters: &[Value]) -> Option<&str> {
    filters
        .iter()
        .find(|f| f.get("filterType").and_then(Value::as_str) == Some("PRICE_FILTER"))
        .and_then(|f| f.get("tickSize"))
        .and_then(Value::as_str)
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn name(&self) -> &str {
        "binance"
    }

    fn pair_for(&self, symbol: &str) -> String {
        format!("{}{}", symbol.to_uppercase(), self.quote)
    }

    async fn instruments(&self) -> DataResult<Vec<Instrument>> {
        let info: ExchangeInfo = self.http.get_json("/api/v3/exchangeInfo", &[]).await?;

        Ok(info
            .symbols
            .into_iter()
            .filter_map(|s| {
                let tick_size = price_filter_tick(&s.filters).and_then(parse_tick)?;
                Some(Instrument {
                    pair: s.symbol,
                    tick_size,
                })
            })
            .collect())
    }

    async fn candles(&self, pair: &str, timeframe: Timeframe, limit: usize) -> DataResult<Vec<Candle>> {
        let rows: Vec<Vec<Value>> = self
            .http
            .get_json(
                "/api/v3/klines",
                &[
                    ("symbol", pair.to_string()),
                    ("interval", Self::interval(timeframe).to_string()),
                    ("limit", limit.clamp(1, MAX_KLINES).to_string()),
                ],
            )
            .await?;

        series_from_rows(&rows)
    }
}
