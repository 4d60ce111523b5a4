//! Exchange adapters for candle and instrument metadata retrieval.
//!
//! Each adapter wraps one exchange's public REST API behind
//! [`ExchangeAdapter`], so the provider can walk an ordered list of
//! exchanges without special-casing any of them.

mod binance;
mod bybit;
mod okx;

pub use binance::BinanceAdapter;
pub use bybit::BybitAdapter;
pub use okx::OkxAdapter;

use crate::error::{DataError, DataResult};
use algo_signal_core::{Candle, Timeframe};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;

/// Tradable instrument and its minimum price increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument {
    pub pair: String,
    pub tick_size: Decimal,
}

/// One exchange's candle and instrument API.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Exchange identifier (e.g. `binance`).
    fn name(&self) -> &str;

    /// Exchange pair for a base asset symbol (e.g. `BTC` -> `BTCUSDT`).
    fn pair_for(&self, symbol: &str) -> String;

    /// Lists instruments with their tick sizes.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be parsed.
    async fn instruments(&self) -> DataResult<Vec<Instrument>>;

    /// Fetches up to `limit` candles in ascending open-time order.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, or if any row is malformed or
    /// non-finite (the whole series is rejected).
    async fn candles(&self, pair: &str, timeframe: Timeframe, limit: usize) -> DataResult<Vec<Candle>>;
}

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Rate-limited JSON GET client shared by the adapters.
#[derive(Clone)]
pub(crate) struct HttpSource {
    http: Client,
    base_url: String,
    headers: Vec<(String, String)>,
    rate_limiter: Arc<DirectLimiter>,
}

impl HttpSource {
    pub(crate) fn new(http: Client, base_url: &str, requests_per_second: NonZeroU32) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            headers: Vec::new(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(requests_per_second))),
        }
    }

    pub(crate) fn set_base_url(&mut self, url: &str) {
        self.base_url = url.trim_end_matches('/').to_string();
    }

    pub(crate) fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Waits for the rate limiter and performs a GET request.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> DataResult<T> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "GET");

        let mut request = self
            .http
            .get(&url)
            .query(query)
            .header("Accept", "application/json");
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DataError::Http {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

/// Parses a price or timestamp that may be encoded as a JSON string or number.
fn number_field(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// Parses a kline row laid out as `[open_time, open, high, low, close, ...]`.
pub(crate) fn candle_from_row(row: &[Value]) -> DataResult<Candle> {
    let field = |idx: usize, name: &str| {
        row.get(idx)
            .and_then(number_field)
            .ok_or_else(|| DataError::InvalidSeries(format!("bad {name} in row {row:?}")))
    };

    let open_time = match row.first() {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| DataError::InvalidSeries(format!("bad open time in row {row:?}")))?;

    Ok(Candle::new(
        open_time,
        field(1, "open")?,
        field(2, "high")?,
        field(3, "low")?,
        field(4, "close")?,
    ))
}

/// Parses rows into an ascending, non-empty series.
pub(crate) fn series_from_rows(rows: &[Vec<Value>]) -> DataResult<Vec<Candle>> {
    let mut candles = rows
        .iter()
        .map(|row| candle_from_row(row))
        .collect::<DataResult<Vec<_>>>()?;

    if candles.is_empty() {
        return Err(DataError::InvalidSeries("empty series".to_string()));
    }

    candles.sort_by_key(|c| c.open_time);
    candles.dedup_by_key(|c| c.open_time);
    Ok(candles)
}

/// Parses an exchange tick size string, dropping trailing zeros.
pub(crate) fn parse_tick(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw)
        .ok()
        .filter(|tick| tick.is_sign_positive() && !tick.is_zero())
        .map(|tick| tick.normalize())
}
