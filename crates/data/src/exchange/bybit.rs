use super::{parse_tick, series_from_rows, ExchangeAdapter, HttpSource, Instrument};
use crate::error::{DataError, DataResult};
use algo_signal_core::{Candle, Timeframe};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::num::NonZeroU32;

/// Bybit v5 API base URL.
pub const BYBIT_API_URL: &str = "https://api.bybit.com";

const MAX_KLINES: usize = 1000;

/// Bybit v5 linear perpetuals adapter.
pub struct BybitAdapter {
    http: HttpSource,
    quote: String,
}

/// Bybit wraps every payload in `{retCode, retMsg, result}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<T>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> DataResult<T> {
        if self.ret_code != 0 {
            return Err(DataError::Parse(format!(
                "bybit retCode {}: {}",
                self.ret_code, self.ret_msg
            )));
        }
        self.result
            .ok_or_else(|| DataError::Parse("bybit response without result".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentInfo {
    symbol: String,
    price_filter: Option<PriceFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceFilter {
    tick_size: String,
}

impl BybitAdapter {
    #[must_use]
    pub fn new(http: Client, requests_per_second: NonZeroU32) -> Self {
        Self {
            http: HttpSource::new(http, BYBIT_API_URL, requests_per_second),
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

    const fn interval(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::M30 => "30",
            Timeframe::H1 => "60",
            Timeframe::H4 => "240",
        }
    }
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    fn name(&self) -> &str {
        "bybit"
    }

    fn pair_for(&self, symbol: &str) -> String {
        format!("{}{}", symbol.to_uppercase(), self.quote)
    }

    async fn instruments(&self) -> DataResult<Vec<Instrument>> {
        let envelope: Envelope<ListResult<InstrumentInfo>> = self
            .http
            .get_json(
                "/v5/market/instruments-info",
                &[("category", "linear".to_string()), ("limit", "1000".to_string())],
            )
            .await?;

        Ok(envelope
            .into_result()?
            .list
            .into_iter()
            .filter_map(|info| {
                let tick_size = info.price_filter.and_then(|f| parse_tick(&f.tick_size))?;
                Some(Instrument {
                    pair: info.symbol,
                    tick_size,
                })
            })
            .collect())
    }

    async fn candles(&self, pair: &str, timeframe: Timeframe, limit: usize) -> DataResult<Vec<Candle>> {
        let envelope: Envelope<ListResult<Vec<Value>>> = self
            .http
            .get_json(
                "/v5/market/kline",
                &[
                    ("category", "linear".to_string()),
                    ("symbol", pair.to_string()),
                    ("interval", Self::interval(timeframe).to_string()),
                    ("limit", limit.clamp(1, MAX_KLINES).to_string()),
                ],
            )
            .await?;

        // Rows arrive newest first; the parser sorts them ascending.
        series_from_rows(&envelope.into_result()?.list)
    }
}
