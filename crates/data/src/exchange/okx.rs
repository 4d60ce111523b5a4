use super::{parse_tick, series_from_rows, ExchangeAdapter, HttpSource, Instrument};
use crate::error::{DataError, DataResult};
use algo_signal_core::{Candle, Timeframe};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::num::NonZeroU32;

/// OKX v5 API base URL.
pub const OKX_API_URL: &str = "https://www.okx.com";

const MAX_CANDLES: usize = 300;

/// OKX spot market adapter.
///
/// The newest candle may still be unconfirmed; it is kept so the last-bar
/// delta reflects the live price, matching the other exchanges.
pub struct OkxAdapter {
    http: HttpSource,
    quote: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> DataResult<Vec<T>> {
        if self.code != "0" {
            return Err(DataError::Parse(format!("okx code {}: {}", self.code, self.msg)));
        }
        Ok(self.data)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentInfo {
    inst_id: String,
    tick_sz: String,
}

impl OkxAdapter {
    #[must_use]
    pub fn new(http: Client, requests_per_second: NonZeroU32) -> Self {
        Self {
            http: HttpSource::new(http, OKX_API_URL, requests_per_second),
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

    const fn bar(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1H",
            Timeframe::H4 => "4H",
        }
    }
}

#[async_trait]
impl ExchangeAdapter for OkxAdapter {
    fn name(&self) -> &str {
        "okx"
    }

    fn pair_for(&self, symbol: &str) -> String {
        format!("{}-{}", symbol.to_uppercase(), self.quote)
    }

    async fn instruments(&self) -> DataResult<Vec<Instrument>> {
        let envelope: Envelope<InstrumentInfo> = self
            .http
            .get_json("/api/v5/public/instruments", &[("instType", "SPOT".to_string())])
            .await?;

        Ok(envelope
            .into_data()?
            .into_iter()
            .filter_map(|info| {
                Some(Instrument {
                    tick_size: parse_tick(&info.tick_sz)?,
                    pair: info.inst_id,
                })
            })
            .collect())
    }

    async fn candles(&self, pair: &str, timeframe: Timeframe, limit: usize) -> DataResult<Vec<Candle>> {
        let envelope: Envelope<Vec<Value>> = self
            .http
            .get_json(
                "/api/v5/market/candles",
                &[
                    ("instId", pair.to_string()),
                    ("bar", Self::bar(timeframe).to_string()),
                    ("limit", limit.clamp(1, MAX_CANDLES).to_string()),
                ],
            )
            .await?;

        series_from_rows(&envelope.into_data()?)
    }
}
