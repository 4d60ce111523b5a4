//! Market-overview client (CoinGecko-compatible `/coins/markets`).
//!
//! Supplies the candidate universe, the daily horizons (24h, 7d) of the
//! delta set, and BTC's 24h change for the macro gate.

use crate::error::DataResult;
use crate::exchange::HttpSource;
use algo_signal_core::MarketConfig;
use nonzero_ext::nonzero;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// CoinGecko public API base URL.
pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";

/// CoinGecko caps `per_page` at 250.
const MAX_PER_PAGE: usize = 250;

/// One asset row of the market overview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRow {
    /// Upper-cased ticker
    pub symbol: String,
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume: Option<f64>,
    pub change_1h: Option<f64>,
    pub change_24h: Option<f64>,
    pub change_7d: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawMarketRow {
    symbol: String,
    current_price: Option<f64>,
    market_cap: Option<f64>,
    total_volume: Option<f64>,
    price_change_percentage_1h_in_currency: Option<f64>,
    price_change_percentage_24h_in_currency: Option<f64>,
    price_change_percentage_24h: Option<f64>,
    price_change_percentage_7d_in_currency: Option<f64>,
}

impl From<RawMarketRow> for MarketRow {
    fn from(raw: RawMarketRow) -> Self {
        let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
        Self {
            symbol: raw.symbol.trim().to_uppercase(),
            price: finite(raw.current_price),
            market_cap: finite(raw.market_cap),
            volume: finite(raw.total_volume),
            change_1h: finite(raw.price_change_percentage_1h_in_currency),
            change_24h: finite(
                raw.price_change_percentage_24h_in_currency
                    .or(raw.price_change_percentage_24h),
            ),
            change_7d: finite(raw.price_change_percentage_7d_in_currency),
        }
    }
}

/// Client for the market-overview API.
pub struct MarketOverviewClient {
    http: HttpSource,
    vs_currency: String,
}

impl MarketOverviewClient {
    /// Creates a client with default settings (rate limited to 5 requests/second).
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self {
            http: HttpSource::new(http, COINGECKO_API_URL, nonzero!(5u32)),
            vs_currency: "usd".to_string(),
        }
    }

    /// Creates a client from the `market` configuration section.
    #[must_use]
    pub fn from_config(http: Client, config: &MarketConfig) -> Self {
        let mut client = Self::new(http)
            .with_base_url(&config.overview_url)
            .with_vs_currency(&config.vs_currency);
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            client.http.add_header("x-cg-demo-api-key", key);
        }
        client
    }

    /// Sets a custom base URL (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.http.set_base_url(&url.into());
        self
    }

    #[must_use]
    pub fn with_vs_currency(mut self, vs_currency: impl Into<String>) -> Self {
        self.vs_currency = vs_currency.into().to_lowercase();
        self
    }

    /// Fetches the top `limit` assets by market cap.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be parsed.
    pub async fn top_markets(&self, limit: usize) -> DataResult<Vec<MarketRow>> {
        let per_page = limit.clamp(1, MAX_PER_PAGE);

        let rows: Vec<RawMarketRow> = self
            .http
            .get_json(
                "/coins/markets",
                &[
                    ("vs_currency", self.vs_currency.clone()),
                    ("order", "market_cap_desc".to_string()),
                    ("per_page", per_page.to_string()),
                    ("page", "1".to_string()),
                    ("price_change_percentage", "1h,24h,7d".to_string()),
                ],
            )
            .await?;

        Ok(rows.into_iter().map(MarketRow::from).collect())
    }
}

/// Picks the build candidates: top `limit` by market cap, de-duplicated by
/// symbol, excluding stablecoins and wrapped tokens.
#[must_use]
pub fn select_candidates(rows: &[MarketRow], excluded: &[String], limit: usize) -> Vec<MarketRow> {
    let excluded: HashSet<String> = excluded.iter().map(|s| s.to_uppercase()).collect();

    let mut ranked: Vec<&MarketRow> = rows.iter().collect();
    ranked.sort_by(|a, b| {
        let cap = |r: &MarketRow| r.market_cap.unwrap_or(f64::NEG_INFINITY);
        cap(b).total_cmp(&cap(a))
    });

    let mut seen = HashSet::new();
    ranked
        .into_iter()
        .filter(|row| !row.symbol.is_empty() && !excluded.contains(&row.symbol))
        .filter(|row| seen.insert(row.symbol.clone()))
        .take(limit)
        .cloned()
        .collect()
}

/// BTC's 24h percent change, if the overview carries it.
#[must_use]
pub fn btc_change_24h(rows: &[MarketRow]) -> Option<f64> {
    rows.iter()
        .find(|row| row.symbol == "BTC")
        .and_then(|row| row.change_24h)
}
