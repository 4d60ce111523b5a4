use crate::market::PerHorizon;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub exchanges: ExchangesConfig,
    pub market: MarketConfig,
    pub confidence: ConfidenceSettings,
    pub calibration: CalibrationConfig,
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
}

/// Per-cycle signal engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Assets processed concurrently per batch
    pub batch_size: usize,
    /// Minimum agreeing votes, clamped to 3..=5
    pub quorum: usize,
    /// Volatility multipliers for the m30/h1/h4 vote thresholds
    pub vol_multipliers: VolMultipliers,
    /// Vote thresholds (percent) used when a horizon has no volatility
    pub static_thresholds: PerHorizon<f64>,
    /// LONG is vetoed when BTC's 24h change is at or below this percent
    pub macro_long_veto_pct: f64,
    /// SHORT is vetoed when BTC's 24h change is at or above this percent
    pub macro_short_veto_pct: f64,
    pub candle_limit: usize,
    pub adx_period: usize,
    pub vol_lookback: usize,
    pub hurst_lookback: usize,
    pub atr_period: usize,
    /// Stop-loss distance in ATR multiples before confidence tiers
    pub base_sl_atr: f64,
    /// Take-profit distance in ATR multiples before confidence tiers
    pub base_tp_atr: f64,
    /// Signal validity; never less than 15 minutes
    pub valid_minutes: i64,
    pub fetch_timeout_secs: u64,
    /// Exchanges tried in order for each asset
    pub exchange_order: Vec<String>,
    pub quote_asset: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            quorum: 3,
            vol_multipliers: VolMultipliers::default(),
            static_thresholds: PerHorizon {
                m30: 0.25,
                h1: 0.35,
                h4: 0.6,
                d24: 0.0,
                d7: 0.0,
            },
            macro_long_veto_pct: -0.3,
            macro_short_veto_pct: 1.0,
            candle_limit: 240,
            adx_period: 14,
            vol_lookback: 48,
            hurst_lookback: 240,
            atr_period: 14,
            base_sl_atr: 1.0,
            base_tp_atr: 1.8,
            valid_minutes: 90,
            fetch_timeout_secs: 12,
            exchange_order: vec!["binance".to_string(), "bybit".to_string(), "okx".to_string()],
            quote_asset: "USDT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolMultipliers {
    pub m30: f64,
    pub h1: f64,
    pub h4: f64,
}

impl Default for VolMultipliers {
    fn default() -> Self {
        Self {
            m30: 0.35,
            h1: 0.30,
            h4: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangesConfig {
    pub binance_url: String,
    pub bybit_url: String,
    pub okx_url: String,
    pub requests_per_second: u32,
}

impl Default for ExchangesConfig {
    fn default() -> Self {
        Self {
            binance_url: "https://api.binance.com".to_string(),
            bybit_url: "https://api.bybit.com".to_string(),
            okx_url: "https://www.okx.com".to_string(),
            requests_per_second: 10,
        }
    }
}

/// Market-overview source used for the candidate universe and daily deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub overview_url: String,
    pub vs_currency: String,
    pub universe_size: usize,
    pub api_key: Option<String>,
    /// Stablecoins and wrapped tokens never traded
    pub excluded_symbols: Vec<String>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            overview_url: "https://api.coingecko.com/api/v3".to_string(),
            vs_currency: "usd".to_string(),
            universe_size: 50,
            api_key: None,
            excluded_symbols: [
                "USDT", "USDC", "DAI", "FDUSD", "TUSD", "BUSD", "USDE", "USDS", "PYUSD", "WBTC",
                "WETH", "STETH", "WSTETH", "WEETH", "CBBTC",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceSettings {
    /// Explicit calibration JSON; wins over the learned config when it parses
    pub override_json: Option<String>,
    pub cache_ttl_secs: u64,
}

impl Default for ConfidenceSettings {
    fn default() -> Self {
        Self {
            override_json: None,
            cache_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub min_samples: usize,
    pub max_samples: usize,
    pub max_iterations: usize,
    pub weight_learning_rate: f64,
    pub scale_learning_rate: f64,
    /// Outcome records kept in the rolling index
    pub index_cap: usize,
    /// Pending outcomes resolve by close once this many hours pass untouched
    pub outcome_horizon_hours: i64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_samples: 120,
            max_samples: 2000,
            max_iterations: 160,
            weight_learning_rate: 0.12,
            scale_learning_rate: 0.06,
            index_cap: 2000,
            outcome_horizon_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot loaded at startup and saved after each job
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub build_interval_minutes: u64,
    pub calibration_enabled: bool,
    /// Six-field cron expression (with seconds)
    pub calibration_cron: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            build_interval_minutes: 45,
            calibration_enabled: true,
            calibration_cron: "0 30 3 * * *".to_string(),
        }
    }
}
