//! Market data and storage for the crypto signal engine.
//!
//! This crate provides:
//! - Exchange adapters (Binance, Bybit, OKX) behind one [`ExchangeAdapter`] trait
//! - [`MarketDataProvider`] with ordered, first-success exchange fallback
//! - A once-per-cycle [`InstrumentCatalog`] of tick sizes
//! - The market-overview client used for candidate selection and daily deltas
//! - [`MemoryStore`], an in-memory TTL key-value store with JSON snapshots

pub mod catalog;
pub mod error;
pub mod exchange;
pub mod overview;
pub mod provider;
pub mod store;

pub use catalog::InstrumentCatalog;
pub use error::{DataError, DataResult};
pub use exchange::{BinanceAdapter, BybitAdapter, ExchangeAdapter, Instrument, OkxAdapter};
pub use overview::{btc_change_24h, select_candidates, MarketOverviewClient, MarketRow};
pub use provider::{fallback_tick, CandleBundle, MarketDataProvider, TimeframeDeltas};
pub use store::MemoryStore;
