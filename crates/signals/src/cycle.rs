//! One build cycle: candidates in, a ranked signal array out.

use crate::confidence::{ConfidenceModel, ConfigSource};
use crate::outcomes::OutcomeTracker;
use crate::pipeline::{evaluate_asset, AssetContext, DailyDeltas, SkipReason};
use algo_signal_core::{keys, AppConfig, Clock, EngineConfig, KeyValueStore, MarketConfig, Signal};
use algo_signal_data::{btc_change_24h, select_candidates, InstrumentCatalog, MarketDataProvider, MarketOverviewClient, MarketRow};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Summary of one build cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub ok: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub candidates: usize,
    pub processed: usize,
    pub signals: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_source: Option<ConfigSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CycleReport {
    fn failed(started_at: DateTime<Utc>, finished_at: DateTime<Utc>, error: String) -> Self {
        Self {
            ok: false,
            started_at,
            finished_at,
            candidates: 0,
            processed: 0,
            signals: 0,
            skipped: BTreeMap::new(),
            config_source: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Default)]
struct CycleSummary {
    candidates: usize,
    processed: usize,
    signals: usize,
    skipped: BTreeMap<SkipReason, usize>,
    config_source: Option<ConfigSource>,
}

/// Orders signals by confidence (highest first), then symbol.
pub fn rank_signals(signals: &mut [Signal]) {
    signals.sort_by(|a, b| {
        b.confidence_pct
            .cmp(&a.confidence_pct)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
}

/// Builds the signal array from market data.
pub struct SignalBuilder {
    provider: Arc<MarketDataProvider>,
    overview: MarketOverviewClient,
    store: Arc<dyn KeyValueStore>,
    confidence: Arc<ConfidenceModel>,
    outcomes: Option<Arc<OutcomeTracker>>,
    clock: Arc<dyn Clock>,
    engine: EngineConfig,
    market: MarketConfig,
    signals_ttl: Duration,
}

impl SignalBuilder {
    #[must_use]
    pub fn new(
        provider: Arc<MarketDataProvider>,
        overview: MarketOverviewClient,
        store: Arc<dyn KeyValueStore>,
        confidence: Arc<ConfidenceModel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            overview,
            store,
            confidence,
            outcomes: None,
            clock,
            engine: EngineConfig::default(),
            market: MarketConfig::default(),
            signals_ttl: Duration::from_secs(45 * 60),
        }
    }

    /// Wires a builder from application config.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<MarketDataProvider>,
        store: Arc<dyn KeyValueStore>,
        confidence: Arc<ConfidenceModel>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.engine.fetch_timeout_secs.max(1)))
            .build()
            .context("Failed to build HTTP client")?;
        let overview = MarketOverviewClient::from_config(http, &config.market);

        Ok(Self::new(provider, overview, store, confidence, clock)
            .with_engine(config.engine.clone())
            .with_market(config.market.clone())
            .with_signals_ttl(Duration::from_secs(config.scheduler.build_interval_minutes.max(1) * 60)))
    }

    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    #[must_use]
    pub fn with_market(mut self, market: MarketConfig) -> Self {
        self.market = market;
        self
    }

    #[must_use]
    pub fn with_signals_ttl(mut self, ttl: Duration) -> Self {
        self.signals_ttl = ttl;
        self
    }

    /// Logs every emitted signal for later outcome resolution.
    #[must_use]
    pub fn with_outcomes(mut self, outcomes: Arc<OutcomeTracker>) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    /// Runs one cycle. Errors and panics become a failed report.
    pub async fn run_cycle(&self) -> CycleReport {
        let started_at = self.clock.now();
        tracing::info!("Signal build cycle starting");

        let result = AssertUnwindSafe(self.build(started_at)).catch_unwind().await;
        let finished_at = self.clock.now();

        let report = match result {
            Ok(Ok(summary)) => CycleReport {
                ok: true,
                started_at,
                finished_at,
                candidates: summary.candidates,
                processed: summary.processed,
                signals: summary.signals,
                skipped: summary.skipped,
                config_source: summary.config_source,
                error: None,
            },
            Ok(Err(e)) => CycleReport::failed(started_at, finished_at, format!("{e:#}")),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                CycleReport::failed(started_at, finished_at, format!("panic: {message}"))
            }
        };

        if report.ok {
            tracing::info!(
                candidates = report.candidates,
                signals = report.signals,
                "Signal build cycle finished"
            );
        } else {
            tracing::error!(error = ?report.error, "Signal build cycle failed");
        }
        report
    }

    /// Signals written by the last successful cycle, if still live.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails or the value is malformed.
    pub async fn latest_signals(&self) -> Result<Vec<Signal>> {
        match self.store.get(keys::SIGNALS_LATEST).await? {
            Some(value) => serde_json::from_value(value).context("Malformed signal array"),
            None => Ok(Vec::new()),
        }
    }

    async fn build(&self, now: DateTime<Utc>) -> Result<CycleSummary> {
        let rows = self
            .overview
            .top_markets(self.market.universe_size)
            .await
            .context("Market overview unavailable")?;
        let candidates = select_candidates(&rows, &self.market.excluded_symbols, self.market.universe_size);
        let btc = btc_change_24h(&rows);
        tracing::debug!(candidates = candidates.len(), btc_change_24h = ?btc, "Candidates selected");

        let catalog = self.provider.load_catalog().await;
        let (config, source) = self.confidence.resolve().await;
        let ctx = AssetContext::new(&self.engine, config, btc, now);

        let mut summary = CycleSummary {
            candidates: candidates.len(),
            config_source: Some(source),
            ..CycleSummary::default()
        };
        let mut signals = Vec::new();

        for batch in candidates.chunks(self.engine.batch_size.max(1)) {
            let results = join_all(batch.iter().map(|row| self.process(row, &catalog, &ctx))).await;
            for result in results {
                summary.processed += 1;
                match result {
                    Ok(signal) => signals.push(signal),
                    Err(reason) => *summary.skipped.entry(reason).or_default() += 1,
                }
            }
        }

        rank_signals(&mut signals);
        summary.signals = signals.len();

        self.store
            .set(keys::SIGNALS_LATEST, serde_json::to_value(&signals)?, Some(self.signals_ttl))
            .await
            .context("Failed to write signals")?;

        if let Some(outcomes) = &self.outcomes {
            if let Err(e) = outcomes.record(&signals).await {
                tracing::warn!(error = %e, "Failed to record signal outcomes");
            }
        }

        Ok(summary)
    }

    async fn process(&self, row: &MarketRow, catalog: &InstrumentCatalog, ctx: &AssetContext) -> Result<Signal, SkipReason> {
        let bundle = self
            .provider
            .fetch_bundle(&row.symbol, catalog)
            .await
            .ok_or(SkipReason::NoData)?;
        let daily = DailyDeltas {
            d24: row.change_24h,
            d7: row.change_7d,
        };
        let result = evaluate_asset(&row.symbol, &bundle, daily, ctx);
        if let Err(reason) = &result {
            tracing::debug!(symbol = %row.symbol, %reason, "Asset skipped");
        }
        result
    }
}
