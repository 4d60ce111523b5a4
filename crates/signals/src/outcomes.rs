//! Historical outcome log of emitted signals.
//!
//! Every emitted signal is stored as a pending [`OutcomeRecord`] and its key
//! appended to a rolling, capped index. Pending records are later resolved
//! against 30-minute candles from the exchange that produced the signal.

use algo_signal_core::{keys, Candle, Clock, Direction, KeyValueStore, OutcomeRecord, OutcomeStatus, Signal, Timeframe};
use algo_signal_data::MarketDataProvider;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Most 30-minute bars requested when resolving one record.
const MAX_RESOLVE_BARS: usize = 300;

const BAR_MS: i64 = 1_800_000;

/// Longest outcome horizon whose window still fits in one fetch.
const MAX_HORIZON_HOURS: i64 = 148;

/// How a pending record resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub status: OutcomeStatus,
    /// `None` for expired records
    pub exit_price: Option<f64>,
    pub resolved_at: DateTime<Utc>,
}

impl Resolution {
    const fn expired(deadline: DateTime<Utc>) -> Self {
        Self {
            status: OutcomeStatus::Expired,
            exit_price: None,
            resolved_at: deadline,
        }
    }
}

/// Resolves one record against candles that follow its decision.
///
/// Only bars opening at or after `decided_at` and before the end of the
/// horizon count. A bar touching both levels resolves to the stop-loss. When
/// the horizon has elapsed without a touch, the sign of the direction-adjusted
/// move from entry to the last close decides; a flat move is a loss.
///
/// The candles must reach back to the first bar of the window, otherwise an
/// earlier touch could be missed. A record whose window is not fully covered
/// once the horizon has elapsed resolves as [`OutcomeStatus::Expired`].
/// Returns `None` while the record is still open.
#[must_use]
pub fn resolve_outcome(
    record: &OutcomeRecord,
    candles: &[Candle],
    now: DateTime<Utc>,
    horizon: Duration,
) -> Option<Resolution> {
    if !record.is_pending() {
        return None;
    }
    let start_ms = record.decided_at.timestamp_millis();
    let deadline = record.decided_at + horizon;
    let end_ms = deadline.timestamp_millis();

    let usable: Vec<&Candle> = candles.iter().filter(|c| c.is_finite()).collect();
    let covers_start = usable
        .iter()
        .map(|c| c.open_time)
        .min()
        .is_some_and(|first| first < start_ms + BAR_MS);
    if !covers_start {
        return (now >= deadline).then(|| Resolution::expired(deadline));
    }

    let window: Vec<&Candle> = usable
        .into_iter()
        .filter(|c| c.open_time >= start_ms && c.open_time < end_ms)
        .collect();

    for candle in &window {
        let (hit_sl, hit_tp) = match record.side {
            Direction::Long => (candle.low <= record.sl, candle.high >= record.tp),
            Direction::Short => (candle.high >= record.sl, candle.low <= record.tp),
        };
        let resolved_at = DateTime::from_timestamp_millis(candle.open_time).unwrap_or(now);
        if hit_sl {
            return Some(Resolution {
                status: OutcomeStatus::Loss,
                exit_price: Some(record.sl),
                resolved_at,
            });
        }
        if hit_tp {
            return Some(Resolution {
                status: OutcomeStatus::Win,
                exit_price: Some(record.tp),
                resolved_at,
            });
        }
    }

    if now < deadline {
        return None;
    }
    match window.last() {
        Some(last) if last.open_time + BAR_MS >= end_ms => {
            let moved = record.side.sign() * (last.close - record.entry);
            Some(Resolution {
                status: if moved > 0.0 {
                    OutcomeStatus::Win
                } else {
                    OutcomeStatus::Loss
                },
                exit_price: Some(last.close),
                resolved_at: deadline,
            })
        }
        _ => Some(Resolution::expired(deadline)),
    }
}

/// Summary of one resolution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolveReport {
    pub checked: usize,
    pub wins: usize,
    pub losses: usize,
    pub pending: usize,
    /// Records whose window could not be observed in full
    pub expired: usize,
    pub failed: usize,
}

/// Writes and resolves outcome records in the key-value store.
pub struct OutcomeTracker {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    index_cap: usize,
    horizon: Duration,
}

impl OutcomeTracker {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            index_cap: 2000,
            horizon: Duration::hours(24),
        }
    }

    #[must_use]
    pub fn with_index_cap(mut self, cap: usize) -> Self {
        self.index_cap = cap.max(1);
        self
    }

    /// Untouched records resolve by close after this many hours.
    ///
    /// Capped so the whole window stays within one candle fetch.
    #[must_use]
    pub fn with_horizon_hours(mut self, hours: i64) -> Self {
        self.horizon = Duration::hours(hours.clamp(1, MAX_HORIZON_HOURS));
        self
    }

    /// Record keys, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub async fn load_index(&self) -> Result<Vec<String>> {
        let raw = self.store.get(keys::OUTCOME_INDEX).await?;
        Ok(raw
            .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
            .unwrap_or_default())
    }

    /// Reads every indexed record. Missing or unreadable entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a store read fails.
    pub async fn load_records(&self) -> Result<Vec<OutcomeRecord>> {
        let mut records = Vec::new();
        for key in self.load_index().await? {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_value::<OutcomeRecord>(raw) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(key, error = %e, "Skipping unreadable outcome record"),
            }
        }
        Ok(records)
    }

    /// Logs emitted signals as pending records and updates the index.
    ///
    /// Keys already present move to the newest end. When the index exceeds
    /// its cap the oldest keys are dropped together with their records.
    ///
    /// # Errors
    ///
    /// Returns an error if a store operation fails.
    pub async fn record(&self, signals: &[Signal]) -> Result<usize> {
        let records: Vec<OutcomeRecord> = signals.iter().filter_map(OutcomeRecord::from_signal).collect();
        if records.is_empty() {
            return Ok(0);
        }

        let mut index = self.load_index().await?;
        for record in &records {
            let key = record.key();
            self.store
                .set(&key, serde_json::to_value(record)?, None)
                .await
                .with_context(|| format!("Failed to write {key}"))?;
            index.retain(|k| k != &key);
            index.push(key);
        }

        let overflow = index.len().saturating_sub(self.index_cap);
        for evicted in index.drain(..overflow) {
            self.store.delete(&evicted).await?;
        }
        self.store
            .set(keys::OUTCOME_INDEX, Value::from(index), None)
            .await?;

        tracing::debug!(recorded = records.len(), "Outcome records written");
        Ok(records.len())
    }

    /// Resolves pending records against recent candles.
    ///
    /// A failed candle fetch leaves that record pending for the next pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn resolve_pending(&self, provider: &MarketDataProvider) -> Result<ResolveReport> {
        let now = self.clock.now();
        let mut report = ResolveReport::default();
        let mut seen = HashSet::new();

        for mut record in self.load_records().await? {
            if !record.is_pending() || !seen.insert(record.key()) {
                continue;
            }
            report.checked += 1;

            let bars_needed = usize::try_from((now - record.decided_at).num_minutes().max(0) / 30 + 2)
                .unwrap_or(usize::MAX);
            let resolution = if bars_needed > MAX_RESOLVE_BARS {
                // The window start is older than any fetch can reach
                Resolution::expired(record.decided_at + self.horizon)
            } else {
                let candles = match provider
                    .recent_candles(&record.exchange, &record.pair, Timeframe::M30, bars_needed)
                    .await
                {
                    Ok(candles) => candles,
                    Err(e) => {
                        tracing::debug!(symbol = %record.symbol, error = %e, "Outcome candles unavailable");
                        report.failed += 1;
                        continue;
                    }
                };
                let Some(resolution) = resolve_outcome(&record, &candles, now, self.horizon) else {
                    report.pending += 1;
                    continue;
                };
                resolution
            };

            match resolution.status {
                OutcomeStatus::Win => report.wins += 1,
                OutcomeStatus::Loss => report.losses += 1,
                OutcomeStatus::Expired => {
                    tracing::debug!(symbol = %record.symbol, decided_at = %record.decided_at, "Outcome window unobservable, expiring");
                    report.expired += 1;
                }
                OutcomeStatus::Pending => {}
            }
            record.status = resolution.status;
            record.exit_price = resolution.exit_price;
            record.resolved_at = Some(resolution.resolved_at);
            self.store
                .set(&record.key(), serde_json::to_value(&record)?, None)
                .await?;
        }

        tracing::info!(
            checked = report.checked,
            wins = report.wins,
            losses = report.losses,
            pending = report.pending,
            expired = report.expired,
            "Outcome resolution finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algo_signal_core::{ManualClock, PerHorizon};
    use algo_signal_data::{BinanceAdapter, MemoryStore};
    use chrono::TimeZone;
    use nonzero_ext::nonzero;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HALF_HOUR_MS: i64 = 1_800_000;

    fn decided_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn record(side: Direction, symbol: &str) -> OutcomeRecord {
        let (sl, tp) = match side {
            Direction::Long => (98.0, 104.0),
            Direction::Short => (102.0, 96.0),
        };
        OutcomeRecord {
            symbol: symbol.to_string(),
            exchange: "binance".to_string(),
            pair: format!("{symbol}USDT"),
            side,
            decided_at: decided_at(),
            entry: 100.0,
            sl,
            tp,
            features: PerHorizon::from_fn(|_| Some(1.0)),
            confidence_pct: 80,
            status: OutcomeStatus::Pending,
            resolved_at: None,
            exit_price: None,
        }
    }

    fn bar(offset: i64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(decided_at().timestamp_millis() + offset * HALF_HOUR_MS, 100.0, high, low, close)
    }

    // ============================================
    // Pure resolution
    // ============================================

    #[test]
    fn take_profit_touch_wins() {
        let candles = [bar(0, 101.0, 99.0, 100.5), bar(1, 104.5, 100.0, 103.0)];
        let r = resolve_outcome(&record(Direction::Long, "BTC"), &candles, decided_at() + Duration::hours(1), Duration::hours(24)).unwrap();
        assert_eq!(r.status, OutcomeStatus::Win);
        assert!(r.exit_price.is_some_and(|p| (p - 104.0).abs() < 1e-12));
    }

    #[test]
    fn same_bar_touch_resolves_to_stop_loss() {
        let candles = [bar(0, 105.0, 97.0, 100.0)];
        let r = resolve_outcome(&record(Direction::Long, "BTC"), &candles, decided_at() + Duration::hours(1), Duration::hours(24)).unwrap();
        assert_eq!(r.status, OutcomeStatus::Loss);

        let r = resolve_outcome(&record(Direction::Short, "BTC"), &candles, decided_at() + Duration::hours(1), Duration::hours(24)).unwrap();
        assert_eq!(r.status, OutcomeStatus::Loss);
        assert!(r.exit_price.is_some_and(|p| (p - 102.0).abs() < 1e-12));
    }

    #[test]
    fn bars_before_decision_are_ignored() {
        let candles = [bar(-2, 110.0, 90.0, 100.0), bar(0, 101.0, 99.0, 100.5)];
        let r = resolve_outcome(&record(Direction::Long, "BTC"), &candles, decided_at() + Duration::hours(2), Duration::hours(24));
        assert!(r.is_none());
    }

    #[test]
    fn horizon_expiry_uses_close_move() {
        let candles = [bar(0, 101.0, 99.0, 100.5), bar(1, 101.0, 99.0, 99.5)];
        let after = decided_at() + Duration::hours(2);

        let r = resolve_outcome(&record(Direction::Short, "BTC"), &candles, after, Duration::hours(1)).unwrap();
        assert_eq!(r.status, OutcomeStatus::Win);
        assert_eq!(r.resolved_at, decided_at() + Duration::hours(1));

        let flat = [bar(0, 101.0, 99.0, 100.0), bar(1, 101.0, 99.0, 100.0)];
        let r = resolve_outcome(&record(Direction::Long, "BTC"), &flat, after, Duration::hours(1)).unwrap();
        assert_eq!(r.status, OutcomeStatus::Loss);
    }

    #[test]
    fn missing_window_start_expires_instead_of_resolving() {
        // The first 36 bars of the window are absent; a later take-profit
        // touch must not count as a win
        let candles: Vec<Candle> = (36..60)
            .map(|i| if i == 40 { bar(i, 105.0, 100.0, 104.5) } else { bar(i, 101.0, 99.5, 100.0) })
            .collect();
        let now = decided_at() + Duration::days(7);
        let r = resolve_outcome(&record(Direction::Long, "BTC"), &candles, now, Duration::hours(24)).unwrap();
        assert_eq!(r.status, OutcomeStatus::Expired);
        assert_eq!(r.exit_price, None);
        assert_eq!(r.resolved_at, decided_at() + Duration::hours(24));

        // Before the deadline the record simply stays open
        let early = decided_at() + Duration::hours(3);
        assert!(resolve_outcome(&record(Direction::Long, "BTC"), &candles, early, Duration::hours(24)).is_none());
    }

    #[test]
    fn empty_or_truncated_window_expires_after_deadline() {
        let after = decided_at() + Duration::hours(30);
        let rec = record(Direction::Long, "BTC");

        let r = resolve_outcome(&rec, &[], after, Duration::hours(24)).unwrap();
        assert_eq!(r.status, OutcomeStatus::Expired);

        let before_only = [bar(-3, 101.0, 99.0, 100.0), bar(-1, 101.0, 99.0, 100.0)];
        let r = resolve_outcome(&rec, &before_only, after, Duration::hours(24)).unwrap();
        assert_eq!(r.status, OutcomeStatus::Expired);

        // Window starts on time but stops well before the deadline
        let truncated: Vec<Candle> = (0..10).map(|i| bar(i, 101.0, 99.0, 101.0)).collect();
        let r = resolve_outcome(&rec, &truncated, after, Duration::hours(24)).unwrap();
        assert_eq!(r.status, OutcomeStatus::Expired);
    }

    #[test]
    fn resolved_records_are_left_alone() {
        let mut rec = record(Direction::Long, "BTC");
        rec.status = OutcomeStatus::Win;
        let candles = [bar(0, 110.0, 90.0, 100.0)];
        assert!(resolve_outcome(&rec, &candles, decided_at() + Duration::days(2), Duration::hours(24)).is_none());
    }

    // ============================================
    // Tracker
    // ============================================

    async fn seed(store: &MemoryStore, records: &[OutcomeRecord]) {
        let keys: Vec<String> = records.iter().map(OutcomeRecord::key).collect();
        for r in records {
            store.set(&r.key(), serde_json::to_value(r).unwrap(), None).await.unwrap();
        }
        store.set(keys::OUTCOME_INDEX, serde_json::json!(keys), None).await.unwrap();
    }

    fn signal(symbol: &str, at: DateTime<Utc>) -> Signal {
        use crate::confidence::ConfidenceConfig;
        use crate::pipeline::fixtures::{bundle, uptrend};
        use crate::pipeline::{evaluate_asset, AssetContext, DailyDeltas};
        use algo_signal_core::EngineConfig;
        use rust_decimal_macros::dec;

        let ctx = AssetContext::new(&EngineConfig::default(), Arc::new(ConfidenceConfig::default()), None, at);
        let daily = DailyDeltas {
            d24: Some(3.0),
            d7: Some(6.0),
        };
        evaluate_asset(symbol, &bundle(uptrend(60), dec!(0.01)), daily, &ctx).unwrap()
    }

    #[tokio::test]
    async fn record_writes_pending_records() {
        let store = Arc::new(MemoryStore::new());
        let tracker = OutcomeTracker::new(store.clone(), Arc::new(ManualClock::new(decided_at())));

        let written = tracker.record(&[signal("btc", decided_at()), signal("eth", decided_at())]).await.unwrap();
        assert_eq!(written, 2);

        let index = tracker.load_index().await.unwrap();
        assert_eq!(index, vec![keys::outcome_key("BTC", decided_at().timestamp_millis()), keys::outcome_key("ETH", decided_at().timestamp_millis())]);

        let records = tracker.load_records().await.unwrap();
        assert!(records.iter().all(OutcomeRecord::is_pending));
        assert_eq!(records[0].side, Direction::Long);
        assert!(records[0].features.d24.is_some_and(|f| f > 0.0));
    }

    #[tokio::test]
    async fn index_is_deduped_capped_and_evicts_records() {
        let store = Arc::new(MemoryStore::new());
        let tracker = OutcomeTracker::new(store.clone(), Arc::new(ManualClock::new(decided_at()))).with_index_cap(2);

        let t0 = decided_at();
        let t1 = t0 + Duration::minutes(45);
        tracker.record(&[signal("aaa", t0), signal("bbb", t0)]).await.unwrap();
        // Same key again moves to the newest end without growing the index
        tracker.record(&[signal("aaa", t0)]).await.unwrap();
        assert_eq!(tracker.load_index().await.unwrap().len(), 2);

        tracker.record(&[signal("ccc", t1)]).await.unwrap();
        let index = tracker.load_index().await.unwrap();
        assert_eq!(index, vec![keys::outcome_key("AAA", t0.timestamp_millis()), keys::outcome_key("CCC", t1.timestamp_millis())]);
        assert!(store.get(&keys::outcome_key("BBB", t0.timestamp_millis())).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_signal_list_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let tracker = OutcomeTracker::new(store.clone(), Arc::new(ManualClock::new(decided_at())));
        assert_eq!(tracker.record(&[]).await.unwrap(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn resolve_pending_updates_store() {
        let server = MockServer::start().await;
        let start = decided_at().timestamp_millis();
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                [start, "100", "101", "99", "100.5", "10"],
                [start + HALF_HOUR_MS, "100.5", "104.5", "100", "104", "10"]
            ])))
            .mount(&server)
            .await;

        let adapter = BinanceAdapter::new(reqwest::Client::new(), nonzero!(100u32)).with_base_url(server.uri());
        let provider = MarketDataProvider::new(vec![Arc::new(adapter)]);

        let store = Arc::new(MemoryStore::new());
        seed(&store, &[record(Direction::Long, "BTC"), record(Direction::Short, "ETH")]).await;

        let clock = Arc::new(ManualClock::new(decided_at() + Duration::hours(1)));
        let tracker = OutcomeTracker::new(store.clone(), clock);
        let report = tracker.resolve_pending(&provider).await.unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.wins, 1);
        assert_eq!(report.losses, 1);

        let records = tracker.load_records().await.unwrap();
        assert!(records.iter().all(|r| !r.is_pending()));
        assert!(records.iter().all(|r| r.resolved_at.is_some()));
    }

    #[tokio::test]
    async fn stale_records_expire_and_leave_the_pending_set() {
        let server = MockServer::start().await;
        let now = decided_at() + Duration::days(8);

        // A two-day-old record gets candles that begin 10 bars into its window
        let mut recent = record(Direction::Long, "ETH");
        recent.decided_at = now - Duration::days(2);
        let first = recent.decided_at.timestamp_millis() + 10 * HALF_HOUR_MS;
        let rows: Vec<serde_json::Value> = (0..86)
            .map(|i| {
                let high = if i == 5 { "105" } else { "101" };
                serde_json::json!([first + i * HALF_HOUR_MS, "100", high, "99.5", "100", "10"])
            })
            .collect();
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rows))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = BinanceAdapter::new(reqwest::Client::new(), nonzero!(100u32)).with_base_url(server.uri());
        let provider = MarketDataProvider::new(vec![Arc::new(adapter)]);

        let store = Arc::new(MemoryStore::new());
        // The eight-day-old record is out of reach and expires without a fetch
        seed(&store, &[record(Direction::Long, "BTC"), recent]).await;

        let tracker = OutcomeTracker::new(store.clone(), Arc::new(ManualClock::new(now)));
        let report = tracker.resolve_pending(&provider).await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.expired, 2);
        assert_eq!(report.wins, 0);
        assert_eq!(report.pending, 0);

        let records = tracker.load_records().await.unwrap();
        assert!(records.iter().all(|r| r.status == OutcomeStatus::Expired));
        assert!(records.iter().all(|r| r.exit_price.is_none()));

        let again = tracker.resolve_pending(&provider).await.unwrap();
        assert_eq!(again.checked, 0);
    }

    #[test]
    fn horizon_is_capped_to_one_fetch() {
        let tracker = OutcomeTracker::new(Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(decided_at())))
            .with_horizon_hours(1000);
        assert_eq!(tracker.horizon, Duration::hours(MAX_HORIZON_HOURS));
    }
}
