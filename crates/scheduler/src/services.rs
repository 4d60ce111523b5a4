use algo_signal_calibration::CalibrationJob;
use algo_signal_core::{AppConfig, Clock, SystemClock};
use algo_signal_data::{MarketDataProvider, MemoryStore};
use algo_signal_engine::{ConfidenceModel, OutcomeTracker, SignalBuilder};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

/// Every engine component wired from one [`AppConfig`].
pub struct SignalServices {
    pub store: Arc<MemoryStore>,
    pub provider: Arc<MarketDataProvider>,
    pub confidence: Arc<ConfidenceModel>,
    pub outcomes: Arc<OutcomeTracker>,
    pub builder: SignalBuilder,
    pub calibration: CalibrationJob,
}

impl SignalServices {
    /// Builds the services, loading the store snapshot when one is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read or an HTTP client
    /// cannot be built.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = match &config.store.snapshot_path {
            Some(path) => MemoryStore::open(path)
                .await
                .with_context(|| format!("Failed to open store snapshot {}", path.display()))?,
            None => MemoryStore::new(),
        };
        let store = Arc::new(store);

        let provider = Arc::new(MarketDataProvider::from_config(config)?);
        let confidence = Arc::new(
            ConfidenceModel::new(store.clone(), clock.clone())
                .with_override_json(config.confidence.override_json.as_deref())
                .with_ttl(Duration::from_secs(config.confidence.cache_ttl_secs)),
        );
        let outcomes = Arc::new(
            OutcomeTracker::new(store.clone(), clock.clone())
                .with_index_cap(config.calibration.index_cap)
                .with_horizon_hours(config.calibration.outcome_horizon_hours),
        );
        let builder = SignalBuilder::from_config(config, provider.clone(), store.clone(), confidence.clone(), clock.clone())?
            .with_outcomes(outcomes.clone());
        let calibration = CalibrationJob::new(store.clone(), outcomes.clone(), confidence.clone(), clock)
            .with_config(&config.calibration);

        Ok(Self {
            store,
            provider,
            confidence,
            outcomes,
            builder,
            calibration,
        })
    }

    /// Writes the store snapshot if one is configured. Failures are logged.
    pub async fn persist(&self) {
        if self.store.snapshot_path().is_none() {
            return;
        }
        if let Err(e) = self.store.save_snapshot().await {
            tracing::warn!(error = %e, "Failed to save store snapshot");
        }
    }
}
