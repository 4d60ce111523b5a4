use crate::services::SignalServices;
use algo_signal_calibration::CalibrationRunReport;
use algo_signal_core::SchedulerConfig;
use algo_signal_engine::{CycleReport, ResolveReport};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Result of one build tick: outcome resolution, then a build cycle.
#[derive(Debug, Clone, Serialize)]
pub struct BuildTick {
    /// `None` when resolution failed; the cycle still runs
    pub resolve: Option<ResolveReport>,
    pub cycle: CycleReport,
}

pub struct SignalScheduler {
    config: SchedulerConfig,
    services: Arc<SignalServices>,
    build_lock: Arc<Mutex<()>>,
    calibration_lock: Arc<Mutex<()>>,
}

impl SignalScheduler {
    #[must_use]
    pub fn new(config: SchedulerConfig, services: Arc<SignalServices>) -> Self {
        Self {
            config,
            services,
            build_lock: Arc::new(Mutex::new(())),
            calibration_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Starts the build and calibration jobs and runs until Ctrl-C.
    ///
    /// One build tick runs immediately so signals are available before the
    /// first interval elapses.
    ///
    /// # Errors
    /// Returns an error if the scheduler fails to start or if job scheduling fails.
    pub async fn start(self) -> Result<()> {
        let interval = Duration::from_secs(self.config.build_interval_minutes.max(1) * 60);
        info!(
            "Starting signal scheduler: build every {} min, calibration {}",
            self.config.build_interval_minutes,
            if self.config.calibration_enabled {
                self.config.calibration_cron.as_str()
            } else {
                "disabled"
            }
        );

        let mut scheduler = JobScheduler::new().await?;

        let services = self.services.clone();
        let lock = self.build_lock.clone();
        let build_job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let services = services.clone();
            let lock = lock.clone();
            Box::pin(async move {
                if run_build_tick(&services, &lock).await.is_none() {
                    warn!("Previous build tick still running, skipping");
                }
            })
        })?;
        scheduler.add(build_job).await?;

        if self.config.calibration_enabled {
            let services = self.services.clone();
            let lock = self.calibration_lock.clone();
            let calibration_job = Job::new_async(self.config.calibration_cron.as_str(), move |_uuid, _lock| {
                let services = services.clone();
                let lock = lock.clone();
                Box::pin(async move {
                    if run_calibration_tick(&services, &lock).await.is_none() {
                        warn!("Previous calibration still running, skipping");
                    }
                })
            })?;
            scheduler.add(calibration_job).await?;
        }

        scheduler.start().await?;
        info!("Signal scheduler started successfully");

        self.run_build_once().await;

        tokio::signal::ctrl_c().await?;
        info!("Shutting down signal scheduler");
        scheduler.shutdown().await?;
        self.services.persist().await;
        Ok(())
    }

    /// Runs one build tick now, unless one is already running.
    pub async fn run_build_once(&self) -> Option<BuildTick> {
        run_build_tick(&self.services, &self.build_lock).await
    }

    /// Runs calibration now, unless it is already running.
    pub async fn run_calibration_once(&self) -> Option<CalibrationRunReport> {
        run_calibration_tick(&self.services, &self.calibration_lock).await
    }
}

/// Resolves pending outcomes, builds signals, and saves the snapshot.
///
/// Returns `None` without doing anything when another tick holds the lock.
async fn run_build_tick(services: &SignalServices, lock: &Mutex<()>) -> Option<BuildTick> {
    let _guard = lock.try_lock().ok()?;

    let resolve = match services.outcomes.resolve_pending(&services.provider).await {
        Ok(report) => Some(report),
        Err(e) => {
            error!("Outcome resolution failed: {:#}", e);
            None
        }
    };
    let cycle = services.builder.run_cycle().await;
    services.persist().await;

    Some(BuildTick { resolve, cycle })
}

async fn run_calibration_tick(services: &SignalServices, lock: &Mutex<()>) -> Option<CalibrationRunReport> {
    let _guard = lock.try_lock().ok()?;
    let report = services.calibration.run().await;
    services.persist().await;
    Some(report)
}
