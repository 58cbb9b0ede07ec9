//! Periodic scheduler for version cleanup.
//!
//! Uses tokio-cron-scheduler to run `cleanup_versions()` at a fixed interval.
//! A tick is skipped when the previous run is still active or when the
//! [`CleanupGate`] declines, so at most one cleanup runs per process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::cleanup::CleanupResult;
use super::service::EntityVersionService;
use crate::error::VersoResult;

/// Configuration for the cleanup scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSchedulerConfig {
    /// Interval between cleanup runs in minutes (default: 1440)
    pub interval_minutes: u64,
    /// Whether to run a cleanup shortly after start (default: false)
    pub run_on_start: bool,
    /// Delay before the start-up run in seconds (default: 300)
    pub startup_delay_secs: u64,
}

impl Default for CleanupSchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 24 * 60,
            run_on_start: false,
            startup_delay_secs: 300,
        }
    }
}

impl CleanupSchedulerConfig {
    /// Create config with custom interval.
    pub fn with_interval(interval_minutes: u64) -> Self {
        Self {
            interval_minutes: interval_minutes.max(1), // Minimum 1 minute
            ..Default::default()
        }
    }

    /// Run a cleanup after `startup_delay_secs` once started.
    pub fn with_run_on_start(mut self, startup_delay_secs: u64) -> Self {
        self.run_on_start = true;
        self.startup_delay_secs = startup_delay_secs;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.max(1) * 60)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }
}

/// Decides whether this process should run cleanup at all.
///
/// Deployments with several nodes plug their leadership or role check in here.
#[async_trait]
pub trait CleanupGate: Send + Sync {
    async fn should_run(&self) -> bool;
}

/// Gate that always allows cleanup.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRun;

#[async_trait]
impl CleanupGate for AlwaysRun {
    async fn should_run(&self) -> bool {
        true
    }
}

/// Runs single cleanup passes with overlap protection.
#[derive(Clone)]
pub struct CleanupRunner {
    service: Arc<EntityVersionService>,
    gate: Arc<dyn CleanupGate>,
    running: Arc<Mutex<()>>,
    cancel: CancellationToken,
}

impl CleanupRunner {
    pub fn new(service: Arc<EntityVersionService>) -> Self {
        Self {
            service,
            gate: Arc::new(AlwaysRun),
            running: Arc::new(Mutex::new(())),
            cancel: CancellationToken::new(),
        }
    }

    /// Builder: set the gate consulted before every run
    pub fn with_gate(mut self, gate: Arc<dyn CleanupGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run one cleanup unless cancelled, already running or gated off.
    ///
    /// Returns `Ok(None)` when the run was not attempted.
    pub async fn run_once(&self) -> VersoResult<Option<CleanupResult>> {
        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        let Ok(_guard) = self.running.try_lock() else {
            debug!("Previous version cleanup still running, skipping");
            return Ok(None);
        };

        if !self.gate.should_run().await {
            debug!("Version cleanup not permitted on this node, skipping");
            return Ok(None);
        }

        self.service.cleanup_versions(&self.cancel).await.map(Some)
    }

    async fn run_logged(&self, trigger: &'static str) {
        debug!(trigger, "Starting version cleanup");
        match self.run_once().await {
            Ok(Some(result)) if result.was_skipped => {
                debug!(trigger, reason = ?result.skip_reason, "Version cleanup skipped by policy");
            }
            Ok(Some(result)) => {
                info!(
                    trigger,
                    deleted_by_age = result.deleted_by_age,
                    deleted_by_count = result.deleted_by_count,
                    remaining = result.remaining_versions,
                    "Scheduled version cleanup complete"
                );
            }
            Ok(None) => {}
            Err(e) => {
                error!(trigger, error = %e, "Version cleanup failed");
            }
        }
    }
}

/// Scheduler for periodic version cleanup.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use verso_core::versioning::{CleanupSchedulerConfig, VersionCleanupScheduler};
///
/// # async fn example(service: Arc<verso_core::versioning::EntityVersionService>) -> verso_core::VersoResult<()> {
/// let mut scheduler =
///     VersionCleanupScheduler::new(service, CleanupSchedulerConfig::with_interval(60)).await?;
/// scheduler.start().await?;
/// // ...
/// scheduler.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct VersionCleanupScheduler {
    scheduler: JobScheduler,
    runner: CleanupRunner,
    config: CleanupSchedulerConfig,
}

impl VersionCleanupScheduler {
    /// Create a new scheduler. Call `start()` to begin periodic execution.
    pub async fn new(
        service: Arc<EntityVersionService>,
        config: CleanupSchedulerConfig,
    ) -> VersoResult<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            runner: CleanupRunner::new(service),
            config,
        })
    }

    /// Builder: set the gate consulted before every run
    pub fn with_gate(mut self, gate: Arc<dyn CleanupGate>) -> Self {
        self.runner = self.runner.with_gate(gate);
        self
    }

    pub fn config(&self) -> &CleanupSchedulerConfig {
        &self.config
    }

    pub fn runner(&self) -> &CleanupRunner {
        &self.runner
    }

    /// Start the scheduler.
    pub async fn start(&self) -> VersoResult<()> {
        let runner = self.runner.clone();

        let job = Job::new_repeated_async(self.config.interval(), move |_uuid, _lock| {
            let runner = runner.clone();
            Box::pin(async move {
                runner.run_logged("interval").await;
            })
        })?;

        self.scheduler.add(job).await?;

        if self.config.run_on_start {
            let runner = self.runner.clone();
            let delay = self.config.startup_delay();
            debug!(delay_secs = delay.as_secs(), "Scheduling start-up version cleanup");
            tokio::spawn(async move {
                tokio::select! {
                    _ = runner.cancellation_token().cancelled() => {}
                    _ = tokio::time::sleep(delay) => runner.run_logged("startup").await,
                }
            });
        }

        self.scheduler.start().await?;

        info!(
            interval_minutes = self.config.interval_minutes,
            run_on_start = self.config.run_on_start,
            "Version cleanup scheduler started"
        );

        Ok(())
    }

    /// Stop the scheduler. A run in progress stops after its current pass.
    pub async fn shutdown(&mut self) -> VersoResult<()> {
        info!("Shutting down version cleanup scheduler");
        self.runner.cancel.cancel();
        self.scheduler.shutdown().await?;
        Ok(())
    }

    /// Run cleanup now, outside of the schedule.
    pub async fn run_now(&self) -> VersoResult<Option<CleanupResult>> {
        self.runner.run_once().await
    }
}
