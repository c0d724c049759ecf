//! Periodic collection cycles on `tokio-cron-scheduler`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::collection::{CollectionLoop, CycleReport};

/// Minimum allowed interval (1 second).
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Invalid schedule definition.
    #[error("config error: {0}")]
    Config(String),

    /// The underlying job scheduler failed.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// When collection cycles run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval between cycle starts, clamped to [`MIN_INTERVAL`].
    Interval(Duration),

    /// Six-field cron expression: `sec min hour day month weekday`.
    /// Example: `"0 */10 * * * *"` = every 10 minutes at second 0
    Cron(String),
}

impl Schedule {
    /// Create an interval schedule. Interval is clamped to a minimum of 1 second.
    pub fn interval(duration: Duration) -> Self {
        if duration < MIN_INTERVAL {
            tracing::warn!(min_interval = ?MIN_INTERVAL,
                "Interval duration is less than minimum allowed. Using minimum duration."
            );
            Self::Interval(MIN_INTERVAL)
        } else {
            Self::Interval(duration)
        }
    }

    /// Create a cron schedule with immediate validation.
    ///
    /// # Errors
    /// Returns `SchedulerError::Config` if the cron expression is invalid.
    pub fn cron(expr: impl AsRef<str>) -> Result<Self, SchedulerError> {
        use std::str::FromStr;

        let expr = expr.as_ref();
        cron::Schedule::from_str(expr)
            .map_err(|e| SchedulerError::Config(format!("invalid cron expression: {e}")))?;
        Ok(Self::Cron(expr.to_string()))
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval(d) => write!(f, "every {}", humantime::format_duration(*d)),
            Self::Cron(expr) => write!(f, "cron: {}", expr),
        }
    }
}

/// `schedule:` section of the config file. At most one field may be set;
/// none means a single cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    #[serde(default)]
    pub cron: Option<String>,
}

impl ScheduleConfig {
    /// Resolve to a schedule, or `None` for run-once.
    pub fn to_schedule(&self) -> Result<Option<Schedule>, SchedulerError> {
        match (&self.interval, &self.cron) {
            (Some(_), Some(_)) => Err(SchedulerError::Config(
                "schedule: set either 'interval' or 'cron', not both".into(),
            )),
            (Some(d), None) => Ok(Some(Schedule::interval(*d))),
            (None, Some(expr)) => Schedule::cron(expr).map(Some),
            (None, None) => Ok(None),
        }
    }
}

/// Runs [`CollectionLoop::run_cycle`] on a schedule.
///
/// A tick that fires while the previous cycle is still running is skipped.
/// Shutdown stops ticking and waits for the cycle in flight to drain.
pub struct CycleScheduler {
    scheduler: JobScheduler,
    job_id: uuid::Uuid,
    schedule: Schedule,
    collection: CollectionLoop,
    // Held for the duration of a cycle.
    running: Arc<Mutex<()>>,
}

impl std::fmt::Debug for CycleScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleScheduler")
            .field("job_id", &self.job_id)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

impl CycleScheduler {
    /// Create the scheduler and register the collection job. Call
    /// [`start`](Self::start) to begin ticking.
    pub async fn new(collection: CollectionLoop, schedule: Schedule) -> Result<Self, SchedulerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        let running = Arc::new(Mutex::new(()));
        let job = create_job(collection.clone(), Arc::clone(&running), &schedule)?;
        let job_id = scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        tracing::info!(job_id = %job_id, schedule = %schedule, "Collection job registered");
        Ok(Self {
            scheduler,
            job_id,
            schedule,
            collection,
            running,
        })
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Start the scheduler.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;
        tracing::info!(schedule = %self.schedule, "Collection scheduler started");
        Ok(())
    }

    /// Start a cycle now without waiting for the first tick. Skipped, like a
    /// tick, if a cycle is already running.
    pub fn run_now(&self) {
        let (collection, running) = (self.collection.clone(), Arc::clone(&self.running));
        tokio::spawn(async move {
            run_exclusive(&collection, &running).await;
        });
    }

    /// Gracefully shutdown the scheduler with default timeout.
    pub async fn shutdown(self) -> Result<(), SchedulerError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown with custom timeout. A timeout is logged, not returned.
    ///
    /// The running cycle is asked to stop at its next file boundary and is
    /// awaited after the job scheduler has stopped, so no acknowledged file
    /// is lost when the process exits.
    pub async fn shutdown_with_timeout(mut self, timeout: Duration) -> Result<(), SchedulerError> {
        self.collection.request_stop();

        let result = match tokio::time::timeout(timeout, self.scheduler.shutdown()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Collection scheduler shutdown failed");
                Err(SchedulerError::Scheduler(e.to_string()))
            }
            Err(_) => {
                tracing::warn!("Collection scheduler shutdown timed out");
                Ok(())
            }
        };

        if self.running.try_lock().is_err() {
            tracing::info!("Waiting for the running collection cycle to finish");
        }
        let _drained = self.running.lock().await;
        tracing::info!("Collection scheduler shutdown complete");
        result
    }
}

fn create_job(
    collection: CollectionLoop,
    running: Arc<Mutex<()>>,
    schedule: &Schedule,
) -> Result<Job, SchedulerError> {
    let callback = move |_: uuid::Uuid, _: JobScheduler| {
        let (collection, running) = (collection.clone(), Arc::clone(&running));
        Box::pin(async move {
            run_exclusive(&collection, &running).await;
        }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
    };

    match schedule {
        Schedule::Interval(d) => Job::new_repeated_async(*d, callback),
        Schedule::Cron(expr) => Job::new_cron_job_async(expr.as_str(), callback),
    }
    .map_err(|e| SchedulerError::Scheduler(e.to_string()))
}

/// Run one cycle unless another is still in progress.
async fn run_exclusive(collection: &CollectionLoop, running: &Mutex<()>) -> Option<CycleReport> {
    let Ok(_guard) = running.try_lock() else {
        tracing::warn!("Previous collection cycle still running, tick skipped");
        return None;
    };
    run_cycle_logged(collection).await
}

/// Run one cycle, logging a run-level failure instead of returning it.
async fn run_cycle_logged(collection: &CollectionLoop) -> Option<CycleReport> {
    match collection.run_cycle().await {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::error!(error = %e, "Collection cycle failed");
            None
        }
    }
}
