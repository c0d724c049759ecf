//! The collection loop: one pass over every listed instrument.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument as _;

use crate::collection::directory::InstrumentDirectory;
use crate::collection::disposition::{Ack, Disposition, disposition};
use crate::collection::driver::{CallTimeouts, DeliveryDriver, DriverError};
use crate::collection::report::{
    AbortReason, CycleReport, InstrumentReport, InstrumentStatus, SkipReason,
};
use crate::gateway::{UploadGateway, UploadOutcome};
use crate::retriever::{RetrieverContext, RetrieverError, RetrieverRegistry};
use crate::storage::{CursorStore, InstrumentId, StorageError};

/// Default number of instruments collected at once (1 = sequential).
pub const DEFAULT_MAX_CONCURRENT_INSTRUMENTS: usize = 1;

/// Default `startup` timeout (30 seconds).
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default `load_next_file` timeout (60 seconds).
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Default per-file upload timeout (60 seconds).
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

fn default_max_concurrent_instruments() -> usize {
    DEFAULT_MAX_CONCURRENT_INSTRUMENTS
}

fn default_startup_timeout() -> Duration {
    DEFAULT_STARTUP_TIMEOUT
}

fn default_load_timeout() -> Duration {
    DEFAULT_LOAD_TIMEOUT
}

fn default_upload_timeout() -> Duration {
    DEFAULT_UPLOAD_TIMEOUT
}

/// Run-level failures. Per-instrument problems never surface here.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("failed to list instruments: {0}")]
    ListInstruments(#[source] StorageError),

    #[error("invalid collection settings: {0}")]
    InvalidSettings(String),
}

/// Concurrency and time limits for a collection cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSettings {
    /// Instruments collected at once.
    #[serde(default = "default_max_concurrent_instruments")]
    pub max_concurrent_instruments: usize,

    /// Limit for `test_configuration`, `startup` and `shutdown`.
    #[serde(default = "default_startup_timeout", with = "humantime_serde")]
    pub startup_timeout: Duration,

    /// Limit for each `load_next_file` call.
    #[serde(default = "default_load_timeout", with = "humantime_serde")]
    pub load_timeout: Duration,

    /// Limit for each upload attempt.
    #[serde(default = "default_upload_timeout", with = "humantime_serde")]
    pub upload_timeout: Duration,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            max_concurrent_instruments: DEFAULT_MAX_CONCURRENT_INSTRUMENTS,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }
}

impl CollectionSettings {
    pub fn validate(&self) -> Result<(), CollectionError> {
        if self.max_concurrent_instruments == 0 {
            return Err(CollectionError::InvalidSettings(
                "max_concurrent_instruments must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("startup_timeout", self.startup_timeout),
            ("load_timeout", self.load_timeout),
            ("upload_timeout", self.upload_timeout),
        ] {
            if value.is_zero() {
                return Err(CollectionError::InvalidSettings(format!(
                    "{name} must be positive"
                )));
            }
        }
        Ok(())
    }

    pub fn call_timeouts(&self) -> CallTimeouts {
        CallTimeouts {
            startup: self.startup_timeout,
            load: self.load_timeout,
        }
    }
}

struct LoopInner {
    directory: Arc<dyn InstrumentDirectory>,
    registry: RetrieverRegistry,
    gateway: Arc<dyn UploadGateway>,
    cursors: CursorStore,
    settings: CollectionSettings,
    stopping: AtomicBool,
}

/// Runs collection cycles over the instrument directory.
///
/// Cheap to clone; clones share the registry, gateway session and settings.
#[derive(Clone)]
pub struct CollectionLoop {
    inner: Arc<LoopInner>,
}

impl std::fmt::Debug for CollectionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionLoop")
            .field("registry", &self.inner.registry)
            .field("gateway", &self.inner.gateway.describe())
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl CollectionLoop {
    /// Create a loop.
    ///
    /// # Errors
    /// `InvalidSettings` if the settings fail validation.
    pub fn new(
        directory: Arc<dyn InstrumentDirectory>,
        registry: RetrieverRegistry,
        gateway: Arc<dyn UploadGateway>,
        cursors: CursorStore,
        settings: CollectionSettings,
    ) -> Result<Self, CollectionError> {
        settings.validate()?;
        Ok(Self {
            inner: Arc::new(LoopInner {
                directory,
                registry,
                gateway,
                cursors,
                settings,
                stopping: AtomicBool::new(false),
            }),
        })
    }

    pub fn settings(&self) -> &CollectionSettings {
        &self.inner.settings
    }

    /// Ask running and later cycles to stop at the next file boundary.
    ///
    /// Instruments that have not started are skipped; a running one finishes
    /// its current upload, is shut down, and leaves the rest of its files for
    /// the next run. Applies to every clone of this loop.
    pub fn request_stop(&self) {
        if !self.inner.stopping.swap(true, Ordering::SeqCst) {
            tracing::info!("Collection stop requested");
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.is_stopping()
    }

    /// Collect every listed instrument once.
    ///
    /// Each instrument runs in its own task; a failure in one never stops
    /// the others. Only a failure to list instruments fails the cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, CollectionError> {
        let started_at = Utc::now();
        let clock = Instant::now();

        let ids = self
            .inner
            .directory
            .list_instrument_ids()
            .await
            .map_err(CollectionError::ListInstruments)?;
        tracing::info!(instruments = ids.len(), "Collection cycle started");

        let semaphore = Arc::new(Semaphore::new(self.inner.settings.max_concurrent_instruments));
        let mut tasks = JoinSet::new();
        let mut task_instruments = HashMap::with_capacity(ids.len());

        for id in ids {
            let inner = Arc::clone(&self.inner);
            let semaphore = Arc::clone(&semaphore);
            let span = tracing::info_span!("instrument", id = %id);
            let handle = tasks.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    inner.collect_instrument(id).await
                }
                .instrument(span),
            );
            task_instruments.insert(handle.id(), id);
        }

        let mut instruments = Vec::with_capacity(task_instruments.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, report)) => instruments.push(report),
                Err(e) => {
                    let Some(&id) = task_instruments.get(&e.id()) else {
                        tracing::error!(error = %e, "Unattributed instrument task failed");
                        continue;
                    };
                    tracing::error!(instrument = %id, error = %e, "Instrument task failed");
                    let mut report = InstrumentReport::new(id);
                    report.status =
                        InstrumentStatus::Aborted(AbortReason::RetrieverFault(e.to_string()));
                    instruments.push(report);
                }
            }
        }
        instruments.sort_by_key(|r| r.instrument_id);

        let report = CycleReport {
            started_at,
            elapsed: clock.elapsed(),
            instruments,
        };
        for instrument in report.instruments.iter().filter(|r| !r.status.is_completed()) {
            tracing::warn!(
                instrument = %instrument.instrument_id,
                name = instrument.name.as_deref().unwrap_or("?"),
                status = %instrument.status,
                "Instrument not completed"
            );
        }
        tracing::info!(summary = %report, "Collection cycle finished");
        Ok(report)
    }
}

impl LoopInner {
    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Collect one instrument. Runs inside the instrument's span.
    async fn collect_instrument(&self, id: InstrumentId) -> InstrumentReport {
        if self.is_stopping() {
            tracing::debug!("Stop requested, instrument not started");
            return InstrumentReport::skipped(id, SkipReason::Stopped);
        }
        tracing::info!("Processing instrument");

        let instrument = match self.directory.get_instrument(id).await {
            Ok(instrument) => instrument,
            Err(e) => {
                tracing::error!(error = %e, "Instrument lookup failed");
                return InstrumentReport::skipped(id, SkipReason::LookupFailed(e.to_string()));
            }
        };

        let mut report = InstrumentReport::new(id);
        report.name = Some(instrument.name.clone());

        let ctx = RetrieverContext::new(id, tracing::Span::current(), self.cursors.clone());
        let retriever = match self
            .registry
            .build(instrument.kind.as_deref(), ctx, instrument.config)
        {
            Ok(retriever) => retriever,
            Err(e) => {
                let reason = match e {
                    RetrieverError::MissingType => SkipReason::MissingType,
                    RetrieverError::UnknownType(kind) => SkipReason::UnknownType(kind),
                    other => SkipReason::InvalidConfiguration(other.to_string()),
                };
                tracing::error!(reason = %reason, "Configuration error, instrument skipped");
                report.status = InstrumentStatus::Skipped(reason);
                return report;
            }
        };

        let mut driver = DeliveryDriver::new(retriever, self.settings.call_timeouts());
        let status = self.drive(&mut driver, &mut report).await;
        report.status = status;
        tracing::debug!(state = %driver.state(), "Closing retriever");

        match driver.close().await {
            Ok(invoked) => report.shut_down = invoked,
            Err(e) => {
                report.shut_down = true;
                tracing::error!(error = %e, "Retriever shutdown failed");
            }
        }

        tracing::info!(
            status = %report.status,
            succeeded = report.succeeded,
            failed = report.failed,
            deferred = report.deferred,
            batches = report.batches,
            "Instrument finished"
        );
        report
    }

    /// Validate, start and iterate a retriever. Shutdown is left to the caller.
    async fn drive(
        &self,
        driver: &mut DeliveryDriver,
        report: &mut InstrumentReport,
    ) -> InstrumentStatus {
        match driver.test_configuration().await {
            Ok(true) => {}
            Ok(false) => {
                tracing::error!("Configuration invalid");
                return InstrumentStatus::Skipped(SkipReason::ConfigurationRejected);
            }
            Err(e) => {
                tracing::error!(error = %e, "Configuration check failed");
                return InstrumentStatus::Skipped(SkipReason::ValidationFailed(e.to_string()));
            }
        }

        match driver.startup().await {
            Ok(true) => tracing::debug!(kind = driver.kind(), "Retriever started"),
            Ok(false) => {
                tracing::error!("Could not initialise retriever");
                return InstrumentStatus::Skipped(SkipReason::StartupRefused);
            }
            Err(DriverError::TimedOut { after, .. }) => {
                tracing::error!(timeout_ms = after.as_millis(), "Retriever startup timed out");
                return InstrumentStatus::Skipped(SkipReason::StartupTimedOut);
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not initialise retriever");
                return InstrumentStatus::Skipped(SkipReason::StartupFailed(e.to_string()));
            }
        }

        loop {
            if self.is_stopping() {
                return interrupted();
            }
            let batch = match driver.next_batch().await {
                Ok(Some(batch)) => batch,
                Ok(None) => return InstrumentStatus::Completed,
                Err(e) => return abort_on(e),
            };
            report.batches += 1;
            tracing::debug!(files = batch.len(), "Batch staged");

            for file in &batch {
                if self.is_stopping() {
                    return interrupted();
                }
                tracing::debug!(file = %file.name, bytes = file.len(), "Uploading file");
                let outcome = self.upload(report.instrument_id, &file.name, &file.content).await;

                let ack = match disposition(&outcome) {
                    Disposition::Acknowledge(ack) => ack,
                    Disposition::Abort(detail) => {
                        tracing::error!(
                            critical = true,
                            file = %file.name,
                            outcome = %detail,
                            "Unrecognised upload result"
                        );
                        let reason = AbortReason::UnrecognizedOutcome {
                            file: file.name.clone(),
                            detail,
                        };
                        tracing::warn!(reason = %reason, "Instrument aborted");
                        return InstrumentStatus::Aborted(reason);
                    }
                };

                match ack {
                    Ack::Succeeded => {
                        tracing::debug!(file = %file.name, "File uploaded OK");
                        report.succeeded += 1;
                    }
                    Ack::Failed => {
                        tracing::error!(file = %file.name, "Upload gateway not ready");
                        report.failed += 1;
                    }
                    Ack::NotProcessed => {
                        tracing::debug!(
                            file = %file.name,
                            "File exists on remote store, will retry later"
                        );
                        report.deferred += 1;
                    }
                }

                if let Err(e) = driver.acknowledge(file, ack) {
                    return abort_on(e);
                }
                if ack == Ack::Succeeded
                    && let Err(e) = driver.checkpoint().await
                {
                    return abort_on(e);
                }
            }
        }
    }

    /// One upload attempt under the upload timeout. A timeout counts as
    /// `GatewayNotReady`; a panicking gateway as `Unrecognized`.
    async fn upload(&self, id: InstrumentId, filename: &str, content: &[u8]) -> UploadOutcome {
        let limit = self.settings.upload_timeout;
        let attempt = AssertUnwindSafe(self.gateway.upload(id, filename, content)).catch_unwind();
        match tokio::time::timeout(limit, attempt).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => UploadOutcome::Unrecognized("upload panicked".into()),
            Err(_) => {
                tracing::warn!(
                    file = %filename,
                    timeout_ms = limit.as_millis(),
                    "Upload timed out"
                );
                UploadOutcome::GatewayNotReady
            }
        }
    }
}

fn interrupted() -> InstrumentStatus {
    tracing::info!("Stop requested, remaining files left for the next run");
    InstrumentStatus::Aborted(AbortReason::Interrupted)
}

/// Log a driver failure and turn it into an abort status.
fn abort_on(error: DriverError) -> InstrumentStatus {
    let reason = match &error {
        DriverError::TimedOut { .. } => AbortReason::TimedOut(error.to_string()),
        DriverError::Protocol(_) => AbortReason::ProtocolViolation(error.to_string()),
        DriverError::Retriever { .. } | DriverError::Panicked { .. } => {
            AbortReason::RetrieverFault(error.to_string())
        }
    };
    tracing::warn!(reason = %reason, "Instrument aborted");
    InstrumentStatus::Aborted(reason)
}
