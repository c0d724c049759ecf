//! Per-cycle and per-instrument outcome summaries.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::storage::InstrumentId;

/// Why an instrument was not collected.
#[derive(Debug, Clone, PartialEq, Eq, strum_macros::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// The directory could not return the instrument.
    LookupFailed(String),
    /// No type tag is set.
    MissingType,
    /// No retriever is registered for the tag.
    UnknownType(String),
    /// The constructor rejected the configuration blob.
    InvalidConfiguration(String),
    /// `test_configuration` returned false.
    ConfigurationRejected,
    /// `test_configuration` errored, panicked or timed out.
    ValidationFailed(String),
    /// `startup` returned false.
    StartupRefused,
    /// `startup` did not finish in time.
    StartupTimedOut,
    /// `startup` errored or panicked.
    StartupFailed(String),
    /// The loop was stopping before the instrument's turn came.
    Stopped,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LookupFailed(detail)
            | Self::InvalidConfiguration(detail)
            | Self::ValidationFailed(detail)
            | Self::StartupFailed(detail) => {
                write!(f, "{}: {detail}", self.as_ref())
            }
            Self::UnknownType(kind) => write!(f, "unknown_type: '{kind}'"),
            other => f.write_str(other.as_ref()),
        }
    }
}

/// Why an instrument stopped before its retriever was exhausted.
#[derive(Debug, Clone, PartialEq, Eq, strum_macros::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum AbortReason {
    /// The gateway reported an outcome outside the known set.
    UnrecognizedOutcome { file: String, detail: String },
    /// A retriever call returned an error or panicked.
    RetrieverFault(String),
    /// A retriever call did not finish in time.
    TimedOut(String),
    /// A call or acknowledgment arrived in the wrong lifecycle state.
    ProtocolViolation(String),
    /// The loop was asked to stop; undelivered files wait for the next run.
    Interrupted,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnrecognizedOutcome { file, detail } => {
                write!(f, "unrecognized upload outcome for '{file}': {detail}")
            }
            Self::RetrieverFault(detail)
            | Self::TimedOut(detail)
            | Self::ProtocolViolation(detail) => write!(f, "{}: {detail}", self.as_ref()),
            Self::Interrupted => f.write_str(self.as_ref()),
        }
    }
}

/// Final status of one instrument in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentStatus {
    Skipped(SkipReason),
    Completed,
    Aborted(AbortReason),
}

impl InstrumentStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

impl std::fmt::Display for InstrumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skipped(reason) => write!(f, "skipped ({reason})"),
            Self::Completed => f.write_str("completed"),
            Self::Aborted(reason) => write!(f, "aborted ({reason})"),
        }
    }
}

/// What happened to one instrument during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentReport {
    pub instrument_id: InstrumentId,
    /// Instrument name, when the directory lookup succeeded.
    pub name: Option<String>,
    pub status: InstrumentStatus,
    /// Files acknowledged with `file_succeeded`.
    pub succeeded: u64,
    /// Files acknowledged with `file_failed`.
    pub failed: u64,
    /// Files acknowledged with `file_not_processed`.
    pub deferred: u64,
    /// Batches returned by `load_next_file`.
    pub batches: u64,
    /// Whether `shutdown` was invoked on the retriever.
    pub shut_down: bool,
}

impl InstrumentReport {
    pub fn new(instrument_id: InstrumentId) -> Self {
        Self {
            instrument_id,
            name: None,
            status: InstrumentStatus::Completed,
            succeeded: 0,
            failed: 0,
            deferred: 0,
            batches: 0,
            shut_down: false,
        }
    }

    pub fn skipped(instrument_id: InstrumentId, reason: SkipReason) -> Self {
        let mut report = Self::new(instrument_id);
        report.status = InstrumentStatus::Skipped(reason);
        report
    }
}

/// Summary of one collection cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// One entry per listed instrument, ordered by instrument id.
    pub instruments: Vec<InstrumentReport>,
}

impl CycleReport {
    pub fn get(&self, id: InstrumentId) -> Option<&InstrumentReport> {
        self.instruments.iter().find(|r| r.instrument_id == id)
    }

    pub fn completed(&self) -> usize {
        self.instruments.iter().filter(|r| r.status.is_completed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.instruments.iter().filter(|r| r.status.is_skipped()).count()
    }

    pub fn aborted(&self) -> usize {
        self.instruments.iter().filter(|r| r.status.is_aborted()).count()
    }

    pub fn files_succeeded(&self) -> u64 {
        self.instruments.iter().map(|r| r.succeeded).sum()
    }

    pub fn files_failed(&self) -> u64 {
        self.instruments.iter().map(|r| r.failed).sum()
    }

    pub fn files_deferred(&self) -> u64 {
        self.instruments.iter().map(|r| r.deferred).sum()
    }
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} instruments ({} completed, {} skipped, {} aborted), files: {} uploaded, {} failed, {} deferred in {:.1}s",
            self.instruments.len(),
            self.completed(),
            self.skipped(),
            self.aborted(),
            self.files_succeeded(),
            self.files_failed(),
            self.files_deferred(),
            self.elapsed.as_secs_f64(),
        )
    }
}
