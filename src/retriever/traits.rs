//! Core retriever trait and types.

use thiserror::Error;

use crate::storage::{CursorStore, InstrumentId, StorageError};

/// Errors raised by retriever construction or by a retriever call.
///
/// Configuration-level problems found by `test_configuration` or `startup`
/// are reported as `Ok(false)`, not through this type. An `Err` from a
/// lifecycle call is an unexpected fault and aborts the instrument.
#[derive(Debug, Error)]
pub enum RetrieverError {
    /// The instrument has no type tag.
    #[error("instrument type not set")]
    MissingType,

    /// No constructor is registered for the type tag.
    #[error("unknown instrument type: '{0}'")]
    UnknownType(String),

    /// The constructor rejected the configuration blob.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// I/O failure while reaching the data source.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Cursor persistence failed.
    #[error("cursor storage error: {0}")]
    Storage(#[from] StorageError),

    /// A call arrived in a state that does not allow it.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Anything else, including a panic inside a retriever call.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A file staged for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    /// File name as it should appear in the remote store.
    pub name: String,
    /// Raw file bytes.
    pub content: Vec<u8>,
}

impl CandidateFile {
    /// Create a candidate file.
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Content length in bytes.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Whether the file has no content.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Per-instrument dependencies handed to a retriever constructor.
///
/// Replaces process-wide logger and database handles: each retriever gets
/// the span its instrument runs in and a handle to cursor persistence.
#[derive(Debug, Clone)]
pub struct RetrieverContext {
    /// Instrument the retriever is bound to.
    pub instrument_id: InstrumentId,
    /// Span scoped by instrument id; parent for the retriever's own logs.
    pub span: tracing::Span,
    /// Cursor persistence.
    pub cursors: CursorStore,
}

impl RetrieverContext {
    /// Create a context for an instrument.
    pub fn new(instrument_id: InstrumentId, span: tracing::Span, cursors: CursorStore) -> Self {
        Self {
            instrument_id,
            span,
            cursors,
        }
    }
}

/// Per-instrument file source.
///
/// One instance is bound to one instrument for one collection cycle. The
/// collection loop drives it in a fixed order:
///
/// 1. [`test_configuration`](Retriever::test_configuration)
/// 2. [`startup`](Retriever::startup)
/// 3. [`load_next_file`](Retriever::load_next_file) until it returns `None`,
///    acknowledging every staged file, in staging order, before the next call;
///    [`checkpoint`](Retriever::checkpoint) follows every delivered file
/// 4. [`shutdown`](Retriever::shutdown), for every retriever that reached startup
///
/// Acknowledgments are synchronous bookkeeping. Cursor writes belong in
/// `checkpoint`, so a delivered file is recorded even if the cycle is cut
/// short before the next `load_next_file`.
#[async_trait::async_trait]
pub trait Retriever: Send + 'static {
    /// Type tag this retriever was registered under.
    fn kind(&self) -> &str;

    /// Validate configuration without acquiring resources.
    ///
    /// Returns `Ok(false)` for any configuration-level problem.
    async fn test_configuration(&mut self) -> Result<bool, RetrieverError>;

    /// Acquire connections and sessions.
    ///
    /// Must be all-or-nothing: on `Ok(false)` nothing stays acquired.
    async fn startup(&mut self) -> Result<bool, RetrieverError>;

    /// Advance the cursor and stage the next batch.
    ///
    /// `Ok(Some(batch))` may be empty; `Ok(None)` means no more files this
    /// cycle and is terminal.
    async fn load_next_file(&mut self) -> Result<Option<Vec<CandidateFile>>, RetrieverError>;

    /// The file reached the remote store; never offer it again.
    fn file_succeeded(&mut self, file: &CandidateFile) -> Result<(), RetrieverError>;

    /// The file could not be delivered this cycle.
    fn file_failed(&mut self, file: &CandidateFile) -> Result<(), RetrieverError>;

    /// Delivery was deferred; offer the file again in a later cycle.
    fn file_not_processed(&mut self, file: &CandidateFile) -> Result<(), RetrieverError>;

    /// Persist acknowledgments made so far. The default does nothing.
    async fn checkpoint(&mut self) -> Result<(), RetrieverError> {
        Ok(())
    }

    /// Release everything acquired in `startup`. Idempotent.
    async fn shutdown(&mut self) -> Result<(), RetrieverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_file() {
        let file = CandidateFile::new("20240101.csv", b"a,b\n1,2\n".to_vec());
        assert_eq!(file.name, "20240101.csv");
        assert_eq!(file.len(), 8);
        assert!(!file.is_empty());
        assert!(CandidateFile::new("empty", Vec::new()).is_empty());
    }

    #[test]
    fn test_error_messages() {
        let err = RetrieverError::UnknownType("serial".into());
        assert_eq!(err.to_string(), "unknown instrument type: 'serial'");
    }
}
