//! Retriever Layer
//!
//! Per-instrument file sources behind one capability trait, built by type
//! tag from a registry populated at process start.
//!
//! # Architecture
//!
//! - [`Retriever`]: Lifecycle trait (validate, start, iterate, acknowledge, shut down)
//! - [`RetrieverRegistry`]: Type tag to constructor mapping
//! - [`RetrieverContext`]: Per-instrument span and cursor persistence
//! - [`LocalDirRetriever`]: Built-in `local_dir` implementation
//!
//! # Example
//!
//! ```rust,no_run
//! use nrt_collector::retriever::{RetrieverContext, RetrieverRegistry};
//! use nrt_collector::{InstrumentId, StorageBuilder};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handles = StorageBuilder::new("sqlite::memory:").build().await?;
//! let registry = RetrieverRegistry::with_builtin();
//! let ctx = RetrieverContext::new(InstrumentId(1), tracing::Span::none(), handles.cursor_store.clone());
//! let mut retriever = registry.build(
//!     Some("local_dir"),
//!     ctx,
//!     serde_json::json!({ "source_dir": "/data/ship-a" }),
//! )?;
//! if retriever.test_configuration().await? && retriever.startup().await? {
//!     retriever.shutdown().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod local_dir;
mod registry;
mod traits;

pub use local_dir::{LOCAL_DIR_KIND, LocalDirConfig, LocalDirRetriever};
pub use registry::{RetrieverConstructor, RetrieverRegistry};
pub use traits::{CandidateFile, Retriever, RetrieverContext, RetrieverError};
