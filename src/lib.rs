//! NRT Collector - Near-Real-Time Instrument File Collection
//!
//! Periodically pulls newly produced data files from a fleet of remote
//! scientific instruments and pushes them to a central store. The crate can
//! be used as a library (custom retrievers, custom gateways) or run as the
//! `nrt-collector` binary.
//!
//! # Architecture
//!
//! - **Storage**: SQLite instrument directory and persisted retriever cursors
//! - **Retriever**: Per-instrument file sources behind one lifecycle trait
//! - **Gateway**: Upload session to the remote store with outcome classification
//! - **Collection**: The per-cycle loop and delivery state machine
//! - **Scheduler**: Interval or cron driven cycles
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use nrt_collector::{
//!     CollectionLoop, CollectionSettings, DestinationConfig, InstrumentRecord,
//!     RetrieverRegistry, StorageBuilder, connect_gateway,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handles = StorageBuilder::new("data/nrt.db").build().await?;
//! handles
//!     .instrument_store
//!     .insert_if_not_exists(&InstrumentRecord::new(
//!         "ship-a",
//!         Some("local_dir"),
//!         serde_json::json!({ "source_dir": "/data/ship-a" }),
//!     ))
//!     .await?;
//!
//! let collection = CollectionLoop::new(
//!     Arc::new(handles.instrument_store.clone()),
//!     RetrieverRegistry::with_builtin(),
//!     connect_gateway(&DestinationConfig::directory("/srv/nrt-drop"))?,
//!     handles.cursor_store.clone(),
//!     CollectionSettings::default(),
//! )?;
//! let report = collection.run_cycle().await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod config;
pub mod gateway;
pub mod retriever;
pub mod scheduler;
pub mod storage;

pub use collection::{
    CollectionError, CollectionLoop, CollectionSettings, CycleReport, InstrumentDirectory,
    InstrumentReport, InstrumentStatus,
};
pub use gateway::{DestinationConfig, UploadGateway, UploadOutcome, connect_gateway};
pub use retriever::{CandidateFile, Retriever, RetrieverContext, RetrieverError, RetrieverRegistry};
pub use scheduler::{CycleScheduler, Schedule};
pub use storage::{
    CursorStore, Instrument, InstrumentId, InstrumentRecord, InstrumentStore, StorageBuilder,
    StorageError, StorageHandles,
};
