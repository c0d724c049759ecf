//! Storage Layer
//!
//! SQLite persistence through a sqlx connection pool:
//!
//! - [`InstrumentStore`]: The instrument directory (identity, type tag, config blob)
//! - [`CursorStore`]: Retriever cursors that must survive across runs
//! - [`StorageBuilder`] / [`StorageHandles`]: Initialization and lifecycle management

mod builder;
pub mod cursor_store;
pub mod db;
mod error;
pub mod instrument_store;
mod schema;
mod types;

pub use builder::{StorageBuilder, StorageHandles};
pub use cursor_store::CursorStore;
pub use error::StorageError;
pub use instrument_store::{InstrumentStore, SyncResult};
pub use types::{Instrument, InstrumentId, InstrumentRecord};
