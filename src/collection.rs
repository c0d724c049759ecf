//! Collection Loop
//!
//! Walks the instrument directory once per cycle and, for every instrument,
//! drives its retriever through the delivery state machine against the
//! upload gateway.
//!
//! # Architecture
//!
//! - [`CollectionLoop`]: Cycle entry point; one task per instrument
//! - [`DeliveryDriver`]: Lifecycle and acknowledgment-order enforcement
//! - [`disposition()`]: Upload outcome to acknowledgment mapping
//! - [`InstrumentDirectory`]: Read side of the instrument store
//! - [`CycleReport`]: What happened, per instrument
//!
//! # Per-instrument flow
//!
//! ```text
//! build ─► test_configuration ─► startup ─► load_next_file ─┬─► upload ─► ack ─┐
//!   │            │ false            │ false        ▲        │                  │
//!   ▼            ▼                  ▼              └────────┴──────────────────┘
//! skip         skip               skip                      │ None / abort
//!                                                           ▼
//!                                                        shutdown
//! ```

mod cycle;
mod directory;
mod disposition;
mod driver;
mod report;

pub use cycle::{
    CollectionError, CollectionLoop, CollectionSettings, DEFAULT_LOAD_TIMEOUT,
    DEFAULT_MAX_CONCURRENT_INSTRUMENTS, DEFAULT_STARTUP_TIMEOUT, DEFAULT_UPLOAD_TIMEOUT,
};
pub use directory::InstrumentDirectory;
pub use disposition::{Ack, Disposition, disposition};
pub use driver::{CallTimeouts, DeliveryDriver, DriverError, RetrieverState};
pub use report::{AbortReason, CycleReport, InstrumentReport, InstrumentStatus, SkipReason};
