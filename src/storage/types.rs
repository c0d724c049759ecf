//! Core data types for the storage layer.
//!
//! - [`InstrumentId`]: Opaque instrument identity assigned by the directory
//! - [`Instrument`]: A configured data source as read by the collection loop
//! - [`InstrumentRecord`]: A new instrument definition to insert

use serde::{Deserialize, Serialize};

/// Opaque instrument identity.
///
/// Assigned by the instrument directory; the collection core never
/// interprets the value beyond equality, ordering and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(pub i64);

impl std::fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for InstrumentId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// An instrument as read from the instrument directory.
///
/// Read once per collection cycle and never mutated by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Directory-assigned identity.
    pub id: InstrumentId,
    /// Human-readable unique name.
    pub name: String,
    /// Type tag selecting the retriever implementation, if set.
    pub kind: Option<String>,
    /// Opaque configuration blob; its shape is defined by `kind`.
    pub config: serde_json::Value,
    /// Disabled instruments are not listed for collection.
    pub enabled: bool,
}

/// A new instrument definition to be inserted into the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRecord {
    /// Unique name.
    pub name: String,
    /// Retriever type tag.
    pub kind: Option<String>,
    /// Retriever configuration.
    pub config: serde_json::Value,
    /// Whether the instrument is collected.
    pub enabled: bool,
}

impl InstrumentRecord {
    /// Create an enabled instrument record.
    pub fn new(
        name: impl Into<String>,
        kind: Option<&str>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.map(str::to_owned),
            config,
            enabled: true,
        }
    }

    /// Set enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
