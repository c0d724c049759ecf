//! Read access to the instrument directory.

use crate::storage::{Instrument, InstrumentId, InstrumentStore, StorageError};

/// Source of truth for instrument identities and raw configuration.
#[async_trait::async_trait]
pub trait InstrumentDirectory: Send + Sync + 'static {
    /// Ids of the instruments to collect this cycle.
    async fn list_instrument_ids(&self) -> Result<Vec<InstrumentId>, StorageError>;

    /// Type tag and configuration of one instrument.
    async fn get_instrument(&self, id: InstrumentId) -> Result<Instrument, StorageError>;
}

#[async_trait::async_trait]
impl InstrumentDirectory for InstrumentStore {
    async fn list_instrument_ids(&self) -> Result<Vec<InstrumentId>, StorageError> {
        self.list_enabled_ids().await
    }

    async fn get_instrument(&self, id: InstrumentId) -> Result<Instrument, StorageError> {
        self.get(id).await
    }
}
