use crate::record_store::{Record, RecordStore};
use anyhow::Result;
use convoy_core::convoy::{CONVOY_PREFIX, Convoy, ConvoyId, ConvoyStatus};

impl Record for Convoy {
    const PREFIX: &'static str = CONVOY_PREFIX;

    fn record_id(&self) -> &str {
        self.id.as_str()
    }
}

pub type ConvoyStore = RecordStore<Convoy>;

impl RecordStore<Convoy> {
    pub fn get(&self, id: &ConvoyId) -> Result<Option<Convoy>> {
        self.load(id.as_str())
    }

    pub fn allocate_id(&self) -> ConvoyId {
        ConvoyId(self.next_id())
    }

    pub fn list_by_status(&self, status: ConvoyStatus) -> Result<Vec<Convoy>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|c| c.status == status)
            .collect())
    }

    /// Blocked convoys that list `id` among their dependencies.
    pub fn blocked_dependents_of(&self, id: &ConvoyId) -> Result<Vec<ConvoyId>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|c| c.status == ConvoyStatus::Blocked && c.depends_on(id))
            .map(|c| c.id)
            .collect())
    }
}
