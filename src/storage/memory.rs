use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::traits::{RecordStore, StorageError};
use crate::record::NormalizedRecord;

/// DashMap-backed record store for tests and dry runs.
pub struct InMemoryRecordStore {
    data: DashMap<String, NormalizedRecord>,
}

impl InMemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Get current record count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sorted copy of every record, for state comparisons.
    #[must_use]
    pub fn snapshot(&self) -> Vec<NormalizedRecord> {
        let mut records: Vec<_> = self.data.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert(&self, record: &NormalizedRecord) -> Result<(), StorageError> {
        match self.data.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(StorageError::DuplicateKey(record.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn update_by_id(&self, id: &str, record: &NormalizedRecord) -> Result<(), StorageError> {
        match self.data.get_mut(id) {
            Some(mut row) => {
                *row = NormalizedRecord { id: id.to_string(), ..record.clone() };
                Ok(())
            }
            None => Err(StorageError::NotFound(id.to_string())),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<NormalizedRecord>, StorageError> {
        Ok(self.data.get(id).map(|r| r.value().clone()))
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        Ok(self.data.len() as u64)
    }
}
