//! In-memory store for testing.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{
    Result,
    store::PathRecordStore,
    types::{PathRecord, RecordStatus},
};

/// In-memory store backed by `HashMap`. No persistence, for tests only.
pub struct InMemoryStore {
    records: Mutex<HashMap<PathBuf, PathRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Seed the store with existing records.
    pub fn with_records(records: impl IntoIterator<Item = PathRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.lock().unwrap_or_else(|e| e.into_inner());
            for record in records {
                map.insert(record.path.clone(), record);
            }
        }
        store
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PathRecordStore for InMemoryStore {
    async fn find_by_path(&self, path: &Path) -> Result<Option<PathRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(path).cloned())
    }

    async fn save(&self, record: &PathRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(record.path.clone(), record.clone());
        Ok(())
    }

    async fn delete_by_path(&self, path: &Path) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.remove(path);
        Ok(())
    }

    async fn find_by_status(&self, status: RecordStatus) -> Result<Vec<PathRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<PathRecord> = records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(matching)
    }

    async fn find_all(&self) -> Result<Vec<PathRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<PathRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(all)
    }

    async fn count(&self) -> Result<u64> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.len() as u64)
    }
}
