//! Persistence trait for path records.

use std::path::Path;

use async_trait::async_trait;

use crate::{
    Result,
    types::{PathRecord, RecordStatus},
};

/// Durable storage of one [`PathRecord`] per known path.
///
/// The controller is the only writer; implementations do not need to guard
/// against concurrent read-modify-write cycles on the same path.
#[async_trait]
pub trait PathRecordStore: Send + Sync {
    async fn find_by_path(&self, path: &Path) -> Result<Option<PathRecord>>;
    /// Insert or replace the record keyed by `record.path`.
    async fn save(&self, record: &PathRecord) -> Result<()>;
    /// Remove the record for `path`. Removing an unknown path is not an error.
    async fn delete_by_path(&self, path: &Path) -> Result<()>;
    async fn find_by_status(&self, status: RecordStatus) -> Result<Vec<PathRecord>>;
    async fn find_all(&self) -> Result<Vec<PathRecord>>;
    async fn count(&self) -> Result<u64>;
}

/// Record totals per status, in [`RecordStatus::ALL`] order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub total: u64,
    pub by_status: Vec<(RecordStatus, u64)>,
}

impl StoreSummary {
    pub fn pending(&self) -> u64 {
        self.by_status
            .iter()
            .filter(|(status, _)| status.is_pending())
            .map(|(_, n)| n)
            .sum()
    }
}

pub async fn summarize(store: &dyn PathRecordStore) -> Result<StoreSummary> {
    let mut by_status = Vec::with_capacity(RecordStatus::ALL.len());
    for status in RecordStatus::ALL {
        by_status.push((status, store.find_by_status(status).await?.len() as u64));
    }
    Ok(StoreSummary {
        total: store.count().await?,
        by_status,
    })
}
