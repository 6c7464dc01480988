//! Turns observed changes into processor calls and persists the outcome.
//!
//! All three entry points share one async mutex, so at most one
//! read-modify-write against the store is in flight per monitored root. The
//! stability wait happens while holding it.

use std::{path::Path, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use crate::{
    Result,
    processor::Processor,
    snapshot::AlterationListener,
    store::PathRecordStore,
    types::{ChangeOutcome, PathRecord, RecordStatus, SkipReason, modified_ms, now_ms},
};

pub struct ChangeController {
    store: Arc<dyn PathRecordStore>,
    processor: Arc<dyn Processor>,
    stability: Duration,
    gate: Mutex<()>,
}

impl ChangeController {
    pub fn new(
        store: Arc<dyn PathRecordStore>,
        processor: Arc<dyn Processor>,
        stability: Duration,
    ) -> Self {
        Self {
            store,
            processor,
            stability,
            gate: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn PathRecordStore> {
        &self.store
    }

    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.processor
    }

    pub fn stability_period(&self) -> Duration {
        self.stability
    }

    /// A file appeared.
    ///
    /// Paths already past `Unprocessed` are duplicates and skipped. Processor
    /// failures leave the record `Unprocessed` for the retry sweep.
    pub async fn on_create(&self, path: &Path) -> Result<ChangeOutcome> {
        let _guard = self.gate.lock().await;
        self.wait_until_stable(path).await;
        self.create_locked(path).await
    }

    /// A file's content changed.
    ///
    /// Without a record this is handled as a create. A record whose stored
    /// mtime is not older than the file's is stale, unless the previous
    /// update failed.
    pub async fn on_update(&self, path: &Path) -> Result<ChangeOutcome> {
        let _guard = self.gate.lock().await;
        self.wait_until_stable(path).await;

        let Some(mut record) = self.store.find_by_path(path).await? else {
            return self.create_locked(path).await;
        };

        let modified = modified_ms(path);
        if record.last_modified_ms >= modified && record.status != RecordStatus::UnprocessedUpdate {
            debug!(path = %path.display(), status = %record.status, "stale update notification, skipping");
            return Ok(ChangeOutcome::Skipped(SkipReason::Stale));
        }

        info!(path = %path.display(), "processing update");
        match self
            .processor
            .process_update(path, record.external_id.as_deref())
            .await
        {
            Ok(()) => {
                record.last_modified_ms = modified;
                record.status = RecordStatus::Processed;
                self.store.save(&record).await?;
                Ok(ChangeOutcome::Processed)
            },
            Err(e) => {
                warn!(path = %path.display(), processor = self.processor.id(), error = %e, "update failed");
                record.status = RecordStatus::UnprocessedUpdate;
                self.store.save(&record).await?;
                Ok(ChangeOutcome::Failed(RecordStatus::UnprocessedUpdate))
            },
        }
    }

    /// A file disappeared. No stability wait.
    pub async fn on_delete(&self, path: &Path) -> Result<ChangeOutcome> {
        let _guard = self.gate.lock().await;

        let Some(mut record) = self.store.find_by_path(path).await? else {
            debug!(path = %path.display(), "delete for unknown path, skipping");
            return Ok(ChangeOutcome::Skipped(SkipReason::Unknown));
        };

        if record.status == RecordStatus::Unprocessed {
            info!(path = %path.display(), "purging record that was never processed");
            self.store.delete_by_path(path).await?;
            return Ok(ChangeOutcome::Purged);
        }

        info!(path = %path.display(), "processing delete");
        match self
            .processor
            .process_delete(path, record.external_id.as_deref())
            .await
        {
            Ok(()) => {
                self.store.delete_by_path(path).await?;
                Ok(ChangeOutcome::Removed)
            },
            Err(e) => {
                warn!(path = %path.display(), processor = self.processor.id(), error = %e, "delete failed");
                record.status = RecordStatus::UnprocessedDelete;
                self.store.save(&record).await?;
                Ok(ChangeOutcome::Failed(RecordStatus::UnprocessedDelete))
            },
        }
    }

    async fn create_locked(&self, path: &Path) -> Result<ChangeOutcome> {
        if let Some(record) = self.store.find_by_path(path).await?
            && record.status != RecordStatus::Unprocessed
        {
            debug!(path = %path.display(), status = %record.status, "duplicate create notification, skipping");
            return Ok(ChangeOutcome::Skipped(SkipReason::Duplicate));
        }

        info!(path = %path.display(), "processing create");
        let modified = modified_ms(path);
        let (record, outcome) = match self.processor.process_create(path).await {
            Ok(external_id) => (
                PathRecord::new(path, external_id, modified, RecordStatus::Processed),
                ChangeOutcome::Processed,
            ),
            Err(e) => {
                warn!(path = %path.display(), processor = self.processor.id(), error = %e, "create failed");
                (
                    PathRecord::new(path, None, modified, RecordStatus::Unprocessed),
                    ChangeOutcome::Failed(RecordStatus::Unprocessed),
                )
            },
        };
        self.store.save(&record).await?;
        Ok(outcome)
    }

    /// Sleep until `path` has not been modified for longer than the stability
    /// period. A missing file reads as mtime 0 and passes immediately.
    async fn wait_until_stable(&self, path: &Path) {
        let period_ms = self.stability.as_millis() as u64;
        loop {
            let quiet_ms = now_ms().saturating_sub(modified_ms(path));
            if quiet_ms > period_ms {
                return;
            }
            debug!(path = %path.display(), quiet_ms, "waiting for file to stabilize");
            tokio::time::sleep(self.stability).await;
        }
    }
}

/// Feeds file events from the diff engine into a [`ChangeController`].
/// Directory events carry no work.
pub struct ControllerListener {
    controller: Arc<ChangeController>,
}

impl ControllerListener {
    pub fn new(controller: Arc<ChangeController>) -> Self {
        Self { controller }
    }
}

fn log_failure(operation: &str, path: &Path, result: Result<ChangeOutcome>) {
    if let Err(e) = result {
        warn!(operation, path = %path.display(), error = %e, "failed to record change");
    }
}

#[async_trait]
impl AlterationListener for ControllerListener {
    async fn on_file_create(&self, path: &Path) {
        log_failure("create", path, self.controller.on_create(path).await);
    }

    async fn on_file_change(&self, path: &Path) {
        log_failure("update", path, self.controller.on_update(path).await);
    }

    async fn on_file_delete(&self, path: &Path) {
        log_failure("delete", path, self.controller.on_delete(path).await);
    }
}
