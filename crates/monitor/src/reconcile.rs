//! Timer-driven reconciliation between the tree on disk and the store.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use {
    tracing::{debug, info, warn},
    walkdir::WalkDir,
};

use crate::{
    Error, Result,
    controller::ChangeController,
    filter::FileFilter,
    types::{ChangeOutcome, RecordStatus, modified_ms},
};

/// Counts per outcome for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Files found by the walk (catch-up) or records examined (retry).
    pub scanned: usize,
    pub processed: usize,
    pub removed: usize,
    pub purged: usize,
    pub failed: usize,
    pub skipped: usize,
    pub unchanged: usize,
    /// Store errors; the affected file was left as is.
    pub errors: usize,
}

impl ReconcileReport {
    fn record(&mut self, path: &Path, result: Result<ChangeOutcome>) {
        match result {
            Ok(ChangeOutcome::Processed) => self.processed += 1,
            Ok(ChangeOutcome::Removed) => self.removed += 1,
            Ok(ChangeOutcome::Purged) => self.purged += 1,
            Ok(ChangeOutcome::Failed(_)) => self.failed += 1,
            Ok(ChangeOutcome::Skipped(_)) => self.skipped += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "reconciliation failed for path");
                self.errors += 1;
            },
        }
    }
}

/// Every file below `root` accepted by `filter`, in name order.
///
/// Hidden directories are pruned. Dangling links and links back to an
/// ancestor are stepped over; any other walk error aborts the whole listing.
pub fn walk_files(root: &Path, filter: &FileFilter) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || filter.accepts(e.path(), e.file_type().is_dir()));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_unfollowable_link(&e) => {
                let path = e.path().unwrap_or(root);
                if filter.accepts(path, false) {
                    warn!(path = %path.display(), error = %e, "skipping link that cannot be followed");
                } else {
                    debug!(path = %path.display(), error = %e, "skipping filtered link");
                }
                continue;
            },
            Err(e) => return Err(Error::external(format!("walking {}", root.display()), e)),
        };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_unfollowable_link(error: &walkdir::Error) -> bool {
    error.depth() > 0
        && (error.loop_ancestor().is_some() || error.path().is_some_and(is_dangling_link))
}

fn is_dangling_link(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink()) && fs::metadata(path).is_err()
}

/// Recover changes made while nothing was polling.
///
/// Files without a stored mtime are created, files newer than the stored
/// mtime are updated, and records whose path is gone are deleted.
pub async fn catch_up(
    controller: &ChangeController,
    root: &Path,
    filter: &FileFilter,
) -> Result<ReconcileReport> {
    let started = Instant::now();
    let mut report = ReconcileReport::default();

    let files = {
        let (root, filter) = (root.to_path_buf(), filter.clone());
        tokio::task::spawn_blocking(move || walk_files(&root, &filter))
            .await
            .map_err(|e| Error::external("reconciliation walk task", e))??
    };
    report.scanned = files.len();

    for path in files {
        let known = match controller.store().find_by_path(&path).await {
            Ok(record) => record.map_or(0, |r| r.last_modified_ms),
            Err(e) => {
                report.record(&path, Err(e));
                continue;
            },
        };

        if known == 0 {
            report.record(&path, controller.on_create(&path).await);
        } else if modified_ms(&path) > known {
            report.record(&path, controller.on_update(&path).await);
        } else {
            report.unchanged += 1;
        }
    }

    for record in controller.store().find_all().await? {
        if !record.path.exists() {
            debug!(path = %record.path.display(), "stored path no longer on disk");
            report.record(&record.path, controller.on_delete(&record.path).await);
        }
    }

    info!(
        dir = %root.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        ?report,
        "startup catch-up finished"
    );
    Ok(report)
}

/// Re-drive every record left in a non-terminal status.
///
/// Create and update retries only run for paths that still exist; delete
/// retries always run.
pub async fn retry_sweep(controller: &ChangeController) -> Result<ReconcileReport> {
    let started = Instant::now();
    let mut report = ReconcileReport::default();

    for status in RecordStatus::PENDING {
        for record in controller.store().find_by_status(status).await? {
            report.scanned += 1;
            let path = record.path.as_path();
            let result = match status {
                RecordStatus::Unprocessed if path.exists() => controller.on_create(path).await,
                RecordStatus::UnprocessedUpdate if path.exists() => {
                    controller.on_update(path).await
                },
                RecordStatus::UnprocessedDelete => controller.on_delete(path).await,
                _ => {
                    report.unchanged += 1;
                    continue;
                },
            };
            report.record(path, result);
        }
    }

    if report.scanned > 0 {
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            ?report,
            "retry sweep finished"
        );
    } else {
        debug!("retry sweep found nothing pending");
    }
    Ok(report)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeSet,
        fs,
        sync::Arc,
        time::{Duration, SystemTime},
    };

    use {
        super::*,
        crate::{
            controller::tests::{Call, ScriptedProcessor, settled_file},
            snapshot::TreeObserver,
            store::PathRecordStore,
            store_memory::InMemoryStore,
            types::{FsEventKind, PathRecord},
        },
    };

    fn set_age(path: &Path, secs: u64) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs))
            .unwrap();
    }

    fn txt_filter() -> FileFilter {
        FileFilter::new(r".*\.txt").unwrap()
    }

    #[test]
    fn walk_honors_filter_and_hidden_rule() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested/deep")).unwrap();
        fs::create_dir_all(dir.path().join(".cache")).unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("a.md"), "a").unwrap();
        fs::write(dir.path().join(".hidden.txt"), "h").unwrap();
        fs::write(dir.path().join(".cache/c.txt"), "c").unwrap();
        fs::write(dir.path().join("nested/deep/d.txt"), "d").unwrap();

        let files = walk_files(dir.path(), &txt_filter()).unwrap();
        let relative: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(relative, vec![
            PathBuf::from("b.txt"),
            PathBuf::from("nested/deep/d.txt")
        ]);
    }

    #[tokio::test]
    async fn walk_error_abandons_catch_up() {
        let dir = tempfile::tempdir().unwrap();
        let processor = Arc::new(ScriptedProcessor::default());
        let controller =
            ChangeController::new(Arc::new(InMemoryStore::new()), processor.clone(), Duration::from_millis(10));

        let result = catch_up(&controller, &dir.path().join("missing"), &txt_filter()).await;
        assert!(result.is_err());
        assert!(processor.calls().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn catch_up_steps_over_dangling_links() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let fresh = root.join("new.txt");
        let gone = root.join("gone.txt");
        settled_file(&fresh, "n");
        std::os::unix::fs::symlink(root.join("missing-target"), root.join(".#lock")).unwrap();
        std::os::unix::fs::symlink(root.join("nowhere.txt"), root.join("dangling.txt")).unwrap();

        let store = Arc::new(InMemoryStore::with_records([PathRecord::new(
            &gone,
            Some("g".into()),
            1,
            RecordStatus::Processed,
        )]));
        let processor = Arc::new(ScriptedProcessor::default());
        let controller = ChangeController::new(store.clone(), processor.clone(), Duration::from_millis(10));

        let report = catch_up(&controller, root, &txt_filter()).await.unwrap();

        assert_eq!(processor.calls(), vec![
            Call::Create(fresh.clone()),
            Call::Delete(gone.clone(), Some("g".into())),
        ]);
        assert_eq!(report.scanned, 1);
        assert_eq!(report.removed, 1);
        assert!(store.find_by_path(&gone).await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn catch_up_steps_over_links_to_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("sub")).unwrap();
        let file = root.join("sub/a.txt");
        settled_file(&file, "a");
        std::os::unix::fs::symlink(root, root.join("sub/loop")).unwrap();

        let processor = Arc::new(ScriptedProcessor::default());
        let controller =
            ChangeController::new(Arc::new(InMemoryStore::new()), processor.clone(), Duration::from_millis(10));

        let report = catch_up(&controller, root, &txt_filter()).await.unwrap();
        assert_eq!(processor.calls(), vec![Call::Create(file)]);
        assert_eq!(report.processed, 1);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn non_utf8_names_are_created_once() {
        use {
            crate::store_sqlite::SqliteStore,
            std::{ffi::OsStr, os::unix::ffi::OsStrExt},
        };

        let dir = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        let file = dir.path().join(OsStr::from_bytes(b"bad\xffname.txt"));
        settled_file(&file, "x");

        let url = format!("sqlite://{}?mode=rwc", db.path().join("records.db").display());
        let store = Arc::new(SqliteStore::new(&url).await.unwrap());
        let processor = Arc::new(ScriptedProcessor::default());
        let controller = ChangeController::new(store.clone(), processor.clone(), Duration::from_millis(10));

        let first = catch_up(&controller, dir.path(), &txt_filter()).await.unwrap();
        let second = catch_up(&controller, dir.path(), &txt_filter()).await.unwrap();

        assert_eq!(processor.calls(), vec![Call::Create(file.clone())]);
        assert_eq!(first.processed, 1);
        assert_eq!(second.unchanged, 1);
        assert_eq!(second.removed, 0);
        assert_eq!(store.count().await.unwrap(), 1);
        let record = store.find_by_path(&file).await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Processed);
    }

    #[tokio::test]
    async fn catch_up_matches_live_diff() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let unchanged = root.join("unchanged.txt");
        let changed = root.join("changed-file.txt");
        let gone = root.join("gone.txt");
        let fresh = root.join("new-file.txt");
        for path in [&unchanged, &changed, &gone] {
            settled_file(path, "v1");
        }

        // Prime the store and a live observer with the same baseline.
        let store = Arc::new(InMemoryStore::new());
        let primer = ChangeController::new(
            store.clone(),
            Arc::new(ScriptedProcessor::default()),
            Duration::from_millis(10),
        );
        for path in [&unchanged, &changed, &gone] {
            primer.on_create(path).await.unwrap();
        }
        let mut observer = TreeObserver::new(root, txt_filter());
        observer.initialize();

        // Changes made while nothing was running.
        settled_file(&fresh, "new");
        fs::write(&changed, "v2 is longer").unwrap();
        set_age(&changed, 30);
        fs::remove_file(&gone).unwrap();

        let live: BTreeSet<(FsEventKind, PathBuf)> = observer
            .check()
            .events
            .into_iter()
            .filter(|e| !e.is_dir)
            .map(|e| (e.kind, e.path))
            .collect();

        let processor = Arc::new(ScriptedProcessor::default());
        let controller = ChangeController::new(store.clone(), processor.clone(), Duration::from_millis(10));
        let report = catch_up(&controller, root, &txt_filter()).await.unwrap();

        let reconciled: BTreeSet<(FsEventKind, PathBuf)> = processor
            .calls()
            .into_iter()
            .map(|call| match call {
                Call::Create(p) => (FsEventKind::Created, p),
                Call::Update(p, _) => (FsEventKind::Changed, p),
                Call::Delete(p, _) => (FsEventKind::Deleted, p),
            })
            .collect();

        assert_eq!(reconciled, live);
        assert_eq!(reconciled, BTreeSet::from([
            (FsEventKind::Created, fresh.clone()),
            (FsEventKind::Changed, changed.clone()),
            (FsEventKind::Deleted, gone.clone()),
        ]));
        assert_eq!(report.scanned, 3);
        assert_eq!(report.processed, 2);
        assert_eq!(report.removed, 1);
        assert_eq!(report.unchanged, 1);

        // Update and delete carry the ids issued at priming.
        let calls = processor.calls();
        assert!(calls.contains(&Call::Update(changed, Some("id-2".into()))));
        assert!(calls.contains(&Call::Delete(gone, Some("id-3".into()))));
    }

    #[tokio::test]
    async fn catch_up_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        settled_file(&dir.path().join("a.txt"), "a");
        settled_file(&dir.path().join("b.txt"), "b");

        let store = Arc::new(InMemoryStore::new());
        let controller = ChangeController::new(
            store.clone(),
            Arc::new(ScriptedProcessor::failing(1)),
            Duration::from_millis(10),
        );
        let report = catch_up(&controller, dir.path(), &txt_filter()).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.processed, 1);
        let a = store.find_by_path(&dir.path().join("a.txt")).await.unwrap().unwrap();
        let b = store.find_by_path(&dir.path().join("b.txt")).await.unwrap().unwrap();
        assert_eq!(a.status, RecordStatus::Unprocessed);
        assert_eq!(b.status, RecordStatus::Processed);
    }

    #[tokio::test]
    async fn retry_sweep_redrives_pending_records() {
        let dir = tempfile::tempdir().unwrap();
        let retry_create = dir.path().join("create.txt");
        let retry_update = dir.path().join("update.txt");
        settled_file(&retry_create, "c");
        settled_file(&retry_update, "u");
        let vanished = dir.path().join("vanished.txt");
        let retry_delete = dir.path().join("delete.txt");
        let done = dir.path().join("done.txt");

        let store = Arc::new(InMemoryStore::with_records([
            PathRecord::new(&retry_create, None, modified_ms(&retry_create), RecordStatus::Unprocessed),
            PathRecord::new(&vanished, None, 1, RecordStatus::Unprocessed),
            PathRecord::new(&retry_update, Some("u".into()), 1, RecordStatus::UnprocessedUpdate),
            PathRecord::new(&retry_delete, Some("d".into()), 1, RecordStatus::UnprocessedDelete),
            PathRecord::new(&done, Some("x".into()), 1, RecordStatus::Processed),
        ]));
        let processor = Arc::new(ScriptedProcessor::default());
        let controller = ChangeController::new(store.clone(), processor.clone(), Duration::from_millis(10));

        let report = retry_sweep(&controller).await.unwrap();

        assert_eq!(processor.calls(), vec![
            Call::Create(retry_create.clone()),
            Call::Update(retry_update.clone(), Some("u".into())),
            Call::Delete(retry_delete.clone(), Some("d".into())),
        ]);
        assert_eq!(report.scanned, 4);
        assert_eq!(report.processed, 2);
        assert_eq!(report.removed, 1);
        assert_eq!(report.unchanged, 1);

        let left: Vec<_> = store
            .find_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.path, r.status))
            .collect();
        assert_eq!(left, vec![
            (retry_create, RecordStatus::Processed),
            (done, RecordStatus::Processed),
            (retry_update, RecordStatus::Processed),
            (vanished, RecordStatus::Unprocessed),
        ]);

        // Nothing pending is left except the vanished create.
        let again = retry_sweep(&controller).await.unwrap();
        assert_eq!(again.scanned, 1);
        assert_eq!(processor.calls().len(), 3);
    }
}
