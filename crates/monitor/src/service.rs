//! The running monitor: a polling task for the diff engine and a scheduler
//! task for the reconciliation passes.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    tokio::{
        sync::Mutex,
        task::JoinHandle,
        time::{Instant, MissedTickBehavior, interval_at},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    controller::{ChangeController, ControllerListener},
    filter::FileFilter,
    processor::Processor,
    reconcile::{catch_up, retry_sweep},
    snapshot::{RootState, TreeObserver},
    store::PathRecordStore,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10_000);
pub const DEFAULT_STABILITY_PERIOD: Duration = Duration::from_millis(2_000);
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_millis(10_000);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(120_000);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(1_000);

/// Runtime settings of a [`DirectoryMonitor`].
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub root: PathBuf,
    pub filter: FileFilter,
    pub poll_interval: Duration,
    pub stability: Duration,
    /// Delay before the one-shot startup catch-up.
    pub startup_delay: Duration,
    pub retry_interval: Duration,
    /// How long a stopping monitor waits for an in-flight tick.
    pub shutdown_grace: Duration,
}

impl MonitorOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            filter: FileFilter::match_all(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stability: DEFAULT_STABILITY_PERIOD,
            startup_delay: DEFAULT_STARTUP_DELAY,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

pub struct DirectoryMonitor {
    root: PathBuf,
    controller: Arc<ChangeController>,
    cancel: CancellationToken,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
    scheduler_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_grace: Duration,
}

impl DirectoryMonitor {
    /// Take the baseline snapshot and spawn the polling and scheduler tasks.
    ///
    /// Fails when the monitored directory does not exist.
    pub async fn start(
        options: MonitorOptions,
        store: Arc<dyn PathRecordStore>,
        processor: Arc<dyn Processor>,
    ) -> Result<Self> {
        if !options.root.is_dir() {
            return Err(Error::directory_not_found(&options.root));
        }
        let root = std::path::absolute(&options.root)?;

        info!(
            dir = %root.display(),
            filter = options.filter.pattern(),
            processor = processor.id(),
            poll_interval_ms = options.poll_interval.as_millis() as u64,
            stability_ms = options.stability.as_millis() as u64,
            "starting directory monitor"
        );

        let controller = Arc::new(ChangeController::new(store, processor, options.stability));

        let mut observer = TreeObserver::new(&root, options.filter.clone());
        observer.add_listener(Arc::new(ControllerListener::new(Arc::clone(&controller))));
        observer.initialize();
        debug!(
            entries = observer.snapshot().descendant_count(),
            "initial snapshot taken"
        );

        let cancel = CancellationToken::new();
        let poll_handle = tokio::spawn(poll_loop(
            observer,
            options.poll_interval,
            cancel.clone(),
        ));
        let scheduler_handle = tokio::spawn(schedule_loop(
            Arc::clone(&controller),
            root.clone(),
            options.filter,
            options.startup_delay,
            options.retry_interval,
            cancel.clone(),
        ));

        Ok(Self {
            root,
            controller,
            cancel,
            poll_handle: Mutex::new(Some(poll_handle)),
            scheduler_handle: Mutex::new(Some(scheduler_handle)),
            shutdown_grace: options.shutdown_grace,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn controller(&self) -> &Arc<ChangeController> {
        &self.controller
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop both tasks. The scheduler is aborted at once; an in-flight poll
    /// tick gets the shutdown grace period before it is aborted too.
    pub async fn stop(&self) {
        self.cancel.cancel();

        if let Some(handle) = self.scheduler_handle.lock().await.take() {
            handle.abort();
        }

        if let Some(mut handle) = self.poll_handle.lock().await.take()
            && tokio::time::timeout(self.shutdown_grace, &mut handle)
                .await
                .is_err()
        {
            warn!(
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "poll tick still running after grace period, aborting"
            );
            handle.abort();
        }

        info!(dir = %self.root.display(), "directory monitor stopped");
    }
}

async fn poll_loop(mut observer: TreeObserver, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let started = Instant::now();
        let tick = observer.check_and_notify().await;
        if tick.state != RootState::Unavailable {
            debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                events = tick.events.len(),
                state = ?tick.state,
                "directory scan finished"
            );
        }
    }
    debug!("poll loop stopped");
}

async fn schedule_loop(
    controller: Arc<ChangeController>,
    root: PathBuf,
    filter: FileFilter,
    startup_delay: Duration,
    retry_interval: Duration,
    cancel: CancellationToken,
) {
    let start = Instant::now();
    let catch_up_timer = tokio::time::sleep_until(start + startup_delay);
    tokio::pin!(catch_up_timer);
    let mut caught_up = false;

    let mut retry = interval_at(start + retry_interval, retry_interval);
    retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = &mut catch_up_timer, if !caught_up => {
                caught_up = true;
                if let Err(e) = catch_up(&controller, &root, &filter).await {
                    warn!(dir = %root.display(), error = %e, "startup catch-up abandoned");
                }
            },
            _ = retry.tick() => {
                if let Err(e) = retry_sweep(&controller).await {
                    warn!(error = %e, "retry sweep abandoned");
                }
            },
        }
    }
    debug!("scheduler stopped");
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::fs;

    use {
        super::*,
        crate::{
            processor_default::DefaultProcessor,
            store_memory::InMemoryStore,
            types::{PathRecord, RecordStatus},
        },
        async_trait::async_trait,
    };

    /// Poll the store until the record for `path` satisfies `predicate`.
    async fn wait_for<F>(store: &InMemoryStore, path: &Path, predicate: F)
    where
        F: Fn(Option<&PathRecord>) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let record = store.find_by_path(path).await.unwrap();
            if predicate(record.as_ref()) {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "record for {} never reached the expected state: {record:?}",
                path.display()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn fast_options(root: &Path) -> MonitorOptions {
        MonitorOptions {
            poll_interval: Duration::from_millis(50),
            stability: Duration::from_millis(10),
            startup_delay: Duration::from_millis(20),
            retry_interval: Duration::from_secs(3600),
            shutdown_grace: Duration::from_millis(500),
            ..MonitorOptions::new(root)
        }
    }

    #[tokio::test]
    async fn missing_directory_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let result = DirectoryMonitor::start(
            MonitorOptions::new(dir.path().join("absent")),
            Arc::new(InMemoryStore::new()),
            Arc::new(DefaultProcessor::new()),
        )
        .await;
        assert!(matches!(result, Err(Error::DirectoryNotFound { .. })));
    }

    #[tokio::test]
    async fn processes_existing_and_live_changes() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("existing.txt");
        fs::write(&existing, "before start").unwrap();

        let store = Arc::new(InMemoryStore::new());
        let processor = Arc::new(DefaultProcessor::new());
        let monitor = DirectoryMonitor::start(fast_options(dir.path()), store.clone(), processor.clone())
            .await
            .unwrap();
        assert!(monitor.is_running());

        let existing = monitor.root().join("existing.txt");
        wait_for(&store, &existing, |r| r.is_some()).await;

        let live = monitor.root().join("live.txt");
        fs::write(&live, "after start").unwrap();
        wait_for(&store, &live, |r| {
            r.is_some_and(|r| r.status == RecordStatus::Processed)
        })
        .await;

        fs::remove_file(&live).unwrap();
        wait_for(&store, &live, |r| r.is_none()).await;

        monitor.stop().await;
        assert!(!monitor.is_running());

        let counts = processor.counts();
        assert_eq!(counts.creates, 2);
        assert_eq!(counts.deletes, 1);
    }

    #[tokio::test]
    async fn retry_sweep_runs_on_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone.txt");
        let store = Arc::new(InMemoryStore::with_records([PathRecord::new(
            &gone,
            Some("x".into()),
            1,
            RecordStatus::UnprocessedDelete,
        )]));

        let options = MonitorOptions {
            startup_delay: Duration::from_secs(3600),
            retry_interval: Duration::from_millis(50),
            ..fast_options(dir.path())
        };
        let monitor = DirectoryMonitor::start(options, store.clone(), Arc::new(DefaultProcessor::new()))
            .await
            .unwrap();

        wait_for(&store, &gone, |r| r.is_none()).await;
        monitor.stop().await;
    }

    struct HangingProcessor;

    #[async_trait]
    impl Processor for HangingProcessor {
        fn id(&self) -> &str {
            "Hanging"
        }

        async fn process_create(&self, _path: &Path) -> anyhow::Result<Option<String>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }

        async fn process_update(&self, _path: &Path, _external_id: Option<&str>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn process_delete(&self, _path: &Path, _external_id: Option<&str>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn stop_is_bounded_by_grace_period() {
        let dir = tempfile::tempdir().unwrap();
        let options = MonitorOptions {
            startup_delay: Duration::from_secs(3600),
            shutdown_grace: Duration::from_millis(100),
            ..fast_options(dir.path())
        };
        let monitor = DirectoryMonitor::start(options, Arc::new(InMemoryStore::new()), Arc::new(HangingProcessor))
            .await
            .unwrap();

        fs::write(dir.path().join("stuck.txt"), "x").unwrap();
        // Let a tick pick the file up and block in the processor.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let started = Instant::now();
        monitor.stop().await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
