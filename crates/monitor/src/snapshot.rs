//! Polling tree snapshot and diff engine.
//!
//! Each tick lists the monitored tree, walks the fresh listing and the previous
//! snapshot in lock-step (both sorted by raw file name) and reports what was
//! created, changed or deleted. A root that becomes unreachable suspends
//! diffing instead of reporting every known path as deleted; when it comes
//! back the snapshot is rebuilt as a new baseline.

use std::{
    ffi::{OsStr, OsString},
    fs,
    mem,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    async_trait::async_trait,
    tracing::{info, warn},
};

use crate::{
    filter::FileFilter,
    types::{FsEvent, FsEventKind, system_time_ms},
};

/// Receives the changes found by a [`TreeObserver`] tick.
///
/// All callbacks default to no-ops so implementors only pick what they need.
#[async_trait]
pub trait AlterationListener: Send + Sync {
    async fn on_start(&self, _root: &Path) {}
    async fn on_directory_create(&self, _path: &Path) {}
    async fn on_directory_change(&self, _path: &Path) {}
    async fn on_directory_delete(&self, _path: &Path) {}
    async fn on_file_create(&self, _path: &Path) {}
    async fn on_file_change(&self, _path: &Path) {}
    async fn on_file_delete(&self, _path: &Path) {}
    async fn on_stop(&self, _root: &Path) {}
}

/// What a node looked like when it was last refreshed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Signature {
    exists: bool,
    is_dir: bool,
    modified_ms: u64,
    len: u64,
}

impl Signature {
    fn read(path: &Path) -> Self {
        match fs::metadata(path) {
            Ok(meta) => Self {
                exists: true,
                is_dir: meta.is_dir(),
                modified_ms: meta.modified().map(system_time_ms).unwrap_or(0),
                len: if meta.is_dir() { 0 } else { meta.len() },
            },
            Err(_) => Self::default(),
        }
    }
}

/// One node of the in-memory snapshot. Owns its children, sorted by name.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    path: PathBuf,
    name: OsString,
    signature: Signature,
    children: Vec<TreeEntry>,
}

impl TreeEntry {
    fn new(path: PathBuf) -> Self {
        let name = entry_name(&path).to_os_string();
        Self {
            path,
            name,
            signature: Signature::default(),
            children: Vec::new(),
        }
    }

    /// Re-read the node's metadata. Returns `true` when it differs from the
    /// previous reading.
    fn refresh(&mut self) -> bool {
        let previous = self.signature;
        self.signature = Signature::read(&self.path);
        previous != self.signature
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dir(&self) -> bool {
        self.signature.is_dir
    }

    pub fn exists(&self) -> bool {
        self.signature.exists
    }

    pub fn modified_ms(&self) -> u64 {
        self.signature.modified_ms
    }

    pub fn children(&self) -> &[TreeEntry] {
        &self.children
    }

    /// Number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }
}

fn entry_name(path: &Path) -> &OsStr {
    path.file_name().unwrap_or(path.as_os_str())
}

/// State of the monitored root as seen by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootState {
    /// Root readable, diffed normally.
    Available,
    /// Root readable again after an outage; the snapshot was rebuilt.
    Resumed,
    /// Root just became unreadable; diffing suspended.
    Suspended,
    /// Root still unreadable.
    Unavailable,
}

/// Outcome of one [`TreeObserver::check`] call.
#[derive(Debug, Clone)]
pub struct Tick {
    pub state: RootState,
    /// Changes in emission order.
    pub events: Vec<FsEvent>,
}

/// Snapshots a directory tree and reports differences between ticks.
pub struct TreeObserver {
    root: TreeEntry,
    filter: FileFilter,
    available: bool,
    listeners: Vec<Arc<dyn AlterationListener>>,
}

impl TreeObserver {
    pub fn new(root: impl Into<PathBuf>, filter: FileFilter) -> Self {
        Self {
            root: TreeEntry::new(root.into()),
            filter,
            available: false,
            listeners: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root.path
    }

    pub fn filter(&self) -> &FileFilter {
        &self.filter
    }

    /// The last snapshot taken.
    pub fn snapshot(&self) -> &TreeEntry {
        &self.root
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn add_listener(&mut self, listener: Arc<dyn AlterationListener>) {
        self.listeners.push(listener);
    }

    /// Remove every registration of `listener`. Returns `true` if any was
    /// found.
    pub fn remove_listener(&mut self, listener: &Arc<dyn AlterationListener>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| !Arc::ptr_eq(l, listener));
        self.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Take the baseline snapshot without reporting anything.
    pub fn initialize(&mut self) {
        self.available = root_readable(&self.root.path);
        self.root.refresh();
        let children = list_children(&self.filter, &self.root.path);
        self.root.children = children
            .into_iter()
            .map(|path| build_entry(&self.filter, path))
            .collect();
    }

    /// Compare the tree against the last snapshot and replace it.
    pub fn check(&mut self) -> Tick {
        let mut events = Vec::new();

        if !root_readable(&self.root.path) {
            let state = if self.available {
                warn!(
                    dir = %self.root.path.display(),
                    "monitored directory no longer available, suspending monitoring until it returns"
                );
                self.available = false;
                RootState::Suspended
            } else {
                RootState::Unavailable
            };
            return Tick { state, events };
        }

        let state = if self.available {
            RootState::Available
        } else {
            info!(
                dir = %self.root.path.display(),
                "monitored directory has become available, resuming monitoring"
            );
            self.initialize();
            RootState::Resumed
        };

        let current = list_children(&self.filter, &self.root.path);
        let previous = mem::take(&mut self.root.children);
        self.root.children = diff_level(&self.filter, previous, current, &mut events);

        Tick { state, events }
    }

    /// Run [`TreeObserver::check`] and deliver the result to every listener,
    /// event by event in emission order.
    pub async fn check_and_notify(&mut self) -> Tick {
        let listeners = self.listeners.clone();
        let root = self.root.path.clone();

        for listener in &listeners {
            listener.on_start(&root).await;
        }

        let tick = self.check_blocking().await;
        for event in &tick.events {
            for listener in &listeners {
                dispatch(listener.as_ref(), event).await;
            }
        }

        for listener in &listeners {
            listener.on_stop(&root).await;
        }
        tick
    }

    /// Run [`TreeObserver::check`] on the blocking pool with the snapshot
    /// moved out of `self`.
    async fn check_blocking(&mut self) -> Tick {
        let placeholder = TreeEntry::new(self.root.path.clone());
        let mut detached = TreeObserver {
            root: mem::replace(&mut self.root, placeholder),
            filter: self.filter.clone(),
            available: mem::take(&mut self.available),
            listeners: Vec::new(),
        };

        match tokio::task::spawn_blocking(move || {
            let tick = detached.check();
            (detached, tick)
        })
        .await
        {
            Ok((detached, tick)) => {
                self.root = detached.root;
                self.available = detached.available;
                tick
            },
            Err(e) => {
                // The snapshot is lost; the next tick takes a new baseline.
                warn!(dir = %self.root.path.display(), error = %e, "directory scan failed");
                Tick {
                    state: RootState::Suspended,
                    events: Vec::new(),
                }
            },
        }
    }
}

async fn dispatch(listener: &dyn AlterationListener, event: &FsEvent) {
    let path = event.path.as_path();
    match (event.kind, event.is_dir) {
        (FsEventKind::Created, true) => listener.on_directory_create(path).await,
        (FsEventKind::Changed, true) => listener.on_directory_change(path).await,
        (FsEventKind::Deleted, true) => listener.on_directory_delete(path).await,
        (FsEventKind::Created, false) => listener.on_file_create(path).await,
        (FsEventKind::Changed, false) => listener.on_file_change(path).await,
        (FsEventKind::Deleted, false) => listener.on_file_delete(path).await,
    }
}

fn root_readable(root: &Path) -> bool {
    root.is_dir() && fs::read_dir(root).is_ok()
}

/// Diff one directory level and return the new children snapshot.
fn diff_level(
    filter: &FileFilter,
    previous: Vec<TreeEntry>,
    current: Vec<PathBuf>,
    events: &mut Vec<FsEvent>,
) -> Vec<TreeEntry> {
    let mut next = Vec::with_capacity(current.len());
    let mut current = current.into_iter().peekable();

    for mut entry in previous {
        while let Some(path) = current.next_if(|p| entry_name(p) < entry.name.as_os_str()) {
            let created = build_entry(filter, path);
            emit_created(&created, events);
            next.push(created);
        }

        if current
            .next_if(|p| entry_name(p) == entry.name.as_os_str())
            .is_some()
        {
            // The subtree's own events come before the entry's change.
            let changed = entry.refresh();
            let children = list_children(filter, &entry.path);
            let previous_children = mem::take(&mut entry.children);
            entry.children = diff_level(filter, previous_children, children, events);
            if changed {
                events.push(FsEvent::new(
                    FsEventKind::Changed,
                    entry.path.clone(),
                    entry.is_dir(),
                ));
            }
            next.push(entry);
        } else {
            let previous_children = mem::take(&mut entry.children);
            diff_level(filter, previous_children, Vec::new(), events);
            events.push(FsEvent::new(
                FsEventKind::Deleted,
                entry.path,
                entry.signature.is_dir,
            ));
        }
    }

    for path in current {
        let created = build_entry(filter, path);
        emit_created(&created, events);
        next.push(created);
    }

    next
}

/// Snapshot `path` and everything below it.
fn build_entry(filter: &FileFilter, path: PathBuf) -> TreeEntry {
    let mut entry = TreeEntry::new(path);
    entry.refresh();
    entry.children = list_children(filter, &entry.path)
        .into_iter()
        .map(|child| build_entry(filter, child))
        .collect();
    entry
}

fn emit_created(entry: &TreeEntry, events: &mut Vec<FsEvent>) {
    events.push(FsEvent::new(
        FsEventKind::Created,
        entry.path.clone(),
        entry.is_dir(),
    ));
    for child in &entry.children {
        emit_created(child, events);
    }
}

/// Filtered children of `dir`, sorted by raw file name. Anything that cannot
/// be listed has no children; dangling links are left out.
fn list_children(filter: &FileFilter, dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() || is_cyclic_link(dir) {
        return Vec::new();
    }
    let Ok(read_dir) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut children: Vec<PathBuf> = read_dir
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.exists() && filter.accepts(path, path.is_dir()))
        .collect();
    children.sort_by(|a, b| entry_name(a).cmp(entry_name(b)));
    children
}

/// A symlink pointing at one of its own ancestors would make the walk
/// infinite.
fn is_cyclic_link(path: &Path) -> bool {
    let is_link = fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if !is_link {
        return false;
    }
    let (Ok(target), Some(parent)) = (fs::canonicalize(path), path.parent()) else {
        return true;
    };
    fs::canonicalize(parent)
        .map(|parent| parent.starts_with(&target))
        .unwrap_or(true)
}
