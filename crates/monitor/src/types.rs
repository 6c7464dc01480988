//! Core data types shared by the diff engine, the controller and the stores.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Processing state of a known path.
///
/// Every state except [`RecordStatus::Processed`] is picked up again by the
/// retry sweep.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum RecordStatus {
    /// Seen on disk, but no create call has succeeded yet.
    Unprocessed,
    /// Created upstream, the latest update call failed.
    UnprocessedUpdate,
    /// Gone from disk, the delete call failed.
    UnprocessedDelete,
    Processed,
}

impl RecordStatus {
    /// Statuses the retry sweep re-drives, in sweep order.
    pub const PENDING: [RecordStatus; 3] = [
        Self::Unprocessed,
        Self::UnprocessedUpdate,
        Self::UnprocessedDelete,
    ];

    pub const ALL: [RecordStatus; 4] = [
        Self::Unprocessed,
        Self::UnprocessedUpdate,
        Self::UnprocessedDelete,
        Self::Processed,
    ];

    /// Stable integer encoding used by the SQLite store.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Unprocessed => 0,
            Self::UnprocessedUpdate => 1,
            Self::UnprocessedDelete => 2,
            Self::Processed => 3,
        }
    }

    #[must_use]
    pub fn is_pending(self) -> bool {
        self != Self::Processed
    }
}

impl TryFrom<i64> for RecordStatus {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unprocessed),
            1 => Ok(Self::UnprocessedUpdate),
            2 => Ok(Self::UnprocessedDelete),
            3 => Ok(Self::Processed),
            value => Err(Error::UnknownStatus { value }),
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unprocessed => write!(f, "unprocessed"),
            Self::UnprocessedUpdate => write!(f, "unprocessed-update"),
            Self::UnprocessedDelete => write!(f, "unprocessed-delete"),
            Self::Processed => write!(f, "processed"),
        }
    }
}

/// Durable record of one observed file path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PathRecord {
    pub path: PathBuf,
    /// Identifier handed out by the processor on create.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// File modification time (epoch millis) at the last processing attempt.
    pub last_modified_ms: u64,
    pub status: RecordStatus,
}

impl PathRecord {
    pub fn new(
        path: impl Into<PathBuf>,
        external_id: Option<String>,
        last_modified_ms: u64,
        status: RecordStatus,
    ) -> Self {
        Self {
            path: path.into(),
            external_id,
            last_modified_ms,
            status,
        }
    }
}

/// Kind of change reported by the diff engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FsEventKind {
    Created,
    Changed,
    Deleted,
}

/// One change observed between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
    pub is_dir: bool,
}

impl FsEvent {
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self {
            kind,
            path: path.into(),
            is_dir,
        }
    }
}

/// Why a controller call ended without touching the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Create notification for a path that is already past `Unprocessed`.
    Duplicate,
    /// Update notification that is not newer than what was processed.
    Stale,
    /// Delete notification for a path the store never knew.
    Unknown,
}

/// Result of one controller call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// The processor call succeeded; the record is `Processed`.
    Processed,
    /// A delete call succeeded and the record was removed.
    Removed,
    /// The path disappeared before it was ever created upstream; the record
    /// was dropped without a processor call.
    Purged,
    /// The processor call failed; the record was left in this status.
    Failed(RecordStatus),
    Skipped(SkipReason),
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub(crate) fn system_time_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Modification time of `path` in epoch millis, following symlinks.
///
/// Returns 0 when the path cannot be stat'ed, so a vanished file looks
/// infinitely old.
pub fn modified_ms(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(system_time_ms)
        .unwrap_or(0)
}
