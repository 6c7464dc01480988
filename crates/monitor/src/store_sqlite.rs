//! SQLite-backed path record store using sqlx.

use std::path::{Path, PathBuf};

use {
    async_trait::async_trait,
    sqlx::{
        Row, SqlitePool,
        sqlite::{SqlitePoolOptions, SqliteRow},
    },
};

use crate::{
    Error, Result,
    store::PathRecordStore,
    types::{PathRecord, RecordStatus},
};

/// SQLite-backed persistence for path records.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with its own connection pool and run migrations.
    ///
    /// Use this for a standalone database. For shared pools use
    /// [`SqliteStore::with_pool`] after calling [`crate::run_migrations`].
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| Error::external(format!("failed to connect to {database_url}"), e))?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Paths are keyed by their raw OS bytes so names that are not valid UTF-8
/// read back exactly as they were saved.
#[cfg(unix)]
fn path_key(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(unix)]
fn path_from_key(key: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(key))
}

#[cfg(not(unix))]
fn path_key(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(not(unix))]
fn path_from_key(key: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&key).into_owned())
}

fn record_from_row(row: &SqliteRow) -> Result<PathRecord> {
    let status = RecordStatus::try_from(row.get::<i64, _>("status"))?;
    Ok(PathRecord {
        path: path_from_key(row.get("path")),
        external_id: row.get("external_id"),
        last_modified_ms: row.get::<i64, _>("last_modified_ms").max(0) as u64,
        status,
    })
}

const SELECT_COLUMNS: &str = "SELECT path, external_id, last_modified_ms, status FROM path_records";

#[async_trait]
impl PathRecordStore for SqliteStore {
    async fn find_by_path(&self, path: &Path) -> Result<Option<PathRecord>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE path = ?"))
            .bind(path_key(path))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn save(&self, record: &PathRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO path_records (path, external_id, last_modified_ms, status)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(path) DO UPDATE SET
                external_id = excluded.external_id,
                last_modified_ms = excluded.last_modified_ms,
                status = excluded.status",
        )
        .bind(path_key(&record.path))
        .bind(&record.external_id)
        .bind(record.last_modified_ms as i64)
        .bind(record.status.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_by_path(&self, path: &Path) -> Result<()> {
        sqlx::query("DELETE FROM path_records WHERE path = ?")
            .bind(path_key(path))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_status(&self, status: RecordStatus) -> Result<Vec<PathRecord>> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} WHERE status = ? ORDER BY path"))
            .bind(status.as_i64())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn find_all(&self) -> Result<Vec<PathRecord>> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY path"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM path_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
