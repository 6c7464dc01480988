//! Reference processor: derives a content-address style id from the path.

use std::{
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    sha2::{Digest, Sha256},
    tracing::debug,
};

use crate::processor::Processor;

/// Operation counts of a [`DefaultProcessor`] instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
}

/// Built-in processor used when no other processor is configured.
///
/// Create returns the lowercase hex SHA-256 of the absolute path. Update and
/// delete always succeed.
#[derive(Debug, Default)]
pub struct DefaultProcessor {
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
}

impl DefaultProcessor {
    pub const ID: &'static str = "Default";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> OpCounts {
        OpCounts {
            creates: self.creates.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Id for `path`, computed over its absolute form.
pub fn path_digest(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    sha256_hex(absolute.to_string_lossy().as_bytes())
}

#[async_trait]
impl Processor for DefaultProcessor {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn process_create(&self, path: &Path) -> Result<Option<String>> {
        self.creates.fetch_add(1, Ordering::Relaxed);
        let id = path_digest(path);
        debug!(path = %path.display(), id = %id, "default processor create");
        Ok(Some(id))
    }

    async fn process_update(&self, _path: &Path, _external_id: Option<&str>) -> Result<()> {
        self.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn process_delete(&self, _path: &Path, _external_id: Option<&str>) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
