//! File-name filter shared by the diff engine and the reconciliation walk.

use std::path::Path;

use regex::Regex;

use crate::Result;

pub const MATCH_ALL: &str = ".*";

/// Decides which paths under the monitored root are of interest.
///
/// Hidden entries (names starting with `.`) are always excluded. Files must
/// match the pattern against their whole name; directories are only subject
/// to the hidden rule so both the poller and the reconciliation walk descend
/// into the same subtrees. The pattern is never applied to directory names:
/// `.*\.txt` still reaches `docs/readme.txt`.
#[derive(Debug, Clone)]
pub struct FileFilter {
    pattern: Regex,
    source: String,
}

impl FileFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(&format!("^(?:{pattern})$"))?,
            source: pattern.to_string(),
        })
    }

    pub fn match_all() -> Self {
        Self {
            pattern: Regex::new(".*").unwrap_or_else(|_| unreachable!("literal pattern")),
            source: MATCH_ALL.to_string(),
        }
    }

    /// The pattern as configured, before anchoring.
    pub fn pattern(&self) -> &str {
        &self.source
    }

    pub fn accepts(&self, path: &Path, is_dir: bool) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            return false;
        }
        is_dir || self.pattern.is_match(&name)
    }
}

impl Default for FileFilter {
    fn default() -> Self {
        Self::match_all()
    }
}
