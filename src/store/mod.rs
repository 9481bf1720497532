use crate::Issue;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while persisting issues.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode issues: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// JSON-file-backed issue store.
///
/// The whole collection lives in one file as a JSON array. Every mutation
/// reads the file, applies the change and rewrites it in full; there is no
/// locking, so the last writer wins.
pub struct IssueStore {
    path: PathBuf,
}

impl IssueStore {
    /// Open a store backed by `path`. The file is created lazily on first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every issue.
    ///
    /// A missing file is an empty store. Unreadable or malformed content is
    /// logged and also treated as empty.
    pub fn list(&self) -> Vec<Issue> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read issue store");
                return Vec::new();
            }
        };

        if data.trim().is_empty() {
            return Vec::new();
        }

        match serde_json::from_str(&data) {
            Ok(issues) => issues,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to parse issue store");
                Vec::new()
            }
        }
    }

    /// Find a single issue by id.
    pub fn get(&self, id: &str) -> Option<Issue> {
        self.list().into_iter().find(|issue| issue.id == id)
    }

    /// Insert or replace an issue by id.
    ///
    /// An existing issue keeps its position; a new one is appended.
    pub fn save(&self, issue: &Issue) -> Result<()> {
        let mut issues = self.list();
        match issues.iter_mut().find(|existing| existing.id == issue.id) {
            Some(existing) => *existing = issue.clone(),
            None => issues.push(issue.clone()),
        }
        self.write_all(&issues)?;
        info!(id = %issue.id, status = %issue.status, "saved issue");
        Ok(())
    }

    /// Remove an issue. Returns whether anything was removed.
    ///
    /// Deleting an unknown id leaves the file untouched.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut issues = self.list();
        let before = issues.len();
        issues.retain(|issue| issue.id != id);
        if issues.len() == before {
            debug!(id, "delete ignored, no such issue");
            return Ok(false);
        }
        self.write_all(&issues)?;
        info!(id, "deleted issue");
        Ok(true)
    }

    /// Replace the whole collection.
    pub fn write_all(&self, issues: &[Issue]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(issues)?;

        // Write beside the target and rename so readers never see half a file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}
