use crate::Issue;
use crate::config::{PROJECT_DIR, SyncMethod};
use crate::git::SourceControl;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const SNAPSHOT_FILE: &str = "issues.json";
const README_FILE: &str = "README.md";
const README_CONTENT: &str = "# Code River review issues\n\n\
This directory is generated by code-river. It holds the review issues for this \
project. Do not edit these files by hand.\n";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("issue tracker sync is not supported yet")]
    TrackerUnsupported,
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Extension point for pushing issues to a remote issue tracker.
pub trait IssueTracker {
    fn publish(&self, issues: &[Issue]) -> Result<()>;
}

/// The only tracker available: always reports that it is unsupported.
pub struct UnsupportedTracker;

impl IssueTracker for UnsupportedTracker {
    fn publish(&self, _issues: &[Issue]) -> Result<()> {
        Err(SyncError::TrackerUnsupported)
    }
}

/// What a publish run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub published: bool,
    /// Issues skipped because their file no longer exists.
    pub skipped_missing: usize,
    pub written: Vec<PathBuf>,
    pub staged: bool,
    /// Non-fatal problems worth telling the user about.
    pub notices: Vec<String>,
}

/// Writes the project-local snapshot of review issues.
pub struct SyncWriter {
    workspace: PathBuf,
    method: SyncMethod,
    source: Arc<dyn SourceControl>,
    tracker: Box<dyn IssueTracker>,
}

impl SyncWriter {
    pub fn new(workspace: impl Into<PathBuf>, method: SyncMethod, source: Arc<dyn SourceControl>) -> Self {
        Self {
            workspace: workspace.into(),
            method,
            source,
            tracker: Box::new(UnsupportedTracker),
        }
    }

    pub fn with_tracker(mut self, tracker: Box<dyn IssueTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn project_dir(&self) -> PathBuf {
        self.workspace.join(PROJECT_DIR)
    }

    /// Path of the per-file grouped comments file.
    pub fn comments_file(&self) -> PathBuf {
        let name = self
            .workspace
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".to_string());
        self.project_dir().join(format!("comments-{name}.json"))
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.project_dir().join(SNAPSHOT_FILE)
    }

    /// Publish `issues`. Returns true on success.
    ///
    /// Failures are logged; the caller only needs the outcome.
    pub fn publish(&self, issues: &[Issue]) -> bool {
        match self.publish_report(issues) {
            Ok(report) => report.published,
            Err(e) => {
                warn!(error = %e, "publish failed");
                false
            }
        }
    }

    /// Publish `issues` and describe what happened.
    pub fn publish_report(&self, issues: &[Issue]) -> Result<PublishReport> {
        let valid: Vec<&Issue> = issues
            .iter()
            .filter(|issue| {
                let exists = issue.file_path.exists();
                if !exists {
                    debug!(path = %issue.file_path.display(), "file missing, not published");
                }
                exists
            })
            .collect();

        let mut report = PublishReport {
            skipped_missing: issues.len() - valid.len(),
            ..PublishReport::default()
        };

        if valid.is_empty() {
            warn!("no review issues with existing files to publish");
            report
                .notices
                .push("no review issues with existing files to publish".to_string());
            return Ok(report);
        }

        let dir = self.project_dir();
        fs::create_dir_all(&dir).map_err(|source| SyncError::Io {
            path: dir.clone(),
            source,
        })?;

        let comments_file = self.comments_file();
        write_json(&comments_file, &group_by_relative_path(&self.workspace, &valid))?;
        report.written.push(comments_file);

        let snapshot_file = self.snapshot_file();
        write_json(&snapshot_file, issues)?;
        report.written.push(snapshot_file);

        let readme = dir.join(README_FILE);
        if !readme.exists() {
            fs::write(&readme, README_CONTENT).map_err(|source| SyncError::Io {
                path: readme.clone(),
                source,
            })?;
        }

        self.unignore_project_dir()?;

        let mut staged = true;
        for path in report.written.iter().chain([&readme]) {
            staged &= self.source.stage(path);
        }
        report.staged = staged;
        if !report.staged {
            warn!("could not stage snapshot with git");
            report
                .notices
                .push("snapshot written but not staged with git".to_string());
        }

        if self.method.uses_tracker()
            && let Err(e) = self.tracker.publish(&issues_owned(&valid))
        {
            warn!(error = %e, "issue tracker sync skipped");
            report.notices.push(e.to_string());
        }

        report.published = true;
        info!(
            count = issues.len(),
            skipped = report.skipped_missing,
            "published review snapshot"
        );
        Ok(report)
    }

    /// Whether `issues` differ from the last published snapshot.
    pub fn has_unsynced_changes(&self, issues: &[Issue]) -> bool {
        match self.published_fingerprint() {
            Some(published) => published != fingerprint(issues),
            None => !issues.is_empty(),
        }
    }

    fn published_fingerprint(&self) -> Option<String> {
        let data = fs::read_to_string(self.snapshot_file()).ok()?;
        let issues: Vec<Issue> = serde_json::from_str(&data).ok()?;
        Some(fingerprint(&issues))
    }

    /// Remove `.code-river` entries from the project `.gitignore`.
    fn unignore_project_dir(&self) -> Result<()> {
        let gitignore = self.workspace.join(".gitignore");
        let Ok(content) = fs::read_to_string(&gitignore) else {
            return Ok(());
        };
        if !content.contains(PROJECT_DIR) {
            return Ok(());
        }
        let kept: Vec<&str> = content
            .lines()
            .filter(|line| !line.trim().starts_with(PROJECT_DIR))
            .collect();
        let mut updated = kept.join("\n");
        if content.ends_with('\n') {
            updated.push('\n');
        }
        fs::write(&gitignore, updated).map_err(|source| SyncError::Io {
            path: gitignore.clone(),
            source,
        })?;
        debug!("removed {} from .gitignore", PROJECT_DIR);
        Ok(())
    }
}

/// SHA-256 over the canonical JSON encoding of `issues`.
pub fn fingerprint(issues: &[Issue]) -> String {
    let mut hasher = Sha256::new();
    let json = serde_json::to_vec(issues).unwrap_or_default();
    hasher.update(&json);
    format!("{:x}", hasher.finalize())
}

/// Group issues under `workspace` by their path relative to it.
fn group_by_relative_path<'a>(
    workspace: &Path,
    issues: &[&'a Issue],
) -> BTreeMap<String, Vec<&'a Issue>> {
    let mut grouped: BTreeMap<String, Vec<&Issue>> = BTreeMap::new();
    for issue in issues {
        let Ok(relative) = issue.file_path.strip_prefix(workspace) else {
            continue;
        };
        grouped
            .entry(relative.to_string_lossy().into_owned())
            .or_default()
            .push(issue);
    }
    grouped
}

fn issues_owned(issues: &[&Issue]) -> Vec<Issue> {
    issues.iter().map(|issue| (*issue).clone()).collect()
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).map_err(|source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    })
}
