pub mod cli;
pub mod commands;
pub mod config;
pub mod git;
pub mod highlight;
pub mod roles;
pub mod store;
pub mod sync;
pub mod tui;
pub mod views;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Review status of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    Open,
    Fixed,
    Wontfix,
    Approved,
}

impl IssueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::Fixed => "fixed",
            IssueStatus::Wontfix => "wontfix",
            IssueStatus::Approved => "approved",
        }
    }

    /// Human-readable label for views.
    pub fn label(self) -> &'static str {
        match self {
            IssueStatus::Open => "Open",
            IssueStatus::Fixed => "Fixed",
            IssueStatus::Wontfix => "Won't fix",
            IssueStatus::Approved => "Approved",
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(IssueStatus::Open),
            "fixed" => Ok(IssueStatus::Fixed),
            "wontfix" | "wont-fix" => Ok(IssueStatus::Wontfix),
            "approved" => Ok(IssueStatus::Approved),
            other => Err(format!("unknown issue status: {other}")),
        }
    }
}

/// A threaded comment on an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: String,
    pub content: String,
    pub author: String,
    pub created_at: i64,
}

/// A review comment anchored to a file and line.
///
/// Timestamps are milliseconds since the Unix epoch. `line_number` is
/// zero-based, matching the cursor line the issue was created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    pub file_path: PathBuf,
    pub line_number: u32,
    pub description: String,
    pub status: IssueStatus,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub replies: Vec<Reply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl Issue {
    /// Create a new open issue stamped with the current time.
    pub fn new(
        id: String,
        file_path: impl Into<PathBuf>,
        line_number: u32,
        description: impl Into<String>,
        author: Option<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            id,
            file_path: file_path.into(),
            line_number,
            description: description.into(),
            status: IssueStatus::Open,
            created_at: now,
            updated_at: now,
            replies: Vec::new(),
            author,
        }
    }

    /// Bump `updated_at` so that it is strictly greater than before.
    pub fn touch(&mut self) {
        self.updated_at = now_millis().max(self.updated_at + 1);
    }

    pub fn is_authored_by(&self, user: &str) -> bool {
        !user.is_empty() && self.author.as_deref() == Some(user)
    }

    pub fn is_under(&self, root: &Path) -> bool {
        self.file_path.starts_with(root)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a time-based id that does not collide with any of `taken`.
pub fn next_id<'a>(taken: impl IntoIterator<Item = &'a str>) -> String {
    let taken: std::collections::HashSet<&str> = taken.into_iter().collect();
    let mut candidate = now_millis();
    while taken.contains(candidate.to_string().as_str()) {
        candidate += 1;
    }
    candidate.to_string()
}

/// Format a millisecond timestamp in local time for display.
pub fn format_millis(millis: i64) -> String {
    use chrono::{Local, TimeZone};
    match Local.timestamp_millis_opt(millis) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        _ => millis.to_string(),
    }
}
