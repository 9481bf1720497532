use crate::config::{ConfigError, ConfigPaths, Settings};
use crate::git::{Contributor, SourceControl};
use crate::roles::{Action, Role, RoleResolver};
use crate::store::{IssueStore, StoreError};
use crate::sync::{PublishReport, SyncError, SyncWriter};
use crate::views::{ViewKind, ViewScope, ViewSet};
use crate::{Issue, IssueStatus, Reply, next_id, now_millis};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Lines shown on each side of an issue's line in a location preview.
pub const EXCERPT_CONTEXT: usize = 3;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("a {role} cannot {action} issues")]
    PermissionDenied { action: Action, role: Role },
    #[error("issue not found: {0}")]
    IssueNotFound(String),
    #[error("user name is not set; configure userName or adopt your git identity")]
    UserUnknown,
    #[error("file does not exist: {}", .0.display())]
    FileMissing(PathBuf),
    #[error("{0} must not be empty")]
    EmptyInput(&'static str),
    #[error("status cannot change from {from} to {to}")]
    StatusNotAllowed { from: IssueStatus, to: IssueStatus },
    #[error("no project workspace; run inside a git repository or pass --workspace")]
    NoWorkspace,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub type Result<T> = std::result::Result<T, CommandError>;

/// Interaction needed when the user's name is not configured.
pub trait IdentityPrompt {
    /// Ask whether to use `git_name` as the user name.
    fn adopt_git_identity(&mut self, git_name: &str) -> bool;
    /// Ask for a user name. `None` means the user declined.
    fn ask_user_name(&mut self) -> Option<String>;
}

/// Where an issue points, with surrounding source lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueLocation {
    pub path: PathBuf,
    /// Zero-based line, clamped to the last line of the file.
    pub line: usize,
    /// Zero-based line number of `excerpt[0]`.
    pub first_line: usize,
    pub excerpt: Vec<String>,
}

impl IssueLocation {
    /// Indentation of the issue's line.
    pub fn indentation(&self) -> &str {
        self.excerpt
            .get(self.line - self.first_line)
            .map(|text| &text[..text.len() - text.trim_start().len()])
            .unwrap_or("")
    }
}

pub struct ReviewService {
    paths: ConfigPaths,
    settings: Settings,
    store: IssueStore,
    source: Arc<dyn SourceControl>,
    resolver: RoleResolver,
    sync: Option<SyncWriter>,
    workspace: Option<PathBuf>,
    views: ViewSet,
}

impl ReviewService {
    pub fn new(
        paths: ConfigPaths,
        settings: Settings,
        store: IssueStore,
        source: Arc<dyn SourceControl>,
        workspace: Option<PathBuf>,
    ) -> Self {
        let resolver = RoleResolver::new(
            settings.role_config(),
            source.clone(),
            settings.author_cache_capacity,
        );
        let sync = workspace.as_ref().map(|root| {
            SyncWriter::new(
                root.clone(),
                settings.git_integration.sync_method,
                source.clone(),
            )
        });
        let mut views = ViewSet::default();
        if let Some(writer) = &sync
            && writer.has_unsynced_changes(&store.list())
        {
            views.mark_all_changed();
        }
        Self {
            paths,
            settings,
            store,
            source,
            resolver,
            sync,
            workspace,
            views,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn views(&self) -> &ViewSet {
        &self.views
    }

    pub fn workspace(&self) -> Option<&Path> {
        self.workspace.as_deref()
    }

    /// Configured user name, if any.
    pub fn user(&self) -> Option<&str> {
        self.settings.user()
    }

    /// Resolve the user's name, prompting to set it when unknown.
    pub fn ensure_user(&mut self, prompt: &mut dyn IdentityPrompt) -> Result<String> {
        if let Some(user) = self.settings.user() {
            let user = user.to_string();
            self.bootstrap_admin()?;
            return Ok(user);
        }

        let chosen = match self.source.current_user_name() {
            Some(git_name) if prompt.adopt_git_identity(&git_name) => Some(git_name),
            _ => prompt.ask_user_name(),
        };
        let Some(name) = chosen
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
        else {
            return Err(CommandError::UserUnknown);
        };

        self.paths.set_user_name(&name)?;
        self.settings.user_name = Some(name.clone());
        self.bootstrap_admin()?;
        Ok(name)
    }

    fn bootstrap_admin(&mut self) -> Result<()> {
        if self.paths.bootstrap_admin(&mut self.settings)? {
            self.resolver.reload(self.settings.role_config());
        }
        Ok(())
    }

    fn current_user(&self) -> String {
        self.settings.user().unwrap_or_default().to_string()
    }

    /// Role of the current user, optionally for a file.
    pub fn role(&mut self, file: Option<&Path>) -> Role {
        let user = self.current_user();
        self.resolver.role_of(&user, file)
    }

    pub fn scope(&self) -> ViewScope {
        ViewScope {
            user: self.current_user(),
            workspace: self
                .workspace
                .clone()
                .filter(|_| self.settings.show_only_workspace_issues),
        }
    }

    /// Issues shown by `kind` for the current user.
    pub fn view(&mut self, kind: ViewKind) -> Vec<Issue> {
        let issues = self.store.list();
        let scope = self.scope();
        self.views
            .get(kind)
            .issues(&issues, &mut self.resolver, &scope)
    }

    pub fn issue(&self, id: &str) -> Result<Issue> {
        self.store
            .get(id)
            .ok_or_else(|| CommandError::IssueNotFound(id.to_string()))
    }

    fn check(&mut self, action: Action, file: Option<&Path>) -> Result<()> {
        let user = self.current_user();
        let role = self.resolver.role_of(&user, file);
        if role.permissions().allows(action) {
            Ok(())
        } else {
            debug!(user = %user, %role, %action, "permission denied");
            Err(CommandError::PermissionDenied { action, role })
        }
    }

    /// Create an open issue at `line` (zero-based) of `file`.
    pub fn add_issue(
        &mut self,
        file: &Path,
        line: u32,
        description: &str,
        prompt: &mut dyn IdentityPrompt,
    ) -> Result<Issue> {
        let description = description.trim();
        if description.is_empty() {
            return Err(CommandError::EmptyInput("description"));
        }
        let user = self.ensure_user(prompt)?;
        self.check(Action::Create, Some(file))?;

        let existing = self.store.list();
        let id = next_id(existing.iter().map(|issue| issue.id.as_str()));
        let issue = Issue::new(id, file, line, description, Some(user));
        self.store.save(&issue)?;
        self.views.mark_all_changed();
        Ok(issue)
    }

    pub fn reply(&mut self, id: &str, content: &str, prompt: &mut dyn IdentityPrompt) -> Result<Reply> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CommandError::EmptyInput("reply"));
        }
        let mut issue = self.issue(id)?;
        let user = self.ensure_user(prompt)?;
        self.check(Action::Reply, Some(&issue.file_path))?;

        let reply = Reply {
            id: next_id(issue.replies.iter().map(|r| r.id.as_str())),
            content: content.to_string(),
            author: user,
            created_at: now_millis(),
        };
        issue.replies.push(reply.clone());
        issue.touch();
        self.store.save(&issue)?;
        self.views.mark_all_changed();
        Ok(reply)
    }

    /// Mark an issue fixed.
    pub fn resolve(&mut self, id: &str) -> Result<Issue> {
        self.set_status(id, IssueStatus::Fixed)
    }

    pub fn approve(&mut self, id: &str) -> Result<Issue> {
        self.set_status(id, IssueStatus::Approved)
    }

    /// Change an issue's status. Approving needs approve permission, any
    /// other status needs resolve permission.
    pub fn set_status(&mut self, id: &str, status: IssueStatus) -> Result<Issue> {
        let mut issue = self.issue(id)?;
        let action = match status {
            IssueStatus::Approved => Action::Approve,
            IssueStatus::Open | IssueStatus::Fixed | IssueStatus::Wontfix => Action::Resolve,
        };
        self.check(action, Some(&issue.file_path))?;
        if !self.settings.status_policy.allows(issue.status, status) {
            return Err(CommandError::StatusNotAllowed {
                from: issue.status,
                to: status,
            });
        }

        issue.status = status;
        issue.touch();
        self.store.save(&issue)?;
        self.views.mark_all_changed();
        Ok(issue)
    }

    pub fn delete(&mut self, id: &str) -> Result<()> {
        let issue = self.issue(id)?;
        self.check(Action::Delete, Some(&issue.file_path))?;
        self.store.delete(id)?;
        self.views.mark_all_changed();
        Ok(())
    }

    /// Publish all issues into the workspace.
    pub fn sync(&mut self) -> Result<PublishReport> {
        let writer = self.sync.as_ref().ok_or(CommandError::NoWorkspace)?;
        let report = writer.publish_report(&self.store.list())?;
        if report.published {
            self.views.clear_changes();
        }
        Ok(report)
    }

    /// Reread every settings layer and reset the resolver.
    pub fn reload_settings(&mut self) -> Result<()> {
        self.settings = self.paths.load()?;
        self.resolver.reload(self.settings.role_config());
        Ok(())
    }

    /// Add `name` to the admin list. False if already present.
    pub fn set_admin(&mut self, name: &str) -> Result<bool> {
        let added = self.paths.add_admin(name)?;
        self.reload_settings()?;
        if added {
            info!(name, "admin added");
        }
        Ok(added)
    }

    pub fn set_reviewer(&mut self, name: &str) -> Result<bool> {
        let added = self.paths.add_reviewer(name)?;
        self.reload_settings()?;
        if added {
            info!(name, "reviewer added");
        }
        Ok(added)
    }

    /// Invite `name` to review the issue `issue_id`.
    pub fn invite_reviewer(&mut self, issue_id: &str, name: &str) -> Result<bool> {
        self.issue(issue_id)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(CommandError::EmptyInput("reviewer name"));
        }
        self.reload_settings()?;
        self.set_reviewer(name)
    }

    /// Candidates for an invitation.
    pub fn contributors(&self) -> Vec<Contributor> {
        self.source.all_contributors()
    }

    pub fn open_location(&self, id: &str) -> Result<IssueLocation> {
        let issue = self.issue(id)?;
        read_location(&issue.file_path, issue.line_number as usize, EXCERPT_CONTEXT)
    }

    /// The configured issue template rendered as comment lines for `id`.
    pub fn comment_for(&self, id: &str) -> Result<String> {
        let issue = self.issue(id)?;
        let location = read_location(&issue.file_path, issue.line_number as usize, 0)?;
        Ok(render_comment(
            &self.settings.issue_template,
            &issue,
            location.line,
            location.indentation(),
        ))
    }
}

/// Read the lines around `line` of `path`, clamping `line` to the file.
pub fn read_location(path: &Path, line: usize, context: usize) -> Result<IssueLocation> {
    if !path.is_file() {
        return Err(CommandError::FileMissing(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|source| CommandError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let lines: Vec<&str> = content.lines().collect();
    let line = line.min(lines.len().saturating_sub(1));
    let first_line = line.saturating_sub(context);
    let end = (line + context + 1).min(lines.len());
    Ok(IssueLocation {
        path: path.to_path_buf(),
        line,
        first_line,
        excerpt: lines
            .get(first_line..end)
            .unwrap_or_default()
            .iter()
            .map(|s| s.to_string())
            .collect(),
    })
}

/// Fill the issue template and prefix every line as a `//` comment.
///
/// `line` is zero-based and printed one-based.
pub fn render_comment(template: &str, issue: &Issue, line: usize, indentation: &str) -> String {
    let file = issue
        .file_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    template
        .replace("{description}", &issue.description)
        .replace("{file}", &file)
        .replace("{line}", &(line + 1).to_string())
        .replace("{status}", issue.status.as_str())
        .lines()
        .map(|text| format!("{indentation}// {text}"))
        .collect::<Vec<_>>()
        .join("\n")
}
