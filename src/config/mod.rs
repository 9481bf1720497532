use crate::IssueStatus;
use crate::roles::RoleConfig;
use figment::Figment;
use figment::providers::{Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const APP_DIR: &str = "code-river";
pub const PROJECT_DIR: &str = ".code-river";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode settings: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("no per-user configuration directory available")]
    NoConfigDir,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// How review state is pushed out on sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMethod {
    /// Project snapshot only.
    #[default]
    Comments,
    /// Remote issue tracker only.
    Issues,
    Both,
}

impl SyncMethod {
    pub fn uses_tracker(self) -> bool {
        matches!(self, SyncMethod::Issues | SyncMethod::Both)
    }
}

/// Which status changes are permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusPolicy {
    /// Any status may follow any other.
    #[default]
    Unrestricted,
    /// An approved issue can no longer change status.
    ApprovedFinal,
}

impl StatusPolicy {
    pub fn allows(self, from: IssueStatus, to: IssueStatus) -> bool {
        match self {
            StatusPolicy::Unrestricted => true,
            StatusPolicy::ApprovedFinal => from != IssueStatus::Approved || to == from,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitIntegration {
    #[serde(default)]
    pub sync_method: SyncMethod,
}

/// All user-facing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Identity used for authorship and permission checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default)]
    pub admin_users: Vec<String>,
    #[serde(default)]
    pub reviewers: Vec<String>,
    /// Hide issues whose file lies outside the open project.
    #[serde(default = "default_true")]
    pub show_only_workspace_issues: bool,
    /// Template used by `show --template`.
    #[serde(default = "default_issue_template")]
    pub issue_template: String,
    /// Override for the issue store location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    #[serde(default)]
    pub status_policy: StatusPolicy,
    #[serde(default = "default_git_timeout_secs")]
    pub git_timeout_secs: u64,
    #[serde(default = "default_author_cache_capacity")]
    pub author_cache_capacity: usize,
    #[serde(default)]
    pub git_integration: GitIntegration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_name: None,
            admin_users: Vec::new(),
            reviewers: Vec::new(),
            show_only_workspace_issues: true,
            issue_template: default_issue_template(),
            store_path: None,
            status_policy: StatusPolicy::default(),
            git_timeout_secs: default_git_timeout_secs(),
            author_cache_capacity: default_author_cache_capacity(),
            git_integration: GitIntegration::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_issue_template() -> String {
    "Issue: {description}\nLocation: {file}:{line}\nStatus: {status}".to_string()
}

fn default_git_timeout_secs() -> u64 {
    30
}

fn default_author_cache_capacity() -> usize {
    256
}

impl Settings {
    /// Configured user name, treating blank as unset.
    pub fn user(&self) -> Option<&str> {
        self.user_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn role_config(&self) -> RoleConfig {
        RoleConfig {
            admins: self.admin_users.clone(),
            reviewers: self.reviewers.clone(),
        }
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs.max(1))
    }
}

/// Locations of the settings layers.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub user_file: PathBuf,
    pub project_file: Option<PathBuf>,
}

impl ConfigPaths {
    /// Standard locations: the platform config dir and the project directory.
    pub fn discover(user_file: Option<PathBuf>, workspace: Option<&Path>) -> Result<Self> {
        let user_file = match user_file {
            Some(path) => path,
            None => dirs::config_dir()
                .ok_or(ConfigError::NoConfigDir)?
                .join(APP_DIR)
                .join("config.toml"),
        };
        Ok(Self {
            user_file,
            project_file: workspace.map(|root| root.join(PROJECT_DIR).join("config.toml")),
        })
    }

    /// Load the merged settings from every layer.
    pub fn load(&self) -> Result<Settings> {
        let mut figment =
            Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file(&self.user_file));
        if let Some(project) = &self.project_file {
            figment = figment.merge(Toml::file(project));
        }
        figment.extract().map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Load only the per-user layer, for read-modify-write updates.
    pub fn load_user(&self) -> Result<Settings> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(&self.user_file))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    pub fn save_user(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.user_file.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(settings)?;
        fs::write(&self.user_file, content).map_err(|source| ConfigError::Write {
            path: self.user_file.clone(),
            source,
        })
    }

    /// Apply `edit` to the per-user file. Returns what `edit` returned.
    pub fn update_user<F>(&self, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut Settings) -> bool,
    {
        let mut settings = self.load_user()?;
        let changed = edit(&mut settings);
        if changed {
            self.save_user(&settings)?;
        }
        Ok(changed)
    }

    pub fn set_user_name(&self, name: &str) -> Result<()> {
        self.update_user(|s| {
            s.user_name = Some(name.to_string());
            true
        })?;
        info!(user = name, "user name saved");
        Ok(())
    }

    pub fn add_admin(&self, name: &str) -> Result<bool> {
        self.update_user(|s| push_unique(&mut s.admin_users, name))
    }

    pub fn add_reviewer(&self, name: &str) -> Result<bool> {
        self.update_user(|s| push_unique(&mut s.reviewers, name))
    }

    /// Make the configured user an admin when no admin exists yet.
    ///
    /// Returns true when the user file was changed.
    pub fn bootstrap_admin(&self, settings: &mut Settings) -> Result<bool> {
        if !settings.admin_users.is_empty() {
            return Ok(false);
        }
        let Some(user) = settings.user().map(str::to_string) else {
            return Ok(false);
        };
        settings.admin_users.push(user.clone());
        self.add_admin(&user)?;
        info!(user, "no admin configured, current user promoted");
        Ok(true)
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() || list.iter().any(|existing| existing == name) {
        return false;
    }
    list.push(name.to_string());
    true
}
