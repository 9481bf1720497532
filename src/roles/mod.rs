use crate::git::SourceControl;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Derived authorization level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Reviewer,
    Author,
    Regular,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Reviewer => "reviewer",
            Role::Author => "author",
            Role::Regular => "regular",
        }
    }

    /// Fixed action set allowed to this role.
    pub fn permissions(self) -> Permission {
        permissions_of(self)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions a role may perform on issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permission {
    pub can_delete: bool,
    pub can_resolve: bool,
    pub can_approve: bool,
    pub can_create: bool,
    pub can_reply: bool,
}

/// A permission-gated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Delete,
    Resolve,
    Approve,
    Create,
    Reply,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Delete => "delete",
            Action::Resolve => "resolve",
            Action::Approve => "approve",
            Action::Create => "create",
            Action::Reply => "reply to",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Permission {
    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Delete => self.can_delete,
            Action::Resolve => self.can_resolve,
            Action::Approve => self.can_approve,
            Action::Create => self.can_create,
            Action::Reply => self.can_reply,
        }
    }
}

/// Static role to permission lookup.
pub const fn permissions_of(role: Role) -> Permission {
    match role {
        Role::Admin => Permission {
            can_delete: true,
            can_resolve: true,
            can_approve: true,
            can_create: true,
            can_reply: true,
        },
        Role::Reviewer => Permission {
            can_delete: false,
            can_resolve: false,
            can_approve: true,
            can_create: true,
            can_reply: true,
        },
        Role::Author => Permission {
            can_delete: false,
            can_resolve: true,
            can_approve: false,
            can_create: true,
            can_reply: true,
        },
        Role::Regular => Permission {
            can_delete: false,
            can_resolve: false,
            can_approve: false,
            can_create: true,
            can_reply: true,
        },
    }
}

/// Admin and reviewer lists seeding the resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleConfig {
    pub admins: Vec<String>,
    pub reviewers: Vec<String>,
}

/// Bounded per-file cache of commit authors.
///
/// When full, the oldest inserted entry is evicted.
#[derive(Debug)]
pub struct AuthorCache {
    capacity: usize,
    entries: HashMap<PathBuf, Vec<String>>,
    order: VecDeque<PathBuf>,
}

impl AuthorCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, path: &Path) -> Option<&[String]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    pub fn insert(&mut self, path: PathBuf, authors: Vec<String>) {
        if self.entries.contains_key(&path) {
            self.entries.insert(path, authors);
            return;
        }
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        self.order.push_back(path.clone());
        self.entries.insert(path, authors);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Resolves a user's role, optionally in the context of a file.
pub struct RoleResolver {
    config: RoleConfig,
    source: Arc<dyn SourceControl>,
    cache: AuthorCache,
}

impl RoleResolver {
    pub fn new(config: RoleConfig, source: Arc<dyn SourceControl>, cache_capacity: usize) -> Self {
        Self {
            config,
            source,
            cache: AuthorCache::with_capacity(cache_capacity),
        }
    }

    /// Swap in a fresh configuration and forget cached authorship.
    pub fn reload(&mut self, config: RoleConfig) {
        self.config = config;
        self.cache.clear();
    }

    /// Role of `user`, with admin over reviewer over author over regular.
    pub fn role_of(&mut self, user: &str, file: Option<&Path>) -> Role {
        if user.is_empty() {
            return Role::Regular;
        }
        if self.config.admins.iter().any(|a| a == user) {
            return Role::Admin;
        }
        if self.config.reviewers.iter().any(|r| r == user) {
            return Role::Reviewer;
        }
        if let Some(file) = file
            && self.is_file_author(user, file)
        {
            return Role::Author;
        }
        Role::Regular
    }

    pub fn permissions_of(&mut self, user: &str, file: Option<&Path>) -> Permission {
        self.role_of(user, file).permissions()
    }

    fn is_file_author(&mut self, user: &str, file: &Path) -> bool {
        if self.cache.get(file).is_none() {
            let authors = self.source.authors_of_file(file);
            debug!(path = %file.display(), count = authors.len(), "cached file authors");
            self.cache.insert(file.to_path_buf(), authors);
        }
        self.cache
            .get(file)
            .is_some_and(|authors| authors.iter().any(|a| a == user))
    }
}
