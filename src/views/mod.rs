use crate::roles::{Role, RoleResolver};
use crate::{Issue, Reply, format_millis};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

/// Which projection of the issue list to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    /// Issues on files I authored, or issues I created.
    Mine,
    /// Everything, for admins and reviewers.
    Review,
    CreatedByMe,
}

impl ViewKind {
    pub const ALL: [ViewKind; 3] = [ViewKind::Mine, ViewKind::Review, ViewKind::CreatedByMe];

    pub fn title(self) -> &'static str {
        match self {
            ViewKind::Mine => "My Issues",
            ViewKind::Review => "Pending Review",
            ViewKind::CreatedByMe => "Created by Me",
        }
    }

    pub fn next(self) -> Self {
        match self {
            ViewKind::Mine => ViewKind::Review,
            ViewKind::Review => ViewKind::CreatedByMe,
            ViewKind::CreatedByMe => ViewKind::Mine,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            ViewKind::Mine => ViewKind::CreatedByMe,
            ViewKind::Review => ViewKind::Mine,
            ViewKind::CreatedByMe => ViewKind::Review,
        }
    }

    fn index(self) -> usize {
        match self {
            ViewKind::Mine => 0,
            ViewKind::Review => 1,
            ViewKind::CreatedByMe => 2,
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Who is looking, and which part of the filesystem is in scope.
#[derive(Debug, Clone, Default)]
pub struct ViewScope {
    pub user: String,
    /// When set, issues on files outside this root are hidden.
    pub workspace: Option<PathBuf>,
}

impl ViewScope {
    fn contains(&self, issue: &Issue) -> bool {
        self.workspace
            .as_deref()
            .is_none_or(|root| issue.is_under(root))
    }
}

/// One filtered projection with its unsynced-changes flag.
#[derive(Debug, Clone)]
pub struct ViewProvider {
    kind: ViewKind,
    has_changes: bool,
}

impl ViewProvider {
    pub fn new(kind: ViewKind) -> Self {
        Self {
            kind,
            has_changes: false,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.has_changes
    }

    pub fn set_has_changes(&mut self, value: bool) {
        self.has_changes = value;
    }

    /// Filter `issues` down to what this view shows for `scope`.
    pub fn issues(&self, issues: &[Issue], resolver: &mut RoleResolver, scope: &ViewScope) -> Vec<Issue> {
        let user = scope.user.as_str();
        let in_scope = issues.iter().filter(|issue| scope.contains(issue));

        match self.kind {
            ViewKind::Mine => {
                if user.is_empty() {
                    return Vec::new();
                }
                in_scope
                    .filter(|issue| {
                        issue.is_authored_by(user)
                            || resolver.role_of(user, Some(&issue.file_path)) == Role::Author
                    })
                    .cloned()
                    .collect()
            }
            ViewKind::Review => match resolver.role_of(user, None) {
                Role::Admin | Role::Reviewer => in_scope.cloned().collect(),
                Role::Author | Role::Regular => Vec::new(),
            },
            ViewKind::CreatedByMe => in_scope
                .filter(|issue| issue.is_authored_by(user))
                .cloned()
                .collect(),
        }
    }
}

/// The three providers, kept together so mutations can flag all of them.
#[derive(Debug, Clone)]
pub struct ViewSet {
    providers: [ViewProvider; 3],
}

impl Default for ViewSet {
    fn default() -> Self {
        Self {
            providers: ViewKind::ALL.map(ViewProvider::new),
        }
    }
}

impl ViewSet {
    pub fn get(&self, kind: ViewKind) -> &ViewProvider {
        &self.providers[kind.index()]
    }

    pub fn mark_all_changed(&mut self) {
        for provider in &mut self.providers {
            provider.set_has_changes(true);
        }
    }

    pub fn clear_changes(&mut self) {
        for provider in &mut self.providers {
            provider.set_has_changes(false);
        }
    }

    pub fn any_changes(&self) -> bool {
        self.providers.iter().any(ViewProvider::has_changes)
    }
}

/// A row in an issue tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeNode<'a> {
    Issue { issue: &'a Issue, expanded: bool },
    Reply { reply: &'a Reply, parent: &'a Issue },
}

impl<'a> TreeNode<'a> {
    /// The issue this row belongs to.
    pub fn issue(&self) -> &'a Issue {
        match self {
            TreeNode::Issue { issue, .. } => issue,
            TreeNode::Reply { parent, .. } => parent,
        }
    }
}

/// Flatten issues into tree rows. Replies follow their issue when it is expanded.
pub fn flatten<'a>(issues: &'a [Issue], expanded: &HashSet<String>) -> Vec<TreeNode<'a>> {
    let mut nodes = Vec::new();
    for issue in issues {
        let is_expanded = expanded.contains(&issue.id);
        nodes.push(TreeNode::Issue {
            issue,
            expanded: is_expanded,
        });
        if is_expanded {
            nodes.extend(issue.replies.iter().map(|reply| TreeNode::Reply {
                reply,
                parent: issue,
            }));
        }
    }
    nodes
}

/// Display text for a tree row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLabel {
    pub depth: usize,
    /// Fold marker for issues with replies, empty otherwise.
    pub marker: &'static str,
    pub title: String,
    pub detail: String,
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indent = "    ".repeat(self.depth);
        let marker = if self.marker.is_empty() { " " } else { self.marker };
        write!(f, "{indent}{marker} {}  ({})", self.title, self.detail)
    }
}

pub fn node_label(node: &TreeNode<'_>) -> NodeLabel {
    match node {
        TreeNode::Issue { issue, expanded } => NodeLabel {
            depth: 0,
            marker: match (issue.replies.is_empty(), expanded) {
                (true, _) => "",
                (false, true) => "▾",
                (false, false) => "▸",
            },
            title: format!("[{}] {}", issue.status.label(), issue.description),
            detail: format!("{}:{}", issue.file_path.display(), issue.line_number + 1),
        },
        TreeNode::Reply { reply, .. } => NodeLabel {
            depth: 1,
            marker: "",
            title: reply.content.clone(),
            detail: format!("{} - {}", reply.author, format_millis(reply.created_at)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IssueStatus;
    use crate::git::{Contributor, SourceControl};
    use crate::roles::RoleConfig;
    use std::path::Path;
    use std::sync::Arc;

    /// Reports `author` as the git author of every file under `/repo/mine`.
    struct Authorship {
        author: String,
    }

    impl SourceControl for Authorship {
        fn current_user_name(&self) -> Option<String> {
            None
        }
        fn current_user_email(&self) -> Option<String> {
            None
        }
        fn all_contributors(&self) -> Vec<Contributor> {
            Vec::new()
        }
        fn authors_of_file(&self, path: &Path) -> Vec<String> {
            if path.starts_with("/repo/mine") {
                vec![self.author.clone()]
            } else {
                Vec::new()
            }
        }
        fn stage(&self, _path: &Path) -> bool {
            false
        }
    }

    fn resolver(admins: &[&str], reviewers: &[&str]) -> RoleResolver {
        RoleResolver::new(
            RoleConfig {
                admins: admins.iter().map(|s| s.to_string()).collect(),
                reviewers: reviewers.iter().map(|s| s.to_string()).collect(),
            },
            Arc::new(Authorship {
                author: "ann".into(),
            }),
            16,
        )
    }

    fn issue(id: &str, path: &str, author: Option<&str>) -> Issue {
        Issue {
            id: id.into(),
            file_path: path.into(),
            line_number: 2,
            description: format!("issue {id}"),
            status: IssueStatus::Open,
            created_at: 1,
            updated_at: 1,
            replies: vec![],
            author: author.map(str::to_string),
        }
    }

    fn fixtures() -> Vec<Issue> {
        vec![
            issue("1", "/repo/mine/a.rs", Some("bob")),
            issue("2", "/repo/other/b.rs", Some("ann")),
            issue("3", "/repo/other/c.rs", Some("bob")),
        ]
    }

    fn ids(issues: &[Issue]) -> Vec<&str> {
        issues.iter().map(|i| i.id.as_str()).collect()
    }

    fn scope(user: &str) -> ViewScope {
        ViewScope {
            user: user.into(),
            workspace: None,
        }
    }

    #[test]
    fn mine_includes_git_authored_and_created() {
        let mut r = resolver(&[], &[]);
        let view = ViewProvider::new(ViewKind::Mine);
        let issues = fixtures();
        assert_eq!(ids(&view.issues(&issues, &mut r, &scope("ann"))), vec!["1", "2"]);
    }

    #[test]
    fn mine_is_empty_without_user() {
        let mut r = resolver(&[], &[]);
        let view = ViewProvider::new(ViewKind::Mine);
        assert!(view.issues(&fixtures(), &mut r, &scope("")).is_empty());
    }

    #[test]
    fn review_visible_to_admin_and_reviewer_only() {
        let issues = fixtures();
        let view = ViewProvider::new(ViewKind::Review);

        let mut r = resolver(&["root"], &["rita"]);
        assert_eq!(view.issues(&issues, &mut r, &scope("root")).len(), 3);
        assert_eq!(view.issues(&issues, &mut r, &scope("rita")).len(), 3);
        // ann is a git author of /repo/mine but that does not grant review.
        assert!(view.issues(&issues, &mut r, &scope("ann")).is_empty());
        assert!(view.issues(&issues, &mut r, &scope("zed")).is_empty());
    }

    #[test]
    fn created_by_me_matches_author_field() {
        let mut r = resolver(&[], &[]);
        let view = ViewProvider::new(ViewKind::CreatedByMe);
        assert_eq!(
            ids(&view.issues(&fixtures(), &mut r, &scope("bob"))),
            vec!["1", "3"]
        );
    }

    #[test]
    fn workspace_scope_hides_outside_issues() {
        let mut r = resolver(&["root"], &[]);
        let view = ViewProvider::new(ViewKind::Review);
        let scope = ViewScope {
            user: "root".into(),
            workspace: Some(PathBuf::from("/repo/mine")),
        };
        assert_eq!(ids(&view.issues(&fixtures(), &mut r, &scope)), vec!["1"]);
    }

    #[test]
    fn view_set_flags() {
        let mut views = ViewSet::default();
        assert!(!views.any_changes());
        views.mark_all_changed();
        for kind in ViewKind::ALL {
            assert!(views.get(kind).has_changes());
        }
        views.clear_changes();
        assert!(!views.any_changes());
    }

    #[test]
    fn flatten_shows_replies_only_when_expanded() {
        let mut with_replies = issue("1", "/a.rs", None);
        with_replies.replies = vec![
            Reply {
                id: "r1".into(),
                content: "first".into(),
                author: "ann".into(),
                created_at: 5,
            },
            Reply {
                id: "r2".into(),
                content: "second".into(),
                author: "bob".into(),
                created_at: 6,
            },
        ];
        let issues = vec![with_replies, issue("2", "/b.rs", None)];

        let collapsed = flatten(&issues, &HashSet::new());
        assert_eq!(collapsed.len(), 2);

        let expanded: HashSet<String> = ["1".to_string()].into_iter().collect();
        let nodes = flatten(&issues, &expanded);
        assert_eq!(nodes.len(), 4);
        match nodes[2] {
            TreeNode::Reply { reply, parent } => {
                assert_eq!(reply.content, "second");
                assert_eq!(parent.id, "1");
            }
            other => panic!("expected reply, got {other:?}"),
        }
        assert_eq!(nodes[3].issue().id, "2");
    }

    #[test]
    fn node_label_for_issue_and_reply() {
        let mut parent = issue("1", "/a.rs", None);
        parent.replies.push(Reply {
            id: "r1".into(),
            content: "looks good".into(),
            author: "ann".into(),
            created_at: 0,
        });

        let label = node_label(&TreeNode::Issue {
            issue: &parent,
            expanded: false,
        });
        assert_eq!(label.marker, "▸");
        assert_eq!(label.title, "[Open] issue 1");
        assert_eq!(label.detail, "/a.rs:3");

        let reply_label = node_label(&TreeNode::Reply {
            reply: &parent.replies[0],
            parent: &parent,
        });
        assert_eq!(reply_label.depth, 1);
        assert_eq!(reply_label.title, "looks good");
        assert!(reply_label.detail.starts_with("ann - "));
    }
}
