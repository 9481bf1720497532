use code_river::config::SyncMethod;
use code_river::git::{Contributor, SourceControl};
use code_river::sync::{IssueTracker, SyncWriter, fingerprint};
use code_river::{Issue, IssueStatus};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

/// Records staged paths; staging succeeds only when `accept` is set.
#[derive(Default)]
struct Staging {
    accept: bool,
    staged: RefCell<Vec<PathBuf>>,
}

impl SourceControl for Staging {
    fn current_user_name(&self) -> Option<String> {
        None
    }
    fn current_user_email(&self) -> Option<String> {
        None
    }
    fn all_contributors(&self) -> Vec<Contributor> {
        Vec::new()
    }
    fn authors_of_file(&self, _path: &Path) -> Vec<String> {
        Vec::new()
    }
    fn stage(&self, path: &Path) -> bool {
        self.staged.borrow_mut().push(path.to_path_buf());
        self.accept
    }
}

struct CountingTracker {
    calls: Rc<RefCell<Vec<usize>>>,
}

impl IssueTracker for CountingTracker {
    fn publish(&self, issues: &[Issue]) -> code_river::sync::Result<()> {
        self.calls.borrow_mut().push(issues.len());
        Ok(())
    }
}

fn workspace() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("project");
    fs::create_dir_all(ws.join("src")).unwrap();
    (dir, ws)
}

fn issue_on(id: &str, path: &Path) -> Issue {
    Issue::new(id.into(), path, 0, format!("issue {id}"), Some("ann".into()))
}

#[test]
fn publish_writes_snapshot_grouped_comments_and_readme() {
    let (_dir, ws) = workspace();
    let a = ws.join("src/a.rs");
    let b = ws.join("b.rs");
    fs::write(&a, "a").unwrap();
    fs::write(&b, "b").unwrap();
    let issues = vec![issue_on("1", &a), issue_on("2", &b), issue_on("3", &a)];

    let git = Arc::new(Staging {
        accept: true,
        ..Staging::default()
    });
    let writer = SyncWriter::new(&ws, SyncMethod::Comments, git.clone());
    let report = writer.publish_report(&issues).unwrap();

    assert!(report.published);
    assert!(report.staged);
    assert!(report.notices.is_empty());
    assert_eq!(report.skipped_missing, 0);
    assert_eq!(git.staged.borrow().len(), 3);

    let comments: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(writer.comments_file()).unwrap()).unwrap();
    assert_eq!(writer.comments_file(), ws.join(".code-river/comments-project.json"));
    assert_eq!(comments["src/a.rs"].as_array().unwrap().len(), 2);
    assert_eq!(comments["b.rs"][0]["id"], "2");

    let snapshot: Vec<Issue> =
        serde_json::from_str(&fs::read_to_string(writer.snapshot_file()).unwrap()).unwrap();
    assert_eq!(snapshot, issues);
    assert!(ws.join(".code-river/README.md").is_file());
}

#[test]
fn publish_skips_issues_whose_files_are_gone() {
    let (_dir, ws) = workspace();
    let present = ws.join("src/a.rs");
    fs::write(&present, "a").unwrap();
    let issues = vec![issue_on("1", &present), issue_on("2", &ws.join("gone.rs"))];

    let writer = SyncWriter::new(&ws, SyncMethod::Comments, Arc::new(Staging::default()));
    let report = writer.publish_report(&issues).unwrap();

    assert!(report.published);
    assert_eq!(report.skipped_missing, 1);
    let comments: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(writer.comments_file()).unwrap()).unwrap();
    assert!(comments.get("gone.rs").is_none());
}

#[test]
fn publish_with_no_existing_files_does_nothing() {
    let (_dir, ws) = workspace();
    let issues = vec![issue_on("1", &ws.join("gone.rs"))];

    let writer = SyncWriter::new(&ws, SyncMethod::Comments, Arc::new(Staging::default()));
    assert!(!writer.publish(&issues));
    assert!(!writer.publish(&[]));
    assert!(!ws.join(".code-river").exists());
}

#[test]
fn staging_failure_is_only_a_notice() {
    let (_dir, ws) = workspace();
    let a = ws.join("a.rs");
    fs::write(&a, "a").unwrap();

    let git = Arc::new(Staging::default());
    let writer = SyncWriter::new(&ws, SyncMethod::Comments, git.clone());
    let report = writer.publish_report(&[issue_on("1", &a)]).unwrap();
    assert!(report.published);
    assert!(!report.staged);
    assert_eq!(report.notices.len(), 1);

    // A failed stage does not stop the remaining files from being staged.
    let staged = git.staged.borrow();
    assert_eq!(
        *staged,
        vec![
            writer.comments_file(),
            writer.snapshot_file(),
            ws.join(".code-river/README.md"),
        ]
    );
}

#[test]
fn existing_readme_is_kept_and_gitignore_entries_removed() {
    let (_dir, ws) = workspace();
    let a = ws.join("a.rs");
    fs::write(&a, "a").unwrap();
    fs::create_dir_all(ws.join(".code-river")).unwrap();
    fs::write(ws.join(".code-river/README.md"), "custom").unwrap();
    fs::write(ws.join(".gitignore"), "target/\n.code-river/\n*.log\n").unwrap();

    let writer = SyncWriter::new(&ws, SyncMethod::Comments, Arc::new(Staging::default()));
    assert!(writer.publish(&[issue_on("1", &a)]));

    assert_eq!(fs::read_to_string(ws.join(".code-river/README.md")).unwrap(), "custom");
    assert_eq!(fs::read_to_string(ws.join(".gitignore")).unwrap(), "target/\n*.log\n");
}

#[test]
fn tracker_methods_report_unsupported_without_failing() {
    let (_dir, ws) = workspace();
    let a = ws.join("a.rs");
    fs::write(&a, "a").unwrap();

    let git = Arc::new(Staging {
        accept: true,
        ..Staging::default()
    });
    let writer = SyncWriter::new(&ws, SyncMethod::Both, git);
    let report = writer.publish_report(&[issue_on("1", &a)]).unwrap();
    assert!(report.published);
    assert_eq!(report.notices, vec!["issue tracker sync is not supported yet"]);
}

#[test]
fn custom_tracker_receives_published_issues() {
    let (_dir, ws) = workspace();
    let a = ws.join("a.rs");
    fs::write(&a, "a").unwrap();
    let calls = Rc::new(RefCell::new(Vec::new()));

    let comments_only = SyncWriter::new(&ws, SyncMethod::Comments, Arc::new(Staging::default()))
        .with_tracker(Box::new(CountingTracker {
            calls: calls.clone(),
        }));
    comments_only.publish(&[issue_on("1", &a)]);
    assert!(calls.borrow().is_empty());

    let issues_too = SyncWriter::new(&ws, SyncMethod::Issues, Arc::new(Staging::default()))
        .with_tracker(Box::new(CountingTracker {
            calls: calls.clone(),
        }));
    issues_too.publish(&[issue_on("1", &a), issue_on("2", &ws.join("gone.rs"))]);
    assert_eq!(*calls.borrow(), vec![1]);
}

#[test]
fn unsynced_changes_track_the_published_snapshot() {
    let (_dir, ws) = workspace();
    let a = ws.join("a.rs");
    fs::write(&a, "a").unwrap();
    let mut issues = vec![issue_on("1", &a)];

    let writer = SyncWriter::new(&ws, SyncMethod::Comments, Arc::new(Staging::default()));
    assert!(!writer.has_unsynced_changes(&[]));
    assert!(writer.has_unsynced_changes(&issues));

    assert!(writer.publish(&issues));
    assert!(!writer.has_unsynced_changes(&issues));

    let published = fingerprint(&issues);
    issues[0].status = IssueStatus::Fixed;
    assert_ne!(fingerprint(&issues), published);
    assert!(writer.has_unsynced_changes(&issues));
}
