use assert_cmd::Command;
use code_river::Issue;
use code_river::config::{ConfigPaths, Settings};
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

struct Env {
    dir: tempfile::TempDir,
}

impl Env {
    /// A workspace with one source file and a user file naming `user`.
    fn new(user: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ws/src")).unwrap();
        fs::write(
            dir.path().join("ws/src/lib.rs"),
            "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n",
        )
        .unwrap();
        if let Some(user) = user {
            fs::write(dir.path().join("config.toml"), format!("userName = \"{user}\"\n")).unwrap();
        }
        Self { dir }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// The binary run from `cwd`, without a workspace argument.
    fn cmd_in(&self, cwd: &str) -> Command {
        let mut cmd = Command::cargo_bin("code-river").unwrap();
        cmd.current_dir(self.path(cwd))
            .env("CODE_RIVER_CONFIG", self.path("config.toml"))
            .env("CODE_RIVER_STORE", self.path("issues.json"))
            .env_remove("RUST_LOG");
        cmd
    }

    fn cmd(&self) -> Command {
        let mut cmd = self.cmd_in("ws");
        cmd.arg("--workspace").arg(self.path("ws"));
        cmd
    }

    fn settings(&self) -> (ConfigPaths, Settings) {
        let paths = ConfigPaths {
            user_file: self.path("config.toml"),
            project_file: None,
        };
        let settings = paths.load_user().unwrap();
        (paths, settings)
    }

    fn issues(&self) -> Vec<Issue> {
        let path = self.path("issues.json");
        if !Path::new(&path).exists() {
            return Vec::new();
        }
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }
}

#[test]
fn add_then_view_and_show() {
    let env = Env::new(Some("ann"));

    env.cmd()
        .args(["add", "src/lib.rs", "2", "overflow is not handled"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created issue"));

    let issues = env.issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].line_number, 1);
    assert_eq!(
        issues[0].file_path,
        env.path("ws/src/lib.rs").canonicalize().unwrap()
    );

    env.cmd()
        .args(["view", "created"])
        .assert()
        .success()
        .stdout(predicate::str::contains("overflow is not handled"))
        .stdout(predicate::str::contains("unsynced changes"));

    env.cmd()
        .args(["show", &issues[0].id, "--template"])
        .assert()
        .success()
        .stdout(predicate::str::contains("    // Issue: overflow is not handled"))
        .stdout(predicate::str::contains("// Location: lib.rs:2"));
}

#[test]
fn first_user_becomes_admin_and_can_delete() {
    let env = Env::new(Some("ann"));
    env.cmd()
        .args(["add", "src/lib.rs", "1", "rename"])
        .assert()
        .success();

    assert_eq!(env.settings().1.admin_users, vec!["ann"]);

    env.cmd()
        .args(["role"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ann (admin)"));

    let id = env.issues()[0].id.clone();
    env.cmd().args(["delete", &id]).assert().success();
    assert!(env.issues().is_empty());
}

#[test]
fn unknown_user_cannot_add() {
    let env = Env::new(None);
    env.cmd()
        .args(["--yes", "add", "src/lib.rs", "1", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("user name is not set"));
    assert!(env.issues().is_empty());
}

#[test]
fn typed_user_name_is_saved() {
    let env = Env::new(None);
    env.cmd()
        .args(["add", "src/lib.rs", "1", "typed"])
        .write_stdin("bob\n")
        .assert()
        .success();

    assert_eq!(env.issues()[0].author.as_deref(), Some("bob"));
    assert_eq!(env.settings().1.user(), Some("bob"));
}

#[test]
fn reviewer_approves_but_cannot_delete() {
    let env = Env::new(Some("ann"));
    env.cmd()
        .args(["add", "src/lib.rs", "3", "closing brace"])
        .assert()
        .success();
    let id = env.issues()[0].id.clone();

    // ann is admin now; hand the keyboard to rita.
    env.cmd().args(["set-reviewer", "rita"]).assert().success();
    let (paths, mut settings) = env.settings();
    settings.user_name = Some("rita".into());
    paths.save_user(&settings).unwrap();

    env.cmd()
        .args(["delete", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("a reviewer cannot delete issues"));

    env.cmd().args(["approve", &id]).assert().success();
    assert_eq!(env.issues()[0].status, code_river::IssueStatus::Approved);

    env.cmd()
        .args(["view", "review"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[Approved] closing brace"));
}

#[test]
fn reply_and_expanded_view() {
    let env = Env::new(Some("ann"));
    env.cmd()
        .args(["add", "src/lib.rs", "1", "needs docs"])
        .assert()
        .success();
    let id = env.issues()[0].id.clone();

    env.cmd()
        .args(["reply", &id, "will do"])
        .assert()
        .success();

    env.cmd()
        .args(["list", "mine", "--expand"])
        .assert()
        .success()
        .stdout(predicate::str::contains("will do"));
}

#[test]
fn sync_publishes_into_workspace() {
    let env = Env::new(Some("ann"));
    env.cmd()
        .args(["add", "src/lib.rs", "1", "publish me"])
        .assert()
        .success();

    env.cmd()
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("issues.json"));

    assert!(env.path("ws/.code-river/issues.json").is_file());
    assert!(env.path("ws/.code-river/comments-ws.json").is_file());

    env.cmd()
        .args(["view", "mine"])
        .assert()
        .success()
        .stdout(predicate::str::contains("unsynced").not());
}

#[test]
fn open_prints_clamped_location() {
    let env = Env::new(Some("ann"));
    env.cmd()
        .args(["add", "src/lib.rs", "40", "past the end"])
        .assert()
        .success();
    let id = env.issues()[0].id.clone();

    env.cmd()
        .args(["open", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains(">3 │ }"));

    fs::remove_file(env.path("ws/src/lib.rs")).unwrap();
    env.cmd()
        .args(["open", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn missing_issue_and_bad_line_fail() {
    let env = Env::new(Some("ann"));
    env.cmd()
        .args(["resolve", "404"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("issue not found: 404"));

    env.cmd()
        .args(["add", "src/lib.rs", "0", "zero"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Line numbers start at 1"));
}

#[test]
fn relative_workspace_with_parent_dir() {
    let env = Env::new(Some("ann"));
    env.cmd_in("ws/src")
        .args(["--workspace", "..", "add", "./lib.rs", "1", "relative paths"])
        .assert()
        .success();
    assert_eq!(
        env.issues()[0].file_path,
        env.path("ws/src/lib.rs").canonicalize().unwrap()
    );

    env.cmd_in("ws/src")
        .args(["--workspace", "..", "view", "created"])
        .assert()
        .success()
        .stdout(predicate::str::contains("relative paths"));

    env.cmd_in("ws/src")
        .args(["--workspace", "..", "sync"])
        .assert()
        .success();
    let comments: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(env.path("ws/.code-river/comments-ws.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(comments["src/lib.rs"][0]["description"], "relative paths");
}
