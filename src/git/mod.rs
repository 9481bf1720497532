use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Default upper bound for a single git invocation.
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum GitError {
    #[error("not in a git repository")]
    NotARepo,
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("git command timed out after {0:?}")]
    TimedOut(Duration),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitError>;

/// A person who has committed to the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contributor {
    pub name: String,
    pub email: String,
}

/// Read access to version-control metadata.
///
/// Every method fails soft: errors surface as `None`, an empty list or
/// `false`, never as a panic or an error the caller must handle.
pub trait SourceControl {
    fn current_user_name(&self) -> Option<String>;
    fn current_user_email(&self) -> Option<String>;
    fn all_contributors(&self) -> Vec<Contributor>;
    /// Distinct commit author names for a file, most recent first.
    fn authors_of_file(&self, path: &Path) -> Vec<String>;
    /// Stage a file. Returns whether staging succeeded.
    fn stage(&self, path: &Path) -> bool;
}

/// `SourceControl` backed by the `git` command-line tool.
pub struct GitCli {
    workdir: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            timeout: DEFAULT_GIT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run git in the working directory and return trimmed stdout.
    fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        let output = run_with_timeout(cmd, self.timeout)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::CommandFailed(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }

    fn is_repo(&self) -> bool {
        match self.run(&["rev-parse", "--is-inside-work-tree"]) {
            Ok(out) => out == "true",
            Err(e) => {
                debug!(workdir = %self.workdir.display(), error = %e, "not a git work tree");
                false
            }
        }
    }

    fn config_value(&self, key: &str) -> Option<String> {
        if !self.is_repo() {
            return None;
        }
        match self.run(&["config", key]) {
            Ok(value) if !value.is_empty() => Some(value),
            Ok(_) => None,
            Err(e) => {
                debug!(key, error = %e, "git config lookup failed");
                None
            }
        }
    }
}

impl SourceControl for GitCli {
    fn current_user_name(&self) -> Option<String> {
        self.config_value("user.name")
    }

    fn current_user_email(&self) -> Option<String> {
        self.config_value("user.email")
    }

    fn all_contributors(&self) -> Vec<Contributor> {
        if !self.is_repo() {
            return Vec::new();
        }
        match self.run(&["log", "--pretty=format:%an|%ae"]) {
            Ok(out) => parse_contributors(&out),
            Err(e) => {
                debug!(error = %e, "git log for contributors failed");
                Vec::new()
            }
        }
    }

    fn authors_of_file(&self, path: &Path) -> Vec<String> {
        if !path.starts_with(&self.workdir) {
            debug!(path = %path.display(), "file outside workspace, no authorship");
            return Vec::new();
        }
        if !self.is_repo() {
            return Vec::new();
        }
        let Some(path_str) = path.to_str() else {
            return Vec::new();
        };
        match self.run(&["log", "--pretty=format:%an", "--", path_str]) {
            Ok(out) => parse_authors(&out),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "git log for file failed");
                Vec::new()
            }
        }
    }

    fn stage(&self, path: &Path) -> bool {
        let Some(path_str) = path.to_str() else {
            return false;
        };
        match self.run(&["add", "--", path_str]) {
            Ok(_) => true,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "git add failed");
                false
            }
        }
    }
}

/// Find the root of the git repository containing `cwd`.
pub fn find_repo_root(cwd: &Path) -> Result<PathBuf> {
    let mut cmd = Command::new("git");
    cmd.args(["rev-parse", "--show-toplevel"]).current_dir(cwd);
    let output = run_with_timeout(cmd, DEFAULT_GIT_TIMEOUT)?;

    if !output.status.success() {
        return Err(GitError::NotARepo);
    }

    let path = String::from_utf8(output.stdout)?.trim().to_string();
    Ok(PathBuf::from(path))
}

/// Run a command, killing it if it does not exit within `timeout`.
///
/// stdout and stderr are drained on helper threads so a chatty child cannot
/// block on a full pipe while we poll.
pub fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<Output> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(GitError::TimedOut(timeout));
        }
        thread::sleep(Duration::from_millis(10));
    };

    Ok(Output {
        status,
        stdout: stdout.map(join_drain).unwrap_or_default(),
        stderr: stderr.map(join_drain).unwrap_or_default(),
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn join_drain(handle: thread::JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

/// Parse `%an|%ae` lines, keeping the first email seen for each name.
fn parse_contributors(log: &str) -> Vec<Contributor> {
    let mut contributors: Vec<Contributor> = Vec::new();
    for line in log.lines() {
        let Some((name, email)) = line.split_once('|') else {
            continue;
        };
        let (name, email) = (name.trim(), email.trim());
        if name.is_empty() || email.is_empty() {
            continue;
        }
        if contributors.iter().any(|c| c.name == name) {
            continue;
        }
        contributors.push(Contributor {
            name: name.to_string(),
            email: email.to_string(),
        });
    }
    contributors
}

/// Parse one author name per line, deduplicated in first-seen order.
fn parse_authors(log: &str) -> Vec<String> {
    let mut authors: Vec<String> = Vec::new();
    for line in log.lines() {
        let name = line.trim();
        if !name.is_empty() && !authors.iter().any(|a| a == name) {
            authors.push(name.to_string());
        }
    }
    authors
}
