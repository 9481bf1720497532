use crate::IssueStatus;
use crate::commands::IdentityPrompt;
use crate::views::ViewKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "code-river", about = "Line-anchored code review issues tracked alongside git")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Per-user settings file.
    #[arg(long, global = true, env = "CODE_RIVER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Issue store file.
    #[arg(long, global = true, env = "CODE_RIVER_STORE")]
    pub store: Option<PathBuf>,

    /// Project root. Defaults to the enclosing git repository.
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Adopt the git identity without asking when no user name is set.
    #[arg(short, long, global = true)]
    pub yes: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an issue on a line of a file.
    Add(AddArgs),
    /// List issues in one of the views.
    #[command(alias = "list")]
    View(ViewArgs),
    /// Show one issue with its replies.
    Show {
        id: String,
        /// Print the issue template as a code comment instead.
        #[arg(long)]
        template: bool,
    },
    /// Publish issues into the project's .code-river directory.
    Sync,
    /// Mark an issue fixed.
    Resolve { id: String },
    /// Mark an issue approved.
    Approve { id: String },
    /// Add a reply to an issue.
    Reply { id: String, content: String },
    /// Delete an issue.
    Delete { id: String },
    /// Set an issue's status (open, fixed, wontfix, approved).
    Status { id: String, status: IssueStatus },
    /// Add a user to the admin list.
    SetAdmin { name: String },
    /// Add a user to the reviewer list.
    SetReviewer { name: String },
    /// Invite a reviewer for an issue. Lists contributors when no name is given.
    Invite { issue_id: String, name: Option<String> },
    /// Print the source around an issue.
    Open { id: String },
    /// Print the current user's role.
    Role {
        /// Resolve the role for this file, including git authorship.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Open the interactive review TUI (default).
    Tui,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    pub file: PathBuf,
    /// One-based line number.
    pub line: u32,
    pub description: String,
}

#[derive(Args, Debug)]
pub struct ViewArgs {
    #[arg(value_enum, default_value_t = ViewArg::Mine)]
    pub view: ViewArg,
    /// Show reply threads.
    #[arg(short, long)]
    pub expand: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewArg {
    Mine,
    Review,
    Created,
}

impl From<ViewArg> for ViewKind {
    fn from(arg: ViewArg) -> Self {
        match arg {
            ViewArg::Mine => ViewKind::Mine,
            ViewArg::Review => ViewKind::Review,
            ViewArg::Created => ViewKind::CreatedByMe,
        }
    }
}

/// Parse CLI arguments.
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Asks on the terminal. Questions go to stderr so stdout stays parseable.
pub struct TerminalPrompt<R> {
    input: R,
}

impl TerminalPrompt<io::StdinLock<'static>> {
    pub fn stdin() -> Self {
        Self {
            input: io::stdin().lock(),
        }
    }
}

impl<R: BufRead> TerminalPrompt<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }

    fn ask(&mut self, question: &str) -> Option<String> {
        eprint!("{question}");
        io::stderr().flush().ok();
        let mut answer = String::new();
        match self.input.read_line(&mut answer) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(answer.trim().to_string()),
        }
    }
}

impl<R: BufRead> IdentityPrompt for TerminalPrompt<R> {
    fn adopt_git_identity(&mut self, git_name: &str) -> bool {
        self.ask(&format!("No user name set. Use your git name \"{git_name}\"? [Y/n] "))
            .is_some_and(|answer| matches!(answer.to_ascii_lowercase().as_str(), "" | "y" | "yes"))
    }

    fn ask_user_name(&mut self) -> Option<String> {
        self.ask("Enter your user name (empty to cancel): ")
            .filter(|name| !name.is_empty())
    }
}

/// Non-interactive answers for `--yes`: adopt git, never type a name.
pub struct AutoPrompt;

impl IdentityPrompt for AutoPrompt {
    fn adopt_git_identity(&mut self, _git_name: &str) -> bool {
        true
    }

    fn ask_user_name(&mut self) -> Option<String> {
        None
    }
}
