use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use code_river::cli::{self, AddArgs, AutoPrompt, Commands, GlobalArgs, TerminalPrompt, ViewArgs};
use code_river::commands::{IdentityPrompt, ReviewService, read_location};
use code_river::config::{APP_DIR, ConfigPaths};
use code_river::git::{GitCli, find_repo_root};
use code_river::store::IssueStore;
use code_river::tui::{App, run_tui};
use code_river::views::{TreeNode, ViewKind, flatten, node_label};
use code_river::format_millis;

fn main() -> Result<()> {
    let args = cli::parse_args();
    init_logging(args.global.verbose);

    let mut service = open_service(&args.global)?;
    let mut prompt: Box<dyn IdentityPrompt> = if args.global.yes {
        Box::new(AutoPrompt)
    } else {
        Box::new(TerminalPrompt::stdin())
    };
    let prompt = prompt.as_mut();

    match args.command {
        None | Some(Commands::Tui) => {
            service.ensure_user(prompt)?;
            run_tui(App::new(service))?;
        }
        Some(Commands::Add(add)) => handle_add(&mut service, &add, prompt)?,
        Some(Commands::View(view)) => handle_view(&mut service, &view),
        Some(Commands::Show { id, template }) => handle_show(&service, &id, template)?,
        Some(Commands::Sync) => handle_sync(&mut service)?,
        Some(Commands::Resolve { id }) => {
            service.ensure_user(prompt)?;
            let issue = service.resolve(&id)?;
            println!("✓ Issue {} marked {}", issue.id, issue.status.label());
        }
        Some(Commands::Approve { id }) => {
            service.ensure_user(prompt)?;
            let issue = service.approve(&id)?;
            println!("✓ Issue {} marked {}", issue.id, issue.status.label());
        }
        Some(Commands::Status { id, status }) => {
            service.ensure_user(prompt)?;
            let issue = service.set_status(&id, status)?;
            println!("✓ Issue {} marked {}", issue.id, issue.status.label());
        }
        Some(Commands::Reply { id, content }) => {
            service.reply(&id, &content, prompt)?;
            println!("✓ Reply added to issue {id}");
        }
        Some(Commands::Delete { id }) => {
            service.ensure_user(prompt)?;
            service.delete(&id)?;
            println!("✓ Issue {id} deleted");
        }
        Some(Commands::SetAdmin { name }) => {
            if service.set_admin(&name)? {
                println!("✓ {name} is now an admin");
            } else {
                println!("{name} is already an admin");
            }
        }
        Some(Commands::SetReviewer { name }) => {
            if service.set_reviewer(&name)? {
                println!("✓ {name} is now a reviewer");
            } else {
                println!("{name} is already a reviewer");
            }
        }
        Some(Commands::Invite { issue_id, name }) => handle_invite(&mut service, &issue_id, name.as_deref())?,
        Some(Commands::Open { id }) => handle_open(&service, &id)?,
        Some(Commands::Role { file }) => {
            let file = file.map(|f| absolute(&f)).transpose()?;
            let role = service.role(file.as_deref());
            println!("{} ({})", service.user().unwrap_or("anonymous"), role);
        }
    }

    Ok(())
}

/// Send logs to stderr. `--verbose` wins over `RUST_LOG`.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("code_river=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve the workspace, settings and store, and wire up the service.
fn open_service(global: &GlobalArgs) -> Result<ReviewService> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let workspace = match &global.workspace {
        Some(path) => Some(absolute(path)?),
        None => find_repo_root(&cwd).ok(),
    };

    let paths = ConfigPaths::discover(global.config.clone(), workspace.as_deref())
        .context("Failed to locate settings")?;
    let settings = paths.load().context("Failed to load settings")?;

    let store_path = match global.store.clone().or_else(|| settings.store_path.clone()) {
        Some(path) => path,
        None => dirs::data_dir()
            .context("No data directory available; pass --store")?
            .join(APP_DIR)
            .join("issues.json"),
    };

    let git = GitCli::new(workspace.clone().unwrap_or(cwd)).with_timeout(settings.git_timeout());
    Ok(ReviewService::new(
        paths,
        settings,
        IssueStore::open(store_path),
        Arc::new(git),
        workspace,
    ))
}

/// Absolute path with `.`, `..` and symlinks resolved, so it compares
/// component-wise against the workspace.
fn absolute(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).with_context(|| format!("Path does not exist: {}", path.display()))
}

fn handle_add(service: &mut ReviewService, args: &AddArgs, prompt: &mut dyn IdentityPrompt) -> Result<()> {
    if args.line == 0 {
        bail!("Line numbers start at 1");
    }
    if !args.file.is_file() {
        bail!("File does not exist: {}", args.file.display());
    }
    let file = absolute(&args.file)?;
    let issue = service.add_issue(&file, args.line - 1, &args.description, prompt)?;
    println!("✓ Created issue {}", issue.id);
    Ok(())
}

fn handle_view(service: &mut ReviewService, args: &ViewArgs) {
    let kind = ViewKind::from(args.view);
    let issues = service.view(kind);

    let marker = if service.views().get(kind).has_changes() {
        " (unsynced changes)"
    } else {
        ""
    };
    println!("{}{}", kind.title(), marker);

    if service.user().is_none() {
        println!("  no user name set; run any command that changes issues to set one");
    }
    if issues.is_empty() {
        println!("  no issues");
        return;
    }

    let expanded: HashSet<String> = if args.expand {
        issues.iter().map(|issue| issue.id.clone()).collect()
    } else {
        HashSet::new()
    };
    for node in flatten(&issues, &expanded) {
        let id = match node {
            TreeNode::Issue { issue, .. } => issue.id.as_str(),
            TreeNode::Reply { .. } => "",
        };
        println!("{id:<14} {}", node_label(&node));
    }
}

fn handle_show(service: &ReviewService, id: &str, template: bool) -> Result<()> {
    if template {
        println!("{}", service.comment_for(id)?);
        return Ok(());
    }

    let issue = service.issue(id)?;
    println!("{}", issue.description);
    println!("  Status:   {}", issue.status.label());
    println!("  Location: {}:{}", issue.file_path.display(), issue.line_number + 1);
    println!("  Author:   {}", issue.author.as_deref().unwrap_or("unknown"));
    println!("  Created:  {}", format_millis(issue.created_at));
    println!("  Updated:  {}", format_millis(issue.updated_at));
    if !issue.replies.is_empty() {
        println!("\nReplies:");
        for reply in &issue.replies {
            println!("  {} - {}", reply.author, format_millis(reply.created_at));
            println!("    {}", reply.content);
        }
    }
    Ok(())
}

fn handle_sync(service: &mut ReviewService) -> Result<()> {
    let report = service.sync()?;
    for notice in &report.notices {
        eprintln!("⚠ {notice}");
    }
    if !report.published {
        bail!("Nothing was published");
    }
    if report.skipped_missing > 0 {
        println!("Skipped {} issues whose files no longer exist", report.skipped_missing);
    }
    for path in &report.written {
        println!("✓ Wrote {}", path.display());
    }
    Ok(())
}

fn handle_invite(service: &mut ReviewService, issue_id: &str, name: Option<&str>) -> Result<()> {
    let Some(name) = name else {
        service.issue(issue_id)?;
        let contributors = service.contributors();
        if contributors.is_empty() {
            println!("No contributors found in git history");
        } else {
            println!("Contributors:");
            for contributor in contributors {
                println!("  {} <{}>", contributor.name, contributor.email);
            }
        }
        return Ok(());
    };

    if service.invite_reviewer(issue_id, name)? {
        println!("✓ Invited {name} to review issue {issue_id}");
    } else {
        println!("{name} is already a reviewer");
    }
    Ok(())
}

fn handle_open(service: &ReviewService, id: &str) -> Result<()> {
    let issue = service.issue(id)?;
    let location = read_location(&issue.file_path, issue.line_number as usize, 5)?;
    println!("{}:{}", location.path.display(), location.line + 1);
    let width = (location.first_line + location.excerpt.len()).to_string().len();
    for (offset, text) in location.excerpt.iter().enumerate() {
        let number = location.first_line + offset;
        let marker = if number == location.line { ">" } else { " " };
        println!("{marker}{:>width$} │ {text}", number + 1);
    }
    println!("\n[{}] {}", issue.status.label(), issue.description);
    Ok(())
}
