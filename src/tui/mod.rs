use anyhow::{Context, Result};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Tabs, Wrap},
};
use std::collections::HashSet;
use std::io;
use std::time::{Duration, Instant};

use crate::commands::{IdentityPrompt, IssueLocation, ReviewService};
use crate::highlight::Highlighter;
use crate::views::{TreeNode, ViewKind, flatten, node_label};
use crate::{Issue, IssueStatus, format_millis};

/// Action waiting for a yes/no answer.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfirmAction {
    Delete { id: String },
}

/// Input focus of the TUI.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Browse,
    Confirm(ConfirmAction),
    Reply { id: String, input: String },
    Preview(IssueLocation),
}

/// The user is resolved before the TUI starts, so identity prompts never fire.
struct NoPrompt;

impl IdentityPrompt for NoPrompt {
    fn adopt_git_identity(&mut self, _git_name: &str) -> bool {
        false
    }

    fn ask_user_name(&mut self) -> Option<String> {
        None
    }
}

/// Application state for the TUI.
pub struct App {
    service: ReviewService,
    tab: ViewKind,
    issues: Vec<Issue>,
    expanded: HashSet<String>,
    selected: usize,
    mode: Mode,
    should_quit: bool,
    show_help: bool,
    highlighter: Highlighter,
    status_message: Option<(String, Instant)>,
}

impl App {
    pub fn new(service: ReviewService) -> Self {
        let mut app = Self {
            service,
            tab: ViewKind::Mine,
            issues: Vec::new(),
            expanded: HashSet::new(),
            selected: 0,
            mode: Mode::Browse,
            should_quit: false,
            show_help: false,
            highlighter: Highlighter::new(),
            status_message: None,
        };
        app.refresh();
        app
    }

    /// Reload the current tab from the store, keeping the selection in range.
    fn refresh(&mut self) {
        self.issues = self.service.view(self.tab);
        let ids: HashSet<&str> = self.issues.iter().map(|i| i.id.as_str()).collect();
        self.expanded.retain(|id| ids.contains(id.as_str()));
        let rows = self.row_count();
        if self.selected >= rows {
            self.selected = rows.saturating_sub(1);
        }
    }

    fn rows(&self) -> Vec<TreeNode<'_>> {
        flatten(&self.issues, &self.expanded)
    }

    fn row_count(&self) -> usize {
        self.rows().len()
    }

    /// Issue under the cursor, or the issue owning the reply under it.
    fn selected_issue(&self) -> Option<&Issue> {
        self.rows().get(self.selected).map(|node| node.issue())
    }

    fn selected_id(&self) -> Option<String> {
        self.selected_issue().map(|issue| issue.id.clone())
    }

    fn notify(&mut self, message: impl Into<String>) {
        self.status_message = Some((message.into(), Instant::now()));
    }

    fn switch_tab(&mut self, tab: ViewKind) {
        self.tab = tab;
        self.selected = 0;
        self.refresh();
    }

    /// Handle keyboard input, dispatching on the current mode.
    fn handle_input(&mut self, key: KeyEvent) -> Result<()> {
        if self.show_help {
            self.show_help = false;
            return Ok(());
        }

        match std::mem::replace(&mut self.mode, Mode::Browse) {
            Mode::Browse => self.handle_browse_input(key),
            Mode::Confirm(action) => {
                if matches!(key.code, KeyCode::Char('y') | KeyCode::Char('Y')) {
                    self.run_confirmed(action);
                }
                Ok(())
            }
            Mode::Reply { id, mut input } => {
                match key.code {
                    KeyCode::Enter => self.submit_reply(&id, &input),
                    KeyCode::Esc => {}
                    KeyCode::Backspace => {
                        input.pop();
                        self.mode = Mode::Reply { id, input };
                    }
                    KeyCode::Char(c) => {
                        input.push(c);
                        self.mode = Mode::Reply { id, input };
                    }
                    _ => self.mode = Mode::Reply { id, input },
                }
                Ok(())
            }
            // Any key closes the preview
            Mode::Preview(_) => Ok(()),
        }
    }

    fn handle_browse_input(&mut self, key: KeyEvent) -> Result<()> {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
            }
            KeyCode::Char('?') => {
                self.show_help = true;
            }
            KeyCode::Char('j') | KeyCode::Down => {
                if self.selected + 1 < self.row_count() {
                    self.selected += 1;
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.selected = self.selected.saturating_sub(1);
            }
            KeyCode::Tab => self.switch_tab(self.tab.next()),
            KeyCode::BackTab => self.switch_tab(self.tab.prev()),
            KeyCode::Char('1') => self.switch_tab(ViewKind::Mine),
            KeyCode::Char('2') => self.switch_tab(ViewKind::Review),
            KeyCode::Char('3') => self.switch_tab(ViewKind::CreatedByMe),
            KeyCode::Enter | KeyCode::Char(' ') => self.toggle_expanded(),
            KeyCode::Char('o') => self.open_preview(),
            KeyCode::Char('r') => self.change_status(IssueStatus::Fixed),
            KeyCode::Char('a') => self.change_status(IssueStatus::Approved),
            KeyCode::Char('w') => self.change_status(IssueStatus::Wontfix),
            KeyCode::Char('u') => self.change_status(IssueStatus::Open),
            KeyCode::Char('D') => {
                if let Some(id) = self.selected_id() {
                    self.mode = Mode::Confirm(ConfirmAction::Delete { id });
                }
            }
            KeyCode::Char('c') => {
                if let Some(id) = self.selected_id() {
                    self.mode = Mode::Reply {
                        id,
                        input: String::new(),
                    };
                }
            }
            KeyCode::Char('s') => self.sync(),
            KeyCode::Char('R') => {
                self.refresh();
                self.notify("Reloaded");
            }
            _ => {}
        }
        Ok(())
    }

    /// Expand or collapse the thread under the cursor.
    fn toggle_expanded(&mut self) {
        let Some(issue) = self.selected_issue() else {
            return;
        };
        let id = issue.id.clone();
        if !self.expanded.remove(&id) {
            self.expanded.insert(id.clone());
        }
        // Keep the cursor on the issue row when collapsing from a reply
        if let Some(row) = self
            .rows()
            .iter()
            .position(|node| matches!(node, TreeNode::Issue { issue, .. } if issue.id == id))
        {
            self.selected = row;
        }
    }

    fn open_preview(&mut self) {
        let Some(id) = self.selected_id() else {
            return;
        };
        match self.service.open_location(&id) {
            Ok(location) => self.mode = Mode::Preview(location),
            Err(e) => self.notify(e.to_string()),
        }
    }

    fn change_status(&mut self, status: IssueStatus) {
        let Some(id) = self.selected_id() else {
            return;
        };
        match self.service.set_status(&id, status) {
            Ok(issue) => self.notify(format!("Issue marked {}", issue.status.label())),
            Err(e) => self.notify(e.to_string()),
        }
        self.refresh();
    }

    fn run_confirmed(&mut self, action: ConfirmAction) {
        match action {
            ConfirmAction::Delete { id } => match self.service.delete(&id) {
                Ok(()) => self.notify("Issue deleted"),
                Err(e) => self.notify(e.to_string()),
            },
        }
        self.refresh();
    }

    fn submit_reply(&mut self, id: &str, content: &str) {
        match self.service.reply(id, content, &mut NoPrompt) {
            Ok(_) => {
                self.expanded.insert(id.to_string());
                self.notify("Reply added");
            }
            Err(e) => self.notify(e.to_string()),
        }
        self.refresh();
    }

    fn sync(&mut self) {
        match self.service.sync() {
            Ok(report) if report.published => {
                let mut message = "Synced into .code-river".to_string();
                if report.skipped_missing > 0 {
                    message.push_str(&format!(" ({} skipped, file missing)", report.skipped_missing));
                }
                for notice in &report.notices {
                    message.push_str("; ");
                    message.push_str(notice);
                }
                self.notify(message);
            }
            Ok(report) => self.notify(report.notices.join("; ")),
            Err(e) => self.notify(e.to_string()),
        }
    }

    /// Render the UI.
    fn render(&mut self, frame: &mut Frame) {
        let expired = self
            .status_message
            .as_ref()
            .is_some_and(|(_, time)| time.elapsed() >= Duration::from_secs(4));
        if expired {
            self.status_message = None;
        }

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(1),
                Constraint::Length(3),
            ])
            .split(frame.area());

        self.render_tabs(frame, chunks[0]);

        let main_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(chunks[1]);

        self.render_tree(frame, main_chunks[0]);
        match &self.mode {
            Mode::Preview(location) => self.render_preview(frame, main_chunks[1], location),
            _ => self.render_detail(frame, main_chunks[1]),
        }
        self.render_status_bar(frame, chunks[2]);

        match &self.mode {
            Mode::Confirm(action) => self.render_confirm(frame, action),
            Mode::Reply { input, .. } => self.render_reply_input(frame, input),
            Mode::Browse | Mode::Preview(_) => {}
        }

        if self.show_help {
            self.render_help(frame);
        }
    }

    fn render_tabs(&self, frame: &mut Frame, area: Rect) {
        let titles: Vec<Line> = ViewKind::ALL
            .iter()
            .map(|&kind| {
                let marker = if self.service.views().get(kind).has_changes() {
                    " ●"
                } else {
                    ""
                };
                Line::from(format!("{}{}", kind.title(), marker))
            })
            .collect();
        let selected = ViewKind::ALL
            .iter()
            .position(|&kind| kind == self.tab)
            .unwrap_or(0);

        let tabs = Tabs::new(titles)
            .block(Block::default().borders(Borders::ALL).title("Code River"))
            .select(selected)
            .highlight_style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            );
        frame.render_widget(tabs, area);
    }

    fn render_tree(&self, frame: &mut Frame, area: Rect) {
        let rows = self.rows();
        let items: Vec<ListItem> = rows
            .iter()
            .map(|node| {
                let label = node_label(node);
                let color = match node {
                    TreeNode::Issue { issue, .. } => status_color(issue.status),
                    TreeNode::Reply { .. } => Color::Gray,
                };
                ListItem::new(label.to_string()).style(Style::default().fg(color))
            })
            .collect();

        let title = format!("{} ({})", self.tab.title(), self.issues.len());
        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

        let mut state = ListState::default();
        if !rows.is_empty() {
            state.select(Some(self.selected));
        }
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn render_detail(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL).title("Issue");
        let Some(issue) = self.selected_issue() else {
            let empty = if self.tab == ViewKind::Review {
                "Nothing to review. Only admins and reviewers see this view."
            } else {
                "No issues"
            };
            frame.render_widget(Paragraph::new(empty).block(block), area);
            return;
        };

        let label = Style::default().fg(Color::Cyan);
        let mut lines = vec![
            Line::from(Span::styled(
                issue.description.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(vec![
                Span::styled("Status:   ", label),
                Span::styled(issue.status.label(), Style::default().fg(status_color(issue.status))),
            ]),
            Line::from(vec![
                Span::styled("Location: ", label),
                Span::raw(format!("{}:{}", issue.file_path.display(), issue.line_number + 1)),
            ]),
            Line::from(vec![
                Span::styled("Author:   ", label),
                Span::raw(issue.author.clone().unwrap_or_else(|| "unknown".to_string())),
            ]),
            Line::from(vec![
                Span::styled("Created:  ", label),
                Span::raw(format_millis(issue.created_at)),
            ]),
            Line::from(vec![
                Span::styled("Updated:  ", label),
                Span::raw(format_millis(issue.updated_at)),
            ]),
            Line::from(vec![
                Span::styled("Id:       ", label),
                Span::raw(issue.id.clone()),
            ]),
        ];

        if !issue.replies.is_empty() {
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(
                format!("Replies ({})", issue.replies.len()),
                label,
            )));
            for reply in &issue.replies {
                lines.push(Line::from(Span::styled(
                    format!("{} - {}", reply.author, format_millis(reply.created_at)),
                    Style::default().fg(Color::DarkGray),
                )));
                lines.push(Line::from(format!("  {}", reply.content)));
            }
        }

        let paragraph = Paragraph::new(Text::from(lines))
            .block(block)
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    fn render_preview(&self, frame: &mut Frame, area: Rect, location: &IssueLocation) {
        let title = format!("{}:{}", location.path.display(), location.line + 1);
        let paragraph = Paragraph::new(Text::from(self.highlighter.excerpt_lines(location)))
            .block(Block::default().borders(Borders::ALL).title(title));
        frame.render_widget(paragraph, area);
    }

    fn render_status_bar(&self, frame: &mut Frame, area: Rect) {
        let status_text = match &self.status_message {
            Some((msg, _)) => msg.clone(),
            None => format!(
                "{} | Keys: j/k=nav Enter=thread o=open r=resolve a=approve c=reply D=delete s=sync Tab=view ?=help q=quit",
                self.service.user().unwrap_or("anonymous")
            ),
        };
        let paragraph = Paragraph::new(status_text)
            .block(Block::default().borders(Borders::ALL))
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    fn render_help(&self, frame: &mut Frame) {
        let help_text = [
            "Code River - Keyboard Shortcuts",
            "",
            "Navigation:",
            "  j / Down      - Next row",
            "  k / Up        - Previous row",
            "  Tab/Shift+Tab - Next / previous view",
            "  1 2 3         - My issues / Review / Created by me",
            "  Enter, Space  - Expand or collapse replies",
            "  o             - Preview the issue's source location",
            "",
            "Actions:",
            "  r             - Resolve (fixed)",
            "  a             - Approve",
            "  w             - Won't fix",
            "  u             - Reopen",
            "  c             - Reply",
            "  D (Shift+D)   - Delete (asks first)",
            "  s             - Sync into .code-river",
            "  R (Shift+R)   - Reload issues",
            "",
            "Other:",
            "  ?             - Show this help",
            "  q / Esc       - Quit",
            "",
            "Press any key to close this help",
        ];

        let text = Text::from(help_text.iter().map(|&s| Line::from(s)).collect::<Vec<_>>());
        let paragraph = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title("Help"))
            .wrap(Wrap { trim: false });

        let area = centered_rect(60, 80, frame.area());
        frame.render_widget(Clear, area);
        frame.render_widget(paragraph, area);
    }

    fn render_confirm(&self, frame: &mut Frame, action: &ConfirmAction) {
        let message = match action {
            ConfirmAction::Delete { id } => {
                let description = self
                    .issues
                    .iter()
                    .find(|issue| &issue.id == id)
                    .map(|issue| issue.description.as_str())
                    .unwrap_or(id.as_str());
                format!("Delete issue \"{description}\"?\n\n(y)es / (n)o")
            }
        };

        let paragraph = Paragraph::new(message)
            .block(Block::default().borders(Borders::ALL).title("Confirm"))
            .wrap(Wrap { trim: false })
            .style(Style::default().fg(Color::Yellow));

        let area = centered_rect(50, 30, frame.area());
        frame.render_widget(Clear, area);
        frame.render_widget(paragraph, area);
    }

    fn render_reply_input(&self, frame: &mut Frame, input: &str) {
        let paragraph = Paragraph::new(format!("{input}_"))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Reply (Enter to send, Esc to cancel)"),
            )
            .wrap(Wrap { trim: false });

        let area = centered_rect(60, 20, frame.area());
        frame.render_widget(Clear, area);
        frame.render_widget(paragraph, area);
    }
}

fn status_color(status: IssueStatus) -> Color {
    match status {
        IssueStatus::Open => Color::Red,
        IssueStatus::Fixed => Color::Green,
        IssueStatus::Wontfix => Color::DarkGray,
        IssueStatus::Approved => Color::Blue,
    }
}

/// Create a centered rectangle.
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Setup the terminal for TUI rendering.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("Failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).context("Failed to create terminal")
}

/// Restore the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().context("Failed to disable raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("Failed to leave alternate screen")?;
    terminal.show_cursor().context("Failed to show cursor")?;
    Ok(())
}

/// Launch the interactive review interface.
pub fn run_tui(mut app: App) -> Result<()> {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic_info);
    }));

    let mut terminal = setup_terminal()?;

    let result = (|| -> Result<()> {
        loop {
            terminal
                .draw(|f| app.render(f))
                .context("Failed to draw frame")?;

            if app.should_quit {
                break;
            }

            if event::poll(Duration::from_millis(200)).context("Failed to poll events")?
                && let Event::Key(key) = event::read().context("Failed to read event")?
                && key.kind == event::KeyEventKind::Press
            {
                app.handle_input(key)?;
            }
        }
        Ok(())
    })();

    restore_terminal(&mut terminal)?;

    result
}
