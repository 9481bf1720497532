use crate::commands::IssueLocation;
use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};
use std::path::Path;
use syntect::{
    easy::HighlightLines,
    highlighting::{Color as SyntectColor, Theme, ThemeSet},
    parsing::SyntaxSet,
};

/// Maximum line length for syntax highlighting (skip longer lines for performance).
const MAX_LINE_LENGTH: usize = 10_000;

/// Syntax highlighter for source previews.
///
/// Loading the bundled syntaxes is slow, so build one and share it. Use
/// `for_path()` to start a stateful session for a specific file.
pub struct Highlighter {
    syntax_set: SyntaxSet,
    theme: Theme,
}

impl Highlighter {
    pub fn new() -> Self {
        let syntax_set = SyntaxSet::load_defaults_newlines();
        let theme_set = ThemeSet::load_defaults();
        let theme = theme_set
            .themes
            .get("base16-ocean.dark")
            .or_else(|| theme_set.themes.values().next())
            .cloned()
            .unwrap_or_default();

        Self { syntax_set, theme }
    }

    /// Start a highlighting session chosen by the file's extension.
    pub fn for_path(&self, path: &Path) -> FileHighlighter<'_> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        FileHighlighter::new(&self.syntax_set, &self.theme, &ext)
    }

    /// Render an issue location with a line-number gutter. The issue's own
    /// line is marked and bold.
    pub fn excerpt_lines(&self, location: &IssueLocation) -> Vec<Line<'static>> {
        let mut fh = self.for_path(&location.path);
        let width = (location.first_line + location.excerpt.len()).to_string().len();

        location
            .excerpt
            .iter()
            .enumerate()
            .map(|(offset, text)| {
                let number = location.first_line + offset;
                let current = number == location.line;
                let gutter_style = if current {
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::DarkGray)
                };
                let marker = if current { ">" } else { " " };

                let mut spans = vec![Span::styled(
                    format!("{marker}{:>width$} │ ", number + 1),
                    gutter_style,
                )];
                let mut code = fh.highlight_line(text);
                if current {
                    for span in &mut code {
                        span.style = span.style.add_modifier(Modifier::BOLD);
                    }
                }
                spans.extend(code);
                Line::from(spans)
            })
            .collect()
    }

    fn syntect_to_ratatui(color: SyntectColor) -> Color {
        Color::Rgb(color.r, color.g, color.b)
    }
}

impl Default for Highlighter {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps parse state across the lines of one file, so multi-line strings
/// and comments are coloured correctly. Feed it lines in order.
pub struct FileHighlighter<'a> {
    highlighter: Option<HighlightLines<'a>>,
    syntax_set: &'a SyntaxSet,
}

impl<'a> FileHighlighter<'a> {
    fn new(syntax_set: &'a SyntaxSet, theme: &'a Theme, file_ext: &str) -> Self {
        let syntax = syntax_set
            .find_syntax_by_extension(file_ext)
            .or_else(|| syntax_set.find_syntax_by_name(file_ext));

        let highlighter = syntax.map(|s| HighlightLines::new(s, theme));

        Self {
            highlighter,
            syntax_set,
        }
    }

    /// Highlight one source line. Unknown file types and very long lines
    /// come back as a single plain span.
    pub fn highlight_line(&mut self, line: &str) -> Vec<Span<'static>> {
        if line.is_empty() {
            return vec![Span::raw(String::new())];
        }
        if line.len() > MAX_LINE_LENGTH {
            return vec![Span::raw(line.to_string())];
        }
        let Some(ref mut highlighter) = self.highlighter else {
            return vec![Span::raw(line.to_string())];
        };

        match highlighter.highlight_line(line, self.syntax_set) {
            Ok(regions) => regions
                .into_iter()
                .map(|(style, text)| {
                    Span::styled(
                        text.to_string(),
                        Style::default().fg(Highlighter::syntect_to_ratatui(style.foreground)),
                    )
                })
                .collect(),
            Err(_) => vec![Span::raw(line.to_string())],
        }
    }
}
