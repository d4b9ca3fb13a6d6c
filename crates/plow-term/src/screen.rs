// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The terminal session view.
//!
//! Three display regimes over one session: a spinner while waiting, the
//! alternate screen while the reply streams (so a long reply never scrolls
//! the user's shell), and an in-place build table on the main screen while
//! files stream in.

use std::io::{stdout, Write};

use async_trait::async_trait;
use crossterm::style::{Attribute, SetAttribute};
use crossterm::{cursor, execute, terminal};
use tracing::trace;

use plow_core::{BuildRow, SessionSummary, SessionView};

use crate::markdown::render_markdown;
use crate::spinner::Spinner;

/// Disables raw mode on drop, so a panic or early return cannot leave the
/// shell unusable.
pub struct RawModeGuard(());

impl RawModeGuard {
    pub fn enable() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self(()))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

pub struct TerminalScreen {
    spinner: Spinner,
    wrap_width: usize,
    table_lines: u16,
    in_alt_screen: bool,
}

impl TerminalScreen {
    pub fn new() -> Self {
        let wrap_width = terminal::size().map(|(w, _)| w as usize).unwrap_or(80);
        Self {
            spinner: Spinner::new(),
            wrap_width: wrap_width.min(100),
            table_lines: 0,
            in_alt_screen: false,
        }
    }

    /// Raw mode maps `\n` to a bare line feed, so every line needs an
    /// explicit carriage return.
    fn print_lines(&self, text: &str) {
        let mut out = stdout();
        if text.is_empty() {
            let _ = write!(out, "\r\n");
        }
        for line in text.lines() {
            let _ = write!(out, "{line}\r\n");
        }
        let _ = out.flush();
    }

    fn print_table(&mut self, rows: &[BuildRow], all_done: bool) {
        let mut body = String::new();
        for row in rows {
            body.push_str(&format_row(row));
            body.push('\n');
        }
        body.push('\n');
        body.push_str(if all_done {
            "All files built."
        } else {
            "Building…  (s)top"
        });
        self.print_lines(&body);
        self.table_lines = rows.len() as u16 + 2;
    }
}

impl Default for TerminalScreen {
    fn default() -> Self {
        Self::new()
    }
}

fn format_row(row: &BuildRow) -> String {
    let mark = if row.finished { "✔" } else { "…" };
    format!("  {mark} {:<40} {:>6} 🪙", row.path, row.streamed_tokens)
}

fn next_steps_lines(summary: &SessionSummary) -> Vec<String> {
    let mut lines = vec![String::new(), "Next steps:".to_string()];
    if summary.made_plan {
        lines.push(format!("  plow preview   — review {} built file(s)", summary.files.len()));
        lines.push("  plow diffs     — inspect changes".to_string());
        lines.push("  plow apply     — apply the plan".to_string());
    } else {
        lines.push("  plow tell      — continue the conversation".to_string());
    }
    lines.push("  plow abort     — discard this proposal".to_string());
    lines
}

#[async_trait]
impl SessionView for TerminalScreen {
    async fn show_sending(&mut self) {
        self.spinner.start("Sending prompt");
    }

    async fn reveal_reply(&mut self) {
        self.spinner.stop().await;
        let mut out = stdout();
        let _ = execute!(out, terminal::EnterAlternateScreen, cursor::Hide);
        self.in_alt_screen = true;
    }

    async fn render_reply(&mut self, markdown: &str) {
        if !self.in_alt_screen {
            return;
        }
        let mut out = stdout();
        let _ = execute!(
            out,
            cursor::MoveTo(0, 0),
            terminal::Clear(terminal::ClearType::All),
        );
        self.print_lines(&render_markdown(markdown, self.wrap_width));
    }

    async fn end_reply(&mut self, markdown: &str) {
        if self.in_alt_screen {
            let mut out = stdout();
            let _ = execute!(out, terminal::LeaveAlternateScreen, cursor::Show);
            self.in_alt_screen = false;
        }
        // The final reply belongs in the shell's scrollback.
        self.print_lines(&render_markdown(markdown, self.wrap_width));
        self.print_lines("");
        trace!("reply phase ended");
    }

    async fn begin_build(&mut self, files: &[String]) {
        let mut out = stdout();
        let _ = execute!(out, SetAttribute(Attribute::Bold));
        self.print_lines("Building files");
        let _ = execute!(out, SetAttribute(Attribute::Reset));
        let rows: Vec<BuildRow> = files
            .iter()
            .map(|f| BuildRow { path: f.clone(), streamed_tokens: 0, finished: false })
            .collect();
        self.print_table(&rows, false);
    }

    async fn render_build(&mut self, rows: &[BuildRow], all_done: bool) {
        let mut out = stdout();
        let _ = execute!(
            out,
            cursor::MoveToPreviousLine(self.table_lines),
            terminal::Clear(terminal::ClearType::FromCursorDown),
        );
        self.print_table(rows, all_done);
    }

    async fn show_notice(&mut self, message: &str) {
        self.print_lines(&format!("note: {message}"));
    }

    async fn show_error(&mut self, message: &str) {
        self.spinner.stop().await;
        if self.in_alt_screen {
            let mut out = stdout();
            let _ = execute!(out, terminal::LeaveAlternateScreen, cursor::Show);
            self.in_alt_screen = false;
        }
        self.print_lines(&format!("error: {message}"));
    }

    async fn show_next_steps(&mut self, summary: &SessionSummary) {
        self.spinner.stop().await;
        for line in next_steps_lines(summary) {
            self.print_lines(&line);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
