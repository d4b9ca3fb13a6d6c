// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Braille-dot progress spinner.
//!
//! A spinner that flashes on and immediately off reads as a glitch, so
//! `stop` holds it visible for a minimum duration: longer when it carries
//! a message the user is expected to read, shorter when it is bare.

use std::io::{stderr, Write};
use std::time::{Duration, Instant};

use crossterm::{cursor, execute, terminal};
use tokio::task::JoinHandle;

const FRAMES: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
const FRAME_PERIOD: Duration = Duration::from_millis(100);
const MIN_VISIBLE_WITH_MESSAGE: Duration = Duration::from_millis(700);
const MIN_VISIBLE_BARE: Duration = Duration::from_millis(400);

/// How much longer a spinner must stay up before it may stop.
fn hold_for(elapsed: Duration, has_message: bool) -> Duration {
    let min = if has_message { MIN_VISIBLE_WITH_MESSAGE } else { MIN_VISIBLE_BARE };
    min.saturating_sub(elapsed)
}

#[derive(Default)]
pub struct Spinner {
    task: Option<JoinHandle<()>>,
    started_at: Option<Instant>,
    message: String,
}

impl Spinner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart with a new message). Restarting with the same
    /// message keeps the current spinner running.
    pub fn start(&mut self, message: &str) {
        if let Some(task) = &self.task {
            if message == self.message {
                return;
            }
            task.abort();
        }
        self.started_at = Some(Instant::now());
        self.message = message.to_string();
        let message = self.message.clone();
        self.task = Some(tokio::spawn(async move {
            let mut frame = 0usize;
            let mut ticker = tokio::time::interval(FRAME_PERIOD);
            loop {
                ticker.tick().await;
                let mut out = stderr();
                let _ = execute!(
                    out,
                    cursor::MoveToColumn(0),
                    terminal::Clear(terminal::ClearType::CurrentLine),
                );
                let _ = write!(out, "{} {}", FRAMES[frame % FRAMES.len()], message);
                let _ = out.flush();
                frame += 1;
            }
        }));
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Stop the spinner, holding it visible for its minimum duration first,
    /// then clear its line.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let elapsed = self.started_at.take().map(|t| t.elapsed()).unwrap_or_default();
        let hold = hold_for(elapsed, !self.message.is_empty());
        if !hold.is_zero() {
            tokio::time::sleep(hold).await;
        }
        task.abort();
        let mut out = stderr();
        let _ = execute!(
            out,
            cursor::MoveToColumn(0),
            terminal::Clear(terminal::ClearType::CurrentLine),
        );
        let _ = out.flush();
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
