// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// The streamed conversational reply for one proposal.
///
/// Text is append-only for the lifetime of the proposal. The token tally is
/// maintained incrementally (bytes/4, minimum 1 once any text arrived) so
/// the full reply is never re-scanned, no matter how many fragments stream in.
#[derive(Debug, Default)]
pub struct ReplyBuffer {
    text: String,
    streamed_bytes: usize,
    started: bool,
    final_tokens: Option<usize>,
}

impl ReplyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one streamed fragment. O(1) amortized.
    pub fn append(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.streamed_bytes += fragment.len();
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Running token estimate for everything appended so far.
    pub fn token_count(&self) -> usize {
        if self.streamed_bytes == 0 {
            return 0;
        }
        (self.streamed_bytes / 4).max(1)
    }

    /// Whether the reply has been revealed on screen yet. Set once by the
    /// state machine after the reveal-delay floor has elapsed.
    pub fn started(&self) -> bool {
        self.started
    }

    pub fn mark_started(&mut self) {
        self.started = true;
    }

    /// Freeze the tally and return the final token count for persistence.
    /// Idempotent: later calls return the same count even if more fragments
    /// were appended by a misbehaving stream.
    pub fn finish(&mut self) -> usize {
        *self.final_tokens.get_or_insert_with(|| {
            if self.streamed_bytes == 0 {
                0
            } else {
                (self.streamed_bytes / 4).max(1)
            }
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
