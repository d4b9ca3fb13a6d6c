// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-file payload decoding for the build phase.
//!
//! Each file's payload streams in as raw fragments that accumulate into a
//! per-path buffer until the buffer parses as one complete [`BuiltFile`]
//! JSON object. `serde_json` error classification makes "still incomplete"
//! (`Category::Eof`) distinguishable from "malformed" (anything else), so
//! partial data is the expected steady state and garbage is fatal.

use std::collections::HashMap;

use plow_proto::BuiltFile;

use crate::error::SessionError;

/// Build progress for one path in the plan description.
#[derive(Debug, Clone, Default)]
pub struct FileBuildState {
    pub buffer: String,
    pub streamed_tokens: usize,
    pub finished: bool,
}

/// One row of the build status table, in description order.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRow {
    pub path: String,
    pub streamed_tokens: usize,
    pub finished: bool,
}

/// Tracks every file the plan description named and assembles their
/// streamed payloads into completed records.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    /// Paths in description order, for stable rendering.
    order: Vec<String>,
    states: HashMap<String, FileBuildState>,
}

impl ChunkDecoder {
    /// Register the paths the build phase will stream. A path appearing
    /// twice in the description violates the unique-key invariant.
    pub fn register(&mut self, files: &[String]) -> Result<(), SessionError> {
        for path in files {
            if self.states.contains_key(path) {
                return Err(SessionError::DuplicateFilePath(path.clone()));
            }
            self.order.push(path.clone());
            self.states.insert(path.clone(), FileBuildState::default());
        }
        Ok(())
    }

    /// Append one fragment to `path`'s buffer and try to complete it.
    ///
    /// Returns `Ok(None)` while the buffer is still a JSON prefix (the
    /// steady state mid-stream), `Ok(Some(record))` once it parses — the
    /// buffer is cleared and the path marked finished — and `Err` for
    /// fragments that cannot be partial data.
    pub fn decode(
        &mut self,
        path: &str,
        fragment: &str,
    ) -> Result<Option<BuiltFile>, SessionError> {
        let state = self
            .states
            .get_mut(path)
            .ok_or_else(|| SessionError::UnknownFilePath(path.to_string()))?;
        if state.finished {
            return Err(SessionError::FragmentAfterFinish(path.to_string()));
        }

        state.buffer.push_str(fragment);
        if !fragment.is_empty() {
            state.streamed_tokens += (fragment.len() / 4).max(1);
        }

        match serde_json::from_str::<BuiltFile>(&state.buffer) {
            Ok(record) => {
                state.buffer.clear();
                state.finished = true;
                Ok(Some(record))
            }
            Err(e) if e.classify() == serde_json::error::Category::Eof => Ok(None),
            Err(e) => Err(SessionError::MalformedFilePayload {
                path: path.to_string(),
                source: e,
            }),
        }
    }

    /// True when every registered path has finished. Vacuously true for an
    /// empty registration — the caller handles the no-files case before the
    /// build phase starts.
    pub fn all_finished(&self) -> bool {
        self.order.iter().all(|p| self.states[p].finished)
    }

    pub fn finished_count(&self) -> usize {
        self.order.iter().filter(|p| self.states[*p].finished).count()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Status rows in description order, for the in-place table render.
    pub fn rows(&self) -> Vec<BuildRow> {
        self.order
            .iter()
            .map(|p| {
                let s = &self.states[p];
                BuildRow {
                    path: p.clone(),
                    streamed_tokens: s.streamed_tokens,
                    finished: s.finished,
                }
            })
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
