// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

// ─── Stream states and phase markers ─────────────────────────────────────────

/// The tagged phase a stream chunk belongs to.
///
/// For a given proposal the sequence is monotonic: once `Finished` has been
/// observed the server sends no further reply or description chunks (file
/// builds already in flight may still drain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// The model is streaming its conversational reply.
    Replying,
    /// The model is revising an earlier reply; handled identically to
    /// `Replying` on the client.
    Revising,
    /// The reply is done; a plan description payload follows.
    Describing,
    /// Per-file build payloads are streaming.
    Building,
    /// The stream is complete on the server side.
    Finished,
}

/// Sentinel content announcing that the description phase has begun.
/// Distinct from actual payload content: the first `Describing` chunk
/// carries this marker, the next one carries the JSON description.
pub const DESCRIPTION_PHASE: &str = "description-phase";

/// Sentinel content announcing that the build phase has begun.
pub const BUILD_PHASE: &str = "build-phase";

// ─── Chunks ──────────────────────────────────────────────────────────────────

/// One incremental unit of the streamed proposal response.
///
/// The very first chunk of a session carries the freshly assigned proposal
/// id in `content` (its `proposal_id` field is still empty at that point).
/// Transport failures surface as the `Err` arm of the chunk stream rather
/// than as a field here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Which proposal this chunk belongs to. Empty until the server has
    /// assigned an id.
    #[serde(default)]
    pub proposal_id: String,
    pub state: StreamState,
    #[serde(default)]
    pub content: String,
}

impl StreamChunk {
    pub fn new(state: StreamState, content: impl Into<String>) -> Self {
        Self { proposal_id: String::new(), state, content: content.into() }
    }
}

// ─── Plan description ────────────────────────────────────────────────────────

/// The structured summary sent once per proposal, after the reply finishes.
///
/// Deserialized exactly once from a single `Describing`-phase payload and
/// read-only afterwards. `files` lists the paths the build phase will
/// stream, in display order; a path never appears twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDescription {
    pub made_plan: bool,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub response_timestamp: String,
}

// ─── Built files ─────────────────────────────────────────────────────────────

/// One completed file payload, assembled by the chunk decoder from the
/// accumulated build fragments for a single path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltFile {
    pub path: String,
    pub content: String,
}

/// Encode a build-phase chunk body: the target path on the first line, the
/// raw payload fragment after it.
pub fn build_payload(path: &str, fragment: &str) -> String {
    format!("{path}\n{fragment}")
}

/// Split a build-phase chunk body into `(path, fragment)`.
///
/// Returns `None` when the path line is missing — the fragment may itself
/// contain newlines, so only the first one delimits.
pub fn split_build_payload(content: &str) -> Option<(&str, &str)> {
    let (path, fragment) = content.split_once('\n')?;
    if path.is_empty() {
        return None;
    }
    Some((path, fragment))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
