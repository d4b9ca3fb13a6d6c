// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use plow_proto::StreamState;
use thiserror::Error;

/// Fatal session failures.
///
/// Protocol errors mean the server sent something the client cannot act on;
/// transport errors come from the stream or the keyboard; persistence
/// errors are only fatal for plan-state saves (a failed conversation append
/// is logged and surfaced without aborting).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("proposal id not sent in first chunk")]
    MissingProposalId,

    #[error("error parsing plan description: {0}")]
    BadDescription(serde_json::Error),

    #[error("plan description was sent twice")]
    DuplicateDescription,

    #[error("duplicate file path in plan description: {0}")]
    DuplicateFilePath(String),

    #[error("build chunk arrived before the plan description")]
    BuildBeforeDescription,

    #[error("build chunk is missing its path line")]
    MissingFilePath,

    #[error("build chunk for unknown file path: {0}")]
    UnknownFilePath(String),

    #[error("build chunk for already finished file: {0}")]
    FragmentAfterFinish(String),

    #[error("malformed build payload for {path}: {source}")]
    MalformedFilePayload {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("stream finished before a plan description arrived")]
    FinishedWithoutDescription,

    #[error("received {state:?} chunk after the stream finished")]
    ChunkAfterFinish { state: StreamState },

    #[error("stream error: {0}")]
    Transport(String),

    #[error("failed to update plan state: {0}")]
    Persistence(String),
}

impl SessionError {
    /// Whether this failure came from the wire rather than the protocol.
    pub fn is_transport(&self) -> bool {
        matches!(self, SessionError::Transport(_))
    }
}
