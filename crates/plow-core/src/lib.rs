// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Streaming proposal controller: state machine, serialized dispatch,
//! render scheduling, and the session driver.

pub mod decode;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod machine;
pub mod render;
pub mod reply;

pub use decode::{BuildRow, ChunkDecoder, FileBuildState};
pub use dispatch::{spawn_dispatch, ApplyUpdate, DispatchHandle, DispatchQueue};
pub use driver::{Key, KeyCommands, KeyOutcome, SessionDriver, SessionOptions, SessionOutcome};
pub use error::SessionError;
pub use machine::{
    string_ts, AppendConversationParams, ConversationLog, MachineChannels, PlanState, PlanStore,
    ProposalMachine, ReplyFrame, SessionState, SessionSummary, SessionView,
};
pub use render::spawn_render_ticker;
pub use reply::ReplyBuffer;
