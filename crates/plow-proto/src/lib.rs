// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wire types and transport contract for the plan-proposal stream.

pub mod http;
pub mod mock;
pub mod transport;
pub mod types;

pub use http::HttpTransport;
pub use mock::ScriptedTransport;
pub use transport::{ChunkStream, PlanTransport, RequestMetadata};
pub use types::{
    build_payload, split_build_payload, BuiltFile, PlanDescription, StreamChunk, StreamState,
    BUILD_PHASE, DESCRIPTION_PHASE,
};
