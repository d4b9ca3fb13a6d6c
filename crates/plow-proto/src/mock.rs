// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::{
    build_payload, ChunkStream, PlanTransport, RequestMetadata, StreamChunk, StreamState,
    BUILD_PHASE, DESCRIPTION_PHASE,
};

/// A pre-scripted transport. Each call to `propose` pops the next chunk
/// script from the front of the queue, so tests can specify exact stream
/// sequences — including errors — without network access.
pub struct ScriptedTransport {
    scripts: Arc<Mutex<Vec<Vec<anyhow::Result<StreamChunk>>>>>,
    /// Optional delay inserted before each chunk, for tests that exercise
    /// timing (dispatch serialization, render ticking).
    chunk_delay: Option<Duration>,
    /// Proposal ids passed to `abort`, for assertion.
    pub aborted: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Vec<anyhow::Result<StreamChunk>>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            chunk_delay: None,
            aborted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Insert `delay` before each emitted chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Convenience: a full well-formed session — id, reply fragments, the
    /// description (with its phase marker), build payloads for each file,
    /// then `Finished`.
    pub fn full_session(
        id: &str,
        reply_fragments: &[&str],
        description_json: &str,
        files: &[(&str, &str)],
    ) -> Self {
        let mut chunks: Vec<anyhow::Result<StreamChunk>> = Vec::new();
        chunks.push(Ok(StreamChunk::new(StreamState::Replying, id)));
        for f in reply_fragments {
            chunks.push(Ok(StreamChunk::new(StreamState::Replying, *f)));
        }
        chunks.push(Ok(StreamChunk::new(StreamState::Describing, DESCRIPTION_PHASE)));
        chunks.push(Ok(StreamChunk::new(StreamState::Describing, description_json)));
        if !files.is_empty() {
            chunks.push(Ok(StreamChunk::new(StreamState::Building, BUILD_PHASE)));
            for (path, payload) in files {
                chunks.push(Ok(StreamChunk::new(
                    StreamState::Building,
                    build_payload(path, payload),
                )));
            }
        }
        chunks.push(Ok(StreamChunk::new(StreamState::Finished, "")));
        Self::new(vec![chunks])
    }

    /// Convenience: a reply-only session whose description reports no plan.
    pub fn reply_only(id: &str, reply_fragments: &[&str], response_timestamp: &str) -> Self {
        let desc = format!(
            r#"{{"madePlan":false,"files":[],"responseTimestamp":"{response_timestamp}"}}"#
        );
        Self::full_session(id, reply_fragments, &desc, &[])
    }

    /// Convenience: a stream that assigns an id and then fails mid-reply.
    pub fn failing_stream(id: &str, message: &str) -> Self {
        let chunks: Vec<anyhow::Result<StreamChunk>> = vec![
            Ok(StreamChunk::new(StreamState::Replying, id)),
            Err(anyhow::anyhow!("{message}")),
        ];
        Self::new(vec![chunks])
    }
}

#[async_trait]
impl PlanTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn propose(
        &self,
        _prompt: &str,
        _parent_id: Option<&str>,
        _root_id: Option<&str>,
    ) -> anyhow::Result<(RequestMetadata, ChunkStream)> {
        let chunks = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                vec![Ok(StreamChunk::new(StreamState::Finished, ""))]
            } else {
                scripts.remove(0)
            }
        };
        let meta = RequestMetadata { prompt_token_count: 5 };
        let stream: ChunkStream = match self.chunk_delay {
            None => Box::pin(futures::stream::iter(chunks)),
            Some(delay) => Box::pin(futures::stream::iter(chunks).then(move |c| async move {
                tokio::time::sleep(delay).await;
                c
            })),
        };
        Ok((meta, stream))
    }

    async fn abort(&self, proposal_id: &str) -> anyhow::Result<()> {
        self.aborted.lock().unwrap().push(proposal_id.to_string());
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
