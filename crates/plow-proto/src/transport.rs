use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::StreamChunk;

/// The incremental proposal response. Transport errors surface as the `Err`
/// arm of an item; the stream ends after a `Finished` chunk or an error.
pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamChunk>> + Send>>;

/// Metadata the server returns when it accepts a proposal request.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    /// Server-side token count for the submitted prompt. Zero when the
    /// server did not report one.
    pub prompt_token_count: usize,
}

/// Contract with the remote plan-generation service.
///
/// Implementations must invoke no client-side retry logic: a failed stream
/// is surfaced as-is and the session aborts.
#[async_trait]
pub trait PlanTransport: Send + Sync {
    /// Human-readable transport name for status display.
    fn name(&self) -> &str;

    /// Submit a prompt and return the chunk stream for the new proposal.
    ///
    /// `parent_id` / `root_id` link the proposal into an existing plan
    /// conversation; both are `None` for a fresh plan.
    async fn propose(
        &self,
        prompt: &str,
        parent_id: Option<&str>,
        root_id: Option<&str>,
    ) -> anyhow::Result<(RequestMetadata, ChunkStream)>;

    /// Ask the server to stop generating for the given proposal.
    async fn abort(&self, proposal_id: &str) -> anyhow::Result<()>;
}
