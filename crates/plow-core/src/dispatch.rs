// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Serialized update dispatch.
//!
//! Stream updates can arrive faster than the state machine can apply them
//! (the reveal floor alone can hold the first apply for hundreds of
//! milliseconds). A dedicated task owns the machine and drains an unbounded
//! mailbox, so applies never overlap, never reorder, and never drop — the
//! producer side just queues and moves on.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::trace;

use plow_proto::StreamChunk;

use crate::error::SessionError;
use crate::machine::{ConversationLog, PlanStore, ProposalMachine, SessionSummary, SessionView};

/// One state machine as seen by the dispatch task: apply updates until one
/// reports completion or fails, then summarize.
#[async_trait]
pub trait ApplyUpdate: Send + 'static {
    async fn apply(&mut self, update: anyhow::Result<StreamChunk>)
        -> Result<bool, SessionError>;
    fn summary(&mut self) -> SessionSummary;
}

#[async_trait]
impl<S, L, V> ApplyUpdate for ProposalMachine<S, L, V>
where
    S: PlanStore,
    L: ConversationLog,
    V: SessionView,
{
    async fn apply(
        &mut self,
        update: anyhow::Result<StreamChunk>,
    ) -> Result<bool, SessionError> {
        ProposalMachine::apply(self, update).await
    }

    fn summary(&mut self) -> SessionSummary {
        ProposalMachine::summary(self)
    }
}

/// Producer handle into the dispatch mailbox. Cheap to clone; enqueueing
/// never blocks and never fails while the dispatch task is alive.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<anyhow::Result<StreamChunk>>,
}

impl DispatchQueue {
    /// Queue one update for in-order application. Updates sent after the
    /// session ended are discarded by the closed channel.
    pub fn push(&self, update: anyhow::Result<StreamChunk>) {
        let _ = self.tx.send(update);
    }
}

pub struct DispatchHandle {
    pub queue: DispatchQueue,
    /// Resolves once: the session summary on success, the first fatal
    /// error otherwise.
    pub done: oneshot::Receiver<Result<SessionSummary, SessionError>>,
    pub task: JoinHandle<()>,
}

/// Spawn the dispatch task that owns `machine` and applies queued updates
/// one at a time until completion or the first failure.
pub fn spawn_dispatch<M: ApplyUpdate>(mut machine: M) -> DispatchHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<anyhow::Result<StreamChunk>>();
    let (done_tx, done_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut applied: u64 = 0;
        while let Some(update) = rx.recv().await {
            applied += 1;
            match machine.apply(update).await {
                Ok(false) => continue,
                Ok(true) => {
                    trace!(applied, "session complete");
                    let _ = done_tx.send(Ok(machine.summary()));
                    return;
                }
                Err(e) => {
                    trace!(applied, "session failed: {e}");
                    let _ = done_tx.send(Err(e));
                    return;
                }
            }
        }
        // Producers hung up without the machine ever completing.
        let _ = done_tx.send(Err(SessionError::Transport(
            "stream ended before the session completed".to_string(),
        )));
    });

    DispatchHandle { queue: DispatchQueue { tx }, done: done_rx, task }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
