// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session orchestration: wires the transport stream, the dispatch task,
//! the render ticker, and the keyboard into one select loop and runs a
//! proposal from prompt to completion or cancellation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info};

use plow_proto::PlanTransport;

use crate::dispatch::spawn_dispatch;
use crate::error::SessionError;
use crate::machine::{
    ConversationLog, PlanStore, ProposalMachine, SessionSummary, SessionView,
};
use crate::render::spawn_render_ticker;

/// A keyboard event, already decoded from whatever the terminal backend
/// produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Esc,
    Enter,
    CtrlC,
    Other,
}

/// What a handled key means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Continue,
    /// Stop the session; the handler has already told the server.
    Stop,
}

/// Hotkey policy. The handler owns any side effects (e.g. sending the
/// server-side abort); the driver only acts on the returned outcome.
#[async_trait]
pub trait KeyCommands: Send {
    async fn dispatch(
        &mut self,
        key: Key,
        proposal_id: Option<&str>,
    ) -> anyhow::Result<KeyOutcome>;
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Minimum time between prompt submission and the first reply paint.
    pub reveal_delay: Duration,
    /// Reply repaint period.
    pub render_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reveal_delay: Duration::from_millis(700),
            render_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum SessionOutcome {
    Completed(SessionSummary),
    Cancelled,
}

pub struct SessionDriver<S, L, V, K> {
    transport: Arc<dyn PlanTransport>,
    store: S,
    log: L,
    view: Arc<Mutex<V>>,
    keys_handler: K,
    options: SessionOptions,
}

impl<S, L, V, K> SessionDriver<S, L, V, K>
where
    S: PlanStore,
    L: ConversationLog,
    V: SessionView,
    K: KeyCommands,
{
    pub fn new(
        transport: Arc<dyn PlanTransport>,
        store: S,
        log: L,
        view: Arc<Mutex<V>>,
        keys_handler: K,
        options: SessionOptions,
    ) -> Self {
        Self { transport, store, log, view, keys_handler, options }
    }

    /// Run one proposal to completion. `keys` feeds decoded keyboard events;
    /// closing it disables hotkeys without ending the session.
    pub async fn run(
        mut self,
        prompt: String,
        mut keys: mpsc::Receiver<anyhow::Result<Key>>,
    ) -> anyhow::Result<SessionOutcome> {
        let plan = self.store.load()?;
        let parent_id = (!plan.proposal_id.is_empty()).then(|| plan.proposal_id.clone());
        let root_id = (!plan.root_id.is_empty()).then(|| plan.root_id.clone());

        self.view.lock().await.show_sending().await;
        let submitted_at = Instant::now();

        let (metadata, mut stream) = self
            .transport
            .propose(&prompt, parent_id.as_deref(), root_id.as_deref())
            .await?;
        debug!(
            transport = self.transport.name(),
            prompt_tokens = metadata.prompt_token_count,
            "proposal submitted"
        );
        let prompt_tokens = if metadata.prompt_token_count > 0 {
            metadata.prompt_token_count
        } else {
            (prompt.len() / 4).max(1)
        };

        let (machine, channels) = ProposalMachine::new(
            self.store,
            self.log,
            Arc::clone(&self.view),
            plan,
            prompt,
            prompt_tokens,
            submitted_at,
            self.options.reveal_delay,
        );
        let handle = spawn_dispatch(machine);

        // Forward the transport stream into the dispatch mailbox. Dropping
        // the queue clone on stream end lets the dispatch task observe
        // hangup if the server never completed the session.
        let queue = handle.queue.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(update) = stream.next().await {
                queue.push(update);
            }
        });

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ticker = spawn_render_ticker(
            channels.reply_rx,
            Arc::clone(&self.view),
            self.options.render_interval,
            cancel_rx,
        );

        let proposal_rx = channels.proposal_rx;
        let mut done = handle.done;
        let mut keys_open = true;
        let outcome: anyhow::Result<SessionOutcome> = loop {
            tokio::select! {
                // Completion wins over a racing keypress.
                biased;
                res = &mut done => {
                    break match res {
                        Ok(Ok(summary)) => Ok(SessionOutcome::Completed(summary)),
                        Ok(Err(e)) => Err(e.into()),
                        Err(_) => Err(SessionError::Transport(
                            "dispatch task ended unexpectedly".to_string(),
                        )
                        .into()),
                    };
                }
                key = keys.recv(), if keys_open => {
                    match key {
                        None => keys_open = false,
                        Some(Err(e)) => break Err(e.context("keyboard input failed")),
                        Some(Ok(key)) => {
                            let proposal_id = proposal_rx.borrow().clone();
                            match self
                                .keys_handler
                                .dispatch(key, proposal_id.as_deref())
                                .await
                            {
                                Ok(KeyOutcome::Continue) => {}
                                Ok(KeyOutcome::Stop) => {
                                    info!("session stopped from the keyboard");
                                    break Ok(SessionOutcome::Cancelled);
                                }
                                Err(e) => break Err(e),
                            }
                        }
                    }
                }
            }
        };

        // Every exit, fatal or not, shuts down the same way: stop the
        // ticker before touching the view again so nothing repaints over
        // the final display.
        let _ = cancel_tx.send(true);
        forwarder.abort();
        handle.task.abort();
        let _ = ticker.await;

        match outcome {
            Ok(SessionOutcome::Completed(summary)) => {
                self.view.lock().await.show_next_steps(&summary).await;
                Ok(SessionOutcome::Completed(summary))
            }
            Ok(SessionOutcome::Cancelled) => {
                self.view.lock().await.show_notice("stopped").await;
                Ok(SessionOutcome::Cancelled)
            }
            Err(e) => {
                self.view.lock().await.show_error(&e.to_string()).await;
                Err(e)
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
