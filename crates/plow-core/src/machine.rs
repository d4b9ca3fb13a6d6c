// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The proposal state machine: applies one stream update at a time to the
//! session state and drives the collaborators (plan store, conversation
//! log, terminal view). Single-writer by construction — only the dispatch
//! task calls [`ProposalMachine::apply`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use plow_proto::{
    split_build_payload, BuiltFile, PlanDescription, StreamChunk, StreamState, BUILD_PHASE,
    DESCRIPTION_PHASE,
};

use crate::decode::{BuildRow, ChunkDecoder};
use crate::error::SessionError;
use crate::reply::ReplyBuffer;

// ─── Collaborator contracts ──────────────────────────────────────────────────

/// Plan metadata persisted across proposals in one plan directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanState {
    #[serde(default)]
    pub proposal_id: String,
    #[serde(default)]
    pub root_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<PlanDescription>,
    #[serde(default)]
    pub updated_at: String,
}

/// Plan-state persistence. Read once at session start, written after id
/// assignment and after the description parse; save failures are fatal.
pub trait PlanStore: Send + 'static {
    fn load(&self) -> anyhow::Result<PlanState>;
    fn save(&self, state: &PlanState, timestamp: &str) -> anyhow::Result<()>;
    /// Persist one completed file payload from the build phase.
    fn save_built_file(&self, file: &BuiltFile) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct AppendConversationParams {
    pub timestamp: String,
    pub response_timestamp: String,
    pub prompt: String,
    pub prompt_tokens: usize,
    pub reply: String,
    pub reply_tokens: usize,
}

/// Append-only conversation log. A failed append is reported but never
/// aborts the session.
pub trait ConversationLog: Send + 'static {
    fn append(&self, params: &AppendConversationParams) -> anyhow::Result<()>;
}

/// Everything the session paints on the terminal. Implementations own the
/// spinner and the terminal-mode transitions; every method must be
/// idempotent for a given argument so a repeated render is harmless.
#[async_trait]
pub trait SessionView: Send + 'static {
    /// Transient "sending" indicator shown before the first chunk arrives.
    async fn show_sending(&mut self);
    /// First reply text is about to render: stop the indicator and switch
    /// to the full-screen reply mode.
    async fn reveal_reply(&mut self);
    /// Repaint the streaming reply (called from the render ticker).
    async fn render_reply(&mut self, markdown: &str);
    /// The reply is complete: leave full-screen mode, print the final text
    /// on the main screen, and show a quiet progress indicator again.
    async fn end_reply(&mut self, markdown: &str);
    /// The build phase starts for these paths.
    async fn begin_build(&mut self, files: &[String]);
    /// Rewrite the per-file status table in place.
    async fn render_build(&mut self, rows: &[BuildRow], all_done: bool);
    /// Non-fatal notice (e.g. a failed conversation-log append).
    async fn show_notice(&mut self, message: &str);
    /// Fatal error display; nothing renders after this.
    async fn show_error(&mut self, message: &str);
    /// Completion menu, contextual on whether files were produced.
    async fn show_next_steps(&mut self, summary: &SessionSummary);
}

// ─── Session state ───────────────────────────────────────────────────────────

/// Aggregate state for one proposal, mutated exclusively through
/// [`ProposalMachine::apply`].
#[derive(Debug, Default)]
pub struct SessionState {
    pub proposal_id: Option<String>,
    pub reply: ReplyBuffer,
    pub description: Option<PlanDescription>,
    pub decoder: ChunkDecoder,
    pub stream_finished: bool,
    pub all_files_finished: bool,
}

impl SessionState {
    /// The session's completion condition.
    pub fn complete(&self) -> bool {
        self.stream_finished && self.all_files_finished
    }
}

/// What the session produced, for the completion menu and the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub proposal_id: String,
    pub made_plan: bool,
    pub files: Vec<String>,
    pub reply_tokens: usize,
}

/// Reply snapshot published for the render ticker. The `watch` channel's
/// changed-flag doubles as the dirty flag; `live` turns false once the
/// reply phase ends so the ticker can stop.
#[derive(Debug, Clone)]
pub struct ReplyFrame {
    pub text: String,
    pub live: bool,
}

impl Default for ReplyFrame {
    fn default() -> Self {
        Self { text: String::new(), live: true }
    }
}

/// Receivers handed to the driver when a machine is built.
pub struct MachineChannels {
    pub reply_rx: watch::Receiver<ReplyFrame>,
    /// Proposal id, available once the first chunk assigned it.
    pub proposal_rx: watch::Receiver<Option<String>>,
}

/// ISO-8601 UTC timestamp with millisecond precision, the wire/persistence
/// timestamp format.
pub fn string_ts() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

// ─── The machine ─────────────────────────────────────────────────────────────

pub struct ProposalMachine<S, L, V> {
    state: SessionState,
    store: S,
    log: L,
    view: Arc<Mutex<V>>,
    plan: PlanState,
    prompt: String,
    prompt_tokens: usize,
    submitted_at: Instant,
    reveal_delay: Duration,
    /// Submission timestamp, recorded once for the conversation log.
    timestamp: String,
    reply_tx: watch::Sender<ReplyFrame>,
    proposal_tx: watch::Sender<Option<String>>,
}

impl<S, L, V> ProposalMachine<S, L, V>
where
    S: PlanStore,
    L: ConversationLog,
    V: SessionView,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: S,
        log: L,
        view: Arc<Mutex<V>>,
        plan: PlanState,
        prompt: String,
        prompt_tokens: usize,
        submitted_at: Instant,
        reveal_delay: Duration,
    ) -> (Self, MachineChannels) {
        let (reply_tx, reply_rx) = watch::channel(ReplyFrame::default());
        let (proposal_tx, proposal_rx) = watch::channel(None);
        let machine = Self {
            state: SessionState::default(),
            store,
            log,
            view,
            plan,
            prompt,
            prompt_tokens,
            submitted_at,
            reveal_delay,
            timestamp: string_ts(),
            reply_tx,
            proposal_tx,
        };
        (machine, MachineChannels { reply_rx, proposal_rx })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Apply one stream update. Returns `Ok(true)` once the session has
    /// completed (stream finished AND all files finished), `Ok(false)` to
    /// keep going, `Err` on any fatal condition.
    pub async fn apply(
        &mut self,
        update: anyhow::Result<StreamChunk>,
    ) -> Result<bool, SessionError> {
        let chunk = match update {
            Ok(c) => c,
            Err(e) => return Err(SessionError::Transport(format!("{e:#}"))),
        };

        // The first chunk carries the proposal id; everything else waits
        // until the id has been assigned and persisted.
        if self.state.proposal_id.is_none() {
            return self.assign_proposal_id(chunk).await;
        }

        if !self.state.reply.started() {
            // Hold back the first paint so a near-instant response does not
            // flash the screen. UX floor, not a correctness condition.
            let elapsed = self.submitted_at.elapsed();
            if elapsed < self.reveal_delay {
                tokio::time::sleep(self.reveal_delay - elapsed).await;
            }
            self.view.lock().await.reveal_reply().await;
            self.state.reply.mark_started();
        }

        match chunk.state {
            StreamState::Replying | StreamState::Revising => {
                if self.state.stream_finished {
                    return Err(SessionError::ChunkAfterFinish { state: chunk.state });
                }
                self.state.reply.append(&chunk.content);
                let _ = self.reply_tx.send(ReplyFrame {
                    text: self.state.reply.text().to_string(),
                    live: true,
                });
                Ok(false)
            }

            StreamState::Describing => self.apply_describing(chunk).await,

            StreamState::Building => self.apply_building(chunk).await,

            StreamState::Finished => {
                self.state.stream_finished = true;
                if self.state.description.is_none() {
                    // The server must describe the plan before finishing;
                    // waiting here would hang the session forever.
                    return Err(SessionError::FinishedWithoutDescription);
                }
                Ok(self.state.complete())
            }
        }
    }

    /// Session summary once `apply` returned `Ok(true)`.
    pub fn summary(&mut self) -> SessionSummary {
        let desc = self.state.description.clone().unwrap_or(PlanDescription {
            made_plan: false,
            files: Vec::new(),
            response_timestamp: String::new(),
        });
        SessionSummary {
            proposal_id: self.state.proposal_id.clone().unwrap_or_default(),
            made_plan: desc.made_plan && !desc.files.is_empty(),
            files: desc.files,
            reply_tokens: self.state.reply.finish(),
        }
    }

    async fn assign_proposal_id(&mut self, chunk: StreamChunk) -> Result<bool, SessionError> {
        if chunk.content.is_empty() {
            return Err(SessionError::MissingProposalId);
        }
        let id = chunk.content;
        if self.plan.root_id.is_empty() {
            self.plan.root_id = id.clone();
        }
        self.plan.proposal_id = id.clone();
        self.store
            .save(&self.plan, &string_ts())
            .map_err(|e| SessionError::Persistence(format!("{e:#}")))?;
        debug!(proposal_id = %id, "proposal id assigned");
        self.state.proposal_id = Some(id.clone());
        let _ = self.proposal_tx.send(Some(id));
        Ok(false)
    }

    async fn apply_describing(&mut self, chunk: StreamChunk) -> Result<bool, SessionError> {
        if self.state.stream_finished {
            return Err(SessionError::ChunkAfterFinish { state: chunk.state });
        }

        if chunk.content == DESCRIPTION_PHASE {
            // Reply phase is over: publish the closing frame so the render
            // ticker stops, then let the view restore the main screen.
            let final_text = self.state.reply.text().to_string();
            let _ = self.reply_tx.send(ReplyFrame { text: final_text.clone(), live: false });
            self.view.lock().await.end_reply(&final_text).await;
            return Ok(false);
        }

        if self.state.description.is_some() {
            return Err(SessionError::DuplicateDescription);
        }
        let desc: PlanDescription =
            serde_json::from_str(&chunk.content).map_err(SessionError::BadDescription)?;

        let reply_tokens = self.state.reply.finish();
        self.plan.description = Some(desc.clone());

        let params = AppendConversationParams {
            timestamp: self.timestamp.clone(),
            response_timestamp: desc.response_timestamp.clone(),
            prompt: self.prompt.clone(),
            prompt_tokens: self.prompt_tokens,
            reply: self.state.reply.text().to_string(),
            reply_tokens,
        };
        if let Err(e) = self.log.append(&params) {
            warn!("failed to append conversation: {e:#}");
            self.view
                .lock()
                .await
                .show_notice(&format!("failed to append conversation: {e}"))
                .await;
        }

        self.store
            .save(&self.plan, &string_ts())
            .map_err(|e| SessionError::Persistence(format!("{e:#}")))?;

        if desc.made_plan && !desc.files.is_empty() {
            self.state.decoder.register(&desc.files)?;
            self.view.lock().await.begin_build(&desc.files).await;
        } else {
            // No build phase will occur.
            self.state.all_files_finished = true;
        }
        self.state.description = Some(desc);
        Ok(self.state.complete())
    }

    async fn apply_building(&mut self, chunk: StreamChunk) -> Result<bool, SessionError> {
        if chunk.content == BUILD_PHASE {
            // Phase marker only; the description already set everything up.
            return Ok(false);
        }
        if self.state.description.is_none() {
            return Err(SessionError::BuildBeforeDescription);
        }

        let (path, fragment) =
            split_build_payload(&chunk.content).ok_or(SessionError::MissingFilePath)?;
        let completed = self.state.decoder.decode(path, fragment)?;

        if let Some(record) = completed {
            self.store
                .save_built_file(&record)
                .map_err(|e| SessionError::Persistence(format!("{e:#}")))?;
            if self.state.decoder.all_finished() {
                self.state.all_files_finished = true;
            }
        }

        let rows = self.state.decoder.rows();
        self.view
            .lock()
            .await
            .render_build(&rows, self.state.all_files_finished)
            .await;

        Ok(self.state.complete())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use plow_proto::build_payload;

    use super::*;

    // Recording collaborators. Every call is appended to a shared event log
    // so tests can assert ordering across store, log, and view.

    #[derive(Clone, Default)]
    struct EventLog(Arc<StdMutex<Vec<String>>>);

    impl EventLog {
        fn push(&self, s: impl Into<String>) {
            self.0.lock().unwrap().push(s.into());
        }
        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct MemStore {
        events: EventLog,
        saved: Arc<StdMutex<Vec<PlanState>>>,
        built: Arc<StdMutex<Vec<BuiltFile>>>,
        fail_save: bool,
    }

    impl MemStore {
        fn new(events: EventLog) -> Self {
            Self {
                events,
                saved: Arc::new(StdMutex::new(Vec::new())),
                built: Arc::new(StdMutex::new(Vec::new())),
                fail_save: false,
            }
        }
    }

    impl PlanStore for MemStore {
        fn load(&self) -> anyhow::Result<PlanState> {
            Ok(PlanState::default())
        }
        fn save(&self, state: &PlanState, _timestamp: &str) -> anyhow::Result<()> {
            if self.fail_save {
                anyhow::bail!("disk full");
            }
            self.events.push(format!("save:{}", state.proposal_id));
            self.saved.lock().unwrap().push(state.clone());
            Ok(())
        }
        fn save_built_file(&self, file: &BuiltFile) -> anyhow::Result<()> {
            self.events.push(format!("built:{}", file.path));
            self.built.lock().unwrap().push(file.clone());
            Ok(())
        }
    }

    struct MemLog {
        events: EventLog,
        fail: bool,
    }

    impl ConversationLog for MemLog {
        fn append(&self, params: &AppendConversationParams) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("log unwritable");
            }
            self.events.push(format!("convo:{}t", params.reply_tokens));
            Ok(())
        }
    }

    struct MemView {
        events: EventLog,
    }

    #[async_trait]
    impl SessionView for MemView {
        async fn show_sending(&mut self) {
            self.events.push("sending");
        }
        async fn reveal_reply(&mut self) {
            self.events.push("reveal");
        }
        async fn render_reply(&mut self, markdown: &str) {
            self.events.push(format!("render:{markdown}"));
        }
        async fn end_reply(&mut self, markdown: &str) {
            self.events.push(format!("end_reply:{markdown}"));
        }
        async fn begin_build(&mut self, files: &[String]) {
            self.events.push(format!("begin_build:{}", files.join(",")));
        }
        async fn render_build(&mut self, rows: &[BuildRow], all_done: bool) {
            let done = rows.iter().filter(|r| r.finished).count();
            self.events
                .push(format!("build:{done}/{} done={all_done}", rows.len()));
        }
        async fn show_notice(&mut self, message: &str) {
            self.events.push(format!("notice:{message}"));
        }
        async fn show_error(&mut self, message: &str) {
            self.events.push(format!("error:{message}"));
        }
        async fn show_next_steps(&mut self, _summary: &SessionSummary) {
            self.events.push("next_steps");
        }
    }

    type TestMachine = ProposalMachine<MemStore, MemLog, MemView>;

    fn machine(events: &EventLog) -> (TestMachine, MachineChannels) {
        machine_with(events, MemStore::new(events.clone()), false)
    }

    fn machine_with(
        events: &EventLog,
        store: MemStore,
        fail_log: bool,
    ) -> (TestMachine, MachineChannels) {
        let log = MemLog { events: events.clone(), fail: fail_log };
        let view = Arc::new(Mutex::new(MemView { events: events.clone() }));
        ProposalMachine::new(
            store,
            log,
            view,
            PlanState::default(),
            "build me a thing".to_string(),
            4,
            Instant::now(),
            Duration::ZERO,
        )
    }

    fn chunk(state: StreamState, content: &str) -> anyhow::Result<StreamChunk> {
        Ok(StreamChunk::new(state, content))
    }

    fn desc_json(files: &[&str]) -> String {
        let files: Vec<String> = files.iter().map(|f| format!("\"{f}\"")).collect();
        format!(
            r#"{{"madePlan":{},"files":[{}],"responseTimestamp":"ts-1"}}"#,
            !files.is_empty(),
            files.join(",")
        )
    }

    // ── Proposal id assignment ────────────────────────────────────────────────

    #[tokio::test]
    async fn empty_first_chunk_is_fatal() {
        let events = EventLog::default();
        let (mut m, _ch) = machine(&events);
        let err = m.apply(chunk(StreamState::Replying, "")).await.unwrap_err();
        assert!(matches!(err, SessionError::MissingProposalId));
    }

    #[tokio::test]
    async fn id_is_persisted_before_any_reply_chunk_applies() {
        let events = EventLog::default();
        let (mut m, _ch) = machine(&events);
        m.apply(chunk(StreamState::Replying, "p1")).await.unwrap();
        m.apply(chunk(StreamState::Replying, "Hello")).await.unwrap();

        let evs = events.events();
        let save_pos = evs.iter().position(|e| e == "save:p1").unwrap();
        let reveal_pos = evs.iter().position(|e| e == "reveal").unwrap();
        assert!(save_pos < reveal_pos, "plan state must be saved before the reply renders");
        assert_eq!(m.state().reply.text(), "Hello");
    }

    #[tokio::test]
    async fn root_id_defaults_to_the_first_proposal_id() {
        let events = EventLog::default();
        let store = MemStore::new(events.clone());
        let saved = Arc::clone(&store.saved);
        let (mut m, _ch) = machine_with(&events, store, false);
        m.apply(chunk(StreamState::Replying, "p1")).await.unwrap();
        let st = saved.lock().unwrap();
        assert_eq!(st[0].proposal_id, "p1");
        assert_eq!(st[0].root_id, "p1");
    }

    #[tokio::test]
    async fn plan_save_failure_is_fatal() {
        let events = EventLog::default();
        let mut store = MemStore::new(events.clone());
        store.fail_save = true;
        let (mut m, _ch) = machine_with(&events, store, false);
        let err = m.apply(chunk(StreamState::Replying, "p1")).await.unwrap_err();
        assert!(matches!(err, SessionError::Persistence(_)));
    }

    #[tokio::test]
    async fn proposal_id_is_published_on_the_watch_channel() {
        let events = EventLog::default();
        let (mut m, ch) = machine(&events);
        assert!(ch.proposal_rx.borrow().is_none());
        m.apply(chunk(StreamState::Replying, "p1")).await.unwrap();
        assert_eq!(ch.proposal_rx.borrow().as_deref(), Some("p1"));
    }

    // ── Reply accumulation ────────────────────────────────────────────────────

    #[tokio::test]
    async fn reply_is_concatenation_of_replying_chunks_in_order() {
        let events = EventLog::default();
        let (mut m, ch) = machine(&events);
        m.apply(chunk(StreamState::Replying, "p1")).await.unwrap();
        for frag in ["Hello", " ", "world"] {
            m.apply(chunk(StreamState::Replying, frag)).await.unwrap();
        }
        assert_eq!(m.state().reply.text(), "Hello world");
        assert_eq!(ch.reply_rx.borrow().text, "Hello world");
        assert!(ch.reply_rx.borrow().live);
    }

    #[tokio::test]
    async fn revising_chunks_extend_the_reply_like_replying() {
        let events = EventLog::default();
        let (mut m, _ch) = machine(&events);
        m.apply(chunk(StreamState::Replying, "p1")).await.unwrap();
        m.apply(chunk(StreamState::Replying, "draft")).await.unwrap();
        m.apply(chunk(StreamState::Revising, " revised")).await.unwrap();
        assert_eq!(m.state().reply.text(), "draft revised");
    }

    #[tokio::test]
    async fn reveal_happens_exactly_once() {
        let events = EventLog::default();
        let (mut m, _ch) = machine(&events);
        m.apply(chunk(StreamState::Replying, "p1")).await.unwrap();
        m.apply(chunk(StreamState::Replying, "a")).await.unwrap();
        m.apply(chunk(StreamState::Replying, "b")).await.unwrap();
        let reveals = events.events().iter().filter(|e| *e == "reveal").count();
        assert_eq!(reveals, 1);
    }

    #[tokio::test]
    async fn reveal_waits_out_the_minimum_elapsed_floor() {
        let events = EventLog::default();
        let log = MemLog { events: events.clone(), fail: false };
        let view = Arc::new(Mutex::new(MemView { events: events.clone() }));
        let (mut m, _ch) = ProposalMachine::new(
            MemStore::new(events.clone()),
            log,
            view,
            PlanState::default(),
            "p".into(),
            1,
            Instant::now(),
            Duration::from_millis(80),
        );
        m.apply(chunk(StreamState::Replying, "p1")).await.unwrap();
        let before = Instant::now();
        m.apply(chunk(StreamState::Replying, "hi")).await.unwrap();
        assert!(
            before.elapsed() >= Duration::from_millis(40),
            "reveal must wait out the floor"
        );
    }

    // ── Description phase ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn phase_marker_ends_the_reply_and_stops_the_ticker_frame() {
        let events = EventLog::default();
        let (mut m, ch) = machine(&events);
        m.apply(chunk(StreamState::Replying, "p1")).await.unwrap();
        m.apply(chunk(StreamState::Replying, "reply text")).await.unwrap();
        m.apply(chunk(StreamState::Describing, DESCRIPTION_PHASE)).await.unwrap();
        assert!(!ch.reply_rx.borrow().live);
        assert!(events.events().contains(&"end_reply:reply text".to_string()));
    }

    #[tokio::test]
    async fn malformed_description_is_fatal_and_produces_no_build_output() {
        let events = EventLog::default();
        let (mut m, _ch) = machine(&events);
        m.apply(chunk(StreamState::Replying, "p1")).await.unwrap();
        m.apply(chunk(StreamState::Describing, DESCRIPTION_PHASE)).await.unwrap();
        let err = m
            .apply(chunk(StreamState::Describing, "{not json"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::BadDescription(_)));
        assert!(!events.events().iter().any(|e| e.starts_with("begin_build")
            || e.starts_with("build:")));
    }

    #[tokio::test]
    async fn description_without_files_completes_the_file_side_immediately() {
        let events = EventLog::default();
        let (mut m, _ch) = machine(&events);
        m.apply(chunk(StreamState::Replying, "p1")).await.unwrap();
        m.apply(chunk(StreamState::Describing, DESCRIPTION_PHASE)).await.unwrap();
        let done = m
            .apply(chunk(StreamState::Describing, &desc_json(&[])))
            .await
            .unwrap();
        assert!(!done, "stream not finished yet");
        assert!(m.state().all_files_finished);
        let done = m.apply(chunk(StreamState::Finished, "")).await.unwrap();
        assert!(done, "no-files session completes on Finished");
    }

    #[tokio::test]
    async fn second_description_payload_is_a_protocol_error() {
        let events = EventLog::default();
        let (mut m, _ch) = machine(&events);
        m.apply(chunk(StreamState::Replying, "p1")).await.unwrap();
        m.apply(chunk(StreamState::Describing, DESCRIPTION_PHASE)).await.unwrap();
        m.apply(chunk(StreamState::Describing, &desc_json(&[]))).await.unwrap();
        let err = m
            .apply(chunk(StreamState::Describing, &desc_json(&[])))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::DuplicateDescription));
    }

    #[tokio::test]
    async fn failed_conversation_append_is_a_notice_not_an_abort() {
        let events = EventLog::default();
        let store = MemStore::new(events.clone());
        let (mut m, _ch) = machine_with(&events, store, true);
        m.apply(chunk(StreamState::Replying, "p1")).await.unwrap();
        m.apply(chunk(StreamState::Describing, DESCRIPTION_PHASE)).await.unwrap();
        let res = m
            .apply(chunk(StreamState::Describing, &desc_json(&[])))
            .await;
        assert!(res.is_ok(), "append failure must not abort the session");
        assert!(events.events().iter().any(|e| e.starts_with("notice:")));
    }

    // ── Build phase and completion ────────────────────────────────────────────

    async fn drive_to_building(m: &mut TestMachine, files: &[&str]) {
        m.apply(chunk(StreamState::Replying, "p1")).await.unwrap();
        m.apply(chunk(StreamState::Replying, "reply")).await.unwrap();
        m.apply(chunk(StreamState::Describing, DESCRIPTION_PHASE)).await.unwrap();
        m.apply(chunk(StreamState::Describing, &desc_json(files))).await.unwrap();
        m.apply(chunk(StreamState::Building, BUILD_PHASE)).await.unwrap();
    }

    fn file_chunk(path: &str) -> anyhow::Result<StreamChunk> {
        let payload = format!(r#"{{"path":"{path}","content":"data"}}"#);
        chunk(StreamState::Building, &build_payload(path, &payload))
    }

    #[tokio::test]
    async fn completion_requires_both_files_and_finished_files_first() {
        let events = EventLog::default();
        let (mut m, _ch) = machine(&events);
        drive_to_building(&mut m, &["a", "b"]).await;

        assert!(!m.apply(file_chunk("a")).await.unwrap());
        assert!(!m.apply(file_chunk("b")).await.unwrap());
        assert!(m.state().all_files_finished);
        assert!(!m.state().complete());

        assert!(m.apply(chunk(StreamState::Finished, "")).await.unwrap());
    }

    #[tokio::test]
    async fn completion_requires_both_finished_first_then_files_drain() {
        let events = EventLog::default();
        let (mut m, _ch) = machine(&events);
        drive_to_building(&mut m, &["a", "b"]).await;

        assert!(!m.apply(chunk(StreamState::Finished, "")).await.unwrap());
        assert!(m.state().stream_finished);

        assert!(!m.apply(file_chunk("a")).await.unwrap());
        assert!(m.apply(file_chunk("b")).await.unwrap(), "last file completes the session");
    }

    #[tokio::test]
    async fn completed_files_are_persisted_through_the_store() {
        let events = EventLog::default();
        let store = MemStore::new(events.clone());
        let built = Arc::clone(&store.built);
        let (mut m, _ch) = machine_with(&events, store, false);
        drive_to_building(&mut m, &["a"]).await;
        m.apply(file_chunk("a")).await.unwrap();
        assert_eq!(built.lock().unwrap().len(), 1);
        assert_eq!(built.lock().unwrap()[0].path, "a");
    }

    #[tokio::test]
    async fn build_phase_marker_is_a_no_op() {
        let events = EventLog::default();
        let (mut m, _ch) = machine(&events);
        drive_to_building(&mut m, &["a"]).await;
        let before = events.events().len();
        m.apply(chunk(StreamState::Building, BUILD_PHASE)).await.unwrap();
        assert_eq!(events.events().len(), before);
    }

    #[tokio::test]
    async fn build_chunk_before_description_is_fatal() {
        let events = EventLog::default();
        let (mut m, _ch) = machine(&events);
        m.apply(chunk(StreamState::Replying, "p1")).await.unwrap();
        let err = m.apply(file_chunk("a")).await.unwrap_err();
        assert!(matches!(err, SessionError::BuildBeforeDescription));
    }

    #[tokio::test]
    async fn partial_file_payload_keeps_streaming() {
        let events = EventLog::default();
        let (mut m, _ch) = machine(&events);
        drive_to_building(&mut m, &["a"]).await;
        let half = build_payload("a", r#"{"path":"a","#);
        assert!(!m.apply(chunk(StreamState::Building, &half)).await.unwrap());
        assert!(!m.state().all_files_finished);
        let rest = build_payload("a", r#""content":"x"}"#);
        m.apply(chunk(StreamState::Building, &rest)).await.unwrap();
        assert!(m.state().all_files_finished);
    }

    // ── Finished / failure ordering ───────────────────────────────────────────

    #[tokio::test]
    async fn finished_without_description_fails_instead_of_hanging() {
        let events = EventLog::default();
        let (mut m, _ch) = machine(&events);
        m.apply(chunk(StreamState::Replying, "p1")).await.unwrap();
        m.apply(chunk(StreamState::Replying, "Hello")).await.unwrap();
        m.apply(chunk(StreamState::Replying, " world")).await.unwrap();
        let err = m.apply(chunk(StreamState::Finished, "")).await.unwrap_err();
        assert!(matches!(err, SessionError::FinishedWithoutDescription));
    }

    #[tokio::test]
    async fn reply_chunk_after_finished_is_a_protocol_error() {
        let events = EventLog::default();
        let (mut m, _ch) = machine(&events);
        drive_to_building(&mut m, &["a"]).await;
        m.apply(chunk(StreamState::Finished, "")).await.unwrap();
        let err = m.apply(chunk(StreamState::Replying, "late")).await.unwrap_err();
        assert!(matches!(err, SessionError::ChunkAfterFinish { .. }));
    }

    #[tokio::test]
    async fn transport_error_update_is_fatal() {
        let events = EventLog::default();
        let (mut m, _ch) = machine(&events);
        m.apply(chunk(StreamState::Replying, "p1")).await.unwrap();
        let err = m
            .apply(Err(anyhow::anyhow!("connection reset")))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    // ── Summary ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn summary_reflects_files_and_tokens() {
        let events = EventLog::default();
        let (mut m, _ch) = machine(&events);
        drive_to_building(&mut m, &["a"]).await;
        m.apply(file_chunk("a")).await.unwrap();
        m.apply(chunk(StreamState::Finished, "")).await.unwrap();
        let s = m.summary();
        assert_eq!(s.proposal_id, "p1");
        assert!(s.made_plan);
        assert_eq!(s.files, vec!["a"]);
        assert!(s.reply_tokens >= 1);
    }
}
