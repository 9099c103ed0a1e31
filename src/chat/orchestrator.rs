//! Session orchestrator.
//!
//! One [`Orchestrator`] runs per connection as an actor task.  Client
//! events, provider callbacks and tool progress all arrive through
//! channels and are handled one at a time on that task, so the
//! [`ChatSession`] it owns is never touched concurrently.
//!
//! Model turns and tool runs are spawned.  Each is wrapped in a
//! supervisor that reports back when the worker exits, so a worker
//! that panics or returns without a terminal callback still brings the
//! session back to idle.
//!
//! ```text
//! Idle ──user_message──▶ Turn ──on_end──▶ Idle
//!                         │  └──on_end + pending──▶ Awaiting approval
//!                         │  └──on_end + deferred only──▶ Turn (resume)
//!                         └──on_error──▶ Idle
//! Awaiting approval ──deny / approve + write──▶ Turn (resume)
//! ```

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt as _;
use tracing::{debug, error, info, warn};

use super::errors::classify;
use super::session::ChatSession;
use super::types::{
    AssistantBlock, ClientEvent, CompletionReason, ServerEvent, StatusUpdate, ToolResultPayload,
    ToolUse,
};
use crate::llm::{ChatProvider, ProviderError, TurnHandler};
use crate::metrics::{Counter, Metrics, Timer};
use crate::tools::{FileWriter, ToolError, ToolProgress};

pub const NO_PENDING_TOOL: &str = "no_pending_tool";
pub const TOOL_INPUT_INVALID: &str = "tool_input_invalid";
pub const TOOL_ERROR: &str = "tool_error";
/// Result code recorded for tool blocks beyond the first in one turn.
pub const EXTRA_TOOL_USE: &str = "extra_tool_use";

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub provider: Arc<dyn ChatProvider>,
    pub writer: Arc<dyn FileWriter>,
    pub metrics: Arc<Metrics>,
}

// ── Inbox ───────────────────────────────────────────────────

/// A provider callback, captured for replay on the session task.
#[derive(Debug)]
enum TurnEvent {
    Text(String),
    Tool(ToolUse),
    Status(Map<String, Value>),
    End(Vec<AssistantBlock>),
    Error(ProviderError),
}

#[derive(Debug)]
enum ToolEvent {
    Progress(ToolProgress),
    Failed(ToolError),
    /// The tool worker is gone; only meaningful if no terminal event came first.
    Exited(Option<String>),
}

#[derive(Debug)]
enum SessionInput {
    Turn { turn: u64, event: TurnEvent },
    TurnExited { turn: u64, panic: Option<String> },
    Tool { tool_use_id: String, event: ToolEvent },
}

/// [`TurnHandler`] that forwards every callback into the session inbox,
/// tagged with the turn it belongs to.
struct TurnSink {
    turn: u64,
    tx: mpsc::UnboundedSender<SessionInput>,
}

impl TurnSink {
    fn send(&self, event: TurnEvent) {
        let _ = self.tx.send(SessionInput::Turn {
            turn: self.turn,
            event,
        });
    }
}

impl TurnHandler for TurnSink {
    fn on_text(&self, text: &str) {
        self.send(TurnEvent::Text(text.to_string()));
    }

    fn on_tool(&self, tool: ToolUse) {
        self.send(TurnEvent::Tool(tool));
    }

    fn on_status(&self, status: Map<String, Value>) {
        self.send(TurnEvent::Status(status));
    }

    fn on_end(&self, content: Vec<AssistantBlock>) {
        self.send(TurnEvent::End(content));
    }

    fn on_error(&self, error: ProviderError) {
        self.send(TurnEvent::Error(error));
    }
}

// ── Orchestrator ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnKind {
    /// Started by a user message.
    Initial,
    /// Started after a tool result was recorded.
    Resume,
}

impl TurnKind {
    fn timer(self) -> Timer {
        match self {
            TurnKind::Initial => Timer::AnthropicStream,
            TurnKind::Resume => Timer::AnthropicResume,
        }
    }
}

struct InFlightTurn {
    id: u64,
    kind: TurnKind,
    started: Instant,
}

/// A staged `tool_result` that may only be appended once the current
/// turn's assistant blocks are in history.  Staged results keep the
/// order of their tool blocks.
struct DeferredResult {
    tool_use_id: String,
    result: ToolResultPayload,
}

pub struct Orchestrator {
    session: ChatSession,
    deps: SessionDeps,
    out: mpsc::UnboundedSender<ServerEvent>,
    inbox_tx: mpsc::UnboundedSender<SessionInput>,
    inbox_rx: mpsc::UnboundedReceiver<SessionInput>,
    turn_seq: u64,
    turn: Option<InFlightTurn>,
    /// Id of the approved tool currently writing.
    running_tool: Option<String>,
    deferred: Vec<DeferredResult>,
}

impl Orchestrator {
    pub fn new(
        session: ChatSession,
        deps: SessionDeps,
        out: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            session,
            deps,
            out,
            inbox_tx,
            inbox_rx,
            turn_seq: 0,
            turn: None,
            running_tool: None,
            deferred: Vec::new(),
        }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Drive the session until the client side of the channel closes.
    /// Returns the final session state.
    pub async fn run(mut self, mut client_rx: mpsc::UnboundedReceiver<ClientEvent>) -> ChatSession {
        loop {
            tokio::select! {
                event = client_rx.recv() => match event {
                    Some(event) => self.handle_client_event(event),
                    None => break,
                },
                Some(input) = self.inbox_rx.recv() => self.handle_input(input),
            }
        }
        debug!(
            session_id = %self.session.id(),
            active = self.session.active,
            "session loop finished"
        );
        self.session
    }

    fn emit(&self, event: ServerEvent) {
        let _ = self.out.send(event);
    }

    pub fn handle_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::UserMessage { text } => self.handle_user_message(text),
            ClientEvent::ToolApproval {
                tool_use_id,
                approved,
            } => self.handle_tool_approval(tool_use_id, approved),
        }
    }

    /// Answer a client event that arrived while a turn or tool run is
    /// in flight.  Returns `true` if the event was rejected.
    fn reject_if_busy(&self) -> bool {
        if !self.session.active {
            return false;
        }
        self.emit(ServerEvent::StatusUpdate(StatusUpdate::busy()));
        self.deps.metrics.incr(Counter::WsBusyRejections);
        debug!(session_id = %self.session.id(), "event rejected: session busy");
        true
    }

    fn handle_user_message(&mut self, text: String) {
        if self.reject_if_busy() {
            return;
        }
        // An open approval is answered with a denial before the new message.
        if let Some(tool) = self.session.take_pending_tool() {
            info!(
                session_id = %self.session.id(),
                tool_use_id = %tool.id,
                "pending tool denied by new user message"
            );
            self.session
                .record_tool_result(&tool.id, &ToolResultPayload::Denied);
        }
        self.session.add_user_message(text);
        self.deps.metrics.incr(Counter::WsUserMessages);
        self.start_turn(TurnKind::Initial);
    }

    fn handle_tool_approval(&mut self, tool_use_id: String, approved: bool) {
        if self.reject_if_busy() {
            return;
        }
        let matches = self
            .session
            .pending_tool()
            .is_some_and(|pending| pending.id == tool_use_id);
        let Some(tool) = matches.then(|| self.session.take_pending_tool()).flatten() else {
            self.emit(ServerEvent::error(NO_PENDING_TOOL));
            return;
        };

        if !approved {
            info!(session_id = %self.session.id(), tool_use_id = %tool.id, "tool denied");
            self.session
                .record_tool_result(&tool.id, &ToolResultPayload::Denied);
            self.start_turn(TurnKind::Resume);
            return;
        }

        self.deps.metrics.incr(Counter::ToolApprovals);
        if let Err(e) = tool.validate() {
            warn!(
                session_id = %self.session.id(),
                tool_use_id = %tool.id,
                error = %e,
                "approved tool failed validation"
            );
            self.emit(ServerEvent::error(TOOL_INPUT_INVALID));
            self.session
                .record_tool_result(&tool.id, &ToolResultPayload::invalid_tool_input());
            self.start_turn(TurnKind::Resume);
            return;
        }

        info!(
            session_id = %self.session.id(),
            tool_use_id = %tool.id,
            path = %tool.input.path,
            "tool approved"
        );
        self.emit(ServerEvent::StatusUpdate(StatusUpdate {
            tool_running: Some(true),
            file_path: Some(tool.input.path.clone()),
            ..StatusUpdate::default()
        }));
        self.session.active = true;
        self.running_tool = Some(tool.id.clone());
        self.spawn_tool(tool);
    }

    fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Turn { turn, event } => {
                if !self.is_current_turn(turn) {
                    debug!(session_id = %self.session.id(), turn, "stale turn event dropped");
                    return;
                }
                self.handle_turn_event(event);
            }
            SessionInput::TurnExited { turn, panic } => {
                if !self.is_current_turn(turn) {
                    return;
                }
                let reason = panic.unwrap_or_else(|| "turn ended without a result".to_string());
                self.handle_turn_event(TurnEvent::Error(ProviderError::Unexpected(reason)));
            }
            SessionInput::Tool { tool_use_id, event } => {
                if self.running_tool.as_deref() != Some(tool_use_id.as_str()) {
                    return;
                }
                self.handle_tool_event(tool_use_id, event);
            }
        }
    }

    fn is_current_turn(&self, turn: u64) -> bool {
        self.turn.as_ref().is_some_and(|t| t.id == turn)
    }

    // ── Model turns ─────────────────────────────────────────

    fn start_turn(&mut self, kind: TurnKind) {
        self.turn_seq += 1;
        let turn = self.turn_seq;
        self.session.active = true;
        self.turn = Some(InFlightTurn {
            id: turn,
            kind,
            started: Instant::now(),
        });
        self.deps.metrics.incr(Counter::AnthropicRequests);
        debug!(
            session_id = %self.session.id(),
            turn,
            kind = ?kind,
            messages = self.session.history().len(),
            "starting model turn"
        );

        let history = self.session.history().to_vec();
        let provider = Arc::clone(&self.deps.provider);
        let sink = TurnSink {
            turn,
            tx: self.inbox_tx.clone(),
        };
        let worker: JoinHandle<()> = tokio::spawn(async move {
            provider.stream_turn(&history, &sink).await;
        });
        let tx = self.inbox_tx.clone();
        tokio::spawn(async move {
            let panic = worker.await.err().map(|e| e.to_string());
            let _ = tx.send(SessionInput::TurnExited { turn, panic });
        });
    }

    /// Close the in-flight turn and record its duration.
    fn finish_turn(&mut self) {
        if let Some(turn) = self.turn.take() {
            self.deps
                .metrics
                .observe(turn.kind.timer(), turn.started.elapsed());
        }
    }

    fn handle_turn_event(&mut self, event: TurnEvent) {
        match event {
            TurnEvent::Text(text) => self.emit(ServerEvent::AiChunk { text }),
            TurnEvent::Tool(tool) => self.handle_tool_use(tool),
            TurnEvent::Status(raw) => self.forward_status(&raw),
            TurnEvent::End(content) => {
                self.finish_turn();
                self.session.add_assistant_blocks(content);
                self.session.active = false;
                self.emit(ServerEvent::AssistantMessageCompleted {
                    reason: CompletionReason::Ok,
                });
                self.drain_deferred();
            }
            TurnEvent::Error(e) => {
                self.finish_turn();
                self.fail_turn(e);
            }
        }
    }

    fn fail_turn(&mut self, e: ProviderError) {
        error!(session_id = %self.session.id(), error = %e, "model turn failed");
        self.deps.metrics.incr(Counter::AnthropicErrors);
        self.session.active = false;
        self.session.clear_pending_tool();
        self.deferred.clear();
        self.emit(ServerEvent::StatusUpdate(StatusUpdate::typing(false)));
        let classified = classify(&e);
        self.emit(ServerEvent::error_with_detail(
            classified.message,
            classified.detail,
        ));
        self.emit(ServerEvent::AssistantMessageCompleted {
            reason: CompletionReason::Error,
        });
    }

    /// A tool block completed during the turn.  Only the first tool block
    /// of a turn can become a `tool_request`.
    fn handle_tool_use(&mut self, tool: ToolUse) {
        if self.session.pending_tool().is_some() || !self.deferred.is_empty() {
            warn!(
                session_id = %self.session.id(),
                tool_use_id = %tool.id,
                "extra tool block in turn rejected"
            );
            self.deferred.push(DeferredResult {
                tool_use_id: tool.id,
                result: ToolResultPayload::error(
                    EXTRA_TOOL_USE,
                    "only one create_file call is handled per turn",
                ),
            });
            return;
        }
        if let Err(e) = tool.validate() {
            warn!(
                session_id = %self.session.id(),
                tool_use_id = %tool.id,
                error = %e,
                "tool request has invalid input"
            );
            self.emit(ServerEvent::error(TOOL_INPUT_INVALID));
            self.deferred.push(DeferredResult {
                tool_use_id: tool.id,
                result: ToolResultPayload::invalid_tool_input(),
            });
            return;
        }
        self.deps.metrics.incr(Counter::ToolRequests);
        self.session.set_pending_tool(tool.clone());
        self.emit(ServerEvent::ToolRequest(tool));
    }

    fn forward_status(&self, raw: &Map<String, Value>) {
        if let Some(update) = StatusUpdate::from_raw(raw) {
            self.emit(ServerEvent::StatusUpdate(update));
        }
    }

    /// Append staged results.  The model resumes right away unless a tool
    /// from this turn still awaits approval.
    fn drain_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        for deferred in std::mem::take(&mut self.deferred) {
            debug!(
                session_id = %self.session.id(),
                tool_use_id = %deferred.tool_use_id,
                "recording deferred tool result"
            );
            self.session
                .record_tool_result(&deferred.tool_use_id, &deferred.result);
        }
        if self.session.pending_tool().is_none() {
            self.start_turn(TurnKind::Resume);
        }
    }

    // ── Tool runs ───────────────────────────────────────────

    fn spawn_tool(&self, tool: ToolUse) {
        let writer = Arc::clone(&self.deps.writer);
        let tx = self.inbox_tx.clone();
        let id = tool.id;
        let input = tool.input;

        let worker_tx = tx.clone();
        let worker_id = id.clone();
        let worker: JoinHandle<()> = tokio::spawn(async move {
            let mut progress = writer.write(&input.path, &input.content);
            while let Some(item) = progress.next().await {
                let (event, terminal) = match item {
                    Ok(p @ ToolProgress::Chunk { .. }) => (ToolEvent::Progress(p), false),
                    Ok(p @ ToolProgress::Done { .. }) => (ToolEvent::Progress(p), true),
                    Err(e) => (ToolEvent::Failed(e), true),
                };
                let sent = worker_tx.send(SessionInput::Tool {
                    tool_use_id: worker_id.clone(),
                    event,
                });
                if sent.is_err() || terminal {
                    break;
                }
            }
        });
        tokio::spawn(async move {
            let panic = worker.await.err().map(|e| e.to_string());
            let _ = tx.send(SessionInput::Tool {
                tool_use_id: id,
                event: ToolEvent::Exited(panic),
            });
        });
    }

    fn handle_tool_event(&mut self, tool_use_id: String, event: ToolEvent) {
        let result = match event {
            ToolEvent::Progress(ToolProgress::Chunk { chunk, .. }) => {
                self.emit(ServerEvent::ToolChunk { chunk });
                return;
            }
            ToolEvent::Progress(ToolProgress::Done { file_path, size }) => {
                info!(
                    session_id = %self.session.id(),
                    tool_use_id = %tool_use_id,
                    file_path = %file_path,
                    size,
                    "tool finished"
                );
                ToolResultPayload::Ok { file_path, size }
            }
            ToolEvent::Failed(e) => self.tool_failed(&tool_use_id, e),
            ToolEvent::Exited(panic) => {
                let reason =
                    panic.unwrap_or_else(|| "tool run ended without completing".to_string());
                self.tool_failed(&tool_use_id, ToolError::Unexpected(reason))
            }
        };

        self.emit(ServerEvent::StatusUpdate(StatusUpdate {
            tool_running: Some(false),
            ..StatusUpdate::default()
        }));
        self.running_tool = None;
        self.session.record_tool_result(&tool_use_id, &result);
        self.start_turn(TurnKind::Resume);
    }

    fn tool_failed(&self, tool_use_id: &str, e: ToolError) -> ToolResultPayload {
        error!(
            session_id = %self.session.id(),
            tool_use_id = %tool_use_id,
            code = e.code(),
            error = %e,
            "tool execution failed"
        );
        self.deps.metrics.incr(Counter::ToolErrors);
        self.emit(ServerEvent::error_with_detail(TOOL_ERROR, Some(e.to_string())));
        ToolResultPayload::error(e.code(), e.to_string())
    }
}

/// Spawn an orchestrator for a fresh session.
///
/// Returns the session id, the sender for client events and the task
/// handle, which yields the final session once the sender is dropped.
pub fn spawn_session(
    deps: SessionDeps,
    out: mpsc::UnboundedSender<ServerEvent>,
) -> (
    String,
    mpsc::UnboundedSender<ClientEvent>,
    JoinHandle<ChatSession>,
) {
    let session = ChatSession::new();
    let id = session.id().to_string();
    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(session, deps, out);
    let handle = tokio::spawn(orchestrator.run(client_rx));
    (id, client_tx, handle)
}
