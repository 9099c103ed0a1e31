//! End-to-end session scenarios against a scripted provider and writer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use filegate::chat::types::{
    AssistantBlock, ClientEvent, CompletionReason, CreateFileInput, Message, ServerEvent,
    StatusUpdate, ToolUse, UserBlock,
};
use filegate::chat::{ChatSession, Orchestrator, SessionDeps};
use filegate::llm::{status_map, ChatProvider, ProviderError, TurnHandler};
use filegate::metrics::{Counter, Metrics};
use filegate::tools::{FileWriter, ProgressStream, ToolError, ToolProgress};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

enum Step {
    Text(&'static str),
    Tool(ToolUse),
    End,
    Fail(ProviderError),
    Wait(Arc<Notify>),
    Panic,
}

/// Plays one script per turn; an exhausted queue ends the turn with "ok".
#[derive(Default)]
struct ScriptedProvider {
    turns: Mutex<VecDeque<Vec<Step>>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    fn new(turns: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn stream_turn(&self, messages: &[Message], handler: &dyn TurnHandler) {
        self.seen.lock().unwrap().push(messages.to_vec());
        let script = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![Step::Text("ok"), Step::End]);

        handler.on_status(status_map("ai_typing", true));
        let mut blocks = Vec::new();
        for step in script {
            match step {
                Step::Text(t) => {
                    handler.on_text(t);
                    blocks.push(AssistantBlock::Text { text: t.into() });
                }
                Step::Tool(tool) => {
                    blocks.push(AssistantBlock::ToolUse(tool.clone()));
                    handler.on_tool(tool);
                }
                Step::End => {
                    handler.on_status(status_map("ai_typing", false));
                    handler.on_end(std::mem::take(&mut blocks));
                    return;
                }
                Step::Fail(e) => {
                    handler.on_status(status_map("ai_typing", false));
                    handler.on_error(e);
                    return;
                }
                Step::Wait(gate) => gate.notified().await,
                Step::Panic => panic!("provider blew up"),
            }
        }
    }
}

struct FakeWriter {
    script: Mutex<Vec<Result<ToolProgress, ToolError>>>,
    calls: AtomicUsize,
    panic_at_end: bool,
}

impl FakeWriter {
    fn new(script: Vec<Result<ToolProgress, ToolError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
            panic_at_end: false,
        })
    }

    /// Plays `script`, then panics inside the stream.
    fn panicking(script: Vec<Result<ToolProgress, ToolError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
            panic_at_end: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FileWriter for FakeWriter {
    fn write(&self, _path: &str, _content: &str) -> ProgressStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let items = std::mem::take(&mut *self.script.lock().unwrap());
        if !self.panic_at_end {
            return Box::pin(tokio_stream::iter(items));
        }
        Box::pin(async_stream::stream! {
            for item in items {
                yield item;
            }
            panic!("writer blew up");
        })
    }
}

fn create_file(id: &str, path: &str, content: &str) -> ToolUse {
    ToolUse {
        id: id.into(),
        name: "create_file".into(),
        input: CreateFileInput {
            path: path.into(),
            content: content.into(),
        },
    }
}

fn chunk(text: &str, written: u64) -> Result<ToolProgress, ToolError> {
    Ok(ToolProgress::Chunk {
        chunk: text.into(),
        written,
    })
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    client: mpsc::UnboundedSender<ClientEvent>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    task: JoinHandle<ChatSession>,
    metrics: Arc<Metrics>,
}

impl Harness {
    fn start(provider: Arc<ScriptedProvider>, writer: Arc<FakeWriter>) -> Self {
        Self::with_session(ChatSession::with_id("test"), provider, writer)
    }

    fn with_session(
        session: ChatSession,
        provider: Arc<ScriptedProvider>,
        writer: Arc<FakeWriter>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let deps = SessionDeps {
            provider,
            writer,
            metrics: Arc::clone(&metrics),
        };
        let (out_tx, events) = mpsc::unbounded_channel();
        let (client, client_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Orchestrator::new(session, deps, out_tx).run(client_rx));
        Self {
            client,
            events,
            task,
            metrics,
        }
    }

    fn say(&self, text: &str) {
        self.client
            .send(ClientEvent::UserMessage { text: text.into() })
            .unwrap();
    }

    fn approve(&self, id: &str, approved: bool) {
        self.client
            .send(ClientEvent::ToolApproval {
                tool_use_id: id.into(),
                approved,
            })
            .unwrap();
    }

    async fn next(&mut self) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timeout waiting for server event")
            .expect("event channel closed")
    }

    /// Collect events up to and including the next completion.
    async fn until_completed(&mut self) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        loop {
            let ev = self.next().await;
            let done = matches!(ev, ServerEvent::AssistantMessageCompleted { .. });
            out.push(ev);
            if done {
                return out;
            }
        }
    }

    async fn finish(self) -> ChatSession {
        drop(self.client);
        self.task.await.expect("session task panicked")
    }
}

fn completed(reason: CompletionReason) -> ServerEvent {
    ServerEvent::AssistantMessageCompleted { reason }
}

/// The parsed payload of the tool_result at `history[idx]`.
fn tool_result_at(history: &[Message], idx: usize) -> (String, Value) {
    match &history[idx] {
        Message::User(blocks) => match &blocks[..] {
            [UserBlock::ToolResult {
                tool_use_id,
                content,
            }] => (tool_use_id.clone(), serde_json::from_str(content).unwrap()),
            other => panic!("expected a single tool_result, got {other:?}"),
        },
        other => panic!("expected a user message, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn approved_tool_writes_and_resumes() {
    let provider = ScriptedProvider::new(vec![
        vec![
            Step::Text("Creating it."),
            Step::Tool(create_file("tu_1", "out.txt", "data")),
            Step::End,
        ],
        vec![Step::Text("Done."), Step::End],
    ]);
    let writer = FakeWriter::new(vec![
        chunk("da", 2),
        chunk("ta", 4),
        Ok(ToolProgress::Done {
            file_path: "workspace/out.txt".into(),
            size: 4,
        }),
    ]);
    let mut h = Harness::start(Arc::clone(&provider), Arc::clone(&writer));

    h.say("hello");
    let events = h.until_completed().await;
    assert_eq!(
        events,
        vec![
            ServerEvent::StatusUpdate(StatusUpdate::typing(true)),
            ServerEvent::AiChunk {
                text: "Creating it.".into()
            },
            ServerEvent::ToolRequest(create_file("tu_1", "out.txt", "data")),
            ServerEvent::StatusUpdate(StatusUpdate::typing(false)),
            completed(CompletionReason::Ok),
        ]
    );

    h.approve("tu_1", true);
    let events = h.until_completed().await;
    assert_eq!(
        &events[..4],
        &[
            ServerEvent::StatusUpdate(StatusUpdate {
                tool_running: Some(true),
                file_path: Some("out.txt".into()),
                ..StatusUpdate::default()
            }),
            ServerEvent::ToolChunk { chunk: "da".into() },
            ServerEvent::ToolChunk { chunk: "ta".into() },
            ServerEvent::StatusUpdate(StatusUpdate {
                tool_running: Some(false),
                ..StatusUpdate::default()
            }),
        ]
    );
    assert!(events.contains(&ServerEvent::AiChunk {
        text: "Done.".into()
    }));
    assert_eq!(events.last(), Some(&completed(CompletionReason::Ok)));

    let metrics = Arc::clone(&h.metrics);
    let session = h.finish().await;
    let history = session.history();
    assert_eq!(history.len(), 4);
    let (id, payload) = tool_result_at(history, 2);
    assert_eq!(id, "tu_1");
    assert_eq!(
        payload,
        json!({"status": "ok", "file_path": "workspace/out.txt", "size": 4})
    );
    assert!(session.pending_tool().is_none());
    assert!(!session.active);

    // The resume turn replays the whole history, tool_result last.
    let calls = provider.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].len(), 3);
    assert_eq!(writer.calls(), 1);

    assert_eq!(metrics.counter(Counter::WsUserMessages), 1);
    assert_eq!(metrics.counter(Counter::AnthropicRequests), 2);
    assert_eq!(metrics.counter(Counter::ToolRequests), 1);
    assert_eq!(metrics.counter(Counter::ToolApprovals), 1);
    assert_eq!(metrics.timer(filegate::metrics::Timer::AnthropicStream).0, 1);
    assert_eq!(metrics.timer(filegate::metrics::Timer::AnthropicResume).0, 1);
}

#[tokio::test]
async fn denied_tool_records_denial_and_resumes() {
    let provider = ScriptedProvider::new(vec![vec![
        Step::Tool(create_file("tu_9", "notes.md", "# hi")),
        Step::End,
    ]]);
    let writer = FakeWriter::new(vec![]);
    let mut h = Harness::start(Arc::clone(&provider), Arc::clone(&writer));

    h.say("write notes");
    h.until_completed().await;
    h.approve("tu_9", false);
    let events = h.until_completed().await;
    assert_eq!(events.last(), Some(&completed(CompletionReason::Ok)));

    let session = h.finish().await;
    let (id, payload) = tool_result_at(session.history(), 2);
    assert_eq!(id, "tu_9");
    assert_eq!(payload, json!({"status": "denied"}));
    assert!(session.pending_tool().is_none());
    assert_eq!(writer.calls(), 0);

    // The denial is in history before the resumed turn is requested.
    let calls = provider.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(
        calls[1].last(),
        Some(Message::User(blocks)) if matches!(&blocks[0], UserBlock::ToolResult { .. })
    ));
}

#[tokio::test]
async fn write_failure_is_reported_and_recorded() {
    let provider = ScriptedProvider::new(vec![vec![
        Step::Tool(create_file("tu_2", "big.bin", "payload")),
        Step::End,
    ]]);
    let writer = FakeWriter::new(vec![
        chunk("pay", 3),
        Err(ToolError::WriteFailed("disk full".into())),
    ]);
    let mut h = Harness::start(provider, writer);

    h.say("go");
    h.until_completed().await;
    h.approve("tu_2", true);
    let events = h.until_completed().await;
    assert!(events.contains(&ServerEvent::ToolChunk {
        chunk: "pay".into()
    }));
    assert!(events.contains(&ServerEvent::error_with_detail(
        "tool_error",
        Some("write failed: disk full".into())
    )));
    assert!(events.contains(&ServerEvent::StatusUpdate(StatusUpdate {
        tool_running: Some(false),
        ..StatusUpdate::default()
    })));
    assert_eq!(events.last(), Some(&completed(CompletionReason::Ok)));

    let metrics = Arc::clone(&h.metrics);
    let session = h.finish().await;
    let (_, payload) = tool_result_at(session.history(), 2);
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error_code"], "write_failed");
    assert_eq!(metrics.counter(Counter::ToolErrors), 1);
}

#[tokio::test]
async fn invalid_tool_input_is_deferred_until_turn_end() {
    let provider = ScriptedProvider::new(vec![
        vec![
            Step::Tool(create_file("tu_bad", "", "x")),
            Step::Text("still talking"),
            Step::End,
        ],
        vec![Step::Text("sorry"), Step::End],
    ]);
    let writer = FakeWriter::new(vec![]);
    let mut h = Harness::start(Arc::clone(&provider), Arc::clone(&writer));

    h.say("make a file");
    let first = h.until_completed().await;
    assert!(first.contains(&ServerEvent::error("tool_input_invalid")));
    assert!(!first
        .iter()
        .any(|e| matches!(e, ServerEvent::ToolRequest(_))));

    // The resume turn starts on its own.
    let second = h.until_completed().await;
    assert!(second.contains(&ServerEvent::AiChunk {
        text: "sorry".into()
    }));

    let session = h.finish().await;
    let history = session.history();
    assert_eq!(history.len(), 4);
    assert!(matches!(&history[1], Message::Assistant(blocks) if blocks.len() == 2));
    let (id, payload) = tool_result_at(history, 2);
    assert_eq!(id, "tu_bad");
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error_code"], "invalid_tool_input");
    assert!(session.pending_tool().is_none());
    assert_eq!(writer.calls(), 0);
    assert_eq!(provider.calls().len(), 2);
}

#[tokio::test]
async fn approval_of_invalid_pending_tool_never_writes() {
    let mut session = ChatSession::with_id("revalidate");
    session.set_pending_tool(ToolUse {
        id: "tu_x".into(),
        name: "create_file".into(),
        input: CreateFileInput::default(),
    });
    let provider = ScriptedProvider::new(vec![]);
    let writer = FakeWriter::new(vec![]);
    let mut h = Harness::with_session(session, Arc::clone(&provider), Arc::clone(&writer));

    h.approve("tu_x", true);
    let events = h.until_completed().await;
    assert_eq!(events[0], ServerEvent::error("tool_input_invalid"));
    assert_eq!(events.last(), Some(&completed(CompletionReason::Ok)));

    let session = h.finish().await;
    assert_eq!(writer.calls(), 0);
    assert!(session.pending_tool().is_none());
    let (_, payload) = tool_result_at(session.history(), 0);
    assert_eq!(payload["error_code"], "invalid_tool_input");
}

#[tokio::test]
async fn events_during_a_turn_are_rejected_as_busy() {
    let gate = Arc::new(Notify::new());
    let provider = ScriptedProvider::new(vec![vec![
        Step::Wait(Arc::clone(&gate)),
        Step::Text("finally"),
        Step::End,
    ]]);
    let mut h = Harness::start(Arc::clone(&provider), FakeWriter::new(vec![]));

    h.say("first");
    assert_eq!(
        h.next().await,
        ServerEvent::StatusUpdate(StatusUpdate::typing(true))
    );
    h.say("second");
    assert_eq!(h.next().await, ServerEvent::StatusUpdate(StatusUpdate::busy()));
    h.approve("anything", true);
    assert_eq!(h.next().await, ServerEvent::StatusUpdate(StatusUpdate::busy()));

    gate.notify_one();
    let events = h.until_completed().await;
    assert_eq!(events.last(), Some(&completed(CompletionReason::Ok)));

    let metrics = Arc::clone(&h.metrics);
    let session = h.finish().await;
    assert_eq!(session.history().len(), 2);
    assert_eq!(provider.calls().len(), 1);
    assert_eq!(metrics.counter(Counter::WsBusyRejections), 2);
}

#[tokio::test]
async fn approval_without_matching_pending_tool() {
    let provider = ScriptedProvider::new(vec![vec![
        Step::Tool(create_file("tu_3", "a.txt", "a")),
        Step::End,
    ]]);
    let mut h = Harness::start(provider, FakeWriter::new(vec![]));

    h.approve("nope", true);
    assert_eq!(h.next().await, ServerEvent::error("no_pending_tool"));

    h.say("hi");
    h.until_completed().await;
    h.approve("tu_other", false);
    assert_eq!(h.next().await, ServerEvent::error("no_pending_tool"));

    h.approve("tu_3", false);
    h.until_completed().await;
    h.approve("tu_3", false);
    assert_eq!(h.next().await, ServerEvent::error("no_pending_tool"));

    let session = h.finish().await;
    // user, assistant, denied result, resumed assistant
    assert_eq!(session.history().len(), 4);
}

#[tokio::test]
async fn upstream_failure_is_classified_and_session_recovers() {
    let provider = ScriptedProvider::new(vec![
        vec![
            Step::Tool(create_file("tu_4", "a.txt", "a")),
            Step::Fail(ProviderError::Http {
                status: 429,
                body: r#"{"type":"error","error":{"type":"rate_limit_error","message":"Slow down"}}"#
                    .into(),
            }),
        ],
        vec![Step::Text("back"), Step::End],
    ]);
    let mut h = Harness::start(provider, FakeWriter::new(vec![]));

    h.say("hi");
    let events = h.until_completed().await;
    assert!(events.contains(&ServerEvent::error_with_detail(
        "ai_rate_limited",
        Some("Slow down".into())
    )));
    let n = events.len();
    assert_eq!(
        events[n - 2..],
        [
            ServerEvent::error_with_detail("ai_rate_limited", Some("Slow down".into())),
            completed(CompletionReason::Error),
        ]
    );

    // The failed turn left no pending tool behind.
    h.approve("tu_4", true);
    assert_eq!(h.next().await, ServerEvent::error("no_pending_tool"));

    h.say("again");
    let events = h.until_completed().await;
    assert_eq!(events.last(), Some(&completed(CompletionReason::Ok)));

    let metrics = Arc::clone(&h.metrics);
    let session = h.finish().await;
    // Failed turns add no assistant message.
    assert_eq!(session.history().len(), 3);
    assert_eq!(metrics.counter(Counter::AnthropicErrors), 1);
}

#[tokio::test]
async fn panicking_provider_ends_turn_with_generic_error() {
    let provider = ScriptedProvider::new(vec![vec![Step::Text("partial"), Step::Panic]]);
    let mut h = Harness::start(provider, FakeWriter::new(vec![]));

    h.say("hi");
    let events = h.until_completed().await;
    assert_eq!(events.last(), Some(&completed(CompletionReason::Error)));
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::Error { message, .. } if message == "ai_error"
    )));

    h.say("still there?");
    let events = h.until_completed().await;
    assert_eq!(events.last(), Some(&completed(CompletionReason::Ok)));
    h.finish().await;
}

#[tokio::test]
async fn second_tool_block_in_a_turn_is_rejected() {
    let provider = ScriptedProvider::new(vec![
        vec![
            Step::Tool(create_file("tu_a", "a.txt", "a")),
            Step::Tool(create_file("tu_b", "b.txt", "b")),
            Step::End,
        ],
        vec![Step::Text("wrote a"), Step::End],
    ]);
    let writer = FakeWriter::new(vec![Ok(ToolProgress::Done {
        file_path: "workspace/a.txt".into(),
        size: 1,
    })]);
    let mut h = Harness::start(Arc::clone(&provider), Arc::clone(&writer));

    h.say("two files please");
    let events = h.until_completed().await;
    let requests: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::ToolRequest(tool) => Some(tool.id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(requests, vec!["tu_a".to_string()]);

    // The first tool is still the one awaiting approval.
    h.approve("tu_a", true);
    let events = h.until_completed().await;
    assert_eq!(events.last(), Some(&completed(CompletionReason::Ok)));
    assert!(!events.contains(&ServerEvent::error("no_pending_tool")));

    let session = h.finish().await;
    let history = session.history();
    // user, assistant(2 tools), extra-tool result, tu_a result, resumed assistant
    assert_eq!(history.len(), 5);
    let (id, payload) = tool_result_at(history, 2);
    assert_eq!(id, "tu_b");
    assert_eq!(payload["error_code"], "extra_tool_use");
    let (id, payload) = tool_result_at(history, 3);
    assert_eq!(id, "tu_a");
    assert_eq!(payload["status"], "ok");
    assert_eq!(writer.calls(), 1);

    // Every tool_use sent on resume has its tool_result.
    let calls = provider.calls();
    let uses = calls[1]
        .iter()
        .flat_map(|m| match m {
            Message::Assistant(blocks) => blocks.clone(),
            _ => Vec::new(),
        })
        .filter(|b| matches!(b, AssistantBlock::ToolUse(_)))
        .count();
    let results = calls[1]
        .iter()
        .flat_map(|m| match m {
            Message::User(blocks) => blocks.clone(),
            _ => Vec::new(),
        })
        .filter(|b| matches!(b, UserBlock::ToolResult { .. }))
        .count();
    assert_eq!((uses, results), (2, 2));
}

async fn run_faulty_tool(writer: Arc<FakeWriter>) -> (Vec<ServerEvent>, ChatSession) {
    let provider = ScriptedProvider::new(vec![
        vec![Step::Tool(create_file("tu_f", "f.txt", "abc")), Step::End],
        vec![Step::Text("that failed"), Step::End],
    ]);
    let mut h = Harness::start(provider, writer);

    h.say("go");
    h.until_completed().await;
    h.approve("tu_f", true);
    let events = h.until_completed().await;
    (events, h.finish().await)
}

fn assert_tool_fault_recovered(events: &[ServerEvent], session: &ChatSession) {
    assert!(events.contains(&ServerEvent::ToolChunk { chunk: "ab".into() }));
    let error_at = events
        .iter()
        .position(|e| matches!(e, ServerEvent::Error { message, .. } if message == "tool_error"))
        .expect("tool_error event");
    assert_eq!(
        events[error_at + 1],
        ServerEvent::StatusUpdate(StatusUpdate {
            tool_running: Some(false),
            ..StatusUpdate::default()
        })
    );
    assert_eq!(events.last(), Some(&completed(CompletionReason::Ok)));

    let (id, payload) = tool_result_at(session.history(), 2);
    assert_eq!(id, "tu_f");
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error_code"], "tool_error");
    assert!(!session.active);
}

#[tokio::test]
async fn tool_stream_ending_without_done_is_a_tool_error() {
    let (events, session) = run_faulty_tool(FakeWriter::new(vec![chunk("ab", 2)])).await;
    assert_tool_fault_recovered(&events, &session);
    assert!(events.contains(&ServerEvent::error_with_detail(
        "tool_error",
        Some("tool failed: tool run ended without completing".into())
    )));
}

#[tokio::test]
async fn panicking_tool_is_a_tool_error() {
    let (events, session) = run_faulty_tool(FakeWriter::panicking(vec![chunk("ab", 2)])).await;
    assert_tool_fault_recovered(&events, &session);
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::Error { message, detail: Some(detail) }
            if message == "tool_error" && detail.contains("panicked")
    )));
}

#[tokio::test]
async fn new_message_denies_open_approval() {
    let provider = ScriptedProvider::new(vec![
        vec![Step::Tool(create_file("tu_open", "x.txt", "x")), Step::End],
        vec![Step::Text("ok, no file"), Step::End],
    ]);
    let writer = FakeWriter::new(vec![]);
    let mut h = Harness::start(Arc::clone(&provider), Arc::clone(&writer));

    h.say("make x");
    h.until_completed().await;
    h.say("never mind");
    let events = h.until_completed().await;
    assert_eq!(events.last(), Some(&completed(CompletionReason::Ok)));

    h.approve("tu_open", true);
    assert_eq!(h.next().await, ServerEvent::error("no_pending_tool"));

    let session = h.finish().await;
    let history = session.history();
    // user, assistant(tool), denial, user, assistant
    assert_eq!(history.len(), 5);
    let (id, payload) = tool_result_at(history, 2);
    assert_eq!(id, "tu_open");
    assert_eq!(payload, json!({"status": "denied"}));
    assert!(matches!(
        &history[3],
        Message::User(blocks) if matches!(&blocks[0], UserBlock::Text { text } if text == "never mind")
    ));
    assert!(session.pending_tool().is_none());
    assert_eq!(writer.calls(), 0);
}
