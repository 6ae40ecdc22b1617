//! End-to-end runtime scenarios driven by a scripted model adapter.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cagent_core::agent::Agent;
use cagent_core::ai::adapter::{AdapterError, Capabilities, ModelAdapter, StreamRequest};
use cagent_core::ai::router::{AdapterSource, ModelCatalog, ModelConfig};
use cagent_core::ai::streaming::StreamChunk;
use cagent_core::ai::types::{FinishReason, Usage};
use cagent_core::runtime::{Event, ResumeDecision, Runtime};
use cagent_core::session::{Message, Role, Session, SharedSession};
use cagent_core::tools::registry::{ToolContext, ToolDescriptor, ToolError, ToolHandler, ToolRegistry};

// ── Scripted adapter ───────────────────────────────────────────────────

/// Plays back canned chunk sequences, one per model call. When the script
/// runs dry it answers with an immediate end-of-turn.
struct ScriptedAdapter {
    turns: Mutex<VecDeque<Vec<StreamChunk>>>,
    /// When set, streams block after their chunks until cancellation
    /// instead of closing (no `End` marker is sent).
    hang_after_chunks: bool,
}

impl ScriptedAdapter {
    fn new(turns: Vec<Vec<StreamChunk>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            hang_after_chunks: false,
        })
    }

    fn hanging(turns: Vec<Vec<StreamChunk>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            hang_after_chunks: true,
        })
    }
}

#[async_trait]
impl ModelAdapter for ScriptedAdapter {
    fn id(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn stream(
        &self,
        _request: StreamRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamChunk>, AdapterError> {
        let chunks = self
            .turns
            .lock()
            .pop_front()
            .unwrap_or_else(|| vec![StreamChunk::End(FinishReason::Stop)]);
        let hang = self.hang_after_chunks;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
            if hang {
                // Keep the stream open until the runtime tears it down.
                cancel.cancelled().await;
            }
        });
        Ok(rx)
    }
}

struct FixedSource(Arc<dyn ModelAdapter>);

impl AdapterSource for FixedSource {
    fn adapter(&self, _key: &str, _config: &ModelConfig) -> Result<Arc<dyn ModelAdapter>, AdapterError> {
        Ok(self.0.clone())
    }
}

fn catalog_for(adapter: Arc<dyn ModelAdapter>) -> ModelCatalog {
    let configs = HashMap::from([(
        "main".to_string(),
        ModelConfig {
            provider: "openai".into(),
            model: "scripted".into(),
            gateway_url: None,
            api_key_env: None,
            max_output_tokens: None,
            thinking_budget: None,
            routing: Vec::new(),
        },
    )]);
    ModelCatalog::new(configs, Box::new(FixedSource(adapter)))
}

// ── Test tools ─────────────────────────────────────────────────────────

struct StaticTool(&'static str);

#[async_trait]
impl ToolHandler for StaticTool {
    async fn call(&self, _arguments: &str, _ctx: &ToolContext) -> Result<String, ToolError> {
        Ok(self.0.to_string())
    }
}

struct OAuthDemandingTool;

#[async_trait]
impl ToolHandler for OAuthDemandingTool {
    async fn call(&self, _arguments: &str, _ctx: &ToolContext) -> Result<String, ToolError> {
        Err(ToolError::OAuthRequired {
            server_url: "https://mcp.example.com".to_string(),
            server_type: "mcp".to_string(),
            source: anyhow::anyhow!("401 unauthorized"),
        })
    }
}

fn descriptor(name: &str, confirm: bool) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        display_name: name.to_string(),
        description: format!("test tool {name}"),
        schema: json!({"type": "object"}),
        requires_confirmation: confirm,
    }
}

// ── Chunk builders ─────────────────────────────────────────────────────

fn content(text: &str) -> StreamChunk {
    StreamChunk::ContentDelta(text.to_string())
}

fn tool_call(id: &str, name: &str, arguments: &str) -> StreamChunk {
    StreamChunk::ToolCallDelta {
        id: id.to_string(),
        name: Some(name.to_string()),
        arguments_fragment: arguments.to_string(),
    }
}

fn end_with_tools() -> StreamChunk {
    StreamChunk::End(FinishReason::ToolCalls)
}

fn end() -> StreamChunk {
    StreamChunk::End(FinishReason::Stop)
}

// ── Harness ────────────────────────────────────────────────────────────

fn session_with_title() -> SharedSession {
    let mut session = Session::new();
    // A preset title keeps the title-generation pass from consuming a
    // scripted turn.
    session.title = "test session".to_string();
    session.shared()
}

fn runtime_with(
    adapter: Arc<dyn ModelAdapter>,
    registry: ToolRegistry,
    agents: Vec<Agent>,
    root: &str,
) -> Arc<Runtime> {
    let mut builder = Runtime::builder()
        .root(root)
        .registry(registry)
        .catalog(catalog_for(adapter));
    for agent in agents {
        builder = builder.agent(agent);
    }
    builder.build().expect("runtime builds")
}

async fn collect_events(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        events.push(event);
    }
    events
}

/// Submit a decision once the runtime is actually parked on a gate.
async fn resume_when_ready(runtime: &Arc<Runtime>, decision: ResumeDecision) {
    for _ in 0..200 {
        if runtime.resume(decision.clone()).is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("runtime never parked on a decision gate");
}

fn positions_of(events: &[Event], id: &str) -> (Option<usize>, Option<usize>, Option<usize>) {
    let mut confirmation = None;
    let mut call = None;
    let mut response = None;
    for (i, event) in events.iter().enumerate() {
        match event {
            Event::ToolCallConfirmation { tool_call, .. } if tool_call.id == id => {
                confirmation.get_or_insert(i);
            }
            Event::ToolCall { tool_call, .. } if tool_call.id == id => {
                call.get_or_insert(i);
            }
            Event::ToolCallResponse { tool_call, .. } if tool_call.id == id => {
                response.get_or_insert(i);
            }
            _ => {}
        }
    }
    (confirmation, call, response)
}

// ── S1: happy tool ─────────────────────────────────────────────────────

#[tokio::test]
async fn s1_unconfirmed_tool_runs_to_completion() {
    let adapter = ScriptedAdapter::new(vec![
        vec![
            content("Reading the file. "),
            tool_call("call_1", "read_file", r#"{"path": "/tmp/a.txt"}"#),
            end_with_tools(),
        ],
        vec![content("The file says: hello"), end()],
    ]);

    let mut registry = ToolRegistry::new();
    registry.register(descriptor("read_file", false), Arc::new(StaticTool("hello")));

    let agent = Agent::new("root", "You read files.", "main").with_toolsets(["read_file"]);
    let runtime = runtime_with(adapter, registry, vec![agent], "root");
    let session = session_with_title();

    let mut rx = runtime
        .run(CancellationToken::new(), session.clone(), Message::user("root", "read /tmp/a.txt"))
        .unwrap();
    let events = collect_events(&mut rx).await;

    let (confirmation, call, response) = positions_of(&events, "call_1");
    assert!(confirmation.is_none(), "no confirmation expected");
    assert!(call.is_some() && response.is_some());
    assert!(call < response);

    // Tool response carries the tool's output.
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ToolCallResponse { response, .. } if response == "hello"
    )));

    // Session: tool message answers the assistant message that emitted it,
    // and the final message is the closing assistant answer.
    let session = session.read();
    let messages = session.messages();
    let assistant_idx = messages
        .iter()
        .position(|m| m.tool_calls.iter().any(|c| c.id == "call_1"))
        .expect("assistant message with the call");
    let tool_idx = messages
        .iter()
        .position(|m| m.tool_call_id.as_deref() == Some("call_1"))
        .expect("tool message answering the call");
    assert!(assistant_idx < tool_idx);

    let last = messages.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, "The file says: hello");
}

// ── S2: confirmed tool ─────────────────────────────────────────────────

#[tokio::test]
async fn s2_confirmation_precedes_execution() {
    let adapter = ScriptedAdapter::new(vec![
        vec![tool_call("call_1", "read_file", r#"{"path": "/tmp/a.txt"}"#), end_with_tools()],
        vec![content("done"), end()],
    ]);

    let mut registry = ToolRegistry::new();
    registry.register(descriptor("read_file", true), Arc::new(StaticTool("contents")));

    let agent = Agent::new("root", "", "main").with_toolsets(["read_file"]);
    let runtime = runtime_with(adapter, registry, vec![agent], "root");

    let mut rx = runtime
        .run(CancellationToken::new(), session_with_title(), Message::user("root", "go"))
        .unwrap();

    // Wait for the confirmation event, then approve.
    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, Event::ToolCallConfirmation { ref tool_call, .. } if tool_call.id == "call_1"));

    resume_when_ready(&runtime, ResumeDecision::Approve).await;
    let mut events = vec![first];
    events.extend(collect_events(&mut rx).await);

    let (confirmation, call, response) = positions_of(&events, "call_1");
    assert!(confirmation <= call && call <= response, "causal order violated");
    assert!(confirmation.is_some() && call.is_some() && response.is_some());
}

// ── S3: session-wide approval stickiness ───────────────────────────────

#[tokio::test]
async fn s3_approve_for_session_suppresses_later_confirmations() {
    let adapter = ScriptedAdapter::new(vec![
        vec![tool_call("call_1", "shell", r#"{"command": "ls"}"#), end_with_tools()],
        vec![tool_call("call_2", "shell", r#"{"command": "pwd"}"#), end_with_tools()],
        vec![content("all done"), end()],
    ]);

    let mut registry = ToolRegistry::new();
    registry.register(descriptor("shell", true), Arc::new(StaticTool("ok")));

    let agent = Agent::new("root", "", "main").with_toolsets(["shell"]);
    let runtime = runtime_with(adapter, registry, vec![agent], "root");
    let session = session_with_title();

    let mut rx = runtime
        .run(CancellationToken::new(), session.clone(), Message::user("root", "go"))
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, Event::ToolCallConfirmation { .. }));

    resume_when_ready(&runtime, ResumeDecision::ApproveForSession).await;
    let events = collect_events(&mut rx).await;

    // The sticky flag is set and the second call never asked.
    assert!(session.read().tools_approved);
    let confirmations = events
        .iter()
        .filter(|e| matches!(e, Event::ToolCallConfirmation { .. }))
        .count();
    assert_eq!(confirmations, 0, "no further confirmation after ApproveForSession");
    let (_, call2, response2) = positions_of(&events, "call_2");
    assert!(call2.is_some() && response2.is_some());
}

// ── S4: iteration bound ────────────────────────────────────────────────

#[tokio::test]
async fn s4_max_iterations_reject_stops_the_run() {
    // Every turn requests another tool call; the budget is 2.
    let adapter = ScriptedAdapter::new(vec![
        vec![tool_call("call_1", "noop", "{}"), end_with_tools()],
        vec![tool_call("call_2", "noop", "{}"), end_with_tools()],
        vec![tool_call("call_3", "noop", "{}"), end_with_tools()],
    ]);

    let mut registry = ToolRegistry::new();
    registry.register(descriptor("noop", false), Arc::new(StaticTool("ok")));

    let agent = Agent::new("root", "", "main")
        .with_toolsets(["noop"])
        .with_max_iterations(2);
    let runtime = runtime_with(adapter, registry, vec![agent], "root");

    let mut rx = runtime
        .run(CancellationToken::new(), session_with_title(), Message::user("root", "go"))
        .unwrap();

    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("events before the limit")
            .expect("channel open until the limit");
        let is_limit = matches!(event, Event::MaxIterationsReached { max: 2, .. });
        events.push(event);
        if is_limit {
            break;
        }
    }

    let model_calls = events
        .iter()
        .filter(|e| matches!(e, Event::ToolCall { .. }))
        .count();
    assert_eq!(model_calls, 2, "exactly max_iterations tool batches ran");

    resume_when_ready(
        &runtime,
        ResumeDecision::Reject {
            reason: "enough".to_string(),
        },
    )
    .await;

    let rest = collect_events(&mut rx).await;
    assert!(rest.is_empty(), "no further events after reject: {rest:?}");
}

// ── S5: transfer to a sub-agent ────────────────────────────────────────

#[tokio::test]
async fn s5_transfer_bubbles_result_to_parent() {
    let adapter = ScriptedAdapter::new(vec![
        // root asks for a transfer
        vec![
            tool_call("call_t", "transfer_task", r#"{"agent": "researcher", "task": "find X"}"#),
            end_with_tools(),
        ],
        // researcher answers
        vec![content("X is 42"), end()],
        // root wraps up with the researcher's result in context
        vec![content("The answer is 42."), end()],
    ]);

    let registry = ToolRegistry::new();
    let root = Agent::new("root", "", "main").with_sub_agents(["researcher"]);
    let researcher = Agent::new("researcher", "You research.", "main");
    let runtime = runtime_with(adapter, registry, vec![root, researcher], "root");
    let session = session_with_title();

    let mut rx = runtime
        .run(CancellationToken::new(), session.clone(), Message::user("root", "what is X?"))
        .unwrap();
    let events = collect_events(&mut rx).await;

    // Sub-agent content is attributed to the sub-agent.
    assert!(events.iter().any(|e| matches!(
        e,
        Event::AgentChoice { agent, content } if agent == "researcher" && content == "X is 42"
    )));

    // Completion bubbles up as the transfer call's tool response, on the root.
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ToolCallResponse { agent, tool_call, response }
            if agent == "root" && tool_call.id == "call_t" && response == "X is 42"
    )));

    // The session log holds the researcher's task as a user message and the
    // bubbled result as a tool message answering call_t.
    let session = session.read();
    assert!(session
        .messages()
        .iter()
        .any(|m| m.role == Role::User && m.agent == "researcher" && m.content == "find X"));
    assert!(session
        .messages()
        .iter()
        .any(|m| m.tool_call_id.as_deref() == Some("call_t") && m.content == "X is 42"));
    assert_eq!(session.messages().last().unwrap().content, "The answer is 42.");
    assert!(session.agent_stack().is_empty(), "all frames popped");
}

// ── Transfer cycles are rejected ───────────────────────────────────────

#[tokio::test]
async fn transfer_into_active_ancestor_is_rejected() {
    let adapter = ScriptedAdapter::new(vec![
        vec![
            tool_call("call_t1", "transfer_task", r#"{"agent": "researcher", "task": "dig"}"#),
            end_with_tools(),
        ],
        // researcher tries to hand back to its (still-active) ancestor
        vec![
            tool_call("call_t2", "transfer_task", r#"{"agent": "root", "task": "loop!"}"#),
            end_with_tools(),
        ],
        // researcher recovers and answers
        vec![content("done digging"), end()],
        // root wraps up
        vec![content("ok"), end()],
    ]);

    let registry = ToolRegistry::new();
    let root = Agent::new("root", "", "main").with_sub_agents(["researcher"]);
    let researcher = Agent::new("researcher", "", "main").with_sub_agents(["root"]);
    let runtime = runtime_with(adapter, registry, vec![root, researcher], "root");
    let session = session_with_title();

    let mut rx = runtime
        .run(CancellationToken::new(), session.clone(), Message::user("root", "go"))
        .unwrap();
    let events = collect_events(&mut rx).await;

    assert!(events.iter().any(|e| matches!(
        e,
        Event::ToolCallResponse { tool_call, response, .. }
            if tool_call.id == "call_t2" && response.contains("already active")
    )));

    // The cycle rejection is an error tool message, letting the model retry.
    let session = session.read();
    let rejection = session
        .messages()
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("call_t2"))
        .expect("rejection tool message");
    assert!(rejection.is_error);
    assert_eq!(session.messages().last().unwrap().content, "ok");
}

// ── S6: OAuth decline is fatal ─────────────────────────────────────────

#[tokio::test]
async fn s6_oauth_decline_terminates_the_run() {
    let adapter = ScriptedAdapter::new(vec![vec![
        tool_call("call_1", "mcp__jira_search", r#"{"query": "x"}"#),
        end_with_tools(),
    ]]);

    let mut registry = ToolRegistry::new();
    registry.register(descriptor("mcp__jira_search", false), Arc::new(OAuthDemandingTool));

    let agent = Agent::new("root", "", "main").with_toolsets(["mcp__jira_search"]);
    let runtime = runtime_with(adapter, registry, vec![agent], "root");

    let mut rx = runtime
        .run(CancellationToken::new(), session_with_title(), Message::user("root", "search"))
        .unwrap();

    // Drain until the elicitation request arrives.
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let is_elicitation = matches!(event, Event::ElicitationRequest { .. });
        events.push(event);
        if is_elicitation {
            break;
        }
    }

    assert!(matches!(
        events.last(),
        Some(Event::ElicitationRequest { server_url, server_type, .. })
            if server_url == "https://mcp.example.com" && server_type == "mcp"
    ));

    // Decline; the run must end with the rejection error.
    for _ in 0..200 {
        if runtime.resume_elicitation("decline", serde_json::Value::Null).is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let rest = collect_events(&mut rx).await;
    assert!(rest.iter().any(|e| matches!(
        e,
        Event::Error { message, .. } if message.contains("rejected by user")
    )));
}

// ── S7: cancel mid-stream ──────────────────────────────────────────────

#[tokio::test]
async fn s7_cancel_mid_stream_closes_cleanly() {
    let adapter = ScriptedAdapter::hanging(vec![vec![
        content("partial "),
        content("answer"),
        // no End: the stream hangs until cancellation
    ]]);

    let registry = ToolRegistry::new();
    let agent = Agent::new("root", "", "main");
    let runtime = runtime_with(adapter, registry, vec![agent], "root");
    let session = session_with_title();
    let cancel = CancellationToken::new();

    let mut rx = runtime
        .run(cancel.clone(), session.clone(), Message::user("root", "talk"))
        .unwrap();

    // Receive the deltas, then cancel while the stream is open.
    let mut received = 0;
    while received < 2 {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
            Some(Event::AgentChoice { .. }) => received += 1,
            Some(_) => {}
            None => panic!("channel closed before deltas arrived"),
        }
    }
    cancel.cancel();

    // The channel must close within the grace period, with no ErrorEvent.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let mut tail = Vec::new();
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(event)) => tail.push(event),
            Ok(None) => break,
            Err(_) => panic!("event channel did not close within 3s of cancellation"),
        }
    }
    assert!(
        !tail.iter().any(|e| matches!(e, Event::Error { .. })),
        "cancellation is not an error: {tail:?}"
    );

    // The partial assistant message holds exactly the received deltas.
    let session = session.read();
    let last = session.messages().last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, "partial answer");
}

// ── Usage accounting ───────────────────────────────────────────────────

#[tokio::test]
async fn usage_events_accumulate_on_the_session() {
    let adapter = ScriptedAdapter::new(vec![vec![
        content("hi"),
        StreamChunk::Usage(Usage {
            input_tokens: 120,
            output_tokens: 8,
            cached_tokens: 100,
            cost: 0.002,
        }),
        end(),
    ]]);

    let registry = ToolRegistry::new();
    let agent = Agent::new("root", "", "main");
    let runtime = runtime_with(adapter, registry, vec![agent], "root");
    let session = session_with_title();

    let mut rx = runtime
        .run(CancellationToken::new(), session.clone(), Message::user("root", "hi"))
        .unwrap();
    let events = collect_events(&mut rx).await;

    assert!(events.iter().any(|e| matches!(
        e,
        Event::Usage { input_tokens: 120, cached_tokens: 100, .. }
    )));
    let usage = session.read().usage();
    assert_eq!(usage.input_tokens, 120);
    assert_eq!(usage.output_tokens, 8);
}

// ── Rejected tools synthesize error results ────────────────────────────

#[tokio::test]
async fn rejected_confirmation_synthesizes_error_tool_message() {
    let adapter = ScriptedAdapter::new(vec![
        vec![tool_call("call_1", "shell", r#"{"command": "rm -rf /"}"#), end_with_tools()],
        vec![content("understood, skipping"), end()],
    ]);

    let mut registry = ToolRegistry::new();
    registry.register(descriptor("shell", true), Arc::new(StaticTool("nope")));

    let agent = Agent::new("root", "", "main").with_toolsets(["shell"]);
    let runtime = runtime_with(adapter, registry, vec![agent], "root");
    let session = session_with_title();

    let mut rx = runtime
        .run(CancellationToken::new(), session.clone(), Message::user("root", "clean up"))
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, Event::ToolCallConfirmation { .. }));

    resume_when_ready(
        &runtime,
        ResumeDecision::Reject {
            reason: "too dangerous".to_string(),
        },
    )
    .await;
    let events = collect_events(&mut rx).await;

    // No ToolCall event: the call never ran.
    let (_, call, response) = positions_of(&events, "call_1");
    assert!(call.is_none());
    assert!(response.is_some());

    let session = session.read();
    let rejection = session
        .messages()
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("call_1"))
        .expect("synthesized tool message");
    assert!(rejection.is_error);
    assert_eq!(rejection.content, "too dangerous");

    // The loop continued: the model saw the rejection and answered.
    assert_eq!(session.messages().last().unwrap().content, "understood, skipping");
}

// ── Message log monotonicity under a running loop ──────────────────────

#[tokio::test]
async fn snapshots_are_prefixes_over_time() {
    let adapter = ScriptedAdapter::new(vec![
        vec![tool_call("call_1", "noop", "{}"), end_with_tools()],
        vec![content("done"), end()],
    ]);

    let mut registry = ToolRegistry::new();
    registry.register(descriptor("noop", false), Arc::new(StaticTool("ok")));

    let agent = Agent::new("root", "", "main").with_toolsets(["noop"]);
    let runtime = runtime_with(adapter, registry, vec![agent], "root");
    let session = session_with_title();

    let mut rx = runtime
        .run(CancellationToken::new(), session.clone(), Message::user("root", "go"))
        .unwrap();

    let mut previous: Vec<String> = Vec::new();
    while let Ok(Some(_)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        let snapshot: Vec<String> = session
            .read()
            .snapshot()
            .iter()
            .map(|m| format!("{:?}:{}", m.role, m.tool_call_id.clone().unwrap_or_default()))
            .collect();
        // Only structural prefix stability is asserted: the streaming
        // assistant message may still grow its content in place.
        assert!(snapshot.len() >= previous.len());
        assert_eq!(&snapshot[..previous.len()], &previous[..]);
        previous = snapshot;
    }
}
