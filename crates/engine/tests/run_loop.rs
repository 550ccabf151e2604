use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tw_domain::config::EngineConfig;
use tw_domain::error::{Error, Result};
use tw_domain::stream::{BoxStream, StreamEvent, ToolCallDelta, Usage};
use tw_domain::tool::{ContentPart, MessageContent, Role, ToolDefinition};
use tw_engine::{ConversationOrchestrator, PartEvent, RunHooks, RunOptions, StopReason};
use tw_memory::{Goal, LocalGoalStore, LocalMemoryStore, MemoryProvider};
use tw_providers::{ChatRequest, LlmProvider};
use tw_tools::{FnHandler, ToolHandler, ToolRegistry};

// ── Test doubles ───────────────────────────────────────────────────

/// Replays one scripted event list per round and records every request.
struct ScriptedProvider {
    rounds: Mutex<VecDeque<Vec<StreamEvent>>>,
    /// Replayed once the script runs out.
    fallback: Option<Vec<StreamEvent>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    fn new(rounds: Vec<Vec<StreamEvent>>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn repeating(round: Vec<StreamEvent>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(VecDeque::new()),
            fallback: Some(round),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.requests.lock().push(req.clone());
        let events = self
            .rounds
            .lock()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_default();
        Ok(Box::pin(futures_util::stream::iter(events.into_iter().map(Ok))))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }
}

/// Sends one token, then never yields again.
struct StalledProvider;

#[async_trait]
impl LlmProvider for StalledProvider {
    async fn chat_stream(&self, _req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let stream = async_stream::stream! {
            yield Ok(token("thinking"));
            tokio::time::sleep(Duration::from_secs(30)).await;
            yield Ok(done());
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        "stalled"
    }

    fn default_model(&self) -> &str {
        "stalled-model"
    }
}

struct StopTool;

#[async_trait]
impl ToolHandler for StopTool {
    async fn call(&self, _args: Value) -> Result<Value> {
        Ok(json!("bye"))
    }

    fn stops_conversation(&self) -> bool {
        true
    }
}

fn token(text: &str) -> StreamEvent {
    StreamEvent::Token { text: text.into() }
}

fn done() -> StreamEvent {
    StreamEvent::Done {
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        finish_reason: Some("stop".into()),
    }
}

fn call_delta(index: usize, id: &str, name: &str, args: &str) -> StreamEvent {
    StreamEvent::ToolCallDelta {
        index,
        delta: ToolCallDelta::new(id, name, args),
    }
}

fn add_tool() -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register_handler(
        ToolDefinition {
            name: "add".into(),
            description: "Add two integers".into(),
            parameters: json!({
                "type": "object",
                "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                "required": ["a", "b"]
            }),
        },
        Arc::new(FnHandler::new(|args: Value| async move {
            let a = args["a"].as_i64().unwrap_or(0);
            let b = args["b"].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        })),
    );
    registry
}

fn engine(provider: Arc<dyn LlmProvider>) -> ConversationOrchestrator {
    ConversationOrchestrator::new(provider, EngineConfig::default())
}

// ── Termination ────────────────────────────────────────────────────

#[tokio::test]
async fn plain_answer_finishes_after_one_round() {
    let provider = ScriptedProvider::new(vec![vec![token("Hel"), token("lo"), done()]]);
    let out = engine(provider.clone())
        .run("hi", RunOptions::default())
        .await
        .unwrap();

    assert_eq!(out.text, "Hello");
    assert_eq!(out.rounds, 1);
    assert_eq!(out.stop, StopReason::Finished);
    assert_eq!(out.usage.unwrap().total_tokens, 15);
    assert_eq!(provider.requests().len(), 1);

    let roles: Vec<Role> = out.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
}

#[tokio::test]
async fn tool_round_then_answer() {
    let provider = ScriptedProvider::new(vec![
        vec![
            token("Let me add."),
            call_delta(0, "c1", "add", "{\"a\":"),
            call_delta(0, "", "", "2,\"b\":3}"),
            done(),
        ],
        vec![token("It is 5."), done()],
    ]);
    let out = engine(provider.clone())
        .with_tools(Arc::new(add_tool()))
        .run("what is 2+3?", RunOptions::default())
        .await
        .unwrap();

    assert_eq!(out.stop, StopReason::Finished);
    assert_eq!(out.rounds, 2);
    assert_eq!(out.text, "It is 5.");

    // user, assistant text, tool call, tool result, final answer
    let roles: Vec<Role> = out.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(out.messages[3].content.extract_all_text(), "5");

    // Second round sees the tool result and the continue nudge.
    let second = &provider.requests()[1];
    assert!(second.messages.iter().any(|m| m.role == Role::Tool));
    assert_eq!(second.messages.last().map(|m| m.role), Some(Role::System));
    assert_eq!(second.tools.len(), 1);
}

#[tokio::test]
async fn always_calling_model_hits_round_limit() {
    let provider = ScriptedProvider::repeating(vec![
        token("again"),
        call_delta(0, "c", "add", "{\"a\":1,\"b\":1}"),
        done(),
    ]);
    let out = engine(provider.clone())
        .with_tools(Arc::new(add_tool()))
        .run(
            "loop",
            RunOptions {
                max_rounds: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(out.stop, StopReason::RoundLimit);
    assert_eq!(out.rounds, 3);
    assert_eq!(provider.requests().len(), 3);
    assert_eq!(out.text, "again\nagain\nagain");

    let last = out.messages.last().unwrap();
    assert_eq!(last.role, Role::System);
    assert!(last
        .content
        .extract_all_text()
        .contains("round limit reached: stopped after 3 rounds"));
}

#[tokio::test]
async fn stopping_tool_ends_the_run() {
    let tools = ToolRegistry::new();
    tools.register_handler(
        ToolDefinition {
            name: "end_chat".into(),
            description: "End the conversation".into(),
            parameters: json!({"type": "object"}),
        },
        Arc::new(StopTool),
    );
    let provider = ScriptedProvider::new(vec![vec![
        token("Goodbye."),
        call_delta(0, "c1", "end_chat", "{}"),
        done(),
    ]]);

    let out = engine(provider.clone())
        .run(
            "bye",
            RunOptions {
                tools: Some(Arc::new(tools)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(out.stop, StopReason::Stopped);
    assert_eq!(out.rounds, 1);
    assert_eq!(out.text, "Goodbye.");
    assert_eq!(provider.requests().len(), 1);
}

// ── Tool failures stay in-band ─────────────────────────────────────

#[tokio::test]
async fn unknown_tool_is_reported_to_the_model() {
    let provider = ScriptedProvider::new(vec![
        vec![call_delta(0, "c1", "missing", "{}"), done()],
        vec![token("Sorry."), done()],
    ]);
    let out = engine(provider)
        .run("use a tool", RunOptions::default())
        .await
        .unwrap();

    assert_eq!(out.stop, StopReason::Finished);
    let tool_msg = out.messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(
        tool_msg.content.extract_all_text(),
        "Error: tool not found: missing"
    );
}

#[tokio::test]
async fn unterminated_arguments_are_flushed_at_stream_end() {
    let provider = ScriptedProvider::new(vec![
        vec![call_delta(0, "c1", "add", "{\"a\":1"), done()],
        vec![token("done"), done()],
    ]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let hooks = RunHooks::new().on_tool_result(move |r| sink.lock().push(r.is_error()));

    let out = engine(provider)
        .with_tools(Arc::new(add_tool()))
        .run(
            "add",
            RunOptions {
                hooks,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(out.rounds, 2);
    assert_eq!(*seen.lock(), vec![true]);
}

// ── Failures that abort ────────────────────────────────────────────

#[tokio::test]
async fn stream_error_aborts_with_provider_error() {
    let provider = ScriptedProvider::new(vec![vec![
        token("partial"),
        StreamEvent::Error {
            message: "overloaded".into(),
        },
    ]]);
    let err = engine(provider)
        .run("hi", RunOptions::default())
        .await
        .unwrap_err();

    match err {
        Error::Provider { provider, message } => {
            assert_eq!(provider, "scripted");
            assert_eq!(message, "overloaded");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn stalled_stream_hits_generation_deadline() {
    let config = EngineConfig {
        generation_timeout_ms: 100,
        ..Default::default()
    };
    let err = ConversationOrchestrator::new(Arc::new(StalledProvider), config)
        .run("hi", RunOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout(_)));
    assert!(err.is_transport());
}

// ── Hooks ──────────────────────────────────────────────────────────

#[tokio::test]
async fn hooks_observe_fragments_calls_and_parts() {
    let provider = ScriptedProvider::new(vec![
        vec![
            token("Adding"),
            call_delta(0, "c1", "add", "{\"a\":4,\"b\":5}"),
            done(),
        ],
        vec![token("9"), done()],
    ]);

    let fragments = Arc::new(Mutex::new(Vec::<String>::new()));
    let calls = Arc::new(Mutex::new(Vec::<String>::new()));
    let snapshots = Arc::new(Mutex::new(0usize));
    let completed = Arc::new(Mutex::new(0usize));

    let (f, c, s, e) = (
        fragments.clone(),
        calls.clone(),
        snapshots.clone(),
        completed.clone(),
    );
    let hooks = RunHooks::new()
        .on_fragment(move |t| f.lock().push(t.to_owned()))
        .on_tool_call(move |call| c.lock().push(call.tool_name.clone()))
        .on_parts_change(move |_| *s.lock() += 1)
        .on_part_event(move |ev| {
            if matches!(ev, PartEvent::Completed { .. }) {
                *e.lock() += 1;
            }
        });

    engine(provider)
        .with_tools(Arc::new(add_tool()))
        .run(
            "add 4 and 5",
            RunOptions {
                hooks,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(*fragments.lock(), vec!["Adding".to_owned(), "9".to_owned()]);
    assert_eq!(*calls.lock(), vec!["add".to_owned()]);
    assert!(*snapshots.lock() >= 4);
    // Round one closes its text and its call; results are born complete.
    // Round two closes its answer.
    assert_eq!(*completed.lock(), 3);
}

// ── Context and history ────────────────────────────────────────────

#[tokio::test]
async fn history_seeds_the_transcript() {
    let provider = ScriptedProvider::new(vec![vec![token("Blue."), done()]]);
    let history = vec![
        tw_domain::tool::Message::user("my favourite colour is blue"),
        tw_domain::tool::Message::assistant("Noted."),
    ];
    let out = engine(provider.clone())
        .run(
            "what is my favourite colour?",
            RunOptions {
                history,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(out.messages.len(), 4);
    let sent = &provider.requests()[0].messages;
    assert_eq!(sent[0].role, Role::System);
    assert_eq!(
        sent[1].content.extract_all_text(),
        "my favourite colour is blue"
    );
}

#[tokio::test]
async fn memories_and_goals_reach_the_system_prompt() {
    let memory = Arc::new(LocalMemoryStore::new());
    memory
        .create("the deploy window is friday", "knowledge", Default::default())
        .await
        .unwrap();
    let goals = Arc::new(LocalGoalStore::with_goals([Goal::new("ship release", 3)]));

    let provider = ScriptedProvider::new(vec![vec![token("Friday."), done()]]);
    engine(provider.clone())
        .with_memory(memory)
        .with_goals(goals)
        .run("when is the deploy window?", RunOptions::default())
        .await
        .unwrap();

    let system = provider.requests()[0].messages[0].content.extract_all_text();
    assert!(system.contains("## Relevant memories"));
    assert!(system.contains("the deploy window is friday"));
    assert!(system.contains("## Active goals"));
    assert!(system.contains("ship release"));
}

#[tokio::test]
async fn finished_run_is_captured_when_enabled() {
    let memory = Arc::new(LocalMemoryStore::new());
    let config = EngineConfig {
        capture_on_finish: true,
        ..Default::default()
    };
    let provider = ScriptedProvider::new(vec![vec![token("Hi there."), done()]]);

    ConversationOrchestrator::new(provider, config)
        .with_memory(memory.clone())
        .run("hello", RunOptions::default())
        .await
        .unwrap();

    // Capture runs on a spawned task.
    for _ in 0..50 {
        if !memory.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stored = memory.all();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].memory_type, "conversation");
    assert!(stored[0].content.contains("Hi there."));
}

// ── Lookup failures ────────────────────────────────────────────────

/// Memory collaborator that either errors or outlives the lookup deadline.
struct BrokenMemory {
    stall: bool,
}

#[async_trait]
impl MemoryProvider for BrokenMemory {
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<tw_memory::MemoryRecord>> {
        if self.stall {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Err(Error::Memory("search backend unavailable".into()))
    }

    async fn create(
        &self,
        _content: &str,
        _memory_type: &str,
        _metadata: std::collections::HashMap<String, Value>,
    ) -> Result<tw_memory::MemoryRecord> {
        Err(Error::Memory("read only".into()))
    }
}

#[tokio::test]
async fn failing_or_slow_memory_lookup_does_not_abort() {
    for stall in [false, true] {
        let config = EngineConfig {
            lookup_timeout_ms: 50,
            ..Default::default()
        };
        let provider = ScriptedProvider::new(vec![vec![token("Answer."), done()]]);
        let out = ConversationOrchestrator::new(provider.clone(), config)
            .with_memory(Arc::new(BrokenMemory { stall }))
            .run("anything remembered?", RunOptions::default())
            .await
            .unwrap();

        assert_eq!(out.stop, StopReason::Finished, "stall={stall}");
        assert_eq!(out.text, "Answer.");
        let system = provider.requests()[0].messages[0].content.extract_all_text();
        assert!(!system.contains("## Relevant memories"), "stall={stall}");
    }
}

// ── Interleaved calls ──────────────────────────────────────────────

#[tokio::test]
async fn interleaved_calls_run_in_completion_order() {
    let provider = ScriptedProvider::new(vec![
        vec![
            call_delta(0, "a", "add", "{\"a\":"),
            call_delta(1, "b", "add", "{\"a\":1,\"b\":1}"),
            call_delta(0, "", "", "1,\"b\":2}"),
            done(),
        ],
        vec![token("2 and 3."), done()],
    ]);
    let order = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = order.clone();
    let hooks = RunHooks::new().on_tool_call(move |call| sink.lock().push(call.call_id.clone()));

    let out = engine(provider)
        .with_tools(Arc::new(add_tool()))
        .run(
            "add both",
            RunOptions {
                hooks,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(*order.lock(), vec!["b".to_owned(), "a".to_owned()]);

    let roles: Vec<Role> = out.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
            Role::Tool,
            Role::Assistant
        ]
    );

    // Each result sits directly after its own call.
    for pair in out.messages[1..5].chunks(2) {
        let call_id = match &pair[0].content {
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::ToolUse { id, .. } => Some(id.clone()),
                _ => None,
            }),
            MessageContent::Text(_) => None,
        };
        let result_id = match &pair[1].content {
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
                _ => None,
            }),
            MessageContent::Text(_) => None,
        };
        assert!(call_id.is_some());
        assert_eq!(call_id, result_id);
    }
    assert_eq!(out.messages[2].content.extract_all_text(), "2");
    assert_eq!(out.messages[4].content.extract_all_text(), "3");
}
