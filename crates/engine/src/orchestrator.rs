//! Multi-round conversation loop.
//!
//! [`ConversationOrchestrator::run`] drives one call: it builds the system
//! context, then repeats generation rounds (stream, assemble tool calls,
//! execute them, append the round to the transcript) until the model
//! answers without calling a tool or the round bound is reached.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, watch};
use tracing::Instrument;
use tw_domain::config::EngineConfig;
use tw_domain::error::{Error, Result};
use tw_domain::stream::{StreamEvent, Usage};
use tw_domain::tool::{Message, ToolCall, ToolResult};
use tw_domain::trace::TraceEvent;
use tw_memory::{Collaborators, GoalProvider, MemoryProvider};
use tw_providers::{ChatRequest, LlmProvider};
use tw_tools::{ToolExecutor, ToolRegistry};

use crate::aggregator::{ChunkAggregator, Fragment, Part, PartEvent};
use crate::assembler::ToolCallAssembler;
use crate::deadline::{with_deadline, Deadlines};
use crate::transcript::Transcript;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools \
when they help answer the user, then reply concisely.";

const CONTINUE_NUDGE: &str = "Continue from the tool results above. Call another tool if \
you still need information; otherwise give the final answer.";

/// Upper bound on the exchange summary stored after a finished run.
const CAPTURE_MAX_CHARS: usize = 2000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered without requesting a tool.
    Finished,
    /// The round bound was hit while the model still wanted to continue.
    RoundLimit,
    /// A tool asked for the conversation to end.
    Stopped,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Finished => "finished",
            StopReason::RoundLimit => "round_limit",
            StopReason::Stopped => "stopped",
        }
    }
}

/// Where a run currently is. Only surfaced in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Generating,
    ToolCallsPending,
    Executing,
    Done,
}

/// Result of one [`ConversationOrchestrator::run`] call.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    /// Final answer, or the text of every round when the run was cut short.
    pub text: String,
    pub rounds: u32,
    pub stop: StopReason,
    pub usage: Option<Usage>,
    /// The retained transcript, including the user input.
    pub messages: Vec<Message>,
}

type Hook<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Optional observers, invoked synchronously as the run progresses.
#[derive(Default)]
pub struct RunHooks {
    on_fragment: Option<Box<dyn Fn(&str) + Send + Sync>>,
    on_tool_call: Option<Hook<ToolCall>>,
    on_tool_result: Option<Hook<ToolResult>>,
    on_parts_change: Option<Box<dyn Fn(&[Part]) + Send + Sync>>,
    on_part_event: Option<Hook<PartEvent>>,
}

impl RunHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each non-empty text token, as it arrives.
    pub fn on_fragment(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_fragment = Some(Box::new(f));
        self
    }

    /// Each assembled call, before it runs.
    pub fn on_tool_call(mut self, f: impl Fn(&ToolCall) + Send + Sync + 'static) -> Self {
        self.on_tool_call = Some(Box::new(f));
        self
    }

    pub fn on_tool_result(mut self, f: impl Fn(&ToolResult) + Send + Sync + 'static) -> Self {
        self.on_tool_result = Some(Box::new(f));
        self
    }

    /// Full Part list after every change.
    pub fn on_parts_change(mut self, f: impl Fn(&[Part]) + Send + Sync + 'static) -> Self {
        self.on_parts_change = Some(Box::new(f));
        self
    }

    pub fn on_part_event(mut self, f: impl Fn(&PartEvent) + Send + Sync + 'static) -> Self {
        self.on_part_event = Some(Box::new(f));
        self
    }

    fn fragment(&self, text: &str) {
        if let Some(f) = &self.on_fragment {
            f(text);
        }
    }

    fn tool_call(&self, call: &ToolCall) {
        if let Some(f) = &self.on_tool_call {
            f(call);
        }
    }

    fn tool_result(&self, result: &ToolResult) {
        if let Some(f) = &self.on_tool_result {
            f(result);
        }
    }

    fn parts_change(&self, parts: &[Part]) {
        if let Some(f) = &self.on_parts_change {
            f(parts);
        }
    }

    fn part_event(&self, event: &PartEvent) {
        if let Some(f) = &self.on_part_event {
            f(event);
        }
    }
}

impl std::fmt::Debug for RunHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHooks")
            .field("on_fragment", &self.on_fragment.is_some())
            .field("on_tool_call", &self.on_tool_call.is_some())
            .field("on_tool_result", &self.on_tool_result.is_some())
            .field("on_parts_change", &self.on_parts_change.is_some())
            .field("on_part_event", &self.on_part_event.is_some())
            .finish()
    }
}

/// Per-call options.
#[derive(Debug, Default)]
pub struct RunOptions {
    /// Caller tools. They win over internally registered tools of the same name.
    pub tools: Option<Arc<ToolRegistry>>,
    pub hooks: RunHooks,
    /// Overrides `engine.max_rounds`.
    pub max_rounds: Option<u32>,
    /// Prior messages that seed the transcript.
    pub history: Vec<Message>,
}

/// Iteration state of one call.
#[derive(Debug, Default)]
pub struct RoundState {
    /// Rounds started so far.
    pub round: u32,
    /// Text of every round, newline separated.
    pub text: String,
    pub last_result: Option<ToolResult>,
    pub wants_continue: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internal scratch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
struct RoundOutcome {
    text: String,
    tool_calls: usize,
    stop_requested: bool,
    usage: Option<Usage>,
}

/// Call-scoped engine state, owned by one run.
struct RunScratch {
    aggregator: ChunkAggregator,
    assembler: ToolCallAssembler,
    events: broadcast::Receiver<PartEvent>,
    parts: watch::Receiver<Vec<Part>>,
    state: RoundState,
}

impl RunScratch {
    fn new() -> Self {
        let aggregator = ChunkAggregator::new();
        let events = aggregator.subscribe_events();
        let parts = aggregator.subscribe_parts();
        Self {
            aggregator,
            assembler: ToolCallAssembler::new(),
            events,
            parts,
            state: RoundState::default(),
        }
    }

    /// Forward pending aggregator notifications to the hooks.
    fn pump(&mut self, hooks: &RunHooks) {
        loop {
            match self.events.try_recv() {
                Ok(event) => hooks.part_event(&event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "part event observer lagged");
                }
                Err(_) => break,
            }
        }
        if self.parts.has_changed().unwrap_or(false) {
            let snapshot = self.parts.borrow_and_update().clone();
            hooks.parts_change(&snapshot);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ConversationOrchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ConversationOrchestrator {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    memory: Option<Arc<dyn MemoryProvider>>,
    goals: Option<Arc<dyn GoalProvider>>,
    config: EngineConfig,
    deadlines: Deadlines,
    model: Option<String>,
    temperature: Option<f32>,
    executor: ToolExecutor,
}

impl ConversationOrchestrator {
    pub fn new(provider: Arc<dyn LlmProvider>, config: EngineConfig) -> Self {
        Self {
            provider,
            tools: Arc::new(ToolRegistry::new()),
            memory: None,
            goals: None,
            deadlines: Deadlines::from_config(&config),
            config,
            model: None,
            temperature: None,
            executor: ToolExecutor::new(),
        }
    }

    /// Internally registered tools, offered on every call.
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_collaborators(mut self, collab: &Collaborators) -> Self {
        self.memory = Some(collab.memory.clone());
        self.goals = Some(collab.goals.clone());
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryProvider>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_goals(mut self, goals: Arc<dyn GoalProvider>) -> Self {
        self.goals = Some(goals);
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one conversation call to completion.
    ///
    /// Tool failures are reported to the model in-band; only transport
    /// failures and deadline expiry abort the call.
    pub async fn run(&self, input: &str, opts: RunOptions) -> Result<RunOutput> {
        let max_rounds = opts.max_rounds.unwrap_or(self.config.max_rounds).max(1);
        let span = tracing::info_span!(
            "run",
            provider = %self.provider.provider_id(),
            max_rounds,
        );
        self.run_inner(input, opts, max_rounds)
            .instrument(span)
            .await
    }

    async fn run_inner(&self, input: &str, opts: RunOptions, max_rounds: u32) -> Result<RunOutput> {
        let RunOptions {
            tools,
            hooks,
            history,
            ..
        } = opts;

        let merged;
        let registry: &ToolRegistry = match &tools {
            Some(caller) => {
                merged = ToolRegistry::merged(caller, &self.tools);
                &merged
            }
            None => &self.tools,
        };

        let system = self.build_context(input).await;

        let mut transcript = Transcript::new(self.config.transcript_max_messages);
        transcript.extend(history);
        transcript.push(Message::user(input));

        let mut scratch = RunScratch::new();
        let mut usage: Option<Usage> = None;
        let mut stop: Option<StopReason> = None;
        let mut final_text = String::new();

        for round in 0..max_rounds {
            scratch.state.round = round + 1;
            scratch.aggregator.set_group(round);
            scratch.assembler.reset();

            let outcome = self
                .run_round(round, &system, &transcript, registry, &mut scratch, &hooks)
                .instrument(tracing::info_span!("round", round))
                .await?;

            transcript.extend(scratch.aggregator.messages_for_group(round));
            if let Some(u) = &outcome.usage {
                usage.get_or_insert_with(Usage::default).add(u);
            }
            if !outcome.text.is_empty() {
                if !scratch.state.text.is_empty() {
                    scratch.state.text.push('\n');
                }
                scratch.state.text.push_str(&outcome.text);
            }

            TraceEvent::RoundFinished {
                round: round + 1,
                tool_calls: outcome.tool_calls,
                text_chars: outcome.text.chars().count(),
            }
            .emit();

            if outcome.tool_calls == 0 {
                scratch.state.wants_continue = false;
                final_text = outcome.text;
                stop = Some(StopReason::Finished);
                break;
            }
            if outcome.stop_requested {
                scratch.state.wants_continue = false;
                final_text = scratch.state.text.clone();
                stop = Some(StopReason::Stopped);
                break;
            }
            scratch.state.wants_continue = true;
        }

        let rounds = scratch.state.round;
        let stop = match stop {
            Some(reason) => reason,
            None => {
                tracing::warn!(rounds, "round limit reached with tool calls still pending");
                transcript.push(Message::system(format!(
                    "[round limit reached: stopped after {rounds} rounds]"
                )));
                final_text = scratch.state.text.clone();
                StopReason::RoundLimit
            }
        };
        tracing::debug!(phase = ?RunPhase::Done, stop = stop.as_str(), rounds, "run finished");

        TraceEvent::RunFinished {
            rounds,
            stop_reason: stop.as_str().into(),
        }
        .emit();

        if stop == StopReason::Finished && self.config.capture_on_finish {
            self.spawn_capture(input, &final_text, rounds);
        }

        Ok(RunOutput {
            text: final_text,
            rounds,
            stop,
            usage,
            messages: transcript.into_messages(),
        })
    }

    // ── one round ──────────────────────────────────────────────────

    async fn run_round(
        &self,
        round: u32,
        system: &str,
        transcript: &Transcript,
        registry: &ToolRegistry,
        scratch: &mut RunScratch,
        hooks: &RunHooks,
    ) -> Result<RoundOutcome> {
        let mut messages = Vec::with_capacity(transcript.len() + 2);
        messages.push(Message::system(system));
        messages.extend(transcript.messages().iter().cloned());
        if round > 0 {
            messages.push(Message::system(CONTINUE_NUDGE));
        }

        let req = ChatRequest {
            messages,
            tools: registry.definitions(),
            temperature: self.temperature,
            max_tokens: None,
            model: self.model.clone(),
        };
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_owned());

        tracing::debug!(
            phase = ?RunPhase::Generating,
            messages = req.messages.len(),
            tools = req.tools.len(),
            "opening generation stream"
        );

        let llm_span = tracing::info_span!(
            "llm.call",
            provider = %self.provider.provider_id(),
            model = %model,
        );
        let start = Instant::now();
        let mut outcome = RoundOutcome::default();

        let mut stream = with_deadline(
            "llm.open",
            self.deadlines.generation,
            self.provider.chat_stream(&req),
        )
        .instrument(llm_span.clone())
        .await?;

        loop {
            let next = with_deadline("llm.next", self.deadlines.generation, async {
                Ok(stream.next().await)
            })
            .instrument(llm_span.clone())
            .await?;
            let Some(event) = next else {
                break;
            };

            match event? {
                StreamEvent::Token { text } => {
                    if text.is_empty() {
                        continue;
                    }
                    hooks.fragment(&text);
                    outcome.text.push_str(&text);
                    scratch.aggregator.add_fragment(Fragment::Text(text));
                    scratch.pump(hooks);
                }
                StreamEvent::ToolCallDelta { index, delta } => {
                    if let Some(call) = scratch.assembler.process_delta(index, &delta) {
                        self.dispatch(call, registry, scratch, hooks, &mut outcome)
                            .await;
                    }
                }
                StreamEvent::Done {
                    usage,
                    finish_reason,
                } => {
                    tracing::debug!(?finish_reason, "generation done");
                    if let Some(u) = usage {
                        outcome.usage.get_or_insert_with(Usage::default).add(&u);
                    }
                }
                StreamEvent::Error { message } => {
                    return Err(Error::Provider {
                        provider: self.provider.provider_id().to_owned(),
                        message,
                    });
                }
            }
        }

        // Calls whose arguments never closed still run, in index order.
        for call in scratch.assembler.flush() {
            self.dispatch(call, registry, scratch, hooks, &mut outcome)
                .await;
        }

        scratch.aggregator.complete();
        scratch.pump(hooks);

        TraceEvent::LlmRequest {
            provider: self.provider.provider_id().to_owned(),
            model,
            streaming: true,
            duration_ms: start.elapsed().as_millis() as u64,
            prompt_tokens: outcome.usage.map(|u| u.prompt_tokens),
            completion_tokens: outcome.usage.map(|u| u.completion_tokens),
        }
        .emit();

        Ok(outcome)
    }

    async fn dispatch(
        &self,
        call: ToolCall,
        registry: &ToolRegistry,
        scratch: &mut RunScratch,
        hooks: &RunHooks,
        outcome: &mut RoundOutcome,
    ) {
        tracing::debug!(
            phase = ?RunPhase::ToolCallsPending,
            call_id = %call.call_id,
            tool = %call.tool_name,
            "tool call assembled"
        );
        scratch.aggregator.add_fragment(Fragment::tool_call(&call));
        scratch.pump(hooks);
        hooks.tool_call(&call);

        tracing::debug!(phase = ?RunPhase::Executing, call_id = %call.call_id, "executing tool");
        let result = self.executor.execute(&call, registry).await;
        hooks.tool_result(&result);

        if registry
            .get(&call.tool_name)
            .is_some_and(|t| t.handler.stops_conversation())
        {
            outcome.stop_requested = true;
        }

        scratch
            .aggregator
            .add_fragment(Fragment::ToolResult(result.clone()));
        scratch.pump(hooks);
        scratch.state.last_result = Some(result);
        outcome.tool_calls += 1;
    }

    // ── context ────────────────────────────────────────────────────

    /// System prompt plus relevant memories and active goals. Lookup
    /// failures are logged and the section is left out.
    async fn build_context(&self, input: &str) -> String {
        let mut system = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_owned());
        let mut memories = 0;
        let mut goals = 0;

        let limit = self.config.memory_context_limit;
        if let Some(memory) = self.memory.as_ref().filter(|_| limit > 0) {
            let lookup = memory.search(input, limit);
            match with_deadline("memory.search", self.deadlines.lookup, lookup).await {
                Ok(records) if !records.is_empty() => {
                    memories = records.len();
                    system.push_str("\n\n## Relevant memories\n");
                    for record in &records {
                        let _ = writeln!(system, "- {}", record.content.trim());
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "memory lookup failed, continuing without it");
                }
            }
        }

        if let Some(provider) = self.goals.as_ref().filter(|_| self.config.include_goals) {
            match with_deadline("goals.list", self.deadlines.lookup, provider.list_active()).await {
                Ok(active) if !active.is_empty() => {
                    goals = active.len();
                    system.push_str("\n\n## Active goals\n");
                    for goal in &active {
                        let _ = writeln!(
                            system,
                            "- [priority {}] {} ({:.0}% done)",
                            goal.priority,
                            goal.description,
                            goal.progress * 100.0
                        );
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "goal lookup failed, continuing without it");
                }
            }
        }

        TraceEvent::ContextBuilt {
            memories,
            goals,
            system_chars: system.chars().count(),
        }
        .emit();
        system
    }

    /// Store a short summary of the exchange without waiting for it.
    fn spawn_capture(&self, input: &str, answer: &str, rounds: u32) {
        let Some(memory) = self.memory.clone() else {
            return;
        };
        let content = truncate_chars(
            &format!("User: {}\nAssistant: {}", input.trim(), answer.trim()),
            CAPTURE_MAX_CHARS,
        );
        let mut metadata = HashMap::new();
        metadata.insert("source".to_owned(), serde_json::json!("threadweave"));
        metadata.insert("rounds".to_owned(), serde_json::json!(rounds));
        let limit = self.deadlines.lookup;

        tokio::spawn(
            async move {
                let stored = with_deadline(
                    "memory.create",
                    limit,
                    memory.create(&content, "conversation", metadata),
                )
                .await;
                match stored {
                    Ok(record) => tracing::debug!(id = %record.id, "captured exchange"),
                    Err(e) => tracing::warn!(error = %e, "failed to capture exchange"),
                }
            }
            .instrument(tracing::Span::current()),
        );
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé...");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn stop_reason_labels() {
        assert_eq!(StopReason::RoundLimit.as_str(), "round_limit");
        assert_eq!(
            serde_json::to_value(StopReason::Finished).unwrap(),
            serde_json::json!("finished")
        );
    }

    #[test]
    fn hooks_debug_shows_which_are_set() {
        let hooks = RunHooks::new().on_fragment(|_| {});
        let dbg = format!("{hooks:?}");
        assert!(dbg.contains("on_fragment: true"));
        assert!(dbg.contains("on_tool_call: false"));
    }
}
