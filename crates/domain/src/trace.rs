use serde::Serialize;

/// Structured trace events emitted across all Threadweave crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ContextBuilt {
        memories: usize,
        goals: usize,
        system_chars: usize,
    },
    MemoryCall {
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
    LlmRequest {
        provider: String,
        model: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    ToolExecuted {
        call_id: String,
        tool_name: String,
        is_error: bool,
        duration_ms: u64,
    },
    RoundFinished {
        round: u32,
        tool_calls: usize,
        text_chars: usize,
    },
    RunFinished {
        rounds: u32,
        stop_reason: String,
    },
    TranscriptTruncated {
        dropped: usize,
        retained: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "tw_event");
    }
}
