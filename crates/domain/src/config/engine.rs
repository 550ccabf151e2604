use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on generation rounds per call.
    #[serde(default = "d_10")]
    pub max_rounds: u32,
    /// Transcript capacity (messages) before the oldest are dropped.
    #[serde(default = "d_60")]
    pub transcript_max_messages: usize,
    /// Deadline for opening a generation stream and for each wait on the
    /// next stream event.
    #[serde(default = "d_120000")]
    pub generation_timeout_ms: u64,
    /// Deadline for simple lookups (memory search, goal listing).
    #[serde(default = "d_8000")]
    pub lookup_timeout_ms: u64,
    /// Number of memories injected into the system context. 0 disables
    /// the lookup.
    #[serde(default = "d_5")]
    pub memory_context_limit: usize,
    /// Include active goals in the system context.
    #[serde(default = "d_true")]
    pub include_goals: bool,
    /// Store a short exchange summary in memory after a finished run.
    #[serde(default)]
    pub capture_on_finish: bool,
    /// Base system prompt. `None` uses the built-in prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            transcript_max_messages: 60,
            generation_timeout_ms: 120_000,
            lookup_timeout_ms: 8_000,
            memory_context_limit: 5,
            include_goals: true,
            capture_on_finish: false,
            system_prompt: None,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_10() -> u32 {
    10
}
fn d_60() -> usize {
    60
}
fn d_120000() -> u64 {
    120_000
}
fn d_8000() -> u64 {
    8_000
}
fn d_5() -> usize {
    5
}
fn d_true() -> bool {
    true
}
