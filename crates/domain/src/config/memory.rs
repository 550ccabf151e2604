use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory / goal collaborator connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "d_transport")]
    pub transport: MemoryTransport,
    #[serde(default = "d_url")]
    pub base_url: String,
    /// Env var holding the API key sent as `X-Api-Key`.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "d_8000")]
    pub timeout_ms: u64,
    #[serde(default = "d_3")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTransport {
    /// In-process store, lives as long as the process.
    Local,
    /// HTTP memory service.
    Rest,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            transport: MemoryTransport::Local,
            base_url: d_url(),
            api_key_env: None,
            timeout_ms: 8000,
            max_retries: 3,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_transport() -> MemoryTransport {
    MemoryTransport::Local
}
fn d_url() -> String {
    "http://localhost:5000".into()
}
fn d_8000() -> u64 {
    8000
}
fn d_3() -> u32 {
    3
}
