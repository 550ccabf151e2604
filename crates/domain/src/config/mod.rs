mod engine;
mod llm;
mod memory;

pub use engine::*;
pub use llm::*;
pub use memory::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.engine.max_rounds == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "engine.max_rounds".into(),
                message: "max_rounds must be greater than 0".into(),
            });
        }

        if self.engine.transcript_max_messages == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "engine.transcript_max_messages".into(),
                message: "transcript_max_messages must be greater than 0".into(),
            });
        }

        // Generation streams get a longer deadline than simple lookups.
        if self.engine.generation_timeout_ms < self.engine.lookup_timeout_ms {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "engine.generation_timeout_ms".into(),
                message: "generation timeout is shorter than the lookup timeout".into(),
            });
        }

        if self.memory.transport == MemoryTransport::Rest && self.memory.base_url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "memory.base_url".into(),
                message: "base_url must not be empty for the rest transport".into(),
            });
        }

        if self.llm.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no LLM providers configured".into(),
            });
        }

        if let Some(id) = &self.llm.default_provider {
            if !self.llm.providers.iter().any(|p| &p.id == id) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "llm.default_provider".into(),
                    message: format!("unknown provider '{id}'"),
                });
            }
        }

        for (i, provider) in self.llm.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].id"),
                    message: "provider id must not be empty".into(),
                });
            }
            if provider.base_url.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].base_url"),
                    message: "provider base_url must not be empty".into(),
                });
            }
        }

        errors
    }
}
