//! Built-in tools backed by the memory and goal collaborators.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tw_domain::error::{Error, Result};
use tw_domain::tool::ToolDefinition;
use tw_memory::{Collaborators, GoalProvider, MemoryProvider};

use crate::registry::{ToolHandler, ToolRegistry};

const DEFAULT_SEARCH_LIMIT: usize = 10;
const MAX_SEARCH_LIMIT: usize = 50;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn memory_search_def() -> ToolDefinition {
    ToolDefinition {
        name: "memory_search".into(),
        description: "Search long-term memory for relevant facts and notes.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "limit": { "type": "integer", "description": "Max results (default 10)" }
            },
            "required": ["query"]
        }),
    }
}

fn memory_create_def() -> ToolDefinition {
    ToolDefinition {
        name: "memory_create".into(),
        description: "Store a fact or note in long-term memory.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "Content to store" },
                "memory_type": {
                    "type": "string",
                    "description": "Kind of memory, e.g. 'knowledge', 'preference', 'event' (default 'knowledge')"
                },
                "metadata": { "type": "object", "description": "Extra key/value attributes" }
            },
            "required": ["content"]
        }),
    }
}

fn goals_list_def() -> ToolDefinition {
    ToolDefinition {
        name: "goals_list".into(),
        description: "List the active goals, highest priority first.".into(),
        parameters: json!({ "type": "object", "properties": {} }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MemorySearchTool {
    memory: Arc<dyn MemoryProvider>,
}

#[async_trait]
impl ToolHandler for MemorySearchTool {
    async fn call(&self, args: Value) -> Result<Value> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| Error::tool("memory_search", "'query' is required"))?;
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|v| (v as usize).clamp(1, MAX_SEARCH_LIMIT))
            .unwrap_or(DEFAULT_SEARCH_LIMIT);

        let records = self.memory.search(query, limit).await?;
        let hits: Vec<Value> = records
            .into_iter()
            .map(|r| {
                json!({
                    "id": r.id,
                    "content": r.content,
                    "memory_type": r.memory_type,
                    "score": r.score,
                    "created_at": r.created_at.to_rfc3339(),
                })
            })
            .collect();
        Ok(json!({ "count": hits.len(), "memories": hits }))
    }
}

pub struct MemoryCreateTool {
    memory: Arc<dyn MemoryProvider>,
}

#[async_trait]
impl ToolHandler for MemoryCreateTool {
    async fn call(&self, args: Value) -> Result<Value> {
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::tool("memory_create", "'content' is required"))?;
        let memory_type = args
            .get("memory_type")
            .and_then(|v| v.as_str())
            .unwrap_or("knowledge");
        let metadata: HashMap<String, Value> = args
            .get("metadata")
            .and_then(|v| v.as_object())
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        let record = self.memory.create(content, memory_type, metadata).await?;
        Ok(json!({
            "id": record.id,
            "created_at": record.created_at.to_rfc3339(),
        }))
    }
}

pub struct GoalsListTool {
    goals: Arc<dyn GoalProvider>,
}

#[async_trait]
impl ToolHandler for GoalsListTool {
    async fn call(&self, _args: Value) -> Result<Value> {
        let goals = self.goals.list_active().await?;
        Ok(serde_json::to_value(goals)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Register `memory_search`, `memory_create` and `goals_list`.
pub fn register_builtin_tools(registry: &ToolRegistry, collab: &Collaborators) {
    registry.register_handler(
        memory_search_def(),
        Arc::new(MemorySearchTool {
            memory: collab.memory.clone(),
        }),
    );
    registry.register_handler(
        memory_create_def(),
        Arc::new(MemoryCreateTool {
            memory: collab.memory.clone(),
        }),
    );
    registry.register_handler(
        goals_list_def(),
        Arc::new(GoalsListTool {
            goals: collab.goals.clone(),
        }),
    );
}

/// A fresh registry holding only the built-in tools.
pub fn builtin_registry(collab: &Collaborators) -> ToolRegistry {
    let registry = ToolRegistry::new();
    register_builtin_tools(&registry, collab);
    registry
}
