//! Collaborator traits for long-term memory and goals.

use async_trait::async_trait;
use std::collections::HashMap;
use tw_domain::error::Result;

use crate::types::{Goal, MemoryRecord};

/// Abstraction over a memory backend (REST service, local store, test double).
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    /// Return up to `limit` memories relevant to `query`, best first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryRecord>>;

    /// Store a new memory and return the stored record.
    async fn create(
        &self,
        content: &str,
        memory_type: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<MemoryRecord>;
}

/// Abstraction over a goal tracker.
#[async_trait]
pub trait GoalProvider: Send + Sync {
    /// Active goals, highest priority first.
    async fn list_active(&self) -> Result<Vec<Goal>>;
}
