//! In-process memory and goal stores.
//!
//! Used when `memory.transport = "local"` and as test doubles. Search is a
//! plain keyword overlap score; there is no embedding or vector index.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tw_domain::error::{Error, Result};

use crate::provider::{GoalProvider, MemoryProvider};
use crate::types::{Goal, GoalStatus, MemoryRecord};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub struct LocalMemoryStore {
    records: RwLock<Vec<MemoryRecord>>,
}

impl LocalMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Snapshot of every stored record, oldest first.
    pub fn all(&self) -> Vec<MemoryRecord> {
        self.records.read().clone()
    }
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Fraction of distinct query terms that occur in `content`.
fn keyword_score(query_terms: &[String], content: &str) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_terms = terms(content);
    let hits = query_terms
        .iter()
        .filter(|q| content_terms.iter().any(|c| c == *q))
        .count();
    hits as f64 / query_terms.len() as f64
}

#[async_trait]
impl MemoryProvider for LocalMemoryStore {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
        let mut query_terms = terms(query);
        query_terms.sort();
        query_terms.dedup();

        let records = self.records.read();

        // No usable terms: most recent first.
        if query_terms.is_empty() {
            return Ok(records.iter().rev().take(limit).cloned().collect());
        }

        let mut scored: Vec<(f64, usize)> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (keyword_score(&query_terms, &r.content), i))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        // Best score first; ties go to the newer record.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(score, i)| MemoryRecord {
                score: Some(score),
                ..records[i].clone()
            })
            .collect())
    }

    async fn create(
        &self,
        content: &str,
        memory_type: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<MemoryRecord> {
        if content.trim().is_empty() {
            return Err(Error::Memory("memory content must not be empty".into()));
        }
        let record = MemoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.to_owned(),
            memory_type: memory_type.to_owned(),
            metadata,
            created_at: Utc::now(),
            score: None,
        };
        self.records.write().push(record.clone());
        tracing::debug!(id = %record.id, memory_type, "stored local memory");
        Ok(record)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Goal store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub struct LocalGoalStore {
    goals: RwLock<Vec<Goal>>,
}

impl LocalGoalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_goals(goals: impl IntoIterator<Item = Goal>) -> Self {
        Self {
            goals: RwLock::new(goals.into_iter().collect()),
        }
    }

    /// Add a goal and return its id.
    pub fn add(&self, goal: Goal) -> String {
        let id = goal.id.clone();
        self.goals.write().push(goal);
        id
    }

    /// Update progress; reaching 1.0 marks the goal completed.
    pub fn set_progress(&self, id: &str, progress: f32) -> Result<()> {
        let mut goals = self.goals.write();
        let goal = goals
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| Error::Memory(format!("unknown goal '{id}'")))?;
        goal.progress = progress.clamp(0.0, 1.0);
        if goal.progress >= 1.0 {
            goal.status = GoalStatus::Completed;
        }
        Ok(())
    }

    pub fn abandon(&self, id: &str) -> Result<()> {
        let mut goals = self.goals.write();
        let goal = goals
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| Error::Memory(format!("unknown goal '{id}'")))?;
        goal.status = GoalStatus::Abandoned;
        Ok(())
    }
}

#[async_trait]
impl GoalProvider for LocalGoalStore {
    async fn list_active(&self) -> Result<Vec<Goal>> {
        let mut active: Vec<Goal> = self
            .goals
            .read()
            .iter()
            .filter(|g| g.status == GoalStatus::Active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(active)
    }
}
