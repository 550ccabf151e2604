//! REST implementation of [`MemoryProvider`] and [`GoalProvider`].
//!
//! `RestMemoryClient` wraps a `reqwest::Client` and translates every trait
//! method into the corresponding HTTP call, with retry and exponential
//! back-off on transient (5xx / timeout / connect) failures.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tw_domain::config::MemoryConfig;
use tw_domain::error::{Error, Result};
use tw_domain::trace::TraceEvent;
use uuid::Uuid;

use crate::provider::{GoalProvider, MemoryProvider};
use crate::types::{
    parse_timestamp, Goal, GoalDto, IngestResponse, MemoryIngestRequest, MemoryRecord,
    SearchRequest, SearchResponse,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A REST client for the memory service.
///
/// Created once and reused for the lifetime of the process. The underlying
/// `reqwest::Client` maintains a connection pool.
#[derive(Debug, Clone)]
pub struct RestMemoryClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl RestMemoryClient {
    pub fn new(cfg: &MemoryConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        let api_key = match &cfg.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                Error::Auth(format!("environment variable '{var}' not set or not valid UTF-8"))
            })?),
            None => None,
        };

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key,
            max_retries: cfg.max_retries,
        })
    }

    // ── request helpers ──────────────────────────────────────────────

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        let rb = rb
            .header("X-Client-Type", "threadweave")
            .header("X-Trace-Id", Uuid::new_v4().to_string());
        match &self.api_key {
            Some(key) => rb.header("X-Api-Key", key),
            None => rb,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ── retry engine ─────────────────────────────────────────────────

    /// Execute a request with retry and exponential back-off.
    ///
    /// * Retries on 5xx status codes, timeouts and connection errors.
    /// * Does **not** retry on 4xx (client errors are permanent).
    /// * Emits a `TraceEvent::MemoryCall` after every attempt.
    async fn execute_with_retry(
        &self,
        endpoint: &str,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let start = Instant::now();
            let result = self.decorate(build_request()).send().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    TraceEvent::MemoryCall {
                        endpoint: endpoint.to_owned(),
                        status: status.as_u16(),
                        duration_ms,
                    }
                    .emit();

                    if status.is_server_error() {
                        let body = resp.text().await.unwrap_or_default();
                        last_err = Some(Error::Memory(format!(
                            "{endpoint} returned {}: {body}",
                            status.as_u16()
                        )));
                        continue;
                    }

                    if status.is_client_error() {
                        let body = resp.text().await.unwrap_or_default();
                        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                            return Err(Error::Auth(format!(
                                "{endpoint} auth failed ({}): {body}",
                                status.as_u16()
                            )));
                        }
                        return Err(Error::Memory(format!(
                            "{endpoint} returned {}: {body}",
                            status.as_u16()
                        )));
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    TraceEvent::MemoryCall {
                        endpoint: endpoint.to_owned(),
                        status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                        duration_ms,
                    }
                    .emit();
                    tracing::debug!(endpoint, attempt, error = %e, "memory request failed");
                    last_err = Some(from_reqwest(e));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Memory(format!("{endpoint}: all retries exhausted"))))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        resp: Response,
        what: &str,
    ) -> Result<T> {
        let body = resp.text().await.map_err(from_reqwest)?;
        serde_json::from_str(&body)
            .map_err(|e| Error::Memory(format!("failed to parse {what} response: {e}: {body}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl MemoryProvider for RestMemoryClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
        let url = self.url("/api/rag/search");
        let req = SearchRequest {
            query: query.to_owned(),
            limit: Some(limit as u32),
            threshold: 0.3,
        };
        let resp = self
            .execute_with_retry("POST /api/rag/search", || self.http.post(&url).json(&req))
            .await?;

        let parsed: SearchResponse = Self::read_json(resp, "search").await?;
        Ok(parsed
            .memories
            .into_iter()
            .take(limit)
            .map(|m| m.into_record())
            .collect())
    }

    async fn create(
        &self,
        content: &str,
        memory_type: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<MemoryRecord> {
        let url = self.url("/api/memories");
        let req = MemoryIngestRequest {
            content: content.to_owned(),
            memory_type: memory_type.to_owned(),
            source: Some("threadweave".into()),
            metadata: metadata.clone(),
        };
        let resp = self
            .execute_with_retry("POST /api/memories", || self.http.post(&url).json(&req))
            .await?;

        let parsed: IngestResponse = Self::read_json(resp, "ingest").await?;
        Ok(MemoryRecord {
            id: parsed.memory_id,
            content: req.content,
            memory_type: req.memory_type,
            metadata,
            created_at: parsed
                .created_at
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
            score: None,
        })
    }
}

#[async_trait]
impl GoalProvider for RestMemoryClient {
    async fn list_active(&self) -> Result<Vec<Goal>> {
        let url = self.url("/api/goals");
        let resp = self
            .execute_with_retry("GET /api/goals", || {
                self.http.get(&url).query(&[("status", "active")])
            })
            .await?;

        let dtos: Vec<GoalDto> = Self::read_json(resp, "goals").await?;
        let mut goals: Vec<Goal> = dtos.into_iter().map(GoalDto::into_goal).collect();
        goals.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(goals)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error conversion helper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convert a `reqwest::Error` into a domain `Error`.
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
