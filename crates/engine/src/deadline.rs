//! Deadlines for external round trips.

use std::future::Future;
use std::time::Duration;

use tw_domain::config::EngineConfig;
use tw_domain::error::{Error, Result};

/// Await `fut`, failing with [`Error::Timeout`] once `limit` elapses.
pub async fn with_deadline<T, F>(label: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(label, limit_ms = limit.as_millis() as u64, "deadline exceeded");
            Err(Error::Timeout(format!(
                "{label} exceeded {}ms",
                limit.as_millis()
            )))
        }
    }
}

/// The two deadline classes used by the engine.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    /// Opening a generation stream and each wait for its next event.
    pub generation: Duration,
    /// Memory search and goal listing.
    pub lookup: Duration,
}

impl Deadlines {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            generation: Duration::from_millis(cfg.generation_timeout_ms),
            lookup: Duration::from_millis(cfg.lookup_timeout_ms),
        }
    }
}
