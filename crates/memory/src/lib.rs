//! `tw-memory`: memory and goal collaborators for Threadweave.
//!
//! Provides the [`MemoryProvider`] and [`GoalProvider`] traits, a REST
//! implementation with retry ([`RestMemoryClient`]), in-process stores
//! ([`LocalMemoryStore`], [`LocalGoalStore`]) and the wire DTOs.
//!
//! # Transport selection
//!
//! | Transport | Implementation                           |
//! |-----------|------------------------------------------|
//! | `local`   | `LocalMemoryStore` + `LocalGoalStore`    |
//! | `rest`    | `RestMemoryClient` (serves both traits)  |

pub mod local;
pub mod provider;
pub mod rest;
pub mod types;

pub use local::{LocalGoalStore, LocalMemoryStore};
pub use provider::{GoalProvider, MemoryProvider};
pub use rest::RestMemoryClient;
pub use types::{Goal, GoalStatus, MemoryRecord};

use std::sync::Arc;

use tw_domain::config::{MemoryConfig, MemoryTransport};
use tw_domain::error::Result;

/// The memory and goal collaborators selected by config.
#[derive(Clone)]
pub struct Collaborators {
    pub memory: Arc<dyn MemoryProvider>,
    pub goals: Arc<dyn GoalProvider>,
}

/// Build the collaborators for the configured transport.
pub fn create_collaborators(cfg: &MemoryConfig) -> Result<Collaborators> {
    match cfg.transport {
        MemoryTransport::Local => {
            tracing::info!("using in-process memory and goal stores");
            Ok(Collaborators {
                memory: Arc::new(LocalMemoryStore::new()),
                goals: Arc::new(LocalGoalStore::new()),
            })
        }
        MemoryTransport::Rest => {
            let client = Arc::new(RestMemoryClient::new(cfg)?);
            tracing::info!(base_url = %cfg.base_url, "using REST memory service");
            Ok(Collaborators {
                memory: client.clone(),
                goals: client,
            })
        }
    }
}
