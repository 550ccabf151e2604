//! Wiring: config → provider, collaborators, tools → orchestrator.

use std::sync::Arc;

use anyhow::Context;
use tw_domain::config::Config;
use tw_engine::ConversationOrchestrator;
use tw_memory::{create_collaborators, Collaborators};
use tw_providers::ProviderRegistry;
use tw_tools::{builtin_registry, ToolRegistry};

/// Everything a CLI command needs to run conversations.
pub struct Runtime {
    pub orchestrator: ConversationOrchestrator,
    pub provider_id: String,
    pub collaborators: Collaborators,
}

/// Build the memory collaborators and the builtin tool catalogue.
pub fn build_tools(config: &Config) -> anyhow::Result<(Collaborators, ToolRegistry)> {
    let collaborators =
        create_collaborators(&config.memory).context("initializing memory collaborators")?;
    let tools = builtin_registry(&collaborators);
    Ok((collaborators, tools))
}

/// Build the full runtime. `model` overrides `llm.model` for this process.
pub fn build_runtime(config: &Config, model: Option<String>) -> anyhow::Result<Runtime> {
    let providers = ProviderRegistry::from_config(&config.llm);
    if providers.is_empty() {
        anyhow::bail!(
            "no usable LLM providers; add an [[llm.providers]] entry to the config \
             (see `threadweave config validate`)"
        );
    }
    let provider = providers.resolve(config.llm.default_provider.as_deref())?;
    let provider_id = provider.provider_id().to_owned();

    let (collaborators, tools) = build_tools(config)?;
    tracing::debug!(
        provider = %provider_id,
        tools = tools.len(),
        memory = ?config.memory.transport,
        "runtime ready"
    );

    let orchestrator = ConversationOrchestrator::new(provider, config.engine.clone())
        .with_tools(Arc::new(tools))
        .with_collaborators(&collaborators)
        .with_model(model.or_else(|| config.llm.model.clone()))
        .with_temperature(config.llm.temperature);

    Ok(Runtime {
        orchestrator,
        provider_id,
        collaborators,
    })
}
