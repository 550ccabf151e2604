//! Provider registry.
//!
//! Constructs and holds all configured LLM provider instances. At startup the
//! registry reads the [`LlmConfig`], resolves authentication, and instantiates
//! the adapter for each configured provider.

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use std::collections::HashMap;
use std::sync::Arc;
use tw_domain::config::{LlmConfig, ProviderKind};
use tw_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds all instantiated LLM providers.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default_id: Option<String>,
}

impl ProviderRegistry {
    /// Build the registry from the application's [`LlmConfig`].
    ///
    /// Providers that fail to initialize are logged and skipped rather than
    /// aborting the entire startup.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();

        for pc in &config.providers {
            let result: Result<Arc<dyn LlmProvider>> = match pc.kind {
                ProviderKind::OpenaiCompat | ProviderKind::AzureOpenai => {
                    OpenAiCompatProvider::from_config(pc)
                        .map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                }
            };

            match result {
                Ok(provider) => {
                    tracing::info!(provider_id = %pc.id, kind = ?pc.kind, "registered LLM provider");
                    providers.insert(pc.id.clone(), provider);
                }
                Err(e) => {
                    tracing::warn!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        error = %e,
                        "failed to initialize LLM provider, skipping"
                    );
                }
            }
        }

        let default_id = config.resolve_provider().map(|p| p.id.clone());
        Self {
            providers,
            default_id,
        }
    }

    /// Look up a provider by its config id.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// Resolve the provider to use for a call: the explicit id when given,
    /// otherwise the configured default.
    pub fn resolve(&self, provider_id: Option<&str>) -> Result<Arc<dyn LlmProvider>> {
        let id = provider_id
            .or(self.default_id.as_deref())
            .ok_or_else(|| Error::Config("no LLM provider configured".into()))?;
        self.get(id)
            .ok_or_else(|| Error::Config(format!("LLM provider '{id}' is not available")))
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// List all registered provider IDs (sorted).
    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tw_domain::config::{AuthConfig, ProviderConfig};

    fn cfg(id: &str, auth: AuthConfig) -> ProviderConfig {
        ProviderConfig {
            id: id.into(),
            kind: ProviderKind::OpenaiCompat,
            base_url: "http://localhost:11434/v1".into(),
            auth,
            default_model: Some("llama3.1".into()),
        }
    }

    #[test]
    fn failing_provider_is_skipped() {
        let config = LlmConfig {
            providers: vec![
                cfg("local", AuthConfig::default()),
                cfg(
                    "broken",
                    AuthConfig {
                        env: Some("TW_TEST_REGISTRY_MISSING_KEY_5521".into()),
                        ..Default::default()
                    },
                ),
            ],
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config);
        assert_eq!(registry.list_providers(), vec!["local".to_string()]);
        assert_eq!(registry.resolve(None).unwrap().provider_id(), "local");
    }

    #[test]
    fn resolve_without_providers_is_config_error() {
        let registry = ProviderRegistry::from_config(&LlmConfig::default());
        assert!(registry.is_empty());
        assert!(matches!(registry.resolve(None), Err(Error::Config(_))));
    }

    #[test]
    fn resolve_unknown_explicit_id() {
        let config = LlmConfig {
            providers: vec![cfg("local", AuthConfig::default())],
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config);
        let err = registry.resolve(Some("other")).err().unwrap();
        assert!(err.to_string().contains("'other'"));
    }
}
