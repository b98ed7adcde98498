//! Provider registry for the configured OpenAI-compatible backends.

use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::openai::OpenAICompatibleProvider;
use super::provider::LLMProvider;

/// Static description of one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Stable identifier, e.g. `ollama`.
    pub key: String,
    /// Human-readable name shown in the UI.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Base URL of the OpenAI-compatible API, including the version prefix.
    pub url: String,
    /// Credential sent as a bearer token. Local engines accept any placeholder.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// The providers used when the config file does not list any.
pub fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            key: "ollama".to_string(),
            name: "Ollama".to_string(),
            description: "Ollama is an open-source tool for running large language models locally."
                .to_string(),
            url: "http://localhost:11434/v1".to_string(),
            api_key: Some("ollama".to_string()),
        },
        ProviderConfig {
            key: "docker".to_string(),
            name: "Docker".to_string(),
            description: "Docker Model Runner serves models packaged as OCI artifacts.".to_string(),
            url: "http://localhost:12434/engines/v1".to_string(),
            api_key: Some("unused".to_string()),
        },
    ]
}

#[derive(Clone)]
struct Entry {
    config: ProviderConfig,
    implementation: Arc<dyn LLMProvider>,
}

/// Ordered registry of providers, keyed by provider key.
///
/// Iteration follows registration order, which is also the order discovery
/// queries providers in.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    entries: Vec<Entry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build OpenAI-compatible providers for every config, sharing one HTTP client.
    pub fn from_configs(configs: &[ProviderConfig]) -> Self {
        let client = Client::new();
        let mut registry = Self::new();

        for config in configs {
            let provider = OpenAICompatibleProvider::new(
                client.clone(),
                config.url.clone(),
                config.api_key.clone(),
            );
            registry.register(config.clone(), Arc::new(provider));
            info!(provider = %config.key, url = %config.url, "Registered provider");
        }

        if registry.is_empty() {
            warn!("No providers configured; model discovery will find nothing");
        }

        registry
    }

    /// Register a provider implementation. Re-registering a key replaces it in place.
    pub fn register(&mut self, config: ProviderConfig, implementation: Arc<dyn LLMProvider>) {
        let entry = Entry {
            config,
            implementation,
        };
        match self
            .entries
            .iter_mut()
            .find(|e| e.config.key == entry.config.key)
        {
            Some(existing) => {
                warn!(provider = %entry.config.key, "Provider registered twice, replacing");
                *existing = entry;
            }
            None => self.entries.push(entry),
        }
    }

    /// Get a provider implementation by key.
    pub fn get(&self, key: &str) -> Option<Arc<dyn LLMProvider>> {
        self.entry(key).map(|e| e.implementation.clone())
    }

    /// Get a provider's static config by key.
    pub fn config(&self, key: &str) -> Option<&ProviderConfig> {
        self.entry(key).map(|e| &e.config)
    }

    /// Iterate providers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&ProviderConfig, &Arc<dyn LLMProvider>)> {
        self.entries.iter().map(|e| (&e.config, &e.implementation))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.config.key == key)
    }
}
