//! Model discovery across all configured providers.
//!
//! Each provider's model listing either fully succeeds or contributes one
//! warning string. A failing provider never stops the others from being
//! queried.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::llm::ProviderRegistry;

/// Shown when discovery finds no models at all.
pub const NO_MODELS_MESSAGE: &str = "No models found from any provider. \
    Please ensure Ollama or another provider is running and has models available.";

/// A model offered by one of the providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredModel {
    pub id: String,
    /// `"{id} ({provider name})"`.
    pub display_name: String,
    /// Key of the owning provider.
    pub provider: String,
}

/// Merged outcome of querying every provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryResult {
    models: Vec<DiscoveredModel>,
    errors: Vec<String>,
}

impl DiscoveryResult {
    /// Models in first-seen order.
    pub fn models(&self) -> &[DiscoveredModel] {
        &self.models
    }

    /// One message per provider that could not be listed, in query order.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn get(&self, id: &str) -> Option<&DiscoveredModel> {
        self.models.iter().find(|m| m.id == id)
    }

    /// `true` when no provider offered any model.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Insert or overwrite by id. An overwritten model keeps its original position.
    fn insert(&mut self, model: DiscoveredModel) -> Option<DiscoveredModel> {
        match self.models.iter_mut().find(|m| m.id == model.id) {
            Some(existing) => Some(std::mem::replace(existing, model)),
            None => {
                self.models.push(model);
                None
            }
        }
    }
}

/// Query every provider in registry order and merge their model listings.
///
/// When two providers list the same id, the provider queried later wins.
pub async fn discover(registry: &ProviderRegistry) -> DiscoveryResult {
    let mut result = DiscoveryResult::default();
    debug!(providers = registry.len(), "Discovering models");

    for (config, provider) in registry.iter() {
        match provider.list_models().await {
            Ok(models) => {
                info!(provider = %config.key, count = models.len(), "Discovered models");
                for model in models {
                    let discovered = DiscoveredModel {
                        display_name: format!("{} ({})", model.id, config.name),
                        id: model.id,
                        provider: config.key.clone(),
                    };
                    if let Some(previous) = result.insert(discovered) {
                        warn!(
                            model = %previous.id,
                            replaced = %previous.provider,
                            provider = %config.key,
                            "Model id offered by several providers, keeping the later one"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(provider = %config.key, url = %config.url, error = %e, "Model discovery failed");
                result.errors.push(format!(
                    "Could not connect to {} at {}: {}",
                    config.name, config.url, e
                ));
            }
        }
    }

    result
}

/// Memoized discovery: providers are queried on first use only.
pub struct Discovery {
    registry: ProviderRegistry,
    result: OnceCell<Arc<DiscoveryResult>>,
}

impl Discovery {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            result: OnceCell::new(),
        }
    }

    /// Return the cached result, running discovery if this is the first call.
    ///
    /// Concurrent first callers wait on a single discovery run.
    pub async fn get_or_discover(&self) -> Arc<DiscoveryResult> {
        self.result
            .get_or_init(|| async { Arc::new(discover(&self.registry).await) })
            .await
            .clone()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }
}
