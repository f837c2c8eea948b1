use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use parley_core::errors::GatewayError;
use parley_core::provider::{LlmProvider, ProviderKind};

use crate::provider::OpenAiCompatProvider;

/// Base URL per provider, as configured at startup.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub ollama_url: String,
    pub lmstudio_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            ollama_url: ProviderKind::Ollama.default_base_url().to_string(),
            lmstudio_url: ProviderKind::LmStudio.default_base_url().to_string(),
        }
    }
}

impl ProviderConfig {
    pub fn url_for(&self, kind: ProviderKind) -> &str {
        match kind {
            ProviderKind::Ollama => &self.ollama_url,
            ProviderKind::LmStudio => &self.lmstudio_url,
        }
    }
}

/// Lookup table from provider kind to client, built once at startup.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry with one OpenAI-compatible client per known provider.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, GatewayError> {
        let mut registry = Self::new();
        for kind in ProviderKind::ALL {
            let provider = OpenAiCompatProvider::new(kind, config.url_for(kind))?;
            info!(provider = %kind, base_url = %provider.base_url(), "provider registered");
            registry.register(Arc::new(provider));
        }
        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|k| self.providers.contains_key(k))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    #[test]
    fn from_config_registers_every_kind() {
        let config = ProviderConfig {
            ollama_url: "http://localhost:11434".into(),
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.kinds(), ProviderKind::ALL.to_vec());
        let ollama = registry.get(ProviderKind::Ollama).unwrap();
        assert_eq!(ollama.base_url(), "http://localhost:11434/v1");
    }

    #[test]
    fn missing_kind_is_none() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProvider::new(ProviderKind::Ollama, vec![])));
        assert!(registry.get(ProviderKind::Ollama).is_some());
        assert!(registry.get(ProviderKind::LmStudio).is_none());
        assert_eq!(registry.kinds(), vec![ProviderKind::Ollama]);
    }
}
