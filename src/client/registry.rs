//! Provider registry.
//!
//! Epistemic foundation:
//! - K_i: Provider order is the configuration order, and reports keep it
//! - I^R: User configures which providers to measure

use crate::client::{ModelProvider, build_provider};
use crate::models::{Config, ProviderConfig, Result, VelocityError};
use std::sync::Arc;
use tracing::info;

/// Ordered set of providers to measure.
///
/// # Example
///
/// ```ignore
/// use token_velocity::{Config, ProviderRegistry};
///
/// let config = Config::from_file("config.toml".as_ref())?;
/// let registry = ProviderRegistry::from_config(&config)?;
///
/// for provider in registry.iter() {
///     println!("{}", provider.name());
/// }
/// ```
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ModelProvider>>,
}

impl ProviderRegistry {
    /// Build registry from configuration, resolving secrets from the environment.
    pub fn from_config(config: &Config) -> Result<Self> {
        let resolved = config.resolve_providers()?;
        Self::from_resolved(resolved, config.run.timeout_secs)
    }

    /// Build registry from already resolved provider configs.
    pub fn from_resolved(configs: Vec<ProviderConfig>, timeout_secs: u64) -> Result<Self> {
        let mut providers = Vec::with_capacity(configs.len());
        for config in configs {
            info!(
                provider = %config.name,
                kind = ?config.kind,
                model = %config.model,
                authenticated = config.api_key.is_some(),
                "Registered provider"
            );
            providers.push(build_provider(config, timeout_secs)?);
        }
        Ok(Self { providers })
    }

    /// Wrap providers built elsewhere (custom implementations, test doubles).
    pub fn from_providers(providers: Vec<Arc<dyn ModelProvider>>) -> Self {
        Self { providers }
    }

    /// Get provider by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ModelProvider>> {
        self.providers
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }

    /// Like [`get`](Self::get), but a missing provider is an error.
    pub fn require(&self, name: &str) -> Result<&Arc<dyn ModelProvider>> {
        self.get(name)
            .ok_or_else(|| VelocityError::ProviderNotFound(name.to_string()))
    }

    /// Iterate providers in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ModelProvider>> {
        self.providers.iter()
    }

    /// Provider names in configuration order.
    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderKind;

    #[test]
    fn test_registry_keeps_order_and_lookup() {
        let configs = vec![
            ProviderConfig::new("SambaNova", ProviderKind::SambaNova, None, "m1"),
            ProviderConfig::new("Groq", ProviderKind::Groq, Some("k".to_string()), "m2"),
            ProviderConfig::new("NVIDIA", ProviderKind::Nvidia, None, "m3"),
        ];

        let registry = ProviderRegistry::from_resolved(configs, 10).unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.names(), vec!["SambaNova", "Groq", "NVIDIA"]);
        assert_eq!(registry.get("groq").map(|p| p.name()), Some("Groq"));
        assert!(registry.get("together").is_none());
        assert!(matches!(
            registry.require("together"),
            Err(VelocityError::ProviderNotFound(_))
        ));
    }
}
