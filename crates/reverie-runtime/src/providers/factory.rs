//! Provider factories keyed by type name.
//!
//! ```ignore
//! let registry = ProviderRegistry::with_defaults();
//! let provider = registry.create("anthropic", &serde_json::json!({}))?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{AiProvider, ProviderError, UnavailableProvider};

/// Creates providers of one type from JSON configuration.
pub trait ProviderFactory: Send + Sync {
    /// Unique identifier, e.g. "anthropic".
    fn provider_type(&self) -> &'static str;

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn AiProvider>, ProviderError>;

    /// Validate configuration without creating a provider.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;

    fn description(&self) -> &'static str {
        "AI provider"
    }
}

/// Factory for [`UnavailableProvider`], registered as "offline".
pub struct OfflineProviderFactory;

impl ProviderFactory for OfflineProviderFactory {
    fn provider_type(&self) -> &'static str {
        "offline"
    }

    fn create(&self, _config: &JsonValue) -> Result<Arc<dyn AiProvider>, ProviderError> {
        Ok(Arc::new(UnavailableProvider))
    }

    fn validate_config(&self, _config: &JsonValue) -> Result<(), ProviderError> {
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Always-failing provider; every response comes from the static fallback table"
    }
}

/// Factories keyed by provider type, e.g. `"anthropic"`.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any with the same type.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    /// Build a provider of `provider_type` from its JSON config.
    pub fn create(
        &self,
        provider_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn AiProvider>, ProviderError> {
        self.factories
            .get(provider_type)
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "Unknown provider type: '{}'. Available: {:?}",
                    provider_type,
                    self.available_types()
                ))
            })?
            .create(config)
    }

    /// Check a config without building the provider.
    pub fn validate(&self, provider_type: &str, config: &JsonValue) -> Result<(), ProviderError> {
        self.factories
            .get(provider_type)
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!("Unknown provider type: '{}'", provider_type))
            })?
            .validate_config(config)
    }

    /// Registered type names, sorted.
    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// Check if a factory is registered for this type.
    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    /// Registry with every built-in provider compiled into this build.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OfflineProviderFactory));
        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::AnthropicProviderFactory));
        registry
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ScriptedProvider, ScriptedReply};

    struct ScriptedFactory;

    impl ProviderFactory for ScriptedFactory {
        fn provider_type(&self) -> &'static str {
            "scripted"
        }

        fn create(&self, config: &JsonValue) -> Result<Arc<dyn AiProvider>, ProviderError> {
            let reply = config["reply"].as_str().unwrap_or("scripted reply");
            Ok(Arc::new(
                ScriptedProvider::new().always(ScriptedReply::text(reply)),
            ))
        }

        fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
            if config.get("reply").is_some_and(|v| !v.is_string()) {
                return Err(ProviderError::NotConfigured("reply must be a string".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_defaults_include_offline() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.has_provider("offline"));
        let provider = registry.create("offline", &serde_json::json!({})).unwrap();
        assert_eq!(provider.name(), "unavailable");
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedFactory));

        let provider = registry
            .create("scripted", &serde_json::json!({ "reply": "hello" }))
            .unwrap();
        assert_eq!(provider.name(), "scripted");
        assert_eq!(registry.available_types(), vec!["scripted"]);
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new();
        match registry.create("unknown", &serde_json::json!({})) {
            Err(ProviderError::NotConfigured(msg)) => {
                assert!(msg.contains("Unknown provider type"))
            }
            _ => panic!("Expected NotConfigured error"),
        }
    }

    #[test]
    fn test_validate() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedFactory));

        assert!(registry.validate("scripted", &serde_json::json!({})).is_ok());
        assert!(registry
            .validate("scripted", &serde_json::json!({ "reply": 5 }))
            .is_err());
        assert!(registry.validate("unknown", &serde_json::json!({})).is_err());
    }
}
