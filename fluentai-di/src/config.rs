//! Configuration-based scope layout

use crate::context::{ContextPolicy, ScopeContext};
use crate::error::{DiError, DiResult};
use crate::lifetime::LifetimeTag;
use crate::registry::ScopeRegistry;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Scope configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Scope id
    pub id: String,
    /// Scope kind
    pub lifetime: LifetimeTag,
    /// Parent scope id, root when omitted
    #[serde(default)]
    pub parent: Option<String>,
    /// Context declared by this scope
    #[serde(default)]
    pub context: Option<ScopeContext>,
}

/// Registry configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How scope contexts are merged
    #[serde(default)]
    pub context_policy: ContextPolicy,
    /// Scopes to create, parents before children
    #[serde(default)]
    pub scopes: Vec<ScopeConfig>,
}

impl RegistryConfig {
    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> DiResult<Self> {
        toml::from_str(toml_str)
            .map_err(|e| DiError::ConfigError(format!("Failed to parse TOML: {}", e)))
    }

    /// Load configuration from JSON string
    pub fn from_json(json_str: &str) -> DiResult<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| DiError::ConfigError(format!("Failed to parse JSON: {}", e)))
    }

    /// Create every configured scope in `registry`
    pub fn apply(&self, registry: &ScopeRegistry) -> DiResult<()> {
        if registry.policy() != self.context_policy {
            return Err(DiError::ConfigError(format!(
                "registry uses the {:?} context policy, configuration asks for {:?}",
                registry.policy(),
                self.context_policy
            )));
        }

        for scope in &self.scopes {
            registry.ensure_scope(
                &scope.id,
                scope.lifetime.clone(),
                scope.parent.as_deref(),
                scope.context.clone(),
            )?;
        }
        debug!("Applied configuration with {} scope(s)", self.scopes.len());
        Ok(())
    }

    /// A new registry with this configuration's policy and scopes
    pub fn build_registry(&self) -> DiResult<ScopeRegistry> {
        let registry = ScopeRegistry::with_policy(self.context_policy);
        self.apply(&registry)?;
        Ok(registry)
    }
}

// Example configuration file format:
// ```toml
// context_policy = "strict"
//
// [[scopes]]
// id = "app"
// lifetime = "app"
// context = { environment = "prod" }
//
// [[scopes]]
// id = "tenant-a"
// lifetime = "tenant"
// parent = "app"
// context = { tenant = "a" }
// ```

#[cfg(test)]
mod tests {
    use super::*;

    const TOML: &str = r#"
context_policy = "lenient"

[[scopes]]
id = "app"
lifetime = "app"
context = { environment = "prod" }

[[scopes]]
id = "tenant-a"
lifetime = "tenant"
parent = "app"
context = { tenant = "a" }
"#;

    #[test]
    fn test_from_toml() {
        let config = RegistryConfig::from_toml(TOML).unwrap();

        assert_eq!(config.context_policy, ContextPolicy::Lenient);
        assert_eq!(config.scopes.len(), 2);
        assert_eq!(config.scopes[1].lifetime, LifetimeTag::custom("tenant"));
        assert_eq!(config.scopes[1].parent.as_deref(), Some("app"));
    }

    #[test]
    fn test_from_json_defaults() {
        let config = RegistryConfig::from_json(r#"{"scopes": [{"id": "app", "lifetime": "app"}]}"#)
            .unwrap();

        assert_eq!(config.context_policy, ContextPolicy::Strict);
        assert_eq!(config.scopes[0].parent, None);
        assert_eq!(config.scopes[0].context, None);
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(
            RegistryConfig::from_toml("scopes = 3"),
            Err(DiError::ConfigError(_))
        ));
        assert!(matches!(
            RegistryConfig::from_json("{"),
            Err(DiError::ConfigError(_))
        ));
    }

    #[test]
    fn test_build_registry() {
        let registry = RegistryConfig::from_toml(TOML).unwrap().build_registry().unwrap();

        let tenant = registry.get_resolver("tenant-a").unwrap();
        assert_eq!(tenant.context().get("environment"), Some("prod"));
        assert_eq!(tenant.context().get("tenant"), Some("a"));
    }

    #[test]
    fn test_apply_rejects_policy_mismatch() {
        let config = RegistryConfig::from_toml(TOML).unwrap();
        assert!(matches!(
            config.apply(&ScopeRegistry::new()),
            Err(DiError::ConfigError(_))
        ));
    }
}
