//! Lifetime tags controlling where realized values are cached

use std::fmt;

/// Lifetime tag of a composer or a scope
///
/// On a composer the tag says where its realized value is cached: in the root
/// scope, in every scope of one custom kind, or nowhere (`Transient`). On a
/// scope it names the scope's kind; `Transient` is never a valid scope kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(from = "String", into = "String"))]
pub enum LifetimeTag {
    /// Always resolvable, cached once in the root scope
    #[default]
    Root,
    /// Never cached, rebuilt on every resolution
    Transient,
    /// Cached once per scope of the named kind
    Custom(String),
}

impl LifetimeTag {
    /// Create a custom lifetime tag such as `"tenant"` or `"request"`.
    /// The reserved names `"root"` and `"transient"` map to their variants.
    pub fn custom(name: impl Into<String>) -> Self {
        LifetimeTag::from(name.into())
    }

    /// Parse a tag the way it is written in configuration files
    pub fn parse(value: &str) -> Self {
        match value {
            "root" => LifetimeTag::Root,
            "transient" => LifetimeTag::Transient,
            other => LifetimeTag::Custom(other.to_string()),
        }
    }

    /// Whether realized values under this tag are cached
    pub fn supports_caching(&self) -> bool {
        !matches!(self, LifetimeTag::Transient)
    }

    pub fn is_root(&self) -> bool {
        matches!(self, LifetimeTag::Root)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, LifetimeTag::Transient)
    }

    /// Whether a composer with this tag belongs in a store owned by a scope
    /// of kind `scope_tag`
    pub fn applies_to(&self, scope_tag: &LifetimeTag) -> bool {
        self.is_transient() || self == scope_tag
    }

    pub fn as_str(&self) -> &str {
        match self {
            LifetimeTag::Root => "root",
            LifetimeTag::Transient => "transient",
            LifetimeTag::Custom(name) => name,
        }
    }
}

impl fmt::Display for LifetimeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for LifetimeTag {
    fn from(value: &str) -> Self {
        LifetimeTag::parse(value)
    }
}

impl From<String> for LifetimeTag {
    fn from(value: String) -> Self {
        LifetimeTag::parse(&value)
    }
}

impl From<LifetimeTag> for String {
    fn from(tag: LifetimeTag) -> Self {
        tag.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reserved_names() {
        assert_eq!(LifetimeTag::parse("root"), LifetimeTag::Root);
        assert_eq!(LifetimeTag::parse("transient"), LifetimeTag::Transient);
        assert_eq!(LifetimeTag::parse("tenant"), LifetimeTag::custom("tenant"));
    }

    #[test]
    fn test_caching_support() {
        assert!(LifetimeTag::Root.supports_caching());
        assert!(LifetimeTag::custom("request").supports_caching());
        assert!(!LifetimeTag::Transient.supports_caching());
    }

    #[test]
    fn test_applies_to() {
        let tenant = LifetimeTag::custom("tenant");
        assert!(LifetimeTag::Transient.applies_to(&tenant));
        assert!(LifetimeTag::Transient.applies_to(&LifetimeTag::Root));
        assert!(tenant.applies_to(&tenant));
        assert!(!tenant.applies_to(&LifetimeTag::Root));
        assert!(!LifetimeTag::Root.applies_to(&tenant));
    }
}
