//! Scope contexts: immutable key/value environments that only ever grow

use crate::error::{DiError, DiResult};
use std::collections::BTreeMap;
use std::fmt;

/// How a scope's declared context is combined with what it already has
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "lowercase"))]
pub enum ContextPolicy {
    /// Any repeated key is a conflict, even when the values agree.
    /// Re-ensuring a scope must repeat its declared context exactly.
    #[default]
    Strict,
    /// Repeated keys are accepted when the values agree.
    /// Re-ensuring a scope may repeat any part of its declared context.
    Lenient,
}

/// Immutable string to string environment attached to a scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(transparent))]
pub struct ScopeContext {
    values: BTreeMap<String, String>,
}

impl ScopeContext {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add one entry while building a context by hand
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Monotonic union: fails when a shared key has disagreeing values
    pub fn merge(&self, other: &ScopeContext) -> DiResult<ScopeContext> {
        self.merge_with(other, ContextPolicy::Lenient)
    }

    /// Union under an explicit policy
    pub fn merge_with(&self, other: &ScopeContext, policy: ContextPolicy) -> DiResult<ScopeContext> {
        let mut merged = self.values.clone();
        for (key, value) in &other.values {
            if let Some(existing) = self.values.get(key) {
                if existing != value || policy == ContextPolicy::Strict {
                    return Err(DiError::ContextConflict {
                        key: key.clone(),
                        existing: Some(existing.clone()),
                        requested: Some(value.clone()),
                    });
                }
            }
            merged.insert(key.clone(), value.clone());
        }
        Ok(ScopeContext { values: merged })
    }

    /// Whether every entry of `self` is also present, with the same value,
    /// in `other`
    pub fn is_part_of(&self, other: &ScopeContext) -> bool {
        self.values
            .iter()
            .all(|(key, value)| other.values.get(key) == Some(value))
    }

    /// Check a context supplied when re-ensuring an existing scope against
    /// the context that scope declared when it was created
    pub(crate) fn check_redeclared(&self, supplied: &ScopeContext, policy: ContextPolicy) -> DiResult<()> {
        let accepted = match policy {
            ContextPolicy::Strict => self == supplied,
            ContextPolicy::Lenient => supplied.is_part_of(self),
        };
        if accepted {
            return Ok(());
        }

        let conflict = supplied
            .values
            .iter()
            .find(|(key, value)| self.values.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), Some(value.clone())))
            .or_else(|| {
                self.values
                    .keys()
                    .find(|key| !supplied.values.contains_key(*key))
                    .map(|key| (key.clone(), None))
            });
        let (key, requested) = conflict.unwrap_or_default();
        Err(DiError::ContextConflict {
            existing: self.values.get(&key).cloned(),
            key,
            requested,
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ScopeContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        ScopeContext {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for ScopeContext {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl fmt::Display for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", key, value)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_adds_new_keys() {
        let base = ScopeContext::from([("environment", "test")]);
        let merged = base.merge(&ScopeContext::from([("tenant", "a")])).unwrap();

        assert_eq!(merged.get("environment"), Some("test"));
        assert_eq!(merged.get("tenant"), Some("a"));
        assert_eq!(merged.len(), 2);
        // the receiver is untouched
        assert_eq!(base.len(), 1);
    }

    #[test]
    fn test_merge_rejects_override() {
        let base = ScopeContext::from([("environment", "test")]);
        let result = base.merge(&ScopeContext::from([("environment", "prod")]));

        assert_eq!(
            result,
            Err(DiError::ContextConflict {
                key: "environment".to_string(),
                existing: Some("test".to_string()),
                requested: Some("prod".to_string()),
            })
        );
    }

    #[test]
    fn test_policy_on_repeated_equal_key() {
        let base = ScopeContext::from([("environment", "test")]);
        let same = ScopeContext::from([("environment", "test")]);

        assert!(base.merge_with(&same, ContextPolicy::Lenient).is_ok());
        assert!(base.merge_with(&same, ContextPolicy::Strict).is_err());
    }

    #[test]
    fn test_redeclared_strict_requires_equality() {
        let declared = ScopeContext::from([("environment", "test")]);

        assert!(declared
            .check_redeclared(&declared.clone(), ContextPolicy::Strict)
            .is_ok());
        assert!(declared
            .check_redeclared(&ScopeContext::from([("a", "b")]), ContextPolicy::Strict)
            .is_err());
        assert!(ScopeContext::empty()
            .check_redeclared(&ScopeContext::from([("a", "b")]), ContextPolicy::Strict)
            .is_err());
        assert!(declared
            .check_redeclared(&ScopeContext::empty(), ContextPolicy::Strict)
            .is_err());
    }

    #[test]
    fn test_redeclared_lenient_accepts_subset() {
        let declared = ScopeContext::from([("environment", "test"), ("tenant", "a")]);

        assert!(declared
            .check_redeclared(&ScopeContext::from([("tenant", "a")]), ContextPolicy::Lenient)
            .is_ok());
        assert!(declared
            .check_redeclared(&ScopeContext::from([("tenant", "b")]), ContextPolicy::Lenient)
            .is_err());
    }

    #[test]
    fn test_display() {
        let context = ScopeContext::from([("b", "2"), ("a", "1")]);
        assert_eq!(context.to_string(), "{a: 1, b: 2}");
    }
}
