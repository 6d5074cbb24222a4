//! Condition filters restricting when a composer is an eligible candidate

use crate::context::ScopeContext;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Set of (key, allowed values) pairs
///
/// A context fulfills the filter when, for every key present in both, the
/// context's value is one of the allowed values. Keys the context does not
/// mention are ignored, so an empty context fulfills every filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ConditionFilter {
    conditions: BTreeMap<String, BTreeSet<String>>,
}

impl ConditionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to equal `value` when the context defines `key`
    pub fn when(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value: String = value.into();
        self.when_one_of(key, [value])
    }

    /// Require `key` to be one of `values` when the context defines `key`.
    /// Repeating a key narrows its allowed values.
    pub fn when_one_of<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let values: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        self.conditions
            .entry(key.into())
            .and_modify(|allowed| allowed.retain(|value| values.contains(value)))
            .or_insert(values);
        self
    }

    pub fn is_fulfilled_by(&self, context: &ScopeContext) -> bool {
        self.conditions.iter().all(|(key, allowed)| {
            context
                .get(key)
                .map_or(true, |value| allowed.contains(value))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn allowed_values(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.conditions.get(key)
    }
}

impl fmt::Display for ConditionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .conditions
            .iter()
            .map(|(key, allowed)| {
                let values: Vec<&str> = allowed.iter().map(String::as_str).collect();
                format!("{} in {{{}}}", key, values.join(", "))
            })
            .collect();
        f.write_str(&parts.join(" and "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_always_fulfilled() {
        let filter = ConditionFilter::new();
        assert!(filter.is_fulfilled_by(&ScopeContext::empty()));
        assert!(filter.is_fulfilled_by(&ScopeContext::from([("environment", "prod")])));
    }

    #[test]
    fn test_open_world_matching() {
        let filter = ConditionFilter::new().when("environment", "prod");

        assert!(filter.is_fulfilled_by(&ScopeContext::empty()));
        assert!(filter.is_fulfilled_by(&ScopeContext::from([("tenant", "a")])));
        assert!(filter.is_fulfilled_by(&ScopeContext::from([("environment", "prod")])));
        assert!(!filter.is_fulfilled_by(&ScopeContext::from([("environment", "test")])));
    }

    #[test]
    fn test_value_sets() {
        let filter = ConditionFilter::new().when_one_of("environment", ["prod", "test"]);

        assert!(filter.is_fulfilled_by(&ScopeContext::from([("environment", "prod")])));
        assert!(filter.is_fulfilled_by(&ScopeContext::from([("environment", "test")])));
        assert!(!filter.is_fulfilled_by(&ScopeContext::from([("environment", "dev")])));
    }

    #[test]
    fn test_every_shared_key_must_match() {
        let filter = ConditionFilter::new()
            .when("environment", "prod")
            .when("anonymous", "true");
        let context = ScopeContext::from([("environment", "prod"), ("anonymous", "false")]);

        assert!(!filter.is_fulfilled_by(&context));
    }

    #[test]
    fn test_repeated_key_narrows() {
        let filter = ConditionFilter::new()
            .when_one_of("environment", ["prod", "test"])
            .when("environment", "test");

        let allowed: Vec<&str> = filter
            .allowed_values("environment")
            .unwrap()
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(allowed, vec!["test"]);
    }

    #[test]
    fn test_display() {
        let filter = ConditionFilter::new()
            .when_one_of("environment", ["test", "prod"])
            .when("anonymous", "true");
        assert_eq!(
            filter.to_string(),
            "anonymous in {true} and environment in {prod, test}"
        );
    }
}
