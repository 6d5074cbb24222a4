//! Error types for the composition engine

use thiserror::Error;

/// Result type alias for DI operations
pub type DiResult<T> = Result<T, DiError>;

/// Errors that can occur while registering composers, shaping the scope tree
/// or resolving dependencies
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiError {
    /// No matching composer or cached value anywhere up the delegation chain
    #[error("No candidate found for type {type_name}")]
    NotFound { type_name: String },

    /// More than one candidate matched in a single scope
    #[error("More than one candidate for type {type_name}: {}", candidates.join(", "))]
    Ambiguous {
        type_name: String,
        candidates: Vec<String>,
    },

    /// A different composer already holds this id
    #[error("Duplicate composer with id {id}")]
    DuplicateRegistration { id: String },

    /// The requested scope layout breaks a tree invariant
    #[error("Invalid scope structure for scope '{scope}': {reason}")]
    InvalidScopeStructure { scope: String, reason: String },

    /// Contexts disagree on a key, or a scope tried to re-declare its context
    #[error("Context conflict on key '{key}': existing value {existing:?}, requested {requested:?}")]
    ContextConflict {
        key: String,
        existing: Option<String>,
        requested: Option<String>,
    },

    /// An auto-wired constructor parameter carries no type information
    #[error("Cannot resolve untyped parameter '{parameter}' of {type_name}")]
    UntypedDependency {
        type_name: String,
        parameter: String,
    },

    /// Scope id is unknown, or the resolver outlived its scope
    #[error("Scope not found: {scope}")]
    ScopeNotFound { scope: String },

    /// Composer definition violates a composer invariant
    #[error("Invalid composer '{id}': {reason}")]
    InvalidComposer { id: String, reason: String },

    /// A factory (transitively) requested the value it is building
    #[error("Circular dependency detected: {}", path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    /// A realized value could not be viewed as the requested type
    #[error("Type mismatch: expected {expected}, found {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// A user factory reported an error of its own
    #[error("Factory for composer '{id}' failed: {reason}")]
    FactoryFailed { id: String, reason: String },

    /// Configuration error
    #[cfg(feature = "config")]
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DiError {
    pub(crate) fn not_found(type_name: &str) -> Self {
        DiError::NotFound {
            type_name: type_name.to_string(),
        }
    }

    pub(crate) fn invalid_structure(scope: &str, reason: impl Into<String>) -> Self {
        DiError::InvalidScopeStructure {
            scope: scope.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn scope_not_found(scope: &str) -> Self {
        DiError::ScopeNotFound {
            scope: scope.to_string(),
        }
    }

    /// Whether this error only means "nothing matched"
    pub fn is_not_found(&self) -> bool {
        matches!(self, DiError::NotFound { .. })
    }
}
