//! Scoped dependency composition for FluentAi
//!
//! Composers describe how to build a value: the type it produces, the
//! lifetime that decides where the value is cached, and the context
//! conditions under which it is eligible. Scopes form a tree rooted at
//! [`ROOT_SCOPE_ID`]; each owns a store seeded with the composers whose
//! lifetime matches its kind. A [`Resolver`] searches its own scope first and
//! delegates to the parent on a miss, evaluating conditions against the
//! context of the scope the request started in.
//!
//! ```
//! use fluentai_di::{Composer, ScopeContext, ScopeRegistry};
//!
//! let registry = ScopeRegistry::new();
//! registry
//!     .register(
//!         Composer::builder::<String>()
//!             .id("test-name")
//!             .scoped("app")
//!             .when("environment", "test")
//!             .supplier(|| "Hello".to_string())
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let app = registry
//!     .ensure_scope("app", "app", None, Some(ScopeContext::from([("environment", "test")])))
//!     .unwrap();
//! assert_eq!(*app.resolve::<String>().unwrap(), "Hello");
//! ```

pub mod autowire;
pub mod builder;
pub mod composer;
pub mod condition;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod lifetime;
pub mod registry;
pub mod resolver;
pub mod scope;
pub mod store;

#[cfg(feature = "config")]
pub mod config;

pub use autowire::{AutoCompose, Parameter};
pub use builder::{Module, RegistryBuilder};
pub use composer::{Composer, ComposerBuilder};
pub use condition::ConditionFilter;
pub use context::{ContextPolicy, ScopeContext};
pub use descriptor::{Concrete, TypeKey};
pub use error::{DiError, DiResult};
pub use lifetime::LifetimeTag;
pub use registry::ScopeRegistry;
pub use resolver::Resolver;
pub use scope::{ScopeInfo, ROOT_SCOPE_ID};

#[cfg(feature = "config")]
pub use config::{RegistryConfig, ScopeConfig};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        auto_compose, AutoCompose, Composer, ContextPolicy, DiError, DiResult, LifetimeTag,
        Module, RegistryBuilder, Resolver, ScopeContext, ScopeRegistry,
    };
}
