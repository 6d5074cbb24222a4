//! Registry builder and modules for batch registration

#[cfg(feature = "config")]
use crate::config::RegistryConfig;
use crate::composer::Composer;
use crate::context::ContextPolicy;
use crate::error::DiResult;
use crate::registry::ScopeRegistry;
use tracing::debug;

/// A group of composers registered together
///
/// ```
/// use fluentai_di::{Composer, DiResult, Module, RegistryBuilder};
///
/// struct Settings;
///
/// impl Module for Settings {
///     fn configure(&self, builder: &mut RegistryBuilder) -> DiResult<()> {
///         builder.register(Composer::builder::<u16>().id("port").supplier(|| 8080)?);
///         Ok(())
///     }
/// }
///
/// let registry = RegistryBuilder::new().add_module(&Settings).unwrap().build().unwrap();
/// assert_eq!(*registry.root_resolver().resolve::<u16>().unwrap(), 8080);
/// ```
pub trait Module {
    /// Name used in log output
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn configure(&self, builder: &mut RegistryBuilder) -> DiResult<()>;
}

/// Collects composers, modules and settings, then builds a [`ScopeRegistry`]
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    composers: Vec<Composer>,
    modules: Vec<&'static str>,
    policy: ContextPolicy,
    #[cfg(feature = "config")]
    config: Option<RegistryConfig>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, composer: Composer) -> &mut Self {
        self.composers.push(composer);
        self
    }

    pub fn register_all<I>(&mut self, composers: I) -> &mut Self
    where
        I: IntoIterator<Item = Composer>,
    {
        self.composers.extend(composers);
        self
    }

    /// Let `module` register its composers
    pub fn add_module<M: Module + ?Sized>(&mut self, module: &M) -> DiResult<&mut Self> {
        let before = self.composers.len();
        module.configure(self)?;
        debug!(
            "Module {} added {} composer(s)",
            module.name(),
            self.composers.len() - before
        );
        self.modules.push(module.name());
        Ok(self)
    }

    pub fn with_policy(&mut self, policy: ContextPolicy) -> &mut Self {
        self.policy = policy;
        self
    }

    /// Use the policy from `config` and create its scopes once the
    /// composers are registered
    #[cfg(feature = "config")]
    pub fn with_config(&mut self, config: RegistryConfig) -> &mut Self {
        self.policy = config.context_policy;
        self.config = Some(config);
        self
    }

    pub fn build(&mut self) -> DiResult<ScopeRegistry> {
        let registry = ScopeRegistry::with_policy(self.policy);
        registry.register_all(self.composers.drain(..))?;
        self.apply_config(&registry)?;

        debug!(
            "Built registry with {} composer(s) from {} module(s)",
            registry.get_all().len(),
            self.modules.len()
        );
        Ok(registry)
    }

    #[cfg(feature = "config")]
    fn apply_config(&self, registry: &ScopeRegistry) -> DiResult<()> {
        match &self.config {
            Some(config) => config.apply(registry),
            None => Ok(()),
        }
    }

    #[cfg(not(feature = "config"))]
    fn apply_config(&self, _registry: &ScopeRegistry) -> DiResult<()> {
        Ok(())
    }
}
