//! Composers: immutable registrations describing how to build a value

use crate::autowire::{self, AutoCompose};
use crate::condition::ConditionFilter;
use crate::descriptor::{Concrete, Instance, TypeDescriptor, TypeKey};
use crate::error::{DiError, DiResult};
use crate::lifetime::LifetimeTag;
use crate::resolver::Resolver;
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::panic::Location;
use std::sync::Arc;

/// Type-erased factory stored in a composer
pub type Factory = Arc<dyn Fn(&Resolver) -> DiResult<Instance> + Send + Sync>;

/// Immutable registration: id, produced type, lifetime, conditions, factory
#[derive(Clone)]
pub struct Composer {
    id: Arc<str>,
    descriptor: Arc<TypeDescriptor>,
    lifetime: LifetimeTag,
    conditions: ConditionFilter,
    factory: Factory,
    /// Auto-wired type; explicit factories compare by allocation instead
    autowired: Option<TypeId>,
}

impl Composer {
    /// Start describing a composer producing `T`
    ///
    /// Without an explicit id the composer is identified by the produced type
    /// and the source location of this call.
    #[track_caller]
    pub fn builder<T: Send + Sync + 'static>() -> ComposerBuilder<T> {
        ComposerBuilder {
            id: None,
            lifetime: LifetimeTag::Root,
            conditions: ConditionFilter::new(),
            descriptor: TypeDescriptor::of::<T>(),
            location: Location::caller(),
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn produced_type(&self) -> TypeKey {
        self.descriptor.produced()
    }

    pub fn lifetime(&self) -> &LifetimeTag {
        &self.lifetime
    }

    pub fn conditions(&self) -> &ConditionFilter {
        &self.conditions
    }

    pub fn supports_caching(&self) -> bool {
        self.lifetime.supports_caching()
    }

    /// Run the factory and bind the result to this composer
    pub(crate) fn realize(&self, resolver: &Resolver) -> DiResult<Concrete> {
        let instance = (self.factory)(resolver)?;
        Ok(Concrete::new(
            Arc::clone(&self.id),
            instance,
            Arc::clone(&self.descriptor),
        ))
    }
}

impl Composer {
    /// Clones share their factory. Two closures built separately never
    /// compare equal, even when they come from the same source location.
    fn same_factory(&self, other: &Self) -> bool {
        match (self.autowired, other.autowired) {
            (Some(this), Some(that)) => this == that,
            (None, None) => Arc::ptr_eq(&self.factory, &other.factory),
            _ => false,
        }
    }
}

impl PartialEq for Composer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.descriptor.produced() == other.descriptor.produced()
            && self.lifetime == other.lifetime
            && self.conditions == other.conditions
            && self.same_factory(other)
    }
}

impl fmt::Debug for Composer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composer")
            .field("id", &self.id)
            .field("type", &self.descriptor)
            .field("lifetime", &self.lifetime)
            .field("conditions", &self.conditions)
            .finish()
    }
}

/// Builder for [`Composer`]
pub struct ComposerBuilder<T> {
    id: Option<String>,
    lifetime: LifetimeTag,
    conditions: ConditionFilter,
    descriptor: TypeDescriptor,
    location: &'static Location<'static>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ComposerBuilder<T> {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn lifetime(mut self, lifetime: impl Into<LifetimeTag>) -> Self {
        self.lifetime = lifetime.into();
        self
    }

    /// Never cache; rebuild on every resolution
    pub fn transient(self) -> Self {
        self.lifetime(LifetimeTag::Transient)
    }

    /// Cache once per scope of kind `kind`
    pub fn scoped(self, kind: impl Into<String>) -> Self {
        self.lifetime(LifetimeTag::custom(kind))
    }

    pub fn when(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions = self.conditions.when(key, value);
        self
    }

    pub fn when_one_of<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.conditions = self.conditions.when_one_of(key, values);
        self
    }

    /// Also satisfy requests for `U`, typically a trait object `T` implements
    pub fn provides<U, F>(mut self, upcast: F) -> Self
    where
        U: ?Sized + 'static,
        F: Fn(Arc<T>) -> Arc<U> + Send + Sync + 'static,
    {
        self.descriptor = self.descriptor.with_supertype::<T, U, F>(upcast);
        self
    }

    /// Finish with a factory that receives the resolver of the scope the
    /// value is built in
    pub fn factory<F>(self, factory: F) -> DiResult<Composer>
    where
        F: Fn(&Resolver) -> DiResult<T> + Send + Sync + 'static,
    {
        let default_id = self.location_id();
        self.finish(
            None,
            default_id,
            Arc::new(move |resolver: &Resolver| {
                factory(resolver).map(|value| Arc::new(value) as Instance)
            }),
        )
    }

    /// Finish with a factory whose errors are not [`DiError`]s; they are
    /// reported as [`DiError::FactoryFailed`]
    pub fn try_factory<F, E>(self, factory: F) -> DiResult<Composer>
    where
        F: Fn(&Resolver) -> Result<T, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        let id = self.id.clone().unwrap_or_else(|| self.location_id());
        let default_id = id.clone();
        self.finish(
            None,
            default_id,
            Arc::new(move |resolver: &Resolver| {
                factory(resolver)
                    .map(|value| Arc::new(value) as Instance)
                    .map_err(|e| DiError::FactoryFailed {
                        id: id.clone(),
                        reason: e.to_string(),
                    })
            }),
        )
    }

    /// Finish with a factory that needs no dependencies
    pub fn supplier<F>(self, supplier: F) -> DiResult<Composer>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let default_id = self.location_id();
        self.finish(
            None,
            default_id,
            Arc::new(move |_: &Resolver| Ok(Arc::new(supplier()) as Instance)),
        )
    }

    /// Finish with a factory generated from `T`'s constructor table
    ///
    /// Without an explicit id the composer is identified by `T`'s type name.
    pub fn autowired(self) -> DiResult<Composer>
    where
        T: AutoCompose,
    {
        self.finish(
            Some(TypeId::of::<T>()),
            std::any::type_name::<T>().to_string(),
            Arc::new(|resolver: &Resolver| {
                autowire::compose::<T>(resolver).map(|value| Arc::new(value) as Instance)
            }),
        )
    }

    fn location_id(&self) -> String {
        format!(
            "{}@{}:{}:{}",
            std::any::type_name::<T>(),
            self.location.file(),
            self.location.line(),
            self.location.column()
        )
    }

    fn finish(self, autowired: Option<TypeId>, default_id: String, factory: Factory) -> DiResult<Composer> {
        let id = self.id.unwrap_or(default_id);
        if id.is_empty() {
            return Err(DiError::InvalidComposer {
                id,
                reason: "composer id cannot be empty".to_string(),
            });
        }
        if self.lifetime.is_root() && !self.conditions.is_empty() {
            return Err(DiError::InvalidComposer {
                id,
                reason: format!(
                    "composer with root lifetime cannot have conditions ({})",
                    self.conditions
                ),
            });
        }

        Ok(Composer {
            id: Arc::from(id),
            descriptor: Arc::new(self.descriptor),
            lifetime: self.lifetime,
            conditions: self.conditions,
            factory,
            autowired,
        })
    }
}
