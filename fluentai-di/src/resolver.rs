//! Resolvers: typed lookup bound to one scope and one active context
//!
//! A lookup first searches the resolver's own scope. When that store holds
//! nothing for the request it delegates to the parent scope, carrying the
//! requesting context along, until the root answers or reports `NotFound`.
//! Factories never run under the registry lock. A cached entry is claimed
//! before its factory runs, so concurrent requests for it wait for that one
//! build instead of starting their own.

use crate::composer::Composer;
use crate::context::ScopeContext;
use crate::descriptor::{Concrete, TypeKey};
use crate::error::{DiError, DiResult};
use crate::registry::SharedState;
use crate::store::{BuildSlot, Claim, Selection};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Handle for resolving dependencies from a scope
#[derive(Clone)]
pub struct Resolver {
    state: SharedState,
    scope: Arc<str>,
    generation: u64,
    context: ScopeContext,
    /// Composers being built on this call chain, as `scope/id`
    building: Arc<Vec<String>>,
}

impl Resolver {
    pub(crate) fn new(state: SharedState, scope: &str, generation: u64, context: ScopeContext) -> Self {
        Self {
            state,
            scope: Arc::from(scope),
            generation,
            context,
            building: Arc::new(Vec::new()),
        }
    }

    /// Id of the scope this resolver searches first
    pub fn scope_id(&self) -> &str {
        &self.scope
    }

    /// Active context used to evaluate composer conditions
    pub fn context(&self) -> &ScopeContext {
        &self.context
    }

    /// Whether the scope this resolver was created for still exists
    pub fn is_alive(&self) -> bool {
        let state = self.state.read();
        state.node(&self.scope, self.generation).is_ok()
    }

    /// Resolver for the same scope whose active context also holds `extra`
    ///
    /// `extra` is merged under the registry's context policy.
    pub fn with_context(&self, extra: &ScopeContext) -> DiResult<Resolver> {
        let policy = self.state.read().policy();
        let context = self.context.merge_with(extra, policy)?;
        Ok(Resolver {
            context,
            ..self.clone()
        })
    }

    /// Resolve the single candidate assignable to `T`
    pub fn resolve<T: ?Sized + 'static>(&self) -> DiResult<Arc<T>> {
        self.resolve_erased(&TypeKey::of::<T>(), None)?.downcast::<T>()
    }

    /// Resolve the candidate assignable to `T` registered under `id`
    pub fn resolve_by_id<T: ?Sized + 'static>(&self, id: &str) -> DiResult<Arc<T>> {
        self.resolve_erased(&TypeKey::of::<T>(), Some(id))?
            .downcast::<T>()
    }

    /// Like [`resolve`](Self::resolve), but `Ok(None)` when nothing matches
    pub fn try_resolve<T: ?Sized + 'static>(&self) -> DiResult<Option<Arc<T>>> {
        match self.resolve::<T>() {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Resolve by type key, returning the untyped realized value
    pub fn resolve_erased(&self, requested: &TypeKey, id: Option<&str>) -> DiResult<Concrete> {
        let (selection, parent) = {
            let state = self.state.read();
            let node = state.node(&self.scope, self.generation)?;
            let selection = node.store().find(requested, id, &self.context)?;
            let parent = match (&selection, node.parent()) {
                (Selection::Absent, Some(parent_id)) => {
                    let parent = state
                        .tree()
                        .and_then(|tree| tree.get(parent_id))
                        .ok_or_else(|| DiError::scope_not_found(parent_id))?;
                    Some(self.delegate(parent.id(), parent.generation()))
                }
                _ => None,
            };
            (selection, parent)
        };

        match selection {
            Selection::Cached(concrete) => {
                trace!("Cache hit for {} in scope '{}'", concrete.id(), self.scope);
                Ok(concrete)
            }
            Selection::Pending(composer) => self.build(&composer),
            Selection::Absent => match parent {
                Some(parent) => {
                    trace!(
                        "No candidate for {} in scope '{}', delegating to '{}'",
                        requested,
                        self.scope,
                        parent.scope
                    );
                    parent.resolve_erased(requested, id)
                }
                None => Err(DiError::not_found(requested.name())),
            },
        }
    }

    /// Same context and build chain, one scope up
    fn delegate(&self, scope: &str, generation: u64) -> Resolver {
        Resolver {
            state: Arc::clone(&self.state),
            scope: Arc::from(scope),
            generation,
            context: self.context.clone(),
            building: Arc::clone(&self.building),
        }
    }

    fn build(&self, composer: &Arc<Composer>) -> DiResult<Concrete> {
        let frame = format!("{}/{}", self.scope, composer.id());
        if self.building.contains(&frame) {
            let mut path = self.building.to_vec();
            path.push(frame);
            return Err(DiError::CircularDependency { path });
        }

        let mut building = self.building.to_vec();
        building.push(frame);
        let inner = Resolver {
            building: Arc::new(building),
            ..self.clone()
        };

        if !composer.supports_caching() {
            debug!("Building transient {} in scope '{}'", composer.id(), self.scope);
            return composer.realize(&inner);
        }

        let claim = self
            .state
            .write()
            .claim(&self.scope, self.generation, composer.id(), &inner.building)?;
        match claim {
            Claim::Cached(concrete) => Ok(concrete),
            Claim::Wait(slot) => {
                trace!("Waiting for {} in scope '{}'", composer.id(), self.scope);
                let result = slot.wait();
                self.state.write().stop_waiting();
                result
            }
            Claim::Build(slot) => {
                debug!("Building {} in scope '{}'", composer.id(), self.scope);
                let in_flight = InFlight {
                    resolver: self,
                    id: composer.id(),
                    slot,
                };
                let result = composer.realize(&inner);
                in_flight.complete(result)
            }
        }
    }
}

/// A claimed build; released with an error if the factory panics
struct InFlight<'a> {
    resolver: &'a Resolver,
    id: &'a str,
    slot: Arc<BuildSlot>,
}

impl InFlight<'_> {
    fn complete(self, result: DiResult<Concrete>) -> DiResult<Concrete> {
        let result = self.release(result);
        self.slot.publish(result.clone());
        result
    }

    fn release(&self, result: DiResult<Concrete>) -> DiResult<Concrete> {
        let resolver = self.resolver;
        resolver
            .state
            .write()
            .complete(&resolver.scope, resolver.generation, self.id, &self.slot, result)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.slot.is_done() {
            let result = self.release(Err(DiError::FactoryFailed {
                id: self.id.to_string(),
                reason: "factory panicked".to_string(),
            }));
            self.slot.publish(result);
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("scope", &self.scope)
            .field("generation", &self.generation)
            .field("context", &self.context)
            .finish()
    }
}
