//! Per-scope dependency store with lazy build-and-cache semantics

use crate::composer::Composer;
use crate::context::ScopeContext;
use crate::descriptor::{Concrete, TypeDescriptor, TypeKey};
use crate::error::{DiError, DiResult};
use crate::lifetime::LifetimeTag;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// An entry of a store: either still a recipe or an already realized value
#[derive(Debug, Clone)]
pub enum Dependency {
    Composer(Arc<Composer>),
    Concrete(Concrete),
}

impl Dependency {
    pub fn id(&self) -> &str {
        match self {
            Dependency::Composer(composer) => composer.id(),
            Dependency::Concrete(concrete) => concrete.id(),
        }
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        match self {
            Dependency::Composer(composer) => composer.descriptor(),
            Dependency::Concrete(concrete) => concrete.descriptor(),
        }
    }

    pub fn is_realized(&self) -> bool {
        matches!(self, Dependency::Concrete(_))
    }

    /// Realized values match on type alone; pending composers must also have
    /// their conditions fulfilled by the active context
    fn is_candidate(&self, requested: &TypeKey, context: &ScopeContext) -> bool {
        if !self.descriptor().is_assignable_to(requested) {
            return false;
        }
        match self {
            Dependency::Composer(composer) => composer.conditions().is_fulfilled_by(context),
            Dependency::Concrete(_) => true,
        }
    }
}

/// Outcome of matching a request against one store
#[derive(Debug)]
pub enum Selection {
    /// A cached value, returned verbatim
    Cached(Concrete),
    /// A pending composer that has to be built
    Pending(Arc<Composer>),
    /// Nothing here; the caller delegates to the parent scope
    Absent,
}

/// A build in progress
///
/// The thread that claimed the entry runs the factory. Every other request
/// for the same entry blocks on the slot until the result is published.
#[derive(Debug)]
pub struct BuildSlot {
    owner: ThreadId,
    result: Mutex<Option<DiResult<Concrete>>>,
    ready: Condvar,
}

impl BuildSlot {
    fn claimed() -> Self {
        Self {
            owner: thread::current().id(),
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Thread running the factory
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn is_done(&self) -> bool {
        self.result.lock().is_some()
    }

    /// Hand the result to every waiter. Only the first publication counts.
    pub fn publish(&self, result: DiResult<Concrete>) {
        let mut slot = self.result.lock();
        if slot.is_none() {
            *slot = Some(result);
        }
        drop(slot);
        self.ready.notify_all();
    }

    /// Block until the result is published
    pub fn wait(&self) -> DiResult<Concrete> {
        let mut slot = self.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            self.ready.wait(&mut slot);
        }
    }
}

/// Outcome of claiming a pending entry for building
#[derive(Debug)]
pub enum Claim {
    /// Realized since it was found
    Cached(Concrete),
    /// The caller runs the factory and completes the slot
    Build(Arc<BuildSlot>),
    /// Another caller is running the factory
    Wait(Arc<BuildSlot>),
}

/// A scope's private collection of composers and realized values
#[derive(Debug, Default)]
pub struct DependencyStore {
    entries: BTreeMap<String, Dependency>,
    building: BTreeMap<String, Arc<BuildSlot>>,
}

impl DependencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store for a scope of kind `scope_tag`, holding every applicable composer
    pub fn seeded<'a, I>(scope_tag: &LifetimeTag, composers: I) -> Self
    where
        I: IntoIterator<Item = &'a Arc<Composer>>,
    {
        let mut store = Self::new();
        for composer in composers {
            store.seed(scope_tag, composer);
        }
        store
    }

    /// Add `composer` if its lifetime applies to `scope_tag`. Returns whether
    /// it was added.
    pub fn seed(&mut self, scope_tag: &LifetimeTag, composer: &Arc<Composer>) -> bool {
        if !composer.lifetime().applies_to(scope_tag) || self.entries.contains_key(composer.id()) {
            return false;
        }
        self.entries.insert(
            composer.id().to_string(),
            Dependency::Composer(Arc::clone(composer)),
        );
        true
    }

    /// Match a request against this store
    pub fn find(
        &self,
        requested: &TypeKey,
        id: Option<&str>,
        context: &ScopeContext,
    ) -> DiResult<Selection> {
        let mut candidates = self
            .entries
            .values()
            .filter(|entry| entry.is_candidate(requested, context))
            .filter(|entry| id.map_or(true, |id| entry.id() == id));

        let first = match candidates.next() {
            Some(first) => first,
            None => return Ok(Selection::Absent),
        };
        let rest: Vec<&Dependency> = candidates.collect();
        if !rest.is_empty() {
            return Err(DiError::Ambiguous {
                type_name: requested.name().to_string(),
                candidates: std::iter::once(first)
                    .chain(rest)
                    .map(|entry| entry.id().to_string())
                    .collect(),
            });
        }

        Ok(match first {
            Dependency::Concrete(concrete) => Selection::Cached(concrete.clone()),
            Dependency::Composer(composer) => Selection::Pending(Arc::clone(composer)),
        })
    }

    /// Replace the pending entry for `concrete`'s composer with the realized
    /// value. If another build already realized it, that cached value wins and
    /// is returned instead.
    pub fn realize_or_cached(&mut self, concrete: Concrete) -> Concrete {
        match self.entries.get(concrete.id()) {
            Some(Dependency::Concrete(existing)) => existing.clone(),
            Some(Dependency::Composer(_)) => {
                self.entries.insert(
                    concrete.id().to_string(),
                    Dependency::Concrete(concrete.clone()),
                );
                concrete
            }
            None => concrete,
        }
    }

    /// Claim the entry `id` so that a single caller runs its factory
    pub fn claim(&mut self, id: &str) -> Claim {
        if let Some(Dependency::Concrete(concrete)) = self.entries.get(id) {
            return Claim::Cached(concrete.clone());
        }
        if let Some(slot) = self.building.get(id) {
            return Claim::Wait(Arc::clone(slot));
        }
        let slot = Arc::new(BuildSlot::claimed());
        self.building.insert(id.to_string(), Arc::clone(&slot));
        Claim::Build(slot)
    }

    /// Release the claim held through `slot` and cache a successful result.
    /// A failed build leaves the entry pending.
    pub fn complete(
        &mut self,
        id: &str,
        slot: &Arc<BuildSlot>,
        result: DiResult<Concrete>,
    ) -> DiResult<Concrete> {
        if self
            .building
            .get(id)
            .map_or(false, |current| Arc::ptr_eq(current, slot))
        {
            self.building.remove(id);
        }
        result.map(|concrete| self.realize_or_cached(concrete))
    }

    pub fn get(&self, id: &str) -> Option<&Dependency> {
        self.entries.get(id)
    }

    /// Ids of every realized entry
    pub fn cached_ids(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| entry.is_realized())
            .map(|entry| entry.id().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn composer<T: Send + Sync + Clone + 'static>(
        id: &str,
        lifetime: LifetimeTag,
        environment: Option<&str>,
        value: T,
    ) -> Arc<Composer> {
        let mut builder = Composer::builder::<T>().id(id).lifetime(lifetime);
        if let Some(environment) = environment {
            builder = builder.when("environment", environment);
        }
        Arc::new(builder.supplier(move || value.clone()).unwrap())
    }

    fn realize(composer: &Composer) -> Concrete {
        let registry = crate::ScopeRegistry::new();
        composer.realize(&registry.root_resolver()).unwrap()
    }

    fn app() -> LifetimeTag {
        LifetimeTag::custom("app")
    }

    #[test]
    fn test_seeding_filters_by_lifetime() {
        let composers = vec![
            composer("root-int", LifetimeTag::Root, None, 1_i32),
            composer("app-int", app(), None, 2_i32),
            composer("fresh", LifetimeTag::Transient, None, 3_i64),
            composer("tenant-int", LifetimeTag::custom("tenant"), None, 4_i32),
        ];

        let store = DependencyStore::seeded(&app(), &composers);

        assert_eq!(store.len(), 2);
        assert!(store.get("app-int").is_some());
        assert!(store.get("fresh").is_some());
        assert!(store.get("root-int").is_none());
    }

    #[test]
    fn test_find_absent() {
        let store = DependencyStore::seeded(&app(), &[composer("app-int", app(), None, 2_i32)]);
        let selection = store
            .find(&TypeKey::of::<String>(), None, &ScopeContext::empty())
            .unwrap();
        assert!(matches!(selection, Selection::Absent));
    }

    #[test]
    fn test_find_respects_conditions() {
        let composers = vec![
            composer("prod", app(), Some("prod"), "Timber".to_string()),
            composer("test", app(), Some("test"), "Hello".to_string()),
        ];
        let store = DependencyStore::seeded(&app(), &composers);
        let key = TypeKey::of::<String>();

        let selection = store
            .find(&key, None, &ScopeContext::from([("environment", "test")]))
            .unwrap();
        assert!(matches!(selection, Selection::Pending(c) if c.id() == "test"));

        let ambiguous = store.find(&key, None, &ScopeContext::empty());
        assert_eq!(
            ambiguous.unwrap_err(),
            DiError::Ambiguous {
                type_name: key.name().to_string(),
                candidates: vec!["prod".to_string(), "test".to_string()],
            }
        );

        let unmatched = store
            .find(&key, None, &ScopeContext::from([("environment", "dev")]))
            .unwrap();
        assert!(matches!(unmatched, Selection::Absent));
    }

    #[test]
    fn test_find_by_id_disambiguates() {
        let composers = vec![
            composer("prod", app(), Some("prod"), "Timber".to_string()),
            composer("test", app(), Some("test"), "Hello".to_string()),
        ];
        let store = DependencyStore::seeded(&app(), &composers);

        let selection = store
            .find(&TypeKey::of::<String>(), Some("prod"), &ScopeContext::empty())
            .unwrap();
        assert!(matches!(selection, Selection::Pending(c) if c.id() == "prod"));
    }

    #[test]
    fn test_realized_entries_skip_condition_check() {
        let prod = composer("prod", app(), Some("prod"), "Timber".to_string());
        let mut store = DependencyStore::seeded(&app(), &[Arc::clone(&prod)]);
        store.realize_or_cached(realize(&prod));

        let selection = store
            .find(
                &TypeKey::of::<String>(),
                None,
                &ScopeContext::from([("environment", "test")]),
            )
            .unwrap();
        assert!(matches!(selection, Selection::Cached(c) if c.id() == "prod"));
        assert_eq!(store.cached_ids(), vec!["prod".to_string()]);
    }

    #[test]
    fn test_first_realization_wins() {
        let counter = composer("counter", app(), None, 7_u32);
        let mut store = DependencyStore::seeded(&app(), &[Arc::clone(&counter)]);

        let first = store.realize_or_cached(realize(&counter));
        let second = store.realize_or_cached(realize(&counter));

        assert!(first.ptr_eq(&second));
    }

    #[test]
    fn test_claim_is_exclusive() {
        let counter = composer("counter", app(), None, 7_u32);
        let mut store = DependencyStore::seeded(&app(), &[Arc::clone(&counter)]);

        let slot = match store.claim("counter") {
            Claim::Build(slot) => slot,
            other => panic!("expected to build, got {:?}", other),
        };
        let waiting = match store.claim("counter") {
            Claim::Wait(waiting) => waiting,
            other => panic!("expected to wait, got {:?}", other),
        };
        assert!(Arc::ptr_eq(&slot, &waiting));
        assert_eq!(slot.owner(), thread::current().id());

        let built = store.complete("counter", &slot, Ok(realize(&counter))).unwrap();
        slot.publish(Ok(built.clone()));

        assert!(waiting.wait().unwrap().ptr_eq(&built));
        assert!(matches!(store.claim("counter"), Claim::Cached(c) if c.ptr_eq(&built)));
    }

    #[test]
    fn test_failed_build_releases_claim() {
        let counter = composer("counter", app(), None, 7_u32);
        let mut store = DependencyStore::seeded(&app(), &[Arc::clone(&counter)]);

        let Claim::Build(slot) = store.claim("counter") else {
            panic!("expected to build");
        };
        let failed = store.complete("counter", &slot, Err(DiError::not_found("u32")));
        slot.publish(failed.clone());

        assert!(failed.is_err());
        assert_eq!(slot.wait().unwrap_err(), DiError::not_found("u32"));
        assert!(store.cached_ids().is_empty());
        assert!(matches!(store.claim("counter"), Claim::Build(_)));
    }
}
