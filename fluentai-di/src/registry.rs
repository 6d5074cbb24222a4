//! Scope registry: the composer set plus the scope tree built from it

use crate::composer::Composer;
use crate::context::{ContextPolicy, ScopeContext};
use crate::descriptor::Concrete;
use crate::error::{DiError, DiResult};
use crate::lifetime::LifetimeTag;
use crate::resolver::Resolver;
use crate::scope::{EnsureOutcome, ScopeInfo, ScopeNode, ScopeRequest, ScopeTree, ROOT_SCOPE_ID};
use crate::store::{BuildSlot, Claim};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, trace};

pub(crate) type SharedState = Arc<RwLock<RegistryState>>;

/// Everything behind the registry lock
#[derive(Debug)]
pub(crate) struct RegistryState {
    composers: BTreeMap<String, Arc<Composer>>,
    /// `None` until the root is first needed, and again after it is cleared
    tree: Option<ScopeTree>,
    policy: ContextPolicy,
    next_generation: u64,
    /// Build each blocked thread is waiting for
    waiting: FxHashMap<ThreadId, Arc<BuildSlot>>,
}

impl RegistryState {
    fn new(policy: ContextPolicy) -> Self {
        Self {
            composers: BTreeMap::new(),
            tree: None,
            policy,
            next_generation: 0,
            waiting: FxHashMap::default(),
        }
    }

    pub(crate) fn policy(&self) -> ContextPolicy {
        self.policy
    }

    pub(crate) fn tree(&self) -> Option<&ScopeTree> {
        self.tree.as_ref()
    }

    /// The node `id`, provided it is still the materialization `generation`
    pub(crate) fn node(&self, id: &str, generation: u64) -> DiResult<&ScopeNode> {
        self.tree
            .as_ref()
            .and_then(|tree| tree.get(id))
            .filter(|node| node.generation() == generation)
            .ok_or_else(|| DiError::scope_not_found(id))
    }

    pub(crate) fn node_mut(&mut self, id: &str, generation: u64) -> DiResult<&mut ScopeNode> {
        self.tree
            .as_mut()
            .and_then(|tree| tree.get_mut(id))
            .filter(|node| node.generation() == generation)
            .ok_or_else(|| DiError::scope_not_found(id))
    }

    /// Claim the entry `id` in the store of `scope` for building
    ///
    /// A caller told to wait is recorded as waiting. If the build it would
    /// wait for is itself blocked on the caller, directly or through other
    /// threads, `CircularDependency` is returned with `path` instead.
    pub(crate) fn claim(
        &mut self,
        scope: &str,
        generation: u64,
        id: &str,
        path: &[String],
    ) -> DiResult<Claim> {
        let claim = self.node_mut(scope, generation)?.store_mut().claim(id);
        if let Claim::Wait(slot) = &claim {
            let current = thread::current().id();
            if self.blocks_on(slot, current) {
                return Err(DiError::CircularDependency {
                    path: path.to_vec(),
                });
            }
            self.waiting.insert(current, Arc::clone(slot));
        }
        Ok(claim)
    }

    /// Whether `slot`'s owner is, through the chain of waiting threads,
    /// waiting for `thread`
    fn blocks_on(&self, slot: &BuildSlot, thread: ThreadId) -> bool {
        let mut owner = slot.owner();
        for _ in 0..=self.waiting.len() {
            if owner == thread {
                return true;
            }
            match self.waiting.get(&owner) {
                Some(next) if !next.is_done() => owner = next.owner(),
                _ => return false,
            }
        }
        false
    }

    pub(crate) fn stop_waiting(&mut self) {
        self.waiting.remove(&thread::current().id());
    }

    /// Release a claim and cache a successful result, unless the scope was
    /// cleared in the meantime
    pub(crate) fn complete(
        &mut self,
        scope: &str,
        generation: u64,
        id: &str,
        slot: &Arc<BuildSlot>,
        result: DiResult<Concrete>,
    ) -> DiResult<Concrete> {
        match self.node_mut(scope, generation) {
            Ok(node) => node.store_mut().complete(id, slot, result),
            Err(_) => {
                debug!("Scope '{}' was cleared while building {}, value not cached", scope, id);
                result
            }
        }
    }

    /// Generation and context of the root, materializing it if needed
    fn root_binding(&mut self) -> (u64, ScopeContext) {
        if self.tree.is_none() {
            let generation = self.next_generation;
            self.next_generation += 1;
            self.tree = Some(ScopeTree::with_root(
                &self.composers,
                ScopeContext::empty(),
                generation,
            ));
        }
        self.tree
            .as_ref()
            .and_then(ScopeTree::root)
            .map(|root| (root.generation(), root.context().clone()))
            .unwrap_or_default()
    }

    /// Ensure the requested scope and return its generation and full context
    fn ensure(&mut self, request: &ScopeRequest) -> DiResult<(u64, ScopeContext)> {
        let base = self.next_generation;
        self.next_generation += 2;

        if let Some(tree) = self.tree.as_mut() {
            if let EnsureOutcome::Existing(_) = tree.ensure(request, &self.composers, self.policy, base)? {
                trace!("Scope '{}' already exists", request.id);
            }
        } else {
            // the root takes the context of an explicit root request
            let root_context = if request.id == ROOT_SCOPE_ID {
                request.context.clone().unwrap_or_default()
            } else {
                ScopeContext::empty()
            };
            let mut tree = ScopeTree::with_root(&self.composers, root_context, base);
            tree.ensure(request, &self.composers, self.policy, base + 1)?;
            self.tree = Some(tree);
        }

        self.tree
            .as_ref()
            .and_then(|tree| tree.get(&request.id))
            .map(|node| (node.generation(), node.context().clone()))
            .ok_or_else(|| DiError::scope_not_found(&request.id))
    }
}

/// Handle to a composer set and its scope tree
///
/// Clones share the same state. Resolvers obtained from it stay valid as long
/// as their scope is not cleared.
#[derive(Clone)]
pub struct ScopeRegistry {
    state: SharedState,
}

impl ScopeRegistry {
    /// Create an empty registry with the strict context policy
    pub fn new() -> Self {
        Self::with_policy(ContextPolicy::default())
    }

    pub fn with_policy(policy: ContextPolicy) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::new(policy))),
        }
    }

    pub fn policy(&self) -> ContextPolicy {
        self.state.read().policy
    }

    /// Register a composer
    ///
    /// Registering an equal composer again is a no-op. A different composer
    /// under an id already in use is rejected. The composer is also added to
    /// every existing scope it applies to.
    pub fn register(&self, composer: Composer) -> DiResult<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        if let Some(existing) = state.composers.get(composer.id()) {
            if **existing == composer {
                trace!("Composer {} already registered", composer.id());
                return Ok(());
            }
            return Err(DiError::DuplicateRegistration {
                id: composer.id().to_string(),
            });
        }

        let composer = Arc::new(composer);
        let seeded = state
            .tree
            .as_mut()
            .map_or(0, |tree| tree.seed_all(&composer));
        debug!(
            "Registered composer {} ({}) with lifetime {}, added to {} existing scope(s)",
            composer.id(),
            composer.produced_type(),
            composer.lifetime(),
            seeded
        );
        state.composers.insert(composer.id().to_string(), composer);
        Ok(())
    }

    /// Register every composer, stopping at the first error
    pub fn register_all<I>(&self, composers: I) -> DiResult<()>
    where
        I: IntoIterator<Item = Composer>,
    {
        for composer in composers {
            self.register(composer)?;
        }
        Ok(())
    }

    /// Every registered composer, ordered by id
    pub fn get_all(&self) -> Vec<Arc<Composer>> {
        self.state.read().composers.values().cloned().collect()
    }

    pub fn get_composer(&self, id: &str) -> Option<Arc<Composer>> {
        self.state.read().composers.get(id).cloned()
    }

    /// Create a scope, or check that an existing one matches the request,
    /// and return a resolver bound to it
    ///
    /// Non-root scopes without a parent are attached to the root.
    pub fn ensure_scope(
        &self,
        id: &str,
        lifetime: impl Into<LifetimeTag>,
        parent: Option<&str>,
        context: Option<ScopeContext>,
    ) -> DiResult<Resolver> {
        let mut request = ScopeRequest::new(id, lifetime);
        if let Some(parent) = parent {
            request = request.parent(parent);
        }
        if let Some(context) = context {
            request = request.context(context);
        }
        self.ensure(&request)
    }

    /// Create the root scope with `context`, or validate the existing one
    pub fn ensure_root_scope(&self, context: Option<ScopeContext>) -> DiResult<Resolver> {
        self.ensure_scope(ROOT_SCOPE_ID, LifetimeTag::Root, None, context)
    }

    pub(crate) fn ensure(&self, request: &ScopeRequest) -> DiResult<Resolver> {
        let (generation, context) = self.state.write().ensure(request)?;
        Ok(Resolver::new(
            Arc::clone(&self.state),
            &request.id,
            generation,
            context,
        ))
    }

    /// Drop a scope with all its descendants and cached values
    ///
    /// Clearing the root drops the whole tree but keeps the composers; the
    /// root is rebuilt on next use. Returns whether anything was removed.
    pub fn clear_scope(&self, id: &str) -> bool {
        let mut state = self.state.write();

        if id == ROOT_SCOPE_ID {
            let cleared = state.tree.take().is_some();
            debug!("Cleared root scope, {} composers kept", state.composers.len());
            return cleared;
        }

        match state.tree.as_mut() {
            Some(tree) if tree.contains(id) => {
                let removed = tree.remove(id);
                debug!("Cleared scope '{}' ({} scope(s) removed)", id, removed.len());
                true
            }
            _ => {
                debug!("Scope '{}' does not exist, nothing to clear", id);
                false
            }
        }
    }

    /// Resolver for an existing scope; the root is created on demand
    pub fn get_resolver(&self, id: &str) -> DiResult<Resolver> {
        if id == ROOT_SCOPE_ID {
            return Ok(self.root_resolver());
        }

        let state = self.state.read();
        let node = state
            .tree()
            .and_then(|tree| tree.get(id))
            .ok_or_else(|| DiError::scope_not_found(id))?;
        Ok(Resolver::new(
            Arc::clone(&self.state),
            id,
            node.generation(),
            node.context().clone(),
        ))
    }

    pub fn root_resolver(&self) -> Resolver {
        let (generation, context) = self.state.write().root_binding();
        Resolver::new(Arc::clone(&self.state), ROOT_SCOPE_ID, generation, context)
    }

    /// Drop every composer and scope
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.composers.clear();
        state.tree = None;
        debug!("Registry reset");
    }

    pub fn scope_info(&self, id: &str) -> Option<ScopeInfo> {
        self.state.read().tree().and_then(|tree| tree.info(id))
    }

    /// Ids of every materialized scope, sorted
    pub fn scope_ids(&self) -> Vec<String> {
        self.state
            .read()
            .tree()
            .map(ScopeTree::ids)
            .unwrap_or_default()
    }
}

impl Default for ScopeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScopeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ScopeRegistry")
            .field("composers", &state.composers.keys().collect::<Vec<_>>())
            .field("scopes", &state.tree().map(ScopeTree::ids).unwrap_or_default())
            .field("policy", &state.policy)
            .finish()
    }
}
