//! Scope nodes and the scope tree
//!
//! The tree is an arena keyed by scope id. Every node owns its dependency
//! store and knows its parent and children by id. Structural invariants:
//!
//! - no lifetime other than `Transient` repeats along a root-to-node path
//! - no scope has the `Transient` lifetime
//! - only the root id uses the root lifetime, and the root always uses it
//! - the root has no parent

use crate::composer::Composer;
use crate::context::{ContextPolicy, ScopeContext};
use crate::error::{DiError, DiResult};
use crate::lifetime::LifetimeTag;
use crate::store::DependencyStore;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Reserved id of the root scope
pub const ROOT_SCOPE_ID: &str = "root";

/// A node of the scope tree
#[derive(Debug)]
pub struct ScopeNode {
    id: String,
    lifetime: LifetimeTag,
    parent: Option<String>,
    children: BTreeSet<String>,
    /// Context given when the scope was created
    declared: ScopeContext,
    /// Declared context merged onto every ancestor's context
    context: ScopeContext,
    store: DependencyStore,
    /// Unique per materialization, so resolvers notice a recreated scope
    generation: u64,
}

impl ScopeNode {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn lifetime(&self) -> &LifetimeTag {
        &self.lifetime
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(String::as_str)
    }

    pub fn declared_context(&self) -> &ScopeContext {
        &self.declared
    }

    pub fn context(&self) -> &ScopeContext {
        &self.context
    }

    pub fn store(&self) -> &DependencyStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut DependencyStore {
        &mut self.store
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    fn info(&self) -> ScopeInfo {
        ScopeInfo {
            id: self.id.clone(),
            lifetime: self.lifetime.clone(),
            parent: self.parent.clone(),
            children: self.children.iter().cloned().collect(),
            declared_context: self.declared.clone(),
            context: self.context.clone(),
            cached: self.store.cached_ids(),
            entries: self.store.len(),
        }
    }
}

/// Read-only snapshot of a scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeInfo {
    pub id: String,
    pub lifetime: LifetimeTag,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub declared_context: ScopeContext,
    pub context: ScopeContext,
    /// Ids of composers whose values are cached in this scope
    pub cached: Vec<String>,
    /// Number of store entries, pending or realized
    pub entries: usize,
}

/// What a caller asks `ensure` for
#[derive(Debug, Clone)]
pub struct ScopeRequest {
    pub id: String,
    pub lifetime: LifetimeTag,
    pub parent: Option<String>,
    pub context: Option<ScopeContext>,
}

impl ScopeRequest {
    pub fn new(id: impl Into<String>, lifetime: impl Into<LifetimeTag>) -> Self {
        Self {
            id: id.into(),
            lifetime: lifetime.into(),
            parent: None,
            context: None,
        }
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn context(mut self, context: ScopeContext) -> Self {
        self.context = Some(context);
        self
    }

    fn is_root(&self) -> bool {
        self.id == ROOT_SCOPE_ID
    }

    /// Checks that do not depend on the current tree
    fn validate_shape(&self) -> DiResult<()> {
        if self.lifetime.is_transient() {
            return Err(DiError::invalid_structure(
                &self.id,
                "scopes cannot have the transient lifetime",
            ));
        }
        if self.is_root() != self.lifetime.is_root() {
            return Err(DiError::invalid_structure(
                &self.id,
                "only the root scope can have the root lifetime",
            ));
        }
        if self.is_root() && self.parent.is_some() {
            return Err(DiError::invalid_structure(
                &self.id,
                "root scope cannot have a parent",
            ));
        }
        Ok(())
    }

    fn parent_id(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            Some(self.parent.as_deref().unwrap_or(ROOT_SCOPE_ID))
        }
    }
}

/// Arena of scope nodes rooted at [`ROOT_SCOPE_ID`]
#[derive(Debug)]
pub struct ScopeTree {
    nodes: FxHashMap<String, ScopeNode>,
}

impl ScopeTree {
    /// Materialize a tree holding only the root scope
    pub(crate) fn with_root(
        composers: &BTreeMap<String, Arc<Composer>>,
        context: ScopeContext,
        generation: u64,
    ) -> Self {
        let root = ScopeNode {
            id: ROOT_SCOPE_ID.to_string(),
            lifetime: LifetimeTag::Root,
            parent: None,
            children: BTreeSet::new(),
            declared: context.clone(),
            context,
            store: DependencyStore::seeded(&LifetimeTag::Root, composers.values()),
            generation,
        };
        debug!("Materialized root scope with {} entries", root.store.len());

        let mut nodes = FxHashMap::default();
        nodes.insert(root.id.clone(), root);
        Self { nodes }
    }

    pub fn get(&self, id: &str) -> Option<&ScopeNode> {
        self.nodes.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut ScopeNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<&ScopeNode> {
        self.nodes.get(ROOT_SCOPE_ID)
    }

    /// Sorted ids of every scope in the tree
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn info(&self, id: &str) -> Option<ScopeInfo> {
        self.nodes.get(id).map(ScopeNode::info)
    }

    /// The node itself followed by each ancestor up to the root
    pub fn path_to_root(&self, id: &str) -> Vec<&ScopeNode> {
        let mut path = Vec::new();
        let mut current = self.nodes.get(id);
        while let Some(node) = current {
            path.push(node);
            current = node.parent.as_deref().and_then(|parent| self.nodes.get(parent));
        }
        path
    }

    /// Create the requested scope, or check that the existing one matches.
    /// Nothing changes when an error is returned.
    pub(crate) fn ensure(
        &mut self,
        request: &ScopeRequest,
        composers: &BTreeMap<String, Arc<Composer>>,
        policy: ContextPolicy,
        generation: u64,
    ) -> DiResult<EnsureOutcome> {
        request.validate_shape()?;

        if let Some(existing) = self.nodes.get(&request.id) {
            Self::validate_existing(existing, request, policy)?;
            return Ok(EnsureOutcome::Existing(existing.generation));
        }

        // the root always exists in a materialized tree
        let parent_id = request.parent_id().unwrap_or(ROOT_SCOPE_ID);
        let parent = self.nodes.get(parent_id).ok_or_else(|| {
            DiError::invalid_structure(
                &request.id,
                format!("parent scope '{}' does not exist", parent_id),
            )
        })?;

        if let Some(ancestor) = self
            .path_to_root(parent_id)
            .into_iter()
            .find(|ancestor| ancestor.lifetime == request.lifetime)
        {
            return Err(DiError::invalid_structure(
                &request.id,
                format!(
                    "ancestor scope '{}' already has lifetime '{}'",
                    ancestor.id, request.lifetime
                ),
            ));
        }

        let declared = request.context.clone().unwrap_or_default();
        let context = parent.context.merge_with(&declared, policy)?;

        let node = ScopeNode {
            id: request.id.clone(),
            lifetime: request.lifetime.clone(),
            parent: Some(parent_id.to_string()),
            children: BTreeSet::new(),
            declared,
            context,
            store: DependencyStore::seeded(&request.lifetime, composers.values()),
            generation,
        };
        debug!(
            "Created scope '{}' ({}) under '{}' with context {}",
            node.id, node.lifetime, parent_id, node.context
        );

        if let Some(parent) = self.nodes.get_mut(parent_id) {
            parent.children.insert(request.id.clone());
        }
        self.nodes.insert(request.id.clone(), node);
        Ok(EnsureOutcome::Created(generation))
    }

    fn validate_existing(existing: &ScopeNode, request: &ScopeRequest, policy: ContextPolicy) -> DiResult<()> {
        if existing.lifetime != request.lifetime {
            return Err(DiError::invalid_structure(
                &request.id,
                format!(
                    "scope already exists with lifetime '{}', requested '{}'",
                    existing.lifetime, request.lifetime
                ),
            ));
        }
        if existing.parent() != request.parent_id() {
            return Err(DiError::invalid_structure(
                &request.id,
                format!(
                    "scope already exists under '{}', requested '{}'",
                    existing.parent().unwrap_or("<none>"),
                    request.parent_id().unwrap_or("<none>")
                ),
            ));
        }
        if let Some(context) = &request.context {
            existing.declared.check_redeclared(context, policy)?;
        }
        Ok(())
    }

    /// Detach a non-root scope and drop it together with every descendant.
    /// Returns the removed ids, deepest last.
    pub(crate) fn remove(&mut self, id: &str) -> Vec<String> {
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };
        if let Some(parent_id) = node.parent.clone() {
            if let Some(parent) = self.nodes.get_mut(&parent_id) {
                parent.children.remove(id);
            }
        }

        let mut removed = Vec::new();
        let mut pending = vec![id.to_string()];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                pending.extend(node.children.into_iter());
                removed.push(next);
            }
        }
        removed
    }

    /// Seed a newly registered composer into every scope it applies to
    pub(crate) fn seed_all(&mut self, composer: &Arc<Composer>) -> usize {
        let mut seeded = 0;
        for node in self.nodes.values_mut() {
            if node.store.seed(&node.lifetime, composer) {
                seeded += 1;
            }
        }
        seeded
    }
}

/// Whether `ensure` created a scope or found a matching one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnsureOutcome {
    Created(u64),
    Existing(u64),
}
