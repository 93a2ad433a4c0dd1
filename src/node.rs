//! Computation nodes: a behaviour plus its dependency children.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use crate::cache::Cache;
use crate::computation::{CacheMode, Computation, ComputeMode, ExecutionContext};
use crate::dependency::{Dependency, DependencyList, DependencyRegistry};
use crate::engine;
use crate::future::{ErasedFuture, FutureResult};
use crate::key::{node_hash, NodeKey};
use crate::outcome::Outcome;
use crate::tree::{combine_hashes, TreeNode};

#[derive(Clone)]
pub(crate) struct NodeInner<C> {
    behavior: C,
    children: Vec<AnyNode>,
    cache: Option<Cache>,
    hash: OnceLock<u64>,
}

/// Object-safe view of a node, implemented by every `NodeInner<C>`.
pub(crate) trait DynNode: Send + Sync + 'static {
    fn key(&self) -> &dyn NodeKey;

    fn children(&self) -> &[AnyNode];

    fn output_type_id(&self) -> TypeId;

    fn output_type_name(&self) -> &'static str;

    fn cache_override(&self) -> Option<&Cache>;

    fn cache_mode(&self) -> CacheMode;

    fn tree_hash(&self) -> u64;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn request(
        self: Arc<Self>,
        cache: &Cache,
        mode: ComputeMode,
        ctx: ExecutionContext,
    ) -> Arc<dyn ErasedFuture>;
}

impl<C: Computation> DynNode for NodeInner<C> {
    fn key(&self) -> &dyn NodeKey {
        &self.behavior
    }

    fn children(&self) -> &[AnyNode] {
        &self.children
    }

    fn output_type_id(&self) -> TypeId {
        TypeId::of::<C::Output>()
    }

    fn output_type_name(&self) -> &'static str {
        std::any::type_name::<C::Output>()
    }

    fn cache_override(&self) -> Option<&Cache> {
        self.cache.as_ref()
    }

    fn cache_mode(&self) -> CacheMode {
        self.behavior.cache_mode()
    }

    fn tree_hash(&self) -> u64 {
        *self.hash.get_or_init(|| {
            combine_hashes(
                node_hash(&self.behavior),
                self.children.iter().map(AnyNode::tree_hash),
            )
        })
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn request(
        self: Arc<Self>,
        cache: &Cache,
        mode: ComputeMode,
        ctx: ExecutionContext,
    ) -> Arc<dyn ErasedFuture> {
        engine::request(&Node { inner: self }, cache, mode, ctx).erased()
    }
}

/// A type-erased computation node.
///
/// Equality and hashing are tree-wise and structural: the behaviour's kind
/// and fields, then the children in order. This is the cache key.
#[derive(Clone)]
pub struct AnyNode(Arc<dyn DynNode>);

impl AnyNode {
    /// Kind name of the behaviour.
    pub fn kind(&self) -> &'static str {
        self.0.key().type_name()
    }

    /// The behaviour's discriminating fields.
    pub fn key(&self) -> &dyn NodeKey {
        self.0.key()
    }

    pub fn children(&self) -> &[AnyNode] {
        self.0.children()
    }

    pub fn output_type_id(&self) -> TypeId {
        self.0.output_type_id()
    }

    pub fn output_type_name(&self) -> &'static str {
        self.0.output_type_name()
    }

    /// The cache this node consults instead of the one in effect, if any.
    pub fn cache(&self) -> Option<&Cache> {
        self.0.cache_override()
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.0.cache_mode()
    }

    /// Deterministic tree-wise hash; stable across runs.
    pub fn tree_hash(&self) -> u64 {
        self.0.tree_hash()
    }

    /// Recover the typed node.
    pub fn downcast<C: Computation>(&self) -> Option<Node<C>> {
        self.0
            .clone()
            .into_any()
            .downcast::<NodeInner<C>>()
            .ok()
            .map(|inner| Node { inner })
    }

    /// Returns `true` if both handles point to the same allocation.
    pub fn ptr_eq(&self, other: &AnyNode) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn request(
        &self,
        cache: &Cache,
        mode: ComputeMode,
        ctx: ExecutionContext,
    ) -> Arc<dyn ErasedFuture> {
        self.0.clone().request(cache, mode, ctx)
    }
}

impl TreeNode for AnyNode {
    fn tree_children(&self) -> Vec<Self> {
        self.children().to_vec()
    }

    fn node_eq(&self, other: &Self) -> bool {
        self.key().dyn_eq(other.key().as_any())
    }

    fn node_hash(&self) -> u64 {
        node_hash(self.key())
    }

    fn tree_eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.tree_hash() != other.tree_hash() || !self.node_eq(other) {
            return false;
        }
        let (mine, theirs) = (self.children(), other.children());
        mine.len() == theirs.len() && mine.iter().zip(theirs).all(|(a, b)| a.tree_eq(b))
    }

    fn tree_hash(&self) -> u64 {
        self.0.tree_hash()
    }
}

impl PartialEq for AnyNode {
    fn eq(&self, other: &Self) -> bool {
        self.tree_eq(other)
    }
}

impl Eq for AnyNode {}

impl Hash for AnyNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.tree_hash());
    }
}

impl fmt::Debug for AnyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.children().is_empty() {
            write!(f, "{:?}", self.key())
        } else {
            write!(f, "{:?}", self.key())?;
            f.debug_list().entries(self.children()).finish()
        }
    }
}

impl<C: Computation> From<Node<C>> for AnyNode {
    fn from(node: Node<C>) -> Self {
        AnyNode(node.inner)
    }
}

impl<C: Computation> From<&Node<C>> for AnyNode {
    fn from(node: &Node<C>) -> Self {
        AnyNode(node.inner.clone())
    }
}

impl From<&AnyNode> for AnyNode {
    fn from(node: &AnyNode) -> Self {
        node.clone()
    }
}

/// A computation node producing `C::Output`.
///
/// Nodes are immutable once shared. The `replace_*` methods are
/// copy-on-write: they never alter a node another handle (a parent, the
/// cache, a clone) can observe.
pub struct Node<C> {
    inner: Arc<NodeInner<C>>,
}

impl<C> Clone for Node<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn check_children<C: Computation>(behavior: &C, list: &DependencyList, children: &[AnyNode]) {
    if behavior.is_variadic() {
        return;
    }
    assert!(
        children.len() == list.len(),
        "{} expects {} children, got {}",
        list.kind(),
        list.len(),
        children.len()
    );
    for (slot, child) in list.iter().zip(children) {
        assert!(
            slot.type_id() == child.output_type_id(),
            "dependency `{}` of {} expects {}, got a node producing {}",
            slot.name(),
            list.kind(),
            slot.type_name(),
            child.output_type_name()
        );
    }
}

impl<C: Computation> Node<C> {
    /// Create a node whose children match `C`'s slots in the global registry.
    ///
    /// # Panics
    ///
    /// If the number of children differs from the number of slots (unless
    /// `C` is variadic), or a child produces the wrong type for its slot.
    pub fn new(behavior: C, children: Vec<AnyNode>) -> Self {
        Self::with_registry(DependencyRegistry::global(), behavior, children)
    }

    /// [`Node::new`] against an explicit registry.
    pub fn with_registry(
        registry: &DependencyRegistry,
        behavior: C,
        children: Vec<AnyNode>,
    ) -> Self {
        let list = registry.dependencies::<C>();
        check_children(&behavior, &list, &children);
        Self::from_parts(behavior, children, None)
    }

    /// A node without children.
    pub fn leaf(behavior: C) -> Self {
        Self::new(behavior, Vec::new())
    }

    /// Start building a node by binding slots by handle or name.
    pub fn builder(behavior: C) -> NodeBuilder<'static, C> {
        NodeBuilder::new(DependencyRegistry::global(), behavior)
    }

    /// [`Node::builder`] against an explicit registry.
    pub fn builder_in(registry: &DependencyRegistry, behavior: C) -> NodeBuilder<'_, C> {
        NodeBuilder::new(registry, behavior)
    }

    fn from_parts(behavior: C, children: Vec<AnyNode>, cache: Option<Cache>) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                behavior,
                children,
                cache,
                hash: OnceLock::new(),
            }),
        }
    }

    pub fn behavior(&self) -> &C {
        &self.inner.behavior
    }

    pub fn children(&self) -> &[AnyNode] {
        &self.inner.children
    }

    pub fn child(&self, index: usize) -> Option<&AnyNode> {
        self.inner.children.get(index)
    }

    /// The cache this node consults instead of the one in effect, if any.
    pub fn cache(&self) -> Option<&Cache> {
        self.inner.cache.as_ref()
    }

    /// A copy of this node consulting `cache`. The cache is not part of the
    /// node's identity.
    #[must_use]
    pub fn with_cache(&self, cache: Cache) -> Self {
        let mut node = self.clone();
        Arc::make_mut(&mut node.inner).cache = Some(cache);
        node
    }

    /// Deterministic tree-wise hash; stable across runs.
    pub fn tree_hash(&self) -> u64 {
        self.inner.tree_hash()
    }

    /// Type-erased handle to this node.
    pub fn to_any(&self) -> AnyNode {
        AnyNode::from(self)
    }

    fn children_mut(&mut self) -> &mut Vec<AnyNode> {
        let inner = Arc::make_mut(&mut self.inner);
        inner.hash = OnceLock::new();
        &mut inner.children
    }

    /// Replace the child at `index`.
    ///
    /// # Panics
    ///
    /// If `index` is out of range or `child` produces another type than the
    /// child it replaces.
    pub fn replace_child(&mut self, index: usize, child: impl Into<AnyNode>) {
        let child = child.into();
        let current = self.inner.children.get(index).unwrap_or_else(|| {
            panic!(
                "child index {} out of range for {} children",
                index,
                self.inner.children.len()
            )
        });
        assert_same_output(current, &child);
        self.children_mut()[index] = child;
    }

    /// Replace every child equal to `old` with `new`. Returns how many were replaced.
    pub fn replace_child_eq(&mut self, old: &AnyNode, new: impl Into<AnyNode>) -> usize {
        let new = new.into();
        let positions: Vec<usize> = self
            .inner
            .children
            .iter()
            .enumerate()
            .filter(|(_, child)| *child == old)
            .map(|(index, _)| index)
            .collect();
        if positions.is_empty() {
            return 0;
        }
        assert_same_output(old, &new);
        let children = self.children_mut();
        for &index in &positions {
            children[index] = new.clone();
        }
        positions.len()
    }

    /// Replace each child with `mapper(index, child)`.
    ///
    /// # Panics
    ///
    /// If a replacement produces another type than the child it replaces.
    pub fn replace_children(&mut self, mut mapper: impl FnMut(usize, &AnyNode) -> AnyNode) {
        let replaced: Vec<AnyNode> = self
            .inner
            .children
            .iter()
            .enumerate()
            .map(|(index, child)| {
                let next = mapper(index, child);
                assert_same_output(child, &next);
                next
            })
            .collect();
        if replaced
            .iter()
            .zip(self.inner.children.iter())
            .all(|(a, b)| a.ptr_eq(b))
        {
            return;
        }
        *self.children_mut() = replaced;
    }

    fn effective_cache(&self) -> Cache {
        self.inner.cache.clone().unwrap_or_else(Cache::global)
    }

    /// Compute and block for the outcome, using this node's cache (or the global one).
    pub fn compute(&self) -> Outcome<Arc<C::Output>> {
        self.compute_future().get()
    }

    /// Start computing, using this node's cache (or the global one).
    pub fn compute_future(&self) -> FutureResult<C::Output> {
        self.compute_with(&self.effective_cache(), ComputeMode::CACHED)
    }

    /// Compute in `cache` and block for the outcome.
    pub fn compute_in(&self, cache: &Cache) -> Outcome<Arc<C::Output>> {
        self.compute_future_in(cache).get()
    }

    /// Start computing in `cache`.
    pub fn compute_future_in(&self, cache: &Cache) -> FutureResult<C::Output> {
        self.compute_with(cache, ComputeMode::CACHED)
    }

    /// Start computing in `cache` with explicit cache lookup/write switches.
    ///
    /// Nodes carrying their own cache override `cache` for their subtree.
    pub fn compute_with(&self, cache: &Cache, mode: ComputeMode) -> FutureResult<C::Output> {
        engine::request(self, cache, mode, ExecutionContext::current())
    }

    /// Aggregated progress of this node's subtree in its cache.
    pub fn progress(&self) -> Option<f64> {
        self.effective_cache().progress(&self.to_any())
    }
}

fn assert_same_output(current: &AnyNode, replacement: &AnyNode) {
    assert!(
        current.output_type_id() == replacement.output_type_id(),
        "replacement produces {}, but the replaced child produces {}",
        replacement.output_type_name(),
        current.output_type_name()
    );
}

impl<C: Computation> PartialEq for Node<C> {
    fn eq(&self, other: &Self) -> bool {
        self.to_any() == other.to_any()
    }
}

impl<C: Computation> Eq for Node<C> {}

impl<C: Computation> Hash for Node<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.tree_hash());
    }
}

impl<C: Computation> fmt::Debug for Node<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.to_any(), f)
    }
}

/// Builds a [`Node`] by binding its dependency slots.
///
/// Slots left unbound fall back to their declared default computation.
///
/// # Example
///
/// ```
/// use compute_flow::{Computation, Constant, Declarer, Node, Outcome, Progress, Values};
///
/// #[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// struct Greeting;
///
/// impl Computation for Greeting {
///     type Output = String;
///
///     fn declare(decl: &mut Declarer<'_>) {
///         decl.dependency::<String>("name");
///         decl.optional::<String>("punctuation", Constant::node("!".to_string()));
///     }
///
///     fn compute(&self, values: &Values, _progress: &Progress) -> Outcome<String> {
///         let name = values.value::<String>(0);
///         let punctuation = values.value::<String>(1);
///         Outcome::ok(format!("hello {}{}", name, punctuation))
///     }
/// }
///
/// let node = Node::builder(Greeting)
///     .bind_name("name", Constant::node("world".to_string()))
///     .build();
/// assert_eq!(node.compute().value().map(|v| v.as_str()), Some("hello world!"));
/// ```
pub struct NodeBuilder<'r, C> {
    registry: &'r DependencyRegistry,
    behavior: C,
    list: Arc<DependencyList>,
    bound: Vec<Option<AnyNode>>,
    cache: Option<Cache>,
}

impl<'r, C: Computation> NodeBuilder<'r, C> {
    fn new(registry: &'r DependencyRegistry, behavior: C) -> Self {
        let list = registry.dependencies::<C>();
        let bound = vec![None; list.len()];
        Self {
            registry,
            behavior,
            list,
            bound,
            cache: None,
        }
    }

    /// Bind the slot behind `dependency`.
    ///
    /// # Panics
    ///
    /// If the handle does not belong to `C`'s slots or `child` produces
    /// another type.
    #[must_use]
    pub fn bind<U: Any + Send + Sync>(
        mut self,
        dependency: Dependency<U>,
        child: impl Into<AnyNode>,
    ) -> Self {
        let matches = self
            .list
            .get(dependency.index())
            .is_some_and(|slot| slot.name() == dependency.name());
        assert!(
            matches,
            "{:?} is not a dependency of {}",
            dependency,
            self.list.kind()
        );
        self.set(dependency.index(), child.into());
        self
    }

    /// Bind a slot by name.
    ///
    /// # Panics
    ///
    /// If `C` has no such slot or `child` produces another type.
    #[must_use]
    pub fn bind_name(mut self, name: &str, child: impl Into<AnyNode>) -> Self {
        let index = self
            .list
            .find(name)
            .map(|slot| slot.index())
            .unwrap_or_else(|| panic!("{} has no dependency `{}`", self.list.kind(), name));
        self.set(index, child.into());
        self
    }

    fn set(&mut self, index: usize, child: AnyNode) {
        if let Some(slot) = self.list.get(index) {
            assert!(
                slot.type_id() == child.output_type_id(),
                "dependency `{}` of {} expects {}, got a node producing {}",
                slot.name(),
                self.list.kind(),
                slot.type_name(),
                child.output_type_name()
            );
        }
        self.bound[index] = Some(child);
    }

    /// Make the node consult `cache`.
    #[must_use]
    pub fn cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Finish the node.
    ///
    /// # Panics
    ///
    /// If a slot without a default is left unbound.
    pub fn build(self) -> Node<C> {
        let children: Vec<AnyNode> = self
            .bound
            .into_iter()
            .zip(self.list.iter())
            .map(|(bound, slot)| {
                bound.or_else(|| slot.default().cloned()).unwrap_or_else(|| {
                    panic!(
                        "dependency `{}` of {} is not bound and has no default",
                        slot.name(),
                        self.list.kind()
                    )
                })
            })
            .collect();
        let node = Node::with_registry(self.registry, self.behavior, children);
        match self.cache {
            Some(cache) => node.with_cache(cache),
            None => node,
        }
    }
}
