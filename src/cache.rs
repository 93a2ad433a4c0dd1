//! Structural result cache shared by concurrent computations.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use crate::computation::{Computation, ExecutionContext};
use crate::executor::Executor;
use crate::future::{ErasedFuture, FutureResult};
use crate::node::{AnyNode, Node};
use crate::policy::{CacheAll, CachePolicy};
use crate::tracer::{NoopTracer, Tracer, TracerNodeKey};

/// Policy, executor and tracer used by the computations running in a [`Cache`].
#[derive(Clone)]
pub struct Configuration {
    policy: Arc<dyn CachePolicy>,
    executor: Executor,
    tracer: Arc<dyn Tracer>,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::new()
    }

    pub fn policy(&self) -> &Arc<dyn CachePolicy> {
        &self.policy
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn tracer(&self) -> &Arc<dyn Tracer> {
        &self.tracer
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("policy", &self.policy)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Configuration`].
///
/// # Example
///
/// ```
/// use compute_flow::{Cache, CacheTopLevel, Configuration, ExecutorConfig};
///
/// let cache = Cache::new(
///     Configuration::builder()
///         .policy(CacheTopLevel)
///         .executor(ExecutorConfig::default().worker_threads(2).build().unwrap())
///         .build(),
/// );
/// ```
pub struct ConfigurationBuilder {
    policy: Arc<dyn CachePolicy>,
    executor: Option<Executor>,
    tracer: Arc<dyn Tracer>,
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationBuilder {
    /// Defaults: [`CacheAll`], the shared executor and [`NoopTracer`].
    pub fn new() -> Self {
        Self {
            policy: Arc::new(CacheAll),
            executor: None,
            tracer: Arc::new(NoopTracer),
        }
    }

    pub fn policy(mut self, policy: impl CachePolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn shared_policy(mut self, policy: Arc<dyn CachePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn tracer(mut self, tracer: impl Tracer) -> Self {
        self.tracer = Arc::new(tracer);
        self
    }

    pub fn shared_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn build(self) -> Configuration {
        Configuration {
            policy: self.policy,
            executor: self.executor.unwrap_or_else(Executor::shared),
            tracer: self.tracer,
        }
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Number of cached nodes.
    pub entries: usize,
    /// Cached nodes still computing.
    pub pending: usize,
    /// Total hits over all nodes since the last [`Cache::clear`].
    pub hits: u64,
}

struct CacheInner {
    entries: papaya::HashMap<AnyNode, Arc<dyn ErasedFuture>, ahash::RandomState>,
    hits: Mutex<HashMap<AnyNode, u64, ahash::RandomState>>,
    config: RwLock<Configuration>,
}

/// Concurrent map from node (by structural identity) to its shared future.
///
/// Entries are write-once: [`put`](Self::put) never replaces an existing
/// entry. [`remove`](Self::remove) followed by a new write is allowed.
/// Entries whose future was cancelled or panicked are evicted on lookup.
///
/// Cloning yields another handle to the same cache.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

static GLOBAL: OnceLock<Cache> = OnceLock::new();

impl Default for Cache {
    fn default() -> Self {
        Self::new(Configuration::default())
    }
}

impl Cache {
    pub fn new(config: Configuration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: papaya::HashMap::with_hasher(ahash::RandomState::new()),
                hits: Mutex::new(HashMap::with_hasher(ahash::RandomState::new())),
                config: RwLock::new(config),
            }),
        }
    }

    /// The process-wide cache used by nodes without their own.
    pub fn global() -> Cache {
        GLOBAL.get_or_init(Cache::default).clone()
    }

    pub fn configuration(&self) -> Configuration {
        self.inner.config.read().clone()
    }

    /// Replace the configuration. Requests already running keep the one
    /// they started with.
    pub fn set_configuration(&self, config: Configuration) {
        *self.inner.config.write() = config;
    }

    /// The cached future for `node`, counting a hit. Cancelled or panicked
    /// entries are evicted and reported as absent.
    pub fn try_hit<C: Computation>(&self, node: &Node<C>) -> Option<FutureResult<C::Output>> {
        self.hit(&node.to_any()).and_then(FutureResult::from_erased)
    }

    /// Store `future` for `node` if the configured policy agrees and no entry exists.
    pub fn try_write<C: Computation>(
        &self,
        node: &Node<C>,
        future: &FutureResult<C::Output>,
        ctx: &ExecutionContext,
    ) -> bool {
        let node = node.to_any();
        let allowed = self.inner.config.read().policy.should_cache(&node, ctx);
        allowed && self.insert(node, future.erased()).is_ok()
    }

    pub fn has(&self, node: impl Into<AnyNode>) -> bool {
        self.inner.entries.pin().contains_key(&node.into())
    }

    /// The cached future for `node`, without counting a hit.
    pub fn get<C: Computation>(&self, node: &Node<C>) -> Option<FutureResult<C::Output>> {
        self.peek(&node.to_any()).and_then(FutureResult::from_erased)
    }

    /// Store `future` for `node` unless an entry exists. Returns whether it was stored.
    pub fn put<C: Computation>(&self, node: &Node<C>, future: FutureResult<C::Output>) -> bool {
        let node = node.to_any();
        if self.inner.entries.pin().try_insert(node.clone(), future.erased()).is_err() {
            return false;
        }
        tracing::debug!(kind = node.kind(), "cache put");
        let tracer = self.inner.config.read().tracer.clone();
        tracer.on_cache_write(tracer.new_span_id(), TracerNodeKey::of(&node));
        true
    }

    /// Drop the entry and hit counter for `node`. Returns whether an entry existed.
    pub fn remove(&self, node: impl Into<AnyNode>) -> bool {
        let node = node.into();
        let removed = self.inner.entries.pin().remove(&node).is_some();
        self.inner.hits.lock().remove(&node);
        if removed {
            tracing::debug!(kind = node.kind(), "cache entry removed");
        }
        removed
    }

    /// Drop every entry and hit counter.
    pub fn clear(&self) {
        self.inner.entries.pin().clear();
        self.inner.hits.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times `node` was served from this cache.
    pub fn hit_count(&self, node: impl Into<AnyNode>) -> u64 {
        self.inner
            .hits
            .lock()
            .get(&node.into())
            .copied()
            .unwrap_or(0)
    }

    pub fn stats(&self) -> CacheStats {
        let pinned = self.inner.entries.pin();
        let pending = pinned.values().filter(|future| !future.is_done()).count();
        CacheStats {
            entries: pinned.len(),
            pending,
            hits: self.inner.hits.lock().values().sum(),
        }
    }

    /// Averaged progress of `node`'s subtree.
    ///
    /// Averages, with equal weight, the node's own fraction (`1.0` once
    /// resolved) when it is cached, and the progress of each child subtree
    /// that has any. `None` when nothing in the subtree is cached.
    pub fn progress(&self, node: impl Into<AnyNode>) -> Option<f64> {
        let node = node.into();
        let mut parts: Vec<f64> = Vec::with_capacity(node.children().len() + 1);
        if let Some(future) = self.peek(&node) {
            parts.push(future.fraction());
        }
        parts.extend(node.children().iter().filter_map(|child| self.progress(child)));
        if parts.is_empty() {
            None
        } else {
            Some(parts.iter().sum::<f64>() / parts.len() as f64)
        }
    }

    /// Every cached node, ordered by deterministic tree hash.
    ///
    /// The order depends only on the cached nodes, not on insertion order or
    /// on the run.
    pub fn cached_computations(&self) -> Vec<AnyNode> {
        let mut nodes: Vec<AnyNode> = self.inner.entries.pin().keys().cloned().collect();
        nodes.sort_by_key(AnyNode::tree_hash);
        nodes
    }

    fn peek(&self, node: &AnyNode) -> Option<Arc<dyn ErasedFuture>> {
        self.inner.entries.pin().get(node).cloned()
    }

    fn count_hit(&self, node: &AnyNode) {
        *self.inner.hits.lock().entry(node.clone()).or_insert(0) += 1;
    }

    /// Remove `node`'s entry only if it is still `observed`; a concurrent
    /// writer may already have replaced it with a live future.
    fn evict(&self, node: &AnyNode, observed: &Arc<dyn ErasedFuture>) -> bool {
        let pinned = self.inner.entries.pin();
        let evicted = matches!(
            pinned.remove_if(node, |_, current| Arc::ptr_eq(current, observed)),
            Ok(Some(_))
        );
        drop(pinned);
        if evicted {
            self.inner.hits.lock().remove(node);
            tracing::debug!(kind = node.kind(), "evicted cancelled or faulted entry");
            self.inner.config.read().tracer.on_cache_evict(TracerNodeKey::of(node));
        }
        evicted
    }

    /// Lookup used by the engine: evicts bad entries and counts hits.
    pub(crate) fn hit(&self, node: &AnyNode) -> Option<Arc<dyn ErasedFuture>> {
        let future = self.peek(node)?;
        if future.is_evictable() {
            self.evict(node, &future);
            return None;
        }
        self.count_hit(node);
        Some(future)
    }

    /// Write-once insert used by the engine. On conflict returns the live
    /// entry; a cancelled or faulted occupant is evicted and replaced.
    pub(crate) fn insert(
        &self,
        node: AnyNode,
        future: Arc<dyn ErasedFuture>,
    ) -> Result<(), Arc<dyn ErasedFuture>> {
        loop {
            let pinned = self.inner.entries.pin();
            let existing = match pinned.try_insert(node.clone(), future.clone()) {
                Ok(_) => return Ok(()),
                Err(occupied) => occupied.current.clone(),
            };
            drop(pinned);
            if !existing.is_evictable() {
                return Err(existing);
            }
            self.evict(&node, &existing);
        }
    }

    pub(crate) fn count_shared_hit(&self, node: &AnyNode) {
        self.count_hit(node);
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("entries", &self.len())
            .field("config", &*self.inner.config.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::Constant;
    use crate::outcome::Outcome;
    use crate::policy::CacheNone;

    #[test]
    fn test_put_is_write_once() {
        let cache = Cache::default();
        let node = Constant::node(1u32);
        assert!(cache.put(&node, FutureResult::of(Outcome::ok(10))));
        assert!(!cache.put(&node, FutureResult::of(Outcome::ok(20))));
        let cached = cache.get(&node).unwrap().get();
        assert_eq!(cached.value().map(|v| **v), Some(10));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_then_rewrite() {
        let cache = Cache::default();
        let node = Constant::node(1u32);
        cache.put(&node, FutureResult::of(Outcome::ok(10)));
        assert!(cache.remove(&node));
        assert!(!cache.remove(&node));
        assert!(cache.put(&node, FutureResult::of(Outcome::ok(20))));
        assert_eq!(cache.get(&node).unwrap().get().value().map(|v| **v), Some(20));
    }

    #[test]
    fn test_try_hit_counts_and_evicts_cancelled() {
        let cache = Cache::default();
        let node = Constant::node(1u32);
        assert!(cache.try_hit(&node).is_none());

        cache.put(&node, FutureResult::of(Outcome::ok(1)));
        assert!(cache.try_hit(&node).is_some());
        assert!(cache.try_hit(&node).is_some());
        assert_eq!(cache.hit_count(&node), 2);

        cache.remove(&node);
        assert_eq!(cache.hit_count(&node), 0);
        let pending = FutureResult::<u32>::pending();
        cache.put(&node, pending.clone());
        pending.cancel();
        assert!(cache.try_hit(&node).is_none());
        assert!(!cache.has(&node));
        assert_eq!(cache.hit_count(&node), 0);
    }

    #[test]
    fn test_rewrite_starts_a_fresh_hit_count() {
        let cache = Cache::default();
        let node = Constant::node(4u32);
        cache.put(&node, FutureResult::of(Outcome::ok(4)));
        cache.try_hit(&node);
        cache.try_hit(&node);
        assert_eq!(cache.hit_count(&node), 2);

        assert!(cache.remove(&node));
        assert!(cache.put(&node, FutureResult::of(Outcome::ok(4))));
        assert_eq!(cache.hit_count(&node), 0);
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_stale_eviction_keeps_replacement() {
        let cache = Cache::default();
        let node = Constant::node(5u32);
        let any = node.to_any();

        let cancelled = FutureResult::<u32>::pending();
        cache.put(&node, cancelled.clone());
        cancelled.cancel();
        let observed = cache.peek(&any).unwrap();
        assert!(observed.is_evictable());

        // Another writer replaces the cancelled entry with a live one.
        let live = FutureResult::<u32>::pending();
        assert!(cache.insert(any.clone(), live.erased()).is_ok());

        // Eviction based on the earlier observation must not touch it.
        assert!(!cache.evict(&any, &observed));
        assert!(cache.has(&node));
        let current = cache.peek(&any).unwrap();
        assert!(Arc::ptr_eq(&current, &live.erased()));
        assert!(!current.is_evictable());

        assert!(cache.evict(&any, &current));
        assert!(!cache.has(&node));
    }

    #[test]
    fn test_try_write_follows_policy() {
        let ctx = ExecutionContext::top_level();
        let none = Cache::new(Configuration::builder().policy(CacheNone).build());
        let node = Constant::node(3u32);
        assert!(!none.try_write(&node, &FutureResult::of(Outcome::ok(3)), &ctx));
        assert!(none.is_empty());

        let all = Cache::default();
        assert!(all.try_write(&node, &FutureResult::of(Outcome::ok(3)), &ctx));
        assert!(!all.try_write(&node, &FutureResult::of(Outcome::ok(4)), &ctx));
    }

    #[test]
    fn test_progress_of_uncached_subtree_is_none() {
        let cache = Cache::default();
        assert_eq!(cache.progress(&Constant::node(1u32)), None);
    }

    #[test]
    fn test_clear_and_stats() {
        let cache = Cache::default();
        let a = Constant::node(1u32);
        let b = Constant::node(2u32);
        cache.put(&a, FutureResult::of(Outcome::ok(1)));
        cache.put(&b, FutureResult::pending());
        cache.try_hit(&a);
        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 2,
                pending: 1,
                hits: 1
            }
        );
        cache.clear();
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
