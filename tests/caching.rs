//! Tests for structural caching, policies and cache bookkeeping.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use compute_flow::{
    AllOf, Cache, CacheAll, CacheNone, CacheTopLevel, Computation, ComputationId,
    ComputeMode, Configuration, Constant, Declarer, ExecutionResult, FutureResult, Map, Node,
    Outcome, Progress, SpanId, Tracer, TracerNodeKey, Values,
};

fn cache() -> Cache {
    Cache::new(Configuration::default())
}

fn id(name: &str) -> ComputationId {
    ComputationId::new(module_path!(), name)
}

// =============================================================================
// Write-once
// =============================================================================

#[test]
fn test_put_never_replaces() {
    let cache = cache();
    let node = Constant::node("key".to_string());

    assert!(cache.put(&node, FutureResult::of(Outcome::ok("first".to_string()))));
    assert!(!cache.put(&node, FutureResult::of(Outcome::ok("second".to_string()))));

    let cached = cache.get(&node).unwrap().get();
    assert_eq!(cached.value().map(|v| v.as_str()), Some("first"));
}

#[test]
fn test_computed_entry_is_not_replaced_by_put() {
    let cache = cache();
    let node = Constant::node(5u32);
    node.compute_in(&cache);
    assert!(!cache.put(&node, FutureResult::of(Outcome::ok(6))));
    assert_eq!(node.compute_in(&cache).value().map(|v| **v), Some(5));
}

// =============================================================================
// Structural sharing
// =============================================================================

mod sharing {
    use super::*;

    pub static CALLS: AtomicU32 = AtomicU32::new(0);

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct Square;

    impl Computation for Square {
        type Output = u64;

        fn declare(decl: &mut Declarer<'_>) {
            decl.dependency::<u64>("input");
        }

        fn compute(&self, values: &Values, _progress: &Progress) -> Outcome<u64> {
            CALLS.fetch_add(1, Ordering::SeqCst);
            let n = *values.value::<u64>(0);
            Outcome::ok(n * n)
        }
    }
}

#[test]
fn test_equal_trees_share_a_result() {
    let cache = cache();
    let first = Node::new(sharing::Square, vec![Constant::node(7u64).into()]);
    let second = Node::new(sharing::Square, vec![Constant::node(7u64).into()]);
    assert_eq!(first, second);

    assert_eq!(first.compute_in(&cache).value().map(|v| **v), Some(49));
    assert_eq!(second.compute_in(&cache).value().map(|v| **v), Some(49));

    assert_eq!(sharing::CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(cache.hit_count(&first), 1);
    assert_eq!(cache.hit_count(&second), 1);
}

#[test]
fn test_shared_subtree_is_computed_once() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let shared = Map::node(id("shared_increment"), Constant::node(1u32), move |v: &u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        v + 1
    });
    let root = AllOf::<u32>::node([shared.clone(), shared.clone(), shared]);

    let values: Vec<u32> = root
        .compute_in(&cache)
        .into_value()
        .unwrap()
        .iter()
        .map(|v| **v)
        .collect();
    assert_eq!(values, vec![2, 2, 2]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// At-most-once under concurrency
// =============================================================================

mod concurrent {
    use super::*;

    pub static CALLS: AtomicU32 = AtomicU32::new(0);

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct Slow(pub u32);

    impl Computation for Slow {
        type Output = u32;

        fn compute(&self, _values: &Values, _progress: &Progress) -> Outcome<u32> {
            CALLS.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            Outcome::ok(self.0 * 2)
        }
    }
}

#[test]
fn test_concurrent_requests_execute_once() {
    const CALLERS: usize = 16;
    let cache = cache();
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let node = Node::leaf(concurrent::Slow(21));
                barrier.wait();
                node.compute_in(&cache).into_value().unwrap()
            })
        })
        .collect();

    let results: Vec<Arc<u32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(concurrent::CALLS.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| **r == 42));
    assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    assert_eq!(
        cache.hit_count(&Node::leaf(concurrent::Slow(21))),
        CALLERS as u64 - 1
    );
}

// =============================================================================
// Policies
// =============================================================================

mod nesting {
    use super::*;

    pub static TOP_LEVEL: OnceLock<Cache> = OnceLock::new();
    pub static ALL: OnceLock<Cache> = OnceLock::new();

    pub fn top_level_cache() -> &'static Cache {
        TOP_LEVEL.get_or_init(|| Cache::new(Configuration::builder().policy(CacheTopLevel).build()))
    }

    pub fn all_cache() -> &'static Cache {
        ALL.get_or_init(|| Cache::new(Configuration::builder().policy(CacheAll).build()))
    }

    pub fn inner(n: u32) -> Node<Constant<u32>> {
        Constant::node(n)
    }

    /// Computes `inner(n)` from inside its own logic.
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct Outer {
        pub n: u32,
        pub top_level_only: bool,
    }

    impl Computation for Outer {
        type Output = u32;

        fn compute(&self, _values: &Values, _progress: &Progress) -> Outcome<u32> {
            let cache = if self.top_level_only {
                top_level_cache()
            } else {
                all_cache()
            };
            inner(self.n).compute_in(cache).map(|v| *v + 1)
        }
    }
}

#[test]
fn test_top_level_policy_skips_nested_requests() {
    let cache = nesting::top_level_cache();
    let outer = Node::leaf(nesting::Outer {
        n: 10,
        top_level_only: true,
    });

    assert_eq!(outer.compute_in(cache).value().map(|v| **v), Some(11));
    assert!(cache.has(&outer));
    assert!(!cache.has(&nesting::inner(10)));

    nesting::inner(10).compute_in(cache);
    assert!(cache.has(&nesting::inner(10)));
}

#[test]
fn test_cache_all_policy_keeps_nested_requests() {
    let cache = nesting::all_cache();
    let outer = Node::leaf(nesting::Outer {
        n: 20,
        top_level_only: false,
    });

    assert_eq!(outer.compute_in(cache).value().map(|v| **v), Some(21));
    assert!(cache.has(&outer));
    assert!(cache.has(&nesting::inner(20)));
}

#[test]
fn test_top_level_policy_caches_whole_requested_tree() {
    let cache = Cache::new(Configuration::builder().policy(CacheTopLevel).build());
    let root = AllOf::<u32>::node([Constant::node(1u32), Constant::node(2)]);
    root.compute_in(&cache);
    assert_eq!(cache.len(), 3);
}

#[test]
fn test_cache_none_policy() {
    let cache = Cache::new(Configuration::builder().policy(CacheNone).build());
    let node = Constant::node(1u32);
    assert_eq!(node.compute_in(&cache).value().map(|v| **v), Some(1));
    assert!(cache.is_empty());
}

// =============================================================================
// Compute modes
// =============================================================================

#[test]
fn test_compute_modes() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let node = Map::node(id("counted"), Constant::node(3u32), move |v: &u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        *v
    });

    node.compute_with(&cache, ComputeMode::READ_ONLY).get();
    assert!(!cache.has(&node));

    node.compute_in(&cache);
    assert!(cache.has(&node));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    node.compute_with(&cache, ComputeMode::UNCACHED).get();
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    node.compute_in(&cache);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

// =============================================================================
// Copy-on-write replacement
// =============================================================================

#[test]
fn test_replacement_leaves_cached_node_untouched() {
    let cache = cache();
    let original = Map::node(id("square"), Constant::node(3u64), |v: &u64| v * v);
    original.compute_in(&cache);

    let mut edited = original.clone();
    edited.replace_child(0, Constant::node(4u64));

    assert!(cache.has(&original));
    assert!(!cache.has(&edited));
    assert_eq!(edited.compute_in(&cache).value().map(|v| **v), Some(16));
    assert_eq!(original.compute_in(&cache).value().map(|v| **v), Some(9));
}

// =============================================================================
// Deterministic enumeration
// =============================================================================

#[test]
fn test_enumeration_ignores_insertion_order() {
    let nodes: Vec<Node<Constant<u32>>> = (0..20u32).map(Constant::node).collect();

    let forward = cache();
    for node in &nodes {
        forward.put(node, FutureResult::of(Outcome::ok(0)));
    }
    let backward = cache();
    for node in nodes.iter().rev() {
        backward.put(node, FutureResult::of(Outcome::ok(0)));
    }

    let a = forward.cached_computations();
    let b = backward.cached_computations();
    assert_eq!(a.len(), 20);
    assert_eq!(a, b);
    assert!(a.windows(2).all(|w| w[0].tree_hash() <= w[1].tree_hash()));
}

#[test]
fn test_tree_hash_is_stable_for_equal_trees() {
    let build = || AllOf::<u32>::node([Constant::node(1u32), Constant::node(2)]).tree_hash();
    assert_eq!(build(), build());
}

// =============================================================================
// Tracer
// =============================================================================

#[derive(Clone, Default)]
struct RecordingTracer {
    events: Arc<Mutex<Vec<String>>>,
}

impl Tracer for RecordingTracer {
    fn new_span_id(&self) -> SpanId {
        SpanId(0)
    }

    fn on_cache_write(&self, _span_id: SpanId, node: TracerNodeKey) {
        self.events.lock().unwrap().push(format!("write {}", node.key_debug));
    }

    fn on_compute_end(&self, _span_id: SpanId, node: TracerNodeKey, result: ExecutionResult) {
        self.events
            .lock()
            .unwrap()
            .push(format!("end {} {:?}", node.key_debug, result));
    }
}

#[test]
fn test_tracer_sees_writes_and_hits() {
    let tracer = RecordingTracer::default();
    let cache = Cache::new(Configuration::builder().tracer(tracer.clone()).build());
    let node = Constant::node(8u8);

    node.compute_in(&cache);
    node.compute_in(&cache);
    // The end event of the first request may trail its resolution.
    thread::sleep(Duration::from_millis(50));

    let mut events = tracer.events.lock().unwrap().clone();
    events.sort();
    assert_eq!(
        events,
        vec![
            "end Constant(8) CacheHit".to_string(),
            "end Constant(8) Computed".to_string(),
            "write Constant(8)".to_string(),
        ]
    );
}
