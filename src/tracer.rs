//! Tracer trait for observing node execution and cache traffic.
//!
//! The default [`NoopTracer`] discards every event. Install a custom tracer
//! through [`Configuration::builder`](crate::Configuration::builder).
//!
//! # Example
//!
//! ```
//! use compute_flow::{Cache, Configuration, SpanId, Tracer, TracerNodeKey};
//!
//! struct PrintTracer;
//!
//! impl Tracer for PrintTracer {
//!     fn new_span_id(&self) -> SpanId {
//!         SpanId(1)
//!     }
//!
//!     fn on_compute_start(&self, _span_id: SpanId, node: TracerNodeKey) {
//!         println!("computing {}", node.kind);
//!     }
//! }
//!
//! let cache = Cache::new(Configuration::builder().tracer(PrintTracer).build());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crate::node::AnyNode;

/// Unique identifier for a node execution span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub u64);

/// A node in a type-erased, printable form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TracerNodeKey {
    /// The behaviour's kind name (e.g. "analysis::Parse")
    pub kind: &'static str,
    /// Debug representation of the behaviour's fields
    pub key_debug: String,
}

impl TracerNodeKey {
    /// Create a new tracer node key.
    #[inline]
    pub fn new(kind: &'static str, key_debug: impl Into<String>) -> Self {
        Self {
            kind,
            key_debug: key_debug.into(),
        }
    }

    pub(crate) fn of(node: &AnyNode) -> Self {
        Self::new(node.kind(), format!("{:?}", node.key()))
    }
}

/// How a node request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// The node's logic ran and produced a value.
    Computed,
    /// The node's logic ran (or was skipped after a failed merge) without a value.
    Failed { message: String },
    /// The node was cancelled before or while running.
    Cancelled,
    /// A cached future was returned without execution.
    CacheHit,
}

/// Tracer trait for observing execution.
///
/// All methods but [`new_span_id`](Self::new_span_id) have empty defaults, so
/// only the events of interest need overriding.
///
/// # Thread Safety
///
/// Events arrive from the executor's threads concurrently.
pub trait Tracer: Send + Sync + 'static {
    /// Generate a new unique span ID. Called once per node request.
    fn new_span_id(&self) -> SpanId;

    /// Called before a node's children are requested.
    #[inline]
    fn on_compute_start(&self, _span_id: SpanId, _node: TracerNodeKey) {}

    /// Called after a cache lookup, with whether it hit.
    #[inline]
    fn on_cache_check(&self, _span_id: SpanId, _node: TracerNodeKey, _hit: bool) {}

    /// Called when a node's future was stored in the cache.
    #[inline]
    fn on_cache_write(&self, _span_id: SpanId, _node: TracerNodeKey) {}

    /// Called when a cached entry is evicted because it was cancelled or panicked.
    #[inline]
    fn on_cache_evict(&self, _node: TracerNodeKey) {}

    /// Called when the request's future resolves.
    #[inline]
    fn on_compute_end(&self, _span_id: SpanId, _node: TracerNodeKey, _result: ExecutionResult) {}
}

/// Tracer that discards all events.
///
/// This is the default tracer of a [`Configuration`](crate::Configuration).
pub struct NoopTracer;

static NOOP_SPAN_COUNTER: AtomicU64 = AtomicU64::new(1);

impl Tracer for NoopTracer {
    #[inline(always)]
    fn new_span_id(&self) -> SpanId {
        SpanId(NOOP_SPAN_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}
