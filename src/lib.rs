//! Compute-Flow: a deterministic computation graph engine.
//!
//! Computations are described as trees of [`Node`]s. A node pairs a
//! behaviour (a type implementing [`Computation`]) with its children, which
//! are exactly its dependencies. Computing a node computes its children,
//! merges their outcomes, runs the node's own logic and memoizes the shared
//! [`FutureResult`] in a [`Cache`] keyed by the node's structure.
//!
//! # Key Features
//!
//! - **Structural caching**: equal trees share one cached result, and
//!   concurrent requests for the same node run it at most once
//! - **Soft failures**: an [`Outcome`] carries every diagnostic collected in
//!   the subtree, whether or not a value was produced
//! - **Cooperative cancellation**: [`FutureResult::cancel`] and
//!   [`FutureResult::cancel_after`] signal running logic through its [`Progress`]
//! - **Pluggable policies**: [`CacheNone`], [`CacheAll`], [`CacheTopLevel`] or
//!   any [`CachePolicy`]
//! - **Deterministic enumeration**: [`Cache::cached_computations`] is ordered
//!   by a run-independent tree hash
//!
//! # Example
//!
//! ```
//! use compute_flow::{AllOf, Cache, ComputationId, Configuration, Constant, Map};
//!
//! let cache = Cache::new(Configuration::default());
//! let numbers = AllOf::<u64>::node([Constant::node(1u64), Constant::node(2), Constant::node(3)]);
//! let total = Map::node(
//!     ComputationId::new(module_path!(), "sum"),
//!     &numbers,
//!     |values: &Vec<std::sync::Arc<u64>>| values.iter().map(|v| **v).sum::<u64>(),
//! );
//!
//! let outcome = total.compute_in(&cache);
//! assert_eq!(outcome.value().map(|v| **v), Some(6));
//!
//! // Computing an equal tree is a cache hit.
//! total.compute_in(&cache);
//! assert_eq!(cache.hit_count(&total), 1);
//! ```

mod cache;
pub mod combinators;
mod computation;
mod dependency;
mod engine;
mod error;
mod executor;
mod future;
mod key;
mod node;
mod outcome;
pub mod policy;
mod progress;
pub mod tracer;
mod tree;

pub use cache::{Cache, CacheStats, Configuration, ConfigurationBuilder};
pub use combinators::{AllOf, Constant, FlatMap, Map, Pair, Presence, Supplier};
pub use computation::{CacheMode, Computation, ComputeMode, ExecutionContext};
pub use dependency::{
    Declarer, Dependency, DependencyList, DependencyRegistry, DependencySlot, Value, Values,
};
pub use error::{ComputeError, ExecutorError};
pub use executor::{Executor, ExecutorConfig};
pub use future::{ExecutionPhase, FutureResult};
pub use key::{ComputationId, DynEq, NodeKey};
pub use node::{AnyNode, Node, NodeBuilder};
pub use outcome::{merge_all, Diagnostic, Outcome};
pub use policy::{CacheAll, CacheNone, CachePolicy, CacheTopLevel};
pub use progress::{CancellationToken, Progress, UNKNOWN_TOTAL};
pub use tracer::{ExecutionResult, NoopTracer, SpanId, Tracer, TracerNodeKey};
pub use tree::{combine_hashes, TreeNode};
