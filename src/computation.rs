//! The `Computation` trait and the knobs controlling how a request runs.

use std::cell::Cell;
use std::fmt::Debug;
use std::hash::Hash;

use crate::dependency::{Declarer, Value, Values};
use crate::outcome::{merge_all, Outcome};
use crate::progress::Progress;

/// The behaviour of a computation node.
///
/// A computation is a value describing one deterministic unit of work. Its
/// fields are the discriminating part of the node's identity: two nodes with
/// equal behaviours and equal children are the same computation and share a
/// cached result. Its inputs are the node's children, one per dependency slot
/// declared in [`declare`](Self::declare).
///
/// # Example
///
/// ```
/// use compute_flow::{Computation, Constant, Declarer, Node, Outcome, Progress, Values};
///
/// #[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// struct Scale { factor: i64 }
///
/// impl Computation for Scale {
///     type Output = i64;
///
///     fn declare(decl: &mut Declarer<'_>) {
///         decl.dependency::<i64>("input");
///     }
///
///     fn compute(&self, values: &Values, _progress: &Progress) -> Outcome<i64> {
///         Outcome::ok(*values.value::<i64>(0) * self.factor)
///     }
/// }
///
/// let node = Node::new(Scale { factor: 3 }, vec![Constant::node(7i64).into()]);
/// assert_eq!(node.compute().value().map(|v| **v), Some(21));
/// ```
pub trait Computation: Hash + Eq + Debug + Clone + Send + Sync + 'static {
    /// The value produced on success.
    type Output: Send + Sync + 'static;

    /// Declare the dependency slots of this kind. Runs once per registry.
    fn declare(decl: &mut Declarer<'_>) {
        let _ = decl;
    }

    /// The node's own logic, given the merged values of its children.
    ///
    /// Long-running logic should report through `progress` and poll
    /// [`Progress::check_cancelled`].
    fn compute(&self, values: &Values, progress: &Progress) -> Outcome<Self::Output>;

    /// Combine the children's outcomes (in slot order) into the values passed
    /// to [`compute`](Self::compute).
    ///
    /// The default is conjunctive: absent if any child is absent. Every
    /// child's diagnostics are kept either way.
    fn merge_results(&self, results: Vec<Outcome<Value>>) -> Outcome<Values> {
        merge_all(results).map(Values::present)
    }

    /// Accept any number of children instead of the declared slots.
    fn is_variadic(&self) -> bool {
        false
    }

    /// Whether this node takes part in caching.
    fn cache_mode(&self) -> CacheMode {
        CacheMode::Policy
    }
}

/// Per-node caching participation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Looked up and written as the cache policy decides.
    #[default]
    Policy,
    /// Never looked up nor written.
    Bypass,
}

/// Which cache operations a request performs, applied to the whole subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputeMode {
    /// Serve cached results.
    pub lookup: bool,
    /// Store results (subject to the policy).
    pub write: bool,
}

impl ComputeMode {
    pub const CACHED: ComputeMode = ComputeMode {
        lookup: true,
        write: true,
    };
    pub const READ_ONLY: ComputeMode = ComputeMode {
        lookup: true,
        write: false,
    };
    pub const REFRESH: ComputeMode = ComputeMode {
        lookup: false,
        write: true,
    };
    pub const UNCACHED: ComputeMode = ComputeMode {
        lookup: false,
        write: false,
    };
}

impl Default for ComputeMode {
    fn default() -> Self {
        ComputeMode::CACHED
    }
}

thread_local! {
    static NESTING: Cell<usize> = const { Cell::new(0) };
}

/// Where a request was issued from.
///
/// `depth` is zero for requests made by client code and one more than the
/// enclosing node's depth for requests made from inside a
/// [`Computation::compute`] body. Children requested by the engine share their
/// parent's depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionContext {
    depth: usize,
}

impl ExecutionContext {
    /// The context of a request made by client code.
    pub fn top_level() -> Self {
        Self { depth: 0 }
    }

    /// A context at the given nesting depth.
    pub fn at_depth(depth: usize) -> Self {
        Self { depth }
    }

    /// The context of a request made on the current thread.
    pub fn current() -> Self {
        Self {
            depth: NESTING.with(Cell::get),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns `true` unless issued from inside another node's logic.
    pub fn is_top_level(&self) -> bool {
        self.depth == 0
    }

    /// Run `f` (a node's logic) so that requests it issues are nested one level deeper.
    pub(crate) fn enter<R>(self, f: impl FnOnce() -> R) -> R {
        struct Restore(usize);

        impl Drop for Restore {
            fn drop(&mut self) {
                NESTING.with(|n| n.set(self.0));
            }
        }

        let _restore = Restore(NESTING.with(|n| n.replace(self.depth + 1)));
        f()
    }
}
