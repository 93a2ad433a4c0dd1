//! Cache policies: which computed nodes get stored.

use std::fmt::Debug;

use crate::computation::ExecutionContext;
use crate::node::AnyNode;

/// Decides whether a node's future is written to the cache.
///
/// Consulted once per request, before the node runs.
pub trait CachePolicy: Debug + Send + Sync + 'static {
    fn should_cache(&self, node: &AnyNode, ctx: &ExecutionContext) -> bool;
}

/// Never cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheNone;

impl CachePolicy for CacheNone {
    fn should_cache(&self, _node: &AnyNode, _ctx: &ExecutionContext) -> bool {
        false
    }
}

/// Cache every node, including requests issued from inside another node's logic.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheAll;

impl CachePolicy for CacheAll {
    fn should_cache(&self, _node: &AnyNode, _ctx: &ExecutionContext) -> bool {
        true
    }
}

/// Cache only requests not issued from inside another node's logic.
///
/// A tree requested by client code is cached throughout; transient trees a
/// node builds and computes within its own `compute` are not.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheTopLevel;

impl CachePolicy for CacheTopLevel {
    fn should_cache(&self, _node: &AnyNode, ctx: &ExecutionContext) -> bool {
        ctx.is_top_level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::Constant;

    #[test]
    fn test_builtin_policies() {
        let node: AnyNode = Constant::node(1u8).into();
        let top = ExecutionContext::top_level();
        let nested = ExecutionContext::at_depth(1);

        assert!(!CacheNone.should_cache(&node, &top));
        assert!(CacheAll.should_cache(&node, &nested));
        assert!(CacheTopLevel.should_cache(&node, &top));
        assert!(!CacheTopLevel.should_cache(&node, &nested));
    }
}
