//! Object-safe identity for node behaviours.

use std::any::Any;
use std::fmt::Debug;
use std::hash::{BuildHasher, Hash, Hasher};

use dyn_hash::DynHash;

/// Object-safe equality comparison.
///
/// This trait enables comparing two trait objects for equality
/// by downcasting and comparing the concrete types.
pub trait DynEq: Any {
    /// Returns `true` if `other` is the same concrete type and equal to `self`.
    fn dyn_eq(&self, other: &dyn Any) -> bool;
}

impl<T: Eq + 'static> DynEq for T {
    fn dyn_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().is_some_and(|o| self == o)
    }
}

/// The discriminating fields of a computation.
///
/// Automatically implemented for every `Hash + Eq + Debug + Send + Sync + 'static`
/// type. Two behaviours of the same concrete type that compare equal denote
/// the same computation (given equal children) and share cached results.
pub trait NodeKey: DynHash + DynEq + Debug + Send + Sync {
    /// Get the key as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Get the type name for this key.
    fn type_name(&self) -> &'static str;
}

impl<T: Hash + Eq + Debug + Send + Sync + 'static> NodeKey for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

dyn_hash::hash_trait_object!(NodeKey);

// Fixed seeds keep structural hashes identical across runs, which the cache
// relies on for deterministic enumeration.
const SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// A hasher with fixed seeds.
pub(crate) fn stable_hasher() -> impl Hasher {
    ahash::RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3]).build_hasher()
}

/// Node-wise hash of a behaviour: kind name plus discriminating fields.
///
/// The kind name is used instead of `TypeId` because the latter is not stable
/// between builds.
pub(crate) fn node_hash(key: &dyn NodeKey) -> u64 {
    let mut hasher = stable_hasher();
    key.type_name().hash(&mut hasher);
    key.hash(&mut hasher);
    hasher.finish()
}

/// Identifier supplied by callers for computations wrapping a closure.
///
/// Closures cannot be compared, so the identifier stands in for the function
/// in the node's identity. Two closures sharing an identifier are treated as
/// the same function; keep identifiers unique per call site, e.g.
/// `ComputationId::new(module_path!(), "parse_header")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComputationId {
    scope: &'static str,
    name: String,
}

impl ComputationId {
    /// Create an identifier from a scope (module or type path) and a name.
    pub fn new(scope: &'static str, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }

    /// The scope part.
    pub fn scope(&self) -> &'static str {
        self.scope
    }

    /// The name part.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ComputationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.scope, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Hash, PartialEq, Eq)]
    struct A(u32);

    #[derive(Debug, Hash, PartialEq, Eq)]
    struct B(u32);

    #[test]
    fn test_dyn_eq_requires_same_type() {
        let a1: &dyn NodeKey = &A(1);
        let a2: &dyn NodeKey = &A(1);
        let b1: &dyn NodeKey = &B(1);
        assert!(a1.dyn_eq(a2.as_any()));
        assert!(!a1.dyn_eq(b1.as_any()));
    }

    #[test]
    fn test_node_hash_is_stable_and_type_sensitive() {
        assert_eq!(node_hash(&A(3)), node_hash(&A(3)));
        assert_ne!(node_hash(&A(3)), node_hash(&B(3)));
    }

    #[test]
    fn test_computation_id_display() {
        let id = ComputationId::new("parser", "header");
        assert_eq!(id.to_string(), "parser::header");
    }
}
