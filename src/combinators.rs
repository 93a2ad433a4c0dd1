//! Built-in node kinds.
//!
//! Closure-based kinds ([`Supplier`], [`Map`], [`FlatMap`]) are identified by
//! a caller-supplied [`ComputationId`], since closures cannot be compared.
//! Their `uncached` constructors assign a fresh identifier and bypass the
//! cache entirely, so they can never collide.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::computation::{CacheMode, Computation};
use crate::dependency::{Declarer, Value, Values};
use crate::key::ComputationId;
use crate::node::{AnyNode, Node};
use crate::outcome::Outcome;
use crate::progress::Progress;

static ANONYMOUS: AtomicU64 = AtomicU64::new(0);

fn anonymous_id(scope: &'static str) -> ComputationId {
    ComputationId::new(
        scope,
        format!("anonymous#{}", ANONYMOUS.fetch_add(1, Ordering::Relaxed)),
    )
}

fn cache_mode(bypass: bool) -> CacheMode {
    if bypass {
        CacheMode::Bypass
    } else {
        CacheMode::Policy
    }
}

fn assert_output<T: Any>(child: &AnyNode, what: &str) {
    assert!(
        child.output_type_id() == TypeId::of::<T>(),
        "{} expects nodes producing {}, got one producing {}",
        what,
        std::any::type_name::<T>(),
        child.output_type_name()
    );
}

// Kinds without fields: every instance is equal, identity is the type alone.
macro_rules! marker_impls {
    ($name:ident<$($param:ident),+>) => {
        impl<$($param),+> Clone for $name<$($param),+> {
            fn clone(&self) -> Self {
                Self(PhantomData)
            }
        }

        impl<$($param),+> Default for $name<$($param),+> {
            fn default() -> Self {
                Self(PhantomData)
            }
        }

        impl<$($param),+> PartialEq for $name<$($param),+> {
            fn eq(&self, _other: &Self) -> bool {
                true
            }
        }

        impl<$($param),+> Eq for $name<$($param),+> {}

        impl<$($param),+> Hash for $name<$($param),+> {
            fn hash<H: Hasher>(&self, _state: &mut H) {}
        }

        impl<$($param),+> fmt::Debug for $name<$($param),+> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(stringify!($name))
            }
        }
    };
}

// ============================================================================
// Constant
// ============================================================================

/// Leaf producing a fixed value. The value is part of the node's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constant<T>(pub T);

impl<T> Constant<T>
where
    T: Hash + Eq + fmt::Debug + Clone + Send + Sync + 'static,
{
    pub fn node(value: T) -> Node<Constant<T>> {
        Node::leaf(Constant(value))
    }
}

impl<T> Computation for Constant<T>
where
    T: Hash + Eq + fmt::Debug + Clone + Send + Sync + 'static,
{
    type Output = T;

    fn compute(&self, _values: &Values, _progress: &Progress) -> Outcome<T> {
        Outcome::ok(self.0.clone())
    }
}

// ============================================================================
// Supplier
// ============================================================================

type SupplierFn<T> = Arc<dyn Fn(&Progress) -> Outcome<T> + Send + Sync>;

/// Leaf producing its value from a closure.
pub struct Supplier<T> {
    id: ComputationId,
    supply: SupplierFn<T>,
    bypass: bool,
}

impl<T: Send + Sync + 'static> Supplier<T> {
    /// A supplier identified by `id`.
    pub fn new(id: ComputationId, supply: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::with_result(id, move |_| Outcome::ok(supply()))
    }

    /// A supplier whose closure may fail and report progress.
    pub fn with_result(
        id: ComputationId,
        supply: impl Fn(&Progress) -> Outcome<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            supply: Arc::new(supply),
            bypass: false,
        }
    }

    /// A supplier that is never cached.
    pub fn uncached(supply: impl Fn(&Progress) -> Outcome<T> + Send + Sync + 'static) -> Self {
        Self {
            id: anonymous_id("Supplier"),
            supply: Arc::new(supply),
            bypass: true,
        }
    }

    /// Shorthand for `Node::leaf(Supplier::new(id, supply))`.
    pub fn node(
        id: ComputationId,
        supply: impl Fn() -> T + Send + Sync + 'static,
    ) -> Node<Supplier<T>> {
        Node::leaf(Self::new(id, supply))
    }

    pub fn id(&self) -> &ComputationId {
        &self.id
    }
}

impl<T> Clone for Supplier<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            supply: self.supply.clone(),
            bypass: self.bypass,
        }
    }
}

impl<T> PartialEq for Supplier<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Supplier<T> {}

impl<T> Hash for Supplier<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Supplier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Supplier({})", self.id)
    }
}

impl<T: Send + Sync + 'static> Computation for Supplier<T> {
    type Output = T;

    fn compute(&self, _values: &Values, progress: &Progress) -> Outcome<T> {
        (self.supply)(progress)
    }

    fn cache_mode(&self) -> CacheMode {
        cache_mode(self.bypass)
    }
}

// ============================================================================
// AllOf
// ============================================================================

/// All values of any number of children producing `T`, in child order.
///
/// Absent as soon as one child is absent; every child's diagnostics are kept.
pub struct AllOf<T>(PhantomData<fn() -> T>);

marker_impls!(AllOf<T>);

impl<T: Send + Sync + 'static> AllOf<T> {
    /// # Panics
    ///
    /// If a child does not produce a `T`.
    pub fn node<I>(children: I) -> Node<AllOf<T>>
    where
        I: IntoIterator,
        I::Item: Into<AnyNode>,
    {
        let children: Vec<AnyNode> = children.into_iter().map(Into::into).collect();
        for child in &children {
            assert_output::<T>(child, "AllOf");
        }
        Node::new(AllOf::default(), children)
    }
}

impl<T: Send + Sync + 'static> Computation for AllOf<T> {
    type Output = Vec<Arc<T>>;

    fn compute(&self, values: &Values, _progress: &Progress) -> Outcome<Vec<Arc<T>>> {
        Outcome::ok((0..values.len()).map(|i| values.value::<T>(i)).collect())
    }

    fn is_variadic(&self) -> bool {
        true
    }
}

// ============================================================================
// Pair
// ============================================================================

/// Both values of two children, each keeping its type.
pub struct Pair<A, B>(PhantomData<fn() -> (A, B)>);

marker_impls!(Pair<A, B>);

impl<A: Send + Sync + 'static, B: Send + Sync + 'static> Pair<A, B> {
    pub fn node(left: impl Into<AnyNode>, right: impl Into<AnyNode>) -> Node<Pair<A, B>> {
        Node::new(Pair::default(), vec![left.into(), right.into()])
    }
}

impl<A: Send + Sync + 'static, B: Send + Sync + 'static> Computation for Pair<A, B> {
    type Output = (Arc<A>, Arc<B>);

    fn declare(decl: &mut Declarer<'_>) {
        decl.dependency::<A>("left");
        decl.dependency::<B>("right");
    }

    fn compute(&self, values: &Values, _progress: &Progress) -> Outcome<(Arc<A>, Arc<B>)> {
        Outcome::ok((values.value::<A>(0), values.value::<B>(1)))
    }
}

// ============================================================================
// Map / FlatMap
// ============================================================================

type MapFn<I, O> = Arc<dyn Fn(&I) -> O + Send + Sync>;

/// Applies a function to the value of its single child.
pub struct Map<I, O> {
    id: ComputationId,
    map: MapFn<I, O>,
    bypass: bool,
}

impl<I: Send + Sync + 'static, O: Send + Sync + 'static> Map<I, O> {
    pub fn new(id: ComputationId, map: impl Fn(&I) -> O + Send + Sync + 'static) -> Self {
        Self {
            id,
            map: Arc::new(map),
            bypass: false,
        }
    }

    /// A mapping that is never cached.
    pub fn uncached(map: impl Fn(&I) -> O + Send + Sync + 'static) -> Self {
        Self {
            id: anonymous_id("Map"),
            map: Arc::new(map),
            bypass: true,
        }
    }

    /// Shorthand for `Node::new(Map::new(id, map), vec![input])`.
    pub fn node(
        id: ComputationId,
        input: impl Into<AnyNode>,
        map: impl Fn(&I) -> O + Send + Sync + 'static,
    ) -> Node<Map<I, O>> {
        Node::new(Self::new(id, map), vec![input.into()])
    }

    pub fn id(&self) -> &ComputationId {
        &self.id
    }
}

type FlatMapFn<I, O> = Arc<dyn Fn(&I, &Progress) -> Outcome<O> + Send + Sync>;

/// Applies a fallible function to the value of its single child.
pub struct FlatMap<I, O> {
    id: ComputationId,
    map: FlatMapFn<I, O>,
    bypass: bool,
}

impl<I: Send + Sync + 'static, O: Send + Sync + 'static> FlatMap<I, O> {
    pub fn new(
        id: ComputationId,
        map: impl Fn(&I, &Progress) -> Outcome<O> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            map: Arc::new(map),
            bypass: false,
        }
    }

    /// A mapping that is never cached.
    pub fn uncached(map: impl Fn(&I, &Progress) -> Outcome<O> + Send + Sync + 'static) -> Self {
        Self {
            id: anonymous_id("FlatMap"),
            map: Arc::new(map),
            bypass: true,
        }
    }

    /// Shorthand for `Node::new(FlatMap::new(id, map), vec![input])`.
    pub fn node(
        id: ComputationId,
        input: impl Into<AnyNode>,
        map: impl Fn(&I, &Progress) -> Outcome<O> + Send + Sync + 'static,
    ) -> Node<FlatMap<I, O>> {
        Node::new(Self::new(id, map), vec![input.into()])
    }

    pub fn id(&self) -> &ComputationId {
        &self.id
    }
}

macro_rules! function_impls {
    ($name:ident) => {
        impl<I, O> Clone for $name<I, O> {
            fn clone(&self) -> Self {
                Self {
                    id: self.id.clone(),
                    map: self.map.clone(),
                    bypass: self.bypass,
                }
            }
        }

        impl<I, O> PartialEq for $name<I, O> {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl<I, O> Eq for $name<I, O> {}

        impl<I, O> Hash for $name<I, O> {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }

        impl<I, O> fmt::Debug for $name<I, O> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.id)
            }
        }
    };
}

function_impls!(Map);
function_impls!(FlatMap);

impl<I: Send + Sync + 'static, O: Send + Sync + 'static> Computation for Map<I, O> {
    type Output = O;

    fn declare(decl: &mut Declarer<'_>) {
        decl.dependency::<I>("input");
    }

    fn compute(&self, values: &Values, _progress: &Progress) -> Outcome<O> {
        Outcome::ok((self.map)(&values.value::<I>(0)))
    }

    fn cache_mode(&self) -> CacheMode {
        cache_mode(self.bypass)
    }
}

impl<I: Send + Sync + 'static, O: Send + Sync + 'static> Computation for FlatMap<I, O> {
    type Output = O;

    fn declare(decl: &mut Declarer<'_>) {
        decl.dependency::<I>("input");
    }

    fn compute(&self, values: &Values, progress: &Progress) -> Outcome<O> {
        (self.map)(&values.value::<I>(0), progress)
    }

    fn cache_mode(&self) -> CacheMode {
        cache_mode(self.bypass)
    }
}

// ============================================================================
// Presence
// ============================================================================

/// Whether its single child produced a value.
///
/// A failed child is tolerated: it is read as null instead of failing this
/// node, and its diagnostics are carried over.
pub struct Presence<T>(PhantomData<fn() -> T>);

marker_impls!(Presence<T>);

impl<T: Send + Sync + 'static> Presence<T> {
    pub fn node(input: impl Into<AnyNode>) -> Node<Presence<T>> {
        Node::new(Presence::default(), vec![input.into()])
    }
}

impl<T: Send + Sync + 'static> Computation for Presence<T> {
    type Output = bool;

    fn declare(decl: &mut Declarer<'_>) {
        decl.dependency::<T>("input");
    }

    fn merge_results(&self, results: Vec<Outcome<Value>>) -> Outcome<Values> {
        let mut diagnostics = Vec::new();
        let values = results
            .into_iter()
            .map(|outcome| {
                let (value, mut diags) = outcome.into_parts();
                diagnostics.append(&mut diags);
                value
            })
            .collect();
        Outcome::new(Some(Values::new(values)), diagnostics)
    }

    fn compute(&self, values: &Values, _progress: &Progress) -> Outcome<bool> {
        Outcome::ok(values.is_present(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, Configuration};
    use crate::outcome::Diagnostic;

    fn cache() -> Cache {
        Cache::new(Configuration::default())
    }

    fn failing() -> Node<Supplier<u32>> {
        Node::leaf(Supplier::with_result(
            ComputationId::new(module_path!(), "failing"),
            |_| Outcome::error(anyhow::anyhow!("no value")),
        ))
    }

    #[test]
    fn test_constant_identity_includes_value() {
        assert_eq!(Constant::node(1u32), Constant::node(1u32));
        assert_ne!(Constant::node(1u32), Constant::node(2u32));
        assert_ne!(Constant::node(1u32).to_any(), Constant::node(1u64).to_any());
    }

    #[test]
    fn test_all_of_keeps_order() {
        let node = AllOf::<u32>::node([Constant::node(3u32), Constant::node(1), Constant::node(2)]);
        let values: Vec<u32> = node
            .compute_in(&cache())
            .into_value()
            .unwrap()
            .iter()
            .map(|v| **v)
            .collect();
        assert_eq!(values, vec![3, 1, 2]);
    }

    #[test]
    fn test_all_of_fails_with_child_diagnostic() {
        let ok: AnyNode = Constant::node(1u32).into();
        let node = AllOf::<u32>::node([ok, failing().into()]);
        let outcome = node.compute_in(&cache());
        assert!(!outcome.is_present());
        let rendered: Vec<String> = outcome.diagnostics().iter().map(Diagnostic::to_string).collect();
        assert_eq!(rendered, vec!["error: no value"]);
    }

    #[test]
    #[should_panic(expected = "AllOf expects nodes producing u32")]
    fn test_all_of_rejects_mixed_types() {
        let text: AnyNode = Constant::node("x".to_string()).into();
        AllOf::<u32>::node([text]);
    }

    #[test]
    fn test_pair_keeps_types() {
        let node = Pair::<u32, String>::node(Constant::node(7u32), Constant::node("seven".to_string()));
        let pair = node.compute_in(&cache()).into_value().unwrap();
        assert_eq!(*pair.0, 7);
        assert_eq!(pair.1.as_str(), "seven");
    }

    #[test]
    fn test_map_and_flat_map() {
        let input = Constant::node(20u32);
        let doubled = Map::node(ComputationId::new(module_path!(), "double"), &input, |v: &u32| v * 2);
        let checked = FlatMap::node(
            ComputationId::new(module_path!(), "checked"),
            &doubled,
            |v: &u32, _: &Progress| {
                if *v > 100 {
                    Outcome::error(anyhow::anyhow!("too large"))
                } else {
                    Outcome::ok(v.to_string())
                }
            },
        );
        let outcome = checked.compute_in(&cache());
        assert_eq!(outcome.value().map(|s| s.as_str()), Some("40"));
    }

    #[test]
    fn test_presence_tolerates_failure() {
        let cache = cache();
        let missing = Presence::<u32>::node(failing()).compute_in(&cache);
        assert_eq!(missing.value().map(|b| **b), Some(false));
        assert_eq!(missing.errors().count(), 1);

        let present = Presence::<u32>::node(Constant::node(1u32)).compute_in(&cache);
        assert_eq!(present.value().map(|b| **b), Some(true));
    }

    #[test]
    fn test_function_identity_is_the_id() {
        let id = ComputationId::new(module_path!(), "same");
        let a = Map::<u32, u32>::new(id.clone(), |v| v + 1);
        let b = Map::<u32, u32>::new(id, |v| v + 2);
        assert_eq!(a, b);

        let c = Map::<u32, u32>::uncached(|v| v + 1);
        let d = Map::<u32, u32>::uncached(|v| v + 1);
        assert_ne!(c, d);
        assert_eq!(c.cache_mode(), CacheMode::Bypass);
    }

    #[test]
    fn test_uncached_supplier_bypasses_cache() {
        let cache = cache();
        let node = Node::leaf(Supplier::uncached(|_| Outcome::ok(5u32)));
        assert_eq!(node.compute_in(&cache).value().map(|v| **v), Some(5));
        assert!(!cache.has(&node));
        assert!(cache.is_empty());
    }
}
