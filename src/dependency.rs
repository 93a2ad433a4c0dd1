//! Typed dependency slots and the registry mapping computation kinds to them.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::computation::Computation;
use crate::node::AnyNode;

/// A resolved child value, type-erased.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Resolved child values, positionally matching a node's dependency slots.
///
/// `None` marks a null value, e.g. a failed child tolerated by a custom
/// [`merge_results`](crate::Computation::merge_results).
#[derive(Clone, Default)]
pub struct Values(Vec<Option<Value>>);

impl Values {
    pub fn new(values: Vec<Option<Value>>) -> Self {
        Self(values)
    }

    /// Values that are all present, in order.
    pub fn present(values: Vec<Value>) -> Self {
        Self(values.into_iter().map(Some).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The value at `index`, or `None` if null.
    ///
    /// # Panics
    ///
    /// If `index` is out of range or the value is not a `U`.
    pub fn get<U: Any + Send + Sync>(&self, index: usize) -> Option<Arc<U>> {
        let slot = self.0.get(index).unwrap_or_else(|| {
            panic!(
                "dependency index {} out of range for {} values",
                index,
                self.0.len()
            )
        });
        slot.as_ref().map(|value| {
            value.clone().downcast::<U>().unwrap_or_else(|_| {
                panic!(
                    "dependency value at index {} is not a {}",
                    index,
                    std::any::type_name::<U>()
                )
            })
        })
    }

    /// The value at `index`.
    ///
    /// # Panics
    ///
    /// Like [`get`](Self::get), and also if the value is null.
    pub fn value<U: Any + Send + Sync>(&self, index: usize) -> Arc<U> {
        self.get(index)
            .unwrap_or_else(|| panic!("dependency value at index {} is null", index))
    }

    /// Returns `true` if the value at `index` is present.
    pub fn is_present(&self, index: usize) -> bool {
        self.0.get(index).is_some_and(Option::is_some)
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&Value>> + '_ {
        self.0.iter().map(Option::as_ref)
    }
}

impl fmt::Debug for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.0
                    .iter()
                    .map(|v| if v.is_some() { "<value>" } else { "<null>" }),
            )
            .finish()
    }
}

/// Typed handle to one dependency slot of a computation kind.
///
/// Reads its value out of the untyped [`Values`] by index.
pub struct Dependency<U> {
    index: usize,
    name: &'static str,
    _marker: PhantomData<fn() -> U>,
}

impl<U> Clone for Dependency<U> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<U> Copy for Dependency<U> {}

impl<U> fmt::Debug for Dependency<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("type", &std::any::type_name::<U>())
            .finish()
    }
}

impl<U: Any + Send + Sync> Dependency<U> {
    fn new(index: usize, name: &'static str) -> Self {
        Self {
            index,
            name,
            _marker: PhantomData,
        }
    }

    /// Position of this slot in the kind's list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The slot's value, or `None` if null. Panics on a wrong-typed value.
    pub fn get(&self, values: &Values) -> Option<Arc<U>> {
        values.get(self.index)
    }

    /// The slot's value. Panics on a null or wrong-typed value.
    pub fn value(&self, values: &Values) -> Arc<U> {
        values.value(self.index)
    }
}

/// Description of one dependency slot.
#[derive(Clone)]
pub struct DependencySlot {
    index: usize,
    name: &'static str,
    type_id: TypeId,
    type_name: &'static str,
    default: Option<AnyNode>,
}

impl DependencySlot {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// `TypeId` of the value type the slot expects.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The computation used when the slot is left unbound.
    pub fn default(&self) -> Option<&AnyNode> {
        self.default.as_ref()
    }

    fn typed<U: Any + Send + Sync>(&self, kind: &'static str) -> Dependency<U> {
        assert!(
            self.type_id == TypeId::of::<U>(),
            "dependency `{}` of {} has type {}, not {}",
            self.name,
            kind,
            self.type_name,
            std::any::type_name::<U>()
        );
        Dependency::new(self.index, self.name)
    }
}

impl fmt::Debug for DependencySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencySlot")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("type", &self.type_name)
            .field("optional", &self.default.is_some())
            .finish()
    }
}

/// The ordered dependency slots of one computation kind.
#[derive(Debug, Clone)]
pub struct DependencyList {
    kind: &'static str,
    slots: Vec<DependencySlot>,
}

impl DependencyList {
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DependencySlot> {
        self.slots.get(index)
    }

    /// Find a slot by name.
    pub fn find(&self, name: &str) -> Option<&DependencySlot> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DependencySlot> {
        self.slots.iter()
    }

    fn push<U: Any + Send + Sync>(
        &mut self,
        name: &'static str,
        default: Option<AnyNode>,
    ) -> Dependency<U> {
        if let Some(existing) = self.find(name) {
            return existing.typed::<U>(self.kind);
        }
        let index = self.slots.len();
        self.slots.push(DependencySlot {
            index,
            name,
            type_id: TypeId::of::<U>(),
            type_name: std::any::type_name::<U>(),
            default,
        });
        Dependency::new(index, name)
    }
}

/// Collects the dependency slots of a computation kind while it is declared.
///
/// Passed to [`Computation::declare`]. Slots get consecutive indices in
/// declaration order, after any inherited slots.
pub struct Declarer<'a> {
    registry: &'a DependencyRegistry,
    list: DependencyList,
}

impl Declarer<'_> {
    /// Start from a copy of `P`'s slots. Must come before any own slot.
    ///
    /// # Panics
    ///
    /// If slots were already declared.
    pub fn inherit<P: Computation>(&mut self) -> &mut Self {
        assert!(
            self.list.is_empty(),
            "{} must inherit before declaring its own dependencies",
            self.list.kind
        );
        let parent = self.registry.dependencies::<P>();
        self.list.slots = parent.slots.clone();
        self
    }

    /// Declare a required slot. Declaring an existing name again returns the
    /// same handle.
    ///
    /// # Panics
    ///
    /// If the name was already declared with another type.
    pub fn dependency<U: Any + Send + Sync>(&mut self, name: &'static str) -> Dependency<U> {
        self.list.push(name, None)
    }

    /// Declare a slot with a default computation, used when a node is built
    /// without binding it.
    ///
    /// # Panics
    ///
    /// If `default` does not produce a `U`, or the name was already declared
    /// with another type.
    pub fn optional<U: Any + Send + Sync>(
        &mut self,
        name: &'static str,
        default: impl Into<AnyNode>,
    ) -> Dependency<U> {
        let default = default.into();
        assert!(
            default.output_type_id() == TypeId::of::<U>(),
            "default for `{}` produces {}, not {}",
            name,
            default.output_type_name(),
            std::any::type_name::<U>()
        );
        self.list.push(name, Some(default))
    }
}

/// Maps each computation kind to its [`DependencyList`].
///
/// A kind is declared lazily, the first time its list is needed, by running
/// its [`Computation::declare`] hook once. Lists are immutable once stored;
/// [`register`](Self::register) replaces a list with an extended copy.
pub struct DependencyRegistry {
    kinds: RwLock<HashMap<TypeId, Arc<DependencyList>, ahash::RandomState>>,
}

static GLOBAL: OnceLock<DependencyRegistry> = OnceLock::new();

impl Default for DependencyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            kinds: RwLock::new(HashMap::with_hasher(ahash::RandomState::new())),
        }
    }

    /// The process-wide registry used by [`Node::new`](crate::Node::new).
    pub fn global() -> &'static DependencyRegistry {
        GLOBAL.get_or_init(DependencyRegistry::new)
    }

    /// The slots of `C`, declaring `C` first if needed.
    ///
    /// A kind that declares nothing has an empty list.
    pub fn dependencies<C: Computation>(&self) -> Arc<DependencyList> {
        let id = TypeId::of::<C>();
        if let Some(list) = self.kinds.read().get(&id) {
            return list.clone();
        }

        // Declare without holding the lock: `inherit` re-enters the registry.
        let mut declarer = Declarer {
            registry: self,
            list: DependencyList {
                kind: std::any::type_name::<C>(),
                slots: Vec::new(),
            },
        };
        C::declare(&mut declarer);
        let declared = Arc::new(declarer.list);

        let mut kinds = self.kinds.write();
        let list = kinds.entry(id).or_insert(declared).clone();
        tracing::trace!(kind = list.kind, slots = list.len(), "declared dependencies");
        list
    }

    /// Append a slot to `C`'s list (declaring `C` first if needed).
    ///
    /// Idempotent per name: registering an existing name returns the
    /// existing handle.
    ///
    /// # Panics
    ///
    /// If the name was already registered with another type.
    pub fn register<C: Computation, U: Any + Send + Sync>(
        &self,
        name: &'static str,
    ) -> Dependency<U> {
        let current = self.dependencies::<C>();
        if let Some(existing) = current.find(name) {
            return existing.typed::<U>(current.kind);
        }
        let mut kinds = self.kinds.write();
        let entry = kinds.entry(TypeId::of::<C>()).or_insert(current);
        if let Some(existing) = entry.find(name) {
            return existing.typed::<U>(entry.kind);
        }
        let mut extended = DependencyList::clone(entry);
        let dependency = extended.push::<U>(name, None);
        *entry = Arc::new(extended);
        dependency
    }

    /// Look up a declared slot of `C` by name.
    ///
    /// # Panics
    ///
    /// If the slot exists with another type.
    pub fn dependency<C: Computation, U: Any + Send + Sync>(
        &self,
        name: &str,
    ) -> Option<Dependency<U>> {
        let list = self.dependencies::<C>();
        list.find(name).map(|slot| slot.typed::<U>(list.kind))
    }

    /// Returns `true` if `C` was already declared.
    pub fn is_declared<C: Computation>(&self) -> bool {
        self.kinds.read().contains_key(&TypeId::of::<C>())
    }

    /// Forget every declared kind.
    pub fn reset(&self) {
        self.kinds.write().clear();
    }
}

impl fmt::Debug for DependencyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyRegistry")
            .field("kinds", &self.kinds.read().len())
            .finish()
    }
}
