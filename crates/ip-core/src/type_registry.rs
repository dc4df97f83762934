//! Type-property registry (C5).
//!
//! A process-wide map from `(type name, property name)` to either a
//! constant value or a dynamic getter invoked with the querying
//! instance. Mirrors the original's `ipatch_type_set(_prop)` /
//! `ipatch_type_get_property` pair, which answers questions like "what
//! is the virtual parent type of this preset?" where the answer depends
//! on the instance (a preset's bank number).

use std::sync::Arc;

use dashmap::DashMap;

use crate::item::ItemRef;
use crate::prop_bus::PropValue;

/// A dynamic type-property resolver: given the instance that triggered
/// the query (if any — some queries are type-level, not instance-level),
/// compute the current value.
pub type DynamicGetter = Arc<dyn Fn(Option<&ItemRef>) -> PropValue + Send + Sync>;

enum Entry {
    Constant(PropValue),
    Dynamic(DynamicGetter),
}

/// Process-wide `(type name, property name) -> value` store. Keyed by
/// owned `String`s rather than `&'static str`: writes are rare (startup
/// registration), so the clone cost is irrelevant and callers are not
/// forced to leak or intern names to query the registry.
#[derive(Default)]
pub struct TypeRegistry {
    entries: DashMap<(String, String), Entry>,
}

impl TypeRegistry {
    /// Register a constant value for `(type_name, property)`.
    pub fn set(&self, type_name: &str, property: &str, value: PropValue) {
        self.entries
            .insert((type_name.to_string(), property.to_string()), Entry::Constant(value));
    }

    /// Register a dynamic getter for `(type_name, property)`.
    pub fn set_dynamic(&self, type_name: &str, property: &str, getter: DynamicGetter) {
        self.entries
            .insert((type_name.to_string(), property.to_string()), Entry::Dynamic(getter));
    }

    /// Query `(type_name, property)`, passing `instance` through to a
    /// dynamic getter if one is registered. `None` if nothing is
    /// registered for that pair.
    pub fn get(&self, type_name: &str, property: &str, instance: Option<&ItemRef>) -> Option<PropValue> {
        let entry = self.entries.get(&(type_name.to_string(), property.to_string()))?;
        match entry.value() {
            Entry::Constant(v) => Some(v.clone()),
            Entry::Dynamic(f) => Some(f(instance)),
        }
    }

    /// Remove any registration for `(type_name, property)`.
    pub fn unset(&self, type_name: &str, property: &str) {
        self.entries.remove(&(type_name.to_string(), property.to_string()));
    }
}

static REGISTRY: once_cell_like::Lazy<TypeRegistry> = once_cell_like::Lazy::new(TypeRegistry::default);

/// The process-wide type-property registry.
pub fn type_registry() -> &'static TypeRegistry {
    &REGISTRY
}

mod once_cell_like {
    use std::sync::OnceLock;

    pub struct Lazy<T> {
        cell: OnceLock<T>,
        init: fn() -> T,
    }

    impl<T> Lazy<T> {
        pub const fn new(init: fn() -> T) -> Self {
            Self {
                cell: OnceLock::new(),
                init,
            }
        }
    }

    impl<T> std::ops::Deref for Lazy<T> {
        type Target = T;
        fn deref(&self) -> &T {
            self.cell.get_or_init(self.init)
        }
    }
}
