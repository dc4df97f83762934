//! Property-change notification bus (C3).
//!
//! Subscriptions are `(item?, property?)` pairs with a handler id
//! returned on connect. `notify` snapshots the matching subscriber sets
//! under the bus lock, releases it, then dispatches — so no callback
//! ever runs while the bus (or the notified item) is locked. Dispatch
//! order is `(item,prop)`, `(item,*)`, `(*,prop)`, `(*,*)`, matching
//! `ipatch_item_prop_notify`.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::item::{ItemId, ItemRef};
use crate::pspec::{self, PropSpec};

/// A property value passed to subscribers. Concrete item types encode
/// their own property values into this narrow set; the bus only needs
/// to move the value, never interpret it.
#[derive(Debug, Clone)]
pub enum PropValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Item(Option<ItemRef>),
}

/// The event delivered to every matching subscriber.
#[derive(Clone)]
pub struct PropEvent {
    pub item: ItemRef,
    pub pspec: PropSpec,
    pub new_value: PropValue,
    pub old_value: PropValue,
}

pub type PropCallback = Arc<dyn Fn(&PropEvent) + Send + Sync>;

struct Subscription {
    id: u64,
    item: Option<ItemId>,
    property: Option<&'static str>,
    callback: PropCallback,
}

/// Process-wide property-change bus.
#[derive(Default)]
pub struct PropBus {
    next_id: RwLock<u64>,
    subs: RwLock<Vec<Subscription>>,
}

impl PropBus {
    fn alloc_id(&self) -> u64 {
        let mut g = self.next_id.write();
        if *g == 0 {
            *g = 1;
        }
        let id = *g;
        *g += 1;
        id
    }

    /// Subscribe to `(item?, property?)`. Either side may be `None` for
    /// a wildcard. Returns a monotonically increasing handler id.
    pub fn connect(
        &self,
        item: Option<&ItemRef>,
        property: Option<&'static str>,
        callback: PropCallback,
    ) -> u64 {
        let id = self.alloc_id();
        self.subs.write().push(Subscription {
            id,
            item: item.map(crate::item::item_id),
            property,
            callback,
        });
        id
    }

    /// Disconnect by handler id. Returns `true` if a subscription was
    /// found and removed. Safe to call from within a dispatched
    /// callback or concurrently from another thread mid-dispatch: the
    /// snapshot already taken for an in-flight `notify` is unaffected.
    pub fn disconnect(&self, id: u64) -> bool {
        let before = self.subs.read().len();
        self.subs.write().retain(|s| s.id != id);
        self.subs.read().len() != before
    }

    /// Disconnect every subscription matching `(item?, property?, ...)`
    /// exactly, mirroring the C API's quad-based disconnect.
    pub fn disconnect_matching(&self, item: Option<&ItemRef>, property: Option<&'static str>) -> usize {
        let item_key = item.map(crate::item::item_id);
        let before = self.subs.read().len();
        self.subs
            .write()
            .retain(|s| !(s.item == item_key && s.property == property));
        before - self.subs.read().len()
    }

    /// Notify that `pspec` on `item` changed from `old` to `new`.
    ///
    /// 1. Unless `pspec` carries `NO_SAVE_CHANGE`, mark the nearest Base
    ///    dirty via `item::changed`.
    /// 2. If `item`'s `HOOKS_ACTIVE` flag is clear, stop — no subscriber
    ///    runs.
    /// 3. Snapshot matching subscribers in `(item,prop)`, `(item,*)`,
    ///    `(*,prop)`, `(*,*)` order under the bus lock, then dispatch
    ///    outside it.
    pub fn notify(&self, item: &ItemRef, pspec: PropSpec, new: PropValue, old: PropValue) {
        if !pspec.has(pspec::NO_SAVE_CHANGE) {
            crate::item::changed(item);
        }
        if !item.header().flags.has(crate::flags::HOOKS_ACTIVE) {
            return;
        }

        let key = crate::item::item_id(item);
        let prop = pspec.name;
        let snapshot: Vec<PropCallback> = {
            let subs = self.subs.read();
            let item_prop = subs.iter().filter(|s| s.item == Some(key) && s.property == Some(prop));
            let item_wild = subs.iter().filter(|s| s.item == Some(key) && s.property.is_none());
            let wild_prop = subs.iter().filter(|s| s.item.is_none() && s.property == Some(prop));
            let wild_wild = subs.iter().filter(|s| s.item.is_none() && s.property.is_none());
            item_prop
                .chain(item_wild)
                .chain(wild_prop)
                .chain(wild_wild)
                .map(|s| s.callback.clone())
                .collect()
        };

        let event = PropEvent {
            item: item.clone(),
            pspec,
            new_value: new,
            old_value: old,
        };
        for cb in snapshot {
            cb(&event);
        }
    }
}

static BUS: once_cell_like::Lazy<PropBus> = once_cell_like::Lazy::new(PropBus::default);

/// The process-wide property-change bus.
pub fn prop_bus() -> &'static PropBus {
    &BUS
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
