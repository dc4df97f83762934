//! Container add/remove notification bus (C4).
//!
//! Mirrors `IpatchContainer_notify.c`: add callbacks are keyed by
//! `(container?)`, remove callbacks by `(container?, child?)`, with a
//! wildcard list on either side. Both fire snapshot-then-dispatch so no
//! subscriber callback runs under the bus lock.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::item::ItemRef;

/// Called after a child has been inserted into `container`.
pub type AddCallback = Arc<dyn Fn(&ItemRef, &ItemRef) + Send + Sync>;
/// Called before `child` is removed from `container`.
pub type RemoveCallback = Arc<dyn Fn(&ItemRef, &ItemRef) + Send + Sync>;

struct AddEntry {
    id: u64,
    container: Option<usize>,
    callback: AddCallback,
}

struct RemoveEntry {
    id: u64,
    container: Option<usize>,
    child: Option<usize>,
    callback: RemoveCallback,
}

/// Process-wide container add/remove notification bus.
pub struct ContainerBus {
    next_id: RwLock<u64>,
    add_subs: RwLock<Vec<AddEntry>>,
    remove_subs: RwLock<Vec<RemoveEntry>>,
}

impl Default for ContainerBus {
    fn default() -> Self {
        Self {
            next_id: RwLock::new(1),
            add_subs: RwLock::new(Vec::new()),
            remove_subs: RwLock::new(Vec::new()),
        }
    }
}

fn item_key(item: &ItemRef) -> usize {
    crate::item::item_id(item)
}

impl ContainerBus {
    fn alloc_id(&self) -> u64 {
        let mut next = self.next_id.write();
        let id = *next;
        *next += 1;
        id
    }

    /// Subscribe to add events on `container`, or every container if `None`.
    pub fn connect_add(&self, container: Option<&ItemRef>, callback: AddCallback) -> u64 {
        let id = self.alloc_id();
        self.add_subs.write().push(AddEntry {
            id,
            container: container.map(item_key),
            callback,
        });
        id
    }

    /// Subscribe to remove events on `(container?, child?)`.
    pub fn connect_remove(
        &self,
        container: Option<&ItemRef>,
        child: Option<&ItemRef>,
        callback: RemoveCallback,
    ) -> u64 {
        let id = self.alloc_id();
        self.remove_subs.write().push(RemoveEntry {
            id,
            container: container.map(item_key),
            child: child.map(item_key),
            callback,
        });
        id
    }

    /// Remove a subscription registered via either `connect_add` or
    /// `connect_remove`. Returns `true` if a subscription was removed.
    pub fn disconnect(&self, id: u64) -> bool {
        let mut removed = false;
        self.add_subs.write().retain(|e| {
            let keep = e.id != id;
            removed |= !keep;
            keep
        });
        self.remove_subs.write().retain(|e| {
            let keep = e.id != id;
            removed |= !keep;
            keep
        });
        removed
    }

    /// Notify that `child` was just inserted into `container`. Must be
    /// called after the structural change.
    pub fn notify_add(&self, container: &ItemRef, child: &ItemRef) {
        crate::item::changed(container);
        if !container.header().flags.has(crate::flags::HOOKS_ACTIVE) {
            return;
        }
        let key = item_key(container);
        let snapshot: Vec<AddCallback> = self
            .add_subs
            .read()
            .iter()
            .filter(|e| e.container.is_none() || e.container == Some(key))
            .map(|e| e.callback.clone())
            .collect();
        for cb in snapshot {
            cb(container, child);
        }
    }

    /// Notify that `child` is about to be removed from `container`. Must
    /// be called before the structural change.
    pub fn notify_remove(&self, container: &ItemRef, child: &ItemRef) {
        crate::item::changed(container);
        if !container.header().flags.has(crate::flags::HOOKS_ACTIVE) {
            return;
        }
        let ckey = item_key(container);
        let chkey = item_key(child);
        let snapshot: Vec<RemoveCallback> = self
            .remove_subs
            .read()
            .iter()
            .filter(|e| {
                (e.container.is_none() || e.container == Some(ckey))
                    && (e.child.is_none() || e.child == Some(chkey))
            })
            .map(|e| e.callback.clone())
            .collect();
        for cb in snapshot {
            cb(container, child);
        }
    }
}

static BUS: once_cell_like::Lazy<ContainerBus> = once_cell_like::Lazy::new(ContainerBus::default);

/// The process-wide container bus.
pub fn container_bus() -> &'static ContainerBus {
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
