//! Container capability (C4): an ordered sequence of children per
//! declared child type, with insert/remove notified through the
//! process-wide [`crate::container_bus::ContainerBus`].

use parking_lot::RwLock;

use crate::container_bus::container_bus;
use crate::error::{Error, Result};
use crate::item::{self, unique_conflict, ItemRef};
use crate::iter::{Cursor, Storage};

/// Position argument for [`Container::insert_child`]: `0` prepends,
/// negative appends, anything else is best-effort.
pub const PREPEND: i64 = 0;
pub const APPEND: i64 = -1;

/// Capability trait for any item exposing typed child slots.
pub trait Container: Send + Sync {
    /// Type names this container accepts as real children.
    fn child_types(&self) -> &'static [&'static str];

    /// Type names accepted only for UI grouping; never returned by
    /// [`Container::all_children`].
    fn virtual_child_types(&self) -> &'static [&'static str] {
        &[]
    }

    /// Insert `item` into the slot matching its dynamic type.
    fn insert_child(&self, self_item: &ItemRef, item: ItemRef, pos: i64) -> Result<()>;

    /// Remove `item` from whichever slot holds it.
    fn remove_child(&self, item: &ItemRef) -> Result<()>;

    /// Every real (non-virtual) child across all slots, in slot order.
    fn all_children(&self) -> Vec<ItemRef>;

    /// Children whose dynamic type is `type_name`.
    fn children_of_type(&self, type_name: &str) -> Vec<ItemRef>;

    /// Bind the item that owns this container, once, right after
    /// construction — lets `remove_child` notify without a reference
    /// threaded through its call signature. No-op by default.
    fn bind_owner(&self, _owner: &ItemRef) {}

    /// The item bound via [`Container::bind_owner`], if any and if it is
    /// still alive. Lets code holding only `&dyn Container` (e.g. inside
    /// `Item::copy_into`, which is handed `&dyn Item` rather than an
    /// `ItemRef`) recover the strong reference `insert_child` needs.
    fn owner_ref(&self) -> Option<ItemRef> {
        None
    }
}

/// A reusable, type-keyed implementation of [`Container`] that most
/// domain containers embed rather than reimplementing slot bookkeeping
/// from scratch.
#[derive(Default)]
pub struct ChildSlots {
    child_types: &'static [&'static str],
    slots: RwLock<Vec<(&'static str, Vec<ItemRef>)>>,
    owner: RwLock<Option<item::WeakItemRef>>,
}

impl ChildSlots {
    pub fn new(type_names: &'static [&'static str]) -> Self {
        Self {
            child_types: type_names,
            slots: RwLock::new(type_names.iter().map(|t| (*t, Vec::new())).collect()),
            owner: RwLock::new(None),
        }
    }

    /// Bind the item that owns these slots, so `remove_child` can emit
    /// notifications and mark the owner's base dirty without needing a
    /// reference threaded through the `Container::remove_child` call.
    /// Domain constructors call this once, right after wrapping
    /// themselves in an `Arc`.
    pub fn set_owner(&self, owner: &ItemRef) {
        *self.owner.write() = Some(std::sync::Arc::downgrade(owner));
    }

    fn slot_index_for(slots: &[(&'static str, Vec<ItemRef>)], type_name: &str) -> Option<usize> {
        slots.iter().position(|(t, _)| *t == type_name)
    }
}

impl Container for ChildSlots {
    fn child_types(&self) -> &'static [&'static str] {
        self.child_types
    }

    fn insert_child(&self, self_item: &ItemRef, child: ItemRef, pos: i64) -> Result<()> {
        let type_name = child.type_name();
        let mut slots = self.slots.write();
        let idx = Self::slot_index_for(&slots, type_name).ok_or_else(|| {
            Error::Unsupported(format!("{} does not accept {} children", self_item.type_name(), type_name))
        })?;

        for sibling in &slots[idx].1 {
            if unique_conflict(child.as_ref(), sibling.as_ref()) {
                log::warn!(
                    "inserting {} creates a unique-property conflict with an existing sibling",
                    type_name
                );
            }
        }

        let list = &mut slots[idx].1;
        let mut storage = Storage::Linked(std::mem::take(list));
        {
            let mut cursor = Cursor::new(&mut storage);
            // `PREPEND` (0) needs an explicit `Some(0)`; any other
            // non-negative position is best-effort; `APPEND` (negative)
            // leaves the cursor off-end, which `insert` treats as append.
            if pos >= PREPEND {
                cursor.index(pos);
            }
            cursor.insert(child.clone())?;
        }
        let Storage::Linked(v) = storage else { unreachable!() };
        slots[idx].1 = v;
        drop(slots);

        item::set_parent(&child, self_item)?;
        item::changed(self_item);
        container_bus().notify_add(self_item, &child);
        Ok(())
    }

    fn remove_child(&self, child: &ItemRef) -> Result<()> {
        let type_name = child.type_name();
        let owner = self.owner.read().as_ref().and_then(item::WeakItemRef::upgrade);

        let mut slots = self.slots.write();
        let idx = Self::slot_index_for(&slots, type_name)
            .ok_or_else(|| Error::Invalid(format!("{} is not a recognized child type", type_name)))?;
        let list = &mut slots[idx].1;
        let pos = list
            .iter()
            .position(|c| item::item_id(c) == item::item_id(child))
            .ok_or_else(|| Error::Invalid(format!("{} is not a child of this container", type_name)))?;
        drop(slots);

        // Remove notifications fire before the structural change.
        if let Some(owner) = &owner {
            container_bus().notify_remove(owner, child);
        }

        let mut slots = self.slots.write();
        slots[idx].1.remove(pos);
        drop(slots);

        item::unparent(child);
        if let Some(owner) = &owner {
            item::changed(owner);
        }
        Ok(())
    }

    fn all_children(&self) -> Vec<ItemRef> {
        self.slots.read().iter().flat_map(|(_, v)| v.iter().cloned()).collect()
    }

    fn children_of_type(&self, type_name: &str) -> Vec<ItemRef> {
        self.slots
            .read()
            .iter()
            .find(|(t, _)| *t == type_name)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    fn bind_owner(&self, owner: &ItemRef) {
        self.set_owner(owner);
    }

    fn owner_ref(&self) -> Option<ItemRef> {
        self.owner.read().as_ref().and_then(item::WeakItemRef::upgrade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Item, ItemHeader, LinkResolver};
    use std::any::Any;
    use std::sync::Arc;

    struct Leaf {
        header: ItemHeader,
    }
    impl Item for Leaf {
        fn header(&self) -> &ItemHeader {
            &self.header
        }
        fn type_name(&self) -> &'static str {
            "Leaf"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn new_instance(&self) -> ItemRef {
            Arc::new(Leaf { header: ItemHeader::new() })
        }
        fn copy_into(&self, _dest: &dyn Item, _resolver: &LinkResolver) {}
    }

    struct Branch {
        header: ItemHeader,
        slots: ChildSlots,
    }
    impl Item for Branch {
        fn header(&self) -> &ItemHeader {
            &self.header
        }
        fn type_name(&self) -> &'static str {
            "Branch"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn new_instance(&self) -> ItemRef {
            Arc::new(Branch {
                header: ItemHeader::new(),
                slots: ChildSlots::new(&["Leaf"]),
            })
        }
        fn copy_into(&self, _dest: &dyn Item, _resolver: &LinkResolver) {}
        fn as_container(&self) -> Option<&dyn Container> {
            Some(&self.slots)
        }
    }

    #[test]
    fn insert_prepend_and_append() {
        let branch: ItemRef = Arc::new(Branch {
            header: ItemHeader::new(),
            slots: ChildSlots::new(&["Leaf"]),
        });
        branch.as_container().unwrap().bind_owner(&branch);
        let a: ItemRef = Arc::new(Leaf { header: ItemHeader::new() });
        let b: ItemRef = Arc::new(Leaf { header: ItemHeader::new() });

        let container = branch.as_container().unwrap();
        container.insert_child(&branch, a.clone(), APPEND).unwrap();
        container.insert_child(&branch, b.clone(), PREPEND).unwrap();

        let children = container.all_children();
        assert_eq!(children.len(), 2);
        assert_eq!(item::item_id(&children[0]), item::item_id(&b));
        assert_eq!(item::item_id(&children[1]), item::item_id(&a));
    }

    #[test]
    fn insert_rejects_unknown_type() {
        struct Other {
            header: ItemHeader,
        }
        impl Item for Other {
            fn header(&self) -> &ItemHeader {
                &self.header
            }
            fn type_name(&self) -> &'static str {
                "Other"
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn new_instance(&self) -> ItemRef {
                Arc::new(Other { header: ItemHeader::new() })
            }
            fn copy_into(&self, _dest: &dyn Item, _resolver: &LinkResolver) {}
        }

        let branch: ItemRef = Arc::new(Branch {
            header: ItemHeader::new(),
            slots: ChildSlots::new(&["Leaf"]),
        });
        let other: ItemRef = Arc::new(Other { header: ItemHeader::new() });
        let container = branch.as_container().unwrap();
        assert!(matches!(
            container.insert_child(&branch, other, APPEND),
            Err(Error::Unsupported(_))
        ));
    }
}
