//! Instrument (C6): a container of instrument zones, each routing a
//! key/velocity box to a `Sample`.

use std::any::Any;
use std::sync::Arc;

use crate::container::{ChildSlots, Container};
use crate::item::{Item, ItemHeader, ItemRef, LinkResolver};

const CHILD_TYPES: &[&str] = &["Zone"];

pub struct Instrument {
    header: ItemHeader,
    slots: ChildSlots,
}

impl Default for Instrument {
    fn default() -> Self {
        Self::new()
    }
}

impl Instrument {
    pub fn new() -> Self {
        Self {
            header: ItemHeader::new(),
            slots: ChildSlots::new(CHILD_TYPES),
        }
    }

    /// Wrap `self` in an `Arc` and bind ownership of its child slots, so
    /// remove notifications can find their owner. Domain constructors
    /// call this instead of a bare `Arc::new`.
    pub fn new_ref() -> ItemRef {
        let item: ItemRef = Arc::new(Instrument::new());
        item.as_container().unwrap().bind_owner(&item);
        item
    }
}

impl Item for Instrument {
    fn header(&self) -> &ItemHeader {
        &self.header
    }

    fn type_name(&self) -> &'static str {
        "Instrument"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn new_instance(&self) -> ItemRef {
        Instrument::new_ref()
    }

    fn copy_into(&self, dest: &dyn Item, resolver: &LinkResolver) {
        let Some(dest_container) = dest.as_container() else { return };
        let Some(dest_item) = dest_container.owner_ref() else { return };
        for child in self.slots.all_children() {
            let dup = crate::item::duplicate_link_func(&child, resolver);
            let _ = dest_container.insert_child(&dest_item, dup, crate::container::APPEND);
        }
    }

    fn as_container(&self) -> Option<&dyn Container> {
        Some(&self.slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Sample, Zone, ZoneKind};

    #[test]
    fn duplicate_copies_zones() {
        let instrument = Instrument::new_ref();
        let zone: ItemRef = Arc::new(Zone::new(ZoneKind::Instrument));
        instrument
            .as_container()
            .unwrap()
            .insert_child(&instrument, zone, crate::container::APPEND)
            .unwrap();

        let dup = crate::item::duplicate(&instrument);
        assert_eq!(dup.as_container().unwrap().all_children().len(), 1);
    }

    #[test]
    fn rejects_non_zone_children() {
        let instrument = Instrument::new_ref();
        let sample: ItemRef = Arc::new(Sample::new());
        assert!(instrument
            .as_container()
            .unwrap()
            .insert_child(&instrument, sample, crate::container::APPEND)
            .is_err());
    }
}
