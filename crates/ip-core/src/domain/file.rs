//! File (C6/C7): the root `Base` item. Owns top-level instruments,
//! presets, samples, and virtual-bank indirections; the actual dirty/
//! saved/file-pool bookkeeping is the embedded [`crate::base::Base`].

use std::any::Any;
use std::sync::Arc;

use crate::base::Base;
use crate::container::{ChildSlots, Container};
use crate::item::{self, Item, ItemHeader, ItemRef, LinkResolver};

const CHILD_TYPES: &[&str] = &["Instrument", "Preset", "Sample", "VBank"];

pub struct File {
    header: ItemHeader,
    slots: ChildSlots,
    base: Base,
}

impl Default for File {
    fn default() -> Self {
        Self::new()
    }
}

impl File {
    pub fn new() -> Self {
        Self {
            header: ItemHeader::new(),
            slots: ChildSlots::new(CHILD_TYPES),
            base: Base::new(),
        }
    }

    pub fn new_ref() -> ItemRef {
        let item: ItemRef = Arc::new(File::new());
        item.as_container().unwrap().bind_owner(&item);
        item.header().flags.set(crate::flags::HOOKS_ACTIVE);
        item
    }

    pub fn instruments(&self) -> Vec<ItemRef> {
        self.slots.children_of_type("Instrument")
    }

    pub fn presets(&self) -> Vec<ItemRef> {
        self.slots.children_of_type("Preset")
    }

    pub fn samples(&self) -> Vec<ItemRef> {
        self.slots.children_of_type("Sample")
    }
}

impl Item for File {
    fn header(&self) -> &ItemHeader {
        &self.header
    }

    fn type_name(&self) -> &'static str {
        "File"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn new_instance(&self) -> ItemRef {
        File::new_ref()
    }

    fn copy_into(&self, dest: &dyn Item, resolver: &LinkResolver) {
        let Some(dest_container) = dest.as_container() else { return };
        let Some(dest_item) = dest_container.owner_ref() else { return };
        for child in self.slots.all_children() {
            let dup = item::duplicate_link_func(&child, resolver);
            let _ = dest_container.insert_child(&dest_item, dup, crate::container::APPEND);
        }
    }

    fn as_container(&self) -> Option<&dyn Container> {
        Some(&self.slots)
    }

    fn as_base(&self) -> Option<&Base> {
        Some(&self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Instrument;

    #[test]
    fn inserting_a_child_marks_file_changed() {
        let file = File::new_ref();
        assert!(!file.as_base().unwrap().is_changed());

        let instrument = Instrument::new_ref();
        file.as_container().unwrap().insert_child(&file, instrument, crate::container::APPEND).unwrap();

        assert!(file.as_base().unwrap().is_changed());
        assert_eq!(file.as_any().downcast_ref::<File>().unwrap().instruments().len(), 1);
    }
}
