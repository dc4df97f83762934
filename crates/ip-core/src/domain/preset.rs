//! Preset (C6): a container of preset zones, each routing to an
//! `Instrument`. Declares `(bank, program)` as a unique-property group —
//! two presets under the same `File` with equal bank and program
//! conflict (§4.2, scenario 2 in spec §8).

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::container::{ChildSlots, Container};
use crate::item::{Item, ItemHeader, ItemRef, LinkResolver, PropValue, UniqueKey};

const CHILD_TYPES: &[&str] = &["Zone"];

pub struct Preset {
    header: ItemHeader,
    slots: ChildSlots,
    bank: AtomicI32,
    program: AtomicI32,
}

impl Default for Preset {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl Preset {
    pub fn new(bank: i32, program: i32) -> Self {
        Self {
            header: ItemHeader::new(),
            slots: ChildSlots::new(CHILD_TYPES),
            bank: AtomicI32::new(bank),
            program: AtomicI32::new(program),
        }
    }

    pub fn new_ref(bank: i32, program: i32) -> ItemRef {
        let item: ItemRef = Arc::new(Preset::new(bank, program));
        item.as_container().unwrap().bind_owner(&item);
        item
    }

    pub fn bank(&self) -> i32 {
        self.bank.load(Ordering::Relaxed)
    }

    pub fn program(&self) -> i32 {
        self.program.load(Ordering::Relaxed)
    }

    pub fn set_bank_program(&self, bank: i32, program: i32) {
        self.bank.store(bank, Ordering::Relaxed);
        self.program.store(program, Ordering::Relaxed);
    }
}

impl Item for Preset {
    fn header(&self) -> &ItemHeader {
        &self.header
    }

    fn type_name(&self) -> &'static str {
        "Preset"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn new_instance(&self) -> ItemRef {
        Preset::new_ref(self.bank(), self.program())
    }

    fn copy_into(&self, dest: &dyn Item, resolver: &LinkResolver) {
        let Some(dest_container) = dest.as_container() else { return };
        let Some(dest_item) = dest_container.owner_ref() else { return };
        if let Some(d) = dest.as_any().downcast_ref::<Preset>() {
            d.set_bank_program(self.bank(), self.program());
        }
        for child in self.slots.all_children() {
            let dup = crate::item::duplicate_link_func(&child, resolver);
            let _ = dest_container.insert_child(&dest_item, dup, crate::container::APPEND);
        }
    }

    /// "bbb-ppp Name", the format-specific title concatenation named in
    /// spec §3.1.
    fn title(&self) -> String {
        format!(
            "{:03}-{:03} {}",
            self.bank(),
            self.program(),
            self.header().name().unwrap_or_default()
        )
    }

    fn as_container(&self) -> Option<&dyn Container> {
        Some(&self.slots)
    }

    fn unique_key(&self) -> Option<UniqueKey> {
        Some(UniqueKey {
            group: "bank-program",
            values: vec![
                PropValue::Int(self.bank() as i64),
                PropValue::Int(self.program() as i64),
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::unique_conflict;

    #[test]
    fn title_formats_bank_program() {
        let preset: ItemRef = Arc::new(Preset::new(0, 5));
        preset.header().set_name(Some("Piano".into()));
        assert_eq!(preset.title(), "000-005 Piano");
    }

    #[test]
    fn same_bank_program_conflicts() {
        let a: ItemRef = Arc::new(Preset::new(0, 5));
        let b: ItemRef = Arc::new(Preset::new(0, 5));
        assert!(unique_conflict(a.as_ref(), b.as_ref()));

        let c: ItemRef = Arc::new(Preset::new(0, 6));
        assert!(!unique_conflict(a.as_ref(), c.as_ref()));
    }
}
