//! Virtual bank indirection (C6): a lightweight item that stands in for
//! a `Preset` that physically lives in a different `File`, exposing its
//! own `(bank, program)` identity in the referencing file without
//! requiring the target file to stay open as a direct child. Grounded
//! on libinstpatch's `IpatchVBank`/`IpatchVBankInst` indirection, which
//! keeps a path + bank/program triple pointing at another Base's
//! preset rather than embedding it.

use std::any::Any;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::item::{Item, ItemHeader, ItemRef, LinkResolver, PropValue, UniqueKey};
use crate::link::LinkItem;

pub struct VBank {
    header: ItemHeader,
    bank: AtomicI32,
    program: AtomicI32,
    target: RwLock<Option<ItemRef>>,
}

impl Default for VBank {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl VBank {
    pub fn new(bank: i32, program: i32) -> Self {
        Self {
            header: ItemHeader::new(),
            bank: AtomicI32::new(bank),
            program: AtomicI32::new(program),
            target: RwLock::new(None),
        }
    }

    pub fn bank(&self) -> i32 {
        self.bank.load(Ordering::Relaxed)
    }

    pub fn program(&self) -> i32 {
        self.program.load(Ordering::Relaxed)
    }
}

impl Item for VBank {
    fn header(&self) -> &ItemHeader {
        &self.header
    }

    fn type_name(&self) -> &'static str {
        "VBank"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn new_instance(&self) -> ItemRef {
        Arc::new(VBank::new(self.bank(), self.program()))
    }

    fn copy_into(&self, dest: &dyn Item, resolver: &LinkResolver) {
        if let Some(d) = dest.as_any().downcast_ref::<VBank>() {
            let resolved = resolver.resolve(self.target.read().as_ref());
            *d.target.write() = resolved;
        }
    }

    fn as_link_item(&self) -> Option<&dyn LinkItem> {
        Some(self)
    }

    fn unique_key(&self) -> Option<UniqueKey> {
        Some(UniqueKey {
            group: "bank-program",
            values: vec![PropValue::Int(self.bank() as i64), PropValue::Int(self.program() as i64)],
        })
    }
}

impl LinkItem for VBank {
    fn link_type(&self) -> &'static str {
        "Preset"
    }

    fn link_item(&self) -> Option<ItemRef> {
        self.target.read().clone()
    }

    fn set_link_item(&self, target: Option<ItemRef>) -> Result<()> {
        if let Some(t) = &target {
            if t.type_name() != self.link_type() {
                return Err(crate::error::Error::Invalid(format!(
                    "VBank link slot does not accept {}",
                    t.type_name()
                )));
            }
        }
        *self.target.write() = target;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Preset;

    #[test]
    fn links_to_an_out_of_file_preset() {
        let vbank: ItemRef = Arc::new(VBank::new(128, 0));
        let preset = Preset::new_ref(128, 0);
        vbank.as_link_item().unwrap().set_link_item(Some(preset.clone())).unwrap();
        assert!(vbank.as_link_item().unwrap().link_item().is_some());
    }
}
