//! Zone/Region (C6): a child of an instrument or preset mapping a
//! key/velocity box to a linked sibling (a `Sample` for instrument
//! zones, an `Instrument` for preset zones) plus generator/modulator
//! overrides. The original format distinguishes "zone" (SoundFont) from
//! "region" (DLS/GigaSampler) naming only; both map onto this one type,
//! parameterized by [`ZoneKind`].

use std::any::Any;
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::generator::{GenDefaults, GeneratorArray, GeneratorItem};
use crate::item::{Item, ItemHeader, ItemRef, LinkResolver};
use crate::link::LinkItem;
use crate::modulator::{ModulatorItem, ModulatorList};

/// Which sibling type this zone's link slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneKind {
    /// An instrument zone: links to a `Sample`.
    Instrument,
    /// A preset zone: links to an `Instrument`.
    Preset,
}

impl ZoneKind {
    fn link_type_name(self) -> &'static str {
        match self {
            ZoneKind::Instrument => "Sample",
            ZoneKind::Preset => "Instrument",
        }
    }
}

pub struct Zone {
    header: ItemHeader,
    kind: ZoneKind,
    gen_array: RwLock<GeneratorArray>,
    mod_list: RwLock<ModulatorList>,
    link: RwLock<Option<ItemRef>>,
}

impl Zone {
    pub fn new(kind: ZoneKind) -> Self {
        let defaults = match kind {
            ZoneKind::Instrument => GenDefaults::Instrument,
            ZoneKind::Preset => GenDefaults::Preset,
        };
        Self {
            header: ItemHeader::new(),
            kind,
            gen_array: RwLock::new(GeneratorArray::new(defaults)),
            mod_list: RwLock::new(ModulatorList::new()),
            link: RwLock::new(None),
        }
    }

    pub fn kind(&self) -> ZoneKind {
        self.kind
    }
}

impl Item for Zone {
    fn header(&self) -> &ItemHeader {
        &self.header
    }

    fn type_name(&self) -> &'static str {
        "Zone"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn new_instance(&self) -> ItemRef {
        Arc::new(Zone::new(self.kind))
    }

    fn copy_into(&self, dest: &dyn Item, resolver: &LinkResolver) {
        if let Some(d) = dest.as_any().downcast_ref::<Zone>() {
            d.gen_array.write().copy_all_from(&self.gen_array.read());
            *d.mod_list.write() = self.mod_list.read().clone();
            let resolved = resolver.resolve(self.link.read().as_ref());
            *d.link.write() = resolved;
        }
    }

    fn as_generator_item(&self) -> Option<&dyn GeneratorItem> {
        Some(self)
    }

    fn as_modulator_item(&self) -> Option<&dyn ModulatorItem> {
        Some(self)
    }

    fn as_link_item(&self) -> Option<&dyn LinkItem> {
        Some(self)
    }
}

impl GeneratorItem for Zone {
    fn gen_array(&self) -> MappedRwLockReadGuard<'_, GeneratorArray> {
        RwLockReadGuard::map(self.gen_array.read(), |g| g)
    }

    fn gen_array_mut(&self) -> MappedRwLockWriteGuard<'_, GeneratorArray> {
        RwLockWriteGuard::map(self.gen_array.write(), |g| g)
    }

    fn link_target(&self) -> Option<ItemRef> {
        self.link.read().clone()
    }
}

impl ModulatorItem for Zone {
    fn mod_list(&self) -> MappedRwLockReadGuard<'_, ModulatorList> {
        RwLockReadGuard::map(self.mod_list.read(), |m| m)
    }

    fn mod_list_mut(&self) -> MappedRwLockWriteGuard<'_, ModulatorList> {
        RwLockWriteGuard::map(self.mod_list.write(), |m| m)
    }
}

impl LinkItem for Zone {
    fn link_type(&self) -> &'static str {
        self.kind.link_type_name()
    }

    fn link_item(&self) -> Option<ItemRef> {
        self.link.read().clone()
    }

    fn set_link_item(&self, target: Option<ItemRef>) -> Result<()> {
        if let Some(t) = &target {
            if t.type_name() != self.link_type() {
                return Err(Error::Invalid(format!(
                    "{:?} zone link slot does not accept {}",
                    self.kind,
                    t.type_name()
                )));
            }
        }
        *self.link.write() = target;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Instrument, Sample};
    use crate::generator::GenId;

    #[test]
    fn note_range_swaps_inverted_bounds() {
        let zone: ItemRef = Arc::new(Zone::new(ZoneKind::Instrument));
        zone.as_generator_item().unwrap().set_note_range(80, 40);
        assert_eq!(zone.as_generator_item().unwrap().note_range(), (40, 80));
    }

    #[test]
    fn instrument_zone_rejects_wrong_link_type() {
        let zone: ItemRef = Arc::new(Zone::new(ZoneKind::Instrument));
        let instrument: ItemRef = Arc::new(Instrument::new());
        assert!(matches!(
            zone.as_link_item().unwrap().set_link_item(Some(instrument)),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn instrument_zone_accepts_sample_link() {
        let zone: ItemRef = Arc::new(Zone::new(ZoneKind::Instrument));
        let sample: ItemRef = Arc::new(Sample::new());
        assert!(zone.as_link_item().unwrap().set_link_item(Some(sample)).is_ok());
    }

    #[test]
    fn generator_set_carries_through_duplicate() {
        let zone: ItemRef = Arc::new(Zone::new(ZoneKind::Instrument));
        zone.as_generator_item().unwrap().gen_array_mut().set(GenId::COARSE_TUNE, 5);
        let dup = crate::item::duplicate(&zone);
        assert_eq!(dup.as_generator_item().unwrap().gen_array().get(GenId::COARSE_TUNE), (5, true));
    }
}
