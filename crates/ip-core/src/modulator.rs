//! Modulator list (C6): ordered `{src, dst, amount, amount_src,
//! transform}` routings attached to a zone/region.
//!
//! Grounded on `IpatchSF2ModItem`, whose header explicitly documents
//! that the add/insert path does not check for duplicates — preserved
//! here verbatim as [`ModulatorList::insert`]. A separate,
//! dedup-checking replace path (`set_mods`, mirroring
//! `ipatch_sf2_mod_item_set_mods`) is provided for callers that do want
//! whole-list replacement semantics.

/// A modulator controller source or destination. The original format
/// encodes these as small integer codes (MIDI CC, generator id,
/// non-controller sources like note-on velocity); we keep it opaque
/// here since the bus never interprets it, only compares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlSource(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Linear,
    Concave,
    Convex,
    Switch,
}

/// One modulator routing. `PartialEq` compares all five fields, matching
/// the "matching all five fields" dedup rule from §3.4.
#[derive(Debug, Clone, PartialEq)]
pub struct Modulator {
    pub src: ControlSource,
    pub dst: crate::generator::GenId,
    pub amount: i16,
    pub amount_src: ControlSource,
    pub transform: Transform,
}

/// Ordered list of [`Modulator`]s attached to one zone/region.
#[derive(Debug, Clone, Default)]
pub struct ModulatorList {
    mods: Vec<Modulator>,
}

impl ModulatorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Modulator> {
        self.mods.iter()
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    /// Append `m` unconditionally. NOTE: does not check for duplicates —
    /// carried over from the original source's own comment on this path.
    /// Callers that want dedup-on-insert should check
    /// `contains`/`remove_matching` themselves, or use [`Self::set_mods`]
    /// for whole-list replacement.
    pub fn insert(&mut self, m: Modulator) {
        self.mods.push(m);
    }

    /// `true` if a modulator matching all five fields of `m` is present.
    pub fn contains(&self, m: &Modulator) -> bool {
        self.mods.iter().any(|existing| existing == m)
    }

    /// Remove the first modulator matching all five fields of `m`.
    /// Returns `true` if one was removed.
    pub fn remove_matching(&mut self, m: &Modulator) -> bool {
        if let Some(pos) = self.mods.iter().position(|existing| existing == m) {
            self.mods.remove(pos);
            true
        } else {
            false
        }
    }

    /// Replace `old` with `new` in place if present (keeps list order).
    /// Calling this twice with the arguments swapped is the identity.
    pub fn change(&mut self, old: &Modulator, new: Modulator) -> bool {
        if let Some(slot) = self.mods.iter_mut().find(|existing| *existing == old) {
            *slot = new;
            true
        } else {
            false
        }
    }

    /// Replace the whole list with `mods`, deduplicating on all five
    /// fields (unlike `insert`, which does not).
    pub fn set_mods(&mut self, mods: Vec<Modulator>) {
        let mut deduped: Vec<Modulator> = Vec::with_capacity(mods.len());
        for m in mods {
            if !deduped.contains(&m) {
                deduped.push(m);
            }
        }
        self.mods = deduped;
    }
}

/// Capability for items that carry a modulator list (zones/regions).
pub trait ModulatorItem: Send + Sync {
    fn mod_list(&self) -> parking_lot::MappedRwLockReadGuard<'_, ModulatorList>;
    fn mod_list_mut(&self) -> parking_lot::MappedRwLockWriteGuard<'_, ModulatorList>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::GenId;
    use proptest::prelude::*;

    fn sample_mod(amount: i16) -> Modulator {
        Modulator {
            src: ControlSource(1),
            dst: GenId::COARSE_TUNE,
            amount,
            amount_src: ControlSource(0),
            transform: Transform::Linear,
        }
    }

    proptest! {
        /// Round-trip law from §8: inserting a modulator onto an
        /// arbitrary starting list and then removing a matching entry
        /// always restores the list to its prior contents, for any
        /// amount/source values.
        #[test]
        fn insert_then_remove_matching_restores_list(
            amount: i16,
            extra_amount: i16,
        ) {
            let mut list = ModulatorList::new();
            list.insert(sample_mod(amount));
            let before = list.clone();

            let m = Modulator {
                src: ControlSource(7),
                dst: GenId::NOTE_RANGE_LOW,
                amount: extra_amount,
                amount_src: ControlSource(3),
                transform: Transform::Concave,
            };
            list.insert(m.clone());
            prop_assert!(list.remove_matching(&m));
            prop_assert_eq!(list.len(), before.len());
            prop_assert_eq!(
                list.iter().collect::<Vec<_>>(),
                before.iter().collect::<Vec<_>>()
            );
        }
    }

    #[test]
    fn insert_does_not_deduplicate() {
        let mut list = ModulatorList::new();
        list.insert(sample_mod(10));
        list.insert(sample_mod(10));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn insert_remove_restores_original_list() {
        let mut list = ModulatorList::new();
        list.insert(sample_mod(5));
        let before = list.clone();
        let m = sample_mod(99);
        list.insert(m.clone());
        assert!(list.remove_matching(&m));
        assert_eq!(list.len(), before.len());
        assert_eq!(list.iter().collect::<Vec<_>>(), before.iter().collect::<Vec<_>>());
    }

    #[test]
    fn change_then_change_back_is_identity() {
        let mut list = ModulatorList::new();
        let old = sample_mod(1);
        let new = sample_mod(2);
        list.insert(old.clone());
        assert!(list.change(&old, new.clone()));
        assert!(list.change(&new, old.clone()));
        assert_eq!(list.iter().next(), Some(&old));
    }

    #[test]
    fn set_mods_deduplicates() {
        let mut list = ModulatorList::new();
        list.set_mods(vec![sample_mod(1), sample_mod(1), sample_mod(2)]);
        assert_eq!(list.len(), 2);
    }
}
