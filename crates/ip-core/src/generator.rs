//! Generator array (C6): a dense, fixed-size array of `(value, set-flag)`
//! pairs indexed by a generator id, as carried by zones/regions.
//!
//! Mirrors `IpatchGenArray`: whole-array copy, set-only copy (only
//! entries whose flag is set), per-id set/clear, and a "preset" vs
//! "instrument" default-values mode (presets and instruments disagree on
//! a handful of generator defaults, e.g. `INITIAL_ATTENUATION`).

use crate::error::{Error, Result};
use crate::item::ItemRef;
use crate::pspec::{self, PropSpec};
use crate::prop_bus::{prop_bus, PropValue};

/// Number of generator slots. Matches the SoundFont 2 generator
/// enumeration's span used throughout the original object model.
pub const GEN_COUNT: usize = 60;

/// Which default-values table a fresh [`GeneratorArray`] is seeded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenDefaults {
    Preset,
    Instrument,
}

/// A generator id: a bounded index into the array, not an open integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenId(pub u16);

impl GenId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    value: i16,
    set: bool,
}

/// Fixed-size `(value, set-flag)` array, one entry per [`GenId`].
#[derive(Debug, Clone)]
pub struct GeneratorArray {
    slots: Vec<Slot>,
}

impl GeneratorArray {
    pub fn new(defaults: GenDefaults) -> Self {
        let mut slots = vec![Slot::default(); GEN_COUNT];
        if defaults == GenDefaults::Instrument {
            // Instrument generators default their initial attenuation to
            // zero; presets default to "unset" (additive on top of the
            // instrument's own value), so only the instrument table pins
            // an explicit zero here.
            slots[GenId::INITIAL_ATTENUATION.index()] = Slot { value: 0, set: true };
        }
        Self { slots }
    }

    pub fn get(&self, id: GenId) -> (i16, bool) {
        let s = self.slots[id.index()];
        (s.value, s.set)
    }

    pub fn set(&mut self, id: GenId, value: i16) {
        self.slots[id.index()] = Slot { value, set: true };
    }

    pub fn clear(&mut self, id: GenId) {
        self.slots[id.index()] = Slot::default();
    }

    pub fn is_set(&self, id: GenId) -> bool {
        self.slots[id.index()].set
    }

    /// Overwrite every slot from `src` (whole-array copy).
    pub fn copy_all_from(&mut self, src: &GeneratorArray) {
        self.slots.copy_from_slice(&src.slots);
    }

    /// Overwrite only the set-flagged slots from `src`, leaving slots
    /// `src` has not set untouched in `self`.
    pub fn copy_set_from(&mut self, src: &GeneratorArray) {
        for (dst, s) in self.slots.iter_mut().zip(src.slots.iter()) {
            if s.set {
                *dst = *s;
            }
        }
    }

    /// Every `(id, value)` pair whose set-flag is true, in id order.
    pub fn set_entries(&self) -> Vec<(GenId, i16)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.set)
            .map(|(i, s)| (GenId(i as u16), s.value))
            .collect()
    }
}

impl GenId {
    pub const NOTE_RANGE_LOW: GenId = GenId(43);
    pub const NOTE_RANGE_HIGH: GenId = GenId(44);
    pub const VELOCITY_RANGE_LOW: GenId = GenId(45);
    pub const VELOCITY_RANGE_HIGH: GenId = GenId(46);
    pub const COARSE_TUNE: GenId = GenId(51);
    pub const SAMPLE_ROOT_NOTE_OVERRIDE: GenId = GenId(58);
    pub const INITIAL_ATTENUATION: GenId = GenId(48);
}

/// Capability for items that carry one generator array — zones/regions
/// (and, via it, their note/velocity range presentation).
pub trait GeneratorItem: Send + Sync {
    fn gen_array(&self) -> parking_lot::MappedRwLockReadGuard<'_, GeneratorArray>;
    fn gen_array_mut(&self) -> parking_lot::MappedRwLockWriteGuard<'_, GeneratorArray>;

    /// Note range, reading through the range generators if the format
    /// encodes it that way. Setting `low > high` swaps the endpoints.
    fn note_range(&self) -> (u8, u8) {
        let g = self.gen_array();
        let (lo, _) = g.get(GenId::NOTE_RANGE_LOW);
        let (hi, _) = g.get(GenId::NOTE_RANGE_HIGH);
        (lo as u8, hi as u8)
    }

    fn set_note_range(&self, low: u8, high: u8) {
        let (low, high) = if low > high { (high, low) } else { (low, high) };
        let mut g = self.gen_array_mut();
        g.set(GenId::NOTE_RANGE_LOW, low as i16);
        g.set(GenId::NOTE_RANGE_HIGH, high as i16);
    }

    fn velocity_range(&self) -> (u8, u8) {
        let g = self.gen_array();
        let (lo, _) = g.get(GenId::VELOCITY_RANGE_LOW);
        let (hi, _) = g.get(GenId::VELOCITY_RANGE_HIGH);
        (lo as u8, hi as u8)
    }

    fn set_velocity_range(&self, low: u8, high: u8) {
        let (low, high) = if low > high { (high, low) } else { (low, high) };
        let mut g = self.gen_array_mut();
        g.set(GenId::VELOCITY_RANGE_LOW, low as i16);
        g.set(GenId::VELOCITY_RANGE_HIGH, high as i16);
    }

    /// Sibling this generator item ultimately routes to (a sample or an
    /// instrument), if any.
    fn link_target(&self) -> Option<ItemRef> {
        None
    }
}

/// Stable property name for a generator id, used as the `PropSpec` name
/// carried by [`set_generator`]'s notification and as the key
/// `ip_synth::bridge::Synth::register_generator_property` registers
/// against. Named generators get a readable name; the rest fall back to
/// a leaked `"generator-<id>"` string, computed once and cached.
pub fn generator_property_name(id: GenId) -> &'static str {
    generator_names()[id.index()]
}

fn generator_names() -> &'static [&'static str] {
    static NAMES: once_cell_like::Lazy<Vec<&'static str>> = once_cell_like::Lazy::new(|| {
        (0..GEN_COUNT as u16)
            .map(|i| match GenId(i) {
                GenId::NOTE_RANGE_LOW => "note-range-low",
                GenId::NOTE_RANGE_HIGH => "note-range-high",
                GenId::VELOCITY_RANGE_LOW => "velocity-range-low",
                GenId::VELOCITY_RANGE_HIGH => "velocity-range-high",
                GenId::COARSE_TUNE => "coarse-tune",
                GenId::SAMPLE_ROOT_NOTE_OVERRIDE => "sample-root-note-override",
                GenId::INITIAL_ATTENUATION => "initial-attenuation",
                other => Box::leak(format!("generator-{}", other.0).into_boxed_str()),
            })
            .collect()
    });
    &NAMES
}

/// Write a generator value on `item` (a zone/region) and notify the
/// property bus with a `SYNTH | SYNTH_REALTIME` flagged change, so a live
/// voice cache's bridge patches already-playing voices built from this
/// zone instead of waiting for a full rebuild (§4.8 "Property-change
/// propagation").
pub fn set_generator(item: &ItemRef, id: GenId, value: i16) -> Result<()> {
    let gen_item = item
        .as_generator_item()
        .ok_or_else(|| Error::Invalid(format!("{} has no generator array", item.type_name())))?;
    let (old_value, _) = gen_item.gen_array().get(id);
    gen_item.gen_array_mut().set(id, value);

    let pspec = PropSpec::new(generator_property_name(id), pspec::SYNTH | pspec::SYNTH_REALTIME);
    prop_bus().notify(item, pspec, PropValue::Int(value as i64), PropValue::Int(old_value as i64));
    Ok(())
}

/// A tiny hand-rolled `Lazy`, matching the habit already used by
/// `item.rs`/`prop_bus.rs` rather than pulling in `once_cell` for one
/// static.
mod once_cell_like {
    use std::sync::OnceLock;

    pub struct Lazy<T> {
        cell: OnceLock<T>,
        init: fn() -> T,
    }

    impl<T> Lazy<T> {
        pub const fn new(init: fn() -> T) -> Self {
            Self { cell: OnceLock::new(), init }
        }
    }

    impl<T> std::ops::Deref for Lazy<T> {
        type Target = T;
        fn deref(&self) -> &T {
            self.cell.get_or_init(self.init)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Round-trip law from §8: for any slot and any value, `set`
        /// followed by `get` returns that value with the set-flag true,
        /// regardless of which slot or default table it started from.
        #[test]
        fn set_then_get_roundtrips(idx in 0u16..GEN_COUNT as u16, value: i16) {
            let mut g = GeneratorArray::new(GenDefaults::Preset);
            g.set(GenId(idx), value);
            prop_assert_eq!(g.get(GenId(idx)), (value, true));
        }

        /// `clear` after `set` always restores the slot to its
        /// freshly-constructed (unset) state.
        #[test]
        fn set_then_clear_restores_unset(idx in 0u16..GEN_COUNT as u16, value: i16) {
            let fresh = GeneratorArray::new(GenDefaults::Preset);
            let mut g = GeneratorArray::new(GenDefaults::Preset);
            g.set(GenId(idx), value);
            g.clear(GenId(idx));
            prop_assert_eq!(g.get(GenId(idx)), fresh.get(GenId(idx)));
        }
    }

    #[test]
    fn set_get_clear_roundtrip() {
        let mut g = GeneratorArray::new(GenDefaults::Instrument);
        assert!(g.is_set(GenId::INITIAL_ATTENUATION));
        g.set(GenId::COARSE_TUNE, 12);
        assert_eq!(g.get(GenId::COARSE_TUNE), (12, true));
        g.clear(GenId::COARSE_TUNE);
        assert!(!g.is_set(GenId::COARSE_TUNE));
    }

    #[test]
    fn copy_set_only_touches_flagged_entries() {
        let mut src = GeneratorArray::new(GenDefaults::Preset);
        src.set(GenId::COARSE_TUNE, 7);

        let mut dst = GeneratorArray::new(GenDefaults::Preset);
        dst.set(GenId::NOTE_RANGE_LOW, 10);

        dst.copy_set_from(&src);
        assert_eq!(dst.get(GenId::COARSE_TUNE), (7, true));
        assert_eq!(dst.get(GenId::NOTE_RANGE_LOW), (10, true));
    }

    #[test]
    fn set_entries_lists_only_flagged() {
        let mut g = GeneratorArray::new(GenDefaults::Preset);
        g.set(GenId::COARSE_TUNE, 1);
        g.set(GenId::NOTE_RANGE_LOW, 2);
        let entries = g.set_entries();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn generator_property_name_is_stable_for_unnamed_ids() {
        let name = generator_property_name(GenId(59));
        assert_eq!(name, generator_property_name(GenId(59)));
        assert_eq!(name, "generator-59");
    }

    #[test]
    fn set_generator_writes_value_and_notifies_realtime() {
        use std::sync::Arc;

        let zone: ItemRef = Arc::new(crate::domain::Zone::new(crate::domain::ZoneKind::Instrument));
        zone.header().flags.set(crate::flags::HOOKS_ACTIVE);

        let seen: Arc<parking_lot::Mutex<Option<u32>>> = Arc::new(parking_lot::Mutex::new(None));
        let seen2 = seen.clone();
        prop_bus().connect(
            Some(&zone),
            Some(generator_property_name(GenId::COARSE_TUNE)),
            Arc::new(move |event: &crate::prop_bus::PropEvent| {
                *seen2.lock() = Some(event.pspec.flags);
            }),
        );

        set_generator(&zone, GenId::COARSE_TUNE, 12).unwrap();

        assert_eq!(
            zone.as_generator_item().unwrap().gen_array().get(GenId::COARSE_TUNE),
            (12, true)
        );
        let flags = seen.lock().take().expect("callback should have fired");
        assert_eq!(flags, pspec::SYNTH | pspec::SYNTH_REALTIME);
    }

    #[test]
    fn set_generator_rejects_items_without_a_generator_array() {
        use std::sync::Arc;

        let sample: ItemRef = Arc::new(crate::domain::Sample::new());
        assert!(matches!(
            set_generator(&sample, GenId::COARSE_TUNE, 1),
            Err(Error::Invalid(_))
        ));
    }
}
