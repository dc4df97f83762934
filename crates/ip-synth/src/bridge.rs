//! Voice-cache build/lookup orchestration and the MIDI-facing realtime
//! bridge (C9, §4.8 / §6). `Synth` owns the published item→cache map,
//! the live-voice bookkeeping the driver calls back into, and the
//! per-channel bank/program state MIDI input mutates.
//!
//! Grounded on `src/plugins/fluidsynth.c`'s note-on voice-selection loop
//! (select → alloc → configure → add mods → start) and on the property
//! bus's `SYNTH`/`SYNTH_REALTIME` flags (§7, `ip_core::pspec`) deciding
//! whether a changed property patches live voices in place or schedules
//! a full cache rebuild.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use ip_core::domain::{File, Preset};
use ip_core::generator::GenId;
use ip_core::item::{self, ItemRef};
use ip_core::modulator::ModulatorList;
use ip_core::prop_bus::{prop_bus, PropEvent, PropValue};
use ip_core::pspec::{self, PropSpec};

use crate::driver::{SampleHandle, SynthDriver, VoiceHandle};
use crate::error::{Error, Result};
use crate::voice_cache::{Voice, VoiceCache, VoiceUpdate, MAX_INST_VOICES};

/// Per-channel MIDI state a bridge tracks, per §6 "MIDI input".
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelState {
    pub bank: u16,
    pub program: u8,
    /// Raw 14-bit pitch-bend value, signed around the center 8192.
    pub pitch_bend: u16,
}

/// Default channel count absent an explicit `Synth::with_channels`.
pub const DEFAULT_CHANNELS: usize = 16;
/// Upper bound on simultaneously tracked driver-allocated voices.
pub const MAX_REALTIME_VOICES: usize = 64;

/// Builds a [`VoiceCache`] from one cacheable item (an `Instrument`, or
/// a format that routes presets to instruments some other way). Looked
/// up by `item.type_name()`, mirroring `ip_core::base::Converter`'s
/// type-keyed dispatch for the save pipeline.
pub trait VoiceConverter: Send + Sync {
    fn convert(&self, item: &ItemRef, solo_item: Option<&ItemRef>, override_mods: ModulatorList) -> Result<VoiceCache>;
}

/// Flattens an `Instrument`'s zones into voices, one per zone that links
/// to a `Sample`. Zones missing a link or not of generator/link/
/// modulator capability are skipped rather than failing the whole
/// build — a partially-linked instrument still caches its playable
/// voices.
pub struct InstrumentConverter;

impl VoiceConverter for InstrumentConverter {
    fn convert(&self, item: &ItemRef, _solo_item: Option<&ItemRef>, override_mods: ModulatorList) -> Result<VoiceCache> {
        let container = item
            .as_container()
            .ok_or_else(|| Error::Invalid(format!("{} has no zones to cache", item.type_name())))?;

        let mut voices = Vec::new();
        for zone in container.children_of_type("Zone") {
            if voices.len() >= MAX_INST_VOICES {
                break;
            }
            let Some(gen_item) = zone.as_generator_item() else { continue };
            let Some(link_item) = zone.as_link_item() else { continue };
            let Some(sample_item) = link_item.link_item() else { continue };
            let Some(sample) = sample_item.as_any().downcast_ref::<ip_core::domain::Sample>() else { continue };

            let info = sample.info();
            let gen_array = gen_item.gen_array().clone();

            let (root_override, has_override) = gen_array.get(GenId::SAMPLE_ROOT_NOTE_OVERRIDE);
            let root_note = if has_override && root_override >= 0 {
                root_override as u8
            } else {
                info.root_note
            };

            let note_low = if gen_array.is_set(GenId::NOTE_RANGE_LOW) {
                gen_array.get(GenId::NOTE_RANGE_LOW).0 as u8
            } else {
                0
            };
            let note_high = if gen_array.is_set(GenId::NOTE_RANGE_HIGH) {
                gen_array.get(GenId::NOTE_RANGE_HIGH).0 as u8
            } else {
                127
            };
            let vel_low = if gen_array.is_set(GenId::VELOCITY_RANGE_LOW) {
                gen_array.get(GenId::VELOCITY_RANGE_LOW).0 as u8
            } else {
                0
            };
            let vel_high = if gen_array.is_set(GenId::VELOCITY_RANGE_HIGH) {
                gen_array.get(GenId::VELOCITY_RANGE_HIGH).0 as u8
            } else {
                127
            };

            let mods = zone
                .as_modulator_item()
                .map(|m| m.mod_list().clone())
                .unwrap_or_default();

            let store = sample
                .store()
                .unwrap_or_else(ip_core::base::SampleStoreHandle::new)
                .cached_open();

            voices.push(Voice {
                zone_id: item::item_id(&zone),
                sample: SampleHandle(item::item_id(&sample_item) as u64),
                sample_store: store,
                sample_rate: info.sample_rate,
                sample_size: info.size_frames as u64,
                loop_start: info.loop_points.start as u64,
                loop_end: info.loop_points.end as u64,
                root_note,
                fine_tune: info.fine_tune as i16,
                gen_array,
                mods,
                selector: crate::voice_cache::VoiceSelector {
                    note_low,
                    note_high,
                    velocity_low: vel_low,
                    velocity_high: vel_high,
                },
            });
        }
        Ok(VoiceCache::new(voices, override_mods))
    }
}

/// Type-keyed [`VoiceConverter`] registry, seeded with
/// [`InstrumentConverter`] for `"Instrument"`.
pub struct ConverterRegistry {
    converters: DashMap<&'static str, Arc<dyn VoiceConverter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self { converters: DashMap::new() }
    }

    pub fn register(&self, type_name: &'static str, converter: Arc<dyn VoiceConverter>) {
        self.converters.insert(type_name, converter);
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn VoiceConverter>> {
        self.converters.get(type_name).map(|e| e.clone())
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        let registry = Self::new();
        registry.register("Instrument", Arc::new(InstrumentConverter));
        registry
    }
}

struct LiveVoice {
    handle: VoiceHandle,
    cache_key: usize,
    voice_index: usize,
    channel: u8,
    key: u8,
}

/// The realtime bridge: one loaded patch, an active/solo item, a
/// published `item -> VoiceCache` map, and driver-allocated live voices.
pub struct Synth {
    driver: Arc<dyn SynthDriver>,
    converters: ConverterRegistry,
    patch: RwLock<Option<ItemRef>>,
    active_item: RwLock<Option<ItemRef>>,
    solo_item: RwLock<Option<ItemRef>>,
    override_mods: RwLock<ModulatorList>,
    cache: DashMap<usize, Arc<RwLock<VoiceCache>>>,
    /// Reverse index from a contributing zone's item id to the cache key
    /// (instrument item id) it was built into, so a realtime property
    /// change on the zone that actually owns the changed generator array
    /// can find the right cache (§4.8 "Property-change propagation").
    zone_to_instrument: DashMap<usize, usize>,
    /// Maps a property name registered via [`Synth::register_generator_property`]
    /// to the generator id a `SYNTH`/`SYNTH_REALTIME` change on it patches.
    generator_props: DashMap<&'static str, GenId>,
    channels: RwLock<Vec<ChannelState>>,
    live_voices: RwLock<Vec<LiveVoice>>,
    prop_sub: AtomicU64,
}

impl Synth {
    pub fn new(driver: Arc<dyn SynthDriver>) -> Arc<Self> {
        Self::with_channels(driver, DEFAULT_CHANNELS)
    }

    pub fn with_channels(driver: Arc<dyn SynthDriver>, channel_count: usize) -> Arc<Self> {
        let synth = Arc::new(Self {
            driver,
            converters: ConverterRegistry::default(),
            patch: RwLock::new(None),
            active_item: RwLock::new(None),
            solo_item: RwLock::new(None),
            override_mods: RwLock::new(ModulatorList::new()),
            cache: DashMap::new(),
            zone_to_instrument: DashMap::new(),
            generator_props: DashMap::new(),
            channels: RwLock::new(vec![ChannelState::default(); channel_count]),
            live_voices: RwLock::new(Vec::new()),
            prop_sub: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&synth);
        let id = prop_bus().connect(
            None,
            None,
            Arc::new(move |event: &PropEvent| {
                if let Some(synth) = weak.upgrade() {
                    synth.on_prop_change(event);
                }
            }),
        );
        synth.prop_sub.store(id, Ordering::Release);
        synth
    }

    /// Declare that changes to `property_name` (carrying `SYNTH` or
    /// `SYNTH_REALTIME` in its [`PropSpec`]) patch `generator_id` on
    /// cached voices. Without a registration, a realtime change on that
    /// property is observed but cannot be translated into a generator
    /// patch and is dropped with a debug log.
    pub fn register_generator_property(&self, property_name: &'static str, generator_id: GenId) {
        self.generator_props.insert(property_name, generator_id);
    }

    pub fn load_patch(&self, base: ItemRef) {
        self.cache.clear();
        self.zone_to_instrument.clear();
        self.live_voices.write().clear();
        *self.patch.write() = Some(base);
    }

    pub fn set_active_item(&self, item: Option<ItemRef>) -> Result<()> {
        if let Some(i) = &item {
            self.cache_instrument(i)?;
        }
        *self.active_item.write() = item;
        Ok(())
    }

    pub fn set_solo_item(&self, item: Option<ItemRef>) {
        *self.solo_item.write() = item;
        // Soloing changes which voices a future cache build emits;
        // invalidate so the next `cache_instrument` picks up the hint.
        self.cache.clear();
        self.zone_to_instrument.clear();
    }

    /// Build (or rebuild) the voice cache for `item` and publish it.
    /// Steps, per §4.8:
    /// 1. look up the converter registered for `item`'s dynamic type
    /// 2. snapshot the current solo item and session override mods
    /// 3. run the converter, producing a `VoiceCache`
    /// 4. the converter pins each voice's sample store open
    ///    ([`InstrumentConverter`] does this via `cached_open`)
    /// 5. publish atomically into the item→cache map and index each
    ///    contributing zone's id back to this cache key, so a realtime
    ///    change on a zone (not the instrument itself) can still find it
    pub fn cache_instrument(&self, item: &ItemRef) -> Result<()> {
        let converter = self
            .converters
            .get(item.type_name())
            .ok_or_else(|| Error::Unsupported(format!("no voice converter registered for {}", item.type_name())))?;

        let solo = self.solo_item.read().clone();
        let override_mods = self.override_mods.read().clone();
        let built = converter.convert(item, solo.as_ref(), override_mods)?;

        let key = item::item_id(item);
        for voice in built.voices() {
            self.zone_to_instrument.insert(voice.zone_id, key);
        }
        self.cache.insert(key, Arc::new(RwLock::new(built)));
        Ok(())
    }

    /// Resolve the changed item's id (an instrument or a zone it owns)
    /// to the cache key it should invalidate/patch. An instrument-level
    /// id resolves to itself; a zone-level id resolves via the reverse
    /// index `cache_instrument` populates from each built voice's
    /// `zone_id`.
    fn resolve_cache_key(&self, item_id: usize) -> Option<usize> {
        if self.cache.contains_key(&item_id) {
            Some(item_id)
        } else {
            self.zone_to_instrument.get(&item_id).map(|e| *e)
        }
    }

    fn resolve_instrument(&self, channel: u8) -> Option<ItemRef> {
        if let Some(active) = self.active_item.read().clone() {
            return Some(active);
        }

        let patch = self.patch.read().clone()?;
        let file = patch.as_any().downcast_ref::<File>()?;
        let (bank, program) = {
            let channels = self.channels.read();
            let state = channels.get(channel as usize)?;
            (state.bank, state.program)
        };

        for preset in file.presets() {
            let Some(p) = preset.as_any().downcast_ref::<Preset>() else { continue };
            if p.bank() as u16 != bank || p.program() as u8 != program {
                continue;
            }
            let Some(container) = preset.as_container() else { continue };
            for zone in container.all_children() {
                if let Some(link) = zone.as_link_item() {
                    if let Some(target) = link.link_item() {
                        if target.type_name() == "Instrument" {
                            return Some(target);
                        }
                    }
                }
            }
        }
        None
    }

    /// `note_on(channel, key, velocity)` — §4.8: resolve the channel's
    /// instrument, query up to [`MAX_INST_VOICES`] matching voices,
    /// allocate/configure/start each (capped at [`MAX_REALTIME_VOICES`]
    /// total tracked live voices), and return how many voices started.
    pub fn note_on(&self, channel: u8, key: u8, velocity: u8) -> Result<usize> {
        let instrument = self
            .resolve_instrument(channel)
            .ok_or_else(|| Error::Invalid(format!("no instrument resolved for channel {channel}")))?;
        let cache_key = item::item_id(&instrument);

        if !self.cache.contains_key(&cache_key) {
            self.cache_instrument(&instrument)?;
        }
        let entry = self.cache.get(&cache_key).expect("just inserted");
        let cache = entry.read();

        let mut selected = [0usize; MAX_INST_VOICES];
        let n = cache.select(key, velocity, &mut selected);
        let override_mods = cache.override_mods().clone();

        let mut started = 0;
        for &voice_index in &selected[..n] {
            if self.live_voices.read().len() >= MAX_REALTIME_VOICES {
                break;
            }
            let voice = &cache.voices()[voice_index];
            let handle = self.driver.alloc_voice(voice.sample, channel, key, velocity)?;
            self.driver.configure_voice(handle, &voice.gen_array)?;
            for m in voice.mods.iter().chain(override_mods.iter()) {
                self.driver.voice_add_mod(handle, m, false)?;
            }
            self.driver.start_voice(handle)?;

            self.live_voices.write().push(LiveVoice {
                handle,
                cache_key,
                voice_index,
                channel,
                key,
            });
            started += 1;
        }
        Ok(started)
    }

    /// `note_off(channel, key)`: drop bookkeeping for the matching live
    /// voices. The driver bridge's three call categories (§6) do not
    /// include a stop call — releasing a started voice is the driver's
    /// own envelope/internal concern once `start_voice` has run.
    pub fn note_off(&self, channel: u8, key: u8) -> usize {
        let mut live = self.live_voices.write();
        let before = live.len();
        live.retain(|v| !(v.channel == channel && v.key == key));
        before - live.len()
    }

    pub fn control_change(&self, channel: u8, controller: u8, value: u8) {
        let mut channels = self.channels.write();
        if let Some(state) = channels.get_mut(channel as usize) {
            if controller == 0 {
                // Bank select MSB.
                state.bank = (state.bank & 0x00FF) | ((value as u16) << 8);
            } else if controller == 32 {
                // Bank select LSB.
                state.bank = (state.bank & 0xFF00) | value as u16;
            }
        }
    }

    pub fn program_change(&self, channel: u8, program: u8) {
        if let Some(state) = self.channels.write().get_mut(channel as usize) {
            state.program = program;
        }
    }

    /// 14-bit pitch bend, signed around the center value 8192.
    pub fn pitch_bend(&self, channel: u8, value: u16) {
        if let Some(state) = self.channels.write().get_mut(channel as usize) {
            state.pitch_bend = value;
        }
    }

    pub fn channel_state(&self, channel: u8) -> Option<ChannelState> {
        self.channels.read().get(channel as usize).copied()
    }

    fn on_prop_change(&self, event: &PropEvent) {
        let item_id = item::item_id(&event.item);
        let Some(cache_key) = self.resolve_cache_key(item_id) else {
            return;
        };
        if event.pspec.has(pspec::SYNTH_REALTIME) {
            let Some(gen_id) = self.generator_props.get(event.pspec.name).map(|e| *e) else {
                log::debug!("no generator mapping registered for realtime property {}", event.pspec.name);
                return;
            };
            let PropValue::Int(v) = event.new_value else {
                log::debug!("realtime property {} did not carry an int value", event.pspec.name);
                return;
            };
            self.apply_realtime(cache_key, item_id, gen_id, event.pspec, v as i16);
        } else if event.pspec.has(pspec::SYNTH) {
            self.cache.remove(&cache_key);
        }
    }

    /// Patch only the voices the changed item actually owns: `item_id ==
    /// cache_key` means the instrument itself changed (every voice is
    /// affected), otherwise `item_id` is a zone's id and only voices
    /// built from that zone are patched.
    fn apply_realtime(&self, cache_key: usize, item_id: usize, gen_id: GenId, pspec: PropSpec, new_value: i16) {
        let Some(entry) = self.cache.get(&cache_key) else { return };
        let updates: Vec<VoiceUpdate> = {
            let mut cache = entry.write();
            let selected: Vec<usize> = if item_id == cache_key {
                (0..cache.len()).collect()
            } else {
                cache
                    .voices()
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.zone_id == item_id)
                    .map(|(idx, _)| idx)
                    .collect()
            };
            cache.update(&selected, pspec, gen_id.0, new_value)
        };
        self.apply_updates_to_live_voices(cache_key, &updates);
    }

    fn apply_updates_to_live_voices(&self, cache_key: usize, updates: &[VoiceUpdate]) {
        let live = self.live_voices.read();
        for lv in live.iter().filter(|l| l.cache_key == cache_key) {
            for u in updates.iter().filter(|u| u.voice_index == lv.voice_index) {
                let _ = self.driver.voice_gen_set(lv.handle, u.generator_id, u.new_int_value as f32);
                let _ = self.driver.voice_update_param(lv.handle, u.generator_id);
            }
        }
    }
}

impl Drop for Synth {
    fn drop(&mut self) {
        let id = self.prop_sub.load(Ordering::Acquire);
        if id != 0 {
            prop_bus().disconnect(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ip_core::domain::{Instrument, Sample, Zone, ZoneKind};
    use std::sync::Mutex;

    struct FakeDriver {
        calls: Mutex<Vec<String>>,
        next: AtomicU32,
    }
    impl FakeDriver {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()), next: AtomicU32::new(1) }
        }
    }
    impl SynthDriver for FakeDriver {
        fn alloc_voice(&self, _sample: SampleHandle, _channel: u8, _key: u8, _velocity: u8) -> Result<VoiceHandle> {
            self.calls.lock().unwrap().push("alloc".into());
            Ok(VoiceHandle(self.next.fetch_add(1, Ordering::SeqCst) as u64))
        }
        fn voice_gen_set(&self, _voice: VoiceHandle, _gen_id: u16, _value: f32) -> Result<()> {
            self.calls.lock().unwrap().push("gen_set".into());
            Ok(())
        }
        fn voice_update_param(&self, _voice: VoiceHandle, _gen_id: u16) -> Result<()> {
            self.calls.lock().unwrap().push("update_param".into());
            Ok(())
        }
        fn voice_add_mod(&self, _voice: VoiceHandle, _modulator: &ip_core::modulator::Modulator, _overwrite: bool) -> Result<()> {
            self.calls.lock().unwrap().push("add_mod".into());
            Ok(())
        }
        fn start_voice(&self, _voice: VoiceHandle) -> Result<()> {
            self.calls.lock().unwrap().push("start".into());
            Ok(())
        }
    }

    fn instrument_with_one_zone() -> ItemRef {
        instrument_with_one_zone_and_get_zone().0
    }

    fn instrument_with_one_zone_and_get_zone() -> (ItemRef, ItemRef) {
        let instrument = Instrument::new_ref();
        let sample: ItemRef = Arc::new(Sample::new());
        let zone: ItemRef = Arc::new(Zone::new(ZoneKind::Instrument));
        zone.header().flags.set(ip_core::flags::HOOKS_ACTIVE);
        zone.as_link_item().unwrap().set_link_item(Some(sample)).unwrap();
        instrument
            .as_container()
            .unwrap()
            .insert_child(&instrument, zone.clone(), ip_core::container::APPEND)
            .unwrap();
        (instrument, zone)
    }

    #[test]
    fn cache_instrument_builds_one_voice_per_linked_zone() {
        let driver = Arc::new(FakeDriver::new());
        let synth = Synth::new(driver);
        let instrument = instrument_with_one_zone();
        synth.cache_instrument(&instrument).unwrap();

        let key = item::item_id(&instrument);
        assert_eq!(synth.cache.get(&key).unwrap().read().len(), 1);
    }

    #[test]
    fn note_on_via_active_item_starts_a_voice() {
        let driver = Arc::new(FakeDriver::new());
        let synth = Synth::new(driver.clone());
        let instrument = instrument_with_one_zone();
        synth.set_active_item(Some(instrument)).unwrap();

        let started = synth.note_on(0, 60, 100).unwrap();
        assert_eq!(started, 1);
        assert_eq!(synth.live_voices.read().len(), 1);

        let calls = driver.calls.lock().unwrap();
        assert!(calls.contains(&"alloc".to_string()));
        assert!(calls.contains(&"start".to_string()));
    }

    #[test]
    fn note_off_clears_matching_live_voices() {
        let driver = Arc::new(FakeDriver::new());
        let synth = Synth::new(driver);
        let instrument = instrument_with_one_zone();
        synth.set_active_item(Some(instrument)).unwrap();
        synth.note_on(0, 60, 100).unwrap();

        assert_eq!(synth.note_off(0, 60), 1);
        assert_eq!(synth.live_voices.read().len(), 0);
    }

    #[test]
    fn note_on_without_any_instrument_fails() {
        let driver = Arc::new(FakeDriver::new());
        let synth = Synth::new(driver);
        assert!(matches!(synth.note_on(0, 60, 100), Err(Error::Invalid(_))));
    }

    #[test]
    fn control_change_bank_msb_updates_channel_state() {
        let driver = Arc::new(FakeDriver::new());
        let synth = Synth::new(driver);
        synth.control_change(2, 0, 1);
        assert_eq!(synth.channel_state(2).unwrap().bank, 256);
    }

    /// §8 Scenario 3 "Property-driven voice update": a realtime generator
    /// edit on the *zone* (not the instrument) after `note_on` patches the
    /// already-started voice in place, not the whole cache.
    #[test]
    fn realtime_generator_change_on_zone_patches_the_live_voice() {
        use ip_core::generator::{generator_property_name, set_generator, GenId};

        let driver = Arc::new(FakeDriver::new());
        let synth = Synth::new(driver.clone());
        synth.register_generator_property(generator_property_name(GenId::COARSE_TUNE), GenId::COARSE_TUNE);

        let (instrument, zone) = instrument_with_one_zone_and_get_zone();
        synth.set_active_item(Some(instrument.clone())).unwrap();

        let started = synth.note_on(0, 60, 100).unwrap();
        assert_eq!(started, 1);

        set_generator(&zone, GenId::COARSE_TUNE, 12).unwrap();

        let calls = driver.calls.lock().unwrap();
        assert!(calls.contains(&"gen_set".to_string()));
        assert!(calls.contains(&"update_param".to_string()));

        let cache_key = item::item_id(&instrument);
        let cache = synth.cache.get(&cache_key).unwrap();
        assert_eq!(
            cache.read().voices()[0].gen_array.get(GenId::COARSE_TUNE),
            (12, true)
        );
    }

    #[test]
    fn non_realtime_synth_property_change_on_zone_invalidates_only_its_instrument_cache() {
        let driver = Arc::new(FakeDriver::new());
        let synth = Synth::new(driver);
        let (instrument, zone) = instrument_with_one_zone_and_get_zone();
        synth.cache_instrument(&instrument).unwrap();
        let cache_key = item::item_id(&instrument);
        assert!(synth.cache.contains_key(&cache_key));

        let pspec = PropSpec::new("sample-mapping", pspec::SYNTH);
        prop_bus().notify(&zone, pspec, PropValue::Bool(true), PropValue::Bool(false));

        assert!(!synth.cache.contains_key(&cache_key));
    }
}
