//! Voice cache (C9, §3.5 / §4.8): a flat, read-optimized snapshot of one
//! instrument's playable voices, built once by [`crate::bridge`]'s
//! `cache_instrument` and then queried per note-on and patched in place
//! for realtime-safe property updates.
//!
//! Grounded on `src/plugins/fluidsynth.c`'s preset-to-voice expansion:
//! a voice is nothing but a resolved generator array, a modulator list,
//! and the selector range that decided it matched a given note/velocity.

use ip_core::generator::GeneratorArray;
use ip_core::modulator::ModulatorList;
use ip_core::pspec::PropSpec;

use crate::driver::SampleHandle;

/// Maximum voices a single `select` query may return, matching the
/// instrument-level voice-cache bound from §4.8.
pub const MAX_INST_VOICES: usize = 128;
/// Maximum realtime generator patches a single property change may
/// produce in one batch.
pub const MAX_REALTIME_UPDATES: usize = 128;

/// The note/velocity (and format-specific axes) range a voice responds
/// to. Only note and velocity are modeled here; additional selector
/// axes are out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceSelector {
    pub note_low: u8,
    pub note_high: u8,
    pub velocity_low: u8,
    pub velocity_high: u8,
}

impl VoiceSelector {
    pub fn matches(&self, key: u8, velocity: u8) -> bool {
        (self.note_low..=self.note_high).contains(&key)
            && (self.velocity_low..=self.velocity_high).contains(&velocity)
    }
}

/// One flat, playable voice. Holds a cached-open pin on its backing
/// sample store: per §5, a live voice keeps its sample store open until
/// the cache that produced it is destroyed.
pub struct Voice {
    /// Item id of the zone this voice was built from (§4.8 "Property-change
    /// propagation"): a realtime generator edit on that zone patches only
    /// the voices whose `zone_id` matches, not the whole cache.
    pub zone_id: usize,
    pub sample: SampleHandle,
    pub sample_store: ip_core::base::SampleStoreHandle,
    pub sample_rate: u32,
    pub sample_size: u64,
    pub loop_start: u64,
    pub loop_end: u64,
    pub root_note: u8,
    pub fine_tune: i16,
    pub gen_array: GeneratorArray,
    pub mods: ModulatorList,
    pub selector: VoiceSelector,
}

impl Drop for Voice {
    /// Releases this voice's pin on its sample store. The pin was taken
    /// by `cached_open` when the voice was built; dropping the whole
    /// voice cache (or a single voice within it) is how that pin closes.
    fn drop(&mut self) {
        self.sample_store.close();
    }
}

/// One realtime generator patch produced by [`VoiceCache::update`]:
/// "voice at this index, set this generator to this absolute value".
#[derive(Debug, Clone, Copy)]
pub struct VoiceUpdate {
    pub voice_index: usize,
    pub generator_id: u16,
    pub new_int_value: i16,
}

/// A built instrument's flat voice list plus session-override
/// modulators layered on top of every voice at allocation time.
pub struct VoiceCache {
    voices: Vec<Voice>,
    override_mods: ModulatorList,
}

impl VoiceCache {
    pub fn new(voices: Vec<Voice>, override_mods: ModulatorList) -> Self {
        Self { voices, override_mods }
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn override_mods(&self) -> &ModulatorList {
        &self.override_mods
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Query voices matching `key`/`velocity`, writing their indices
    /// into `out` in cache order, capped at `out.len()` and at
    /// [`MAX_INST_VOICES`]. Returns the number written.
    pub fn select(&self, key: u8, velocity: u8, out: &mut [usize]) -> usize {
        let cap = out.len().min(MAX_INST_VOICES);
        let mut n = 0;
        for (idx, voice) in self.voices.iter().enumerate() {
            if n >= cap {
                break;
            }
            if voice.selector.matches(key, velocity) {
                out[n] = idx;
                n += 1;
            }
        }
        n
    }

    /// Apply a realtime (`SYNTH_REALTIME`) property change: write
    /// `new_value` into `generator_id` on every currently selected
    /// voice and return the resulting patch batch for the driver to
    /// apply, capped at [`MAX_REALTIME_UPDATES`].
    ///
    /// Two-phase: generator values are written into the cached voices
    /// first, then the returned batch is handed to the driver — callers
    /// must not interleave reads of `gen_array` between the two phases.
    pub fn update(
        &mut self,
        selected: &[usize],
        pspec: PropSpec,
        generator_id: u16,
        new_int_value: i16,
    ) -> Vec<VoiceUpdate> {
        if !pspec.has(ip_core::pspec::SYNTH_REALTIME) {
            return Vec::new();
        }

        let mut updates = Vec::with_capacity(selected.len().min(MAX_REALTIME_UPDATES));
        for &voice_index in selected {
            if updates.len() >= MAX_REALTIME_UPDATES {
                break;
            }
            let Some(voice) = self.voices.get_mut(voice_index) else {
                continue;
            };
            voice.gen_array.set(ip_core::generator::GenId(generator_id), new_int_value);
            updates.push(VoiceUpdate {
                voice_index,
                generator_id,
                new_int_value,
            });
        }
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ip_core::generator::{GenDefaults, GenId};

    fn voice(note_low: u8, note_high: u8) -> Voice {
        Voice {
            zone_id: 0,
            sample: SampleHandle(1),
            sample_store: ip_core::base::SampleStoreHandle::new(),
            sample_rate: 44100,
            sample_size: 1000,
            loop_start: 0,
            loop_end: 1000,
            root_note: 60,
            fine_tune: 0,
            gen_array: GeneratorArray::new(GenDefaults::Instrument),
            mods: ModulatorList::new(),
            selector: VoiceSelector {
                note_low,
                note_high,
                velocity_low: 0,
                velocity_high: 127,
            },
        }
    }

    #[test]
    fn select_only_returns_matching_voices() {
        let cache = VoiceCache::new(vec![voice(0, 59), voice(60, 127)], ModulatorList::new());
        let mut out = [0usize; 4];
        let n = cache.select(72, 100, &mut out);
        assert_eq!(n, 1);
        assert_eq!(out[0], 1);
    }

    #[test]
    fn select_caps_at_output_buffer_len() {
        let cache = VoiceCache::new(vec![voice(0, 127), voice(0, 127), voice(0, 127)], ModulatorList::new());
        let mut out = [0usize; 2];
        let n = cache.select(60, 64, &mut out);
        assert_eq!(n, 2);
    }

    #[test]
    fn update_ignores_non_realtime_pspec() {
        let mut cache = VoiceCache::new(vec![voice(0, 127)], ModulatorList::new());
        let pspec = PropSpec::new("gain", 0);
        let updates = cache.update(&[0], pspec, GenId::COARSE_TUNE.0, 5);
        assert!(updates.is_empty());
    }

    #[test]
    fn update_writes_generator_and_returns_batch() {
        let mut cache = VoiceCache::new(vec![voice(0, 127)], ModulatorList::new());
        let pspec = PropSpec::new("coarse-tune", ip_core::pspec::SYNTH_REALTIME);
        let updates = cache.update(&[0], pspec, GenId::COARSE_TUNE.0, 7);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].new_int_value, 7);
        assert_eq!(cache.voices()[0].gen_array.get(GenId::COARSE_TUNE), (7, true));
    }

    #[test]
    fn update_skips_out_of_range_voice_index() {
        let mut cache = VoiceCache::new(vec![voice(0, 127)], ModulatorList::new());
        let pspec = PropSpec::new("coarse-tune", ip_core::pspec::SYNTH_REALTIME);
        let updates = cache.update(&[0, 5], pspec, GenId::COARSE_TUNE.0, 3);
        assert_eq!(updates.len(), 1);
    }
}
