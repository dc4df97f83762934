//! The wavetable driver seam (§6 "Driver bridge"). Grounded on the shape
//! of `src/plugins/fluidsynth.c`'s voice allocation / selector /
//! start-voice sequence, abstracted behind a trait so this crate never
//! depends on a concrete synth engine.

use ip_core::generator::GeneratorArray;
use ip_core::modulator::Modulator;

use crate::error::Result;

/// Opaque handle to a voice allocated by the driver. Only meaningful to
/// the driver that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceHandle(pub u64);

/// A single preloaded, cache-resident sample ready for voice allocation.
/// Kept open for the voice's lifetime; see [`crate::voice_cache::Voice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleHandle(pub u64);

/// Driver-reported configuration option kinds, enumerated at startup
/// (§6 "Configuration interface").
#[derive(Debug, Clone)]
pub enum OptionValue {
    Int(i32),
    Double(f64),
    Str(String),
    Bool(bool),
    /// An enumerated string option with its allowed alternatives.
    Enum { value: String, choices: Vec<String> },
}

/// The three categories of call a wavetable driver must provide, per the
/// external-interfaces section: voice allocation, generator application,
/// and modulator/start.
pub trait SynthDriver: Send + Sync {
    fn alloc_voice(
        &self,
        sample: SampleHandle,
        channel: u8,
        key: u8,
        velocity: u8,
    ) -> Result<VoiceHandle>;

    /// Write one absolute generator value into a live voice. Does not
    /// itself trigger recomputation — see [`SynthDriver::voice_update_param`].
    fn voice_gen_set(&self, voice: VoiceHandle, gen_id: u16, value: f32) -> Result<()>;

    /// Recompute whatever internal state depends on `gen_id`'s current
    /// value. Called after one or more `voice_gen_set` writes.
    fn voice_update_param(&self, voice: VoiceHandle, gen_id: u16) -> Result<()>;

    fn voice_add_mod(&self, voice: VoiceHandle, modulator: &Modulator, overwrite: bool) -> Result<()>;

    fn start_voice(&self, voice: VoiceHandle) -> Result<()>;

    /// Configure a live voice from a fully-resolved generator array,
    /// writing only set-flagged entries. Default implementation just
    /// calls [`SynthDriver::voice_gen_set`] per set entry, in generator-id
    /// order, matching the "configure generators from voice.gen_array
    /// (only set-flagged entries)" step of note-on (§4.8).
    fn configure_voice(&self, voice: VoiceHandle, gen_array: &GeneratorArray) -> Result<()> {
        for (id, value) in gen_array.set_entries() {
            self.voice_gen_set(voice, id.0, value as f32)?;
        }
        Ok(())
    }

    /// Enumerate the driver's dynamic scalar options, e.g. to populate
    /// `ip_synth::config::Config`'s known-option list at startup.
    fn enumerate_options(&self) -> Vec<(String, OptionValue)> {
        Vec::new()
    }
}
