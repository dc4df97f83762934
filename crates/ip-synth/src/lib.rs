//! Voice cache and realtime bridge from the instrument-patch object
//! model to a wavetable driver (C9).
//!
//! [`driver`] is the seam a concrete wavetable engine implements.
//! [`voice_cache`] flattens a cached instrument's zones into playable
//! voices and answers note-on selection / realtime patch queries.
//! [`bridge::Synth`] owns the published item→cache map, per-channel
//! MIDI state, and the property-bus subscription that keeps live
//! voices and caches in sync with the object model. [`config`] is the
//! driver-facing dynamic option surface (reverb/chorus/interpolation).

pub mod bridge;
pub mod config;
pub mod driver;
pub mod error;
pub mod voice_cache;

pub use bridge::Synth;
pub use error::{Error, Result};
