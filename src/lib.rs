//! # instpatch
//!
//! Umbrella crate coordinating the instrument-patch object model and its
//! realtime voice-cache bridge.
//!
//! ## Architecture
//!
//! - **ip-core** — the item tree, property-change and container-change
//!   notification buses, the type-property registry, generator/
//!   modulator/link capability traits, the `Base`/save pipeline, the
//!   concrete domain items (`File`, `Instrument`, `Preset`, `Sample`,
//!   `Zone`, `VBank`), the paste/conflict engine, and the partial undo
//!   stack.
//! - **ip-synth** — flattens a cached instrument into playable voices
//!   and bridges MIDI input and live property changes to a
//!   [`ip_synth::driver::SynthDriver`] implementation.
//!
//! ```ignore
//! use instpatch::prelude::*;
//!
//! let file = File::new_ref();
//! let instrument = Instrument::new_ref();
//! file.as_container().unwrap().insert_child(&file, instrument.clone(), container::APPEND)?;
//!
//! let synth = Synth::new(my_driver);
//! synth.load_patch(file);
//! synth.set_active_item(Some(instrument))?;
//! synth.note_on(0, 60, 100)?;
//! ```

/// Re-export of ip-core for direct access to the full object model.
pub use ip_core as core;
/// Re-export of ip-synth for direct access to the voice cache and bridge.
pub use ip_synth as synth;

pub use ip_core::{
    base, container, container_bus, domain, flags, generator, item, iter, link, modulator, paste, prop_bus, pspec,
    state, type_registry,
};
pub use ip_core::{Error, Result};
pub use ip_core::{Item, ItemRef, WeakItemRef};

pub use ip_synth::Synth;

/// Convenience re-export of the commonly used item types and traits, for
/// `use instpatch::prelude::*;`.
pub mod prelude {
    pub use crate::domain::{File, Instrument, Preset, Sample, VBank, Zone, ZoneKind};
    pub use crate::item::{Item, ItemRef, WeakItemRef};
    pub use crate::{container, Error, Result, Synth};
}
