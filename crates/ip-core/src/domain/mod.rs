//! Domain item hierarchy (C6): the concrete item types that make up an
//! instrument patch tree. Each type embeds an [`crate::item::ItemHeader`]
//! and implements [`crate::item::Item`] plus whichever capability traits
//! (`Container`, `GeneratorItem`, `ModulatorItem`, `LinkItem`) its role
//! requires, per the polymorphism-by-capability design in spec §9.

mod file;
mod instrument;
mod preset;
mod sample;
mod vbank;
mod zone;

pub use file::File;
pub use instrument::Instrument;
pub use preset::Preset;
pub use sample::Sample;
pub use vbank::VBank;
pub use zone::{Zone, ZoneKind};
