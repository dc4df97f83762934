//! Instrument-patch object model: the item tree, property-change and
//! container-change notification buses, the type-property registry, the
//! generator/modulator/link capability traits, the `Base`/save pipeline,
//! concrete domain items (`File`, `Instrument`, `Preset`, `Sample`,
//! `Zone`, `VBank`), the paste/conflict engine, and a partial undo stack.
//!
//! Every item is a trait object behind [`item::ItemRef`]. Concrete types
//! implement [`item::Item`] and optionally one or more capability traits
//! (`container::Container`, `generator::GeneratorItem`,
//! `modulator::ModulatorItem`, `link::LinkItem`) rather than inheriting
//! from a base class — there is no class hierarchy to inherit from, only
//! a set of orthogonal behaviors a given type opts into.

pub mod base;
pub mod container;
pub mod container_bus;
pub mod domain;
pub mod error;
pub mod flags;
pub mod generator;
pub mod item;
pub mod iter;
pub mod link;
pub mod modulator;
pub mod paste;
pub mod prop_bus;
pub mod pspec;
pub mod state;
pub mod type_registry;

pub use error::{Error, Result};
pub use item::{Item, ItemRef, WeakItemRef};
