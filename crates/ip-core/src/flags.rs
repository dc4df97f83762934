//! Item flag bitset.
//!
//! Mirrors `IpatchItemFlags` from the original object model: a small set of
//! reserved bits tracked with atomic ops so flag reads never need the item's
//! lock, plus a shift point subtypes can build their own bits on top of.

use std::sync::atomic::{AtomicU32, Ordering};

/// Notification hooks are active for this subtree.
pub const HOOKS_ACTIVE: u32 = 1 << 0;
/// This item allocated its own lock rather than aliasing its parent's.
pub const OWNS_LOCK: u32 = 1 << 1;

/// First bit available to subtypes for their own flags.
pub const SUBTYPE_FLAG_SHIFT: u32 = 4;

/// Atomic bitset backing [`crate::item::ItemHeader::flags`].
#[derive(Debug, Default)]
pub struct Flags(AtomicU32);

impl Flags {
    pub fn new(initial: u32) -> Self {
        Self(AtomicU32::new(initial))
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    pub fn has(&self, bits: u32) -> bool {
        self.get() & bits == bits
    }

    pub fn any(&self, bits: u32) -> bool {
        self.get() & bits != 0
    }

    pub fn set(&self, bits: u32) {
        self.0.fetch_or(bits, Ordering::AcqRel);
    }

    pub fn clear(&self, bits: u32) {
        self.0.fetch_and(!bits, Ordering::AcqRel);
    }

    pub fn assign(&self, bits: u32, on: bool) {
        if on {
            self.set(bits);
        } else {
            self.clear(bits);
        }
    }
}

impl Clone for Flags {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}
