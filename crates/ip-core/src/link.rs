//! Link capability (C6): a stored cross-reference from one item to
//! another sibling under the same `Base` (zone→sample, preset-zone→
//! instrument). Links are strong references but must never be followed
//! across `Base` boundaries without going through `item::copy`'s link
//! resolver.

use crate::error::Result;
use crate::item::ItemRef;

/// Capability for items that carry exactly one named link-item slot
/// (the paste engine's phase 1 `link` op targets this).
pub trait LinkItem: Send + Sync {
    /// The type name this item's link slot accepts.
    fn link_type(&self) -> &'static str;

    fn link_item(&self) -> Option<ItemRef>;

    /// Assign the link target. Fails `Invalid` if `target`'s dynamic
    /// type does not match [`Self::link_type`].
    fn set_link_item(&self, target: Option<ItemRef>) -> Result<()>;
}
