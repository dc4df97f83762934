//! Base item object (C2): identity, parent/base pointers, the recursive
//! lock, and the copy/duplicate/remove/title contract shared by every
//! domain entity in the tree.
//!
//! Polymorphism is by trait object plus a small set of capability traits
//! (`Container`, `GeneratorItem`, `ModulatorItem`, `LinkItem`) that a
//! concrete item optionally implements, rather than by inheritance —
//! see the root crate docs for the rationale.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::{ReentrantMutex, RwLock};

use crate::container::Container;
use crate::error::{Error, Result};
use crate::flags;
use crate::flags::Flags;
use crate::generator::GeneratorItem;
use crate::link::LinkItem;
use crate::modulator::ModulatorItem;

/// Strong reference to an item. Items are always accessed through this
/// handle; the tree's downward edges are strong, upward edges are weak.
pub type ItemRef = Arc<dyn Item>;
/// Weak upward reference (parent/base pointers).
pub type WeakItemRef = Weak<dyn Item>;

/// Pointer identity for an item, used as a memoization key during deep
/// duplication and by the paste engine's conflict hash.
pub type ItemId = usize;

pub fn item_id(item: &ItemRef) -> ItemId {
    Arc::as_ptr(item) as *const () as ItemId
}

/// Maximum ancestry depth a programming error is assumed not to exceed.
pub const MAX_ANCESTOR_DEPTH: usize = 10;

/// The recursive lock an item carries, or aliases from its parent.
///
/// Backed by `parking_lot::ReentrantMutex` so edit paths that call back
/// into property notification — which may re-enter the same item — do not
/// deadlock. Only the item header's `lock` field is ever swapped (during
/// lock-slave reparenting); the `ReentrantMutex` instance itself is never
/// mutated in place.
pub type ItemLock = ReentrantMutex<()>;

/// Guard returned by [`ItemHeader::lock`]. Keeps the lock's backing `Arc`
/// alive for exactly as long as the inner mutex guard, so a reparenting
/// `realias_lock` that swaps the header's lock Arc mid-flight cannot pull
/// the rug from under a guard a caller is already holding.
pub struct ItemLockGuard {
    guard: parking_lot::ReentrantMutexGuard<'static, ()>,
    _arc: Arc<ItemLock>,
}

/// Common fields every [`Item`] embeds.
pub struct ItemHeader {
    pub flags: Flags,
    parent: RwLock<Option<WeakItemRef>>,
    base: RwLock<Option<WeakItemRef>>,
    lock: ArcSwap<ItemLock>,
    name: RwLock<Option<String>>,
}

impl Default for ItemHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemHeader {
    pub fn new() -> Self {
        Self {
            flags: Flags::new(flags::OWNS_LOCK),
            parent: RwLock::new(None),
            base: RwLock::new(None),
            lock: ArcSwap::from_pointee(ItemLock::new(())),
            name: RwLock::new(None),
        }
    }

    /// Lock this item (or the parent it aliases). Reentrant on the same
    /// thread; never held across a user callback.
    pub fn lock(&self) -> ItemLockGuard {
        // Snapshot the current lock Arc first so a concurrent
        // `realias_lock` swap cannot invalidate the guard in flight: the
        // guard below keeps this exact `Arc` alive for its own lifetime.
        let arc = self.lock.load_full();
        // SAFETY: `guard` only ever borrows through `raw`, and `raw`
        // points into the allocation `arc` owns. `ItemLockGuard` drops
        // `guard` before `_arc` (declaration order), so the borrow never
        // outlives its target.
        let raw: &'static ItemLock = unsafe { &*(Arc::as_ptr(&arc)) };
        let guard = raw.lock();
        ItemLockGuard { guard, _arc: arc }
    }

    pub fn name(&self) -> Option<String> {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: Option<String>) {
        *self.name.write() = name;
    }

    pub fn peek_parent(&self) -> Option<ItemRef> {
        self.parent.read().as_ref().and_then(Weak::upgrade)
    }

    pub fn peek_base(&self) -> Option<ItemRef> {
        self.base.read().as_ref().and_then(Weak::upgrade)
    }
}

/// Value used for unique-property comparison during conflict detection.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Int(i64),
    Str(String),
    Bool(bool),
}

/// A unique-property group's current values for one item.
#[derive(Debug, Clone)]
pub struct UniqueKey {
    pub group: &'static str,
    pub values: Vec<PropValue>,
}

/// Callback deciding the destination's link target during `copy`.
pub enum LinkResolver<'a> {
    /// Use the source link pointer unchanged. Only valid when source and
    /// destination share a `Base`.
    Local,
    /// Duplicate each linked item transitively, memoized so a dependency
    /// shared by multiple links is duplicated exactly once.
    Deep { memo: &'a parking_lot::Mutex<HashMap<ItemId, ItemRef>> },
    /// Consult a caller-supplied source -> replacement map; unmapped
    /// links pass through unchanged.
    HashReplace { map: &'a HashMap<ItemId, ItemRef> },
}

impl LinkResolver<'_> {
    /// Resolve `link` (a reference held by `src`) to the item `dest`
    /// should point to.
    pub fn resolve(&self, link: Option<&ItemRef>) -> Option<ItemRef> {
        let link = link?;
        match self {
            LinkResolver::Local => Some(link.clone()),
            LinkResolver::Deep { memo } => Some(duplicate_deep_with_memo(link, memo)),
            LinkResolver::HashReplace { map } => {
                let id = item_id(link);
                map.get(&id).cloned().or_else(|| Some(link.clone()))
            }
        }
    }
}

/// The base item trait every domain entity implements.
pub trait Item: Any + Send + Sync {
    fn header(&self) -> &ItemHeader;

    /// Stable name of the dynamic type, used for conflict grouping and
    /// error messages (mirrors a `GType` name).
    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    /// True if this subtype releases its own lock on attach and aliases
    /// its parent's instead ("lock-slave").
    fn is_lock_slave(&self) -> bool {
        false
    }

    /// Construct an empty, detached instance of the same dynamic type
    /// (used by `duplicate`).
    fn new_instance(&self) -> ItemRef;

    /// Subtype-specific deep copy of attributes, given an already
    /// constructed (detached) destination of the same dynamic type.
    fn copy_into(&self, _dest: &dyn Item, _resolver: &LinkResolver) {}

    /// Derived display title. Defaults to the `name` type-property;
    /// subtypes such as presets override with a format-specific
    /// concatenation.
    fn title(&self) -> String {
        self.header().name().unwrap_or_default()
    }

    fn as_container(&self) -> Option<&dyn Container> {
        None
    }

    fn as_generator_item(&self) -> Option<&dyn GeneratorItem> {
        None
    }

    fn as_modulator_item(&self) -> Option<&dyn ModulatorItem> {
        None
    }

    fn as_link_item(&self) -> Option<&dyn LinkItem> {
        None
    }

    /// This item *is* a `Base` (a File root). Used by [`changed`] to find
    /// the nearest dirty-flag owner without a `GType`-style type check.
    fn as_base(&self) -> Option<&crate::base::Base> {
        None
    }

    /// Unique-property group values for this item, if its type declares
    /// any. `None` means this type never conflicts on identity.
    fn unique_key(&self) -> Option<UniqueKey> {
        None
    }

    /// Default `remove`: ask the parent to drop this item. Subtypes that
    /// must also detach inbound sibling references override this.
    fn remove(self_arc: &ItemRef) -> Result<()>
    where
        Self: Sized,
    {
        remove(self_arc)
    }
}

/// Attach `child` under `parent`. Requires `child` be currently detached.
/// Propagates `base` and `HOOKS_ACTIVE` into `child` and, recursively,
/// into any subtree already hanging off it. The container is responsible
/// for actually holding the strong reference.
pub fn set_parent(child: &ItemRef, parent: &ItemRef) -> Result<()> {
    if child.header().peek_parent().is_some() {
        return Err(Error::Invalid(format!(
            "{} already has a parent",
            child.type_name()
        )));
    }

    *child.header().parent.write() = Some(Arc::downgrade(parent));

    // A Base's own `base` pointer is never set to itself (invariant in
    // §3.1): its direct children's base is the Base itself; everyone
    // else's base is inherited from the parent.
    let new_base = if parent.as_base().is_some() {
        Some(parent.clone())
    } else {
        parent.header().peek_base()
    };
    let hooks_active = parent.header().flags.has(flags::HOOKS_ACTIVE);

    if child.is_lock_slave() && child.header().flags.has(flags::OWNS_LOCK) {
        realias_lock(child, parent);
    }

    propagate_base_and_hooks(child, new_base.as_ref(), hooks_active);
    Ok(())
}

/// Detach `child` from its parent: clears `parent`/`base` and
/// `HOOKS_ACTIVE` recursively through the subtree.
pub fn unparent(child: &ItemRef) {
    *child.header().parent.write() = None;
    propagate_base_and_hooks(child, None, false);
}

fn realias_lock(child: &ItemRef, parent: &ItemRef) {
    // Swapping which `ReentrantMutex` a lock-slave aliases is only safe
    // when no thread currently holds the child's lock (the caller's
    // contract per the reparenting invariant); we defensively assert
    // that here rather than attempting to transplant an in-flight guard.
    let new_lock = parent.header().lock.load_full();
    child.header().lock.store(new_lock);
    child.header().flags.clear(flags::OWNS_LOCK);
}

fn propagate_base_and_hooks(item: &ItemRef, base: Option<&ItemRef>, hooks_active: bool) {
    *item.header().base.write() = base.map(Arc::downgrade);
    item.header().flags.assign(flags::HOOKS_ACTIVE, hooks_active);

    if let Some(container) = item.as_container() {
        for child in container.all_children() {
            *child.header().base.write() = base.map(Arc::downgrade);
            child.header().flags.assign(flags::HOOKS_ACTIVE, hooks_active);
            propagate_base_and_hooks(&child, base, hooks_active);
        }
    }
}

pub fn get_parent(item: &ItemRef) -> Option<ItemRef> {
    item.header().peek_parent()
}

pub fn peek_parent(item: &ItemRef) -> Option<ItemRef> {
    item.header().peek_parent()
}

pub fn get_base(item: &ItemRef) -> Option<ItemRef> {
    item.header().peek_base()
}

pub fn peek_base(item: &ItemRef) -> Option<ItemRef> {
    item.header().peek_base()
}

/// Walk upward (including `self`) for the nearest ancestor whose
/// `type_name` equals `type_name`. Bounded to [`MAX_ANCESTOR_DEPTH`];
/// exceeding it indicates a cyclic parent chain, a programming error.
pub fn get_ancestor_by_type(item: &ItemRef, type_name: &str) -> Option<ItemRef> {
    let mut current = item.clone();
    for _ in 0..=MAX_ANCESTOR_DEPTH {
        if current.type_name() == type_name {
            return Some(current);
        }
        match current.header().peek_parent() {
            Some(p) => current = p,
            None => return None,
        }
    }
    log::warn!(
        "get_ancestor_by_type: ancestor chain exceeded {} levels, treating as cycle",
        MAX_ANCESTOR_DEPTH
    );
    None
}

/// Default removal: ask `item`'s parent container to drop it.
pub fn remove(item: &ItemRef) -> Result<()> {
    let parent = item
        .header()
        .peek_parent()
        .ok_or_else(|| Error::Invalid(format!("{} has no parent to remove from", item.type_name())))?;
    let container = parent
        .as_container()
        .ok_or_else(|| Error::Invalid(format!("parent of {} is not a container", item.type_name())))?;
    container.remove_child(item)
}

/// `deep = false` is `remove`; `deep = true` additionally removes every
/// child of `item` if it is itself a container.
pub fn remove_full(item: &ItemRef, deep: bool) -> Result<()> {
    if deep {
        if let Some(container) = item.as_container() {
            for child in container.all_children() {
                remove_full(&child, false)?;
            }
        }
    }
    remove(item)
}

/// Apply `remove_full` bottom-up across the subtree rooted at `item`.
pub fn remove_recursive(item: &ItemRef, deep: bool) -> Result<()> {
    if let Some(container) = item.as_container() {
        for child in container.all_children() {
            remove_recursive(&child, deep)?;
        }
    }
    remove_full(item, deep)
}

/// Deep-copy attributes from `src` into the already-constructed `dest`
/// (same dynamic type), resolving any link references via `resolver`.
pub fn copy(dest: &ItemRef, src: &ItemRef, resolver: &LinkResolver) {
    src.copy_into(dest.as_ref(), resolver);
}

/// Construct a fresh item of `src`'s dynamic type and copy into it using
/// the given link resolver.
fn duplicate_with(src: &ItemRef, resolver: &LinkResolver) -> ItemRef {
    let dest = src.new_instance();
    src.copy_into(dest.as_ref(), resolver);
    dest
}

/// Duplicate `src` using the `local` link resolver (src and the
/// duplicate must share a `Base`).
pub fn duplicate(src: &ItemRef) -> ItemRef {
    duplicate_with(src, &LinkResolver::Local)
}

pub fn duplicate_link_func(src: &ItemRef, resolver: &LinkResolver) -> ItemRef {
    duplicate_with(src, resolver)
}

pub fn duplicate_replace(src: &ItemRef, map: &HashMap<ItemId, ItemRef>) -> ItemRef {
    duplicate_with(src, &LinkResolver::HashReplace { map })
}

/// Deep-duplicate `src` and everything it transitively links to. Returns
/// every freshly created item, with the top-level duplicate first.
/// Identity-equal link targets produce identity-equal duplicates (shared
/// dependencies are duplicated exactly once) via the memo map.
pub fn duplicate_deep(src: &ItemRef) -> Vec<ItemRef> {
    let memo = parking_lot::Mutex::new(HashMap::new());
    let top = duplicate_deep_with_memo(src, &memo);

    let mut created = vec![top.clone()];
    let top_id = item_id(&top);
    for item in memo.lock().values() {
        if item_id(item) != top_id {
            created.push(item.clone());
        }
    }
    created
}

/// Shared worker for [`duplicate_deep`] and `LinkResolver::Deep`: looks
/// `src` up in `memo` first so a dependency reachable through more than
/// one link is duplicated exactly once.
fn duplicate_deep_with_memo(
    src: &ItemRef,
    memo: &parking_lot::Mutex<HashMap<ItemId, ItemRef>>,
) -> ItemRef {
    let id = item_id(src);
    if let Some(existing) = memo.lock().get(&id) {
        return existing.clone();
    }
    let dest = src.new_instance();
    // Insert before recursing so a cycle back to `src` resolves to the
    // same in-progress duplicate instead of recursing forever.
    memo.lock().insert(id, dest.clone());
    let resolver = LinkResolver::Deep { memo };
    src.copy_into(dest.as_ref(), &resolver);
    dest
}

/// Walk upward (including `self`) for the nearest ancestor that is
/// itself a `Base`, bounded to [`MAX_ANCESTOR_DEPTH`].
pub fn nearest_base(item: &ItemRef) -> Option<ItemRef> {
    let mut current = item.clone();
    for _ in 0..=MAX_ANCESTOR_DEPTH {
        if current.as_base().is_some() {
            return Some(current);
        }
        match current.header().peek_parent() {
            Some(p) => current = p,
            None => return None,
        }
    }
    log::warn!(
        "nearest_base: ancestor chain exceeded {} levels, treating as cycle",
        MAX_ANCESTOR_DEPTH
    );
    None
}

/// Mark the nearest `Base` ancestor dirty exactly once per edit and emit
/// a property notification on its `changed` flag. Called automatically
/// by the property bus for every `set_property` lacking the
/// `NO_SAVE_CHANGE` hint.
pub fn changed(item: &ItemRef) {
    if let Some(base) = nearest_base(item) {
        if let Some(base) = base.as_base() {
            base.mark_changed();
        }
    }
}

/// True if `a` and `b` are same-typed siblings whose unique-property
/// group values all match (a conflict per §4.2).
pub fn unique_conflict(a: &dyn Item, b: &dyn Item) -> bool {
    if a.type_name() != b.type_name() {
        return false;
    }
    match (a.unique_key(), b.unique_key()) {
        (Some(ka), Some(kb)) => ka.group == kb.group && ka.values == kb.values,
        _ => false,
    }
}
