//! Paste/conflict engine (C8): a three-phase transaction — register,
//! resolve, finish — that copies, duplicates, converts, or links items
//! across patch files while detecting and resolving uniqueness
//! conflicts between siblings. Grounded on `IpatchPaste`'s handler
//! registry and deferred-operation bookkeeping.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::container::{Container, APPEND};
use crate::error::{Error, Result};
use crate::item::{self, unique_conflict, ItemId, ItemRef, LinkResolver};

/// Handler priority band, matching §4.7's `LOWEST..HIGHEST` / `DEFAULT`.
pub const PRIORITY_LOWEST: i32 = 1;
pub const PRIORITY_DEFAULT: i32 = 50;
pub const PRIORITY_HIGHEST: i32 = 100;

/// One deferred structural operation recorded during phase 1.
#[derive(Clone)]
enum ScheduledOp {
    Add {
        new_item: ItemRef,
        parent: ItemRef,
        original: Option<ItemRef>,
    },
    Link {
        from: ItemRef,
        to: ItemRef,
    },
}

/// Resolution chosen for one detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    /// Commit the incoming add and let the conflict stand.
    Ignore,
    /// Remove the existing conflicting sibling, then commit.
    Replace,
    /// Drop the incoming scheduled add.
    Keep,
    /// Abort the whole resolve phase; nothing scheduled is committed.
    Cancel,
}

/// A detected conflict between two same-typed siblings under the same
/// prospective parent.
#[derive(Clone)]
pub struct Conflict {
    pub existing: ItemRef,
    pub incoming: ItemRef,
}

/// `test`/`exec` pair consulted in descending priority order during
/// phase 1. `test` returns `true` if this handler claims the
/// `(dest, src)` pair; `exec` then records the operations it wants
/// scheduled by calling back into the session.
pub trait PasteHandler: Send + Sync {
    fn test(&self, dest: &ItemRef, src: &ItemRef) -> bool;
    fn exec(&self, session: &PasteSession, dest: &ItemRef, src: &ItemRef) -> Result<()>;
}

struct RegisteredHandler {
    priority: i32,
    handler: Arc<dyn PasteHandler>,
}

/// Process-wide, priority-ordered paste-handler registry.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<Vec<RegisteredHandler>>,
}

impl HandlerRegistry {
    pub fn register(&self, priority: i32, handler: Arc<dyn PasteHandler>) {
        let mut handlers = self.handlers.write();
        handlers.push(RegisteredHandler { priority, handler });
        handlers.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    fn first_match(&self, dest: &ItemRef, src: &ItemRef) -> Option<Arc<dyn PasteHandler>> {
        self.handlers
            .read()
            .iter()
            .find(|h| h.handler.test(dest, src))
            .map(|h| h.handler.clone())
    }
}

static HANDLER_REGISTRY: once_cell_like::Lazy<HandlerRegistry> =
    once_cell_like::Lazy::new(HandlerRegistry::default);

pub fn handler_registry() -> &'static HandlerRegistry {
    &HANDLER_REGISTRY
}

mod once_cell_like {
    use std::sync::OnceLock;

    pub struct Lazy<T> {
        cell: OnceLock<T>,
        init: fn() -> T,
    }

    impl<T> Lazy<T> {
        pub const fn new(init: fn() -> T) -> Self {
            Self {
                cell: OnceLock::new(),
                init,
            }
        }
    }

    impl<T> std::ops::Deref for Lazy<T> {
        type Target = T;
        fn deref(&self) -> &T {
            self.cell.get_or_init(self.init)
        }
    }
}

/// The default handler: try container child-type match, then link-item
/// compatibility. Registered at [`PRIORITY_DEFAULT`].
pub struct DefaultHandler;

impl PasteHandler for DefaultHandler {
    fn test(&self, dest: &ItemRef, src: &ItemRef) -> bool {
        if let Some(container) = dest.as_container() {
            if container.child_types().contains(&src.type_name())
                || container.virtual_child_types().contains(&src.type_name())
            {
                return true;
            }
        }
        if let Some(link) = dest.as_link_item() {
            return link.link_type() == src.type_name();
        }
        false
    }

    fn exec(&self, session: &PasteSession, dest: &ItemRef, src: &ItemRef) -> Result<()> {
        if let Some(container) = dest.as_container() {
            if container.child_types().contains(&src.type_name())
                || container.virtual_child_types().contains(&src.type_name())
            {
                session.add_duplicate_deep(src, dest);
                return Ok(());
            }
        }
        if dest.as_link_item().is_some() {
            session.link(dest, src);
            return Ok(());
        }
        Err(Error::Unsupported(format!(
            "no paste handler accepts {} into {}",
            src.type_name(),
            dest.type_name()
        )))
    }
}

/// A paste session: the deferred-operation log and shared deep-dup memo
/// for one register/resolve/finish transaction.
pub struct PasteSession {
    ops: Mutex<Vec<ScheduledOp>>,
    choices: Mutex<HashMap<(ItemId, ItemId), Choice>>,
    memo: Mutex<HashMap<ItemId, ItemRef>>,
    memo_scheduled: Mutex<HashSet<ItemId>>,
    added: Mutex<Vec<ItemRef>>,
}

impl Default for PasteSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PasteSession {
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            choices: Mutex::new(HashMap::new()),
            memo: Mutex::new(HashMap::new()),
            memo_scheduled: Mutex::new(HashSet::new()),
            added: Mutex::new(Vec::new()),
        }
    }

    /// Phase 1: consult the handler registry in descending priority
    /// order and run the first match's `exec`.
    pub fn objects(&self, dest: &ItemRef, src: &ItemRef) -> Result<()> {
        let handler = handler_registry()
            .first_match(dest, src)
            .ok_or_else(|| Error::Unsupported(format!("no paste handler for {} -> {}", src.type_name(), dest.type_name())))?;
        handler.exec(self, dest, src)
    }

    /// Schedule `new_item`'s addition under `parent`. `original` links
    /// the pasted item back to the source it derives from, for
    /// dependency tracking by later phase-2 conflict detection.
    pub fn add(&self, new_item: ItemRef, parent: ItemRef, original: Option<ItemRef>) {
        self.ops.lock().push(ScheduledOp::Add {
            new_item,
            parent,
            original,
        });
    }

    /// Schedule `from.link_item = to` at finish time.
    pub fn link(&self, from: &ItemRef, to: &ItemRef) {
        self.ops.lock().push(ScheduledOp::Link {
            from: from.clone(),
            to: to.clone(),
        });
    }

    /// Local duplication shortcut: `src` shares a `Base` with `parent`.
    pub fn add_duplicate(&self, src: &ItemRef, parent: &ItemRef) {
        let dup = item::duplicate(src);
        self.add(dup, parent.clone(), Some(src.clone()));
    }

    /// Cross-Base deep-duplication shortcut. Internal recursion shares
    /// this session's memo so a dependency reachable from more than one
    /// scheduled add is duplicated exactly once across the whole
    /// session, not just within one call. Link dependencies surfaced by
    /// the duplication (e.g. the samples an instrument's zones point
    /// at) are additionally scheduled as children of `parent`'s nearest
    /// `Base`, so they land in the destination file rather than only
    /// existing as an unreachable link target.
    pub fn add_duplicate_deep(&self, src: &ItemRef, parent: &ItemRef) {
        let resolver = LinkResolver::Deep { memo: &self.memo };
        let dup = item::duplicate_link_func(src, &resolver);
        let dup_id = item::item_id(&dup);

        if let Some(base) = item::nearest_base(parent) {
            if let Some(base_container) = base.as_container() {
                let mut scheduled = self.memo_scheduled.lock();
                for dep in self.memo.lock().values() {
                    let dep_id = item::item_id(dep);
                    if dep_id == dup_id || scheduled.contains(&dep_id) {
                        continue;
                    }
                    if base_container.child_types().contains(&dep.type_name()) {
                        scheduled.insert(dep_id);
                        self.add(dep.clone(), base.clone(), None);
                    }
                }
            }
        }

        self.add(dup, parent.clone(), Some(src.clone()));
    }

    /// Invoke a converter to produce outputs from `src`, parenting them
    /// under `parent` and associating each with `src` for dependency
    /// tracking. Converters are a registry lookup out of this crate's
    /// scope (spec §1's format-parser exclusion); callers that need
    /// format conversion during paste provide one via `conv`.
    pub fn add_convert(&self, conv: &dyn Fn(&ItemRef) -> Vec<ItemRef>, src: &ItemRef, parent: &ItemRef) {
        for output in conv(src) {
            self.add(output, parent.clone(), Some(src.clone()));
        }
    }

    /// Phase 2: detect every conflict the scheduled adds would create,
    /// hashing by `(parent, item-type, unique-group values)` — first
    /// scheduled-vs-scheduled, then scheduled-vs-existing-children —
    /// and invoke `resolver` for each. May be called repeatedly; only
    /// the choices recorded by the final call take effect at finish.
    /// Returns `Err(Cancelled)`-equivalent via `Ok(false)` if the
    /// resolver ever returns [`Choice::Cancel`].
    pub fn resolve(&self, resolver: &mut dyn FnMut(&Conflict) -> Choice) -> bool {
        let ops = self.ops.lock();
        let adds: Vec<(ItemRef, ItemRef)> = ops
            .iter()
            .filter_map(|op| match op {
                ScheduledOp::Add { new_item, parent, .. } => Some((new_item.clone(), parent.clone())),
                ScheduledOp::Link { .. } => None,
            })
            .collect();
        drop(ops);

        let mut choices = HashMap::new();

        for i in 0..adds.len() {
            let (incoming, parent) = &adds[i];

            for (existing, existing_parent) in adds[..i].iter() {
                if !Arc::ptr_eq(parent, existing_parent) {
                    continue;
                }
                if unique_conflict(incoming.as_ref(), existing.as_ref()) {
                    let conflict = Conflict {
                        existing: existing.clone(),
                        incoming: incoming.clone(),
                    };
                    let choice = resolver(&conflict);
                    if choice == Choice::Cancel {
                        return false;
                    }
                    choices.insert((item::item_id(existing), item::item_id(incoming)), choice);
                }
            }

            if let Some(container) = parent.as_container() {
                for existing in container.children_of_type(incoming.type_name()) {
                    if unique_conflict(incoming.as_ref(), existing.as_ref()) {
                        let conflict = Conflict {
                            existing: existing.clone(),
                            incoming: incoming.clone(),
                        };
                        let choice = resolver(&conflict);
                        if choice == Choice::Cancel {
                            return false;
                        }
                        choices.insert((item::item_id(&existing), item::item_id(incoming)), choice);
                    }
                }
            }
        }

        *self.choices.lock() = choices;
        true
    }

    /// Phase 3: walk scheduled adds in recorded order, applying the
    /// final choice from phase 2 (default `Ignore` for adds with no
    /// recorded conflict), then walk scheduled links in reverse order.
    pub fn finish(&self) -> Result<()> {
        let ops = self.ops.lock().clone();
        let choices = self.choices.lock().clone();

        for op in &ops {
            if let ScheduledOp::Add { new_item, parent, .. } = op {
                let choice = choices
                    .iter()
                    .find(|((_, incoming), _)| *incoming == item::item_id(new_item))
                    .map(|(_, c)| *c)
                    .unwrap_or(Choice::Ignore);

                match choice {
                    Choice::Keep => continue,
                    Choice::Replace => {
                        if let Some(((existing_id, _), _)) =
                            choices.iter().find(|((_, incoming), _)| *incoming == item::item_id(new_item))
                        {
                            if let Some(container) = parent.as_container() {
                                if let Some(existing) = container
                                    .all_children()
                                    .into_iter()
                                    .find(|c| item::item_id(c) == *existing_id)
                                {
                                    item::remove(&existing)?;
                                }
                            }
                        }
                    }
                    Choice::Ignore => {}
                    Choice::Cancel => unreachable!("Cancel never recorded as a final choice"),
                }

                let container = parent
                    .as_container()
                    .ok_or_else(|| Error::Invalid(format!("{} is not a container", parent.type_name())))?;
                container.insert_child(parent, new_item.clone(), APPEND)?;
                self.added.lock().push(new_item.clone());
            }
        }

        for op in ops.iter().rev() {
            if let ScheduledOp::Link { from, to } = op {
                if let Some(link) = from.as_link_item() {
                    link.set_link_item(Some(to.clone()))?;
                }
            }
        }

        Ok(())
    }

    /// Items actually added by the most recent [`Self::finish`] call.
    pub fn added_items(&self) -> Vec<ItemRef> {
        self.added.lock().clone()
    }
}
