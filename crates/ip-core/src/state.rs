//! State/undo skeleton (C10, partial).
//!
//! Grounded on `IpatchState`/`IpatchStateGroup`: a recorded action is a
//! [`StateItem`] stored in a tree whose root is the empty state and
//! whose path-to-current is the live history. Actions belong to at most
//! one [`StateGroup`]; groups nest per-thread. Per spec §9's open
//! question, the redo-apply path in the original source is stubbed —
//! this carries that forward: undo is fully implemented, redo is a
//! flagged `NotImplemented` stub.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::item::ItemRef;

/// One recorded undo-able action: the item it applies to, plus the
/// inverse data needed to restore the item's prior state.
pub struct StateItem {
    pub item: ItemRef,
    pub group: Option<Arc<StateGroup>>,
    inverse: RwLock<Option<Box<dyn Fn(&ItemRef) + Send + Sync>>>,
}

impl StateItem {
    pub fn new(item: ItemRef, group: Option<Arc<StateGroup>>, inverse: Box<dyn Fn(&ItemRef) + Send + Sync>) -> Self {
        Self {
            item,
            group,
            inverse: RwLock::new(Some(inverse)),
        }
    }

    /// Run this action's inverse against its item, synthesizing the
    /// redo counter-action via replacing the stored inverse with the
    /// state it just restored from (a no-op placeholder here, since
    /// redo-apply is not implemented — see [`State::redo`]).
    fn restore(&self) {
        if let Some(f) = self.inverse.read().as_ref() {
            f(&self.item);
        }
    }
}

/// A named, nestable grouping of [`StateItem`]s. Retracting a group
/// undoes every action recorded under it and marks the group retracted.
pub struct StateGroup {
    pub name: String,
    retracted: RwLock<bool>,
}

impl StateGroup {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            retracted: RwLock::new(false),
        })
    }

    pub fn is_retracted(&self) -> bool {
        *self.retracted.read()
    }

    fn mark_retracted(&self) {
        *self.retracted.write() = true;
    }
}

thread_local! {
    static ACTIVE_GROUP: RefCell<Vec<Arc<StateGroup>>> = const { RefCell::new(Vec::new()) };
}

/// Push `group` as this thread's active group for the duration of `f`.
pub fn with_active_group<R>(group: Arc<StateGroup>, f: impl FnOnce() -> R) -> R {
    ACTIVE_GROUP.with(|g| g.borrow_mut().push(group));
    let result = f();
    ACTIVE_GROUP.with(|g| {
        g.borrow_mut().pop();
    });
    result
}

fn active_group() -> Option<Arc<StateGroup>> {
    ACTIVE_GROUP.with(|g| g.borrow().last().cloned())
}

/// `depend(a, b)`: does undoing/removing `a` require also undoing `b`
/// first? Subtype-defined; the default (no dependency) is conservative
/// but correct — over-approximating dependents only means undo touches
/// slightly more than strictly necessary, never too little.
pub trait Dependency {
    fn depend(&self, other: &ItemRef) -> bool {
        let _ = other;
        false
    }
}

/// A linear undo history: root is the implicit empty state, the path to
/// the current position is the live sequence of recorded actions.
#[derive(Default)]
pub struct State {
    history: RwLock<Vec<Arc<StateItem>>>,
    position: RwLock<usize>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an action against `item` under the thread's active group
    /// (if any), truncating any redo tail past the current position —
    /// recording after undoing discards the alternate future.
    pub fn record_item(&self, item: ItemRef, inverse: Box<dyn Fn(&ItemRef) + Send + Sync>) {
        let action = Arc::new(StateItem::new(item, active_group(), inverse));
        let mut history = self.history.write();
        let pos = *self.position.read();
        history.truncate(pos);
        history.push(action);
        *self.position.write() = history.len();
    }

    /// Undo `items`: mark every entry transitively dependent on one of
    /// `items` (per [`Dependency::depend`]), move the position pointer
    /// back past all of them, and invoke `restore` on each in reverse
    /// recorded order.
    pub fn undo(&self, items: &[ItemRef], depend: &dyn Fn(&ItemRef, &ItemRef) -> bool) -> Result<usize> {
        let history = self.history.read();
        let pos = *self.position.read();
        if pos == 0 {
            return Ok(0);
        }

        let mut to_undo: Vec<usize> = Vec::new();
        for (idx, action) in history[..pos].iter().enumerate().rev() {
            let matches_target = items.iter().any(|i| crate::item::item_id(i) == crate::item::item_id(&action.item));
            let depends_on_undone = to_undo
                .iter()
                .any(|&later_idx| depend(&history[later_idx].item, &action.item));
            if matches_target || depends_on_undone {
                to_undo.push(idx);
            }
        }
        to_undo.sort_unstable_by(|a, b| b.cmp(a));

        for &idx in &to_undo {
            history[idx].restore();
        }

        let new_pos = to_undo.iter().copied().min().unwrap_or(pos);
        drop(history);
        *self.position.write() = new_pos;
        Ok(to_undo.len())
    }

    /// Retract `group`: undo every action recorded under it and mark it
    /// retracted.
    pub fn retract_group(&self, group: &Arc<StateGroup>) -> Result<usize> {
        let history = self.history.read();
        let pos = *self.position.read();
        let items: Vec<ItemRef> = history[..pos]
            .iter()
            .filter(|a| a.group.as_ref().map(|g| Arc::ptr_eq(g, group)).unwrap_or(false))
            .map(|a| a.item.clone())
            .collect();
        drop(history);
        let count = self.undo(&items, &|_, _| false)?;
        group.mark_retracted();
        Ok(count)
    }

    /// Redo is not implemented — see spec §9's open question: the
    /// original source's redo-apply path is itself stubbed. A future
    /// implementation would synthesize each undone action's inverse
    /// (the "REDO counter-item") at undo time and replay it here.
    pub fn redo(&self, _count: usize) -> Result<()> {
        Err(Error::NotImplemented("state redo".into()))
    }

    pub fn position(&self) -> usize {
        *self.position.read()
    }

    pub fn len(&self) -> usize {
        self.history.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Preset;

    #[test]
    fn undo_restores_prior_value() {
        let preset = Preset::new_ref(0, 5);
        let state = State::new();

        state.record_item(
            preset.clone(),
            Box::new(|item| {
                if let Some(p) = item.as_any().downcast_ref::<Preset>() {
                    p.set_bank_program(0, 5);
                }
            }),
        );
        preset.as_any().downcast_ref::<Preset>().unwrap().set_bank_program(0, 7);

        let undone = state.undo(&[preset.clone()], &|_, _| false).unwrap();
        assert_eq!(undone, 1);
        assert_eq!(preset.as_any().downcast_ref::<Preset>().unwrap().program(), 5);
    }

    #[test]
    fn recording_after_undo_truncates_redo_tail() {
        let preset = Preset::new_ref(0, 5);
        let state = State::new();
        state.record_item(preset.clone(), Box::new(|_| {}));
        state.record_item(preset.clone(), Box::new(|_| {}));
        state.undo(&[preset.clone()], &|_, _| false).unwrap();
        assert_eq!(state.position(), 1);

        state.record_item(preset.clone(), Box::new(|_| {}));
        assert_eq!(state.len(), 2);
        assert_eq!(state.position(), 2);
    }

    #[test]
    fn retract_group_undoes_its_actions_and_marks_retracted() {
        let preset = Preset::new_ref(0, 5);
        let state = State::new();
        let group = StateGroup::new("paste");

        with_active_group(group.clone(), || {
            state.record_item(preset.clone(), Box::new(|_| {}));
        });

        let count = state.retract_group(&group).unwrap();
        assert_eq!(count, 1);
        assert!(group.is_retracted());
    }

    #[test]
    fn redo_is_not_implemented() {
        let state = State::new();
        assert!(matches!(state.redo(1), Err(Error::NotImplemented(_))));
    }
}
