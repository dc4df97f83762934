//! Uniform cursor over container child-slot storage (C1).
//!
//! A [`Cursor`] hides whether the underlying sequence is a linked list or a
//! fixed-size array behind one small, bounded API: `first`/`last`/`next`,
//! positional `index`/`get`, and `insert`/`remove_current` for the mutable
//! backends. Iterators do not own the sequence they walk and are not
//! thread-safe — callers either hold the owning container's lock or
//! guarantee single-threaded access for the cursor's lifetime.

use crate::error::{Error, Result};

/// Backing storage a [`Cursor`] can walk.
///
/// `Array` is fixed-size: `insert`/`remove` on it always fail with
/// [`Error::Unsupported`]. `Linked` models both the singly- and
/// doubly-linked list cases from the original design — callers observe
/// identical cursor behavior regardless of which one backs a given
/// container; only removal cost differs internally.
#[derive(Debug, Clone)]
pub enum Storage<T> {
    Linked(Vec<T>),
    Array(Vec<T>),
}

impl<T> Storage<T> {
    fn as_slice(&self) -> &[T] {
        match self {
            Storage::Linked(v) | Storage::Array(v) => v,
        }
    }

    fn supports_mutation(&self) -> bool {
        matches!(self, Storage::Linked(_))
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cursor position: `Some(i)` is a valid in-range index, `None` is off-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position(Option<usize>);

/// A cursor over a [`Storage<T>`] borrowed for the cursor's lifetime.
pub struct Cursor<'a, T> {
    storage: &'a mut Storage<T>,
    pos: Position,
}

impl<'a, T> Cursor<'a, T> {
    pub fn new(storage: &'a mut Storage<T>) -> Self {
        Self {
            storage,
            pos: Position(None),
        }
    }

    pub fn count(&self) -> usize {
        self.storage.len()
    }

    /// Move to the first element. Returns `None` if the sequence is empty.
    pub fn first(&mut self) -> Option<&T> {
        if self.storage.is_empty() {
            self.pos = Position(None);
            return None;
        }
        self.pos = Position(Some(0));
        self.storage.as_slice().first()
    }

    /// Move to the last element. Returns `None` if the sequence is empty.
    pub fn last(&mut self) -> Option<&T> {
        let len = self.storage.len();
        if len == 0 {
            self.pos = Position(None);
            return None;
        }
        self.pos = Position(Some(len - 1));
        self.storage.as_slice().last()
    }

    /// Advance one position. Returns `None` and leaves the cursor off-end
    /// once the end of the sequence is passed.
    pub fn next(&mut self) -> Option<&T> {
        let next_idx = match self.pos.0 {
            None => 0,
            Some(i) => i + 1,
        };
        if next_idx >= self.storage.len() {
            self.pos = Position(None);
            return None;
        }
        self.pos = Position(Some(next_idx));
        self.storage.as_slice().get(next_idx)
    }

    /// Jump to absolute position `i`. Negative-equivalent or out-of-range
    /// indices leave the cursor off-end and return `None`, matching the
    /// boundary rule: `i < 0 || i >= count` never panics.
    pub fn index(&mut self, i: i64) -> Option<&T> {
        if i < 0 || i as usize >= self.storage.len() {
            self.pos = Position(None);
            return None;
        }
        self.pos = Position(Some(i as usize));
        self.storage.as_slice().get(i as usize)
    }

    /// Current element, or `None` if the cursor is off-end.
    pub fn get(&self) -> Option<&T> {
        self.pos.0.and_then(|i| self.storage.as_slice().get(i))
    }

    /// Insert `item` at the cursor's current position (array backends
    /// always fail). `pos = 0` prepends; a cursor left off-end appends.
    pub fn insert(&mut self, item: T) -> Result<()> {
        if !self.storage.supports_mutation() {
            return Err(Error::Unsupported(
                "insert is not supported on fixed-size array storage".into(),
            ));
        }
        let Storage::Linked(v) = self.storage else {
            unreachable!()
        };
        let at = self.pos.0.unwrap_or(v.len());
        let at = at.min(v.len());
        v.insert(at, item);
        self.pos = Position(Some(at));
        Ok(())
    }

    /// Remove the element at the cursor's current position, leaving the
    /// cursor off-end. Fails on array storage or if off-end already.
    pub fn remove_current(&mut self) -> Result<T> {
        if !self.storage.supports_mutation() {
            return Err(Error::Unsupported(
                "remove is not supported on fixed-size array storage".into(),
            ));
        }
        let Some(at) = self.pos.0 else {
            return Err(Error::Invalid("cursor is off-end".into()));
        };
        let Storage::Linked(v) = self.storage else {
            unreachable!()
        };
        let item = v.remove(at);
        self.pos = Position(None);
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_out_of_range_is_off_end() {
        let mut s = Storage::Linked(vec![1, 2, 3]);
        let mut c = Cursor::new(&mut s);
        assert_eq!(c.index(-1), None);
        assert_eq!(c.get(), None);
        assert_eq!(c.index(3), None);
        assert_eq!(c.get(), None);
        assert_eq!(c.index(1), Some(&2));
    }

    #[test]
    fn first_last_next() {
        let mut s = Storage::Linked(vec![10, 20, 30]);
        let mut c = Cursor::new(&mut s);
        assert_eq!(c.first(), Some(&10));
        assert_eq!(c.next(), Some(&20));
        assert_eq!(c.next(), Some(&30));
        assert_eq!(c.next(), None);
        assert_eq!(c.get(), None);
        assert_eq!(c.last(), Some(&30));
    }

    #[test]
    fn insert_and_remove_on_linked() {
        let mut s = Storage::Linked(vec![1, 3]);
        let mut c = Cursor::new(&mut s);
        c.index(1).unwrap();
        c.insert(2).unwrap();
        assert_eq!(s.as_slice(), &[1, 2, 3]);

        let mut c = Cursor::new(&mut s);
        c.index(0).unwrap();
        let removed = c.remove_current().unwrap();
        assert_eq!(removed, 1);
        assert_eq!(s.as_slice(), &[2, 3]);
        assert_eq!(c.get(), None);
    }

    #[test]
    fn array_storage_rejects_mutation() {
        let mut s = Storage::Array(vec![1, 2]);
        let mut c = Cursor::new(&mut s);
        assert!(matches!(c.insert(3), Err(Error::Unsupported(_))));
        c.index(0).unwrap();
        assert!(matches!(c.remove_current(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn empty_sequence() {
        let mut s: Storage<i32> = Storage::Linked(vec![]);
        let mut c = Cursor::new(&mut s);
        assert_eq!(c.first(), None);
        assert_eq!(c.last(), None);
        assert_eq!(c.count(), 0);
    }
}
