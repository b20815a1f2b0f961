//! Index-addressed arenas backing the syntax tree.
//!
//! Nodes refer to each other through [`Idx`] handles instead of
//! references, so discarding a failed speculative parse is a plain
//! truncation: `checkpoint` saves the current length and `rollback`
//! cuts everything allocated after it. Checkpoints taken inside other
//! checkpoints must be rolled back (or dropped) first; they form a
//! stack.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Range;

use crate::error::{CoreError, CoreResult};

/// Typed handle into an [`Arena`].
pub struct Idx<T> {
    raw: u32,
    _marker: PhantomData<fn() -> T>,
}

/// Largest number of items an arena can address; capacities above it are
/// clamped.
pub const MAX_ARENA_ITEMS: usize = u32::MAX as usize;

impl<T> Idx<T> {
    fn new(raw: usize) -> Self {
        debug_assert!(raw < MAX_ARENA_ITEMS);
        Idx {
            raw: raw as u32,
            _marker: PhantomData,
        }
    }

    pub fn index(self) -> usize {
        self.raw as usize
    }
}

impl<T> Clone for Idx<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Idx<T> {}

impl<T> PartialEq for Idx<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Idx<T> {}

impl<T> Hash for Idx<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for Idx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.raw)
    }
}

/// Saved arena length. Opaque outside this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

#[derive(Debug)]
pub struct Arena<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> Arena<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Arena {
            items: Vec::new(),
            capacity: capacity.min(MAX_ARENA_ITEMS),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stores `value` and returns its handle. Fails once the configured
    /// capacity is used up.
    pub fn alloc(&mut self, value: T) -> CoreResult<Idx<T>> {
        if self.items.len() >= self.capacity {
            return Err(CoreError::limit("expression arena", self.capacity));
        }
        let idx = Idx::new(self.items.len());
        self.items.push(value);
        Ok(idx)
    }

    pub fn get(&self, idx: Idx<T>) -> &T {
        &self.items[idx.index()]
    }

    pub fn get_mut(&mut self, idx: Idx<T>) -> &mut T {
        &mut self.items[idx.index()]
    }

    /// Returns the value at `idx` if it is still live.
    pub fn try_get(&self, idx: Idx<T>) -> Option<&T> {
        self.items.get(idx.index())
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.items.len())
    }

    /// Drops everything allocated since `mark`.
    pub fn rollback(&mut self, mark: Checkpoint) {
        debug_assert!(
            mark.0 <= self.items.len(),
            "rollback to a checkpoint that was already discarded"
        );
        self.items.truncate(mark.0);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Idx<T>, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (Idx::new(i), item))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Idx<T>, &mut T)> {
        self.items
            .iter_mut()
            .enumerate()
            .map(|(i, item)| (Idx::new(i), item))
    }
}

/// Byte range into a [`TextArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextRange {
    pub start: u32,
    pub end: u32,
}

impl TextRange {
    pub fn as_range(self) -> Range<usize> {
        self.start as usize..self.end as usize
    }

    pub fn len(self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(self) -> bool {
        self.start == self.end
    }
}

/// Append-only byte buffer holding decoded string-literal contents.
#[derive(Debug)]
pub struct TextArena {
    text: String,
    capacity: usize,
}

impl TextArena {
    pub fn with_capacity(capacity: usize) -> Self {
        TextArena {
            text: String::new(),
            capacity: capacity.min(MAX_ARENA_ITEMS),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push_str(&mut self, s: &str) -> CoreResult<TextRange> {
        if self.text.len() + s.len() > self.capacity {
            return Err(CoreError::limit("string literal arena", self.capacity));
        }
        let start = self.text.len() as u32;
        self.text.push_str(s);
        Ok(TextRange {
            start,
            end: self.text.len() as u32,
        })
    }

    pub fn get(&self, range: TextRange) -> &str {
        &self.text[range.as_range()]
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.text.len())
    }

    pub fn rollback(&mut self, mark: Checkpoint) {
        debug_assert!(mark.0 <= self.text.len());
        self.text.truncate(mark.0);
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_discards_everything_after_the_mark() {
        let mut arena = Arena::with_capacity(16);
        let kept = arena.alloc("kept").expect("alloc");
        let mark = arena.checkpoint();
        let dropped = arena.alloc("dropped").expect("alloc");
        arena.rollback(mark);

        assert_eq!(arena.len(), 1);
        assert_eq!(*arena.get(kept), "kept");
        assert!(arena.try_get(dropped).is_none());
    }

    #[test]
    fn nested_checkpoints_unwind_in_order() {
        let mut arena = Arena::with_capacity(16);
        arena.alloc(0).expect("alloc");
        let outer = arena.checkpoint();
        arena.alloc(1).expect("alloc");
        let inner = arena.checkpoint();
        arena.alloc(2).expect("alloc");
        arena.rollback(inner);
        assert_eq!(arena.len(), 2);
        arena.rollback(outer);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn handles_are_reused_after_rollback() {
        let mut arena = Arena::with_capacity(4);
        let mark = arena.checkpoint();
        let first = arena.alloc('a').expect("alloc");
        arena.rollback(mark);
        let second = arena.alloc('b').expect("alloc");
        assert_eq!(first, second);
        assert_eq!(*arena.get(second), 'b');
    }

    #[test]
    fn exhausted_arena_is_a_limit_error() {
        let mut arena = Arena::with_capacity(1);
        arena.alloc(()).expect("alloc");
        let err = arena.alloc(()).unwrap_err();
        assert!(matches!(err, CoreError::LimitExceeded { limit: 1, .. }));
    }

    #[test]
    fn capacities_stay_addressable() {
        let arena: Arena<u8> = Arena::with_capacity(usize::MAX);
        assert_eq!(arena.capacity(), MAX_ARENA_ITEMS);
        let text = TextArena::with_capacity(usize::MAX);
        assert_eq!(text.capacity(), MAX_ARENA_ITEMS);
        assert_eq!(Arena::<u8>::with_capacity(8).capacity(), 8);
    }

    #[test]
    fn text_arena_round_trips_and_rolls_back() {
        let mut text = TextArena::with_capacity(64);
        let hello = text.push_str("hello").expect("push");
        let mark = text.checkpoint();
        text.push_str(" world").expect("push");
        text.rollback(mark);
        assert_eq!(text.get(hello), "hello");
        assert_eq!(text.len(), 5);
    }

    #[test]
    fn text_arena_respects_capacity() {
        let mut text = TextArena::with_capacity(4);
        assert!(text.push_str("abcde").is_err());
        assert!(text.is_empty());
    }
}
