//! Merge-by-identifier for client-side lists

use crate::models::{Keyed, Message};

/// What `upsert_by_id` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// New entry at this index.
    Inserted(usize),
    /// Existing entry at this index was merged.
    Updated(usize),
}

impl Upsert {
    pub fn is_insert(&self) -> bool {
        matches!(self, Upsert::Inserted(_))
    }
}

/// Merge `incoming` into the entry with the same key, or insert it.
///
/// `merge` folds the newer copy into the existing entry. `place` picks the
/// insertion index for a new entry; it is clamped to the list length.
pub fn upsert_by_id<T, M, P>(items: &mut Vec<T>, incoming: T, merge: M, place: P) -> Upsert
where
    T: Keyed,
    M: FnOnce(&mut T, T),
    P: FnOnce(&[T], &T) -> usize,
{
    if let Some(idx) = items.iter().position(|it| it.key() == incoming.key()) {
        merge(&mut items[idx], incoming);
        return Upsert::Updated(idx);
    }
    let idx = place(items, &incoming).min(items.len());
    items.insert(idx, incoming);
    Upsert::Inserted(idx)
}

pub fn at_front<T>(_: &[T], _: &T) -> usize {
    0
}

pub fn at_back<T>(items: &[T], _: &T) -> usize {
    items.len()
}

/// Keep messages ordered by creation time; equal stamps keep arrival order.
pub fn by_created_at(items: &[Message], incoming: &Message) -> usize {
    items.partition_point(|m| m.created_at <= incoming.created_at)
}
