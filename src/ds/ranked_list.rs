//! Binary min-heap with stable, externally held item handles.
//!
//! Stores items in a dense `Vec` ordered by the heap property and hands out
//! reference-counted [`Item`] handles that stay valid across every internal
//! swap. A handle can re-enter the structure in O(log n) to change its rank
//! or delete itself, and can answer "am I still resident?" in O(1) without
//! touching the list at all.
//!
//! ## Architecture
//!
//! ```text
//!   slots: Vec<Arc<ItemCore>>          (min-heap order under Rank::before)
//!
//!   index:    0       1       2       3
//!          ┌──────┬───────┬───────┬───────┐
//!          │ e:2  │ g:7   │ f:3   │ h:9   │
//!          └──┬───┴───┬───┴───────┴───────┘
//!             │       │
//!             ▼       ▼
//!        ItemCore { pos: 0, .. }   pos mirrors the slot index; every swap
//!        ItemCore { pos: 1, .. }   rewrites the pos of both moved items
//!
//!   external handle:  Item ──► same ItemCore (pos == usize::MAX ⇒ absent)
//! ```
//!
//! ## Operations
//! - `insert(rank, value)`: push + sift-up, returns a stable handle
//! - `set_rank(item, rank)`: sift-down first, sift-up only if it did not move
//! - `delete(item)`: swap-remove with the tail, re-heapify the moved item
//! - `remove_ordered()`: draining ascending-rank iterator, early exit safe
//! - `first` / `random` / `iter` / `clear` / `len`
//!
//! ## Performance
//! - `insert` / `set_rank` / `delete`: O(log n)
//! - `first` / `random` / `present`: O(1)
//! - `remove_ordered`: O(log n) per yielded item
//!
//! Misusing a handle (structural operations on an absent item, any accessor
//! except `present` on a null handle) is a programming error and panics.
//! `debug_validate_invariants()` is available in debug/test builds.
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use rand::Rng;

use crate::error::InvariantError;
use crate::rank::Rank;

/// Position value marking an item as no longer resident.
///
/// Doubles as a trip-wire: a second structural use of a deleted handle fails
/// the bounds check immediately instead of corrupting a live slot.
const ABSENT: usize = usize::MAX;

struct ItemSlot<R, T> {
    rank: R,
    value: T,
}

pub(crate) struct ItemCore<R, T> {
    pos: AtomicUsize,
    slot: Mutex<ItemSlot<R, T>>,
}

/// Stable handle to an item in a [`RankedList`].
///
/// Handles are cheap to clone and remain valid across heap rotations. After
/// the item is deleted, [`present`](Item::present) turns `false`;
/// [`rank`](Item::rank) and [`value`](Item::value) stay readable so the
/// caller can inspect what was evicted, but structural operations through
/// the owning list panic.
///
/// [`Item::null`] produces the never-inserted handle: `present()` is
/// `false` and every other accessor panics.
pub struct Item<R, T> {
    core: Option<Arc<ItemCore<R, T>>>,
}

impl<R, T> Item<R, T> {
    /// Returns the null handle, which refers to no item.
    pub fn null() -> Self {
        Self { core: None }
    }

    pub(crate) fn from_core(core: Arc<ItemCore<R, T>>) -> Self {
        Self { core: Some(core) }
    }

    /// Returns `true` if this handle currently occupies a heap slot.
    ///
    /// Always callable, including on null and deleted handles, and never
    /// touches the owning list.
    #[inline]
    pub fn present(&self) -> bool {
        match &self.core {
            Some(core) => core.pos.load(Ordering::Relaxed) != ABSENT,
            None => false,
        }
    }

    /// Returns the item's current rank.
    ///
    /// # Panics
    ///
    /// Panics on a null handle.
    pub fn rank(&self) -> R
    where
        R: Clone,
    {
        self.core().slot.lock().rank.clone()
    }

    /// Returns a guard giving mutable access to the item's value.
    ///
    /// The guard must be dropped before any structural operation on the
    /// owning list; holding it across `set_rank`/`delete` deadlocks.
    ///
    /// # Panics
    ///
    /// Panics on a null handle.
    pub fn value(&self) -> MappedMutexGuard<'_, T> {
        MutexGuard::map(self.core().slot.lock(), |slot| &mut slot.value)
    }

    fn core(&self) -> &Arc<ItemCore<R, T>> {
        self.core
            .as_ref()
            .expect("ranked list: use of null item handle")
    }

    fn position(&self) -> usize {
        self.core().pos.load(Ordering::Relaxed)
    }
}

impl<R, T> Clone for Item<R, T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<R, T> Default for Item<R, T> {
    fn default() -> Self {
        Self::null()
    }
}

/// Handle identity: two handles are equal iff they refer to the same item.
impl<R, T> PartialEq for Item<R, T> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.core, &other.core) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<R, T> Eq for Item<R, T> {}

impl<R, T> fmt::Debug for Item<R, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.core {
            Some(core) => {
                let pos = core.pos.load(Ordering::Relaxed);
                if pos == ABSENT {
                    f.write_str("Item(absent)")
                } else {
                    write!(f, "Item(pos {pos})")
                }
            }
            None => f.write_str("Item(null)"),
        }
    }
}

/// Array-backed binary min-heap of rank/value items with stable handles.
///
/// # Example
///
/// ```
/// use rankkit::ds::RankedList;
///
/// let mut list: RankedList<u64, &str> = RankedList::new();
/// let a = list.insert(3, "late");
/// let b = list.insert(1, "early");
///
/// assert_eq!(list.first(), b);
/// list.set_rank(&a, 0);
/// assert_eq!(list.first(), a);
///
/// let drained: Vec<_> = list.remove_ordered().map(|item| item.rank()).collect();
/// assert_eq!(drained, vec![0, 1]);
/// assert!(list.is_empty());
/// ```
pub struct RankedList<R, T> {
    slots: Vec<Arc<ItemCore<R, T>>>,
}

impl<R, T> RankedList<R, T> {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Creates an empty list with reserved slot capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of resident items.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no items are resident.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Marks every item absent and removes it.
    ///
    /// Previously handed-out handles report `present() == false` afterwards.
    pub fn clear(&mut self) {
        for core in self.slots.drain(..) {
            core.pos.store(ABSENT, Ordering::Relaxed);
        }
    }
}

impl<R, T> RankedList<R, T>
where
    R: Rank + Clone,
{
    /// Inserts a value with the given rank and returns its handle.
    pub fn insert(&mut self, rank: R, value: T) -> Item<R, T> {
        let n = self.slots.len();
        let core = Arc::new(ItemCore {
            pos: AtomicUsize::new(n),
            slot: Mutex::new(ItemSlot { rank, value }),
        });
        self.slots.push(core.clone());
        self.sift_up(n);
        Item::from_core(core)
    }

    /// Returns a handle to the minimum-rank item.
    ///
    /// Among equal minimum ranks any one of them may surface.
    ///
    /// # Panics
    ///
    /// Panics if the list is empty; guard with [`len`](RankedList::len).
    pub fn first(&self) -> Item<R, T> {
        let core = self
            .slots
            .first()
            .expect("ranked list: first() on empty list");
        Item::from_core(core.clone())
    }

    /// Returns a handle to an item chosen uniformly at random.
    ///
    /// The PRNG is caller-supplied so sampling stays deterministic under a
    /// seeded generator.
    ///
    /// # Panics
    ///
    /// Panics if the list is empty.
    pub fn random<G>(&self, rng: &mut G) -> Item<R, T>
    where
        G: Rng + ?Sized,
    {
        assert!(!self.slots.is_empty(), "ranked list: random() on empty list");
        let idx = rng.gen_range(0..self.slots.len());
        Item::from_core(self.slots[idx].clone())
    }

    /// Changes the rank of a resident item and restores the heap property.
    ///
    /// Works for both rank increases and decreases: sift-down runs first and
    /// sift-up only if the item did not move.
    ///
    /// # Panics
    ///
    /// Panics if the item is absent or null.
    pub fn set_rank(&mut self, item: &Item<R, T>, rank: R) {
        let pos = self.resident_position(item, "set_rank");
        item.core().slot.lock().rank = rank;
        if !self.sift_down(pos) {
            self.sift_up(pos);
        }
    }

    /// Deletes a resident item, marking its handle absent.
    ///
    /// The tail item is swapped into the vacated slot and re-heapified. A
    /// second delete through the same handle panics.
    ///
    /// # Panics
    ///
    /// Panics if the item is absent or null.
    pub fn delete(&mut self, item: &Item<R, T>) {
        let pos = self.resident_position(item, "delete");
        item.core().pos.store(ABSENT, Ordering::Relaxed);
        self.slots.swap_remove(pos);
        if pos < self.slots.len() {
            self.slots[pos].pos.store(pos, Ordering::Relaxed);
            if !self.sift_down(pos) {
                self.sift_up(pos);
            }
        }
    }

    /// Deletes the minimum-rank item.
    ///
    /// # Panics
    ///
    /// Panics if the list is empty.
    pub fn delete_first(&mut self) {
        let first = self.first();
        self.delete(&first);
    }

    /// Drains items in ascending rank order.
    ///
    /// Each step yields the current minimum without removing it; the item is
    /// deleted when the iterator advances past it (unless the caller already
    /// deleted it). Dropping the iterator early leaves the last-yielded item
    /// and everything after it untouched.
    pub fn remove_ordered(&mut self) -> RemoveOrdered<'_, R, T> {
        RemoveOrdered {
            list: self,
            yielded: None,
        }
    }

    /// Visits every resident item once, in unspecified heap order.
    ///
    /// The borrow prevents structural mutation for the iterator's lifetime.
    pub fn iter(&self) -> impl Iterator<Item = Item<R, T>> + '_ {
        self.slots.iter().map(|core| Item::from_core(core.clone()))
    }

    /// Verifies structural invariants, returning the first violation found.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let n = self.slots.len();
        let mut seen = std::collections::HashSet::with_capacity(n);
        for (i, core) in self.slots.iter().enumerate() {
            let pos = core.pos.load(Ordering::Relaxed);
            if pos != i {
                return Err(InvariantError::new(format!(
                    "item at slot {i} records position {pos}"
                )));
            }
            if !seen.insert(Arc::as_ptr(core) as usize) {
                return Err(InvariantError::new(format!(
                    "item at slot {i} appears more than once"
                )));
            }
            if i > 0 {
                let parent = (i - 1) / 2;
                if self.less(i, parent) {
                    return Err(InvariantError::new(format!(
                        "heap property violated between slot {i} and parent {parent}"
                    )));
                }
            }
        }
        Ok(())
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        if let Err(err) = self.check_invariants() {
            panic!("ranked list invariant violated: {err}");
        }
    }

    /// Resolves a handle to its slot index, panicking on misuse.
    fn resident_position(&self, item: &Item<R, T>, op: &str) -> usize {
        let pos = item.position();
        let n = self.slots.len();
        assert!(
            pos != ABSENT,
            "ranked list: {op} of item that is not in the list"
        );
        assert!(
            pos < n,
            "ranked list: {op} of item with position {pos} outside bounds (len {n})"
        );
        debug_assert!(
            Arc::ptr_eq(&self.slots[pos], item.core()),
            "ranked list: {op} of item belonging to another list"
        );
        pos
    }

    fn rank_at(&self, i: usize) -> R {
        self.slots[i].slot.lock().rank.clone()
    }

    fn less(&self, i: usize, j: usize) -> bool {
        self.rank_at(i).before(&self.rank_at(j))
    }

    /// Swaps two slots and rewrites the positions recorded in both items.
    fn swap_slots(&mut self, i: usize, j: usize) {
        self.slots[i].pos.store(j, Ordering::Relaxed);
        self.slots[j].pos.store(i, Ordering::Relaxed);
        self.slots.swap(i, j);
    }

    /// Moves the item at `start` up towards the root; returns whether it moved.
    fn sift_up(&mut self, start: usize) -> bool {
        let mut i = start;
        while i > 0 {
            let parent = (i - 1) / 2;
            if !self.less(i, parent) {
                break;
            }
            self.swap_slots(i, parent);
            i = parent;
        }
        i != start
    }

    /// Moves the item at `start` down towards the leaves; returns whether it moved.
    fn sift_down(&mut self, start: usize) -> bool {
        let n = self.slots.len();
        let mut i = start;
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            // ties between children go to the left child
            let mut child = left;
            let right = left + 1;
            if right < n && self.less(right, left) {
                child = right;
            }
            if !self.less(child, i) {
                break;
            }
            self.swap_slots(i, child);
            i = child;
        }
        i != start
    }
}

impl<R, T> Default for RankedList<R, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, T> fmt::Debug for RankedList<R, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RankedList")
            .field("len", &self.slots.len())
            .finish()
    }
}

/// Draining ascending-rank iterator over a [`RankedList`].
///
/// Created by [`RankedList::remove_ordered`].
pub struct RemoveOrdered<'a, R, T>
where
    R: Rank + Clone,
{
    list: &'a mut RankedList<R, T>,
    yielded: Option<Item<R, T>>,
}

impl<R, T> Iterator for RemoveOrdered<'_, R, T>
where
    R: Rank + Clone,
{
    type Item = Item<R, T>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(prev) = self.yielded.take() {
            // tolerate the caller having deleted the item inside the loop body
            if prev.present() {
                self.list.delete(&prev);
            }
        }
        if self.list.is_empty() {
            return None;
        }
        let item = self.list.first();
        self.yielded = Some(item.clone());
        Some(item)
    }
}
