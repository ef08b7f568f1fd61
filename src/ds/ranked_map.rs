//! Keyed view over a [`RankedList`]: a hash index paired with the heap.
//!
//! Couples a `RankedList` with an `FxHashMap` from user keys to item
//! handles, so every entry is reachable both by key in O(1) and by rank
//! through the heap. The two sides are kept in lockstep: a key is mapped iff
//! its item is resident.
//!
//! ## Architecture
//!
//! ```text
//!   index: FxHashMap<K, Item>          list: RankedList<R, Entry<K, V>>
//!   ┌─────────┬─────────┐              ┌──────────────────────────────┐
//!   │ "alpha" │ item ───┼──────────────►  Entry { key: "alpha", v }   │
//!   │ "beta"  │ item ───┼──────────────►  Entry { key: "beta",  v }   │
//!   └─────────┴─────────┘              └──────────────────────────────┘
//!
//!   invariant: index.len() == list.len(), and index[k] is a present
//!   handle whose entry key is k
//! ```
//!
//! ## Operations
//! - `set(k, rank, v)`: upsert; existing keys keep their handle identity
//! - `get_or_create(k, rank)`: insert-if-missing, rank untouched when found
//! - `get(k)`: handle lookup; a missing key yields the null handle
//! - `delete(item)` / `delete_key(k)`: removal from both sides
//! - `first` / `random` / `iter` / `remove_ordered` / `clear`: delegated
//!
//! ## Performance
//! - `get` / `exists` / `delete_key` lookup: O(1) average
//! - rank-changing and removing operations: O(log n)
//!
//! `debug_validate_invariants()` is available in debug/test builds.
use std::fmt;
use std::hash::Hash;

use parking_lot::MappedMutexGuard;
use rand::Rng;
use rustc_hash::FxHashMap;

use crate::ds::ranked_list::{Item, RankedList};
use crate::error::InvariantError;
use crate::rank::Rank;

/// Key/value payload stored inside each list item.
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
}

/// Stable handle to an entry of a [`RankedMap`].
///
/// Wraps the underlying list handle and scopes value access to the user
/// payload. Shares the list handle's semantics: `present()` is always
/// callable, `key`/`rank`/`value` stay readable after deletion, and the
/// null handle panics on everything except `present()`.
pub struct MapItem<K, R, V>(pub(crate) Item<R, Entry<K, V>>);

impl<K, R, V> MapItem<K, R, V> {
    /// Returns the null handle, which refers to no entry.
    pub fn null() -> Self {
        Self(Item::null())
    }

    /// Returns `true` if this handle currently refers to a mapped entry.
    #[inline]
    pub fn present(&self) -> bool {
        self.0.present()
    }

    /// Returns the entry's key.
    ///
    /// # Panics
    ///
    /// Panics on a null handle.
    pub fn key(&self) -> K
    where
        K: Clone,
    {
        self.0.value().key.clone()
    }

    /// Returns the entry's current rank.
    ///
    /// # Panics
    ///
    /// Panics on a null handle.
    pub fn rank(&self) -> R
    where
        R: Clone,
    {
        self.0.rank()
    }

    /// Returns a guard giving mutable access to the entry's value.
    ///
    /// The guard must be dropped before any structural operation on the
    /// owning map; holding it across `set_rank`/`delete` deadlocks.
    ///
    /// # Panics
    ///
    /// Panics on a null handle.
    pub fn value(&self) -> MappedMutexGuard<'_, V> {
        MappedMutexGuard::map(self.0.value(), |entry| &mut entry.value)
    }
}

impl<K, R, V> Clone for MapItem<K, R, V> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<K, R, V> Default for MapItem<K, R, V> {
    fn default() -> Self {
        Self::null()
    }
}

/// Handle identity: two handles are equal iff they refer to the same entry.
impl<K, R, V> PartialEq for MapItem<K, R, V> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<K, R, V> Eq for MapItem<K, R, V> {}

impl<K, R, V> fmt::Debug for MapItem<K, R, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MapItem").field(&self.0).finish()
    }
}

/// Hash map whose entries are simultaneously ordered by rank.
///
/// # Example
///
/// ```
/// use rankkit::ds::RankedMap;
///
/// let mut map: RankedMap<&str, u64, u32> = RankedMap::new();
/// map.set("beta", 2, 20);
/// map.set("alpha", 1, 10);
///
/// assert!(map.exists(&"alpha"));
/// assert_eq!(map.first().key(), "alpha");
///
/// assert!(map.delete_key(&"alpha"));
/// assert!(!map.delete_key(&"alpha"));
/// ```
pub struct RankedMap<K, R, V> {
    list: RankedList<R, Entry<K, V>>,
    index: FxHashMap<K, Item<R, Entry<K, V>>>,
}

impl<K, R, V> RankedMap<K, R, V>
where
    K: Eq + Hash + Clone,
    R: Rank + Clone,
{
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            list: RankedList::new(),
            index: FxHashMap::default(),
        }
    }

    /// Creates an empty map with reserved capacity on both sides.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            list: RankedList::with_capacity(capacity),
            index: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    /// Returns the number of mapped entries.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Returns `true` if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Removes every entry; previously handed-out handles turn absent.
    pub fn clear(&mut self) {
        self.list.clear();
        self.index.clear();
    }

    /// Upserts an entry, returning its handle.
    ///
    /// An existing key keeps its handle identity: the rank is updated and
    /// the value overwritten in place. A new key is inserted with the given
    /// rank.
    pub fn set(&mut self, key: K, rank: R, value: V) -> MapItem<K, R, V> {
        if let Some(existing) = self.index.get(&key) {
            let item = existing.clone();
            self.list.set_rank(&item, rank);
            item.value().value = value;
            return MapItem(item);
        }
        let item = self.list.insert(rank, Entry { key: key.clone(), value });
        self.index.insert(key, item.clone());
        MapItem(item)
    }

    /// Looks up `key`, inserting a default value at `rank_if_created` when
    /// missing. Returns the handle and whether the key already existed; an
    /// existing entry's rank is left untouched.
    pub fn get_or_create(&mut self, key: K, rank_if_created: R) -> (MapItem<K, R, V>, bool)
    where
        V: Default,
    {
        self.get_or_create_with(key, rank_if_created, V::default)
    }

    /// Like [`get_or_create`](RankedMap::get_or_create) with an explicit
    /// value constructor, only invoked on insertion.
    pub fn get_or_create_with(
        &mut self,
        key: K,
        rank_if_created: R,
        make: impl FnOnce() -> V,
    ) -> (MapItem<K, R, V>, bool) {
        if let Some(existing) = self.index.get(&key) {
            return (MapItem(existing.clone()), true);
        }
        let item = self.list.insert(
            rank_if_created,
            Entry {
                key: key.clone(),
                value: make(),
            },
        );
        self.index.insert(key, item.clone());
        (MapItem(item), false)
    }

    /// Returns a handle for `key`; the null handle if unmapped.
    pub fn get(&self, key: &K) -> MapItem<K, R, V> {
        match self.index.get(key) {
            Some(item) => MapItem(item.clone()),
            None => MapItem::null(),
        }
    }

    /// Returns `true` if `key` is mapped.
    pub fn exists(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Returns a handle to the minimum-rank entry.
    ///
    /// # Panics
    ///
    /// Panics if the map is empty.
    pub fn first(&self) -> MapItem<K, R, V> {
        MapItem(self.list.first())
    }

    /// Returns a handle to an entry chosen uniformly at random.
    ///
    /// # Panics
    ///
    /// Panics if the map is empty.
    pub fn random<G>(&self, rng: &mut G) -> MapItem<K, R, V>
    where
        G: Rng + ?Sized,
    {
        MapItem(self.list.random(rng))
    }

    /// Changes an entry's rank; the key mapping is unaffected.
    ///
    /// # Panics
    ///
    /// Panics if the item is absent or null.
    pub fn set_rank(&mut self, item: &MapItem<K, R, V>, rank: R) {
        self.list.set_rank(&item.0, rank);
    }

    /// Deletes an entry through its handle, removing it from both the index
    /// and the heap.
    ///
    /// # Panics
    ///
    /// Panics if the item is absent or null.
    pub fn delete(&mut self, item: &MapItem<K, R, V>) {
        assert!(item.present(), "ranked map: delete of absent item");
        let key = item.key();
        self.index.remove(&key);
        self.list.delete(&item.0);
    }

    /// Deletes the entry mapped to `key`, reporting whether one existed.
    pub fn delete_key(&mut self, key: &K) -> bool {
        match self.index.remove(key) {
            Some(item) => {
                self.list.delete(&item);
                true
            }
            None => false,
        }
    }

    /// Deletes the minimum-rank entry.
    ///
    /// # Panics
    ///
    /// Panics if the map is empty.
    pub fn delete_first(&mut self) {
        let first = self.first();
        self.delete(&first);
    }

    /// Drains entries in ascending rank order.
    ///
    /// Same contract as [`RankedList::remove_ordered`]: the yielded entry is
    /// removed when the iterator advances past it, the caller may delete it
    /// earlier, and dropping the iterator leaves the remainder intact.
    pub fn remove_ordered(&mut self) -> MapRemoveOrdered<'_, K, R, V> {
        MapRemoveOrdered {
            map: self,
            yielded: None,
        }
    }

    /// Visits every entry once, in unspecified heap order.
    pub fn iter(&self) -> impl Iterator<Item = MapItem<K, R, V>> + '_ {
        self.list.iter().map(MapItem)
    }

    /// Verifies index/heap agreement, returning the first violation found.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        self.list.check_invariants()?;
        if self.index.len() != self.list.len() {
            return Err(InvariantError::new(format!(
                "index holds {} keys but the heap holds {} items",
                self.index.len(),
                self.list.len()
            )));
        }
        for item in self.index.values() {
            if !item.present() {
                return Err(InvariantError::new("index maps a key to an absent item"));
            }
        }
        Ok(())
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        if let Err(err) = self.check_invariants() {
            panic!("ranked map invariant violated: {err}");
        }
    }
}

impl<K, R, V> Default for RankedMap<K, R, V>
where
    K: Eq + Hash + Clone,
    R: Rank + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, R, V> fmt::Debug for RankedMap<K, R, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RankedMap")
            .field("len", &self.list.len())
            .finish()
    }
}

/// Draining ascending-rank iterator over a [`RankedMap`].
///
/// Created by [`RankedMap::remove_ordered`].
pub struct MapRemoveOrdered<'a, K, R, V>
where
    K: Eq + Hash + Clone,
    R: Rank + Clone,
{
    map: &'a mut RankedMap<K, R, V>,
    yielded: Option<MapItem<K, R, V>>,
}

impl<K, R, V> Iterator for MapRemoveOrdered<'_, K, R, V>
where
    K: Eq + Hash + Clone,
    R: Rank + Clone,
{
    type Item = MapItem<K, R, V>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(prev) = self.yielded.take() {
            // tolerate the caller having deleted the entry inside the loop body
            if prev.present() {
                self.map.delete(&prev);
            }
        }
        if self.map.is_empty() {
            return None;
        }
        let item = self.map.first();
        self.yielded = Some(item.clone());
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn set_and_get_roundtrip() {
        let mut map: RankedMap<u32, u32, &str> = RankedMap::new();
        map.set(1, 10, "one");
        map.set(2, 5, "two");

        assert_eq!(map.len(), 2);
        assert!(map.exists(&1));
        assert_eq!(*map.get(&1).value(), "one");
        assert_eq!(map.first().key(), 2);
        map.debug_validate_invariants();
    }

    #[test]
    fn set_existing_key_keeps_handle_identity() {
        let mut map: RankedMap<u32, u64, u32> = RankedMap::new();
        let a = map.set(0, 100, 1);
        let b = map.set(0, 200, 2);

        assert_eq!(a, b);
        assert_eq!(map.len(), 1);
        assert_eq!(a.rank(), 200);
        assert_eq!(*a.value(), 2);
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let mut map: RankedMap<u32, u32, u32> = RankedMap::new();
        let (a, existed) = map.get_or_create(7, 1);
        assert!(!existed);
        assert!(a.present());

        let (b, existed) = map.get_or_create(7, 99);
        assert!(existed);
        assert_eq!(a, b);
        // rank is untouched when the key already exists
        assert_eq!(b.rank(), 1);
    }

    #[test]
    fn get_missing_key_is_null() {
        let map: RankedMap<u32, u32, u32> = RankedMap::new();
        let item = map.get(&5);
        assert!(!item.present());
        assert_eq!(item, MapItem::null());
    }

    #[test]
    fn delete_key_reports_removal() {
        let mut map: RankedMap<u32, u32, u32> = RankedMap::new();
        map.set(0, 1, 0);
        map.set(1, 2, 0);

        assert!(map.delete_key(&0));
        assert!(!map.delete_key(&0));
        assert!(map.delete_key(&1));
        assert!(!map.delete_key(&2));
        assert!(map.is_empty());
    }

    #[test]
    fn delete_via_handle_updates_index() {
        let mut map: RankedMap<u32, u32, u32> = RankedMap::new();
        let item = map.set(3, 1, 30);
        map.delete(&item);

        assert!(!item.present());
        assert!(!map.exists(&3));
        assert_eq!(*item.value(), 30);
        map.debug_validate_invariants();
    }

    #[test]
    #[should_panic(expected = "delete of absent item")]
    fn delete_twice_panics() {
        let mut map: RankedMap<u32, u32, u32> = RankedMap::new();
        let item = map.set(0, 1, 0);
        map.delete(&item);
        map.delete(&item);
    }

    #[test]
    fn remove_ordered_yields_by_rank_and_updates_index() {
        let mut map: RankedMap<u32, u32, u32> = RankedMap::new();
        map.set(3, 3, 3);
        map.set(2, 2, 2);
        map.set(1, 1, 1);

        // a break before advancing leaves everything mapped
        for item in map.remove_ordered() {
            assert!(item.present());
            assert_eq!(item.key(), 1);
            break;
        }
        assert_eq!(map.len(), 3);

        // the consumer may delete the yielded entry before advancing
        let mut first = true;
        let mut iter = map.remove_ordered();
        while let Some(item) = iter.next() {
            assert!(item.present());
            let key = item.key();
            iter.map.delete(&item);
            assert!(!item.present());
            if first {
                assert_eq!(iter.map.len(), 2);
                assert_eq!(key, 1);
                first = false;
            } else {
                assert_eq!(iter.map.len(), 1);
                assert_eq!(key, 2);
                break;
            }
        }
        drop(iter);

        let rest: Vec<u32> = map.remove_ordered().map(|item| item.key()).collect();
        assert_eq!(rest, vec![3]);
        assert!(map.is_empty());
    }

    #[test]
    fn clear_unmaps_everything() {
        let mut map: RankedMap<u32, u32, u32> = RankedMap::new();
        let items: Vec<_> = (0..50u32).map(|k| map.set(k, k, k)).collect();

        map.clear();
        assert_eq!(map.len(), 0);
        for (k, item) in items.iter().enumerate() {
            assert!(!item.present());
            assert!(!map.exists(&(k as u32)));
        }
    }

    #[test]
    fn random_returns_mapped_entry() {
        let mut map: RankedMap<u32, u32, u32> = RankedMap::new();
        for k in 0..8u32 {
            map.set(k, k, k);
        }
        let mut rng = SmallRng::seed_from_u64(5);
        let item = map.random(&mut rng);
        assert!(map.exists(&item.key()));
    }

    #[test]
    fn set_rank_keeps_key_mapping() {
        let mut map: RankedMap<u32, u32, u32> = RankedMap::new();
        let item = map.set(9, 50, 0);
        map.set(8, 10, 0);

        map.set_rank(&item, 1);
        assert_eq!(map.first().key(), 9);
        assert!(map.exists(&9));
        map.debug_validate_invariants();
    }

    #[test]
    fn iter_visits_every_entry_once() {
        let mut map: RankedMap<u32, u32, u32> = RankedMap::new();
        for k in 0..20u32 {
            map.set(k, 100 - k, k);
        }
        let mut keys: Vec<u32> = map.iter().map(|item| item.key()).collect();
        keys.sort_unstable();
        assert_eq!(keys, (0..20u32).collect::<Vec<_>>());
    }
}
