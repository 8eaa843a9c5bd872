//! Ordered key/value map on top of [`RbTree`] with a pluggable ownership
//! policy.
//!
//! A map is configured once with up to four optional callbacks: copy-key,
//! copy-value, free-key and free-value. Which of them are present picks one
//! copy strategy (used by [`RbMap::try_clone`] and [`RbMap::insert_copied`])
//! and one free strategy (run once per association when the map is cleared
//! or dropped).

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::Result;
use crate::tree::{self, Insertion, RbTree};

/// Produces an independent copy of a key or value.
pub type CopyFn<T> = Rc<dyn Fn(&T) -> T>;

/// Releases a key or value when the map lets go of it.
pub type FreeFn<T> = Rc<dyn Fn(T)>;

/// One key/value pair, stored in the tree as a single record.
struct Assoc<K, V> {
    key: K,
    value: V,
}

// =============================================================================
// Ownership strategies
// =============================================================================

/// How keys and values are copied when the map copies an association.
///
/// A missing callback falls back to `Clone`, which shares the payload when it
/// is reference-counted (`Rc<_>`, `Arc<_>`) or a plain reference.
enum CopyStrategy<K, V> {
    Both(CopyFn<K>, CopyFn<V>),
    KeyOnly(CopyFn<K>),
    ValueOnly(CopyFn<V>),
    Share,
}

impl<K, V> CopyStrategy<K, V> {
    fn resolve(copy_key: Option<CopyFn<K>>, copy_value: Option<CopyFn<V>>) -> Self {
        match (copy_key, copy_value) {
            (Some(k), Some(v)) => CopyStrategy::Both(k, v),
            (Some(k), None) => CopyStrategy::KeyOnly(k),
            (None, Some(v)) => CopyStrategy::ValueOnly(v),
            (None, None) => CopyStrategy::Share,
        }
    }

    fn copy(&self, key: &K, value: &V) -> (K, V)
    where
        K: Clone,
        V: Clone,
    {
        match self {
            CopyStrategy::Both(k, v) => (k(key), v(value)),
            CopyStrategy::KeyOnly(k) => (k(key), value.clone()),
            CopyStrategy::ValueOnly(v) => (key.clone(), v(value)),
            CopyStrategy::Share => (key.clone(), value.clone()),
        }
    }

    fn copy_assoc(&self, assoc: &Assoc<K, V>) -> Assoc<K, V>
    where
        K: Clone,
        V: Clone,
    {
        let (key, value) = self.copy(&assoc.key, &assoc.value);
        Assoc { key, value }
    }
}

impl<K, V> Clone for CopyStrategy<K, V> {
    fn clone(&self) -> Self {
        match self {
            CopyStrategy::Both(k, v) => CopyStrategy::Both(Rc::clone(k), Rc::clone(v)),
            CopyStrategy::KeyOnly(k) => CopyStrategy::KeyOnly(Rc::clone(k)),
            CopyStrategy::ValueOnly(v) => CopyStrategy::ValueOnly(Rc::clone(v)),
            CopyStrategy::Share => CopyStrategy::Share,
        }
    }
}

/// How an association is released when the map is cleared or dropped.
///
/// Halves without a free callback are dropped normally.
enum FreeStrategy<K, V> {
    Both(FreeFn<K>, FreeFn<V>),
    KeyOnly(FreeFn<K>),
    ValueOnly(FreeFn<V>),
    WrapperOnly,
}

impl<K, V> FreeStrategy<K, V> {
    fn resolve(free_key: Option<FreeFn<K>>, free_value: Option<FreeFn<V>>) -> Self {
        match (free_key, free_value) {
            (Some(k), Some(v)) => FreeStrategy::Both(k, v),
            (Some(k), None) => FreeStrategy::KeyOnly(k),
            (None, Some(v)) => FreeStrategy::ValueOnly(v),
            (None, None) => FreeStrategy::WrapperOnly,
        }
    }

    fn release(&self, assoc: Assoc<K, V>) {
        let Assoc { key, value } = assoc;
        match self {
            FreeStrategy::Both(k, v) => {
                k(key);
                v(value);
            }
            FreeStrategy::KeyOnly(k) => k(key),
            FreeStrategy::ValueOnly(v) => v(value),
            FreeStrategy::WrapperOnly => {}
        }
    }
}

impl<K, V> Clone for FreeStrategy<K, V> {
    fn clone(&self) -> Self {
        match self {
            FreeStrategy::Both(k, v) => FreeStrategy::Both(Rc::clone(k), Rc::clone(v)),
            FreeStrategy::KeyOnly(k) => FreeStrategy::KeyOnly(Rc::clone(k)),
            FreeStrategy::ValueOnly(v) => FreeStrategy::ValueOnly(Rc::clone(v)),
            FreeStrategy::WrapperOnly => FreeStrategy::WrapperOnly,
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Construction-time configuration for an [`RbMap`].
///
/// ```rust
/// use rbtree_map::RbMap;
///
/// let map: RbMap<String, Vec<u8>, _> = RbMap::builder(|a: &String, b: &String| a.cmp(b))
///     .copy_key(|k: &String| k.to_uppercase())
///     .free_value(|v: Vec<u8>| drop(v))
///     .build();
/// assert!(map.is_empty());
/// ```
pub struct MapBuilder<K, V, C> {
    cmp: C,
    copy_key: Option<CopyFn<K>>,
    copy_value: Option<CopyFn<V>>,
    free_key: Option<FreeFn<K>>,
    free_value: Option<FreeFn<V>>,
}

impl<K, V, C> MapBuilder<K, V, C>
where
    C: Fn(&K, &K) -> Ordering,
{
    pub fn copy_key(mut self, f: impl Fn(&K) -> K + 'static) -> Self {
        self.copy_key = Some(Rc::new(f));
        self
    }

    pub fn copy_value(mut self, f: impl Fn(&V) -> V + 'static) -> Self {
        self.copy_value = Some(Rc::new(f));
        self
    }

    pub fn free_key(mut self, f: impl Fn(K) + 'static) -> Self {
        self.free_key = Some(Rc::new(f));
        self
    }

    pub fn free_value(mut self, f: impl Fn(V) + 'static) -> Self {
        self.free_value = Some(Rc::new(f));
        self
    }

    pub fn build(self) -> RbMap<K, V, C> {
        RbMap::with_callbacks(
            self.cmp,
            self.copy_key,
            self.copy_value,
            self.free_key,
            self.free_value,
        )
    }
}

// =============================================================================
// Map
// =============================================================================

/// An ordered map backed by a red-black tree.
///
/// Keys are ordered by the comparator `C`; [`RbMap::new`] uses `Ord`.
///
/// ```rust
/// use rbtree_map::RbMap;
///
/// let mut map = RbMap::new();
/// assert!(map.insert(2, "two")?);
/// assert!(map.insert(1, "one")?);
/// assert!(!map.insert(1, "uno")?);
///
/// assert_eq!(map.get(&1), Some(&"one"));
/// assert_eq!(map.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec![1, 2]);
/// assert_eq!(map.remove(&2), Some("two"));
/// assert_eq!(map.len(), 1);
/// # Ok::<(), rbtree_map::AllocError>(())
/// ```
pub struct RbMap<K, V, C = fn(&K, &K) -> Ordering> {
    tree: RbTree<Assoc<K, V>>,
    /// Live association count; the tree itself does not track size.
    len: usize,
    cmp: C,
    copy: CopyStrategy<K, V>,
    free: FreeStrategy<K, V>,
}

impl<K: Ord, V> RbMap<K, V> {
    /// Creates an empty map ordered by `K`'s `Ord`, without callbacks.
    pub fn new() -> Self {
        Self::builder(<K as Ord>::cmp as fn(&K, &K) -> Ordering).build()
    }
}

impl<K: Ord, V> Default for RbMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C> RbMap<K, V, C>
where
    C: Fn(&K, &K) -> Ordering,
{
    pub fn builder(cmp: C) -> MapBuilder<K, V, C> {
        MapBuilder {
            cmp,
            copy_key: None,
            copy_value: None,
            free_key: None,
            free_value: None,
        }
    }

    /// Creates an empty map. The comparator is required; each callback is
    /// optional and independent of the others.
    pub fn with_callbacks(
        cmp: C,
        copy_key: Option<CopyFn<K>>,
        copy_value: Option<CopyFn<V>>,
        free_key: Option<FreeFn<K>>,
        free_value: Option<FreeFn<V>>,
    ) -> Self {
        Self {
            tree: RbTree::new(),
            len: 0,
            cmp,
            copy: CopyStrategy::resolve(copy_key, copy_value),
            free: FreeStrategy::resolve(free_key, free_value),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Height of the underlying tree.
    pub fn depth(&self) -> usize {
        self.tree.depth()
    }

    /// Inserts `key` → `value` unless `key` is already present.
    ///
    /// Returns `false` for a duplicate key. The stored value is kept and the
    /// rejected pair is dropped without running the free callbacks.
    pub fn insert(&mut self, key: K, value: V) -> Result<bool> {
        Ok(self.insert_or_return(key, value)?.is_none())
    }

    /// Like [`insert`](Self::insert), but hands a rejected pair back to the
    /// caller instead of dropping it.
    pub fn insert_or_return(&mut self, key: K, value: V) -> Result<Option<(K, V)>> {
        let cmp = &self.cmp;
        match self
            .tree
            .insert_by(Assoc { key, value }, |a, b| cmp(&a.key, &b.key))?
        {
            Insertion::Inserted => {
                self.len += 1;
                Ok(None)
            }
            Insertion::Duplicate(Assoc { key, value }) => Ok(Some((key, value))),
        }
    }

    /// Copies `key` and `value` with the map's copy strategy and inserts the
    /// copies.
    pub fn insert_copied(&mut self, key: &K, value: &V) -> Result<bool>
    where
        K: Clone,
        V: Clone,
    {
        let (key, value) = self.copy.copy(key, value);
        self.insert(key, value)
    }

    /// Removes `key` and returns its value.
    ///
    /// The removed key is dropped here; the free callbacks only run for
    /// associations still held when the map is cleared or dropped.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.remove_entry(key).map(|(_, value)| value)
    }

    pub fn remove_entry(&mut self, key: &K) -> Option<(K, V)> {
        let cmp = &self.cmp;
        let Assoc { key, value } = self.tree.remove_by(key, |a, k| cmp(&a.key, k))?;
        self.len -= 1;
        Some((key, value))
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.get_key_value(key).map(|(_, value)| value)
    }

    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        let cmp = &self.cmp;
        self.tree
            .get_by(key, |a, k| cmp(&a.key, k))
            .map(|a| (&a.key, &a.value))
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let cmp = &self.cmp;
        self.tree
            .get_mut_by(key, |a, k| cmp(&a.key, k))
            .map(|a| &mut a.value)
    }

    #[inline]
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn first_key_value(&self) -> Option<(&K, &V)> {
        self.tree.first().map(|a| (&a.key, &a.value))
    }

    pub fn last_key_value(&self) -> Option<(&K, &V)> {
        self.tree.last().map(|a| (&a.key, &a.value))
    }

    /// Calls `visit` on each pair in key order until it returns `true`.
    ///
    /// Uses the tree's threaded walk, so no memory is allocated. Returns
    /// whether the walk was stopped early.
    pub fn traverse<F>(&mut self, mut visit: F) -> bool
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.tree.traverse(|a| visit(&a.key, &a.value))
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.tree.iter(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    /// Copies the map with its copy strategy.
    ///
    /// The copy shares the comparator and callbacks and has the same shape
    /// and length as `self`.
    pub fn try_clone(&self) -> Result<Self>
    where
        K: Clone,
        V: Clone,
        C: Clone,
    {
        let copy = &self.copy;
        let tree = self.tree.copy_with(|a| copy.copy_assoc(a))?;
        debug!(len = self.len, "map cloned");
        Ok(Self {
            tree,
            len: self.len,
            cmp: self.cmp.clone(),
            copy: self.copy.clone(),
            free: self.free.clone(),
        })
    }

    /// Releases every association with the free strategy, leaving an empty
    /// map that keeps its comparator and callbacks.
    pub fn clear(&mut self) {
        let released = self.release_all();
        debug!(released, "map cleared");
    }

    /// Consumes the map, releasing every association with the free strategy.
    pub fn destroy(self) {
        drop(self);
    }
}

impl<K, V, C> RbMap<K, V, C> {
    fn release_all(&mut self) -> usize {
        let free = &self.free;
        let mut released = 0usize;
        self.tree.free_with(|assoc| {
            free.release(assoc);
            released += 1;
        });
        self.len = 0;
        released
    }
}

#[cfg(test)]
impl<K, V, C> RbMap<K, V, C>
where
    C: Fn(&K, &K) -> Ordering,
{
    /// Asserts the tree invariants and that the live count matches the
    /// number of reachable associations.
    pub(crate) fn validate(&self) {
        let cmp = &self.cmp;
        let reachable = self.tree.validate(|a, b| cmp(&a.key, &b.key));
        assert_eq!(reachable, self.len, "live count must match reachable nodes");
    }
}

impl<K, V, C> Drop for RbMap<K, V, C> {
    fn drop(&mut self) {
        let released = self.release_all();
        debug!(released, "map destroyed");
    }
}

impl<K: fmt::Debug, V: fmt::Debug, C> fmt::Debug for RbMap<K, V, C>
where
    C: Fn(&K, &K) -> Ordering,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, K, V, C> IntoIterator for &'a RbMap<K, V, C>
where
    C: Fn(&K, &K) -> Ordering,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

/// Borrowing in-order iterator over an [`RbMap`].
pub struct Iter<'a, K, V> {
    inner: tree::Iter<'a, Assoc<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|a| (&a.key, &a.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
