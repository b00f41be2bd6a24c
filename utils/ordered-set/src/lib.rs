//! Insertion-order preserving set.
//!
//! [`OrderedSet`] keeps its keys in a `Vec` (the sequence) and a `HashMap`
//! from key to position (the lookup index). Every mutation keeps both in sync:
//! the position stored for a key is always its offset in the sequence, and
//! offsets are contiguous `0..len`.
//!
//! Lookup by key is O(1) on average. Inserting or erasing anywhere but the
//! back costs O(n) because the stored positions of the trailing keys shift.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::Index;

/// A set that remembers insertion order and answers "where is this key" in
/// constant time.
#[derive(Clone)]
pub struct OrderedSet<K> {
    /// Keys in sequence order.
    content: Vec<K>,

    /// Position of every key in `content`.
    indices: HashMap<K, usize>,
}

impl<K> OrderedSet<K>
where
    K: Clone + Eq + Hash,
{
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            content: Vec::new(),
            indices: HashMap::new(),
        }
    }

    /// Create an empty set with room for `capacity` keys.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            content: Vec::with_capacity(capacity),
            indices: HashMap::with_capacity(capacity),
        }
    }

    /// Number of keys in the set.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Whether the set holds no keys.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Remove every key.
    pub fn clear(&mut self) {
        self.content.clear();
        self.indices.clear();
    }

    /// Insert `key` at sequence position `pos`.
    ///
    /// Returns `Some(pos)` when the key was inserted. When an equal key is
    /// already tracked the set is left untouched and `None` is returned; a
    /// duplicate is not an error.
    ///
    /// # Panics
    ///
    /// Panics if `pos > len`.
    pub fn insert(&mut self, pos: usize, key: K) -> Option<usize> {
        let len = self.content.len();
        assert!(
            pos <= len,
            "insertion index (is {pos}) should be <= len (is {len})"
        );

        if self.indices.contains_key(&key) {
            return None;
        }

        self.content.insert(pos, key.clone());
        self.indices.insert(key, pos);
        self.reindex_from(pos + 1);

        Some(pos)
    }

    /// Insert `key` at the front. See [`OrderedSet::insert`].
    pub fn push_front(&mut self, key: K) -> Option<usize> {
        self.insert(0, key)
    }

    /// Insert `key` at the back. See [`OrderedSet::insert`].
    pub fn push_back(&mut self, key: K) -> Option<usize> {
        let len = self.content.len();
        self.insert(len, key)
    }

    /// Current position of `key`, if tracked.
    pub fn find<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.indices.get(key).copied()
    }

    /// Whether `key` is tracked.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.indices.contains_key(key)
    }

    /// Key at position `pos`.
    pub fn get(&self, pos: usize) -> Option<&K> {
        self.content.get(pos)
    }

    /// First key in sequence order.
    pub fn first(&self) -> Option<&K> {
        self.content.first()
    }

    /// Last key in sequence order.
    pub fn last(&self) -> Option<&K> {
        self.content.last()
    }

    /// Remove the key at position `pos` and return it.
    ///
    /// Every key after `pos` moves one position towards the front.
    pub fn remove_at(&mut self, pos: usize) -> Option<K> {
        if pos >= self.content.len() {
            return None;
        }

        let key = self.content.remove(pos);
        self.indices.remove(&key);
        self.reindex_from(pos);

        Some(key)
    }

    /// Remove `key`. Returns `true` when a key was removed.
    pub fn remove<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.find(key) {
            Some(pos) => self.remove_at(pos).is_some(),
            None => false,
        }
    }

    /// Remove and return the first key.
    pub fn pop_front(&mut self) -> Option<K> {
        self.remove_at(0)
    }

    /// Remove and return the last key.
    pub fn pop_back(&mut self) -> Option<K> {
        let key = self.content.pop()?;
        self.indices.remove(&key);
        Some(key)
    }

    /// Replace the key at `pos` with `key`, keeping its position.
    ///
    /// Returns `false` (and changes nothing) when `pos` is out of range or
    /// when `key` is already tracked at another position. Assigning a key
    /// equal to the current one replaces the stored value.
    pub fn assign(&mut self, pos: usize, key: K) -> bool {
        if pos >= self.content.len() {
            return false;
        }

        if let Some(&existing) = self.indices.get(&key) {
            if existing != pos {
                return false;
            }
        }

        let previous = std::mem::replace(&mut self.content[pos], key.clone());
        self.indices.remove(&previous);
        self.indices.insert(key, pos);

        true
    }

    /// Iterate over the keys in sequence order.
    pub fn iter(&self) -> std::slice::Iter<'_, K> {
        self.content.iter()
    }

    /// The keys in sequence order.
    pub fn as_slice(&self) -> &[K] {
        &self.content
    }

    /// Rewrite the stored positions of every key from `start` to the end.
    fn reindex_from(&mut self, start: usize) {
        for (pos, key) in self.content.iter().enumerate().skip(start) {
            if let Some(index) = self.indices.get_mut(key) {
                *index = pos;
            }
        }
    }
}

impl<K> Default for OrderedSet<K>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug> fmt::Debug for OrderedSet<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.content.iter()).finish()
    }
}

impl<K: PartialEq> PartialEq for OrderedSet<K> {
    fn eq(&self, other: &Self) -> bool {
        self.content == other.content
    }
}

impl<K: Eq> Eq for OrderedSet<K> {}

impl<K> Index<usize> for OrderedSet<K> {
    type Output = K;

    fn index(&self, pos: usize) -> &K {
        &self.content[pos]
    }
}

impl<K> FromIterator<K> for OrderedSet<K>
where
    K: Clone + Eq + Hash,
{
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<K> Extend<K> for OrderedSet<K>
where
    K: Clone + Eq + Hash,
{
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        for key in iter {
            self.push_back(key);
        }
    }
}

impl<K> IntoIterator for OrderedSet<K> {
    type Item = K;
    type IntoIter = std::vec::IntoIter<K>;

    fn into_iter(self) -> Self::IntoIter {
        self.content.into_iter()
    }
}

impl<'a, K> IntoIterator for &'a OrderedSet<K> {
    type Item = &'a K;
    type IntoIter = std::slice::Iter<'a, K>;

    fn into_iter(self) -> Self::IntoIter {
        self.content.iter()
    }
}
