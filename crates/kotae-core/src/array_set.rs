#![forbid(unsafe_code)]

//! Insertion-indexed set with O(1) removal.
//!
//! Elements live in a dense `Vec`; a side index maps each element to its
//! position. Removal swaps the last element into the vacated slot and
//! rewrites that element's index, so iteration order is insertion order only
//! until the first removal.
//!
//! # Invariants
//!
//! 1. `index[elements[i]] == i` for every `i`.
//! 2. `elements.len() == index.len()`.
//!
//! # Complexity
//!
//! | Operation | Time |
//! |-----------|------|
//! | `add` / `has` / `delete` | O(1) average |
//! | `clear` | O(n) |

use std::collections::HashMap;
use std::hash::Hash;

/// A set that remembers each element's position in a dense array.
#[derive(Debug, Clone)]
pub struct ArraySet<T> {
    elements: Vec<T>,
    index: HashMap<T, usize>,
}

impl<T> Default for ArraySet<T> {
    fn default() -> Self {
        Self {
            elements: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> ArraySet<T> {
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.elements.get(index)
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.elements
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.elements.iter()
    }
}

impl<T: Eq + Hash + Clone> ArraySet<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `element`. Returns `false` if it was already present.
    pub fn add(&mut self, element: T) -> bool {
        if self.index.contains_key(&element) {
            return false;
        }
        self.index.insert(element.clone(), self.elements.len());
        self.elements.push(element);
        true
    }

    #[must_use]
    pub fn has(&self, element: &T) -> bool {
        self.index.contains_key(element)
    }

    #[must_use]
    pub fn index_of(&self, element: &T) -> Option<usize> {
        self.index.get(element).copied()
    }

    /// Swap-remove `element`. Returns `false` if it was absent.
    pub fn delete(&mut self, element: &T) -> bool {
        let Some(index) = self.index.remove(element) else {
            return false;
        };
        self.elements.swap_remove(index);
        if let Some(moved) = self.elements.get(index) {
            if let Some(slot) = self.index.get_mut(moved) {
                *slot = index;
            }
        }
        true
    }

    /// Remove everything, returning the old elements in array order.
    pub fn clear(&mut self) -> Vec<T> {
        self.index.clear();
        std::mem::take(&mut self.elements)
    }
}

impl<'a, T> IntoIterator for &'a ArraySet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Eq + Hash + Clone> FromIterator<T> for ArraySet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for element in iter {
            set.add(element);
        }
        set
    }
}
