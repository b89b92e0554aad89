#![forbid(unsafe_code)]

//! An observable ordered list.
//!
//! Mutations that change the contents invalidate the cached snapshot and
//! fire a payload-free `on_changed`. Mutations that change nothing (removing
//! a missing element, setting a slot to an equal value, clearing an empty
//! list) are silent.
//!
//! # Performance
//!
//! | Operation | Complexity |
//! |-----------|------------|
//! | `push` | O(1) amortized + O(S) notify |
//! | `insert` / `remove_at` | O(n) + O(S) notify |
//! | `value_snapshot` (cached) | O(1) |
//! | `value_snapshot` (after mutation) | O(n) copy |

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use kotae_core::{Bindable, ContractViolation, Part, Scope};

use super::signal::{Signal, Subscriber};
use super::Listenable;

struct ArrayInner<T: 'static> {
    part: Part,
    on_changed: Signal<()>,
    backing: RefCell<Vec<T>>,
    snapshot: RefCell<Option<Rc<[T]>>>,
    version: Cell<u64>,
}

/// An observable list.
///
/// Cloning yields another handle to the **same** list.
pub struct ListenArray<T: 'static> {
    inner: Rc<ArrayInner<T>>,
}

impl<T: Clone + PartialEq + 'static> ListenArray<T> {
    /// Create an empty list under `scope`.
    pub fn new(scope: &(impl Scope + ?Sized)) -> Self {
        Self::from_vec(scope, Vec::new())
    }

    /// Create a list holding `items` under `scope`.
    pub fn from_vec(scope: &(impl Scope + ?Sized), items: Vec<T>) -> Self {
        let part = Part::builder().label("listen_array").build(scope);
        let on_changed = Signal::labeled(&part, "listen_array.on_changed");
        Self {
            inner: Rc::new(ArrayInner {
                part,
                on_changed,
                backing: RefCell::new(items),
                snapshot: RefCell::new(None),
                version: Cell::new(0),
            }),
        }
    }

    fn changed(&self) {
        self.inner.snapshot.borrow_mut().take();
        self.inner.version.set(self.inner.version.get() + 1);
        self.inner.on_changed.fire(&());
    }

    fn out_of_bounds<R>(&self, index: usize, len: usize) -> Result<R, ContractViolation> {
        self.inner
            .part
            .config()
            .violation(ContractViolation::IndexOutOfBounds { index, len })
    }

    pub fn push(&self, value: T) {
        self.inner.backing.borrow_mut().push(value);
        self.changed();
    }

    /// Insert `value` at `index`, shifting later elements.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::IndexOutOfBounds`] if `index > len`.
    pub fn insert(&self, index: usize, value: T) -> Result<(), ContractViolation> {
        {
            let mut backing = self.inner.backing.borrow_mut();
            let len = backing.len();
            if index > len {
                drop(backing);
                return self.out_of_bounds(index, len);
            }
            backing.insert(index, value);
        }
        self.changed();
        Ok(())
    }

    /// Overwrite slot `index`. Returns whether the slot changed.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::IndexOutOfBounds`] if `index >= len`.
    pub fn set(&self, index: usize, value: T) -> Result<bool, ContractViolation> {
        {
            let mut backing = self.inner.backing.borrow_mut();
            let len = backing.len();
            if index >= len {
                drop(backing);
                return self.out_of_bounds(index, len);
            }
            if backing[index] == value {
                return Ok(false);
            }
            backing[index] = value;
        }
        self.changed();
        Ok(true)
    }

    /// Remove the element at `index`, if there is one.
    pub fn remove_at(&self, index: usize) -> Option<T> {
        let removed = {
            let mut backing = self.inner.backing.borrow_mut();
            (index < backing.len()).then(|| backing.remove(index))
        };
        if removed.is_some() {
            self.changed();
        }
        removed
    }

    /// Remove the first element equal to `value`. Returns whether one was found.
    pub fn remove(&self, value: &T) -> bool {
        let index = self.inner.backing.borrow().iter().position(|v| v == value);
        index.and_then(|index| self.remove_at(index)).is_some()
    }

    /// Remove every element, returning them.
    pub fn clear(&self) -> Vec<T> {
        let old = std::mem::take(&mut *self.inner.backing.borrow_mut());
        if !old.is_empty() {
            self.changed();
        }
        old
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.backing.borrow().get(index).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.backing.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.backing.borrow().is_empty()
    }

    /// Borrow the live contents.
    ///
    /// # Panics
    ///
    /// Mutating the list while the returned guard is alive panics.
    #[must_use]
    pub fn value(&self) -> Ref<'_, [T]> {
        Ref::map(self.inner.backing.borrow(), Vec::as_slice)
    }
}

impl<T: Clone + PartialEq + 'static> Listenable for ListenArray<T> {
    type Change = ();
    type Snapshot = Rc<[T]>;

    fn on_changed(&self) -> Subscriber<'_, ()> {
        self.inner.on_changed.subscriber()
    }

    fn value_snapshot(&self) -> Rc<[T]> {
        let mut cache = self.inner.snapshot.borrow_mut();
        let snapshot =
            cache.get_or_insert_with(|| Rc::from(self.inner.backing.borrow().as_slice()));
        Rc::clone(snapshot)
    }

    fn version(&self) -> u64 {
        self.inner.version.get()
    }
}

impl<T: 'static> Bindable for ListenArray<T> {
    fn part(&self) -> &Part {
        &self.inner.part
    }
}

impl<T: 'static> Clone for ListenArray<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for ListenArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenArray")
            .field("items", &self.inner.backing.borrow())
            .field("version", &self.inner.version.get())
            .finish()
    }
}
