#![forbid(unsafe_code)]

//! An observable set backed by an [`ArraySet`].
//!
//! Adding a present element or deleting an absent one is silent; every
//! effective mutation invalidates the cached snapshot and fires a
//! payload-free `on_changed`.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use kotae_core::{ArraySet, Bindable, Part, Scope};

use super::signal::{Signal, Subscriber};
use super::Listenable;

struct SetInner<T: 'static> {
    part: Part,
    on_changed: Signal<()>,
    backing: RefCell<ArraySet<T>>,
    snapshot: RefCell<Option<Rc<[T]>>>,
    version: Cell<u64>,
}

/// An observable set.
///
/// Cloning yields another handle to the **same** set.
pub struct ListenSet<T: 'static> {
    inner: Rc<SetInner<T>>,
}

impl<T: Eq + Hash + Clone + 'static> ListenSet<T> {
    pub fn new(scope: &(impl Scope + ?Sized)) -> Self {
        let part = Part::builder().label("listen_set").build(scope);
        let on_changed = Signal::labeled(&part, "listen_set.on_changed");
        Self {
            inner: Rc::new(SetInner {
                part,
                on_changed,
                backing: RefCell::new(ArraySet::new()),
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

    /// Insert `value`. Returns `false` (and stays silent) if already present.
    pub fn add(&self, value: T) -> bool {
        let added = self.inner.backing.borrow_mut().add(value);
        if added {
            self.changed();
        }
        added
    }

    /// Remove `value`. Returns `false` (and stays silent) if absent.
    pub fn delete(&self, value: &T) -> bool {
        let deleted = self.inner.backing.borrow_mut().delete(value);
        if deleted {
            self.changed();
        }
        deleted
    }

    #[must_use]
    pub fn has(&self, value: &T) -> bool {
        self.inner.backing.borrow().has(value)
    }

    /// Remove every element, returning them.
    pub fn clear(&self) -> Vec<T> {
        let old = self.inner.backing.borrow_mut().clear();
        if !old.is_empty() {
            self.changed();
        }
        old
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.backing.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.backing.borrow().is_empty()
    }

    /// Borrow the live elements.
    ///
    /// # Panics
    ///
    /// Mutating the set while the returned guard is alive panics.
    #[must_use]
    pub fn value(&self) -> Ref<'_, [T]> {
        Ref::map(self.inner.backing.borrow(), ArraySet::as_slice)
    }
}

impl<T: Eq + Hash + Clone + 'static> Listenable for ListenSet<T> {
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

impl<T: 'static> Bindable for ListenSet<T> {
    fn part(&self) -> &Part {
        &self.inner.part
    }
}

impl<T: 'static> Clone for ListenSet<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for ListenSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenSet")
            .field("items", &self.inner.backing.borrow().as_slice())
            .field("version", &self.inner.version.get())
            .finish()
    }
}
