#![forbid(unsafe_code)]

//! A single observable value.
//!
//! # Design
//!
//! The current value is held as an `Rc<T>`. Assigning a different value
//! swaps in a new `Rc`, so the snapshot handed out by
//! [`value_snapshot`](ListenValue::value_snapshot) is immutable by
//! construction and never changes under a subscriber that kept it.
//!
//! # Invariants
//!
//! 1. `set_value(v)` with `v == current` is a no-op: no version bump, no
//!    notification.
//! 2. Every effective change fires `on_changed` exactly once with the new and
//!    old values.
//! 3. The value is already updated when handlers run.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use kotae_core::{Bindable, Part, Scope};

use super::signal::{Signal, Subscriber};
use super::Listenable;

/// Payload of [`ListenValue`] change notifications.
#[derive(Debug)]
pub struct ValueChange<T> {
    pub new: Rc<T>,
    pub old: Rc<T>,
}

struct ValueInner<T: 'static> {
    part: Part,
    on_changed: Signal<ValueChange<T>>,
    value: RefCell<Rc<T>>,
    version: Cell<u64>,
}

/// An observable value.
///
/// Cloning yields another handle to the **same** value and signal.
pub struct ListenValue<T: 'static> {
    inner: Rc<ValueInner<T>>,
}

impl<T: PartialEq + 'static> ListenValue<T> {
    /// Create an observable holding `initial` under `scope`.
    pub fn new(scope: &(impl Scope + ?Sized), initial: T) -> Self {
        let part = Part::builder().label("listen_value").build(scope);
        let on_changed = Signal::labeled(&part, "listen_value.on_changed");
        Self {
            inner: Rc::new(ValueInner {
                part,
                on_changed,
                value: RefCell::new(Rc::new(initial)),
                version: Cell::new(0),
            }),
        }
    }

    /// Replace the value, notifying subscribers if it changed.
    ///
    /// Returns whether a change happened.
    pub fn set_value(&self, value: T) -> bool {
        let change = {
            let mut current = self.inner.value.borrow_mut();
            if **current == value {
                return false;
            }
            let new = Rc::new(value);
            let old = std::mem::replace(&mut *current, Rc::clone(&new));
            ValueChange { new, old }
        };
        self.inner.version.set(self.inner.version.get() + 1);
        self.inner.on_changed.fire(&change);
        true
    }

    /// Derive the next value from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let next = self.with_value(f);
        self.set_value(next)
    }

    /// Borrow the live value.
    ///
    /// `f` must not call `set_value` on this container.
    pub fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Clone of the live value.
    #[must_use]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with_value(T::clone)
    }
}

impl<T: PartialEq + 'static> Listenable for ListenValue<T> {
    type Change = ValueChange<T>;
    type Snapshot = Rc<T>;

    fn on_changed(&self) -> Subscriber<'_, ValueChange<T>> {
        self.inner.on_changed.subscriber()
    }

    fn value_snapshot(&self) -> Rc<T> {
        Rc::clone(&self.inner.value.borrow())
    }

    fn version(&self) -> u64 {
        self.inner.version.get()
    }
}

impl<T: 'static> Bindable for ListenValue<T> {
    fn part(&self) -> &Part {
        &self.inner.part
    }
}

impl<T: 'static> Clone for ListenValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for ListenValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenValue")
            .field("value", &self.inner.value.borrow())
            .field("version", &self.inner.version.get())
            .field("part", &self.inner.part.id())
            .finish()
    }
}
