#![forbid(unsafe_code)]

//! Generation-checked weak handles to bindable objects.
//!
//! A [`Handle`] remembers the target's part generation at creation. Once the
//! part is destroyed its generation advances and every outstanding handle
//! fails to resolve, even if the object's memory is still reachable through
//! another `Rc`.

use std::fmt;
use std::rc::{Rc, Weak};

use crate::contract::ContractViolation;
use crate::lifecycle::Bindable;
use crate::part::WeakPart;

/// A weak, liveness-checked reference to a `T`.
pub struct Handle<T: ?Sized> {
    target: Weak<T>,
    part: WeakPart,
}

impl<T: Bindable + ?Sized> Handle<T> {
    #[must_use]
    pub fn new(target: &Rc<T>) -> Self {
        Self {
            target: Rc::downgrade(target),
            part: target.part().downgrade(),
        }
    }

    /// Resolve the handle.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::StaleHandle`] once the target was destroyed or
    /// dropped.
    pub fn get(&self) -> Result<Rc<T>, ContractViolation> {
        let stale = || ContractViolation::StaleHandle { part: self.part.id() };
        if !self.part.is_alive() {
            return Err(stale());
        }
        self.target.upgrade().ok_or_else(stale)
    }

    #[must_use]
    pub fn upgrade(&self) -> Option<Rc<T>> {
        self.get().ok()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.part.is_alive() && self.target.strong_count() > 0
    }
}

impl<T: Bindable + ?Sized + 'static> Handle<T> {
    /// Wrap `cb` so it only runs while the target is alive.
    ///
    /// The returned closure yields `None` once the handle is stale.
    pub fn guard<A, R>(self, cb: impl Fn(&T, A) -> R) -> impl Fn(A) -> Option<R> {
        move |arg| self.upgrade().map(|target| cb(&target, arg))
    }
}

impl<T: ?Sized> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            target: Weak::clone(&self.target),
            part: self.part.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.part).finish()
    }
}
