#![forbid(unsafe_code)]

//! Lifecycle state machine shared by every bindable object.
//!
//! ```text
//!   Inert ──attach──▶ Bound
//!     │                 │
//!  destroy           destroy
//!     ▼                 ▼
//! DestroyingInert  DestroyingBound
//!     └──────┬──────────┘
//!            ▼
//!        Destroyed
//! ```
//!
//! # Invariants
//!
//! 1. Transitions only move forward; `Destroyed` is terminal.
//! 2. `is_alive` holds in every state except `Destroyed`.
//! 3. `Destroying*` remembers whether the object was bound, so teardown
//!    knows whether to run the unbind hook.

use std::fmt;
use std::rc::Rc;

use crate::part::Part;

/// Lifecycle state of a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Constructed, not yet attached.
    Inert,
    /// Attached under a bound ancestor (or explicitly).
    Bound,
    /// Destruction in progress; was never bound.
    DestroyingInert,
    /// Destruction in progress; was bound.
    DestroyingBound,
    /// Terminal.
    Destroyed,
}

impl LifecycleState {
    /// Every state except `Destroyed`.
    #[inline]
    #[must_use]
    pub const fn is_alive(self) -> bool {
        !matches!(self, Self::Destroyed)
    }

    /// `Inert` or `Bound`: alive and not yet condemned.
    #[inline]
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Inert | Self::Bound)
    }

    /// Bound, including while being destroyed.
    #[inline]
    #[must_use]
    pub const fn is_bound(self) -> bool {
        matches!(self, Self::Bound | Self::DestroyingBound)
    }

    #[inline]
    #[must_use]
    pub const fn is_destroying(self) -> bool {
        matches!(self, Self::DestroyingInert | Self::DestroyingBound)
    }

    /// State reached by `attach`, if legal from here.
    #[must_use]
    pub const fn attached(self) -> Option<Self> {
        match self {
            Self::Inert => Some(Self::Bound),
            _ => None,
        }
    }

    /// State reached by `destroy`, if legal from here.
    #[must_use]
    pub const fn destroying(self) -> Option<Self> {
        match self {
            Self::Inert => Some(Self::DestroyingInert),
            Self::Bound => Some(Self::DestroyingBound),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Inert => "Inert",
            Self::Bound => "Bound",
            Self::DestroyingInert => "DestroyingInert",
            Self::DestroyingBound => "DestroyingBound",
            Self::Destroyed => "Destroyed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Anything whose lifetime is tracked by a [`Part`] in the ownership tree.
pub trait Bindable {
    /// The part carrying this object's lifecycle.
    fn part(&self) -> &Part;

    fn state(&self) -> LifecycleState {
        self.part().state()
    }

    fn is_alive(&self) -> bool {
        self.state().is_alive()
    }
}

impl Bindable for Part {
    fn part(&self) -> &Part {
        self
    }
}

impl<T: Bindable + ?Sized> Bindable for Rc<T> {
    fn part(&self) -> &Part {
        (**self).part()
    }
}
