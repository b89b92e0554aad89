#![forbid(unsafe_code)]

//! A set of bindable objects that forgets members as they are destroyed.
//!
//! Adding a member attaches a sentinel child part to it. The member's
//! destroy cascade reaches the sentinel, whose hook prunes the member from
//! the set. Deleting a member removes its entry first and then destroys the
//! sentinel, so the hook finds nothing left to prune.
//!
//! # Invariants
//!
//! 1. Every member is alive; a member leaves the set no later than its
//!    destroy cascade completes.
//! 2. Each member carries exactly one sentinel while it is in the set.
//! 3. Destroying the set clears it, destroying every sentinel.
//!
//! Sentinels are ordinary children, so they show up in the member's
//! [`children`](Part::children).

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use kotae_core::{ArraySet, Bindable, ContractViolation, Part, PartHooks, PartId, Scope};
use tracing::trace;

struct Member<T> {
    value: T,
    sentinel: Part,
}

struct Members<T> {
    order: ArraySet<PartId>,
    by_id: HashMap<PartId, Member<T>>,
}

impl<T> Members<T> {
    fn take(&mut self, id: PartId) -> Option<Member<T>> {
        let member = self.by_id.remove(&id)?;
        self.order.delete(&id);
        Some(member)
    }
}

struct PartSetInner<T> {
    part: Part,
    members: RefCell<Members<T>>,
}

impl<T: Bindable + Clone + 'static> PartSetInner<T> {
    fn clear(&self) {
        let drained = {
            let mut members = self.members.borrow_mut();
            members.order.clear();
            std::mem::take(&mut members.by_id)
        };
        for member in drained.into_values() {
            destroy_sentinel(&member.sentinel);
        }
    }
}

fn destroy_sentinel(sentinel: &Part) {
    if sentinel.state().is_active() {
        let _ = sentinel.destroy();
    }
}

/// Clears the set when its part is destroyed.
struct SetHooks<T> {
    set: Weak<PartSetInner<T>>,
}

impl<T: Bindable + Clone + 'static> PartHooks for SetHooks<T> {
    fn on_destroyed(&self, part: &Part) {
        if let Some(set) = self.set.upgrade() {
            trace!(set = %part.id(), members = set.members.borrow().by_id.len(), "part set destroyed");
            set.clear();
        }
    }
}

/// Prunes `member` from the set when the sentinel dies with it.
struct SentinelHooks<T> {
    set: Weak<PartSetInner<T>>,
    member: PartId,
}

impl<T: 'static> PartHooks for SentinelHooks<T> {
    fn on_destroyed(&self, sentinel: &Part) {
        let Some(set) = self.set.upgrade() else {
            return;
        };
        let pruned = {
            let mut members = set.members.borrow_mut();
            let owns_entry = members
                .by_id
                .get(&self.member)
                .is_some_and(|m| m.sentinel.ptr_eq(sentinel));
            if owns_entry {
                members.take(self.member)
            } else {
                None
            }
        };
        if pruned.is_some() {
            trace!(set = %set.part.id(), member = %self.member, "member pruned");
        }
    }
}

// ---------------------------------------------------------------------------
// PartSet
// ---------------------------------------------------------------------------

/// A bindable set of bindable objects, keyed by part identity.
///
/// Cloning yields another handle to the **same** set.
pub struct PartSet<T: 'static> {
    inner: Rc<PartSetInner<T>>,
}

impl<T: Bindable + Clone + 'static> PartSet<T> {
    pub fn new(scope: &(impl Scope + ?Sized)) -> Self {
        let inner = Rc::new_cyclic(|weak| PartSetInner {
            part: Part::builder()
                .label("part_set")
                .hooks(SetHooks { set: weak.clone() })
                .build(scope),
            members: RefCell::new(Members {
                order: ArraySet::new(),
                by_id: HashMap::new(),
            }),
        });
        Self { inner }
    }

    /// Insert `value`. Returns `false` if it is already a member.
    ///
    /// # Errors
    ///
    /// - [`ContractViolation::DeadPart`] if `value` is destroyed or being
    ///   destroyed.
    /// - [`ContractViolation::InvalidTransition`] if the set itself is.
    pub fn add(&self, value: T) -> Result<bool, ContractViolation> {
        let set = &self.inner.part;
        if !set.state().is_active() {
            return set.config().violation(ContractViolation::InvalidTransition {
                part: set.id(),
                state: set.state(),
                op: "part_set.add",
            });
        }
        let member = value.part();
        if !member.state().is_active() {
            return set
                .config()
                .violation(ContractViolation::DeadPart { part: member.id() });
        }
        let id = member.id();
        if self.has(&value) {
            return Ok(false);
        }

        let sentinel = Part::builder()
            .label("part_set.sentinel")
            .hooks(SentinelHooks {
                set: Rc::downgrade(&self.inner),
                member: id,
            })
            .build(member);
        let mut members = self.inner.members.borrow_mut();
        members.order.add(id);
        members.by_id.insert(id, Member { value, sentinel });
        Ok(true)
    }

    #[must_use]
    pub fn has(&self, value: &T) -> bool {
        self.inner
            .members
            .borrow()
            .by_id
            .contains_key(&value.part().id())
    }

    /// Remove `value` and destroy its sentinel. Returns whether it was a
    /// member.
    pub fn delete(&self, value: &T) -> bool {
        let removed = self.inner.members.borrow_mut().take(value.part().id());
        match removed {
            Some(member) => {
                destroy_sentinel(&member.sentinel);
                true
            }
            None => false,
        }
    }

    /// Remove every member.
    pub fn clear(&self) {
        self.inner.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.members.borrow().by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the members.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        let members = self.inner.members.borrow();
        members
            .order
            .iter()
            .filter_map(|id| members.by_id.get(id))
            .map(|member| member.value.clone())
            .collect()
    }

    /// Iterate over a snapshot of the members.
    ///
    /// The set may be mutated while iterating.
    pub fn iter(&self) -> std::vec::IntoIter<T> {
        self.to_vec().into_iter()
    }
}

impl<T: Bindable + Clone + 'static> IntoIterator for &PartSet<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: 'static> Bindable for PartSet<T> {
    fn part(&self) -> &Part {
        &self.inner.part
    }
}

impl<T: 'static> Clone for PartSet<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> fmt::Debug for PartSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members = self.inner.members.borrow();
        f.debug_struct("PartSet")
            .field("part", &self.inner.part.id())
            .field("members", &members.order.as_slice())
            .finish()
    }
}
