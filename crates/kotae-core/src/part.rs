#![forbid(unsafe_code)]

//! The ownership tree.
//!
//! A [`Part`] is a reference-counted node with at most one parent and an
//! indexed list of children. Parents hold their children strongly; children
//! point back at their parent weakly, so dropping the last handle to a root
//! releases the whole subtree. The *logical* lifetime of a part is separate
//! from its memory and is driven by [`Part::attach`] and [`Part::destroy`].
//!
//! # Invariants
//!
//! 1. `parent.children[child.index] == child` for every parented part.
//! 2. Detaching is an O(1) swap-remove; the child moved into the vacated slot
//!    has its stored index rewritten.
//! 3. A part is never its own ancestor.
//! 4. Adopting an `Inert` part under a `Bound` parent binds it immediately.
//! 5. `destroy` cascades over the children present when it was invoked and
//!    always ends in `Destroyed`, even when a hook panics. The cascade still
//!    reaches every snapshotted child in that case.
//!
//! # Failure Modes
//!
//! | Mode | Condition | Behavior |
//! |------|-----------|----------|
//! | Double destroy | `destroy` outside `Inert`/`Bound` | `InvalidTransition` |
//! | Cyclic reparent | new parent is a descendant | `CyclicParent`, tree untouched |
//! | Hook panic | hook unwinds mid-destroy | guard destroys children, orphans, marks `Destroyed`, panic propagates |

use std::any::Any;
use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error, trace};

use crate::config::RuntimeConfig;
use crate::contract::ContractViolation;
use crate::entity::{Entity, EntitySlots};
use crate::key::ReadCap;
use crate::lifecycle::LifecycleState;
use crate::logging::panic_message;
use crate::scope::Scope;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Process-unique identifier of a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartId(u64);

impl PartId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "part#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Per-kind lifecycle callbacks.
///
/// All methods default to no-ops. The child cascade and orphaning performed
/// by [`Part::destroy`] always run after `on_destroyed`, even if it unwinds.
pub trait PartHooks {
    /// Called after the part transitions to `Bound`, before its children bind.
    fn on_bound(&self, _part: &Part) {}
    /// Called at the start of destruction when the part was bound.
    fn on_unbound(&self, _part: &Part) {}
    /// Called during destruction, before the children are destroyed.
    fn on_destroyed(&self, _part: &Part) {}
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

pub(crate) struct PartNode {
    id: PartId,
    label: Option<Cow<'static, str>>,
    config: Rc<RuntimeConfig>,
    state: Cell<LifecycleState>,
    generation: Cell<u32>,
    parent: RefCell<Weak<PartNode>>,
    /// Position inside the parent's `children`. Meaningless while unparented.
    index: Cell<usize>,
    children: RefCell<Vec<Part>>,
    hooks: Option<Box<dyn PartHooks>>,
    slots: Option<Rc<EntitySlots>>,
}

/// Builder for parts carrying a label, hooks, or both.
#[derive(Default)]
pub struct PartBuilder {
    label: Option<Cow<'static, str>>,
    hooks: Option<Box<dyn PartHooks>>,
    slots: Option<Rc<EntitySlots>>,
}

impl fmt::Debug for PartBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartBuilder")
            .field("label", &self.label)
            .field("has_hooks", &self.hooks.is_some())
            .finish_non_exhaustive()
    }
}

impl PartBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set a debug label.
    #[must_use]
    pub fn label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Builder: set lifecycle hooks.
    #[must_use]
    pub fn hooks(mut self, hooks: impl PartHooks + 'static) -> Self {
        self.hooks = Some(Box::new(hooks));
        self
    }

    pub(crate) fn slots(mut self, slots: Rc<EntitySlots>) -> Self {
        self.slots = Some(slots);
        self
    }

    /// Build an unparented part using `config`.
    #[must_use]
    pub fn build_detached(self, config: &Rc<RuntimeConfig>) -> Part {
        Part {
            node: Rc::new(PartNode {
                id: PartId::next(),
                label: self.label,
                config: Rc::clone(config),
                state: Cell::new(LifecycleState::Inert),
                generation: Cell::new(0),
                parent: RefCell::new(Weak::new()),
                index: Cell::new(0),
                children: RefCell::new(Vec::new()),
                hooks: self.hooks,
                slots: self.slots,
            }),
        }
    }

    /// Build a part under `scope`.
    ///
    /// If the scope's owner can no longer adopt children the violation is
    /// reported through the configuration and the part is left unparented.
    pub fn build(self, scope: &(impl Scope + ?Sized)) -> Part {
        let part = self.build_detached(scope.config());
        if let Some(owner) = scope.owner() {
            if let Err(err) = part.set_parent(Some(owner)) {
                debug!(part = %part.id(), error = %err, "part created without a parent");
            }
        }
        part
    }
}

// ---------------------------------------------------------------------------
// Part
// ---------------------------------------------------------------------------

/// A node in the ownership tree.
///
/// Cloning a `Part` yields another handle to the **same** node.
#[derive(Clone)]
pub struct Part {
    node: Rc<PartNode>,
}

impl Part {
    /// Create an unlabeled part under `scope`.
    pub fn new(scope: &(impl Scope + ?Sized)) -> Self {
        PartBuilder::new().build(scope)
    }

    #[must_use]
    pub fn builder() -> PartBuilder {
        PartBuilder::new()
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> PartId {
        self.node.id
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.node.label.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.node.state.get()
    }

    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &Rc<RuntimeConfig> {
        &self.node.config
    }

    /// Current generation; advances once when the part is destroyed.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.node.generation.get()
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakPart {
        WeakPart {
            node: Rc::downgrade(&self.node),
            id: self.id(),
            generation: self.generation(),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Part) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }

    #[must_use]
    pub fn parent(&self) -> Option<Part> {
        self.node.parent.borrow().upgrade().map(|node| Part { node })
    }

    /// Snapshot of the current children.
    #[must_use]
    pub fn children(&self) -> Vec<Part> {
        self.node.children.borrow().clone()
    }

    #[must_use]
    pub fn child_count(&self) -> usize {
        self.node.children.borrow().len()
    }

    /// Walk up the parent chain.
    pub fn ancestors(&self, include_self: bool) -> Ancestors {
        Ancestors {
            next: if include_self {
                Some(self.clone())
            } else {
                self.parent()
            },
        }
    }

    /// Depth-first, pre-order list of the subtree.
    #[must_use]
    pub fn descendants(&self, include_self: bool) -> Vec<Part> {
        let mut out = Vec::new();
        let mut stack: Vec<Part> = if include_self {
            vec![self.clone()]
        } else {
            self.children().into_iter().rev().collect()
        };
        while let Some(part) = stack.pop() {
            stack.extend(part.children().into_iter().rev());
            out.push(part);
        }
        out
    }

    /// `true` when `self` appears on `other`'s ancestor chain, `other` included.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Part) -> bool {
        other.ancestors(true).any(|ancestor| ancestor.ptr_eq(self))
    }

    #[must_use]
    pub fn is_descendant_of(&self, other: &Part) -> bool {
        other.is_ancestor_of(self)
    }

    /// Move this part under `new_parent` (or make it a root).
    ///
    /// Adopting an inert part under a bound parent attaches it.
    ///
    /// # Errors
    ///
    /// - [`ContractViolation::DeadPart`] if this part is being destroyed.
    /// - [`ContractViolation::DeadParent`] if `new_parent` is.
    /// - [`ContractViolation::CyclicParent`] if `new_parent` is this part or
    ///   one of its descendants.
    pub fn set_parent(&self, new_parent: Option<&Part>) -> Result<(), ContractViolation> {
        if !self.state().is_active() {
            return self
                .config()
                .violation(ContractViolation::DeadPart { part: self.id() });
        }

        if let Some(parent) = new_parent {
            if !parent.state().is_active() {
                return self.config().violation(ContractViolation::DeadParent {
                    part: self.id(),
                    parent: parent.id(),
                });
            }
        }

        let unchanged = match (self.parent(), new_parent) {
            (None, None) => true,
            (Some(old), Some(new)) => old.ptr_eq(new),
            _ => false,
        };
        if unchanged {
            return Ok(());
        }

        if let Some(parent) = new_parent {
            if self.is_ancestor_of(parent) {
                return self.config().violation(ContractViolation::CyclicParent {
                    part: self.id(),
                    parent: parent.id(),
                });
            }
        }

        self.detach();

        let Some(parent) = new_parent else {
            return Ok(());
        };
        {
            let mut siblings = parent.node.children.borrow_mut();
            self.node.index.set(siblings.len());
            siblings.push(self.clone());
        }
        *self.node.parent.borrow_mut() = Rc::downgrade(&parent.node);
        trace!(part = %self.id(), parent = %parent.id(), "part reparented");

        if parent.state() == LifecycleState::Bound && self.state() == LifecycleState::Inert {
            self.attach()?;
        }
        Ok(())
    }

    /// Swap-remove this part from its parent's children.
    fn detach(&self) {
        let Some(old) = self.node.parent.replace(Weak::new()).upgrade() else {
            return;
        };
        let index = self.node.index.get();
        let mut siblings = old.children.borrow_mut();
        debug_assert!(
            siblings.get(index).is_some_and(|s| s.ptr_eq(self)),
            "stale child index for {}",
            self.id()
        );
        siblings.swap_remove(index);
        if let Some(moved) = siblings.get(index) {
            moved.node.index.set(index);
        }
    }

    /// Bind this part and every inert descendant.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::InvalidTransition`] unless the part is `Inert`.
    pub fn attach(&self) -> Result<(), ContractViolation> {
        let state = self.state();
        let Some(next) = state.attached() else {
            return self.config().violation(ContractViolation::InvalidTransition {
                part: self.id(),
                state,
                op: "attach",
            });
        };
        self.node.state.set(next);
        trace!(part = %self.id(), "part bound");

        if let Some(hooks) = &self.node.hooks {
            hooks.on_bound(self);
        }
        for child in self.children() {
            if child.state() == LifecycleState::Inert {
                child.attach()?;
            }
        }
        Ok(())
    }

    /// Destroy this part and, depth-first, its subtree.
    ///
    /// Runs `on_unbound` (if bound), the entity finalizer (if any),
    /// `on_destroyed`, then destroys the children that were present when this
    /// call began, orphans the part, and marks it `Destroyed`.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::InvalidTransition`] unless the part is `Inert` or
    /// `Bound`. Destroying twice is a caller bug.
    pub fn destroy(&self) -> Result<(), ContractViolation> {
        let state = self.state();
        let Some(next) = state.destroying() else {
            return self.config().violation(ContractViolation::InvalidTransition {
                part: self.id(),
                state,
                op: "destroy",
            });
        };
        self.node.state.set(next);
        let _finish = FinishDestroy {
            part: self,
            children: self.children(),
        };

        if let Some(hooks) = &self.node.hooks {
            if state == LifecycleState::Bound {
                hooks.on_unbound(self);
            }
        }
        if let Some(slots) = &self.node.slots {
            slots.run_finalizer();
        }
        if let Some(hooks) = &self.node.hooks {
            hooks.on_destroyed(self);
        }
        Ok(())
    }

    /// This part viewed as an entity, if it is one.
    #[must_use]
    pub fn as_entity(&self) -> Option<Entity> {
        self.node
            .slots
            .as_ref()
            .map(|slots| Entity::from_parts(self.clone(), Rc::clone(slots)))
    }

    /// Nearest strict ancestor that is an entity.
    #[must_use]
    pub fn parent_entity(&self) -> Option<Entity> {
        self.ancestors(false).find_map(|part| part.as_entity())
    }

    /// Entities on the ancestor chain, nearest first, `self` included.
    pub fn ancestor_entities(&self) -> impl Iterator<Item = Entity> {
        self.ancestors(true).filter_map(|part| part.as_entity())
    }

    /// Look `key` up on the nearest ancestor entity that has it.
    pub fn try_deep_get<T: Clone + 'static>(&self, key: &impl ReadCap<T>) -> Option<T> {
        self.ancestor_entities().find_map(|entity| entity.try_get(key))
    }

    /// Like [`try_deep_get`](Self::try_deep_get), for components known to exist.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::MissingComponent`] if no ancestor entity has `key`.
    pub fn deep_get<T: Clone + 'static>(&self, key: &impl ReadCap<T>) -> Result<T, ContractViolation> {
        match self.try_deep_get(key) {
            Some(component) => Ok(component),
            None => self.config().violation(ContractViolation::MissingComponent {
                owner: self.id(),
                key: key.raw().to_string(),
            }),
        }
    }
}

/// Completes `destroy` even when a hook unwinds.
///
/// Destroys the children snapshotted at the start of `destroy`, then orphans
/// the part. A panic from one child does not stop its siblings; the first
/// payload is re-raised once the cascade is done, unless the part's own hooks
/// are already unwinding.
struct FinishDestroy<'a> {
    part: &'a Part,
    children: Vec<Part>,
}

impl FinishDestroy<'_> {
    fn destroy_children(&mut self) -> Option<Box<dyn Any + Send>> {
        let mut first_panic = None;
        for child in std::mem::take(&mut self.children) {
            // Hooks may already have destroyed or moved some children.
            let still_ours = child.parent().is_some_and(|p| p.ptr_eq(self.part));
            if !still_ours || !child.state().is_active() {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| child.destroy())) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    debug!(part = %child.id(), error = %err, "child destroy rejected");
                }
                Err(payload) => {
                    error!(
                        part = %child.id(),
                        parent = %self.part.id(),
                        panic = panic_message(payload.as_ref()),
                        "child destroy panicked"
                    );
                    if first_panic.is_none() {
                        first_panic = Some(payload);
                    }
                }
            }
        }
        first_panic
    }
}

impl Drop for FinishDestroy<'_> {
    fn drop(&mut self) {
        let child_panic = self.destroy_children();

        let node = &self.part.node;
        self.part.detach();
        node.state.set(LifecycleState::Destroyed);
        node.generation.set(node.generation.get().wrapping_add(1));
        if let Some(slots) = &node.slots {
            slots.clear();
        }
        trace!(part = %node.id, "part destroyed");

        if let Some(payload) = child_panic {
            if !std::thread::panicking() {
                panic::resume_unwind(payload);
            }
        }
    }
}

impl PartialEq for Part {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Part {}

impl Hash for Part {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Part")
            .field("id", &self.id())
            .field("label", &self.label())
            .field("state", &self.state())
            .field("children", &self.child_count())
            .finish()
    }
}

/// Iterator over a part's ancestor chain.
#[derive(Debug)]
pub struct Ancestors {
    next: Option<Part>,
}

impl Iterator for Ancestors {
    type Item = Part;

    fn next(&mut self) -> Option<Part> {
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}

// ---------------------------------------------------------------------------
// Weak handles
// ---------------------------------------------------------------------------

/// Generation-tagged weak reference to a part.
///
/// Dereferencing fails once the part is destroyed, even while its memory is
/// still reachable through other handles.
#[derive(Clone)]
pub struct WeakPart {
    node: Weak<PartNode>,
    id: PartId,
    generation: u32,
}

impl WeakPart {
    #[must_use]
    pub fn id(&self) -> PartId {
        self.id
    }

    /// The part, if it is still alive and of the same generation.
    #[must_use]
    pub fn upgrade(&self) -> Option<Part> {
        let node = self.node.upgrade()?;
        let valid = node.generation.get() == self.generation && node.state.get().is_alive();
        valid.then(|| Part { node })
    }

    /// # Errors
    ///
    /// [`ContractViolation::StaleHandle`] once the part has been destroyed.
    pub fn get(&self) -> Result<Part, ContractViolation> {
        self.upgrade()
            .ok_or(ContractViolation::StaleHandle { part: self.id })
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.upgrade().is_some()
    }
}

impl fmt::Debug for WeakPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPart")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("alive", &self.is_alive())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
