#![forbid(unsafe_code)]

//! Entities: parts that host typed components.
//!
//! Components live in a small per-entity map from [`KeyId`] to a type-erased
//! box; the key's static type recovers the concrete value at the call site.
//! Reads hand back clones, so components are usually cheap handles
//! (`Rc<...>`, [`Part`], observable containers).
//!
//! The same component may be registered under several keys, which is how
//! polymorphic lookup works: register the concrete `Rc<MathBlock>` under its
//! own key and the coerced `Rc<dyn Block>` under an interface key.

use std::any::Any;
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::contract::ContractViolation;
use crate::key::{KeyId, RawKey, ReadCap, WriteCap};
use crate::lifecycle::Bindable;
use crate::part::{Part, PartBuilder, PartHooks, PartId};
use crate::scope::Scope;

type Finalizer = Box<dyn FnOnce()>;

/// Component storage attached to an entity's part node.
pub(crate) struct EntitySlots {
    name: Cow<'static, str>,
    components: RefCell<HashMap<KeyId, Box<dyn Any>>>,
    finalizer: RefCell<Option<Finalizer>>,
}

impl EntitySlots {
    fn new(name: Cow<'static, str>) -> Self {
        Self {
            name,
            components: RefCell::new(HashMap::new()),
            finalizer: RefCell::new(None),
        }
    }

    pub(crate) fn run_finalizer(&self) {
        let finalizer = self.finalizer.borrow_mut().take();
        if let Some(finalizer) = finalizer {
            finalizer();
        }
    }

    /// Drop every component. Values are dropped outside the borrow.
    pub(crate) fn clear(&self) {
        let drained = std::mem::take(&mut *self.components.borrow_mut());
        drop(drained);
    }
}

/// A part with typed component slots.
#[derive(Clone)]
pub struct Entity {
    part: Part,
    slots: Rc<EntitySlots>,
}

impl Entity {
    /// Create an entity under `scope`.
    pub fn new(scope: &(impl Scope + ?Sized), name: impl Into<Cow<'static, str>>) -> Self {
        Self::build(scope, name, PartBuilder::new())
    }

    /// Create an entity with lifecycle hooks.
    pub fn with_hooks(
        scope: &(impl Scope + ?Sized),
        name: impl Into<Cow<'static, str>>,
        hooks: impl PartHooks + 'static,
    ) -> Self {
        Self::build(scope, name, PartBuilder::new().hooks(hooks))
    }

    fn build(
        scope: &(impl Scope + ?Sized),
        name: impl Into<Cow<'static, str>>,
        builder: PartBuilder,
    ) -> Self {
        let name = name.into();
        let slots = Rc::new(EntitySlots::new(name.clone()));
        let part = builder.label(name).slots(Rc::clone(&slots)).build(scope);
        Self { part, slots }
    }

    pub(crate) fn from_parts(part: Part, slots: Rc<EntitySlots>) -> Self {
        Self { part, slots }
    }

    #[must_use]
    pub fn id(&self) -> PartId {
        self.part.id()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.slots.name
    }

    /// Store `component` under every key in `keys` and hand it back.
    ///
    /// # Errors
    ///
    /// - [`ContractViolation::DuplicateComponent`] if any key already holds a
    ///   component; nothing is stored in that case.
    /// - [`ContractViolation::InvalidTransition`] if the entity is destroyed.
    pub fn register<T: Clone + 'static>(
        &self,
        component: T,
        keys: &[&dyn WriteCap<T>],
    ) -> Result<T, ContractViolation> {
        self.check_free(keys, "register")?;
        Ok(self.store(component, keys))
    }

    /// Parent `component` under this entity, then [`register`](Self::register) it.
    ///
    /// The component's lifetime becomes bounded by the entity's. Keys are
    /// checked before the component moves, so a rejected `add` leaves it
    /// where it was.
    ///
    /// # Errors
    ///
    /// Any violation from reparenting or registration.
    pub fn add<T: Bindable + Clone + 'static>(
        &self,
        component: T,
        keys: &[&dyn WriteCap<T>],
    ) -> Result<T, ContractViolation> {
        self.check_free(keys, "add")?;
        component.part().set_parent(Some(&self.part))?;
        Ok(self.store(component, keys))
    }

    fn check_free<T>(
        &self,
        keys: &[&dyn WriteCap<T>],
        op: &'static str,
    ) -> Result<(), ContractViolation> {
        if !self.part.is_alive() {
            return self.part.config().violation(ContractViolation::InvalidTransition {
                part: self.id(),
                state: self.part.state(),
                op,
            });
        }

        let components = self.slots.components.borrow();
        let taken = keys
            .iter()
            .map(|key| key.raw())
            .find(|raw| components.contains_key(&raw.id()));
        match taken {
            Some(raw) => self.part.config().violation(ContractViolation::DuplicateComponent {
                entity: self.id(),
                key: raw.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn store<T: Clone + 'static>(&self, component: T, keys: &[&dyn WriteCap<T>]) -> T {
        let mut components = self.slots.components.borrow_mut();
        for key in keys {
            components.insert(key.raw().id(), Box::new(component.clone()));
        }
        component
    }

    /// Fluent form of [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn with<T: Clone + 'static>(
        self,
        component: T,
        keys: &[&dyn WriteCap<T>],
    ) -> Result<Self, ContractViolation> {
        self.register(component, keys)?;
        Ok(self)
    }

    /// Run `finalizer` when the entity is destroyed.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::DuplicateFinalizer`] if one is already set.
    pub fn set_finalizer(&self, finalizer: impl FnOnce() + 'static) -> Result<(), ContractViolation> {
        let mut slot = self.slots.finalizer.borrow_mut();
        if slot.is_some() {
            drop(slot);
            return self
                .part
                .config()
                .violation(ContractViolation::DuplicateFinalizer { entity: self.id() });
        }
        *slot = Some(Box::new(finalizer));
        Ok(())
    }

    #[must_use]
    pub fn try_get<T: Clone + 'static>(&self, key: &impl ReadCap<T>) -> Option<T> {
        self.with_component(key, T::clone)
    }

    /// Fetch a component that is known to exist by construction.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::MissingComponent`] if it does not.
    pub fn get<T: Clone + 'static>(&self, key: &impl ReadCap<T>) -> Result<T, ContractViolation> {
        match self.try_get(key) {
            Some(component) => Ok(component),
            None => self.part.config().violation(ContractViolation::MissingComponent {
                owner: self.id(),
                key: key.raw().to_string(),
            }),
        }
    }

    #[must_use]
    pub fn has<T>(&self, key: &impl ReadCap<T>) -> bool {
        self.slots
            .components
            .borrow()
            .contains_key(&key.raw().id())
    }

    /// Borrow a component without cloning it.
    ///
    /// The slot map stays borrowed while `f` runs; `f` must not register or
    /// remove components on this entity.
    pub fn with_component<T: 'static, R>(
        &self,
        key: &impl ReadCap<T>,
        f: impl FnOnce(&T) -> R,
    ) -> Option<R> {
        let components = self.slots.components.borrow();
        components
            .get(&key.raw().id())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .map(f)
    }

    pub(crate) fn write_slot<T: 'static>(&self, key: RawKey, value: T) {
        let previous = self
            .slots
            .components
            .borrow_mut()
            .insert(key.id(), Box::new(value));
        drop(previous);
    }

    pub(crate) fn remove_slot<T: 'static>(&self, key: RawKey) -> Option<T> {
        let removed = self.slots.components.borrow_mut().remove(&key.id());
        removed
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }
}

impl Bindable for Entity {
    fn part(&self) -> &Part {
        &self.part
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.part == other.part
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.part.hash(state);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.name())
            .field("id", &self.id())
            .field("state", &self.part.state())
            .field("components", &self.slots.components.borrow().len())
            .finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::key::TypedKey;
    use crate::lifecycle::LifecycleState;
    use crate::scope::Runtime;
    use std::cell::Cell;

    trait Block {
        fn kind(&self) -> &'static str;
    }

    struct MathBlock;

    impl Block for MathBlock {
        fn kind(&self) -> &'static str {
            "math"
        }
    }

    fn lenient() -> Runtime {
        Runtime::new(RuntimeConfig::new().with_strict_contracts(false))
    }

    #[test]
    fn register_is_fluent_and_readable() {
        let rt = lenient();
        let entity = rt.entity("doc");
        let key = TypedKey::<u32>::new("count");

        assert_eq!(entity.register(5_u32, &[&key]), Ok(5));
        assert_eq!(entity.get(&key), Ok(5));
        assert_eq!(entity.try_get(&key.reader()), Some(5));
        assert!(entity.has(&key));
    }

    #[test]
    fn polymorphic_lookup_under_two_keys() {
        let rt = lenient();
        let entity = rt.entity("block");
        let concrete = TypedKey::<Rc<MathBlock>>::new("math_block");
        let interface = TypedKey::<Rc<dyn Block>>::new("block");

        let block = entity.register(Rc::new(MathBlock), &[&concrete]).unwrap();
        entity.register(block.clone() as Rc<dyn Block>, &[&interface]).unwrap();

        let via_interface = entity.get(&interface).unwrap();
        assert_eq!(via_interface.kind(), "math");
        assert!(Rc::ptr_eq(&entity.get(&concrete).unwrap(), &block));
    }

    #[test]
    fn same_value_under_several_keys() {
        let rt = lenient();
        let entity = rt.entity("e");
        let a = TypedKey::<&'static str>::new("a");
        let b = TypedKey::<&'static str>::new("b");
        entity.register("shared", &[&a, &b]).unwrap();
        assert_eq!(entity.get(&a), Ok("shared"));
        assert_eq!(entity.get(&b.reader()), Ok("shared"));
    }

    #[test]
    fn missing_component_is_a_violation() {
        let rt = lenient();
        let entity = rt.entity("e");
        let key = TypedKey::<u8>::new("absent");
        assert!(matches!(
            entity.get(&key),
            Err(ContractViolation::MissingComponent { .. })
        ));
        assert_eq!(entity.try_get(&key), None);
    }

    #[test]
    fn duplicate_registration_stores_nothing() {
        let rt = lenient();
        let entity = rt.entity("e");
        let a = TypedKey::<u8>::new("a");
        let b = TypedKey::<u8>::new("b");
        entity.register(1_u8, &[&a]).unwrap();

        let err = entity.register(2_u8, &[&b, &a]).unwrap_err();
        assert!(matches!(err, ContractViolation::DuplicateComponent { .. }));
        assert!(!entity.has(&b));
        assert_eq!(entity.get(&a), Ok(1));
    }

    #[test]
    fn add_bounds_component_lifetime() {
        let rt = lenient();
        let entity = rt.entity("owner");
        let key = TypedKey::<Part>::new("child");
        let component = entity.add(Part::new(&rt), &[&key]).unwrap();

        assert_eq!(component.parent(), Some(entity.part().clone()));
        entity.part().destroy().unwrap();
        assert_eq!(component.state(), LifecycleState::Destroyed);
        assert!(!entity.has(&key));
    }

    #[test]
    fn rejected_add_leaves_component_in_place() {
        let rt = lenient();
        let home = Part::new(&rt);
        let entity = rt.entity("owner");
        let key = TypedKey::<Part>::new("child");
        entity.add(Part::new(&rt), &[&key]).unwrap();

        let stray = Part::new(&home);
        let err = entity.add(stray.clone(), &[&key]).unwrap_err();
        assert!(matches!(err, ContractViolation::DuplicateComponent { .. }));
        assert_eq!(stray.parent(), Some(home.clone()));
        assert_eq!(entity.part().child_count(), 1);
    }

    #[test]
    fn finalizer_runs_once_on_destroy() {
        let rt = lenient();
        let entity = rt.entity("e");
        let ran = Rc::new(Cell::new(0));
        let counter = Rc::clone(&ran);
        entity.set_finalizer(move || counter.set(counter.get() + 1)).unwrap();
        assert!(matches!(
            entity.set_finalizer(|| {}),
            Err(ContractViolation::DuplicateFinalizer { .. })
        ));

        entity.part().destroy().unwrap();
        assert_eq!(ran.get(), 1);
    }

    #[test]
    fn deep_get_walks_ancestor_entities() {
        let rt = lenient();
        let outer = rt.entity("outer");
        let inner = Entity::new(&outer, "inner");
        let leaf = Part::new(&inner);
        let theme = TypedKey::<&'static str>::new("theme");
        let font = TypedKey::<&'static str>::new("font");

        outer.register("dark", &[&theme]).unwrap();
        outer.register("serif", &[&font]).unwrap();
        inner.register("mono", &[&font]).unwrap();

        assert_eq!(leaf.deep_get(&theme), Ok("dark"));
        assert_eq!(leaf.deep_get(&font), Ok("mono"));
        assert_eq!(leaf.parent_entity(), Some(inner.clone()));
        assert_eq!(inner.part().parent_entity(), Some(outer.clone()));
        assert_eq!(Part::new(&rt).try_deep_get(&theme), None);
    }

    #[test]
    fn part_view_round_trips_to_entity() {
        let rt = lenient();
        let entity = rt.entity("e");
        assert_eq!(entity.part().as_entity(), Some(entity.clone()));
        assert_eq!(Part::new(&rt).as_entity(), None);
        assert_eq!(entity.to_string(), "Entity(e)");
    }
}
