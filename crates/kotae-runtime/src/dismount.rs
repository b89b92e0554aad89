#![forbid(unsafe_code)]

//! Dismount notification for component trees.
//!
//! A [`Dismounter`] lives on an entity under the well-known
//! [`Dismounter::key`]. Components anywhere below that entity subscribe with
//! [`register_comp_dismounter`]; when the tree is dismounted every handler
//! receives the in-flight [`CleanupExecutor`] and registers its teardown
//! tasks there, so the whole tree tears down in dependency order in a single
//! pass.
//!
//! # Failure Modes
//!
//! | Mode | Condition | Behavior |
//! |------|-----------|----------|
//! | Double dismount | `dismount` on an unmounted dismounter | `NotMounted` violation |
//! | Missing dismounter | no ancestor entity holds the key | `MissingComponent` violation |
//! | Handler panic | a handler unwinds | logged at `error`, remaining handlers still run |

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::LazyLock;

use kotae_core::{Bindable, CleanupExecutor, ContractViolation, Entity, Part, PartId, Scope, TypedKey};
use tracing::debug;

use crate::reactive::{Connection, Signal, Subscriber};

static DISMOUNTER_KEY: LazyLock<TypedKey<Rc<Dismounter>>> =
    LazyLock::new(|| TypedKey::new("dismounter"));

/// Fans a dismount out to every registered component handler.
pub struct Dismounter {
    part: Part,
    on_dismount: Signal<CleanupExecutor>,
    mounted: Cell<bool>,
}

impl Dismounter {
    /// The key dismounters are registered under.
    #[must_use]
    pub fn key() -> TypedKey<Rc<Dismounter>> {
        *DISMOUNTER_KEY
    }

    /// Create a mounted dismounter under `scope` without registering it.
    #[must_use]
    pub fn new(scope: &(impl Scope + ?Sized)) -> Rc<Self> {
        let part = Part::builder().label("dismounter").build(scope);
        let on_dismount = Signal::labeled(&part, "dismounter.on_dismount");
        Rc::new(Self {
            part,
            on_dismount,
            mounted: Cell::new(true),
        })
    }

    /// Create a dismounter owned by `entity` and register it under
    /// [`Dismounter::key`].
    ///
    /// # Errors
    ///
    /// [`ContractViolation::DuplicateComponent`] if `entity` already has one.
    pub fn install(entity: &Entity) -> Result<Rc<Self>, ContractViolation> {
        let dismounter = Self::new(entity);
        entity
            .register(Rc::clone(&dismounter), &[&Self::key()])
            .inspect_err(|_| {
                let _ = dismounter.part.destroy();
            })
    }

    #[must_use]
    pub fn on_dismount(&self) -> Subscriber<'_, CleanupExecutor> {
        self.on_dismount.subscriber()
    }

    #[inline]
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mounted.get()
    }

    /// Mark the tree unmounted and let every handler register its teardown
    /// on `cx`.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::NotMounted`] if already dismounted.
    pub fn dismount(&self, cx: &CleanupExecutor) -> Result<(), ContractViolation> {
        if !self.mounted.replace(false) {
            return self.part.config().violation(ContractViolation::NotMounted);
        }
        debug!(
            dismounter = %self.part.id(),
            handlers = self.on_dismount.connection_count(),
            "dismounting"
        );
        self.on_dismount.fire(cx);
        Ok(())
    }

    /// [`dismount`](Self::dismount) inside a fresh executor pass.
    ///
    /// # Errors
    ///
    /// See [`dismount`](Self::dismount).
    pub fn dismount_as_root(&self) -> Result<(), ContractViolation> {
        CleanupExecutor::<PartId>::run(&self.part, |cx| self.dismount(cx))
    }
}

impl Bindable for Dismounter {
    fn part(&self) -> &Part {
        &self.part
    }
}

impl fmt::Debug for Dismounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dismounter")
            .field("part", &self.part.id())
            .field("mounted", &self.mounted.get())
            .field("handlers", &self.on_dismount.connection_count())
            .finish()
    }
}

/// Subscribe `handler` to the nearest dismounter above `target`.
///
/// The connection is owned by `target`, so it goes away if the component is
/// destroyed before the tree is dismounted.
///
/// # Errors
///
/// [`ContractViolation::MissingComponent`] if no ancestor entity (including
/// `target` itself) holds a dismounter.
pub fn register_comp_dismounter(
    target: &Part,
    handler: impl Fn(&CleanupExecutor) + 'static,
) -> Result<Connection, ContractViolation> {
    let dismounter = target.deep_get(&Dismounter::key())?;
    Ok(dismounter.on_dismount.connect(Some(target), handler))
}

/// Dismount `target`'s tree in its own executor pass, if there is a target.
///
/// # Errors
///
/// [`ContractViolation::MissingComponent`] if `target` has no dismounter, or
/// [`ContractViolation::NotMounted`] if it was already dismounted.
pub fn dismount_root_if_present(target: Option<&Entity>) -> Result<(), ContractViolation> {
    match target {
        Some(entity) => entity.get(&Dismounter::key())?.dismount_as_root(),
        None => Ok(()),
    }
}

/// Dismount `target`'s tree into an existing pass, if there is a target.
///
/// # Errors
///
/// See [`dismount_root_if_present`].
pub fn dismount_if_present(
    target: Option<&Entity>,
    cx: &CleanupExecutor,
) -> Result<(), ContractViolation> {
    match target {
        Some(entity) => entity.get(&Dismounter::key())?.dismount(cx),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use kotae_core::{Runtime, RuntimeConfig};

    type Log = Rc<RefCell<Vec<&'static str>>>;

    fn lenient() -> Runtime {
        Runtime::new(RuntimeConfig::new().with_strict_contracts(false))
    }

    /// Handler registering a task for `target` that blocks `blocks`.
    fn teardown(
        log: &Log,
        name: &'static str,
        target: PartId,
        blocks: Vec<PartId>,
    ) -> impl Fn(&CleanupExecutor) + 'static {
        let log = Rc::clone(log);
        move |cx: &CleanupExecutor| {
            let log = Rc::clone(&log);
            cx.register(target, blocks.clone(), move || {
                log.borrow_mut().push(name);
                Ok(())
            })
            .unwrap();
        }
    }

    #[test]
    fn tree_tears_down_in_dependency_order() {
        let rt = lenient();
        let app = rt.entity("app");
        let dismounter = Dismounter::install(&app).unwrap();
        let block = Entity::new(&app, "block");
        let view = Part::new(&block);
        let log = Log::default();

        // The view goes before its block, the block before the app.
        register_comp_dismounter(
            block.part(),
            teardown(&log, "block", block.id(), vec![app.id()]),
        )
        .unwrap();
        register_comp_dismounter(app.part(), teardown(&log, "app", app.id(), vec![])).unwrap();
        register_comp_dismounter(&view, teardown(&log, "view", view.id(), vec![block.id()]))
            .unwrap();
        assert_eq!(dismounter.on_dismount().connection_count(), 3);

        dismounter.dismount_as_root().unwrap();
        assert_eq!(*log.borrow(), vec!["view", "block", "app"]);
        assert!(!dismounter.is_mounted());
    }

    #[test]
    fn second_dismount_is_a_violation() {
        let rt = lenient();
        let app = rt.entity("app");
        Dismounter::install(&app).unwrap();

        dismount_root_if_present(Some(&app)).unwrap();
        assert_eq!(
            dismount_root_if_present(Some(&app)),
            Err(ContractViolation::NotMounted)
        );
    }

    #[test]
    fn missing_dismounter_is_reported() {
        let rt = lenient();
        let bare = rt.entity("bare");
        let child = Part::new(&bare);

        let err = register_comp_dismounter(&child, |_| {}).unwrap_err();
        assert!(matches!(err, ContractViolation::MissingComponent { .. }));
        assert!(matches!(
            dismount_root_if_present(Some(&bare)),
            Err(ContractViolation::MissingComponent { .. })
        ));
    }

    #[test]
    fn absent_target_is_a_no_op() {
        let rt = lenient();
        dismount_root_if_present(None).unwrap();
        let cx = CleanupExecutor::new(&rt);
        dismount_if_present(None, &cx).unwrap();
        assert_eq!(cx.pending_len(), 0);
    }

    #[test]
    fn nested_tree_joins_the_outer_pass() {
        let rt = lenient();
        let outer = rt.entity("outer");
        let inner = Entity::new(&outer, "inner");
        let outer_dm = Dismounter::install(&outer).unwrap();
        Dismounter::install(&inner).unwrap();
        let log = Log::default();

        register_comp_dismounter(
            inner.part(),
            teardown(&log, "inner", inner.id(), vec![outer.id()]),
        )
        .unwrap();
        let nested = inner.clone();
        outer_dm
            .on_dismount()
            .connect(Some(outer.part()), move |cx| {
                dismount_if_present(Some(&nested), cx).unwrap();
            });
        register_comp_dismounter(outer.part(), teardown(&log, "outer", outer.id(), vec![]))
            .unwrap();

        outer_dm.dismount_as_root().unwrap();
        assert_eq!(*log.borrow(), vec!["inner", "outer"]);
        assert!(!inner.get(&Dismounter::key()).unwrap().is_mounted());
    }

    #[test]
    fn destroyed_component_is_not_notified() {
        let rt = lenient();
        let app = rt.entity("app");
        let dismounter = Dismounter::install(&app).unwrap();
        let widget = Part::new(&app);
        let log = Log::default();

        register_comp_dismounter(&widget, teardown(&log, "widget", widget.id(), vec![]))
            .unwrap();
        widget.destroy().unwrap();

        dismounter.dismount_as_root().unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn panicking_handler_does_not_stop_others() {
        let rt = lenient();
        let app = rt.entity("app");
        let dismounter = Dismounter::install(&app).unwrap();
        let log = Log::default();

        register_comp_dismounter(app.part(), |_| panic!("handler failure")).unwrap();
        register_comp_dismounter(app.part(), teardown(&log, "app", app.id(), vec![])).unwrap();

        dismounter.dismount_as_root().unwrap();
        assert_eq!(*log.borrow(), vec!["app"]);
    }

    #[test]
    fn install_twice_is_rejected() {
        let rt = lenient();
        let app = rt.entity("app");
        Dismounter::install(&app).unwrap();
        assert!(matches!(
            Dismounter::install(&app),
            Err(ContractViolation::DuplicateComponent { .. })
        ));
    }
}
