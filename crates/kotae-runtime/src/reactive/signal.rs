#![forbid(unsafe_code)]

//! Multi-subscriber signals whose subscriptions are parts.
//!
//! A [`Signal<A>`] owns a registry of handlers `Fn(&A)`. Each
//! [`connect`](Signal::connect) creates a [`Connection`]: a part that may be
//! parented under any owner, so a subscription dies with whatever it was
//! made for rather than with the publisher.
//!
//! # Invariants
//!
//! 1. Handlers run synchronously, in connection order, on the caller's stack.
//! 2. `fire` iterates a snapshot taken on entry: handlers connected during a
//!    fire wait for the next one, and handlers destroyed by an earlier
//!    handler are skipped.
//! 3. Destroying the signal destroys every outstanding connection.
//! 4. Destroying a connection removes it from the registry; repeating the
//!    call is a no-op.
//!
//! # Failure Modes
//!
//! | Mode | Condition | Behavior |
//! |------|-----------|----------|
//! | Handler panic | a handler unwinds | logged at `error`, remaining handlers still run |
//! | Dead owner | `connect` under a destroyed part | connection returned already destroyed |
//! | Dead signal | `connect` after the signal was destroyed | connection returned already destroyed |

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use kotae_core::logging::panic_message;
use kotae_core::{Bindable, Part, PartBuilder, PartHooks, Scope};
use tracing::{debug, error, trace};

type Handler<A> = Box<dyn Fn(&A)>;

struct Slot<A> {
    part: Part,
    handler: Handler<A>,
}

struct Registry<A> {
    label: Cow<'static, str>,
    next_seq: Cell<u64>,
    /// Keyed by connection sequence number, so iteration is connection order.
    slots: RefCell<BTreeMap<u64, Rc<Slot<A>>>>,
}

impl<A> Registry<A> {
    fn remove(&self, seq: u64) -> Option<Rc<Slot<A>>> {
        self.slots.borrow_mut().remove(&seq)
    }
}

/// Destroys every connection when the signal's part is destroyed.
struct SignalHooks<A> {
    registry: Rc<Registry<A>>,
}

impl<A: 'static> PartHooks for SignalHooks<A> {
    fn on_destroyed(&self, part: &Part) {
        let drained = std::mem::take(&mut *self.registry.slots.borrow_mut());
        trace!(signal = %part.id(), connections = drained.len(), "signal destroyed");
        for slot in drained.into_values() {
            if slot.part.state().is_active() {
                let _ = slot.part.destroy();
            }
        }
    }
}

/// Unregisters a connection when its part is destroyed.
struct ConnectionHooks<A> {
    registry: Weak<Registry<A>>,
    seq: u64,
}

impl<A: 'static> PartHooks for ConnectionHooks<A> {
    fn on_destroyed(&self, _part: &Part) {
        if let Some(registry) = self.registry.upgrade() {
            // Dropped outside the registry borrow.
            let removed = registry.remove(self.seq);
            drop(removed);
        }
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// A publisher of `&A` events.
///
/// Cloning yields another handle to the same signal.
pub struct Signal<A: 'static> {
    part: Part,
    registry: Rc<Registry<A>>,
}

impl<A: 'static> Signal<A> {
    /// Create a signal under `scope`.
    pub fn new(scope: &(impl Scope + ?Sized)) -> Self {
        Self::labeled(scope, "signal")
    }

    /// Create a signal with a label used in diagnostics.
    pub fn labeled(scope: &(impl Scope + ?Sized), label: impl Into<Cow<'static, str>>) -> Self {
        let label = label.into();
        let registry = Rc::new(Registry {
            label: label.clone(),
            next_seq: Cell::new(0),
            slots: RefCell::new(BTreeMap::new()),
        });
        let part = PartBuilder::new()
            .label(label)
            .hooks(SignalHooks {
                registry: Rc::clone(&registry),
            })
            .build(scope);
        Self { part, registry }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.registry.label
    }

    /// Subscribe `handler`, parenting the connection under `owner`.
    ///
    /// With `owner == None` the connection is a root and lives until it, or
    /// the signal, is destroyed.
    pub fn connect(&self, owner: Option<&Part>, handler: impl Fn(&A) + 'static) -> Connection {
        let seq = self.registry.next_seq.get();
        self.registry.next_seq.set(seq + 1);

        let part = PartBuilder::new()
            .label("connection")
            .hooks(ConnectionHooks {
                registry: Rc::downgrade(&self.registry),
                seq,
            })
            .build_detached(self.part.config());
        let connection = Connection { part };

        if !self.part.state().is_active() {
            debug!(signal = %self.label(), "connect on a destroyed signal");
            connection.destroy();
            return connection;
        }
        if let Some(owner) = owner.filter(|owner| !owner.state().is_active()) {
            debug!(signal = %self.label(), owner = %owner.id(), "connect under a destroyed owner");
            connection.destroy();
            return connection;
        }
        if let Err(err) = connection.part.set_parent(owner) {
            debug!(signal = %self.label(), error = %err, "connection owner cannot adopt");
            connection.destroy();
            return connection;
        }

        self.registry.slots.borrow_mut().insert(
            seq,
            Rc::new(Slot {
                part: connection.part.clone(),
                handler: Box::new(handler),
            }),
        );
        connection
    }

    /// Invoke every connected handler with `args`.
    pub fn fire(&self, args: &A) {
        let snapshot: Vec<Rc<Slot<A>>> = self.registry.slots.borrow().values().cloned().collect();
        trace!(signal = %self.label(), handlers = snapshot.len(), "signal fired");

        for slot in snapshot {
            if !slot.part.state().is_active() {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| (slot.handler)(args)));
            if let Err(payload) = outcome {
                error!(
                    signal = %self.label(),
                    connection = %slot.part.id(),
                    owner = ?slot.part.parent().map(|p| p.id()),
                    panic = panic_message(payload.as_ref()),
                    "signal handler panicked"
                );
            }
        }
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.slots.borrow().len()
    }

    /// Subscribe-only view of this signal.
    #[must_use]
    pub fn subscriber(&self) -> Subscriber<'_, A> {
        Subscriber { signal: self }
    }
}

impl<A: 'static> Bindable for Signal<A> {
    fn part(&self) -> &Part {
        &self.part
    }
}

impl<A: 'static> Clone for Signal<A> {
    fn clone(&self) -> Self {
        Self {
            part: self.part.clone(),
            registry: Rc::clone(&self.registry),
        }
    }
}

impl<A: 'static> fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("label", &self.label())
            .field("part", &self.part.id())
            .field("connections", &self.connection_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscriber / Connection
// ---------------------------------------------------------------------------

/// A signal handle that can subscribe but not fire.
pub struct Subscriber<'a, A: 'static> {
    signal: &'a Signal<A>,
}

impl<A: 'static> Subscriber<'_, A> {
    /// See [`Signal::connect`].
    pub fn connect(&self, owner: Option<&Part>, handler: impl Fn(&A) + 'static) -> Connection {
        self.signal.connect(owner, handler)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.signal.connection_count()
    }
}

impl<A: 'static> Clone for Subscriber<'_, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: 'static> Copy for Subscriber<'_, A> {}

/// A live subscription. Destroying it (or its owner) unsubscribes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    part: Part,
}

impl Connection {
    /// Unsubscribe. Safe to call any number of times.
    pub fn destroy(&self) {
        if self.part.state().is_active() {
            let _ = self.part.destroy();
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.part.state().is_active()
    }
}

impl Bindable for Connection {
    fn part(&self) -> &Part {
        &self.part
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kotae_core::{LifecycleState, Runtime, RuntimeConfig};

    fn lenient() -> Runtime {
        Runtime::new(RuntimeConfig::new().with_strict_contracts(false))
    }

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&'static str) -> Box<dyn Fn(&u32)>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let make = move |name: &'static str| -> Box<dyn Fn(&u32)> {
            let sink = Rc::clone(&sink);
            Box::new(move |v: &u32| sink.borrow_mut().push(format!("{name}:{v}")))
        };
        (log, make)
    }

    #[test]
    fn fires_in_connection_order() {
        let rt = lenient();
        let signal = Signal::<u32>::new(&rt);
        let (log, make) = recorder();
        let _a = signal.connect(None, make("a"));
        let _b = signal.connect(None, make("b"));
        let _c = signal.connect(None, make("c"));

        signal.fire(&1);
        assert_eq!(*log.borrow(), vec!["a:1", "b:1", "c:1"]);
    }

    #[test]
    fn destroyed_connection_stops_receiving() {
        let rt = lenient();
        let signal = Signal::<u32>::new(&rt);
        let (log, make) = recorder();
        let a = signal.connect(None, make("a"));
        let _b = signal.connect(None, make("b"));

        a.destroy();
        a.destroy();
        signal.fire(&2);

        assert_eq!(*log.borrow(), vec!["b:2"]);
        assert_eq!(signal.connection_count(), 1);
        assert!(!a.is_connected());
    }

    #[test]
    fn connection_dies_with_owner() {
        let rt = lenient();
        let signal = Signal::<u32>::new(&rt);
        let owner = rt.part();
        let (log, make) = recorder();
        let conn = signal.connect(Some(&owner), make("owned"));
        assert_eq!(conn.part().parent(), Some(owner.clone()));

        owner.destroy().unwrap();
        signal.fire(&3);
        assert!(log.borrow().is_empty());
        assert_eq!(signal.connection_count(), 0);
    }

    #[test]
    fn connection_dies_with_owner_whose_hook_panics() {
        struct Exploding;
        impl PartHooks for Exploding {
            fn on_destroyed(&self, _part: &Part) {
                panic!("owner teardown failed");
            }
        }

        let rt = lenient();
        let signal = Signal::<u32>::new(&rt);
        let owner = PartBuilder::new().hooks(Exploding).build(&rt);
        let child = Part::new(&owner);
        let (log, make) = recorder();
        let conn = signal.connect(Some(&owner), make("owned"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| owner.destroy()));
        assert!(result.is_err());
        assert!(!child.is_alive());
        assert!(!conn.is_connected());

        signal.fire(&3);
        assert!(log.borrow().is_empty());
        assert_eq!(signal.connection_count(), 0);
    }

    #[test]
    fn destroying_signal_destroys_connections() {
        let rt = lenient();
        let signal = Signal::<u32>::new(&rt);
        let (_log, make) = recorder();
        let conn = signal.connect(None, make("a"));

        signal.part().destroy().unwrap();
        assert_eq!(conn.state(), LifecycleState::Destroyed);

        let late = signal.connect(None, make("late"));
        assert!(!late.is_connected());
    }

    #[test]
    fn handler_destroying_sibling_mid_fire_is_safe() {
        let rt = lenient();
        let signal = Signal::<u32>::new(&rt);
        let (log, make) = recorder();
        let victim: Rc<RefCell<Option<Connection>>> = Rc::default();

        let slot = Rc::clone(&victim);
        let _killer = signal.connect(None, move |_| {
            if let Some(conn) = slot.borrow().as_ref() {
                conn.destroy();
            }
        });
        *victim.borrow_mut() = Some(signal.connect(None, make("victim")));
        let _survivor = signal.connect(None, make("survivor"));

        signal.fire(&4);
        assert_eq!(*log.borrow(), vec!["survivor:4"]);
    }

    #[test]
    fn handler_destroying_itself_mid_fire_is_safe() {
        let rt = lenient();
        let signal = Signal::<u32>::new(&rt);
        let (log, make) = recorder();
        let me: Rc<RefCell<Option<Connection>>> = Rc::default();

        let slot = Rc::clone(&me);
        let sink = Rc::clone(&log);
        *me.borrow_mut() = Some(signal.connect(None, move |v| {
            sink.borrow_mut().push(format!("once:{v}"));
            if let Some(conn) = slot.borrow().as_ref() {
                conn.destroy();
            }
        }));
        let _after = signal.connect(None, make("after"));

        signal.fire(&5);
        signal.fire(&6);
        assert_eq!(*log.borrow(), vec!["once:5", "after:5", "after:6"]);
    }

    #[test]
    fn connections_added_mid_fire_wait_for_next_fire() {
        let rt = lenient();
        let signal = Signal::<u32>::new(&rt);
        let (log, make) = recorder();
        let added = Rc::new(Cell::new(false));

        let inner = signal.clone();
        let flag = Rc::clone(&added);
        let late = Rc::new(make("late"));
        let _adder = signal.connect(None, move |_| {
            if !flag.replace(true) {
                let late = Rc::clone(&late);
                let _ = inner.connect(None, move |v| (*late)(v));
            }
        });

        signal.fire(&7);
        assert!(log.borrow().is_empty());
        signal.fire(&8);
        assert_eq!(*log.borrow(), vec!["late:8"]);
    }

    #[test]
    fn panicking_handler_does_not_stop_others() {
        let rt = lenient();
        let signal = Signal::<u32>::labeled(&rt, "on_changed");
        let (log, make) = recorder();
        let _bad = signal.connect(None, |_| panic!("handler failure"));
        let _good = signal.connect(None, make("good"));

        signal.fire(&9);
        assert_eq!(*log.borrow(), vec!["good:9"]);
        assert_eq!(signal.label(), "on_changed");
    }

    #[test]
    fn subscriber_view_connects() {
        let rt = lenient();
        let signal = Signal::<u32>::new(&rt);
        let (log, make) = recorder();
        let view = signal.subscriber();
        let _conn = view.connect(None, make("view"));
        assert_eq!(view.connection_count(), 1);

        signal.fire(&10);
        assert_eq!(*log.borrow(), vec!["view:10"]);
    }
}
