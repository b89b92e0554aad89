#![forbid(unsafe_code)]

//! Reactive primitives for Kotae.
//!
//! - [`Signal`] / [`Connection`]: publish/subscribe where each subscription
//!   is a part in the ownership tree.
//! - [`ListenValue`], [`ListenArray`], [`ListenSet`]: observable containers
//!   with memoized immutable snapshots.
//!
//! # Architecture
//!
//! Every container is a part created under a [`Scope`](kotae_core::Scope)
//! and owns its change signal as a child part. Destroying the container
//! therefore destroys its signal and every outstanding connection.
//!
//! # Invariants
//!
//! 1. Handlers are notified synchronously, in connection order.
//! 2. Operations that leave the contents unchanged never notify.
//! 3. A snapshot, once handed out, never changes; a mutation makes the next
//!    snapshot a fresh copy.

pub mod listen_array;
pub mod listen_set;
pub mod listen_value;
pub mod signal;

pub use listen_array::ListenArray;
pub use listen_set::ListenSet;
pub use listen_value::{ListenValue, ValueChange};
pub use signal::{Connection, Signal, Subscriber};

use kotae_core::Bindable;

/// Common surface of observable containers.
pub trait Listenable: Bindable {
    /// Payload delivered to `on_changed` handlers.
    type Change: 'static;
    /// Immutable copy of the contents.
    type Snapshot;

    /// Subscribe-only view of the change signal.
    fn on_changed(&self) -> Subscriber<'_, Self::Change>;

    /// The memoized snapshot; recomputed only after a mutation.
    fn value_snapshot(&self) -> Self::Snapshot;

    /// Number of effective mutations so far.
    fn version(&self) -> u64;
}
