#![forbid(unsafe_code)]

//! Runtime: signals, observable state, and dismount plumbing.
//!
//! # Role in Kotae
//! `kotae-runtime` is the observation layer built on `kotae-core` parts.
//! Subscriptions, observable containers and dismount handlers are all parts,
//! so they are torn down by the same ownership tree as the components that
//! use them.
//!
//! # Primary responsibilities
//! - **Signal / Connection**: synchronous multi-subscriber events.
//! - **ListenValue / ListenArray / ListenSet**: observable containers with
//!   memoized snapshots.
//! - **Dismounter**: fans a tree-wide dismount out to component handlers that
//!   register teardown on a shared [`CleanupExecutor`](kotae_core::CleanupExecutor).
//! - **PartSet**: a set of parts that prunes members as they are destroyed.

pub mod dismount;
pub mod part_set;
pub mod reactive;

pub use dismount::{
    Dismounter, dismount_if_present, dismount_root_if_present, register_comp_dismounter,
};
pub use part_set::PartSet;
pub use reactive::{
    Connection, ListenArray, ListenSet, ListenValue, Listenable, Signal, Subscriber, ValueChange,
};
