#![forbid(unsafe_code)]

//! Core: ownership tree, typed components, and dependency-ordered cleanup.
//!
//! # Role in Kotae
//! `kotae-core` is the lifecycle layer. Every object that participates in a
//! document (blocks, frames, views, subscriptions) is a [`Part`] in one
//! ownership tree, and every teardown goes through [`Part::destroy`] or a
//! [`CleanupExecutor`] pass.
//!
//! # Primary responsibilities
//! - **Part**: parent/child tree with an explicit lifecycle state machine.
//! - **Entity**: a part hosting typed components behind [`TypedKey`]s.
//! - **CleanupExecutor**: runs teardown tasks in declared dependency order.
//! - **RuntimeConfig**: strict-contract and logging settings threaded
//!   through construction.
//!
//! # How it fits in the system
//! `kotae-runtime` builds signals and observable containers on top of these
//! parts, so subscriptions die with their owners. Applications talk to both
//! through the `kotae` facade.

pub mod array_set;
pub mod config;
pub mod contract;
pub mod entity;
pub mod finalizer;
pub mod handle;
pub mod key;
pub mod lifecycle;
pub mod logging;
pub mod part;
pub mod scope;

pub use array_set::ArraySet;
pub use config::RuntimeConfig;
pub use contract::ContractViolation;
pub use entity::Entity;
pub use finalizer::{CleanupExecutor, ExecuteReport, TaskError, TaskResult};
pub use handle::Handle;
pub use key::{AnyKey, KeyId, RawKey, ReadCap, ReadKey, TypedKey, WriteCap, WriteKey};
pub use lifecycle::{Bindable, LifecycleState};
pub use part::{Ancestors, Part, PartBuilder, PartHooks, PartId, WeakPart};
pub use scope::{Runtime, Scope};
