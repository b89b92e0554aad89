#![forbid(unsafe_code)]

//! Kotae public facade crate.
//!
//! # Role in Kotae
//! This crate is the stable entry point for applications. It re-exports the
//! lifecycle layer (`kotae-core`) and the observation layer
//! (`kotae-runtime`) so users do not depend on internal crate boundaries.
//!
//! # Quick start
//!
//! ```
//! use kotae::prelude::*;
//!
//! let rt = Runtime::new(RuntimeConfig::from_env());
//! let doc = rt.entity("doc");
//! let title_key = TypedKey::<ListenValue<String>>::new("title");
//! let title = doc
//!     .add(ListenValue::new(&rt, "Untitled".to_string()), &[&title_key])
//!     .unwrap();
//!
//! let view = Part::new(&doc);
//! let _conn = title.on_changed().connect(Some(&view), |change| {
//!     println!("title is now {}", change.new);
//! });
//! title.set_value("Notes".to_string());
//!
//! doc.part().destroy().unwrap();
//! assert!(!title.is_alive());
//! ```

pub use kotae_core::{
    ArraySet, Bindable, CleanupExecutor, ContractViolation, Entity, ExecuteReport, Handle,
    LifecycleState, Part, PartHooks, PartId, ReadCap, ReadKey, Runtime, RuntimeConfig, Scope,
    TaskError, TaskResult, TypedKey, WeakPart, WriteCap, WriteKey,
};
pub use kotae_runtime::{
    Connection, Dismounter, ListenArray, ListenSet, ListenValue, Listenable, PartSet, Signal,
    Subscriber, ValueChange, dismount_if_present, dismount_root_if_present,
    register_comp_dismounter,
};

#[cfg(feature = "subscriber")]
pub use kotae_core::logging::init_subscriber;

/// The types and traits most applications need.
pub mod prelude {
    pub use crate::{
        Bindable, CleanupExecutor, Connection, ContractViolation, Dismounter, Entity, Handle,
        ListenArray, ListenSet, ListenValue, Listenable, Part, PartHooks, PartSet, ReadCap,
        Runtime, RuntimeConfig, Scope, Signal, TypedKey, WriteCap,
    };
}
