#![forbid(unsafe_code)]

//! Contract violations: programming errors detected by the runtime.
//!
//! These are not environmental failures. Each variant names a caller bug
//! (double destroy, cyclic reparenting, reading a component that was never
//! registered, ...). How a violation surfaces is decided by
//! [`RuntimeConfig::violation`](crate::config::RuntimeConfig::violation).

use std::fmt;

use crate::lifecycle::LifecycleState;
use crate::part::PartId;

/// A broken runtime contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    /// A lifecycle operation was attempted from a state that forbids it.
    InvalidTransition {
        part: PartId,
        state: LifecycleState,
        op: &'static str,
    },
    /// Reparenting would make a part its own ancestor.
    CyclicParent { part: PartId, parent: PartId },
    /// The requested parent is destroyed or being destroyed.
    DeadParent { part: PartId, parent: PartId },
    /// The part being moved is destroyed or being destroyed.
    DeadPart { part: PartId },
    /// `get` on a component that is not registered.
    MissingComponent { owner: PartId, key: String },
    /// A component is already registered under this key.
    DuplicateComponent { entity: PartId, key: String },
    /// An entity finalizer was already set.
    DuplicateFinalizer { entity: PartId },
    /// A finalizer target was registered with a task twice in one pass.
    DuplicateTask { target: String },
    /// Registration was attempted while a finalizer pass was running.
    RegisterDuringExecute { target: String },
    /// `execute` was called from inside a running pass.
    ExecuteReentered,
    /// A handle was dereferenced after its part was destroyed.
    StaleHandle { part: PartId },
    /// A positional container operation named a slot past the end.
    IndexOutOfBounds { index: usize, len: usize },
    /// A dismounter was dismounted twice.
    NotMounted,
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { part, state, op } => {
                write!(f, "cannot {op} {part} in state {state}")
            }
            Self::CyclicParent { part, parent } => {
                write!(f, "cannot parent {part} to its descendant {parent}")
            }
            Self::DeadParent { part, parent } => {
                write!(f, "cannot parent {part} to finalized part {parent}")
            }
            Self::DeadPart { part } => write!(f, "cannot move finalized part {part}"),
            Self::MissingComponent { owner, key } => {
                write!(f, "{owner} is missing component with key {key}")
            }
            Self::DuplicateComponent { entity, key } => {
                write!(f, "{entity} already has a component with key {key}")
            }
            Self::DuplicateFinalizer { entity } => {
                write!(f, "{entity} already has a finalizer")
            }
            Self::DuplicateTask { target } => {
                write!(f, "cleanup task for {target} registered twice")
            }
            Self::RegisterDuringExecute { target } => {
                write!(f, "cannot register cleanup for {target} while executing")
            }
            Self::ExecuteReentered => write!(f, "cleanup executor is not reentrant"),
            Self::StaleHandle { part } => write!(f, "handle to {part} outlived its target"),
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for length {len}")
            }
            Self::NotMounted => write!(f, "dismounter is no longer mounted"),
        }
    }
}

impl std::error::Error for ContractViolation {}
