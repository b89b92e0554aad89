#![forbid(unsafe_code)]

//! Construction scopes.
//!
//! Every constructor in the runtime takes a `&impl Scope`: either the
//! [`Runtime`] (creating a root) or any bindable owner (creating a child
//! that inherits the owner's configuration).

use std::borrow::Cow;
use std::rc::Rc;

use crate::config::RuntimeConfig;
use crate::entity::Entity;
use crate::lifecycle::Bindable;
use crate::part::Part;

/// Where a newly constructed part goes.
pub trait Scope {
    /// Configuration the new part inherits.
    fn config(&self) -> &Rc<RuntimeConfig>;
    /// Parent for the new part; `None` creates a root.
    fn owner(&self) -> Option<&Part>;
}

impl<T: Bindable + ?Sized> Scope for T {
    fn config(&self) -> &Rc<RuntimeConfig> {
        self.part().config()
    }

    fn owner(&self) -> Option<&Part> {
        Some(self.part())
    }
}

/// Root scope carrying the configuration for a tree.
#[derive(Debug, Clone, Default)]
pub struct Runtime {
    config: Rc<RuntimeConfig>,
}

impl Runtime {
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config: Rc::new(config),
        }
    }

    /// A runtime configured from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(RuntimeConfig::from_env())
    }

    /// Create a root part.
    #[must_use]
    pub fn part(&self) -> Part {
        Part::new(self)
    }

    /// Create a root entity.
    #[must_use]
    pub fn entity(&self, name: impl Into<Cow<'static, str>>) -> Entity {
        Entity::new(self, name)
    }
}

impl Scope for Runtime {
    fn config(&self) -> &Rc<RuntimeConfig> {
        &self.config
    }

    fn owner(&self) -> Option<&Part> {
        None
    }
}
