#![forbid(unsafe_code)]

//! Runtime configuration threaded through part construction.
//!
//! A [`RuntimeConfig`] is owned by a [`Runtime`](crate::scope::Runtime) and
//! shared (via `Rc`) with every part created beneath it. Children inherit the
//! configuration of the part they are created under, so there is no ambient
//! process-wide toggle to flip.
//!
//! # Environment
//!
//! | Variable | Field | Parsing |
//! |----------|-------|---------|
//! | `KOTAE_STRICT_CONTRACTS` | `strict_contracts` | `1/true/yes/on` |
//! | `KOTAE_LOG` | `log_filter` | `tracing` env-filter directive |
//! | `KOTAE_REPORT_UNRESOLVED` | `report_unresolved` | `1/true/yes/on` |

use std::env;

use tracing::error;

use crate::contract::ContractViolation;

/// Environment variable controlling [`RuntimeConfig::strict_contracts`].
pub const ENV_STRICT_CONTRACTS: &str = "KOTAE_STRICT_CONTRACTS";
/// Environment variable controlling [`RuntimeConfig::log_filter`].
pub const ENV_LOG: &str = "KOTAE_LOG";
/// Environment variable controlling [`RuntimeConfig::report_unresolved`].
pub const ENV_REPORT_UNRESOLVED: &str = "KOTAE_REPORT_UNRESOLVED";

const DEFAULT_LOG_FILTER: &str = "warn";

#[inline]
fn env_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Configuration shared by every part in a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Panic on contract violations instead of returning them as `Err`.
    ///
    /// Defaults to `cfg!(debug_assertions)`: violations are fatal in debug
    /// builds and reported-and-returned in release builds.
    pub strict_contracts: bool,
    /// Filter directive used by [`init_subscriber`](crate::logging).
    pub log_filter: String,
    /// Log every object a finalizer pass had to skip.
    pub report_unresolved: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            strict_contracts: cfg!(debug_assertions),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            report_unresolved: true,
        }
    }
}

impl RuntimeConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from the process environment on top of the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(|key| env::var(key).ok())
    }

    fn from_env_with<F>(get_env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = get_env(ENV_STRICT_CONTRACTS) {
            config.strict_contracts = env_flag(&value);
        }
        if let Some(value) = get_env(ENV_LOG) {
            let value = value.trim();
            if !value.is_empty() {
                config.log_filter = value.to_string();
            }
        }
        if let Some(value) = get_env(ENV_REPORT_UNRESOLVED) {
            config.report_unresolved = env_flag(&value);
        }
        config
    }

    /// Builder: set strict contract checking.
    #[must_use]
    pub fn with_strict_contracts(mut self, strict: bool) -> Self {
        self.strict_contracts = strict;
        self
    }

    /// Builder: set the log filter directive.
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Builder: set whether skipped finalizer objects are logged.
    #[must_use]
    pub fn with_report_unresolved(mut self, report: bool) -> Self {
        self.report_unresolved = report;
        self
    }

    /// Report a contract violation according to this configuration.
    ///
    /// The violation is always logged. In strict mode it is then raised as a
    /// panic; otherwise it is handed back to the caller as `Err`.
    ///
    /// # Panics
    ///
    /// Panics when `strict_contracts` is set.
    pub fn violation<T>(&self, err: ContractViolation) -> Result<T, ContractViolation> {
        error!(violation = %err, strict = self.strict_contracts, "contract violation");
        if self.strict_contracts {
            panic!("contract violation: {err}");
        }
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_follow_build_profile() {
        let config = RuntimeConfig::default();
        assert_eq!(config.strict_contracts, cfg!(debug_assertions));
        assert_eq!(config.log_filter, "warn");
        assert!(config.report_unresolved);
    }

    #[test]
    fn env_flags_are_lenient() {
        let config = RuntimeConfig::from_env_with(env_of(&[
            (ENV_STRICT_CONTRACTS, " YES "),
            (ENV_REPORT_UNRESOLVED, "off"),
            (ENV_LOG, "kotae_core=trace"),
        ]));
        assert!(config.strict_contracts);
        assert!(!config.report_unresolved);
        assert_eq!(config.log_filter, "kotae_core=trace");
    }

    #[test]
    fn blank_log_filter_keeps_default() {
        let config = RuntimeConfig::from_env_with(env_of(&[(ENV_LOG, "   ")]));
        assert_eq!(config.log_filter, "warn");
    }

    #[test]
    fn lenient_violation_is_returned() {
        let config = RuntimeConfig::new().with_strict_contracts(false);
        let result: Result<(), _> = config.violation(ContractViolation::ExecuteReentered);
        assert_eq!(result, Err(ContractViolation::ExecuteReentered));
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn strict_violation_panics() {
        let config = RuntimeConfig::new().with_strict_contracts(true);
        let _: Result<(), _> = config.violation(ContractViolation::NotMounted);
    }
}
