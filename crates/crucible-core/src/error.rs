//! Error taxonomy for the crucible engine.
//!
//! Errors are grouped into the seven categories the engine reasons about at
//! plan/execution time: configuration, plugin, dependency, environment,
//! execution, validation, and resource. Each category carries a `details`
//! context map and knows whether it is recoverable (eligible for retry).

use std::collections::BTreeMap;

use thiserror::Error;

/// Top-level error taxonomy for crucible.
#[derive(Debug, Error)]
pub enum CrucibleError {
    /// Invalid spec field, invalid YAML, missing required option.
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        details: BTreeMap<String, String>,
    },

    /// Plugin not found, load failure, init failure, circular dependency.
    #[error("plugin error: {message}")]
    Plugin {
        message: String,
        details: BTreeMap<String, String>,
    },

    /// Missing or circular test dependency.
    #[error("dependency error: {message}")]
    Dependency {
        message: String,
        details: BTreeMap<String, String>,
    },

    /// Environment setup, teardown, or backend unavailability.
    #[error("environment error: {message}")]
    Environment {
        message: String,
        details: BTreeMap<String, String>,
        /// Whether this specific occurrence is recoverable (e.g. teardown
        /// failures are non-fatal; backend unavailability is not).
        recoverable: bool,
    },

    /// Recipe non-zero exit, command failure, timeout.
    #[error("execution error: {message}")]
    Execution {
        message: String,
        details: BTreeMap<String, String>,
        recoverable: bool,
    },

    /// Validator reported failure.
    #[error("validation error: {message}")]
    Validation {
        message: String,
        details: BTreeMap<String, String>,
    },

    /// Filesystem access denied / not found / exists.
    #[error("resource error: {message}")]
    Resource {
        message: String,
        details: BTreeMap<String, String>,
        recoverable: bool,
    },
}

impl CrucibleError {
    pub fn configuration(message: impl Into<String>) -> Self {
        CrucibleError::Configuration {
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn plugin(message: impl Into<String>) -> Self {
        CrucibleError::Plugin {
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        CrucibleError::Dependency {
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn environment(message: impl Into<String>, recoverable: bool) -> Self {
        CrucibleError::Environment {
            message: message.into(),
            details: BTreeMap::new(),
            recoverable,
        }
    }

    pub fn execution(message: impl Into<String>, recoverable: bool) -> Self {
        CrucibleError::Execution {
            message: message.into(),
            details: BTreeMap::new(),
            recoverable,
        }
    }

    pub fn timeout(elapsed_ms: u64, limit_ms: u64) -> Self {
        let mut details = BTreeMap::new();
        details.insert("elapsed_ms".to_string(), elapsed_ms.to_string());
        details.insert("limit_ms".to_string(), limit_ms.to_string());
        CrucibleError::Execution {
            message: format!("timed out after {elapsed_ms}ms (limit {limit_ms}ms)"),
            details,
            recoverable: true,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CrucibleError::Validation {
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn resource(message: impl Into<String>, recoverable: bool) -> Self {
        CrucibleError::Resource {
            message: message.into(),
            details: BTreeMap::new(),
            recoverable,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let map = match &mut self {
            CrucibleError::Configuration { details, .. }
            | CrucibleError::Plugin { details, .. }
            | CrucibleError::Dependency { details, .. }
            | CrucibleError::Environment { details, .. }
            | CrucibleError::Execution { details, .. }
            | CrucibleError::Validation { details, .. }
            | CrucibleError::Resource { details, .. } => details,
        };
        map.insert(key.into(), value.into());
        self
    }

    /// Whether this error is eligible for the retry loop.
    ///
    /// Configuration, Plugin, Dependency, and Validation errors are always
    /// fatal. Environment/Execution/Resource errors carry an explicit flag
    /// set at construction time per §7's classification rules.
    pub fn recoverable(&self) -> bool {
        match self {
            CrucibleError::Configuration { .. }
            | CrucibleError::Plugin { .. }
            | CrucibleError::Dependency { .. }
            | CrucibleError::Validation { .. } => false,
            CrucibleError::Environment { recoverable, .. }
            | CrucibleError::Execution { recoverable, .. }
            | CrucibleError::Resource { recoverable, .. } => *recoverable,
        }
    }
}

/// Result type used throughout the crucible core.
pub type Result<T> = std::result::Result<T, CrucibleError>;
