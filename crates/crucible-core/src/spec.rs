//! TestSpec and its nested structures — the declarative unit of work the
//! engine plans and executes.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{CrucibleError, Result};

/// Environment backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentType {
    Container,
    Vm,
    Local,
}

/// Unconditional, dated, or reasoned skip directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Skip {
    Unconditional(bool),
    Reason(String),
    Until { until: NaiveDate, reason: String },
}

impl Skip {
    /// Whether this skip directive currently applies, given "now".
    pub fn applies(&self, today: NaiveDate) -> bool {
        match self {
            Skip::Unconditional(flag) => *flag,
            Skip::Reason(_) => true,
            Skip::Until { until, .. } => today <= *until,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Skip::Unconditional(_) => None,
            Skip::Reason(r) => Some(r),
            Skip::Until { reason, .. } => Some(reason),
        }
    }
}

/// A file to copy into the environment during setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCopy {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// `recipe` block: the configuration-management script and its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeSpec {
    pub path: PathBuf,
    #[serde(default)]
    pub node_json: serde_json::Value,
    #[serde(default)]
    pub data_bags: serde_json::Value,
    #[serde(default)]
    pub environment: serde_json::Value,
}

/// `environment` block: backend type, distribution, and opaque options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    #[serde(rename = "type")]
    pub env_type: EnvironmentType,
    pub distribution: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

/// `dependencies` block: forward (`requires`) and reverse (`before`) edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    #[serde(default)]
    pub requires: BTreeSet<String>,
    #[serde(default)]
    pub before: BTreeSet<String>,
}

/// `setup` block: packages, file copies, and shell commands, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupSpec {
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileCopy>,
    #[serde(default)]
    pub commands: Vec<String>,
}

/// `cleanup` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSpec {
    #[serde(default)]
    pub always: bool,
    #[serde(default)]
    pub commands: Vec<String>,
}

/// One entry of the `validators` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    #[serde(rename = "type")]
    pub validator_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// `resources` sub-block of `options`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub disk: Option<String>,
}

fn default_timeout() -> u64 {
    300
}

/// `options` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOptions {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retries: u8,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub parallel_group: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
}

impl Default for TestOptions {
    fn default() -> Self {
        TestOptions {
            timeout_secs: default_timeout(),
            retries: 0,
            continue_on_error: false,
            parallel_group: None,
            resources: None,
        }
    }
}

/// A declarative test specification: identity, recipe, environment,
/// dependencies, setup/cleanup, validators, and options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub skip: Option<Skip>,
    pub recipe: RecipeSpec,
    pub environment: EnvironmentSpec,
    #[serde(default)]
    pub dependencies: DependencySpec,
    #[serde(default)]
    pub setup: SetupSpec,
    #[serde(default)]
    pub cleanup: CleanupSpec,
    pub validators: Vec<ValidatorConfig>,
    #[serde(default)]
    pub options: TestOptions,
}

impl TestSpec {
    /// Validate the structural invariants §3 requires: a legal name, a
    /// timeout within [1, 3600], retries within [0, 10], and at least one
    /// validator.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(CrucibleError::configuration(format!(
                "invalid spec name: {:?} (must match [A-Za-z0-9_-]+)",
                self.name
            )));
        }
        if !(1..=3600).contains(&self.options.timeout_secs) {
            return Err(CrucibleError::configuration(format!(
                "spec {}: timeout {} out of range [1, 3600]",
                self.name, self.options.timeout_secs
            )));
        }
        if self.options.retries > 10 {
            return Err(CrucibleError::configuration(format!(
                "spec {}: retries {} out of range [0, 10]",
                self.name, self.options.retries
            )));
        }
        if self.validators.is_empty() {
            return Err(CrucibleError::configuration(format!(
                "spec {}: validators must be non-empty",
                self.name
            )));
        }
        Ok(())
    }

    /// Whether this spec is currently skipped, given "today".
    pub fn is_skipped(&self, today: NaiveDate) -> bool {
        self.skip.as_ref().is_some_and(|s| s.applies(today))
    }
}
