//! Test outcome types: validator outcomes, errors/warnings, and the overall
//! test result lifecycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::spec::TestSpec;

/// Severity of an [`Error`] or [`Warning`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A structured error surfaced by a validator or executor step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Error {
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    pub severity: Severity,
}

impl Error {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Error {
            message: message.into(),
            details: BTreeMap::new(),
            severity,
        }
    }
}

/// A structured warning; same shape as [`Error`] but non-fatal by
/// construction (severity is always [`Severity::Warning`] or lower).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    pub severity: Severity,
}

impl Warning {
    pub fn new(message: impl Into<String>) -> Self {
        Warning {
            message: message.into(),
            details: BTreeMap::new(),
            severity: Severity::Warning,
        }
    }
}

/// The outcome of a single validator invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorOutcome {
    pub validator_kind: String,
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<Error>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    pub duration_ms: u64,
}

impl ValidatorOutcome {
    pub fn passed(validator_kind: impl Into<String>, duration_ms: u64) -> Self {
        ValidatorOutcome {
            validator_kind: validator_kind.into(),
            success: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            duration_ms,
        }
    }

    pub fn failed(validator_kind: impl Into<String>, duration_ms: u64, errors: Vec<Error>) -> Self {
        ValidatorOutcome {
            validator_kind: validator_kind.into(),
            success: false,
            errors,
            warnings: Vec::new(),
            duration_ms,
        }
    }
}

/// Lifecycle status of a [`TestResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
    Error,
}

impl TestStatus {
    /// Whether this status ends the test's lifecycle.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TestStatus::Pending | TestStatus::Running)
    }
}

/// The full result of running one [`TestSpec`].
///
/// Lifecycle: created `pending` → `running` on start → a terminal status on
/// finish. `start`/`end` are set at the corresponding transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub spec_name: String,
    pub status: TestStatus,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub validator_outcomes: Vec<ValidatorOutcome>,
    pub message: Option<String>,
    pub error: Option<Error>,
    /// Set by the Result Cache when a lookup is satisfied without execution.
    #[serde(default)]
    pub from_cache: bool,
}

impl TestResult {
    /// Create a fresh, pending result for `spec`.
    pub fn pending(spec: &TestSpec) -> Self {
        TestResult {
            spec_name: spec.name.clone(),
            status: TestStatus::Pending,
            start: None,
            end: None,
            validator_outcomes: Vec::new(),
            message: None,
            error: None,
            from_cache: false,
        }
    }

    pub fn start(&mut self, at: DateTime<Utc>) {
        self.status = TestStatus::Running;
        self.start = Some(at);
    }

    pub fn finish(&mut self, status: TestStatus, at: DateTime<Utc>) {
        debug_assert!(status.is_terminal(), "finish requires a terminal status");
        self.status = status;
        self.end = Some(at);
    }

    /// Wall-clock duration between start and end, if both are recorded.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start, self.end) {
            (Some(s), Some(e)) => Some(e - s),
            _ => None,
        }
    }

    /// Status derived from validator outcomes per §4.7 step 6: passed iff
    /// all executed validators succeeded.
    pub fn status_from_validators(&self) -> TestStatus {
        if self.validator_outcomes.iter().all(|v| v.success) {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{
        CleanupSpec, DependencySpec, EnvironmentSpec, EnvironmentType, RecipeSpec, SetupSpec,
        TestOptions, ValidatorConfig,
    };
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn spec() -> TestSpec {
        TestSpec {
            name: "demo".to_string(),
            description: None,
            tags: BTreeSet::new(),
            skip: None,
            recipe: RecipeSpec {
                path: PathBuf::from("r.rb"),
                node_json: serde_json::json!({}),
                data_bags: serde_json::json!({}),
                environment: serde_json::json!({}),
            },
            environment: EnvironmentSpec {
                env_type: EnvironmentType::Local,
                distribution: "ubuntu".to_string(),
                options: serde_json::json!({}),
            },
            dependencies: DependencySpec::default(),
            setup: SetupSpec::default(),
            cleanup: CleanupSpec::default(),
            validators: vec![ValidatorConfig {
                validator_type: "package".to_string(),
                name: None,
                config: serde_json::json!({}),
            }],
            options: TestOptions::default(),
        }
    }

    #[test]
    fn lifecycle_transitions_pending_to_running_to_terminal() {
        let mut result = TestResult::pending(&spec());
        assert_eq!(result.status, TestStatus::Pending);
        let t0 = Utc::now();
        result.start(t0);
        assert_eq!(result.status, TestStatus::Running);
        result.finish(TestStatus::Passed, t0 + chrono::Duration::seconds(5));
        assert_eq!(result.status, TestStatus::Passed);
        assert!(result.duration().unwrap() >= chrono::Duration::seconds(5));
    }

    #[test]
    fn status_from_validators_requires_all_success() {
        let mut result = TestResult::pending(&spec());
        result.validator_outcomes = vec![
            ValidatorOutcome::passed("package", 10),
            ValidatorOutcome::failed("service", 5, vec![Error::new("not running", Severity::Error)]),
        ];
        assert_eq!(result.status_from_validators(), TestStatus::Failed);
    }

    #[test]
    fn status_from_validators_all_passing_is_passed() {
        let mut result = TestResult::pending(&spec());
        result.validator_outcomes = vec![ValidatorOutcome::passed("package", 10)];
        assert_eq!(result.status_from_validators(), TestStatus::Passed);
    }

    #[test]
    fn terminal_statuses_are_classified_correctly() {
        assert!(!TestStatus::Pending.is_terminal());
        assert!(!TestStatus::Running.is_terminal());
        assert!(TestStatus::Passed.is_terminal());
        assert!(TestStatus::Skipped.is_terminal());
        assert!(TestStatus::Error.is_terminal());
    }
}
