//! Core domain model for crucible: test specs, the dependency graph and
//! execution planner, result/outcome types, content fingerprinting, the
//! error taxonomy, and the retry engine shared by the executor.

pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod result;
pub mod retry;
pub mod spec;
pub mod traits;

pub use error::{CrucibleError, Result};
pub use fingerprint::{CollectionFingerprint, FingerprintInputs};
pub use graph::{DependencyGraph, ExecutionPlan, ExecutionStep};
pub use result::{Error, Severity, TestResult, TestStatus, ValidatorOutcome, Warning};
pub use retry::{retry_with_backoff, CircuitBreaker, RetryOutcome, RetryPolicy};
pub use spec::{
    CleanupSpec, DependencySpec, EnvironmentSpec, EnvironmentType, FileCopy, RecipeSpec,
    ResourceRequirements, SetupSpec, Skip, TestOptions, TestSpec, ValidatorConfig,
};
pub use traits::{Environment, ExecOutput, Reporter, Validator, ValidatorContext};
