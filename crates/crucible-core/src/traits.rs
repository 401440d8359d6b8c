//! The capability traits backends implement: `Environment`, `Validator`,
//! and `Reporter`, per §6's external-interfaces contract.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::result::{Error, Warning};

/// Outcome of one `Environment::execute` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
}

/// A disposable test environment: container, VM, or local-subprocess
/// backend. Owned by exactly one test at a time.
#[async_trait]
pub trait Environment: Send + Sync {
    async fn execute(&self, command: &str, timeout_secs: Option<u64>) -> Result<ExecOutput>;
    async fn file_exists(&self, path: &str) -> Result<bool>;
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;
    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()>;
    async fn copy_file(&self, source: &str, destination: &str) -> Result<()>;

    async fn take_screenshot(&self, _out_path: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn collect_logs(&self) -> Result<std::collections::BTreeMap<String, String>> {
        Ok(std::collections::BTreeMap::new())
    }

    fn distribution(&self) -> &str;

    /// Stable identity assigned at creation time; used for logging and
    /// artifact context.
    fn identity(&self) -> &str;
}

/// Context handed to a validator: the owning spec's name plus the merged
/// validator configuration.
#[derive(Debug, Clone)]
pub struct ValidatorContext {
    pub spec_name: String,
    pub config: Value,
}

/// A validator plugin: inspects an [`Environment`] and accumulates errors
/// and warnings.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&mut self, environment: &dyn Environment, context: &ValidatorContext) -> Result<()>;
    fn success(&self) -> bool;
    fn errors(&self) -> &[Error];
    fn warnings(&self) -> &[Warning];
    fn plugin_name(&self) -> &str;
}

/// Synchronous reporter callbacks, invoked from worker threads; impls must
/// tolerate concurrent calls (serialize internally if state is mutated).
pub trait Reporter: Send + Sync {
    fn start_suite(&self, spec_names: &[String]) {
        let _ = spec_names;
    }
    fn finish_suite(&self, spec_names: &[String]) {
        let _ = spec_names;
    }
    fn start_test(&self, spec_name: &str) {
        let _ = spec_name;
    }
    fn finish_test(&self, spec_name: &str) {
        let _ = spec_name;
    }
    fn test_passed(&self, spec_name: &str, outcomes: &[crate::result::ValidatorOutcome]) {
        let _ = (spec_name, outcomes);
    }
    fn test_failed(&self, spec_name: &str, outcomes: &[crate::result::ValidatorOutcome]) {
        let _ = (spec_name, outcomes);
    }
    fn test_skipped(&self, spec_name: &str, reason: Option<&str>) {
        let _ = (spec_name, reason);
    }
}
