//! Run history record types: one immutable JSON document per run.

use chrono::{DateTime, Utc};
use crucible_core::TestStatus;
use serde::{Deserialize, Serialize};

/// Environment the run executed under, captured at `start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentDescriptor {
    pub interpreter_version: String,
    pub platform: String,
    pub tool_version: String,
    pub hostname: String,
    pub user: String,
}

/// Source control state at run start, if known.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceRevisionInfo {
    pub revision: Option<String>,
    pub branch: Option<String>,
    pub dirty: bool,
}

/// Summarized outcome for one test within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerTestRecord {
    pub spec_name: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub validator_summaries: Vec<ValidatorSummary>,
}

/// A compact per-validator summary kept in run history (no full error text).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSummary {
    pub validator_kind: String,
    pub success: bool,
    pub error_count: usize,
    pub warning_count: usize,
}

/// Aggregate counts across all tests in a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
    pub total_duration_ms: u64,
}

/// One immutable run record, written once on `finish`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub run_id: String,
    pub suite_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub per_test: Vec<PerTestRecord>,
    pub summary: RunSummary,
    pub environment: EnvironmentDescriptor,
    pub source_revision: SourceRevisionInfo,
}

/// Generate a monotonically sortable run id: a UTC timestamp prefix plus a
/// short random suffix to disambiguate same-instant runs.
pub fn generate_run_id(now: DateTime<Utc>) -> String {
    use rand::Rng;
    let suffix: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(6)
        .map(char::from)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    format!("{}-{}", now.format("%Y%m%dT%H%M%S%.3fZ"), suffix)
}
