//! Artifact repository domain types: collections, artifacts, views, and
//! comparisons.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of artifact captured during or after a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Logs,
    Screenshots,
    SystemState,
    ConfigFiles,
    PackageState,
    ServiceState,
    PerformanceData,
    TestOutput,
    ErrorTraces,
    EnvironmentInfo,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Logs => "logs",
            ArtifactType::Screenshots => "screenshots",
            ArtifactType::SystemState => "system_state",
            ArtifactType::ConfigFiles => "config_files",
            ArtifactType::PackageState => "package_state",
            ArtifactType::ServiceState => "service_state",
            ArtifactType::PerformanceData => "performance_data",
            ArtifactType::TestOutput => "test_output",
            ArtifactType::ErrorTraces => "error_traces",
            ArtifactType::EnvironmentInfo => "environment_info",
        }
    }
}

/// One artifact belonging to exactly one collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub collection_id: String,
    pub artifact_type: ArtifactType,
    pub name: String,
    pub file_path: String,
    pub file_size: u64,
    pub content_type: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A named group of artifacts captured for one test-environment session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactCollection {
    pub collection_id: String,
    pub session_id: String,
    pub environment_name: String,
    pub success: Option<bool>,
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub artifacts: Vec<Artifact>,
    pub tags: Vec<String>,
}

impl ArtifactCollection {
    pub fn total_size(&self) -> u64 {
        self.artifacts.iter().map(|a| a.file_size).sum()
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }
}

/// A saved search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactView {
    pub id: String,
    pub name: String,
    pub query: String,
    pub filters: SearchFilters,
    pub created_at: DateTime<Utc>,
}

/// Search filter set used by [`crate::repository::ArtifactRepository::search`]
/// and persisted inside [`ArtifactView`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub environment: Option<String>,
    pub artifact_type: Option<ArtifactType>,
    pub success: Option<bool>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub tag: Option<String>,
}

/// One row of a search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultRow {
    pub collection_id: String,
    pub artifact_id: String,
    pub artifact_type: ArtifactType,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Significance bucket for a [`ComparisonSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    High,
    Medium,
    Low,
    Minimal,
}

/// Per-type artifact diff between two collections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactDiff {
    pub new: Vec<String>,
    pub missing: Vec<String>,
    pub changed: Vec<String>,
}

/// Unified-diff-style summary of a text artifact's content change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentDiffSummary {
    pub artifact_name: String,
    pub additions: usize,
    pub deletions: usize,
    pub first_lines: Vec<String>,
}

/// Categorized, scored summary of a comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub categories: Vec<String>,
    pub significance: Significance,
    pub recommendations: Vec<String>,
}

/// The full result of comparing two collections, persisted in `comparisons`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    pub collection_id1: String,
    pub collection_id2: String,
    pub environment_match: bool,
    pub success_change: bool,
    pub duration_delta_ms: Option<i64>,
    pub size_delta: i64,
    pub artifact_count_delta: i64,
    pub time_between_hours: f64,
    pub artifact_diffs_by_type: BTreeMap<String, ArtifactDiff>,
    pub content_diffs: Vec<ContentDiffSummary>,
    pub summary: ComparisonSummary,
    pub created_at: DateTime<Utc>,
}

/// Repository-level configuration, per §4.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub enable_content_indexing: bool,
    pub max_content_size_bytes: u64,
    pub index_text_files_only: bool,
    pub auto_vacuum: bool,
    pub journal_mode: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        RepositoryConfig {
            enable_content_indexing: true,
            max_content_size_bytes: 10 * 1024 * 1024,
            index_text_files_only: true,
            auto_vacuum: true,
            journal_mode: "WAL".to_string(),
        }
    }
}

/// Aggregate statistics over the whole repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryStatistics {
    pub collection_count: usize,
    pub artifact_count: usize,
    pub total_bytes: u64,
    pub by_environment: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub recent_7_day_count: usize,
    pub distinct_tag_count: usize,
}
