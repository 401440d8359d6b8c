//! The Run History store: `<root>/index.json` (capped newest 100) plus
//! `<root>/runs/<run-id>.json` (one immutable file per run).

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use crucible_core::{CrucibleError, Result};
use serde::{Deserialize, Serialize};

use crate::record::{
    generate_run_id, EnvironmentDescriptor, PerTestRecord, RunHistoryEntry, RunSummary,
    SourceRevisionInfo,
};

const INDEX_FILE: &str = "index.json";
const RUNS_DIR: &str = "runs";
const MAX_INDEX_ENTRIES: usize = 100;

/// One row of the capped index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub run_id: String,
    pub suite_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RunIndex {
    /// Newest-first.
    runs: Vec<IndexEntry>,
}

/// An in-progress run, accumulating per-test records until `finish`.
pub struct RunBuilder {
    run_id: String,
    suite_name: String,
    start: DateTime<Utc>,
    environment: EnvironmentDescriptor,
    source_revision: SourceRevisionInfo,
    per_test: Vec<PerTestRecord>,
}

impl RunBuilder {
    pub fn record(&mut self, record: PerTestRecord) {
        self.per_test.push(record);
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

/// Filesystem-backed run history rooted at a configurable directory.
pub struct RunHistory {
    root: PathBuf,
    index: RunIndex,
}

impl RunHistory {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(RUNS_DIR))
            .map_err(|e| CrucibleError::resource(format!("history root create failed: {e}"), false))?;

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            let raw = fs::read_to_string(&index_path)
                .map_err(|e| CrucibleError::resource(format!("read history index: {e}"), true))?;
            serde_json::from_str(&raw)
                .map_err(|e| CrucibleError::configuration(format!("corrupt history index: {e}")))?
        } else {
            RunIndex::default()
        };

        Ok(RunHistory { root, index })
    }

    /// Start a new run, capturing the environment and source-revision
    /// descriptors at this instant.
    pub fn start(
        &self,
        suite_name: impl Into<String>,
        environment: EnvironmentDescriptor,
        source_revision: SourceRevisionInfo,
    ) -> RunBuilder {
        let start = Utc::now();
        RunBuilder {
            run_id: generate_run_id(start),
            suite_name: suite_name.into(),
            start,
            environment,
            source_revision,
            per_test: Vec::new(),
        }
    }

    /// Finish a run: compute the summary, write the run file, and prepend
    /// to the capped index.
    pub fn finish(&mut self, builder: RunBuilder) -> Result<RunHistoryEntry> {
        let end = Utc::now();
        let summary = summarize(&builder.per_test);

        let entry = RunHistoryEntry {
            run_id: builder.run_id.clone(),
            suite_name: builder.suite_name,
            start: builder.start,
            end,
            per_test: builder.per_test,
            summary: summary.clone(),
            environment: builder.environment,
            source_revision: builder.source_revision,
        };

        let run_path = self.root.join(RUNS_DIR).join(format!("{}.json", entry.run_id));
        let bytes = serde_json::to_vec_pretty(&entry)
            .map_err(|e| CrucibleError::configuration(e.to_string()))?;
        fs::write(&run_path, bytes)
            .map_err(|e| CrucibleError::resource(format!("write run file: {e}"), true))?;

        self.index.runs.insert(
            0,
            IndexEntry {
                run_id: entry.run_id.clone(),
                suite_name: entry.suite_name.clone(),
                start: entry.start,
                end: entry.end,
                summary,
            },
        );
        self.index.runs.truncate(MAX_INDEX_ENTRIES);
        self.persist_index()?;

        Ok(entry)
    }

    fn persist_index(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.index)
            .map_err(|e| CrucibleError::configuration(e.to_string()))?;
        fs::write(self.root.join(INDEX_FILE), bytes)
            .map_err(|e| CrucibleError::resource(format!("write history index: {e}"), true))
    }

    /// Load a full run record by id.
    pub fn load(&self, run_id: &str) -> Result<RunHistoryEntry> {
        let path = self.root.join(RUNS_DIR).join(format!("{run_id}.json"));
        let raw = fs::read_to_string(&path)
            .map_err(|e| CrucibleError::resource(format!("read run {run_id}: {e}"), true))?;
        serde_json::from_str(&raw)
            .map_err(|e| CrucibleError::configuration(format!("corrupt run file {run_id}: {e}")))
    }

    /// Newest-first index rows, capped at `limit` (or the full 100-entry
    /// cap if `limit` is larger).
    pub fn recent(&self, limit: usize) -> &[IndexEntry] {
        let n = limit.min(self.index.runs.len());
        &self.index.runs[..n]
    }

    /// Load the last `n` full run records, newest first.
    pub fn last_n(&self, n: usize) -> Result<Vec<RunHistoryEntry>> {
        self.recent(n)
            .iter()
            .map(|row| self.load(&row.run_id))
            .collect()
    }
}

fn summarize(per_test: &[PerTestRecord]) -> RunSummary {
    use crucible_core::TestStatus;
    let mut summary = RunSummary::default();
    for t in per_test {
        summary.total += 1;
        summary.total_duration_ms += t.duration_ms;
        match t.status {
            TestStatus::Passed => summary.passed += 1,
            TestStatus::Failed => summary.failed += 1,
            TestStatus::Skipped => summary.skipped += 1,
            TestStatus::Error => summary.errored += 1,
            TestStatus::Pending | TestStatus::Running => {}
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::TestStatus;

    fn env() -> EnvironmentDescriptor {
        EnvironmentDescriptor {
            interpreter_version: "rustc 1.75".to_string(),
            platform: "linux-x86_64".to_string(),
            tool_version: "0.1.0".to_string(),
            hostname: "ci-runner".to_string(),
            user: "ci".to_string(),
        }
    }

    #[test]
    fn start_finish_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = RunHistory::open(dir.path()).unwrap();

        let mut builder = history.start("suite-a", env(), SourceRevisionInfo::default());
        builder.record(PerTestRecord {
            spec_name: "t1".to_string(),
            status: TestStatus::Passed,
            duration_ms: 120,
            validator_summaries: vec![],
        });
        let run_id = builder.run_id().to_string();
        let entry = history.finish(builder).unwrap();

        assert_eq!(entry.summary.total, 1);
        assert_eq!(entry.summary.passed, 1);

        let loaded = history.load(&run_id).unwrap();
        assert_eq!(loaded.run_id, run_id);
    }

    #[test]
    fn index_caps_at_100_newest_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = RunHistory::open(dir.path()).unwrap();
        for i in 0..105 {
            let builder = history.start(format!("suite-{i}"), env(), SourceRevisionInfo::default());
            history.finish(builder).unwrap();
        }
        assert_eq!(history.recent(200).len(), 100);
    }

    #[test]
    fn recent_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = RunHistory::open(dir.path()).unwrap();
        let b1 = history.start("first", env(), SourceRevisionInfo::default());
        let e1 = history.finish(b1).unwrap();
        let b2 = history.start("second", env(), SourceRevisionInfo::default());
        let e2 = history.finish(b2).unwrap();

        let recent = history.recent(10);
        assert_eq!(recent[0].run_id, e2.run_id);
        assert_eq!(recent[1].run_id, e1.run_id);
    }
}
