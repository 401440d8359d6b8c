//! Pure analyses over stored run history: pairwise comparison, trends over
//! a window, and per-test stability scoring. All functions operate on
//! already-loaded [`RunHistoryEntry`] values and never touch disk.

use std::collections::{BTreeMap, BTreeSet};

use crucible_core::TestStatus;
use serde::{Deserialize, Serialize};

use crate::record::{PerTestRecord, RunHistoryEntry};

fn duration_ms(entry: &RunHistoryEntry) -> u64 {
    entry.summary.total_duration_ms
}

fn per_test_index(entry: &RunHistoryEntry) -> BTreeMap<&str, &PerTestRecord> {
    entry
        .per_test
        .iter()
        .map(|t| (t.spec_name.as_str(), t))
        .collect()
}

/// Result of comparing two runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunComparison {
    pub duration_delta_ms: i64,
    pub duration_delta_pct: f64,
    pub new_failures: Vec<String>,
    pub fixed_tests: Vec<String>,
    pub significant_duration_changes: Vec<String>,
    pub flaky_tests: Vec<String>,
}

/// Compare `older` against `newer`. Both must share at least some tests by
/// name for the per-test analyses to be meaningful.
pub fn compare(older: &RunHistoryEntry, newer: &RunHistoryEntry) -> RunComparison {
    let old_duration = duration_ms(older) as i64;
    let new_duration = duration_ms(newer) as i64;
    let duration_delta_ms = new_duration - old_duration;
    let duration_delta_pct = if old_duration == 0 {
        0.0
    } else {
        (duration_delta_ms as f64 / old_duration as f64) * 100.0
    };

    let old_index = per_test_index(older);
    let new_index = per_test_index(newer);

    let mut new_failures = Vec::new();
    let mut fixed_tests = Vec::new();
    let mut significant_duration_changes = Vec::new();
    let mut flaky_tests = Vec::new();

    for (name, new_rec) in &new_index {
        if let Some(old_rec) = old_index.get(name) {
            match (old_rec.status, new_rec.status) {
                (TestStatus::Passed, TestStatus::Failed) => {
                    new_failures.push(name.to_string());
                    flaky_tests.push(name.to_string());
                }
                (TestStatus::Failed, TestStatus::Passed) => {
                    fixed_tests.push(name.to_string());
                    flaky_tests.push(name.to_string());
                }
                _ => {}
            }

            if old_rec.duration_ms > 0 {
                let change = (new_rec.duration_ms as f64 - old_rec.duration_ms as f64).abs()
                    / old_rec.duration_ms as f64;
                if change > 0.20 {
                    significant_duration_changes.push(name.to_string());
                }
            }
        }
    }

    new_failures.sort_unstable();
    fixed_tests.sort_unstable();
    significant_duration_changes.sort_unstable();
    flaky_tests.sort_unstable();
    flaky_tests.dedup();

    RunComparison {
        duration_delta_ms,
        duration_delta_pct,
        new_failures,
        fixed_tests,
        significant_duration_changes,
        flaky_tests,
    }
}

/// One point in a time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub run_id: String,
    pub value: f64,
}

/// Trend analysis over a window of runs, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trends {
    pub success_rate_series: Vec<SeriesPoint>,
    pub duration_series: Vec<SeriesPoint>,
    pub flaky_tests: Vec<String>,
    pub consistent_failures: Vec<String>,
    pub performance_regressions: Vec<String>,
}

/// Compute trends over `window`, oldest-first ordering expected.
pub fn trends(window: &[RunHistoryEntry]) -> Trends {
    let success_rate_series = window
        .iter()
        .map(|run| SeriesPoint {
            run_id: run.run_id.clone(),
            value: if run.summary.total == 0 {
                0.0
            } else {
                run.summary.passed as f64 / run.summary.total as f64 * 100.0
            },
        })
        .collect();

    let duration_series = window
        .iter()
        .map(|run| SeriesPoint {
            run_id: run.run_id.clone(),
            value: run.summary.total_duration_ms as f64,
        })
        .collect();

    let mut statuses_by_test: BTreeMap<&str, Vec<TestStatus>> = BTreeMap::new();
    let mut durations_by_test: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
    for run in window {
        for t in &run.per_test {
            statuses_by_test.entry(&t.spec_name).or_default().push(t.status);
            durations_by_test.entry(&t.spec_name).or_default().push(t.duration_ms);
        }
    }

    let mut flaky_tests = Vec::new();
    let mut consistent_failures = Vec::new();
    for (name, statuses) in &statuses_by_test {
        let passes = statuses.iter().filter(|s| **s == TestStatus::Passed).count();
        let fails = statuses
            .iter()
            .filter(|s| matches!(s, TestStatus::Failed | TestStatus::Error))
            .count();
        if passes > 0 && fails > 0 {
            flaky_tests.push(name.to_string());
        } else if fails > 0 && fails == statuses.len() {
            consistent_failures.push(name.to_string());
        }
    }

    let mut performance_regressions = Vec::new();
    for (name, durations) in &durations_by_test {
        if durations.len() < 6 {
            continue;
        }
        let n = durations.len();
        let recent: Vec<u64> = durations[n - 3..].to_vec();
        let older: Vec<u64> = durations[n - 6..n - 3].to_vec();
        let recent_avg = recent.iter().sum::<u64>() as f64 / 3.0;
        let older_avg = older.iter().sum::<u64>() as f64 / 3.0;
        if older_avg > 0.0 && recent_avg >= older_avg * 1.5 {
            performance_regressions.push(name.to_string());
        }
    }

    flaky_tests.sort_unstable();
    consistent_failures.sort_unstable();
    performance_regressions.sort_unstable();

    Trends {
        success_rate_series,
        duration_series,
        flaky_tests,
        consistent_failures,
        performance_regressions,
    }
}

/// Stability classification per §4.4's thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityClass {
    Stable,
    MostlyStable,
    Flaky,
    Unstable,
}

fn classify(score: f64) -> StabilityClass {
    if score >= 95.0 {
        StabilityClass::Stable
    } else if score >= 80.0 {
        StabilityClass::MostlyStable
    } else if score >= 50.0 {
        StabilityClass::Flaky
    } else {
        StabilityClass::Unstable
    }
}

/// Per-test stability: pass-count / run-count over the window, as a
/// percentage, with its classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityScore {
    pub spec_name: String,
    pub score: f64,
    pub classification: StabilityClass,
}

/// Compute stability scores for every test that appears in `window`.
pub fn stability_scores(window: &[RunHistoryEntry]) -> Vec<StabilityScore> {
    let mut pass_counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for run in window {
        for t in &run.per_test {
            let entry = pass_counts.entry(&t.spec_name).or_insert((0, 0));
            entry.1 += 1;
            if t.status == TestStatus::Passed {
                entry.0 += 1;
            }
        }
    }

    let mut scores: Vec<StabilityScore> = pass_counts
        .into_iter()
        .map(|(name, (passed, total))| {
            let score = if total == 0 {
                0.0
            } else {
                passed as f64 / total as f64 * 100.0
            };
            StabilityScore {
                spec_name: name.to_string(),
                score,
                classification: classify(score),
            }
        })
        .collect();
    scores.sort_by(|a, b| a.spec_name.cmp(&b.spec_name));
    scores
}

/// All distinct spec names referenced across a window, for callers that
/// need the full universe rather than just those with recorded runs.
pub fn spec_names(window: &[RunHistoryEntry]) -> BTreeSet<String> {
    window
        .iter()
        .flat_map(|r| r.per_test.iter().map(|t| t.spec_name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EnvironmentDescriptor, RunSummary, SourceRevisionInfo};
    use chrono::Utc;

    fn env() -> EnvironmentDescriptor {
        EnvironmentDescriptor {
            interpreter_version: "x".to_string(),
            platform: "linux".to_string(),
            tool_version: "0.1.0".to_string(),
            hostname: "h".to_string(),
            user: "u".to_string(),
        }
    }

    fn run(id: &str, tests: Vec<(&str, TestStatus, u64)>) -> RunHistoryEntry {
        let per_test: Vec<PerTestRecord> = tests
            .into_iter()
            .map(|(name, status, duration_ms)| PerTestRecord {
                spec_name: name.to_string(),
                status,
                duration_ms,
                validator_summaries: vec![],
            })
            .collect();
        let passed = per_test.iter().filter(|t| t.status == TestStatus::Passed).count();
        let failed = per_test.iter().filter(|t| t.status == TestStatus::Failed).count();
        let total_duration_ms = per_test.iter().map(|t| t.duration_ms).sum();
        RunHistoryEntry {
            run_id: id.to_string(),
            suite_name: "suite".to_string(),
            start: Utc::now(),
            end: Utc::now(),
            summary: RunSummary {
                total: per_test.len(),
                passed,
                failed,
                skipped: 0,
                errored: 0,
                total_duration_ms,
            },
            per_test,
            environment: env(),
            source_revision: SourceRevisionInfo::default(),
        }
    }

    #[test]
    fn compare_detects_new_failure_and_fixed_test() {
        let old = run(
            "r1",
            vec![("a", TestStatus::Passed, 100), ("b", TestStatus::Failed, 100)],
        );
        let new = run(
            "r2",
            vec![("a", TestStatus::Failed, 100), ("b", TestStatus::Passed, 100)],
        );
        let cmp = compare(&old, &new);
        assert_eq!(cmp.new_failures, vec!["a".to_string()]);
        assert_eq!(cmp.fixed_tests, vec!["b".to_string()]);
    }

    #[test]
    fn compare_flags_significant_duration_change() {
        let old = run("r1", vec![("a", TestStatus::Passed, 100)]);
        let new = run("r2", vec![("a", TestStatus::Passed, 200)]);
        let cmp = compare(&old, &new);
        assert_eq!(cmp.significant_duration_changes, vec!["a".to_string()]);
    }

    #[test]
    fn stability_score_classifies_always_passing_as_stable() {
        let window = vec![
            run("r1", vec![("a", TestStatus::Passed, 1)]),
            run("r2", vec![("a", TestStatus::Passed, 1)]),
        ];
        let scores = stability_scores(&window);
        assert_eq!(scores[0].classification, StabilityClass::Stable);
    }

    #[test]
    fn stability_score_classifies_half_failing_as_flaky() {
        let window = vec![
            run("r1", vec![("a", TestStatus::Passed, 1)]),
            run("r2", vec![("a", TestStatus::Failed, 1)]),
        ];
        let scores = stability_scores(&window);
        assert_eq!(scores[0].classification, StabilityClass::Flaky);
    }

    #[test]
    fn trends_identify_flaky_and_consistent_failures() {
        let window = vec![
            run("r1", vec![("flaky", TestStatus::Passed, 1), ("always_fails", TestStatus::Failed, 1)]),
            run("r2", vec![("flaky", TestStatus::Failed, 1), ("always_fails", TestStatus::Failed, 1)]),
        ];
        let t = trends(&window);
        assert!(t.flaky_tests.contains(&"flaky".to_string()));
        assert!(t.consistent_failures.contains(&"always_fails".to_string()));
    }
}
