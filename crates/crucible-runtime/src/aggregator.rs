//! Result Aggregator (§4.9): accumulates `TestResult`s in arrival order and
//! computes the suite-level report — totals, per-validator grouping,
//! per-spec grouping, and a chronological timeline tolerant of out-of-order
//! delivery.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use crucible_core::{TestResult, TestStatus};
use serde::{Deserialize, Serialize};

/// Final suite-level status, per §4.9's precedence rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteStatus {
    Error,
    Failed,
    Passed,
    Completed,
}

/// Per-validator-kind rollup across every spec that used it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorSummary {
    pub total_runs: usize,
    pub passed: usize,
    pub failed: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub distinct_specs: usize,
}

/// One spec's terminal outcome, as seen by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecSummary {
    pub spec_name: String,
    pub status: TestStatus,
    pub duration_ms: Option<i64>,
    pub validator_count: usize,
    pub message: Option<String>,
}

/// One entry in the chronological timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub spec_name: String,
    pub status: TestStatus,
    pub at: DateTime<Utc>,
}

/// The suite-level report produced by [`ResultAggregator::report`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub status: SuiteStatus,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
    pub total_errors: usize,
    pub total_warnings: usize,
    pub validators: BTreeMap<String, ValidatorSummary>,
    pub specs: Vec<SpecSummary>,
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Default)]
struct AggregatorState {
    results: Vec<TestResult>,
}

/// Thread-safe accumulator for a suite's `TestResult`s. Cloned handles share
/// the same underlying state; `record` may be called concurrently from
/// worker tasks.
#[derive(Default)]
pub struct ResultAggregator {
    state: Mutex<AggregatorState>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        ResultAggregator::default()
    }

    /// Record one spec's result. Safe to call from concurrent workers.
    pub fn record(&self, result: TestResult) {
        self.state.lock().expect("aggregator mutex poisoned").results.push(result);
    }

    pub fn record_all(&self, results: impl IntoIterator<Item = TestResult>) {
        let mut state = self.state.lock().expect("aggregator mutex poisoned");
        state.results.extend(results);
    }

    /// Compute the suite report over everything recorded so far.
    pub fn report(&self) -> SuiteReport {
        let state = self.state.lock().expect("aggregator mutex poisoned");
        let results = &state.results;

        let total = results.len();
        let passed = results.iter().filter(|r| r.status == TestStatus::Passed).count();
        let failed = results.iter().filter(|r| r.status == TestStatus::Failed).count();
        let skipped = results.iter().filter(|r| r.status == TestStatus::Skipped).count();
        let errored = results.iter().filter(|r| r.status == TestStatus::Error).count();

        let total_errors = results.iter().map(|r| r.validator_outcomes.iter().map(|v| v.errors.len()).sum::<usize>()).sum::<usize>()
            + results.iter().filter(|r| r.error.is_some()).count();
        let total_warnings = results
            .iter()
            .map(|r| r.validator_outcomes.iter().map(|v| v.warnings.len()).sum::<usize>())
            .sum();

        let mut validators: BTreeMap<String, ValidatorSummary> = BTreeMap::new();
        let mut validator_specs: BTreeMap<String, std::collections::BTreeSet<String>> = BTreeMap::new();
        for result in results {
            for outcome in &result.validator_outcomes {
                let summary = validators.entry(outcome.validator_kind.clone()).or_default();
                summary.total_runs += 1;
                if outcome.success {
                    summary.passed += 1;
                } else {
                    summary.failed += 1;
                }
                summary.error_count += outcome.errors.len();
                summary.warning_count += outcome.warnings.len();
                validator_specs
                    .entry(outcome.validator_kind.clone())
                    .or_default()
                    .insert(result.spec_name.clone());
            }
        }
        for (kind, specs) in &validator_specs {
            if let Some(summary) = validators.get_mut(kind) {
                summary.distinct_specs = specs.len();
            }
        }

        let mut specs: Vec<SpecSummary> = results
            .iter()
            .map(|r| SpecSummary {
                spec_name: r.spec_name.clone(),
                status: r.status,
                duration_ms: r.duration().map(|d| d.num_milliseconds()),
                validator_count: r.validator_outcomes.len(),
                message: r.message.clone(),
            })
            .collect();
        specs.sort_by(|a, b| a.spec_name.cmp(&b.spec_name));

        let mut timeline: Vec<TimelineEntry> = results
            .iter()
            .filter_map(|r| {
                r.end.or(r.start).map(|at| TimelineEntry {
                    spec_name: r.spec_name.clone(),
                    status: r.status,
                    at,
                })
            })
            .collect();
        timeline.sort_by_key(|entry| entry.at);

        let status = if errored > 0 {
            SuiteStatus::Error
        } else if failed > 0 {
            SuiteStatus::Failed
        } else if passed + skipped == total && total > 0 {
            SuiteStatus::Passed
        } else {
            SuiteStatus::Completed
        };

        SuiteReport {
            status,
            total,
            passed,
            failed,
            skipped,
            errored,
            total_errors,
            total_warnings,
            validators,
            specs,
            timeline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::{Error, Severity, ValidatorOutcome, Warning};

    fn result(spec_name: &str, status: TestStatus, outcomes: Vec<ValidatorOutcome>) -> TestResult {
        let start = Utc::now();
        TestResult {
            spec_name: spec_name.to_string(),
            status,
            start: Some(start),
            end: Some(start + chrono::Duration::milliseconds(50)),
            validator_outcomes: outcomes,
            message: None,
            error: None,
            from_cache: false,
        }
    }

    #[test]
    fn empty_aggregator_reports_completed_with_zero_totals() {
        let agg = ResultAggregator::new();
        let report = agg.report();
        assert_eq!(report.total, 0);
        assert_eq!(report.status, SuiteStatus::Completed);
    }

    #[test]
    fn all_passed_yields_passed_status() {
        let agg = ResultAggregator::new();
        agg.record(result("a", TestStatus::Passed, vec![ValidatorOutcome::passed("package", 10)]));
        agg.record(result("b", TestStatus::Skipped, vec![]));
        let report = agg.report();
        assert_eq!(report.status, SuiteStatus::Passed);
        assert_eq!(report.passed, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn any_error_dominates_status() {
        let agg = ResultAggregator::new();
        agg.record(result("a", TestStatus::Passed, vec![ValidatorOutcome::passed("package", 10)]));
        agg.record(result("b", TestStatus::Error, vec![]));
        agg.record(result("c", TestStatus::Failed, vec![]));
        let report = agg.report();
        assert_eq!(report.status, SuiteStatus::Error);
    }

    #[test]
    fn failed_without_error_yields_failed_status() {
        let agg = ResultAggregator::new();
        agg.record(result("a", TestStatus::Passed, vec![]));
        agg.record(result(
            "b",
            TestStatus::Failed,
            vec![ValidatorOutcome::failed(
                "service",
                5,
                vec![Error::new("not running", Severity::Error)],
            )],
        ));
        let report = agg.report();
        assert_eq!(report.status, SuiteStatus::Failed);
        assert_eq!(report.total_errors, 1);
    }

    #[test]
    fn validator_summary_groups_by_kind_across_specs() {
        let agg = ResultAggregator::new();
        agg.record(result("a", TestStatus::Passed, vec![ValidatorOutcome::passed("package", 10)]));
        agg.record(result("b", TestStatus::Passed, vec![ValidatorOutcome::passed("package", 20)]));
        let report = agg.report();
        let summary = report.validators.get("package").unwrap();
        assert_eq!(summary.total_runs, 2);
        assert_eq!(summary.distinct_specs, 2);
    }

    #[test]
    fn timeline_is_sorted_by_end_timestamp_not_insertion_order() {
        let agg = ResultAggregator::new();
        let mut later = result("late", TestStatus::Passed, vec![]);
        later.end = Some(Utc::now() + chrono::Duration::seconds(10));
        let mut earlier = result("early", TestStatus::Passed, vec![]);
        earlier.end = Some(Utc::now());

        agg.record(later);
        agg.record(earlier);

        let report = agg.report();
        assert_eq!(report.timeline[0].spec_name, "early");
        assert_eq!(report.timeline[1].spec_name, "late");
    }

    #[test]
    fn total_warnings_sums_across_validator_outcomes() {
        let agg = ResultAggregator::new();
        let outcome = ValidatorOutcome {
            validator_kind: "service".to_string(),
            success: true,
            errors: vec![],
            warnings: vec![Warning::new("deprecated option")],
            duration_ms: 1,
        };
        agg.record(result("a", TestStatus::Passed, vec![outcome]));
        let report = agg.report();
        assert_eq!(report.total_warnings, 1);
    }
}
