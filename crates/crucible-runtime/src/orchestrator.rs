//! Orchestrator (§4.8): walks an [`ExecutionPlan`]'s parallel groups, running
//! each group's tests concurrently on a bounded worker pool and awaiting the
//! whole group before advancing to the next.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crucible_core::{ExecutionPlan, Reporter, TestResult, TestSpec, TestStatus};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, warn};

use crate::executor::TestExecutor;

/// Default worker count: one less than the host's hardware concurrency,
/// floored at 1, matching §5's resource model.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

pub struct Orchestrator {
    executor: Arc<TestExecutor>,
    reporter: Option<Arc<dyn Reporter>>,
    parallel_workers: usize,
}

impl Orchestrator {
    pub fn new(executor: TestExecutor, reporter: Option<Arc<dyn Reporter>>, parallel_workers: usize) -> Self {
        Orchestrator {
            executor: Arc::new(executor),
            reporter,
            parallel_workers: parallel_workers.max(1),
        }
    }

    /// Run every step of `plan` against its matching spec in `specs`, group
    /// by group, returning results in the plan's declared order.
    pub async fn run(&self, plan: &ExecutionPlan, specs: &HashMap<String, TestSpec>) -> Vec<TestResult> {
        let spec_names: Vec<String> = plan.steps.iter().map(|s| s.name.clone()).collect();
        if let Some(reporter) = &self.reporter {
            reporter.start_suite(&spec_names);
        }

        let mut results_by_name: HashMap<String, TestResult> = HashMap::new();

        for group in plan.parallel_groups() {
            let group_results = if group.len() <= 1 || self.parallel_workers <= 1 {
                self.run_sequential(&group, specs).await
            } else {
                self.run_parallel(&group, specs).await
            };
            for (name, result) in group_results {
                results_by_name.insert(name, result);
            }
        }

        if let Some(reporter) = &self.reporter {
            reporter.finish_suite(&spec_names);
        }

        spec_names
            .into_iter()
            .filter_map(|name| results_by_name.remove(&name))
            .collect()
    }

    async fn run_sequential(
        &self,
        group: &[&crucible_core::ExecutionStep],
        specs: &HashMap<String, TestSpec>,
    ) -> Vec<(String, TestResult)> {
        let mut out = Vec::with_capacity(group.len());
        for step in group {
            out.push(self.run_one(&step.name, specs).await);
        }
        out
    }

    async fn run_parallel(
        &self,
        group: &[&crucible_core::ExecutionStep],
        specs: &HashMap<String, TestSpec>,
    ) -> Vec<(String, TestResult)> {
        let semaphore = Arc::new(Semaphore::new(self.parallel_workers));
        let tasks = group.iter().map(|step| {
            let name = step.name.clone();
            let spec = specs.get(&name).cloned();
            let executor = self.executor.clone();
            let reporter = self.reporter.clone();
            let semaphore = semaphore.clone();

            async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                run_spec(executor, reporter, name, spec).await
            }
        });

        join_all(tasks).await
    }

    async fn run_one(&self, name: &str, specs: &HashMap<String, TestSpec>) -> (String, TestResult) {
        let spec = specs.get(name).cloned();
        run_spec(self.executor.clone(), self.reporter.clone(), name.to_string(), spec).await
    }
}

async fn run_spec(
    executor: Arc<TestExecutor>,
    reporter: Option<Arc<dyn Reporter>>,
    name: String,
    spec: Option<TestSpec>,
) -> (String, TestResult) {
    let Some(spec) = spec else {
        error!(spec = %name, "execution plan referenced a spec missing from the test set");
        let mut result = placeholder_result(&name);
        result.message = Some("spec not found in test set".to_string());
        result.finish(TestStatus::Error, chrono::Utc::now());
        return (name, result);
    };

    if let Some(r) = &reporter {
        r.start_test(&spec.name);
    }

    let result = executor.execute(&spec).await;

    if let Some(r) = &reporter {
        match result.status {
            TestStatus::Passed => r.test_passed(&spec.name, &result.validator_outcomes),
            TestStatus::Failed | TestStatus::Error => r.test_failed(&spec.name, &result.validator_outcomes),
            TestStatus::Skipped => r.test_skipped(&spec.name, result.message.as_deref()),
            _ => {}
        }
        r.finish_test(&spec.name);
    }

    if matches!(result.status, TestStatus::Error) {
        warn!(spec = %name, "test ended in error status");
    }

    (name, result)
}

fn placeholder_result(name: &str) -> TestResult {
    TestResult {
        spec_name: name.to_string(),
        status: TestStatus::Pending,
        start: Some(chrono::Utc::now()),
        end: None,
        validator_outcomes: Vec::new(),
        message: None,
        error: None,
        from_cache: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{EnvironmentFactory, LocalEnvironmentFactory};
    use crate::validator::ValidatorFactory;
    use crucible_core::{
        CleanupSpec, DependencySpec, EnvironmentSpec, EnvironmentType, RecipeSpec, SetupSpec,
        TestOptions, Validator, ValidatorConfig, ValidatorContext,
    };
    use crucible_registry::{PluginDescriptor, PluginMetadata, PluginRegistry};
    use std::path::PathBuf;

    struct AlwaysPassValidator;

    #[async_trait::async_trait]
    impl Validator for AlwaysPassValidator {
        async fn validate(
            &mut self,
            _environment: &dyn crucible_core::Environment,
            _context: &ValidatorContext,
        ) -> crucible_core::Result<()> {
            Ok(())
        }
        fn success(&self) -> bool {
            true
        }
        fn errors(&self) -> &[crucible_core::Error] {
            &[]
        }
        fn warnings(&self) -> &[crucible_core::Warning] {
            &[]
        }
        fn plugin_name(&self) -> &str {
            "always_pass"
        }
    }

    async fn registry() -> PluginRegistry {
        let registry = PluginRegistry::new();
        let base = tempfile::tempdir().unwrap().into_path();
        let factory: Arc<dyn EnvironmentFactory> = Arc::new(LocalEnvironmentFactory::new(base));
        registry
            .register(PluginDescriptor::eager(
                "environment",
                "local",
                Arc::new(factory),
                PluginMetadata::default(),
            ))
            .await;
        let validator_factory: Arc<dyn ValidatorFactory> =
            Arc::new(|| Box::new(AlwaysPassValidator) as Box<dyn Validator>);
        registry
            .register(PluginDescriptor::eager(
                "validator",
                "always_pass",
                Arc::new(validator_factory),
                PluginMetadata::default(),
            ))
            .await;
        registry
    }

    fn spec(name: &str) -> TestSpec {
        TestSpec {
            name: name.to_string(),
            description: None,
            tags: Default::default(),
            skip: None,
            recipe: RecipeSpec {
                path: PathBuf::from("true"),
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
                validator_type: "always_pass".to_string(),
                name: None,
                config: serde_json::json!({}),
            }],
            options: TestOptions::default(),
        }
    }

    #[tokio::test]
    async fn runs_independent_group_and_returns_all_results_in_plan_order() {
        let reg = registry().await;
        let executor = TestExecutor::new(reg, None, "session-1");
        let orchestrator = Orchestrator::new(executor, None, 4);

        let mut graph = crucible_core::DependencyGraph::new();
        graph.add_node("a");
        graph.add_node("b");
        let plan = graph.to_execution_plan().unwrap();

        let mut specs = HashMap::new();
        specs.insert("a".to_string(), spec("a"));
        specs.insert("b".to_string(), spec("b"));

        let results = orchestrator.run(&plan, &specs).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == TestStatus::Passed));
    }

    #[tokio::test]
    async fn missing_spec_in_plan_yields_error_result() {
        let reg = registry().await;
        let executor = TestExecutor::new(reg, None, "session-1");
        let orchestrator = Orchestrator::new(executor, None, 1);

        let mut graph = crucible_core::DependencyGraph::new();
        graph.add_node("ghost");
        let plan = graph.to_execution_plan().unwrap();
        let specs = HashMap::new();

        let results = orchestrator.run(&plan, &specs).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, TestStatus::Error);
    }

    #[test]
    fn default_worker_count_is_at_least_one() {
        assert!(default_worker_count() >= 1);
    }
}
