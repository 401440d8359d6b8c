//! Run Controller: the top-level entry point that loads a plan, wires the
//! Plugin Registry, Result Cache, Run History, and Artifact Repository
//! together, drives the Orchestrator, and returns a suite report plus the
//! process exit code per §6's "Process exit codes" contract.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crucible_artifacts::{ArtifactRepository, RepositoryConfig};
use crucible_cache::ResultCache;
use crucible_core::{
    CrucibleError, DependencyGraph, Reporter, Result, TestSpec, TestStatus,
};
use crucible_history::{
    EnvironmentDescriptor, PerTestRecord, RunHistory, SourceRevisionInfo,
    ValidatorSummary as HistoryValidatorSummary,
};
use crucible_registry::PluginRegistry;
use tokio::sync::Mutex;
use tracing::warn;

use crate::aggregator::{ResultAggregator, SuiteReport, SuiteStatus};
use crate::executor::{compute_fingerprint, TestExecutor};
use crate::orchestrator::{default_worker_count, Orchestrator};

/// `<root>/.cache`, `<root>/.history`, `<root>/artifacts` per the persisted
/// state layout.
const CACHE_DIR: &str = ".cache";
const HISTORY_DIR: &str = ".history";
const ARTIFACTS_DIR: &str = "artifacts";

/// Explicit configuration for a [`RunController`], constructed once by the
/// caller and threaded through rather than read from process-wide state.
#[derive(Debug, Clone)]
pub struct RunControllerConfig {
    pub root: PathBuf,
    pub parallel_workers: Option<usize>,
    pub cache_dir: PathBuf,
    pub history_dir: PathBuf,
    pub artifacts_dir: PathBuf,
}

impl RunControllerConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        RunControllerConfig {
            cache_dir: root.join(CACHE_DIR),
            history_dir: root.join(HISTORY_DIR),
            artifacts_dir: root.join(ARTIFACTS_DIR),
            root,
            parallel_workers: None,
        }
    }
}

impl Default for RunControllerConfig {
    fn default() -> Self {
        RunControllerConfig::new(".")
    }
}

/// Process exit code for a finished suite, per the documented contract:
/// 0 passed, 1 failed/errored, 2 internal error, 3 spec-loading/validation
/// failure. This function covers the first two; callers map load/validation
/// failures to 3 themselves, before a `RunOutcome` ever exists.
pub fn exit_code_for(status: SuiteStatus) -> i32 {
    match status {
        SuiteStatus::Passed | SuiteStatus::Completed => 0,
        SuiteStatus::Failed | SuiteStatus::Error => 1,
    }
}

/// The result of running one suite: its history entry, its aggregate
/// report, and the process exit code that should be returned for it.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub report: SuiteReport,
    pub exit_code: i32,
}

/// Composes the engine's stateful collaborators around one working
/// directory root.
pub struct RunController {
    registry: PluginRegistry,
    cache: Arc<Mutex<ResultCache>>,
    history: Arc<Mutex<RunHistory>>,
    artifacts: Arc<ArtifactRepository>,
    parallel_workers: usize,
    session_id: String,
}

impl RunController {
    /// Open (creating if absent) the cache, history, and artifact stores
    /// named by `config`, per the persisted state layout.
    pub async fn open(config: RunControllerConfig, registry: PluginRegistry) -> Result<Self> {
        let cache = ResultCache::open(config.cache_dir.clone())?;
        let history = RunHistory::open(config.history_dir.clone())?;
        let artifacts = ArtifactRepository::open(&config.artifacts_dir, RepositoryConfig::default()).await?;

        Ok(RunController {
            registry,
            cache: Arc::new(Mutex::new(cache)),
            history: Arc::new(Mutex::new(history)),
            artifacts: Arc::new(artifacts),
            parallel_workers: config.parallel_workers.unwrap_or_else(default_worker_count),
            session_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers.max(1);
        self
    }

    /// Validate, plan, execute, cache, and record one suite run. `specs`
    /// must already reflect any name/tag filters the caller wants applied.
    pub async fn run_suite(
        &self,
        suite_name: &str,
        specs: Vec<TestSpec>,
        reporter: Option<Arc<dyn Reporter>>,
    ) -> Result<RunOutcome> {
        for spec in &specs {
            spec.validate()?;
        }

        let graph = DependencyGraph::from_specs(&specs)?;
        let plan = graph.to_execution_plan()?;
        let specs_by_name: HashMap<String, TestSpec> =
            specs.into_iter().map(|s| (s.name.clone(), s)).collect();

        let executor = TestExecutor::new(self.registry.clone(), Some(self.artifacts.clone()), self.session_id.clone())
            .with_cache(self.cache.clone());
        let orchestrator = Orchestrator::new(executor, reporter, self.parallel_workers);

        let results = orchestrator.run(&plan, &specs_by_name).await;

        let aggregator = ResultAggregator::new();
        aggregator.record_all(results.clone());
        let report = aggregator.report();

        let run_id = self.record_history(suite_name, &results).await?;
        self.populate_cache(&specs_by_name, &results).await;

        Ok(RunOutcome {
            run_id,
            exit_code: exit_code_for(report.status),
            report,
        })
    }

    async fn record_history(
        &self,
        suite_name: &str,
        results: &[crucible_core::TestResult],
    ) -> Result<String> {
        let mut history = self.history.lock().await;
        let mut builder = history.start(suite_name, environment_descriptor(), SourceRevisionInfo::default());
        for result in results {
            builder.record(PerTestRecord {
                spec_name: result.spec_name.clone(),
                status: result.status,
                duration_ms: result.duration().map(|d| d.num_milliseconds().max(0) as u64).unwrap_or(0),
                validator_summaries: result
                    .validator_outcomes
                    .iter()
                    .map(|o| HistoryValidatorSummary {
                        validator_kind: o.validator_kind.clone(),
                        success: o.success,
                        error_count: o.errors.len(),
                        warning_count: o.warnings.len(),
                    })
                    .collect(),
            });
        }
        let run_id = builder.run_id().to_string();
        history.finish(builder)?;
        Ok(run_id)
    }

    async fn populate_cache(&self, specs: &HashMap<String, TestSpec>, results: &[crucible_core::TestResult]) {
        let mut cache = self.cache.lock().await;
        for result in results {
            if result.status != TestStatus::Passed || result.from_cache {
                continue;
            }
            let Some(spec) = specs.get(&result.spec_name) else {
                continue;
            };
            let fingerprint = match compute_fingerprint(spec) {
                Ok(fp) => fp,
                Err(e) => {
                    warn!(spec = %spec.name, error = %e, "skipping cache store: fingerprint failed");
                    continue;
                }
            };
            let dependency_paths: Vec<String> = std::iter::once(spec.recipe.path.display().to_string())
                .chain(spec.setup.files.iter().map(|f| f.source.display().to_string()))
                .collect();
            if let Err(e) = cache.store(&fingerprint, &spec.name, result, &dependency_paths) {
                warn!(spec = %spec.name, error = %e, "failed to store result in cache");
            }
        }
    }
}

fn environment_descriptor() -> EnvironmentDescriptor {
    EnvironmentDescriptor {
        interpreter_version: format!("rustc-host-{}", std::env::consts::ARCH),
        platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
        user: std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string()),
    }
}

/// Map a fatal spec-loading or validation failure to exit code 3, per the
/// documented process exit code contract.
pub fn exit_code_for_load_error(_err: &CrucibleError) -> i32 {
    3
}

/// Map an unexpected internal failure (panics caught at the boundary,
/// repository/database errors outside the normal test lifecycle) to exit
/// code 2.
pub fn internal_error_exit_code() -> i32 {
    2
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
    use crucible_registry::PluginDescriptor;

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

    async fn registry_with_backends() -> PluginRegistry {
        let registry = PluginRegistry::new();
        let base = tempfile::tempdir().unwrap().into_path();
        let factory: Arc<dyn EnvironmentFactory> = Arc::new(LocalEnvironmentFactory::new(base));
        registry
            .register(PluginDescriptor::eager(
                "environment",
                "local",
                Arc::new(factory),
                crucible_registry::PluginMetadata::default(),
            ))
            .await;
        let validator_factory: Arc<dyn ValidatorFactory> =
            Arc::new(|| Box::new(AlwaysPassValidator) as Box<dyn Validator>);
        registry
            .register(PluginDescriptor::eager(
                "validator",
                "always_pass",
                Arc::new(validator_factory),
                crucible_registry::PluginMetadata::default(),
            ))
            .await;
        registry
    }

    fn spec(name: &str, script: &std::path::Path) -> TestSpec {
        TestSpec {
            name: name.to_string(),
            description: None,
            tags: Default::default(),
            skip: None,
            recipe: RecipeSpec {
                path: script.to_path_buf(),
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
    async fn run_suite_passes_records_history_and_returns_exit_zero() {
        let root = tempfile::tempdir().unwrap();
        let registry = registry_with_backends().await;
        let controller = RunController::open(RunControllerConfig::new(root.path()), registry).await.unwrap();

        let recipe_dir = tempfile::tempdir().unwrap();
        let recipe_path = recipe_dir.path().join("recipe.sh");
        tokio::fs::write(&recipe_path, b"true").await.unwrap();

        let outcome = controller
            .run_suite("demo-suite", vec![spec("demo", &recipe_path)], None)
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.report.status, SuiteStatus::Passed);
        assert!(!outcome.run_id.is_empty());
    }

    #[tokio::test]
    async fn second_run_with_unchanged_recipe_hits_the_cache() {
        let root = tempfile::tempdir().unwrap();
        let registry = registry_with_backends().await;
        let controller = RunController::open(RunControllerConfig::new(root.path()), registry).await.unwrap();

        let recipe_dir = tempfile::tempdir().unwrap();
        let recipe_path = recipe_dir.path().join("recipe.sh");
        tokio::fs::write(&recipe_path, b"true").await.unwrap();

        controller
            .run_suite("demo-suite", vec![spec("demo", &recipe_path)], None)
            .await
            .unwrap();
        let second = controller
            .run_suite("demo-suite", vec![spec("demo", &recipe_path)], None)
            .await
            .unwrap();

        assert_eq!(second.report.status, SuiteStatus::Passed);
    }

    #[test]
    fn exit_codes_follow_the_documented_contract() {
        assert_eq!(exit_code_for(SuiteStatus::Passed), 0);
        assert_eq!(exit_code_for(SuiteStatus::Completed), 0);
        assert_eq!(exit_code_for(SuiteStatus::Failed), 1);
        assert_eq!(exit_code_for(SuiteStatus::Error), 1);
        assert_eq!(internal_error_exit_code(), 2);
    }
}
