//! Test Executor (§4.7): runs one `TestSpec` end to end — skip check,
//! environment provisioning, setup, recipe invocation, validator dispatch,
//! status derivation, cleanup, and failure-triggered artifact collection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use crucible_artifacts::{ArtifactInput, ArtifactRepository, ArtifactType, CollectionMetadata};
use crucible_cache::ResultCache;
use crucible_core::{
    CollectionFingerprint, CrucibleError, Environment, Error as CrucibleErrorDetail,
    FingerprintInputs, Result, RetryPolicy, Severity, TestResult, TestSpec, TestStatus, Validator,
    ValidatorContext, ValidatorOutcome,
};
use crucible_registry::PluginRegistry;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::environment::{install_command, EnvironmentFactory};
use crate::validator::ValidatorFactory;

const DEFAULT_RECIPE_TIMEOUT_SECS: u64 = 600;

/// Compute the [`CollectionFingerprint`] that keys the Result Cache for
/// `spec`, hashing the recipe file's current content alongside node
/// attributes, environment descriptor, and validator configuration.
pub fn compute_fingerprint(spec: &TestSpec) -> Result<CollectionFingerprint> {
    let recipe_bytes = std::fs::read(&spec.recipe.path)
        .map_err(|e| CrucibleError::resource(format!("read recipe {}: {e}", spec.recipe.path.display()), true))?;
    let mut hasher = Sha256::new();
    hasher.update(&recipe_bytes);
    let recipe_content_hash = hex::encode(hasher.finalize());

    CollectionFingerprint::compute(&FingerprintInputs {
        spec_name: spec.name.clone(),
        recipe_path: spec.recipe.path.display().to_string(),
        recipe_content_hash,
        node_attributes: spec.recipe.node_json.clone(),
        environment_descriptor: serde_json::json!({
            "type": spec.environment.env_type,
            "distribution": spec.environment.distribution,
            "options": spec.environment.options,
        }),
        validator_configs: serde_json::to_value(&spec.validators)
            .map_err(|e| CrucibleError::configuration(format!("serialize validator configs: {e}")))?,
    })
}

fn environment_backend_name(env_type: crucible_core::EnvironmentType) -> &'static str {
    use crucible_core::EnvironmentType::*;
    match env_type {
        Container => "container",
        Vm => "vm",
        Local => "local",
    }
}

/// Drives one [`TestSpec`] through its full lifecycle.
pub struct TestExecutor {
    registry: PluginRegistry,
    artifacts: Option<Arc<ArtifactRepository>>,
    cache: Option<Arc<Mutex<ResultCache>>>,
    session_id: String,
}

impl TestExecutor {
    pub fn new(registry: PluginRegistry, artifacts: Option<Arc<ArtifactRepository>>, session_id: impl Into<String>) -> Self {
        TestExecutor {
            registry,
            artifacts,
            cache: None,
            session_id: session_id.into(),
        }
    }

    /// Attach a Result Cache: `execute` consults it before provisioning an
    /// environment and returns a cache hit immediately, marked `from_cache`.
    pub fn with_cache(mut self, cache: Arc<Mutex<ResultCache>>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[instrument(skip(self, spec), fields(spec_name = %spec.name))]
    pub async fn execute(&self, spec: &TestSpec) -> TestResult {
        let mut result = TestResult::pending(spec);

        if spec.is_skipped(Utc::now().date_naive()) {
            result.status = TestStatus::Skipped;
            result.message = spec.skip.as_ref().and_then(|s| s.reason()).map(str::to_string);
            return result;
        }

        if let Some(cache) = &self.cache {
            if let Ok(fingerprint) = compute_fingerprint(spec) {
                let hit = {
                    let cache = cache.lock().await;
                    cache.lookup(&fingerprint).ok().flatten()
                };
                if let Some(mut cached) = hit {
                    cached.spec_name = spec.name.clone();
                    return cached;
                }
            }
        }

        result.start(Utc::now());

        match self.run_body(spec).await {
            Ok(outcomes) => {
                result.validator_outcomes = outcomes;
                result.finish(result.status_from_validators(), Utc::now());
            }
            Err(err) => {
                result.error = Some(CrucibleErrorDetail::new(err.to_string(), Severity::Error));
                result.message = Some(err.to_string());
                result.finish(TestStatus::Error, Utc::now());
            }
        }

        if matches!(result.status, TestStatus::Failed | TestStatus::Error) {
            if let Some(repo) = &self.artifacts {
                if let Err(e) = self.collect_failure_artifacts(spec, &result, repo).await {
                    warn!(spec = %spec.name, error = %e, "failure artifact collection failed");
                }
            }
        }

        result
    }

    async fn run_body(&self, spec: &TestSpec) -> Result<Vec<ValidatorOutcome>> {
        let policy = RetryPolicy::from_retries(spec.options.retries);
        let breaker = crucible_core::CircuitBreaker::new(spec.options.retries as u32 + 1);

        let outcome = crucible_core::retry_with_backoff(&policy, &breaker, || self.attempt(spec)).await?;
        Ok(outcome.value)
    }

    async fn attempt(&self, spec: &TestSpec) -> Result<Vec<ValidatorOutcome>> {
        let backend_name = environment_backend_name(spec.environment.env_type);
        let factory_value = self.registry.resolve("environment", backend_name).await?;
        let factory = factory_value
            .downcast::<Arc<dyn EnvironmentFactory>>()
            .map_err(|_| CrucibleError::plugin(format!("environment backend {backend_name} has the wrong type")))?;

        let environment = factory
            .create(&spec.name, &spec.environment.distribution, &spec.environment.options)
            .await?;

        let outcome = self.run_in_environment(spec, environment.as_ref()).await;

        if let Err(e) = factory.destroy(environment).await {
            warn!(spec = %spec.name, error = %e, "environment destruction failed");
        }

        outcome
    }

    async fn run_in_environment(
        &self,
        spec: &TestSpec,
        environment: &dyn Environment,
    ) -> Result<Vec<ValidatorOutcome>> {
        let overall_timeout = Duration::from_secs(spec.options.timeout_secs.max(1));
        let started = Instant::now();

        let body_result = match tokio::time::timeout(
            overall_timeout,
            self.run_setup_and_body(spec, environment),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CrucibleError::timeout(
                started.elapsed().as_millis() as u64,
                overall_timeout.as_millis() as u64,
            )),
        };

        let should_run_cleanup = spec.cleanup.always || body_result.is_ok();
        if should_run_cleanup {
            for command in &spec.cleanup.commands {
                match environment.execute(command, Some(DEFAULT_RECIPE_TIMEOUT_SECS)).await {
                    Ok(out) if !out.success => {
                        warn!(spec = %spec.name, command, "cleanup command failed");
                    }
                    Err(e) => warn!(spec = %spec.name, command, error = %e, "cleanup command errored"),
                    _ => {}
                }
            }
        }

        body_result
    }

    /// Setup followed by recipe execution and validator dispatch, as one
    /// future so the overall per-test timeout in `run_in_environment` covers
    /// all three. Cleanup is intentionally outside this future: it must run
    /// even when the timeout fires.
    async fn run_setup_and_body(
        &self,
        spec: &TestSpec,
        environment: &dyn Environment,
    ) -> Result<Vec<ValidatorOutcome>> {
        self.run_setup(spec, environment).await?;
        self.run_recipe_and_validators(spec, environment).await
    }

    async fn run_setup(&self, spec: &TestSpec, environment: &dyn Environment) -> Result<()> {
        if let Some(install) = install_command(&spec.environment.distribution, &spec.setup.packages) {
            let command = install.join(" ");
            let out = environment.execute(&command, Some(DEFAULT_RECIPE_TIMEOUT_SECS)).await?;
            if !out.success {
                return Err(CrucibleError::environment(
                    format!("package install failed (exit {}): {}", out.exit_code, out.stderr),
                    false,
                ));
            }
        }

        for file in &spec.setup.files {
            environment
                .copy_file(
                    &file.source.display().to_string(),
                    &file.destination.display().to_string(),
                )
                .await?;
        }

        for command in &spec.setup.commands {
            let out = environment.execute(command, Some(DEFAULT_RECIPE_TIMEOUT_SECS)).await?;
            if !out.success {
                return Err(CrucibleError::environment(
                    format!("setup command `{command}` failed (exit {}): {}", out.exit_code, out.stderr),
                    false,
                ));
            }
        }

        Ok(())
    }

    async fn run_recipe_and_validators(
        &self,
        spec: &TestSpec,
        environment: &dyn Environment,
    ) -> Result<Vec<ValidatorOutcome>> {
        let node_attrs_path = format!("/tmp/crucible-node-{}.json", spec.name);
        let node_attrs_bytes = serde_json::to_vec_pretty(&spec.recipe.node_json)
            .map_err(|e| CrucibleError::configuration(format!("serialize node attributes: {e}")))?;
        environment.write_file(&node_attrs_path, &node_attrs_bytes).await?;

        let env_exports: String = spec
            .recipe
            .environment
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(k, v)| format!("export {k}={}; ", shell_quote(&value_to_shell(v))))
                    .collect::<String>()
            })
            .unwrap_or_default();

        let recipe_path = spec.recipe.path.display();
        let command = format!("{env_exports}{}", recipe_path);
        let timeout = spec.options.timeout_secs.max(1);

        let out = environment.execute(&command, Some(timeout.min(DEFAULT_RECIPE_TIMEOUT_SECS))).await?;
        if !out.success {
            return Err(CrucibleError::execution(
                format!("recipe exited {} (stderr: {})", out.exit_code, out.stderr),
                true,
            )
            .with_detail("stdout", out.stdout.as_str())
            .with_detail("stderr", out.stderr.as_str()));
        }

        self.run_validators(spec, environment).await
    }

    async fn run_validators(
        &self,
        spec: &TestSpec,
        environment: &dyn Environment,
    ) -> Result<Vec<ValidatorOutcome>> {
        let mut outcomes = Vec::with_capacity(spec.validators.len());

        for config in &spec.validators {
            let lookup_name = if config.validator_type == "custom" {
                config.name.clone().ok_or_else(|| {
                    CrucibleError::configuration(format!(
                        "spec {}: validator type `custom` requires a name",
                        spec.name
                    ))
                })?
            } else {
                config.validator_type.clone()
            };

            let factory_value = self.registry.resolve("validator", &lookup_name).await?;
            let factory = factory_value
                .downcast::<Arc<dyn ValidatorFactory>>()
                .map_err(|_| CrucibleError::plugin(format!("validator {lookup_name} has the wrong type")))?;

            let mut validator = factory.create();
            let context = ValidatorContext {
                spec_name: spec.name.clone(),
                config: config.config.clone(),
            };

            let start = std::time::Instant::now();
            validator.validate(environment, &context).await?;
            let duration_ms = start.elapsed().as_millis() as u64;

            let outcome = if validator.success() {
                ValidatorOutcome {
                    validator_kind: validator.plugin_name().to_string(),
                    success: true,
                    errors: Vec::new(),
                    warnings: validator.warnings().to_vec(),
                    duration_ms,
                }
            } else {
                ValidatorOutcome {
                    validator_kind: validator.plugin_name().to_string(),
                    success: false,
                    errors: validator.errors().to_vec(),
                    warnings: validator.warnings().to_vec(),
                    duration_ms,
                }
            };

            let stop = !outcome.success && !spec.options.continue_on_error;
            outcomes.push(outcome);
            if stop {
                break;
            }
        }

        Ok(outcomes)
    }

    async fn collect_failure_artifacts(
        &self,
        spec: &TestSpec,
        result: &TestResult,
        repo: &ArtifactRepository,
    ) -> Result<()> {
        let dir = tempfile::tempdir()
            .map_err(|e| CrucibleError::resource(format!("create artifact staging dir: {e}"), true))?;

        let mut inputs = Vec::new();
        if let Some(message) = &result.message {
            let path = dir.path().join("failure.log");
            tokio::fs::write(&path, message)
                .await
                .map_err(|e| CrucibleError::resource(format!("write failure log: {e}"), true))?;
            inputs.push(ArtifactInput {
                artifact_type: ArtifactType::ErrorTraces,
                name: "failure.log".to_string(),
                file_path: path,
            });
        }

        if inputs.is_empty() {
            return Ok(());
        }

        info!(spec = %spec.name, "collecting failure artifacts");
        repo.store_collection(
            CollectionMetadata {
                session_id: self.session_id.clone(),
                environment_name: spec.environment.distribution.clone(),
                success: Some(false),
                duration_ms: result.duration().map(|d| d.num_milliseconds().max(0) as u64),
                metadata: serde_json::json!({ "spec_name": spec.name }),
            },
            &inputs,
        )
        .await?;
        Ok(())
    }
}

fn value_to_shell(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::{
        CleanupSpec, DependencySpec, EnvironmentSpec, EnvironmentType, RecipeSpec, ResourceRequirements,
        SetupSpec, TestOptions, ValidatorConfig,
    };
    use crucible_registry::{PluginDescriptor, PluginMetadata};
    use std::path::PathBuf;

    fn spec_with_script(name: &str, script: &std::path::Path) -> TestSpec {
        TestSpec {
            name: name.to_string(),
            description: None,
            tags: Default::default(),
            skip: None,
            recipe: RecipeSpec {
                path: script.to_path_buf(),
                node_json: serde_json::json!({"role": "web"}),
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
            options: TestOptions {
                resources: None::<ResourceRequirements>,
                ..TestOptions::default()
            },
        }
    }

    struct AlwaysPassValidator {
        success: bool,
    }

    #[async_trait::async_trait]
    impl Validator for AlwaysPassValidator {
        async fn validate(&mut self, _environment: &dyn Environment, _context: &ValidatorContext) -> Result<()> {
            self.success = true;
            Ok(())
        }
        fn success(&self) -> bool {
            self.success
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

    async fn registry_with_local_and_validator() -> PluginRegistry {
        let registry = PluginRegistry::new();
        let base = tempfile::tempdir().unwrap().into_path();
        let factory: Arc<dyn EnvironmentFactory> = Arc::new(crate::environment::LocalEnvironmentFactory::new(base));
        registry
            .register(PluginDescriptor::eager(
                "environment",
                "local",
                Arc::new(factory),
                PluginMetadata::default(),
            ))
            .await;

        let validator_factory: Arc<dyn ValidatorFactory> =
            Arc::new(|| Box::new(AlwaysPassValidator { success: false }) as Box<dyn Validator>);
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

    #[tokio::test]
    async fn skipped_spec_returns_immediately() {
        let registry = registry_with_local_and_validator().await;
        let executor = TestExecutor::new(registry, None, "session-1");
        let mut spec = spec_with_script("skip_me", &PathBuf::from("true"));
        spec.skip = Some(crucible_core::Skip::Reason("not ready".to_string()));

        let result = executor.execute(&spec).await;
        assert_eq!(result.status, TestStatus::Skipped);
        assert_eq!(result.message.as_deref(), Some("not ready"));
    }

    #[tokio::test]
    async fn successful_recipe_and_validators_yield_passed() {
        let registry = registry_with_local_and_validator().await;
        let executor = TestExecutor::new(registry, None, "session-1");
        let spec = spec_with_script("pass_test", &PathBuf::from("true"));

        let result = executor.execute(&spec).await;
        assert_eq!(result.status, TestStatus::Passed);
        assert_eq!(result.validator_outcomes.len(), 1);
        assert!(result.validator_outcomes[0].success);
    }

    #[tokio::test]
    async fn failing_recipe_yields_error_status() {
        let registry = registry_with_local_and_validator().await;
        let executor = TestExecutor::new(registry, None, "session-1");
        let spec = spec_with_script("fail_test", &PathBuf::from("false"));

        let result = executor.execute(&spec).await;
        assert!(matches!(result.status, TestStatus::Error));
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_execution() {
        let registry = registry_with_local_and_validator().await;
        let recipe_dir = tempfile::tempdir().unwrap();
        let recipe_path = recipe_dir.path().join("recipe.sh");
        tokio::fs::write(&recipe_path, b"true").await.unwrap();

        let cache_dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(Mutex::new(ResultCache::open(cache_dir.path()).unwrap()));

        let spec = spec_with_script("cached_test", &recipe_path);
        let fingerprint = compute_fingerprint(&spec).unwrap();

        let mut cached_result = TestResult::pending(&spec);
        cached_result.start(Utc::now());
        cached_result.finish(TestStatus::Passed, Utc::now());
        {
            let mut guard = cache.lock().await;
            guard.store(&fingerprint, &spec.name, &cached_result, &[]).unwrap();
        }

        let executor = TestExecutor::new(registry, None, "session-1").with_cache(cache);
        let result = executor.execute(&spec).await;
        assert!(result.from_cache);
        assert_eq!(result.status, TestStatus::Passed);
    }
}
