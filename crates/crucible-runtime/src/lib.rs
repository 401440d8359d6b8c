//! Environment lifecycle, test executor, orchestrator, and result
//! aggregator: the engine that drives an `ExecutionPlan` end to end, plus
//! the Run Controller that ties it to the cache, history, and artifact
//! stores.

mod aggregator;
mod controller;
mod environment;
mod executor;
mod orchestrator;
mod telemetry;
mod validator;

pub use aggregator::{ResultAggregator, SpecSummary, SuiteReport, SuiteStatus, TimelineEntry};
pub use aggregator::ValidatorSummary as AggregateValidatorSummary;
pub use controller::{
    exit_code_for, exit_code_for_load_error, internal_error_exit_code, RunController,
    RunControllerConfig, RunOutcome,
};
pub use environment::{install_command, EnvironmentFactory, LocalEnvironment, LocalEnvironmentFactory};
pub use executor::{compute_fingerprint, TestExecutor};
pub use orchestrator::{default_worker_count, Orchestrator};
pub use telemetry::init_tracing;
pub use validator::ValidatorFactory;
