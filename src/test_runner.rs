use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::ModuleCache;
use crate::coverage::CoverageCollection;

/// Overall status of one test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Complete,
    Error,
    Timeout,
}

/// Status of one executed test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    pub time_spent_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_messages: Vec<String>,
}

impl TestResult {
    /// First failure message, used for baseline diagnostics.
    pub fn first_failure_message(&self) -> Option<&str> {
        self.failure_messages.first().map(String::as_str)
    }
}

/// The outcome of one test run as reported by a test runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub tests: Vec<TestResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageCollection>,
}

impl RunResult {
    pub fn complete(tests: Vec<TestResult>) -> RunResult {
        RunResult {
            status: RunStatus::Complete,
            tests,
            error_messages: Vec::new(),
            coverage: None,
        }
    }

    pub fn error(error_messages: Vec<String>) -> RunResult {
        RunResult {
            status: RunStatus::Error,
            tests: Vec::new(),
            error_messages,
            coverage: None,
        }
    }

    pub fn timeout() -> RunResult {
        RunResult {
            status: RunStatus::Timeout,
            tests: Vec::new(),
            error_messages: Vec::new(),
            coverage: None,
        }
    }

    pub fn failed_tests(&self) -> impl Iterator<Item = &TestResult> {
        self.tests
            .iter()
            .filter(|test| test.status == TestStatus::Failed)
    }

    /// Summed duration of all executed tests.
    pub fn total_time_ms(&self) -> u64 {
        self.tests.iter().map(|test| test.time_spent_ms).sum()
    }
}

/// Options for one `run` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    pub timeout_ms: u64,
    /// Filter snippet for runners that accept hooks inline rather than via
    /// the sandbox's hooks file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_hooks: Option<String>,
}

impl RunOptions {
    pub fn with_timeout(timeout_ms: u64) -> RunOptions {
        RunOptions {
            timeout_ms,
            test_hooks: None,
        }
    }
}

/// Construction-time options for a test runner hosted in a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerOptions {
    /// A free port the runner may bind; unique per sandbox slot.
    pub port: u16,
    /// The sandbox working folder the runner executes in.
    pub working_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{0}")]
    Message(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A test runner, hosted inside a worker process.
pub trait TestRunner: Send {
    fn init(&mut self) -> Result<(), RunnerError> {
        Ok(())
    }

    fn run(&mut self, options: &RunOptions) -> Result<RunResult, RunnerError>;

    fn dispose(&mut self) -> Result<(), RunnerError> {
        Ok(())
    }
}

/// A constructed runner plus the module cache the worker purges between
/// runs, when the runner has one.
pub struct RunnerParts {
    pub runner: Box<dyn TestRunner>,
    pub module_cache: Option<Box<dyn ModuleCache>>,
}

impl std::fmt::Debug for RunnerParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerParts")
            .field("has_module_cache", &self.module_cache.is_some())
            .finish_non_exhaustive()
    }
}

pub type RunnerFactory = fn(&RunnerOptions) -> Result<RunnerParts, RunnerError>;

/// Maps runner implementation names to constructors. Selection of a runner
/// by name goes through here, never through ambient lookup.
pub struct RunnerRegistry {
    factories: BTreeMap<String, RunnerFactory>,
}

impl RunnerRegistry {
    pub fn empty() -> RunnerRegistry {
        RunnerRegistry {
            factories: BTreeMap::new(),
        }
    }

    /// Registry preloaded with the built-in runners.
    pub fn with_builtins() -> RunnerRegistry {
        let mut registry = RunnerRegistry::empty();
        registry.register("scripted", crate::scripted::scripted_runner_factory);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: RunnerFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn create(
        &self,
        name: &str,
        options: &RunnerOptions,
    ) -> Result<RunnerParts, RunnerError> {
        match self.factories.get(name) {
            Some(factory) => factory(options),
            None => Err(RunnerError::Message(format!(
                "unknown test runner '{}'; registered runners: {}",
                name,
                self.names().collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
