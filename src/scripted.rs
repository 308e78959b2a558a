//! A deterministic test runner driven by a scenario file.
//!
//! The scenario lives in the sandbox working folder and is re-read on every
//! run, so a mutant that rewrites it changes what the runner reports. This
//! is the self-test vehicle for the execution engine: the integration suite
//! runs real worker processes hosting this runner to exercise the channel,
//! crash recovery, timeout enforcement and test selection end to end.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cache::SharedModuleCache;
use crate::coverage::CoverageCollection;
use crate::sandbox::TEST_HOOKS_FILE_NAME;
use crate::test_framework::{TestFramework, TestSelection};
use crate::test_runner::{
    RunOptions, RunResult, RunnerError, RunnerOptions, RunnerParts, TestResult, TestRunner,
    TestStatus,
};

pub const SCENARIO_FILE_NAME: &str = "scripted-runner.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub tests: Vec<ScriptedTest>,
    /// Sleep this long before reporting, to provoke timeouts.
    #[serde(default)]
    pub run_delay_ms: u64,
    /// Abort the worker process on the n-th run (1-based), once per working
    /// folder; the respawned worker skips the directive.
    #[serde(default)]
    pub crash_once_on_run: Option<u32>,
    /// Abort the worker process on every run call, including retries.
    #[serde(default)]
    pub crash_on_every_run: bool,
    /// Reject the n-th run call with a runner error.
    #[serde(default)]
    pub error_on_run: Option<u32>,
    /// Module ids to mark as loaded during each run.
    #[serde(default)]
    pub modules_loaded_per_run: Vec<String>,
    /// Per-test coverage attached to every run result.
    #[serde(default)]
    pub coverage: Option<CoverageCollection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedTest {
    pub name: String,
    #[serde(default)]
    pub fails: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub time_ms: u64,
    #[serde(default)]
    pub failure_message: Option<String>,
}

impl ScriptedTest {
    fn to_result(&self) -> TestResult {
        let status = if self.fails {
            TestStatus::Failed
        } else if self.skipped {
            TestStatus::Skipped
        } else {
            TestStatus::Success
        };
        TestResult {
            name: self.name.clone(),
            status,
            time_spent_ms: self.time_ms,
            failure_messages: self
                .failure_message
                .clone()
                .map(|message| vec![message])
                .unwrap_or_default(),
        }
    }
}

pub struct ScriptedRunner {
    working_dir: PathBuf,
    cache: SharedModuleCache,
    run_index: u32,
}

impl ScriptedRunner {
    pub fn new(options: &RunnerOptions, cache: SharedModuleCache) -> ScriptedRunner {
        ScriptedRunner {
            working_dir: options.working_dir.clone(),
            cache,
            run_index: 0,
        }
    }

    fn load_scenario(&self) -> Result<Scenario, RunnerError> {
        let path = self.working_dir.join(SCENARIO_FILE_NAME);
        if !path.exists() {
            return Ok(Scenario::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        serde_json::from_str(&raw).map_err(|e| {
            RunnerError::Message(format!("malformed {SCENARIO_FILE_NAME}: {e}"))
        })
    }

    /// The hooks filter is a JSON array of test names; absent or empty means
    /// run everything.
    fn selected_names(&self, options: &RunOptions) -> Option<Vec<String>> {
        let snippet = match &options.test_hooks {
            Some(hooks) => hooks.clone(),
            None => {
                let path = self.working_dir.join(TEST_HOOKS_FILE_NAME);
                std::fs::read_to_string(path).ok()?
            }
        };
        if snippet.trim().is_empty() {
            return None;
        }
        serde_json::from_str(&snippet).ok()
    }

    fn crash_marker(&self, run: u32) -> PathBuf {
        self.working_dir.join(format!(".scripted-crashed-{run}"))
    }
}

impl TestRunner for ScriptedRunner {
    fn run(&mut self, options: &RunOptions) -> Result<RunResult, RunnerError> {
        self.run_index += 1;
        let scenario = self.load_scenario()?;

        if scenario.crash_on_every_run {
            tracing::warn!(run = self.run_index, "scripted crash directive, aborting");
            std::process::exit(9);
        }

        if let Some(crash_run) = scenario.crash_once_on_run {
            let marker = self.crash_marker(crash_run);
            if crash_run == self.run_index && !marker.exists() {
                std::fs::write(&marker, b"crashed")?;
                tracing::warn!(run = self.run_index, "scripted crash directive, aborting");
                std::process::exit(9);
            }
        }

        if scenario.error_on_run == Some(self.run_index) {
            return Err(RunnerError::Message(format!(
                "scripted error on run {}",
                self.run_index
            )));
        }

        if scenario.run_delay_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(scenario.run_delay_ms));
        }

        for module in &scenario.modules_loaded_per_run {
            self.cache.insert(module.clone());
        }

        let selected = self.selected_names(options);
        let tests: Vec<TestResult> = scenario
            .tests
            .iter()
            .filter(|test| match &selected {
                Some(names) => names.iter().any(|name| name == &test.name),
                None => true,
            })
            .map(ScriptedTest::to_result)
            .collect();

        let mut result = RunResult::complete(tests);
        result.coverage = scenario.coverage;
        Ok(result)
    }
}

pub fn scripted_runner_factory(options: &RunnerOptions) -> Result<RunnerParts, RunnerError> {
    let cache = SharedModuleCache::default();
    Ok(RunnerParts {
        runner: Box::new(ScriptedRunner::new(options, cache.clone())),
        module_cache: Some(Box::new(cache)),
    })
}

/// The framework half of the scripted pair: its filter snippet is the JSON
/// array of selected test names the scripted runner understands.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptedFramework;

impl TestFramework for ScriptedFramework {
    fn filter(&self, selected_tests: &[TestSelection]) -> String {
        let names: Vec<&str> = selected_tests
            .iter()
            .map(|test| test.name.as_str())
            .collect();
        serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string())
    }
}
