//! The one reference run over unmutated code.
//!
//! Runs before any mutant: a suite that does not pass cleanly makes every
//! subsequent comparison meaningless, so any failure here is fatal to the
//! whole mutation run. The successful run yields per-test timings and the
//! coverage used for test selection.

use thiserror::Error;

use crate::config::EngineConfig;
use crate::coverage::{CoverageCollection, CoverageMaps};
use crate::file::File;
use crate::input::InputFiles;
use crate::sandbox::{Sandbox, SandboxError};
use crate::test_framework::{TestFramework, TestSelection};
use crate::test_runner::{RunResult, RunStatus};
use crate::transpile::Transpiler;

/// Generous fixed budget for the initial run; there is no baseline yet to
/// calibrate against.
pub const INITIAL_RUN_TIMEOUT_MS: u64 = 60 * 1000 * 5;

#[derive(Debug, Error)]
pub enum BaselineError {
    #[error("There were failed tests in the initial test run:\n{diagnostics}")]
    FailedTests { diagnostics: String },
    #[error("Something went wrong in the initial test run:\n{diagnostics}")]
    Errored { diagnostics: String },
    #[error("Initial test run timed out! Ran the following tests before the timeout:\n{diagnostics}")]
    TimedOut { diagnostics: String },
    #[error("transpile error while preparing the initial test run: {0}")]
    Transpile(String),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Everything the scheduler derives its per-mutant decisions from.
#[derive(Debug, Clone)]
pub struct Calibration {
    pub run_result: RunResult,
    pub transpiled_files: Vec<File>,
    pub coverage_maps: Option<CoverageMaps>,
}

impl Calibration {
    /// All baseline tests in execution order, as selection handles.
    pub fn test_selections(&self) -> Vec<TestSelection> {
        self.run_result
            .tests
            .iter()
            .enumerate()
            .map(|(id, test)| TestSelection {
                id,
                name: test.name.clone(),
            })
            .collect()
    }

    pub fn timing_for(&self, name: &str) -> u64 {
        self.run_result
            .tests
            .iter()
            .find(|test| test.name == name)
            .map(|test| test.time_spent_ms)
            .unwrap_or(0)
    }

    pub fn total_time_ms(&self) -> u64 {
        self.run_result.total_time_ms()
    }

    pub fn per_test_coverage(&self) -> Option<&CoverageCollection> {
        self.run_result.coverage.as_ref()
    }
}

pub struct BaselineCalibrator<'a> {
    config: &'a EngineConfig,
    run_id: &'a str,
    test_framework: Option<&'a dyn TestFramework>,
    coverage_maps: Option<CoverageMaps>,
}

impl<'a> BaselineCalibrator<'a> {
    pub fn new(
        config: &'a EngineConfig,
        run_id: &'a str,
        test_framework: Option<&'a dyn TestFramework>,
    ) -> BaselineCalibrator<'a> {
        BaselineCalibrator {
            config,
            run_id,
            test_framework,
            coverage_maps: None,
        }
    }

    /// Instrumentation ranges produced by the external coverage
    /// instrumenter, when coverage analysis is on.
    pub fn with_coverage_maps(mut self, coverage_maps: CoverageMaps) -> BaselineCalibrator<'a> {
        self.coverage_maps = Some(coverage_maps);
        self
    }

    pub fn run(
        self,
        files: &InputFiles,
        transpiler: &mut dyn Transpiler,
    ) -> Result<Calibration, BaselineError> {
        if files.is_empty() {
            tracing::warn!("No files have been found. Aborting the initial test run.");
            return Ok(Calibration {
                run_result: RunResult::complete(Vec::new()),
                transpiled_files: Vec::new(),
                coverage_maps: None,
            });
        }

        let transpiled = transpiler.transpile(&files.files);
        if let Some(error) = transpiled.error {
            return Err(BaselineError::Transpile(error));
        }
        tracing::debug!(
            files = ?transpiled.output_files.iter().map(File::name).collect::<Vec<_>>(),
            "transpiled input files"
        );

        tracing::info!("Starting initial test run. This may take a while.");
        let mut sandbox = Sandbox::create(
            self.config,
            self.run_id,
            0,
            &transpiled.output_files,
            self.test_framework,
        )?;
        let run_result = sandbox.run(INITIAL_RUN_TIMEOUT_MS);
        sandbox.dispose();

        validate(&run_result)?;
        if run_result.tests.is_empty() {
            tracing::warn!("No tests were executed. Check the test runner configuration.");
        } else {
            tracing::info!(
                "Initial test run succeeded. Ran {} tests in {} ms.",
                run_result.tests.len(),
                run_result.total_time_ms()
            );
        }

        Ok(Calibration {
            run_result,
            transpiled_files: transpiled.output_files,
            coverage_maps: self.coverage_maps,
        })
    }
}

fn validate(run_result: &RunResult) -> Result<(), BaselineError> {
    match run_result.status {
        RunStatus::Complete => {
            let mut diagnostics = String::new();
            for test in run_result.failed_tests() {
                diagnostics.push_str(&format!("\t{}\n", test.name));
                if let Some(message) = test.first_failure_message() {
                    diagnostics.push_str(&format!("\t\t{message}\n"));
                }
            }
            if diagnostics.is_empty() {
                Ok(())
            } else {
                Err(BaselineError::FailedTests { diagnostics })
            }
        }
        RunStatus::Error => Err(BaselineError::Errored {
            diagnostics: run_result
                .error_messages
                .iter()
                .map(|message| format!("\t{message}\n"))
                .collect(),
        }),
        RunStatus::Timeout => Err(BaselineError::TimedOut {
            diagnostics: run_result
                .tests
                .iter()
                .map(|test| format!("\t{} ({:?})\n", test.name, test.status))
                .collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_runner::{TestResult, TestStatus};

    fn test(name: &str, status: TestStatus, messages: &[&str]) -> TestResult {
        TestResult {
            name: name.to_string(),
            status,
            time_spent_ms: 10,
            failure_messages: messages.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn clean_complete_run_validates() {
        let run = RunResult::complete(vec![test("a", TestStatus::Success, &[])]);
        assert!(validate(&run).is_ok());
    }

    #[test]
    fn failed_tests_produce_named_diagnostics() {
        let run = RunResult::complete(vec![
            test("foobar test", TestStatus::Success, &[]),
            test("example test", TestStatus::Failed, &["expected error"]),
            test("2nd example test", TestStatus::Failed, &[]),
        ]);
        let error = validate(&run).unwrap_err();
        let message = error.to_string();
        assert!(message.contains("example test"));
        assert!(message.contains("expected error"));
        assert!(message.contains("2nd example test"));
        assert!(!message.contains("foobar test\n\t\t"));
    }

    #[test]
    fn error_status_is_fatal_with_messages() {
        let run = RunResult::error(vec!["foobar".to_string(), "example".to_string()]);
        let message = validate(&run).unwrap_err().to_string();
        assert!(message.contains("foobar"));
        assert!(message.contains("example"));
    }

    #[test]
    fn timeout_status_lists_the_tests_that_ran() {
        let mut run = RunResult::timeout();
        run.tests = vec![
            test("foobar test", TestStatus::Success, &[]),
            test("example test", TestStatus::Failed, &[]),
        ];
        let message = validate(&run).unwrap_err().to_string();
        assert!(message.contains("foobar test (Success)"));
        assert!(message.contains("example test (Failed)"));
    }

    #[test]
    fn calibration_exposes_timings_and_selections() {
        let calibration = Calibration {
            run_result: RunResult::complete(vec![
                test("slow", TestStatus::Success, &[]),
                test("fast", TestStatus::Success, &[]),
            ]),
            transpiled_files: Vec::new(),
            coverage_maps: None,
        };
        assert_eq!(calibration.total_time_ms(), 20);
        assert_eq!(calibration.timing_for("slow"), 10);
        assert_eq!(calibration.timing_for("missing"), 0);
        let selections = calibration.test_selections();
        assert_eq!(selections.len(), 2);
        assert_eq!(selections[0].id, 0);
        assert_eq!(selections[1].name, "fast");
    }
}
