//! Top-level orchestration of one mutation run.

use thiserror::Error;

use crate::baseline::{BaselineCalibrator, BaselineError};
use crate::config::EngineConfig;
use crate::coverage::CoverageMaps;
use crate::input::{InputFiles, Reporter};
use crate::mutant::Mutant;
use crate::schedule::{MutantScheduler, MutationSummary, select_tests};
use crate::test_framework::TestFramework;
use crate::transpile::{TranspiledMutant, Transpiler, transpile_mutant};

#[derive(Debug, Error)]
pub enum EngineError {
    /// Fatal: the run cannot start. The message carries a remediation hint.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Fatal: a suite that does not pass on unmutated code gives no
    /// reference point to compare mutants against.
    #[error(transparent)]
    Baseline(#[from] BaselineError),
}

/// One mutation run: calibrate, select, transpile, schedule, summarize.
pub struct MutationRun<'a> {
    config: &'a EngineConfig,
    transpiler: &'a mut dyn Transpiler,
    test_framework: Option<&'a dyn TestFramework>,
    reporter: Option<&'a mut dyn Reporter>,
    coverage_maps: Option<CoverageMaps>,
}

impl<'a> MutationRun<'a> {
    pub fn new(config: &'a EngineConfig, transpiler: &'a mut dyn Transpiler) -> MutationRun<'a> {
        MutationRun {
            config,
            transpiler,
            test_framework: None,
            reporter: None,
            coverage_maps: None,
        }
    }

    pub fn with_test_framework(mut self, test_framework: &'a dyn TestFramework) -> Self {
        self.test_framework = Some(test_framework);
        self
    }

    pub fn with_reporter(mut self, reporter: &'a mut dyn Reporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_coverage_maps(mut self, coverage_maps: CoverageMaps) -> Self {
        self.coverage_maps = Some(coverage_maps);
        self
    }

    pub fn execute(
        mut self,
        files: InputFiles,
        mutants: Vec<Mutant>,
    ) -> Result<MutationSummary, EngineError> {
        self.validate()?;
        let run_id = format!("{:08x}", fastrand::u32(..));
        tracing::debug!(%run_id, "starting mutation run");

        files.log_summary();
        if let Some(reporter) = self.reporter.as_deref_mut() {
            reporter.on_all_source_files_read(&files.files);
        }

        let config = self.config;
        let test_framework = self.test_framework;
        let transpiler = self.transpiler;

        let mut calibrator = BaselineCalibrator::new(config, &run_id, test_framework);
        if let Some(coverage_maps) = self.coverage_maps.take() {
            calibrator = calibrator.with_coverage_maps(coverage_maps);
        }
        let calibration = calibrator.run(&files, &mut *transpiler)?;

        if files.is_empty() || mutants.is_empty() {
            tracing::info!("Nothing to mutate; finishing without scheduling any mutants.");
            return Ok(MutationSummary::new(Vec::new()));
        }

        let transpiled: Vec<TranspiledMutant> = mutants
            .into_iter()
            .map(|mutant| {
                let testable = select_tests(mutant, &calibration);
                transpile_mutant(
                    &mut *transpiler,
                    testable,
                    &files.files,
                    &calibration.transpiled_files,
                )
            })
            .collect();

        let scheduler = MutantScheduler::new(config, &run_id, test_framework);
        let outcomes = scheduler.execute(&calibration.transpiled_files, transpiled);
        let summary = MutationSummary::new(outcomes);
        tracing::info!(
            total = summary.total(),
            killed = summary.killed(),
            timed_out = summary.timed_out(),
            survived = summary.survived(),
            errored = summary.errored(),
            score = summary.score(),
            "mutation run finished"
        );
        Ok(summary)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.config.test_runner.trim().is_empty() {
            return Err(EngineError::Configuration(
                "no test runner configured; set `test_runner` to a name registered in the \
                 worker's runner registry (for example \"scripted\")"
                    .to_string(),
            ));
        }
        if self.config.concurrency == 0 {
            return Err(EngineError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        let highest_port = self.config.base_port as usize + self.config.concurrency;
        if highest_port > u16::MAX as usize {
            return Err(EngineError::Configuration(format!(
                "base_port {} leaves no room for {} sandbox slots; lower base_port or concurrency",
                self.config.base_port, self.config.concurrency
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transpile::NullTranspiler;

    fn try_execute(config: &EngineConfig) -> Result<MutationSummary, EngineError> {
        let mut transpiler = NullTranspiler;
        MutationRun::new(config, &mut transpiler)
            .execute(InputFiles::new(Vec::new(), Vec::new()), Vec::new())
    }

    #[test]
    fn missing_test_runner_is_a_configuration_error() {
        let config = EngineConfig::default();
        let error = try_execute(&config).unwrap_err();
        assert!(matches!(error, EngineError::Configuration(_)));
        assert!(error.to_string().contains("test_runner"));
    }

    #[test]
    fn zero_concurrency_is_a_configuration_error() {
        let config = EngineConfig::default()
            .with_test_runner("scripted")
            .with_concurrency(0);
        let error = try_execute(&config).unwrap_err();
        assert!(error.to_string().contains("concurrency"));
    }

    #[test]
    fn port_range_overflow_is_a_configuration_error() {
        let config = EngineConfig::default()
            .with_test_runner("scripted")
            .with_base_port(u16::MAX)
            .with_concurrency(4);
        let error = try_execute(&config).unwrap_err();
        assert!(error.to_string().contains("base_port"));
    }

    #[test]
    fn empty_input_finishes_without_creating_any_sandbox() {
        // The bogus worker program would fail any sandbox creation; an
        // empty input collection must never get that far.
        let config = EngineConfig::default()
            .with_test_runner("scripted")
            .with_worker_program("/nonexistent/worker-program");
        let summary = try_execute(&config).unwrap();
        assert_eq!(summary.total(), 0);
    }
}
