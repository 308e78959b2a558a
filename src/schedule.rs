//! Per-mutant test selection, the timeout policy, and the scheduler that
//! drives a pool of sandbox slots.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use crate::baseline::Calibration;
use crate::config::EngineConfig;
use crate::coverage::find_covering_statement;
use crate::file::File;
use crate::mutant::{
    classify_run, Mutant, MutantStatus, TestSelectionResult, TestableMutant,
};
use crate::sandbox::Sandbox;
use crate::test_framework::TestFramework;
use crate::test_runner::RunResult;
use crate::transpile::TranspiledMutant;

/// Per-mutant timeout: a multiplicative margin over the work the mutant's
/// covering tests actually do, plus a fixed overhead. A flat timeout would
/// either be wastefully large or falsely kill slow-but-legitimate tests.
pub fn mutant_timeout_ms(timeout_factor: f64, timeout_ms: u64, scoped_time_ms: u64) -> u64 {
    (timeout_factor * scoped_time_ms as f64) as u64 + timeout_ms
}

/// Determine which tests could possibly detect this mutant.
///
/// Without a covering coverage entry the selection fails: the mutant runs
/// against the full suite (correctness over speed), and its time budget is
/// the full-suite baseline time, since that is the work the run performs.
pub fn select_tests(mutant: Mutant, calibration: &Calibration) -> TestableMutant {
    let all_tests = calibration.test_selections();

    let covering = calibration
        .coverage_maps
        .as_ref()
        .zip(calibration.per_test_coverage())
        .and_then(|(maps, per_test)| {
            maps.get(&mutant.file_name).map(|file_maps| (file_maps, per_test))
        })
        .and_then(|(file_maps, per_test)| {
            find_covering_statement(file_maps, mutant.position())
                .map(|statement| (statement, per_test))
        });

    match covering {
        None => {
            let time_spent_scoped_tests_ms = calibration.total_time_ms();
            TestableMutant {
                mutant,
                selected_tests: all_tests,
                test_selection_result: TestSelectionResult::Failed,
                time_spent_scoped_tests_ms,
            }
        }
        Some((statement, per_test)) => {
            let selected_tests: Vec<_> = all_tests
                .into_iter()
                .filter(|test| {
                    per_test
                        .get(&test.name)
                        .and_then(|data| data.get(&mutant.file_name))
                        .map(|hits| hits.hits(&statement) > 0)
                        .unwrap_or(false)
                })
                .collect();
            let time_spent_scoped_tests_ms = selected_tests
                .iter()
                .map(|test| calibration.timing_for(&test.name))
                .sum();
            TestableMutant {
                mutant,
                selected_tests,
                test_selection_result: TestSelectionResult::Success,
                time_spent_scoped_tests_ms,
            }
        }
    }
}

/// The record kept for every scheduled mutant.
#[derive(Debug, Clone)]
pub struct MutantRunOutcome {
    pub mutant: Mutant,
    pub status: MutantStatus,
    /// Absent when the mutant never ran (transpile error, unchanged output,
    /// no usable slot).
    pub run_result: Option<RunResult>,
    pub duration_ms: u64,
    pub diff: String,
    /// Failure detail for Errored outcomes, kept for investigation.
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct MutationSummary {
    pub outcomes: Vec<MutantRunOutcome>,
}

impl MutationSummary {
    pub fn new(outcomes: Vec<MutantRunOutcome>) -> MutationSummary {
        MutationSummary { outcomes }
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn killed(&self) -> usize {
        self.count(MutantStatus::Killed)
    }

    pub fn survived(&self) -> usize {
        self.count(MutantStatus::Survived)
    }

    pub fn timed_out(&self) -> usize {
        self.count(MutantStatus::TimedOut)
    }

    pub fn errored(&self) -> usize {
        self.count(MutantStatus::Errored)
    }

    pub fn detected(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status.is_detected())
            .count()
    }

    /// Detection score over the mutants that produced a classification;
    /// Errored mutants are excluded rather than counted as survived.
    pub fn score(&self) -> f64 {
        let classified = self.total() - self.errored();
        if classified == 0 {
            1.0
        } else {
            self.detected() as f64 / classified as f64
        }
    }

    fn count(&self, status: MutantStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }
}

/// Dispatches pending mutants to whichever sandbox slot becomes free.
/// Within a slot execution is strictly sequential; across slots there is no
/// ordering promise, only wall-clock gain.
pub struct MutantScheduler<'a> {
    config: &'a EngineConfig,
    run_id: &'a str,
    test_framework: Option<&'a dyn TestFramework>,
}

impl<'a> MutantScheduler<'a> {
    pub fn new(
        config: &'a EngineConfig,
        run_id: &'a str,
        test_framework: Option<&'a dyn TestFramework>,
    ) -> MutantScheduler<'a> {
        MutantScheduler {
            config,
            run_id,
            test_framework,
        }
    }

    /// Execute every mutant against a pool of sandboxes built from the
    /// unmutated transpiled files.
    pub fn execute(
        &self,
        baseline_files: &[File],
        mutants: Vec<TranspiledMutant>,
    ) -> Vec<MutantRunOutcome> {
        let mut outcomes = Vec::with_capacity(mutants.len());
        let mut runnable = VecDeque::new();
        for transpiled in mutants {
            if let Some(error) = transpiled.transpile_result.error.clone() {
                tracing::warn!(
                    mutant = %transpiled.mutant.mutant.describe(),
                    %error,
                    "transpile error, skipping mutant run"
                );
                outcomes.push(MutantRunOutcome {
                    mutant: transpiled.mutant.mutant,
                    status: MutantStatus::Errored,
                    run_result: None,
                    duration_ms: 0,
                    diff: transpiled.diff,
                    error: Some(error),
                });
            } else if !transpiled.changed_any_transpiled_files {
                tracing::debug!(
                    mutant = %transpiled.mutant.mutant.describe(),
                    "mutant changed no transpiled output, surviving without a run"
                );
                outcomes.push(MutantRunOutcome {
                    mutant: transpiled.mutant.mutant,
                    status: MutantStatus::Survived,
                    run_result: None,
                    duration_ms: 0,
                    diff: transpiled.diff,
                    error: None,
                });
            } else {
                runnable.push_back(transpiled);
            }
        }

        if runnable.is_empty() {
            return outcomes;
        }

        let slots = self.config.concurrency.max(1).min(runnable.len());
        tracing::info!(slots, mutants = runnable.len(), "starting mutation test run");
        let queue = Mutex::new(runnable);

        let slot_outcomes: Vec<Vec<MutantRunOutcome>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..slots)
                .map(|index| {
                    let queue = &queue;
                    scope.spawn(move || self.run_slot(index, baseline_files, queue))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(outcomes) => outcomes,
                    Err(_) => {
                        tracing::error!("sandbox slot thread panicked");
                        Vec::new()
                    }
                })
                .collect()
        });
        for slot in slot_outcomes {
            outcomes.extend(slot);
        }

        // Mutants still queued found no usable slot (every sandbox failed
        // to come up). They are recorded, not silently dropped.
        let leftovers = queue
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for transpiled in leftovers {
            outcomes.push(MutantRunOutcome {
                mutant: transpiled.mutant.mutant,
                status: MutantStatus::Errored,
                run_result: None,
                duration_ms: 0,
                diff: transpiled.diff,
                error: Some("no sandbox slot available".to_string()),
            });
        }

        outcomes
    }

    fn run_slot(
        &self,
        index: usize,
        baseline_files: &[File],
        queue: &Mutex<VecDeque<TranspiledMutant>>,
    ) -> Vec<MutantRunOutcome> {
        let mut sandbox = match Sandbox::create(
            self.config,
            self.run_id,
            index,
            baseline_files,
            self.test_framework,
        ) {
            Ok(sandbox) => sandbox,
            Err(error) => {
                tracing::error!(index, %error, "failed to create sandbox, slot unavailable");
                return Vec::new();
            }
        };

        let mut outcomes = Vec::new();
        loop {
            let next = {
                let mut queue = queue
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                queue.pop_front()
            };
            let Some(transpiled) = next else {
                break;
            };
            outcomes.push(run_one(&mut sandbox, transpiled));
        }
        sandbox.dispose();
        outcomes
    }
}

fn run_one(sandbox: &mut Sandbox<'_>, transpiled: TranspiledMutant) -> MutantRunOutcome {
    let started = Instant::now();
    tracing::debug!(
        mutant = %transpiled.mutant.mutant.describe(),
        slot = sandbox.index(),
        "running mutant"
    );
    match sandbox.run_mutant(&transpiled) {
        Ok(run_result) => {
            let status = classify_run(&run_result);
            MutantRunOutcome {
                mutant: transpiled.mutant.mutant,
                status,
                run_result: Some(run_result),
                duration_ms: started.elapsed().as_millis() as u64,
                diff: transpiled.diff,
                error: None,
            }
        }
        Err(error) => {
            tracing::warn!(
                mutant = %transpiled.mutant.mutant.describe(),
                %error,
                "mutant run failed"
            );
            MutantRunOutcome {
                mutant: transpiled.mutant.mutant,
                status: MutantStatus::Errored,
                run_result: None,
                duration_ms: started.elapsed().as_millis() as u64,
                diff: transpiled.diff,
                error: Some(error.to_string()),
            }
        }
    }
}
