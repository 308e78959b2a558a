use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::coverage::Position;
use crate::file::File;
use crate::test_framework::TestSelection;
use crate::test_runner::{RunResult, RunStatus, TestStatus};

/// One candidate defect: replace `original` with `replacement` at a fixed
/// location. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutant {
    pub id: String,
    pub file_name: Utf8PathBuf,
    pub line: u32,
    pub column: u32,
    pub start_byte: usize,
    pub end_byte: usize,
    pub original: String,
    pub replacement: String,
}

impl Mutant {
    pub fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    /// Splice the replacement into a copy of `file`. Spans that fall outside
    /// the buffer are clamped to it.
    pub fn apply(&self, file: &File) -> File {
        let content = file.content();
        let start = self.start_byte.min(content.len());
        let end = self.end_byte.clamp(start, content.len());

        let mut mutated = Vec::with_capacity(content.len() + self.replacement.len());
        mutated.extend_from_slice(&content[..start]);
        mutated.extend_from_slice(self.replacement.as_bytes());
        mutated.extend_from_slice(&content[end..]);
        File::new(file.name().to_owned(), mutated)
    }

    pub fn describe(&self) -> String {
        format!(
            "{} {}:{}:{} {} -> {}",
            self.id, self.file_name, self.line, self.column, self.original, self.replacement
        )
    }
}

/// Whether coverage data could establish which tests exercise the mutated
/// location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestSelectionResult {
    Success,
    Failed,
}

/// A mutant plus the tests that could possibly detect it and the baseline
/// time those tests took.
#[derive(Debug, Clone)]
pub struct TestableMutant {
    pub mutant: Mutant,
    pub selected_tests: Vec<TestSelection>,
    pub test_selection_result: TestSelectionResult,
    /// Summed baseline duration of the selected tests. With a failed
    /// selection this is the full-suite baseline time, since that is the
    /// work the fallback run performs.
    pub time_spent_scoped_tests_ms: u64,
}

/// Final classification of one executed mutant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutantStatus {
    Killed,
    Survived,
    TimedOut,
    Errored,
}

impl MutantStatus {
    /// TimedOut counts as detected: an infinite loop is itself a defect the
    /// suite exposed. Errored is ambiguous and never counts as survived.
    pub fn is_detected(self) -> bool {
        matches!(self, MutantStatus::Killed | MutantStatus::TimedOut)
    }
}

/// Classify a mutant run result.
pub fn classify_run(run: &RunResult) -> MutantStatus {
    match run.status {
        RunStatus::Timeout => MutantStatus::TimedOut,
        RunStatus::Error => MutantStatus::Errored,
        RunStatus::Complete => {
            if run
                .tests
                .iter()
                .any(|test| test.status == TestStatus::Failed)
            {
                MutantStatus::Killed
            } else {
                MutantStatus::Survived
            }
        }
    }
}
