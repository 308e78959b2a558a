use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// A line/column position in a source file. Ordered by line, then column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Position {
        Position { line, column }
    }
}

/// An inclusive source range, as recorded by coverage instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRange {
    pub start: Position,
    pub end: Position,
}

impl CodeRange {
    pub fn new(start: Position, end: Position) -> CodeRange {
        CodeRange { start, end }
    }

    pub fn contains(&self, position: Position) -> bool {
        self.start <= position && position <= self.end
    }

    /// Extent used to pick the tightest range around a position.
    fn extent(&self) -> (u32, u32) {
        (
            self.end.line - self.start.line,
            if self.end.line == self.start.line {
                self.end.column.saturating_sub(self.start.column)
            } else {
                u32::MAX
            },
        )
    }
}

/// Synthetic counter id assigned by the (external) instrumenter.
pub type CounterId = String;

/// Statement and function ranges for one instrumented file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileCoverageMaps {
    #[serde(default)]
    pub statement_map: BTreeMap<CounterId, CodeRange>,
    #[serde(default)]
    pub fn_map: BTreeMap<CounterId, CodeRange>,
}

/// Instrumentation ranges for every mutated file.
pub type CoverageMaps = BTreeMap<Utf8PathBuf, FileCoverageMaps>;

/// Hit counts one test recorded for one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileHits {
    #[serde(default)]
    pub statements: BTreeMap<CounterId, u64>,
    #[serde(default)]
    pub functions: BTreeMap<CounterId, u64>,
}

impl FileHits {
    pub fn hits(&self, statement: &StatementRef) -> u64 {
        match statement {
            StatementRef::Statement(id) => self.statements.get(id).copied().unwrap_or(0),
            StatementRef::Function(id) => self.functions.get(id).copied().unwrap_or(0),
        }
    }
}

/// One test's hits, per file.
pub type CoverageData = BTreeMap<Utf8PathBuf, FileHits>;

/// Coverage recorded per test, keyed by test name.
pub type CoverageCollection = BTreeMap<String, CoverageData>;

/// Reference into either the statement map or the function map of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementRef {
    Statement(CounterId),
    Function(CounterId),
}

/// Find the smallest instrumented statement containing `position`, falling
/// back to the smallest containing function.
pub fn find_covering_statement(
    maps: &FileCoverageMaps,
    position: Position,
) -> Option<StatementRef> {
    smallest_containing(&maps.statement_map, position)
        .map(StatementRef::Statement)
        .or_else(|| smallest_containing(&maps.fn_map, position).map(StatementRef::Function))
}

fn smallest_containing(
    ranges: &BTreeMap<CounterId, CodeRange>,
    position: Position,
) -> Option<CounterId> {
    ranges
        .iter()
        .filter(|(_, range)| range.contains(position))
        .min_by_key(|(_, range)| range.extent())
        .map(|(id, _)| id.clone())
}
