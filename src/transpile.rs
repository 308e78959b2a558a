use similar::TextDiff;

use crate::file::File;
use crate::mutant::TestableMutant;

/// Output of a transpiler pass over a set of files.
#[derive(Debug, Clone, PartialEq)]
pub struct TranspileResult {
    pub output_files: Vec<File>,
    pub error: Option<String>,
}

impl TranspileResult {
    pub fn ok(output_files: Vec<File>) -> TranspileResult {
        TranspileResult {
            output_files,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> TranspileResult {
        TranspileResult {
            output_files: Vec::new(),
            error: Some(message.into()),
        }
    }
}

/// A transpiler collaborator. Must be order-preserving for files it passes
/// through unchanged.
pub trait Transpiler: Send {
    fn transpile(&mut self, files: &[File]) -> TranspileResult;
}

/// Identity transpiler used when the project needs no transformation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTranspiler;

impl Transpiler for NullTranspiler {
    fn transpile(&mut self, files: &[File]) -> TranspileResult {
        TranspileResult::ok(files.to_vec())
    }
}

/// A mutant after transpilation, ready to hand to a sandbox.
#[derive(Debug, Clone)]
pub struct TranspiledMutant {
    pub mutant: TestableMutant,
    pub transpile_result: TranspileResult,
    /// Whether transpiling actually changed any output file. Mutants that
    /// vanish in transpilation (for example, edits to a type annotation)
    /// produce no observable difference and need no test run.
    pub changed_any_transpiled_files: bool,
    /// Unified diff of the mutated source file, kept for investigation.
    pub diff: String,
}

impl TranspiledMutant {
    /// A file missing from the mutated output is not treated as changed;
    /// only files that differ from, or are absent in, the unmutated output
    /// count.
    pub fn new(
        mutant: TestableMutant,
        transpile_result: TranspileResult,
        unmutated_files: &[File],
        diff: String,
    ) -> TranspiledMutant {
        let changed_any_transpiled_files = transpile_result.output_files.iter().any(|file| {
            match unmutated_files.iter().find(|u| u.name() == file.name()) {
                Some(unmutated) => unmutated.content() != file.content(),
                None => true,
            }
        });
        TranspiledMutant {
            mutant,
            transpile_result,
            changed_any_transpiled_files,
            diff,
        }
    }
}

/// Apply a mutant to the input files, transpile the result, and compare it
/// against the unmutated transpile output.
pub fn transpile_mutant(
    transpiler: &mut dyn Transpiler,
    testable: TestableMutant,
    input_files: &[File],
    unmutated_output: &[File],
) -> TranspiledMutant {
    let mut diff = String::new();
    let mutated_inputs: Vec<File> = input_files
        .iter()
        .map(|file| {
            if file.name() == testable.mutant.file_name {
                let mutated = testable.mutant.apply(file);
                diff = generate_diff(file.text(), mutated.text());
                mutated
            } else {
                file.clone()
            }
        })
        .collect();

    let result = transpiler.transpile(&mutated_inputs);
    TranspiledMutant::new(testable, result, unmutated_output, diff)
}

/// Render only the changed lines between two text versions.
pub fn generate_diff(original: &str, mutated: &str) -> String {
    let diff = TextDiff::from_lines(original, mutated);
    let mut output = String::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Delete => output.push_str(&format!("- {}", change)),
            similar::ChangeTag::Insert => output.push_str(&format!("+ {}", change)),
            _ => {}
        }
    }
    output
}
