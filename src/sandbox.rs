//! One isolated, reusable on-disk copy of the project under test.
//!
//! A sandbox is filled once and then executes many mutants; recreating the
//! copy per mutant would dominate total runtime on large projects. The core
//! guarantee is that mutation is transient: after every `run_mutant`, each
//! touched file is back at its baseline bytes, whatever the run's outcome.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use camino::{Utf8Component, Utf8PathBuf};
use tempfile::TempDir;
use thiserror::Error;

use crate::channel::{ChannelError, WorkerSpawnOptions};
use crate::config::EngineConfig;
use crate::file::File;
use crate::mutant::TestSelectionResult;
use crate::resilient::ResilientRunner;
use crate::schedule::mutant_timeout_ms;
use crate::test_framework::TestFramework;
use crate::test_runner::{RunOptions, RunResult};
use crate::transpile::TranspiledMutant;

/// Seeded empty when a test framework is present; the framework's filter
/// snippet is written here before each mutant run.
pub const TEST_HOOKS_FILE_NAME: &str = "___testHooks";

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create sandbox working folder: {0}")]
    CreateFolder(#[source] std::io::Error),
    #[error("failed to write {path} in sandbox: {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("file name {0} is not relative to the project root")]
    ForeignFile(Utf8PathBuf),
    #[error("transpiled output {0} does not map to any sandbox file")]
    UnknownFile(Utf8PathBuf),
    #[error("cannot resolve worker executable: {0}")]
    WorkerProgram(#[source] std::io::Error),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

pub struct Sandbox<'a> {
    index: usize,
    working_folder: TempDir,
    /// Baseline content of every sandboxed file, including the seeded hooks
    /// file.
    files: Vec<File>,
    /// Bijection from original file name to its on-disk sandbox path.
    file_map: BTreeMap<Utf8PathBuf, PathBuf>,
    test_framework: Option<&'a dyn TestFramework>,
    runner: ResilientRunner,
    timeout_factor: f64,
    timeout_ms: u64,
}

impl<'a> Sandbox<'a> {
    pub fn create(
        config: &EngineConfig,
        run_id: &str,
        index: usize,
        files: &[File],
        test_framework: Option<&'a dyn TestFramework>,
    ) -> Result<Sandbox<'a>, SandboxError> {
        let working_folder = tempfile::Builder::new()
            .prefix(&format!("mutexec-{run_id}-sandbox-{index}-"))
            .tempdir()
            .map_err(SandboxError::CreateFolder)?;
        tracing::debug!(
            index,
            folder = %working_folder.path().display(),
            "creating sandbox"
        );

        let mut files = files.to_vec();
        if test_framework.is_some() {
            files.insert(0, File::new(TEST_HOOKS_FILE_NAME, Vec::new()));
        }

        let mut file_map = BTreeMap::new();
        for file in &files {
            let target = fill_file(working_folder.path(), file)?;
            file_map.insert(file.name().to_owned(), target);
        }

        let port = config.base_port.saturating_add(index.min(u16::MAX as usize) as u16);
        tracing::debug!(index, port, "creating test runner");
        let spawn_options = WorkerSpawnOptions {
            program: config
                .resolve_worker_program()
                .map_err(SandboxError::WorkerProgram)?,
            extra_args: config.worker_args.clone(),
            runner: config.test_runner.clone(),
            port,
            working_dir: working_folder.path().to_path_buf(),
            log_level: config.log_level.clone(),
        };
        let mut runner = ResilientRunner::create(spawn_options)?;
        runner.init()?;

        Ok(Sandbox {
            index,
            working_folder,
            files,
            file_map,
            test_framework,
            runner,
            timeout_factor: config.timeout_factor,
            timeout_ms: config.timeout_ms,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn working_folder(&self) -> &Path {
        self.working_folder.path()
    }

    /// The on-disk path a file name maps to, if it is part of this sandbox.
    pub fn sandbox_path(&self, name: &Utf8PathBuf) -> Option<&Path> {
        self.file_map.get(name).map(PathBuf::as_path)
    }

    pub fn run(&mut self, timeout_ms: u64) -> RunResult {
        self.runner.run(&RunOptions::with_timeout(timeout_ms))
    }

    /// Execute one mutant: write its transpiled output into the sandbox,
    /// narrow the run to the selected tests, run with a calibrated timeout,
    /// then restore every touched file.
    pub fn run_mutant(
        &mut self,
        transpiled: &TranspiledMutant,
    ) -> Result<RunResult, SandboxError> {
        let mutant = &transpiled.mutant;
        if mutant.test_selection_result == TestSelectionResult::Failed {
            tracing::warn!(
                "Failed to find coverage data for this mutant, running all tests. \
                 This might have an impact on performance: {}",
                mutant.mutant.describe()
            );
        }

        let mutant_files = &transpiled.transpile_result.output_files;
        // Resolve every target before writing anything, so an unknown name
        // cannot leave the sandbox half-mutated.
        let mut writes: Vec<(&File, &Path)> = Vec::with_capacity(mutant_files.len());
        for file in mutant_files {
            let target = self
                .file_map
                .get(file.name())
                .ok_or_else(|| SandboxError::UnknownFile(file.name().to_owned()))?;
            writes.push((file, target.as_path()));
        }

        let mut touched: Vec<Utf8PathBuf> = Vec::with_capacity(writes.len() + 1);
        for (file, target) in writes {
            write_file(target, file.content())?;
            touched.push(file.name().to_owned());
        }

        if let Some(framework) = self.test_framework {
            let snippet = framework.filter(&mutant.selected_tests);
            let hooks_name = Utf8PathBuf::from(TEST_HOOKS_FILE_NAME);
            if let Some(target) = self.file_map.get(&hooks_name) {
                write_file(target, snippet.as_bytes())?;
                touched.push(hooks_name);
            }
        }

        let timeout = mutant_timeout_ms(
            self.timeout_factor,
            self.timeout_ms,
            mutant.time_spent_scoped_tests_ms,
        );
        let run_result = self.run(timeout);

        self.reset(&touched)?;
        Ok(run_result)
    }

    /// Tears down the test runner. Removal of the working folder is owned
    /// by the `TempDir` guard, which is released when the sandbox drops.
    pub fn dispose(&mut self) {
        self.runner.dispose();
    }

    fn reset(&self, touched: &[Utf8PathBuf]) -> Result<(), SandboxError> {
        for name in touched {
            let original = self.files.iter().find(|file| file.name() == name);
            if let (Some(original), Some(target)) = (original, self.file_map.get(name)) {
                write_file(target, original.content())?;
            }
        }
        Ok(())
    }
}

fn fill_file(root: &Path, file: &File) -> Result<PathBuf, SandboxError> {
    let name = file.name();
    let escapes = name.is_absolute()
        || name
            .components()
            .any(|component| matches!(component, Utf8Component::ParentDir));
    if escapes {
        return Err(SandboxError::ForeignFile(name.to_owned()));
    }

    let target = root.join(name.as_std_path());
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|source| SandboxError::WriteFile {
            path: parent.display().to_string(),
            source,
        })?;
    }
    write_file(&target, file.content())?;
    Ok(target)
}

fn write_file(target: &Path, content: &[u8]) -> Result<(), SandboxError> {
    std::fs::write(target, content).map_err(|source| SandboxError::WriteFile {
        path: target.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_file_names_are_rejected_before_any_worker_spawns() {
        let config = EngineConfig::default()
            .with_test_runner("scripted")
            .with_worker_program("/nonexistent/worker");
        let files = vec![File::from_text("/etc/outside.rs", "")];
        let result = Sandbox::create(&config, "t1", 0, &files, None);
        assert!(matches!(result, Err(SandboxError::ForeignFile(_))));
    }

    #[test]
    fn parent_escaping_file_names_are_rejected() {
        let config = EngineConfig::default()
            .with_test_runner("scripted")
            .with_worker_program("/nonexistent/worker");
        let files = vec![File::from_text("../escape.rs", "")];
        let result = Sandbox::create(&config, "t1", 0, &files, None);
        assert!(matches!(result, Err(SandboxError::ForeignFile(_))));
    }
}
