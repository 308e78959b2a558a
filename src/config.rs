use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for a mutation run.
///
/// Loading this from a config file or CLI belongs to the embedding program;
/// the engine only consumes the resolved values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Multiplicative safety margin applied to a mutant's scoped baseline time.
    pub timeout_factor: f64,
    /// Fixed per-run overhead added on top of the scaled time, in milliseconds.
    pub timeout_ms: u64,
    /// First port handed out to a test runner; slot `i` receives `base_port + i`.
    pub base_port: u16,
    /// Maximum number of sandboxes running mutants at the same time.
    pub concurrency: usize,
    /// Test runner implementation name, resolved through the worker registry.
    pub test_runner: String,
    /// Log level passed to spawned workers.
    pub log_level: String,
    /// Worker executable. Defaults to the current executable when unset.
    pub worker_program: Option<PathBuf>,
    /// Extra arguments prepended to every worker invocation.
    pub worker_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_factor: 1.5,
            timeout_ms: 5000,
            base_port: 9234,
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            test_runner: String::new(),
            log_level: "info".to_string(),
            worker_program: None,
            worker_args: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn with_timeout_factor(mut self, timeout_factor: f64) -> Self {
        self.timeout_factor = timeout_factor;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_test_runner(mut self, test_runner: impl Into<String>) -> Self {
        self.test_runner = test_runner.into();
        self
    }

    pub fn with_log_level(mut self, log_level: impl Into<String>) -> Self {
        self.log_level = log_level.into();
        self
    }

    pub fn with_worker_program(mut self, worker_program: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(worker_program.into());
        self
    }

    pub fn with_worker_args(mut self, worker_args: Vec<String>) -> Self {
        self.worker_args = worker_args;
        self
    }

    /// The executable to spawn workers from.
    pub fn resolve_worker_program(&self) -> std::io::Result<PathBuf> {
        match &self.worker_program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = EngineConfig::default()
            .with_timeout_factor(2.0)
            .with_timeout_ms(1000)
            .with_base_port(4200)
            .with_concurrency(3)
            .with_test_runner("scripted")
            .with_log_level("debug")
            .with_worker_program("/usr/bin/mutexec");

        assert_eq!(config.timeout_factor, 2.0);
        assert_eq!(config.timeout_ms, 1000);
        assert_eq!(config.base_port, 4200);
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.test_runner, "scripted");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.worker_program, Some(PathBuf::from("/usr/bin/mutexec")));
    }

    #[test]
    fn default_concurrency_is_at_least_one() {
        assert!(EngineConfig::default().concurrency >= 1);
    }
}
