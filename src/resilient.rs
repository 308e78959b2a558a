//! Crash-recoverable wrapper around a worker-process test runner.
//!
//! One unstable mutant must never abort the batch: every failure mode of
//! `run` degrades to a well-formed `RunResult` instead of an error.

use crate::channel::{ChannelError, WorkerProxy, WorkerSpawnOptions};
use crate::test_runner::{RunOptions, RunResult};

pub struct ResilientRunner {
    spawn_options: WorkerSpawnOptions,
    proxy: WorkerProxy,
}

impl ResilientRunner {
    pub fn create(spawn_options: WorkerSpawnOptions) -> Result<ResilientRunner, ChannelError> {
        let proxy = WorkerProxy::spawn(&spawn_options)?;
        Ok(ResilientRunner {
            spawn_options,
            proxy,
        })
    }

    pub fn init(&mut self) -> Result<(), ChannelError> {
        self.proxy.init()
    }

    /// Run the suite. A worker crash is retried exactly once against a
    /// freshly spawned worker; a timeout respawns the killed worker and is
    /// reported as a Timeout result without a retry. Anything else the
    /// worker reports passes through untouched.
    pub fn run(&mut self, options: &RunOptions) -> RunResult {
        match self.proxy.run(options) {
            Ok(result) => result,
            Err(ChannelError::RunTimeout { timeout_ms }) => {
                tracing::warn!(timeout_ms, "test run timed out, worker was killed");
                self.respawn_after_timeout();
                RunResult::timeout()
            }
            Err(ChannelError::WorkerCrash { detail }) => {
                tracing::warn!(%detail, "test runner worker crashed, respawning for one retry");
                self.retry(options)
            }
            Err(error) => RunResult::error(vec![error.to_string()]),
        }
    }

    pub fn dispose(&mut self) {
        self.proxy.dispose();
    }

    fn retry(&mut self, options: &RunOptions) -> RunResult {
        if let Err(error) = self.recreate() {
            return RunResult::error(vec![format!(
                "worker could not be respawned after a crash: {error}"
            )]);
        }
        match self.proxy.run(options) {
            Ok(result) => result,
            Err(ChannelError::RunTimeout { timeout_ms }) => {
                tracing::warn!(timeout_ms, "retried run timed out");
                self.respawn_after_timeout();
                RunResult::timeout()
            }
            Err(error) => RunResult::error(vec![format!(
                "worker crashed twice on the same run: {error}"
            )]),
        }
    }

    /// The slot must stay usable after a timeout kill, so a fresh worker is
    /// spawned eagerly; failure to do so is logged and surfaces on the next
    /// run as an Error result.
    fn respawn_after_timeout(&mut self) {
        if let Err(error) = self.recreate() {
            tracing::error!(%error, "failed to respawn worker after timeout");
        }
    }

    fn recreate(&mut self) -> Result<(), ChannelError> {
        self.proxy.dispose();
        self.proxy = WorkerProxy::spawn(&self.spawn_options)?;
        self.proxy.init()
    }
}
