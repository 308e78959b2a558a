//! Process channel to a worker hosting one test runner.
//!
//! A proxy owns the worker process and a reader thread draining its stdout.
//! Call lifecycle: Spawning -> Ready -> Busy -> Ready -> ... -> Disposed;
//! an abnormal worker exit while busy surfaces as `WorkerCrash`. Calls take
//! `&mut self`, so a proxy can have at most one call in flight; concurrent
//! callers queue on the borrow instead of interleaving (the worker has no
//! concurrency concept of its own).

use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::protocol::{self, CallOutcome, WorkerCall, WorkerReply, WorkerRequest};
use crate::test_runner::{RunOptions, RunResult};

/// How long `dispose` waits for a polite shutdown before killing.
const DISPOSE_GRACE_MS: u64 = 2000;

/// Everything needed to spawn (or respawn) a worker with identical
/// parameters.
#[derive(Debug, Clone)]
pub struct WorkerSpawnOptions {
    /// The worker executable.
    pub program: PathBuf,
    /// Extra arguments appended after the worker subcommand flags.
    pub extra_args: Vec<String>,
    /// Registered name of the runner the worker instantiates.
    pub runner: String,
    /// Port assigned to this worker's slot.
    pub port: u16,
    /// Sandbox working folder; becomes the worker's current directory.
    pub working_dir: PathBuf,
    /// Log level forwarded to the worker's diagnostics.
    pub log_level: String,
}

impl WorkerSpawnOptions {
    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("worker")
            .arg("--runner")
            .arg(&self.runner)
            .arg("--port")
            .arg(self.port.to_string())
            .arg("--log-level")
            .arg(&self.log_level)
            .args(&self.extra_args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        command
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to spawn worker process {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// The worker process died while a call was outstanding.
    #[error("worker process crashed: {detail}")]
    WorkerCrash { detail: String },
    /// The call could not be serialized; the worker was never touched.
    #[error("could not encode worker call: {0}")]
    Encode(#[from] serde_json::Error),
    /// The call reached the worker but the runner rejected it.
    #[error("worker call failed: {0}")]
    Remote(String),
    /// The worker exceeded its deadline and was forcibly terminated.
    #[error("worker did not reply within {timeout_ms} ms and was killed")]
    RunTimeout { timeout_ms: u64 },
    #[error("worker channel is disposed")]
    Disposed,
}

pub struct WorkerProxy {
    child: Child,
    stdin: ChildStdin,
    replies: mpsc::Receiver<WorkerReply>,
    reader: Option<JoinHandle<()>>,
    next_id: u64,
    disposed: bool,
}

impl WorkerProxy {
    pub fn spawn(options: &WorkerSpawnOptions) -> Result<WorkerProxy, ChannelError> {
        let program = options.program.display().to_string();
        let spawn_error = |source| ChannelError::Spawn {
            program: program.clone(),
            source,
        };

        let mut child = options.command().spawn().map_err(spawn_error)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("stdout not captured")))?;

        let (tx, rx) = mpsc::channel();
        let reader = std::thread::spawn(move || {
            use std::io::BufRead;
            let reader = std::io::BufReader::new(stdout);
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(_) => break,
                };
                match protocol::decode_line::<WorkerReply>(&line) {
                    Ok(reply) => {
                        if tx.send(reply).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        tracing::debug!(%error, "discarding undecodable worker output line");
                    }
                }
            }
        });

        tracing::debug!(program = %program, port = options.port, "spawned worker process");
        Ok(WorkerProxy {
            child,
            stdin,
            replies: rx,
            reader: Some(reader),
            next_id: 0,
            disposed: false,
        })
    }

    /// Send a call and block for its reply. With a deadline, a worker that
    /// does not answer in time is killed, not merely abandoned, so a hung
    /// run cannot starve its slot.
    pub fn call(
        &mut self,
        call: WorkerCall,
        deadline: Option<Duration>,
    ) -> Result<CallOutcome, ChannelError> {
        let id = self.send(call)?;
        self.receive(id, deadline)
    }

    pub fn init(&mut self) -> Result<(), ChannelError> {
        match self.call(WorkerCall::Init, None)? {
            CallOutcome::Initialized => Ok(()),
            CallOutcome::Error { message } => Err(ChannelError::Remote(message)),
            other => Err(ChannelError::Remote(format!(
                "unexpected reply to init: {other:?}"
            ))),
        }
    }

    pub fn run(&mut self, options: &RunOptions) -> Result<RunResult, ChannelError> {
        let deadline = Duration::from_millis(options.timeout_ms);
        let call = WorkerCall::Run {
            options: options.clone(),
        };
        match self.call(call, Some(deadline))? {
            CallOutcome::RunCompleted { result } => Ok(result),
            CallOutcome::Error { message } => Err(ChannelError::Remote(message)),
            other => Err(ChannelError::Remote(format!(
                "unexpected reply to run: {other:?}"
            ))),
        }
    }

    /// Terminate the worker. Idempotent; attempts a polite shutdown first.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        let id = self.next_id;
        self.next_id += 1;
        let request = WorkerRequest {
            id,
            call: WorkerCall::Dispose,
        };
        if let Ok(line) = protocol::encode_line(&request) {
            let written = writeln!(self.stdin, "{line}").and_then(|_| self.stdin.flush());
            if written.is_ok() {
                let deadline = Duration::from_millis(DISPOSE_GRACE_MS);
                let started = Instant::now();
                while let Some(remaining) = deadline.checked_sub(started.elapsed()) {
                    match self.replies.recv_timeout(remaining) {
                        Ok(reply) if reply.id == id => break,
                        Ok(_) => continue,
                        Err(_) => break,
                    }
                }
            }
        }
        self.kill();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }

    fn send(&mut self, call: WorkerCall) -> Result<u64, ChannelError> {
        if self.disposed {
            return Err(ChannelError::Disposed);
        }
        let id = self.next_id;
        self.next_id += 1;
        let line = protocol::encode_line(&WorkerRequest { id, call })?;
        let written = writeln!(self.stdin, "{line}").and_then(|_| self.stdin.flush());
        match written {
            Ok(()) => Ok(id),
            Err(error) => Err(self.crash(format!("failed to write request: {error}"))),
        }
    }

    fn receive(
        &mut self,
        id: u64,
        deadline: Option<Duration>,
    ) -> Result<CallOutcome, ChannelError> {
        let started = Instant::now();
        loop {
            let reply = match deadline {
                Some(limit) => match limit.checked_sub(started.elapsed()) {
                    Some(remaining) => match self.replies.recv_timeout(remaining) {
                        Ok(reply) => reply,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            self.kill();
                            return Err(ChannelError::RunTimeout {
                                timeout_ms: limit.as_millis() as u64,
                            });
                        }
                        Err(mpsc::RecvTimeoutError::Disconnected) => {
                            return Err(
                                self.crash("worker closed its output stream".to_string())
                            );
                        }
                    },
                    None => {
                        self.kill();
                        return Err(ChannelError::RunTimeout {
                            timeout_ms: limit.as_millis() as u64,
                        });
                    }
                },
                None => match self.replies.recv() {
                    Ok(reply) => reply,
                    Err(_) => {
                        return Err(self.crash("worker closed its output stream".to_string()));
                    }
                },
            };

            if reply.id == id {
                return Ok(reply.outcome);
            }
            tracing::debug!(expected = id, received = reply.id, "discarding stale worker reply");
        }
    }

    /// Reap the worker and report the crash with its exit status.
    fn crash(&mut self, detail: String) -> ChannelError {
        let _ = self.child.kill();
        let status = self.child.wait().ok();
        self.disposed = true;
        let detail = match status {
            Some(status) => format!("{detail} ({status})"),
            None => detail,
        };
        ChannelError::WorkerCrash { detail }
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.disposed = true;
    }
}

impl Drop for WorkerProxy {
    fn drop(&mut self) {
        self.dispose();
    }
}
