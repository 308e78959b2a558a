//! Worker-side host: one process, one test runner, a serve loop over the
//! closed call protocol on stdin/stdout.

use std::io::{BufRead, Write};

use thiserror::Error;

use crate::cache::CacheRecorder;
use crate::protocol::{self, CallOutcome, WorkerCall, WorkerReply, WorkerRequest};
use crate::test_runner::{RunnerError, RunnerOptions, RunnerParts, RunnerRegistry};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error("io error on worker channel: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode worker reply: {0}")]
    Protocol(#[from] serde_json::Error),
}

/// Arguments the engine passes when spawning a worker.
#[derive(Debug, Clone)]
pub struct WorkerArgs {
    pub runner: String,
    pub port: u16,
    pub log_level: String,
}

/// Entry point for a worker-host binary: set up logging, construct the
/// runner from the registry, then serve until Dispose or EOF.
pub fn run_worker(args: &WorkerArgs, registry: &RunnerRegistry) -> Result<(), WorkerError> {
    init_logging(&args.log_level);
    let options = RunnerOptions {
        port: args.port,
        working_dir: std::env::current_dir()?,
    };
    let parts = registry.create(&args.runner, &options)?;
    tracing::debug!(runner = %args.runner, port = args.port, "worker ready");

    let stdin = std::io::stdin().lock();
    let stdout = std::io::stdout().lock();
    serve(parts, stdin, stdout)
}

/// Diagnostics go to stderr; stdout carries the protocol.
fn init_logging(level: &str) {
    let level = level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Serve the call protocol until a Dispose call or EOF. EOF without Dispose
/// means the channel owner went away; the runner is still disposed before
/// exiting.
pub fn serve<R: BufRead, W: Write>(
    mut parts: RunnerParts,
    reader: R,
    mut writer: W,
) -> Result<(), WorkerError> {
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: WorkerRequest = match protocol::decode_line(&line) {
            Ok(request) => request,
            Err(error) => {
                // No id to correlate an error reply with.
                tracing::warn!(%error, "discarding undecodable request line");
                continue;
            }
        };

        let (outcome, done) = dispatch(&mut parts, request.call);
        let reply = WorkerReply {
            id: request.id,
            outcome,
        };
        writeln!(writer, "{}", protocol::encode_line(&reply)?)?;
        writer.flush()?;
        if done {
            return Ok(());
        }
    }

    let _ = parts.runner.dispose();
    Ok(())
}

fn dispatch(parts: &mut RunnerParts, call: WorkerCall) -> (CallOutcome, bool) {
    match call {
        WorkerCall::Init => match parts.runner.init() {
            Ok(()) => (CallOutcome::Initialized, false),
            Err(error) => (
                CallOutcome::Error {
                    message: error.to_string(),
                },
                false,
            ),
        },
        WorkerCall::Run { options } => {
            // Snapshot loaded modules so one run's test files cannot leak
            // into the next run in this worker.
            let recorder = parts
                .module_cache
                .as_deref()
                .map(|cache| CacheRecorder::record(cache));
            let result = parts.runner.run(&options);
            if let (Some(recorder), Some(cache)) = (recorder, parts.module_cache.as_deref_mut()) {
                recorder.purge(cache);
            }
            match result {
                Ok(result) => (CallOutcome::RunCompleted { result }, false),
                Err(error) => (
                    CallOutcome::Error {
                        message: error.to_string(),
                    },
                    false,
                ),
            }
        }
        WorkerCall::Dispose => match parts.runner.dispose() {
            Ok(()) => (CallOutcome::Disposed, true),
            Err(error) => (
                CallOutcome::Error {
                    message: error.to_string(),
                },
                true,
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SharedModuleCache;
    use crate::test_runner::{RunOptions, RunResult, TestRunner};

    struct FakeRunner {
        cache: SharedModuleCache,
        runs: u32,
    }

    impl TestRunner for FakeRunner {
        fn run(&mut self, _options: &RunOptions) -> Result<RunResult, RunnerError> {
            self.runs += 1;
            self.cache.insert(format!("module-from-run-{}", self.runs));
            Ok(RunResult::complete(Vec::new()))
        }
    }

    fn request_lines(calls: &[WorkerCall]) -> String {
        calls
            .iter()
            .enumerate()
            .map(|(id, call)| {
                protocol::encode_line(&WorkerRequest {
                    id: id as u64,
                    call: call.clone(),
                })
                .unwrap()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn replies_from(output: &[u8]) -> Vec<WorkerReply> {
        String::from_utf8(output.to_vec())
            .unwrap()
            .lines()
            .map(|line| protocol::decode_line(line).unwrap())
            .collect()
    }

    #[test]
    fn serves_init_run_dispose_in_order() {
        let cache = SharedModuleCache::default();
        let parts = RunnerParts {
            runner: Box::new(FakeRunner {
                cache: cache.clone(),
                runs: 0,
            }),
            module_cache: Some(Box::new(cache.clone())),
        };
        let input = request_lines(&[
            WorkerCall::Init,
            WorkerCall::Run {
                options: RunOptions::with_timeout(1000),
            },
            WorkerCall::Dispose,
        ]);
        let mut output = Vec::new();

        serve(parts, input.as_bytes(), &mut output).unwrap();

        let replies = replies_from(&output);
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0].outcome, CallOutcome::Initialized);
        assert!(matches!(
            replies[1].outcome,
            CallOutcome::RunCompleted { .. }
        ));
        assert_eq!(replies[2].outcome, CallOutcome::Disposed);
        assert_eq!(replies.iter().map(|r| r.id).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn modules_loaded_during_a_run_are_purged_after_it() {
        let cache = SharedModuleCache::default();
        cache.insert("preloaded");
        let parts = RunnerParts {
            runner: Box::new(FakeRunner {
                cache: cache.clone(),
                runs: 0,
            }),
            module_cache: Some(Box::new(cache.clone())),
        };
        let input = request_lines(&[
            WorkerCall::Run {
                options: RunOptions::with_timeout(1000),
            },
            WorkerCall::Run {
                options: RunOptions::with_timeout(1000),
            },
            WorkerCall::Dispose,
        ]);
        let mut output = Vec::new();

        serve(parts, input.as_bytes(), &mut output).unwrap();

        assert!(cache.contains("preloaded"));
        assert!(!cache.contains("module-from-run-1"));
        assert!(!cache.contains("module-from-run-2"));
    }

    #[test]
    fn undecodable_lines_are_skipped() {
        let cache = SharedModuleCache::default();
        let parts = RunnerParts {
            runner: Box::new(FakeRunner { cache, runs: 0 }),
            module_cache: None,
        };
        let input = format!(
            "this is not json\n{}",
            request_lines(&[WorkerCall::Dispose])
        );
        let mut output = Vec::new();

        serve(parts, input.as_bytes(), &mut output).unwrap();

        let replies = replies_from(&output);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].outcome, CallOutcome::Disposed);
    }

    #[test]
    fn eof_without_dispose_still_returns_cleanly() {
        let cache = SharedModuleCache::default();
        let parts = RunnerParts {
            runner: Box::new(FakeRunner { cache, runs: 0 }),
            module_cache: None,
        };
        let input = request_lines(&[WorkerCall::Init]);
        let mut output = Vec::new();

        serve(parts, input.as_bytes(), &mut output).unwrap();

        let replies = replies_from(&output);
        assert_eq!(replies.len(), 1);
    }
}
