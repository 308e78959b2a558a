use std::path::Path;

use mutexec::channel::{ChannelError, WorkerProxy, WorkerSpawnOptions};
use mutexec::scripted::SCENARIO_FILE_NAME;
use mutexec::test_runner::{RunOptions, RunStatus, TestStatus};

fn spawn_options(dir: &Path) -> WorkerSpawnOptions {
    WorkerSpawnOptions {
        program: env!("CARGO_BIN_EXE_mutexec").into(),
        extra_args: Vec::new(),
        runner: "scripted".to_string(),
        port: 0,
        working_dir: dir.to_path_buf(),
        log_level: "warn".to_string(),
    }
}

fn write_scenario(dir: &Path, json: &str) {
    std::fs::write(dir.join(SCENARIO_FILE_NAME), json).unwrap();
}

#[test]
fn init_and_run_against_a_real_worker() {
    let dir = tempfile::TempDir::new().unwrap();
    write_scenario(
        dir.path(),
        r#"{"tests":[
            {"name":"adds","time_ms":5},
            {"name":"subtracts","fails":true,"time_ms":7,"failure_message":"expected 1, got 2"}
        ]}"#,
    );

    let mut proxy = WorkerProxy::spawn(&spawn_options(dir.path())).unwrap();
    proxy.init().unwrap();

    let result = proxy.run(&RunOptions::with_timeout(10_000)).unwrap();
    assert_eq!(result.status, RunStatus::Complete);
    assert_eq!(result.tests.len(), 2);
    assert_eq!(result.tests[0].name, "adds");
    assert_eq!(result.tests[0].status, TestStatus::Success);
    assert_eq!(result.tests[1].status, TestStatus::Failed);
    assert_eq!(
        result.tests[1].failure_messages,
        vec!["expected 1, got 2".to_string()]
    );

    proxy.dispose();
}

#[test]
fn repeated_runs_reuse_the_same_worker() {
    let dir = tempfile::TempDir::new().unwrap();
    write_scenario(dir.path(), r#"{"tests":[{"name":"only","time_ms":1}]}"#);

    let mut proxy = WorkerProxy::spawn(&spawn_options(dir.path())).unwrap();
    proxy.init().unwrap();

    for _ in 0..3 {
        let result = proxy.run(&RunOptions::with_timeout(10_000)).unwrap();
        assert_eq!(result.status, RunStatus::Complete);
        assert_eq!(result.tests.len(), 1);
    }
    proxy.dispose();
}

#[test]
fn inline_test_hooks_narrow_the_run() {
    let dir = tempfile::TempDir::new().unwrap();
    write_scenario(
        dir.path(),
        r#"{"tests":[{"name":"a","time_ms":1},{"name":"b","time_ms":1}]}"#,
    );

    let mut proxy = WorkerProxy::spawn(&spawn_options(dir.path())).unwrap();
    proxy.init().unwrap();

    let options = RunOptions {
        timeout_ms: 10_000,
        test_hooks: Some("[\"b\"]".to_string()),
    };
    let result = proxy.run(&options).unwrap();
    assert_eq!(result.tests.len(), 1);
    assert_eq!(result.tests[0].name, "b");

    proxy.dispose();
}

#[test]
fn dispose_is_idempotent_and_calls_after_it_fail() {
    let dir = tempfile::TempDir::new().unwrap();
    write_scenario(dir.path(), r#"{"tests":[]}"#);

    let mut proxy = WorkerProxy::spawn(&spawn_options(dir.path())).unwrap();
    proxy.init().unwrap();
    proxy.dispose();
    proxy.dispose();

    let error = proxy.run(&RunOptions::with_timeout(1000)).unwrap_err();
    assert!(matches!(error, ChannelError::Disposed));
}

#[test]
fn unknown_runner_surfaces_as_a_worker_crash() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut options = spawn_options(dir.path());
    options.runner = "no-such-runner".to_string();

    // The worker exits before serving a single call.
    let mut proxy = WorkerProxy::spawn(&options).unwrap();
    let error = proxy.init().unwrap_err();
    assert!(matches!(error, ChannelError::WorkerCrash { .. }), "got {error}");
}

#[test]
fn a_worker_exceeding_its_deadline_is_killed() {
    let dir = tempfile::TempDir::new().unwrap();
    write_scenario(
        dir.path(),
        r#"{"tests":[{"name":"slow","time_ms":1}],"run_delay_ms":30000}"#,
    );

    let mut proxy = WorkerProxy::spawn(&spawn_options(dir.path())).unwrap();
    proxy.init().unwrap();

    let started = std::time::Instant::now();
    let error = proxy.run(&RunOptions::with_timeout(300)).unwrap_err();
    assert!(matches!(error, ChannelError::RunTimeout { .. }), "got {error}");
    assert!(
        started.elapsed() < std::time::Duration::from_secs(10),
        "kill must not wait out the worker's sleep"
    );
}
