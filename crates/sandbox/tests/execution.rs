// End-to-end execution tests.
// Run with: cargo test -p abacus-sandbox --test execution -- --nocapture
//
// Most cases use `sh` as the interpreter so they run on any Unix box. The
// python cases skip themselves when python3 is not installed.
#![cfg(unix)]

use std::process::Command;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use abacus_sandbox::{ExecuteOptions, Executor, SandboxConfig, SandboxError, SessionManager};

fn shell(config: SandboxConfig) -> Executor {
    Executor::new(SandboxConfig { interpreter: vec!["sh".into()], ..config })
}

fn python_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[test]
fn test_stdout_is_the_answer() {
    let exec = shell(SandboxConfig::default());
    assert_eq!(exec.execute("echo 42").unwrap(), "42\n");
    let stats = exec.stats();
    assert_eq!(stats.succeeded, 1);
    assert!(stats.mean_latency_ms > 0.0);
    assert_eq!(stats.in_flight, 0);
}

#[test]
fn test_nonzero_exit_carries_stderr() {
    let exec = shell(SandboxConfig::default());
    let err = exec.execute("echo boom >&2\nexit 3").unwrap_err();
    assert_eq!(err, SandboxError::Failed { exit_code: Some(3), stderr: "boom".into() });
    assert_eq!(exec.stats().failed, 1);
}

#[test]
fn test_timeout_kills_and_keeps_partial_stdout() {
    let exec = shell(SandboxConfig { timeout: Duration::from_secs(5), ..SandboxConfig::default() });
    let start = Instant::now();
    let outcome = exec
        .execute_with_limits(
            "echo partial\nexec sleep 30",
            &ExecuteOptions { timeout: Some(Duration::from_millis(200)) },
        )
        .unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(outcome.timed_out);
    assert_eq!(outcome.timeout_ms, 200);

    match outcome.into_result() {
        Err(SandboxError::Timeout { timeout_ms, partial_stdout }) => {
            assert_eq!(timeout_ms, 200);
            assert_eq!(partial_stdout, "partial\n");
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(exec.stats().timed_out, 1);
}

#[test]
fn test_requested_timeout_is_clamped() {
    let exec = shell(SandboxConfig { timeout: Duration::from_millis(100), ..SandboxConfig::default() });
    let outcome = exec
        .execute_with_limits("exec sleep 30", &ExecuteOptions { timeout: Some(Duration::from_secs(60)) })
        .unwrap();
    assert!(outcome.timed_out);
    assert_eq!(outcome.timeout_ms, 100);
}

#[test]
fn test_output_is_capped() {
    let exec = shell(SandboxConfig { max_output_bytes: 16, ..SandboxConfig::default() });
    let outcome = exec
        .execute_with_limits("i=0\nwhile [ $i -lt 1000 ]; do echo line$i; i=$((i+1)); done", &ExecuteOptions::default())
        .unwrap();
    assert!(outcome.succeeded());
    assert!(outcome.output_truncated);
    assert_eq!(outcome.stdout.len(), 16);
}

#[test]
fn test_environment_is_cleared() {
    std::env::set_var("ABACUS_SANDBOX_SECRET", "hunter2");
    let exec = shell(SandboxConfig::default());
    let out = exec.execute("echo \"[$ABACUS_SANDBOX_SECRET]\"").unwrap();
    assert_eq!(out, "[]\n");
}

#[test]
fn test_runs_in_private_directory() {
    let exec = shell(SandboxConfig::default());
    let first = exec.execute("pwd").unwrap();
    let second = exec.execute("pwd").unwrap();
    assert_ne!(first, second);
    assert!(first.contains("abacus-sandbox-"));
    // Cleaned up after the run
    assert!(!std::path::Path::new(first.trim()).exists());
}

#[test]
fn test_excess_requests_fail_fast() {
    let exec = Arc::new(shell(SandboxConfig { max_concurrent: 2, ..SandboxConfig::default() }));
    let start = Arc::new(Barrier::new(3));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let exec = Arc::clone(&exec);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                exec.execute("exec sleep 1")
            })
        })
        .collect();

    start.wait();
    let deadline = Instant::now() + Duration::from_secs(5);
    while exec.in_flight() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(exec.in_flight(), 2);

    let began = Instant::now();
    let err = exec.execute("echo 1").unwrap_err();
    assert_eq!(err, SandboxError::AtCapacity { limit: 2 });
    assert!(began.elapsed() < Duration::from_millis(500));

    for h in handles {
        assert!(h.join().unwrap().is_ok());
    }
    let stats = exec.stats();
    assert_eq!(stats.at_capacity, 1);
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.in_flight, 0);
}

#[test]
fn test_session_execution() {
    let mgr = SessionManager::new(Arc::new(shell(SandboxConfig::default())));
    let session = mgr.create_session();
    assert_eq!(mgr.execute(&session.id, "echo hi").unwrap(), "hi\n");
    assert_eq!(mgr.execute(&session.id, "echo again").unwrap(), "again\n");
    assert_eq!(mgr.get(&session.id).unwrap().execution_count, 2);
}

#[test]
fn test_python_computes_answer() {
    if !python_available() {
        eprintln!("skipping: python3 not installed");
        return;
    }
    let exec = Executor::new(SandboxConfig::default());
    let out = exec
        .execute("import math\nprint(round(1000 * (1 + 0.05) ** 10, 2))\nprint(math.floor(2.7))")
        .unwrap();
    assert_eq!(out, "1628.89\n2\n");
}

#[test]
fn test_python_exception_is_failure() {
    if !python_available() {
        eprintln!("skipping: python3 not installed");
        return;
    }
    let exec = Executor::new(SandboxConfig::default());
    match exec.execute("print(1 / 0)") {
        Err(SandboxError::Failed { exit_code, stderr }) => {
            assert_eq!(exit_code, Some(1));
            assert!(stderr.contains("ZeroDivisionError"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}
