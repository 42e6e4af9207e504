//! Bounded subprocess execution.
//!
//! Each run gets a fresh temp directory holding `main.py`, a cleared
//! environment and null stdin. Output is read on helper threads with a hard
//! cap so a chatty script can neither exhaust memory nor block on a full
//! pipe. The parent polls for exit and kills the child at the deadline.

use std::io::{self, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::stats::{ExecutionStats, Outcome, StatsRecorder};
use crate::validate::{validate_code, Validation};

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const SCRIPT_NAME: &str = "main.py";

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Overrides the configured timeout. Clamped to the configured value.
    pub timeout: Option<Duration>,
}

/// What a finished (or killed) interpreter produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub output_truncated: bool,
    pub duration_ms: f64,
    pub timeout_ms: u64,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Captured stdout on success, otherwise the matching error.
    pub fn into_result(self) -> Result<String> {
        if self.timed_out {
            return Err(SandboxError::Timeout {
                timeout_ms: self.timeout_ms,
                partial_stdout: self.stdout,
            });
        }
        if self.exit_code != Some(0) {
            return Err(SandboxError::Failed {
                exit_code: self.exit_code,
                stderr: self.stderr.trim_end().to_string(),
            });
        }
        Ok(self.stdout)
    }
}

/// Releases an execution slot on drop.
struct SlotGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Runs validated code under the configured limits. Shareable across
/// threads; executions beyond `max_concurrent` fail fast with
/// [`SandboxError::AtCapacity`].
#[derive(Debug)]
pub struct Executor {
    config: SandboxConfig,
    in_flight: AtomicUsize,
    stats: StatsRecorder,
}

impl Executor {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            in_flight: AtomicUsize::new(0),
            stats: StatsRecorder::default(),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn validate(&self, code: &str) -> Validation {
        validate_code(code, &self.config)
    }

    /// Run with default limits and return stdout, or the error describing
    /// why there is none.
    pub fn execute(&self, code: &str) -> Result<String> {
        self.execute_with_limits(code, &ExecuteOptions::default())?
            .into_result()
    }

    /// Validate, take a slot and run. Timeouts and non-zero exits come
    /// back as an `Ok` outcome; only rejection, capacity and spawn/I/O
    /// problems are errors.
    pub fn execute_with_limits(&self, code: &str, opts: &ExecuteOptions) -> Result<ExecutionOutcome> {
        let validation = self.validate(code);
        if !validation.valid {
            self.stats.record(Outcome::Rejected, None);
            let reason = validation.reason.unwrap_or_else(|| "invalid code".to_string());
            log::debug!("sandbox rejected code: {}", reason);
            return Err(SandboxError::Rejected(reason));
        }

        let _slot = match self.try_acquire() {
            Some(slot) => slot,
            None => {
                self.stats.record(Outcome::AtCapacity, None);
                log::warn!("sandbox at capacity ({} in flight)", self.config.max_concurrent);
                return Err(SandboxError::AtCapacity { limit: self.config.max_concurrent });
            }
        };

        let timeout = opts
            .timeout
            .map_or(self.config.timeout, |t| t.min(self.config.timeout));

        match self.run(code, timeout) {
            Ok(outcome) => {
                let kind = if outcome.timed_out {
                    Outcome::TimedOut
                } else if outcome.succeeded() {
                    Outcome::Succeeded
                } else {
                    Outcome::Failed
                };
                self.stats
                    .record(kind, Some(Duration::from_secs_f64(outcome.duration_ms / 1000.0)));
                Ok(outcome)
            }
            Err(err) => {
                self.stats.record(Outcome::Failed, None);
                Err(err)
            }
        }
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats.snapshot(self.in_flight())
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn try_acquire(&self) -> Option<SlotGuard<'_>> {
        let limit = self.config.max_concurrent;
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= limit {
                return None;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(SlotGuard { counter: &self.in_flight }),
                Err(actual) => current = actual,
            }
        }
    }

    fn run(&self, code: &str, timeout: Duration) -> Result<ExecutionOutcome> {
        let (program, args) = self.config.interpreter.split_first().ok_or_else(|| SandboxError::Spawn {
            program: String::new(),
            message: "no interpreter configured".to_string(),
        })?;

        // Removed (with its contents) when this function returns
        let dir = tempfile::Builder::new().prefix("abacus-sandbox-").tempdir()?;
        let script = dir.path().join(SCRIPT_NAME);
        std::fs::write(&script, code)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&script)
            .current_dir(dir.path())
            .env_clear()
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| SandboxError::Spawn {
            program: program.clone(),
            message: e.to_string(),
        })?;
        log::debug!("sandbox spawned pid {} (timeout {:?})", child.id(), timeout);

        let cap = self.config.max_output_bytes;
        let stdout = child.stdout.take().map(|s| thread::spawn(move || read_bounded(s, cap)));
        let stderr = child.stderr.take().map(|s| thread::spawn(move || read_bounded(s, cap)));

        let deadline = start + timeout;
        let mut timed_out = false;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if Instant::now() >= deadline => {
                    timed_out = true;
                    let _ = child.kill();
                    break child.wait().ok();
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(err.into());
                }
            }
        };
        let duration = start.elapsed();

        let (stdout, out_truncated) = stdout
            .map(|h| h.join().unwrap_or_default())
            .unwrap_or_default();
        let (stderr, err_truncated) = stderr
            .map(|h| h.join().unwrap_or_default())
            .unwrap_or_default();

        if timed_out {
            log::warn!("sandbox execution killed after {} ms", timeout.as_millis());
        }

        Ok(ExecutionOutcome {
            stdout,
            stderr,
            exit_code: status.and_then(|s| s.code()),
            timed_out,
            output_truncated: out_truncated || err_truncated,
            duration_ms: duration.as_secs_f64() * 1000.0,
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}

/// Read up to `max_bytes`, then drain the rest so the child never blocks
/// on a full pipe. The flag reports whether anything was dropped.
fn read_bounded<R: Read>(reader: R, max_bytes: usize) -> (String, bool) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    // One byte past the cap tells us whether there was more
    let _ = (&mut reader)
        .take((max_bytes as u64).saturating_add(1))
        .read_to_end(&mut buf);
    let truncated = buf.len() > max_bytes;
    buf.truncate(max_bytes);

    let _ = io::copy(&mut reader, &mut io::sink());
    (String::from_utf8_lossy(&buf).into_owned(), truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn executor(max_concurrent: usize) -> Executor {
        Executor::new(SandboxConfig { max_concurrent, ..SandboxConfig::default() })
    }

    #[test]
    fn test_read_bounded_flags_truncation() {
        let (out, truncated) = read_bounded(Cursor::new(b"hello world".to_vec()), 5);
        assert_eq!(out, "hello");
        assert!(truncated);

        let (out, truncated) = read_bounded(Cursor::new(b"hi".to_vec()), 5);
        assert_eq!(out, "hi");
        assert!(!truncated);

        let (out, truncated) = read_bounded(Cursor::new(b"hello".to_vec()), 5);
        assert_eq!(out, "hello");
        assert!(!truncated);
    }

    #[test]
    fn test_slots_never_exceed_limit() {
        let exec = executor(2);
        let a = exec.try_acquire();
        let b = exec.try_acquire();
        assert!(a.is_some() && b.is_some());
        assert!(exec.try_acquire().is_none());
        assert_eq!(exec.in_flight(), 2);

        drop(a);
        assert_eq!(exec.in_flight(), 1);
        assert!(exec.try_acquire().is_some());
        drop(b);
        assert_eq!(exec.in_flight(), 0);
    }

    #[test]
    fn test_zero_capacity_fails_fast() {
        let exec = executor(0);
        let err = exec.execute("print(1)").unwrap_err();
        assert_eq!(err, SandboxError::AtCapacity { limit: 0 });
        assert!(err.is_retryable());
        assert_eq!(exec.stats().at_capacity, 1);
    }

    #[test]
    fn test_rejected_code_is_not_run() {
        let exec = executor(4);
        let err = exec.execute("import os\nos.system('true')").unwrap_err();
        assert!(matches!(err, SandboxError::Rejected(_)));
        let stats = exec.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.total, 1);
        assert_eq!(stats.mean_latency_ms, 0.0);
    }

    #[test]
    fn test_missing_interpreter_is_spawn_error() {
        let exec = Executor::new(SandboxConfig {
            interpreter: vec!["abacus-no-such-interpreter".into()],
            ..SandboxConfig::default()
        });
        let err = exec.execute("print(1)").unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));
        assert_eq!(exec.in_flight(), 0);

        let empty = Executor::new(SandboxConfig { interpreter: Vec::new(), ..SandboxConfig::default() });
        assert!(matches!(empty.execute("print(1)"), Err(SandboxError::Spawn { .. })));
    }

    #[test]
    fn test_outcome_into_result() {
        let base = ExecutionOutcome {
            stdout: "42\n".into(),
            stderr: String::new(),
            exit_code: Some(0),
            timed_out: false,
            output_truncated: false,
            duration_ms: 3.0,
            timeout_ms: 1000,
        };
        assert_eq!(base.clone().into_result().unwrap(), "42\n");

        let failed = ExecutionOutcome { exit_code: Some(1), stderr: "boom\n".into(), ..base.clone() };
        assert_eq!(
            failed.into_result().unwrap_err(),
            SandboxError::Failed { exit_code: Some(1), stderr: "boom".into() }
        );

        let killed = ExecutionOutcome { exit_code: None, timed_out: true, ..base };
        assert_eq!(
            killed.into_result().unwrap_err(),
            SandboxError::Timeout { timeout_ms: 1000, partial_stdout: "42\n".into() }
        );
    }
}
