use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Latencies kept for the rolling mean.
const LATENCY_WINDOW: usize = 100;

/// Snapshot of executor counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    /// Every request, including ones rejected before spawning.
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub at_capacity: u64,
    pub in_flight: usize,
    /// Mean over the last executions that actually ran.
    pub mean_latency_ms: f64,
}

/// How a single request ended, for accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Succeeded,
    Failed,
    Rejected,
    TimedOut,
    AtCapacity,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    succeeded: u64,
    failed: u64,
    rejected: u64,
    timed_out: u64,
    at_capacity: u64,
    latencies: VecDeque<f64>,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    inner: Mutex<Counters>,
}

impl StatsRecorder {
    pub fn record(&self, outcome: Outcome, latency: Option<Duration>) {
        let mut c = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        c.total += 1;
        match outcome {
            Outcome::Succeeded => c.succeeded += 1,
            Outcome::Failed => c.failed += 1,
            Outcome::Rejected => c.rejected += 1,
            Outcome::TimedOut => c.timed_out += 1,
            Outcome::AtCapacity => c.at_capacity += 1,
        }
        if let Some(latency) = latency {
            if c.latencies.len() == LATENCY_WINDOW {
                c.latencies.pop_front();
            }
            c.latencies.push_back(latency.as_secs_f64() * 1000.0);
        }
    }

    pub fn snapshot(&self, in_flight: usize) -> ExecutionStats {
        let c = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mean_latency_ms = if c.latencies.is_empty() {
            0.0
        } else {
            c.latencies.iter().sum::<f64>() / c.latencies.len() as f64
        };
        ExecutionStats {
            total: c.total,
            succeeded: c.succeeded,
            failed: c.failed,
            rejected: c.rejected,
            timed_out: c.timed_out,
            at_capacity: c.at_capacity,
            in_flight,
            mean_latency_ms,
        }
    }
}
