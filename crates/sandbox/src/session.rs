//! Named sandbox sessions with their own lifetimes.
//!
//! Sessions are bookkeeping only: every execution still gets a fresh
//! process. Idle sessions are reaped by [`SessionManager::sweep_idle`],
//! either on demand or from a background sweeper thread that runs on its
//! own interval regardless of executions in flight.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Result, SandboxError};
use crate::executor::Executor;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub execution_count: u64,
}

type Sessions = Arc<Mutex<FxHashMap<String, SandboxSession>>>;

struct Sweeper {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        // Dropping the sender wakes the thread with Disconnected
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub struct SessionManager {
    executor: Arc<Executor>,
    sessions: Sessions,
    clock: Arc<dyn Clock>,
    idle_ttl: Duration,
    sweeper: Option<Sweeper>,
}

impl SessionManager {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self::with_clock(executor, Arc::new(SystemClock))
    }

    pub fn with_clock(executor: Arc<Executor>, clock: Arc<dyn Clock>) -> Self {
        let idle_ttl = executor.config().session_idle_ttl;
        Self {
            executor,
            sessions: Arc::new(Mutex::new(FxHashMap::default())),
            clock,
            idle_ttl,
            sweeper: None,
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn create_session(&self) -> SandboxSession {
        let now = self.clock.now();
        let session = SandboxSession {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            last_used_at: now,
            execution_count: 0,
        };
        self.lock().insert(session.id.clone(), session.clone());
        log::debug!("sandbox session {} created", session.id);
        session
    }

    pub fn get(&self, id: &str) -> Option<SandboxSession> {
        self.lock().get(id).cloned()
    }

    /// Run `code` on behalf of a session. The session is touched before
    /// the run starts; the lock is not held while the interpreter runs.
    pub fn execute(&self, id: &str, code: &str) -> Result<String> {
        {
            let mut sessions = self.lock();
            let session = sessions
                .get_mut(id)
                .ok_or_else(|| SandboxError::SessionNotFound(id.to_string()))?;
            session.last_used_at = self.clock.now();
            session.execution_count += 1;
        }

        let result = self.executor.execute(code);

        // The sweeper may have reaped it meanwhile
        if let Some(session) = self.lock().get_mut(id) {
            session.last_used_at = self.clock.now();
        }
        result
    }

    pub fn close(&self, id: &str) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            log::debug!("sandbox session {} closed", id);
        }
        removed
    }

    /// Remove sessions idle for at least the configured TTL. Returns the
    /// removed ids, sorted.
    pub fn sweep_idle(&self) -> Vec<String> {
        sweep(&self.sessions, self.clock.now(), self.idle_ttl)
    }

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    /// Start the background sweeper. No-op if it is already running.
    pub fn start_sweeper(&mut self) {
        if self.sweeper.is_some() {
            return;
        }
        let interval = self.executor.config().sweep_interval;
        let sessions = Arc::clone(&self.sessions);
        let clock = Arc::clone(&self.clock);
        let ttl = self.idle_ttl;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    sweep(&sessions, clock.now(), ttl);
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        self.sweeper = Some(Sweeper { stop_tx: Some(stop_tx), handle: Some(handle) });
    }

    pub fn stop_sweeper(&mut self) {
        self.sweeper = None;
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashMap<String, SandboxSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn sweep(sessions: &Mutex<FxHashMap<String, SandboxSession>>, now: DateTime<Utc>, ttl: Duration) -> Vec<String> {
    let mut sessions = sessions.lock().unwrap_or_else(|e| e.into_inner());
    let mut expired: Vec<String> = sessions
        .values()
        .filter(|s| (now - s.last_used_at).to_std().map_or(false, |idle| idle >= ttl))
        .map(|s| s.id.clone())
        .collect();
    expired.sort();
    for id in &expired {
        sessions.remove(id);
    }
    if !expired.is_empty() {
        log::info!("swept {} idle sandbox session(s)", expired.len());
    }
    expired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use std::time::Instant;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Utc::now())))
        }

        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now = *now + chrono::Duration::from_std(by).unwrap();
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn manager(clock: Arc<ManualClock>, config: SandboxConfig) -> SessionManager {
        SessionManager::with_clock(Arc::new(Executor::new(config)), clock)
    }

    #[test]
    fn test_create_get_close() {
        let mgr = manager(ManualClock::new(), SandboxConfig::default());
        let s = mgr.create_session();
        assert_eq!(s.execution_count, 0);
        assert_eq!(s.created_at, s.last_used_at);
        assert_eq!(mgr.get(&s.id), Some(s.clone()));
        assert_eq!(mgr.session_count(), 1);

        assert!(mgr.close(&s.id));
        assert!(!mgr.close(&s.id));
        assert_eq!(mgr.get(&s.id), None);
    }

    #[test]
    fn test_execute_unknown_session() {
        let mgr = manager(ManualClock::new(), SandboxConfig::default());
        assert_eq!(
            mgr.execute("nope", "print(1)"),
            Err(SandboxError::SessionNotFound("nope".into()))
        );
    }

    #[test]
    fn test_execute_touches_session() {
        let clock = ManualClock::new();
        let mgr = manager(clock.clone(), SandboxConfig::default());
        let s = mgr.create_session();

        clock.advance(Duration::from_secs(30));
        // Rejected statically, but still counts as use of the session
        assert!(matches!(mgr.execute(&s.id, "import os"), Err(SandboxError::Rejected(_))));

        let after = mgr.get(&s.id).unwrap();
        assert_eq!(after.execution_count, 1);
        assert_eq!(after.last_used_at - s.last_used_at, chrono::Duration::seconds(30));
    }

    #[test]
    fn test_sweep_idle_uses_last_use() {
        let clock = ManualClock::new();
        let config = SandboxConfig { session_idle_ttl: Duration::from_secs(60), ..SandboxConfig::default() };
        let mgr = manager(clock.clone(), config);
        let old = mgr.create_session();
        clock.advance(Duration::from_secs(45));
        let fresh = mgr.create_session();

        clock.advance(Duration::from_secs(20));
        assert_eq!(mgr.sweep_idle(), vec![old.id.clone()]);
        assert!(mgr.get(&fresh.id).is_some());

        clock.advance(Duration::from_secs(60));
        assert_eq!(mgr.sweep_idle(), vec![fresh.id]);
        assert_eq!(mgr.session_count(), 0);
    }

    #[test]
    fn test_background_sweeper() {
        let clock = ManualClock::new();
        let config = SandboxConfig {
            session_idle_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_millis(10),
            ..SandboxConfig::default()
        };
        let mut mgr = manager(clock.clone(), config);
        mgr.create_session();
        mgr.create_session();
        mgr.start_sweeper();
        mgr.start_sweeper();
        assert!(mgr.sweeper_running());

        clock.advance(Duration::from_secs(61));
        let deadline = Instant::now() + Duration::from_secs(5);
        while mgr.session_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(mgr.session_count(), 0);

        mgr.stop_sweeper();
        assert!(!mgr.sweeper_running());
    }
}
