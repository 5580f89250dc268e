//! Owner of all live sessions.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::session::error::{Result, SessionError};
use crate::session::{ExitInfo, Session, SessionId, SessionMode, SessionSettings, SpawnSpec};

/// A reserved unit of session capacity, released on drop.
pub(crate) struct SessionSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Maps session ids to sessions.
///
/// Ids are never reused. Capacity counts sessions that have not finished
/// yet; finished sessions stay addressable until the grace period passes
/// and [`SessionRegistry::reap`] removes them.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicU64,
    active: Arc<AtomicUsize>,
    settings: SessionSettings,
}

impl SessionRegistry {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            active: Arc::new(AtomicUsize::new(0)),
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a new session and register it.
    ///
    /// Must be called from within a Tokio runtime. On spawn failure nothing
    /// is registered and the reserved capacity is released.
    pub fn create(&self, mode: SessionMode, spec: SpawnSpec) -> Result<SessionId> {
        let slot = self.reserve()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Session::start(id, mode, spec, &self.settings, slot)?;
        self.sessions.write().insert(id, session);
        Ok(id)
    }

    pub fn get(&self, id: SessionId) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotFound(id))
    }

    /// Kill a session; see [`Session::kill`].
    pub fn kill(&self, id: SessionId) -> Result<ExitInfo> {
        Ok(self.get(id)?.kill())
    }

    /// Remove sessions that finished at least one grace period ago.
    /// Returns how many were removed.
    pub fn reap(&self) -> usize {
        let now = Instant::now();
        let grace = self.settings.grace_period;

        let reaped: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write();
            let expired: Vec<SessionId> = sessions
                .iter()
                .filter(|(_, session)| {
                    session
                        .finished_at()
                        .is_some_and(|at| now.saturating_duration_since(at) >= grace)
                })
                .map(|(id, _)| *id)
                .collect();
            expired
                .iter()
                .filter_map(|id| sessions.remove(id))
                .collect()
        };

        for session in &reaped {
            debug!(session_id = session.id(), state = ?session.state(), "reaped session");
        }
        // Build directories are removed here, outside the lock.
        let count = reaped.len();
        drop(reaped);
        count
    }

    /// Sessions currently addressable, finished or not.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Sessions counted against capacity.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Kill every session. Returns how many were still running.
    pub fn shutdown(&self) -> usize {
        let sessions: Vec<Arc<Session>> = self.sessions.read().values().cloned().collect();
        let running = sessions
            .iter()
            .filter(|session| !session.state().is_terminal())
            .count();
        for session in &sessions {
            session.kill();
        }
        if running > 0 {
            info!(running, "killed running sessions");
        }
        running
    }

    /// Run [`SessionRegistry::reap`] every `interval` until `stop` resolves.
    pub fn spawn_reaper<F>(self: &Arc<Self>, interval: Duration, stop: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tokio::pin!(stop);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        let reaped = registry.reap();
                        if reaped > 0 {
                            debug!(reaped, remaining = registry.len(), "reaper pass");
                        }
                    }
                }
            }
            debug!("session reaper stopped");
        })
    }

    fn reserve(&self) -> Result<SessionSlot> {
        let max = self.settings.max_sessions;
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                (active < max).then_some(active + 1)
            })
            .map_err(|_| {
                warn!(max, "session capacity exhausted");
                SessionError::ResourceExhausted { max }
            })?;
        Ok(SessionSlot {
            active: Arc::clone(&self.active),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(max_sessions: usize) -> SessionRegistry {
        SessionRegistry::new(SessionSettings {
            max_sessions,
            ..SessionSettings::default()
        })
    }

    #[test]
    fn slots_are_bounded_and_released_on_drop() {
        let registry = registry(2);
        let first = registry.reserve().unwrap();
        let _second = registry.reserve().unwrap();
        assert_eq!(registry.active_count(), 2);
        assert!(matches!(
            registry.reserve(),
            Err(SessionError::ResourceExhausted { max: 2 })
        ));

        drop(first);
        assert_eq!(registry.active_count(), 1);
        assert!(registry.reserve().is_ok());
    }

    #[test]
    fn unknown_id_is_not_found() {
        let registry = registry(1);
        assert!(matches!(registry.get(42), Err(SessionError::NotFound(42))));
        assert!(matches!(registry.kill(7), Err(SessionError::NotFound(7))));
        assert_eq!(registry.reap(), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn failed_spawn_releases_capacity() {
        let registry = registry(1);
        let err = registry
            .create(
                SessionMode::Text,
                SpawnSpec::new("/nonexistent/runbox-test-binary"),
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::Spawn { .. }));
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.len(), 0);
    }
}
