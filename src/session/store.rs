use super::core::{Session, SessionMap};
use crate::ids::SessionId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Process-wide registry of live sessions.
///
/// Construct one at startup and hand clones to whatever serves requests; clones
/// share the same map. Tests build their own stores instead of sharing globals.
///
/// The map is sharded and internally locked, so concurrent requests for
/// different sessions never contend on a single lock and cannot corrupt it.
///
/// [`resolve`](Self::resolve) checks expiry and refreshes the idle clock under
/// the shard lock that [`purge_idle`](Self::purge_idle) also takes, so a
/// session handed to a request is never swept out from under it.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<SessionMap>,
    idle_timeout: Option<Duration>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions unseen for longer than `timeout` are treated as unknown.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Allocate and register a fresh session.
    #[must_use]
    pub fn create(&self) -> Session {
        let session = Session::new(SessionId::generate(), Arc::downgrade(&self.sessions));
        self.sessions.insert(session.id().clone(), session.clone());
        debug!(session = ?session.id(), live_sessions = self.sessions.len(), "Session created");
        session
    }

    /// Look up a live, non-expired session without refreshing its idle clock.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.lookup(id, false)
    }

    fn lookup(&self, id: &SessionId, touch: bool) -> Option<Session> {
        let found = {
            let entry = self.sessions.get(id)?;
            let session = entry.value();
            if self.is_expired(session) {
                Err(session.clone())
            } else {
                if touch {
                    session.touch();
                }
                Ok(session.clone())
            }
        };
        // destroy() takes the shard write lock, so the read guard must be gone
        match found {
            Ok(session) => Some(session),
            Err(expired) => {
                expired.destroy();
                debug!(session = ?id, "Session expired on lookup");
                None
            }
        }
    }

    /// Resolve the session named by an inbound `session_id` cookie value.
    ///
    /// Returns the session and whether it was freshly allocated. A missing,
    /// malformed, unknown, destroyed or expired id silently yields a new
    /// anonymous session; it is never an error.
    #[must_use]
    pub fn resolve(&self, cookie_value: Option<&str>) -> (Session, bool) {
        let existing = cookie_value
            .and_then(|raw| raw.parse::<SessionId>().ok())
            .and_then(|id| self.lookup(&id, true));
        match existing {
            Some(session) => (session, false),
            None => (self.create(), true),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session idle past the configured timeout; returns how many.
    pub fn purge_idle(&self) -> usize {
        let Some(timeout) = self.idle_timeout else {
            return 0;
        };
        let mut purged = 0usize;
        self.sessions.retain(|_, session| {
            if session.idle_for() > timeout {
                session.invalidate();
                purged += 1;
                false
            } else {
                true
            }
        });
        if purged > 0 {
            info!(purged, live_sessions = self.sessions.len(), "Purged idle sessions");
        }
        purged
    }

    fn is_expired(&self, session: &Session) -> bool {
        self.idle_timeout
            .is_some_and(|timeout| session.idle_for() > timeout)
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("live_sessions", &self.sessions.len())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}
