use crate::ids::SessionId;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime};
use tracing::debug;

/// Session key set by the login flow once credentials are accepted.
pub const KEY_IS_LOGGED_IN: &str = "isLoggedIn";
/// Session key holding the authenticated user's numeric id.
pub const KEY_USER_ID: &str = "userId";
/// Session key flagging an administrator.
pub const KEY_IS_ADMIN: &str = "isAdmin";

pub(crate) type SessionMap = DashMap<SessionId, Session>;

/// Errors raised by session mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session has been destroyed")]
    Destroyed,
}

struct SessionState {
    values: HashMap<String, Value>,
    destroyed: bool,
}

struct SessionInner {
    id: SessionId,
    created_at: SystemTime,
    last_seen: Mutex<Instant>,
    state: RwLock<SessionState>,
    store: Weak<SessionMap>,
}

/// Server-side key/value bag correlated with a client by its `session_id` cookie.
///
/// `Session` is a cheap handle; clones share the same bag. Every key is written
/// independently: setting `isLoggedIn` and then `userId` is two writes, and a
/// concurrent reader of the same session can observe the first without the
/// second. Concurrent writers to one key are last-write-wins.
///
/// After [`Session::destroy`] the handle reads as empty and rejects writes with
/// [`SessionError::Destroyed`]; the id is gone from the store, so replaying the
/// cookie yields a new session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(id: SessionId, store: Weak<SessionMap>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                created_at: SystemTime::now(),
                last_seen: Mutex::new(Instant::now()),
                state: RwLock::new(SessionState {
                    values: HashMap::new(),
                    destroyed: false,
                }),
                store,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.inner.created_at
    }

    /// True when both handles refer to the same underlying session.
    #[must_use]
    pub fn same_as(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read a value; `None` when the key was never set or the session is destroyed.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let state = self.inner.state.read();
        if state.destroyed {
            return None;
        }
        state.values.get(key).cloned()
    }

    /// Store a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<Option<Value>, SessionError> {
        let mut state = self.inner.state.write();
        if state.destroyed {
            return Err(SessionError::Destroyed);
        }
        Ok(state.values.insert(key.into(), value.into()))
    }

    pub fn remove(&self, key: &str) -> Result<Option<Value>, SessionError> {
        let mut state = self.inner.state.write();
        if state.destroyed {
            return Err(SessionError::Destroyed);
        }
        Ok(state.values.remove(key))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let state = self.inner.state.read();
        if state.destroyed {
            0
        } else {
            state.values.len()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `isLoggedIn` as a boolean; absent or non-boolean reads as `false`.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.get(KEY_IS_LOGGED_IN)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    #[must_use]
    pub fn user_id(&self) -> Option<i64> {
        self.get(KEY_USER_ID).and_then(|v| v.as_i64())
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.get(KEY_IS_ADMIN)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Invalidate this session and remove it from its store.
    ///
    /// Idempotent.
    pub fn destroy(&self) {
        let was_live = self.invalidate();
        if let Some(map) = self.inner.store.upgrade() {
            map.remove(&self.inner.id);
        }
        if was_live {
            debug!(session = ?self.inner.id, "Session destroyed");
        }
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.read().destroyed
    }

    /// Mark destroyed and drop the bag without touching the store map.
    /// Returns whether the session was live before the call.
    pub(crate) fn invalidate(&self) -> bool {
        let mut state = self.inner.state.write();
        let was_live = !state.destroyed;
        state.destroyed = true;
        state.values.clear();
        was_live
    }

    pub(crate) fn touch(&self) {
        *self.inner.last_seen.lock() = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.inner.last_seen.lock().elapsed()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("keys", &self.len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
