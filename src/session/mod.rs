//! # Session Module
//!
//! Server-side sessions correlated with clients through the `session_id` cookie.
//!
//! ## Overview
//!
//! - [`SessionStore`] owns every live session. It is an explicit handle built at
//!   startup and injected into the service, never a hidden global.
//! - [`Session`] is the per-client key/value bag. Values are `serde_json::Value`,
//!   so the store is schema-free; the domain layer is contracted to use
//!   `isLoggedIn`, `userId` and `isAdmin`, which have typed helpers.
//!
//! ## Lifecycle
//!
//! 1. A request arrives without a recognised `session_id` cookie:
//!    [`SessionStore::resolve`] allocates a session and the response writes its
//!    id back as a cookie.
//! 2. Later requests carrying that cookie resolve to the same session.
//! 3. [`Session::destroy`] removes the session from the store. Replaying the old
//!    cookie is indistinguishable from sending none: a new anonymous session is
//!    issued.
//!
//! ```rust
//! use stanza::session::SessionStore;
//!
//! let store = SessionStore::new();
//! let (session, fresh) = store.resolve(None);
//! assert!(fresh);
//! session.set("isLoggedIn", true).unwrap();
//!
//! let (again, fresh) = store.resolve(Some(session.id().as_str()));
//! assert!(!fresh);
//! assert!(again.is_logged_in());
//! ```

mod core;
mod store;

pub use self::core::{Session, SessionError, KEY_IS_ADMIN, KEY_IS_LOGGED_IN, KEY_USER_ID};
pub use store::SessionStore;
