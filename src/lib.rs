//! # stanza
//!
//! **stanza** is the web-serving kernel of a small poem-sharing service: a
//! first-match router, a request/response pair that always replies with one
//! envelope shape, and server-side sessions correlated through a cookie. It
//! runs on the `may` coroutine runtime.
//!
//! ## Overview
//!
//! Business controllers (poems, comments, likes, users) live outside this
//! crate. They register route tables at startup and then only ever see a
//! [`Request`], a [`Response`] and the request's [`Session`].
//!
//! ## Architecture
//!
//! - **[`cookie`]** - outbound `Set-Cookie` records and the inbound `Cookie` parser
//! - **[`session`]** - the session store and per-client key/value bags
//! - **[`router`]** - ordered route table, `:param` patterns, dispatch with panic recovery
//! - **[`handler`]** - the `Handler` and `Controller` traits
//! - **[`server`]** - `Request`, `Response`, the reply envelope, the HTTP/1.1 server
//! - **[`templates`]** - optional HTML rendering for browser clients
//! - **[`config`]**, **[`logging`]**, **[`cli`]** - the binary's ambient stack
//!
//! ### Request Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Server as HttpServer<br/>(may coroutine)
//!     participant Service as AppService
//!     participant Store as SessionStore
//!     participant Router
//!     participant Handler
//!
//!     Client->>Server: HTTP/1.1 request
//!     Server->>Service: RawRequest
//!     Service->>Store: resolve(session_id cookie)
//!     Store-->>Service: Session (existing or fresh)
//!     Service->>Router: dispatch(Request, Response)
//!     Router->>Router: first matching (method, pattern)
//!     Router->>Handler: handle(&Request, &mut Response)
//!     Handler->>Handler: res.send(Envelope) -> Sealed
//!     Handler-->>Router: Ok(Sealed)
//!     Router-->>Service: Response (sent)
//!     Service-->>Server: HttpReply
//!     Server-->>Client: status, Set-Cookie, JSON or HTML
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use stanza::{AppService, Envelope, RawRequest, Request, Response, Router, SessionStore};
//! use serde_json::json;
//!
//! let mut router = Router::new();
//! router.post("/login", |req: &Request, res: &mut Response| {
//!     let Some(email) = req.body_str("email") else {
//!         return Ok(res.send(
//!             Envelope::bad_request("no email").with_redirect("/login?error=Email is required"),
//!         )?);
//!     };
//!     req.session().set("isLoggedIn", true)?;
//!     Ok(res.send(Envelope::ok("Logged in successfully!").with_payload(json!({ "email": email })))?)
//! });
//!
//! let service = AppService::new(router, SessionStore::new());
//! let reply = service.handle(
//!     RawRequest::new("POST", "/login")
//!         .with_header("content-type", "application/json")
//!         .with_body(r#"{"email":"poet@example.com"}"#),
//! );
//! assert_eq!(reply.status, 200);
//! assert!(reply.header("set-cookie").unwrap().starts_with("session_id="));
//! ```
//!
//! ## Running the binary
//!
//! ```bash
//! stanza serve --config config/config.yaml
//! STANZA_LOG_FORMAT=pretty stanza serve --addr 127.0.0.1:3000
//! stanza routes
//! ```

pub mod cli;
pub mod config;
pub mod cookie;
pub mod handler;
pub mod ids;
pub mod logging;
pub mod router;
pub mod server;
pub mod session;
pub mod templates;

pub use cookie::Cookie;
pub use handler::{Controller, Handler, HandlerError, HandlerResult};
pub use ids::{RequestId, SessionId};
pub use router::{RouteError, Router, ShadowedRoute};
pub use server::{
    AppService, Envelope, HttpReply, HttpServer, ParamError, RawRequest, Request, Response,
    ResponseError, Sealed, StatusCode,
};
pub use session::{Session, SessionError, SessionStore};
