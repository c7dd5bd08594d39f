//! # Router Module
//!
//! Maps `(method, path)` to a handler with first-match semantics.
//!
//! ## Overview
//!
//! - Routes are kept per method, in registration order.
//! - A pattern is a `/`-delimited list of literal segments and `:name`
//!   parameters. Empty segments are ignored on both sides, so `poems/:id` and
//!   `/poems/:id/` are the same pattern and match the same paths.
//! - Matching requires an equal segment count; literals compare exactly and
//!   parameters bind the raw segment. Repeated names (`/poems/:id/comments/:id`)
//!   are all kept, left to right.
//! - The first registered route that accepts a path wins. When a new route can
//!   never win for some path because an earlier one already accepts it, the
//!   router logs a warning at registration and records it in
//!   [`Router::shadowed_routes`].
//!
//! ## Example
//!
//! ```rust
//! use http::Method;
//! use stanza::{Envelope, Request, Response, Router};
//!
//! let mut router = Router::new();
//! router
//!     .get("/poems/new", |_req: &Request, res: &mut Response| {
//!         Ok(res.send(Envelope::ok("New poem form"))?)
//!     })
//!     .get("/poems/:id", |req: &Request, res: &mut Response| {
//!         let Ok(id) = req.id() else {
//!             return Ok(res.send(Envelope::bad_request("Invalid ID"))?);
//!         };
//!         Ok(res.send(Envelope::ok(format!("Poem {id}")))?)
//!     });
//!
//! let matched = router.route(&Method::GET, "/poems/42").unwrap();
//! assert_eq!(matched.route.pattern.to_string(), "/poems/:id");
//! assert!(router.shadowed_routes().is_empty());
//! ```

mod core;
mod pattern;

pub use self::core::{
    ParamVec, Route, RouteError, RouteMatch, Router, ShadowedRoute, MAX_INLINE_PARAMS,
};
pub use pattern::{RoutePattern, Segment};
