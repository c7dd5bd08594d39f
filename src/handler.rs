//! # Handler Module
//!
//! The seams external controllers plug into.
//!
//! A [`Handler`] turns one [`Request`] into exactly one sent [`Response`]. The
//! only way to produce the [`Sealed`] value a handler must return is
//! [`Response::send`], so the type system rules out handlers that finish
//! without replying. Closures with the right shape are handlers already:
//!
//! ```rust
//! use stanza::{Envelope, Request, Response, Router};
//!
//! let mut router = Router::new();
//! router.get("/", |_req: &Request, res: &mut Response| {
//!     Ok(res.send(Envelope::ok("Homepage!"))?)
//! });
//! ```
//!
//! A [`Controller`] groups related handlers and registers them in one place.

use crate::router::Router;
use crate::server::{ParamError, Request, Response, ResponseError, Sealed};
use crate::session::SessionError;
use std::sync::Arc;

/// Failure a handler can bubble up instead of replying.
///
/// The router answers [`HandlerError::Param`] with a 400 `Invalid ID`
/// envelope, so `req.id()?` is enough to validate a numeric id. Every other
/// `Err` gets a generic 500 envelope and its cause is logged. Other client
/// mistakes (missing fields, conflicts) should be answered with a 4xx
/// envelope by the handler itself.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type HandlerResult = Result<Sealed, HandlerError>;

/// Anything that can answer a routed request.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, req: &Request, res: &mut Response) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, req: &Request, res: &mut Response) -> HandlerResult {
        self(req, res)
    }
}

/// A group of handlers sharing state (a model, a repository) that registers
/// its own routes.
///
/// Controllers are registered once at startup through [`Router::mount`].
/// Taking `self: Arc<Self>` lets each registered closure hold its own clone.
pub trait Controller: Send + Sync + 'static {
    fn register_routes(self: Arc<Self>, router: &mut Router);
}
