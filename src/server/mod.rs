//! # Server Module
//!
//! Everything between a socket and a handler.
//!
//! - [`wire`] reads HTTP/1.1 requests with `httparse` and writes replies.
//! - [`HttpServer`] accepts connections, one `may` coroutine each.
//! - [`AppService`] turns a [`RawRequest`] into a [`Request`] and a [`Response`],
//!   runs the router and returns the [`HttpReply`].
//! - [`Request`], [`Response`] and [`Envelope`] are what handlers see.

mod envelope;
mod http_server;
mod request;
mod response;
mod service;
pub mod wire;

pub use envelope::{Envelope, StatusCode, UnsupportedStatus};
pub use http_server::{HttpServer, HttpService, ServerHandle};
pub use request::{parse_body, ParamError, RawRequest, Request, RequestError, SearchParams};
pub use response::{HttpReply, Response, ResponseError, Sealed};
pub use service::{health_endpoint, register_health_route, spawn_session_sweeper, AppService};
pub use wire::{ConnectionLimits, WireError};
