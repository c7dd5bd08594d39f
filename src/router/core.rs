use super::pattern::RoutePattern;
use crate::handler::{Controller, Handler, HandlerError, HandlerResult};
use crate::server::{Envelope, Request, Response};
use http::Method;
use smallvec::SmallVec;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Maximum number of path parameters before heap allocation.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Message sent when a handler bubbles up a [`ParamError`](crate::server::ParamError).
pub const INVALID_ID: &str = "Invalid ID";

/// Bound path parameters in pattern order.
///
/// Names are `Arc<str>` shared with the route table; values are the raw path
/// segments of one request.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// One registered route.
#[derive(Clone)]
pub struct Route {
    pub method: Method,
    pub pattern: RoutePattern,
    pub handler: Arc<dyn Handler>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.to_string())
            .finish()
    }
}

/// A successful lookup: the selected route plus its bound parameters.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub path_params: ParamVec,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("Invalid route: {method} {path}")]
    NotFound { method: Method, path: String },
}

/// A registration that can never be selected for some paths because an
/// earlier route of the same method accepts them first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowedRoute {
    pub method: Method,
    /// The earlier, winning pattern.
    pub shadowing: String,
    /// The later pattern that loses.
    pub shadowed: String,
}

/// Ordered route table with first-match selection.
///
/// Routes are kept per method in registration order; lookup walks that order
/// and returns the first pattern that accepts the path. Registering
/// `/poems/:id` before `/poems/new` therefore sends `/poems/new` to the first
/// handler with `id = "new"`. Such orderings are detected when the second
/// route is registered, logged as a warning and listed by
/// [`Router::shadowed_routes`].
#[derive(Default, Clone)]
pub struct Router {
    routes: Vec<(Method, Vec<Route>)>,
    shadowed: Vec<ShadowedRoute>,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<F>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_route(Method::GET, pattern, handler)
    }

    pub fn post<F>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_route(Method::POST, pattern, handler)
    }

    pub fn put<F>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_route(Method::PUT, pattern, handler)
    }

    pub fn delete<F>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_route(Method::DELETE, pattern, handler)
    }

    /// Append a route. No de-duplication or re-ordering takes place.
    pub fn register_route<F>(&mut self, method: Method, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_handler(method, pattern, Arc::new(handler))
    }

    /// Append a route whose handler is already a trait object.
    pub fn register_handler(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Arc<dyn Handler>,
    ) -> &mut Self {
        let pattern = RoutePattern::parse(pattern);
        let index = match self.routes.iter().position(|(m, _)| *m == method) {
            Some(index) => index,
            None => {
                self.routes.push((method.clone(), Vec::new()));
                self.routes.len() - 1
            }
        };
        let table = &mut self.routes[index].1;

        if let Some(earlier) = table.iter().find(|r| r.pattern.covers(&pattern)) {
            warn!(
                method = %method,
                shadowing = %earlier.pattern,
                shadowed = %pattern,
                "Route shadowed by an earlier pattern"
            );
            self.shadowed.push(ShadowedRoute {
                method: method.clone(),
                shadowing: earlier.pattern.to_string(),
                shadowed: pattern.to_string(),
            });
        }

        debug!(
            method = %method,
            pattern = %pattern,
            params = pattern.param_count(),
            position = table.len(),
            "Route registered"
        );
        table.push(Route {
            method,
            pattern,
            handler,
        });
        self
    }

    /// Let a controller register its routes.
    pub fn mount<C: Controller>(&mut self, controller: Arc<C>) -> &mut Self {
        let before = self.len();
        controller.register_routes(self);
        info!(
            controller = std::any::type_name::<C>(),
            routes_added = self.len() - before,
            "Controller mounted"
        );
        self
    }

    /// First registered route of `method` accepting `path`.
    pub fn route(&self, method: &Method, path: &str) -> Result<RouteMatch<'_>, RouteError> {
        let not_found = || RouteError::NotFound {
            method: method.clone(),
            path: path.to_string(),
        };
        let (_, table) = self
            .routes
            .iter()
            .find(|(m, _)| m == method)
            .ok_or_else(not_found)?;
        table
            .iter()
            .find_map(|route| {
                route.pattern.matches(path).map(|path_params| RouteMatch {
                    route,
                    path_params,
                })
            })
            .ok_or_else(not_found)
    }

    /// Route `req` and run the selected handler.
    ///
    /// Whatever happens, `res` ends up sent: unmatched requests get a 404
    /// envelope, and a handler that errors, panics or returns without sending
    /// its own response gets a generic 500.
    pub fn dispatch(&self, req: &mut Request, res: &mut Response) {
        let start = Instant::now();
        let request_id = req.request_id();

        let (handler, pattern, path_params) = match self.route(req.method(), req.path()) {
            Ok(m) => (Arc::clone(&m.route.handler), m.route.pattern.to_string(), m.path_params),
            Err(err) => {
                info!(
                    request_id = %request_id,
                    method = %req.method(),
                    path = %req.path(),
                    "No route matched"
                );
                send_fail_safe(res, Envelope::not_found(err.to_string()));
                return;
            }
        };

        info!(
            request_id = %request_id,
            method = %req.method(),
            path = %req.path(),
            route_pattern = %pattern,
            path_params = ?path_params,
            "Route matched"
        );
        req.set_path_params(path_params);

        let request: &Request = req;
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(request, res)));
        let execution_time_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(sealed)) if sealed.request_id() == request_id && res.is_sent() => {
                debug!(
                    request_id = %request_id,
                    route_pattern = %pattern,
                    execution_time_ms,
                    "Handler execution complete"
                );
            }
            Ok(Ok(sealed)) => {
                error!(
                    request_id = %request_id,
                    route_pattern = %pattern,
                    sealed_for = %sealed.request_id(),
                    "Handler returned a seal from another response"
                );
                send_fail_safe(res, Envelope::internal_error());
            }
            Ok(Err(HandlerError::Param(err))) => {
                warn!(
                    request_id = %request_id,
                    route_pattern = %pattern,
                    error = %err,
                    "Path parameter rejected"
                );
                send_fail_safe(res, Envelope::bad_request(INVALID_ID));
            }
            Ok(Err(err)) => {
                log_handler_error(request_id, &pattern, &err);
                send_fail_safe(res, Envelope::internal_error());
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    request_id = %request_id,
                    route_pattern = %pattern,
                    panic_message = %message,
                    execution_time_ms,
                    "Handler panicked"
                );
                send_fail_safe(res, Envelope::internal_error());
            }
        }
    }

    /// Every registration found to be shadowed by an earlier one.
    #[must_use]
    pub fn shadowed_routes(&self) -> &[ShadowedRoute] {
        &self.shadowed
    }

    /// All routes in method-then-registration order.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter().flat_map(|(_, table)| table.iter())
    }

    /// Log the routing table, one line per route.
    pub fn dump_routes(&self) {
        for (position, route) in self.routes().enumerate() {
            info!(
                position,
                method = %route.method,
                pattern = %route.pattern,
                "Registered route"
            );
        }
        for s in &self.shadowed {
            warn!(
                method = %s.method,
                shadowing = %s.shadowing,
                shadowed = %s.shadowed,
                "Shadowed route"
            );
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.iter().map(|(_, table)| table.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.len())
            .field("shadowed", &self.shadowed.len())
            .finish()
    }
}

/// Send `envelope` unless the handler already replied.
fn send_fail_safe(res: &mut Response, envelope: Envelope) {
    if res.is_sent() {
        return;
    }
    if let Err(err) = res.send(envelope) {
        error!(request_id = %res.request_id(), error = %err, "Fail-safe reply rejected");
    }
}

fn log_handler_error(request_id: crate::ids::RequestId, pattern: &str, err: &HandlerError) {
    error!(
        request_id = %request_id,
        route_pattern = %pattern,
        error = %err,
        error_debug = ?err,
        "Handler failed"
    );
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
