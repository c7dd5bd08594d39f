use super::envelope::{Envelope, StatusCode};
use super::http_server::HttpService;
use super::request::{RawRequest, Request};
use super::response::{HttpReply, Response};
use crate::handler::HandlerResult;
use crate::router::Router;
use crate::session::SessionStore;
use crate::templates::TemplateRenderer;
use may::coroutine::{self, JoinHandle};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Glue between the wire and the router: one raw exchange in, one reply out.
///
/// Cloning is cheap; every connection coroutine holds its own clone sharing the
/// same route table and session store.
#[derive(Clone)]
pub struct AppService {
    router: Arc<Router>,
    sessions: SessionStore,
    templates: Option<Arc<dyn TemplateRenderer>>,
    session_cookie_max_age: Option<u64>,
}

impl AppService {
    pub fn new(router: Router, sessions: SessionStore) -> Self {
        Self {
            router: Arc::new(router),
            sessions,
            templates: None,
            session_cookie_max_age: None,
        }
    }

    #[must_use]
    pub fn with_templates(mut self, templates: Arc<dyn TemplateRenderer>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// `Max-Age` for session cookies issued to new clients.
    #[must_use]
    pub fn with_session_cookie_max_age(mut self, max_age: Option<u64>) -> Self {
        self.session_cookie_max_age = max_age;
        self
    }

    /// Register `GET /health` after the routes already present.
    #[must_use]
    pub fn with_health_route(mut self) -> Self {
        register_health_route(Arc::make_mut(&mut self.router));
        self
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Run one exchange through session resolution, routing and the handler.
    #[must_use]
    pub fn handle(&self, raw: RawRequest) -> HttpReply {
        let start = Instant::now();
        let mut req = match Request::from_raw(raw, &self.sessions) {
            Ok(req) => req,
            Err(err) => {
                warn!(error = %err, "Rejecting unparseable request");
                return HttpReply::envelope(StatusCode::BadRequest, "Malformed request");
            }
        };
        let mut res = Response::for_request(&req)
            .with_templates(self.templates.clone())
            .with_session_cookie_max_age(self.session_cookie_max_age);

        self.router.dispatch(&mut req, &mut res);

        let reply = res.into_reply().unwrap_or_else(|| {
            error!(request_id = %req.request_id(), "Dispatch finished without a reply");
            HttpReply::envelope(
                StatusCode::InternalServerError,
                StatusCode::InternalServerError.reason(),
            )
        });
        info!(
            request_id = %req.request_id(),
            method = %req.method(),
            path = %req.path(),
            status = reply.status,
            duration_ms = start.elapsed().as_millis() as u64,
            "Request completed"
        );
        reply
    }
}

impl HttpService for AppService {
    fn call(&self, req: RawRequest) -> HttpReply {
        self.handle(req)
    }
}

impl std::fmt::Debug for AppService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppService")
            .field("router", &self.router)
            .field("sessions", &self.sessions)
            .field("templates", &self.templates.is_some())
            .finish()
    }
}

/// Basic health check returning `{ "statusCode": 200, "message": "ok" }`.
pub fn health_endpoint(_req: &Request, res: &mut Response) -> HandlerResult {
    Ok(res.send(Envelope::ok("ok"))?)
}

pub fn register_health_route(router: &mut Router) {
    router.get("/health", health_endpoint);
}

/// Purge idle sessions every `interval` on a background coroutine.
///
/// Does nothing useful for a store without an idle timeout. Cancel the
/// returned handle's coroutine to stop it.
pub fn spawn_session_sweeper(sessions: SessionStore, interval: Duration) -> io::Result<JoinHandle<()>> {
    info!(
        interval_secs = interval.as_secs(),
        idle_timeout_secs = sessions.idle_timeout().map(|d| d.as_secs()),
        "Starting session sweeper"
    );
    // SAFETY: Builder::spawn is unsafe because coroutine stacks are fixed
    // size. The sweeper only sleeps and walks the session map.
    unsafe {
        coroutine::Builder::new()
            .name("stanza-session-sweeper".to_string())
            .spawn(move || loop {
                coroutine::sleep(interval);
                sessions.purge_idle();
            })
    }
}
