use super::envelope::{Envelope, StatusCode, WireEnvelope};
use super::request::Request;
use crate::cookie::{Cookie, SESSION_COOKIE};
use crate::ids::RequestId;
use crate::session::Session;
use crate::templates::TemplateRenderer;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

const JSON_CONTENT_TYPE: &str = "application/json";
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Last-resort body when even the error envelope cannot be serialized.
const FALLBACK_BODY: &[u8] = br#"{"statusCode":500,"message":"Internal Server Error"}"#;

/// A finished HTTP reply, ready for the connection to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub reason: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpReply {
    /// A bare JSON envelope reply for failures that happen before a
    /// [`Request`] exists (malformed request line, oversized body).
    #[must_use]
    pub fn envelope(status: StatusCode, message: &str) -> Self {
        Self {
            status: status.as_u16(),
            reason: status.reason(),
            headers: vec![("Content-Type".to_string(), JSON_CONTENT_TYPE.to_string())],
            body: json_body(&WireEnvelope {
                status_code: status,
                message,
                payload: None,
                redirect: None,
            }),
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of a repeatable header such as `Set-Cookie`.
    #[must_use]
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Body parsed as JSON; `Value::Null` when it is not JSON.
    #[must_use]
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

/// Proof that a [`Response`] was sent.
///
/// Only [`Response::send`] creates one, so a handler returning `Ok(Sealed)`
/// has necessarily replied.
#[must_use = "return the seal from the handler"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sealed {
    request_id: RequestId,
}

impl Sealed {
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }
}

/// Misuse of a [`Response`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    #[error("response for request {0} was already sent")]
    AlreadySent(RequestId),
}

/// The outbound half of an exchange: accumulated cookies plus a write-once
/// [`Envelope`].
///
/// # Send precedence
///
/// 1. `redirect` set and the client accepts HTML: `303 See Other` with
///    `Location`, JSON body `{statusCode, message, redirect}`. Template and
///    payload are ignored.
/// 2. `template` set, a renderer configured and the client accepts HTML: the
///    template rendered with the payload, as `text/html`.
/// 3. Otherwise: the envelope status, JSON body
///    `{statusCode, message, payload?, redirect?}`. API clients see the
///    handler's status and follow `redirect` themselves.
///
/// The session cookie is attached at send time: a fresh session gets
/// `session_id=<id>`, a destroyed one gets an expired `session_id`, unless the
/// handler set `session_id` itself.
pub struct Response {
    request_id: RequestId,
    accepts_html: bool,
    session: Session,
    session_is_new: bool,
    session_cookie_max_age: Option<u64>,
    templates: Option<Arc<dyn TemplateRenderer>>,
    cookies: Vec<Cookie>,
    reply: Option<HttpReply>,
}

impl Response {
    /// A response bound to `request`'s id, session and content preference.
    #[must_use]
    pub fn for_request(request: &Request) -> Self {
        Self {
            request_id: request.request_id(),
            accepts_html: request.accepts_html(),
            session: request.session().clone(),
            session_is_new: request.session_is_new(),
            session_cookie_max_age: None,
            templates: None,
            cookies: Vec::new(),
            reply: None,
        }
    }

    #[must_use]
    pub fn with_templates(mut self, templates: Option<Arc<dyn TemplateRenderer>>) -> Self {
        self.templates = templates;
        self
    }

    /// `Max-Age` for the framework-issued session cookie.
    #[must_use]
    pub fn with_session_cookie_max_age(mut self, max_age: Option<u64>) -> Self {
        self.session_cookie_max_age = max_age;
        self
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.reply.is_some()
    }

    /// Cookies queued so far, one per name.
    #[must_use]
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// Queue a cookie. A later cookie with the same name replaces the earlier
    /// one in place.
    pub fn set_cookie(&mut self, cookie: Cookie) -> Result<(), ResponseError> {
        if self.is_sent() {
            error!(
                request_id = %self.request_id,
                cookie_name = %cookie.name,
                "set_cookie called after send"
            );
            return Err(ResponseError::AlreadySent(self.request_id));
        }
        match self.cookies.iter_mut().find(|c| c.name == cookie.name) {
            Some(existing) => *existing = cookie,
            None => self.cookies.push(cookie),
        }
        Ok(())
    }

    /// Complete the exchange. Fails, leaving the first reply intact, when
    /// called more than once.
    pub fn send(&mut self, envelope: Envelope) -> Result<Sealed, ResponseError> {
        if self.is_sent() {
            error!(
                request_id = %self.request_id,
                status = envelope.status_code.as_u16(),
                message = %envelope.message,
                "Response sent twice; second send rejected"
            );
            return Err(ResponseError::AlreadySent(self.request_id));
        }

        self.attach_session_cookie();
        let mut reply = self.render(&envelope);
        for cookie in &self.cookies {
            reply
                .headers
                .push(("Set-Cookie".to_string(), cookie.serialize()));
        }

        info!(
            request_id = %self.request_id,
            status = reply.status,
            envelope_status = envelope.status_code.as_u16(),
            redirect = envelope.redirect.as_deref(),
            template = envelope.template.as_deref(),
            cookie_count = self.cookies.len(),
            body_size_bytes = reply.body.len(),
            "Response sent"
        );

        self.reply = Some(reply);
        Ok(Sealed {
            request_id: self.request_id,
        })
    }

    #[must_use]
    pub fn reply(&self) -> Option<&HttpReply> {
        self.reply.as_ref()
    }

    #[must_use]
    pub fn into_reply(self) -> Option<HttpReply> {
        self.reply
    }

    fn attach_session_cookie(&mut self) {
        if self.cookies.iter().any(|c| c.name == SESSION_COOKIE) {
            return;
        }
        if self.session.is_destroyed() {
            self.cookies.push(Cookie::expired(SESSION_COOKIE));
        } else if self.session_is_new {
            let mut cookie = Cookie::new(SESSION_COOKIE, self.session.id().as_str());
            cookie.max_age = self.session_cookie_max_age;
            self.cookies.push(cookie);
        }
    }

    fn render(&self, envelope: &Envelope) -> HttpReply {
        if let (Some(location), true) = (&envelope.redirect, self.accepts_html) {
            let status = StatusCode::SeeOther;
            return HttpReply {
                status: status.as_u16(),
                reason: status.reason(),
                headers: vec![
                    ("Location".to_string(), location.clone()),
                    ("Content-Type".to_string(), JSON_CONTENT_TYPE.to_string()),
                ],
                body: json_body(&WireEnvelope {
                    status_code: envelope.status_code,
                    message: &envelope.message,
                    payload: None,
                    redirect: Some(location),
                }),
            };
        }

        if let (Some(template), Some(renderer), true) =
            (&envelope.template, &self.templates, self.accepts_html)
        {
            let empty = json!({});
            let context = envelope.payload.as_ref().unwrap_or(&empty);
            return match renderer.render(template, context) {
                Ok(html) => HttpReply {
                    status: envelope.status_code.as_u16(),
                    reason: envelope.status_code.reason(),
                    headers: vec![("Content-Type".to_string(), HTML_CONTENT_TYPE.to_string())],
                    body: html.into_bytes(),
                },
                Err(err) => {
                    error!(
                        request_id = %self.request_id,
                        template = %template,
                        error = %err,
                        "Template rendering failed"
                    );
                    HttpReply::envelope(
                        StatusCode::InternalServerError,
                        StatusCode::InternalServerError.reason(),
                    )
                }
            };
        }

        HttpReply {
            status: envelope.status_code.as_u16(),
            reason: envelope.status_code.reason(),
            headers: vec![("Content-Type".to_string(), JSON_CONTENT_TYPE.to_string())],
            body: json_body(&WireEnvelope {
                status_code: envelope.status_code,
                message: &envelope.message,
                payload: envelope.payload.as_ref(),
                redirect: envelope.redirect.as_deref(),
            }),
        }
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("request_id", &self.request_id)
            .field("cookies", &self.cookies.len())
            .field("sent", &self.is_sent())
            .finish()
    }
}

fn json_body(wire: &WireEnvelope<'_>) -> Vec<u8> {
    serde_json::to_vec(wire).unwrap_or_else(|err| {
        error!(error = %err, "Envelope serialization failed");
        FALLBACK_BODY.to_vec()
    })
}
