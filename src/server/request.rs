use crate::cookie::{parse_cookie_header, SESSION_COOKIE};
use crate::ids::RequestId;
use crate::router::ParamVec;
use crate::session::{Session, SessionStore};
use http::Method;
use serde_json::{Map, Value};
use tracing::debug;

/// One HTTP exchange as it comes off the wire, before any interpretation.
///
/// Header names are stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    pub method: String,
    /// Request target, path plus optional query string.
    pub target: String,
    /// HTTP/1.x minor version.
    pub minor_version: u8,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawRequest {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            minor_version: 1,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// HTTP/1.1 keeps the connection unless told otherwise; HTTP/1.0 the reverse.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        let connection = self.header("connection").map(str::to_ascii_lowercase);
        match connection.as_deref() {
            Some(v) if v.contains("close") => false,
            Some(v) if v.contains("keep-alive") => true,
            _ => self.minor_version >= 1,
        }
    }
}

/// Errors turning a [`RawRequest`] into a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("invalid method: {0:?}")]
    InvalidMethod(String),
    #[error("request target must start with '/': {0:?}")]
    InvalidTarget(String),
}

/// Failure to read a typed path parameter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("missing path parameter `{0}`")]
    Missing(String),
    #[error("path parameter `{name}` is not numeric: {value:?}")]
    NotNumeric { name: String, value: String },
}

/// Ordered query parameters. `get` returns the first value for a name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams(Vec<(String, String)>);

impl SearchParams {
    #[must_use]
    pub fn parse(query: &str) -> Self {
        Self(
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        )
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The typed view of one exchange a handler works with.
///
/// A request always carries a [`Session`]: either the one named by its
/// `session_id` cookie or a fresh anonymous one.
#[derive(Debug)]
pub struct Request {
    request_id: RequestId,
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    search_params: SearchParams,
    body: Map<String, Value>,
    path_params: ParamVec,
    session: Session,
    session_is_new: bool,
}

impl Request {
    /// Interpret a raw exchange and resolve its session in `sessions`.
    ///
    /// Body and cookie problems never fail construction: an unparseable body is
    /// empty and a malformed cookie pair is skipped.
    pub fn from_raw(raw: RawRequest, sessions: &SessionStore) -> Result<Self, RequestError> {
        let method = Method::from_bytes(raw.method.as_bytes())
            .map_err(|_| RequestError::InvalidMethod(raw.method.clone()))?;
        if !raw.target.starts_with('/') {
            return Err(RequestError::InvalidTarget(raw.target));
        }
        let (path, query) = match raw.target.split_once('?') {
            Some((path, query)) => (path.to_string(), query),
            None => (raw.target.clone(), ""),
        };
        let search_params = SearchParams::parse(query);
        let request_id = RequestId::from_header_or_new(raw.header("x-request-id"));

        let cookies = raw
            .header("cookie")
            .map(parse_cookie_header)
            .unwrap_or_default();
        debug!(
            request_id = %request_id,
            cookie_count = cookies.len(),
            cookie_names = ?cookies.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            "Cookies extracted"
        );

        let session_cookie = cookies
            .iter()
            .find(|(k, _)| k == SESSION_COOKIE)
            .map(|(_, v)| v.as_str());
        let (session, session_is_new) = sessions.resolve(session_cookie);
        debug!(
            request_id = %request_id,
            session_is_new,
            had_session_cookie = session_cookie.is_some(),
            "Session resolved"
        );

        let body = parse_body(raw.header("content-type"), &raw.body);

        Ok(Self {
            request_id,
            method,
            path,
            headers: raw.headers,
            cookies,
            search_params,
            body,
            path_params: ParamVec::new(),
            session,
            session_is_new,
        })
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path without the query string, exactly as received.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Header lookup, case-insensitive.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn search_params(&self) -> &SearchParams {
        &self.search_params
    }

    #[must_use]
    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    #[must_use]
    pub fn body_field(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    /// A body field as a non-empty string.
    #[must_use]
    pub fn body_str(&self, field: &str) -> Option<&str> {
        self.body
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// True when the session was allocated for this request.
    #[must_use]
    pub fn session_is_new(&self) -> bool {
        self.session_is_new
    }

    /// True when the client asked for HTML (a browser), rather than JSON.
    #[must_use]
    pub fn accepts_html(&self) -> bool {
        self.header("accept")
            .is_some_and(|accept| accept.to_ascii_lowercase().contains("text/html"))
    }

    /// Bound path parameters in pattern order. Repeated names are all kept.
    #[must_use]
    pub fn path_params(&self) -> &ParamVec {
        &self.path_params
    }

    pub fn set_path_params(&mut self, params: ParamVec) {
        self.path_params = params;
    }

    /// First parameter bound under `name`.
    #[must_use]
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Last parameter bound under `name`.
    #[must_use]
    pub fn path_param_last(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn path_param_i64(&self, name: &str) -> Result<i64, ParamError> {
        parse_numeric(name, self.path_param(name))
    }

    /// The first `:id` segment, e.g. the poem in `/poems/:id/comments/:id`.
    pub fn id(&self) -> Result<i64, ParamError> {
        parse_numeric("id", self.path_param("id"))
    }

    /// The last `:id` segment, e.g. the comment in `/poems/:id/comments/:id`.
    ///
    /// Equal to [`Request::id`] when the pattern has a single `:id`.
    pub fn comment_id(&self) -> Result<i64, ParamError> {
        parse_numeric("id", self.path_param_last("id"))
    }
}

fn parse_numeric(name: &str, raw: Option<&str>) -> Result<i64, ParamError> {
    let raw = raw.ok_or_else(|| ParamError::Missing(name.to_string()))?;
    raw.parse::<i64>().map_err(|_| ParamError::NotNumeric {
        name: name.to_string(),
        value: raw.to_string(),
    })
}

/// Parse a body into a flat field map according to its content type.
///
/// JSON bodies must be an object; form bodies keep the last value of a
/// repeated field. Anything else, including parse failures, is an empty map.
#[must_use]
pub fn parse_body(content_type: Option<&str>, bytes: &[u8]) -> Map<String, Value> {
    if bytes.is_empty() {
        return Map::new();
    }
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .unwrap_or_default();

    match mime.as_str() {
        "application/json" => match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => {
                debug!(body_fields = map.len(), "JSON body parsed");
                map
            }
            Ok(_) => {
                debug!("JSON body is not an object; treating as empty");
                Map::new()
            }
            Err(err) => {
                debug!(error = %err, "JSON body parse failed; treating as empty");
                Map::new()
            }
        },
        "application/x-www-form-urlencoded" => {
            let map: Map<String, Value> = url::form_urlencoded::parse(bytes)
                .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
                .collect();
            debug!(body_fields = map.len(), "Form body parsed");
            map
        }
        other => {
            debug!(content_type = %other, body_size_bytes = bytes.len(), "Unsupported body content type; treating as empty");
            Map::new()
        }
    }
}
