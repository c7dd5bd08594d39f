//! # Cookie Module
//!
//! A single outbound cookie record and its `Set-Cookie` serialization, plus the
//! parser for the inbound `Cookie` header.
//!
//! Names and values are percent-encoded on the way out and decoded on the way
//! in, so any string survives the round trip, including ones containing `;`,
//! `,`, `=`, whitespace or non-ASCII characters.
//!
//! ```rust
//! use stanza::cookie::{parse_cookie_header, Cookie};
//!
//! let header = Cookie::new("email", "a b@example.com").serialize();
//! assert_eq!(header, "email=a%20b%40example.com; Path=/; HttpOnly");
//!
//! let pairs = parse_cookie_header("email=a%20b%40example.com; theme=dark");
//! assert_eq!(pairs[0], ("email".to_string(), "a b@example.com".to_string()));
//! ```

use std::borrow::Cow;
use tracing::debug;

/// Name of the cookie that correlates a client with its server-side session.
pub const SESSION_COOKIE: &str = "session_id";

/// An outbound cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lifetime in seconds; `None` makes it a browser-session cookie.
    pub max_age: Option<u64>,
    pub path: String,
    pub http_only: bool,
}

impl Cookie {
    /// Create a cookie with `Path=/` and `HttpOnly`.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age: None,
            path: "/".to_string(),
            http_only: true,
        }
    }

    /// A cookie that tells the client to drop `name` immediately.
    pub fn expired(name: impl Into<String>) -> Self {
        Self::new(name, "").with_max_age(0)
    }

    #[must_use]
    pub fn with_max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Render the `Set-Cookie` header value.
    ///
    /// Attribute order is fixed: `Path`, then `Max-Age` when present, then
    /// `HttpOnly` when set. `;`, control and non-ASCII characters in the path
    /// are percent-encoded so they cannot start a new attribute.
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(self.name.len() + self.value.len() + 24);
        out.push_str(&urlencoding::encode(&self.name));
        out.push('=');
        out.push_str(&urlencoding::encode(&self.value));
        out.push_str("; Path=");
        out.push_str(&encode_path(&self.path));
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

fn encode_path(path: &str) -> Cow<'_, str> {
    let needs_encoding = |b: u8| b == b';' || b.is_ascii_control() || !b.is_ascii();
    if !path.bytes().any(needs_encoding) {
        return Cow::Borrowed(path);
    }
    let mut out = String::with_capacity(path.len() + 8);
    for b in path.bytes() {
        if needs_encoding(b) {
            out.push_str(&format!("%{b:02X}"));
        } else {
            out.push(char::from(b));
        }
    }
    Cow::Owned(out)
}

/// Parse a `Cookie` request header into ordered `(name, value)` pairs.
///
/// Pairs without `=` and pairs that do not decode to UTF-8 are skipped.
#[must_use]
pub fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|pair| {
            let pair = pair.trim();
            if pair.is_empty() {
                return None;
            }
            let Some((name, value)) = pair.split_once('=') else {
                debug!(pair_len = pair.len(), "Skipping cookie pair without '='");
                return None;
            };
            let name = urlencoding::decode(name.trim()).ok()?;
            let value = urlencoding::decode(value.trim()).ok()?;
            Some((name.into_owned(), value.into_owned()))
        })
        .collect()
}
