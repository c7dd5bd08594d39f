use super::envelope::StatusCode;
use super::http_server::HttpService;
use super::request::RawRequest;
use super::response::HttpReply;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of headers accepted per request.
pub const MAX_HEADERS: usize = 32;

const READ_CHUNK: usize = 4096;

/// Per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Request line plus headers.
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
    /// Deadline for each socket read; `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Stack size of each connection coroutine.
    pub stack_size: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 16 * 1024,
            max_body_bytes: 1024 * 1024,
            read_timeout: Some(Duration::from_secs(30)),
            stack_size: 0x10000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("request headers exceed {limit} bytes")]
    HeadersTooLarge { limit: usize },
    #[error("request body of {length} bytes exceeds {limit} bytes")]
    BodyTooLarge { length: usize, limit: usize },
    #[error("unsupported transfer encoding: {0}")]
    UnsupportedTransferEncoding(String),
    #[error("connection closed mid-request")]
    UnexpectedEof,
}

impl WireError {
    /// The reply owed to the client before closing, if any.
    #[must_use]
    pub fn reply(&self) -> Option<HttpReply> {
        match self {
            WireError::Io(_) | WireError::UnexpectedEof => None,
            WireError::BodyTooLarge { .. } => Some(HttpReply::envelope(
                StatusCode::PayloadTooLarge,
                "Payload too large",
            )),
            WireError::Malformed(_)
            | WireError::HeadersTooLarge { .. }
            | WireError::UnsupportedTransferEncoding(_) => {
                Some(HttpReply::envelope(StatusCode::BadRequest, "Malformed request"))
            }
        }
    }
}

struct Head {
    method: String,
    target: String,
    minor_version: u8,
    headers: Vec<(String, String)>,
    len: usize,
}

fn parse_head(buf: &[u8]) -> Result<Option<Head>, WireError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => Ok(Some(Head {
            method: req.method.unwrap_or_default().to_string(),
            target: req.path.unwrap_or_default().to_string(),
            minor_version: req.version.unwrap_or(1),
            headers: req
                .headers
                .iter()
                .map(|h| {
                    (
                        h.name.to_ascii_lowercase(),
                        String::from_utf8_lossy(h.value).into_owned(),
                    )
                })
                .collect(),
            len,
        })),
        Ok(httparse::Status::Partial) => Ok(None),
        Err(err) => Err(WireError::Malformed(err.to_string())),
    }
}

fn fill<R: Read>(reader: &mut R, buf: &mut Vec<u8>) -> Result<usize, WireError> {
    let mut chunk = [0u8; READ_CHUNK];
    let n = reader.read(&mut chunk)?;
    buf.extend_from_slice(&chunk[..n]);
    Ok(n)
}

/// Read one request from `reader`.
///
/// `buf` carries bytes across calls, so pipelined requests are not lost.
/// Returns `Ok(None)` when the peer closes cleanly between requests.
pub fn read_request<R: Read>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limits: &ConnectionLimits,
) -> Result<Option<RawRequest>, WireError> {
    let head = loop {
        if !buf.is_empty() {
            if let Some(head) = parse_head(buf)? {
                break head;
            }
            if buf.len() > limits.max_header_bytes {
                return Err(WireError::HeadersTooLarge {
                    limit: limits.max_header_bytes,
                });
            }
        }
        if fill(reader, buf)? == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(WireError::UnexpectedEof);
        }
    };
    if head.len > limits.max_header_bytes {
        return Err(WireError::HeadersTooLarge {
            limit: limits.max_header_bytes,
        });
    }

    let header = |name: &str| {
        head.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.trim())
    };
    if let Some(te) = header("transfer-encoding") {
        if !te.eq_ignore_ascii_case("identity") {
            return Err(WireError::UnsupportedTransferEncoding(te.to_string()));
        }
    }
    let length = match header("content-length") {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| WireError::Malformed(format!("invalid content-length {raw:?}")))?,
        None => 0,
    };
    if length > limits.max_body_bytes {
        return Err(WireError::BodyTooLarge {
            length,
            limit: limits.max_body_bytes,
        });
    }

    let total = head.len + length;
    while buf.len() < total {
        if fill(reader, buf)? == 0 {
            return Err(WireError::UnexpectedEof);
        }
    }
    let body = buf[head.len..total].to_vec();
    buf.drain(..total);

    Ok(Some(RawRequest {
        method: head.method,
        target: head.target,
        minor_version: head.minor_version,
        headers: head.headers,
        body,
    }))
}

/// Write `reply` as an HTTP/1.1 response. `Content-Length` and `Connection`
/// are always set here.
pub fn write_reply<W: Write>(writer: &mut W, reply: &HttpReply, keep_alive: bool) -> io::Result<()> {
    let mut head = String::with_capacity(128 + reply.headers.len() * 48);
    head.push_str("HTTP/1.1 ");
    head.push_str(&reply.status.to_string());
    head.push(' ');
    head.push_str(reply.reason);
    head.push_str("\r\n");
    for (name, value) in &reply.headers {
        if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("connection") {
            continue;
        }
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("Content-Length: ");
    head.push_str(&reply.body.len().to_string());
    head.push_str("\r\nConnection: ");
    head.push_str(if keep_alive { "keep-alive" } else { "close" });
    head.push_str("\r\n\r\n");

    writer.write_all(head.as_bytes())?;
    writer.write_all(&reply.body)?;
    writer.flush()
}

/// Serve requests from one connection until it closes, errors, or either
/// side asks for `Connection: close`.
pub fn serve_connection<S, T>(stream: &mut S, service: &T, limits: &ConnectionLimits)
where
    S: Read + Write,
    T: HttpService,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    loop {
        let raw = match read_request(stream, &mut buf, limits) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("Connection closed by peer");
                return;
            }
            Err(err) => {
                match err.reply() {
                    Some(reply) => {
                        warn!(error = %err, status = reply.status, "Rejecting request");
                        if let Err(io_err) = write_reply(stream, &reply, false) {
                            debug!(error = %io_err, "Failed to write rejection");
                        }
                    }
                    None => debug!(error = %err, "Connection dropped"),
                }
                return;
            }
        };

        let keep_alive = raw.keep_alive();
        let reply = service.call(raw);
        if let Err(err) = write_reply(stream, &reply, keep_alive) {
            debug!(error = %err, "Failed to write reply");
            return;
        }
        if !keep_alive {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn limits() -> ConnectionLimits {
        ConnectionLimits {
            max_header_bytes: 1024,
            max_body_bytes: 64,
            ..ConnectionLimits::default()
        }
    }

    /// A reader that yields its input one byte at a time.
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            let len = out.len().min(1);
            self.0.read(&mut out[..len])
        }
    }

    #[test]
    fn test_read_simple_request() {
        let mut input = Cursor::new(b"GET /poems?page=2 HTTP/1.1\r\nHost: x\r\nCookie: a=1\r\n\r\n".to_vec());
        let mut buf = Vec::new();
        let raw = read_request(&mut input, &mut buf, &limits()).unwrap().unwrap();
        assert_eq!(raw.method, "GET");
        assert_eq!(raw.target, "/poems?page=2");
        assert_eq!(raw.minor_version, 1);
        assert_eq!(raw.header("cookie"), Some("a=1"));
        assert!(raw.body.is_empty());
        assert!(read_request(&mut input, &mut buf, &limits()).unwrap().is_none());
    }

    #[test]
    fn test_read_body_in_pieces() {
        let bytes = b"POST /login HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 16\r\n\r\n{\"email\":\"a@b\"}\n".to_vec();
        let mut input = Trickle(Cursor::new(bytes));
        let raw = read_request(&mut input, &mut Vec::new(), &limits()).unwrap().unwrap();
        assert_eq!(raw.body, b"{\"email\":\"a@b\"}\n".to_vec());
    }

    #[test]
    fn test_pipelined_requests() {
        let mut input = Cursor::new(
            b"POST /a HTTP/1.1\r\nContent-Length: 2\r\n\r\nhiGET /b HTTP/1.1\r\n\r\n".to_vec(),
        );
        let mut buf = Vec::new();
        let first = read_request(&mut input, &mut buf, &limits()).unwrap().unwrap();
        assert_eq!((first.target.as_str(), first.body.as_slice()), ("/a", &b"hi"[..]));
        let second = read_request(&mut input, &mut buf, &limits()).unwrap().unwrap();
        assert_eq!(second.target, "/b");
    }

    #[test]
    fn test_body_too_large() {
        let mut input = Cursor::new(b"POST / HTTP/1.1\r\nContent-Length: 65\r\n\r\n".to_vec());
        let err = read_request(&mut input, &mut Vec::new(), &limits()).unwrap_err();
        assert!(matches!(err, WireError::BodyTooLarge { length: 65, limit: 64 }));
        assert_eq!(err.reply().unwrap().status, 413);
    }

    #[test]
    fn test_malformed_and_chunked_rejected() {
        let mut input = Cursor::new(b"NOT A REQUEST\r\n\r\n".to_vec());
        let err = read_request(&mut input, &mut Vec::new(), &limits()).unwrap_err();
        assert_eq!(err.reply().unwrap().status, 400);

        let mut input = Cursor::new(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec());
        let err = read_request(&mut input, &mut Vec::new(), &limits()).unwrap_err();
        assert!(matches!(err, WireError::UnsupportedTransferEncoding(_)));
        assert_eq!(err.reply().unwrap().json()["message"], "Malformed request");
    }

    #[test]
    fn test_oversized_headers() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Big: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(2048));
        let err = read_request(&mut Cursor::new(raw), &mut Vec::new(), &limits()).unwrap_err();
        assert!(matches!(err, WireError::HeadersTooLarge { limit: 1024 }));
    }

    #[test]
    fn test_truncated_body() {
        let mut input = Cursor::new(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc".to_vec());
        let err = read_request(&mut input, &mut Vec::new(), &limits()).unwrap_err();
        assert!(matches!(err, WireError::UnexpectedEof));
        assert!(err.reply().is_none());
    }

    #[test]
    fn test_write_reply() {
        let reply = HttpReply {
            status: 303,
            reason: "See Other",
            headers: vec![
                ("Location".to_string(), "/".to_string()),
                ("Set-Cookie".to_string(), "a=1; Path=/; HttpOnly".to_string()),
                ("Set-Cookie".to_string(), "b=2; Path=/; HttpOnly".to_string()),
            ],
            body: b"{}".to_vec(),
        };
        let mut out = Vec::new();
        write_reply(&mut out, &reply, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "HTTP/1.1 303 See Other\r\nLocation: /\r\nSet-Cookie: a=1; Path=/; HttpOnly\r\nSet-Cookie: b=2; Path=/; HttpOnly\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}"
        );
    }
}
