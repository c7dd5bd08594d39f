use stanza::server::{ConnectionLimits, ServerHandle};
use stanza::{AppService, HttpServer, SessionStore};
use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::app::{self, Models};
use common::test_server::{parse_response, read_available, send_request, setup_may_runtime};

fn start_service(limits: ConnectionLimits) -> ServerHandle {
    setup_may_runtime();
    let models = Arc::new(Models::default());
    let service = AppService::new(app::router(&models), SessionStore::new()).with_health_route();
    let handle = HttpServer::new(service)
        .with_limits(limits)
        .start("127.0.0.1:0")
        .unwrap();
    handle.wait_ready().unwrap();
    handle
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Vec<&'a str> {
    headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .collect()
}

#[test]
fn test_health_over_tcp() {
    let handle = start_service(ConnectionLimits::default());
    let resp = send_request(
        &handle.addr(),
        "GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );
    let (status, headers, body) = parse_response(&resp);
    assert_eq!(status, 200);
    assert_eq!(body, serde_json::json!({ "statusCode": 200, "message": "ok" }));
    assert_eq!(header(&headers, "connection"), vec!["close"]);
    assert_eq!(header(&headers, "set-cookie").len(), 1);
    handle.stop();
}

#[test]
fn test_unmatched_route_over_tcp() {
    let handle = start_service(ConnectionLimits::default());
    let resp = send_request(
        &handle.addr(),
        "GET /foo HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );
    let (status, _, body) = parse_response(&resp);
    assert_eq!(status, 404);
    assert_eq!(body["message"], "Invalid route: GET /foo");
    handle.stop();
}

#[test]
fn test_keep_alive_session_round_trip() {
    let handle = start_service(ConnectionLimits::default());
    let mut stream = TcpStream::connect(handle.addr()).unwrap();

    let register = "email=poet%40example.com&password=pw";
    let login = format!(
        "POST /users HTTP/1.1\r\nHost: x\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{register}",
        register.len()
    );
    stream.write_all(login.as_bytes()).unwrap();
    let (status, headers, _) = parse_response(&read_available(&mut stream));
    assert_eq!(status, 201);
    assert_eq!(header(&headers, "connection"), vec!["keep-alive"]);

    let login_req = format!(
        "POST /login HTTP/1.1\r\nHost: x\r\nAccept: text/html\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{register}",
        register.len()
    );
    stream.write_all(login_req.as_bytes()).unwrap();
    let (status, headers, body) = parse_response(&read_available(&mut stream));
    assert_eq!(status, 303);
    assert_eq!(header(&headers, "location"), vec!["/poems"]);
    assert_eq!(body["statusCode"], 200);
    let cookie = header(&headers, "set-cookie")[0]
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let new_form = format!("GET /poems/new HTTP/1.1\r\nHost: x\r\nCookie: {cookie}\r\n\r\n");
    stream.write_all(new_form.as_bytes()).unwrap();
    let (status, headers, body) = parse_response(&read_available(&mut stream));
    assert_eq!(status, 200);
    assert_eq!(body["message"], "New poem form");
    assert!(header(&headers, "set-cookie").is_empty());
    handle.stop();
}

#[test]
fn test_body_too_large() {
    let handle = start_service(ConnectionLimits {
        max_body_bytes: 16,
        ..ConnectionLimits::default()
    });
    let resp = send_request(
        &handle.addr(),
        "POST /poems HTTP/1.1\r\nHost: x\r\nContent-Length: 17\r\n\r\n",
    );
    let (status, headers, body) = parse_response(&resp);
    assert_eq!(status, 413);
    assert_eq!(body["message"], "Payload too large");
    assert_eq!(header(&headers, "connection"), vec!["close"]);
    handle.stop();
}

#[test]
fn test_malformed_request() {
    let handle = start_service(ConnectionLimits::default());
    let resp = send_request(&handle.addr(), "THIS IS NOT HTTP\r\n\r\n");
    let (status, _, body) = parse_response(&resp);
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Malformed request");
    handle.stop();
}

#[test]
fn test_stalled_client_is_dropped() {
    let handle = start_service(ConnectionLimits {
        read_timeout: Some(Duration::from_millis(100)),
        ..ConnectionLimits::default()
    });
    let mut stream = TcpStream::connect(handle.addr()).unwrap();
    stream.write_all(b"GET /health HTTP/1.1\r\n").unwrap();
    std::thread::sleep(Duration::from_millis(300));
    // the server gave up on the half-sent request and closed without a reply
    assert_eq!(read_available(&mut stream), "");
    handle.stop();
}
