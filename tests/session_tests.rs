use stanza::{AppService, SessionStore};
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::app::{self, Models};
use common::http::{browser, form, get, session_cookie, with_session};

fn service_with_user() -> (AppService, Arc<Models>) {
    let models = Arc::new(Models::default());
    let service = AppService::new(app::router(&models), SessionStore::new());
    let reply = service.handle(form("POST", "/users", "email=poet%40example.com&password=pw"));
    assert_eq!(reply.status, 201);
    (service, models)
}

fn login(service: &AppService) -> String {
    let reply = service.handle(browser(form(
        "POST",
        "/login",
        "email=poet%40example.com&password=pw",
    )));
    assert_eq!(reply.status, 303);
    session_cookie(&reply).expect("login reply sets a session cookie")
}

#[test]
fn test_first_request_gets_fresh_cookie() {
    let (service, _) = service_with_user();
    let reply = service.handle(get("/login"));
    let id = session_cookie(&reply).unwrap();
    assert_eq!(id.len(), 43);
    assert!(service.sessions().len() >= 1);
}

#[test]
fn test_cookie_replay_resolves_same_session() {
    let (service, _) = service_with_user();
    let id = login(&service);

    let reply = service.handle(with_session(get("/poems/new"), &id));
    assert_eq!(reply.status, 200);
    // known session: no new cookie issued
    assert_eq!(session_cookie(&reply), None);

    let reply = service.handle(with_session(
        form("POST", "/poems", "title=Ozymandias"),
        &id,
    ));
    assert_eq!(reply.status, 201);
    assert_eq!(reply.json()["payload"]["poem"]["userId"], 1);
}

#[test]
fn test_without_cookie_state_is_not_shared() {
    let (service, _) = service_with_user();
    let _id = login(&service);
    let reply = service.handle(get("/poems/new"));
    assert_eq!(reply.status, 401);
    assert_eq!(reply.json()["redirect"], "/login");
}

#[test]
fn test_logout_expires_cookie_and_is_not_resurrected() {
    let (service, _) = service_with_user();
    let id = login(&service);

    let reply = service.handle(browser(with_session(get("/logout"), &id)));
    assert_eq!(reply.header("location"), Some("/"));
    assert_eq!(
        reply.header_values("set-cookie"),
        vec!["session_id=; Path=/; Max-Age=0; HttpOnly"]
    );

    let reply = service.handle(with_session(get("/poems/new"), &id));
    assert_eq!(reply.json()["statusCode"], 401);
    let new_id = session_cookie(&reply).unwrap();
    assert_ne!(new_id, id);
}

#[test]
fn test_malformed_session_cookie_gets_new_session() {
    let (service, _) = service_with_user();
    let reply = service.handle(with_session(get("/login"), "not-a-session"));
    assert_eq!(reply.status, 200);
    assert!(session_cookie(&reply).is_some_and(|id| id != "not-a-session"));
}

#[test]
fn test_idle_session_expires() {
    let models = Arc::new(Models::default());
    let store = SessionStore::new().with_idle_timeout(Duration::from_millis(30));
    let service = AppService::new(app::router(&models), store);
    let _ = service.handle(form("POST", "/users", "email=poet%40example.com&password=pw"));
    let id = login(&service);

    std::thread::sleep(Duration::from_millis(60));
    let reply = service.handle(with_session(get("/poems/new"), &id));
    assert_eq!(reply.json()["statusCode"], 401);
    assert!(session_cookie(&reply).is_some_and(|new_id| new_id != id));
}

#[test]
fn test_concurrent_clients_keep_separate_sessions() {
    let (service, _) = service_with_user();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            std::thread::spawn(move || {
                let id = login(&service);
                for _ in 0..20 {
                    let reply = service.handle(with_session(get("/poems/new"), &id));
                    assert_eq!(reply.status, 200);
                }
                id
            })
        })
        .collect();
    let mut ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
}
