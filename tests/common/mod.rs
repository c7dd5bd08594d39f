#![allow(dead_code)]

pub mod http {
    use stanza::cookie::SESSION_COOKIE;
    use stanza::{HttpReply, RawRequest};

    /// The `session_id` value a reply asks the client to store.
    pub fn session_cookie(reply: &HttpReply) -> Option<String> {
        reply
            .header_values("set-cookie")
            .into_iter()
            .find_map(|c| c.strip_prefix(&format!("{SESSION_COOKIE}=")).map(str::to_string))
            .map(|rest| rest.split(';').next().unwrap_or_default().to_string())
    }

    pub fn get(path: &str) -> RawRequest {
        RawRequest::new("GET", path)
    }

    pub fn form(method: &str, path: &str, body: &str) -> RawRequest {
        RawRequest::new(method, path)
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_body(body)
    }

    /// Mark `req` as coming from a browser, which follows redirects.
    pub fn browser(req: RawRequest) -> RawRequest {
        req.with_header("accept", "text/html,application/xhtml+xml")
    }

    pub fn with_session(req: RawRequest, session_id: &str) -> RawRequest {
        req.with_header("cookie", format!("{SESSION_COOKIE}={session_id}"))
    }
}

pub mod test_server {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::sync::Once;
    use std::time::Duration;

    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x10000);
        });
    }

    /// Write `req` and read until the server closes or goes quiet.
    pub fn send_request(addr: &SocketAddr, req: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(req.as_bytes()).unwrap();
        read_available(&mut stream)
    }

    pub fn read_available(stream: &mut TcpStream) -> String {
        stream
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();
        let mut buf = Vec::new();
        loop {
            let mut tmp = [0u8; 1024];
            match stream.read(&mut tmp) {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&tmp[..n]),
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    break
                }
                Err(e) => panic!("read error: {e:?}"),
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Status, headers and JSON body of one raw HTTP response.
    pub fn parse_response(resp: &str) -> (u16, Vec<(String, String)>, serde_json::Value) {
        let (head, body) = resp.split_once("\r\n\r\n").unwrap_or((resp, ""));
        let mut lines = head.lines();
        let status = lines
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let headers = lines
            .filter_map(|l| l.split_once(": "))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let json = serde_json::from_str(body).unwrap_or_default();
        (status, headers, json)
    }
}

/// Stand-in domain layer: in-memory models with tagged outcomes and the
/// controllers that drive them through the routing kernel.
pub mod app {
    use parking_lot::Mutex;
    use serde::Serialize;
    use serde_json::json;
    use stanza::session::{KEY_IS_ADMIN, KEY_IS_LOGGED_IN, KEY_USER_ID};
    use stanza::{Controller, Cookie, Envelope, HandlerResult, Request, Response, Router, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Serialize)]
    pub struct User {
        pub id: i64,
        pub email: String,
        #[serde(skip)]
        pub password: String,
        #[serde(rename = "isAdmin")]
        pub is_admin: bool,
    }

    #[derive(Debug)]
    pub enum LoginOutcome {
        Ok(User),
        InvalidCredentials,
    }

    #[derive(Debug)]
    pub enum RegisterOutcome {
        Created(User),
        DuplicateEmail,
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct Poem {
        pub id: i64,
        pub title: String,
        #[serde(rename = "userId")]
        pub user_id: i64,
    }

    #[derive(Default)]
    pub struct Models {
        users: Mutex<Vec<User>>,
        poems: Mutex<Vec<Poem>>,
        /// Number of model lookups performed, to prove validation happens first.
        pub calls: AtomicUsize,
    }

    impl Models {
        pub fn register(&self, email: &str, password: &str) -> RegisterOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut users = self.users.lock();
            if users.iter().any(|u| u.email == email) {
                return RegisterOutcome::DuplicateEmail;
            }
            let user = User {
                id: users.len() as i64 + 1,
                email: email.to_string(),
                password: password.to_string(),
                is_admin: email.starts_with("admin@"),
            };
            users.push(user.clone());
            RegisterOutcome::Created(user)
        }

        pub fn login(&self, email: &str, password: &str) -> LoginOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.users
                .lock()
                .iter()
                .find(|u| u.email == email && u.password == password)
                .cloned()
                .map_or(LoginOutcome::InvalidCredentials, LoginOutcome::Ok)
        }

        pub fn create_poem(&self, title: &str, user_id: i64) -> Poem {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut poems = self.poems.lock();
            let poem = Poem {
                id: poems.len() as i64 + 1,
                title: title.to_string(),
                user_id,
            };
            poems.push(poem.clone());
            poem
        }

        pub fn find_poem(&self, id: i64) -> Option<Poem> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.poems.lock().iter().find(|p| p.id == id).cloned()
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    pub struct AuthController {
        pub models: Arc<Models>,
    }

    impl AuthController {
        fn login_form(&self, req: &Request, res: &mut Response) -> HandlerResult {
            let error = req.search_params().get("error").map(str::to_string);
            Ok(res.send(
                Envelope::ok("getting form")
                    .with_template("LoginFormView")
                    .with_payload(json!({ "error": error })),
            )?)
        }

        fn register(&self, req: &Request, res: &mut Response) -> HandlerResult {
            let (Some(email), Some(password)) = (req.body_str("email"), req.body_str("password")) else {
                return Ok(res.send(
                    Envelope::bad_request("Missing email or password")
                        .with_redirect("/register?error=Missing email or password"),
                )?);
            };
            match self.models.register(email, password) {
                RegisterOutcome::Created(user) => Ok(res.send(
                    Envelope::new(StatusCode::Created, "User created")
                        .with_payload(json!({ "user": user })),
                )?),
                RegisterOutcome::DuplicateEmail => Ok(res.send(
                    Envelope::bad_request("User with this email already exists.")
                        .with_redirect("/register?error=User with this email already exists."),
                )?),
            }
        }

        fn login(&self, req: &Request, res: &mut Response) -> HandlerResult {
            let Some(email) = req.body_str("email") else {
                return Ok(res.send(
                    Envelope::bad_request("no email").with_redirect("/login?error=Email is required"),
                )?);
            };
            let password = req.body_str("password").unwrap_or_default();
            match self.models.login(email, password) {
                LoginOutcome::Ok(user) => {
                    let session = req.session();
                    session.set(KEY_IS_LOGGED_IN, true)?;
                    session.set(KEY_USER_ID, user.id)?;
                    session.set(KEY_IS_ADMIN, user.is_admin)?;
                    if req.body_field("remember").is_some() {
                        res.set_cookie(Cookie::new("email", email))?;
                    }
                    Ok(res.send(
                        Envelope::ok("Logged in successfully!")
                            .with_redirect("/poems")
                            .with_payload(json!({ "user": user })),
                    )?)
                }
                LoginOutcome::InvalidCredentials => Ok(res.send(
                    Envelope::bad_request("Invalid credentials.")
                        .with_redirect("/login?error=Invalid credentials."),
                )?),
            }
        }

        fn logout(&self, req: &Request, res: &mut Response) -> HandlerResult {
            req.session().destroy();
            Ok(res.send(Envelope::ok("User logged out").with_redirect("/"))?)
        }
    }

    impl Controller for AuthController {
        fn register_routes(self: Arc<Self>, router: &mut Router) {
            let this = Arc::clone(&self);
            router.get("/login", move |req: &Request, res: &mut Response| this.login_form(req, res));
            let this = Arc::clone(&self);
            router.post("/login", move |req: &Request, res: &mut Response| this.login(req, res));
            let this = Arc::clone(&self);
            router.post("/users", move |req: &Request, res: &mut Response| this.register(req, res));
            let this = self;
            router.get("/logout", move |req: &Request, res: &mut Response| this.logout(req, res));
        }
    }

    pub struct PoemController {
        pub models: Arc<Models>,
    }

    impl PoemController {
        fn new_form(&self, req: &Request, res: &mut Response) -> HandlerResult {
            if !req.session().is_logged_in() {
                return Ok(res.send(Envelope::unauthorized("Unauthorized").with_redirect("/login"))?);
            }
            Ok(res.send(Envelope::ok("New poem form").with_template("NewFormView"))?)
        }

        fn show(&self, req: &Request, res: &mut Response) -> HandlerResult {
            let Ok(id) = req.id() else {
                return Ok(res.send(Envelope::bad_request("Invalid ID"))?);
            };
            match self.models.find_poem(id) {
                Some(poem) => Ok(res.send(
                    Envelope::ok("Poem retrieved")
                        .with_template("PoemView")
                        .with_payload(json!({ "poem": poem })),
                )?),
                None => Ok(res.send(Envelope::not_found("Not found"))?),
            }
        }

        fn create(&self, req: &Request, res: &mut Response) -> HandlerResult {
            let session = req.session();
            let Some(user_id) = session.user_id().filter(|_| session.is_logged_in()) else {
                return Ok(res.send(Envelope::unauthorized("Unauthorized").with_redirect("/login"))?);
            };
            let Some(title) = req.body_str("title") else {
                return Ok(res.send(Envelope::bad_request("Request body must include title"))?);
            };
            let poem = self.models.create_poem(title, user_id);
            Ok(res.send(
                Envelope::new(StatusCode::Created, "Poem created successfully!")
                    .with_payload(json!({ "poem": poem })),
            )?)
        }

        fn delete_comment(&self, req: &Request, res: &mut Response) -> HandlerResult {
            let (Ok(poem_id), Ok(comment_id)) = (req.id(), req.comment_id()) else {
                return Ok(res.send(Envelope::bad_request("Invalid ID"))?);
            };
            Ok(res.send(
                Envelope::ok("Comment deleted successfully!")
                    .with_payload(json!({ "poemId": poem_id, "commentId": comment_id })),
            )?)
        }
    }

    impl Controller for PoemController {
        fn register_routes(self: Arc<Self>, router: &mut Router) {
            let this = Arc::clone(&self);
            router.get("/poems/new", move |req: &Request, res: &mut Response| this.new_form(req, res));
            let this = Arc::clone(&self);
            router.post("/poems", move |req: &Request, res: &mut Response| this.create(req, res));
            let this = Arc::clone(&self);
            router.delete("/poems/:id/comments/:id", move |req: &Request, res: &mut Response| {
                this.delete_comment(req, res)
            });
            let this = self;
            router.get("/poems/:id", move |req: &Request, res: &mut Response| this.show(req, res));
        }
    }

    /// A router with both controllers mounted on shared models.
    pub fn router(models: &Arc<Models>) -> Router {
        let mut router = Router::new();
        router
            .mount(Arc::new(AuthController {
                models: Arc::clone(models),
            }))
            .mount(Arc::new(PoemController {
                models: Arc::clone(models),
            }));
        router
    }
}
