use super::request::RawRequest;
use super::response::HttpReply;
use super::wire::{serve_connection, ConnectionLimits};
use may::coroutine::{self, JoinHandle};
use may::net::TcpListener;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

/// Turns one raw exchange into one reply.
///
/// Implementations are cloned into every connection coroutine.
pub trait HttpService: Clone + Send + Sync + 'static {
    fn call(&self, req: RawRequest) -> HttpReply;
}

/// HTTP/1.1 server running one `may` coroutine per connection.
pub struct HttpServer<T> {
    service: T,
    limits: ConnectionLimits,
}

/// Handle to a running HTTP server
///
/// Provides methods for waiting until the server is ready, stopping it gracefully,
/// or joining the accept coroutine.
pub struct ServerHandle {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound address; with port 0 this is the port actually chosen.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the server to be ready to accept connections
    ///
    /// Polls the server address by attempting TCP connections until successful.
    ///
    /// # Errors
    ///
    /// Returns `TimedOut` error if the server doesn't become ready within ~250ms (50 attempts × 5ms).
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    ///
    /// Connections already being served run to completion.
    pub fn stop(self) {
        // SAFETY: cancel() is unsafe in may because cancellation unwinds the
        // target coroutine at its next yield point. The accept loop holds no
        // locks or partially written state across `accept`, so unwinding it is
        // sound.
        unsafe {
            self.handle.coroutine().cancel();
        }
        let _ = self.handle.join();
        info!(addr = %self.addr, "Server stopped");
    }

    /// Block until the accept loop finishes.
    ///
    /// # Errors
    ///
    /// Returns an error if the accept coroutine panicked.
    pub fn join(self) -> std::thread::Result<()> {
        self.handle.join()
    }
}

impl<T: HttpService> HttpServer<T> {
    pub fn new(service: T) -> Self {
        Self {
            service,
            limits: ConnectionLimits::default(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ConnectionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Bind `addr` and start accepting connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid, the port cannot be bound or
    /// the accept coroutine cannot be spawned.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let listener = TcpListener::bind(addr)?;
        let addr = listener.local_addr()?;
        let Self { service, limits } = self;

        info!(
            addr = %addr,
            stack_size = limits.stack_size,
            max_body_bytes = limits.max_body_bytes,
            read_timeout_ms = limits.read_timeout.map(|d| d.as_millis() as u64),
            "HTTP server listening"
        );

        // SAFETY: Builder::spawn is unsafe because a coroutine stack that is
        // too small overflows without a guard page check. The accept loop only
        // calls `accept` and spawns; it uses far less than the configured size.
        let handle = unsafe {
            coroutine::Builder::new()
                .name("stanza-accept".to_string())
                .stack_size(limits.stack_size)
                .spawn(move || accept_loop(&listener, &service, limits))
        }?;
        Ok(ServerHandle { addr, handle })
    }
}

fn accept_loop<T: HttpService>(listener: &TcpListener, service: &T, limits: ConnectionLimits) {
    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                error!(error = %err, "Accept failed");
                continue;
            }
        };
        let peer = stream.peer_addr().ok();
        if let Err(err) = stream.set_read_timeout(limits.read_timeout) {
            error!(error = %err, "Failed to set read timeout");
            continue;
        }
        debug!(peer = ?peer, "Connection accepted");

        let service = service.clone();
        // SAFETY: see `HttpServer::start`. Connection coroutines run handler
        // code; `stack_size` is the operator-configured bound for it.
        let spawned = unsafe {
            coroutine::Builder::new()
                .stack_size(limits.stack_size)
                .spawn(move || {
                    serve_connection(&mut stream, &service, &limits);
                    debug!(peer = ?peer, "Connection finished");
                })
        };
        if let Err(err) = spawned {
            error!(peer = ?peer, error = %err, "Failed to spawn connection coroutine");
        }
    }
}
