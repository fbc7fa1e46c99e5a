//! Async TCP transport using Tokio.
//!
//! Accepts TCP connections, parses HTTP/1.1 requests and hands each one to
//! the [`ActionRegistry`] mounted under the longest matching path prefix.
//! Persistent connections (keep-alive) are supported.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task;
use tracing::{debug, error, info, warn};

use crate::exchange::RequestExchange;
use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::router::{ActionRegistry, INTERNAL_ERROR_MESSAGE};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no action registry mounted")]
    NothingMounted,
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

struct Mount {
    prefix: String,
    registry: Arc<ActionRegistry>,
}

impl Mount {
    fn covers(&self, path: &str) -> bool {
        self.prefix.is_empty()
            || path
                .strip_prefix(&self.prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

/// Registries by mount prefix.
#[derive(Default)]
struct Mounts(Vec<Mount>);

impl Mounts {
    fn add(&mut self, prefix: &str, registry: ActionRegistry) {
        registry.seal();
        let prefix = prefix.trim_end_matches('/').to_owned();
        self.0.retain(|mount| mount.prefix != prefix);
        self.0.push(Mount {
            prefix,
            registry: Arc::new(registry),
        });
        self.0.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
    }

    fn dispatch(&self, request: Request) -> Response {
        let Some(mount) = self.0.iter().find(|mount| mount.covers(request.path())) else {
            debug!(path = %request.path(), "no registry mounted for path");
            return Response::new(StatusCode::NotFound).body(format!(
                "No route for {} {}",
                request.method(),
                request.path()
            ));
        };

        let mut exchange = RequestExchange::mounted(request, &mount.prefix);
        let outcome = mount.registry.handle(&mut exchange);
        debug!(mount = %mount.prefix, ?outcome, "request dispatched");
        exchange.into_response()
    }
}

/// The actionroute HTTP server.
///
/// Binds to a TCP address and serves the action registries mounted on it.
///
/// # Examples
///
/// ```rust,no_run
/// use actionroute::router::ActionRegistry;
/// use actionroute::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let api = ActionRegistry::new();
///     Server::bind("127.0.0.1:8080").await?.mount("/api", api).run().await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    mounts: Mounts,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            mounts: Mounts::default(),
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves `registry` under `prefix` (`""` or `"/"` for the root).
    ///
    /// The registry is sealed here. The longest matching prefix wins, and the
    /// prefix is stripped from the path the registry matches against.
    #[must_use]
    pub fn mount(mut self, prefix: &str, registry: ActionRegistry) -> Self {
        info!(prefix, actions = registry.len(), "action registry mounted");
        self.mounts.add(prefix, registry);
        self
    }

    /// Starts accepting connections.
    ///
    /// Runs until the process is terminated or an unrecoverable listener
    /// error occurs.
    ///
    /// # Errors
    ///
    /// [`ServerError::NothingMounted`] without any mounted registry.
    pub async fn run(self) -> Result<(), ServerError> {
        if self.mounts.0.is_empty() {
            return Err(ServerError::NothingMounted);
        }
        let mounts = Arc::new(self.mounts);
        info!(address = %self.local_addr, "actionroute listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let mounts = Arc::clone(&mounts);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, mounts).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// Loops one request per iteration until the peer closes the connection or
/// asks for `Connection: close`.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    mounts: Arc<Mounts>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = stream.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large, sending 413");
            stream.write_all(&too_large().into_bytes()).await?;
            break;
        }

        let (request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            // Headers not complete yet.
            Err(RequestError::Incomplete) => continue,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        let content_length = request.content_length().unwrap_or(0);
        let total_needed = match body_offset.checked_add(content_length) {
            Some(total) if total <= MAX_REQUEST_SIZE => total,
            _ => {
                warn!(peer = %peer_addr, content_length, "declared body too large, sending 413");
                stream.write_all(&too_large().into_bytes()).await?;
                break;
            }
        };
        if buf.len() < total_needed {
            continue;
        }
        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        // Handlers are synchronous and may block.
        let dispatcher = Arc::clone(&mounts);
        let response = match task::spawn_blocking(move || dispatcher.dispatch(request)).await {
            Ok(response) => response,
            Err(e) => {
                error!(peer = %peer_addr, error = %e, "dispatch task failed");
                Response::new(StatusCode::InternalServerError).body(INTERNAL_ERROR_MESSAGE)
            }
        };
        let response = response.keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

fn too_large() -> Response {
    Response::new(StatusCode::PayloadTooLarge)
        .body("Request entity too large")
        .keep_alive(false)
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, mpsc};
    use std::time::Duration;

    use super::*;
    use crate::action::{Controller, Routes};
    use crate::error::ActionError;
    use crate::mapping::{ContentBody, PathParam};

    struct Echo;

    impl Echo {
        fn echo(&self, word: String) -> Result<String, ActionError> {
            Ok(word)
        }
    }

    impl Controller for Echo {
        fn routes(routes: &mut Routes<Self>) {
            routes
                .action("echo", Self::echo)
                .get("/echo/:word")
                .param(PathParam::named("word"))
                .returns(ContentBody::new());
        }
    }

    fn registry() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry.register_controller(Arc::new(Echo)).unwrap();
        registry
    }

    fn request(raw: &str) -> Request {
        Request::parse(raw.as_bytes()).unwrap().0
    }

    #[test]
    fn longest_prefix_wins() {
        let mut mounts = Mounts::default();
        mounts.add("/", registry());
        mounts.add("/api/", registry());

        let response = mounts.dispatch(request("GET /api/echo/hi HTTP/1.1\r\n\r\n"));
        assert_eq!(response.body_text(), "hi");

        let response = mounts.dispatch(request("GET /echo/root HTTP/1.1\r\n\r\n"));
        assert_eq!(response.body_text(), "root");
    }

    #[test]
    fn prefix_must_end_at_a_segment() {
        let mut mounts = Mounts::default();
        mounts.add("/api", registry());

        let response = mounts.dispatch(request("GET /apiary/echo/x HTTP/1.1\r\n\r\n"));
        assert_eq!(response.status(), StatusCode::NotFound);
        assert_eq!(response.body_text(), "No route for GET /apiary/echo/x");
    }

    #[test]
    fn mounting_seals_the_registry() {
        let mut mounts = Mounts::default();
        mounts.add("", registry());
        assert!(mounts.0[0].registry.is_sealed());
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let server = Server::bind("127.0.0.1:0").await.unwrap().mount("/api", registry());
        let addr = server.local_addr();
        let task = tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /api/echo/tcp HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        let text = String::from_utf8_lossy(&raw);

        assert!(text.starts_with("HTTP/1.1 200"), "{text}");
        assert!(text.ends_with("tcp"), "{text}");
        task.abort();
    }

    async fn roundtrip(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn oversized_content_length_is_413() {
        let server = Server::bind("127.0.0.1:0").await.unwrap().mount("", registry());
        let addr = server.local_addr();
        let task = tokio::spawn(server.run());

        for length in [u64::MAX.to_string(), (MAX_REQUEST_SIZE + 1).to_string()] {
            let text = roundtrip(
                addr,
                &format!("POST /echo/x HTTP/1.1\r\nHost: x\r\nContent-Length: {length}\r\n\r\n"),
            )
            .await;
            assert!(text.starts_with("HTTP/1.1 413"), "{text}");
        }
        task.abort();
    }

    struct Gate {
        opened: Mutex<mpsc::Sender<()>>,
        waiting: Mutex<mpsc::Receiver<()>>,
    }

    impl Gate {
        fn wait(&self) -> Result<&'static str, ActionError> {
            let waiting = self.waiting.lock().unwrap();
            waiting
                .recv_timeout(Duration::from_secs(5))
                .map(|()| "passed")
                .map_err(ActionError::internal)
        }

        fn open(&self) -> Result<&'static str, ActionError> {
            self.opened.lock().unwrap().send(()).map_err(ActionError::internal)?;
            Ok("opened")
        }
    }

    impl Controller for Gate {
        fn routes(routes: &mut Routes<Self>) {
            routes.action("wait", Self::wait).get("/wait").returns(ContentBody::new());
            routes.action("open", Self::open).get("/open").returns(ContentBody::new());
        }
    }

    // The default test runtime has a single thread.
    #[tokio::test]
    async fn blocking_handler_does_not_stall_other_connections() {
        let (opened, waiting) = mpsc::channel();
        let gate = Gate {
            opened: Mutex::new(opened),
            waiting: Mutex::new(waiting),
        };
        let mut gates = ActionRegistry::new();
        gates.register_controller(Arc::new(gate)).unwrap();

        let server = Server::bind("127.0.0.1:0").await.unwrap().mount("", gates);
        let addr = server.local_addr();
        let task = tokio::spawn(server.run());

        let waiter = tokio::spawn(roundtrip(
            addr,
            "GET /wait HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let opener = roundtrip(addr, "GET /open HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;

        assert!(opener.ends_with("opened"), "{opener}");
        let waited = waiter.await.unwrap();
        assert!(waited.starts_with("HTTP/1.1 200"), "{waited}");
        assert!(waited.ends_with("passed"), "{waited}");
        task.abort();
    }

    #[tokio::test]
    async fn run_requires_a_mount() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        assert!(matches!(server.run().await, Err(ServerError::NothingMounted)));
    }
}
