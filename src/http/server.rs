//! Routing table and TCP listener.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::request::{read_request, HttpRequest, Method};

/// What a route handler returns: the complete response bytes (status line,
/// headers, body) written verbatim to the connection.
pub type HandlerResult = Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;

/// A route handler.
pub type RouteHandler = Arc<dyn Fn(&HttpRequest) -> HandlerResult + Send + Sync>;

/// Exact (path, method) routing, registered once at startup.
#[derive(Default)]
pub struct Router {
    routes: HashMap<(String, Method), RouteHandler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a path and method.
    pub fn add_route(&mut self, path: impl Into<String>, method: Method, handler: RouteHandler) {
        self.routes.insert((path.into(), method), handler);
    }

    /// Resolve a request to a handler.
    ///
    /// Unmatched GETs fall back to the root handler: the captive-portal
    /// catch-all that steers OS connectivity probes to the form.
    fn resolve(&self, request: &HttpRequest) -> Option<&RouteHandler> {
        let exact = self
            .routes
            .get(&(request.path.clone(), request.method.clone()));
        match exact {
            Some(handler) => Some(handler),
            None if request.method == Method::Get => {
                self.routes.get(&("/".to_string(), Method::Get))
            }
            None => None,
        }
    }
}

/// Minimal HTTP/1.1 listener: one request per connection, no keep-alive.
pub struct HttpServer {
    router: Arc<Router>,
    local_addr: Option<SocketAddr>,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

impl HttpServer {
    /// Server around a fully-registered routing table.
    pub fn new(router: Router) -> Self {
        Self {
            router: Arc::new(router),
            local_addr: None,
            running: None,
        }
    }

    /// Bind and start accepting. Idempotent; returns the bound address.
    pub async fn start(&mut self, host: &str, port: u16) -> std::io::Result<SocketAddr> {
        if let (Some(addr), Some(_)) = (self.local_addr, self.running.as_ref()) {
            return Ok(addr);
        }
        let listener = TcpListener::bind((host, port)).await?;
        let addr = listener.local_addr()?;
        self.local_addr = Some(addr);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(listener, self.router.clone(), cancel.clone()));
        self.running = Some((cancel, task));
        info!("HTTP server started on {}", addr);
        Ok(addr)
    }

    /// Cancel the accept loop and close the listener. Idempotent.
    pub fn stop(&mut self) {
        if let Some((cancel, _task)) = self.running.take() {
            cancel.cancel();
            self.local_addr = None;
            info!("HTTP server stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address the listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(listener: TcpListener, router: Arc<Router>, cancel: CancellationToken) {
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Connection from {}", peer);
                    stream
                }
                Err(e) => {
                    // Transient accept errors: log, back off, keep listening
                    warn!("Accept error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            },
        };
        tokio::spawn(handle_client(stream, router.clone()));
    }
}

/// Serve one request, then close; the connection is torn down on every path.
async fn handle_client(stream: TcpStream, router: Arc<Router>) {
    let mut stream = stream;
    let mut reader = BufReader::new(&mut stream);

    let request = match read_request(&mut reader).await {
        Ok(Some(request)) => request,
        Ok(None) => return,
        Err(e) => {
            debug!("Client read error: {}", e);
            return;
        }
    };

    let response = match router.resolve(&request) {
        Some(handler) => match handler(&request) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Handler error ({} {}): {}", request.method, request.path, e);
                return;
            }
        },
        None => b"HTTP/1.1 404 Not Found\r\n\r\nNot Found".to_vec(),
    };

    if let Err(e) = stream.write_all(&response).await {
        debug!("Client write error: {}", e);
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn text_handler(text: &'static str) -> RouteHandler {
        Arc::new(move |_request| {
            Ok(format!("HTTP/1.1 200 OK\r\n\r\n{}", text).into_bytes())
        })
    }

    async fn started_server(router: Router) -> (HttpServer, SocketAddr) {
        let mut server = HttpServer::new(router);
        let addr = server.start("127.0.0.1", 0).await.unwrap();
        (server, addr)
    }

    async fn roundtrip(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_exact_route_match() {
        let mut router = Router::new();
        router.add_route("/", Method::Get, text_handler("root"));
        router.add_route("/status", Method::Get, text_handler("status"));
        let (_server, addr) = started_server(router).await;

        let response = roundtrip(addr, "GET /status HTTP/1.1\r\n\r\n").await;
        assert!(response.ends_with("status"));
    }

    #[tokio::test]
    async fn test_unmatched_get_falls_back_to_root() {
        let mut router = Router::new();
        router.add_route("/", Method::Get, text_handler("portal"));
        let (_server, addr) = started_server(router).await;

        let direct = roundtrip(addr, "GET / HTTP/1.1\r\n\r\n").await;
        let fallback = roundtrip(addr, "GET /random-unmatched-path HTTP/1.1\r\n\r\n").await;
        assert_eq!(direct, fallback);
    }

    #[tokio::test]
    async fn test_unmatched_post_is_404() {
        let mut router = Router::new();
        router.add_route("/", Method::Get, text_handler("portal"));
        let (_server, addr) = started_server(router).await;

        let response = roundtrip(addr, "POST /missing HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn test_handler_error_closes_connection() {
        let mut router = Router::new();
        router.add_route(
            "/boom",
            Method::Get,
            Arc::new(|_| Err("template machinery on fire".into())),
        );
        router.add_route("/", Method::Get, text_handler("portal"));
        let (_server, addr) = started_server(router).await;

        // The erroring route yields no bytes; the server stays up
        let response = roundtrip(addr, "GET /boom HTTP/1.1\r\n\r\n").await;
        assert!(response.is_empty());
        let response = roundtrip(addr, "GET / HTTP/1.1\r\n\r\n").await;
        assert!(response.ends_with("portal"));
    }

    #[tokio::test]
    async fn test_stop_refuses_new_connections() {
        let mut router = Router::new();
        router.add_route("/", Method::Get, text_handler("portal"));
        let (mut server, addr) = started_server(router).await;
        server.stop();
        // Give the accept loop a moment to wind down
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_start_idempotent() {
        let mut router = Router::new();
        router.add_route("/", Method::Get, text_handler("portal"));
        let (mut server, addr) = started_server(router).await;
        let again = server.start("127.0.0.1", 0).await.unwrap();
        assert_eq!(addr, again);
    }
}
