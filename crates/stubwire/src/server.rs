//! Default HTTP transport: a hyper listener that feeds decoded requests to
//! the engine and writes its responses back.
//!
//! The server owns a private tokio runtime so `start`/`stop` stay synchronous
//! for the caller; the engine itself never sees the runtime.

use crate::fields::FieldMap;
use crate::request::StubRequest;
use crate::transport::{RequestObserver, StubResponseProvider, StubTransport};
use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

struct Running {
    runtime: tokio::runtime::Runtime,
    shutdown_tx: broadcast::Sender<()>,
    local_addr: SocketAddr,
}

/// HTTP/1 stub server listening on a local port (an ephemeral one by
/// default).
pub struct HttpStubServer {
    bind_addr: SocketAddr,
    running: Option<Running>,
}

impl HttpStubServer {
    /// A server that binds an OS-assigned port on the loopback interface.
    pub fn new() -> Self {
        Self::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    /// A server that binds the given address.
    pub fn bind(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            running: None,
        }
    }
}

impl Default for HttpStubServer {
    fn default() -> Self {
        Self::new()
    }
}

impl StubTransport for HttpStubServer {
    fn start(
        &mut self,
        provider: Arc<dyn StubResponseProvider>,
        _observer: Arc<dyn RequestObserver>,
    ) -> anyhow::Result<()> {
        // The provider records every request it serves, so the observer
        // injection point stays unused here; wiring both would record twice.
        if self.running.is_some() {
            anyhow::bail!("the server is already running");
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .context("failed to build the server runtime")?;

        let listener = runtime
            .block_on(TcpListener::bind(self.bind_addr))
            .with_context(|| format!("failed to bind {}", self.bind_addr))?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, remote_addr)) => {
                                let provider = Arc::clone(&provider);
                                tokio::spawn(async move {
                                    let io = TokioIo::new(stream);
                                    let service = service_fn(move |req| {
                                        let provider = Arc::clone(&provider);
                                        async move {
                                            handle_request(req, provider, local_addr, remote_addr)
                                                .await
                                        }
                                    });
                                    if let Err(e) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!("connection error: {}", e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("stub server on {} shutting down", local_addr);
                        break;
                    }
                }
            }
        });

        debug!("stub server listening on {}", local_addr);
        self.running = Some(Running {
            runtime,
            shutdown_tx,
            local_addr,
        });
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        let running = self
            .running
            .take()
            .context("the server is not running")?;
        let _ = running.shutdown_tx.send(());
        running.runtime.shutdown_timeout(Duration::from_secs(5));
        Ok(())
    }

    fn port(&self) -> Option<u16> {
        self.running.as_ref().map(|r| r.local_addr.port())
    }
}

/// Decodes one hyper request into a [`StubRequest`], asks the engine for the
/// response and serializes it verbatim.
async fn handle_request(
    req: Request<Incoming>,
    provider: Arc<dyn StubResponseProvider>,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().to_string();
    let uri = req.uri().clone();

    let mut headers = FieldMap::new();
    for (name, value) in req.headers() {
        headers.append(
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }

    let encoding = headers
        .first_ignore_case("content-type")
        .and_then(charset_from_content_type);

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("failed to read the request body: {}", e);
            return Ok(plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to read the request body",
            ));
        }
    };

    let mut builder = StubRequest::builder()
        .method(method)
        .uri(uri)
        .headers(headers)
        .body(body)
        .local_addr(local_addr)
        .remote_addr(remote_addr);
    if let Some(encoding) = encoding {
        builder = builder.encoding(encoding);
    }
    let request = match builder.build() {
        Ok(request) => request,
        Err(e) => {
            warn!("failed to decode the request: {}", e);
            return Ok(plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to decode the request",
            ));
        }
    };

    let stub_response = provider.provide_stub_response(request);

    let status = StatusCode::from_u16(stub_response.status()).unwrap_or_else(|_| {
        warn!(status = stub_response.status(), "stub status is not a valid http status code");
        StatusCode::INTERNAL_SERVER_ERROR
    });
    let mut response = Response::builder().status(status);
    for (name, values) in stub_response.headers().iter() {
        for value in values {
            response = response.header(name, value.as_str());
        }
    }
    match response.body(Full::new(stub_response.body_bytes())) {
        Ok(response) => Ok(response),
        Err(e) => {
            warn!("failed to serialize the stub response: {}", e);
            Ok(plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to serialize the stub response",
            ))
        }
    }
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

/// Extracts the charset parameter from a Content-Type value, e.g.
/// `text/plain; charset=utf-8` -> `utf-8`.
fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}
