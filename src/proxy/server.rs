//! Proxy server implementation using hyper
//!
//! One type serves both listeners. Forward mode relays absolute-form proxy
//! requests; reverse mode stands in for the hub and relays every request to it.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{DebuggerError, RelayError, Result};
use crate::logging::LogCategory;
use crate::proxy::agent::Agent;
use crate::proxy::envelope::ErrorEnvelope;
use crate::proxy::options::{headers_to_json, OutboundRequestOptions};
use crate::proxy::relay::{
    into_client_response, BoxError, InboundRequest, ProxyBody, RelayEngine, CLIENT_REQUEST_START,
    CLIENT_RESPONSE_END,
};

/// How a listener resolves the outbound target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    Forward,
    Reverse,
}

impl ProxyMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Forward => "Proxy",
            Self::Reverse => "Reverse Proxy",
        }
    }
}

pub struct ProxyServer {
    mode: ProxyMode,
    config: Arc<Config>,
    engine: Arc<RelayEngine>,
    agent: Agent,
    requests: AtomicU64,
}

fn full_body(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

impl ProxyServer {
    pub fn new(mode: ProxyMode, config: Arc<Config>, engine: Arc<RelayEngine>, agent: Agent) -> Self {
        Self {
            mode,
            config,
            engine,
            agent,
            requests: AtomicU64::new(0),
        }
    }

    /// Configured listen address of this listener
    pub fn addr(&self) -> String {
        match self.mode {
            ProxyMode::Forward => self.config.proxy_addr(),
            ProxyMode::Reverse => self.config.reverse_proxy_addr(),
        }
    }

    /// Bind the configured port
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr: SocketAddr = self
            .addr()
            .parse()
            .map_err(|e| DebuggerError::InvalidConfig(format!("invalid listen address: {}", e)))?;
        Ok(TcpListener::bind(addr).await?)
    }

    /// Run the proxy server on the configured port
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on `listener` until shutdown
    #[instrument(skip_all, fields(mode = self.mode.name()))]
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("{} server listening on {}", self.mode.name(), listener.local_addr()?);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let server = self.clone();
                            let mode = self.mode;
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream).await {
                                    debug!("Connection error from {}: {}", client_addr, e);
                                    LogCategory::Error.error(
                                        mode.name(),
                                        &format!("Connection from {} failed", client_addr),
                                        &json!({ "errorMessage": e.to_string() }),
                                        None,
                                    );
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("{} server shutting down", self.mode.name());
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a single connection
    async fn handle_connection(self: Arc<Self>, stream: TcpStream) -> Result<()> {
        let io = TokioIo::new(stream);
        let service = service_fn(move |req: Request<Incoming>| {
            let server = self.clone();
            async move { Ok::<_, Infallible>(server.handle(req).await) }
        });

        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(io, service)
            .await?;

        Ok(())
    }

    /// `<counter>::<uuid>`, unique per request of this listener
    fn next_correlation_id(&self) -> String {
        let count = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}::{}", count, Uuid::new_v4())
    }

    /// Relay one client request; always produces a response
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let correlation_id = self.next_correlation_id();
        let (parts, body) = req.into_parts();

        let target = match self.mode {
            ProxyMode::Forward => parts.uri.to_string(),
            ProxyMode::Reverse => {
                let host = parts
                    .headers
                    .get(HOST)
                    .and_then(|h| h.to_str().ok())
                    .unwrap_or_default();
                format!("http://{}{}", host, parts.uri)
            }
        };
        let description = format!("{} {}", parts.method, target);

        LogCategory::Requests.info(
            CLIENT_REQUEST_START,
            &description,
            &json!({ "headers": headers_to_json(&parts.headers) }),
            Some(&correlation_id),
        );

        if parts.method == Method::CONNECT {
            let err = DebuggerError::MethodNotAllowed("CONNECT tunnels are not supported".into());
            return Self::reject(err, &description, &correlation_id);
        }

        let options = match self.mode {
            ProxyMode::Forward => OutboundRequestOptions::forward(
                &self.config,
                self.agent,
                &parts.method,
                &parts.uri,
                &parts.headers,
                &correlation_id,
            ),
            ProxyMode::Reverse => OutboundRequestOptions::reverse(
                &self.config,
                self.agent,
                &parts.method,
                &parts.uri,
                &parts.headers,
                &correlation_id,
            ),
        };
        let options = match options {
            Ok(options) => options,
            Err(e) => return Self::reject(e, &description, &correlation_id),
        };

        let mut inbound = InboundRequest::new(parts.method, target, parts.headers, correlation_id, body);
        match self.engine.call(&mut inbound, &options).await {
            Ok(response) => into_client_response(response, &inbound, self.engine.request_timeout()),
            Err(err) => Self::error_response(err, &options, &inbound),
        }
    }

    /// Answer a request that could not be relayed at all
    fn reject(err: DebuggerError, description: &str, correlation_id: &str) -> Response<ProxyBody> {
        let status = err.status_code();
        LogCategory::Requests.error(
            CLIENT_RESPONSE_END,
            &format!("{}, Status Code: {}", description, status.as_u16()),
            &json!({ "errorMessage": err.to_string() }),
            Some(correlation_id),
        );

        let mut response = Response::new(full_body(err.to_string()));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        response
    }

    /// Envelope for a request whose attempts all failed
    fn error_response(
        err: RelayError,
        options: &OutboundRequestOptions,
        inbound: &InboundRequest,
    ) -> Response<ProxyBody> {
        let correlation_id = Some(inbound.correlation_id.as_str());
        LogCategory::Requests.error(
            err.topic(),
            &inbound.describe(),
            &json!({ "errorMessage": err.message() }),
            correlation_id,
        );

        let envelope = ErrorEnvelope::frame(&options.path, err.message());
        let status: StatusCode = envelope.status_code();
        let payload: Value = envelope.to_json();
        LogCategory::Requests.error(
            CLIENT_RESPONSE_END,
            &format!("{}, Status Code: {}", inbound.describe(), status.as_u16()),
            &payload,
            correlation_id,
        );

        let mut response = Response::new(full_body(payload.to_string()));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use crate::proxy::agent::AgentPool;
    use crate::proxy::diagnostics::Diagnostics;
    use clap::Parser;
    use http_body_util::Empty;
    use std::sync::Mutex;

    struct NoDiagnostics;

    impl Diagnostics for NoDiagnostics {
        fn on_retry(&self, _topic: &str, _correlation_id: &str) {}
    }

    #[derive(Debug, Clone, Default)]
    struct Seen {
        uri: String,
        host: Option<String>,
        proxy_authorization: Option<String>,
        debug_header: Option<String>,
        body: Bytes,
    }

    /// Plain hyper server answering `status` with a fixed body; also usable as
    /// an upstream proxy since it records the request line as received.
    async fn fake_upstream(status: u16) -> (SocketAddr, Arc<Mutex<Vec<Seen>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let record = record.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let record = record.clone();
                        async move {
                            let header = |name: &str| {
                                req.headers()
                                    .get(name)
                                    .and_then(|v| v.to_str().ok())
                                    .map(str::to_string)
                            };
                            let mut entry = Seen {
                                uri: req.uri().to_string(),
                                host: header("host"),
                                proxy_authorization: header("proxy-authorization"),
                                debug_header: header("x-requests-debugger"),
                                body: Bytes::new(),
                            };
                            entry.body = req.into_body().collect().await.unwrap().to_bytes();
                            record.lock().unwrap().push(entry);

                            let mut response = Response::new(Full::new(Bytes::from_static(b"upstream body")));
                            *response.status_mut() = StatusCode::from_u16(status).unwrap();
                            response
                                .headers_mut()
                                .insert("x-custom", HeaderValue::from_static("custom"));
                            Ok::<_, Infallible>(response)
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
        (addr, seen)
    }

    fn config(args: &[&str]) -> Arc<Config> {
        let mut argv = vec!["requests-debugger", "--logs-path", "/tmp/rd-test", "--retry-delay", "10"];
        argv.extend_from_slice(args);
        Arc::new(Config::from_cli(Cli::try_parse_from(argv).unwrap()).unwrap())
    }

    fn server(mode: ProxyMode, config: Arc<Config>) -> Arc<ProxyServer> {
        let pool = Arc::new(AgentPool::new(&config).unwrap());
        let agent = pool.default_agent();
        let engine = Arc::new(RelayEngine::new(
            pool,
            Arc::new(NoDiagnostics),
            config.retry.clone(),
            config.request_timeout,
        ));
        Arc::new(ProxyServer::new(mode, config, engine, agent))
    }

    /// Serve on an ephemeral port; the sender keeps the listener alive
    async fn start(server: Arc<ProxyServer>) -> (SocketAddr, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(server.serve(listener, rx));
        (addr, tx)
    }

    fn client_through(proxy: SocketAddr) -> reqwest::Client {
        reqwest::Client::builder()
            .proxy(reqwest::Proxy::http(format!("http://{}", proxy)).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_correlation_ids_are_sequential() {
        let server = server(ProxyMode::Forward, config(&[]));
        let first = server.next_correlation_id();
        let second = server.next_correlation_id();
        assert!(first.starts_with("1::"));
        assert!(second.starts_with("2::"));
        assert_ne!(first[3..], second[3..]);
    }

    #[tokio::test]
    async fn test_forward_passes_upstream_response_through() {
        for status in [200u16, 201, 404, 500] {
            let (upstream, seen) = fake_upstream(status).await;
            let (proxy, _shutdown) = start(server(ProxyMode::Forward, config(&[]))).await;

            let response = client_through(proxy)
                .post(format!("http://{}/wd/hub/session", upstream))
                .body("{\"capabilities\":{}}")
                .send()
                .await
                .unwrap();

            assert_eq!(response.status().as_u16(), status);
            assert_eq!(response.headers().get("x-custom").unwrap(), "custom");
            assert_eq!(response.text().await.unwrap(), "upstream body");

            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].uri, "/wd/hub/session");
            assert_eq!(seen[0].body.as_ref(), b"{\"capabilities\":{}}");
            assert!(seen[0].debug_header.as_deref().unwrap().starts_with("1::"));
        }
    }

    #[tokio::test]
    async fn test_forward_failure_returns_session_envelope() {
        // Bound then dropped: connections to it are refused.
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let (proxy, _shutdown) = start(server(ProxyMode::Forward, config(&[]))).await;

        let response = client_through(proxy)
            .get(format!("http://{}/wd/hub/session/abc123/element", closed))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 599);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["sessionId"], "abc123");
        assert_eq!(body["status"], 13);
        assert_eq!(body["state"], "error");
        assert_eq!(body["value"]["error"], "Request Failed At Requests Debugger");
    }

    #[tokio::test]
    async fn test_forward_failure_returns_plain_envelope() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let (proxy, _shutdown) = start(server(ProxyMode::Forward, config(&[]))).await;

        let response = client_through(proxy)
            .get(format!("http://{}/wd/hub/status", closed))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 599);
        let body: Value = response.json().await.unwrap();
        assert!(body.get("sessionId").is_none());
        assert!(body["message"]
            .as_str()
            .unwrap()
            .ends_with(". Request Failed At Requests Debugger"));
    }

    #[tokio::test]
    async fn test_forward_through_upstream_proxy() {
        let (upstream_proxy, seen) = fake_upstream(200).await;
        let port = upstream_proxy.port().to_string();
        let config = config(&[
            "--proxy-host",
            "127.0.0.1",
            "--proxy-port",
            &port,
            "--proxy-user",
            "user",
            "--proxy-pass",
            "pass",
        ]);
        let (proxy, _shutdown) = start(server(ProxyMode::Forward, config)).await;

        let response = client_through(proxy)
            .get("http://example.test/wd/hub/status")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].uri, "http://example.test/wd/hub/status");
        assert_eq!(seen[0].proxy_authorization.as_deref(), Some("Basic dXNlcjpwYXNz"));
    }

    #[tokio::test]
    async fn test_reverse_targets_hub_through_upstream_proxy() {
        let (upstream_proxy, seen) = fake_upstream(200).await;
        let port = upstream_proxy.port().to_string();
        let config = config(&["--scheme", "http", "--proxy-host", "127.0.0.1", "--proxy-port", &port]);
        let (reverse, _shutdown) = start(server(ProxyMode::Reverse, config)).await;

        let response = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap()
            .get(format!("http://{}/wd/hub/status", reverse))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "upstream body");

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0].uri,
            format!("http://{}/wd/hub/status", crate::config::HUB_HOST)
        );
        assert_eq!(seen[0].host.as_deref(), Some(crate::config::HUB_HOST));
        assert!(seen[0].proxy_authorization.is_none());
    }

    #[tokio::test]
    async fn test_connect_is_rejected() {
        let server = server(ProxyMode::Forward, config(&[]));
        let request = Request::builder()
            .method(Method::CONNECT)
            .uri("example.com:443")
            .body(Empty::<Bytes>::new())
            .unwrap();

        let response = server.handle(request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_forward_rejects_origin_form_requests() {
        let server = server(ProxyMode::Forward, config(&[]));
        let request = Request::builder()
            .uri("/wd/hub/status")
            .body(Empty::<Bytes>::new())
            .unwrap();

        let response = server.handle(request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
