//! Request relay with retries
//!
//! The client body is read exactly once. While it streams to the first
//! outbound attempt every chunk is also buffered, and later attempts replay
//! that buffer. Backpressure comes from the bounded channel between the
//! inbound body and the outbound request.

use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Body, Frame};
use hyper::{HeaderMap, Method, Response};
use pin_project_lite::pin_project;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, instrument};

use crate::config::RetryPolicy;
use crate::error::{DebuggerError, RelayError};
use crate::logging::LogCategory;
use crate::proxy::agent::AgentPool;
use crate::proxy::diagnostics::Diagnostics;
use crate::proxy::options::{headers_to_json, is_hop_by_hop_header, OutboundRequestOptions};

pub type BoxError = Box<dyn StdError + Send + Sync>;
/// Body type flowing in and out of the listeners
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

/// Chunks in flight between the client body and the outbound request
const PUMP_CAPACITY: usize = 8;

pub const CLIENT_REQUEST_START: &str = "CLIENT REQUEST START";
pub const CLIENT_REQUEST_END: &str = "CLIENT REQUEST END";
pub const CLIENT_RESPONSE_END: &str = "CLIENT RESPONSE END";

pub fn tool_request_topic(retries: u32) -> String {
    format!("TOOL REQUEST - RETRIES LEFT: {}", retries)
}

pub fn client_request_topic(retries: u32) -> String {
    format!("CLIENT REQUEST - RETRIES LEFT: {}", retries)
}

/// Attempts left for one inbound request, always within `[0, max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    remaining: u32,
    max: u32,
}

impl RetryState {
    pub fn new(max: u32) -> Self {
        Self { remaining: max, max }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_first_attempt(&self) -> bool {
        self.remaining == self.max
    }

    pub fn has_retries(&self) -> bool {
        self.remaining > 0
    }

    pub fn consume(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }
}

enum RequestBody {
    Streaming(ProxyBody),
    Buffered(Bytes),
}

/// A client request as received by a listener
pub struct InboundRequest {
    pub method: Method,
    /// Target as shown in the logs
    pub target: String,
    pub headers: HeaderMap,
    pub correlation_id: String,
    body: RequestBody,
}

impl InboundRequest {
    pub fn new<B>(
        method: Method,
        target: impl Into<String>,
        headers: HeaderMap,
        correlation_id: impl Into<String>,
        body: B,
    ) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self {
            method,
            target: target.into(),
            headers,
            correlation_id: correlation_id.into(),
            body: RequestBody::Streaming(body.map_err(Into::into).boxed_unsync()),
        }
    }

    /// `METHOD target`, the message of every request log line
    pub fn describe(&self) -> String {
        format!("{} {}", self.method, self.target)
    }

    /// Body collected so far; empty until the client stream was consumed
    pub fn buffered_body(&self) -> Option<&Bytes> {
        match &self.body {
            RequestBody::Buffered(bytes) => Some(bytes),
            RequestBody::Streaming(_) => None,
        }
    }
}

/// Context for the request log lines written once the client body is complete
struct AttemptLog {
    correlation_id: String,
    description: String,
    options: Value,
    retries: u32,
}

impl AttemptLog {
    fn client_request_end(&self, body: &Bytes) {
        LogCategory::Requests.info(
            CLIENT_REQUEST_END,
            &self.description,
            &json!({ "data": String::from_utf8_lossy(body) }),
            Some(&self.correlation_id),
        );
    }

    fn tool_request(&self, body: &Bytes) {
        let mut payload = self.options.clone();
        if let Value::Object(map) = &mut payload {
            map.insert("data".to_string(), Value::String(String::from_utf8_lossy(body).into_owned()));
        }
        LogCategory::Requests.info(
            &tool_request_topic(self.retries),
            &self.description,
            &payload,
            Some(&self.correlation_id),
        );
    }
}

/// Forward the client body into `tx` while buffering it.
///
/// Once the outbound side is gone the body is still drained into the buffer,
/// so a retry can replay it in full.
async fn pump(
    mut body: ProxyBody,
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
    log: AttemptLog,
) -> Result<Bytes, String> {
    let mut buffer = BytesMut::new();
    let mut forwarding = true;

    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Ok(chunk) = frame.into_data() {
                    buffer.extend_from_slice(&chunk);
                    if forwarding && tx.send(Ok(chunk)).await.is_err() {
                        forwarding = false;
                    }
                }
            }
            Err(e) => {
                let message = e.to_string();
                let _ = tx.try_send(Err(io::Error::other(message.clone())));
                return Err(message);
            }
        }
    }

    let body = buffer.freeze();
    log.client_request_end(&body);
    log.tool_request(&body);
    Ok(body)
}

pub struct RelayEngine {
    pool: Arc<AgentPool>,
    diagnostics: Arc<dyn Diagnostics>,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl RelayEngine {
    pub fn new(
        pool: Arc<AgentPool>,
        diagnostics: Arc<dyn Diagnostics>,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            diagnostics,
            retry,
            request_timeout,
        }
    }

    /// Deadline for each attempt, also applied between response body chunks
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Relay with retries.
    ///
    /// Transport failures are retried after a fixed delay until the policy is
    /// exhausted; a failing client stream ends the exchange at once.
    #[instrument(skip_all, fields(correlation_id = %inbound.correlation_id))]
    pub async fn call(
        &self,
        inbound: &mut InboundRequest,
        options: &OutboundRequestOptions,
    ) -> Result<reqwest::Response, RelayError> {
        let mut retry = RetryState::new(self.retry.max_retries);
        loop {
            match self.relay(inbound, options, &retry).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && retry.has_retries() => {
                    self.diagnostics.on_retry(err.topic(), &inbound.correlation_id);
                    LogCategory::Requests.error(
                        err.topic(),
                        &inbound.describe(),
                        &json!({ "errorMessage": err.message() }),
                        Some(&inbound.correlation_id),
                    );
                    debug!("Attempt failed: {}, retrying in {:?}", err, self.retry.delay);
                    tokio::time::sleep(self.retry.delay).await;
                    retry.consume();
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One outbound attempt
    pub async fn relay(
        &self,
        inbound: &mut InboundRequest,
        options: &OutboundRequestOptions,
        retry: &RetryState,
    ) -> Result<reqwest::Response, RelayError> {
        let retries = retry.remaining();
        let tool_topic = tool_request_topic(retries);

        let client = self
            .pool
            .client(options.agent)
            .ok_or_else(|| RelayError::transport(DebuggerError::UpstreamProxyMissing.to_string(), &tool_topic))?;
        let request = client
            .request(options.method.clone(), options.url.clone())
            .headers(options.headers.clone());

        let log = AttemptLog {
            correlation_id: inbound.correlation_id.clone(),
            description: inbound.describe(),
            options: options.to_json(),
            retries,
        };

        let streaming = match std::mem::replace(&mut inbound.body, RequestBody::Buffered(Bytes::new())) {
            RequestBody::Streaming(body) if !body.is_end_stream() => Some(body),
            RequestBody::Streaming(_) => None,
            RequestBody::Buffered(bytes) => {
                inbound.body = RequestBody::Buffered(bytes);
                None
            }
        };

        let Some(body) = streaming else {
            let buffered = inbound.buffered_body().cloned().unwrap_or_default();
            // A body that ended before the first attempt is complete right away.
            if retry.is_first_attempt() {
                log.client_request_end(&buffered);
            }
            log.tool_request(&buffered);
            return self.send(request.body(buffered), &tool_topic).await;
        };

        let (tx, rx) = mpsc::channel(PUMP_CAPACITY);
        let mut pump: JoinHandle<Result<Bytes, String>> = tokio::spawn(pump(body, tx, log));

        let send = self.send(
            request.body(reqwest::Body::wrap_stream(ReceiverStream::new(rx))),
            &tool_topic,
        );
        tokio::pin!(send);

        let client_topic = client_request_topic(retries);
        let mut pumped = false;
        let outcome = loop {
            tokio::select! {
                outcome = &mut send => break outcome,
                joined = &mut pump, if !pumped => {
                    match joined {
                        Ok(Ok(bytes)) => {
                            inbound.body = RequestBody::Buffered(bytes);
                            pumped = true;
                        }
                        Ok(Err(message)) => return Err(RelayError::client_stream(message, client_topic)),
                        Err(e) => return Err(RelayError::client_stream(e.to_string(), client_topic)),
                    }
                }
            }
        };

        match outcome {
            // The pump keeps running detached and logs the end of the client body.
            Ok(response) => Ok(response),
            Err(err) if pumped => Err(err),
            Err(err) => match pump.await {
                Ok(Ok(bytes)) => {
                    inbound.body = RequestBody::Buffered(bytes);
                    Err(err)
                }
                Ok(Err(message)) => Err(RelayError::client_stream(message, client_topic)),
                Err(e) => Err(RelayError::client_stream(e.to_string(), client_topic)),
            },
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, topic: &str) -> Result<reqwest::Response, RelayError> {
        match tokio::time::timeout(self.request_timeout, request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(RelayError::transport(describe_reqwest_error(&e), topic)),
            Err(_) => Err(RelayError::transport(timeout_message(self.request_timeout), topic)),
        }
    }
}

pub fn timeout_message(timeout: Duration) -> String {
    format!("Request Timed Out. Did not get any response for {} ms.", timeout.as_millis())
}

/// reqwest error with its source chain, which holds the actual cause
fn describe_reqwest_error(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Context for the log line written once the response body has been sent
pub struct ResponseLog {
    pub correlation_id: String,
    pub description: String,
    pub headers: Value,
}

pin_project! {
    /// Streams the upstream body to the client while recording it for the log.
    ///
    /// The stream fails once the upstream stays silent for `read_timeout`.
    pub struct RecordedBody<S> {
        #[pin]
        inner: S,
        #[pin]
        idle: Sleep,
        read_timeout: Duration,
        recorded: BytesMut,
        log: Option<ResponseLog>,
    }
}

impl<S> RecordedBody<S> {
    pub fn new(inner: S, log: ResponseLog, read_timeout: Duration) -> Self {
        Self {
            inner,
            idle: tokio::time::sleep(read_timeout),
            read_timeout,
            recorded: BytesMut::new(),
            log: Some(log),
        }
    }
}

impl ResponseLog {
    fn failed(&self, message: &str) {
        LogCategory::Requests.error(
            CLIENT_RESPONSE_END,
            &self.description,
            &json!({ "errorMessage": message, "headers": self.headers }),
            Some(&self.correlation_id),
        );
    }
}

impl<S, E> Stream for RecordedBody<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    type Item = Result<Frame<Bytes>, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        // Already ended
        let Some(log) = this.log.as_ref() else {
            return Poll::Ready(None);
        };

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.recorded.extend_from_slice(&chunk);
                let deadline = Instant::now() + *this.read_timeout;
                this.idle.as_mut().reset(deadline);
                Poll::Ready(Some(Ok(Frame::data(chunk))))
            }
            Poll::Ready(Some(Err(e))) => {
                let e = e.into();
                log.failed(&e.to_string());
                *this.log = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                LogCategory::Requests.info(
                    CLIENT_RESPONSE_END,
                    &log.description,
                    &json!({
                        "data": String::from_utf8_lossy(this.recorded),
                        "headers": log.headers,
                    }),
                    Some(&log.correlation_id),
                );
                *this.log = None;
                Poll::Ready(None)
            }
            Poll::Pending => {
                ready!(this.idle.poll(cx));
                let message = timeout_message(*this.read_timeout);
                log.failed(&message);
                *this.log = None;
                Poll::Ready(Some(Err(io::Error::new(io::ErrorKind::TimedOut, message).into())))
            }
        }
    }
}

/// Turn the upstream response into the client response, streaming its body
pub fn into_client_response(
    response: reqwest::Response,
    inbound: &InboundRequest,
    read_timeout: Duration,
) -> Response<ProxyBody> {
    let status = response.status();
    let headers = response.headers().clone();

    let log = ResponseLog {
        correlation_id: inbound.correlation_id.clone(),
        description: format!("{}, Status Code: {}", inbound.describe(), status.as_u16()),
        headers: headers_to_json(&headers),
    };
    let body = StreamBody::new(RecordedBody::new(response.bytes_stream(), log, read_timeout)).boxed_unsync();

    let mut client_response = Response::new(body);
    *client_response.status_mut() = status;
    for (name, value) in &headers {
        if !is_hop_by_hop_header(name.as_str()) {
            client_response.headers_mut().append(name.clone(), value.clone());
        }
    }
    client_response
}
