//! Outbound request options
//!
//! Resolves where an attempt goes (target or upstream proxy) and which
//! headers it carries, for both listener modes.

use base64::Engine;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION, HOST, PROXY_AUTHORIZATION};
use http::{HeaderMap, Method, Uri};
use serde_json::{json, Map, Value};
use url::Url;

use crate::config::{Config, Scheme, UpstreamProxyConfig};
use crate::error::{DebuggerError, Result};
use crate::proxy::agent::Agent;

/// Debug header carrying the correlation id on every outbound request
pub const DEBUG_HEADER: &str = "x-requests-debugger";

/// `Basic <base64(user:pass)>`
pub fn basic_auth(user: &str, pass: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
    format!("Basic {}", encoded)
}

/// Value of `Proxy-Authorization` for the upstream proxy, if it has credentials
pub fn proxy_authorization(proxy: &UpstreamProxyConfig) -> Option<String> {
    proxy.credentials().map(|(user, pass)| basic_auth(user, pass))
}

/// Check if a header is a hop-by-hop header that should not be forwarded
pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Copy of `headers` without hop-by-hop headers
pub fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let mut copy = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop_header(name.as_str()) {
            copy.append(name.clone(), value.clone());
        }
    }
    copy
}

/// Headers as a JSON object for the request log; repeated headers are joined
pub fn headers_to_json(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        map.insert(name.as_str().to_string(), Value::String(joined));
    }
    Value::Object(map)
}

/// `user:pass` embedded in the authority of a request target
fn uri_credentials(uri: &Uri) -> Option<(String, String)> {
    let authority = uri.authority()?.as_str();
    let (userinfo, _) = authority.rsplit_once('@')?;
    let (user, pass) = userinfo.split_once(':').unwrap_or((userinfo, ""));
    Some((user.to_string(), pass.to_string()))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| DebuggerError::InvalidRequest(format!("invalid header value: {}", e)))
}

/// Everything needed to fire one outbound attempt
#[derive(Debug, Clone)]
pub struct OutboundRequestOptions {
    pub method: Method,
    /// Host the connection is opened to: the target, or the upstream proxy
    pub host: String,
    pub port: u16,
    /// Origin-form path, or the absolute URL when going through the upstream proxy
    pub path: String,
    pub headers: HeaderMap,
    pub agent: Agent,
    /// Absolute URL of the target
    pub url: Url,
}

impl OutboundRequestOptions {
    /// Options for a forward-proxy request; `uri` must be absolute-form
    pub fn forward(
        config: &Config,
        agent: Agent,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        correlation_id: &str,
    ) -> Result<Self> {
        if uri.scheme().is_none() || uri.host().is_none() {
            return Err(DebuggerError::InvalidRequest(format!(
                "proxy requests need an absolute URL, got '{}'",
                uri
            )));
        }

        let mut url = Url::parse(&uri.to_string())?;
        let credentials = uri_credentials(uri);
        if credentials.is_some() {
            let _ = url.set_username("");
            let _ = url.set_password(None);
        }

        Self::build(config, agent, method.clone(), url, end_to_end_headers(headers), credentials, correlation_id)
    }

    /// Options for a reverse-proxy request, always aimed at the hub.
    ///
    /// The port follows the configured scheme (80 or 443).
    pub fn reverse(
        config: &Config,
        agent: Agent,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        correlation_id: &str,
    ) -> Result<Self> {
        let scheme = config.scheme;
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let url = Url::parse(&format!(
            "{}://{}:{}{}",
            scheme,
            config.hub_host,
            scheme.default_port(),
            path
        ))?;

        let mut headers = end_to_end_headers(headers);
        headers.insert(HOST, header_value(&config.hub_host)?);

        Self::build(config, agent, method.clone(), url, headers, uri_credentials(uri), correlation_id)
    }

    fn build(
        config: &Config,
        agent: Agent,
        method: Method,
        url: Url,
        mut headers: HeaderMap,
        credentials: Option<(String, String)>,
        correlation_id: &str,
    ) -> Result<Self> {
        let target_host = url
            .host_str()
            .ok_or_else(|| DebuggerError::InvalidRequest(format!("no host in '{}'", url)))?
            .to_string();
        let target_port = url.port_or_known_default().unwrap_or(80);

        headers.insert(HeaderName::from_static(DEBUG_HEADER), header_value(correlation_id)?);
        if let Some((user, pass)) = credentials {
            headers.insert(AUTHORIZATION, header_value(&basic_auth(&user, &pass))?);
        }

        let proxy = match agent {
            Agent::Upstream => config.upstream_proxy.as_ref(),
            Agent::Direct => None,
        };

        let (host, port, path) = match proxy {
            Some(proxy) => {
                // Plain requests carry the header themselves; HTTPS authenticates the CONNECT.
                if url.scheme() == Scheme::Http.as_str() {
                    if let Some(auth) = proxy_authorization(proxy) {
                        headers.insert(PROXY_AUTHORIZATION, header_value(&auth)?);
                    }
                }
                (proxy.host.clone(), proxy.port, url.to_string())
            }
            None => {
                let mut path = url.path().to_string();
                if let Some(query) = url.query() {
                    path.push('?');
                    path.push_str(query);
                }
                (target_host, target_port, path)
            }
        };

        Ok(Self {
            method,
            host,
            port,
            path,
            headers,
            agent,
            url,
        })
    }

    /// Options as logged with every attempt
    pub fn to_json(&self) -> Value {
        json!({
            "method": self.method.as_str(),
            "host": self.host,
            "port": self.port,
            "path": self.path,
            "headers": headers_to_json(&self.headers),
        })
    }
}
