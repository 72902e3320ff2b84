//! Connection agent pool
//!
//! One keep-alive client talks to targets directly, a second one routes
//! everything through the upstream proxy. Both are built once at startup and
//! shared by every request and connectivity probe.

use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::{Client, Proxy};
use tracing::debug;

use crate::config::{Config, UpstreamProxyConfig};
use crate::error::{DebuggerError, Result};

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

/// Which client of the pool a request is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agent {
    Direct,
    Upstream,
}

pub struct AgentPool {
    direct: Client,
    upstream: Option<Client>,
}

fn base_builder() -> reqwest::ClientBuilder {
    Client::builder()
        .redirect(Policy::none())
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_keepalive(TCP_KEEPALIVE)
}

impl AgentPool {
    pub fn new(config: &Config) -> Result<Self> {
        let direct = base_builder().no_proxy().build()?;
        let upstream = config
            .upstream_proxy
            .as_ref()
            .map(Self::upstream_client)
            .transpose()?;

        Ok(Self { direct, upstream })
    }

    fn upstream_client(proxy: &UpstreamProxyConfig) -> Result<Client> {
        debug!("Building upstream proxy agent for {}", proxy.url());
        let mut upstream = Proxy::all(proxy.url())
            .map_err(|e| DebuggerError::InvalidConfig(format!("invalid upstream proxy: {}", e)))?;
        if let Some((user, pass)) = proxy.credentials() {
            upstream = upstream.basic_auth(user, pass);
        }
        Ok(base_builder().proxy(upstream).build()?)
    }

    /// Agent requests are bound to by default
    pub fn default_agent(&self) -> Agent {
        if self.upstream.is_some() {
            Agent::Upstream
        } else {
            Agent::Direct
        }
    }

    /// Client for `agent`, `None` when no upstream proxy is configured
    pub fn client(&self, agent: Agent) -> Option<&Client> {
        match agent {
            Agent::Direct => Some(&self.direct),
            Agent::Upstream => self.upstream.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["requests-debugger", "--logs-path", "/tmp/rd-test"];
        argv.extend_from_slice(args);
        Config::from_cli(Cli::try_parse_from(argv).unwrap()).unwrap()
    }

    #[test]
    fn test_direct_only_without_upstream_proxy() {
        let pool = AgentPool::new(&config(&[])).unwrap();
        assert_eq!(pool.default_agent(), Agent::Direct);
        assert!(pool.client(Agent::Direct).is_some());
        assert!(pool.client(Agent::Upstream).is_none());
    }

    #[test]
    fn test_upstream_agent_when_proxy_configured() {
        let pool = AgentPool::new(&config(&[
            "--proxy-host",
            "127.0.0.1",
            "--proxy-user",
            "user",
            "--proxy-pass",
            "pass",
        ]))
        .unwrap();
        assert_eq!(pool.default_agent(), Agent::Upstream);
        assert!(pool.client(Agent::Upstream).is_some());
    }
}
