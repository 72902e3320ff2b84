use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

use crate::cli::Cli;
use crate::error::{DebuggerError, Result};

pub const DEFAULT_PROXY_PORT: u16 = 9687;
pub const DEFAULT_REVERSE_PROXY_PORT: u16 = 9688;
pub const DEFAULT_UPSTREAM_PROXY_PORT: u16 = 3128;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 50000;
pub const CONNECTIVITY_REQ_TIMEOUT_MS: u64 = 20000;
pub const MAX_RETRIES: u32 = 5;

pub const HUB_HOST: &str = "hub-cloud.browserstack.com";
pub const HUB_STATUS_URL: &str = "http://hub-cloud.browserstack.com/wd/hub/status";
pub const RAILS_HOST: &str = "automate.browserstack.com";
pub const RAILS_URL: &str = "http://automate.browserstack.com";

pub const LOGS_FOLDER: &str = "RequestsDebuggerLogs";

/// Scheme of the requests fired by the tool on behalf of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream (corporate) proxy the tool itself routes through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamProxyConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl UpstreamProxyConfig {
    /// `(username, password)` when both are present and non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = 1 + max_retries
    pub max_retries: u32,
    /// Fixed delay between two attempts
    pub delay: Duration,
}

/// Fixed endpoints probed by the connectivity checker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckEndpoints {
    /// Status endpoint, answers 200
    pub hub_status_url: String,
    /// Endpoint that always redirects; answers 301/302
    pub rails_url: String,
}

impl Default for CheckEndpoints {
    fn default() -> Self {
        Self {
            hub_status_url: HUB_STATUS_URL.to_string(),
            rails_url: RAILS_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory holding the flat log files
    pub directory: PathBuf,
    /// Remove existing log files before the loggers are opened
    pub delete_existing: bool,
    /// Console output format (json, pretty)
    pub format: String,
}

/// Read-only configuration context, built once at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub proxy_port: u16,
    pub reverse_proxy_port: u16,
    pub scheme: Scheme,
    pub upstream_proxy: Option<UpstreamProxyConfig>,
    pub retry: RetryPolicy,
    /// Hard timeout of every outbound relay attempt
    pub request_timeout: Duration,
    /// Timeout of every connectivity probe, never above `request_timeout`
    pub connectivity_timeout: Duration,
    /// Host the reverse proxy always targets
    pub hub_host: String,
    pub endpoints: CheckEndpoints,
    pub log: LogConfig,
}

impl Config {
    /// Build the configuration from parsed command line flags
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let upstream_proxy = cli.proxy_host.as_deref().map(str::trim).filter(|h| !h.is_empty()).map(
            |host| {
                // A password only makes sense with a username; a lone username gets an empty one.
                let (username, password) = match cli.proxy_user.clone() {
                    Some(user) => (Some(user), Some(cli.proxy_pass.clone().unwrap_or_default())),
                    None => (None, None),
                };
                UpstreamProxyConfig {
                    host: host.to_string(),
                    port: cli.proxy_port,
                    username,
                    password,
                }
            },
        );

        if cli.request_timeout == 0 {
            return Err(DebuggerError::InvalidConfig(
                "--request-timeout must be greater than 0".into(),
            ));
        }

        let base_path = match cli.logs_path {
            Some(path) => path,
            None => env::current_dir()?,
        };

        let config = Config {
            proxy_port: cli.port,
            reverse_proxy_port: cli.reverse_proxy_port,
            scheme: cli.scheme,
            upstream_proxy,
            retry: RetryPolicy {
                max_retries: MAX_RETRIES,
                delay: Duration::from_millis(cli.retry_delay),
            },
            request_timeout: Duration::from_millis(cli.request_timeout),
            connectivity_timeout: Duration::from_millis(
                CONNECTIVITY_REQ_TIMEOUT_MS.min(cli.request_timeout),
            ),
            hub_host: HUB_HOST.to_string(),
            endpoints: CheckEndpoints::default(),
            log: LogConfig {
                directory: base_path.join(LOGS_FOLDER),
                delete_existing: cli.del_logs,
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.proxy_port == self.reverse_proxy_port {
            return Err(DebuggerError::InvalidConfig(format!(
                "proxy and reverse proxy cannot share port {}",
                self.proxy_port
            )));
        }
        if let Some(proxy) = &self.upstream_proxy {
            if proxy.port == 0 {
                return Err(DebuggerError::InvalidConfig(
                    "--proxy-port must be a valid port number".into(),
                ));
            }
        }
        Ok(())
    }

    /// Get the forward proxy listen address
    pub fn proxy_addr(&self) -> String {
        format!("0.0.0.0:{}", self.proxy_port)
    }

    /// Get the reverse proxy listen address
    pub fn reverse_proxy_addr(&self) -> String {
        format!("0.0.0.0:{}", self.reverse_proxy_port)
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
