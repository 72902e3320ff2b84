//! Command line surface
//!
//! Flags only; validation and defaults that depend on other flags live in
//! [`crate::config::Config::from_cli`].

use std::path::PathBuf;

use clap::Parser;

use crate::config::{
    Scheme, DEFAULT_PROXY_PORT, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RETRY_DELAY_MS,
    DEFAULT_REVERSE_PROXY_PORT, DEFAULT_UPSTREAM_PROXY_PORT,
};

#[derive(Parser, Debug, Clone)]
#[command(name = "requests-debugger", version)]
#[command(
    about = "Requests Debugger - a proxy for debugging request failures leading to dropped requests \
             or not being able to reach the remote hub"
)]
pub struct Cli {
    /// Port of the forward proxy the client is pointed at
    #[arg(long, env = "RD_PROXY_PORT", default_value_t = DEFAULT_PROXY_PORT)]
    pub port: u16,

    /// Port of the reverse proxy that stands in for the hub
    #[arg(long, env = "RD_REVERSE_PROXY_PORT", default_value_t = DEFAULT_REVERSE_PROXY_PORT)]
    pub reverse_proxy_port: u16,

    /// Scheme used for requests fired on behalf of the client
    #[arg(long, value_enum, default_value_t = Scheme::Https)]
    pub scheme: Scheme,

    /// Hostname of the upstream proxy required to reach the remote
    #[arg(long, value_name = "HOSTNAME")]
    pub proxy_host: Option<String>,

    /// Port of the upstream proxy
    #[arg(long, value_name = "PORT", default_value_t = DEFAULT_UPSTREAM_PROXY_PORT)]
    pub proxy_port: u16,

    /// Username for the upstream proxy
    #[arg(long, value_name = "USERNAME")]
    pub proxy_user: Option<String>,

    /// Password for the upstream proxy
    #[arg(long, value_name = "PASSWORD")]
    pub proxy_pass: Option<String>,

    /// Delay in milliseconds between two attempts of a failed request
    #[arg(long, value_name = "MS", default_value_t = DEFAULT_RETRY_DELAY_MS)]
    pub retry_delay: u64,

    /// Hard timeout in milliseconds for every request fired by the tool
    #[arg(long, value_name = "MS", default_value_t = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub request_timeout: u64,

    /// Directory in which the logs folder is created (defaults to the working directory)
    #[arg(long, value_name = "PATH")]
    pub logs_path: Option<PathBuf>,

    /// Delete existing log files before starting
    #[arg(long)]
    pub del_logs: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_proxy_flags() {
        let cli = Cli::try_parse_from([
            "requests-debugger",
            "--proxy-host",
            "host",
            "--proxy-port",
            "9687",
            "--proxy-user",
            "user",
            "--proxy-pass",
            "pass",
        ])
        .unwrap();

        assert_eq!(cli.proxy_host.as_deref(), Some("host"));
        assert_eq!(cli.proxy_port, 9687);
        assert_eq!(cli.proxy_user.as_deref(), Some("user"));
        assert_eq!(cli.proxy_pass.as_deref(), Some("pass"));
    }

    #[test]
    fn test_defaults_without_flags() {
        let cli = Cli::try_parse_from(["requests-debugger"]).unwrap();
        assert_eq!(cli.proxy_port, DEFAULT_UPSTREAM_PROXY_PORT);
        assert_eq!(cli.scheme, Scheme::Https);
        assert_eq!(cli.retry_delay, DEFAULT_RETRY_DELAY_MS);
        assert_eq!(cli.request_timeout, DEFAULT_REQUEST_TIMEOUT_MS);
        assert!(!cli.del_logs);
        assert!(cli.proxy_host.is_none());
    }

    #[test]
    fn test_rejects_unknown_arguments() {
        assert!(Cli::try_parse_from(["requests-debugger", "--bogus"]).is_err());
    }

    #[test]
    fn test_parses_scheme_and_del_logs() {
        let cli =
            Cli::try_parse_from(["requests-debugger", "--scheme", "http", "--del-logs"]).unwrap();
        assert_eq!(cli.scheme, Scheme::Http);
        assert!(cli.del_logs);
    }
}
