//! Requests Debugger
//!
//! A debugging proxy that sits between a test client and the remote hub.
//!
//! ## Features
//!
//! - Forward proxy and reverse proxy listeners sharing one relay core
//! - Optional upstream proxy with basic authentication
//! - Full request/response logging to flat files, keyed by correlation id
//! - Fixed-delay retries replaying the buffered request body
//! - WebDriver-compatible error envelopes when the remote is unreachable
//! - Connectivity checks and host stats at startup and on every retry

pub mod cli;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod format;
pub mod logging;
pub mod proxy;
pub mod stats;

pub use config::Config;
pub use error::{DebuggerError, RelayError, Result};
