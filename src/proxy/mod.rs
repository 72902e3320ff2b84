//! Proxy listeners and the relay core
//!
//! This module provides:
//! - Forward and reverse proxy listeners
//! - Outbound request options per listener mode
//! - The relay engine with buffered replay and fixed-delay retries
//! - The keep-alive agent pool, direct or through the upstream proxy
//! - Error envelopes and retry diagnostics

pub mod agent;
pub mod diagnostics;
pub mod envelope;
pub mod options;
pub mod relay;
pub mod server;

pub use agent::{Agent, AgentPool};
pub use diagnostics::{Diagnostics, RetryDiagnostics};
pub use envelope::ErrorEnvelope;
pub use options::OutboundRequestOptions;
pub use relay::{InboundRequest, RelayEngine, RetryState};
pub use server::{ProxyMode, ProxyServer};
