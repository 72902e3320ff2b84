//! Connectivity checks against the hub and rails endpoints
//!
//! Fires a fixed battery of HTTP/HTTPS probes, with and without the upstream
//! proxy, and logs the aggregated outcome as one report.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::{CheckEndpoints, Config, Scheme};
use crate::error::DebuggerError;
use crate::format::beautify_tables;
use crate::logging::LogCategory;
use crate::proxy::agent::{Agent, AgentPool};

const HUB_STATUS_CODES: &[u16] = &[200];
const RAILS_STATUS_CODES: &[u16] = &[301, 302];

/// One probe of the battery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityCheck {
    pub description: String,
    pub url: String,
    pub accepted: Vec<u16>,
    pub via_proxy: bool,
    pub scheme: Scheme,
}

impl ConnectivityCheck {
    fn new(target: &str, url: &str, accepted: &[u16], scheme: Scheme, via_proxy: bool) -> Self {
        let protocol = match scheme {
            Scheme::Http => "HTTP",
            Scheme::Https => "HTTPS",
        };
        let proxy = if via_proxy { "With" } else { "Without" };
        Self {
            description: format!("{} Request To {} {} Proxy", protocol, target, proxy),
            url: with_scheme(url, scheme),
            accepted: accepted.to_vec(),
            via_proxy,
            scheme,
        }
    }

    pub fn agent(&self) -> Agent {
        if self.via_proxy {
            Agent::Upstream
        } else {
            Agent::Direct
        }
    }
}

fn with_scheme(raw: &str, scheme: Scheme) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            // set_scheme only fails between special and non-special schemes
            let _ = parsed.set_scheme(scheme.as_str());
            parsed.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

/// Build the ordered battery: HTTP and HTTPS against both endpoints, then the
/// same four through the upstream proxy when one is configured
pub fn build_battery(endpoints: &CheckEndpoints, has_upstream_proxy: bool) -> Vec<ConnectivityCheck> {
    let mut battery = Vec::with_capacity(8);
    let routes: &[bool] = if has_upstream_proxy { &[false, true] } else { &[false] };
    for &via_proxy in routes {
        for scheme in [Scheme::Http, Scheme::Https] {
            battery.push(ConnectivityCheck::new(
                "Hub",
                &endpoints.hub_status_url,
                HUB_STATUS_CODES,
                scheme,
                via_proxy,
            ));
            battery.push(ConnectivityCheck::new(
                "Rails",
                &endpoints.rails_url,
                RAILS_STATUS_CODES,
                scheme,
                via_proxy,
            ));
        }
    }
    battery
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckResult {
    Passed,
    Failed,
}

/// A response received from a probe, whatever its status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub description: String,
    pub result: CheckResult,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub data: String,
}

impl CheckOutcome {
    pub fn from_probe(check: &ConnectivityCheck, probe: Result<ProbeResponse, String>) -> Self {
        match probe {
            Ok(response) => Self {
                description: check.description.clone(),
                result: if check.accepted.contains(&response.status) {
                    CheckResult::Passed
                } else {
                    CheckResult::Failed
                },
                status_code: Some(response.status),
                error_message: None,
                data: response.body,
            },
            Err(message) => Self {
                description: check.description.clone(),
                result: CheckResult::Failed,
                status_code: None,
                error_message: Some(message),
                data: String::new(),
            },
        }
    }

    fn rows(&self) -> Vec<(String, String)> {
        let or_null = |v: Option<String>| v.unwrap_or_else(|| "null".to_string());
        vec![
            ("description".to_string(), self.description.clone()),
            ("result".to_string(), format!("{:?}", self.result)),
            ("statusCode".to_string(), or_null(self.status_code.map(|c| c.to_string()))),
            ("errorMessage".to_string(), or_null(self.error_message.clone())),
            ("data".to_string(), self.data.clone()),
        ]
    }
}

/// Executes a single probe
#[async_trait]
pub trait CheckRunner: Send + Sync {
    async fn run(&self, check: &ConnectivityCheck) -> Result<ProbeResponse, String>;
}

/// Probes over the shared agent pool
pub struct ReqwestRunner {
    pool: Arc<AgentPool>,
    timeout: Duration,
}

impl ReqwestRunner {
    pub fn new(pool: Arc<AgentPool>, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl CheckRunner for ReqwestRunner {
    async fn run(&self, check: &ConnectivityCheck) -> Result<ProbeResponse, String> {
        let client = self
            .pool
            .client(check.agent())
            .ok_or_else(|| DebuggerError::UpstreamProxyMissing.to_string())?;

        let response = client
            .get(&check.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(ProbeResponse { status, body })
    }
}

pub struct ConnectivityChecker {
    runner: Arc<dyn CheckRunner>,
    endpoints: CheckEndpoints,
    has_upstream_proxy: bool,
    battery: OnceLock<Vec<ConnectivityCheck>>,
}

impl ConnectivityChecker {
    pub fn new(runner: Arc<dyn CheckRunner>, endpoints: CheckEndpoints, has_upstream_proxy: bool) -> Self {
        Self {
            runner,
            endpoints,
            has_upstream_proxy,
            battery: OnceLock::new(),
        }
    }

    /// Checker probing through `pool` with the configured probe timeout
    pub fn from_config(config: &Config, pool: Arc<AgentPool>) -> Self {
        Self::new(
            Arc::new(ReqwestRunner::new(pool, config.connectivity_timeout)),
            config.endpoints.clone(),
            config.upstream_proxy.is_some(),
        )
    }

    /// The battery, built on first use and fixed afterwards
    pub fn battery(&self) -> &[ConnectivityCheck] {
        self.battery
            .get_or_init(|| build_battery(&self.endpoints, self.has_upstream_proxy))
    }

    /// Run every check concurrently and log the report under `topic`.
    ///
    /// Outcomes are returned in battery order, whatever order they complete in.
    #[instrument(skip(self))]
    pub async fn fire_checks(&self, topic: &str, correlation_id: Option<&str>) -> Vec<CheckOutcome> {
        let battery = self.battery();
        let mut results: Vec<Option<CheckOutcome>> = vec![None; battery.len()];

        let mut pending = battery
            .iter()
            .enumerate()
            .map(|(index, check)| {
                let runner = self.runner.clone();
                async move { (index, CheckOutcome::from_probe(check, runner.run(check).await)) }
            })
            .collect::<FuturesUnordered<_>>();

        while let Some((index, outcome)) = pending.next().await {
            debug!("{} finished: {:?}", outcome.description, outcome.result);
            results[index] = Some(outcome);
        }

        // The report is written only once every slot holds an outcome.
        let Some(outcomes) = results.into_iter().collect::<Option<Vec<CheckOutcome>>>() else {
            warn!("Connectivity battery for '{}' finished with missing outcomes", topic);
            return Vec::new();
        };
        let blocks: Vec<_> = outcomes.iter().map(CheckOutcome::rows).collect();
        LogCategory::Connectivity.info(
            topic,
            &beautify_tables(&blocks, "Result Key", "Result Value"),
            &Value::Null,
            correlation_id,
        );
        outcomes
    }
}
