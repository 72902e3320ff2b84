//! Diagnostics fired when an outbound attempt fails
//!
//! Reports are written to the log files only. They run on detached tasks and
//! never hold up the request that triggered them.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::timeout;
use tracing::warn;

use crate::connectivity::ConnectivityChecker;
use crate::logging::LogCategory;
use crate::stats::StatsProvider;

/// Upper bound for a single diagnostics task
pub const DIAGNOSTICS_TIMEOUT: Duration = Duration::from_secs(60);

pub trait Diagnostics: Send + Sync {
    /// Called before each retry; must return immediately
    fn on_retry(&self, topic: &str, correlation_id: &str);
}

pub async fn log_cpu_stats(stats: &dyn StatsProvider, topic: &str, correlation_id: Option<&str>) {
    LogCategory::Cpu.info(topic, &stats.cpu().await, &Value::Null, correlation_id);
}

pub async fn log_mem_stats(stats: &dyn StatsProvider, topic: &str, correlation_id: Option<&str>) {
    LogCategory::Mem.info(topic, &stats.mem().await, &Value::Null, correlation_id);
}

pub async fn log_network_stats(stats: &dyn StatsProvider, topic: &str, correlation_id: Option<&str>) {
    LogCategory::Network.info(topic, &stats.network().await, &Value::Null, correlation_id);
}

/// Network stats plus a connectivity battery, tagged with the failing attempt
pub struct RetryDiagnostics {
    stats: Arc<dyn StatsProvider>,
    checker: Arc<ConnectivityChecker>,
    cap: Duration,
}

impl RetryDiagnostics {
    pub fn new(stats: Arc<dyn StatsProvider>, checker: Arc<ConnectivityChecker>) -> Self {
        Self {
            stats,
            checker,
            cap: DIAGNOSTICS_TIMEOUT,
        }
    }
}

impl Diagnostics for RetryDiagnostics {
    fn on_retry(&self, topic: &str, correlation_id: &str) {
        let stats = self.stats.clone();
        let cap = self.cap;
        let (stats_topic, stats_id) = (topic.to_string(), correlation_id.to_string());
        tokio::spawn(async move {
            let run = log_network_stats(stats.as_ref(), &stats_topic, Some(&stats_id));
            if timeout(cap, run).await.is_err() {
                warn!(correlation_id = %stats_id, "Network stats did not finish within {:?}", cap);
            }
        });

        let checker = self.checker.clone();
        let (check_topic, check_id) = (topic.to_string(), correlation_id.to_string());
        tokio::spawn(async move {
            let run = checker.fire_checks(&check_topic, Some(&check_id));
            if timeout(cap, run).await.is_err() {
                warn!(correlation_id = %check_id, "Connectivity checks did not finish within {:?}", cap);
            }
        });
    }
}
