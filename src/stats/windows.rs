use async_trait::async_trait;

use super::{cpu_report, memory_report, network_report, StatsProvider};
use crate::config::{HUB_HOST, RAILS_HOST};

// wmic is resolved through PATH
const LOAD_PERCENTAGE: &str = "wmic cpu get loadpercentage";

/// System and network stats for Windows
pub struct WindowsStats;

fn network_commands() -> Vec<String> {
    vec![
        "netstat -anosp tcp".to_string(),
        "netstat -r".to_string(),
        "ipconfig /all".to_string(),
        format!("ping -n 5 {}", HUB_HOST),
        format!("ping -n 5 {}", RAILS_HOST),
    ]
}

#[async_trait]
impl StatsProvider for WindowsStats {
    fn description(&self) -> &'static str {
        "System and Network Stats for Windows"
    }

    async fn cpu(&self) -> String {
        cpu_report(LOAD_PERCENTAGE, "", "Load Percentage").await
    }

    async fn mem(&self) -> String {
        memory_report()
    }

    async fn network(&self) -> String {
        network_report(&network_commands()).await
    }
}
