use async_trait::async_trait;

use super::{cpu_report, memory_report, network_report, StatsProvider};
use crate::config::{HUB_HOST, RAILS_HOST};

const TOP_3_SAMPLES: &str = "top -bn 3";
const TCP_LISTEN_ESTABLISHED: &str = "lsof -PiTCP";

/// System and network stats for Linux
pub struct LinuxStats;

fn network_commands() -> Vec<String> {
    vec![
        TCP_LISTEN_ESTABLISHED.to_string(),
        format!("ping -c 5 {}", HUB_HOST),
        format!("ping -c 5 {}", RAILS_HOST),
    ]
}

#[async_trait]
impl StatsProvider for LinuxStats {
    fn description(&self) -> &'static str {
        "System and Network Stats for Linux"
    }

    async fn cpu(&self) -> String {
        cpu_report(TOP_3_SAMPLES, "top -", "CPU Information with 3 samples").await
    }

    async fn mem(&self) -> String {
        memory_report()
    }

    async fn network(&self) -> String {
        network_report(&network_commands()).await
    }
}
