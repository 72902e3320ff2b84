use async_trait::async_trait;

use super::{cpu_report, memory_report, network_report, StatsProvider};
use crate::config::{HUB_HOST, RAILS_HOST};

const TOP_3_SAMPLES: &str =
    "top -n 10 -l 3 -stats pid,command,cpu,cpu_others,time,threads,ports,mem,vsize,pgrp,ppid,cycles";
const TCP_LISTEN_ESTABLISHED: &str = "lsof -PiTCP";

/// System and network stats for macOS
pub struct MacStats;

#[async_trait]
impl StatsProvider for MacStats {
    fn description(&self) -> &'static str {
        "System and Network Stats for Mac"
    }

    async fn cpu(&self) -> String {
        cpu_report(TOP_3_SAMPLES, "Processes:", "CPU Information with 3 samples").await
    }

    async fn mem(&self) -> String {
        memory_report()
    }

    async fn network(&self) -> String {
        let commands = vec![
            TCP_LISTEN_ESTABLISHED.to_string(),
            format!("ping -c 5 {}", HUB_HOST),
            format!("ping -c 5 {}", RAILS_HOST),
        ];
        network_report(&commands).await
    }
}
