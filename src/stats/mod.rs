//! Host statistics collected for diagnostics
//!
//! Each platform gets one [`StatsProvider`] variant; [`for_platform`] picks
//! it by OS identifier and falls back to [`UnsupportedStats`].

mod linux;
mod mac;
mod windows;

pub use linux::LinuxStats;
pub use mac::MacStats;
pub use windows::WindowsStats;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sysinfo::System;
use tokio::process::Command;

use crate::format::{beautify_table, header_and_footer, LINE_ENDING};

pub const CPU_STATS_NOT_IMPLEMENTED: &str = "CPU Stats Not Implemented for this platform";
pub const MEM_STATS_NOT_IMPLEMENTED: &str = "Memory Stats Not Implemented for this platform";
pub const NETWORK_STATS_NOT_IMPLEMENTED: &str = "Network Stats Not Implemented for this platform";
pub const NO_REPORT_GENERATED: &str = "COULD NOT GENERATE REPORT FOR : ";
const NO_RESULT_GENERATED: &str = "NO_RESULT_GENERATED";

/// Host statistics, rendered as report text.
///
/// None of these fail: a report that cannot be produced says so in its text.
#[async_trait]
pub trait StatsProvider: Send + Sync {
    fn description(&self) -> &'static str;

    async fn cpu(&self) -> String {
        CPU_STATS_NOT_IMPLEMENTED.to_string()
    }

    async fn mem(&self) -> String {
        MEM_STATS_NOT_IMPLEMENTED.to_string()
    }

    async fn network(&self) -> String {
        NETWORK_STATS_NOT_IMPLEMENTED.to_string()
    }
}

/// Stats for platforms without a dedicated implementation
pub struct UnsupportedStats;

#[async_trait]
impl StatsProvider for UnsupportedStats {
    fn description(&self) -> &'static str {
        "Stats are not implemented for this platform"
    }
}

type StatsConstructor = fn() -> Arc<dyn StatsProvider>;

fn linux_stats() -> Arc<dyn StatsProvider> {
    Arc::new(LinuxStats)
}

fn mac_stats() -> Arc<dyn StatsProvider> {
    Arc::new(MacStats)
}

fn windows_stats() -> Arc<dyn StatsProvider> {
    Arc::new(WindowsStats)
}

const PLATFORM_HANDLERS: &[(&str, StatsConstructor)] = &[
    ("linux", linux_stats),
    ("macos", mac_stats),
    ("windows", windows_stats),
];

/// Select the stats provider for an OS identifier as in `std::env::consts::OS`
pub fn for_platform(platform: &str) -> Arc<dyn StatsProvider> {
    PLATFORM_HANDLERS
        .iter()
        .find(|(key, _)| *key == platform)
        .map(|(_, build)| build())
        .unwrap_or_else(|| Arc::new(UnsupportedStats))
}

/// Stats provider for the running host
pub fn current() -> Arc<dyn StatsProvider> {
    for_platform(std::env::consts::OS)
}

/// Output of one shell command
#[derive(Debug, Clone)]
pub struct CommandReport {
    pub content: String,
    pub generated_at: DateTime<Utc>,
}

async fn run_command(command: &str) -> anyhow::Result<String> {
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("empty command"))?;
    let output = Command::new(program).args(parts).output().await?;
    if !output.status.success() {
        anyhow::bail!("'{}' exited with {}", command, output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a single command; a failure yields `None`
pub(crate) async fn exec(command: &str) -> Option<String> {
    run_command(command).await.ok()
}

/// Run commands concurrently, results in the order of `commands`
pub(crate) async fn exec_multiple(commands: &[String]) -> Vec<CommandReport> {
    futures::future::join_all(commands.iter().map(|command| async move {
        let content = match run_command(command).await {
            Ok(content) => content,
            Err(_) => format!("{}{}", NO_RESULT_GENERATED, LINE_ENDING),
        };
        CommandReport {
            content,
            generated_at: Utc::now(),
        }
    }))
    .await
}

/// Network report: every command's output framed with its own banner
pub(crate) async fn network_report(commands: &[String]) -> String {
    let start = Utc::now();
    exec_multiple(commands)
        .await
        .iter()
        .zip(commands)
        .map(|(report, command)| {
            header_and_footer(
                &report.content,
                &format!("Network Stat: '{}'", command),
                report.generated_at,
                start,
            )
        })
        .collect()
}

/// CPU report from a sampling command, marking where each sample starts
pub(crate) async fn cpu_report(command: &str, sample_marker: &str, title: &str) -> String {
    let start = Utc::now();
    match exec(command).await {
        Some(output) => {
            let marked = if sample_marker.is_empty() {
                output
            } else {
                output.replace(
                    sample_marker,
                    &format!(
                        "{le}****************** ITERATION ******************{le}{marker}",
                        le = LINE_ENDING,
                        marker = sample_marker
                    ),
                )
            };
            header_and_footer(&marked, title, Utc::now(), start)
        }
        None => format!("{}CPU{}", NO_REPORT_GENERATED, LINE_ENDING),
    }
}

/// Memory and swap usage in bytes
pub fn memory_report() -> String {
    let mut system = System::new();
    system.refresh_memory();

    let total = system.total_memory();
    let free = system.free_memory();
    let entries = [
        ("total", total),
        ("free", free),
        ("used", total.saturating_sub(free)),
        ("swapTotal", system.total_swap()),
        ("swapUsed", system.used_swap()),
        ("swapFree", system.free_swap()),
    ]
    .iter()
    .map(|(key, value)| (key.to_string(), value.to_string()))
    .collect::<Vec<_>>();

    beautify_table(&entries, "Memory", "Bytes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_maps_known_platforms() {
        assert_eq!(for_platform("linux").description(), LinuxStats.description());
        assert_eq!(for_platform("macos").description(), MacStats.description());
        assert_eq!(for_platform("windows").description(), WindowsStats.description());
    }

    #[tokio::test]
    async fn test_factory_defaults_to_not_implemented() {
        let stats = for_platform("freebsd");
        assert_eq!(stats.description(), UnsupportedStats.description());
        assert_eq!(stats.cpu().await, CPU_STATS_NOT_IMPLEMENTED);
        assert_eq!(stats.mem().await, MEM_STATS_NOT_IMPLEMENTED);
        assert_eq!(stats.network().await, NETWORK_STATS_NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_exec_multiple_keeps_command_order_and_marks_failures() {
        let commands = vec![
            "definitely-not-a-real-command-rd".to_string(),
            "also-not-a-real-command-rd --flag".to_string(),
        ];
        let reports = exec_multiple(&commands).await;
        assert_eq!(reports.len(), 2);
        for report in reports {
            assert!(report.content.starts_with(NO_RESULT_GENERATED));
        }
    }

    #[tokio::test]
    async fn test_network_report_titles_each_command() {
        let commands = vec!["definitely-not-a-real-command-rd".to_string()];
        let report = network_report(&commands).await;
        assert!(report.contains("Network Stat: 'definitely-not-a-real-command-rd'"));
    }

    #[tokio::test]
    async fn test_cpu_report_without_output() {
        let report = cpu_report("definitely-not-a-real-command-rd", "top -", "CPU").await;
        assert_eq!(report, format!("{}CPU{}", NO_REPORT_GENERATED, LINE_ENDING));
    }

    #[test]
    fn test_memory_report_lists_all_rows() {
        let report = memory_report();
        for key in ["total", "free", "used", "swapTotal", "swapUsed", "swapFree"] {
            assert!(report.contains(key), "missing {}", key);
        }
        assert!(report.contains("Bytes"));
    }
}
