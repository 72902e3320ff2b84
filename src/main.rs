//! Requests Debugger - Entry Point
//!
//! Starts the forward and reverse proxy listeners with graceful shutdown support.

use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use requests_debugger::cli::Cli;
use requests_debugger::config::Config;
use requests_debugger::connectivity::ConnectivityChecker;
use requests_debugger::error::Result;
use requests_debugger::format::beautify_line;
use requests_debugger::logging::{self, LogCategory};
use requests_debugger::proxy::diagnostics::{log_cpu_stats, log_mem_stats, log_network_stats};
use requests_debugger::proxy::{AgentPool, ProxyMode, ProxyServer, RelayEngine, RetryDiagnostics};
use requests_debugger::stats::{self, StatsProvider};

const BANNER_WIDTH: usize = 60;

fn banner(line: &str) {
    print!("{}", beautify_line(line, "", "-", BANNER_WIDTH, true));
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error while starting the tool: {}", e);
        eprintln!("Exiting the Tool...");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Arc::new(Config::from_cli(Cli::parse())?);

    print!("{}", beautify_line("Starting Requests Debugger Tool", "-", "-", BANNER_WIDTH, true));
    if let Err(e) = logging::init(&config.log) {
        eprintln!("{}", e);
        return Err(e);
    }
    banner(&format!(
        "Refer '{}' folder for CPU/Network/Memory stats and request logs",
        config.log.directory.display()
    ));
    info!("Configuration loaded");

    let stats = stats::current();
    info!("{}", stats.description());

    let pool = match AgentPool::new(&config) {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            LogCategory::Error.error("Startup", "Failed to build HTTP agents", &json!({ "errorMessage": e.to_string() }), None);
            return Err(e);
        }
    };
    let checker = Arc::new(ConnectivityChecker::from_config(&config, pool.clone()));

    spawn_initial_reports(stats.clone(), checker.clone());

    let diagnostics = Arc::new(RetryDiagnostics::new(stats.clone(), checker.clone()));
    let engine = Arc::new(RelayEngine::new(
        pool.clone(),
        diagnostics,
        config.retry.clone(),
        config.request_timeout,
    ));
    let agent = pool.default_agent();

    let proxy_server = Arc::new(ProxyServer::new(ProxyMode::Forward, config.clone(), engine.clone(), agent));
    let reverse_server = Arc::new(ProxyServer::new(ProxyMode::Reverse, config.clone(), engine, agent));

    let proxy_listener = proxy_server.bind().await?;
    let reverse_listener = reverse_server.bind().await?;

    // Create shutdown channel
    let (shutdown_tx, _) = watch::channel(false);

    let proxy_shutdown = shutdown_tx.subscribe();
    let proxy_task = tokio::spawn(async move {
        if let Err(e) = proxy_server.serve(proxy_listener, proxy_shutdown).await {
            error!("Proxy server error: {}", e);
        }
    });

    let reverse_shutdown = shutdown_tx.subscribe();
    let reverse_task = tokio::spawn(async move {
        if let Err(e) = reverse_server.serve(reverse_listener, reverse_shutdown).await {
            error!("Reverse proxy server error: {}", e);
        }
    });

    banner(&format!("Requests Debugger Proxy Started on Port: {}", config.proxy_port));
    banner(&format!(
        "Requests Debugger Reverse Proxy Started on Port: {}",
        config.reverse_proxy_port
    ));
    info!(
        "Servers started - Proxy: {}, Reverse Proxy: {}",
        config.proxy_addr(),
        config.reverse_proxy_addr()
    );

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(proxy_task, reverse_task);

    info!("Requests Debugger stopped");
    Ok(())
}

/// Initial stats and connectivity reports, each announced on the console when done
fn spawn_initial_reports(stats: Arc<dyn StatsProvider>, checker: Arc<ConnectivityChecker>) {
    banner("Collecting Initial CPU, Memory & Network Stats");

    let cpu = stats.clone();
    tokio::spawn(async move {
        log_cpu_stats(cpu.as_ref(), "Initial CPU", None).await;
        banner("CPU Stats Collected");
    });

    let mem = stats.clone();
    tokio::spawn(async move {
        log_mem_stats(mem.as_ref(), "Initial Memory", None).await;
        banner("Memory Stats Collected");
    });

    tokio::spawn(async move {
        log_network_stats(stats.as_ref(), "Initial Network", None).await;
        banner("Network Stats Collected");
    });

    banner("Performing Initial Connectivity Checks");
    tokio::spawn(async move {
        checker.fire_checks("Initial Connectivity", None).await;
        banner("Connectivity Checks Performed");
    });
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
