//! CLI entrypoint for toolgate
//!
//! This is the main binary that wires together all layers using
//! dependency injection.

mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use commands::{Cli, Command};
use std::path::Path;
use std::process::ExitCode;
use toolgate_application::RiskScannerPort;
use toolgate_domain::ExecutionResult;
use toolgate_infrastructure::{ConfigLoader, FileConfig, build, build_gateway, build_scanner, serve};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = if cli.no_config {
        ConfigLoader::load_defaults()
    } else {
        ConfigLoader::load(cli.config.as_deref()).context("failed to load configuration")?
    };
    if let Some(dir) = &cli.tools_dir {
        config.tools.dir = dir.clone();
    }

    // `serve` reports admission transitions at info level by default
    let default_level = match cli.command {
        Command::Serve => "info",
        _ => "warn",
    };
    let _log_guard = init_logging(cli.verbose, default_level, config.logging.file_dir.as_deref());

    for issue in config.validate() {
        warn!("Configuration: {}", issue);
    }

    match cli.command {
        Command::Serve => run_serve(&config).await,
        Command::Scan { file } => run_scan(&config, &file),
        Command::List => {
            let gateway = build_gateway(&config)?;
            gateway.reconcile().await;
            println!("{}", serde_json::to_string_pretty(&gateway.list_tools())?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Pending => {
            let gateway = build_gateway(&config)?;
            gateway.reconcile().await;
            let pending = gateway.list_pending();
            if pending.is_empty() {
                println!("No tools awaiting approval.");
            }
            for tool in pending {
                println!("{}  {}  [{}]", tool.digest, tool.name, tool.verdict.flag_list());
                for finding in tool.verdict.findings() {
                    let line = finding.line.map(|l| format!("line {}", l)).unwrap_or_default();
                    println!("    {:<20} {:<10} {}", finding.flag.as_str(), line, finding.detail);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            let gateway = build_gateway(&config)?;
            gateway.reconcile().await;
            for unit in gateway.status() {
                let digest = unit.digest.map(|d| d.short()).unwrap_or_default();
                let issue = unit
                    .issue
                    .map(|i| serde_json::to_string(&i).unwrap_or_default())
                    .unwrap_or_default();
                println!(
                    "{:<24} {:<18} {:<12} {}",
                    unit.name,
                    unit.state.as_str(),
                    digest,
                    issue
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Approve { digest, by } => {
            let gateway = build_gateway(&config)?;
            gateway.reconcile().await;
            gateway
                .approve(digest.trim(), &by)
                .await
                .context("approval failed")?;
            gateway.shutdown().context("failed to flush approval ledger")?;
            println!("Approved {} (decided by {})", digest.trim(), by.trim());
            Ok(ExitCode::SUCCESS)
        }
        Command::Call { name, args, deny } => {
            let arguments: serde_json::Value =
                serde_json::from_str(&args).context("--args is not valid JSON")?;
            let gateway = build_gateway(&config)?;
            gateway.reconcile().await;
            let result = gateway.call(&name, &arguments, &deny).await;
            gateway.shutdown().context("failed to flush approval ledger")?;
            Ok(print_result(&result))
        }
        Command::Config => {
            ConfigLoader::print_config_sources(cli.config.as_deref());
            println!();
            println!("Resolved tools directory: {}", config.tools.dir.display());
            println!("Resolved ledger:          {}", config.ledger_path().display());
            println!();
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_serve(config: &FileConfig) -> Result<ExitCode> {
    let services = build(config)?;
    let handle = serve(services, config)
        .await
        .context("failed to start serving tools")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");

    handle.stop().await.context("failed to flush approval ledger")?;
    Ok(ExitCode::SUCCESS)
}

fn run_scan(config: &FileConfig, file: &Path) -> Result<ExitCode> {
    let source =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let unit_key = file.file_stem().and_then(|stem| stem.to_str());

    let report = build_scanner(config)?.inspect(&source, unit_key);
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if report.verdict.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_result(result: &ExecutionResult) -> ExitCode {
    match result {
        ExecutionResult::Success { output } => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        ExecutionResult::Failure { kind, message } => {
            eprintln!("{}: {}", kind.code(), message);
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing: stderr always, plus a daily-rolling file when
/// `file_dir` is set. The returned guard must live until exit.
fn init_logging(verbose: u8, default_level: &str, file_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"), // -vvv or more
    };

    let (file_layer, guard) = match file_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "toolgate.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .init();

    guard
}
