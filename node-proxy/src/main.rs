mod config;
mod logging;
mod statsd;

use clap::{Parser, Subcommand};
use config::Config;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(about = "Tenant-aware proxy that routes requests to backend nodes")]
struct Cli {
    /// YAML config file; built-in defaults and environment overrides apply
    /// when omitted
    #[arg(long, env = "CONFIG_FILE_PATH")]
    config_file_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the proxy server (default)
    Run,
    /// Load and validate the configuration, then exit
    ValidateConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, warnings) = match Config::load(cli.config_file_path.as_deref(), |key| {
        std::env::var(key).ok()
    }) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(CliCommand::ValidateConfig) = cli.command {
        for warning in &warnings {
            eprintln!("{warning}");
        }
        println!("Config is valid");
        return ExitCode::SUCCESS;
    }

    let _sentry = logging::init(&config.logging);
    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    if let Some(metrics_config) = &config.metrics
        && let Err(e) = statsd::init(metrics_config)
    {
        tracing::error!(error = %e, "Failed to initialize metrics");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(proxy::run(config.proxy, shutdown_signal())) {
        Ok(()) => {
            tracing::info!("Proxy server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Proxy server failed");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
