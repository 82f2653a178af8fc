//! Harbour CLI - release containerised services.

mod commands;

use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use commands::deploy::{self, DeployArgs, EXIT_SETUP, EXIT_USAGE};

const DEFAULT_LOG_FILTER: &str = "harbour_cli=info,harbour_control=info,harbour_secrets=info";

#[derive(Parser)]
#[command(name = "harbour")]
#[command(about = "Release containerised services: migrate first, then roll out")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations, then roll out the service
    Deploy(DeployArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("interrupt received, abandoning release; remote work keeps running");
        cancel_on_signal.cancel();
    });

    let result = match cli.command {
        Commands::Deploy(args) => run_deploy(&args, &cancel).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "release could not run");
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_SETUP)
        }
    }
}

async fn run_deploy(args: &DeployArgs, cancel: &CancellationToken) -> anyhow::Result<u8> {
    let report = deploy::run(args, cancel)
        .await
        .context("release could not start")?;
    let rendered = deploy::render(&report, args.output).context("failed to render report")?;
    println!("{rendered}");
    Ok(deploy::exit_code(&report.outcome))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
