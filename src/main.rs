mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use commands::{
    AstroCommand, MountCommand, OrchestratorCommand, SchedulerCommand, SdrCommand, ServeTarget,
    TrackerCommand,
};
use skywatch::config::StationConfig;

#[derive(Parser)]
#[command(name = "skywatch", version, about = "Ground-station automation platform")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one service until SIGINT/SIGTERM.
    Serve {
        #[arg(value_enum)]
        service: ServeTarget,
    },
    /// Mount (rotator) client commands.
    Mount {
        #[command(subcommand)]
        command: MountCommand,
    },
    /// SDR (recorder) client commands.
    Sdr {
        #[command(subcommand)]
        command: SdrCommand,
    },
    /// Tracker client commands.
    Tracker {
        #[command(subcommand)]
        command: TrackerCommand,
    },
    /// Orchestrator client commands.
    Orchestrator {
        #[command(subcommand)]
        command: OrchestratorCommand,
    },
    /// Scheduler client commands.
    Scheduler {
        #[command(subcommand)]
        command: SchedulerCommand,
    },
    /// Astrodynamics client commands.
    Astro {
        #[command(subcommand)]
        command: AstroCommand,
    },
}

fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("Shutdown signal received");
        trigger.cancel();
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .event_format(skywatch::log_format::ServiceFormat)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = StationConfig::load()?;

    match cli.command {
        Commands::Serve { service } => {
            let cancel = shutdown_token();
            commands::handle_serve(service, config, cancel).await
        }
        Commands::Mount { command } => commands::handle_mount(command, config).await,
        Commands::Sdr { command } => commands::handle_sdr(command, config).await,
        Commands::Tracker { command } => commands::handle_tracker(command, config).await,
        Commands::Orchestrator { command } => {
            commands::handle_orchestrator(command, config).await
        }
        Commands::Scheduler { command } => commands::handle_scheduler(command, config).await,
        Commands::Astro { command } => commands::handle_astro(command, config).await,
    }
}
