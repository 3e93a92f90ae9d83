//! Client subcommands: issue one RPC against a running service and print
//! the reply. A null reply (timeout, refusal) exits non-zero.

use anyhow::{Result, bail};
use chrono::{Duration, Utc};
use clap::Subcommand;
use serde_json::Value;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

use skywatch::astro::AstrodynamicsClient;
use skywatch::config::StationConfig;
use skywatch::mount::MountClient;
use skywatch::orchestrator::OrchestratorClient;
use skywatch::scheduler::{SchedulerClient, SchedulerMode};
use skywatch::sdr::SdrClient;
use skywatch::task::SdrParams;
use skywatch::tracker::TrackerClient;

#[derive(Debug, Subcommand)]
pub enum MountCommand {
    /// Current rotator position.
    Status,
    /// Command the rotator to a position.
    Set {
        #[arg(long)]
        az: f64,
        #[arg(long)]
        el: f64,
    },
    /// Halt rotator motion.
    Stop,
}

#[derive(Debug, Subcommand)]
pub enum SdrCommand {
    Status,
    /// Start a capture.
    StartRecord {
        #[arg(long)]
        sat_id: String,
        /// Centre frequency in Hz.
        #[arg(long)]
        freq: f64,
    },
    StopRecord,
}

#[derive(Debug, Subcommand)]
pub enum TrackerCommand {
    Status,
    SlewHome,
    StopTracking,
}

#[derive(Debug, Subcommand)]
pub enum OrchestratorCommand {
    Status,
    StopOrchestrating,
}

#[derive(Debug, Subcommand)]
pub enum SchedulerCommand {
    Status,
    /// survey | standby | inactive | collect_request
    SetMode { mode: String },
    StopScheduling,
}

#[derive(Debug, Subcommand)]
pub enum AstroCommand {
    Status,
    /// Current kinematic state of a satellite.
    KinematicState {
        #[arg(long)]
        sat_id: String,
    },
    /// Next AOS/TCA/LOS triple of a satellite.
    AosLos {
        #[arg(long)]
        sat_id: String,
    },
    /// All passes rising within the next hours.
    AllAosLos {
        #[arg(long, default_value_t = 4)]
        hours: i64,
    },
    /// Trigger a whole-catalog recompute.
    Recompute,
}

fn print_reply(reply: Option<Value>) -> Result<()> {
    match reply {
        Some(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        None => bail!("no response from service"),
    }
}

pub async fn handle_mount(command: MountCommand, config: StationConfig) -> Result<()> {
    let client = MountClient::connect(&config, CancellationToken::new()).await?;
    match command {
        MountCommand::Status => print_reply(
            client
                .status()
                .await
                .map(|s| serde_json::to_value(s).unwrap_or(Value::Null)),
        ),
        MountCommand::Set { az, el } => print_reply(client.set(az, el).await),
        MountCommand::Stop => print_reply(client.stop_rotor().await),
    }
}

pub async fn handle_sdr(command: SdrCommand, config: StationConfig) -> Result<()> {
    let client = SdrClient::connect(&config, CancellationToken::new()).await?;
    match command {
        SdrCommand::Status => print_reply(client.status().await),
        SdrCommand::StartRecord { sat_id, freq } => {
            print_reply(client.start_record(&SdrParams { sat_id, freq }).await)
        }
        SdrCommand::StopRecord => print_reply(client.stop_record().await),
    }
}

pub async fn handle_tracker(command: TrackerCommand, config: StationConfig) -> Result<()> {
    let client = TrackerClient::connect(&config, CancellationToken::new()).await?;
    match command {
        TrackerCommand::Status => print_reply(client.status().await),
        TrackerCommand::SlewHome => {
            if client.slew_to_home().await {
                println!("slew complete");
                Ok(())
            } else {
                bail!("slew failed");
            }
        }
        TrackerCommand::StopTracking => print_reply(client.stop_tracking().await),
    }
}

pub async fn handle_orchestrator(
    command: OrchestratorCommand,
    config: StationConfig,
) -> Result<()> {
    let client = OrchestratorClient::connect(&config, CancellationToken::new()).await?;
    match command {
        OrchestratorCommand::Status => print_reply(client.status().await),
        OrchestratorCommand::StopOrchestrating => print_reply(client.stop_orchestrating().await),
    }
}

pub async fn handle_scheduler(command: SchedulerCommand, config: StationConfig) -> Result<()> {
    let client = SchedulerClient::connect(&config, CancellationToken::new()).await?;
    match command {
        SchedulerCommand::Status => print_reply(client.status().await),
        SchedulerCommand::SetMode { mode } => {
            let mode = SchedulerMode::from_str(&mode)?;
            print_reply(client.set_mode(mode).await)
        }
        SchedulerCommand::StopScheduling => print_reply(client.stop_scheduling().await),
    }
}

pub async fn handle_astro(command: AstroCommand, config: StationConfig) -> Result<()> {
    let client = AstrodynamicsClient::connect(&config, CancellationToken::new()).await?;
    match command {
        AstroCommand::Status => print_reply(client.status().await),
        AstroCommand::KinematicState { sat_id } => print_reply(
            client
                .get_kinematic_state(&sat_id)
                .await
                .map(|s| serde_json::to_value(s).unwrap_or(Value::Null)),
        ),
        AstroCommand::AosLos { sat_id } => print_reply(
            client
                .get_aos_los(&sat_id)
                .await
                .map(|m| serde_json::to_value(m).unwrap_or(Value::Null)),
        ),
        AstroCommand::AllAosLos { hours } => {
            let start = Utc::now();
            let end = start + Duration::hours(hours);
            print_reply(
                client
                    .get_all_aos_los(start, end)
                    .await
                    .map(|rows| serde_json::to_value(rows).unwrap_or(Value::Null)),
            )
        }
        AstroCommand::Recompute => {
            client.recompute_all_orbits().await;
            println!("recompute requested");
            Ok(())
        }
    }
}
