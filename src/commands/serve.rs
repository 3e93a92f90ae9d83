//! `skywatch serve <service>`: run one service until shutdown.

use anyhow::Result;
use clap::ValueEnum;
use tokio_util::sync::CancellationToken;
use tracing::info;

use skywatch::astro::AstrodynamicsService;
use skywatch::catalog::DatabaseService;
use skywatch::collect_adapter::CollectAdapterService;
use skywatch::config::StationConfig;
use skywatch::log_collector::LogCollectorService;
use skywatch::mount::MountService;
use skywatch::orchestrator::OrchestratorService;
use skywatch::radiometrics::RadiometricsService;
use skywatch::scheduler::SchedulerService;
use skywatch::sdr::SdrService;
use skywatch::signal_processor::SignalProcessorService;
use skywatch::tracker::TrackerService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServeTarget {
    Database,
    Radiometrics,
    Astrodynamics,
    Mount,
    Sdr,
    SignalProcessor,
    LogCollector,
    Tracker,
    Orchestrator,
    Scheduler,
    CollectAdapter,
}

pub async fn handle_serve(
    target: ServeTarget,
    config: StationConfig,
    cancel: CancellationToken,
) -> Result<()> {
    skywatch::metrics::initialize_messaging_metrics();
    skywatch::metrics::install_exporter(config.metrics_port)?;

    info!("Starting {:?} service", target);
    match target {
        ServeTarget::Database => {
            let mut service = DatabaseService::serve(&config, cancel.clone()).await?;
            cancel.cancelled().await;
            service.stop().await;
        }
        ServeTarget::Radiometrics => {
            let mut service = RadiometricsService::serve(&config, cancel.clone()).await?;
            cancel.cancelled().await;
            service.stop().await;
        }
        ServeTarget::Astrodynamics => {
            let mut service = AstrodynamicsService::serve(&config, cancel.clone()).await?;
            cancel.cancelled().await;
            service.stop().await;
        }
        ServeTarget::Mount => {
            let mut service = MountService::serve(&config, cancel.clone()).await?;
            cancel.cancelled().await;
            service.stop().await;
        }
        ServeTarget::Sdr => {
            let mut service = SdrService::serve(&config, cancel.clone()).await?;
            cancel.cancelled().await;
            service.stop().await;
        }
        ServeTarget::SignalProcessor => {
            let mut service = SignalProcessorService::serve(&config, cancel.clone()).await?;
            cancel.cancelled().await;
            service.stop().await;
        }
        ServeTarget::LogCollector => {
            let mut service = LogCollectorService::serve(&config, cancel.clone()).await?;
            cancel.cancelled().await;
            service.stop().await;
        }
        ServeTarget::Tracker => {
            let mut service = TrackerService::serve(&config, cancel.clone()).await?;
            cancel.cancelled().await;
            service.stop().await;
        }
        ServeTarget::Orchestrator => {
            let mut service = OrchestratorService::serve(&config, cancel.clone()).await?;
            cancel.cancelled().await;
            service.stop().await;
        }
        ServeTarget::Scheduler => {
            let mut service = SchedulerService::serve(&config, cancel.clone()).await?;
            cancel.cancelled().await;
            service.stop().await;
        }
        ServeTarget::CollectAdapter => {
            let mut service = CollectAdapterService::serve(&config, cancel.clone()).await?;
            cancel.cancelled().await;
            service.stop().await;
        }
    }
    info!("{:?} service stopped", target);
    Ok(())
}
