pub mod ctl;
pub mod serve;

pub use ctl::{
    AstroCommand, MountCommand, OrchestratorCommand, SchedulerCommand, SdrCommand, TrackerCommand,
    handle_astro, handle_mount, handle_orchestrator, handle_scheduler, handle_sdr, handle_tracker,
};
pub use serve::{ServeTarget, handle_serve};
