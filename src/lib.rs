//! Skywatch — ground-station automation for LEO satellite tracking.
//!
//! A mesh of long-lived services coordinates over a topic-routed NATS
//! broker: the scheduler turns upcoming passes into time-windowed tasks, the
//! orchestrator walks each pass through its state sequence, the tracker
//! drives the antenna rotator, and the SDR and signal-processor services
//! produce captures and diagnostic artefacts.

pub mod astro;
pub mod catalog;
pub mod collect_adapter;
pub mod config;
pub mod log_collector;
pub mod log_format;
pub mod messaging;
pub mod metrics;
pub mod mount;
pub mod observations;
pub mod orchestrator;
pub mod radiometrics;
pub mod scheduler;
pub mod sdr;
pub mod signal_processor;
pub mod task;
pub mod tracker;

/// Version stamped into every message envelope.
pub const MESSAGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Broker client name for a given process, suffixed by deployment
/// environment so staged and development meshes are distinguishable on the
/// broker's connection list.
///
/// - `SKYWATCH_ENV=production` -> `skywatch-{process}`
/// - `SKYWATCH_ENV=staging` -> `skywatch-{process}-staging`
/// - otherwise -> `skywatch-{process}-dev`
pub fn nats_client_name(process_name: &str) -> String {
    match std::env::var("SKYWATCH_ENV").as_deref() {
        Ok("production") => format!("skywatch-{}", process_name),
        Ok("staging") => format!("skywatch-{}-staging", process_name),
        _ => format!("skywatch-{}-dev", process_name),
    }
}

/// Root data directory for observations, logs and the catalog.
///
/// Production and staging live under `/var/lib/skywatch`; development
/// follows the XDG base-directory convention.
pub fn default_data_dir() -> std::path::PathBuf {
    match std::env::var("SKYWATCH_ENV").as_deref() {
        Ok("production") | Ok("staging") => std::path::PathBuf::from("/var/lib/skywatch"),
        _ => {
            let data_home = std::env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                format!("{}/.local/share", home)
            });
            std::path::PathBuf::from(format!("{}/skywatch", data_home))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn client_name_production() {
        unsafe {
            std::env::set_var("SKYWATCH_ENV", "production");
        }
        assert_eq!(nats_client_name("scheduler"), "skywatch-scheduler");
        assert_eq!(nats_client_name("mount"), "skywatch-mount");
        unsafe {
            std::env::remove_var("SKYWATCH_ENV");
        }
    }

    #[test]
    #[serial]
    fn client_name_staging() {
        unsafe {
            std::env::set_var("SKYWATCH_ENV", "staging");
        }
        assert_eq!(nats_client_name("tracker"), "skywatch-tracker-staging");
        unsafe {
            std::env::remove_var("SKYWATCH_ENV");
        }
    }

    #[test]
    #[serial]
    fn client_name_defaults_to_dev() {
        unsafe {
            std::env::remove_var("SKYWATCH_ENV");
        }
        assert_eq!(nats_client_name("sdr"), "skywatch-sdr-dev");
        unsafe {
            std::env::set_var("SKYWATCH_ENV", "local");
        }
        assert_eq!(nats_client_name("sdr"), "skywatch-sdr-dev");
        unsafe {
            std::env::remove_var("SKYWATCH_ENV");
        }
    }

    #[test]
    #[serial]
    fn data_dir_by_environment() {
        unsafe {
            std::env::set_var("SKYWATCH_ENV", "production");
        }
        assert_eq!(
            default_data_dir(),
            std::path::PathBuf::from("/var/lib/skywatch")
        );
        unsafe {
            std::env::remove_var("SKYWATCH_ENV");
            std::env::set_var("XDG_DATA_HOME", "/tmp/xdg");
        }
        assert_eq!(
            default_data_dir(),
            std::path::PathBuf::from("/tmp/xdg/skywatch")
        );
        unsafe {
            std::env::remove_var("XDG_DATA_HOME");
        }
    }
}
