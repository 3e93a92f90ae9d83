//! Station-wide configuration.
//!
//! Every service reads the same `StationConfig`: defaults, optionally a TOML
//! file named by `SKYWATCH_CONFIG`, then environment-variable overrides for
//! the values that differ between deployments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::astro::geodesy::Observer;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Broker URI; every service requires it.
    pub nats_url: String,
    /// Ground-station geodetic position (WGS84).
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
    /// Horizon mask for AOS/LOS searches and the track loop.
    pub min_elevation_deg: f64,
    /// AOS/LOS search reach beyond the query time, in hours.
    pub aos_search_hours: i64,
    /// Root for captures and derived artefacts.
    pub observations_dir: PathBuf,
    /// Root for the log-collector's per-source/per-type files.
    pub log_dir: PathBuf,
    /// Satellite catalog document store.
    pub catalog_path: PathBuf,
    /// Default RPC timeout (seconds).
    pub rpc_timeout_secs: u64,
    /// Timeout for slew-to-position RPCs (seconds).
    pub slew_rpc_timeout_secs: u64,
    /// Timeout for whole-catalog AOS/LOS queries (seconds).
    pub all_aos_los_timeout_secs: u64,
    /// Scheduler queue refresh period (seconds).
    pub refresh_interval_secs: u64,
    /// Lead time before AOS at which a task is handed to the orchestrator.
    pub dispatch_buffer_secs: u64,
    /// Longest pass a generated task may span (minutes).
    pub max_pass_minutes: i64,
    /// Tracker loop period (milliseconds).
    pub slew_interval_ms: u64,
    /// Slew completion tolerance per axis (degrees).
    pub angular_tolerance_deg: f64,
    /// Rotator rest position.
    pub az_home_deg: f64,
    pub el_home_deg: f64,
    /// Simulated rotator slew rate (degrees per second).
    pub rotator_rate_deg_per_sec: f64,
    /// Capture sample rate (Hz).
    pub sample_rate_hz: f64,
    /// External collect-request endpoint, e.g. "http://127.0.0.1:8700".
    pub collect_endpoint: Option<String>,
    /// Collect-request poll period (seconds).
    pub collect_poll_secs: u64,
    /// Prometheus exporter port; unset disables the exporter.
    pub metrics_port: Option<u16>,
}

impl Default for StationConfig {
    fn default() -> Self {
        let data_dir = crate::default_data_dir();
        Self {
            nats_url: "nats://127.0.0.1:4222".to_string(),
            latitude_deg: 20.7464,
            longitude_deg: -156.4305,
            altitude_m: 103.8,
            min_elevation_deg: 10.0,
            aos_search_hours: 8,
            observations_dir: data_dir.join("observations"),
            log_dir: data_dir.join("log"),
            catalog_path: data_dir.join("catalog.json"),
            rpc_timeout_secs: 10,
            slew_rpc_timeout_secs: 60,
            all_aos_los_timeout_secs: 60,
            refresh_interval_secs: 7200,
            dispatch_buffer_secs: 180,
            max_pass_minutes: 15,
            slew_interval_ms: 1000,
            angular_tolerance_deg: 0.3,
            az_home_deg: 270.0,
            el_home_deg: 0.0,
            rotator_rate_deg_per_sec: 6.0,
            sample_rate_hz: 50_000.0,
            collect_endpoint: None,
            collect_poll_secs: 10,
            metrics_port: None,
        }
    }
}

impl StationConfig {
    /// Load configuration: defaults, then `SKYWATCH_CONFIG` TOML if set, then
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("SKYWATCH_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let config: StationConfig =
            toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("SKYWATCH_NATS_URL") {
            self.nats_url = url;
        }
        if let Ok(dir) = std::env::var("SKYWATCH_OBSERVATIONS_DIR") {
            self.observations_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("SKYWATCH_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("SKYWATCH_CATALOG") {
            self.catalog_path = PathBuf::from(path);
        }
        if let Ok(endpoint) = std::env::var("SKYWATCH_COLLECT_ENDPOINT") {
            self.collect_endpoint = Some(endpoint);
        }
        if let Ok(port) = std::env::var("SKYWATCH_METRICS_PORT")
            && let Ok(port) = port.parse()
        {
            self.metrics_port = Some(port);
        }
    }

    pub fn observer(&self) -> Observer {
        Observer::new(self.latitude_deg, self.longitude_deg, self.altitude_m)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn slew_rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.slew_rpc_timeout_secs)
    }

    pub fn slew_interval(&self) -> Duration {
        Duration::from_millis(self.slew_interval_ms)
    }

    pub fn dispatch_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.dispatch_buffer_secs as i64)
    }

    pub fn max_pass(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.max_pass_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = StationConfig::default();
        assert_eq!(config.rpc_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_pass(), chrono::Duration::minutes(15));
        assert_eq!(config.az_home_deg, 270.0);
        assert!(config.collect_endpoint.is_none());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "nats_url = \"nats://broker:4222\"\nmax_pass_minutes = 20"
        )
        .unwrap();
        let config = StationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.nats_url, "nats://broker:4222");
        assert_eq!(config.max_pass_minutes, 20);
        assert_eq!(config.min_elevation_deg, 10.0);
    }

    #[test]
    #[serial]
    fn env_overrides_win() {
        unsafe {
            std::env::set_var("SKYWATCH_NATS_URL", "nats://elsewhere:4222");
        }
        let config = StationConfig::load().unwrap();
        assert_eq!(config.nats_url, "nats://elsewhere:4222");
        unsafe {
            std::env::remove_var("SKYWATCH_NATS_URL");
        }
    }
}
