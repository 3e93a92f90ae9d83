//! SDR service: the recording backend behind a
//! `start_record / stop_record / status` contract.
//!
//! The actual flowgraph is an opaque device. The file-backed recorder here
//! honours the capture contract the rest of the platform relies on: each
//! recording produces a data file and a sidecar metadata file sharing a stem
//! under the captures directory, the sidecar being finalised on stop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::StationConfig;
use crate::messaging::{
    Binding, CommandClient, Exchange, HandlerKind, HandlerResult, Message, MessageHandler,
    MessageNode, Messenger, NodeConfig, NodeHandle, Publishing, ROUTING_PREFIX,
};
use crate::observations::{ObservationPaths, data_path, sidecar_path};
use crate::task::SdrParams;

pub const SERVICE: &str = "sdr";

/// VHF/UHF band split used for naming captures and antenna selection.
const VHF_HIGH_HZ: f64 = 150e6;

pub fn band_for(freq_hz: f64) -> &'static str {
    if freq_hz <= VHF_HIGH_HZ { "VHF" } else { "UHF" }
}

/// Sidecar metadata written next to every capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureMeta {
    pub sat_id: String,
    pub freq: f64,
    pub band: String,
    pub sample_rate: f64,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub version: String,
}

struct ActiveRecording {
    stem: PathBuf,
    meta: CaptureMeta,
}

/// File-backed recorder; one recording at a time.
pub struct Recorder {
    paths: ObservationPaths,
    sample_rate: f64,
    active: Mutex<Option<ActiveRecording>>,
}

impl Recorder {
    pub fn new(paths: ObservationPaths, sample_rate: f64) -> Self {
        Self {
            paths,
            sample_rate,
            active: Mutex::new(None),
        }
    }

    pub async fn is_recording(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Open a capture for `params`. Fails when a recording is in progress.
    pub async fn start_record(&self, params: &SdrParams) -> Result<PathBuf> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(anyhow!("recording already in progress"));
        }
        self.paths.ensure()?;

        let start_time = Utc::now();
        let band = band_for(params.freq);
        let stem = self.paths.capture_stem(&params.sat_id, band, start_time);
        let meta = CaptureMeta {
            sat_id: params.sat_id.clone(),
            freq: params.freq,
            band: band.to_string(),
            sample_rate: self.sample_rate,
            start_time,
            end_time: None,
            version: crate::MESSAGE_VERSION.to_string(),
        };

        std::fs::write(data_path(&stem), b"").context("failed to create capture data file")?;
        std::fs::write(sidecar_path(&stem), serde_json::to_vec_pretty(&meta)?)
            .context("failed to write capture sidecar")?;

        info!(
            "Recording {} at {:.3} MHz into {:?}",
            params.sat_id,
            params.freq / 1e6,
            stem
        );
        *active = Some(ActiveRecording { stem: stem.clone(), meta });
        Ok(stem)
    }

    /// Finalise the current capture's sidecar. Idempotent.
    pub async fn stop_record(&self) -> Result<Option<PathBuf>> {
        let mut active = self.active.lock().await;
        let Some(recording) = active.take() else {
            return Ok(None);
        };
        let mut meta = recording.meta;
        meta.end_time = Some(Utc::now());
        std::fs::write(
            sidecar_path(&recording.stem),
            serde_json::to_vec_pretty(&meta)?,
        )
        .context("failed to finalise capture sidecar")?;
        info!("Recording stopped: {:?}", recording.stem);
        Ok(Some(recording.stem))
    }
}

struct SdrCommandHandler {
    recorder: Arc<Recorder>,
}

#[async_trait]
impl MessageHandler for SdrCommandHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Command
    }

    async fn handle(
        &self,
        message: &Message,
        correlation_id: Option<&str>,
        node: &NodeHandle,
    ) -> HandlerResult {
        let params = message.payload_value();
        let (telemetry_type, data) = match message.payload_type() {
            "start_record" => match serde_json::from_value::<SdrParams>(params.clone()) {
                Ok(sdr_params) => match self.recorder.start_record(&sdr_params).await {
                    Ok(stem) => ("record_started", json!({"stem": stem})),
                    Err(e) => {
                        error!("start_record failed: {:#}", e);
                        ("record_started", Value::Null)
                    }
                },
                Err(e) => {
                    warn!("Malformed start_record parameters: {}", e);
                    ("record_started", Value::Null)
                }
            },
            "stop_record" => match self.recorder.stop_record().await {
                Ok(stem) => ("record_stopped", json!({"stem": stem})),
                Err(e) => {
                    error!("stop_record failed: {:#}", e);
                    ("record_stopped", Value::Null)
                }
            },
            "status" => {
                let status = if self.recorder.is_recording().await {
                    "recording"
                } else {
                    "idle"
                };
                ("status", json!({"status": status}))
            }
            other => {
                warn!("Unknown sdr command '{}'", other);
                return Ok(None);
            }
        };

        let routing_key = format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.{telemetry_type}");
        let reply = node.messenger().telemetry(telemetry_type, data.clone());
        node.publish(&routing_key, &reply, correlation_id).await;
        Ok(Some(data))
    }
}

fn node_config() -> NodeConfig {
    NodeConfig::service("sdr-controller")
        .exchange(Exchange::topic(SERVICE))
        .binding(Binding::new(
            SERVICE,
            &[&format!("{ROUTING_PREFIX}.{SERVICE}.command.*")],
        ))
        .publishing(Publishing::new(
            SERVICE,
            true,
            &[
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.record_started"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.record_stopped"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.status"),
            ],
        ))
}

pub struct SdrService {
    node: MessageNode,
    recorder: Arc<Recorder>,
}

impl SdrService {
    pub async fn serve(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let recorder = Arc::new(Recorder::new(
            ObservationPaths::new(&config.observations_dir),
            config.sample_rate_hz,
        ));
        let messenger = Messenger::new("sdr-controller", crate::MESSAGE_VERSION);
        let mut node =
            MessageNode::connect(node_config(), &config.nats_url, messenger, cancel).await?;
        node.add_handler(Arc::new(SdrCommandHandler {
            recorder: recorder.clone(),
        }));
        node.start().await?;
        Ok(Self { node, recorder })
    }

    pub async fn stop(&mut self) {
        // Never leave a capture without an end time.
        if let Err(e) = self.recorder.stop_record().await {
            error!("Failed to finalise capture on shutdown: {:#}", e);
        }
        self.node.stop().await;
    }
}

/// RPC client for the SDR service.
pub struct SdrClient {
    client: CommandClient,
}

impl SdrClient {
    pub async fn connect(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let client = CommandClient::connect(
            SERVICE,
            &["start_record", "stop_record", "status"],
            &config.nats_url,
            config.rpc_timeout(),
            cancel,
        )
        .await?;
        Ok(Self { client })
    }

    /// Start recording. `None` (timeout) or a null stem means the device
    /// refused; callers treat both as a failed pass.
    pub async fn start_record(&self, params: &SdrParams) -> Option<Value> {
        let data = self.client.call("start_record", json!(params)).await?;
        (!data["stem"].is_null()).then_some(data)
    }

    pub async fn stop_record(&self) -> Option<Value> {
        self.client.call("stop_record", json!({})).await
    }

    pub async fn status(&self) -> Option<Value> {
        self.client.call("status", json!({})).await
    }

    pub async fn stop(&mut self) {
        self.client.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (tempfile::TempDir, Recorder) {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ObservationPaths::new(tmp.path());
        (tmp, Recorder::new(paths, 50_000.0))
    }

    fn params() -> SdrParams {
        SdrParams {
            sat_id: "25544".to_string(),
            freq: 437.8e6,
        }
    }

    #[test]
    fn band_split_at_vhf_boundary() {
        assert_eq!(band_for(145.8e6), "VHF");
        assert_eq!(band_for(150e6), "VHF");
        assert_eq!(band_for(437.8e6), "UHF");
    }

    #[tokio::test]
    async fn start_creates_data_and_sidecar_sharing_a_stem() {
        let (_tmp, recorder) = recorder();
        let stem = recorder.start_record(&params()).await.unwrap();
        assert!(data_path(&stem).is_file());
        assert!(sidecar_path(&stem).is_file());
        assert!(recorder.is_recording().await);

        let meta: CaptureMeta =
            serde_json::from_str(&std::fs::read_to_string(sidecar_path(&stem)).unwrap()).unwrap();
        assert_eq!(meta.sat_id, "25544");
        assert_eq!(meta.band, "UHF");
        assert!(meta.end_time.is_none());
    }

    #[tokio::test]
    async fn stop_finalises_the_sidecar_and_is_idempotent() {
        let (_tmp, recorder) = recorder();
        let stem = recorder.start_record(&params()).await.unwrap();
        let stopped = recorder.stop_record().await.unwrap();
        assert_eq!(stopped, Some(stem.clone()));
        assert!(!recorder.is_recording().await);

        let meta: CaptureMeta =
            serde_json::from_str(&std::fs::read_to_string(sidecar_path(&stem)).unwrap()).unwrap();
        assert!(meta.end_time.is_some());

        // Second stop is a no-op.
        assert_eq!(recorder.stop_record().await.unwrap(), None);
    }

    #[tokio::test]
    async fn overlapping_recordings_are_refused() {
        let (_tmp, recorder) = recorder();
        recorder.start_record(&params()).await.unwrap();
        assert!(recorder.start_record(&params()).await.is_err());
    }
}
