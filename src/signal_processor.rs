//! Signal-processor service: post-capture artefact generation.
//!
//! For every finished capture the service derives three artefacts — a PSD
//! summary, a coarse spectrogram grid and a panel combining capture metadata
//! with power statistics — under the psd/spectrogram/panels observation
//! directories. Only block power estimates are computed here; detection and
//! demodulation live elsewhere.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::StationConfig;
use crate::messaging::{
    Binding, CommandClient, Exchange, HandlerKind, HandlerResult, Message, MessageHandler,
    MessageNode, Messenger, NodeConfig, NodeHandle, Publishing, ROUTING_PREFIX,
};
use crate::observations::{ObservationPaths, data_path, sidecar_path};
use crate::sdr::CaptureMeta;

pub const SERVICE: &str = "signal_processor";

/// Bins in a PSD summary.
const PSD_BINS: usize = 128;
/// Spectrogram grid dimensions (time rows x power columns).
const SPECTROGRAM_ROWS: usize = 32;
const SPECTROGRAM_COLS: usize = 32;
/// Noise floor guard for log power.
const POWER_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsdArtifact {
    pub stem: String,
    pub sample_rate: f64,
    pub freq: f64,
    pub num_samples: usize,
    pub power_db: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrogramArtifact {
    pub stem: String,
    pub rows: usize,
    pub cols: usize,
    pub power_db: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelArtifact {
    pub stem: String,
    pub meta: CaptureMeta,
    pub duration_secs: Option<f64>,
    pub mean_power_db: f64,
    pub peak_power_db: f64,
}

/// Mean block power (dB) of interleaved I/Q samples, `bins` blocks.
pub fn block_power_db(samples: &[i16], bins: usize) -> Vec<f64> {
    if samples.len() < 2 || bins == 0 {
        return Vec::new();
    }
    let pairs = samples.len() / 2;
    let per_bin = (pairs / bins).max(1);
    let mut out = Vec::with_capacity(bins.min(pairs));
    for bin in 0..bins {
        let start = bin * per_bin;
        if start >= pairs {
            break;
        }
        let end = ((bin + 1) * per_bin).min(pairs);
        let mut acc = 0.0f64;
        for pair in start..end {
            let i = f64::from(samples[2 * pair]) / f64::from(i16::MAX);
            let q = f64::from(samples[2 * pair + 1]) / f64::from(i16::MAX);
            acc += i * i + q * q;
        }
        let mean = acc / (end - start) as f64;
        out.push(10.0 * mean.max(POWER_FLOOR).log10());
    }
    out
}

fn read_samples(path: &Path) -> Result<Vec<i16>> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {:?}", path))?;
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

fn read_meta(stem: &Path) -> Result<CaptureMeta> {
    let contents = std::fs::read_to_string(sidecar_path(stem))
        .with_context(|| format!("failed to read sidecar for {:?}", stem))?;
    serde_json::from_str(&contents).context("malformed capture sidecar")
}

fn stem_name(stem: &Path) -> String {
    stem.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Derives artefacts from captures on disk.
pub struct ArtifactGenerator {
    paths: ObservationPaths,
}

impl ArtifactGenerator {
    pub fn new(paths: ObservationPaths) -> Self {
        Self { paths }
    }

    fn artefact_path(dir: &Path, stem: &Path) -> PathBuf {
        dir.join(format!("{}.json", stem_name(stem)))
    }

    /// Generate PSD artefacts for captures that do not have one yet.
    /// Per-capture failures are logged and skipped.
    pub fn generate_psds(&self) -> Result<Vec<PathBuf>> {
        self.paths.ensure()?;
        let mut written = Vec::new();
        for stem in self.paths.capture_stems()? {
            let out = Self::artefact_path(&self.paths.psd, &stem);
            if out.is_file() {
                continue;
            }
            match self.psd_for(&stem) {
                Ok(artifact) => {
                    std::fs::write(&out, serde_json::to_vec_pretty(&artifact)?)?;
                    written.push(out);
                }
                Err(e) => warn!("PSD generation failed for {:?}: {:#}", stem, e),
            }
        }
        info!("Generated {} PSD artefacts", written.len());
        Ok(written)
    }

    pub fn generate_spectrograms(&self) -> Result<Vec<PathBuf>> {
        self.paths.ensure()?;
        let mut written = Vec::new();
        for stem in self.paths.capture_stems()? {
            let out = Self::artefact_path(&self.paths.spectrogram, &stem);
            if out.is_file() {
                continue;
            }
            match self.spectrogram_for(&stem) {
                Ok(artifact) => {
                    std::fs::write(&out, serde_json::to_vec_pretty(&artifact)?)?;
                    written.push(out);
                }
                Err(e) => warn!("Spectrogram generation failed for {:?}: {:#}", stem, e),
            }
        }
        info!("Generated {} spectrogram artefacts", written.len());
        Ok(written)
    }

    pub fn generate_panels(&self) -> Result<Vec<PathBuf>> {
        self.paths.ensure()?;
        let mut written = Vec::new();
        for stem in self.paths.capture_stems()? {
            let out = Self::artefact_path(&self.paths.panels, &stem);
            if out.is_file() {
                continue;
            }
            match self.panel_for(&stem) {
                Ok(artifact) => {
                    std::fs::write(&out, serde_json::to_vec_pretty(&artifact)?)?;
                    written.push(out);
                }
                Err(e) => warn!("Panel generation failed for {:?}: {:#}", stem, e),
            }
        }
        info!("Generated {} panel artefacts", written.len());
        Ok(written)
    }

    fn psd_for(&self, stem: &Path) -> Result<PsdArtifact> {
        let meta = read_meta(stem)?;
        let samples = read_samples(&data_path(stem))?;
        Ok(PsdArtifact {
            stem: stem_name(stem),
            sample_rate: meta.sample_rate,
            freq: meta.freq,
            num_samples: samples.len() / 2,
            power_db: block_power_db(&samples, PSD_BINS),
        })
    }

    fn spectrogram_for(&self, stem: &Path) -> Result<SpectrogramArtifact> {
        let samples = read_samples(&data_path(stem))?;
        let pairs = samples.len() / 2;
        let per_row = (pairs / SPECTROGRAM_ROWS).max(1);
        let mut rows = Vec::new();
        for row in 0..SPECTROGRAM_ROWS {
            let start = 2 * row * per_row;
            if start >= samples.len() {
                break;
            }
            let end = (2 * (row + 1) * per_row).min(samples.len());
            rows.push(block_power_db(&samples[start..end], SPECTROGRAM_COLS));
        }
        Ok(SpectrogramArtifact {
            stem: stem_name(stem),
            rows: rows.len(),
            cols: SPECTROGRAM_COLS,
            power_db: rows,
        })
    }

    fn panel_for(&self, stem: &Path) -> Result<PanelArtifact> {
        let meta = read_meta(stem)?;
        let samples = read_samples(&data_path(stem))?;
        let power = block_power_db(&samples, PSD_BINS);
        let mean = if power.is_empty() {
            10.0 * POWER_FLOOR.log10()
        } else {
            power.iter().sum::<f64>() / power.len() as f64
        };
        let peak = power
            .iter()
            .copied()
            .fold(10.0 * POWER_FLOOR.log10(), f64::max);
        let duration_secs = meta
            .end_time
            .map(|end| (end - meta.start_time).num_milliseconds() as f64 / 1000.0);
        Ok(PanelArtifact {
            stem: stem_name(stem),
            meta,
            duration_secs,
            mean_power_db: mean,
            peak_power_db: peak,
        })
    }
}

struct SignalProcessorCommandHandler {
    generator: Arc<ArtifactGenerator>,
}

#[async_trait]
impl MessageHandler for SignalProcessorCommandHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Command
    }

    async fn handle(
        &self,
        message: &Message,
        correlation_id: Option<&str>,
        node: &NodeHandle,
    ) -> HandlerResult {
        let (telemetry_type, data) = match message.payload_type() {
            "generate_psds" => match self.generator.generate_psds() {
                Ok(written) => ("psds_generated", json!({"count": written.len()})),
                Err(e) => {
                    error!("generate_psds failed: {:#}", e);
                    ("psds_generated", Value::Null)
                }
            },
            "generate_spectrograms" => match self.generator.generate_spectrograms() {
                Ok(written) => ("spectrograms_generated", json!({"count": written.len()})),
                Err(e) => {
                    error!("generate_spectrograms failed: {:#}", e);
                    ("spectrograms_generated", Value::Null)
                }
            },
            "generate_panels" => match self.generator.generate_panels() {
                Ok(written) => ("panels_generated", json!({"count": written.len()})),
                Err(e) => {
                    error!("generate_panels failed: {:#}", e);
                    ("panels_generated", Value::Null)
                }
            },
            "status" => ("status", json!({"status": "active"})),
            other => {
                warn!("Unknown signal-processor command '{}'", other);
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
    NodeConfig::service("signal-processor-controller")
        .exchange(Exchange::topic(SERVICE))
        .binding(Binding::new(
            SERVICE,
            &[&format!("{ROUTING_PREFIX}.{SERVICE}.command.*")],
        ))
        .publishing(Publishing::new(
            SERVICE,
            true,
            &[
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.psds_generated"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.spectrograms_generated"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.panels_generated"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.status"),
            ],
        ))
}

pub struct SignalProcessorService {
    node: MessageNode,
}

impl SignalProcessorService {
    pub async fn serve(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let generator = Arc::new(ArtifactGenerator::new(ObservationPaths::new(
            &config.observations_dir,
        )));
        let messenger = Messenger::new("signal-processor-controller", crate::MESSAGE_VERSION);
        let mut node =
            MessageNode::connect(node_config(), &config.nats_url, messenger, cancel).await?;
        node.add_handler(Arc::new(SignalProcessorCommandHandler { generator }));
        node.start().await?;
        Ok(Self { node })
    }

    pub async fn stop(&mut self) {
        self.node.stop().await;
    }
}

/// RPC client for the signal-processor service.
pub struct SignalProcessorClient {
    client: CommandClient,
}

impl SignalProcessorClient {
    pub async fn connect(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let client = CommandClient::connect(
            SERVICE,
            &[
                "generate_psds",
                "generate_spectrograms",
                "generate_panels",
                "status",
            ],
            &config.nats_url,
            config.rpc_timeout(),
            cancel,
        )
        .await?;
        Ok(Self { client })
    }

    pub async fn generate_psds(&self) -> Option<Value> {
        self.client.call("generate_psds", json!({})).await
    }

    pub async fn generate_spectrograms(&self) -> Option<Value> {
        self.client.call("generate_spectrograms", json!({})).await
    }

    pub async fn generate_panels(&self) -> Option<Value> {
        self.client.call("generate_panels", json!({})).await
    }

    pub async fn status(&self) -> Option<Value> {
        self.client.call("status", json!({})).await
    }

    pub async fn stop(&mut self) {
        self.client.stop().await;
    }
}
