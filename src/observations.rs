//! Layout of the observations directory.
//!
//! Captures and derived artefacts live in sibling directories under one
//! configurable root. A capture is a data file plus a sidecar metadata file
//! sharing a stem; artefact generators key off that stem.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

pub const CAPTURE_DATA_EXT: &str = "dat";
pub const CAPTURE_META_EXT: &str = "json";

#[derive(Debug, Clone)]
pub struct ObservationPaths {
    pub captures: PathBuf,
    pub psd: PathBuf,
    pub spectrogram: PathBuf,
    pub panels: PathBuf,
}

impl ObservationPaths {
    pub fn new(root: &Path) -> Self {
        Self {
            captures: root.join("captures"),
            psd: root.join("psd"),
            spectrogram: root.join("spectrogram"),
            panels: root.join("panels"),
        }
    }

    /// Create all observation directories.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.captures, &self.psd, &self.spectrogram, &self.panels] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {:?}", dir))?;
        }
        Ok(())
    }

    /// Capture stem `<sat>_<band>_<yyyymmdd_hhmmss>` for a recording started
    /// at `time`.
    pub fn capture_stem(&self, sat_id: &str, band: &str, time: DateTime<Utc>) -> PathBuf {
        let formatted = time.format("%Y%m%d_%H%M%S");
        self.captures.join(format!("{sat_id}_{band}_{formatted}"))
    }

    /// Enumerate capture stems that have both a data file and a sidecar.
    pub fn capture_stems(&self) -> Result<Vec<PathBuf>> {
        let mut stems = Vec::new();
        let entries = match std::fs::read_dir(&self.captures) {
            Ok(entries) => entries,
            Err(_) => return Ok(stems),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(CAPTURE_DATA_EXT) {
                let stem = path.with_extension("");
                if sidecar_path(&stem).is_file() {
                    stems.push(stem);
                }
            }
        }
        stems.sort();
        Ok(stems)
    }
}

pub fn data_path(stem: &Path) -> PathBuf {
    stem.with_extension(CAPTURE_DATA_EXT)
}

pub fn sidecar_path(stem: &Path) -> PathBuf {
    stem.with_extension(CAPTURE_META_EXT)
}
