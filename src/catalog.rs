//! Satellite catalog store and the database service fronting it.
//!
//! The store is a keyed document file: a JSON object mapping catalog id to a
//! satellite record. No other component reads the file; everything goes
//! through the service's command surface.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::StationConfig;
use crate::messaging::{
    Binding, CommandClient, Exchange, HandlerError, HandlerKind, HandlerResult, Message,
    MessageHandler, MessageNode, Messenger, NodeConfig, NodeHandle, Publishing, ROUTING_PREFIX,
};

pub const SERVICE: &str = "database";

/// One transmitter entry from the upstream transmitter catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transmitter {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub downlink_low: Option<f64>,
    #[serde(default)]
    pub downlink_high: Option<f64>,
    #[serde(default)]
    pub mode: Option<String>,
}

/// One curated downlink entry (frequency pair plus an active flag).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownlinkEntry {
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub active: bool,
}

/// A catalog record. The core only consumes the id, the TLE and the downlink
/// frequency lists; everything else rides along untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteRecord {
    #[serde(default)]
    pub catalog_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub tle1: String,
    pub tle2: String,
    #[serde(default)]
    pub transmitters: Vec<Transmitter>,
    #[serde(default)]
    pub downlinks: Vec<DownlinkEntry>,
}

impl SatelliteRecord {
    pub fn has_active_downlink(&self) -> bool {
        self.downlinks.iter().any(|d| d.active)
    }
}

/// In-memory view of the catalog file.
#[derive(Debug)]
pub struct CatalogStore {
    path: PathBuf,
    records: HashMap<String, SatelliteRecord>,
}

impl CatalogStore {
    /// Load the catalog from `path`. A missing file yields an empty catalog;
    /// a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let records = if path.is_file() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read catalog {:?}", path))?;
            let mut records: HashMap<String, SatelliteRecord> = serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse catalog {:?}", path))?;
            for (id, record) in records.iter_mut() {
                if record.catalog_id.is_empty() {
                    record.catalog_id = id.clone();
                }
            }
            records
        } else {
            warn!("Catalog file {:?} not found; starting empty", path);
            HashMap::new()
        };
        info!("Catalog loaded: {} records", records.len());
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn reload(&mut self) -> Result<usize> {
        let fresh = Self::load(&self.path)?;
        self.records = fresh.records;
        Ok(self.records.len())
    }

    pub fn query(&self, catalog_id: &str) -> Option<&SatelliteRecord> {
        self.records.get(catalog_id)
    }

    pub fn satellite_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Ids of records carrying at least one active downlink.
    pub fn active_satellite_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .values()
            .filter(|r| r.has_active_downlink())
            .map(|r| r.catalog_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

struct DatabaseCommandHandler {
    store: Arc<RwLock<CatalogStore>>,
}

#[async_trait]
impl MessageHandler for DatabaseCommandHandler {
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
            "query_record" => {
                let sat_id = params["sat_id"].as_str().unwrap_or_default();
                let store = self.store.read().await;
                let record = store.query(sat_id);
                ("record", serde_json::to_value(record).map_err(HandlerError::fatal)?)
            }
            "get_satellite_ids" => {
                let store = self.store.read().await;
                ("satellite_ids", json!({"sat_ids": store.satellite_ids()}))
            }
            "get_active_satellites" => {
                let store = self.store.read().await;
                (
                    "active_satellites",
                    json!({"sat_ids": store.active_satellite_ids()}),
                )
            }
            "reload" => {
                let mut store = self.store.write().await;
                match store.reload() {
                    Ok(count) => ("reloaded", json!({"records": count})),
                    Err(e) => {
                        error!("Catalog reload failed: {:#}", e);
                        ("reloaded", json!({"records": Value::Null}))
                    }
                }
            }
            "status" => {
                let store = self.store.read().await;
                ("status", json!({"records": store.len()}))
            }
            other => {
                warn!("Unknown database command '{}'", other);
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
    NodeConfig::service("database-controller")
        .exchange(Exchange::topic(SERVICE))
        .binding(Binding::new(
            SERVICE,
            &[&format!("{ROUTING_PREFIX}.{SERVICE}.command.*")],
        ))
        .publishing(Publishing::new(
            SERVICE,
            true,
            &[
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.record"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.satellite_ids"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.active_satellites"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.reloaded"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.status"),
            ],
        ))
}

pub struct DatabaseService {
    node: MessageNode,
}

impl DatabaseService {
    pub async fn serve(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let store = CatalogStore::load(&config.catalog_path)?;
        let messenger = Messenger::new("database-controller", crate::MESSAGE_VERSION);
        let mut node =
            MessageNode::connect(node_config(), &config.nats_url, messenger, cancel).await?;
        node.add_handler(Arc::new(DatabaseCommandHandler {
            store: Arc::new(RwLock::new(store)),
        }));
        node.start().await?;
        Ok(Self { node })
    }

    pub async fn stop(&mut self) {
        self.node.stop().await;
    }
}

/// RPC client for the database service.
pub struct DatabaseClient {
    client: CommandClient,
}

impl DatabaseClient {
    pub async fn connect(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let client = CommandClient::connect(
            SERVICE,
            &[
                "query_record",
                "get_satellite_ids",
                "get_active_satellites",
                "reload",
                "status",
            ],
            &config.nats_url,
            config.rpc_timeout(),
            cancel,
        )
        .await?;
        Ok(Self { client })
    }

    pub async fn query_record(&self, sat_id: &str) -> Option<SatelliteRecord> {
        let response = self
            .client
            .call("query_record", json!({"sat_id": sat_id}))
            .await?;
        // A null reply means the id is unknown to the catalog.
        serde_json::from_value::<Option<SatelliteRecord>>(response)
            .ok()
            .flatten()
    }

    pub async fn get_satellite_ids(&self) -> Option<Vec<String>> {
        let response = self.client.call("get_satellite_ids", json!({})).await?;
        serde_json::from_value(response["sat_ids"].clone()).ok()
    }

    pub async fn get_active_satellites(&self) -> Option<Vec<String>> {
        let response = self.client.call("get_active_satellites", json!({})).await?;
        serde_json::from_value(response["sat_ids"].clone()).ok()
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

    fn sample_catalog() -> serde_json::Value {
        json!({
            "25544": {
                "name": "ISS (ZARYA)",
                "tle1": "1 25544U 98067A   24001.50000000  .00016717  00000-0  30316-3 0  9005",
                "tle2": "2 25544  51.6400 208.9163 0006317  69.9862 290.2620 15.49815308429890",
                "transmitters": [
                    {"description": "Mode V FM", "downlink_low": 145.8e6, "mode": "FM"}
                ],
                "downlinks": [
                    {"low": 145.8e6, "high": null, "active": true}
                ]
            },
            "43017": {
                "name": "QUIET-SAT",
                "tle1": "1 43017U 17073E   24001.50000000  .00001000  00000-0  10000-3 0  9993",
                "tle2": "2 43017  97.7000  10.0000 0010000  90.0000 270.0000 14.95000000 30000",
                "transmitters": [],
                "downlinks": [
                    {"low": 437.35e6, "high": null, "active": false}
                ]
            }
        })
    }

    fn store_from_sample() -> CatalogStore {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), sample_catalog().to_string()).unwrap();
        CatalogStore::load(tmp.path()).unwrap()
    }

    #[test]
    fn load_fills_catalog_id_from_key() {
        let store = store_from_sample();
        assert_eq!(store.len(), 2);
        assert_eq!(store.query("25544").unwrap().catalog_id, "25544");
        assert!(store.query("99999").is_none());
    }

    #[test]
    fn active_filter_keeps_only_live_downlinks() {
        let store = store_from_sample();
        assert_eq!(store.active_satellite_ids(), vec!["25544".to_string()]);
        assert_eq!(store.satellite_ids().len(), 2);
    }

    #[test]
    fn missing_file_is_an_empty_catalog() {
        let store = CatalogStore::load(Path::new("/nonexistent/catalog.json")).unwrap();
        assert!(store.is_empty());
    }
}
