//! Radiometric profile service: downlink frequency lists per satellite.
//!
//! Frequencies are ranked curated-first: active entries from the curated
//! downlink list, then transmitter downlinks that are not CW beacons,
//! de-duplicated preserving order.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::catalog::{DatabaseClient, SatelliteRecord};
use crate::config::StationConfig;
use crate::messaging::{
    Binding, CommandClient, Exchange, HandlerKind, HandlerResult, Message, MessageHandler,
    MessageNode, Messenger, NodeConfig, NodeHandle, Publishing, ROUTING_PREFIX,
};

pub const SERVICE: &str = "radiometrics";

/// Ranked downlink frequencies for a record.
pub fn downlink_freqs(record: &SatelliteRecord) -> Vec<f64> {
    let mut freqs: Vec<f64> = Vec::new();
    let mut push_unique = |freq: f64, freqs: &mut Vec<f64>| {
        if !freqs.iter().any(|f| (f - freq).abs() < f64::EPSILON) {
            freqs.push(freq);
        }
    };

    for link in &record.downlinks {
        if !link.active {
            continue;
        }
        if let Some(low) = link.low {
            push_unique(low, &mut freqs);
        } else if let Some(high) = link.high {
            push_unique(high, &mut freqs);
        }
    }

    for tx in &record.transmitters {
        let is_cw = tx
            .mode
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("cw"));
        if is_cw {
            continue;
        }
        if let Some(low) = tx.downlink_low {
            push_unique(low, &mut freqs);
        }
    }

    freqs
}

struct RadiometricsApi {
    db: DatabaseClient,
}

impl RadiometricsApi {
    async fn get_downlink_freqs(&self, sat_id: &str) -> Vec<f64> {
        match self.db.query_record(sat_id).await {
            Some(record) => downlink_freqs(&record),
            None => {
                warn!("No catalog record for {}", sat_id);
                Vec::new()
            }
        }
    }
}

struct RadiometricsCommandHandler {
    api: Arc<RadiometricsApi>,
}

#[async_trait]
impl MessageHandler for RadiometricsCommandHandler {
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
            "get_downlink_freqs" => {
                let sat_id = params["sat_id"].as_str().unwrap_or_default();
                let freqs = self.api.get_downlink_freqs(sat_id).await;
                ("downlink_freqs", json!({"sat_id": sat_id, "freqs": freqs}))
            }
            "status" => ("status", json!({"status": "active"})),
            other => {
                warn!("Unknown radiometrics command '{}'", other);
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
    NodeConfig::service("radiometrics-controller")
        .exchange(Exchange::topic(SERVICE))
        .binding(Binding::new(
            SERVICE,
            &[&format!("{ROUTING_PREFIX}.{SERVICE}.command.*")],
        ))
        .publishing(Publishing::new(
            SERVICE,
            true,
            &[
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.downlink_freqs"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.status"),
            ],
        ))
}

pub struct RadiometricsService {
    node: MessageNode,
}

impl RadiometricsService {
    pub async fn serve(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        // The embedded database client rides on the same cancellation token,
        // so its consumer exits with the service.
        let db = DatabaseClient::connect(config, cancel.clone()).await?;
        let api = Arc::new(RadiometricsApi { db });
        let messenger = Messenger::new("radiometrics-controller", crate::MESSAGE_VERSION);
        let mut node =
            MessageNode::connect(node_config(), &config.nats_url, messenger, cancel).await?;
        node.add_handler(Arc::new(RadiometricsCommandHandler { api }));
        node.start().await?;
        Ok(Self { node })
    }

    pub async fn stop(&mut self) {
        self.node.stop().await;
    }
}

/// RPC client for the radiometrics service.
pub struct RadiometricsClient {
    client: CommandClient,
}

impl RadiometricsClient {
    pub async fn connect(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let client = CommandClient::connect(
            SERVICE,
            &["get_downlink_freqs", "status"],
            &config.nats_url,
            config.rpc_timeout(),
            cancel,
        )
        .await?;
        Ok(Self { client })
    }

    pub async fn get_downlink_freqs(&self, sat_id: &str) -> Option<Vec<f64>> {
        let response = self
            .client
            .call("get_downlink_freqs", json!({"sat_id": sat_id}))
            .await?;
        serde_json::from_value(response["freqs"].clone()).ok()
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
    use crate::catalog::{DownlinkEntry, Transmitter};

    fn record() -> SatelliteRecord {
        SatelliteRecord {
            catalog_id: "25544".to_string(),
            name: None,
            tle1: String::new(),
            tle2: String::new(),
            transmitters: vec![
                Transmitter {
                    description: None,
                    downlink_low: Some(145.8e6),
                    downlink_high: None,
                    mode: Some("FM".to_string()),
                },
                Transmitter {
                    description: None,
                    downlink_low: Some(437.0e6),
                    downlink_high: None,
                    mode: Some("CW".to_string()),
                },
            ],
            downlinks: vec![
                DownlinkEntry {
                    low: Some(437.8e6),
                    high: None,
                    active: true,
                },
                DownlinkEntry {
                    low: None,
                    high: Some(145.9e6),
                    active: true,
                },
                DownlinkEntry {
                    low: Some(120.0e6),
                    high: None,
                    active: false,
                },
            ],
        }
    }

    #[test]
    fn curated_active_entries_rank_first() {
        let freqs = downlink_freqs(&record());
        assert_eq!(freqs, vec![437.8e6, 145.9e6, 145.8e6]);
    }

    #[test]
    fn cw_transmitters_are_skipped() {
        let freqs = downlink_freqs(&record());
        assert!(!freqs.contains(&437.0e6));
    }

    #[test]
    fn duplicates_are_removed_preserving_order() {
        let mut rec = record();
        rec.transmitters.push(Transmitter {
            description: None,
            downlink_low: Some(437.8e6),
            downlink_high: None,
            mode: Some("FM".to_string()),
        });
        let freqs = downlink_freqs(&rec);
        assert_eq!(freqs, vec![437.8e6, 145.9e6, 145.8e6]);
    }

    #[test]
    fn no_links_yields_empty_list() {
        let rec = SatelliteRecord {
            catalog_id: "1".to_string(),
            name: None,
            tle1: String::new(),
            tle2: String::new(),
            transmitters: Vec::new(),
            downlinks: Vec::new(),
        };
        assert!(downlink_freqs(&rec).is_empty());
    }
}
