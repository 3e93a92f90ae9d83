//! Broker surface of the astrodynamics service.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::astro::SpaceTracker;
use crate::catalog::DatabaseClient;
use crate::config::StationConfig;
use crate::messaging::{
    Binding, Exchange, HandlerKind, HandlerResult, Message, MessageHandler, MessageNode,
    Messenger, NodeConfig, NodeHandle, Publishing, ROUTING_PREFIX,
};
use async_trait::async_trait;

pub const SERVICE: &str = "astrodynamics";

#[derive(Debug, Deserialize)]
struct SatParams {
    sat_id: String,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    delta_t: Option<i64>,
    #[serde(default)]
    aos: Option<DateTime<Utc>>,
    #[serde(default)]
    los: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct WindowParams {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

struct AstroCommandHandler {
    tracker: Arc<SpaceTracker>,
}

impl AstroCommandHandler {
    fn sat_params(params: &Value) -> Option<SatParams> {
        match serde_json::from_value(params.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Malformed astrodynamics parameters: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl MessageHandler for AstroCommandHandler {
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
            "get_kinematic_state" => {
                let data = match Self::sat_params(params) {
                    Some(p) => match self.tracker.get_kinematic_state(&p.sat_id, p.time).await {
                        Ok(state) => json!(state),
                        Err(e) => {
                            error!("get_kinematic_state failed: {:#}", e);
                            Value::Null
                        }
                    },
                    None => Value::Null,
                };
                ("kinematic_state", data)
            }
            "get_aos_los" => {
                let data = match Self::sat_params(params) {
                    Some(p) => match self
                        .tracker
                        .get_aos_los(&p.sat_id, p.time, p.delta_t)
                        .await
                    {
                        Ok(map) => json!(map),
                        Err(e) => {
                            error!("get_aos_los failed: {:#}", e);
                            Value::Null
                        }
                    },
                    None => Value::Null,
                };
                ("aos_los", data)
            }
            "get_interpolated_orbit" => {
                let data = match Self::sat_params(params) {
                    Some(p) => match self
                        .tracker
                        .get_interpolated_orbit(&p.sat_id, p.aos, p.los)
                        .await
                    {
                        Ok(orbit) => json!(orbit),
                        Err(e) => {
                            error!("get_interpolated_orbit failed: {:#}", e);
                            Value::Null
                        }
                    },
                    None => Value::Null,
                };
                ("interpolated_orbit", data)
            }
            "get_all_aos_los" => {
                let data = match serde_json::from_value::<WindowParams>(params.clone()) {
                    Ok(w) => match self.tracker.get_all_aos_los(w.start_time, w.end_time).await {
                        Ok(rows) => json!({"passes": rows}),
                        Err(e) => {
                            error!("get_all_aos_los failed: {:#}", e);
                            Value::Null
                        }
                    },
                    Err(e) => {
                        warn!("Malformed window parameters: {}", e);
                        Value::Null
                    }
                };
                ("all_aos_los", data)
            }
            "recompute_all_orbits" => {
                let data = match self.tracker.recompute_all().await {
                    Ok(count) => json!({"computed": count}),
                    Err(e) => {
                        error!("recompute_all_orbits failed: {:#}", e);
                        Value::Null
                    }
                };
                ("recompute_complete", data)
            }
            "get_tle" => {
                let data = match Self::sat_params(params) {
                    Some(p) => match self.tracker.get_tle(&p.sat_id).await {
                        Ok((tle1, tle2)) => json!({"tle1": tle1, "tle2": tle2}),
                        Err(e) => {
                            error!("get_tle failed: {:#}", e);
                            Value::Null
                        }
                    },
                    None => Value::Null,
                };
                ("tle", data)
            }
            "status" => ("status", json!({"status": "active"})),
            other => {
                warn!("Unknown astrodynamics command '{}'", other);
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
    NodeConfig::service("astrodynamics-controller")
        .exchange(Exchange::topic(SERVICE))
        .binding(Binding::new(
            SERVICE,
            &[&format!("{ROUTING_PREFIX}.{SERVICE}.command.*")],
        ))
        .publishing(Publishing::new(
            SERVICE,
            true,
            &[
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.kinematic_state"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.aos_los"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.interpolated_orbit"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.all_aos_los"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.recompute_complete"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.tle"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.status"),
            ],
        ))
}

pub struct AstrodynamicsService {
    node: MessageNode,
}

impl AstrodynamicsService {
    pub async fn serve(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let db = DatabaseClient::connect(config, cancel.clone()).await?;
        let tracker = Arc::new(SpaceTracker::new(
            config.observer(),
            config.min_elevation_deg,
            config.aos_search_hours,
            db,
        ));
        let messenger = Messenger::new("astrodynamics-controller", crate::MESSAGE_VERSION);
        let mut node =
            MessageNode::connect(node_config(), &config.nats_url, messenger, cancel).await?;
        node.add_handler(Arc::new(AstroCommandHandler { tracker }));
        node.start().await?;
        Ok(Self { node })
    }

    pub async fn stop(&mut self) {
        self.node.stop().await;
    }
}
