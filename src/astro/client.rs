//! RPC client for the astrodynamics service.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::astro::{AosLosSummary, EventMap, InterpolatedOrbit, KinematicState};
use crate::config::StationConfig;
use crate::messaging::CommandClient;

use super::service::SERVICE;

pub struct AstrodynamicsClient {
    client: CommandClient,
    all_aos_los_timeout: std::time::Duration,
}

impl AstrodynamicsClient {
    pub async fn connect(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let client = CommandClient::connect(
            SERVICE,
            &[
                "get_kinematic_state",
                "get_aos_los",
                "get_interpolated_orbit",
                "get_all_aos_los",
                "recompute_all_orbits",
                "get_tle",
                "status",
            ],
            &config.nats_url,
            config.rpc_timeout(),
            cancel,
        )
        .await?;
        Ok(Self {
            client,
            all_aos_los_timeout: std::time::Duration::from_secs(config.all_aos_los_timeout_secs),
        })
    }

    pub async fn get_kinematic_state(&self, sat_id: &str) -> Option<KinematicState> {
        let data = self
            .client
            .call("get_kinematic_state", json!({"sat_id": sat_id}))
            .await?;
        serde_json::from_value(data).ok()
    }

    pub async fn get_kinematic_state_at(
        &self,
        sat_id: &str,
        time: DateTime<Utc>,
    ) -> Option<KinematicState> {
        let data = self
            .client
            .call("get_kinematic_state", json!({"sat_id": sat_id, "time": time}))
            .await?;
        serde_json::from_value(data).ok()
    }

    pub async fn get_aos_los(&self, sat_id: &str) -> Option<EventMap> {
        let data = self
            .client
            .call("get_aos_los", json!({"sat_id": sat_id}))
            .await?;
        serde_json::from_value(data).ok()
    }

    /// AOS/LOS search anchored at an explicit time (bypasses the cache).
    pub async fn get_aos_los_at(&self, sat_id: &str, time: DateTime<Utc>) -> Option<EventMap> {
        let data = self
            .client
            .call("get_aos_los", json!({"sat_id": sat_id, "time": time}))
            .await?;
        serde_json::from_value(data).ok()
    }

    /// Orbit between explicit endpoints (bypasses the cache).
    pub async fn get_interpolated_orbit_between(
        &self,
        sat_id: &str,
        aos: DateTime<Utc>,
        los: DateTime<Utc>,
    ) -> Option<InterpolatedOrbit> {
        let data = self
            .client
            .call(
                "get_interpolated_orbit",
                json!({"sat_id": sat_id, "aos": aos, "los": los}),
            )
            .await?;
        serde_json::from_value(data).ok()
    }

    pub async fn get_interpolated_orbit(&self, sat_id: &str) -> Option<InterpolatedOrbit> {
        let data = self
            .client
            .call("get_interpolated_orbit", json!({"sat_id": sat_id}))
            .await?;
        serde_json::from_value(data).ok()
    }

    /// Whole-catalog listing; may trigger a recompute on the service side,
    /// so it runs under the long timeout.
    pub async fn get_all_aos_los(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<Vec<AosLosSummary>> {
        let data = self
            .client
            .call_with_timeout(
                "get_all_aos_los",
                json!({"start_time": start, "end_time": end}),
                self.all_aos_los_timeout,
            )
            .await?;
        serde_json::from_value(data["passes"].clone()).ok()
    }

    /// Fire-and-forget: the recompute can take minutes.
    pub async fn recompute_all_orbits(&self) {
        self.client.send("recompute_all_orbits", json!({})).await;
    }

    pub async fn get_tle(&self, sat_id: &str) -> Option<(String, String)> {
        let data = self.client.call("get_tle", json!({"sat_id": sat_id})).await?;
        let tle1 = data["tle1"].as_str()?.to_string();
        let tle2 = data["tle2"].as_str()?.to_string();
        Some((tle1, tle2))
    }

    pub async fn status(&self) -> Option<Value> {
        self.client.call("status", json!({})).await
    }

    pub async fn stop(&mut self) {
        self.client.stop().await;
    }
}
