//! Mount service: the rotator behind a `status / set / stop` contract.
//!
//! The rotator is a single process-wide resource, so it is modelled as an
//! actor with one command channel — exactly one command is in flight at a
//! time regardless of how many broker messages arrive. The hardware protocol
//! itself lives behind `RotatorDriver`; a simulated driver with a finite
//! slew rate stands in when no hardware is attached.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::StationConfig;
use crate::messaging::{
    Binding, CommandClient, Exchange, HandlerError, HandlerKind, HandlerResult, Message,
    MessageHandler, MessageNode, Messenger, NodeConfig, NodeHandle, Publishing, ROUTING_PREFIX,
};

pub const SERVICE: &str = "mount";

/// Mechanical azimuth range of the rotator.
pub const AZ_MIN: f64 = 0.0;
pub const AZ_MAX: f64 = 540.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotatorStatus {
    pub azimuth: f64,
    pub elevation: f64,
}

/// The hardware contract. Implementations must be safe to call from the
/// single actor task only.
#[async_trait]
pub trait RotatorDriver: Send + Sync {
    async fn status(&self) -> Result<RotatorStatus>;
    async fn set(&self, az: f64, el: f64) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

struct SimState {
    az: f64,
    el: f64,
    target_az: f64,
    target_el: f64,
    updated: Instant,
    moving: bool,
}

/// Software rotator that slews linearly toward its target at a fixed rate.
pub struct SimulatedRotator {
    state: Mutex<SimState>,
    rate_deg_per_sec: f64,
}

impl SimulatedRotator {
    pub fn new(az: f64, el: f64, rate_deg_per_sec: f64) -> Self {
        Self {
            state: Mutex::new(SimState {
                az,
                el,
                target_az: az,
                target_el: el,
                updated: Instant::now(),
                moving: false,
            }),
            rate_deg_per_sec,
        }
    }

    fn advance(&self, state: &mut SimState) {
        let elapsed = state.updated.elapsed().as_secs_f64();
        state.updated = Instant::now();
        if !state.moving {
            return;
        }
        let budget = elapsed * self.rate_deg_per_sec;
        let az_step = (state.target_az - state.az).clamp(-budget, budget);
        let el_step = (state.target_el - state.el).clamp(-budget, budget);
        state.az += az_step;
        state.el += el_step;
        if state.az == state.target_az && state.el == state.target_el {
            state.moving = false;
        }
    }
}

#[async_trait]
impl RotatorDriver for SimulatedRotator {
    async fn status(&self) -> Result<RotatorStatus> {
        let mut state = self.state.lock().await;
        self.advance(&mut state);
        Ok(RotatorStatus {
            azimuth: state.az,
            elevation: state.el,
        })
    }

    async fn set(&self, az: f64, el: f64) -> Result<()> {
        if !(AZ_MIN..=AZ_MAX).contains(&az) {
            return Err(anyhow!("azimuth {az} outside [{AZ_MIN}, {AZ_MAX}]"));
        }
        let mut state = self.state.lock().await;
        self.advance(&mut state);
        state.target_az = az;
        state.target_el = el;
        state.moving = true;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.advance(&mut state);
        state.target_az = state.az;
        state.target_el = state.el;
        state.moving = false;
        Ok(())
    }
}

enum MountCommand {
    Status(oneshot::Sender<Result<RotatorStatus>>),
    Set(f64, f64, oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<Result<()>>),
}

/// Handle to the rotator actor.
#[derive(Clone)]
pub struct MountActor {
    commands: mpsc::Sender<MountCommand>,
}

impl MountActor {
    /// Spawn the actor task over `driver`.
    pub fn spawn(driver: Arc<dyn RotatorDriver>, cancel: CancellationToken) -> Self {
        let (tx, mut rx) = mpsc::channel::<MountCommand>(16);
        tokio::spawn(async move {
            loop {
                let command = tokio::select! {
                    command = rx.recv() => command,
                    _ = cancel.cancelled() => {
                        let _ = driver.stop().await;
                        break;
                    }
                };
                let Some(command) = command else { break };
                match command {
                    MountCommand::Status(reply) => {
                        let _ = reply.send(driver.status().await);
                    }
                    MountCommand::Set(az, el, reply) => {
                        let _ = reply.send(driver.set(az, el).await);
                    }
                    MountCommand::Stop(reply) => {
                        let _ = reply.send(driver.stop().await);
                    }
                }
            }
        });
        Self { commands: tx }
    }

    pub async fn status(&self) -> Result<RotatorStatus> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(MountCommand::Status(tx))
            .await
            .map_err(|_| anyhow!("rotator actor gone"))?;
        rx.await.map_err(|_| anyhow!("rotator actor dropped reply"))?
    }

    pub async fn set(&self, az: f64, el: f64) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(MountCommand::Set(az, el, tx))
            .await
            .map_err(|_| anyhow!("rotator actor gone"))?;
        rx.await.map_err(|_| anyhow!("rotator actor dropped reply"))?
    }

    pub async fn stop_rotor(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(MountCommand::Stop(tx))
            .await
            .map_err(|_| anyhow!("rotator actor gone"))?;
        rx.await.map_err(|_| anyhow!("rotator actor dropped reply"))?
    }
}

struct MountCommandHandler {
    actor: MountActor,
}

#[async_trait]
impl MessageHandler for MountCommandHandler {
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
            "status" => match self.actor.status().await {
                Ok(status) => ("status", json!(status)),
                Err(e) => return Err(HandlerError::transient(e)),
            },
            "set" => {
                let az = params["az"].as_f64().unwrap_or_default();
                let el = params["el"].as_f64().unwrap_or_default();
                match self.actor.set(az, el).await {
                    Ok(()) => ("set", json!({"az": az, "el": el})),
                    Err(e) => {
                        warn!("Rotator rejected set({az}, {el}): {:#}", e);
                        ("set", Value::Null)
                    }
                }
            }
            "stop" => match self.actor.stop_rotor().await {
                Ok(()) => ("stop", json!({"stopped": true})),
                Err(e) => return Err(HandlerError::transient(e)),
            },
            other => {
                warn!("Unknown mount command '{}'", other);
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
    NodeConfig::service("mount-controller")
        .exchange(Exchange::topic(SERVICE))
        .binding(Binding::new(
            SERVICE,
            &[&format!("{ROUTING_PREFIX}.{SERVICE}.command.*")],
        ))
        .publishing(Publishing::new(
            SERVICE,
            true,
            &[
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.status"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.set"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.stop"),
            ],
        ))
}

pub struct MountService {
    node: MessageNode,
}

impl MountService {
    pub async fn serve(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let driver = Arc::new(SimulatedRotator::new(
            config.az_home_deg,
            config.el_home_deg,
            config.rotator_rate_deg_per_sec,
        ));
        Self::serve_with_driver(config, driver, cancel).await
    }

    pub async fn serve_with_driver(
        config: &StationConfig,
        driver: Arc<dyn RotatorDriver>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let actor = MountActor::spawn(driver, cancel.clone());
        let messenger = Messenger::new("mount-controller", crate::MESSAGE_VERSION);
        let mut node =
            MessageNode::connect(node_config(), &config.nats_url, messenger, cancel).await?;
        node.add_handler(Arc::new(MountCommandHandler { actor }));
        node.start().await?;
        info!("Mount service ready");
        Ok(Self { node })
    }

    pub async fn stop(&mut self) {
        self.node.stop().await;
    }
}

/// RPC client for the mount service.
pub struct MountClient {
    client: CommandClient,
}

impl MountClient {
    pub async fn connect(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let client = CommandClient::connect(
            SERVICE,
            &["status", "set", "stop"],
            &config.nats_url,
            config.rpc_timeout(),
            cancel,
        )
        .await?;
        Ok(Self { client })
    }

    pub async fn status(&self) -> Option<RotatorStatus> {
        let data = self.client.call("status", json!({})).await?;
        serde_json::from_value(data).ok()
    }

    pub async fn set(&self, az: f64, el: f64) -> Option<Value> {
        self.client.call("set", json!({"az": az, "el": el})).await
    }

    pub async fn stop_rotor(&self) -> Option<Value> {
        self.client.call("stop", json!({})).await
    }

    pub async fn stop(&mut self) {
        self.client.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_rotator_slews_toward_target() {
        let rotator = SimulatedRotator::new(270.0, 0.0, 1000.0);
        rotator.set(280.0, 5.0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let status = rotator.status().await.unwrap();
        assert!((status.azimuth - 280.0).abs() < 1e-6);
        assert!((status.elevation - 5.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn simulated_rotator_moves_at_finite_rate() {
        let rotator = SimulatedRotator::new(270.0, 0.0, 10.0);
        rotator.set(350.0, 0.0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let status = rotator.status().await.unwrap();
        // After 0.1 s at 10 deg/s the rotator cannot be anywhere near 350.
        assert!(status.azimuth < 280.0);
        assert!(status.azimuth > 270.0 - 1e-9);
    }

    #[tokio::test]
    async fn simulated_rotator_rejects_out_of_range_azimuth() {
        let rotator = SimulatedRotator::new(270.0, 0.0, 10.0);
        assert!(rotator.set(541.0, 0.0).await.is_err());
        assert!(rotator.set(-1.0, 0.0).await.is_err());
    }

    #[tokio::test]
    async fn stop_freezes_the_rotator() {
        let rotator = SimulatedRotator::new(270.0, 0.0, 10.0);
        rotator.set(350.0, 10.0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        rotator.stop().await.unwrap();
        let frozen = rotator.status().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let later = rotator.status().await.unwrap();
        assert_eq!(frozen, later);
    }

    #[tokio::test]
    async fn actor_serialises_commands() {
        let cancel = CancellationToken::new();
        let actor = MountActor::spawn(
            Arc::new(SimulatedRotator::new(270.0, 0.0, 1000.0)),
            cancel.clone(),
        );
        actor.set(300.0, 20.0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let status = actor.status().await.unwrap();
        assert!((status.azimuth - 300.0).abs() < 1e-6);
        actor.stop_rotor().await.unwrap();
        cancel.cancel();
    }
}
