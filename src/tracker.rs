//! Tracker service: rotator pre-positioning geometry and the continuous
//! slew loop.
//!
//! The rotator's azimuth axis spans `[0°, 540°]` with home at 270°, so for
//! every pass the tracker must decide whether to approach the AOS azimuth
//! clockwise or counter-clockwise from home such that the whole pass stays
//! inside the mechanical range. Passes that fit neither way are rejected.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::astro::{AstrodynamicsClient, InterpolatedOrbit};
use crate::config::StationConfig;
use crate::messaging::{
    Binding, CommandClient, Exchange, HandlerKind, HandlerResult, Message, MessageHandler,
    MessageNode, Messenger, NodeConfig, NodeHandle, Publishing, ROUTING_PREFIX,
};
use crate::mount::{AZ_MAX, AZ_MIN, MountClient};
use crate::task::Task;

pub const SERVICE: &str = "tracker";

/// Azimuth of the rotator rest position.
pub const AZ_HOME: f64 = 270.0;
/// Largest angular travel from home either direction may use.
const MAX_TRAVEL: f64 = 270.0;

/// Rotor angles for AOS pre-positioning: the adjusted AOS azimuth, the
/// halfway point used for the two-step slew, and the AOS elevation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AosRotorAngles {
    pub az_aos: f64,
    pub az_half: f64,
    pub el_aos: f64,
}

/// Azimuth expressed on the clockwise side of home: `[270°, 630°)`.
/// 270° itself is already home and stays fixed.
fn clockwise_angle(phi: f64) -> f64 {
    if phi >= AZ_HOME { phi } else { phi + 360.0 }
}

/// Azimuth expressed on the counter-clockwise side of home: `(-90°, 270°]`.
fn counterclockwise_angle(phi: f64) -> f64 {
    if phi > AZ_HOME { phi - 360.0 } else { phi }
}

/// Total angular sweep along an ordered azimuth track, each step taken the
/// short way around.
fn orbit_sweep(az_track: &[f64]) -> f64 {
    az_track
        .windows(2)
        .map(|pair| {
            let mut diff = (pair[1] - pair[0]).abs();
            if diff > 180.0 {
                diff = 360.0 - diff;
            }
            diff
        })
        .sum()
}

/// Furthest angular extent from home for a clockwise and counter-clockwise
/// approach of the given pass, plus the raw AOS azimuth and elevation.
pub fn max_rotor_travel(az_rate_aos: f64, orbit: &InterpolatedOrbit) -> Result<(f64, f64, f64, f64)> {
    let (Some(&az_aos), Some(&el_aos)) = (orbit.az.first(), orbit.el.first()) else {
        return Err(anyhow!("orbit has no samples"));
    };
    let clockwise_orbit = az_rate_aos > 0.0;
    let sweep = orbit_sweep(&orbit.az);
    let phi_orbit = if clockwise_orbit { sweep } else { -sweep };

    let phi_aos_cw = clockwise_angle(az_aos) - AZ_HOME;
    let phi_aos_ccw = counterclockwise_angle(az_aos) - AZ_HOME;

    let phi_max_cw = phi_aos_cw.max((phi_aos_cw + phi_orbit).abs());
    let phi_max_ccw = phi_aos_ccw.abs().max((phi_aos_ccw + phi_orbit).abs());

    Ok((phi_max_cw, phi_max_ccw, az_aos, el_aos))
}

/// Choose the pre-positioning direction and emit the rotor angles.
///
/// The direction with the smaller maximum travel wins; on a tie (the AOS
/// azimuth exactly at home) clockwise wins. When both directions exceed the
/// travel limit the pass is rejected.
pub fn aos_rotor_angles(az_rate_aos: f64, orbit: &InterpolatedOrbit) -> Result<AosRotorAngles> {
    let (phi_max_cw, phi_max_ccw, az_aos, el_aos) = max_rotor_travel(az_rate_aos, orbit)?;

    if phi_max_cw > MAX_TRAVEL && phi_max_ccw > MAX_TRAVEL {
        return Err(anyhow!(
            "pass exceeds rotator travel both ways (cw {phi_max_cw:.1}, ccw {phi_max_ccw:.1})"
        ));
    }

    let clockwise = if phi_max_cw <= phi_max_ccw {
        if phi_max_cw <= MAX_TRAVEL {
            info!("Initial rotation direction: cw");
            true
        } else {
            info!("Clockwise travel out of range; using ccw");
            false
        }
    } else if phi_max_ccw <= MAX_TRAVEL {
        info!("Initial rotation direction: ccw");
        false
    } else {
        info!("Counter-clockwise travel out of range; using cw");
        true
    };

    let (az_aos, az_half) = if clockwise {
        let az = clockwise_angle(az_aos);
        (az, AZ_HOME + (az - AZ_HOME) / 2.0)
    } else {
        let az = counterclockwise_angle(az_aos);
        (az, AZ_HOME - (AZ_HOME - az) / 2.0)
    };

    Ok(AosRotorAngles {
        az_aos,
        az_half,
        el_aos,
    })
}

/// Pick the coterminal representation of `raw_az` inside the rotator range
/// closest to `reference`, keeping the commanded azimuth continuous as the
/// track crosses north.
pub fn unwrap_az(raw_az: f64, reference: f64) -> f64 {
    let mut best = raw_az;
    let mut best_distance = f64::INFINITY;
    for candidate in [raw_az - 360.0, raw_az, raw_az + 360.0] {
        if (AZ_MIN..=AZ_MAX).contains(&candidate) {
            let distance = (candidate - reference).abs();
            if distance < best_distance {
                best = candidate;
                best_distance = distance;
            }
        }
    }
    best
}

struct TrackPlan {
    sat_id: String,
    angles: AosRotorAngles,
}

/// Tracker core: owns exclusive access to the rotator through the
/// `is_tracking` interlock.
pub struct Tracker {
    min_elevation: f64,
    slew_interval: Duration,
    tolerance: f64,
    az_home: f64,
    el_home: f64,
    mount: MountClient,
    astro: AstrodynamicsClient,
    is_tracking: AtomicBool,
    halt: Mutex<CancellationToken>,
    plan: Mutex<Option<TrackPlan>>,
    root: CancellationToken,
}

impl Tracker {
    pub fn new(
        config: &StationConfig,
        mount: MountClient,
        astro: AstrodynamicsClient,
        root: CancellationToken,
    ) -> Self {
        Self {
            min_elevation: config.min_elevation_deg,
            slew_interval: config.slew_interval(),
            tolerance: config.angular_tolerance_deg,
            az_home: config.az_home_deg,
            el_home: config.el_home_deg,
            mount,
            astro,
            is_tracking: AtomicBool::new(false),
            halt: Mutex::new(root.child_token()),
            plan: Mutex::new(None),
            root,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.is_tracking.load(Ordering::SeqCst)
    }

    /// Compute and store the AOS rotor angles for `task`.
    pub async fn setup_task(&self, task: &Task) -> Result<AosRotorAngles> {
        let az_rate_aos = task
            .parameters
            .aos
            .as_ref()
            .map(|e| e.kinematic_state.az_rate)
            .ok_or_else(|| anyhow!("task has no AOS event"))?;
        let angles = aos_rotor_angles(az_rate_aos, &task.parameters.interpolated_orbit)?;
        *self.plan.lock().await = Some(TrackPlan {
            sat_id: task.parameters.sat_id.clone(),
            angles,
        });
        Ok(angles)
    }

    fn safe_az_el(&self, az: f64, el: f64) -> (f64, f64) {
        let az = az.clamp(AZ_MIN, AZ_MAX);
        let el = el.clamp(self.min_elevation, 180.0 - self.min_elevation);
        ((az * 100.0).round() / 100.0, (el * 100.0).round() / 100.0)
    }

    /// Serialise behind any in-flight rotator operation.
    async fn wait_for_tracking_complete(&self) {
        while self.is_tracking() {
            tokio::time::sleep(self.slew_interval).await;
        }
    }

    /// Arm a fresh per-operation halt token and return it.
    async fn arm(&self) -> CancellationToken {
        let fresh = self.root.child_token();
        *self.halt.lock().await = fresh.clone();
        fresh
    }

    async fn finish(&self) {
        if self.mount.stop_rotor().await.is_none() {
            warn!("Rotator did not acknowledge stop");
        }
        self.is_tracking.store(false, Ordering::SeqCst);
    }

    /// Command the rotator to `(az, el)` and poll until both axes are within
    /// tolerance, the halt token fires, or the device stops answering.
    pub async fn slew_and_wait(&self, az: f64, el: f64) -> Result<()> {
        self.wait_for_tracking_complete().await;
        let halt = self.arm().await;
        let (az, el) = self.safe_az_el(az, el);
        self.is_tracking.store(true, Ordering::SeqCst);
        info!("Slewing to azimuth {az}, elevation {el}");

        let result = async {
            if self.mount.set(az, el).await.is_none() {
                return Err(anyhow!("rotator rejected set({az}, {el})"));
            }
            loop {
                if halt.is_cancelled() {
                    info!("Slew aborted by halt");
                    return Ok(());
                }
                let status = self
                    .mount
                    .status()
                    .await
                    .ok_or_else(|| anyhow!("rotator status unavailable"))?;
                let mut az_err = az - status.azimuth;
                if az_err.abs() >= 360.0 {
                    az_err %= 360.0;
                }
                let el_err = el - status.elevation;
                if az_err.abs() <= self.tolerance && el_err.abs() <= self.tolerance {
                    info!("Slew complete (az_err {az_err:.2}, el_err {el_err:.2})");
                    return Ok(());
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.slew_interval) => {}
                    _ = halt.cancelled() => {
                        info!("Slew aborted by halt");
                        return Ok(());
                    }
                }
            }
        }
        .await;

        self.finish().await;
        result
    }

    pub async fn slew_to_home(&self) -> Result<()> {
        info!("Slewing to home");
        self.slew_and_wait(self.az_home, self.el_home).await
    }

    /// Two-step slew to the AOS-ready position: halfway point first so the
    /// shortest-path controller never cuts through the forbidden sector.
    pub async fn slew_to_aos(&self) -> Result<()> {
        let angles = {
            let plan = self.plan.lock().await;
            plan.as_ref()
                .map(|p| p.angles)
                .ok_or_else(|| anyhow!("no task configured"))?
        };
        info!("Slewing to half-AOS position");
        self.slew_and_wait(angles.az_half, angles.el_aos).await?;
        let halted = self.halt.lock().await.is_cancelled();
        if halted {
            warn!("Halt raised before final AOS slew");
            return Ok(());
        }
        info!("Slewing to final AOS position");
        self.slew_and_wait(angles.az_aos, angles.el_aos).await
    }

    /// Continuous slew loop against live kinematic state. Holds until the
    /// target clears the mask, then tracks until it drops back below or the
    /// halt token fires. Exceptions stop the rotator and end the loop.
    pub async fn track(&self) {
        self.wait_for_tracking_complete().await;
        let halt = self.arm().await;
        let (sat_id, start_az) = {
            let plan = self.plan.lock().await;
            match plan.as_ref() {
                Some(p) => (p.sat_id.clone(), p.angles.az_aos),
                None => {
                    error!("track() called with no task configured");
                    return;
                }
            }
        };
        self.is_tracking.store(true, Ordering::SeqCst);
        info!("Tracking {} started", sat_id);

        let mut last_az = start_az;
        let mut rise_seen = false;
        let result: Result<()> = async {
            loop {
                if halt.is_cancelled() {
                    info!("Tracking halted");
                    return Ok(());
                }
                let state = self
                    .astro
                    .get_kinematic_state(&sat_id)
                    .await
                    .ok_or_else(|| anyhow!("kinematic state unavailable for {sat_id}"))?;
                if state.el < self.min_elevation {
                    if rise_seen {
                        info!(
                            "Elevation {:.2} below mask {:.2}; tracking complete",
                            state.el, self.min_elevation
                        );
                        return Ok(());
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.slew_interval) => continue,
                        _ = halt.cancelled() => return Ok(()),
                    }
                }
                rise_seen = true;
                let az = unwrap_az(state.az, last_az);
                let (az, el) = self.safe_az_el(az, state.el);
                last_az = az;
                if self.mount.set(az, el).await.is_none() {
                    return Err(anyhow!("rotator rejected set({az}, {el})"));
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.slew_interval) => {}
                    _ = halt.cancelled() => {
                        info!("Tracking halted");
                        return Ok(());
                    }
                }
            }
        }
        .await;

        if let Err(e) = result {
            error!("Tracking loop failed: {:#}", e);
        }
        self.finish().await;
        info!("Tracking {} finished", sat_id);
    }

    /// Halt any in-flight slew or track loop and wait for it to wind down.
    pub async fn stop_tracking(&self) {
        self.halt.lock().await.cancel();
        self.wait_for_tracking_complete().await;
        info!("Tracking successfully stopped");
    }
}

struct TrackerCommandHandler {
    tracker: Arc<Tracker>,
}

impl TrackerCommandHandler {
    /// Run a long rotator operation off the consumer loop, publishing the
    /// RPC reply when it completes so `stop_tracking` stays deliverable.
    fn spawn_op<F>(
        &self,
        node: &NodeHandle,
        correlation_id: Option<&str>,
        telemetry_type: &'static str,
        op: F,
    ) where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let node = node.clone();
        let correlation_id = correlation_id.map(|s| s.to_string());
        tokio::spawn(async move {
            let data = match op.await {
                Ok(()) => json!({"accepted": true}),
                Err(e) => {
                    error!("Tracker operation '{}' failed: {:#}", telemetry_type, e);
                    json!({"accepted": false, "reason": e.to_string()})
                }
            };
            let routing_key = format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.{telemetry_type}");
            let reply = node.messenger().telemetry(telemetry_type, data);
            node.publish(&routing_key, &reply, correlation_id.as_deref())
                .await;
        });
    }
}

#[async_trait]
impl MessageHandler for TrackerCommandHandler {
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
        match message.payload_type() {
            "slew_to_home" => {
                let tracker = self.tracker.clone();
                self.spawn_op(node, correlation_id, "slew_to_home", async move {
                    tracker.slew_to_home().await
                });
                Ok(None)
            }
            "slew_to_aos" => {
                let task: Task = match serde_json::from_value(params["task"].clone()) {
                    Ok(task) => task,
                    Err(e) => {
                        warn!("Malformed task in slew_to_aos: {}", e);
                        let data = json!({"accepted": false, "reason": "malformed task"});
                        let routing_key =
                            format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.slew_to_aos");
                        let reply = node.messenger().telemetry("slew_to_aos", data.clone());
                        node.publish(&routing_key, &reply, correlation_id).await;
                        return Ok(Some(data));
                    }
                };
                let tracker = self.tracker.clone();
                self.spawn_op(node, correlation_id, "slew_to_aos", async move {
                    tracker.setup_task(&task).await?;
                    tracker.slew_to_aos().await
                });
                Ok(None)
            }
            "start_tracking" => {
                let mut data = json!({"accepted": true});
                match serde_json::from_value::<Task>(params["task"].clone()) {
                    Ok(task) => {
                        if let Err(e) = self.tracker.setup_task(&task).await {
                            error!("start_tracking setup failed: {:#}", e);
                            data = json!({"accepted": false, "reason": e.to_string()});
                        }
                    }
                    // No task in the command: reuse the plan from slew_to_aos.
                    Err(_) => {}
                }
                if data["accepted"] == json!(true) {
                    let tracker = self.tracker.clone();
                    tokio::spawn(async move { tracker.track().await });
                }
                let routing_key = format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.start_tracking");
                let reply = node.messenger().telemetry("start_tracking", data.clone());
                node.publish(&routing_key, &reply, correlation_id).await;
                Ok(Some(data))
            }
            "stop_tracking" => {
                self.tracker.stop_tracking().await;
                let data = json!({"stopped": true});
                let routing_key = format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.stop_tracking");
                let reply = node.messenger().telemetry("stop_tracking", data.clone());
                node.publish(&routing_key, &reply, correlation_id).await;
                Ok(Some(data))
            }
            "status" => {
                let data = json!({
                    "status": if self.tracker.is_tracking() { "active" } else { "idle" }
                });
                let routing_key = format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.status");
                let reply = node.messenger().telemetry("status", data.clone());
                node.publish(&routing_key, &reply, correlation_id).await;
                Ok(Some(data))
            }
            other => {
                warn!("Unknown tracker command '{}'", other);
                Ok(None)
            }
        }
    }
}

fn node_config() -> NodeConfig {
    NodeConfig::service("tracker-controller")
        .exchange(Exchange::topic(SERVICE))
        .binding(Binding::new(
            SERVICE,
            &[&format!("{ROUTING_PREFIX}.{SERVICE}.command.*")],
        ))
        .publishing(Publishing::new(
            SERVICE,
            true,
            &[
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.slew_to_home"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.slew_to_aos"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.start_tracking"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.stop_tracking"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.status"),
            ],
        ))
}

pub struct TrackerService {
    node: MessageNode,
}

impl TrackerService {
    pub async fn serve(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let mount = MountClient::connect(config, cancel.clone()).await?;
        let astro = AstrodynamicsClient::connect(config, cancel.clone()).await?;
        let tracker = Arc::new(Tracker::new(config, mount, astro, cancel.clone()));
        let messenger = Messenger::new("tracker-controller", crate::MESSAGE_VERSION);
        let mut node =
            MessageNode::connect(node_config(), &config.nats_url, messenger, cancel).await?;
        node.add_handler(Arc::new(TrackerCommandHandler { tracker }));
        node.start().await?;
        Ok(Self { node })
    }

    pub async fn stop(&mut self) {
        self.node.stop().await;
    }
}

/// RPC client for the tracker service.
pub struct TrackerClient {
    client: CommandClient,
    slew_timeout: Duration,
}

impl TrackerClient {
    pub async fn connect(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let client = CommandClient::connect(
            SERVICE,
            &[
                "slew_to_home",
                "slew_to_aos",
                "start_tracking",
                "stop_tracking",
                "status",
            ],
            &config.nats_url,
            config.rpc_timeout(),
            cancel,
        )
        .await?;
        Ok(Self {
            client,
            slew_timeout: config.slew_rpc_timeout(),
        })
    }

    /// Returns true when the slew completed.
    pub async fn slew_to_home(&self) -> bool {
        matches!(
            self.client
                .call_with_timeout("slew_to_home", json!({}), self.slew_timeout)
                .await,
            Some(data) if data["accepted"] == json!(true)
        )
    }

    /// Returns true when the pre-position slew completed; false on rotator
    /// range rejection, device failure or timeout.
    pub async fn slew_to_aos(&self, task: &Task) -> bool {
        matches!(
            self.client
                .call_with_timeout("slew_to_aos", json!({"task": task}), self.slew_timeout)
                .await,
            Some(data) if data["accepted"] == json!(true)
        )
    }

    pub async fn start_tracking(&self, task: &Task) -> bool {
        matches!(
            self.client
                .call("start_tracking", json!({"task": task}))
                .await,
            Some(data) if data["accepted"] == json!(true)
        )
    }

    pub async fn stop_tracking(&self) -> Option<Value> {
        self.client.call("stop_tracking", json!({})).await
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

    fn orbit(az: &[f64], el_first: f64) -> InterpolatedOrbit {
        InterpolatedOrbit {
            az: az.to_vec(),
            el: {
                let mut el = vec![el_first];
                el.extend(std::iter::repeat_n(30.0, az.len().saturating_sub(1)));
                el
            },
            time: Vec::new(),
        }
    }

    #[test]
    fn angle_helpers_fix_home_in_place() {
        assert_eq!(clockwise_angle(270.0), 270.0);
        assert_eq!(counterclockwise_angle(270.0), 270.0);
        assert_eq!(clockwise_angle(180.0), 540.0);
        assert_eq!(counterclockwise_angle(350.0), -10.0);
        assert_eq!(clockwise_angle(300.0), 300.0);
        assert_eq!(counterclockwise_angle(90.0), 90.0);
    }

    #[test]
    fn orbit_sweep_takes_the_short_way() {
        assert_eq!(orbit_sweep(&[180.0, 190.0, 200.0]), 20.0);
        // Crossing north: 350 -> 0 -> 10 is 20 degrees, not 340.
        assert!((orbit_sweep(&[350.0, 0.0, 10.0]) - 20.0).abs() < 1e-9);
        assert_eq!(orbit_sweep(&[100.0]), 0.0);
    }

    #[test]
    fn eastward_pass_prepositions_counter_clockwise() {
        // AOS az 180, LOS az 200, eastward (az_rate > 0): clockwise would
        // need 270 + 20 degrees of travel, counter-clockwise only 90.
        let orbit = orbit(&[180.0, 190.0, 200.0], 10.0);
        let angles = aos_rotor_angles(0.1, &orbit).unwrap();
        assert_eq!(angles.az_aos, 180.0);
        assert_eq!(angles.az_half, 225.0);
        assert_eq!(angles.el_aos, 10.0);
    }

    #[test]
    fn northward_crossing_prepositions_clockwise_past_north() {
        // AOS az 350 crossing north eastward: clockwise keeps the rotator
        // inside range, ending near 370.
        let orbit = orbit(&[350.0, 355.0, 0.0, 5.0, 10.0], 12.0);
        let angles = aos_rotor_angles(0.2, &orbit).unwrap();
        assert_eq!(angles.az_aos, 350.0);
        assert_eq!(angles.az_half, 310.0);
        // The track then unwraps past north instead of snapping to 10.
        assert!((unwrap_az(10.0, angles.az_aos) - 370.0).abs() < 1e-9);
    }

    #[test]
    fn unreachable_pass_is_rejected() {
        // AOS az 225 with a 320-degree clockwise sweep: clockwise approach
        // already needs 315 degrees of travel, counter-clockwise ends at 275.
        let orbit = orbit(&[225.0, 305.0, 25.0, 105.0, 185.0], 10.0);
        assert!(aos_rotor_angles(0.2, &orbit).is_err());
    }

    #[test]
    fn wide_eastward_pass_fits_counter_clockwise() {
        // AOS az 90 to LOS az 270 eastward: counter-clockwise parks the
        // rotator at 90 and the pass sweeps it back through home.
        let orbit = orbit(&[90.0, 135.0, 180.0, 225.0, 270.0], 10.0);
        let angles = aos_rotor_angles(0.2, &orbit).unwrap();
        assert_eq!(angles.az_aos, 90.0);
        assert_eq!(angles.az_half, 180.0);
    }

    #[test]
    fn aos_at_home_ties_and_clockwise_wins() {
        let orbit = orbit(&[270.0, 280.0, 290.0], 15.0);
        let angles = aos_rotor_angles(0.1, &orbit).unwrap();
        // Clockwise representation of home is home itself.
        assert_eq!(angles.az_aos, 270.0);
        assert_eq!(angles.az_half, 270.0);
    }

    #[test]
    fn westward_pass_mirrors_the_choice() {
        // AOS az 200 moving westward (az_rate < 0): counter-clockwise.
        let orbit = orbit(&[200.0, 190.0, 180.0], 10.0);
        let angles = aos_rotor_angles(-0.1, &orbit).unwrap();
        assert_eq!(angles.az_aos, 200.0);
        assert_eq!(angles.az_half, 235.0);
    }

    #[test]
    fn unwrap_keeps_commands_continuous_across_north() {
        assert_eq!(unwrap_az(10.0, 350.0), 370.0);
        assert_eq!(unwrap_az(350.0, 370.0), 350.0);
        assert_eq!(unwrap_az(180.0, 190.0), 180.0);
        // 560 would be nearer to the reference but is outside the range.
        assert_eq!(unwrap_az(200.0, 530.0), 200.0);
    }

    #[test]
    fn empty_orbit_cannot_be_planned() {
        assert!(aos_rotor_angles(0.1, &InterpolatedOrbit::default()).is_err());
    }
}
