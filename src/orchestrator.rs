//! Orchestrator service: walks one pass task through its state sequence.
//!
//! slew home -> slew to AOS -> wait for AOS -> track + record -> wait for
//! LOS -> stop recording and tracking -> slew home -> post-process. Every
//! wait races the shutdown event; cancellation or a device failure at any
//! step stops recording and tracking, publishes `idle` and releases the
//! pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::StationConfig;
use crate::messaging::{
    Binding, CommandClient, Exchange, HandlerKind, HandlerResult, Message, MessageHandler,
    MessageNode, Messenger, NodeConfig, NodeHandle, Publishing, ROUTING_PREFIX,
};
use crate::sdr::SdrClient;
use crate::signal_processor::SignalProcessorClient;
use crate::task::Task;
use crate::tracker::TrackerClient;

pub const SERVICE: &str = "orchestrator";

/// Why a pass ended; carried on the status event for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassOutcome {
    Completed,
    Cancelled,
    DeviceFailure,
}

pub struct Orchestrator {
    tracker: TrackerClient,
    sdr: SdrClient,
    signal_processor: SignalProcessorClient,
    is_running: AtomicBool,
    halt: Mutex<CancellationToken>,
    root: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        tracker: TrackerClient,
        sdr: SdrClient,
        signal_processor: SignalProcessorClient,
        root: CancellationToken,
    ) -> Self {
        Self {
            tracker,
            sdr,
            signal_processor,
            is_running: AtomicBool::new(false),
            halt: Mutex::new(root.child_token()),
            root,
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    async fn publish_status(&self, node: &NodeHandle, status: &str) {
        let routing_key = format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.status_event");
        let message = node
            .messenger()
            .telemetry("status_event", json!({"status": status}));
        node.publish(&routing_key, &message, None).await;
    }

    /// Sleep until `deadline` unless the halt token fires first. Returns
    /// false when halted.
    async fn sleep_until(&self, deadline: chrono::DateTime<Utc>, halt: &CancellationToken) -> bool {
        let now = Utc::now();
        if deadline <= now {
            return true;
        }
        let wait = (deadline - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(wait) => true,
            _ = halt.cancelled() => false,
        }
    }

    /// Stop recording and tracking unconditionally; both calls are safe when
    /// nothing is active.
    async fn release_devices(&self) {
        if self.sdr.stop_record().await.is_none() {
            warn!("SDR did not acknowledge stop_record");
        }
        if self.tracker.stop_tracking().await.is_none() {
            warn!("Tracker did not acknowledge stop_tracking");
        }
    }

    /// Execute one pass end to end. Refuses to overlap with a pass already
    /// in flight.
    pub async fn orchestrate(self: &Arc<Self>, node: &NodeHandle, task: Task) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!(
                "Orchestrate refused: task {} while a pass is in flight",
                task.task_id
            );
            return;
        }
        let halt = {
            let fresh = self.root.child_token();
            *self.halt.lock().await = fresh.clone();
            fresh
        };
        info!(
            "Orchestrating task {} for {}",
            task.task_id, task.parameters.sat_id
        );
        self.publish_status(node, "active").await;

        let outcome = self.run_pass(&task, &halt).await;
        match outcome {
            PassOutcome::Completed => info!("Task {} completed", task.task_id),
            PassOutcome::Cancelled => info!("Task {} cancelled", task.task_id),
            PassOutcome::DeviceFailure => {
                error!("Task {} aborted on device failure", task.task_id)
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        self.publish_status(node, "idle").await;
    }

    async fn run_pass(&self, task: &Task, halt: &CancellationToken) -> PassOutcome {
        let (Some(aos_time), Some(los_time)) = (task.aos_time(), task.los_time()) else {
            error!("Task {} missing AOS or LOS; dropped", task.task_id);
            return PassOutcome::DeviceFailure;
        };

        // Pre-position: home, then the AOS-ready angles. A range rejection
        // from the tracker surfaces here as accepted=false.
        if !self.tracker.slew_to_home().await {
            return PassOutcome::DeviceFailure;
        }
        if halt.is_cancelled() {
            return PassOutcome::Cancelled;
        }
        if !self.tracker.slew_to_aos(task).await {
            self.release_devices().await;
            return PassOutcome::DeviceFailure;
        }

        info!(
            "Waiting for AOS at {} ({}s away)",
            aos_time,
            (aos_time - Utc::now()).num_seconds()
        );
        if !self.sleep_until(aos_time, halt).await {
            self.release_devices().await;
            return PassOutcome::Cancelled;
        }

        info!("Starting tracking and recording");
        if !self.tracker.start_tracking(task).await {
            self.release_devices().await;
            return PassOutcome::DeviceFailure;
        }
        if self.sdr.start_record(&task.parameters.sdr).await.is_none() {
            self.release_devices().await;
            return PassOutcome::DeviceFailure;
        }

        info!(
            "Tracking and recording until LOS at {} ({}s away)",
            los_time,
            (los_time - Utc::now()).num_seconds()
        );
        let reached_los = self.sleep_until(los_time, halt).await;
        self.release_devices().await;
        if !reached_los {
            return PassOutcome::Cancelled;
        }

        if !self.tracker.slew_to_home().await {
            return PassOutcome::DeviceFailure;
        }

        info!("Post-processing capture artefacts");
        if self.signal_processor.generate_psds().await.is_none() {
            warn!("PSD generation unacknowledged");
        }
        if self.signal_processor.generate_spectrograms().await.is_none() {
            warn!("Spectrogram generation unacknowledged");
        }

        PassOutcome::Completed
    }

    /// Cancel the in-flight pass, if any.
    pub async fn stop_orchestrating(&self) {
        self.halt.lock().await.cancel();
        info!("Orchestration stop requested");
    }
}

struct OrchestratorCommandHandler {
    orchestrator: Arc<Orchestrator>,
}

#[async_trait]
impl MessageHandler for OrchestratorCommandHandler {
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
            "orchestrate" => {
                let accepted = match serde_json::from_value::<Task>(params["task"].clone()) {
                    Ok(task) if !self.orchestrator.is_running() => {
                        let orchestrator = self.orchestrator.clone();
                        let spawn_node = node.clone();
                        tokio::spawn(async move {
                            orchestrator.orchestrate(&spawn_node, task).await;
                        });
                        true
                    }
                    Ok(task) => {
                        warn!("Orchestrate refused: task {} while running", task.task_id);
                        false
                    }
                    Err(e) => {
                        warn!("Malformed task in orchestrate: {}", e);
                        false
                    }
                };
                let data = json!({"accepted": accepted});
                let routing_key = format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.orchestrate_ack");
                let reply = node.messenger().telemetry("orchestrate_ack", data.clone());
                node.publish(&routing_key, &reply, correlation_id).await;
                Ok(Some(data))
            }
            "stop_orchestrating" => {
                self.orchestrator.stop_orchestrating().await;
                let data = json!({"stopped": true});
                let routing_key =
                    format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.stop_orchestrating");
                let reply = node.messenger().telemetry("stop_orchestrating", data.clone());
                node.publish(&routing_key, &reply, correlation_id).await;
                Ok(Some(data))
            }
            "status" => {
                let data = json!({
                    "status": if self.orchestrator.is_running() { "active" } else { "idle" }
                });
                let routing_key = format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.status");
                let reply = node.messenger().telemetry("status", data.clone());
                node.publish(&routing_key, &reply, correlation_id).await;
                Ok(Some(data))
            }
            other => {
                warn!("Unknown orchestrator command '{}'", other);
                Ok(None)
            }
        }
    }
}

fn node_config() -> NodeConfig {
    NodeConfig::service("orchestrator-controller")
        .exchange(Exchange::topic(SERVICE))
        .binding(Binding::new(
            SERVICE,
            &[&format!("{ROUTING_PREFIX}.{SERVICE}.command.*")],
        ))
        .publishing(Publishing::new(
            SERVICE,
            true,
            &[
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.status_event"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.orchestrate_ack"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.stop_orchestrating"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.status"),
            ],
        ))
}

pub struct OrchestratorService {
    node: MessageNode,
}

impl OrchestratorService {
    pub async fn serve(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let tracker = TrackerClient::connect(config, cancel.clone()).await?;
        let sdr = SdrClient::connect(config, cancel.clone()).await?;
        let signal_processor = SignalProcessorClient::connect(config, cancel.clone()).await?;
        let orchestrator = Arc::new(Orchestrator::new(
            tracker,
            sdr,
            signal_processor,
            cancel.clone(),
        ));
        let messenger = Messenger::new("orchestrator-controller", crate::MESSAGE_VERSION);
        let mut node =
            MessageNode::connect(node_config(), &config.nats_url, messenger, cancel).await?;
        node.add_handler(Arc::new(OrchestratorCommandHandler { orchestrator }));
        node.start().await?;
        Ok(Self { node })
    }

    pub async fn stop(&mut self) {
        self.node.stop().await;
    }
}

/// RPC client for the orchestrator service.
pub struct OrchestratorClient {
    client: CommandClient,
}

impl OrchestratorClient {
    pub async fn connect(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let client = CommandClient::connect(
            SERVICE,
            &["orchestrate", "stop_orchestrating", "status"],
            &config.nats_url,
            config.rpc_timeout(),
            cancel,
        )
        .await?;
        Ok(Self { client })
    }

    /// Hand a task to the orchestrator. Returns false when the orchestrator
    /// refused it (already running, malformed) or did not answer.
    pub async fn orchestrate(&self, task: &Task) -> bool {
        matches!(
            self.client.call("orchestrate", json!({"task": task})).await,
            Some(data) if data["accepted"] == json!(true)
        )
    }

    pub async fn stop_orchestrating(&self) -> Option<Value> {
        self.client.call("stop_orchestrating", json!({})).await
    }

    pub async fn status(&self) -> Option<Value> {
        self.client.call("status", json!({})).await
    }

    pub async fn stop(&mut self) {
        self.client.stop().await;
    }
}
