//! Scheduler service: keeps an AOS-ordered queue of upcoming pass tasks and
//! dispatches each to the orchestrator inside its window.
//!
//! Modes are mutually exclusive: `survey` populates targets from the
//! active-downlink catalog, `standby` drains the existing queue without
//! adding, `inactive` clears and holds, and `collect_request` admits tasks
//! only from the external-request adapter.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::DatabaseClient;
use crate::config::StationConfig;
use crate::messaging::{
    Binding, CommandClient, Exchange, HandlerKind, HandlerResult, Message, MessageHandler,
    MessageNode, Messenger, NodeConfig, NodeHandle, Publishing, ROUTING_PREFIX,
};
use crate::orchestrator::OrchestratorClient;
use crate::task::{Task, TaskGenerator};

pub const SERVICE: &str = "scheduler";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerMode {
    Survey,
    Standby,
    Inactive,
    CollectRequest,
}

impl FromStr for SchedulerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "survey" => Ok(SchedulerMode::Survey),
            "standby" => Ok(SchedulerMode::Standby),
            "inactive" => Ok(SchedulerMode::Inactive),
            "collect_request" => Ok(SchedulerMode::CollectRequest),
            other => Err(anyhow::anyhow!("unknown scheduler mode '{other}'")),
        }
    }
}

/// Two tasks describe the same pass: same satellite, same AOS, same LOS.
pub fn tasks_match(a: &Task, b: &Task) -> bool {
    a.parameters.sat_id == b.parameters.sat_id
        && a.aos_time() == b.aos_time()
        && a.los_time() == b.los_time()
}

/// Whether the `[aos, los]` windows of two tasks intersect.
pub fn tasks_overlap(a: &Task, b: &Task) -> bool {
    match (a.aos_time(), a.los_time(), b.aos_time(), b.los_time()) {
        (Some(aos_a), Some(los_a), Some(aos_b), Some(los_b)) => {
            aos_a.max(aos_b) <= los_a.min(los_b)
        }
        _ => false,
    }
}

/// Queue maintenance: replace matching entries with their refreshed
/// counterparts, sort ascending by AOS, then greedily drop any task whose
/// window overlaps an earlier one (first-scheduled wins).
pub fn merge_refreshed(existing: Vec<Task>, fresh: Vec<Task>) -> Vec<Task> {
    let mut merged: Vec<Task> = existing
        .into_iter()
        .filter(|task| !fresh.iter().any(|f| tasks_match(task, f)))
        .collect();
    merged.extend(fresh);
    merged.retain(|task| task.aos_time().is_some() && task.los_time().is_some());
    merged.sort_by_key(|task| task.aos_time());

    let mut kept: Vec<Task> = Vec::with_capacity(merged.len());
    for task in merged {
        if !kept.iter().any(|k| tasks_overlap(k, &task)) {
            kept.push(task);
        }
    }
    kept
}

struct QueueState {
    mode: SchedulerMode,
    queue: Vec<Task>,
}

pub struct Scheduler {
    refresh_interval: std::time::Duration,
    dispatch_buffer: chrono::Duration,
    max_pass: chrono::Duration,
    task_gen: TaskGenerator,
    db: DatabaseClient,
    orchestrator: OrchestratorClient,
    state: Mutex<QueueState>,
    queue_non_empty: Notify,
    reeval: Notify,
    orch_idle: Notify,
    is_running: AtomicBool,
    halt: CancellationToken,
}

impl Scheduler {
    pub fn new(
        config: &StationConfig,
        task_gen: TaskGenerator,
        db: DatabaseClient,
        orchestrator: OrchestratorClient,
        root: CancellationToken,
    ) -> Self {
        Self {
            refresh_interval: std::time::Duration::from_secs(config.refresh_interval_secs),
            dispatch_buffer: config.dispatch_buffer(),
            max_pass: config.max_pass(),
            task_gen,
            db,
            orchestrator,
            state: Mutex::new(QueueState {
                mode: SchedulerMode::Standby,
                queue: Vec::new(),
            }),
            queue_non_empty: Notify::new(),
            reeval: Notify::new(),
            orch_idle: Notify::new(),
            is_running: AtomicBool::new(true),
            halt: root.child_token(),
        }
    }

    pub async fn mode(&self) -> SchedulerMode {
        self.state.lock().await.mode
    }

    /// Atomic mode transition; idempotent, triggers immediate re-evaluation.
    pub async fn set_mode(&self, mode: SchedulerMode) {
        {
            let mut state = self.state.lock().await;
            if state.mode == mode {
                debug!("Scheduler already in mode {:?}", mode);
                return;
            }
            info!("Scheduler mode {:?} -> {:?}", state.mode, mode);
            state.mode = mode;
            if mode == SchedulerMode::Inactive {
                state.queue.clear();
            }
        }
        self.reeval.notify_waiters();
    }

    /// Admit an adapter-generated task; only honoured in collect_request
    /// mode and only when the task still passes validation.
    pub async fn enqueue_collect_request(&self, task: Task) -> bool {
        let mut state = self.state.lock().await;
        if state.mode != SchedulerMode::CollectRequest {
            warn!(
                "Collect request {} dropped: scheduler in mode {:?}",
                task.task_id, state.mode
            );
            return false;
        }
        if !task.is_valid_at(Utc::now(), self.max_pass) {
            warn!("Collect request {} dropped: invalid window", task.task_id);
            return false;
        }
        let queue = std::mem::take(&mut state.queue);
        state.queue = merge_refreshed(queue, vec![task]);
        drop(state);
        self.queue_non_empty.notify_waiters();
        true
    }

    pub async fn status(&self) -> Value {
        let state = self.state.lock().await;
        json!({
            "is_running": self.is_running.load(Ordering::SeqCst),
            "mode": state.mode,
            "queued_tasks": state.queue.iter().map(|t| t.task_id).collect::<Vec<_>>(),
        })
    }

    pub fn stop_scheduling(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.halt.cancel();
        info!("Scheduling loops stopped");
    }

    pub fn notify_orchestrator_idle(&self) {
        self.orch_idle.notify_waiters();
    }

    /// Periodic queue refresh. Survey mode only; other modes leave the queue
    /// to drain.
    pub async fn refresh_loop(self: Arc<Self>) {
        loop {
            if self.halt.is_cancelled() {
                return;
            }
            if self.mode().await == SchedulerMode::Survey {
                self.refresh_once().await;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.refresh_interval) => {}
                _ = self.reeval.notified() => {}
                _ = self.halt.cancelled() => return,
            }
        }
    }

    async fn refresh_once(&self) {
        let Some(targets) = self.db.get_active_satellites().await else {
            warn!("Queue refresh skipped: active-satellite list unavailable");
            return;
        };
        info!("Refreshing task queue over {} targets", targets.len());
        let mut fresh = Vec::new();
        for sat_id in &targets {
            if self.halt.is_cancelled() {
                return;
            }
            if let Some(task) = self.task_gen.generate(sat_id).await {
                fresh.push(task);
            }
        }

        let mut state = self.state.lock().await;
        // The mode may have flipped while tasks were generating.
        if state.mode != SchedulerMode::Survey {
            return;
        }
        let queue = std::mem::take(&mut state.queue);
        state.queue = merge_refreshed(queue, fresh);
        let non_empty = !state.queue.is_empty();
        info!("Queue refreshed: {} tasks", state.queue.len());
        drop(state);
        if non_empty {
            self.queue_non_empty.notify_waiters();
        }
    }

    /// Dispatch loop: waits for a head task, sleeps until its dispatch
    /// window opens, hands it to the orchestrator, then waits out the pass.
    pub async fn dispatch_loop(self: Arc<Self>, node: NodeHandle) {
        loop {
            if self.halt.is_cancelled() {
                return;
            }
            let head = self.state.lock().await.queue.first().cloned();
            let Some(task) = head else {
                tokio::select! {
                    _ = self.queue_non_empty.notified() => {}
                    _ = self.reeval.notified() => {}
                    _ = self.halt.cancelled() => return,
                }
                continue;
            };
            let (Some(aos), Some(los)) = (task.aos_time(), task.los_time()) else {
                // Validation keeps these out; drop defensively.
                self.pop_if_head(&task).await;
                continue;
            };

            let dispatch_at = aos - self.dispatch_buffer;
            let now = Utc::now();
            if now < dispatch_at {
                let wait = (dispatch_at - now).to_std().unwrap_or_default();
                debug!(
                    "Next task {} in {}s",
                    task.task_id,
                    wait.as_secs()
                );
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    // A refresh may have replaced the head.
                    _ = self.reeval.notified() => continue,
                    _ = self.queue_non_empty.notified() => continue,
                    _ = self.halt.cancelled() => return,
                }
            }

            let now = Utc::now();
            if now > los {
                if self.pop_if_head(&task).await {
                    debug!("Task {} skipped, beyond LOS", task.task_id);
                }
                continue;
            }
            if now < dispatch_at {
                continue;
            }

            if !self.pop_if_head(&task).await {
                continue;
            }
            info!("Dispatching task {} for {}", task.task_id, task.parameters.sat_id);
            if !self.orchestrator.orchestrate(&task).await {
                warn!("Orchestrator refused task {}", task.task_id);
                continue;
            }

            // Wait until LOS or until the orchestrator reports idle.
            let pass = (los - Utc::now()).to_std().unwrap_or_default();
            tokio::select! {
                _ = tokio::time::sleep(pass) => {}
                _ = self.orch_idle.notified() => {
                    debug!("Orchestrator idle before LOS for task {}", task.task_id);
                }
                _ = self.halt.cancelled() => return,
            }
            info!("Task {} completed", task.task_id);
            self.publish_task_complete(&node, &task).await;
        }
    }

    async fn pop_if_head(&self, task: &Task) -> bool {
        let mut state = self.state.lock().await;
        if state.queue.first().map(|t| t.task_id) == Some(task.task_id) {
            state.queue.remove(0);
            true
        } else {
            false
        }
    }

    async fn publish_task_complete(&self, node: &NodeHandle, task: &Task) {
        let routing_key = format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.task_complete");
        let message = node.messenger().telemetry(
            "task_complete",
            json!({
                "task_id": task.task_id,
                "sat_id": task.parameters.sat_id,
                "aos": task.aos_time(),
                "los": task.los_time(),
            }),
        );
        node.publish(&routing_key, &message, None).await;
    }
}

struct SchedulerCommandHandler {
    scheduler: Arc<Scheduler>,
}

#[async_trait]
impl MessageHandler for SchedulerCommandHandler {
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
            "set_mode" => {
                let accepted = match params["mode"].as_str().map(SchedulerMode::from_str) {
                    Some(Ok(mode)) => {
                        self.scheduler.set_mode(mode).await;
                        true
                    }
                    _ => {
                        warn!("set_mode with unknown mode: {}", params["mode"]);
                        false
                    }
                };
                ("mode_changed", json!({"accepted": accepted}))
            }
            "stop_scheduling" => {
                self.scheduler.stop_scheduling();
                ("stop_scheduling", json!({"stopped": true}))
            }
            "enqueue_collect_request" => {
                let accepted = match serde_json::from_value::<Task>(params["task"].clone()) {
                    Ok(task) => self.scheduler.enqueue_collect_request(task).await,
                    Err(e) => {
                        warn!("Malformed task in enqueue_collect_request: {}", e);
                        false
                    }
                };
                ("enqueue_ack", json!({"accepted": accepted}))
            }
            "status" => ("status", self.scheduler.status().await),
            other => {
                warn!("Unknown scheduler command '{}'", other);
                return Ok(None);
            }
        };

        let routing_key = format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.{telemetry_type}");
        let reply = node.messenger().telemetry(telemetry_type, data.clone());
        node.publish(&routing_key, &reply, correlation_id).await;
        Ok(Some(data))
    }
}

/// Watches orchestrator status events so the dispatch loop can end a pass
/// early when the orchestrator goes idle.
struct OrchestratorStatusHandler {
    scheduler: Arc<Scheduler>,
}

#[async_trait]
impl MessageHandler for OrchestratorStatusHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Telemetry
    }

    async fn handle(
        &self,
        message: &Message,
        _correlation_id: Option<&str>,
        _node: &NodeHandle,
    ) -> HandlerResult {
        if message.payload_type() == "status_event"
            && message.payload_value()["status"] == json!("idle")
        {
            self.scheduler.notify_orchestrator_idle();
        }
        Ok(None)
    }
}

fn node_config() -> NodeConfig {
    NodeConfig::service("scheduler-controller")
        .exchange(Exchange::topic(SERVICE))
        .exchange(Exchange::topic("orchestrator"))
        .binding(Binding::new(
            SERVICE,
            &[&format!("{ROUTING_PREFIX}.{SERVICE}.command.*")],
        ))
        .binding(Binding::new(
            "orchestrator",
            &[&format!("{ROUTING_PREFIX}.orchestrator.telemetry.status_event")],
        ))
        .publishing(Publishing::new(
            SERVICE,
            true,
            &[
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.mode_changed"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.stop_scheduling"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.enqueue_ack"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.status"),
                &format!("{ROUTING_PREFIX}.{SERVICE}.telemetry.task_complete"),
            ],
        ))
}

pub struct SchedulerService {
    node: MessageNode,
    scheduler: Arc<Scheduler>,
}

impl SchedulerService {
    pub async fn serve(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let task_gen = TaskGenerator::connect(config, cancel.clone()).await?;
        let db = DatabaseClient::connect(config, cancel.clone()).await?;
        let orchestrator = OrchestratorClient::connect(config, cancel.clone()).await?;
        let scheduler = Arc::new(Scheduler::new(
            config,
            task_gen,
            db,
            orchestrator,
            cancel.clone(),
        ));

        let messenger = Messenger::new("scheduler-controller", crate::MESSAGE_VERSION);
        let mut node =
            MessageNode::connect(node_config(), &config.nats_url, messenger, cancel).await?;
        node.add_handler(Arc::new(SchedulerCommandHandler {
            scheduler: scheduler.clone(),
        }));
        node.add_handler(Arc::new(OrchestratorStatusHandler {
            scheduler: scheduler.clone(),
        }));
        node.start().await?;

        tokio::spawn(scheduler.clone().refresh_loop());
        tokio::spawn(scheduler.clone().dispatch_loop(node.handle()));

        Ok(Self { node, scheduler })
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    pub async fn stop(&mut self) {
        self.scheduler.stop_scheduling();
        self.node.stop().await;
    }
}

/// RPC client for the scheduler service.
pub struct SchedulerClient {
    client: CommandClient,
}

impl SchedulerClient {
    pub async fn connect(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let client = CommandClient::connect(
            SERVICE,
            &[
                "set_mode",
                "stop_scheduling",
                "enqueue_collect_request",
                "status",
            ],
            &config.nats_url,
            config.rpc_timeout(),
            cancel,
        )
        .await?;
        Ok(Self { client })
    }

    pub async fn set_mode(&self, mode: SchedulerMode) -> Option<Value> {
        let mode_str = serde_json::to_value(mode).ok()?;
        self.client.call("set_mode", json!({"mode": mode_str})).await
    }

    pub async fn stop_scheduling(&self) -> Option<Value> {
        self.client.call("stop_scheduling", json!({})).await
    }

    /// Returns true when the scheduler admitted the task.
    pub async fn enqueue_collect_request(&self, task: &Task) -> bool {
        matches!(
            self.client
                .call("enqueue_collect_request", json!({"task": task}))
                .await,
            Some(data) if data["accepted"] == json!(true)
        )
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
    use crate::astro::{InterpolatedOrbit, KinematicState, PassEvent};
    use crate::task::build_task;
    use chrono::{DateTime, Duration, TimeZone};

    fn event(time: DateTime<Utc>) -> PassEvent {
        PassEvent {
            time,
            kinematic_state: KinematicState {
                az: 100.0,
                el: 20.0,
                az_rate: 0.2,
                el_rate: 0.1,
                range: 900.0,
                range_rate: -2.0,
                time,
            },
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn task(sat: &str, aos_min: i64, los_min: i64) -> Task {
        build_task(
            "test",
            sat,
            Some(event(t0() + Duration::minutes(aos_min))),
            Some(event(t0() + Duration::minutes((aos_min + los_min) / 2))),
            Some(event(t0() + Duration::minutes(los_min))),
            437.8e6,
            InterpolatedOrbit::default(),
        )
    }

    #[test]
    fn matching_is_keyed_on_sat_and_window() {
        let a = task("A", 0, 10);
        let b = task("A", 0, 10);
        let c = task("B", 0, 10);
        let d = task("A", 1, 10);
        assert!(tasks_match(&a, &b));
        assert!(!tasks_match(&a, &c));
        assert!(!tasks_match(&a, &d));
    }

    #[test]
    fn overlap_detects_interval_intersection() {
        let a = task("A", 0, 10);
        let b = task("B", 5, 15);
        let c = task("C", 11, 20);
        assert!(tasks_overlap(&a, &b));
        assert!(!tasks_overlap(&a, &c));
        // Shared endpoint counts as overlap.
        let d = task("D", 10, 20);
        assert!(tasks_overlap(&a, &d));
    }

    #[test]
    fn overlapping_later_task_is_dropped() {
        // [(A aos 00:00 los 00:10), (B aos 00:05 los 00:15)] sorts and
        // filters to [A].
        let a = task("A", 0, 10);
        let b = task("B", 5, 15);
        let merged = merge_refreshed(vec![], vec![a.clone(), b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].parameters.sat_id, "A");
        assert_eq!(merged[0].task_id, a.task_id);
    }

    #[test]
    fn queue_stays_sorted_by_aos() {
        let merged = merge_refreshed(
            vec![],
            vec![task("C", 40, 48), task("A", 0, 8), task("B", 20, 28)],
        );
        let sats: Vec<&str> = merged
            .iter()
            .map(|t| t.parameters.sat_id.as_str())
            .collect();
        assert_eq!(sats, vec!["A", "B", "C"]);
        for pair in merged.windows(2) {
            assert!(pair[0].aos_time() <= pair[1].aos_time());
            assert!(!tasks_overlap(&pair[0], &pair[1]));
        }
    }

    #[test]
    fn refreshed_task_replaces_its_stale_twin() {
        let stale = task("A", 0, 10);
        let fresh = task("A", 0, 10);
        let merged = merge_refreshed(vec![stale.clone()], vec![fresh.clone()]);
        assert_eq!(merged.len(), 1);
        // The fresher task wins on a match.
        assert_eq!(merged[0].task_id, fresh.task_id);
        assert_ne!(merged[0].task_id, stale.task_id);
    }

    #[test]
    fn non_matching_existing_tasks_survive_refresh() {
        let existing = task("A", 0, 10);
        let fresh = task("B", 20, 30);
        let merged = merge_refreshed(vec![existing.clone()], vec![fresh]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].task_id, existing.task_id);
    }

    #[test]
    fn tasks_without_windows_are_purged() {
        let mut broken = task("A", 0, 10);
        broken.parameters.aos = None;
        let merged = merge_refreshed(vec![broken], vec![task("B", 20, 30)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].parameters.sat_id, "B");
    }

    #[test]
    fn mode_parsing_round_trips() {
        for (text, mode) in [
            ("survey", SchedulerMode::Survey),
            ("standby", SchedulerMode::Standby),
            ("inactive", SchedulerMode::Inactive),
            ("collect_request", SchedulerMode::CollectRequest),
        ] {
            assert_eq!(SchedulerMode::from_str(text).unwrap(), mode);
            assert_eq!(serde_json::to_value(mode).unwrap(), json!(text));
        }
        assert!(SchedulerMode::from_str("bogus").is_err());
    }
}
