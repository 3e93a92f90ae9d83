//! External-request adapter: bridges an HTTP collect-request endpoint to the
//! scheduler.
//!
//! The poll loop pops pending collect requests, synthesises pass tasks for
//! them and enqueues those with the scheduler in collect_request mode.
//! Completed tasks come back as scheduler `task_complete` telemetry and are
//! posted to the endpoint as accepted collect responses; requests that fail
//! translation or admission are posted as rejected.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::StationConfig;
use crate::messaging::{
    Binding, Exchange, HandlerKind, HandlerResult, Message, MessageHandler, MessageNode,
    Messenger, NodeConfig, NodeHandle, ROUTING_PREFIX,
};
use crate::scheduler::SchedulerClient;
use crate::task::TaskGenerator;

pub const SERVICE: &str = "collect";

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const POP_PATH: &str = "/api/v1/collect-requests/pop";
const RESPONSE_PATH: &str = "/api/v1/collect-responses";

/// An external collect request. `satNo` arrives as string or number.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectRequest {
    pub id: String,
    pub sat_no: Value,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl CollectRequest {
    pub fn sat_id(&self) -> Option<String> {
        match &self.sat_no {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Accepted collect response for a completed task.
pub fn accepted_response(
    request_id: &str,
    actual_start: Option<DateTime<Utc>>,
    actual_end: Option<DateTime<Utc>>,
) -> Value {
    json!({
        "modelType": "CollectResponseAccepted",
        "requestId": request_id,
        "actualStart": actual_start,
        "actualEnd": actual_end,
        "notes": "Accepted by the sensor",
    })
}

/// Rejected collect response carrying the reason.
pub fn rejected_response(request_id: &str, reason: &str) -> Value {
    json!({
        "modelType": "CollectResponseRejected",
        "requestId": request_id,
        "notes": "Rejected by the sensor",
        "errorDescription": reason,
    })
}

pub struct CollectAdapter {
    http: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
    task_gen: TaskGenerator,
    scheduler: SchedulerClient,
    /// task id -> originating request id, resolved on task_complete.
    pending: DashMap<String, String>,
    cancel: CancellationToken,
}

impl CollectAdapter {
    pub async fn connect(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let base_url = config
            .collect_endpoint
            .clone()
            .ok_or_else(|| anyhow!("collect_endpoint not configured"))?;
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        let task_gen = TaskGenerator::connect(config, cancel.clone()).await?;
        let scheduler = SchedulerClient::connect(config, cancel.clone()).await?;
        Ok(Self {
            http,
            base_url,
            poll_interval: Duration::from_secs(config.collect_poll_secs),
            task_gen,
            scheduler,
            pending: DashMap::new(),
            cancel,
        })
    }

    /// Pop the next pending request. 404 means the remote queue is empty.
    pub async fn pop_collect_request(&self) -> Option<CollectRequest> {
        let url = format!("{}{}", self.base_url, POP_PATH);
        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Collect endpoint unreachable: {}", e);
                return None;
            }
        };
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return None;
        }
        if let Err(e) = response.error_for_status_ref() {
            error!("Collect endpoint error: {}", e);
            return None;
        }
        match response.json::<CollectRequest>().await {
            Ok(request) => Some(request),
            Err(e) => {
                error!("Malformed collect request: {}", e);
                None
            }
        }
    }

    pub async fn submit_collect_response(&self, response: &Value) {
        let url = format!("{}{}", self.base_url, RESPONSE_PATH);
        match self.http.post(&url).json(response).send().await {
            Ok(reply) => {
                if let Err(e) = reply.error_for_status() {
                    error!("Collect response rejected by endpoint: {}", e);
                } else {
                    info!("Collect response submitted");
                }
            }
            Err(e) => error!("Failed to submit collect response: {}", e),
        }
    }

    /// Translate one request into a scheduler task; posts a rejected
    /// response when translation or admission fails.
    async fn handle_request(&self, request: CollectRequest) {
        let Some(sat_id) = request.sat_id() else {
            warn!("Collect request {} missing satNo", request.id);
            self.submit_collect_response(&rejected_response(&request.id, "missing satNo"))
                .await;
            return;
        };
        let start = request.start_time.unwrap_or_else(Utc::now);

        let Some(task) = self.task_gen.generate_from(&sat_id, Some(start)).await else {
            warn!(
                "Collect request {} for {} produced no valid task",
                request.id, sat_id
            );
            self.submit_collect_response(&rejected_response(
                &request.id,
                "no schedulable pass in the requested window",
            ))
            .await;
            return;
        };

        let task_id = task.task_id.to_string();
        if self.scheduler.enqueue_collect_request(&task).await {
            info!(
                "Collect request {} enqueued as task {} for {}",
                request.id, task_id, sat_id
            );
            self.pending.insert(task_id, request.id);
        } else {
            warn!("Scheduler refused collect request {}", request.id);
            self.submit_collect_response(&rejected_response(
                &request.id,
                "cannot schedule due to resource constraints",
            ))
            .await;
        }
    }

    /// Resolve a completed task back to its request and post acceptance.
    pub async fn handle_task_complete(&self, params: &Value) {
        let Some(task_id) = params["task_id"].as_str() else {
            return;
        };
        let Some((_, request_id)) = self.pending.remove(task_id) else {
            return;
        };
        let actual_start = serde_json::from_value(params["aos"].clone()).ok();
        let actual_end = serde_json::from_value(params["los"].clone()).ok();
        self.submit_collect_response(&accepted_response(&request_id, actual_start, actual_end))
            .await;
    }

    /// Poll loop: pop-translate-enqueue, re-polling immediately after a hit
    /// and waiting the full interval otherwise. Terminates on shutdown.
    pub async fn poll_loop(self: Arc<Self>) {
        info!("Polling {} every {:?}", self.base_url, self.poll_interval);
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            if let Some(request) = self.pop_collect_request().await {
                self.handle_request(request).await;
                // Drain the remote queue promptly.
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    _ = self.cancel.cancelled() => return,
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.cancel.cancelled() => return,
            }
        }
    }
}

/// Routes scheduler task_complete telemetry into the adapter.
struct TaskCompleteHandler {
    adapter: Arc<CollectAdapter>,
}

#[async_trait]
impl MessageHandler for TaskCompleteHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Telemetry
    }

    async fn handle(
        &self,
        message: &Message,
        _correlation_id: Option<&str>,
        _node: &NodeHandle,
    ) -> HandlerResult {
        if message.payload_type() == "task_complete" {
            let adapter = self.adapter.clone();
            let params = message.payload_value().clone();
            tokio::spawn(async move {
                adapter.handle_task_complete(&params).await;
            });
        }
        Ok(None)
    }
}

fn node_config() -> NodeConfig {
    NodeConfig::service("collect-adapter")
        .exchange(Exchange::topic(SERVICE))
        .exchange(Exchange::topic("scheduler"))
        .binding(Binding::new(
            "scheduler",
            &[&format!("{ROUTING_PREFIX}.scheduler.telemetry.task_complete")],
        ))
}

pub struct CollectAdapterService {
    node: MessageNode,
}

impl CollectAdapterService {
    pub async fn serve(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let adapter = Arc::new(CollectAdapter::connect(config, cancel.clone()).await?);

        let messenger = Messenger::new("collect-adapter", crate::MESSAGE_VERSION);
        let mut node =
            MessageNode::connect(node_config(), &config.nats_url, messenger, cancel).await?;
        node.add_handler(Arc::new(TaskCompleteHandler {
            adapter: adapter.clone(),
        }));
        node.start().await?;

        tokio::spawn(adapter.poll_loop());

        Ok(Self { node })
    }

    pub async fn stop(&mut self) {
        self.node.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sat_no_accepts_strings_and_numbers() {
        let request: CollectRequest = serde_json::from_value(json!({
            "id": "req-1",
            "satNo": 25544,
        }))
        .unwrap();
        assert_eq!(request.sat_id(), Some("25544".to_string()));
        assert!(request.start_time.is_none());

        let request: CollectRequest = serde_json::from_value(json!({
            "id": "req-2",
            "satNo": "43017",
            "startTime": "2026-03-01T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(request.sat_id(), Some("43017".to_string()));
        assert!(request.start_time.is_some());

        let request: CollectRequest = serde_json::from_value(json!({
            "id": "req-3",
            "satNo": null,
        }))
        .unwrap();
        assert_eq!(request.sat_id(), None);
    }

    #[test]
    fn responses_carry_model_type_and_request_id() {
        let accepted = accepted_response("req-1", Some(Utc::now()), Some(Utc::now()));
        assert_eq!(accepted["modelType"], json!("CollectResponseAccepted"));
        assert_eq!(accepted["requestId"], json!("req-1"));
        assert!(!accepted["actualStart"].is_null());

        let rejected = rejected_response("req-2", "out of range");
        assert_eq!(rejected["modelType"], json!("CollectResponseRejected"));
        assert_eq!(rejected["requestId"], json!("req-2"));
        assert_eq!(rejected["errorDescription"], json!("out of range"));
    }
}
