//! The message-node runtime every service is an instance of.
//!
//! A node opens one broker connection, declares the streams backing its
//! exchanges, runs one consumer task per binding and dispatches decoded
//! messages to handlers organised by message kind. Outbound traffic goes
//! through a routing-key table built at start; RPC calls ride on correlation
//! ids carried in message headers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use async_nats::jetstream::{
    self,
    consumer::{AckPolicy, DeliverPolicy, pull::Config as PullConfig},
    stream::{Config as StreamConfig, StorageType},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::messaging::envelope::{Message, MessageKind, Messenger};
use crate::messaging::routing::{NodeConfig, Publishing, binding_filters};
use crate::messaging::rpc::RpcManager;

const CORRELATION_HEADER: &str = "Correlation-Id";
const CONTENT_TYPE_HEADER: &str = "Content-Type";

/// Which messages a handler wants; `All` fans out to every kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Command,
    Telemetry,
    Response,
    All,
}

impl HandlerKind {
    fn accepts(self, kind: MessageKind) -> bool {
        match self {
            HandlerKind::All => true,
            HandlerKind::Command => kind == MessageKind::Command,
            HandlerKind::Telemetry => kind == MessageKind::Telemetry,
            HandlerKind::Response => kind == MessageKind::Response,
        }
    }
}

/// Failure classes at the handler boundary.
///
/// Transient failures NAK the delivery so the broker retries it; fatal ones
/// are logged and acknowledged so a poison message cannot wedge the queue.
#[derive(Debug)]
pub enum HandlerError {
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

impl HandlerError {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        HandlerError::Transient(err.into())
    }

    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        HandlerError::Fatal(err.into())
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerError::Transient(e) => write!(f, "transient: {e:#}"),
            HandlerError::Fatal(e) => write!(f, "fatal: {e:#}"),
        }
    }
}

pub type HandlerResult = std::result::Result<Option<Value>, HandlerError>;

/// A message handler plus its startup/shutdown hooks.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn kind(&self) -> HandlerKind;

    /// Invoked after consumers are running, in registration order.
    async fn on_start(&self, _node: &NodeHandle) -> Result<()> {
        Ok(())
    }

    /// Invoked before consumers are cancelled, in registration order.
    async fn on_stop(&self, _node: &NodeHandle) -> Result<()> {
        Ok(())
    }

    /// Process one message. A `Some` return resolves the local RPC slot for
    /// the message's correlation id, if one is pending.
    async fn handle(
        &self,
        message: &Message,
        correlation_id: Option<&str>,
        node: &NodeHandle,
    ) -> HandlerResult;
}

/// Cheap clone handed to handlers and service APIs for publishing.
#[derive(Clone)]
pub struct NodeHandle {
    node_name: Arc<str>,
    jetstream: jetstream::Context,
    publish_map: Arc<HashMap<String, Publishing>>,
    rpc: Arc<RpcManager>,
    messenger: Messenger,
    cancel: CancellationToken,
}

impl NodeHandle {
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Publish `message` on `routing_key`.
    ///
    /// Unknown routing keys and broker publish failures are logged and
    /// swallowed; an RPC caller observes the latter as a null response.
    pub async fn publish(&self, routing_key: &str, message: &Message, correlation_id: Option<&str>) {
        let Some(_publishing) = self.publish_map.get(routing_key) else {
            warn!(
                "No publishing configured for routing key '{}' on node '{}'; message dropped",
                routing_key, self.node_name
            );
            metrics::counter!("messaging.publish.unroutable").increment(1);
            return;
        };

        let body = match serde_json::to_vec(message) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to encode message for '{}': {}", routing_key, e);
                return;
            }
        };

        let mut headers = async_nats::HeaderMap::new();
        headers.insert(CONTENT_TYPE_HEADER, "application/json");
        if let Some(corr_id) = correlation_id {
            headers.insert(CORRELATION_HEADER, corr_id);
        }

        match self
            .jetstream
            .publish_with_headers(routing_key.to_string(), headers, body.into())
            .await
        {
            Ok(ack) => {
                if let Err(e) = ack.await {
                    error!("Broker did not acknowledge publish to '{}': {}", routing_key, e);
                    metrics::counter!("messaging.publish.error").increment(1);
                } else {
                    debug!("Published to '{}'", routing_key);
                    metrics::counter!("messaging.published").increment(1);
                }
            }
            Err(e) => {
                error!("Failed to publish to '{}': {}", routing_key, e);
                metrics::counter!("messaging.publish.error").increment(1);
            }
        }
    }

    /// Publish `message` as an RPC and wait for the correlated response.
    ///
    /// Returns `None` when the timeout elapses, shutdown is signalled, or the
    /// publish never left this node. The pending slot is freed on every path.
    pub async fn publish_rpc(
        &self,
        routing_key: &str,
        message: &Message,
        timeout: Duration,
    ) -> Option<Value> {
        let correlation_id = Uuid::new_v4().to_string();
        let Some(receiver) = self.rpc.register(&correlation_id) else {
            error!("Correlation id collision on '{}'", correlation_id);
            return None;
        };

        self.publish(routing_key, message, Some(&correlation_id)).await;

        let response = tokio::select! {
            received = receiver => received.ok(),
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    "RPC to '{}' timed out after {:?}",
                    routing_key, timeout
                );
                metrics::counter!("messaging.rpc.timeout").increment(1);
                None
            }
            _ = self.cancel.cancelled() => {
                info!("Shutdown signalled; abandoning RPC to '{}'", routing_key);
                None
            }
        };
        self.rpc.cleanup(&correlation_id);
        response
    }
}

/// One service's connection to the broker: streams, queues, consumers, hooks.
pub struct MessageNode {
    config: NodeConfig,
    handle: NodeHandle,
    handlers: Vec<Arc<dyn MessageHandler>>,
    consumers: Vec<JoinHandle<()>>,
    stopped: AtomicBool,
}

impl MessageNode {
    /// Open the broker connection and declare this node's streams.
    ///
    /// Connection failure is fatal to the caller; stream declaration failures
    /// are logged and do not abort startup.
    pub async fn connect(
        config: NodeConfig,
        broker_url: &str,
        messenger: Messenger,
        cancel: CancellationToken,
    ) -> Result<Self> {
        info!("Node '{}' connecting to broker at {}", config.name, broker_url);
        let client = async_nats::ConnectOptions::new()
            .name(crate::nats_client_name(&config.name))
            .connect(broker_url)
            .await
            .with_context(|| format!("failed to connect to broker at {broker_url}"))?;
        let jetstream = jetstream::new(client);

        for exchange in &config.exchanges {
            let stream_config = StreamConfig {
                name: exchange.stream_name(),
                subjects: vec![exchange.subject_space()],
                storage: if exchange.durable {
                    StorageType::File
                } else {
                    StorageType::Memory
                },
                ..Default::default()
            };
            match jetstream.get_or_create_stream(stream_config).await {
                Ok(_) => debug!("Exchange '{}' declared", exchange.name),
                Err(e) => error!("Failed to declare exchange '{}': {}", exchange.name, e),
            }
        }

        let handle = NodeHandle {
            node_name: Arc::from(config.name.as_str()),
            jetstream,
            publish_map: Arc::new(config.publish_map()),
            rpc: Arc::new(RpcManager::new()),
            messenger,
            cancel,
        };

        Ok(Self {
            config,
            handle,
            handlers: Vec::new(),
            consumers: Vec::new(),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    pub fn add_handler(&mut self, handler: Arc<dyn MessageHandler>) {
        self.handlers.push(handler);
    }

    /// Declare queues, start one consumer task per binding, then run startup
    /// hooks in registration order.
    pub async fn start(&mut self) -> Result<()> {
        for binding in &self.config.bindings {
            let exchange = self
                .config
                .exchanges
                .iter()
                .find(|e| e.name == binding.exchange)
                .ok_or_else(|| {
                    anyhow!(
                        "binding references undeclared exchange '{}'",
                        binding.exchange
                    )
                })?;

            let stream = self
                .handle
                .jetstream
                .get_stream(exchange.stream_name())
                .await
                .with_context(|| format!("failed to get stream '{}'", exchange.stream_name()))?;

            let queue_name = binding.queue_name(&self.config.name);
            let filters = binding_filters(exchange, binding);
            let consumer_config = PullConfig {
                durable_name: self.config.durable_queues.then(|| queue_name.clone()),
                ack_policy: AckPolicy::Explicit,
                deliver_policy: if self.config.durable_queues {
                    DeliverPolicy::All
                } else {
                    // Ephemeral client queues only care about fresh replies.
                    DeliverPolicy::New
                },
                filter_subjects: filters.clone(),
                ..Default::default()
            };

            let consumer = if self.config.durable_queues {
                stream
                    .get_or_create_consumer(&queue_name, consumer_config)
                    .await
                    .with_context(|| format!("failed to create consumer '{queue_name}'"))?
            } else {
                stream
                    .create_consumer(consumer_config)
                    .await
                    .with_context(|| format!("failed to create ephemeral consumer for '{queue_name}'"))?
            };

            info!(
                "Queue '{}' bound to exchange '{}' with filters {:?}",
                queue_name, binding.exchange, filters
            );

            let handlers = self.handlers.clone();
            let handle = self.handle.clone();
            let cancel = self.handle.cancel.clone();
            self.consumers.push(tokio::spawn(async move {
                if let Err(e) = consume_loop(consumer, handlers, handle, cancel, &queue_name).await {
                    error!("Consumer '{}' terminated: {:#}", queue_name, e);
                }
            }));
        }

        for handler in self.handlers.clone() {
            handler
                .on_start(&self.handle)
                .await
                .context("startup hook failed")?;
        }

        info!("Node '{}' started", self.config.name);
        Ok(())
    }

    /// Run shutdown hooks then tear down consumers. Idempotent.
    pub async fn stop(&mut self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for handler in self.handlers.clone() {
            if let Err(e) = handler.on_stop(&self.handle).await {
                error!("Shutdown hook on node '{}' failed: {:#}", self.config.name, e);
            }
        }
        for consumer in self.consumers.drain(..) {
            consumer.abort();
        }
        info!("Node '{}' stopped", self.config.name);
    }
}

async fn consume_loop(
    consumer: jetstream::consumer::Consumer<PullConfig>,
    handlers: Vec<Arc<dyn MessageHandler>>,
    handle: NodeHandle,
    cancel: CancellationToken,
    queue_name: &str,
) -> Result<()> {
    let mut messages = consumer
        .messages()
        .await
        .context("failed to open message stream")?;

    loop {
        let delivery = tokio::select! {
            delivery = messages.next() => delivery,
            _ = cancel.cancelled() => {
                debug!("Consumer '{}' exiting on shutdown", queue_name);
                return Ok(());
            }
        };

        let Some(delivery) = delivery else {
            warn!("Consumer '{}' message stream ended", queue_name);
            return Ok(());
        };

        let delivered = match delivery {
            Ok(delivered) => delivered,
            Err(e) => {
                error!("Consumer '{}' receive error: {}", queue_name, e);
                metrics::counter!("messaging.consume.receive_error").increment(1);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let correlation_id = delivered
            .headers
            .as_ref()
            .and_then(|h| h.get(CORRELATION_HEADER))
            .map(|v| v.to_string());

        let message: Message = match serde_json::from_slice(&delivered.payload) {
            Ok(message) => message,
            Err(e) => {
                // Poison messages are acknowledged so they cannot loop.
                error!("Consumer '{}' failed to decode message: {}", queue_name, e);
                metrics::counter!("messaging.consume.decode_error").increment(1);
                if let Err(ack_err) = delivered.ack().await {
                    error!("Failed to ack undecodable message: {}", ack_err);
                }
                continue;
            }
        };

        metrics::counter!("messaging.consumed").increment(1);
        let mut nak = false;
        for handler in handlers.iter().filter(|h| h.kind().accepts(message.kind())) {
            match handler.handle(&message, correlation_id.as_deref(), &handle).await {
                Ok(Some(response)) => {
                    if let Some(corr_id) = correlation_id.as_deref() {
                        handle.rpc.resolve(corr_id, response);
                    }
                }
                Ok(None) => {}
                Err(HandlerError::Transient(e)) => {
                    warn!(
                        "Handler on '{}' failed transiently, delivery will retry: {:#}",
                        queue_name, e
                    );
                    metrics::counter!("messaging.consume.handler_transient").increment(1);
                    nak = true;
                    break;
                }
                Err(HandlerError::Fatal(e)) => {
                    error!("Handler on '{}' failed: {:#}", queue_name, e);
                    metrics::counter!("messaging.consume.handler_fatal").increment(1);
                }
            }
        }

        let ack_result = if nak {
            delivered
                .ack_with(jetstream::AckKind::Nak(None))
                .await
        } else {
            delivered.ack().await
        };
        if let Err(e) = ack_result {
            error!("Consumer '{}' failed to acknowledge delivery: {}", queue_name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_kind_all_accepts_everything() {
        for kind in [
            MessageKind::Command,
            MessageKind::Telemetry,
            MessageKind::Response,
        ] {
            assert!(HandlerKind::All.accepts(kind));
        }
    }

    #[test]
    fn specific_handler_kinds_filter() {
        assert!(HandlerKind::Command.accepts(MessageKind::Command));
        assert!(!HandlerKind::Command.accepts(MessageKind::Telemetry));
        assert!(HandlerKind::Telemetry.accepts(MessageKind::Telemetry));
        assert!(!HandlerKind::Response.accepts(MessageKind::Command));
    }
}
