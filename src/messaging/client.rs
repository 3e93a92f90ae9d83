//! Client-side base for talking to a service over the broker.
//!
//! A `CommandClient` is a small message node of its own: it publishes on the
//! service's `command.*` routing keys and consumes the service's
//! `telemetry.#` so that RPC replies resolve against the local RPC manager.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::messaging::envelope::{Message, Messenger};
use crate::messaging::node::{
    HandlerKind, HandlerResult, MessageHandler, MessageNode, NodeHandle,
};
use crate::messaging::routing::{Binding, Exchange, NodeConfig, Publishing, ROUTING_PREFIX};

/// Telemetry handler that surfaces reply parameters to the RPC manager.
struct TelemetryEcho;

#[async_trait]
impl MessageHandler for TelemetryEcho {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Telemetry
    }

    async fn handle(
        &self,
        message: &Message,
        _correlation_id: Option<&str>,
        _node: &NodeHandle,
    ) -> HandlerResult {
        Ok(Some(message.payload_value().clone()))
    }
}

pub struct CommandClient {
    node: MessageNode,
    handle: NodeHandle,
    routing_key_base: String,
    timeout: Duration,
}

impl CommandClient {
    /// Connect a client for `service`, allowed to publish `commands`.
    pub async fn connect(
        service: &str,
        commands: &[&str],
        broker_url: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let routing_key_base = format!("{ROUTING_PREFIX}.{service}.command");
        let command_keys: Vec<String> = commands
            .iter()
            .map(|c| format!("{routing_key_base}.{c}"))
            .collect();
        let command_key_refs: Vec<&str> = command_keys.iter().map(String::as_str).collect();
        let client_name = format!("{service}-client");

        let config = NodeConfig::client(&client_name)
            .exchange(Exchange::topic(service))
            .binding(Binding::new(
                service,
                &[&format!("{ROUTING_PREFIX}.{service}.telemetry.#")],
            ))
            .publishing(Publishing::new(service, true, &command_key_refs));

        let messenger = Messenger::new(&client_name, crate::MESSAGE_VERSION);
        let mut node = MessageNode::connect(config, broker_url, messenger, cancel).await?;
        node.add_handler(Arc::new(TelemetryEcho));
        node.start().await?;
        let handle = node.handle();

        Ok(Self {
            node,
            handle,
            routing_key_base,
            timeout,
        })
    }

    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    /// Issue `command` as an RPC with the client's default timeout.
    pub async fn call(&self, command: &str, parameters: Value) -> Option<Value> {
        self.call_with_timeout(command, parameters, self.timeout).await
    }

    /// Issue `command` as an RPC, waiting up to `timeout` for the reply.
    pub async fn call_with_timeout(
        &self,
        command: &str,
        parameters: Value,
        timeout: Duration,
    ) -> Option<Value> {
        let routing_key = format!("{}.{}", self.routing_key_base, command);
        let message = self.handle.messenger().command(command, parameters);
        self.handle.publish_rpc(&routing_key, &message, timeout).await
    }

    /// Issue `command` fire-and-forget.
    pub async fn send(&self, command: &str, parameters: Value) {
        let routing_key = format!("{}.{}", self.routing_key_base, command);
        let message = self.handle.messenger().command(command, parameters);
        self.handle.publish(&routing_key, &message, None).await;
    }

    pub async fn stop(&mut self) {
        self.node.stop().await;
    }
}
