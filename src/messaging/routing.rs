//! Static routing configuration for a message node.
//!
//! Each service declares the exchanges it touches, the bindings it consumes
//! and the routing keys it is allowed to publish. The broker side maps an
//! exchange onto a JetStream stream capturing `observatory.<exchange>.>`, and
//! a binding onto a consumer named `{exchange}_{node}` filtered to the
//! binding's routing keys.

use std::collections::HashMap;

/// Routing keys follow `observatory.<service>.<command|telemetry>.<kind>`.
pub const ROUTING_PREFIX: &str = "observatory";

/// A topic exchange. `durable` selects file-backed storage on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
}

impl Exchange {
    pub fn topic(name: &str) -> Self {
        Self {
            name: name.to_string(),
            durable: true,
            auto_delete: false,
        }
    }

    /// Stream name backing this exchange.
    pub fn stream_name(&self) -> String {
        self.name.to_uppercase()
    }

    /// Subject space captured by the exchange's stream.
    pub fn subject_space(&self) -> String {
        format!("{ROUTING_PREFIX}.{}.>", self.name)
    }
}

/// Consumption: one queue per bound exchange, filtered to `routing_keys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub exchange: String,
    pub routing_keys: Vec<String>,
}

impl Binding {
    pub fn new(exchange: &str, routing_keys: &[&str]) -> Self {
        Self {
            exchange: exchange.to_string(),
            routing_keys: routing_keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn queue_name(&self, node_name: &str) -> String {
        format!("{}_{}", self.exchange, node_name)
    }
}

/// Production: the routing keys a node may publish to an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publishing {
    pub exchange: String,
    pub rpc: bool,
    pub routing_keys: Vec<String>,
}

impl Publishing {
    pub fn new(exchange: &str, rpc: bool, routing_keys: &[&str]) -> Self {
        Self {
            exchange: exchange.to_string(),
            rpc,
            routing_keys: routing_keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Full static configuration for one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub name: String,
    pub exchanges: Vec<Exchange>,
    pub bindings: Vec<Binding>,
    pub publishings: Vec<Publishing>,
    /// Services keep durable queues that survive restarts; clients use
    /// ephemeral ones so RPC replies are never load-balanced across
    /// unrelated processes holding the same client config.
    pub durable_queues: bool,
}

impl NodeConfig {
    pub fn service(name: &str) -> Self {
        Self {
            name: name.to_string(),
            exchanges: Vec::new(),
            bindings: Vec::new(),
            publishings: Vec::new(),
            durable_queues: true,
        }
    }

    pub fn client(name: &str) -> Self {
        Self {
            durable_queues: false,
            ..Self::service(name)
        }
    }

    pub fn exchange(mut self, exchange: Exchange) -> Self {
        self.exchanges.push(exchange);
        self
    }

    pub fn binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn publishing(mut self, publishing: Publishing) -> Self {
        self.publishings.push(publishing);
        self
    }

    /// Routing key -> publishing lookup, built once at start.
    pub fn publish_map(&self) -> HashMap<String, Publishing> {
        let mut map = HashMap::new();
        for publishing in &self.publishings {
            for key in &publishing.routing_keys {
                map.insert(key.clone(), publishing.clone());
            }
        }
        map
    }
}

/// Translate an AMQP-style routing-key pattern into a NATS subject filter.
///
/// `*` matches one token in both grammars; `#` (zero or more tokens) becomes
/// the NATS tail wildcard `>`.
pub fn pattern_to_subject(pattern: &str) -> String {
    pattern
        .split('.')
        .map(|token| if token == "#" { ">" } else { token })
        .collect::<Vec<_>>()
        .join(".")
}

/// Subject filters for a binding. A bare `#` binding collapses to the whole
/// exchange subject space.
pub fn binding_filters(exchange: &Exchange, binding: &Binding) -> Vec<String> {
    binding
        .routing_keys
        .iter()
        .map(|key| {
            if key == "#" {
                exchange.subject_space()
            } else {
                pattern_to_subject(key)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_translation_maps_hash_to_tail_wildcard() {
        assert_eq!(
            pattern_to_subject("observatory.scheduler.command.*"),
            "observatory.scheduler.command.*"
        );
        assert_eq!(
            pattern_to_subject("observatory.scheduler.telemetry.#"),
            "observatory.scheduler.telemetry.>"
        );
    }

    #[test]
    fn bare_hash_binding_covers_exchange_subject_space() {
        let exchange = Exchange::topic("mount");
        let binding = Binding::new("mount", &["#"]);
        assert_eq!(
            binding_filters(&exchange, &binding),
            vec!["observatory.mount.>".to_string()]
        );
    }

    #[test]
    fn publish_map_indexes_every_routing_key() {
        let config = NodeConfig::client("mount-client").publishing(Publishing::new(
            "mount",
            true,
            &[
                "observatory.mount.command.set",
                "observatory.mount.command.status",
            ],
        ));
        let map = config.publish_map();
        assert_eq!(map.len(), 2);
        assert!(map["observatory.mount.command.set"].rpc);
        assert!(!map.contains_key("observatory.mount.command.stop"));
    }

    #[test]
    fn queue_names_pair_exchange_with_node() {
        let binding = Binding::new("scheduler", &["observatory.scheduler.command.*"]);
        assert_eq!(
            binding.queue_name("scheduler-controller"),
            "scheduler_scheduler-controller"
        );
    }
}
