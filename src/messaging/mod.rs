//! Topic-routed messaging substrate shared by every service.

pub mod client;
pub mod envelope;
pub mod node;
pub mod routing;
pub mod rpc;

pub use client::CommandClient;
pub use envelope::{Message, MessageKind, Messenger};
pub use node::{HandlerError, HandlerKind, HandlerResult, MessageHandler, MessageNode, NodeHandle};
pub use routing::{Binding, Exchange, NodeConfig, Publishing, ROUTING_PREFIX};
pub use rpc::RpcManager;
