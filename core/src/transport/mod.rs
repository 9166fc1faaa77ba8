// msgchain/src/transport/mod.rs

//! The broker boundary consumed by the sequence engine.
//!
//! The engine only needs a handful of primitives: declare an exchange or a queue,
//! bind or unbind a queue with a routing filter, publish an envelope, and attach a
//! consumer to a queue. Anything speaking AMQP-style topology can implement
//! [`Transport`]; [`memory::InMemoryBroker`] is the in-process implementation used by
//! the tests, examples and benches.

pub mod memory;

use crate::core::message::Envelope;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub use memory::{BindingSnapshot, InMemoryBroker, TopologyOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeType {
  /// Routing keys are dot-separated words; `*` matches one word, `#` zero or more.
  Topic,
  /// Exact routing key match.
  Direct,
  /// Every bound queue receives every message.
  Fanout,
}

impl std::str::FromStr for ExchangeType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "topic" => Ok(ExchangeType::Topic),
      "direct" => Ok(ExchangeType::Direct),
      "fanout" => Ok(ExchangeType::Fanout),
      other => Err(format!("unknown exchange type '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
  pub name: String,
  pub exchange_type: ExchangeType,
  pub durable: bool,
  pub auto_delete: bool,
}

impl ExchangeConfig {
  pub fn new(name: impl Into<String>, exchange_type: ExchangeType) -> Self {
    Self {
      name: name.into(),
      exchange_type,
      durable: true,
      auto_delete: false,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
  pub name: String,
  pub durable: bool,
  /// Deleted by the broker once its last consumer goes away.
  pub auto_delete: bool,
  /// Only usable by the connection that declared it.
  pub exclusive: bool,
}

impl QueueConfig {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      durable: true,
      auto_delete: false,
      exclusive: false,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl Default for SubscriptionId {
  fn default() -> Self {
    SubscriptionId(Uuid::new_v4())
  }
}

impl fmt::Display for SubscriptionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Error)]
pub enum TransportError {
  #[error("Exchange not found: {0}")]
  ExchangeNotFound(String),

  #[error("Queue not found: {0}")]
  QueueNotFound(String),

  #[error("Exchange '{name}' already declared as {existing:?}, cannot redeclare as {requested:?}")]
  ExchangeTypeConflict {
    name: String,
    existing: ExchangeType,
    requested: ExchangeType,
  },

  #[error("Broker rejected '{operation}': {reason}")]
  Rejected { operation: String, reason: String },

  #[error("Subscription not found: {0}")]
  SubscriptionNotFound(SubscriptionId),
}

/// Receives envelopes delivered from a queue.
///
/// Deliveries may arrive concurrently and in any order. A returned error is logged by
/// the transport and does not stop further deliveries.
#[async_trait]
pub trait Consumer: Send + Sync {
  async fn deliver(&self, envelope: Envelope) -> anyhow::Result<()>;
}

/// Broker primitives. Declarations and bind/unbind must be idempotent.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn declare_exchange(&self, exchange: &ExchangeConfig) -> Result<(), TransportError>;

  async fn declare_queue(&self, queue: &QueueConfig) -> Result<(), TransportError>;

  async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), TransportError>;

  /// Removing a binding that does not exist is not an error.
  async fn unbind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), TransportError>;

  /// Fire-and-forget: succeeds once the broker accepted the envelope for routing.
  async fn publish(&self, envelope: Envelope) -> Result<(), TransportError>;

  async fn subscribe(&self, queue: &str, consumer: Arc<dyn Consumer>) -> Result<SubscriptionId, TransportError>;

  async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), TransportError>;
}
