// msgchain/src/config.rs

//! Naming conventions and topology settings shared by the bus client and the
//! sequence engine.

use crate::core::correlation::CorrelationId;
use crate::error::{ChainError, ChainResult};
use crate::transport::{ExchangeConfig, ExchangeType, QueueConfig};
use std::env;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceConfig {
  /// Prepended to a message type to form its exchange name.
  pub exchange_prefix: String,
  pub exchange_type: ExchangeType,
  /// The chain queue is named `<prefix><uuid>`, one per client.
  pub chain_queue_prefix: String,
  pub chain_queue_auto_delete: bool,
  pub chain_queue_exclusive: bool,
  /// Default queue name for ordinary subscribers is `<prefix><message type>`.
  pub subscriber_queue_prefix: String,
  /// Where failed subscriber deliveries are republished. `None` disables it.
  pub error_exchange: Option<String>,
}

impl Default for SequenceConfig {
  fn default() -> Self {
    Self {
      exchange_prefix: String::new(),
      exchange_type: ExchangeType::Topic,
      chain_queue_prefix: "msgchain_chain_".to_string(),
      chain_queue_auto_delete: true,
      chain_queue_exclusive: true,
      subscriber_queue_prefix: "msgchain_sub_".to_string(),
      error_exchange: Some("default_error_exchange".to_string()),
    }
  }
}

impl SequenceConfig {
  /// Reads `MSGCHAIN_*` environment variables, falling back to the defaults for any
  /// that are unset.
  ///
  /// | variable | field |
  /// |---|---|
  /// | `MSGCHAIN_EXCHANGE_PREFIX` | `exchange_prefix` |
  /// | `MSGCHAIN_EXCHANGE_TYPE` | `exchange_type` (must be `topic`) |
  /// | `MSGCHAIN_CHAIN_QUEUE_PREFIX` | `chain_queue_prefix` |
  /// | `MSGCHAIN_CHAIN_QUEUE_AUTO_DELETE` | `chain_queue_auto_delete` |
  /// | `MSGCHAIN_CHAIN_QUEUE_EXCLUSIVE` | `chain_queue_exclusive` |
  /// | `MSGCHAIN_SUBSCRIBER_QUEUE_PREFIX` | `subscriber_queue_prefix` |
  /// | `MSGCHAIN_ERROR_EXCHANGE` | `error_exchange` (empty disables) |
  pub fn from_env() -> ChainResult<Self> {
    let defaults = Self::default();
    let get_env = |var_name: &str| env::var(var_name).ok();
    let parse_bool = |var_name: &str, default: bool| -> ChainResult<bool> {
      match get_env(var_name) {
        Some(raw) => raw
          .trim()
          .parse::<bool>()
          .map_err(|e| ChainError::configuration(format!("Invalid {} value '{}': {}", var_name, raw, e))),
        None => Ok(default),
      }
    };

    let exchange_type = match get_env("MSGCHAIN_EXCHANGE_TYPE") {
      Some(raw) => raw
        .parse::<ExchangeType>()
        .map_err(|e| ChainError::configuration(format!("Invalid MSGCHAIN_EXCHANGE_TYPE: {}", e)))?,
      None => defaults.exchange_type,
    };

    let error_exchange = match get_env("MSGCHAIN_ERROR_EXCHANGE") {
      Some(raw) if raw.trim().is_empty() => None,
      Some(raw) => Some(raw),
      None => defaults.error_exchange,
    };

    let config = Self {
      exchange_prefix: get_env("MSGCHAIN_EXCHANGE_PREFIX").unwrap_or(defaults.exchange_prefix),
      exchange_type,
      chain_queue_prefix: get_env("MSGCHAIN_CHAIN_QUEUE_PREFIX").unwrap_or(defaults.chain_queue_prefix),
      chain_queue_auto_delete: parse_bool("MSGCHAIN_CHAIN_QUEUE_AUTO_DELETE", defaults.chain_queue_auto_delete)?,
      chain_queue_exclusive: parse_bool("MSGCHAIN_CHAIN_QUEUE_EXCLUSIVE", defaults.chain_queue_exclusive)?,
      subscriber_queue_prefix: get_env("MSGCHAIN_SUBSCRIBER_QUEUE_PREFIX").unwrap_or(defaults.subscriber_queue_prefix),
      error_exchange,
    };

    config.validate()?;
    tracing::debug!(config = ?config, "Sequence configuration loaded from environment.");
    Ok(config)
  }

  /// Chain bindings filter on `#.<correlation id>`, which only a topic exchange
  /// evaluates: a direct exchange never matches it and a fanout exchange ignores it.
  pub fn validate(&self) -> ChainResult<()> {
    if self.exchange_type != ExchangeType::Topic {
      return Err(ChainError::configuration(format!(
        "exchange type {:?} is not supported: sequences route on topic bindings",
        self.exchange_type
      )));
    }
    Ok(())
  }

  pub fn exchange_name(&self, message_type: &str) -> String {
    format!("{}{}", self.exchange_prefix, message_type)
  }

  pub fn exchange(&self, message_type: &str) -> ExchangeConfig {
    ExchangeConfig::new(self.exchange_name(message_type), self.exchange_type)
  }

  /// Routing key every published message carries: `<message type>.<correlation id>`.
  pub fn publish_routing_key(&self, message_type: &str, correlation_id: CorrelationId) -> String {
    format!("{}.{}", message_type, correlation_id)
  }

  /// Topic filter that lets only messages of one sequence through: `#.<correlation id>`.
  pub fn chain_binding_key(&self, correlation_id: CorrelationId) -> String {
    format!("#.{}", correlation_id)
  }

  /// A freshly named chain queue. Called once per client.
  pub fn chain_queue(&self) -> QueueConfig {
    QueueConfig {
      name: format!("{}{}", self.chain_queue_prefix, Uuid::new_v4().simple()),
      durable: false,
      auto_delete: self.chain_queue_auto_delete,
      exclusive: self.chain_queue_exclusive,
    }
  }

  pub fn subscriber_queue(&self, message_type: &str) -> QueueConfig {
    QueueConfig::new(format!("{}{}", self.subscriber_queue_prefix, message_type))
  }
}
