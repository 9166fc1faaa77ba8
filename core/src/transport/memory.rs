// msgchain/src/transport/memory.rs

//! An in-process broker with AMQP-like routing semantics.
//!
//! Exchanges route by type (topic/direct/fanout), queues hold a backlog until a
//! consumer attaches, and each delivery is handed to a consumer on its own tokio task,
//! so deliveries for the same queue run concurrently and in no particular order.
//! Consumers on one queue compete round-robin.
//!
//! Every topology call is appended to an operation log (`operations()`), and binding
//! failures can be injected per exchange, which is what the sequence tests assert on.

use super::{Consumer, ExchangeConfig, ExchangeType, QueueConfig, SubscriptionId, Transport, TransportError};
use crate::core::message::Envelope;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{event, Level};

/// One topology call as issued against the broker, whether or not it changed anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyOperation {
  DeclareExchange(String),
  DeclareQueue(String),
  Bind {
    queue: String,
    exchange: String,
    routing_key: String,
  },
  Unbind {
    queue: String,
    exchange: String,
    routing_key: String,
  },
  DeleteQueue(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingSnapshot {
  pub queue: String,
  pub exchange: String,
  pub routing_key: String,
}

struct QueueEntry {
  config: QueueConfig,
  consumers: Vec<SubscriptionId>,
  next_consumer: usize,
  backlog: VecDeque<Envelope>,
}

#[derive(Default)]
struct BrokerState {
  exchanges: HashMap<String, ExchangeConfig>,
  queues: HashMap<String, QueueEntry>,
  bindings: HashSet<BindingSnapshot>,
  consumers: HashMap<SubscriptionId, (String, Arc<dyn Consumer>)>,
  failing_exchanges: HashSet<String>,
  operations: Vec<TopologyOperation>,
  published: usize,
}

#[derive(Default)]
pub struct InMemoryBroker {
  state: Mutex<BrokerState>,
}

impl InMemoryBroker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Makes every subsequent `bind_queue` against `exchange` fail with `Rejected`.
  pub fn fail_bindings_for(&self, exchange: impl Into<String>) {
    self.state.lock().failing_exchanges.insert(exchange.into());
  }

  pub fn clear_binding_failures(&self) {
    self.state.lock().failing_exchanges.clear();
  }

  pub fn operations(&self) -> Vec<TopologyOperation> {
    self.state.lock().operations.clone()
  }

  pub fn bindings(&self) -> Vec<BindingSnapshot> {
    self.state.lock().bindings.iter().cloned().collect()
  }

  /// Bindings whose routing key equals `routing_key`.
  pub fn bindings_with_key(&self, routing_key: &str) -> Vec<BindingSnapshot> {
    self
      .state
      .lock()
      .bindings
      .iter()
      .filter(|b| b.routing_key == routing_key)
      .cloned()
      .collect()
  }

  pub fn has_exchange(&self, name: &str) -> bool {
    self.state.lock().exchanges.contains_key(name)
  }

  pub fn has_queue(&self, name: &str) -> bool {
    self.state.lock().queues.contains_key(name)
  }

  /// Messages waiting in `queue` for a consumer.
  pub fn backlog_len(&self, queue: &str) -> usize {
    self.state.lock().queues.get(queue).map_or(0, |q| q.backlog.len())
  }

  pub fn published_count(&self) -> usize {
    self.state.lock().published
  }

  fn dispatch(deliveries: Vec<(Arc<dyn Consumer>, Envelope)>) {
    for (consumer, envelope) in deliveries {
      tokio::spawn(async move {
        let message_type = envelope.message_type.clone();
        let correlation_id = envelope.correlation_id;
        if let Err(e) = consumer.deliver(envelope).await {
          event!(Level::WARN, %message_type, %correlation_id, error = %e, "Consumer failed to handle delivery.");
        }
      });
    }
  }
}

/// AMQP topic matching: `*` matches exactly one word, `#` matches zero or more.
pub(crate) fn topic_matches(pattern: &str, routing_key: &str) -> bool {
  fn matches(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.first(), key.first()) {
      (None, None) => true,
      (Some(&"#"), _) => matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..])),
      (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
      (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
      _ => false,
    }
  }
  let pattern: Vec<&str> = pattern.split('.').collect();
  let key: Vec<&str> = routing_key.split('.').collect();
  matches(&pattern, &key)
}

fn routes(exchange_type: ExchangeType, binding_key: &str, routing_key: &str) -> bool {
  match exchange_type {
    ExchangeType::Topic => topic_matches(binding_key, routing_key),
    ExchangeType::Direct => binding_key == routing_key,
    ExchangeType::Fanout => true,
  }
}

#[async_trait]
impl Transport for InMemoryBroker {
  async fn declare_exchange(&self, exchange: &ExchangeConfig) -> Result<(), TransportError> {
    let mut state = self.state.lock();
    state.operations.push(TopologyOperation::DeclareExchange(exchange.name.clone()));
    if let Some(existing) = state.exchanges.get(&exchange.name) {
      if existing.exchange_type != exchange.exchange_type {
        return Err(TransportError::ExchangeTypeConflict {
          name: exchange.name.clone(),
          existing: existing.exchange_type,
          requested: exchange.exchange_type,
        });
      }
      return Ok(());
    }
    event!(Level::TRACE, exchange = %exchange.name, "Exchange declared.");
    state.exchanges.insert(exchange.name.clone(), exchange.clone());
    Ok(())
  }

  async fn declare_queue(&self, queue: &QueueConfig) -> Result<(), TransportError> {
    let mut state = self.state.lock();
    state.operations.push(TopologyOperation::DeclareQueue(queue.name.clone()));
    state.queues.entry(queue.name.clone()).or_insert_with(|| {
      event!(Level::TRACE, queue = %queue.name, "Queue declared.");
      QueueEntry {
        config: queue.clone(),
        consumers: Vec::new(),
        next_consumer: 0,
        backlog: VecDeque::new(),
      }
    });
    Ok(())
  }

  async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), TransportError> {
    let mut state = self.state.lock();
    state.operations.push(TopologyOperation::Bind {
      queue: queue.to_string(),
      exchange: exchange.to_string(),
      routing_key: routing_key.to_string(),
    });
    if state.failing_exchanges.contains(exchange) {
      return Err(TransportError::Rejected {
        operation: format!("bind {} -> {} ({})", exchange, queue, routing_key),
        reason: "binding failure injected".to_string(),
      });
    }
    if !state.exchanges.contains_key(exchange) {
      return Err(TransportError::ExchangeNotFound(exchange.to_string()));
    }
    if !state.queues.contains_key(queue) {
      return Err(TransportError::QueueNotFound(queue.to_string()));
    }
    state.bindings.insert(BindingSnapshot {
      queue: queue.to_string(),
      exchange: exchange.to_string(),
      routing_key: routing_key.to_string(),
    });
    Ok(())
  }

  async fn unbind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), TransportError> {
    let mut state = self.state.lock();
    state.operations.push(TopologyOperation::Unbind {
      queue: queue.to_string(),
      exchange: exchange.to_string(),
      routing_key: routing_key.to_string(),
    });
    state.bindings.remove(&BindingSnapshot {
      queue: queue.to_string(),
      exchange: exchange.to_string(),
      routing_key: routing_key.to_string(),
    });
    Ok(())
  }

  async fn publish(&self, envelope: Envelope) -> Result<(), TransportError> {
    let deliveries = {
      let mut state = self.state.lock();
      let exchange_type = state
        .exchanges
        .get(&envelope.exchange)
        .map(|e| e.exchange_type)
        .ok_or_else(|| TransportError::ExchangeNotFound(envelope.exchange.clone()))?;
      state.published += 1;

      let targets: HashSet<String> = state
        .bindings
        .iter()
        .filter(|b| b.exchange == envelope.exchange && routes(exchange_type, &b.routing_key, &envelope.routing_key))
        .map(|b| b.queue.clone())
        .collect();

      if targets.is_empty() {
        event!(Level::TRACE, exchange = %envelope.exchange, routing_key = %envelope.routing_key, "Message unroutable, dropped.");
      }

      let mut deliveries = Vec::new();
      for queue_name in targets {
        let consumer_id = match state.queues.get_mut(&queue_name) {
          Some(queue) if queue.consumers.is_empty() => {
            queue.backlog.push_back(envelope.clone());
            None
          }
          Some(queue) => {
            let idx = queue.next_consumer % queue.consumers.len();
            queue.next_consumer = queue.next_consumer.wrapping_add(1);
            Some(queue.consumers[idx])
          }
          None => None,
        };
        if let Some((_, consumer)) = consumer_id.and_then(|id| state.consumers.get(&id)) {
          deliveries.push((consumer.clone(), envelope.clone()));
        }
      }
      deliveries
    };
    Self::dispatch(deliveries);
    Ok(())
  }

  async fn subscribe(&self, queue: &str, consumer: Arc<dyn Consumer>) -> Result<SubscriptionId, TransportError> {
    let subscription = SubscriptionId::default();
    let backlog = {
      let mut state = self.state.lock();
      let entry = state
        .queues
        .get_mut(queue)
        .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))?;
      entry.consumers.push(subscription);
      let backlog: Vec<Envelope> = entry.backlog.drain(..).collect();
      state.consumers.insert(subscription, (queue.to_string(), consumer.clone()));
      backlog
    };
    event!(Level::DEBUG, %queue, %subscription, backlog = backlog.len(), "Consumer attached.");
    Self::dispatch(backlog.into_iter().map(|env| (consumer.clone(), env)).collect());
    Ok(subscription)
  }

  async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), TransportError> {
    let mut state = self.state.lock();
    let (queue_name, _) = state
      .consumers
      .remove(&subscription)
      .ok_or(TransportError::SubscriptionNotFound(subscription))?;

    let delete_queue = match state.queues.get_mut(&queue_name) {
      Some(queue) => {
        queue.consumers.retain(|id| *id != subscription);
        queue.consumers.is_empty() && queue.config.auto_delete
      }
      None => false,
    };
    if delete_queue {
      event!(Level::DEBUG, queue = %queue_name, "Auto-delete queue lost its last consumer, deleting.");
      state.queues.remove(&queue_name);
      state.bindings.retain(|b| b.queue != queue_name);
      state.operations.push(TopologyOperation::DeleteQueue(queue_name));
    }
    Ok(())
  }
}
