// msgchain/src/chain/topology.rs

//! Defines `ChainTopology`, the binder that routes a message type into the chain queue
//! for one correlation id, and removes that route again.

use crate::chain::dispatcher::ChainDispatcher;
use crate::config::SequenceConfig;
use crate::core::correlation::CorrelationId;
use crate::core::message::{Envelope, Message};
use crate::error::{ChainError, ChainResult};
use crate::transport::{Consumer, QueueConfig, SubscriptionId, Transport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{event, instrument, Level};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
  pub message_type: String,
  pub correlation_id: CorrelationId,
}

/// Feeds the chain queue into the dispatcher.
struct ChainConsumer {
  dispatcher: Arc<ChainDispatcher>,
}

#[async_trait]
impl Consumer for ChainConsumer {
  async fn deliver(&self, envelope: Envelope) -> anyhow::Result<()> {
    self.dispatcher.invoke(envelope).await;
    Ok(())
  }
}

pub struct ChainTopology {
  transport: Arc<dyn Transport>,
  config: Arc<SequenceConfig>,
  dispatcher: Arc<ChainDispatcher>,
  queue: QueueConfig,
  queue_ready: OnceCell<SubscriptionId>,
  // One cell per binding: concurrent binds of the same key wait on the same broker call,
  // and a failed bind leaves the cell empty so a retry goes back to the broker.
  bindings: Mutex<HashMap<BindingKey, Arc<OnceCell<()>>>>,
}

impl ChainTopology {
  pub fn new(transport: Arc<dyn Transport>, config: Arc<SequenceConfig>, dispatcher: Arc<ChainDispatcher>) -> Self {
    let queue = config.chain_queue();
    Self {
      transport,
      config,
      dispatcher,
      queue,
      queue_ready: OnceCell::new(),
      bindings: Mutex::new(HashMap::new()),
    }
  }

  pub fn queue_name(&self) -> &str {
    &self.queue.name
  }

  /// Declares the chain queue and attaches the dispatcher to it, once.
  async fn ensure_queue(&self) -> ChainResult<()> {
    self
      .queue_ready
      .get_or_try_init(|| async {
        self.transport.declare_queue(&self.queue).await?;
        let consumer = Arc::new(ChainConsumer {
          dispatcher: self.dispatcher.clone(),
        });
        let subscription = self.transport.subscribe(&self.queue.name, consumer).await?;
        event!(Level::DEBUG, queue = %self.queue.name, %subscription, "Chain queue ready.");
        Ok::<_, ChainError>(subscription)
      })
      .await?;
    Ok(())
  }

  pub async fn bind_to_exchange<M: Message>(&self, correlation_id: CorrelationId) -> ChainResult<()> {
    self.bind(M::MESSAGE_TYPE, correlation_id).await
  }

  /// Routes `message_type` messages tagged with `correlation_id` into the chain queue.
  /// Binding an already bound pair is a no-op success.
  #[instrument(name = "ChainTopology::bind", skip(self), err(Display))]
  pub async fn bind(&self, message_type: &str, correlation_id: CorrelationId) -> ChainResult<()> {
    let binding_err = |source: TransportError| ChainError::Binding {
      message_type: message_type.to_string(),
      correlation_id,
      source,
    };

    self.ensure_queue().await.map_err(|e| match e {
      ChainError::Transport(source) => binding_err(source),
      other => other,
    })?;

    let key = BindingKey {
      message_type: message_type.to_string(),
      correlation_id,
    };
    let cell = self.bindings.lock().entry(key.clone()).or_default().clone();

    let exchange = self.config.exchange(message_type);
    let routing_key = self.config.chain_binding_key(correlation_id);
    let result = cell
      .get_or_try_init(|| async {
        self.transport.declare_exchange(&exchange).await?;
        self
          .transport
          .bind_queue(&self.queue.name, &exchange.name, &routing_key)
          .await?;
        event!(Level::DEBUG, exchange = %exchange.name, %routing_key, queue = %self.queue.name, "Binding created.");
        Ok::<(), TransportError>(())
      })
      .await;

    if let Err(source) = result {
      let mut bindings = self.bindings.lock();
      if bindings.get(&key).is_some_and(|c| !c.initialized()) {
        bindings.remove(&key);
      }
      return Err(binding_err(source));
    }
    Ok(())
  }

  /// Removes the route created by `bind`. Unbinding a pair that is not bound is a no-op.
  ///
  /// The binding stays recorded until the broker confirms the unbind, so a failed
  /// unbind can be retried.
  #[instrument(name = "ChainTopology::unbind", skip(self), err(Display))]
  pub async fn unbind_from_exchange(&self, message_type: &str, correlation_id: CorrelationId) -> ChainResult<()> {
    let key = BindingKey {
      message_type: message_type.to_string(),
      correlation_id,
    };
    let existing = self.bindings.lock().get(&key).cloned();
    let Some(cell) = existing else {
      event!(Level::TRACE, "Not bound, nothing to remove.");
      return Ok(());
    };
    if !cell.initialized() {
      return Ok(());
    }

    let exchange = self.config.exchange_name(message_type);
    let routing_key = self.config.chain_binding_key(correlation_id);
    self
      .transport
      .unbind_queue(&self.queue.name, &exchange, &routing_key)
      .await
      .map_err(|source| ChainError::Binding {
        message_type: message_type.to_string(),
        correlation_id,
        source,
      })?;

    let mut bindings = self.bindings.lock();
    if bindings.get(&key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
      bindings.remove(&key);
    }
    drop(bindings);
    event!(Level::DEBUG, %exchange, %routing_key, "Binding removed.");
    Ok(())
  }

  pub fn is_bound(&self, message_type: &str, correlation_id: CorrelationId) -> bool {
    let key = BindingKey {
      message_type: message_type.to_string(),
      correlation_id,
    };
    self.bindings.lock().get(&key).is_some_and(|c| c.initialized())
  }

  /// Number of live bindings across all sequences.
  pub fn binding_count(&self) -> usize {
    self.bindings.lock().values().filter(|c| c.initialized()).count()
  }
}
