// msgchain/src/client.rs

//! Defines `BusClient`, the entry point applications hold: plain publish/subscribe over a
//! [`Transport`], plus `message_sequence()` for building correlated sequences.

use crate::chain::builder::MessageSequenceBuilder;
use crate::chain::engine::SequenceEngine;
use crate::config::SequenceConfig;
use crate::core::correlation::CorrelationId;
use crate::core::handler::{typed_handler, StepHandler};
use crate::core::message::{Envelope, Message, MessageContext};
use crate::error::{ChainError, ChainResult};
use crate::transport::{Consumer, ExchangeConfig, QueueConfig, SubscriptionId, Transport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{event, instrument, Level};

/// Published to the error exchange when an ordinary subscriber's handler fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HandlerExceptionMessage {
  /// Type of the message whose handler failed.
  pub message_type: String,
  /// The handler error, including its source.
  pub exception: String,
  /// The failed message's body, as text.
  pub payload: String,
}

impl Message for HandlerExceptionMessage {
  const MESSAGE_TYPE: &'static str = "handler_exception";
}

/// Overrides for `BusClient::subscribe_with`. Unset fields use the configured conventions.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
  pub exchange: Option<String>,
  /// Binding filter; defaults to `#` (every message on the exchange).
  pub routing_key: Option<String>,
  pub queue: Option<QueueConfig>,
}

impl SubscribeOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
    self.exchange = Some(exchange.into());
    self
  }

  pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
    self.routing_key = Some(routing_key.into());
    self
  }

  pub fn queue(mut self, queue: QueueConfig) -> Self {
    self.queue = Some(queue);
    self
  }
}

struct ClientInner {
  transport: Arc<dyn Transport>,
  config: Arc<SequenceConfig>,
  engine: Arc<SequenceEngine>,
}

/// Cheap to clone; all clones share one chain queue and one sequence engine.
#[derive(Clone)]
pub struct BusClient {
  inner: Arc<ClientInner>,
}

impl BusClient {
  /// Fails with `ChainError::Configuration` if `config` does not validate.
  pub fn new(transport: Arc<dyn Transport>, config: SequenceConfig) -> ChainResult<Self> {
    config.validate()?;
    let config = Arc::new(config);
    let engine = Arc::new(SequenceEngine::new(transport.clone(), config.clone()));
    Ok(Self {
      inner: Arc::new(ClientInner {
        transport,
        config,
        engine,
      }),
    })
  }

  pub fn config(&self) -> &SequenceConfig {
    &self.inner.config
  }

  pub fn transport(&self) -> &Arc<dyn Transport> {
    &self.inner.transport
  }

  pub fn engine(&self) -> &Arc<SequenceEngine> {
    &self.inner.engine
  }

  /// Publishes `message` to its exchange, tagged with `correlation_id`.
  #[instrument(
    name = "BusClient::publish",
    skip_all,
    fields(message_type = M::MESSAGE_TYPE, %correlation_id),
    err(Display)
  )]
  pub async fn publish<M: Message>(&self, message: &M, correlation_id: CorrelationId) -> ChainResult<()> {
    let envelope = self.inner.engine.envelope(message, correlation_id)?;
    self.inner.engine.publish(envelope).await
  }

  /// Subscribes `handler` to every `M` published, on the conventional subscriber queue.
  pub async fn subscribe<M, H, Fut, E>(&self, handler: H) -> ChainResult<SubscriptionId>
  where
    M: Message,
    H: Fn(M, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
  {
    self.subscribe_with(SubscribeOptions::default(), handler).await
  }

  #[instrument(
    name = "BusClient::subscribe",
    skip_all,
    fields(message_type = M::MESSAGE_TYPE),
    err(Display)
  )]
  pub async fn subscribe_with<M, H, Fut, E>(&self, options: SubscribeOptions, handler: H) -> ChainResult<SubscriptionId>
  where
    M: Message,
    H: Fn(M, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
  {
    let config = &self.inner.config;
    let transport = &self.inner.transport;

    let exchange = match options.exchange {
      Some(name) => ExchangeConfig::new(name, config.exchange_type),
      None => config.exchange(M::MESSAGE_TYPE),
    };
    let queue = options
      .queue
      .unwrap_or_else(|| config.subscriber_queue(M::MESSAGE_TYPE));
    let routing_key = options.routing_key.unwrap_or_else(|| "#".to_string());

    transport.declare_exchange(&exchange).await?;
    transport.declare_queue(&queue).await?;
    transport.bind_queue(&queue.name, &exchange.name, &routing_key).await?;

    let consumer = Arc::new(SubscriberConsumer {
      handler: typed_handler(handler),
      transport: transport.clone(),
      config: config.clone(),
    });
    let subscription = transport.subscribe(&queue.name, consumer).await?;
    event!(
      Level::INFO,
      queue = %queue.name,
      exchange = %exchange.name,
      %routing_key,
      %subscription,
      "Subscriber attached."
    );
    Ok(subscription)
  }

  pub async fn unsubscribe(&self, subscription: SubscriptionId) -> ChainResult<()> {
    self.inner.transport.unsubscribe(subscription).await?;
    Ok(())
  }

  /// A fresh builder over this client's sequence engine.
  pub fn message_sequence(&self) -> MessageSequenceBuilder {
    MessageSequenceBuilder::new(self.inner.engine.clone())
  }

  /// Ends the sequence `correlation_id` immediately: a pending result fails with
  /// `ChainError::Internal`, and its bindings, handlers and state are released.
  /// Abandoning an unknown or already finished sequence does nothing.
  pub async fn abandon_sequence(&self, correlation_id: CorrelationId) {
    self.inner.engine.abandon(correlation_id).await;
  }

  /// Number of sequences whose state is still tracked.
  pub fn active_sequences(&self) -> usize {
    self.inner.engine.repository().len()
  }
}

/// Runs an ordinary subscriber's handler, reporting failures to the error exchange.
struct SubscriberConsumer {
  handler: StepHandler,
  transport: Arc<dyn Transport>,
  config: Arc<SequenceConfig>,
}

impl SubscriberConsumer {
  async fn publish_exception(&self, exchange: &str, envelope: &Envelope, error: &ChainError) -> ChainResult<()> {
    let exception = HandlerExceptionMessage {
      message_type: envelope.message_type.clone(),
      exception: error.to_string(),
      payload: String::from_utf8_lossy(&envelope.payload).into_owned(),
    };
    let routing_key = self
      .config
      .publish_routing_key(&envelope.message_type, envelope.correlation_id);
    let report = Envelope::encode(&exception, exchange, routing_key, envelope.correlation_id)?;

    self
      .transport
      .declare_exchange(&ExchangeConfig::new(exchange, self.config.exchange_type))
      .await?;
    self.transport.publish(report).await?;
    Ok(())
  }
}

#[async_trait]
impl Consumer for SubscriberConsumer {
  async fn deliver(&self, envelope: Envelope) -> anyhow::Result<()> {
    let Err(error) = (self.handler)(envelope.clone()).await else {
      return Ok(());
    };
    event!(
      Level::ERROR,
      message_type = %envelope.message_type,
      correlation_id = %envelope.correlation_id,
      %error,
      "Subscriber handler failed."
    );
    if let Some(exchange) = &self.config.error_exchange {
      if let Err(e) = self.publish_exception(exchange, &envelope, &error).await {
        event!(Level::ERROR, error = %e, %exchange, "Failed to publish handler exception.");
      }
    }
    Ok(())
  }
}
