// tests/broker_tests.rs
mod common;

use async_trait::async_trait;
use common::*;
use msgchain::transport::{ExchangeConfig, QueueConfig, TopologyOperation};
use msgchain::{Consumer, CorrelationId, Envelope, ExchangeType, InMemoryBroker, Transport, TransportError};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct Recorder {
  received: Mutex<Vec<Envelope>>,
}

#[async_trait]
impl Consumer for Recorder {
  async fn deliver(&self, envelope: Envelope) -> anyhow::Result<()> {
    self.received.lock().push(envelope);
    Ok(())
  }
}

impl Recorder {
  fn count(&self) -> usize {
    self.received.lock().len()
  }
}

fn basic(id: CorrelationId) -> Envelope {
  Envelope::encode(
    &BasicMessage { prop: "hello".to_string() },
    "basic_message",
    format!("basic_message.{}", id),
    id,
  )
  .unwrap()
}

async fn declare(broker: &InMemoryBroker, queue: &QueueConfig) {
  broker
    .declare_exchange(&ExchangeConfig::new("basic_message", ExchangeType::Topic))
    .await
    .unwrap();
  broker.declare_queue(queue).await.unwrap();
}

#[tokio::test]
async fn test_publish_to_undeclared_exchange_fails() {
  setup_tracing();
  let broker = InMemoryBroker::new();
  let err = broker.publish(basic(CorrelationId::new())).await.unwrap_err();
  assert!(matches!(err, TransportError::ExchangeNotFound(name) if name == "basic_message"));
}

#[tokio::test]
async fn test_redeclaring_exchange_with_other_type_conflicts() {
  setup_tracing();
  let broker = InMemoryBroker::new();
  broker
    .declare_exchange(&ExchangeConfig::new("basic_message", ExchangeType::Topic))
    .await
    .unwrap();
  broker
    .declare_exchange(&ExchangeConfig::new("basic_message", ExchangeType::Topic))
    .await
    .unwrap();
  let err = broker
    .declare_exchange(&ExchangeConfig::new("basic_message", ExchangeType::Fanout))
    .await
    .unwrap_err();
  assert!(matches!(err, TransportError::ExchangeTypeConflict { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_topic_binding_filters_by_correlation_id() {
  setup_tracing();
  let broker = InMemoryBroker::new();
  let queue = QueueConfig::new("chain");
  declare(&broker, &queue).await;
  let mine = CorrelationId::new();
  broker
    .bind_queue("chain", "basic_message", &format!("#.{}", mine))
    .await
    .unwrap();
  let recorder = Arc::new(Recorder::default());
  broker.subscribe("chain", recorder.clone()).await.unwrap();

  broker.publish(basic(CorrelationId::new())).await.unwrap();
  broker.publish(basic(mine)).await.unwrap();

  assert!(eventually(|| recorder.count() == 1).await);
  assert_eq!(recorder.received.lock()[0].correlation_id, mine);
  assert_eq!(broker.published_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backlog_is_drained_when_consumer_attaches() {
  setup_tracing();
  let broker = InMemoryBroker::new();
  let queue = QueueConfig::new("late");
  declare(&broker, &queue).await;
  broker.bind_queue("late", "basic_message", "#").await.unwrap();

  broker.publish(basic(CorrelationId::new())).await.unwrap();
  broker.publish(basic(CorrelationId::new())).await.unwrap();
  assert_eq!(broker.backlog_len("late"), 2);

  let recorder = Arc::new(Recorder::default());
  broker.subscribe("late", recorder.clone()).await.unwrap();
  assert_eq!(broker.backlog_len("late"), 0);
  assert!(eventually(|| recorder.count() == 2).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_competing_consumers_share_deliveries() {
  setup_tracing();
  let broker = InMemoryBroker::new();
  let queue = QueueConfig::new("work");
  declare(&broker, &queue).await;
  broker.bind_queue("work", "basic_message", "#").await.unwrap();

  let first = Arc::new(Recorder::default());
  let second = Arc::new(Recorder::default());
  broker.subscribe("work", first.clone()).await.unwrap();
  broker.subscribe("work", second.clone()).await.unwrap();

  for _ in 0..4 {
    broker.publish(basic(CorrelationId::new())).await.unwrap();
  }
  assert!(eventually(|| first.count() + second.count() == 4).await);
  assert_eq!(first.count(), 2);
  assert_eq!(second.count(), 2);
}

#[tokio::test]
async fn test_auto_delete_queue_removed_with_last_consumer() {
  setup_tracing();
  let broker = InMemoryBroker::new();
  let mut queue = QueueConfig::new("ephemeral");
  queue.auto_delete = true;
  declare(&broker, &queue).await;
  broker.bind_queue("ephemeral", "basic_message", "#").await.unwrap();

  let first = broker.subscribe("ephemeral", Arc::new(Recorder::default())).await.unwrap();
  let second = broker.subscribe("ephemeral", Arc::new(Recorder::default())).await.unwrap();

  broker.unsubscribe(first).await.unwrap();
  assert!(broker.has_queue("ephemeral"));
  broker.unsubscribe(second).await.unwrap();
  assert!(!broker.has_queue("ephemeral"));
  assert!(broker.bindings().is_empty());
  assert!(broker
    .operations()
    .contains(&TopologyOperation::DeleteQueue("ephemeral".to_string())));

  let err = broker.unsubscribe(second).await.unwrap_err();
  assert!(matches!(err, TransportError::SubscriptionNotFound(_)));
}

#[tokio::test]
async fn test_bind_requires_declared_queue_and_exchange() {
  setup_tracing();
  let broker = InMemoryBroker::new();
  let err = broker.bind_queue("nowhere", "basic_message", "#").await.unwrap_err();
  assert!(matches!(err, TransportError::ExchangeNotFound(_)));

  broker
    .declare_exchange(&ExchangeConfig::new("basic_message", ExchangeType::Topic))
    .await
    .unwrap();
  let err = broker.bind_queue("nowhere", "basic_message", "#").await.unwrap_err();
  assert!(matches!(err, TransportError::QueueNotFound(_)));

  // Unbinding something that was never bound is fine.
  broker.unbind_queue("nowhere", "basic_message", "#").await.unwrap();
}
