// tests/dispatch_tests.rs
mod common;

use common::*;
use msgchain::chain::{ChainDispatcher, SequenceRepository};
use msgchain::core::typed_handler;
use msgchain::{ChainError, CorrelationId, Envelope, Message, MessageContext, StepOptionBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn envelope<M: Message>(message: &M, id: CorrelationId) -> Envelope {
  Envelope::encode(
    message,
    M::MESSAGE_TYPE,
    format!("{}.{}", M::MESSAGE_TYPE, id),
    id,
  )
  .unwrap()
}

fn dispatcher() -> (Arc<SequenceRepository>, ChainDispatcher) {
  let repository = Arc::new(SequenceRepository::new());
  let dispatcher = ChainDispatcher::new(repository.clone());
  (repository, dispatcher)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_or_create_yields_one_state() {
  setup_tracing();
  let repository = Arc::new(SequenceRepository::new());
  let id = CorrelationId::new();

  let mut tasks = Vec::new();
  for _ in 0..16 {
    let repository = repository.clone();
    tasks.push(tokio::spawn(async move { repository.get_or_create(id) }));
  }
  let mut states = Vec::new();
  for task in tasks {
    states.push(task.await.unwrap());
  }

  assert_eq!(repository.len(), 1);
  assert!(states.iter().all(|state| Arc::ptr_eq(state, &states[0])));

  assert!(repository.remove(id).is_some());
  assert!(repository.is_empty());
  assert!(matches!(repository.get(id), Err(ChainError::NotFound(missing)) if missing == id));
}

#[tokio::test]
async fn test_unknown_envelopes_are_dropped() {
  setup_tracing();
  let (repository, dispatcher) = dispatcher();
  let calls = Arc::new(AtomicUsize::new(0));
  let id = CorrelationId::new();

  let calls_h = calls.clone();
  dispatcher.add_message_handler(
    id,
    PaymentCaptured::MESSAGE_TYPE,
    typed_handler(move |_msg: PaymentCaptured, _ctx: MessageContext| {
      let calls = calls_h.clone();
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<(), TestError>(())
      }
    }),
    StepOptionBuilder::new().build(),
  );

  // Registered type, foreign correlation id.
  dispatcher.invoke(envelope(&PaymentCaptured::default(), CorrelationId::new())).await;
  // Right correlation id, unregistered type.
  dispatcher.invoke(envelope(&StockReserved::default(), id)).await;
  assert_eq!(calls.load(Ordering::SeqCst), 0);

  dispatcher.invoke(envelope(&PaymentCaptured::default(), id)).await;
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  let state = repository.get(id).unwrap();
  assert!(state.has_fired(PaymentCaptured::MESSAGE_TYPE));
  assert_eq!(state.handler_task_count(), 1);
}

#[tokio::test]
async fn test_terminal_resolves_completion_and_latches_skipped() {
  setup_tracing();
  let (repository, dispatcher) = dispatcher();
  let id = CorrelationId::new();

  dispatcher.add_message_handler(
    id,
    StockReserved::MESSAGE_TYPE,
    typed_handler(|_msg: StockReserved, _ctx: MessageContext| async { Ok::<(), TestError>(()) }),
    StepOptionBuilder::new().optional().build(),
  );
  dispatcher.add_terminal_handler(id, OrderConfirmed::MESSAGE_TYPE);
  let state = repository.get(id).unwrap();
  let completion = state.take_completion().unwrap();
  assert!(state.take_completion().is_none());

  dispatcher.invoke(envelope(&OrderConfirmed { order_id: 3 }, id)).await;

  let terminal = completion.await.unwrap().unwrap();
  assert_eq!(terminal.decode::<OrderConfirmed>().unwrap().order_id, 3);
  let status = state.status();
  assert!(status.completed && status.skipped && !status.aborted);

  // Resolved sequences ignore everything that follows.
  dispatcher.invoke(envelope(&StockReserved::default(), id)).await;
  assert!(!state.has_fired(StockReserved::MESSAGE_TYPE));
}

#[tokio::test]
async fn test_abort_resolves_before_terminal() {
  setup_tracing();
  let (repository, dispatcher) = dispatcher();
  let id = CorrelationId::new();

  dispatcher.add_message_handler(
    id,
    PaymentDeclined::MESSAGE_TYPE,
    typed_handler(|_msg: PaymentDeclined, _ctx: MessageContext| async { Ok::<(), TestError>(()) }),
    StepOptionBuilder::new().aborts_execution().build(),
  );
  dispatcher.add_terminal_handler(id, OrderConfirmed::MESSAGE_TYPE);
  let state = repository.get(id).unwrap();
  let completion = state.take_completion().unwrap();

  dispatcher.invoke(envelope(&PaymentDeclined::default(), id)).await;
  dispatcher.invoke(envelope(&OrderConfirmed::default(), id)).await;

  let aborting = completion.await.unwrap().unwrap();
  assert_eq!(aborting.message_type, PaymentDeclined::MESSAGE_TYPE);
  let status = state.status();
  assert!(status.aborted && !status.completed && !status.skipped);
  assert!(!state.has_fired(OrderConfirmed::MESSAGE_TYPE));
}

#[tokio::test]
async fn test_mismatched_payload_fails_the_step() {
  setup_tracing();
  let (repository, dispatcher) = dispatcher();
  let id = CorrelationId::new();

  dispatcher.add_message_handler(
    id,
    PaymentCaptured::MESSAGE_TYPE,
    typed_handler(|_msg: PaymentCaptured, _ctx: MessageContext| async { Ok::<(), TestError>(()) }),
    StepOptionBuilder::new().build(),
  );
  dispatcher.add_terminal_handler(id, OrderConfirmed::MESSAGE_TYPE);
  let completion = repository.get(id).unwrap().take_completion().unwrap();

  let mut garbled = envelope(&PaymentCaptured::default(), id);
  garbled.payload = b"not json".to_vec();
  dispatcher.invoke(garbled).await;
  dispatcher.invoke(envelope(&OrderConfirmed::default(), id)).await;

  match completion.await.unwrap() {
    Err(ChainError::StepFailed { source, .. }) => {
      assert!(matches!(source.as_ref(), ChainError::Codec { .. }))
    }
    other => panic!("Expected StepFailed, got {:?}", other),
  }

  dispatcher.remove_handlers(id);
  assert!(!dispatcher.has_handler(id, PaymentCaptured::MESSAGE_TYPE));
  assert_eq!(dispatcher.registered_sequences(), 0);
}
