// msgchain/src/chain/builder.rs

//! Implements the fluent `MessageSequenceBuilder`:
//!
//! ```text
//! client.message_sequence()
//!   .start(OrderPlaced { .. }, None)?
//!   .step(|msg: PaymentCaptured, ctx| async move { .. }).await?
//!   .step_with(|msg: StockReserved, ctx| async move { .. }, |o| o.optional()).await?
//!   .finish::<OrderConfirmed>().await?
//! ```
//!
//! Every step's binding is in place before `step` returns, and the start message is
//! only published by `finish` once the terminal binding is in place too.

use crate::chain::engine::SequenceEngine;
use crate::chain::sequence::{MessageSequence, ResultFuture};
use crate::core::correlation::CorrelationId;
use crate::core::handler::typed_handler;
use crate::core::message::{Envelope, Message, MessageContext};
use crate::core::status::ChainStatus;
use crate::core::step::StepOptionBuilder;
use crate::error::{ChainError, ChainResult};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{event, instrument, Level};

/// The deferred start publish.
struct PendingStart {
  correlation_id: CorrelationId,
  envelope: Envelope,
}

pub struct MessageSequenceBuilder {
  engine: Arc<SequenceEngine>,
  start: Option<PendingStart>,
}

impl MessageSequenceBuilder {
  pub fn new(engine: Arc<SequenceEngine>) -> Self {
    Self { engine, start: None }
  }

  /// The sequence's correlation id, once `start` has been called.
  pub fn correlation_id(&self) -> Option<CorrelationId> {
    self.start.as_ref().map(|s| s.correlation_id)
  }

  fn started_id(&self, operation: &str) -> ChainResult<CorrelationId> {
    self
      .correlation_id()
      .ok_or_else(|| ChainError::configuration(format!("'{}' called before 'start'", operation)))
  }

  /// Prepares the message that opens the sequence. Nothing is published until `finish`.
  ///
  /// `message` may be `None`, in which case `M::default()` is sent. A missing or nil
  /// `correlation_id` gets a fresh one; supplying an existing id joins a sequence
  /// started elsewhere.
  pub fn start<M>(mut self, message: impl Into<Option<M>>, correlation_id: Option<CorrelationId>) -> ChainResult<Self>
  where
    M: Message + Default,
  {
    if let Some(existing) = &self.start {
      return Err(ChainError::configuration(format!(
        "sequence {} already started; 'start' may only be called once",
        existing.correlation_id
      )));
    }
    let correlation_id = CorrelationId::resolve(correlation_id);
    let message = message.into().unwrap_or_default();
    let envelope = self.engine.envelope(&message, correlation_id)?;
    event!(
      Level::DEBUG,
      %correlation_id,
      start_type = M::MESSAGE_TYPE,
      "Preparing message sequence."
    );
    self.start = Some(PendingStart {
      correlation_id,
      envelope,
    });
    Ok(self)
  }

  /// Registers a required, non-aborting step. See [`step_with`](Self::step_with).
  pub async fn step<M, H, Fut, E>(self, handler: H) -> ChainResult<Self>
  where
    M: Message,
    H: Fn(M, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
  {
    self.step_with(handler, |options| options).await
  }

  /// Binds `M` for this sequence's correlation id, then registers `handler` for it.
  ///
  /// If the broker rejects the binding the handler is not registered, everything the
  /// sequence bound so far is released, and `ChainError::Binding` is returned.
  #[instrument(
    name = "MessageSequenceBuilder::step",
    skip_all,
    fields(message_type = M::MESSAGE_TYPE, correlation_id),
    err(Display)
  )]
  pub async fn step_with<M, H, Fut, E>(
    self,
    handler: H,
    options: impl FnOnce(StepOptionBuilder) -> StepOptionBuilder,
  ) -> ChainResult<Self>
  where
    M: Message,
    H: Fn(M, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
  {
    let correlation_id = self.started_id("step")?;
    tracing::Span::current().record("correlation_id", tracing::field::display(correlation_id));
    let options = options(StepOptionBuilder::new()).build();

    if let Err(e) = self.engine.topology().bind_to_exchange::<M>(correlation_id).await {
      event!(Level::ERROR, error = %e, "Step binding failed, releasing sequence.");
      self.engine.release(correlation_id).await;
      return Err(e);
    }
    self
      .engine
      .dispatcher()
      .add_message_handler(correlation_id, M::MESSAGE_TYPE, typed_handler(handler), options);
    Ok(self)
  }

  /// Binds the terminal type `R`, registers the terminal step, and publishes the start
  /// message. The returned sequence resolves when an `R` for this correlation id
  /// arrives (after every already-fired step handler finished) or an abort step fires.
  ///
  /// Regardless of how the sequence ends, its bindings, handlers and state are
  /// released before `result` resolves.
  #[instrument(
    name = "MessageSequenceBuilder::finish",
    skip_all,
    fields(message_type = R::MESSAGE_TYPE, correlation_id),
    err(Display)
  )]
  pub async fn finish<R: Message>(self) -> ChainResult<MessageSequence<R>> {
    let PendingStart {
      correlation_id,
      envelope,
    } = self
      .start
      .ok_or_else(|| ChainError::configuration("'finish' called before 'start'"))?;
    tracing::Span::current().record("correlation_id", tracing::field::display(correlation_id));
    let engine = self.engine;

    let state = engine.repository().get_or_create(correlation_id);
    let Some(completion) = state.take_completion() else {
      return Err(ChainError::configuration(format!(
        "sequence {} has already been finished",
        correlation_id
      )));
    };

    if let Err(e) = engine.topology().bind_to_exchange::<R>(correlation_id).await {
      event!(Level::ERROR, error = %e, "Terminal binding failed, releasing sequence.");
      engine.release(correlation_id).await;
      return Err(e);
    }
    engine.dispatcher().add_terminal_handler(correlation_id, R::MESSAGE_TYPE);

    let status = Arc::new(Mutex::new(ChainStatus::default()));
    let (result_tx, result_rx) = oneshot::channel::<ChainResult<R>>();

    let continuation_engine = engine.clone();
    let continuation_status = status.clone();
    tokio::spawn(async move {
      let completion = completion.await.unwrap_or_else(|_| {
        Err(ChainError::Internal(
          "sequence state dropped before resolving".to_string(),
        ))
      });
      event!(Level::DEBUG, %correlation_id, "Sequence resolved, releasing topology.");
      let final_status = match continuation_engine.release(correlation_id).await {
        Some(status) => status,
        None => state.status(),
      };
      *continuation_status.lock() = final_status;

      let result = match completion {
        Ok(envelope) if final_status.aborted => Err(ChainError::Aborted {
          correlation_id,
          message_type: envelope.message_type,
        }),
        Ok(envelope) => envelope.decode::<R>(),
        Err(e) => Err(e),
      };
      // The caller may have dropped the sequence; the cleanup above still happened.
      let _ = result_tx.send(result);
    });

    if let Err(e) = engine.publish(envelope).await {
      event!(Level::ERROR, error = %e, "Publishing the start message failed, abandoning sequence.");
      engine.abandon(correlation_id).await;
      return Err(e);
    }
    event!(Level::DEBUG, "Start message published.");

    Ok(MessageSequence::new(correlation_id, status, ResultFuture::new(result_rx)))
  }
}
