// msgchain/src/chain/engine.rs

//! Defines `SequenceEngine`, the per-client bundle of repository, dispatcher and
//! topology binder that every `MessageSequenceBuilder` works against.

use crate::chain::dispatcher::ChainDispatcher;
use crate::chain::repository::SequenceRepository;
use crate::chain::state::Resolution;
use crate::chain::topology::ChainTopology;
use crate::config::SequenceConfig;
use crate::core::correlation::CorrelationId;
use crate::core::message::{Envelope, Message};
use crate::core::status::ChainStatus;
use crate::error::{ChainError, ChainResult};
use crate::transport::Transport;
use std::sync::Arc;
use tracing::{event, instrument, Level};

pub struct SequenceEngine {
  transport: Arc<dyn Transport>,
  config: Arc<SequenceConfig>,
  repository: Arc<SequenceRepository>,
  dispatcher: Arc<ChainDispatcher>,
  topology: ChainTopology,
}

impl SequenceEngine {
  pub fn new(transport: Arc<dyn Transport>, config: Arc<SequenceConfig>) -> Self {
    let repository = Arc::new(SequenceRepository::new());
    let dispatcher = Arc::new(ChainDispatcher::new(repository.clone()));
    let topology = ChainTopology::new(transport.clone(), config.clone(), dispatcher.clone());
    Self {
      transport,
      config,
      repository,
      dispatcher,
      topology,
    }
  }

  pub fn config(&self) -> &SequenceConfig {
    &self.config
  }

  pub fn repository(&self) -> &Arc<SequenceRepository> {
    &self.repository
  }

  pub fn dispatcher(&self) -> &Arc<ChainDispatcher> {
    &self.dispatcher
  }

  pub fn topology(&self) -> &ChainTopology {
    &self.topology
  }

  /// Encodes `message` with the conventional exchange and routing key for `correlation_id`.
  pub fn envelope<M: Message>(&self, message: &M, correlation_id: CorrelationId) -> ChainResult<Envelope> {
    Envelope::encode(
      message,
      self.config.exchange_name(M::MESSAGE_TYPE),
      self.config.publish_routing_key(M::MESSAGE_TYPE, correlation_id),
      correlation_id,
    )
  }

  /// Declares the envelope's exchange, then publishes it.
  pub async fn publish(&self, envelope: Envelope) -> ChainResult<()> {
    self
      .transport
      .declare_exchange(&self.config.exchange(&envelope.message_type))
      .await?;
    event!(
      Level::TRACE,
      exchange = %envelope.exchange,
      routing_key = %envelope.routing_key,
      correlation_id = %envelope.correlation_id,
      "Publishing."
    );
    self.transport.publish(envelope).await?;
    Ok(())
  }

  /// Tears a sequence down: unbinds every registered step, drops its handlers, removes
  /// its state. Returns the final status, or `None` if the sequence was not tracked.
  ///
  /// Unbind failures are logged and do not stop the remaining steps from being released.
  /// If any unbind failed the state is kept, so a later `abandon` retries the unbinds
  /// still outstanding.
  #[instrument(name = "SequenceEngine::release", skip(self))]
  pub async fn release(&self, correlation_id: CorrelationId) -> Option<ChainStatus> {
    let state = self.repository.get(correlation_id).ok()?;
    let mut unbind_failures = 0usize;
    for step in state.step_definitions() {
      if let Err(e) = self.topology.unbind_from_exchange(&step.message_type, correlation_id).await {
        unbind_failures += 1;
        event!(Level::WARN, message_type = %step.message_type, error = %e, "Failed to unbind step during release.");
      }
    }
    self.dispatcher.remove_handlers(correlation_id);
    if unbind_failures == 0 {
      self.repository.remove(correlation_id);
    } else {
      event!(
        Level::WARN,
        unbind_failures,
        "Sequence state kept until its bindings are removed; abandon it to retry."
      );
    }
    Some(state.status())
  }

  /// Forces a sequence to end: any pending `ResultFuture` fails with `ChainError::Internal`
  /// and all of its topology and state is released. Idempotent.
  #[instrument(name = "SequenceEngine::abandon", skip(self))]
  pub async fn abandon(&self, correlation_id: CorrelationId) {
    if let Ok(state) = self.repository.get(correlation_id) {
      if state.resolve(Resolution::Failed(ChainError::Internal(format!(
        "sequence {} was abandoned before it resolved",
        correlation_id
      )))) {
        event!(Level::INFO, "Sequence abandoned.");
      }
    }
    self.release(correlation_id).await;
  }
}
