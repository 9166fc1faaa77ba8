// msgchain/src/chain/dispatcher.rs

//! Defines `ChainDispatcher`, which receives every envelope arriving on the chain queue,
//! finds the step registered for its `(correlation id, message type)`, runs it, and
//! applies the abort / optional / terminal-join policy.

use crate::chain::repository::SequenceRepository;
use crate::chain::state::{ChainState, HandlerTask, Resolution};
use crate::core::correlation::CorrelationId;
use crate::core::handler::StepHandler;
use crate::core::message::Envelope;
use crate::core::step::{StepDefinition, StepOptions};
use crate::error::ChainError;
use futures::future::{join_all, FutureExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{event, instrument, Level};

enum StepKind {
  Intermediate { handler: StepHandler, options: StepOptions },
  Terminal,
}

/// Dispatch table: correlation id -> message type -> registered step.
type DispatchTable = HashMap<CorrelationId, HashMap<String, Arc<StepKind>>>;

pub struct ChainDispatcher {
  repository: Arc<SequenceRepository>,
  handlers: RwLock<DispatchTable>,
}

impl ChainDispatcher {
  pub fn new(repository: Arc<SequenceRepository>) -> Self {
    Self {
      repository,
      handlers: RwLock::new(HashMap::new()),
    }
  }

  pub fn repository(&self) -> &Arc<SequenceRepository> {
    &self.repository
  }

  /// Registers an intermediate step for `(id, message_type)` and records its definition
  /// in the sequence's state (creating the state on first registration).
  pub fn add_message_handler(&self, id: CorrelationId, message_type: &str, handler: StepHandler, options: StepOptions) {
    event!(
      Level::DEBUG,
      correlation_id = %id,
      %message_type,
      optional = options.optional,
      aborts_execution = options.aborts_execution,
      "Registering step handler."
    );
    self
      .repository
      .get_or_create(id)
      .add_step_definition(StepDefinition::new(message_type, options));
    self.insert(id, message_type, StepKind::Intermediate { handler, options });
  }

  /// Registers the terminal step: when it fires, the tracked handler tasks are joined
  /// and the sequence's completion is resolved with the terminal envelope.
  pub fn add_terminal_handler(&self, id: CorrelationId, message_type: &str) {
    event!(Level::DEBUG, correlation_id = %id, %message_type, "Registering terminal step.");
    self
      .repository
      .get_or_create(id)
      .add_step_definition(StepDefinition::terminal(message_type));
    self.insert(id, message_type, StepKind::Terminal);
  }

  fn insert(&self, id: CorrelationId, message_type: &str, kind: StepKind) {
    self
      .handlers
      .write()
      .entry(id)
      .or_default()
      .insert(message_type.to_string(), Arc::new(kind));
  }

  /// Drops every handler registered for `id`.
  pub fn remove_handlers(&self, id: CorrelationId) {
    self.handlers.write().remove(&id);
  }

  pub fn has_handler(&self, id: CorrelationId, message_type: &str) -> bool {
    self
      .handlers
      .read()
      .get(&id)
      .is_some_and(|steps| steps.contains_key(message_type))
  }

  /// Number of sequences with at least one registered handler.
  pub fn registered_sequences(&self) -> usize {
    self.handlers.read().len()
  }

  fn lookup(&self, id: CorrelationId, message_type: &str) -> Option<Arc<StepKind>> {
    self.handlers.read().get(&id).and_then(|steps| steps.get(message_type)).cloned()
  }

  /// Handles one inbound envelope. Never fails: unknown envelopes are dropped, and
  /// handler failures are recorded in the sequence's handler tasks.
  #[instrument(
    name = "ChainDispatcher::invoke",
    skip_all,
    fields(correlation_id = %envelope.correlation_id, message_type = %envelope.message_type)
  )]
  pub async fn invoke(&self, envelope: Envelope) {
    let id = envelope.correlation_id;
    let Some(step) = self.lookup(id, &envelope.message_type) else {
      event!(Level::TRACE, "No step registered for this message, dropping.");
      return;
    };
    let state = match self.repository.get(id) {
      Ok(state) => state,
      Err(_) => {
        event!(Level::DEBUG, "Sequence no longer tracked, dropping.");
        return;
      }
    };
    if state.is_resolved() {
      event!(Level::DEBUG, "Sequence already resolved, dropping.");
      return;
    }

    match step.as_ref() {
      StepKind::Terminal => Self::complete(&state, envelope).await,
      StepKind::Intermediate { handler, options } if options.aborts_execution => {
        Self::abort(&state, handler, envelope).await
      }
      StepKind::Intermediate { handler, .. } => Self::run_step(&state, handler, envelope).await,
    }
  }

  fn handler_task(handler: &StepHandler, envelope: Envelope) -> HandlerTask {
    handler(envelope).map(|result| result.map_err(Arc::new)).boxed().shared()
  }

  async fn run_step(state: &ChainState, handler: &StepHandler, envelope: Envelope) {
    let message_type = envelope.message_type.clone();
    let task = Self::handler_task(handler, envelope);
    if !state.track(&message_type, task.clone()) {
      event!(Level::DEBUG, "Sequence resolved before the step could be tracked, dropping.");
      return;
    }
    match task.await {
      Ok(()) => event!(Level::DEBUG, "Step handler finished."),
      Err(e) => event!(Level::WARN, error = %e, "Step handler failed."),
    }
  }

  async fn abort(state: &ChainState, handler: &StepHandler, envelope: Envelope) {
    let message_type = envelope.message_type.clone();
    let task = Self::handler_task(handler, envelope.clone());
    if !state.track(&message_type, task.clone()) {
      event!(Level::DEBUG, "Sequence resolved before the abort step could be tracked, dropping.");
      return;
    }
    if state.resolve(Resolution::Aborted(envelope)) {
      event!(Level::INFO, "Sequence aborted.");
    }
    // The abort already happened; a failing abort handler does not change that.
    if let Err(e) = task.await {
      event!(Level::WARN, error = %e, "Abort step handler failed.");
    }
  }

  async fn complete(state: &ChainState, envelope: Envelope) {
    let Some(tasks) = state.claim_terminal(&envelope.message_type) else {
      event!(Level::DEBUG, "Terminal step already claimed, ignoring duplicate delivery.");
      return;
    };
    event!(Level::DEBUG, pending = tasks.len(), "Terminal step fired, joining step handlers.");

    let first_failure = join_all(tasks).await.into_iter().find_map(Result::err);
    let resolution = match first_failure {
      Some(source) => Resolution::Failed(ChainError::StepFailed {
        correlation_id: state.correlation_id(),
        source,
      }),
      None => Resolution::Completed(envelope),
    };
    let failed = matches!(resolution, Resolution::Failed(_));
    if state.resolve(resolution) {
      if failed {
        event!(Level::WARN, "Sequence failed: a step handler returned an error.");
      } else {
        event!(Level::INFO, "Sequence completed.");
      }
    }
  }
}
