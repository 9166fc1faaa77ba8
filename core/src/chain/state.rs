// msgchain/src/chain/state.rs

//! Per-sequence state: registered steps, tracked handler tasks, latched flags and the
//! single-assignment completion.

use crate::core::correlation::CorrelationId;
use crate::core::message::Envelope;
use crate::core::status::ChainStatus;
use crate::core::step::StepDefinition;
use crate::error::{ChainError, ChainResult};
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::oneshot;

/// A step handler's completion, joinable from several places (the delivering task and
/// the terminal join).
pub type HandlerTask = Shared<BoxFuture<'static, Result<(), Arc<ChainError>>>>;

/// What a sequence's completion resolves with: the terminal (or aborting) envelope,
/// or the error that failed the terminal join.
pub type Completion = ChainResult<Envelope>;

/// How a sequence is being resolved.
#[derive(Debug)]
pub enum Resolution {
  Completed(Envelope),
  Aborted(Envelope),
  Failed(ChainError),
}

pub struct ChainState {
  correlation_id: CorrelationId,
  inner: Mutex<ChainInner>,
}

struct ChainInner {
  step_definitions: Vec<StepDefinition>,
  handler_tasks: Vec<HandlerTask>,
  fired: HashSet<String>,
  status: ChainStatus,
  terminal_claimed: bool,
  resolved: bool,
  completion_tx: Option<oneshot::Sender<Completion>>,
  completion_rx: Option<oneshot::Receiver<Completion>>,
}

impl ChainState {
  pub fn new(correlation_id: CorrelationId) -> Self {
    let (tx, rx) = oneshot::channel();
    Self {
      correlation_id,
      inner: Mutex::new(ChainInner {
        step_definitions: Vec::new(),
        handler_tasks: Vec::new(),
        fired: HashSet::new(),
        status: ChainStatus::default(),
        terminal_claimed: false,
        resolved: false,
        completion_tx: Some(tx),
        completion_rx: Some(rx),
      }),
    }
  }

  pub fn correlation_id(&self) -> CorrelationId {
    self.correlation_id
  }

  /// Records a step. Registering the same message type again replaces the earlier definition.
  pub fn add_step_definition(&self, definition: StepDefinition) {
    let mut inner = self.inner.lock();
    match inner
      .step_definitions
      .iter()
      .position(|d| d.message_type == definition.message_type)
    {
      Some(idx) => inner.step_definitions[idx] = definition,
      None => inner.step_definitions.push(definition),
    }
  }

  /// Registered steps in registration order.
  pub fn step_definitions(&self) -> Vec<StepDefinition> {
    self.inner.lock().step_definitions.clone()
  }

  pub fn status(&self) -> ChainStatus {
    self.inner.lock().status
  }

  pub fn is_resolved(&self) -> bool {
    self.inner.lock().resolved
  }

  pub fn has_fired(&self, message_type: &str) -> bool {
    self.inner.lock().fired.contains(message_type)
  }

  pub fn handler_task_count(&self) -> usize {
    self.inner.lock().handler_tasks.len()
  }

  /// Marks `message_type` as fired and tracks its handler task.
  /// Returns false, leaving the state untouched, once the sequence is resolved.
  pub fn track(&self, message_type: &str, task: HandlerTask) -> bool {
    let mut inner = self.inner.lock();
    if inner.resolved {
      return false;
    }
    inner.fired.insert(message_type.to_string());
    inner.handler_tasks.push(task);
    true
  }

  /// Claims the terminal step. The first caller gets a snapshot of the handler tasks
  /// tracked so far to join on; later callers (duplicate terminal deliveries) and
  /// callers after resolution get `None`.
  pub fn claim_terminal(&self, message_type: &str) -> Option<Vec<HandlerTask>> {
    let mut inner = self.inner.lock();
    if inner.resolved || inner.terminal_claimed {
      return None;
    }
    inner.terminal_claimed = true;
    inner.fired.insert(message_type.to_string());
    Some(inner.handler_tasks.clone())
  }

  /// Resolves the completion exactly once, latching the matching flags under the same
  /// lock. Returns false if the sequence was already resolved.
  pub fn resolve(&self, resolution: Resolution) -> bool {
    let mut inner = self.inner.lock();
    if inner.resolved {
      return false;
    }
    inner.resolved = true;

    let completion = match resolution {
      Resolution::Completed(envelope) => {
        let skipped = inner
          .step_definitions
          .iter()
          .any(|d| d.options.optional && !d.terminal && !inner.fired.contains(&d.message_type));
        inner.status.completed = true;
        inner.status.skipped = skipped;
        Ok(envelope)
      }
      Resolution::Aborted(envelope) => {
        inner.status.aborted = true;
        Ok(envelope)
      }
      Resolution::Failed(err) => {
        inner.status.failed = true;
        Err(err)
      }
    };

    if let Some(tx) = inner.completion_tx.take() {
      // The receiver is gone only if nobody finished this sequence; nothing to notify.
      let _ = tx.send(completion);
    }
    true
  }

  /// Hands out the completion receiver. Only one continuation may own it.
  pub fn take_completion(&self) -> Option<oneshot::Receiver<Completion>> {
    self.inner.lock().completion_rx.take()
  }
}

impl std::fmt::Debug for ChainState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let inner = self.inner.lock();
    f.debug_struct("ChainState")
      .field("correlation_id", &self.correlation_id)
      .field("step_definitions", &inner.step_definitions)
      .field("handler_tasks", &inner.handler_tasks.len())
      .field("status", &inner.status)
      .field("resolved", &inner.resolved)
      .finish()
  }
}
