// msgchain/src/chain/sequence.rs

//! The caller-facing result of a finished builder.

use crate::core::correlation::CorrelationId;
use crate::core::status::ChainStatus;
use crate::error::{ChainError, ChainResult};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Resolves with the terminal message of the sequence, or fails with
/// `ChainError::Aborted`, `ChainError::StepFailed`, or `ChainError::Internal` if the
/// sequence was abandoned.
///
/// Wrap it in `tokio::time::timeout` for a bounded wait; on timeout call
/// `BusClient::abandon_sequence` to release the sequence's bindings and state.
#[derive(Debug)]
pub struct ResultFuture<R> {
  receiver: Option<oneshot::Receiver<ChainResult<R>>>,
}

impl<R> ResultFuture<R> {
  pub(crate) fn new(receiver: oneshot::Receiver<ChainResult<R>>) -> Self {
    Self {
      receiver: Some(receiver),
    }
  }
}

impl<R> Unpin for ResultFuture<R> {}

impl<R> Future for ResultFuture<R> {
  type Output = ChainResult<R>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let Some(receiver) = self.receiver.as_mut() else {
      return Poll::Ready(Err(ChainError::Internal("sequence result already taken".to_string())));
    };
    match Pin::new(receiver).poll(cx) {
      Poll::Pending => Poll::Pending,
      Poll::Ready(outcome) => {
        self.receiver = None;
        Poll::Ready(outcome.unwrap_or_else(|_| {
          Err(ChainError::Internal(
            "sequence continuation dropped before resolving".to_string(),
          ))
        }))
      }
    }
  }
}

/// Returned by `MessageSequenceBuilder::finish`.
///
/// The status flags are written before `result` resolves, so they are final once the
/// result has been observed.
#[derive(Debug)]
pub struct MessageSequence<R> {
  correlation_id: CorrelationId,
  status: Arc<Mutex<ChainStatus>>,
  pub result: ResultFuture<R>,
}

impl<R> MessageSequence<R> {
  pub(crate) fn new(correlation_id: CorrelationId, status: Arc<Mutex<ChainStatus>>, result: ResultFuture<R>) -> Self {
    Self {
      correlation_id,
      status,
      result,
    }
  }

  pub fn correlation_id(&self) -> CorrelationId {
    self.correlation_id
  }

  pub fn status(&self) -> ChainStatus {
    *self.status.lock()
  }

  pub fn aborted(&self) -> bool {
    self.status().aborted
  }

  pub fn completed(&self) -> bool {
    self.status().completed
  }

  pub fn skipped(&self) -> bool {
    self.status().skipped
  }

  pub fn failed(&self) -> bool {
    self.status().failed
  }

  /// Waits for the result. A second call returns `ChainError::Internal`.
  pub async fn wait(&mut self) -> ChainResult<R> {
    (&mut self.result).await
  }
}
