// msgchain/src/error.rs
use crate::core::correlation::CorrelationId;
use crate::transport::TransportError;
use anyhow::Error as AnyhowError;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
  /// Builder misuse: finishing or stepping without a start, starting twice.
  /// Always returned synchronously from the builder call, never through a `ResultFuture`.
  #[error("Configuration error: {message}")]
  Configuration { message: String },

  #[error("Binding of '{message_type}' for sequence {correlation_id} was rejected. Source: {source}")]
  Binding {
    message_type: String,
    correlation_id: CorrelationId,
    #[source]
    source: TransportError,
  },

  #[error("Error in handler for '{message_type}'. Source: {source}")]
  Handler {
    message_type: String,
    #[source]
    source: AnyhowError,
  },

  /// A step handler failed and the terminal join observed it.
  #[error("Sequence {correlation_id} failed: a step handler returned an error. Source: {source}")]
  StepFailed {
    correlation_id: CorrelationId,
    #[source]
    source: Arc<ChainError>,
  },

  #[error("Sequence {correlation_id} aborted by '{message_type}'")]
  Aborted {
    correlation_id: CorrelationId,
    message_type: String,
  },

  #[error("Transport error: {0}")]
  Transport(#[from] TransportError),

  #[error("Failed to encode or decode '{message_type}'. Source: {source}")]
  Codec {
    message_type: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("Type mismatch while decoding envelope (expected {expected_type}, got {actual_type})")]
  TypeMismatch {
    expected_type: String,
    actual_type: String,
  },

  #[error("No sequence registered for correlation id {0}")]
  NotFound(CorrelationId),

  #[error("Internal msgchain error: {0}")]
  Internal(String),
}

impl ChainError {
  pub(crate) fn configuration(message: impl Into<String>) -> Self {
    ChainError::Configuration {
      message: message.into(),
    }
  }

  /// True for the terminal dispositions a caller observes through `ResultFuture`
  /// (abort, failed step), as opposed to setup or transport failures.
  pub fn is_sequence_outcome(&self) -> bool {
    matches!(self, ChainError::Aborted { .. } | ChainError::StepFailed { .. })
  }
}

// Foreign errors raised inside handlers land here. The message type is not known at
// this point; the typed handler wrapper fills it in when it can.
impl From<AnyhowError> for ChainError {
  fn from(err: AnyhowError) -> Self {
    match err.downcast::<ChainError>() {
      Ok(chain_err) => chain_err,
      Err(err) => ChainError::Handler {
        message_type: String::from("<unknown>"),
        source: err,
      },
    }
  }
}

pub type ChainResult<T, E = ChainError> = std::result::Result<T, E>;
