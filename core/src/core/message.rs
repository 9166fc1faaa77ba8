// msgchain/src/core/message.rs

//! The `Message` trait implemented by every payload type, and the `Envelope`
//! that carries an encoded payload plus its routing metadata through a transport.

use crate::core::correlation::CorrelationId;
use crate::error::{ChainError, ChainResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A typed message that can be published, subscribed to, or used as a sequence step.
///
/// `MESSAGE_TYPE` is the semantic type tag. It names the exchange the message is
/// published to and keys handler dispatch inside a sequence, so it must be unique
/// per payload type and must not contain `.` (it is the first word of the routing key).
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
  const MESSAGE_TYPE: &'static str;
}

/// An encoded message in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
  pub exchange: String,
  pub routing_key: String,
  pub message_type: String,
  pub correlation_id: CorrelationId,
  /// JSON-encoded body.
  pub payload: Vec<u8>,
}

impl Envelope {
  pub fn encode<M: Message>(
    message: &M,
    exchange: impl Into<String>,
    routing_key: impl Into<String>,
    correlation_id: CorrelationId,
  ) -> ChainResult<Self> {
    let payload = serde_json::to_vec(message).map_err(|source| ChainError::Codec {
      message_type: M::MESSAGE_TYPE.to_string(),
      source,
    })?;
    Ok(Envelope {
      exchange: exchange.into(),
      routing_key: routing_key.into(),
      message_type: M::MESSAGE_TYPE.to_string(),
      correlation_id,
      payload,
    })
  }

  /// Decodes the payload as `M`. Fails with `TypeMismatch` if the envelope was
  /// tagged with a different message type.
  pub fn decode<M: Message>(&self) -> ChainResult<M> {
    if self.message_type != M::MESSAGE_TYPE {
      return Err(ChainError::TypeMismatch {
        expected_type: M::MESSAGE_TYPE.to_string(),
        actual_type: self.message_type.clone(),
      });
    }
    serde_json::from_slice(&self.payload).map_err(|source| ChainError::Codec {
      message_type: self.message_type.clone(),
      source,
    })
  }

  pub fn context(&self) -> MessageContext {
    MessageContext {
      correlation_id: self.correlation_id,
      message_type: self.message_type.clone(),
      exchange: self.exchange.clone(),
      routing_key: self.routing_key.clone(),
    }
  }
}

/// Metadata handed to handlers next to the decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
  pub correlation_id: CorrelationId,
  pub message_type: String,
  pub exchange: String,
  pub routing_key: String,
}
