// msgchain/src/core/correlation.rs

//! Defines `CorrelationId`, the identifier carried by every message of one sequence.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque 128-bit identifier tying the messages of one sequence together.
///
/// It travels as envelope metadata and as the last word of the routing key, never
/// inside the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
  /// A fresh random (v4) identifier.
  pub fn new() -> Self {
    CorrelationId(Uuid::new_v4())
  }

  pub fn from_uuid(uuid: Uuid) -> Self {
    CorrelationId(uuid)
  }

  pub fn as_uuid(&self) -> &Uuid {
    &self.0
  }

  /// The all-zero id. Treated as "not supplied" when starting a sequence.
  pub fn is_nil(&self) -> bool {
    self.0.is_nil()
  }

  /// Returns `supplied` unless it is absent or nil, in which case a new id is generated.
  pub fn resolve(supplied: Option<CorrelationId>) -> Self {
    match supplied {
      Some(id) if !id.is_nil() => id,
      _ => CorrelationId::new(),
    }
  }
}

impl Default for CorrelationId {
  fn default() -> Self {
    Self::new()
  }
}

impl From<Uuid> for CorrelationId {
  fn from(uuid: Uuid) -> Self {
    CorrelationId(uuid)
  }
}

impl FromStr for CorrelationId {
  type Err = uuid::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Uuid::parse_str(s).map(CorrelationId)
  }
}

impl fmt::Display for CorrelationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.hyphenated())
  }
}
