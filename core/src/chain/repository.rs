// msgchain/src/chain/repository.rs

//! Defines `SequenceRepository`, the concurrent registry of live sequences keyed by
//! correlation id.

use crate::chain::state::ChainState;
use crate::core::correlation::CorrelationId;
use crate::error::{ChainError, ChainResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{event, Level};

/// The map lock is only held for the lookup or insertion itself; all per-sequence
/// mutation goes through the `ChainState`'s own lock, so sequences never wait on each
/// other beyond that.
#[derive(Default)]
pub struct SequenceRepository {
  chains: RwLock<HashMap<CorrelationId, Arc<ChainState>>>,
}

impl SequenceRepository {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the state for `id`, creating it if absent. Concurrent first access for
  /// the same id yields the same `Arc`.
  pub fn get_or_create(&self, id: CorrelationId) -> Arc<ChainState> {
    if let Some(existing) = self.chains.read().get(&id) {
      return existing.clone();
    }
    self
      .chains
      .write()
      .entry(id)
      .or_insert_with(|| {
        event!(Level::DEBUG, correlation_id = %id, "Creating sequence state.");
        Arc::new(ChainState::new(id))
      })
      .clone()
  }

  pub fn get(&self, id: CorrelationId) -> ChainResult<Arc<ChainState>> {
    self.chains.read().get(&id).cloned().ok_or(ChainError::NotFound(id))
  }

  pub fn remove(&self, id: CorrelationId) -> Option<Arc<ChainState>> {
    let removed = self.chains.write().remove(&id);
    if removed.is_some() {
      event!(Level::DEBUG, correlation_id = %id, "Sequence state removed.");
    }
    removed
  }

  pub fn contains(&self, id: CorrelationId) -> bool {
    self.chains.read().contains_key(&id)
  }

  pub fn len(&self) -> usize {
    self.chains.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.chains.read().is_empty()
  }
}
