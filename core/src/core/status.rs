// msgchain/src/core/status.rs

//! Terminal disposition of a sequence as seen by the caller.

/// Snapshot of a sequence's latched flags.
///
/// `skipped` refines `completed`: the sequence completed while at least one optional
/// step never fired. `failed` is set when the sequence ended with an error instead,
/// either a failed step handler or an abandon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainStatus {
  pub aborted: bool,
  pub completed: bool,
  pub skipped: bool,
  pub failed: bool,
}

impl ChainStatus {
  pub fn disposition(&self) -> Disposition {
    if self.aborted {
      Disposition::Aborted
    } else if self.completed {
      Disposition::Completed
    } else if self.failed {
      Disposition::Failed
    } else {
      Disposition::Running
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
  /// Not yet resolved.
  Running,
  Completed,
  Aborted,
  Failed,
}
