// msgchain/src/core/step.rs

//! Defines the structure of a single step within a message sequence.

/// Policy flags for one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOptions {
  /// The sequence may complete without this step ever firing.
  pub optional: bool,
  /// If this step fires, the sequence ends immediately in the aborted state.
  pub aborts_execution: bool,
}

/// Small by-value builder passed to `MessageSequenceBuilder::step_with`.
///
/// ```
/// use msgchain::StepOptionBuilder;
///
/// let options = StepOptionBuilder::new().optional().build();
/// assert!(options.optional);
/// assert!(!options.aborts_execution);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct StepOptionBuilder {
  configuration: StepOptions,
}

impl StepOptionBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn optional(self) -> Self {
    self.is_optional(true)
  }

  pub fn is_optional(mut self, optional: bool) -> Self {
    self.configuration.optional = optional;
    self
  }

  pub fn aborts_execution(self) -> Self {
    self.with_abort(true)
  }

  pub fn with_abort(mut self, aborts_execution: bool) -> Self {
    self.configuration.aborts_execution = aborts_execution;
    self
  }

  pub fn build(self) -> StepOptions {
    self.configuration
  }
}

/// A registered step of one sequence, as recorded in its chain state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDefinition {
  pub message_type: String,
  pub options: StepOptions,
  /// True for the step registered by `finish`.
  pub terminal: bool,
}

impl StepDefinition {
  pub fn new(message_type: impl Into<String>, options: StepOptions) -> Self {
    Self {
      message_type: message_type.into(),
      options,
      terminal: false,
    }
  }

  pub fn terminal(message_type: impl Into<String>) -> Self {
    Self {
      message_type: message_type.into(),
      options: StepOptions::default(),
      terminal: true,
    }
  }
}
