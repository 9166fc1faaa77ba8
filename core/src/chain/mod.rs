// msgchain/src/chain/mod.rs

//! The message sequence engine: builder, per-sequence state, dispatch and topology.

pub mod builder;
pub mod dispatcher;
pub mod engine;
pub mod repository;
pub mod sequence;
pub mod state;
pub mod topology;

pub use builder::MessageSequenceBuilder;
pub use dispatcher::ChainDispatcher;
pub use engine::SequenceEngine;
pub use repository::SequenceRepository;
pub use sequence::{MessageSequence, ResultFuture};
pub use state::{ChainState, Resolution};
pub use topology::{BindingKey, ChainTopology};
