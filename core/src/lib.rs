// src/lib.rs

//! msgchain: correlated message sequences over a publish/subscribe broker.
//!
//! A sequence publishes a start message, reacts to the messages that follow it under
//! the same correlation id, and resolves when a terminal message arrives:
//!  - Steps bound per correlation id, so concurrent sequences never see each other's messages.
//!  - Optional steps, and abort steps that end the sequence early.
//!  - The terminal step waits for every step handler that already fired.
//!  - Topology is created before the start message goes out and removed when the sequence ends.
//!  - A pluggable `Transport` boundary, with an in-memory broker for tests and examples.

pub mod chain;
pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod transport;

// --- Re-exports for the Public API ---

pub use crate::core::correlation::CorrelationId;
pub use crate::core::message::{Envelope, Message, MessageContext};
pub use crate::core::status::{ChainStatus, Disposition};
pub use crate::core::step::{StepOptionBuilder, StepOptions};

pub use crate::chain::builder::MessageSequenceBuilder;
pub use crate::chain::sequence::{MessageSequence, ResultFuture};

pub use crate::client::{BusClient, HandlerExceptionMessage, SubscribeOptions};
pub use crate::config::SequenceConfig;
pub use crate::error::{ChainError, ChainResult};
pub use crate::transport::{Consumer, ExchangeType, InMemoryBroker, SubscriptionId, Transport, TransportError};

/*
    Typical use:
    1. Create a transport (`InMemoryBroker`, or an adapter for a real broker) and a
       `BusClient` over it.
    2. `client.message_sequence().start(first_message, None)?`
    3. Chain `.step(handler).await?` / `.step_with(handler, |o| o.optional()).await?` for
       every message the sequence reacts to.
    4. `.finish::<TerminalMessage>().await?` publishes the start message and returns a
       `MessageSequence` whose `result` resolves with the terminal message.
*/
