pub mod correlation;
pub mod handler;
pub mod message;
pub mod status;
pub mod step;

pub use correlation::CorrelationId;
pub use handler::{typed_handler, StepHandler};
pub use message::{Envelope, Message, MessageContext};
pub use status::{ChainStatus, Disposition};
pub use step::{StepDefinition, StepOptionBuilder, StepOptions};
