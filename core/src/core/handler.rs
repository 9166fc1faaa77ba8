// msgchain/src/core/handler.rs

//! Defines the type-erased `StepHandler` stored by the dispatcher and subscribers,
//! and the wrapper that turns a typed user closure into one.

use crate::core::message::{Envelope, Message, MessageContext};
use crate::error::{ChainError, ChainResult};
use futures::future::{self, BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;

/// A handler is an asynchronous function over an encoded `Envelope`.
///
/// Invocation is a plain call through the stored function value; the typed wrapper
/// created by [`typed_handler`] decodes the payload and calls the user's closure.
pub type StepHandler = Arc<dyn Fn(Envelope) -> BoxFuture<'static, ChainResult<()>> + Send + Sync>;

/// Wraps `Fn(M, MessageContext) -> impl Future<Output = Result<(), E>>` into a `StepHandler`.
///
/// Decode failures surface as `ChainError::TypeMismatch` / `ChainError::Codec`; errors
/// returned by the closure become `ChainError::Handler` tagged with `M::MESSAGE_TYPE`.
pub fn typed_handler<M, H, Fut, E>(handler: H) -> StepHandler
where
  M: Message,
  H: Fn(M, MessageContext) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<(), E>> + Send + 'static,
  E: Into<anyhow::Error> + Send + 'static,
{
  Arc::new(move |envelope: Envelope| {
    let context = envelope.context();
    let message = match envelope.decode::<M>() {
      Ok(message) => message,
      Err(err) => return future::ready(Err(err)).boxed(),
    };
    let user_fut = handler(message, context);
    async move {
      user_fut.await.map_err(|err| ChainError::Handler {
        message_type: M::MESSAGE_TYPE.to_string(),
        source: err.into(),
      })
    }
    .boxed()
  })
}
