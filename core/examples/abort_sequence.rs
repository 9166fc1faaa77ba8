// msgchain/examples/abort_sequence.rs

use msgchain::{BusClient, ChainError, InMemoryBroker, Message, MessageContext, SequenceConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct OrderPlaced {
  order_id: String,
}

impl Message for OrderPlaced {
  const MESSAGE_TYPE: &'static str = "order_placed";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct PaymentCaptured {
  order_id: String,
}

impl Message for PaymentCaptured {
  const MESSAGE_TYPE: &'static str = "payment_captured";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct PaymentDeclined {
  order_id: String,
  reason: String,
}

impl Message for PaymentDeclined {
  const MESSAGE_TYPE: &'static str = "payment_declined";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct OrderConfirmed {
  order_id: String,
}

impl Message for OrderConfirmed {
  const MESSAGE_TYPE: &'static str = "order_confirmed";
}

#[tokio::main]
async fn main() -> Result<(), ChainError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Abort Sequence Example ---");

  let broker = Arc::new(InMemoryBroker::new());
  let client = BusClient::new(broker.clone(), SequenceConfig::default())?;

  // The payment service declines everything.
  let payments = client.clone();
  client
    .subscribe(move |order: OrderPlaced, ctx: MessageContext| {
      let payments = payments.clone();
      async move {
        payments
          .publish(
            &PaymentDeclined {
              order_id: order.order_id,
              reason: "card expired".to_string(),
            },
            ctx.correlation_id,
          )
          .await
      }
    })
    .await?;

  let mut sequence = client
    .message_sequence()
    .start(OrderPlaced { order_id: "Y".to_string() }, None)?
    .step(|_payment: PaymentCaptured, _ctx: MessageContext| async { Ok::<(), anyhow::Error>(()) })
    .await?
    .step_with(
      |declined: PaymentDeclined, _ctx: MessageContext| async move {
        warn!(order_id = %declined.order_id, reason = %declined.reason, "Payment declined, aborting.");
        Ok::<(), anyhow::Error>(())
      },
      |options| options.aborts_execution(),
    )
    .await?
    .finish::<OrderConfirmed>()
    .await?;
  let id = sequence.correlation_id();

  match tokio::time::timeout(Duration::from_secs(5), sequence.wait()).await {
    Ok(Err(ChainError::Aborted { message_type, .. })) => info!("Sequence aborted by '{}'.", message_type),
    Ok(Ok(confirmed)) => info!("Unexpectedly confirmed order {}.", confirmed.order_id),
    Ok(Err(e)) => return Err(e),
    Err(_) => {
      // Nothing arrived in time: release the sequence's topology ourselves.
      client.abandon_sequence(id).await;
      warn!("Timed out, sequence abandoned.");
    }
  }

  info!(aborted = sequence.aborted(), completed = sequence.completed(), "Final status.");
  info!(
    "Bindings left for this sequence: {}",
    broker.bindings_with_key(&format!("#.{}", id)).len()
  );

  Ok(())
}
