// msgchain/examples/order_sequence.rs

use msgchain::{BusClient, ChainError, InMemoryBroker, Message, MessageContext, SequenceConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// 1. Define the messages taking part in the sequence
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct OrderPlaced {
  order_id: String,
  amount_cents: u64,
}

impl Message for OrderPlaced {
  const MESSAGE_TYPE: &'static str = "order_placed";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct PaymentCaptured {
  order_id: String,
  amount_cents: u64,
}

impl Message for PaymentCaptured {
  const MESSAGE_TYPE: &'static str = "payment_captured";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StockReserved {
  order_id: String,
}

impl Message for StockReserved {
  const MESSAGE_TYPE: &'static str = "stock_reserved";
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

  info!("--- Order Sequence Example ---");

  // 2. One client per process; every sequence it builds shares its chain queue
  let client = BusClient::new(Arc::new(InMemoryBroker::new()), SequenceConfig::from_env()?)?;

  // 3. Stand-ins for the other services: payments answers orders, fulfilment answers payments
  let payments = client.clone();
  client
    .subscribe(move |order: OrderPlaced, ctx: MessageContext| {
      let payments = payments.clone();
      async move {
        info!(order_id = %order.order_id, "Payments: capturing.");
        payments
          .publish(
            &PaymentCaptured {
              order_id: order.order_id,
              amount_cents: order.amount_cents,
            },
            ctx.correlation_id,
          )
          .await
      }
    })
    .await?;

  let fulfilment = client.clone();
  client
    .subscribe(move |payment: PaymentCaptured, ctx: MessageContext| {
      let fulfilment = fulfilment.clone();
      async move {
        // Give the sequence's own PaymentCaptured step a moment to fire first.
        tokio::time::sleep(Duration::from_millis(20)).await;
        info!(order_id = %payment.order_id, "Fulfilment: confirming.");
        fulfilment
          .publish(&OrderConfirmed { order_id: payment.order_id }, ctx.correlation_id)
          .await
      }
    })
    .await?;

  // 4. Describe the sequence. StockReserved is optional and nobody sends it here.
  let mut sequence = client
    .message_sequence()
    .start(
      OrderPlaced {
        order_id: "X".to_string(),
        amount_cents: 4_200,
      },
      None,
    )?
    .step(|payment: PaymentCaptured, ctx: MessageContext| async move {
      info!(correlation_id = %ctx.correlation_id, amount = payment.amount_cents, "Step: payment captured.");
      Ok::<(), anyhow::Error>(())
    })
    .await?
    .step_with(
      |stock: StockReserved, _ctx: MessageContext| async move {
        info!(order_id = %stock.order_id, "Step: stock reserved.");
        Ok::<(), anyhow::Error>(())
      },
      |options| options.optional(),
    )
    .await?
    .finish::<OrderConfirmed>()
    .await?;

  // 5. Wait for the terminal message
  let confirmed = tokio::time::timeout(Duration::from_secs(5), sequence.wait())
    .await
    .map_err(|_| ChainError::Internal("timed out waiting for confirmation".to_string()))??;

  info!("Order {} confirmed.", confirmed.order_id);
  info!(
    completed = sequence.completed(),
    skipped = sequence.skipped(),
    aborted = sequence.aborted(),
    "Final status."
  );
  info!("Sequences still tracked: {}", client.active_sequences());

  Ok(())
}
