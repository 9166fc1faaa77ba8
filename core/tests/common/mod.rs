// tests/common/mod.rs
#![allow(dead_code)] // Not every test binary uses every helper

use msgchain::{BusClient, InMemoryBroker, Message, SequenceConfig};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

// --- Common Message Types ---
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
  pub order_id: u32,
  pub amount: u64,
}

impl Message for OrderPlaced {
  const MESSAGE_TYPE: &'static str = "order_placed";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentCaptured {
  pub order_id: u32,
  pub amount: u64,
}

impl Message for PaymentCaptured {
  const MESSAGE_TYPE: &'static str = "payment_captured";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StockReserved {
  pub order_id: u32,
  pub sku: String,
}

impl Message for StockReserved {
  const MESSAGE_TYPE: &'static str = "stock_reserved";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentDeclined {
  pub order_id: u32,
  pub reason: String,
}

impl Message for PaymentDeclined {
  const MESSAGE_TYPE: &'static str = "payment_declined";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderConfirmed {
  pub order_id: u32,
}

impl Message for OrderConfirmed {
  const MESSAGE_TYPE: &'static str = "order_confirmed";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicMessage {
  pub prop: String,
}

impl Message for BasicMessage {
  const MESSAGE_TYPE: &'static str = "basic_message";
}

// --- Common Error Type for Test Handlers ---
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TestError {
  #[error("Test handler failed: {0}")]
  Handler(String),
}

// --- Client construction ---
pub fn client() -> (Arc<InMemoryBroker>, BusClient) {
  client_with(SequenceConfig::default())
}

pub fn client_with(config: SequenceConfig) -> (Arc<InMemoryBroker>, BusClient) {
  let broker = Arc::new(InMemoryBroker::new());
  let client = BusClient::new(broker.clone(), config).unwrap();
  (broker, client)
}

/// Polls `condition` every few milliseconds until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
  for _ in 0..400 {
    if condition() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  condition()
}

/// Awaits `fut` with a two second ceiling so a hung sequence fails the test instead of stalling it.
pub async fn within<F: Future>(fut: F) -> F::Output {
  tokio::time::timeout(Duration::from_secs(2), fut)
    .await
    .expect("future did not resolve within 2s")
}

// --- Helper for Tracing Setup ---
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}
