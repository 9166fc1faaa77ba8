use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use msgchain::chain::{ChainDispatcher, SequenceRepository};
use msgchain::core::typed_handler;
use msgchain::{BusClient, CorrelationId, Envelope, InMemoryBroker, Message, MessageContext, SequenceConfig, StepOptionBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Runtime;

// --- Benchmark Messages ---
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Kickoff {
  n: u64,
}

impl Message for Kickoff {
  const MESSAGE_TYPE: &'static str = "bench_kickoff";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Progress {
  n: u64,
}

impl Message for Progress {
  const MESSAGE_TYPE: &'static str = "bench_progress";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Progress2 {
  n: u64,
}

impl Message for Progress2 {
  const MESSAGE_TYPE: &'static str = "bench_progress_2";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Done {
  n: u64,
}

impl Message for Done {
  const MESSAGE_TYPE: &'static str = "bench_done";
}

fn client() -> BusClient {
  BusClient::new(Arc::new(InMemoryBroker::new()), SequenceConfig::default()).unwrap()
}

// --- Benchmark Functions ---

/// Build, bind, drive and release one sequence end to end.
fn bench_sequence_lifecycle(c: &mut Criterion) {
  let mut group = c.benchmark_group("SequenceLifecycle");
  let rt = Runtime::new().unwrap();
  let client = client();

  group.throughput(Throughput::Elements(1));
  group.bench_function("start_finish_only", |b| {
    b.to_async(&rt).iter(|| {
      let client = client.clone();
      async move {
        let mut sequence = client
          .message_sequence()
          .start(Kickoff { n: 1 }, None)
          .unwrap()
          .finish::<Done>()
          .await
          .unwrap();
        client.publish(&Done { n: 1 }, sequence.correlation_id()).await.unwrap();
        sequence.wait().await.unwrap()
      }
    });
  });

  group.bench_function("two_steps_one_optional", |b| {
    b.to_async(&rt).iter(|| {
      let client = client.clone();
      async move {
        let mut sequence = client
          .message_sequence()
          .start(Kickoff { n: 1 }, None)
          .unwrap()
          .step(|_msg: Progress, _ctx: MessageContext| async { Ok::<(), anyhow::Error>(()) })
          .await
          .unwrap()
          .step_with(
            |_msg: Progress2, _ctx: MessageContext| async { Ok::<(), anyhow::Error>(()) },
            |options| options.optional(),
          )
          .await
          .unwrap()
          .finish::<Done>()
          .await
          .unwrap();
        let id = sequence.correlation_id();
        client.publish(&Progress { n: 1 }, id).await.unwrap();
        client.publish(&Done { n: 1 }, id).await.unwrap();
        sequence.wait().await.unwrap()
      }
    });
  });
  group.finish();
}

/// Many sequences in flight on one client.
fn bench_concurrent_sequences(c: &mut Criterion) {
  let mut group = c.benchmark_group("ConcurrentSequences");
  let rt = Runtime::new().unwrap();
  let client = client();

  for in_flight in [10usize, 100].iter() {
    group.throughput(Throughput::Elements(*in_flight as u64));
    group.bench_with_input(BenchmarkId::from_parameter(in_flight), in_flight, |b, &in_flight| {
      b.to_async(&rt).iter(|| {
        let client = client.clone();
        async move {
          let mut sequences = Vec::with_capacity(in_flight);
          for n in 0..in_flight as u64 {
            let sequence = client
              .message_sequence()
              .start(Kickoff { n }, None)
              .unwrap()
              .step(|_msg: Progress, _ctx: MessageContext| async { Ok::<(), anyhow::Error>(()) })
              .await
              .unwrap()
              .finish::<Done>()
              .await
              .unwrap();
            sequences.push(sequence);
          }
          for sequence in &sequences {
            let id = sequence.correlation_id();
            client.publish(&Progress { n: 0 }, id).await.unwrap();
            client.publish(&Done { n: 0 }, id).await.unwrap();
          }
          for mut sequence in sequences {
            sequence.wait().await.unwrap();
          }
        }
      });
    });
  }
  group.finish();
}

/// Dispatch overhead for a single step, no broker involved.
fn bench_dispatch(c: &mut Criterion) {
  let mut group = c.benchmark_group("Dispatch");
  let rt = Runtime::new().unwrap();

  group.throughput(Throughput::Elements(1));
  group.bench_function("invoke_registered_step", |b| {
    let repository = Arc::new(SequenceRepository::new());
    let dispatcher = Arc::new(ChainDispatcher::new(repository));
    let id = CorrelationId::new();
    dispatcher.add_message_handler(
      id,
      Progress::MESSAGE_TYPE,
      typed_handler(|_msg: Progress, _ctx: MessageContext| async { Ok::<(), anyhow::Error>(()) }),
      StepOptionBuilder::new().build(),
    );
    let envelope = Envelope::encode(&Progress { n: 7 }, Progress::MESSAGE_TYPE, "bench_progress.x", id).unwrap();

    b.to_async(&rt).iter(|| {
      let dispatcher = dispatcher.clone();
      let envelope = envelope.clone();
      async move { dispatcher.invoke(envelope).await }
    });
  });
  group.finish();
}

criterion_group!(
  benches,
  bench_sequence_lifecycle,
  bench_concurrent_sequences,
  bench_dispatch
);
criterion_main!(benches);
