use criterion::{criterion_group, criterion_main, Criterion};
use serial_binding::port::{MockPortOptions, MockTransport, OpenOptions, PortRegistry};
use serial_binding::{Binding, FlowController};
use std::hint::black_box;
use std::time::Duration;

pub fn bench_flow_delivery(c: &mut Criterion) {
    let chunk = [0x5au8; 64];

    c.bench_function("flow_arrive_deliver_64b", |b| {
        let mut flow = FlowController::new();
        flow.resume();
        b.iter(|| {
            flow.arrive(black_box(&chunk));
            flow.deliver(|bytes| {
                black_box(bytes);
                true
            })
        })
    });

    c.bench_function("flow_paused_accumulate_16x64b", |b| {
        b.iter(|| {
            let mut flow = FlowController::new();
            for _ in 0..16 {
                flow.arrive(black_box(&chunk));
            }
            flow.resume();
            flow.deliver(|bytes| {
                black_box(bytes);
                false
            })
        })
    });
}

pub fn bench_echo_round_trip(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");

    let registry = PortRegistry::new();
    registry.register("/dev/bench", MockPortOptions::echo().with_ready_data(&b""[..]));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let binding = runtime.block_on(async {
        let binding = Binding::builder()
            .push(move |chunk| tx.send(chunk).is_ok())
            .disconnect(|_| {})
            .build(MockTransport::new(registry))
            .expect("binding");
        binding
            .open("/dev/bench", OpenOptions::default())
            .expect("options")
            .await
            .expect("open");
        binding.resume().expect("resume");
        binding
    });

    c.bench_function("mock_echo_round_trip", |b| {
        b.iter(|| {
            runtime.block_on(async {
                binding
                    .write(&b"ping"[..])
                    .expect("write")
                    .await
                    .expect("accepted");
                black_box(rx.recv().await)
            })
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(300))
        .measurement_time(Duration::from_secs(2));
    targets = bench_flow_delivery, bench_echo_round_trip
}
criterion_main!(benches);
