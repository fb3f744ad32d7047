use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use soundbus::{callback, keep_existing, Bus, BusSettings, Message, SubscribeOptions};

fn bench_publish_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_and_drain");
    for subscribers in [0usize, 1, 10] {
        let (bus, ready) = Bus::manual(BusSettings::default());
        bus.add_channel("chan").unwrap();
        for _ in 0..subscribers {
            bus.subscribe("chan", callback(|m| {
                black_box(m);
            }), SubscribeOptions::new())
            .unwrap();
        }
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    bus.publish("chan", black_box(Message::new(json!({"x": 1}))))
                        .unwrap();
                    ready.run_ready();
                })
            },
        );
    }
    group.finish();
}

/// Пачка публикаций в один канал внутри `hold`, доставка при release.
fn bench_held_batch(c: &mut Criterion) {
    let (bus, ready) = Bus::manual(BusSettings::default());
    bus.subscribe("chan", callback(|m| {
        black_box(m);
    }), SubscribeOptions::new())
    .unwrap();

    c.bench_function("held_batch_100", |b| {
        b.iter(|| {
            {
                let _hold = bus.hold();
                for n in 0..100 {
                    bus.publish("chan", Message::new(json!({"n": n}))).unwrap();
                }
            }
            ready.run_ready();
        })
    });
}

fn bench_compacted_burst(c: &mut Criterion) {
    let (bus, ready) = Bus::manual(BusSettings::default());
    bus.register_compactor("tick", keep_existing());
    bus.subscribe("chan", callback(|m| {
        black_box(m);
    }), SubscribeOptions::new())
    .unwrap();

    c.bench_function("compacted_burst_100", |b| {
        b.iter(|| {
            for n in 0..100 {
                bus.publish("chan", Message::typed("tick", json!({"n": n})))
                    .unwrap();
            }
            ready.run_ready();
        })
    });
}

fn bench_subscribe_unsubscribe(c: &mut Criterion) {
    let (bus, ready) = Bus::manual(BusSettings::default());
    let cb = callback(|_| {});
    // Удалённые записи вычищаются только при старте доставки, поэтому
    // каждая итерация публикует одно сообщение.
    c.bench_function("subscribe_unsubscribe_sweep", |b| {
        b.iter(|| {
            let handle = bus
                .subscribe("chan", cb.clone(), SubscribeOptions::new())
                .unwrap();
            black_box(bus.unsubscribe_handle(&handle));
            bus.publish("chan", Message::new(json!({}))).unwrap();
            ready.run_ready();
        })
    });
}

criterion_group!(
    benches,
    bench_publish_and_drain,
    bench_held_batch,
    bench_compacted_burst,
    bench_subscribe_unsubscribe
);
criterion_main!(benches);
