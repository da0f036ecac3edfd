//! Benchmarks: configuration parsing and packet flow through a small
//! graph.

use criterion::{criterion_group, criterion_main, Criterion};
use patchbay::{parse_string, BaseErrorHandler, Clock, Packet, RouterThread, Runtime};
use std::hint::black_box;

const CONFIG: &str = "src :: InfiniteSource(LIMIT 0)
    -> c1 :: Counter
    -> q :: Queue(128)
    -> u :: Unqueue(BURST 8)
    -> c2 :: Counter
    -> sink :: Discard;";

fn bench_parse(c: &mut Criterion) {
    let runtime = Runtime::with_default_registry();
    c.bench_function("parse_config", |b| {
        b.iter(|| {
            let mut errh = BaseErrorHandler::new();
            let router =
                parse_string(black_box(CONFIG), "bench", &runtime, Clock::system(), &mut errh)
                    .expect("parses");
            black_box(router.nelements())
        })
    });
}

fn bench_packet_flow(c: &mut Criterion) {
    let runtime = Runtime::with_default_registry();
    let mut errh = BaseErrorHandler::new();
    let mut router =
        parse_string(CONFIG, "bench", &runtime, Clock::system(), &mut errh).expect("parses");
    router.initialize(&mut errh).expect("initializes");
    let c1 = router.find("c1").unwrap();
    let thread = RouterThread::new(&router);

    c.bench_function("push_through_queue", |b| {
        b.iter(|| {
            for _ in 0..64 {
                router.push_into(c1, 0, Packet::make_from(b"benchmark payload"));
            }
            thread.process_pending(1024);
        })
    });
}

fn bench_packet_cow(c: &mut Criterion) {
    c.bench_function("packet_clone_uniqueify", |b| {
        b.iter(|| {
            let p = Packet::make_from(&[0u8; 256]);
            let mut q = p.clone();
            q.data_mut()[0] = 1;
            black_box(q.len())
        })
    });
}

criterion_group!(benches, bench_parse, bench_packet_flow, bench_packet_cow);
criterion_main!(benches);
