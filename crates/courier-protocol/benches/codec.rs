//! Codec benchmarks for courier-protocol.

use courier_protocol::{codec, Frame, WireMessage, WireMessageKind};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn wire_message(content_len: usize) -> WireMessage {
    WireMessage {
        id: 1,
        conversation: "alice:bob".into(),
        sender_id: "alice".into(),
        recipient_id: "bob".into(),
        content: "x".repeat(content_len),
        kind: WireMessageKind::Text,
        created_at: 1_700_000_000_000,
        is_read: false,
        read_at: None,
    }
}

fn bench_encode_message(c: &mut Criterion) {
    let frame = Frame::new_message(wire_message(64));

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("message_64B", |b| {
        b.iter(|| codec::encode(black_box(&frame)))
    });
    group.finish();
}

fn bench_decode_message(c: &mut Criterion) {
    let frame = Frame::new_message(wire_message(64));
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("message_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let frame = Frame::new_message(wire_message(256));

    c.bench_function("roundtrip_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        });
    });

    let typing = Frame::user_typing("alice:bob", "alice", true);
    c.bench_function("roundtrip_typing", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&typing)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_encode_message,
    bench_decode_message,
    bench_roundtrip
);
criterion_main!(benches);
