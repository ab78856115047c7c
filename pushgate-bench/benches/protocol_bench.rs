//! Truncation and framing benchmarks.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pushgate_protocol::{
    truncate, Alert, AlertDictionary, Decoder, Encoder, ErrorResponse, Notification, Payload,
    StatusCode, MAX_PAYLOAD_SIZE,
};

fn create_test_notification(alert_len: usize) -> Notification {
    Notification::new(Bytes::from(vec![0xAB; 32]), Payload::alert("x".repeat(alert_len)))
        .with_identifier("bench-1")
        .with_priority(Notification::PRIORITY_IMMEDIATE)
}

fn create_loc_args_payload(arg_len: usize) -> Payload {
    let mut payload = Payload::default();
    payload.aps.alert = Some(Alert::Dictionary(AlertDictionary {
        body: Some("\u{e9}".repeat(arg_len)),
        loc_key: Some("GAME_INVITE".to_string()),
        loc_args: Some(vec!["\u{1F600}".repeat(arg_len), "y".repeat(arg_len)]),
        ..Default::default()
    }));
    payload
}

fn bench_truncate(c: &mut Criterion) {
    let mut group = c.benchmark_group("truncate");

    for size in [1000, 3000, 10000] {
        let payload = Payload::alert("x".repeat(size));

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("ascii", size), &payload, |b, payload| {
            b.iter(|| black_box(truncate(payload, MAX_PAYLOAD_SIZE).unwrap()));
        });

        let payload = create_loc_args_payload(size);
        group.bench_with_input(BenchmarkId::new("loc_args", size), &payload, |b, payload| {
            b.iter(|| black_box(truncate(payload, MAX_PAYLOAD_SIZE).unwrap()));
        });
    }

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("notification_encode");
    let encoder = Encoder::default();

    for size in [100, 1000, 1900] {
        let notification = create_test_notification(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(size),
            &notification,
            |b, notification| {
                b.iter(|| black_box(encoder.encode(7, notification).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_prepare_and_encode(c: &mut Criterion) {
    let encoder = Encoder::default();
    let notification = create_test_notification(5000);

    c.bench_function("prepare_and_encode_oversized", |b| {
        b.iter(|| {
            let prepared = encoder.prepare(&notification).unwrap();
            black_box(encoder.encode(7, &prepared).unwrap())
        });
    });
}

fn bench_error_response_decode(c: &mut Criterion) {
    let mut stream = BytesMut::new();
    for seq in 0..64 {
        stream.extend_from_slice(&ErrorResponse::new(StatusCode::Shutdown, seq).encode());
    }
    let stream = stream.freeze();

    c.bench_function("error_response_decode_64", |b| {
        b.iter(|| {
            let mut decoder = Decoder::new();
            decoder.extend(&stream);
            let mut count = 0;
            while let Some(response) = decoder.decode_error_response().unwrap() {
                count += response.sequence;
            }
            black_box(count)
        });
    });
}

criterion_group!(
    benches,
    bench_truncate,
    bench_encode,
    bench_prepare_and_encode,
    bench_error_response_decode
);
criterion_main!(benches);
