//! Benchmarks for header decoding and message parsing
//!
//! Measures the per-frame cost on the receive path:
//! - Header JSON decoding
//! - Message classification
//! - Full frame encoding (used by test servers)

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use protocol::{
    Message, ProtocolVariant, ResultInfo, ResultMessage, SensorId, decode_header, encode_message,
};

fn result_message(sensors: u32, payload_len: usize) -> Message {
    Message::Result(ResultMessage {
        info: vec![
            (1..=sensors)
                .map(|id| ResultInfo {
                    sensor_id: SensorId(id),
                    tick: 1_000 * id,
                    data_saturated: false,
                    frame_delayed: false,
                    calibration_needed: false,
                    temperature: 25,
                })
                .collect(),
        ],
        payload: vec![0u8; payload_len],
    })
}

fn benchmark_header_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("header_decode");

    for sensors in [1u32, 5] {
        let frame = encode_message(&result_message(sensors, 0));
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::new("result", sensors), &frame, |b, frame| {
            b.iter(|| decode_header(black_box(frame)).unwrap())
        });
    }

    group.finish();
}

fn benchmark_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_message");

    for payload_len in [640usize, 64 * 1024] {
        let message = result_message(1, payload_len);
        let (header, payload) = message.to_header();
        group.throughput(Throughput::Bytes(payload_len as u64));
        group.bench_with_input(
            BenchmarkId::new("result", payload_len),
            &(header, payload),
            |b, (header, payload)| {
                b.iter(|| {
                    ProtocolVariant::Current
                        .parse_message(black_box(header), payload.clone())
                        .unwrap()
                })
            },
        );
    }

    group.finish();
}

fn benchmark_encode(c: &mut Criterion) {
    let message = result_message(5, 4096);
    c.bench_function("encode_result_frame", |b| {
        b.iter(|| encode_message(black_box(&message)))
    });
}

criterion_group!(benches, benchmark_header_decode, benchmark_parse, benchmark_encode);
criterion_main!(benches);
