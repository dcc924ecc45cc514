//! Throughput of the LoRaWAN MIC/FRMPayload crypto hot path (§4.5): every
//! uplink and downlink on the network passes through these two calls.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lorawan_ns_core::crypto::{compute_mic, crypt_frm_payload, Direction};
use lorawan_ns_core::model::AesKey;

const SMALL_PAYLOAD: usize = 16;
const MEDIUM_PAYLOAD: usize = 64;
const LARGE_PAYLOAD: usize = 222; // LoRaWAN max FRMPayload at DR0

fn generate_payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

fn bench_compute_mic(c: &mut Criterion) {
    let key = AesKey([0x2b; 16]);
    let mut group = c.benchmark_group("compute_mic");
    for size in &[SMALL_PAYLOAD, MEDIUM_PAYLOAD, LARGE_PAYLOAD] {
        let msg = generate_payload(*size);
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &msg, |b, msg| {
            b.iter(|| compute_mic(black_box(&key), black_box(0xAABBCCDD), black_box(42), Direction::Up, black_box(msg)))
        });
    }
    group.finish();
}

fn bench_crypt_frm_payload(c: &mut Criterion) {
    let key = AesKey([0x11; 16]);
    let mut group = c.benchmark_group("crypt_frm_payload");
    for size in &[SMALL_PAYLOAD, MEDIUM_PAYLOAD, LARGE_PAYLOAD] {
        let payload = generate_payload(*size);
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| crypt_frm_payload(black_box(&key), black_box(0xAABBCCDD), black_box(42), Direction::Down, black_box(payload)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compute_mic, bench_crypt_frm_payload);
criterion_main!(benches);
