//! Throughput benchmarks

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use vfd_modbus::codec;
use vfd_modbus::{Catalog, Request, SimulatedDrive, SimulatorConfig, TransactionEngine};

fn codec_benchmark(c: &mut Criterion) {
    let read = Request::read(0x0000, 16).encode(1).unwrap();
    let mut payload = vec![32u8];
    payload.extend((0..32u8).map(|i| i.wrapping_mul(7)));
    let response = codec::encode(1, 0x03, &payload);

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(response.len() as u64));

    group.bench_function("crc16", |b| {
        b.iter(|| black_box(codec::crc16(black_box(&response[..response.len() - 2]))))
    });

    group.bench_function("encode_read", |b| {
        b.iter(|| black_box(Request::read(black_box(0x0000), black_box(16)).encode(1)))
    });

    group.bench_function("decode_response", |b| {
        b.iter(|| black_box(codec::decode(black_box(&response)).unwrap()))
    });

    group.bench_function("decode_request", |b| {
        b.iter(|| black_box(codec::decode(black_box(&read)).unwrap()))
    });

    group.finish();
}

fn simulator_benchmark(c: &mut Criterion) {
    let profile = Catalog::builtin().unwrap().profile("CDE550").unwrap();
    let read = Request::read(0x0000, 9).encode(1).unwrap();
    let write = Request::write(0x0002, 255).encode(1).unwrap();

    let mut group = c.benchmark_group("simulator");

    group.bench_function("handle_read", |b| {
        let mut drive = SimulatedDrive::new(profile.clone(), SimulatorConfig::default());
        b.iter(|| black_box(drive.handle_frame(black_box(&read))))
    });

    group.bench_function("handle_write", |b| {
        let mut drive = SimulatedDrive::new(profile.clone(), SimulatorConfig::default());
        b.iter(|| black_box(drive.handle_frame(black_box(&write))))
    });

    group.finish();
}

fn round_trip_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let profile = Catalog::builtin().unwrap().profile("CDE550").unwrap();
    let (transport, _sim) =
        rt.block_on(async { SimulatedDrive::new(profile, SimulatorConfig::default()).spawn() });
    let mut engine = TransactionEngine::new(transport, 1);
    let request = Request::read(0x0000, 9);

    c.bench_function("fc03_round_trip", |b| {
        b.iter(|| {
            let response = rt
                .block_on(engine.execute(&request, Duration::from_millis(100), 0))
                .unwrap();
            black_box(response)
        })
    });
}

criterion_group!(
    benches,
    codec_benchmark,
    simulator_benchmark,
    round_trip_benchmark
);
criterion_main!(benches);
