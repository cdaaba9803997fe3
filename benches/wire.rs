//! Framing benchmarks: header encode/decode and body checksums.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use tallygrid_client::protocol::wire::{checksum, Header, HEADER_SIZE};

fn bench_header(c: &mut Criterion) {
    let body = vec![0xABu8; 4096];
    let header = Header::for_body(7, 0xCAFE, 3, &body);
    let mut encoded = [0u8; HEADER_SIZE];
    header.write_to(&mut encoded);

    c.bench_function("header_encode", |b| {
        b.iter(|| {
            let mut out = [0u8; HEADER_SIZE];
            black_box(&header).write_to(&mut out);
            black_box(out);
        })
    });

    c.bench_function("header_decode", |b| {
        b.iter(|| Header::read_from(black_box(&encoded)).unwrap())
    });
}

fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("body_checksum");
    for size in [1usize << 10, 1 << 16, 1 << 20] {
        let body = vec![0x5Au8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("{size}"), |b| b.iter(|| checksum(black_box(&body))));
    }
    group.finish();
}

criterion_group!(benches, bench_header, bench_checksum);
criterion_main!(benches);
