// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Ring throughput: write + read + shift cycles at various record sizes.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use libtll::ring::Ring;

fn ring_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring");
    for size in [16usize, 64, 256, 1024] {
        let ring = Ring::new(64 * 1024);
        let payload = vec![0xabu8; size];
        group.bench_function(format!("roundtrip/{size}"), |b| {
            b.iter(|| {
                ring.write(black_box(&payload)).unwrap();
                let record = ring.read().unwrap();
                black_box(record.len());
                ring.shift().unwrap();
            })
        });
    }
    group.finish();
}

fn ring_batch(c: &mut Criterion) {
    let ring = Ring::new(64 * 1024);
    let payload = [0x55u8; 128];
    c.bench_function("ring/batch-32", |b| {
        b.iter(|| {
            for _ in 0..32 {
                ring.write(black_box(&payload)).unwrap();
            }
            while ring.shift().is_ok() {}
        })
    });
}

criterion_group!(benches, ring_roundtrip, ring_batch);
criterion_main!(benches);
