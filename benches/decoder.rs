//! Benchmark suite for the Tilt frame decoder.
//!
//! Isolates decoding and registry lookup from async runtime overhead.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use tilt_relay::decoder::{TILT_COMPANY_ID, decode};
use tilt_relay::{Color, Registry};

fn frame(color: Color, temperature: u16, gravity: u16) -> Vec<u8> {
    let mut frame = TILT_COMPANY_ID.to_le_bytes().to_vec();
    frame.extend_from_slice(&[0x02, 0x15]);
    frame.extend_from_slice(color.identifier().as_bytes());
    frame.extend_from_slice(&temperature.to_be_bytes());
    frame.extend_from_slice(&gravity.to_be_bytes());
    frame.push(0xC5);
    frame
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let registry = Registry::default();

    group.throughput(Throughput::Elements(1));

    let standard = frame(Color::Red, 65, 1015);
    group.bench_function("standard", |b| {
        b.iter(|| decode(black_box(&registry), black_box(&standard)))
    });

    // Pro readings only match the second candidate for their UUID.
    let pro = frame(Color::Pink, 682, 10480);
    group.bench_function("pro", |b| {
        b.iter(|| decode(black_box(&registry), black_box(&pro)))
    });

    let mut foreign = frame(Color::Red, 65, 1015);
    foreign[4] = 0x00;
    group.bench_function("unknown_uuid", |b| {
        b.iter(|| decode(black_box(&registry), black_box(&foreign)))
    });

    let truncated = standard[..20].to_vec();
    group.bench_function("truncated", |b| {
        b.iter(|| decode(black_box(&registry), black_box(&truncated)))
    });

    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
