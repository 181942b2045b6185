//! Benchmarks the read -> mutate -> write cycle end to end for both
//! codec plug-ins, so a regression in the bit I/O or syntax-table layer
//! shows up as a throughput change here rather than only in unit tests.

use cbl::fragment::Position;
use cbl::registry::CodecId;
use cbl::{driver, Context};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

fn mpeg2_sequence() -> Vec<u8> {
    let mut bytes = vec![0x00, 0x00, 0x01, 0xb3];
    bytes.extend_from_slice(&[0u8; 8]); // placeholder sequence_header payload
    bytes.extend_from_slice(&[0x00, 0x00, 0x01, 0x00]);
    bytes.extend_from_slice(&[0u8; 4]); // placeholder picture_header payload
    bytes.extend_from_slice(&[0x00, 0x00, 0x01, 0x01]);
    bytes.extend_from_slice(&[0u8; 188]); // placeholder slice payload
    bytes
}

fn vp9_superframe(frame_count: usize, frame_size: usize) -> Vec<u8> {
    let mut bytes = Vec::new();
    for _ in 0..frame_count {
        bytes.extend_from_slice(&vec![0xAAu8; frame_size]);
    }
    let bytes_per_size = 1u8;
    let marker = 0xC0 | ((bytes_per_size - 1) << 3) | ((frame_count - 1) as u8);
    bytes.push(marker);
    for _ in 0..frame_count {
        bytes.push(frame_size as u8);
    }
    bytes.push(marker);
    bytes
}

fn mpeg2_read_write(c: &mut Criterion) {
    let bytes = mpeg2_sequence();
    let mut ctx = Context::init(CodecId::Mpeg2Video).unwrap();
    ctx.set_decompose_unit_types(Some(vec![])); // split-only: exercises start-code scanning

    let mut group = c.benchmark_group("mpeg2");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("split_and_reassemble", |b| {
        b.iter(|| {
            let mut frag = driver::read(&mut ctx, &bytes).unwrap();
            driver::write_fragment_data(&mut ctx, &mut frag).unwrap();
        });
    });
    group.finish();
}

fn vp9_read_write(c: &mut Criterion) {
    let bytes = vp9_superframe(4, 64);
    let mut ctx = Context::init(CodecId::Vp9).unwrap();
    ctx.set_decompose_unit_types(Some(vec![]));

    let mut group = c.benchmark_group("vp9");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("superframe_split_reassemble", |b| {
        b.iter(|| {
            let mut frag = driver::read(&mut ctx, &bytes).unwrap();
            driver::write_fragment_data(&mut ctx, &mut frag).unwrap();
        });
    });
    group.finish();
}

fn insert_unit_then_write(c: &mut Criterion) {
    let bytes = mpeg2_sequence();
    let mut ctx = Context::init(CodecId::Mpeg2Video).unwrap();
    ctx.set_decompose_unit_types(Some(vec![]));

    c.bench_function("mpeg2_insert_and_write", |b| {
        b.iter(|| {
            let mut frag = driver::read(&mut ctx, &bytes).unwrap();
            frag.insert_unit_data(Position::End, 0xb2, vec![1, 2, 3, 4]).unwrap();
            driver::write_fragment_data(&mut ctx, &mut frag).unwrap();
        });
    });
}

criterion_group!(benches, mpeg2_read_write, vp9_read_write, insert_unit_then_write);
criterion_main!(benches);
