// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Encode/decode throughput on synthetic PCM, since the crate carries no
//! bundled audio samples. `cargo bench` is the only consumer of this file.

use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flacon::{EncoderConfig, StreamDecoder, StreamEncoder};

fn sine_wave(n: usize) -> Vec<i32> {
    (0..n).map(|i| ((i as f64 * 0.05).sin() * 16000.0) as i32).collect()
}

fn encode(samples: &[i32], level: u32) -> Vec<u8> {
    let mut config = EncoderConfig::new(1, 16, 44100);
    config.apply_compression_level(level);
    let mut buffer = Cursor::new(Vec::new());
    let mut encoder = StreamEncoder::new(&mut buffer, config).unwrap();
    encoder.process(&[samples]).unwrap();
    encoder.finish_and_patch_streaminfo().unwrap();
    buffer.into_inner()
}

fn bench_encode(c: &mut Criterion) {
    let samples = sine_wave(4096 * 16);
    let mut group = c.benchmark_group("encode");
    for level in [0u32, 5, 8] {
        group.bench_function(format!("level_{level}"), |b| {
            b.iter(|| black_box(encode(black_box(&samples), level)));
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let samples = sine_wave(4096 * 16);
    let bytes = encode(&samples, 5);

    c.bench_function("decode", |b| {
        b.iter(|| {
            let mut decoder = StreamDecoder::new(Cursor::new(black_box(&bytes))).unwrap();
            while let Some(frame) = decoder.decode_frame().unwrap() {
                black_box(frame);
            }
        });
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
