// Claxon -- A FLAC decoding library in Rust
// Copyright 2018 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

#![no_main]

use std::io::Cursor;

use libfuzzer_sys::fuzz_target;

use flacon::StreamDecoder;

/// Decodes `data` fully, or returns `None` on the first decode error.
fn decode_all(data: &[u8]) -> Option<Vec<Vec<Vec<i32>>>> {
    let mut decoder = StreamDecoder::new(Cursor::new(data)).ok()?;
    let mut frames = Vec::new();
    loop {
        match decoder.decode_frame() {
            Ok(Some(frame)) => frames.push(frame.samples),
            Ok(None) => return Some(frames),
            Err(..) => return None,
        }
    }
}

// Decoding the same stream twice from scratch must be deterministic: there is
// no shared mutable state between decoders, so any divergence points at an
// uninitialized buffer or other undefined behaviour.
fuzz_target!(|data: &[u8]| {
    if let Some(first) = decode_all(data) {
        let second = decode_all(data).expect("first decode succeeded, second should too");
        assert_eq!(first, second);
    }
});
