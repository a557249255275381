// Claxon -- A FLAC decoding library in Rust
// Copyright 2017 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

#![no_main]

use std::io::Cursor;

use libfuzzer_sys::fuzz_target;

use flacon::StreamDecoder;

fuzz_target!(|data: &[u8]| {
    let mut decoder = match StreamDecoder::new(Cursor::new(data)) {
        Ok(d) => d,
        Err(..) => return,
    };

    loop {
        match decoder.decode_frame() {
            Ok(Some(..)) => {}
            Ok(None) => break,
            Err(..) => return,
        }
    }
});
