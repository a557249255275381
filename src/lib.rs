// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! `flacon` implements the core of a FLAC encoder and decoder: the
//! bitstream format, the fixed/LPC/Rice compression pipeline, metadata
//! block parsing and writing, and seek-table-assisted random access.
//!
//! [`StreamDecoder`] reads a FLAC stream frame by frame; [`StreamEncoder`]
//! writes one. Both are generic over `std::io` traits rather than tied to
//! a particular file type, so in-memory buffers, files, and sockets all
//! work the same way. Byte order, CRC placement, and every other bit-level
//! detail follow the format exactly as specified at
//! <https://xiph.org/flac/format.html>.

pub mod crc;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod fixed;
pub mod format;
pub mod frame;
pub mod input;
pub mod lpc;
pub mod md5;
pub mod metadata;
pub mod output;
pub mod presets;
pub mod rice;
pub mod subframe;

#[cfg(feature = "ogg")]
pub mod ogg;

pub use decoder::{DecodedFrame, StreamDecoder};
pub use encoder::{EncoderConfig, StreamEncoder};
pub use error::{Error, Result, State};
pub use metadata::{MetadataBlock, StreamInfo};
