// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `error` module defines the error and result types shared by the
//! bitstream-format layer, the decoder, and the encoder.

use std::error;
use std::fmt;
use std::io;

/// An error that prevents successful decoding of a FLAC stream.
#[derive(Debug)]
pub enum Error {
    /// Not a decoding error, but a problem with the underlying IO.
    IoError(io::Error),

    /// The stream is not valid FLAC: a magic number, CRC, or field was wrong.
    FormatError(&'static str),

    /// The decoder encountered a feature it does not support.
    Unsupported(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::IoError(ref err) => err.fmt(f),
            Error::FormatError(msg) => write!(f, "format error: {}", msg),
            Error::Unsupported(msg) => write!(f, "unsupported: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IoError(ref err) => Some(err),
            Error::FormatError(_) | Error::Unsupported(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

/// Either `T` on success, or an `Error` on failure.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Builds a `Result::Err` of `Error::FormatError` with the given message.
///
/// This reads a bit better at call sites than constructing the variant by
/// hand, and it is generic in `T` so it can be used as the tail expression
/// of any fallible function.
pub fn fmt_err<T>(msg: &'static str) -> Result<T> {
    Err(Error::FormatError(msg))
}

/// The lifecycle status exposed by [`crate::decoder::StreamDecoder`] and
/// [`crate::encoder::StreamEncoder`].
///
/// This mirrors the `FLAC__StreamDecoderState` / `FLAC__StreamEncoderState`
/// enums of the reference implementation: most decode and encode errors are
/// reported through a callback and leave the state machine in a well-defined,
/// restartable state, but a handful of conditions are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No fatal error has occurred; normal operation.
    Ok,
    /// The instance has not been initialized yet.
    Uninitialized,
    /// A client callback returned an error status.
    ClientError,
    /// The underlying IO failed.
    IoError,
    /// A buffer could not be grown.
    MemoryAllocationError,
    /// A bitstream invariant was violated while writing.
    FramingError,
    /// The Ogg container layer reported an error.
    OggError,
    /// A seek operation could not complete.
    SeekError,
    /// A callback requested that decoding or encoding be aborted.
    Aborted,
    /// The encoder's internal verify decoder round-tripped to different samples.
    VerifyMismatchInAudioData,
}

/// One mismatch recorded by the encoder's verify pass.
///
/// See `StreamEncoder::verify` and §4.7.5 of the design: every byte written
/// is immediately fed back through an owned decoder, and the decoded samples
/// are compared against the original input FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyMismatch {
    /// Absolute sample index (not sample frame) at which the mismatch occurred.
    pub absolute_sample: u64,
    /// The frame number the mismatch occurred in.
    pub frame_number: u64,
    /// The channel within the frame.
    pub channel: u32,
    /// The sample's index within the block.
    pub sample_in_block: u32,
    /// The sample the encoder was given.
    pub expected: i32,
    /// The sample the verify decoder produced.
    pub got: i32,
}
