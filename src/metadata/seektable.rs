// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `seektable` module reads and writes SEEKTABLE metadata blocks: a
//! sequence of fixed-size seek points used to support faster random access.

use std::io;

use crate::error::{fmt_err, Result};
use crate::format::SEEKPOINT_PLACEHOLDER;
use crate::input::ReadBytes;
use crate::output::BitWriter;

/// The byte size of a single seek point, per §4.9.
pub const SEEKPOINT_LEN: usize = 18;

/// One entry of a SEEKTABLE block.
///
/// Placeholder points (`sample_number == SEEKPOINT_PLACEHOLDER`) carry no
/// meaningful `stream_offset`/`frame_samples` and must sort after every real
/// point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeekPoint {
    /// Sample number of the first sample in the target frame.
    pub sample_number: u64,
    /// Byte offset from the first frame header to the target frame's header.
    pub stream_offset: u64,
    /// Number of samples in the target frame.
    pub frame_samples: u16,
}

impl SeekPoint {
    pub fn is_placeholder(&self) -> bool {
        self.sample_number == SEEKPOINT_PLACEHOLDER
    }
}

/// A parsed SEEKTABLE block: an ordered list of seek points.
#[derive(Clone, Debug, Default)]
pub struct SeekTable {
    pub points: Vec<SeekPoint>,
}

/// Reads a SEEKTABLE block body of `length` bytes.
///
/// The number of points is implied by the metadata header's length field,
/// equal to `length / 18`; a non-multiple is a format error.
pub fn read_seektable_block<R: io::Read>(input: &mut R, length: u32) -> Result<SeekTable> {
    if length as usize % SEEKPOINT_LEN != 0 {
        return fmt_err("invalid seek table block length, not a multiple of 18");
    }
    let n_points = length as usize / SEEKPOINT_LEN;
    let mut points = Vec::with_capacity(n_points);
    for _ in 0..n_points {
        let sample_number = ((input.read_be_u32()? as u64) << 32) | input.read_be_u32()? as u64;
        let stream_offset = ((input.read_be_u32()? as u64) << 32) | input.read_be_u32()? as u64;
        let frame_samples = input.read_be_u16()?;
        points.push(SeekPoint { sample_number, stream_offset, frame_samples });
    }
    Ok(SeekTable { points })
}

/// Writes a SEEKTABLE block body.
pub fn write_seektable_block(writer: &mut BitWriter, table: &SeekTable) -> Result<()> {
    for point in table.points.iter() {
        writer.write_raw_u64(point.sample_number, 64)?;
        writer.write_raw_u64(point.stream_offset, 64)?;
        writer.write_raw_u32(point.frame_samples as u32, 16)?;
    }
    Ok(())
}

/// Checks that `points` are legally ordered: ascending by sample number with
/// placeholders (if any) only at the end, per §4.9.
pub fn points_are_sorted(points: &[SeekPoint]) -> bool {
    let mut seen_placeholder = false;
    let mut prev: Option<u64> = None;
    for point in points {
        if point.is_placeholder() {
            seen_placeholder = true;
            continue;
        }
        if seen_placeholder {
            return false;
        }
        if let Some(p) = prev {
            if point.sample_number <= p {
                return false;
            }
        }
        prev = Some(point.sample_number);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_writer_and_reader() {
        let table = SeekTable {
            points: vec![
                SeekPoint { sample_number: 0, stream_offset: 0, frame_samples: 4096 },
                SeekPoint { sample_number: 4096, stream_offset: 1234, frame_samples: 4096 },
                SeekPoint {
                    sample_number: SEEKPOINT_PLACEHOLDER,
                    stream_offset: 0,
                    frame_samples: 0,
                },
            ],
        };
        let mut writer = BitWriter::new();
        write_seektable_block(&mut writer, &table).unwrap();
        let (bytes, len) = writer.get_buffer();
        let mut cursor = &bytes[..len];
        let parsed = read_seektable_block(&mut cursor, len as u32).unwrap();
        assert_eq!(parsed.points, table.points);
    }

    #[test]
    fn rejects_sample_number_duplicates_and_out_of_order() {
        let ok = [
            SeekPoint { sample_number: 0, stream_offset: 0, frame_samples: 10 },
            SeekPoint { sample_number: 10, stream_offset: 5, frame_samples: 10 },
        ];
        assert!(points_are_sorted(&ok));

        let bad = [
            SeekPoint { sample_number: 10, stream_offset: 0, frame_samples: 10 },
            SeekPoint { sample_number: 0, stream_offset: 5, frame_samples: 10 },
        ];
        assert!(!points_are_sorted(&bad));
    }

    #[test]
    fn placeholders_must_trail() {
        let bad = [
            SeekPoint { sample_number: SEEKPOINT_PLACEHOLDER, stream_offset: 0, frame_samples: 0 },
            SeekPoint { sample_number: 0, stream_offset: 0, frame_samples: 10 },
        ];
        assert!(!points_are_sorted(&bad));
    }
}
