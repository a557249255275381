// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `cuesheet` module reads and writes CUESHEET metadata blocks, which
//! store a CD-DA-style table of contents (or an analogous structure for
//! other media) alongside the audio.

use std::io;

use crate::error::Result;
use crate::input::ReadBytes;
use crate::output::BitWriter;

use super::read_string;

/// One index point within a [`CueSheetTrack`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CueSheetTrackIndex {
    /// Offset in samples, relative to the track's own offset.
    pub sample_offset: u64,
    /// The index point number; 0 denotes the CD-DA pre-gap.
    pub index_point: u8,
}

/// One track of a [`CueSheet`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CueSheetTrack {
    /// Offset in samples from the start of the stream.
    pub track_offset: u64,
    /// Track number; 0 is reserved, 100+ for CD-DA lead-out.
    pub track_number: u8,
    /// 12-digit ISRC, or all-NUL if absent.
    pub isrc: [u8; 12],
    /// `false` for audio, `true` for non-audio.
    pub is_audio: bool,
    pub is_pre_emphasis: bool,
    pub index_points: Vec<CueSheetTrackIndex>,
}

/// A parsed CUESHEET block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CueSheet {
    /// Media catalog number, right-padded with NUL to 128 bytes on the wire.
    pub catalog_number: String,
    /// Number of lead-in samples; meaningful only for CD-DA.
    pub leadin_samples: u64,
    pub is_cd: bool,
    pub tracks: Vec<CueSheetTrack>,
}

const CATALOG_LEN: usize = 128;
const TRACK_RESERVED_LEN: usize = 13;
const CUESHEET_RESERVED_LEN: usize = 258;
const INDEX_RESERVED_LEN: usize = 3;

pub fn read_cuesheet_block<R: io::Read>(input: &mut R) -> Result<CueSheet> {
    let catalog_raw = {
        let mut buf = [0u8; CATALOG_LEN];
        input.read_exact(&mut buf)?;
        buf
    };
    let catalog_end = catalog_raw.iter().position(|&b| b == 0).unwrap_or(CATALOG_LEN);
    let catalog_number = String::from_utf8_lossy(&catalog_raw[..catalog_end]).into_owned();

    let leadin_samples = ((input.read_be_u32()? as u64) << 32) | input.read_be_u32()? as u64;
    let flags = input.read_u8()?;
    let is_cd = flags & 0b1000_0000 != 0;
    skip(input, CUESHEET_RESERVED_LEN)?;

    let n_tracks = input.read_u8()?;
    let mut tracks = Vec::with_capacity(n_tracks as usize);
    for _ in 0..n_tracks {
        let track_offset = ((input.read_be_u32()? as u64) << 32) | input.read_be_u32()? as u64;
        let track_number = input.read_u8()?;
        let mut isrc = [0u8; 12];
        input.read_exact(&mut isrc)?;
        let flags = input.read_u8()?;
        let is_audio = flags & 0b1000_0000 == 0;
        let is_pre_emphasis = flags & 0b0100_0000 != 0;
        skip(input, TRACK_RESERVED_LEN)?;

        let n_index = input.read_u8()?;
        let mut index_points = Vec::with_capacity(n_index as usize);
        for _ in 0..n_index {
            let sample_offset = ((input.read_be_u32()? as u64) << 32) | input.read_be_u32()? as u64;
            let index_point = input.read_u8()?;
            skip(input, INDEX_RESERVED_LEN)?;
            index_points.push(CueSheetTrackIndex { sample_offset, index_point });
        }

        tracks.push(CueSheetTrack {
            track_offset,
            track_number,
            isrc,
            is_audio,
            is_pre_emphasis,
            index_points,
        });
    }

    Ok(CueSheet { catalog_number, leadin_samples, is_cd, tracks })
}

pub fn write_cuesheet_block(writer: &mut BitWriter, sheet: &CueSheet) -> Result<()> {
    let mut catalog = [0u8; CATALOG_LEN];
    let bytes = sheet.catalog_number.as_bytes();
    catalog[..bytes.len().min(CATALOG_LEN)].copy_from_slice(&bytes[..bytes.len().min(CATALOG_LEN)]);
    writer.write_byte_block(&catalog)?;

    writer.write_raw_u64(sheet.leadin_samples, 64)?;
    writer.write_raw_u32(if sheet.is_cd { 0b1000_0000 } else { 0 }, 8)?;
    writer.write_zeroes(CUESHEET_RESERVED_LEN as u32 * 8)?;

    writer.write_raw_u32(sheet.tracks.len() as u32, 8)?;
    for track in sheet.tracks.iter() {
        writer.write_raw_u64(track.track_offset, 64)?;
        writer.write_raw_u32(track.track_number as u32, 8)?;
        writer.write_byte_block(&track.isrc)?;
        let flags = (if track.is_audio { 0 } else { 0b1000_0000 })
            | (if track.is_pre_emphasis { 0b0100_0000 } else { 0 });
        writer.write_raw_u32(flags, 8)?;
        writer.write_zeroes(TRACK_RESERVED_LEN as u32 * 8)?;

        writer.write_raw_u32(track.index_points.len() as u32, 8)?;
        for index in track.index_points.iter() {
            writer.write_raw_u64(index.sample_offset, 64)?;
            writer.write_raw_u32(index.index_point as u32, 8)?;
            writer.write_zeroes(INDEX_RESERVED_LEN as u32 * 8)?;
        }
    }

    Ok(())
}

fn skip<R: io::Read>(input: &mut R, n: usize) -> Result<()> {
    let mut buf = [0u8; 64];
    let mut remaining = n;
    while remaining > 0 {
        let chunk = remaining.min(buf.len());
        input.read_exact(&mut buf[..chunk])?;
        remaining -= chunk;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sheet() -> CueSheet {
        CueSheet {
            catalog_number: "1234567890123".to_string(),
            leadin_samples: 88200,
            is_cd: true,
            tracks: vec![
                CueSheetTrack {
                    track_offset: 0,
                    track_number: 1,
                    isrc: [0u8; 12],
                    is_audio: true,
                    is_pre_emphasis: false,
                    index_points: vec![CueSheetTrackIndex { sample_offset: 0, index_point: 1 }],
                },
                CueSheetTrack {
                    track_offset: 44100 * 180,
                    track_number: 170,
                    isrc: [0u8; 12],
                    is_audio: true,
                    is_pre_emphasis: false,
                    index_points: vec![],
                },
            ],
        }
    }

    #[test]
    fn round_trips_through_writer_and_reader() {
        let sheet = sample_sheet();
        let mut writer = BitWriter::new();
        write_cuesheet_block(&mut writer, &sheet).unwrap();
        let (bytes, len) = writer.get_buffer();
        let mut cursor = &bytes[..len];
        let parsed = read_cuesheet_block(&mut cursor).unwrap();
        assert_eq!(parsed, sheet);
    }
}
