// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `metadata` module deals with the metadata blocks that precede the
//! audio frames of a FLAC stream: block headers, STREAMINFO, and the
//! optional PADDING/APPLICATION/SEEKTABLE/VORBIS_COMMENT/CUESHEET/PICTURE
//! blocks.

use std::io;

use crate::error::{fmt_err, Result};
use crate::input::ReadBytes;
use crate::output::BitWriter;

pub mod cuesheet;
pub mod iterator;
pub mod picture;
pub mod seektable;
pub mod vorbis_comment;

pub use cuesheet::CueSheet;
pub use iterator::MetadataIter;
pub use picture::Picture;
pub use seektable::SeekTable;
pub use vorbis_comment::VorbisComment;

/// Reads exactly `len` bytes and interprets them as UTF-8, falling back to
/// a lossy conversion for any malformed comment or description text rather
/// than rejecting the whole block over it.
pub(crate) fn read_string<R: io::Read>(input: &mut R, len: usize) -> Result<String> {
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// The different kinds of metadata block defined by the FLAC format.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum BlockType {
    StreamInfo = 0,
    Padding = 1,
    Application = 2,
    SeekTable = 3,
    VorbisComment = 4,
    CueSheet = 5,
    Picture = 6,
}

/// A metadata block header.
#[derive(Clone, Copy)]
pub struct BlockHeader {
    /// Whether this is the last metadata block before the audio data.
    pub is_last: bool,
    pub block_type: BlockType,
    /// Length of the block in bytes, excluding this header.
    pub length: u32,
}

/// Reads a metadata block header.
///
/// How the block body is read depends on `block_type`; it is always
/// possible to skip a block entirely by skipping `header.length` bytes.
pub fn read_block_header<R: io::Read>(input: &mut R) -> Result<BlockHeader> {
    let byte = input.read_u8()?;
    let is_last = (byte >> 7) == 1;
    let block_type_u8 = byte & 0b0111_1111;
    let length = input.read_be_u24()?;

    let block_type = match block_type_u8 {
        0 => BlockType::StreamInfo,
        1 => BlockType::Padding,
        2 => BlockType::Application,
        3 => BlockType::SeekTable,
        4 => BlockType::VorbisComment,
        5 => BlockType::CueSheet,
        6 => BlockType::Picture,
        127 => return fmt_err("invalid metadata block type"),
        _ => return fmt_err("invalid metadata block, encountered reserved block type"),
    };

    if block_type == BlockType::StreamInfo && length != 34 {
        return fmt_err("invalid streaminfo metadata block length");
    }

    Ok(BlockHeader { is_last, block_type, length })
}

/// Writes a metadata block header.
pub fn write_block_header(writer: &mut BitWriter, header: &BlockHeader) -> Result<()> {
    let type_byte = (header.block_type as u32) | if header.is_last { 0b1000_0000 } else { 0 };
    writer.write_raw_u32(type_byte, 8)?;
    writer.write_raw_u32(header.length, 24)?;
    Ok(())
}

/// The STREAMINFO metadata block, with technical information about the
/// stream. Every FLAC stream has exactly one, as the first metadata block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    /// The minimum block size (in inter-channel samples) used in the stream.
    pub min_block_size: u16,
    /// The maximum block size (in inter-channel samples) used in the stream.
    pub max_block_size: u16,
    /// The minimum frame size in bytes, or `None` if unknown.
    pub min_frame_size: Option<u32>,
    /// The maximum frame size in bytes, or `None` if unknown.
    pub max_frame_size: Option<u32>,
    /// The sample rate in Hz.
    pub sample_rate: u32,
    /// The number of channels.
    pub channels: u32,
    /// The number of bits per sample.
    pub bits_per_sample: u32,
    /// The total number of inter-channel samples, or `None` if unknown.
    pub samples: Option<u64>,
    /// MD5 signature of the unencoded audio data.
    pub md5sum: [u8; 16],
}

impl StreamInfo {
    /// A STREAMINFO with all fields zeroed, suitable as a placeholder the
    /// encoder emits up front and patches once the stream length is known.
    pub fn empty() -> StreamInfo {
        StreamInfo {
            min_block_size: 0,
            max_block_size: 0,
            min_frame_size: None,
            max_frame_size: None,
            sample_rate: 0,
            channels: 0,
            bits_per_sample: 0,
            samples: None,
            md5sum: [0u8; 16],
        }
    }
}

/// Reads a STREAMINFO block body.
pub fn read_streaminfo_block<R: io::Read>(input: &mut R) -> Result<StreamInfo> {
    let min_block_size = input.read_be_u16()?;
    let max_block_size = input.read_be_u16()?;

    let min_frame_size = input.read_be_u24()?;
    let max_frame_size = input.read_be_u24()?;

    let sample_rate_msb = input.read_be_u16()?;
    let sample_rate_lsb = input.read_u8()?;
    let sample_rate = (sample_rate_msb as u32) << 4 | (sample_rate_lsb as u32) >> 4;

    let n_channels_bps = sample_rate_lsb;
    let n_channels = ((n_channels_bps >> 1) & 0b0000_0111) + 1;

    let bps_msb = n_channels_bps & 1;
    let bps_lsb_n_samples = input.read_u8()?;
    let bits_per_sample = (bps_msb << 4 | (bps_lsb_n_samples >> 4)) + 1;

    let n_samples_msb = bps_lsb_n_samples & 0b0000_1111;
    let n_samples_lsb = input.read_be_u32()?;
    let n_samples = (n_samples_msb as u64) << 32 | n_samples_lsb as u64;

    let mut md5sum = [0u8; 16];
    input.read_exact(&mut md5sum)?;

    if min_block_size > max_block_size {
        return fmt_err("inconsistent bounds, min block size > max block size");
    }
    if min_block_size < 16 {
        return fmt_err("invalid block size, must be at least 16");
    }
    if min_frame_size > max_frame_size && max_frame_size != 0 {
        return fmt_err("inconsistent bounds, min frame size > max frame size");
    }
    if sample_rate == 0 || sample_rate > 655_350 {
        return fmt_err("invalid sample rate");
    }

    Ok(StreamInfo {
        min_block_size,
        max_block_size,
        min_frame_size: if min_frame_size == 0 { None } else { Some(min_frame_size) },
        max_frame_size: if max_frame_size == 0 { None } else { Some(max_frame_size) },
        sample_rate,
        channels: n_channels as u32,
        bits_per_sample: bits_per_sample as u32,
        samples: if n_samples == 0 { None } else { Some(n_samples) },
        md5sum,
    })
}

/// Writes a STREAMINFO block body.
pub fn write_streaminfo_block(writer: &mut BitWriter, info: &StreamInfo) -> Result<()> {
    writer.write_raw_u32(info.min_block_size as u32, 16)?;
    writer.write_raw_u32(info.max_block_size as u32, 16)?;
    writer.write_raw_u32(info.min_frame_size.unwrap_or(0), 24)?;
    writer.write_raw_u32(info.max_frame_size.unwrap_or(0), 24)?;
    writer.write_raw_u32(info.sample_rate, 20)?;
    writer.write_raw_u32(info.channels - 1, 3)?;
    writer.write_raw_u32(info.bits_per_sample - 1, 5)?;
    writer.write_raw_u64(info.samples.unwrap_or(0), 36)?;
    writer.write_byte_block(&info.md5sum)?;
    Ok(())
}

/// Application id used in an APPLICATION block.
///
/// Registered application ids are listed at https://www.xiph.org/flac/id.html.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApplicationId(pub u32);

/// Reads the 4-byte application id prefix of an APPLICATION block. The
/// remaining `header.length - 4` bytes of application-specific data are not
/// consumed by this function.
pub fn read_application_block<R: io::Read>(input: &mut R) -> Result<ApplicationId> {
    Ok(ApplicationId(input.read_be_u32()?))
}

/// A fully parsed metadata block, the union [`BlockType`] ranges over.
#[derive(Clone, Debug)]
pub enum MetadataBlock {
    StreamInfo(StreamInfo),
    /// A PADDING block of `len` zero bytes; the bytes themselves are not
    /// retained.
    Padding { len: u32 },
    Application { id: ApplicationId, data: Vec<u8> },
    SeekTable(SeekTable),
    VorbisComment(VorbisComment),
    CueSheet(CueSheet),
    Picture(Picture),
    /// A reserved or otherwise unrecognised block type, kept verbatim so
    /// round-tripping a stream does not silently drop it.
    Unknown { block_type: u8, data: Vec<u8> },
}

/// Reads one metadata block's body, given its already-parsed header.
pub fn read_metadata_block<R: io::Read>(input: &mut R, header: &BlockHeader) -> Result<MetadataBlock> {
    match header.block_type {
        BlockType::StreamInfo => Ok(MetadataBlock::StreamInfo(read_streaminfo_block(input)?)),
        BlockType::Padding => {
            skip_bytes(input, header.length as usize)?;
            Ok(MetadataBlock::Padding { len: header.length })
        }
        BlockType::Application => {
            let id = read_application_block(input)?;
            let mut data = vec![0u8; header.length as usize - 4];
            input.read_exact(&mut data)?;
            Ok(MetadataBlock::Application { id, data })
        }
        BlockType::SeekTable => Ok(MetadataBlock::SeekTable(seektable::read_seektable_block(input, header.length)?)),
        BlockType::VorbisComment => Ok(MetadataBlock::VorbisComment(vorbis_comment::read_vorbis_comment_block(input)?)),
        BlockType::CueSheet => Ok(MetadataBlock::CueSheet(cuesheet::read_cuesheet_block(input)?)),
        BlockType::Picture => Ok(MetadataBlock::Picture(picture::read_picture_block(input)?)),
    }
}

fn skip_bytes<R: io::Read>(input: &mut R, n: usize) -> Result<()> {
    let mut buf = [0u8; 256];
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

    #[test]
    fn streaminfo_round_trips_through_writer_and_reader() {
        let info = StreamInfo {
            min_block_size: 4096,
            max_block_size: 4096,
            min_frame_size: Some(1000),
            max_frame_size: Some(8000),
            sample_rate: 44100,
            channels: 2,
            bits_per_sample: 16,
            samples: Some(123_456),
            md5sum: [0xab; 16],
        };
        let mut writer = BitWriter::new();
        write_streaminfo_block(&mut writer, &info).unwrap();
        let (bytes, len) = writer.get_buffer();
        let mut cursor = &bytes[..len];
        let parsed = read_streaminfo_block(&mut cursor).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn block_header_round_trips() {
        let header = BlockHeader { is_last: true, block_type: BlockType::VorbisComment, length: 42 };
        let mut writer = BitWriter::new();
        write_block_header(&mut writer, &header).unwrap();
        let (bytes, len) = writer.get_buffer();
        let mut cursor = &bytes[..len];
        let parsed = read_block_header(&mut cursor).unwrap();
        assert!(parsed.is_last);
        assert_eq!(parsed.block_type, BlockType::VorbisComment);
        assert_eq!(parsed.length, 42);
    }

    #[test]
    fn rejects_reserved_block_type() {
        let bytes = [0b0111_1111u8, 0, 0, 0];
        let mut cursor = &bytes[..];
        assert!(read_block_header(&mut cursor).is_err());
    }
}
