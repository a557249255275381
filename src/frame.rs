// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `frame` module deals with the frames that make up a FLAC stream: the
//! frame header (read and write), the inverse/forward channel decorrelation
//! transforms, and orchestration of the per-channel subframes.

use std::io;

use crate::crc::Crc8Reader;
use crate::error::{Error, Result};
use crate::format::ChannelAssignment;
use crate::input::{BitReader, ReadBytes};
use crate::output::BitWriter;
use crate::subframe;

/// Whether a frame's time position is a frame number or a sample number.
///
/// A fixed-blocksize stream numbers frames; a variable-blocksize stream
/// numbers the first sample of every frame instead (§3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberType {
    Frame,
    Sample,
}

/// A decoded (or about-to-be-encoded) frame header.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub blocksize: u32,
    /// `None` means "use the stream's STREAMINFO sample rate".
    pub sample_rate: Option<u32>,
    pub channel_assignment: ChannelAssignment,
    /// `None` means "use the stream's STREAMINFO bits per sample".
    pub bits_per_sample: Option<u32>,
    pub number_type: NumberType,
    pub number: u64,
}

impl FrameHeader {
    pub fn channels(&self) -> u32 {
        self.channel_assignment.channels()
    }
}

/// Reads the FLAC "UTF-8"-style variable-length integer from a byte-aligned
/// source, as used for the frame/sample number field of a frame header.
fn read_var_length_int<R: io::Read>(input: &mut R) -> Result<u64> {
    let first = input.read_u8()?;
    let mut extra = 0u32;
    let mut mask_mark = 0b1000_0000u8;
    while first & mask_mark != 0 {
        extra += 1;
        mask_mark >>= 1;
    }

    if extra == 1 {
        return Err(Error::FormatError("invalid variable-length integer"));
    }
    if extra > 1 {
        extra -= 1;
    }

    let mask_data = 0xffu8 >> (extra + 1).min(8);
    let mut result = ((first & mask_data) as u64) << (6 * extra);

    for i in (0..extra).rev() {
        let byte = input.read_u8()?;
        if byte & 0b1100_0000 != 0b1000_0000 {
            return Err(Error::FormatError("invalid variable-length integer"));
        }
        result |= ((byte & 0b0011_1111) as u64) << (6 * i);
    }

    Ok(result)
}

fn write_var_length_int(writer: &mut BitWriter, v: u64) -> Result<()> {
    writer.write_utf8_u64(v)
}

/// Reads and CRC-8-validates a frame header from a byte-aligned position.
pub fn read_frame_header<R: io::Read>(input: &mut R) -> Result<FrameHeader> {
    let mut crc_input = Crc8Reader::new(input);

    let sync_res_block = crc_input.read_be_u16()?;
    let sync_code = sync_res_block & 0b1111_1111_1111_1100;
    if sync_code != 0b1111_1111_1111_1000 {
        return Err(Error::FormatError("frame sync code missing"));
    }
    if sync_res_block & 0b0000_0000_0000_0010 != 0 {
        return Err(Error::FormatError("reserved frame header bit set"));
    }
    let variable_blocksize = sync_res_block & 0b0000_0000_0000_0001 != 0;

    let bs_sr = crc_input.read_u8()?;
    let mut block_size = 0u32;
    let mut read_8bit_bs = false;
    let mut read_16bit_bs = false;
    match bs_sr >> 4 {
        0b0000 => return Err(Error::FormatError("reserved block size code")),
        0b0001 => block_size = 192,
        n if (0b0010..=0b0101).contains(&n) => block_size = 576 * (1u32 << (n - 2)),
        0b0110 => read_8bit_bs = true,
        0b0111 => read_16bit_bs = true,
        n => block_size = 256 * (1u32 << (n - 8)),
    }

    let mut sample_rate = None;
    let mut read_8bit_sr = false;
    let mut read_16bit_sr = false;
    let mut read_16bit_sr_ten = false;
    match bs_sr & 0b0000_1111 {
        0b0000 => {}
        0b0001 => sample_rate = Some(88_200),
        0b0010 => sample_rate = Some(176_400),
        0b0011 => sample_rate = Some(192_000),
        0b0100 => sample_rate = Some(8_000),
        0b0101 => sample_rate = Some(16_000),
        0b0110 => sample_rate = Some(22_050),
        0b0111 => sample_rate = Some(24_000),
        0b1000 => sample_rate = Some(32_000),
        0b1001 => sample_rate = Some(44_100),
        0b1010 => sample_rate = Some(48_000),
        0b1011 => sample_rate = Some(96_000),
        0b1100 => read_8bit_sr = true,
        0b1101 => read_16bit_sr = true,
        0b1110 => read_16bit_sr_ten = true,
        _ => return Err(Error::FormatError("invalid sample rate code")),
    }

    let chan_bps_res = crc_input.read_u8()?;
    let channel_assignment = match chan_bps_res >> 4 {
        n if n < 8 => ChannelAssignment::Independent(n as u32 + 1),
        0b1000 => ChannelAssignment::LeftSide,
        0b1001 => ChannelAssignment::RightSide,
        0b1010 => ChannelAssignment::MidSide,
        _ => return Err(Error::FormatError("reserved channel assignment")),
    };

    let bits_per_sample = match (chan_bps_res & 0b0000_1110) >> 1 {
        0b000 => None,
        0b001 => Some(8),
        0b010 => Some(12),
        0b100 => Some(16),
        0b101 => Some(20),
        0b110 => Some(24),
        _ => return Err(Error::FormatError("reserved bits-per-sample code")),
    };

    if chan_bps_res & 0b0000_0001 != 0 {
        return Err(Error::FormatError("reserved frame header bit set"));
    }

    let (number_type, number) = if variable_blocksize {
        (NumberType::Sample, read_var_length_int(&mut crc_input)?)
    } else {
        let frame_number = read_var_length_int(&mut crc_input)?;
        if frame_number > 0x7fff_ffff {
            return Err(Error::FormatError("frame number too large"));
        }
        (NumberType::Frame, frame_number)
    };

    if read_8bit_bs {
        block_size = crc_input.read_u8()? as u32 + 1;
    }
    if read_16bit_bs {
        let bs = crc_input.read_be_u16()?;
        if bs == 0xffff {
            return Err(Error::FormatError("block size exceeds 65535"));
        }
        block_size = bs as u32 + 1;
    }
    if block_size < 16 {
        return Err(Error::FormatError("block size must be at least 16"));
    }

    if read_8bit_sr {
        sample_rate = Some(crc_input.read_u8()? as u32);
    }
    if read_16bit_sr {
        sample_rate = Some(crc_input.read_be_u16()? as u32);
    }
    if read_16bit_sr_ten {
        sample_rate = Some(crc_input.read_be_u16()? as u32 * 10);
    }

    let computed_crc = crc_input.crc();
    let presumed_crc = crc_input.read_u8()?;
    if computed_crc != presumed_crc {
        return Err(Error::FormatError("frame header CRC-8 mismatch"));
    }

    Ok(FrameHeader {
        blocksize: block_size,
        sample_rate,
        channel_assignment,
        bits_per_sample,
        number_type,
        number,
    })
}

/// Writes a frame header, using raw (unencoded) block size / sample rate
/// fields rather than the compact lookup codes, which is always legal
/// (§3.1 reserves the lookup codes as a size optimization, not a
/// requirement) and keeps the encoder simple.
pub fn write_frame_header(writer: &mut BitWriter, header: &FrameHeader) -> Result<()> {
    let variable_blocksize = header.number_type == NumberType::Sample;
    let sync_res_block: u16 = 0b1111_1111_1111_1000 | if variable_blocksize { 1 } else { 0 };
    writer.write_raw_u32(sync_res_block as u32, 16)?;

    // Always use the "read 16-bit value from end of header" escape codes for
    // block size and sample rate: 0110/0111 for block size, 1101 for rate.
    writer.write_raw_u32(0b0111, 4)?;
    writer.write_raw_u32(if header.sample_rate.is_some() { 0b1101 } else { 0b0000 }, 4)?;

    let channel_bits = match header.channel_assignment {
        ChannelAssignment::Independent(n) => (n - 1) as u32,
        ChannelAssignment::LeftSide => 0b1000,
        ChannelAssignment::RightSide => 0b1001,
        ChannelAssignment::MidSide => 0b1010,
    };
    writer.write_raw_u32(channel_bits, 4)?;

    let bps_bits = match header.bits_per_sample {
        None => 0b000,
        Some(8) => 0b001,
        Some(12) => 0b010,
        Some(16) => 0b100,
        Some(20) => 0b101,
        Some(24) => 0b110,
        Some(_) => 0b000,
    };
    writer.write_raw_u32(bps_bits, 3)?;
    writer.write_raw_u32(0, 1)?;

    write_var_length_int(writer, header.number)?;

    if header.blocksize == 0 || header.blocksize > 0xffff + 1 {
        return Err(Error::FormatError("block size out of range"));
    }
    writer.write_raw_u32(header.blocksize - 1, 16)?;

    if let Some(rate) = header.sample_rate {
        writer.write_raw_u32(rate, 16)?;
    }

    let crc8 = writer.get_write_crc8()?;
    writer.write_raw_u32(crc8 as u32, 8)?;

    Ok(())
}

/// Converts a buffer with left samples followed by a side channel, in place,
/// to left followed by right.
pub fn decode_left_side(buffer: &mut [i32]) {
    let block_size = buffer.len() / 2;
    for i in 0..block_size {
        let left = buffer[i];
        let side = buffer[block_size + i];
        buffer[block_size + i] = left - side;
    }
}

/// Converts a buffer with a side channel followed by right samples, in
/// place, to left followed by right.
pub fn decode_right_side(buffer: &mut [i32]) {
    let block_size = buffer.len() / 2;
    for i in 0..block_size {
        let side = buffer[i];
        let right = buffer[block_size + i];
        buffer[i] = side + right;
    }
}

/// Converts a buffer with mid samples followed by a side channel, in place,
/// to left followed by right.
///
/// The LSB carry (`(mid << 1) | (side & 1)`) is required because the
/// encoder computed `mid` with an arithmetic right shift, which truncates
/// when `L + R` is odd.
pub fn decode_mid_side(buffer: &mut [i32]) {
    let block_size = buffer.len() / 2;
    for i in 0..block_size {
        let mid = buffer[i];
        let side = buffer[block_size + i];
        let mid2 = (mid << 1) | (side & 1);
        buffer[i] = (mid2 + side) >> 1;
        buffer[block_size + i] = (mid2 - side) >> 1;
    }
}

/// Decodes all subframes of a frame whose header has already been read, and
/// applies the inverse channel assignment, yielding `channels` planar
/// buffers of `blocksize` samples each.
pub fn decode_subframes<R: io::Read>(
    reader: &mut BitReader<R>,
    header: &FrameHeader,
    stream_bps: u32,
) -> Result<Vec<Vec<i32>>> {
    let bps = header.bits_per_sample.unwrap_or(stream_bps);
    let bs = header.blocksize;

    let channels = match header.channel_assignment {
        ChannelAssignment::Independent(n) => {
            let mut out = Vec::with_capacity(n as usize);
            for _ in 0..n {
                out.push(subframe::decode_subframe(reader, bps, bs)?);
            }
            out
        }
        ChannelAssignment::LeftSide => {
            let mut left = subframe::decode_subframe(reader, bps, bs)?;
            let side = subframe::decode_subframe(reader, bps + 1, bs)?;
            let mut combined = left.clone();
            combined.extend(side);
            decode_left_side(&mut combined);
            left.copy_from_slice(&combined[..bs as usize]);
            let right = combined[bs as usize..].to_vec();
            vec![left, right]
        }
        ChannelAssignment::RightSide => {
            let side = subframe::decode_subframe(reader, bps + 1, bs)?;
            let right = subframe::decode_subframe(reader, bps, bs)?;
            let mut combined = side;
            combined.extend(right);
            decode_right_side(&mut combined);
            let left = combined[..bs as usize].to_vec();
            let right = combined[bs as usize..].to_vec();
            vec![left, right]
        }
        ChannelAssignment::MidSide => {
            let mid = subframe::decode_subframe(reader, bps, bs)?;
            let side = subframe::decode_subframe(reader, bps + 1, bs)?;
            let mut combined = mid;
            combined.extend(side);
            decode_mid_side(&mut combined);
            let left = combined[..bs as usize].to_vec();
            let right = combined[bs as usize..].to_vec();
            vec![left, right]
        }
    };

    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_side_round_trips() {
        let mut buffer = vec![2i32, 5, 83, 113, 7, 38, 142, 238];
        let expected_right = vec![-5i32, -33, -59, -125];
        decode_left_side(&mut buffer);
        assert_eq!(&buffer[4..], &expected_right[..]);
    }

    #[test]
    fn mid_side_handles_odd_sum() {
        // L=3, R=2 => mid = (3+2)>>1 = 2, side = 3-2 = 1.
        let mut buffer = vec![2i32, 1];
        decode_mid_side(&mut buffer);
        assert_eq!(buffer, vec![3, 2]);
    }

    #[test]
    fn var_length_int_round_trips_through_writer() {
        let mut writer = BitWriter::new();
        write_var_length_int(&mut writer, 0x20ac).unwrap();
        let (buf, len) = writer.get_buffer();
        let mut cursor = io::Cursor::new(buf[..len].to_vec());
        assert_eq!(read_var_length_int(&mut cursor).unwrap(), 0x20ac);
    }
}
