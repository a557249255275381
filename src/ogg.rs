// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The Ogg FLAC mapping boundary of §6.4: a `0x7F 'FLAC'` identification
//! packet carrying the mapping version and STREAMINFO, one Ogg packet per
//! remaining metadata block, and one packet per audio frame. Ogg page and
//! packet framing itself is handled by the `ogg` crate; this module only
//! builds and parses the FLAC-specific packet payloads. See
//! <https://xiph.org/flac/ogg_mapping.html>.
//!
//! Ogg container multiplexing beyond this boundary (chained streams, skeleton
//! tracks, proportional-then-binary seek search) is not implemented; callers
//! who need that should drive the `ogg` crate directly and use this module
//! only for the packet payloads.

use std::io;
use std::io::Read as _;

use ogg::{PacketReader, PacketWriteEndInfo, PacketWriter};

use crate::decoder::{DecodedFrame, StreamDecoder};
use crate::encoder::write_metadata_block;
use crate::error::{fmt_err, Error, Result};
use crate::input::ReadBytes;
use crate::metadata::{self, BlockHeader, BlockType, MetadataBlock, StreamInfo};
use crate::output::BitWriter;

const OGG_FLAC_MAGIC: [u8; 5] = [0x7f, b'F', b'L', b'A', b'C'];
const MAPPING_VERSION_MAJOR: u32 = 1;
const MAPPING_VERSION_MINOR: u32 = 0;

fn write_err<E>(_e: E) -> Error {
    Error::Unsupported("failed to write an Ogg packet")
}

fn read_err<E>(_e: E) -> Error {
    Error::Unsupported("failed to read an Ogg packet")
}

/// Builds the FLAC-to-Ogg identification packet: the `0x7F 'FLAC'` magic,
/// the mapping version, a 16-bit count of metadata packets still to come,
/// and the native `fLaC` marker plus STREAMINFO block.
fn build_identification_packet(streaminfo: &StreamInfo, num_header_packets: u16) -> Result<Vec<u8>> {
    let mut w = BitWriter::new();
    w.write_byte_block(&OGG_FLAC_MAGIC)?;
    w.write_raw_u32(MAPPING_VERSION_MAJOR, 8)?;
    w.write_raw_u32(MAPPING_VERSION_MINOR, 8)?;
    w.write_raw_u32(num_header_packets as u32, 16)?;
    w.write_byte_block(b"fLaC")?;
    metadata::write_block_header(
        &mut w,
        &BlockHeader { is_last: num_header_packets == 0, block_type: BlockType::StreamInfo, length: 34 },
    )?;
    metadata::write_streaminfo_block(&mut w, streaminfo)?;
    let (bytes, len) = w.get_buffer();
    Ok(bytes[..len].to_vec())
}

/// Parses the identification packet back into its STREAMINFO and the count
/// of metadata packets that follow.
fn parse_identification_packet(data: &[u8]) -> Result<(StreamInfo, u16)> {
    let mut cursor = io::Cursor::new(data);
    let mut magic = [0u8; 5];
    cursor.read_exact(&mut magic)?;
    if magic != OGG_FLAC_MAGIC {
        return fmt_err("Ogg FLAC identification packet has the wrong magic bytes");
    }
    cursor.read_u8()?; // mapping version major, not validated
    cursor.read_u8()?; // mapping version minor, not validated
    let num_header_packets = cursor.read_be_u16()?;
    let mut native_marker = [0u8; 4];
    cursor.read_exact(&mut native_marker)?;
    if &native_marker != b"fLaC" {
        return fmt_err("Ogg FLAC identification packet is missing the native fLaC marker");
    }
    let header = metadata::read_block_header(&mut cursor)?;
    if header.block_type != BlockType::StreamInfo {
        return fmt_err("Ogg FLAC identification packet's embedded block is not STREAMINFO");
    }
    let streaminfo = metadata::read_streaminfo_block(&mut cursor)?;
    Ok((streaminfo, num_header_packets))
}

/// Writes a FLAC stream's header chain and audio frames as Ogg packets.
///
/// `W` need only implement `io::Write`; unlike [`crate::encoder::StreamEncoder`],
/// this does not itself run the subframe search — callers produce frame bytes
/// (for instance by copying them out of a `StreamEncoder` one frame at a time)
/// and pass them to [`OggWriter::write_frame`].
pub struct OggWriter<W: io::Write> {
    packets: PacketWriter<W>,
    serial: u32,
}

impl<W: io::Write> OggWriter<W> {
    /// Writes the identification packet and one packet per entry of
    /// `metadata`, ending the header page after the last header packet.
    pub fn new(writer: W, serial: u32, streaminfo: &StreamInfo, metadata: &[MetadataBlock]) -> Result<OggWriter<W>> {
        let mut packets = PacketWriter::new(writer);

        let identification = build_identification_packet(streaminfo, metadata.len() as u16)?;
        let only_header = metadata.is_empty();
        packets
            .write_packet(identification, serial, header_packet_end(only_header), 0)
            .map_err(write_err)?;

        for (i, block) in metadata.iter().enumerate() {
            let is_last = i + 1 == metadata.len();
            let mut w = BitWriter::new();
            write_metadata_block(&mut w, block, is_last)?;
            let (bytes, len) = w.get_buffer();
            packets.write_packet(bytes[..len].to_vec(), serial, header_packet_end(is_last), 0).map_err(write_err)?;
        }

        Ok(OggWriter { packets, serial })
    }

    /// Writes one native FLAC frame (sync code through footer CRC-16) as its
    /// own Ogg packet. `granule_position` is the total sample count up to and
    /// including this frame, per the mapping's use of the Ogg granule position
    /// as an absolute sample position.
    pub fn write_frame(&mut self, frame_bytes: &[u8], granule_position: u64, end_of_stream: bool) -> Result<()> {
        let end = if end_of_stream { PacketWriteEndInfo::EndStream } else { PacketWriteEndInfo::NormalPacket };
        self.packets.write_packet(frame_bytes.to_vec(), self.serial, end, granule_position).map_err(write_err)
    }
}

fn header_packet_end(is_last: bool) -> PacketWriteEndInfo {
    if is_last {
        PacketWriteEndInfo::EndPage
    } else {
        PacketWriteEndInfo::NormalPacket
    }
}

/// Reads a FLAC stream's header chain and audio frames out of Ogg packets.
pub struct OggReader<R: io::Read> {
    packets: PacketReader<R>,
    streaminfo: StreamInfo,
}

impl<R: io::Read> OggReader<R> {
    /// Reads the identification packet and every following header packet,
    /// parsing (and discarding) each metadata block just to validate it.
    /// Returns the reader positioned at the first audio frame packet.
    pub fn new(reader: R) -> Result<(OggReader<R>, StreamInfo, Vec<MetadataBlock>)> {
        let mut packets = PacketReader::new(reader);

        let first = packets.read_packet_expected().map_err(read_err)?;
        let (streaminfo, num_header_packets) = parse_identification_packet(&first.data)?;

        let mut metadata = Vec::with_capacity(num_header_packets as usize);
        for _ in 0..num_header_packets {
            let packet = packets.read_packet_expected().map_err(read_err)?;
            let mut cursor = io::Cursor::new(&packet.data);
            let header = metadata::read_block_header(&mut cursor)?;
            metadata.push(metadata::read_metadata_block(&mut cursor, &header)?);
        }

        Ok((OggReader { packets, streaminfo }, streaminfo, metadata))
    }

    pub fn streaminfo(&self) -> &StreamInfo {
        &self.streaminfo
    }

    /// Reads and decodes the next audio frame packet, skipping empty packets
    /// (observed in the wild as a trailing artifact of some encoders).
    pub fn next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        loop {
            let packet = match self.packets.read_packet().map_err(read_err)? {
                Some(p) => p,
                None => return Ok(None),
            };
            if packet.data.is_empty() {
                continue;
            }
            return Ok(Some(decode_frame_packet(&self.streaminfo, &packet.data)?));
        }
    }
}

/// Decodes one Ogg packet's worth of raw frame bytes by synthesizing a
/// minimal single-frame native stream around them and running it through the
/// regular frame decoder, mirroring how [`crate::encoder::StreamEncoder`]'s
/// verify pass decodes a just-written frame.
fn decode_frame_packet(streaminfo: &StreamInfo, frame_bytes: &[u8]) -> Result<DecodedFrame> {
    let mut w = BitWriter::new();
    w.write_byte_block(b"fLaC")?;
    metadata::write_block_header(&mut w, &BlockHeader { is_last: true, block_type: BlockType::StreamInfo, length: 34 })?;
    metadata::write_streaminfo_block(&mut w, streaminfo)?;
    let (prefix, prefix_len) = w.get_buffer();
    let mut synthetic = prefix[..prefix_len].to_vec();
    synthetic.extend_from_slice(frame_bytes);

    let mut decoder = StreamDecoder::new(io::Cursor::new(synthetic))?;
    match decoder.decode_frame()? {
        Some(frame) => Ok(frame),
        None => fmt_err("Ogg packet did not contain a decodable FLAC frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ChannelAssignment;
    use crate::frame::{self, FrameHeader, NumberType};
    use crate::subframe::{self, Subframe};

    fn write_one_verbatim_frame(samples: &[i32], bps: u32) -> Vec<u8> {
        let mut writer = BitWriter::new();
        let header = FrameHeader {
            blocksize: samples.len() as u32,
            sample_rate: None,
            channel_assignment: ChannelAssignment::Independent(1),
            bits_per_sample: None,
            number_type: NumberType::Frame,
            number: 0,
        };
        frame::write_frame_header(&mut writer, &header).unwrap();
        let subframe = Subframe::Verbatim { data: samples.to_vec() };
        subframe::encode_subframe(&mut writer, &subframe, bps, 0).unwrap();
        writer.zero_pad_to_byte_boundary().unwrap();
        let crc16 = writer.get_write_crc16().unwrap();
        writer.write_raw_u32(crc16 as u32, 16).unwrap();
        let (bytes, len) = writer.get_buffer();
        bytes[..len].to_vec()
    }

    fn test_streaminfo(n: usize) -> StreamInfo {
        StreamInfo {
            min_block_size: n as u16,
            max_block_size: n as u16,
            min_frame_size: None,
            max_frame_size: None,
            sample_rate: 44100,
            channels: 1,
            bits_per_sample: 16,
            samples: Some(n as u64),
            md5sum: [0u8; 16],
        }
    }

    #[test]
    fn identification_packet_round_trips() {
        let info = test_streaminfo(4096);
        let packet = build_identification_packet(&info, 2).unwrap();
        let (parsed, num_header_packets) = parse_identification_packet(&packet).unwrap();
        assert_eq!(parsed.sample_rate, info.sample_rate);
        assert_eq!(parsed.channels, info.channels);
        assert_eq!(num_header_packets, 2);
    }

    #[test]
    fn writes_and_reads_back_a_single_frame_stream() {
        let samples = [1, -2, 3, -4, 5, -6, 7, -8];
        let info = test_streaminfo(samples.len());

        let mut buffer = Vec::new();
        {
            let mut writer = OggWriter::new(&mut buffer, 0x1234, &info, &[]).unwrap();
            let frame_bytes = write_one_verbatim_frame(&samples, 16);
            writer.write_frame(&frame_bytes, samples.len() as u64, true).unwrap();
        }

        let (mut reader, streaminfo, metadata) = OggReader::new(io::Cursor::new(buffer)).unwrap();
        assert_eq!(streaminfo.sample_rate, 44100);
        assert!(metadata.is_empty());

        let frame = reader.next_frame().unwrap().expect("one frame");
        assert_eq!(frame.samples, vec![samples.to_vec()]);
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn rejects_a_packet_with_the_wrong_magic() {
        let bytes = vec![0u8; 32];
        assert!(parse_identification_packet(&bytes).is_err());
    }
}
