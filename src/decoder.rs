// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `decoder` module implements [`StreamDecoder`], the state machine that
//! turns a FLAC stream into decoded sample blocks: consuming the stream
//! marker and metadata chain, then repeatedly locating a frame sync,
//! decoding its subframes, and verifying the frame footer CRC-16.

use std::io;

use log::warn;

use crate::crc;
use crate::error::{fmt_err, Error, Result, State};
use crate::format;
use crate::frame::{self, FrameHeader};
use crate::input::{BitReader, ReadBytes};
use crate::md5;
use crate::metadata::{self, MetadataBlock, MetadataIter, SeekTable, StreamInfo};

/// Caps the number of consecutive resyncs `decode_frame` will attempt before
/// giving up and reporting [`State::Aborted`]; a stream that is all garbage
/// would otherwise spin forever re-searching for a sync code.
const MAX_CONSECUTIVE_RESYNCS: u32 = 4096;

/// Caps the number of probes `seek_absolute`'s proportional/binary search
/// will perform before giving up, per the 20-consecutive-failure guard of
/// the seek algorithm.
const MAX_SEEK_ATTEMPTS: u32 = 64;
const MAX_CONSECUTIVE_SEEK_FAILURES: u32 = 20;

/// One decoded frame: its header plus one sample vector per channel.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub header: FrameHeader,
    pub samples: Vec<Vec<i32>>,
}

/// Reads a FLAC stream frame by frame.
///
/// `R` need only implement `io::Read` for sequential decoding; `seek_absolute`
/// is available through a second `impl` block when `R` also implements
/// `io::Seek`.
pub struct StreamDecoder<R> {
    reader: R,
    state: State,
    streaminfo: StreamInfo,
    seektable: Option<SeekTable>,
    metadata: Vec<MetadataBlock>,
    md5: Option<md5::Md5Writer>,
    current_sample: u64,
    /// Byte offset of the first frame, measured from the start of the
    /// stream (after the `"fLaC"` marker and the ID3v2 tag, if any).
    first_frame_offset: u64,
}

/// A reader that counts the bytes it passes through, used only to measure
/// `first_frame_offset` without requiring `R: io::Seek`.
struct CountingReader<'r, R: 'r> {
    reader: &'r mut R,
    count: u64,
}

impl<'r, R: io::Read> io::Read for CountingReader<'r, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// A reader that copies every byte it yields into an owned buffer, used to
/// recover the raw bytes of a frame header after the fact so its CRC-16 can
/// be folded into the `BitReader` that decodes the subframes that follow it.
struct TeeReader<'r, R: 'r> {
    reader: &'r mut R,
    buf: Vec<u8>,
}

impl<'r, R: io::Read> TeeReader<'r, R> {
    fn new(reader: &'r mut R) -> TeeReader<'r, R> {
        TeeReader { reader, buf: Vec::new() }
    }
}

impl<'r, R: io::Read> io::Read for TeeReader<'r, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(out)?;
        self.buf.extend_from_slice(&out[..n]);
        Ok(n)
    }
}

/// Reads a byte, translating an EOF at the very start of a read into `None`
/// rather than an error, so sync search can distinguish "clean end of
/// stream" from a read that failed partway through a multi-byte field.
fn try_read_u8<R: io::Read>(reader: &mut R) -> Result<Option<u8>> {
    let mut buf = [0u8; 1];
    match reader.read(&mut buf) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(buf[0])),
        Err(e) => Err(Error::IoError(e)),
    }
}

/// Consumes the stream marker at the current reader position: an optional
/// ID3v2 tag (some encoders and taggers prepend one, even though it has no
/// place in the FLAC format proper) followed by the mandatory `"fLaC"` bytes.
fn consume_stream_marker<R: io::Read>(reader: &mut R) -> Result<()> {
    let mut marker = [0u8; 4];
    reader.read_exact(&mut marker)?;

    if &marker[0..3] == b"ID3" {
        // ID3v2 header: "ID3", major version, minor version, flags, then a
        // 4-byte synchsafe (7 bits significant per byte) tag size.
        let mut rest = [0u8; 6];
        reader.read_exact(&mut rest)?;
        let size = ((rest[2] as u32 & 0x7f) << 21)
            | ((rest[3] as u32 & 0x7f) << 14)
            | ((rest[4] as u32 & 0x7f) << 7)
            | (rest[5] as u32 & 0x7f);
        let mut remaining = size as usize;
        let mut scratch = [0u8; 1024];
        while remaining > 0 {
            let chunk = remaining.min(scratch.len());
            reader.read_exact(&mut scratch[..chunk])?;
            remaining -= chunk;
        }
        return consume_stream_marker(reader);
    }

    if u32::from_be_bytes(marker) != format::STREAM_SYNC {
        return fmt_err("missing 'fLaC' stream marker");
    }

    Ok(())
}

impl<R: io::Read> StreamDecoder<R> {
    /// Opens a FLAC stream: consumes the stream marker and the full metadata
    /// chain, then leaves the reader positioned at the first frame.
    pub fn new(mut reader: R) -> Result<StreamDecoder<R>> {
        let mut streaminfo = None;
        let mut metadata = Vec::new();
        let mut seektable = None;

        let first_frame_offset = {
            let mut counting = CountingReader { reader: &mut reader, count: 0 };
            consume_stream_marker(&mut counting)?;

            let mut iter = MetadataIter::new(&mut counting);
            for item in &mut iter {
                let (_header, block) = item?;
                match block {
                    MetadataBlock::StreamInfo(info) => streaminfo = Some(info),
                    MetadataBlock::SeekTable(ref table) => {
                        seektable = Some(table.clone());
                        metadata.push(block);
                    }
                    other => metadata.push(other),
                }
            }

            counting.count
        };

        let streaminfo = match streaminfo {
            Some(info) => info,
            None => return fmt_err("stream is missing its STREAMINFO block"),
        };

        let do_md5 = streaminfo.md5sum != [0u8; 16];

        Ok(StreamDecoder {
            reader,
            state: State::Ok,
            streaminfo,
            seektable,
            metadata,
            md5: if do_md5 { Some(md5::Md5Writer::new()) } else { None },
            current_sample: 0,
            first_frame_offset,
        })
    }

    pub fn streaminfo(&self) -> &StreamInfo {
        &self.streaminfo
    }

    pub fn metadata(&self) -> &[MetadataBlock] {
        &self.metadata
    }

    pub fn seektable(&self) -> Option<&SeekTable> {
        self.seektable.as_ref()
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The number of inter-channel samples decoded so far.
    pub fn current_sample(&self) -> u64 {
        self.current_sample
    }

    /// Releases the decoder and returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Scans forward for the next frame sync code (`0xFFF8`..`0xFFFB`).
    ///
    /// Returns `Ok(None)` at a clean end of stream (no further sync found
    /// after at least one byte could be read), matching the natural
    /// termination of a well-formed file.
    fn find_sync(&mut self) -> Result<Option<[u8; 2]>> {
        let mut byte0 = match try_read_u8(&mut self.reader)? {
            None => return Ok(None),
            Some(b) => b,
        };

        loop {
            let byte1 = match try_read_u8(&mut self.reader)? {
                None => return Ok(None),
                Some(b) => b,
            };

            if byte0 == 0xff && (byte1 & 0b1111_1100) == 0b1111_1000 {
                return Ok(Some([byte0, byte1]));
            }

            byte0 = byte1;
        }
    }

    /// Decodes the next frame, or returns `None` at a clean end of stream.
    ///
    /// Recoverable problems (a corrupt header, an unparseable subframe, a
    /// nonzero padding bit, or a frame CRC-16 mismatch) are logged and
    /// decoding resumes from the next sync search rather than failing the
    /// whole stream, mirroring how the reference decoder reports them
    /// through its error callback and keeps going.
    pub fn decode_frame(&mut self) -> Result<Option<DecodedFrame>> {
        let mut resyncs = 0u32;

        loop {
            let sync = match self.find_sync() {
                Ok(None) => return Ok(None),
                Ok(Some(s)) => s,
                Err(e) => {
                    self.state = State::IoError;
                    return Err(e);
                }
            };

            let header_bytes;
            let header;
            {
                let mut tee = TeeReader::new(&mut self.reader);
                let mut chained = io::Cursor::new(sync).chain(&mut tee);
                match frame::read_frame_header(&mut chained) {
                    Ok(h) => header = h,
                    Err(Error::FormatError(msg)) => {
                        warn!("lost sync, bad frame header: {}", msg);
                        resyncs += 1;
                        if resyncs > MAX_CONSECUTIVE_RESYNCS {
                            self.state = State::Aborted;
                            return fmt_err("too many consecutive resyncs while decoding");
                        }
                        continue;
                    }
                    Err(e) => {
                        self.state = State::IoError;
                        return Err(e);
                    }
                }

                let mut bytes = sync.to_vec();
                bytes.extend_from_slice(&tee.buf);
                header_bytes = bytes;
            }

            let seed = crc::crc16(&header_bytes);
            let mut bit_reader = BitReader::new(&mut self.reader);
            bit_reader.reset_read_crc16(seed);

            let mut channel_samples =
                match frame::decode_subframes(&mut bit_reader, &header, self.streaminfo.bits_per_sample) {
                    Ok(s) => s,
                    Err(Error::FormatError(msg)) => {
                        warn!("unparseable frame, resyncing: {}", msg);
                        resyncs += 1;
                        if resyncs > MAX_CONSECUTIVE_RESYNCS {
                            self.state = State::Aborted;
                            return fmt_err("too many consecutive resyncs while decoding");
                        }
                        continue;
                    }
                    Err(e) => {
                        self.state = State::IoError;
                        return Err(e);
                    }
                };

            let pad_bits = bit_reader.bits_left_for_byte_alignment();
            let padding_is_zero = if pad_bits > 0 { bit_reader.read_raw_u32(pad_bits)? == 0 } else { true };

            if !padding_is_zero {
                warn!("nonzero frame padding, lost sync");
                resyncs += 1;
                if resyncs > MAX_CONSECUTIVE_RESYNCS {
                    self.state = State::Aborted;
                    return fmt_err("too many consecutive resyncs while decoding");
                }
                continue;
            }

            let computed_crc = bit_reader.get_read_crc16();
            let footer_crc = bit_reader.read_raw_u32(16)? as u16;

            if computed_crc != footer_crc {
                warn!(
                    "frame CRC-16 mismatch (computed {:#06x}, stored {:#06x}), zeroing frame",
                    computed_crc, footer_crc
                );
                for channel in channel_samples.iter_mut() {
                    for sample in channel.iter_mut() {
                        *sample = 0;
                    }
                }
            }

            if let Some(md5) = self.md5.as_mut() {
                let bytes_per_sample = (self.streaminfo.bits_per_sample + 7) / 8;
                let n = header.blocksize as usize;
                let mut interleaved = Vec::with_capacity(n * channel_samples.len());
                for i in 0..n {
                    for channel in &channel_samples {
                        interleaved.push(channel[i]);
                    }
                }
                let mut bytes = Vec::with_capacity(interleaved.len() * bytes_per_sample as usize);
                md5::push_sample_frame(&mut bytes, &interleaved, bytes_per_sample);
                md5.write(&bytes);
            }

            self.current_sample += header.blocksize as u64;

            return Ok(Some(DecodedFrame { header, samples: channel_samples }));
        }
    }

    /// Finalizes MD5 accumulation and compares it against STREAMINFO's
    /// stored checksum.
    ///
    /// Per §7, a STREAMINFO MD5 of all zeroes means the encoder chose not to
    /// compute one; that case is silently skipped rather than reported as a
    /// mismatch.
    pub fn finish(self) -> Result<()> {
        if let Some(md5) = self.md5 {
            let digest = md5.finish();
            if digest != self.streaminfo.md5sum {
                return fmt_err("decoded audio does not match the stream's MD5 signature");
            }
        }
        Ok(())
    }
}

impl<R: io::Read + io::Seek> StreamDecoder<R> {
    /// Seeks so that the next call to `decode_frame` returns the frame
    /// containing `target_sample`.
    ///
    /// Implements the proportional-then-binary search of §4.8.3: the seek
    /// table (if present) narrows the byte range first, then repeated probe
    /// decodes bisect the remaining range until a frame covering the target
    /// sample is found.
    pub fn seek_absolute(&mut self, target_sample: u64) -> Result<()> {
        let stream_end = self.reader.seek(io::SeekFrom::End(0))?;
        let total_samples = self.streaminfo.samples.unwrap_or(target_sample + 1).max(target_sample + 1);

        let mut lo_pos = self.first_frame_offset;
        let mut hi_pos = stream_end;
        let mut lo_sample = 0u64;
        let mut hi_sample = total_samples;

        if let Some(table) = self.seektable.clone() {
            for point in &table.points {
                if point.is_placeholder() {
                    continue;
                }
                if point.sample_number <= target_sample && point.sample_number >= lo_sample {
                    lo_sample = point.sample_number;
                    lo_pos = self.first_frame_offset + point.stream_offset;
                }
                if point.sample_number > target_sample && point.sample_number < hi_sample {
                    hi_sample = point.sample_number;
                    hi_pos = self.first_frame_offset + point.stream_offset;
                }
            }
        }

        let mut consecutive_failures = 0u32;
        let approx_frame_bytes = self.streaminfo.max_frame_size.unwrap_or(16 * 1024) as u64;

        for _ in 0..MAX_SEEK_ATTEMPTS {
            if hi_sample <= lo_sample || lo_pos >= hi_pos {
                break;
            }

            let span = (hi_sample - lo_sample).max(1) as f64;
            let frac = (target_sample.saturating_sub(lo_sample)) as f64 / span;
            let guess = lo_pos + (frac * (hi_pos - lo_pos) as f64) as u64;
            let probe_pos = guess.saturating_sub(approx_frame_bytes).clamp(lo_pos, hi_pos.saturating_sub(1));

            self.reader.seek(io::SeekFrom::Start(probe_pos))?;

            match self.decode_frame() {
                Ok(Some(frame)) => {
                    consecutive_failures = 0;
                    let frame_start = self.current_sample - frame.header.blocksize as u64;
                    let frame_end = self.current_sample;

                    if frame_start <= target_sample && target_sample < frame_end {
                        return Ok(());
                    } else if frame_start > target_sample {
                        hi_sample = frame_start;
                        hi_pos = probe_pos;
                    } else {
                        let post_frame_pos = self.reader.seek(io::SeekFrom::Current(0))?;
                        lo_sample = frame_end;
                        lo_pos = post_frame_pos;
                    }
                }
                Ok(None) => {
                    hi_pos = probe_pos;
                }
                Err(_) => {
                    consecutive_failures += 1;
                    if consecutive_failures > MAX_CONSECUTIVE_SEEK_FAILURES {
                        self.state = State::SeekError;
                        return fmt_err("seek aborted after too many unparseable probes");
                    }
                }
            }
        }

        self.state = State::SeekError;
        fmt_err("seek did not converge within the attempt budget")
    }

    /// Resets the decoder to the first frame, as if freshly opened.
    pub fn reset(&mut self) -> Result<()> {
        self.reader.seek(io::SeekFrom::Start(self.first_frame_offset))?;
        self.current_sample = 0;
        self.state = State::Ok;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ChannelAssignment;
    use crate::frame::NumberType;
    use crate::metadata::{write_block_header, write_streaminfo_block, BlockHeader, BlockType};
    use crate::output::BitWriter;
    use crate::subframe::{self, Subframe};

    fn write_minimal_stream(samples: &[i32], bps: u32) -> Vec<u8> {
        let info = StreamInfo {
            min_block_size: samples.len() as u16,
            max_block_size: samples.len() as u16,
            min_frame_size: None,
            max_frame_size: None,
            sample_rate: 44100,
            channels: 1,
            bits_per_sample: bps,
            samples: Some(samples.len() as u64),
            md5sum: [0u8; 16],
        };

        let mut writer = BitWriter::new();
        writer.write_byte_block(b"fLaC").unwrap();
        write_block_header(&mut writer, &BlockHeader { is_last: true, block_type: BlockType::StreamInfo, length: 34 })
            .unwrap();
        write_streaminfo_block(&mut writer, &info).unwrap();

        let frame_start = writer.get_buffer().1;

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

        let crc = {
            let (bytes, len) = writer.get_buffer();
            crc::crc16(&bytes[frame_start..len])
        };
        writer.write_raw_u32(crc as u32, 16).unwrap();

        let (bytes, len) = writer.get_buffer();
        bytes[..len].to_vec()
    }

    #[test]
    fn decodes_a_single_verbatim_frame() {
        let samples = [1, -2, 3, -4, 5, -6, 7, -8];
        let bytes = write_minimal_stream(&samples, 16);
        let mut decoder = StreamDecoder::new(io::Cursor::new(bytes)).unwrap();
        assert_eq!(decoder.streaminfo().channels, 1);

        let frame = decoder.decode_frame().unwrap().expect("one frame");
        assert_eq!(frame.samples, vec![samples.to_vec()]);
        assert!(decoder.decode_frame().unwrap().is_none());
    }

    #[test]
    fn rejects_a_stream_missing_its_marker() {
        let bytes = vec![0u8; 16];
        assert!(StreamDecoder::new(io::Cursor::new(bytes)).is_err());
    }

    #[test]
    fn skips_a_leading_id3v2_tag() {
        let mut bytes = vec![b'I', b'D', b'3', 3, 0, 0, 0, 0, 0, 4];
        bytes.extend_from_slice(&[0u8; 4]); // 4-byte ID3 tag body, synchsafe size above.
        bytes.extend_from_slice(&write_minimal_stream(&[0, 1, 2, 3], 16));
        let decoder = StreamDecoder::new(io::Cursor::new(bytes)).unwrap();
        assert_eq!(decoder.streaminfo().bits_per_sample, 16);
    }
}
