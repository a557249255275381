// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `encoder` module implements [`StreamEncoder`], the state machine that
//! turns buffered PCM into a FLAC stream: subframe candidate evaluation
//! (CONSTANT/VERBATIM/FIXED/LPC), channel-assignment selection, and metadata
//! emission, with a fixed compression-level preset table driving the search.

use std::io;

use log::warn;

use crate::crc;
use crate::decoder::StreamDecoder;
use crate::error::{fmt_err, Error, Result, State, VerifyMismatch};
use crate::fixed;
use crate::format::{self, ChannelAssignment};
use crate::frame::{self, FrameHeader, NumberType};
use crate::lpc::{self, Apodization};
use crate::md5;
use crate::metadata::{self, BlockHeader, BlockType, MetadataBlock, StreamInfo};
use crate::output::BitWriter;
use crate::presets;
use crate::rice;
use crate::subframe::{self, EntropyMethod, Subframe};

/// Byte offset of the STREAMINFO block's body, counted from the start of the
/// stream: 4 bytes of `"fLaC"` marker plus the 4-byte metadata block header
/// that precedes every block body.
const STREAMINFO_BODY_OFFSET: u64 = 8;

/// Configuration for a [`StreamEncoder`], valid only before the encoder is
/// constructed (there is no running "set config" call once encoding starts,
/// mirroring §3.4's "all setters are valid only in the uninitialized state").
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub verify: bool,
    pub streamable_subset: bool,
    pub do_md5: bool,
    pub channels: u32,
    pub bits_per_sample: u32,
    pub sample_rate: u32,
    /// `0..=8`; out-of-range values are clamped by [`presets::get`].
    pub compression_level: u32,
    /// `0` means "auto": 1152 if `max_lpc_order == 0`, else 4096.
    pub blocksize: u32,
    pub do_mid_side_stereo: bool,
    pub loose_mid_side_stereo: bool,
    /// `;`-separated apodization window spec, parsed by [`lpc::parse_apodizations`].
    pub apodization: String,
    pub max_lpc_order: u32,
    /// `0` means "auto", resolved via [`presets::auto_qlp_precision`].
    pub qlp_coeff_precision: u32,
    pub do_qlp_coeff_prec_search: bool,
    pub do_escape_coding: bool,
    pub do_exhaustive_model_search: bool,
    pub min_residual_partition_order: u32,
    pub max_residual_partition_order: u32,
    pub total_samples_estimate: Option<u64>,
    pub metadata: Vec<MetadataBlock>,
}

impl EncoderConfig {
    /// A config for `channels`/`bits_per_sample`/`sample_rate`, with every
    /// other knob taken from compression level 5.
    pub fn new(channels: u32, bits_per_sample: u32, sample_rate: u32) -> EncoderConfig {
        let mut config = EncoderConfig {
            verify: false,
            streamable_subset: false,
            do_md5: true,
            channels,
            bits_per_sample,
            sample_rate,
            compression_level: 5,
            blocksize: 0,
            do_mid_side_stereo: false,
            loose_mid_side_stereo: false,
            apodization: String::new(),
            max_lpc_order: 0,
            qlp_coeff_precision: 0,
            do_qlp_coeff_prec_search: false,
            do_escape_coding: false,
            do_exhaustive_model_search: false,
            min_residual_partition_order: 0,
            max_residual_partition_order: 0,
            total_samples_estimate: None,
            metadata: Vec::new(),
        };
        config.apply_compression_level(5);
        config
    }

    /// Overwrites every preset-controlled field from `presets::get(level)`,
    /// leaving `channels`/`bits_per_sample`/`sample_rate`/`metadata`/etc alone.
    pub fn apply_compression_level(&mut self, level: u32) {
        let preset = presets::get(level);
        self.compression_level = level;
        self.do_mid_side_stereo = preset.do_mid_side;
        self.loose_mid_side_stereo = preset.loose_mid_side;
        self.max_lpc_order = preset.max_lpc_order;
        self.qlp_coeff_precision = preset.qlp_coeff_precision;
        self.do_qlp_coeff_prec_search = preset.do_qlp_coeff_prec_search;
        self.do_escape_coding = preset.do_escape_coding;
        self.do_exhaustive_model_search = preset.do_exhaustive_model_search;
        self.min_residual_partition_order = preset.min_residual_partition_order;
        self.max_residual_partition_order = preset.max_residual_partition_order;
    }

    fn validate(&self) -> Result<()> {
        format::validate_channels(self.channels)?;
        format::validate_bits_per_sample(self.bits_per_sample)?;
        if !format::sample_rate_is_valid(self.sample_rate) {
            return fmt_err("sample rate out of range");
        }
        if self.max_lpc_order > format::MAX_LPC_ORDER {
            return fmt_err("max_lpc_order out of range");
        }
        if self.qlp_coeff_precision != 0
            && !(format::MIN_QLP_PRECISION..=format::MAX_QLP_PRECISION).contains(&self.qlp_coeff_precision)
        {
            return fmt_err("qlp_coeff_precision out of range");
        }
        if self.streamable_subset && self.max_residual_partition_order > format::MAX_STREAMABLE_PARTITION_ORDER {
            return fmt_err("max_residual_partition_order exceeds the streamable subset limit");
        }
        Ok(())
    }

    fn resolved_blocksize(&self) -> u32 {
        if self.blocksize != 0 {
            self.blocksize
        } else if self.max_lpc_order == 0 {
            1152
        } else {
            4096
        }
    }
}

/// One subframe candidate, evaluated but not yet committed to the bitstream.
struct Candidate {
    subframe: Subframe,
    wasted_bits: u32,
    bits: u64,
}

/// Writes a FLAC stream from buffered PCM: subframe selection, channel
/// decorrelation, and metadata framing.
///
/// `W` need only implement `io::Write` to produce a valid stream; STREAMINFO
/// back-patching at [`StreamEncoder::finish_and_patch_streaminfo`] additionally
/// requires `io::Seek`, exactly mirroring [`crate::decoder::StreamDecoder`]'s
/// split between sequential and seekable operations.
pub struct StreamEncoder<W> {
    writer: W,
    config: EncoderConfig,
    apodizations: Vec<Apodization>,
    blocksize: u32,
    state: State,
    md5: Option<md5::Md5Writer>,

    /// One buffer per input channel, holding up to `blocksize + 1` samples
    /// (the extra slot is the mandatory one-sample overread of §4.7.2).
    channel_buffers: Vec<Vec<i32>>,
    current_sample_number: usize,

    frame_number: u64,
    samples_written: u64,
    bytes_written: u64,
    min_block_size_seen: u32,
    max_block_size_seen: u32,
    min_frame_size: Option<u32>,
    max_frame_size: Option<u32>,

    prev_assignment: Option<ChannelAssignment>,
    frames_until_reassign: u32,
    loose_mid_side_stereo_frames: u32,

    verify_mismatch: Option<VerifyMismatch>,
}

impl<W: io::Write> StreamEncoder<W> {
    /// Creates an encoder, writing the `"fLaC"` marker, a placeholder
    /// STREAMINFO block, and any metadata blocks from `config.metadata`.
    pub fn new(mut writer: W, config: EncoderConfig) -> Result<StreamEncoder<W>> {
        config.validate()?;

        let apodizations = lpc::parse_apodizations(&config.apodization)?;
        let blocksize = config.resolved_blocksize();
        if !format::block_size_is_valid(blocksize) || blocksize < config.max_lpc_order.max(1) {
            return fmt_err("blocksize is too small for the configured max LPC order");
        }

        let has_extra_metadata = !config.metadata.is_empty();
        let mut w = BitWriter::new();
        w.write_byte_block(b"fLaC")?;
        metadata::write_block_header(
            &mut w,
            &BlockHeader { is_last: !has_extra_metadata, block_type: BlockType::StreamInfo, length: 34 },
        )?;
        metadata::write_streaminfo_block(&mut w, &StreamInfo::empty())?;

        for (i, block) in config.metadata.iter().enumerate() {
            let is_last = i + 1 == config.metadata.len();
            write_metadata_block(&mut w, block, is_last)?;
        }

        let (bytes, len) = w.get_buffer();
        writer.write_all(&bytes[..len])?;
        let bytes_written = len as u64;

        let channels = config.channels as usize;

        Ok(StreamEncoder {
            apodizations,
            blocksize,
            state: State::Ok,
            md5: if config.do_md5 { Some(md5::Md5Writer::new()) } else { None },
            channel_buffers: vec![Vec::with_capacity(blocksize as usize + 1); channels],
            current_sample_number: 0,
            frame_number: 0,
            samples_written: 0,
            bytes_written,
            min_block_size_seen: u32::MAX,
            max_block_size_seen: 0,
            min_frame_size: None,
            max_frame_size: None,
            prev_assignment: None,
            frames_until_reassign: 0,
            loose_mid_side_stereo_frames: ((config.sample_rate as f64 * 0.4 / blocksize as f64).round() as u32).max(1),
            verify_mismatch: None,
            config,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn verify_mismatch(&self) -> Option<VerifyMismatch> {
        self.verify_mismatch
    }

    /// Feeds `n` interleaved sample frames (`samples.len() == n * channels`).
    pub fn process_interleaved(&mut self, samples: &[i32]) -> Result<()> {
        let channels = self.config.channels as usize;
        debug_assert_eq!(samples.len() % channels, 0);
        for frame in samples.chunks(channels) {
            self.push_sample_frame(frame)?;
        }
        Ok(())
    }

    /// Feeds `n` samples from each of `buffers` (one slice per channel, all
    /// the same length).
    pub fn process(&mut self, buffers: &[&[i32]]) -> Result<()> {
        debug_assert_eq!(buffers.len(), self.config.channels as usize);
        let n = buffers.first().map_or(0, |b| b.len());
        let mut frame = vec![0i32; buffers.len()];
        for i in 0..n {
            for (ch, buf) in buffers.iter().enumerate() {
                frame[ch] = buf[i];
            }
            self.push_sample_frame(&frame)?;
        }
        Ok(())
    }

    fn push_sample_frame(&mut self, frame: &[i32]) -> Result<()> {
        if self.state != State::Ok {
            return fmt_err("encoder is not in a usable state");
        }

        for (ch, &sample) in frame.iter().enumerate() {
            self.channel_buffers[ch].push(sample);
        }
        self.current_sample_number += 1;

        if self.current_sample_number == self.blocksize as usize + 1 {
            self.encode_frame(self.blocksize as usize)?;
            for buf in self.channel_buffers.iter_mut() {
                let overread = buf[self.blocksize as usize];
                buf.clear();
                buf.push(overread);
            }
            self.current_sample_number = 1;
        }

        Ok(())
    }

    fn encode_frame(&mut self, n: usize) -> Result<()> {
        if let Some(md5) = self.md5.as_mut() {
            let bytes_per_sample = (self.config.bits_per_sample + 7) / 8;
            let mut interleaved = Vec::with_capacity(n * self.channel_buffers.len());
            for i in 0..n {
                for buf in &self.channel_buffers {
                    interleaved.push(buf[i]);
                }
            }
            let mut bytes = Vec::with_capacity(interleaved.len() * bytes_per_sample as usize);
            md5::push_sample_frame(&mut bytes, &interleaved, bytes_per_sample);
            md5.write(&bytes);
        }

        let is_fractional = n != self.blocksize as usize;
        let max_po = if is_fractional { 0 } else { self.config.max_residual_partition_order };
        let max_po = max_partition_order_for_blocksize(n, max_po);

        let bps = self.config.bits_per_sample;
        let (assignment, subframes) = if self.config.channels == 2 && self.config.do_mid_side_stereo {
            self.choose_stereo_assignment(n, bps, max_po)?
        } else {
            let mut subframes = Vec::with_capacity(self.channel_buffers.len());
            for ch in 0..self.channel_buffers.len() {
                let signal = self.channel_buffers[ch][..n].to_vec();
                subframes.push(self.process_subframe(&signal, bps, max_po)?);
            }
            (ChannelAssignment::Independent(self.config.channels), subframes)
        };

        let header = FrameHeader {
            blocksize: n as u32,
            sample_rate: None,
            channel_assignment: assignment,
            bits_per_sample: None,
            number_type: NumberType::Frame,
            number: self.frame_number,
        };

        let mut w = BitWriter::new();
        frame::write_frame_header(&mut w, &header)?;

        for (i, candidate) in subframes.iter().enumerate() {
            let channel_bps = subframe_bps(assignment, i, bps) - candidate.wasted_bits;
            subframe::encode_subframe(&mut w, &candidate.subframe, channel_bps, candidate.wasted_bits)?;
            if let Subframe::Fixed { order, residual, entropy, .. } = &candidate.subframe {
                subframe::write_residual_samples(&mut w, entropy, n, *order, residual)?;
            }
            if let Subframe::Lpc { order, residual, entropy, .. } = &candidate.subframe {
                subframe::write_residual_samples(&mut w, entropy, n, *order, residual)?;
            }
        }

        w.zero_pad_to_byte_boundary()?;
        let crc16 = w.get_write_crc16()?;
        w.write_raw_u32(crc16 as u32, 16)?;

        let (bytes, len) = w.get_buffer();

        if self.config.verify {
            let original = self.channel_buffers.clone();
            self.run_verify_pass(&bytes[..len], n, &original)?;
        }

        self.writer.write_all(&bytes[..len])?;
        self.bytes_written += len as u64;
        self.min_frame_size = Some(self.min_frame_size.map_or(len as u32, |m| m.min(len as u32)));
        self.max_frame_size = Some(self.max_frame_size.map_or(len as u32, |m| m.max(len as u32)));
        self.min_block_size_seen = self.min_block_size_seen.min(n as u32);
        self.max_block_size_seen = self.max_block_size_seen.max(n as u32);

        self.frame_number += 1;
        self.samples_written += n as u64;

        Ok(())
    }

    fn choose_stereo_assignment(
        &mut self,
        n: usize,
        bps: u32,
        max_po: u32,
    ) -> Result<(ChannelAssignment, Vec<Candidate>)> {
        let left_signal = self.channel_buffers[0][..n].to_vec();
        let right_signal = self.channel_buffers[1][..n].to_vec();

        let reuse = self.config.loose_mid_side_stereo && self.prev_assignment.is_some() && self.frames_until_reassign > 0;

        if reuse {
            self.frames_until_reassign -= 1;
            let assignment = self.prev_assignment.unwrap();
            let subframes = self.subframes_for_assignment(assignment, &left_signal, &right_signal, bps, max_po)?;
            return Ok((assignment, subframes));
        }

        let mut mid = Vec::with_capacity(n);
        let mut side = Vec::with_capacity(n);
        for i in 0..n {
            let l = left_signal[i];
            let r = right_signal[i];
            mid.push((l + r) >> 1);
            side.push(l - r);
        }

        let left = self.process_subframe(&left_signal, bps, max_po)?;
        let right = self.process_subframe(&right_signal, bps, max_po)?;
        let mid_c = self.process_subframe(&mid, bps, max_po)?;
        let side_c = self.process_subframe(&side, bps + 1, max_po)?;

        let independent_bits = left.bits + right.bits;
        let left_side_bits = left.bits + side_c.bits;
        let right_side_bits = right.bits + side_c.bits;
        let mid_side_bits = mid_c.bits + side_c.bits;

        let mut best_bits = independent_bits;
        let mut assignment = ChannelAssignment::Independent(2);

        if left_side_bits < best_bits {
            best_bits = left_side_bits;
            assignment = ChannelAssignment::LeftSide;
        }
        if right_side_bits < best_bits {
            best_bits = right_side_bits;
            assignment = ChannelAssignment::RightSide;
        }
        if mid_side_bits < best_bits {
            assignment = ChannelAssignment::MidSide;
        }

        self.prev_assignment = Some(assignment);
        self.frames_until_reassign = self.loose_mid_side_stereo_frames.saturating_sub(1);

        let subframes = match assignment {
            ChannelAssignment::Independent(_) => vec![left, right],
            ChannelAssignment::LeftSide => vec![left, side_c],
            ChannelAssignment::RightSide => vec![right, side_c],
            ChannelAssignment::MidSide => vec![mid_c, side_c],
        };

        Ok((assignment, subframes))
    }

    /// Re-evaluates just the subframes `assignment` needs, used when a loose
    /// mid/side decision is being reused without a fresh cost comparison.
    fn subframes_for_assignment(
        &mut self,
        assignment: ChannelAssignment,
        left: &[i32],
        right: &[i32],
        bps: u32,
        max_po: u32,
    ) -> Result<Vec<Candidate>> {
        let n = left.len();
        match assignment {
            ChannelAssignment::Independent(_) => Ok(vec![
                self.process_subframe(left, bps, max_po)?,
                self.process_subframe(right, bps, max_po)?,
            ]),
            ChannelAssignment::LeftSide => {
                let side: Vec<i32> = (0..n).map(|i| left[i] - right[i]).collect();
                Ok(vec![
                    self.process_subframe(left, bps, max_po)?,
                    self.process_subframe(&side, bps + 1, max_po)?,
                ])
            }
            ChannelAssignment::RightSide => {
                let side: Vec<i32> = (0..n).map(|i| left[i] - right[i]).collect();
                Ok(vec![
                    self.process_subframe(right, bps, max_po)?,
                    self.process_subframe(&side, bps + 1, max_po)?,
                ])
            }
            ChannelAssignment::MidSide => {
                let mid: Vec<i32> = (0..n).map(|i| (left[i] + right[i]) >> 1).collect();
                let side: Vec<i32> = (0..n).map(|i| left[i] - right[i]).collect();
                Ok(vec![
                    self.process_subframe(&mid, bps, max_po)?,
                    self.process_subframe(&side, bps + 1, max_po)?,
                ])
            }
        }
    }

    /// Evaluates every candidate subframe encoding for `signal` at `bps` bits
    /// and returns the cheapest, per §4.7.4.
    fn process_subframe(&self, signal: &[i32], bps: u32, max_po: u32) -> Result<Candidate> {
        let n = signal.len();

        let wasted_bits = if signal.iter().all(|&s| s == 0) {
            0
        } else {
            signal
                .iter()
                .filter(|&&s| s != 0)
                .map(|&s| s.trailing_zeros())
                .min()
                .unwrap_or(0)
                .min(bps.saturating_sub(1))
        };

        let shifted: Vec<i32> = if wasted_bits > 0 {
            signal.iter().map(|&s| s >> wasted_bits).collect()
        } else {
            signal.to_vec()
        };
        let effective_bps = bps - wasted_bits;

        let header_bits = 8u64 + if wasted_bits > 0 { wasted_bits as u64 } else { 0 };

        let mut best = Candidate {
            subframe: Subframe::Verbatim { data: shifted.clone() },
            wasted_bits,
            bits: header_bits + effective_bps as u64 * n as u64,
        };

        if n >= 5 {
            let mut extended = Vec::with_capacity(n + 1);
            extended.push(shifted[0]);
            extended.extend_from_slice(&shifted);
            let mut residual1 = Vec::new();
            fixed::compute_residual(&extended, 1, &mut residual1);
            if residual1.iter().all(|&r| r == 0) {
                let bits = header_bits + effective_bps as u64;
                return Ok(Candidate { subframe: Subframe::Constant { value: shifted[0] }, wasted_bits, bits });
            }
        }

        let min_po = self.config.min_residual_partition_order;

        for order in 0..=fixed::MAX_ORDER.min(n) {
            let mut residual = Vec::new();
            fixed::compute_residual(&shifted, order, &mut residual);
            let plan = rice::find_best_partition_order(
                &residual,
                n,
                order,
                min_po.min(max_po),
                max_po.max(min_po),
                self.config.do_escape_coding,
            );
            let entropy = EntropyMethod { method: plan.method, order: plan.order, partitions: plan.partitions };
            let bits = header_bits
                + effective_bps as u64 * order as u64
                + subframe::entropy_cost_bits(&entropy, n, order);
            if bits < best.bits {
                best = Candidate {
                    subframe: Subframe::Fixed { order, warmup: shifted[..order].to_vec(), residual, entropy },
                    wasted_bits,
                    bits,
                };
            }
        }

        if self.config.max_lpc_order > 0 && n > self.config.max_lpc_order as usize {
            let max_order = (self.config.max_lpc_order as usize).min(n - 1).min(lpc::MAX_ORDER);

            for &apod in &self.apodizations {
                let mut window = Vec::new();
                lpc::build_window(apod, n, &mut window);
                let mut windowed = Vec::new();
                lpc::window_data(&shifted, &window, &mut windowed);
                let mut autoc = Vec::new();
                lpc::autocorrelation(&windowed, max_order + 1, &mut autoc);
                let ld = lpc::compute_lp_coefficients(&autoc, max_order);
                if ld.max_order == 0 {
                    continue;
                }

                let base_precision = if self.config.qlp_coeff_precision != 0 {
                    self.config.qlp_coeff_precision
                } else {
                    presets::auto_qlp_precision(self.config.bits_per_sample, self.blocksize)
                };

                let orders: Vec<usize> = if self.config.do_exhaustive_model_search {
                    (1..=ld.max_order).collect()
                } else {
                    let overhead = base_precision as f64 + effective_bps as f64;
                    vec![lpc::compute_best_order(&ld.error, n, overhead)]
                };

                for order in orders {
                    if order > ld.coefficients.len() {
                        continue;
                    }
                    let coeffs = &ld.coefficients[order - 1];

                    let precisions: Vec<u32> = if self.config.do_qlp_coeff_prec_search {
                        let lo = base_precision.saturating_sub(1).max(format::MIN_QLP_PRECISION);
                        let hi = (base_precision + 1).min(format::MAX_QLP_PRECISION);
                        (lo..=hi).collect()
                    } else {
                        vec![base_precision]
                    };

                    for precision in precisions {
                        let (qlp, shift, status) = lpc::quantize_coefficients(coeffs, precision);
                        if status == lpc::QuantizeStatus::AllZero {
                            continue;
                        }

                        let mut residual = Vec::new();
                        lpc::residual_from_qlp(&shifted, &qlp, shift, &mut residual);

                        let plan = rice::find_best_partition_order(
                            &residual,
                            n,
                            order,
                            min_po.min(max_po),
                            max_po.max(min_po),
                            self.config.do_escape_coding,
                        );
                        let entropy = EntropyMethod { method: plan.method, order: plan.order, partitions: plan.partitions };

                        let bits = header_bits
                            + effective_bps as u64 * order as u64
                            + 4
                            + 5
                            + precision as u64 * order as u64
                            + subframe::entropy_cost_bits(&entropy, n, order);

                        if bits < best.bits {
                            best = Candidate {
                                subframe: Subframe::Lpc {
                                    order,
                                    qlp_precision: precision,
                                    qlp_shift: shift,
                                    qlp_coeff: qlp,
                                    warmup: shifted[..order].to_vec(),
                                    residual,
                                    entropy,
                                },
                                wasted_bits,
                                bits,
                            };
                        }
                    }
                }
            }
        }

        Ok(best)
    }

    /// Decodes the just-written frame bytes through a fresh, throwaway
    /// decoder and compares the result against the original samples, per
    /// §4.7.5's internally-owned verify decoder.
    fn run_verify_pass(&mut self, frame_bytes: &[u8], n: usize, original: &[Vec<i32>]) -> Result<()> {
        let info = StreamInfo {
            min_block_size: n as u16,
            max_block_size: n as u16,
            min_frame_size: None,
            max_frame_size: None,
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            bits_per_sample: self.config.bits_per_sample,
            samples: Some(n as u64),
            md5sum: [0u8; 16],
        };

        let mut w = BitWriter::new();
        w.write_byte_block(b"fLaC")?;
        metadata::write_block_header(&mut w, &BlockHeader { is_last: true, block_type: BlockType::StreamInfo, length: 34 })?;
        metadata::write_streaminfo_block(&mut w, &info)?;
        let (prefix, prefix_len) = w.get_buffer();
        let mut synthetic = prefix[..prefix_len].to_vec();
        synthetic.extend_from_slice(frame_bytes);

        let mut decoder = StreamDecoder::new(io::Cursor::new(synthetic))?;
        let decoded = match decoder.decode_frame() {
            Ok(Some(f)) => f,
            Ok(None) => return fmt_err("verify decoder produced no frame for a just-written frame"),
            Err(e) => {
                self.state = State::VerifyMismatchInAudioData;
                return Err(e);
            }
        };

        for (channel, samples) in decoded.samples.iter().enumerate() {
            for (i, &got) in samples.iter().enumerate() {
                let expected = original[channel][i];
                if got != expected {
                    warn!(
                        "verify mismatch in frame {}, channel {}, sample {}: expected {}, got {}",
                        self.frame_number, channel, i, expected, got
                    );
                    self.verify_mismatch = Some(VerifyMismatch {
                        absolute_sample: self.samples_written + i as u64,
                        frame_number: self.frame_number,
                        channel: channel as u32,
                        sample_in_block: i as u32,
                        expected,
                        got,
                    });
                    self.state = State::VerifyMismatchInAudioData;
                    return fmt_err("encoder verify pass detected a round-trip mismatch");
                }
            }
        }

        Ok(())
    }

    /// Flushes a final, possibly-fractional frame and finalizes MD5.
    /// Returns the MD5 digest (`[0u8; 16]` if `do_md5` was disabled).
    fn finalize(&mut self) -> Result<[u8; 16]> {
        if self.current_sample_number > 0 {
            self.encode_frame(self.current_sample_number)?;
            self.current_sample_number = 0;
        }
        self.writer.flush()?;
        Ok(match self.md5.take() {
            Some(w) => w.finish(),
            None => [0u8; 16],
        })
    }

    /// Flushes the final block and finalizes MD5, without touching the
    /// placeholder STREAMINFO written at `new` (no seek callback available
    /// to rewrite it, per §4.7.6).
    pub fn finish(mut self) -> Result<[u8; 16]> {
        self.finalize()
    }
}

impl<W: io::Write + io::Seek> StreamEncoder<W> {
    /// Flushes the final block, finalizes MD5, and rewrites the STREAMINFO
    /// block in place with the real sample count, frame size bounds, and
    /// MD5 signature, per §4.7.6.
    pub fn finish_and_patch_streaminfo(mut self) -> Result<[u8; 16]> {
        let digest = self.finalize()?;

        let info = StreamInfo {
            min_block_size: self.min_block_size_seen.min(u16::MAX as u32) as u16,
            max_block_size: self.max_block_size_seen.min(u16::MAX as u32) as u16,
            min_frame_size: self.min_frame_size,
            max_frame_size: self.max_frame_size,
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            bits_per_sample: self.config.bits_per_sample,
            samples: Some(self.samples_written),
            md5sum: digest,
        };

        let mut w = BitWriter::new();
        metadata::write_streaminfo_block(&mut w, &info)?;
        let (bytes, len) = w.get_buffer();

        self.writer.seek(io::SeekFrom::Start(STREAMINFO_BODY_OFFSET))?;
        self.writer.write_all(&bytes[..len])?;
        self.writer.flush()?;

        Ok(digest)
    }
}

/// Writes one non-STREAMINFO metadata block, dispatching on its variant.
///
/// Shared with the `ogg` module, which frames each metadata block as its
/// own Ogg packet but needs the same block body and length computation.
pub(crate) fn write_metadata_block(writer: &mut BitWriter, block: &MetadataBlock, is_last: bool) -> Result<()> {
    match block {
        MetadataBlock::StreamInfo(_) => return fmt_err("STREAMINFO may not appear in the user metadata list"),
        MetadataBlock::Padding { len } => {
            metadata::write_block_header(writer, &BlockHeader { is_last, block_type: BlockType::Padding, length: *len })?;
            writer.write_zeroes(len * 8)?;
        }
        MetadataBlock::Application { id, data } => {
            let length = 4 + data.len() as u32;
            metadata::write_block_header(writer, &BlockHeader { is_last, block_type: BlockType::Application, length })?;
            writer.write_raw_u32(id.0, 32)?;
            writer.write_byte_block(data)?;
        }
        MetadataBlock::SeekTable(table) => {
            let length = (table.points.len() * metadata::seektable::SEEKPOINT_LEN) as u32;
            metadata::write_block_header(writer, &BlockHeader { is_last, block_type: BlockType::SeekTable, length })?;
            metadata::seektable::write_seektable_block(writer, table)?;
        }
        MetadataBlock::VorbisComment(comment) => {
            // 4-byte vendor length prefix + vendor bytes + 4-byte comment
            // count + one 4-byte length prefix per comment entry.
            let length = 4
                + comment.vendor.len() as u32
                + 4
                + comment.comments.iter().map(|c| 4 + c.raw().len() as u32).sum::<u32>();
            metadata::write_block_header(writer, &BlockHeader { is_last, block_type: BlockType::VorbisComment, length })?;
            metadata::vorbis_comment::write_vorbis_comment_block(writer, comment)?;
        }
        MetadataBlock::CueSheet(sheet) => {
            // 128-byte catalog number + 8-byte lead-in + 1 flags byte +
            // 258 reserved bytes + 1 track-count byte, then per track
            // 8+1+12+1+13+1 fixed bytes plus 8+1+3 per index point.
            let length = 128
                + 8
                + 1
                + 258
                + 1
                + sheet
                    .tracks
                    .iter()
                    .map(|t| 36 + t.index_points.len() as u32 * 12)
                    .sum::<u32>();
            metadata::write_block_header(writer, &BlockHeader { is_last, block_type: BlockType::CueSheet, length })?;
            metadata::cuesheet::write_cuesheet_block(writer, sheet)?;
        }
        MetadataBlock::Picture(picture) => {
            // 8 fixed 4-byte fields (type, mime length, description length,
            // width, height, depth, colors, data length) plus the three
            // variable-length byte blobs.
            let length = 32
                + picture.mime_type.len() as u32
                + picture.description.len() as u32
                + picture.data.len() as u32;
            metadata::write_block_header(writer, &BlockHeader { is_last, block_type: BlockType::Picture, length })?;
            metadata::picture::write_picture_block(writer, picture)?;
        }
        MetadataBlock::Unknown { block_type, data } => {
            let length = data.len() as u32;
            metadata::write_block_header(
                writer,
                &BlockHeader { is_last, block_type: unknown_block_type(*block_type)?, length },
            )?;
            writer.write_byte_block(data)?;
        }
    }
    Ok(())
}

fn unknown_block_type(_raw: u8) -> Result<BlockType> {
    // `BlockType` has no "raw passthrough" variant; round-tripping an
    // `Unknown` block through the encoder is not supported (it only arises
    // from parsing a reserved block type the decoder chose to preserve).
    Err(Error::Unsupported("re-encoding a reserved metadata block type is not supported"))
}

/// `bits_per_sample` a given subframe index should be written at: the side
/// channel of a stereo-decorrelated assignment carries one extra bit.
fn subframe_bps(assignment: ChannelAssignment, index: usize, bps: u32) -> u32 {
    match assignment {
        ChannelAssignment::Independent(_) => bps,
        ChannelAssignment::LeftSide | ChannelAssignment::RightSide | ChannelAssignment::MidSide => {
            if index == 1 {
                bps + 1
            } else {
                bps
            }
        }
    }
}

/// Caps a configured maximum residual partition order so that the smallest
/// partition is never shorter than 1 sample.
fn max_partition_order_for_blocksize(n: usize, configured_max: u32) -> u32 {
    let mut order = configured_max.min(format::MAX_PARTITION_ORDER);
    while order > 0 && (n >> order) == 0 {
        order -= 1;
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_and_decodes_a_constant_block() {
        let mut config = EncoderConfig::new(1, 16, 44100);
        config.blocksize = 4096;
        let mut buffer = io::Cursor::new(Vec::new());
        let samples = vec![1234i32; 4096];

        {
            let mut encoder = StreamEncoder::new(&mut buffer, config).unwrap();
            encoder.process_interleaved(&samples).unwrap();
            encoder.process_interleaved(&[1234]).unwrap(); // the mandatory overread sample
            encoder.finish().unwrap();
        }

        let bytes = buffer.into_inner();
        let mut decoder = StreamDecoder::new(io::Cursor::new(bytes)).unwrap();
        let frame = decoder.decode_frame().unwrap().expect("one frame");
        assert_eq!(frame.samples[0], samples);
    }

    #[test]
    fn round_trips_a_short_stereo_block_with_mid_side() {
        let mut config = EncoderConfig::new(2, 16, 44100);
        config.blocksize = 64;
        config.do_mid_side_stereo = true;
        config.max_lpc_order = 4;

        let left: Vec<i32> = (0..65).map(|i| ((i * 37) % 101) - 50).collect();
        let right: Vec<i32> = left.clone();
        let mut interleaved = Vec::with_capacity(left.len() * 2);
        for i in 0..left.len() {
            interleaved.push(left[i]);
            interleaved.push(right[i]);
        }

        let mut buffer = io::Cursor::new(Vec::new());
        {
            let mut encoder = StreamEncoder::new(&mut buffer, config).unwrap();
            encoder.process_interleaved(&interleaved).unwrap();
            encoder.finish().unwrap();
        }

        let bytes = buffer.into_inner();
        let mut decoder = StreamDecoder::new(io::Cursor::new(bytes)).unwrap();
        let frame = decoder.decode_frame().unwrap().expect("one frame");
        assert_eq!(frame.samples[0], left[..64]);
        assert_eq!(frame.samples[1], right[..64]);
    }

    #[test]
    fn fractional_final_block_round_trips_and_patches_streaminfo() {
        let mut config = EncoderConfig::new(1, 16, 44100);
        config.blocksize = 64;
        let samples: Vec<i32> = (0..100).map(|i: i32| (i * 31) % 17 - 8).collect();

        let mut buffer = io::Cursor::new(Vec::new());
        {
            let mut encoder = StreamEncoder::new(&mut buffer, config).unwrap();
            encoder.process_interleaved(&samples).unwrap();
            encoder.finish_and_patch_streaminfo().unwrap();
        }

        let bytes = buffer.into_inner();
        let mut decoder = StreamDecoder::new(io::Cursor::new(bytes)).unwrap();
        assert_eq!(decoder.streaminfo().samples, Some(100));

        let mut decoded = Vec::new();
        while let Some(frame) = decoder.decode_frame().unwrap() {
            decoded.extend(frame.samples[0].iter().copied());
        }
        assert_eq!(decoded, samples);
        decoder.finish().unwrap();
    }
}
