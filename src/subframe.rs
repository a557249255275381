// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `subframe` module deals with the subframes that make up a frame: the
//! coded representation of a single channel's samples, in one of four forms
//! (CONSTANT, VERBATIM, FIXED, LPC), each entropy-coded with partitioned Rice
//! residuals.

use std::io;

use crate::error::{Error, Result};
use crate::fixed;
use crate::input::{sign_extend, BitReader};
use crate::lpc;
use crate::output::BitWriter;
use crate::rice::{self, Partition, RiceMethod};

/// One channel's coded representation within a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subframe {
    Constant {
        value: i32,
    },
    Verbatim {
        data: Vec<i32>,
    },
    Fixed {
        order: usize,
        warmup: Vec<i32>,
        residual: Vec<i32>,
        entropy: EntropyMethod,
    },
    Lpc {
        order: usize,
        qlp_precision: u32,
        qlp_shift: i32,
        qlp_coeff: Vec<i32>,
        warmup: Vec<i32>,
        residual: Vec<i32>,
        entropy: EntropyMethod,
    },
}

/// The partitioned-Rice coding of a subframe's residual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntropyMethod {
    pub method: RiceMethod,
    pub order: u32,
    pub partitions: Vec<Partition>,
}

struct SubframeHeader {
    kind: SubframeKind,
    wasted_bits: u32,
}

enum SubframeKind {
    Constant,
    Verbatim,
    Fixed(usize),
    Lpc(usize),
}

fn read_subframe_header<R: io::Read>(input: &mut BitReader<R>) -> Result<SubframeHeader> {
    let pad_and_type = input.read_raw_u32(7)?;
    if pad_and_type & 0b1000000 != 0 {
        return Err(Error::FormatError("subframe zero-pad bit is not zero"));
    }
    let type_bits = pad_and_type & 0b0111111;

    let kind = match type_bits {
        0 => SubframeKind::Constant,
        1 => SubframeKind::Verbatim,
        n if n & 0b111110 == 0b000010 || n & 0b111100 == 0b000100 || n & 0b110000 == 0b010000 => {
            return Err(Error::FormatError("reserved subframe type"));
        }
        n if n & 0b111000 == 0b001000 => {
            let order = (n & 0b000111) as usize;
            if order > fixed::MAX_ORDER {
                return Err(Error::FormatError("reserved fixed predictor order"));
            }
            SubframeKind::Fixed(order)
        }
        n => SubframeKind::Lpc(((n & 0b011111) + 1) as usize),
    };

    let has_wasted_bits = input.read_raw_u32(1)? == 1;
    let wasted_bits = if has_wasted_bits {
        1 + input.read_unary_unsigned()?
    } else {
        0
    };

    Ok(SubframeHeader { kind, wasted_bits })
}

fn write_subframe_header(writer: &mut BitWriter, type_bits: u32, wasted_bits: u32) -> Result<()> {
    writer.write_raw_u32(type_bits, 7)?;
    if wasted_bits == 0 {
        writer.write_raw_u32(0, 1)?;
    } else {
        writer.write_raw_u32(1, 1)?;
        writer.write_unary_unsigned(wasted_bits - 1)?;
    }
    Ok(())
}

fn type_bits_for(subframe: &Subframe) -> u32 {
    match subframe {
        Subframe::Constant { .. } => 0,
        Subframe::Verbatim { .. } => 1,
        Subframe::Fixed { order, .. } => 0b001000 | *order as u32,
        Subframe::Lpc { order, .. } => 0b100000 | (*order as u32 - 1),
    }
}

/// Decodes one subframe from `input`, returning `block_size` reconstructed
/// samples at (at most) `bps` bits, with wasted bits re-applied.
pub fn decode_subframe<R: io::Read>(
    input: &mut BitReader<R>,
    bps: u32,
    block_size: u32,
) -> Result<Vec<i32>> {
    let header = read_subframe_header(input)?;
    let effective_bps = bps - header.wasted_bits;
    let n = block_size as usize;

    let mut samples = match header.kind {
        SubframeKind::Constant => decode_constant(input, effective_bps, n)?,
        SubframeKind::Verbatim => decode_verbatim(input, effective_bps, n)?,
        SubframeKind::Fixed(order) => decode_fixed(input, effective_bps, order, n)?,
        SubframeKind::Lpc(order) => decode_lpc(input, effective_bps, order, n)?,
    };

    if header.wasted_bits > 0 {
        for s in samples.iter_mut() {
            *s <<= header.wasted_bits;
        }
    }

    Ok(samples)
}

fn decode_constant<R: io::Read>(input: &mut BitReader<R>, bps: u32, n: usize) -> Result<Vec<i32>> {
    let raw = input.read_raw_u32(bps)?;
    let value = sign_extend(raw, bps);
    Ok(vec![value; n])
}

fn decode_verbatim<R: io::Read>(input: &mut BitReader<R>, bps: u32, n: usize) -> Result<Vec<i32>> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(input.read_raw_i32(bps)?);
    }
    Ok(out)
}

fn decode_entropy_coded_residual<R: io::Read>(
    input: &mut BitReader<R>,
    block_size: usize,
    predictor_order: usize,
    out: &mut Vec<i32>,
) -> Result<()> {
    let method_bits = input.read_raw_u32(2)?;
    let method = match method_bits {
        0 => RiceMethod::Rice1,
        1 => RiceMethod::Rice2,
        _ => return Err(Error::FormatError("reserved residual coding method")),
    };

    let order = input.read_raw_u32(4)?;
    let n_partitions = 1usize << order;
    if block_size >> order < predictor_order {
        return Err(Error::FormatError("partition smaller than predictor order"));
    }

    out.clear();
    out.reserve(block_size - predictor_order);

    for i in 0..n_partitions {
        let len = rice::partition_length(block_size, predictor_order, order, i);
        let param = input.read_raw_u32(method.param_len())?;
        if param == method.escape_parameter() {
            let raw_bits = input.read_raw_u32(5)?;
            for _ in 0..len {
                let v = if raw_bits == 0 { 0 } else { input.read_raw_i32(raw_bits)? };
                out.push(v);
            }
        } else {
            for _ in 0..len {
                out.push(input.read_rice_signed(param)?);
            }
        }
    }

    Ok(())
}

fn decode_fixed<R: io::Read>(
    input: &mut BitReader<R>,
    bps: u32,
    order: usize,
    n: usize,
) -> Result<Vec<i32>> {
    let mut signal = vec![0i32; n];
    for s in signal.iter_mut().take(order) {
        *s = input.read_raw_i32(bps)?;
    }

    let mut residual = Vec::new();
    decode_entropy_coded_residual(input, n, order, &mut residual)?;
    fixed::restore_signal(&residual, order, &mut signal);

    Ok(signal)
}

fn decode_lpc<R: io::Read>(
    input: &mut BitReader<R>,
    bps: u32,
    order: usize,
    n: usize,
) -> Result<Vec<i32>> {
    let mut signal = vec![0i32; n];
    for s in signal.iter_mut().take(order) {
        *s = input.read_raw_i32(bps)?;
    }

    let qlp_precision = input.read_raw_u32(4)? + 1;
    if qlp_precision == 16 {
        return Err(Error::FormatError("reserved qlp precision"));
    }
    let shift_raw = input.read_raw_u32(5)?;
    let shift = sign_extend(shift_raw, 5);

    let mut qlp_coeff = Vec::with_capacity(order);
    for _ in 0..order {
        let raw = input.read_raw_u32(qlp_precision)?;
        qlp_coeff.push(sign_extend(raw, qlp_precision));
    }

    let mut residual = Vec::new();
    decode_entropy_coded_residual(input, n, order, &mut residual)?;

    // A negative shift is a format quirk preserved from the reference
    // decoder: treat it as a no-op rather than as a real shift.
    let effective_shift = shift.max(0);
    lpc::restore_signal(&residual, &qlp_coeff, effective_shift, &mut signal);

    Ok(signal)
}

/// Writes `subframe` (already chosen by the encoder) at `bps` bits, with
/// `wasted_bits` wasted bits, to `writer`.
pub fn encode_subframe(writer: &mut BitWriter, subframe: &Subframe, bps: u32, wasted_bits: u32) -> Result<()> {
    write_subframe_header(writer, type_bits_for(subframe), wasted_bits)?;

    match subframe {
        Subframe::Constant { value } => {
            writer.write_raw_i32(*value, bps)?;
        }
        Subframe::Verbatim { data } => {
            for &s in data {
                writer.write_raw_i32(s, bps)?;
            }
        }
        Subframe::Fixed { order, warmup, residual, entropy } => {
            for &s in warmup {
                writer.write_raw_i32(s, bps)?;
            }
            encode_entropy_coded_residual(writer, entropy, warmup.len() + residual.len(), *order)?;
        }
        Subframe::Lpc { order, qlp_precision, qlp_shift, qlp_coeff, warmup, residual, entropy } => {
            for &s in warmup {
                writer.write_raw_i32(s, bps)?;
            }
            writer.write_raw_u32(qlp_precision - 1, 4)?;
            writer.write_raw_i32(*qlp_shift, 5)?;
            for &c in qlp_coeff {
                writer.write_raw_i32(c, *qlp_precision)?;
            }
            encode_entropy_coded_residual(writer, entropy, warmup.len() + residual.len(), *order)?;
        }
    }

    Ok(())
}

fn encode_entropy_coded_residual(
    writer: &mut BitWriter,
    entropy: &EntropyMethod,
    block_size: usize,
    predictor_order: usize,
) -> Result<()> {
    let method_bits = match entropy.method {
        RiceMethod::Rice1 => 0,
        RiceMethod::Rice2 => 1,
    };
    writer.write_raw_u32(method_bits, 2)?;
    writer.write_raw_u32(entropy.order, 4)?;

    let mut idx = 0usize;
    for (i, partition) in entropy.partitions.iter().enumerate() {
        let len = rice::partition_length(block_size, predictor_order, entropy.order, i);
        match partition {
            Partition::Rice { k } => {
                writer.write_raw_u32(*k, entropy.method.param_len())?;
            }
            Partition::Escape { raw_bits } => {
                writer.write_raw_u32(entropy.method.escape_parameter(), entropy.method.param_len())?;
                writer.write_raw_u32(*raw_bits, 5)?;
            }
        }
        idx += len;
    }
    debug_assert_eq!(idx, block_size - predictor_order);

    Ok(())
}

/// Writes the residual samples belonging to `entropy`'s partitions, which
/// must be called once, immediately after [`encode_entropy_coded_residual`]
/// writes the partition parameters, with the same residual slice that
/// planning computed the partitions from.
pub fn write_residual_samples(
    writer: &mut BitWriter,
    entropy: &EntropyMethod,
    block_size: usize,
    predictor_order: usize,
    residual: &[i32],
) -> Result<()> {
    let mut start = 0usize;
    for (i, partition) in entropy.partitions.iter().enumerate() {
        let len = rice::partition_length(block_size, predictor_order, entropy.order, i);
        let slice = &residual[start..start + len];
        match partition {
            Partition::Rice { k } => writer.write_rice_signed_block(slice, *k)?,
            Partition::Escape { raw_bits } => {
                for &v in slice {
                    writer.write_raw_i32(v, *raw_bits)?;
                }
            }
        }
        start += len;
    }
    Ok(())
}

/// Estimates the total bit cost (header + body) of encoding `entropy` over
/// `block_size - predictor_order` residual samples. Used by the encoder's
/// subframe selection to compare candidates without emitting bits.
pub fn entropy_cost_bits(entropy: &EntropyMethod, block_size: usize, predictor_order: usize) -> u64 {
    let mut bits = 2 + rice::PARTITION_ORDER_LEN as u64;
    for (i, partition) in entropy.partitions.iter().enumerate() {
        let len = rice::partition_length(block_size, predictor_order, entropy.order, i) as u64;
        bits += entropy.method.param_len() as u64;
        match partition {
            Partition::Rice { k } => bits += (1 + k) as u64 * len,
            Partition::Escape { raw_bits } => bits += rice::RAW_BITS_LEN as u64 + *raw_bits as u64 * len,
        }
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::BitWriter;
    use std::io::Cursor;

    fn round_trip(subframe: Subframe, bps: u32, wasted_bits: u32, block_size: usize) -> Vec<i32> {
        let mut writer = BitWriter::new();
        encode_subframe(&mut writer, &subframe, bps, wasted_bits).unwrap();
        if let Subframe::Fixed { order, residual, entropy, .. } = &subframe {
            write_residual_samples(&mut writer, entropy, block_size, *order, residual).unwrap();
        }
        writer.zero_pad_to_byte_boundary().unwrap();
        let (buf, len) = writer.get_buffer();
        let mut reader = BitReader::new(Cursor::new(buf[..len].to_vec()));
        decode_subframe(&mut reader, bps, block_size as u32).unwrap()
    }

    #[test]
    fn constant_round_trips() {
        let out = round_trip(Subframe::Constant { value: -1234 }, 16, 0, 8);
        assert_eq!(out, vec![-1234; 8]);
    }

    #[test]
    fn verbatim_round_trips() {
        let data = vec![1, -2, 3, -4, 5];
        let out = round_trip(Subframe::Verbatim { data: data.clone() }, 16, 0, 5);
        assert_eq!(out, data);
    }

    #[test]
    fn fixed_order_one_round_trips() {
        let signal = vec![10i32, 15, 12, 20, 5, 5, 5, 5];
        let order = 1;
        let mut residual = Vec::new();
        fixed::compute_residual(&signal, order, &mut residual);
        let plan = rice::find_best_partition_order(&residual, signal.len(), order, 0, 2, true);
        let entropy = EntropyMethod {
            method: plan.method,
            order: plan.order,
            partitions: plan.partitions,
        };
        let subframe = Subframe::Fixed {
            order,
            warmup: signal[..order].to_vec(),
            residual: residual.clone(),
            entropy,
        };
        let out = round_trip(subframe, 16, 0, signal.len());
        assert_eq!(out, signal);
    }

    #[test]
    fn subframe_type_bits_match_format() {
        assert_eq!(type_bits_for(&Subframe::Constant { value: 0 }), 0);
        assert_eq!(type_bits_for(&Subframe::Verbatim { data: vec![] }), 1);
        assert_eq!(
            type_bits_for(&Subframe::Fixed {
                order: 3,
                warmup: vec![],
                residual: vec![],
                entropy: EntropyMethod { method: RiceMethod::Rice1, order: 0, partitions: vec![] },
            }),
            0b001011
        );
    }
}
