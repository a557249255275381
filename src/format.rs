// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `format` module collects the bitstream constants and invariants shared
//! by every other module: magic numbers, field widths, and the legality
//! checks the encoder and decoder both need to enforce.

use crate::error::{Error, Result};

/// The 32-bit `"fLaC"` stream marker.
pub const STREAM_SYNC: u32 = 0x66_4c_61_43;

/// The 14-bit frame sync code, followed by a reserved bit and the
/// blocking-strategy bit.
pub const FRAME_SYNC: u16 = 0x3ffe;

/// Rice escape parameter for `PartitionedRice` (method 0).
pub const RICE1_ESCAPE_PARAMETER: u32 = 15;

/// Rice escape parameter for `PartitionedRice2` (method 1).
pub const RICE2_ESCAPE_PARAMETER: u32 = 31;

/// Smallest legal number of channels.
pub const MIN_CHANNELS: u32 = 1;
/// Largest legal number of channels.
pub const MAX_CHANNELS: u32 = 8;

/// Smallest legal bits per sample.
pub const MIN_BITS_PER_SAMPLE: u32 = 4;
/// Largest legal bits per sample.
pub const MAX_BITS_PER_SAMPLE: u32 = 32;

/// Smallest legal sample rate, in Hz.
pub const MIN_SAMPLE_RATE: u32 = 1;
/// Largest legal sample rate, in Hz.
pub const MAX_SAMPLE_RATE: u32 = 655_350;

/// Smallest legal blocksize, in samples.
pub const MIN_BLOCK_SIZE: u32 = 16;
/// Largest legal blocksize, in samples.
pub const MAX_BLOCK_SIZE: u32 = 65_535;

/// Largest legal LPC predictor order.
pub const MAX_LPC_ORDER: u32 = 32;

/// Smallest legal quantized LPC coefficient precision, in bits.
pub const MIN_QLP_PRECISION: u32 = 5;
/// Largest legal quantized LPC coefficient precision, in bits.
pub const MAX_QLP_PRECISION: u32 = 15;

/// Largest legal residual partition order in the streamable subset.
pub const MAX_STREAMABLE_PARTITION_ORDER: u32 = 8;

/// Largest residual partition order accepted anywhere.
pub const MAX_PARTITION_ORDER: u32 = 15;

/// Sentinel `sample_number` marking an unset seek point.
pub const SEEKPOINT_PLACEHOLDER: u64 = 0xffff_ffff_ffff_ffff;

/// How a multi-channel block's channels relate to left/right audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAssignment {
    /// Every channel is coded independently.
    Independent(u32),
    /// Two channels: left, and left minus right ("side").
    LeftSide,
    /// Two channels: right, and left minus right ("side").
    RightSide,
    /// Two channels: mid `(L+R)>>1`, and side `L-R`.
    MidSide,
}

impl ChannelAssignment {
    /// The number of channels this assignment decodes to.
    pub fn channels(&self) -> u32 {
        match *self {
            ChannelAssignment::Independent(n) => n,
            _ => 2,
        }
    }

    /// Whether this assignment may only be used for exactly 2 input channels.
    pub fn is_stereo_decorrelation(&self) -> bool {
        !matches!(*self, ChannelAssignment::Independent(_))
    }
}

/// Whether `channels` is a legal channel count.
pub fn channels_are_valid(channels: u32) -> bool {
    (MIN_CHANNELS..=MAX_CHANNELS).contains(&channels)
}

/// Whether `bps` is a legal bits-per-sample value.
pub fn bits_per_sample_are_valid(bps: u32) -> bool {
    (MIN_BITS_PER_SAMPLE..=MAX_BITS_PER_SAMPLE).contains(&bps)
}

/// Whether `rate` is a legal sample rate.
pub fn sample_rate_is_valid(rate: u32) -> bool {
    (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate)
}

/// Whether `blocksize` is a legal block size.
pub fn block_size_is_valid(blocksize: u32) -> bool {
    (MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&blocksize)
}

/// Whether `assignment` may legally apply to a block of `channels` channels
/// at `bps` bits per sample.
///
/// Mid/Side and its Left/Right-Side variants need the side channel's extra
/// bit of headroom, so they are illegal at the maximum bit depth.
pub fn channel_assignment_is_valid(
    assignment: ChannelAssignment,
    channels: u32,
    bps: u32,
) -> bool {
    match assignment {
        ChannelAssignment::Independent(n) => n == channels,
        ChannelAssignment::LeftSide | ChannelAssignment::RightSide | ChannelAssignment::MidSide => {
            channels == 2 && bps < MAX_BITS_PER_SAMPLE
        }
    }
}

/// Checks that a list of seek points is sorted ascending by sample number,
/// with any `SEEKPOINT_PLACEHOLDER` points sorting last, per §3.3.
pub fn seekpoints_are_sorted(sample_numbers: &[u64]) -> bool {
    sample_numbers.windows(2).all(|w| {
        if w[0] == SEEKPOINT_PLACEHOLDER {
            w[1] == SEEKPOINT_PLACEHOLDER
        } else {
            w[1] == SEEKPOINT_PLACEHOLDER || w[0] < w[1]
        }
    })
}

/// Validates a decoded channel count, returning a `FormatError` on failure.
pub fn validate_channels(channels: u32) -> Result<()> {
    if channels_are_valid(channels) {
        Ok(())
    } else {
        Err(Error::FormatError("number of channels out of range"))
    }
}

/// Validates a decoded bits-per-sample, returning a `FormatError` on failure.
pub fn validate_bits_per_sample(bps: u32) -> Result<()> {
    if bits_per_sample_are_valid(bps) {
        Ok(())
    } else {
        Err(Error::FormatError("bits per sample out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_counts() {
        assert!(channels_are_valid(1));
        assert!(channels_are_valid(8));
        assert!(!channels_are_valid(0));
        assert!(!channels_are_valid(9));
    }

    #[test]
    fn mid_side_needs_two_channels_and_headroom() {
        assert!(channel_assignment_is_valid(ChannelAssignment::MidSide, 2, 16));
        assert!(!channel_assignment_is_valid(ChannelAssignment::MidSide, 2, 32));
        assert!(!channel_assignment_is_valid(ChannelAssignment::MidSide, 1, 16));
    }

    #[test]
    fn seekpoints_sorted_with_placeholders_last() {
        assert!(seekpoints_are_sorted(&[0, 100, 200, SEEKPOINT_PLACEHOLDER, SEEKPOINT_PLACEHOLDER]));
        assert!(!seekpoints_are_sorted(&[0, 200, 100]));
        assert!(!seekpoints_are_sorted(&[0, SEEKPOINT_PLACEHOLDER, 100]));
    }
}
