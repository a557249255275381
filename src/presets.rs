// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `presets` module holds the fixed compression-level table: nine rows
//! of encoder tuning knobs indexed 0 (fastest) through 8 (most thorough).

/// One compression-level preset, per §4.7.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub do_mid_side: bool,
    pub loose_mid_side: bool,
    pub max_lpc_order: u32,
    /// `0` means "auto", resolved against bps and blocksize at encode time.
    pub qlp_coeff_precision: u32,
    pub do_qlp_coeff_prec_search: bool,
    pub do_escape_coding: bool,
    pub do_exhaustive_model_search: bool,
    pub min_residual_partition_order: u32,
    pub max_residual_partition_order: u32,
}

/// The canonical preset table, reproduced exactly from §4.7.1.
pub const PRESETS: [Preset; 9] = [
    Preset {
        do_mid_side: false,
        loose_mid_side: false,
        max_lpc_order: 0,
        qlp_coeff_precision: 0,
        do_qlp_coeff_prec_search: false,
        do_escape_coding: false,
        do_exhaustive_model_search: false,
        min_residual_partition_order: 0,
        max_residual_partition_order: 3,
    },
    Preset {
        do_mid_side: true,
        loose_mid_side: true,
        max_lpc_order: 0,
        qlp_coeff_precision: 0,
        do_qlp_coeff_prec_search: false,
        do_escape_coding: false,
        do_exhaustive_model_search: false,
        min_residual_partition_order: 0,
        max_residual_partition_order: 3,
    },
    Preset {
        do_mid_side: true,
        loose_mid_side: false,
        max_lpc_order: 0,
        qlp_coeff_precision: 0,
        do_qlp_coeff_prec_search: false,
        do_escape_coding: false,
        do_exhaustive_model_search: false,
        min_residual_partition_order: 0,
        max_residual_partition_order: 3,
    },
    Preset {
        do_mid_side: false,
        loose_mid_side: false,
        max_lpc_order: 6,
        qlp_coeff_precision: 0,
        do_qlp_coeff_prec_search: false,
        do_escape_coding: false,
        do_exhaustive_model_search: false,
        min_residual_partition_order: 0,
        max_residual_partition_order: 4,
    },
    Preset {
        do_mid_side: true,
        loose_mid_side: true,
        max_lpc_order: 8,
        qlp_coeff_precision: 0,
        do_qlp_coeff_prec_search: false,
        do_escape_coding: false,
        do_exhaustive_model_search: false,
        min_residual_partition_order: 0,
        max_residual_partition_order: 4,
    },
    Preset {
        do_mid_side: true,
        loose_mid_side: false,
        max_lpc_order: 8,
        qlp_coeff_precision: 0,
        do_qlp_coeff_prec_search: false,
        do_escape_coding: false,
        do_exhaustive_model_search: false,
        min_residual_partition_order: 0,
        max_residual_partition_order: 5,
    },
    Preset {
        do_mid_side: true,
        loose_mid_side: false,
        max_lpc_order: 8,
        qlp_coeff_precision: 0,
        do_qlp_coeff_prec_search: false,
        do_escape_coding: false,
        do_exhaustive_model_search: false,
        min_residual_partition_order: 0,
        max_residual_partition_order: 6,
    },
    Preset {
        do_mid_side: true,
        loose_mid_side: false,
        max_lpc_order: 8,
        qlp_coeff_precision: 0,
        do_qlp_coeff_prec_search: false,
        do_escape_coding: false,
        do_exhaustive_model_search: true,
        min_residual_partition_order: 0,
        max_residual_partition_order: 6,
    },
    Preset {
        do_mid_side: true,
        loose_mid_side: false,
        max_lpc_order: 12,
        qlp_coeff_precision: 0,
        do_qlp_coeff_prec_search: false,
        do_escape_coding: false,
        do_exhaustive_model_search: true,
        min_residual_partition_order: 0,
        max_residual_partition_order: 6,
    },
];

/// Looks up a preset by compression level, clamping to the valid `0..=8`
/// range rather than panicking on an out-of-range request.
pub fn get(level: u32) -> Preset {
    PRESETS[level.min(8) as usize]
}

/// Resolves the "auto" quantized-LPC-coefficient precision for a given
/// bit depth, per the table referenced by §4.7.1 (lower precision for
/// higher bit depths, since the available header field width is fixed).
pub fn auto_qlp_precision(bits_per_sample: u32, block_size: u32) -> u32 {
    let base: u32 = match bits_per_sample {
        0..=16 => 14,
        _ => 13,
    };
    let bonus = if block_size <= 2048 { 0 } else { 1 };
    (base + bonus).min(crate::format::MAX_QLP_PRECISION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_zero_matches_spec_row() {
        let p = get(0);
        assert!(!p.do_mid_side);
        assert_eq!(p.max_lpc_order, 0);
        assert_eq!(p.max_residual_partition_order, 3);
    }

    #[test]
    fn preset_eight_matches_spec_row() {
        let p = get(8);
        assert!(p.do_mid_side);
        assert!(!p.loose_mid_side);
        assert_eq!(p.max_lpc_order, 12);
        assert!(p.do_exhaustive_model_search);
        assert_eq!(p.max_residual_partition_order, 6);
    }

    #[test]
    fn out_of_range_level_clamps_to_eight() {
        assert_eq!(get(99), get(8));
    }

    #[test]
    fn auto_precision_is_within_legal_range() {
        for bps in [8, 16, 24, 32] {
            let p = auto_qlp_precision(bps, 4096);
            assert!((crate::format::MIN_QLP_PRECISION..=crate::format::MAX_QLP_PRECISION).contains(&p));
        }
    }
}
