// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `rice` module implements partitioned Rice coding of residuals: cost
//! estimation, optimal partition-order search, and escape-coded partitions
//! for outliers the Rice parameter cannot represent efficiently.

use crate::format::{RICE1_ESCAPE_PARAMETER, RICE2_ESCAPE_PARAMETER};

/// The length in bits of a partition-order field.
pub const PARTITION_ORDER_LEN: u32 = 4;
/// The length in bits of a Rice parameter field under method 0.
pub const RICE1_PARAM_LEN: u32 = 4;
/// The length in bits of a Rice parameter field under method 1.
pub const RICE2_PARAM_LEN: u32 = 5;
/// The length in bits of the raw-bits field of an escaped partition.
pub const RAW_BITS_LEN: u32 = 5;

/// Which partitioned-Rice entropy method a subframe uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiceMethod {
    /// Method 0: 4-bit parameters, escape value 15.
    Rice1,
    /// Method 1: 5-bit parameters, escape value 31.
    Rice2,
}

impl RiceMethod {
    pub fn param_len(self) -> u32 {
        match self {
            RiceMethod::Rice1 => RICE1_PARAM_LEN,
            RiceMethod::Rice2 => RICE2_PARAM_LEN,
        }
    }

    pub fn escape_parameter(self) -> u32 {
        match self {
            RiceMethod::Rice1 => RICE1_ESCAPE_PARAMETER,
            RiceMethod::Rice2 => RICE2_ESCAPE_PARAMETER,
        }
    }
}

/// One partition's chosen encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partition {
    /// Rice-coded with parameter `k`.
    Rice { k: u32 },
    /// Raw signed samples at `raw_bits` bits each.
    Escape { raw_bits: u32 },
}

/// The outcome of [`find_best_partition_order`]: the chosen order, method,
/// and per-partition encodings.
pub struct PartitionPlan {
    pub order: u32,
    pub method: RiceMethod,
    pub partitions: Vec<Partition>,
    pub total_bits: u64,
}

/// Estimated bit cost of Rice-coding `n` samples with parameter `k`, given
/// their summed absolute value `sum_abs`, per the formula of §4.5.
fn rice_partition_cost(param_len: u32, n: u64, k: u32, sum_abs: u64) -> u64 {
    let shift = if k > 0 { k - 1 } else { 0 };
    let overcount = if k > 0 { n >> 1 } else { 0 };
    param_len as u64 + (1 + k as u64) * n + (sum_abs >> shift) - overcount
}

/// Chooses the Rice parameter minimizing cost for a partition with summed
/// absolute residual `sum_abs` over `n` samples, searching `[0,
/// escape_limit)`.
fn best_parameter_for_partition(n: u64, sum_abs: u64, param_len: u32, escape_limit: u32) -> (u32, u64) {
    if n == 0 {
        return (0, param_len as u64);
    }
    // A good starting guess: the mean magnitude's base-2 log.
    let mean = (sum_abs / n).max(1);
    let guess = 63 - mean.leading_zeros();
    let mut best_k = 0u32;
    let mut best_cost = u64::MAX;

    let lo = guess.saturating_sub(2);
    let hi = (guess + 2).min(escape_limit - 1);
    for k in lo..=hi {
        let cost = rice_partition_cost(param_len, n, k, sum_abs);
        if cost < best_cost {
            best_cost = cost;
            best_k = k;
        }
    }
    (best_k, best_cost)
}

/// Computes the number of samples in partition `i` of `2^order` partitions
/// tiling a residual of `n` total samples after a predictor of order `p`.
pub fn partition_length(n: usize, predictor_order: usize, order: u32, i: usize) -> usize {
    let count = n >> order;
    if i == 0 {
        count - predictor_order
    } else {
        count
    }
}

/// Searches partition orders `min_po..=max_po` for the cheapest partitioned
/// encoding of `residual` (a predictor-of-order-`predictor_order` residual
/// over a block of `n` samples total), per §4.5.
///
/// Escape coding is considered for every partition, and used when cheaper
/// than the best Rice parameter. The returned method starts as `Rice1` and
/// is upgraded to `Rice2` if any chosen parameter exceeds 14.
pub fn find_best_partition_order(
    residual: &[i32],
    n: usize,
    predictor_order: usize,
    min_po: u32,
    max_po: u32,
    allow_escape: bool,
) -> PartitionPlan {
    debug_assert_eq!(residual.len(), n - predictor_order);

    // Precompute per-partition absolute sums and max-abs at max_po, then fold
    // pairs upward to get every coarser order "for free".
    let max_parts = 1usize << max_po;
    let mut sums: Vec<u64> = vec![0; max_parts];
    let mut max_abs: Vec<u32> = vec![0; max_parts];
    {
        let mut idx = 0usize;
        for part in 0..max_parts {
            let len = partition_length(n, predictor_order, max_po, part);
            let mut s = 0u64;
            let mut m = 0u32;
            for _ in 0..len {
                let v = residual[idx].unsigned_abs();
                s += v as u64;
                m = m.max(v);
                idx += 1;
            }
            sums[part] = s;
            max_abs[part] = m;
        }
    }

    let mut best: Option<PartitionPlan> = None;

    let mut cur_sums = sums.clone();
    let mut cur_max = max_abs.clone();
    let mut po = max_po;

    loop {
        let parts = 1usize << po;
        let param_len = RICE1_PARAM_LEN;
        let escape_limit = RICE1_ESCAPE_PARAMETER;

        let mut partitions = Vec::with_capacity(parts);
        let mut total_bits = PARTITION_ORDER_LEN as u64;
        let mut needs_rice2 = false;

        for part in 0..parts {
            let len = partition_length(n, predictor_order, po, part) as u64;
            let (k, rice_cost) =
                best_parameter_for_partition(len, cur_sums[part], param_len, escape_limit);

            if k > 14 {
                needs_rice2 = true;
            }

            if allow_escape {
                let raw_bits = if cur_max[part] == 0 { 1 } else { 32 - cur_max[part].leading_zeros() + 1 };
                let escape_cost = RAW_BITS_LEN as u64 + raw_bits as u64 * len;
                if escape_cost < rice_cost {
                    partitions.push(Partition::Escape { raw_bits });
                    total_bits += param_len as u64 + escape_cost;
                    continue;
                }
            }

            partitions.push(Partition::Rice { k });
            total_bits += param_len as u64 + rice_cost;
        }

        let method = if needs_rice2 { RiceMethod::Rice2 } else { RiceMethod::Rice1 };
        // Re-account the parameter field width if the method was upgraded:
        // Rice2 uses 5-bit fields instead of 4, one extra bit per partition.
        if needs_rice2 {
            total_bits += parts as u64;
        }

        let candidate = PartitionPlan { order: po, method, partitions, total_bits };

        let is_better = match &best {
            None => true,
            Some(b) => candidate.total_bits < b.total_bits,
        };
        if is_better {
            best = Some(candidate);
        }

        if po == min_po {
            break;
        }

        // Fold pairs upward for the next coarser order.
        let half = cur_sums.len() / 2;
        let mut next_sums = vec![0u64; half];
        let mut next_max = vec![0u32; half];
        for i in 0..half {
            next_sums[i] = cur_sums[2 * i] + cur_sums[2 * i + 1];
            next_max[i] = cur_max[2 * i].max(cur_max[2 * i + 1]);
        }
        cur_sums = next_sums;
        cur_max = next_max;
        po -= 1;
    }

    best.expect("max_po >= min_po guarantees at least one candidate")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_lengths_sum_to_residual_length() {
        let n = 64;
        let predictor_order = 2;
        let order = 3;
        let parts = 1usize << order;
        let total: usize = (0..parts).map(|i| partition_length(n, predictor_order, order, i)).sum();
        assert_eq!(total, n - predictor_order);
    }

    #[test]
    fn best_partition_order_picks_something_reasonable_for_uniform_noise() {
        let residual: Vec<i32> = (0..256).map(|i| ((i * 37) % 23) - 11).collect();
        let plan = find_best_partition_order(&residual, 256, 0, 0, 4, true);
        assert!(plan.order <= 4);
        assert_eq!(plan.partitions.len(), 1 << plan.order);
    }

    #[test]
    fn escape_coding_used_for_single_huge_outlier() {
        let mut residual = vec![1i32; 64];
        residual[10] = 1_000_000;
        let plan = find_best_partition_order(&residual, 64, 0, 0, 0, true);
        assert!(plan
            .partitions
            .iter()
            .any(|p| matches!(p, Partition::Escape { .. })));
    }

    #[test]
    fn method_upgrades_to_rice2_for_large_parameters() {
        let residual: Vec<i32> = vec![1_000_000; 32];
        let plan = find_best_partition_order(&residual, 32, 0, 0, 0, false);
        assert_eq!(plan.method, RiceMethod::Rice2);
    }
}
