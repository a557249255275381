// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `fixed` module implements the five hard-coded polynomial predictors
//! (orders 0 through 4) used by FIXED subframes, on both the encode side
//! (residual computation and order selection) and the decode side (signal
//! restoration).

/// The largest fixed predictor order.
pub const MAX_ORDER: usize = 4;

/// Computes the order-`order` fixed-predictor residual of `signal` into
/// `residual`.
///
/// `signal` must contain at least `order` samples of history before the
/// first residual sample, i.e. `signal[0..order]` are the warmup samples and
/// `residual` receives `signal.len() - order` values.
pub fn compute_residual(signal: &[i32], order: usize, residual: &mut Vec<i32>) {
    residual.clear();
    residual.extend(match order {
        0 => signal.iter().copied().collect::<Vec<_>>(),
        1 => signal.windows(2).map(|w| w[1] - w[0]).collect(),
        2 => signal.windows(3).map(|w| w[2] - 2 * w[1] + w[0]).collect(),
        3 => signal
            .windows(4)
            .map(|w| w[3] - 3 * w[2] + 3 * w[1] - w[0])
            .collect(),
        4 => signal
            .windows(5)
            .map(|w| w[4] - 4 * w[3] + 6 * w[2] - 4 * w[1] + w[0])
            .collect(),
        _ => unreachable!("fixed predictor order must be 0..=4"),
    });
}

/// Restores `signal[order..]` in place from `residual`, given that
/// `signal[0..order]` already holds the warmup samples.
pub fn restore_signal(residual: &[i32], order: usize, signal: &mut [i32]) {
    match order {
        0 => {
            for (i, &r) in residual.iter().enumerate() {
                signal[i] = r;
            }
        }
        1 => {
            for (i, &r) in residual.iter().enumerate() {
                signal[i + 1] = r + signal[i];
            }
        }
        2 => {
            for (i, &r) in residual.iter().enumerate() {
                signal[i + 2] = r + 2 * signal[i + 1] - signal[i];
            }
        }
        3 => {
            for (i, &r) in residual.iter().enumerate() {
                signal[i + 3] = r + 3 * signal[i + 2] - 3 * signal[i + 1] + signal[i];
            }
        }
        4 => {
            for (i, &r) in residual.iter().enumerate() {
                signal[i + 4] =
                    r + 4 * signal[i + 3] - 6 * signal[i + 2] + 4 * signal[i + 1] - signal[i];
            }
        }
        _ => unreachable!("fixed predictor order must be 0..=4"),
    }
}

/// The outcome of [`best_predictor`]: the chosen order, and the estimated
/// residual bits-per-sample for every order, used downstream as a Rice
/// parameter estimate.
pub struct FixedPredictorSelection {
    pub order: usize,
    pub rbps: [f64; MAX_ORDER + 1],
}

/// Picks the fixed predictor order (0..=4) minimizing the sum of absolute
/// residuals over `signal`, given `history` extra samples of context before
/// `signal[0]` (so orders above 0 do not need to shrink the residual run).
///
/// `signal` is the full block (history excluded); `history` are the samples
/// immediately preceding it, most recent last, at least 4 of them. The
/// returned `rbps[order]` is `log2(ln(2) * mean_abs_residual)` per §4.3,
/// clamped to be non-negative.
pub fn best_predictor(history: &[i32], signal: &[i32]) -> FixedPredictorSelection {
    debug_assert!(history.len() >= MAX_ORDER);
    let n = signal.len();
    let hist_len = history.len();

    // Build an extended buffer so every order's window function can run
    // uniformly without special-casing the first few residual samples.
    let mut extended = Vec::with_capacity(hist_len + n);
    extended.extend_from_slice(&history[hist_len - MAX_ORDER..]);
    extended.extend_from_slice(signal);

    let mut sums = [0u64; MAX_ORDER + 1];
    let mut residual = Vec::with_capacity(n);

    for order in 0..=MAX_ORDER {
        compute_residual(&extended, order, &mut residual);
        // Only the last `n` residuals correspond to `signal`; compute_residual
        // on `extended` (which has exactly MAX_ORDER history samples) yields
        // `extended.len() - order` residuals, i.e. `n + (MAX_ORDER - order)`.
        let skip = MAX_ORDER - order;
        let sum: u64 = residual[skip..].iter().map(|&v| (v as i64).unsigned_abs()).sum();
        sums[order] = sum;
    }

    let mut rbps = [0.0f64; MAX_ORDER + 1];
    for order in 0..=MAX_ORDER {
        let mean = sums[order] as f64 / n.max(1) as f64;
        let bits = if mean > 0.0 {
            (std::f64::consts::LN_2 * mean).log2()
        } else {
            0.0
        };
        rbps[order] = bits.max(0.0);
    }

    let best_order = (0..=MAX_ORDER).min_by_key(|&o| sums[o]).unwrap_or(0);

    FixedPredictorSelection { order: best_order, rbps }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_zero_residual_is_identity() {
        let signal = [1, 2, 3, 4];
        let mut residual = Vec::new();
        compute_residual(&signal, 0, &mut residual);
        assert_eq!(residual, signal);
    }

    #[test]
    fn order_one_round_trips() {
        let signal = [10, 12, 9, 20, 5];
        let mut residual = Vec::new();
        compute_residual(&signal, 1, &mut residual);

        let mut restored = vec![0i32; signal.len()];
        restored[0] = signal[0];
        restore_signal(&residual, 1, &mut restored);
        assert_eq!(restored, signal);
    }

    #[test]
    fn order_three_polynomial_has_zero_residual_at_order_three() {
        // s[i] = i^3 is an order-3 polynomial in i, so the order-3 fixed
        // predictor (which cancels polynomials up to degree 3) is exact.
        let signal: Vec<i32> = (0..12).map(|i: i32| i * i * i).collect();
        let mut residual = Vec::new();
        compute_residual(&signal, 3, &mut residual);
        assert!(residual.iter().all(|&r| r == 0));
    }

    #[test]
    fn best_predictor_prefers_matching_polynomial_order() {
        let history = vec![-3, -2, -1, 0];
        let signal: Vec<i32> = (1..20).map(|i: i32| i * i * i).collect();
        let choice = best_predictor(&history, &signal);
        assert!(choice.order <= 3);
    }

    #[test]
    fn all_restore_orders_invert_compute() {
        let history = vec![5, -3, 2, 0, 1, 7];
        for order in 0..=MAX_ORDER {
            let mut extended = history.clone();
            let signal: Vec<i32> = vec![3, -1, 4, 1, 5, 9, 2, 6];
            extended.extend_from_slice(&signal);
            let warmup_start = extended.len() - signal.len() - order;

            let mut residual = Vec::new();
            compute_residual(&extended[warmup_start..], order, &mut residual);

            let mut restored = vec![0i32; order + residual.len()];
            restored[..order].copy_from_slice(&extended[warmup_start..warmup_start + order]);
            restore_signal(&residual, order, &mut restored);

            assert_eq!(&restored[order..], &extended[warmup_start + order..]);
        }
    }
}
