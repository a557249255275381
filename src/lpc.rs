// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `lpc` module implements linear predictive coding: windowing and
//! apodization, autocorrelation, Levinson-Durbin recursion, coefficient
//! quantization, and the residual/restore filters themselves.

use crate::error::{Error, Result};

/// The largest LPC predictor order.
pub const MAX_ORDER: usize = 32;

/// An apodization (windowing) function applied to a block before
/// autocorrelation analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Apodization {
    Bartlett,
    BartlettHann,
    Blackman,
    BlackmanHarris4Term92dB,
    Connes,
    Flattop,
    Gauss(f64),
    Hamming,
    Hann,
    KaiserBessel,
    Nuttall,
    Rectangle,
    Triangle,
    Tukey(f64),
    Welch,
}

/// Fills `out` with the window function evaluated at `n` equally spaced
/// points over `[0, n)`.
pub fn build_window(apodization: Apodization, n: usize, out: &mut Vec<f32>) {
    out.clear();
    out.resize(n, 0.0);
    if n == 0 {
        return;
    }
    let nf = n as f64;
    let last = (n - 1) as f64;

    for i in 0..n {
        let x = i as f64;
        let w = match apodization {
            Apodization::Rectangle => 1.0,
            Apodization::Bartlett => 1.0 - (2.0 * x / last - 1.0).abs(),
            Apodization::Triangle => 1.0 - ((x - last / 2.0) / (nf / 2.0)).abs(),
            Apodization::Welch => {
                let t = (x - last / 2.0) / (last / 2.0);
                1.0 - t * t
            }
            Apodization::Hann => {
                0.5 - 0.5 * (2.0 * std::f64::consts::PI * x / last).cos()
            }
            Apodization::Hamming => {
                0.53836 - 0.46164 * (2.0 * std::f64::consts::PI * x / last).cos()
            }
            Apodization::BartlettHann => {
                let t = x / last - 0.5;
                0.62 - 0.48 * t.abs() - 0.38 * (2.0 * std::f64::consts::PI * t).cos()
            }
            Apodization::Blackman => {
                let t = 2.0 * std::f64::consts::PI * x / last;
                0.42659 - 0.49656 * t.cos() + 0.076849 * (2.0 * t).cos()
            }
            Apodization::BlackmanHarris4Term92dB => {
                let t = 2.0 * std::f64::consts::PI * x / last;
                0.35875 - 0.48829 * t.cos() + 0.14128 * (2.0 * t).cos() - 0.01168 * (3.0 * t).cos()
            }
            Apodization::Nuttall => {
                let t = 2.0 * std::f64::consts::PI * x / last;
                0.355768 - 0.487396 * t.cos() + 0.144232 * (2.0 * t).cos() - 0.012604 * (3.0 * t).cos()
            }
            Apodization::Flattop => {
                let t = 2.0 * std::f64::consts::PI * x / last;
                1.0 - 1.930 * t.cos() + 1.290 * (2.0 * t).cos() - 0.388 * (3.0 * t).cos()
                    + 0.028 * (4.0 * t).cos()
            }
            Apodization::KaiserBessel => {
                let t = 2.0 * std::f64::consts::PI * x / last;
                1.0 - 0.5 * t.cos() + (2.0 / 3.0) * (2.0 * t).cos() - (1.0 / 6.0) * (3.0 * t).cos()
            }
            Apodization::Connes => {
                let t = (x - last / 2.0) / (last / 2.0);
                let v = 1.0 - t * t;
                v * v
            }
            Apodization::Gauss(stddev) => {
                let t = (x - last / 2.0) / (stddev * last / 2.0);
                (-0.5 * t * t).exp()
            }
            Apodization::Tukey(p) => {
                if p <= 0.0 {
                    1.0
                } else {
                    let edge = p * nf / 2.0;
                    if x < edge {
                        0.5 * (1.0 + (std::f64::consts::PI * (x / edge - 1.0)).cos())
                    } else if x > last - edge {
                        0.5 * (1.0 + (std::f64::consts::PI * ((x - last) / edge + 1.0)).cos())
                    } else {
                        1.0
                    }
                }
            }
        };
        out[i] = w as f32;
    }
}

/// Multiplies `data` element-wise by `window` into `out`.
pub fn window_data(data: &[i32], window: &[f32], out: &mut Vec<f32>) {
    debug_assert_eq!(data.len(), window.len());
    out.clear();
    out.extend(data.iter().zip(window.iter()).map(|(&s, &w)| s as f32 * w));
}

/// Computes `autoc[k] = sum_i data[i] * data[i+k]` for `k in [0, lag)`.
pub fn autocorrelation(data: &[f32], lag: usize, autoc: &mut Vec<f64>) {
    autoc.clear();
    autoc.resize(lag, 0.0);
    let n = data.len();
    for k in 0..lag {
        let mut sum = 0.0f64;
        for i in k..n {
            sum += data[i] as f64 * data[i - k] as f64;
        }
        autoc[k] = sum;
    }
}

/// The result of running Levinson-Durbin up to `max_order`: the coefficients
/// for every order `1..=max_order` (FIR-predictor sign convention, i.e.
/// negated relative to Levinson's natural reflection coefficients) and the
/// prediction error after each order.
pub struct LevinsonDurbin {
    /// `coefficients[order - 1]` holds `order` coefficients.
    pub coefficients: Vec<Vec<f64>>,
    /// `error[order - 1]` is the residual energy after that order.
    pub error: Vec<f64>,
    /// The highest order actually computed; may be less than requested if
    /// the recursion became degenerate (zero error, or zero autoc[0]).
    pub max_order: usize,
}

/// Runs the Levinson-Durbin recursion on `autoc` (which must have at least
/// `max_order + 1` entries), producing LPC coefficients for every order up
/// to `max_order`.
pub fn compute_lp_coefficients(autoc: &[f64], max_order: usize) -> LevinsonDurbin {
    let mut coefficients = Vec::with_capacity(max_order);
    let mut error_hist = Vec::with_capacity(max_order);

    if autoc[0] == 0.0 {
        return LevinsonDurbin { coefficients, error: error_hist, max_order: 0 };
    }

    let mut lpc = vec![0.0f64; max_order];
    let mut err = autoc[0];
    let mut reached = 0usize;

    for i in 0..max_order {
        let mut acc = autoc[i + 1];
        for j in 0..i {
            acc -= lpc[j] * autoc[i - j];
        }
        let k = if err != 0.0 { acc / err } else { 0.0 };

        let mut new_lpc = lpc.clone();
        new_lpc[i] = k;
        for j in 0..i {
            new_lpc[j] = lpc[j] - k * lpc[i - 1 - j];
        }
        lpc = new_lpc;

        err *= 1.0 - k * k;

        // Coefficients are stored negated (FIR-predictor convention): the
        // decoder computes a prediction as `sum(coeff[j] * history[j])` and
        // subtracts it, rather than adding Levinson's natural reflection form.
        coefficients.push(lpc[..=i].iter().map(|&c| -c).collect());
        error_hist.push(err.max(0.0));
        reached = i + 1;

        if err <= 0.0 {
            break;
        }
    }

    LevinsonDurbin { coefficients, error: error_hist, max_order: reached }
}

/// `0.5 * log2(ln(2)^2 * err / n)`, clamped to `[0, +inf)`; `+inf` is
/// represented as `1e32` so it participates in arithmetic comparisons
/// without needing a special case at call sites.
pub fn expected_bits_per_residual_sample(err: f64, n: usize) -> f64 {
    if err <= 0.0 || n == 0 {
        return 0.0;
    }
    let ln2 = std::f64::consts::LN_2;
    let value = 0.5 * (ln2 * ln2 * err / n as f64).log2();
    if !value.is_finite() {
        1e32
    } else {
        value.max(0.0)
    }
}

/// Picks the LPC order minimizing `bits_per_sample * (n - order) + order *
/// overhead_per_order`, where `bits_per_sample` for order `o` is
/// `expected_bits_per_residual_sample(errors[o-1], n)`.
pub fn compute_best_order(errors: &[f64], n: usize, overhead_per_order: f64) -> usize {
    let mut best_order = 1;
    let mut best_bits = f64::MAX;

    for (idx, &err) in errors.iter().enumerate() {
        let order = idx + 1;
        let bits_per_sample = expected_bits_per_residual_sample(err, n);
        let total = bits_per_sample * (n.saturating_sub(order)) as f64
            + order as f64 * overhead_per_order;
        if total < best_bits {
            best_bits = total;
            best_order = order;
        }
    }

    best_order
}

/// The outcome of [`quantize_coefficients`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizeStatus {
    Ok,
    /// Every coefficient was zero; the caller should fall back (this
    /// indicates the constant-subframe detector should have fired instead).
    AllZero,
}

/// Quantizes the floating-point LPC coefficients `lp_coeff` to `precision`
/// bits (including the sign bit) using error-feedback rounding, per §4.4.
///
/// Returns the quantized coefficients, the shift to apply on restore (never
/// negative; see the format quirk documented in `DESIGN.md`), and a status.
pub fn quantize_coefficients(
    lp_coeff: &[f64],
    precision: u32,
) -> (Vec<i32>, i32, QuantizeStatus) {
    let precision = precision.saturating_sub(1);
    let qmax: i64 = (1i64 << precision) - 1;
    let qmin: i64 = -qmax - 1;

    let cmax = lp_coeff.iter().fold(0.0f64, |m, &c| m.max(c.abs()));
    if cmax <= 0.0 {
        return (vec![0; lp_coeff.len()], 0, QuantizeStatus::AllZero);
    }

    let log2cmax = cmax.log2().floor() as i32;
    let mut shift = precision as i32 - log2cmax - 1;
    shift = shift.clamp(-(1 << 4), (1 << 4) - 1);

    // A negative shift cannot be represented on restore (the reference
    // decoder treats it as a no-op), so it is folded into the quantization
    // scale instead and the emitted shift is clamped to zero.
    let scale = if shift < 0 { 2.0f64.powi(shift) } else { 2.0f64.powi(shift) };
    let emit_shift = shift.max(0);

    let mut qlp = Vec::with_capacity(lp_coeff.len());
    let mut error = 0.0f64;
    for &c in lp_coeff {
        error += c * scale;
        let mut q = error.round() as i64;
        q = q.clamp(qmin, qmax);
        error -= q as f64;
        qlp.push(q as i32);
    }

    (qlp, emit_shift, QuantizeStatus::Ok)
}

/// Computes the LPC residual: `out[i] = data[i] - ((sum qlp[j]*data[i-1-j]) >> shift)`.
///
/// `data` must contain `order` warmup samples before `data[order]`, the
/// first sample a residual is computed for. Uses `i64` accumulation
/// throughout; callers needing a narrower fast path may specialize, but a
/// single correct implementation is provided here.
pub fn residual_from_qlp(data: &[i32], qlp: &[i32], shift: i32, out: &mut Vec<i32>) {
    let order = qlp.len();
    out.clear();
    out.reserve(data.len() - order);
    for i in order..data.len() {
        let mut acc: i64 = 0;
        for j in 0..order {
            acc += qlp[j] as i64 * data[i - 1 - j] as i64;
        }
        let prediction = if shift > 0 { acc >> shift } else { acc };
        out.push((data[i] as i64 - prediction) as i32);
    }
}

/// Restores `signal[order..]` in place given the warmup `signal[0..order]`
/// and the residual, inverting [`residual_from_qlp`].
pub fn restore_signal(residual: &[i32], qlp: &[i32], shift: i32, signal: &mut [i32]) {
    let order = qlp.len();
    for (i, &r) in residual.iter().enumerate() {
        let idx = order + i;
        let mut acc: i64 = 0;
        for j in 0..order {
            acc += qlp[j] as i64 * signal[idx - 1 - j] as i64;
        }
        let prediction = if shift > 0 { acc >> shift } else { acc };
        signal[idx] = (r as i64 + prediction) as i32;
    }
}

/// Parses an apodization spec list (`;`-separated window names, with
/// parametric `gauss(sigma)` / `tukey(p)` forms) per §6.3.
///
/// Parsing is locale-independent: decimal points only, `.` never `,`.
pub fn parse_apodizations(spec: &str) -> Result<Vec<Apodization>> {
    let mut windows = Vec::new();
    for part in spec.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        windows.push(parse_one_apodization(part)?);
        if windows.len() > 32 {
            return Err(Error::FormatError("too many apodization windows (max 32)"));
        }
    }
    if windows.is_empty() {
        windows.push(Apodization::Tukey(0.5));
    }
    Ok(windows)
}

fn parse_one_apodization(part: &str) -> Result<Apodization> {
    let lower = part.to_ascii_lowercase();
    if let Some(arg) = parse_call(&lower, "gauss") {
        let stddev: f64 = arg
            .parse()
            .map_err(|_| Error::FormatError("invalid gauss() stddev"))?;
        if !(0.0..=0.5).contains(&stddev) {
            return Err(Error::FormatError("gauss() stddev out of range"));
        }
        return Ok(Apodization::Gauss(stddev));
    }
    if let Some(arg) = parse_call(&lower, "tukey") {
        let p: f64 = arg
            .parse()
            .map_err(|_| Error::FormatError("invalid tukey() parameter"))?;
        if !(0.0..=1.0).contains(&p) {
            return Err(Error::FormatError("tukey() parameter out of range"));
        }
        return Ok(Apodization::Tukey(p));
    }
    Ok(match lower.as_str() {
        "bartlett" => Apodization::Bartlett,
        "bartlett_hann" | "bartletthann" => Apodization::BartlettHann,
        "blackman" => Apodization::Blackman,
        "blackman_harris_4term_92db" => Apodization::BlackmanHarris4Term92dB,
        "connes" => Apodization::Connes,
        "flattop" => Apodization::Flattop,
        "hamming" => Apodization::Hamming,
        "hann" => Apodization::Hann,
        "kaiser_bessel" => Apodization::KaiserBessel,
        "nuttall" => Apodization::Nuttall,
        "rectangle" => Apodization::Rectangle,
        "triangle" => Apodization::Triangle,
        "welch" => Apodization::Welch,
        _ => return Err(Error::FormatError("unknown apodization window")),
    })
}

fn parse_call<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("{}(", name);
    if s.starts_with(&prefix) && s.ends_with(')') {
        Some(&s[prefix.len()..s.len() - 1])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangle_window_is_all_ones() {
        let mut w = Vec::new();
        build_window(Apodization::Rectangle, 8, &mut w);
        assert!(w.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn autocorrelation_of_constant_signal() {
        let data = vec![2.0f32; 16];
        let mut autoc = Vec::new();
        autocorrelation(&data, 4, &mut autoc);
        assert_eq!(autoc[0], 16.0 * 4.0);
        assert_eq!(autoc[1], 15.0 * 4.0);
    }

    #[test]
    fn quantize_and_filter_round_trip() {
        let order = 2;
        let qlp = vec![10i32, -3];
        let shift = 4;

        let signal: Vec<i32> = vec![1, 2, 4, 8, 16, 32, 64, 100, 3, -5, 8];
        let mut residual = Vec::new();
        residual_from_qlp(&signal, &qlp, shift, &mut residual);

        let mut restored = vec![0i32; signal.len()];
        restored[..order].copy_from_slice(&signal[..order]);
        restore_signal(&residual, &qlp, shift, &mut restored);

        assert_eq!(&restored[order..], &signal[order..]);
    }

    #[test]
    fn quantize_coefficients_respects_precision() {
        let coeffs = vec![1.999, -0.5, 0.25];
        let (qlp, shift, status) = quantize_coefficients(&coeffs, 12);
        assert_eq!(status, QuantizeStatus::Ok);
        assert!(shift >= 0);
        let limit = 1i32 << 11;
        assert!(qlp.iter().all(|&q| q >= -limit && q < limit));
    }

    #[test]
    fn all_zero_coefficients_reported() {
        let (_, _, status) = quantize_coefficients(&[0.0, 0.0], 10);
        assert_eq!(status, QuantizeStatus::AllZero);
    }

    #[test]
    fn parses_parametric_apodizations() {
        let windows = parse_apodizations("tukey(0.25);gauss(0.2);hann").unwrap();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0], Apodization::Tukey(0.25));
        assert_eq!(windows[1], Apodization::Gauss(0.2));
        assert_eq!(windows[2], Apodization::Hann);
    }

    #[test]
    fn empty_apodization_spec_defaults_to_tukey_half() {
        let windows = parse_apodizations("").unwrap();
        assert_eq!(windows, vec![Apodization::Tukey(0.5)]);
    }

    #[test]
    fn levinson_durbin_on_ar_process_prefers_its_order() {
        // A simple AR(2) process: s[i] = 1.5*s[i-1] - 0.7*s[i-2] + noise-free
        // excitation at i == 0, 1. Levinson-Durbin should find low error by
        // order 2 and the order search should not prefer going much higher.
        let mut s = vec![1.0f64, 0.5];
        for i in 2..64 {
            s.push(1.5 * s[i - 1] - 0.7 * s[i - 2]);
        }
        let data: Vec<f32> = s.iter().map(|&v| v as f32).collect();
        let mut autoc = Vec::new();
        autocorrelation(&data, 9, &mut autoc);
        let ld = compute_lp_coefficients(&autoc, 8);
        let order = compute_best_order(&ld.error, data.len(), 32.0);
        assert!(order >= 2);
    }
}
