//! Log-space probability arithmetic.
//!
//! All per-column math in the inference engines runs on natural-log
//! probabilities stored as raw `f64`, with `f64::NEG_INFINITY` standing in
//! for probability zero. These helpers implement numerically stable
//! accumulation via log-sum-exp.

/// Numerically stable `ln(exp(a) + exp(b))`.
///
/// `NEG_INFINITY` inputs are dominated correctly.
pub fn log_sum_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (max, min) = if a >= b { (a, b) } else { (b, a) };
    max + (min - max).exp().ln_1p()
}

/// In-place log-space accumulation: `*acc = ln(exp(*acc) + exp(x))`.
pub fn log_accum_exp(acc: &mut f64, x: f64) {
    *acc = log_sum_exp(*acc, x);
}

/// Log-sum-exp over a slice. Returns `NEG_INFINITY` for an empty slice.
pub fn log_sum_exp_slice(xs: &[f64]) -> f64 {
    let max = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = xs.iter().map(|&x| (x - max).exp()).sum();
    max + sum.ln()
}

/// Log-space inner product: `logsumexp_i(a[i] + b[i])`.
///
/// The log-space analogue of a dot product between two probability vectors.
pub fn log_inner_product(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = f64::NEG_INFINITY;
    for (&ai, &bi) in a.iter().zip(b) {
        log_accum_exp(&mut acc, ai + bi);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-10;

    #[test]
    fn log_sum_exp_matches_naive() {
        let a = 2.0_f64.ln();
        let b = 3.0_f64.ln();
        assert!((log_sum_exp(a, b) - 5.0_f64.ln()).abs() < TOL);
    }

    #[test]
    fn log_sum_exp_neg_infinity() {
        assert_eq!(log_sum_exp(f64::NEG_INFINITY, 0.0), 0.0);
        assert_eq!(log_sum_exp(0.0, f64::NEG_INFINITY), 0.0);
        assert_eq!(
            log_sum_exp(f64::NEG_INFINITY, f64::NEG_INFINITY),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn log_sum_exp_extreme_magnitudes() {
        // The small term underflows away but must not produce NaN.
        let result = log_sum_exp(0.0, -1000.0);
        assert!((result - 0.0).abs() < TOL);
    }

    #[test]
    fn log_accum_exp_accumulates() {
        let mut acc = f64::NEG_INFINITY;
        for p in [0.1_f64, 0.2, 0.3, 0.4] {
            log_accum_exp(&mut acc, p.ln());
        }
        assert!((acc.exp() - 1.0).abs() < TOL);
    }

    #[test]
    fn slice_sum_matches_naive() {
        let probs: [f64; 5] = [0.05, 0.15, 0.3, 0.2, 0.1];
        let logs: Vec<f64> = probs.iter().map(|p| p.ln()).collect();
        let naive: f64 = probs.iter().sum();
        assert!((log_sum_exp_slice(&logs).exp() - naive).abs() < TOL);
    }

    #[test]
    fn slice_empty_is_impossible() {
        assert_eq!(log_sum_exp_slice(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn inner_product_matches_naive() {
        let a: [f64; 3] = [0.2, 0.5, 0.3];
        let b: [f64; 3] = [0.6, 0.1, 0.3];
        let la: Vec<f64> = a.iter().map(|p| p.ln()).collect();
        let lb: Vec<f64> = b.iter().map(|p| p.ln()).collect();
        let naive: f64 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!((log_inner_product(&la, &lb).exp() - naive).abs() < TOL);
    }

    #[test]
    fn inner_product_with_zero_entry() {
        let la = [0.5_f64.ln(), f64::NEG_INFINITY];
        let lb = [0.5_f64.ln(), 0.5_f64.ln()];
        assert!((log_inner_product(&la, &lb).exp() - 0.25).abs() < TOL);
    }
}
