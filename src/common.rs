//! Shared numeric helpers used across grid building, likelihood evaluation
//! and result reduction.

/// Convert flux to magnitude at zeropoint `zp`. Non-positive flux maps to NaN.
pub fn flux2mag(flux: f64, zp: f64) -> f64 {
    if flux > 0.0 {
        -2.5 * flux.log10() + zp
    } else {
        f64::NAN
    }
}

// ---------------------------------------------------------------------------
// Math utilities
// ---------------------------------------------------------------------------

pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Quantile of an already-sorted slice, with linear interpolation between
/// order statistics. `q` is clamped to [0, 1].
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Trapezoidal integral of sampled `y(x)`.
pub fn trapz(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    let mut acc = 0.0;
    for i in 1..x.len() {
        acc += 0.5 * (y[i] + y[i - 1]) * (x[i] - x[i - 1]);
    }
    acc
}

/// Linear interpolation of `(x, y)` onto the query points `xi`.
///
/// `x` must be monotonically increasing. Query points outside the range of
/// `x` are clamped to the boundary values.
pub fn interp_linear(x: &[f64], y: &[f64], xi: &[f64]) -> Vec<f64> {
    debug_assert_eq!(x.len(), y.len());
    let n = x.len();
    xi.iter()
        .map(|&q| {
            if q <= x[0] {
                return y[0];
            }
            if q >= x[n - 1] {
                return y[n - 1];
            }
            let hi = x.partition_point(|&v| v < q).clamp(1, n - 1);
            let lo = hi - 1;
            let frac = (q - x[lo]) / (x[hi] - x[lo]);
            y[lo] + frac * (y[hi] - y[lo])
        })
        .collect()
}

/// Convolve `y` with a Gaussian kernel of standard deviation `sigma`
/// (in samples), truncated at four sigma and renormalized at the edges.
pub fn gaussian_smooth(y: &[f64], sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 || y.len() < 2 {
        return y.to_vec();
    }
    let half = ((4.0 * sigma).ceil() as usize).clamp(1, y.len() - 1);
    let weights: Vec<f64> = (0..=half)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();

    let n = y.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let mut num = weights[0] * y[i];
        let mut den = weights[0];
        for k in 1..=half {
            if i >= k {
                num += weights[k] * y[i - k];
                den += weights[k];
            }
            if i + k < n {
                num += weights[k] * y[i + k];
                den += weights[k];
            }
        }
        out.push(num / den);
    }
    out
}

/// Convert NaN/Inf to None for JSON safety.
pub fn finite_or_none(v: f64) -> Option<f64> {
    if v.is_finite() {
        Some(v)
    } else {
        None
    }
}
