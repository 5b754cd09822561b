//! Shape-preserving piecewise-cubic (Akima) interpolation.
//!
//! Model spectra carry sharp absorption lines that plain cubic splines
//! overshoot near the line cores. Akima's method (1970) limits each knot
//! derivative by the local slope differences, so the interpolant stays
//! close to the data through sharp features while remaining C1.

/// One-dimensional Akima interpolator over strictly increasing knots.
///
/// Exact at the knots by construction: evaluating at any `x[i]` returns
/// `y[i]`.
#[derive(Debug, Clone)]
pub struct AkimaSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Per-interval cubic coefficients in Hermite form:
    /// y = c0 + c1*dx + c2*dx^2 + c3*dx^3 with dx = x - xs[i].
    coeffs: Vec<[f64; 4]>,
}

impl AkimaSpline {
    /// Construct from data points. `xs` must be strictly increasing and hold
    /// at least two points; two points degenerate to linear interpolation.
    ///
    /// # Panics
    /// Panics if the lengths differ, fewer than 2 points are given, or `xs`
    /// is not strictly increasing.
    pub fn new(xs: Vec<f64>, ys: Vec<f64>) -> Self {
        assert_eq!(xs.len(), ys.len(), "xs and ys must have equal length");
        assert!(xs.len() >= 2, "need at least 2 data points");
        for i in 1..xs.len() {
            assert!(
                xs[i] > xs[i - 1],
                "xs must be strictly increasing at index {}",
                i
            );
        }

        let n = xs.len();
        let nseg = n - 1;

        // Interval slopes, extended by two ghost slopes on each side so the
        // Akima weights are defined at the boundary knots.
        let mut m = Vec::with_capacity(nseg + 4);
        m.push(0.0);
        m.push(0.0);
        for i in 0..nseg {
            m.push((ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i]));
        }
        m[1] = 2.0 * m[2] - m.get(3).copied().unwrap_or(m[2]);
        m[0] = 2.0 * m[1] - m[2];
        let last = m[m.len() - 1];
        let prev = if m.len() >= 4 { m[m.len() - 2] } else { last };
        m.push(2.0 * last - prev);
        let k = m.len();
        m.push(2.0 * m[k - 1] - m[k - 2]);

        // Knot derivatives. m[i + 2] is the slope of interval i.
        let mut t = Vec::with_capacity(n);
        for i in 0..n {
            let m_im2 = m[i];
            let m_im1 = m[i + 1];
            let m_i = m[i + 2];
            let m_ip1 = m[i + 3];
            let w1 = (m_ip1 - m_i).abs();
            let w2 = (m_im1 - m_im2).abs();
            if w1 + w2 > 1e-9 * (m_i.abs() + m_im1.abs()).max(1e-300) {
                t.push((w1 * m_im1 + w2 * m_i) / (w1 + w2));
            } else {
                t.push(0.5 * (m_im1 + m_i));
            }
        }

        let mut coeffs = Vec::with_capacity(nseg);
        for i in 0..nseg {
            let h = xs[i + 1] - xs[i];
            let mi = m[i + 2];
            let c0 = ys[i];
            let c1 = t[i];
            let c2 = (3.0 * mi - 2.0 * t[i] - t[i + 1]) / h;
            let c3 = (t[i] + t[i + 1] - 2.0 * mi) / (h * h);
            coeffs.push([c0, c1, c2, c3]);
        }

        Self { xs, ys, coeffs }
    }

    /// Evaluate at `x`. Outside the knot range the boundary polynomial is
    /// used; callers that must not extrapolate check bounds themselves.
    pub fn evaluate(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if let Some(i) = self.node_index(x) {
            return self.ys[i];
        }
        let seg = self
            .xs
            .partition_point(|&v| v <= x)
            .clamp(1, n - 1)
            - 1;
        let dx = x - self.xs[seg];
        let [c0, c1, c2, c3] = self.coeffs[seg];
        c0 + dx * (c1 + dx * (c2 + dx * c3))
    }

    /// Evaluate at many points.
    pub fn evaluate_many(&self, xi: &[f64]) -> Vec<f64> {
        xi.iter().map(|&x| self.evaluate(x)).collect()
    }

    fn node_index(&self, x: f64) -> Option<usize> {
        let i = self.xs.partition_point(|&v| v < x);
        if i < self.xs.len() && self.xs[i] == x {
            Some(i)
        } else {
            None
        }
    }
}
