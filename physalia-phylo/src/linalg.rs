//! Private dense complex linear algebra for the substitution engine.
//!
//! Implements exactly the operations the eigen engine needs, without an
//! external linear algebra crate: a complex scalar, a dense complex matrix
//! with multiplication and LU inversion, and a general (non-symmetric)
//! eigensolver via Householder Hessenberg reduction and Wilkinson-shifted
//! QR iteration to Schur form.

use physalia_core::{PhysaliaError, Result};
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// Relative tolerance for near-equality of eigenvalues and for deciding
/// that a nominally real quantity is real.
pub const NEAR_EQ_EPSILON: f64 = 1e-6;

/// Relative comparison with a unit floor, so quantities of order one or
/// smaller are compared absolutely.
pub fn near_eq(x: f64, y: f64, eps: f64) -> bool {
    (x - y).abs() <= eps * x.abs().max(y.abs()).max(1.0)
}

// ---------------------------------------------------------------------------
// Complex scalar
// ---------------------------------------------------------------------------

/// A complex number in Cartesian form.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub const ZERO: Complex = Complex { re: 0.0, im: 0.0 };
    pub const ONE: Complex = Complex { re: 1.0, im: 0.0 };

    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    pub fn real(re: f64) -> Self {
        Self { re, im: 0.0 }
    }

    /// Modulus |z|.
    pub fn abs(self) -> f64 {
        self.re.hypot(self.im)
    }

    /// Squared modulus, avoiding the square root.
    pub fn abs_sq(self) -> f64 {
        self.re * self.re + self.im * self.im
    }

    pub fn conj(self) -> Self {
        Self::new(self.re, -self.im)
    }

    pub fn scale(self, s: f64) -> Self {
        Self::new(self.re * s, self.im * s)
    }

    /// Complex exponential.
    pub fn exp(self) -> Self {
        let r = self.re.exp();
        Self::new(r * self.im.cos(), r * self.im.sin())
    }

    /// Principal square root.
    pub fn sqrt(self) -> Self {
        let r = self.abs();
        let re = ((r + self.re) * 0.5).sqrt();
        let im = ((r - self.re) * 0.5).sqrt();
        Self::new(re, if self.im < 0.0 { -im } else { im })
    }

    pub fn is_finite(self) -> bool {
        self.re.is_finite() && self.im.is_finite()
    }

    /// True if the imaginary part vanishes under [`near_eq`].
    pub fn near_real(self, eps: f64) -> bool {
        near_eq(self.im, 0.0, eps)
    }

    /// Componentwise near-equality.
    pub fn near(self, other: Complex, eps: f64) -> bool {
        near_eq(self.re, other.re, eps) && near_eq(self.im, other.im, eps)
    }
}

impl Add for Complex {
    type Output = Complex;
    fn add(self, rhs: Complex) -> Complex {
        Complex::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl AddAssign for Complex {
    fn add_assign(&mut self, rhs: Complex) {
        *self = *self + rhs;
    }
}

impl Sub for Complex {
    type Output = Complex;
    fn sub(self, rhs: Complex) -> Complex {
        Complex::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl SubAssign for Complex {
    fn sub_assign(&mut self, rhs: Complex) {
        *self = *self - rhs;
    }
}

impl Mul for Complex {
    type Output = Complex;
    fn mul(self, rhs: Complex) -> Complex {
        Complex::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

impl Div for Complex {
    type Output = Complex;
    fn div(self, rhs: Complex) -> Complex {
        let d = rhs.abs_sq();
        Complex::new(
            (self.re * rhs.re + self.im * rhs.im) / d,
            (self.im * rhs.re - self.re * rhs.im) / d,
        )
    }
}

impl Neg for Complex {
    type Output = Complex;
    fn neg(self) -> Complex {
        Complex::new(-self.re, -self.im)
    }
}

// ---------------------------------------------------------------------------
// Dense complex matrix
// ---------------------------------------------------------------------------

/// A dense square complex matrix in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexMatrix {
    n: usize,
    data: Vec<Complex>,
}

impl ComplexMatrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![Complex::ZERO; n * n],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n);
        for i in 0..n {
            m.set(i, i, Complex::ONE);
        }
        m
    }

    /// Lift a real matrix into the complex plane.
    pub fn from_real(rows: &[Vec<f64>]) -> Self {
        let n = rows.len();
        let mut m = Self::zeros(n);
        for (i, row) in rows.iter().enumerate() {
            for (j, &x) in row.iter().enumerate() {
                m.set(i, j, Complex::real(x));
            }
        }
        m
    }

    pub fn size(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> Complex {
        self.data[i * self.n + j]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, v: Complex) {
        self.data[i * self.n + j] = v;
    }

    #[inline]
    pub fn add_to(&mut self, i: usize, j: usize, v: Complex) {
        self.data[i * self.n + j] += v;
    }

    pub fn matmul(&self, other: &ComplexMatrix) -> ComplexMatrix {
        let n = self.n;
        let mut out = ComplexMatrix::zeros(n);
        for i in 0..n {
            for k in 0..n {
                let aik = self.get(i, k);
                if aik == Complex::ZERO {
                    continue;
                }
                for j in 0..n {
                    out.add_to(i, j, aik * other.get(k, j));
                }
            }
        }
        out
    }

    /// Largest entry modulus.
    pub fn max_abs(&self) -> f64 {
        self.data.iter().map(|c| c.abs()).fold(0.0, f64::max)
    }

    /// Invert via LU decomposition with partial pivoting.
    ///
    /// # Errors
    ///
    /// `NumericalFailure` if a pivot is numerically zero.
    pub fn lu_invert(&self) -> Result<ComplexMatrix> {
        let n = self.n;
        let mut lu = self.clone();
        let mut perm: Vec<usize> = (0..n).collect();
        let scale = self.max_abs().max(f64::MIN_POSITIVE);

        for k in 0..n {
            // Pivot on the largest remaining entry in column k.
            let mut pivot_row = k;
            let mut pivot_abs = lu.get(k, k).abs();
            for i in k + 1..n {
                let a = lu.get(i, k).abs();
                if a > pivot_abs {
                    pivot_abs = a;
                    pivot_row = i;
                }
            }
            if pivot_abs <= f64::EPSILON * scale {
                return Err(PhysaliaError::NumericalFailure(format!(
                    "singular matrix in LU inversion (pivot {} at column {})",
                    pivot_abs, k
                )));
            }
            if pivot_row != k {
                for j in 0..n {
                    let tmp = lu.get(k, j);
                    lu.set(k, j, lu.get(pivot_row, j));
                    lu.set(pivot_row, j, tmp);
                }
                perm.swap(k, pivot_row);
            }
            let pivot = lu.get(k, k);
            for i in k + 1..n {
                let factor = lu.get(i, k) / pivot;
                lu.set(i, k, factor);
                for j in k + 1..n {
                    let v = lu.get(i, j) - factor * lu.get(k, j);
                    lu.set(i, j, v);
                }
            }
        }

        // Solve LU x = e_p for each permuted unit vector.
        let mut inv = ComplexMatrix::zeros(n);
        let mut col = vec![Complex::ZERO; n];
        for e in 0..n {
            for (i, c) in col.iter_mut().enumerate() {
                *c = if perm[i] == e {
                    Complex::ONE
                } else {
                    Complex::ZERO
                };
            }
            // Forward substitution (unit lower triangle).
            for i in 1..n {
                for j in 0..i {
                    let v = col[i] - lu.get(i, j) * col[j];
                    col[i] = v;
                }
            }
            // Back substitution.
            for i in (0..n).rev() {
                for j in i + 1..n {
                    let v = col[i] - lu.get(i, j) * col[j];
                    col[i] = v;
                }
                col[i] = col[i] / lu.get(i, i);
            }
            for i in 0..n {
                inv.set(i, e, col[i]);
            }
        }
        Ok(inv)
    }
}

// ---------------------------------------------------------------------------
// General eigendecomposition
// ---------------------------------------------------------------------------

/// Eigendecomposition of a general real square matrix: eigenvalues λ, the
/// right-eigenvector matrix V (columns are eigenvectors), and V⁻¹, with
/// `V · diag(λ) · V⁻¹ ≈ A`.
///
/// # Errors
///
/// `NumericalFailure` if the QR iteration fails to converge or the
/// eigenvector matrix is numerically singular (defective input).
pub fn eigen_decompose(
    a: &[Vec<f64>],
) -> Result<(Vec<Complex>, ComplexMatrix, ComplexMatrix)> {
    let n = a.len();
    if n == 0 || a.iter().any(|row| row.len() != n) {
        return Err(PhysaliaError::InvalidInput(
            "eigendecomposition requires a nonempty square matrix".into(),
        ));
    }
    let mut h = ComplexMatrix::from_real(a);
    let mut q = ComplexMatrix::identity(n);
    hessenberg(&mut h, &mut q);
    schur(&mut h, &mut q)?;

    let eval: Vec<Complex> = (0..n).map(|k| h.get(k, k)).collect();
    let evec = eigenvectors_from_schur(&h, &q);
    let evec_inv = evec.lu_invert().map_err(|e| {
        PhysaliaError::NumericalFailure(format!(
            "eigenvector matrix is not invertible (defective matrix?): {}",
            e
        ))
    })?;
    Ok((eval, evec, evec_inv))
}

/// Reduce `h` to upper Hessenberg form by Householder similarity
/// transforms, accumulating the transforms into `q` (so the original
/// matrix equals `q · h · qᴴ`).
fn hessenberg(h: &mut ComplexMatrix, q: &mut ComplexMatrix) {
    let n = h.size();
    for k in 0..n.saturating_sub(2) {
        let m = n - k - 1;
        let mut v: Vec<Complex> = (0..m).map(|i| h.get(k + 1 + i, k)).collect();
        let norm = v.iter().map(|c| c.abs_sq()).sum::<f64>().sqrt();
        if norm <= f64::MIN_POSITIVE {
            continue;
        }
        let phase = if v[0].abs() > 0.0 {
            v[0].scale(1.0 / v[0].abs())
        } else {
            Complex::ONE
        };
        let alpha = phase.scale(-norm);
        v[0] -= alpha;
        let beta: f64 = v.iter().map(|c| c.abs_sq()).sum();
        if beta <= f64::MIN_POSITIVE {
            continue;
        }

        // h := P h with P = I - (2/beta) v vᴴ on rows k+1..n.
        for j in 0..n {
            let mut w = Complex::ZERO;
            for i in 0..m {
                w += v[i].conj() * h.get(k + 1 + i, j);
            }
            let w = w.scale(2.0 / beta);
            for i in 0..m {
                let val = h.get(k + 1 + i, j) - v[i] * w;
                h.set(k + 1 + i, j, val);
            }
        }
        // h := h P on columns k+1..n, and q := q P.
        for target in [&mut *h, &mut *q] {
            for r in 0..n {
                let mut w = Complex::ZERO;
                for i in 0..m {
                    w += target.get(r, k + 1 + i) * v[i];
                }
                let w = w.scale(2.0 / beta);
                for i in 0..m {
                    let val = target.get(r, k + 1 + i) - w * v[i].conj();
                    target.set(r, k + 1 + i, val);
                }
            }
        }
    }
}

/// A complex Givens rotation `[c, s; -s̄, c]` (c real) zeroing the second
/// component of `(a, b)`.
fn givens(a: Complex, b: Complex) -> (f64, Complex) {
    let b_abs = b.abs();
    if b_abs == 0.0 {
        return (1.0, Complex::ZERO);
    }
    let a_abs = a.abs();
    if a_abs == 0.0 {
        return (0.0, b.conj().scale(1.0 / b_abs));
    }
    let r = (a.abs_sq() + b.abs_sq()).sqrt();
    let c = a_abs / r;
    let s = a.scale(1.0 / a_abs) * b.conj().scale(1.0 / r);
    (c, s)
}

/// Apply the rotation to rows `i`, `i+1` over columns `cols`.
fn rotate_rows(
    m: &mut ComplexMatrix,
    c: f64,
    s: Complex,
    i: usize,
    cols: std::ops::Range<usize>,
) {
    for j in cols {
        let x = m.get(i, j);
        let y = m.get(i + 1, j);
        m.set(i, j, x.scale(c) + s * y);
        m.set(i + 1, j, y.scale(c) - s.conj() * x);
    }
}

/// Apply the adjoint rotation to columns `i`, `i+1` over rows `rows`.
fn rotate_cols(
    m: &mut ComplexMatrix,
    c: f64,
    s: Complex,
    i: usize,
    rows: std::ops::Range<usize>,
) {
    for r in rows {
        let x = m.get(r, i);
        let y = m.get(r, i + 1);
        m.set(r, i, x.scale(c) + s.conj() * y);
        m.set(r, i + 1, y.scale(c) - s * x);
    }
}

/// Reduce an upper Hessenberg matrix to upper triangular (Schur) form by
/// explicitly shifted QR iteration with Givens rotations, accumulating the
/// unitary transforms into `q`.
fn schur(h: &mut ComplexMatrix, q: &mut ComplexMatrix) -> Result<()> {
    let n = h.size();
    let max_sweeps = 60 * n.max(1);
    let mut m = n;
    let mut sweeps = 0;
    let mut stagnant = 0;

    while m > 1 {
        // Deflate: find the start of the trailing unreduced block.
        let mut l = m - 1;
        while l > 0 {
            let sub = h.get(l, l - 1).abs();
            let local = h.get(l - 1, l - 1).abs() + h.get(l, l).abs();
            if sub <= f64::EPSILON * local {
                h.set(l, l - 1, Complex::ZERO);
                break;
            }
            l -= 1;
        }
        if l == m - 1 {
            // Bottom eigenvalue isolated.
            m -= 1;
            stagnant = 0;
            continue;
        }

        sweeps += 1;
        stagnant += 1;
        if sweeps > max_sweeps {
            return Err(PhysaliaError::NumericalFailure(format!(
                "QR iteration failed to converge after {} sweeps (block {}..{})",
                sweeps, l, m
            )));
        }

        // Wilkinson shift from the trailing 2x2, with an occasional
        // magnitude-based exceptional shift to break symmetry stalls.
        let shift = if stagnant % 12 == 0 {
            Complex::real(h.get(m - 1, m - 2).abs() + h.get(m - 2, m - 2).abs())
        } else {
            let a = h.get(m - 2, m - 2);
            let b = h.get(m - 2, m - 1);
            let c = h.get(m - 1, m - 2);
            let d = h.get(m - 1, m - 1);
            let half = (a - d).scale(0.5);
            let disc = (half * half + b * c).sqrt();
            let mu1 = (a + d).scale(0.5) + disc;
            let mu2 = (a + d).scale(0.5) - disc;
            if (mu1 - d).abs() <= (mu2 - d).abs() {
                mu1
            } else {
                mu2
            }
        };

        for i in l..m {
            let v = h.get(i, i) - shift;
            h.set(i, i, v);
        }
        let mut rotations = Vec::with_capacity(m - l - 1);
        for i in l..m - 1 {
            let (c, s) = givens(h.get(i, i), h.get(i + 1, i));
            rotate_rows(h, c, s, i, i..n);
            rotations.push((c, s, i));
        }
        for &(c, s, i) in &rotations {
            rotate_cols(h, c, s, i, 0..m);
            rotate_cols(q, c, s, i, 0..n);
        }
        for i in l..m {
            let v = h.get(i, i) + shift;
            h.set(i, i, v);
        }
    }
    Ok(())
}

/// Eigenvectors from the Schur factorization `A = q · t · qᴴ`: solve
/// `(t - λ_k I) y = 0` by back-substitution in the triangular factor, then
/// map back through `q`. Small denominators (clustered eigenvalues) are
/// floored to keep the solve finite; a genuinely defective matrix then
/// surfaces as a singular eigenvector matrix downstream.
fn eigenvectors_from_schur(t: &ComplexMatrix, q: &ComplexMatrix) -> ComplexMatrix {
    let n = t.size();
    let t_norm = t.max_abs().max(f64::MIN_POSITIVE);
    let floor = f64::EPSILON * t_norm;
    let mut vectors = ComplexMatrix::zeros(n);

    let mut y = vec![Complex::ZERO; n];
    for k in 0..n {
        let lambda = t.get(k, k);
        for entry in y.iter_mut() {
            *entry = Complex::ZERO;
        }
        y[k] = Complex::ONE;
        for i in (0..k).rev() {
            let mut num = Complex::ZERO;
            for j in i + 1..=k {
                num += t.get(i, j) * y[j];
            }
            let mut den = t.get(i, i) - lambda;
            if den.abs() < floor {
                den = Complex::real(floor);
            }
            y[i] = -(num / den);
        }
        // v = q y, normalized to unit Euclidean length.
        let mut norm_sq = 0.0;
        for r in 0..n {
            let mut v = Complex::ZERO;
            for j in 0..=k {
                v += q.get(r, j) * y[j];
            }
            vectors.set(r, k, v);
            norm_sq += v.abs_sq();
        }
        let inv_norm = 1.0 / norm_sq.sqrt();
        for r in 0..n {
            let v = vectors.get(r, k).scale(inv_norm);
            vectors.set(r, k, v);
        }
    }
    vectors
}
