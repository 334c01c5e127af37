//! Spectral substitution engine.
//!
//! Diagonalises a model's rate matrix once, then answers time-dependent
//! queries — transition probabilities P(t) = exp(Qt) and *expected
//! substitution counts* conditioned on branch endpoints — in closed form in
//! the eigenbasis. The count integral ∫₀ᵀ exp(Qt)·R·exp(Q(T−t)) dt reduces
//! to the eigen-substitution matrix M[k][l], whose degenerate entries
//! (λ_k ≈ λ_l) must be special-cased to avoid a 0/0 singularity.

use crate::linalg::{self, Complex, ComplexMatrix, NEAR_EQ_EPSILON};
use crate::model::RateModel;
use physalia_core::{PhysaliaError, Result};
use tracing::trace;

/// Eigendecomposition of a rate matrix, owned for the life of the model.
#[derive(Debug, Clone)]
pub struct EigenEngine {
    alph_size: usize,
    sub_rate: Vec<Vec<f64>>,
    eval: Vec<Complex>,
    evec: ComplexMatrix,
    evec_inv: ComplexMatrix,
}

impl EigenEngine {
    /// Diagonalise the model's rate matrix.
    ///
    /// # Errors
    ///
    /// `NumericalFailure` if the eigensolve or the LU inversion of the
    /// eigenvector matrix fails.
    pub fn new(model: &RateModel) -> Result<Self> {
        let (eval, evec, evec_inv) = linalg::eigen_decompose(&model.sub_rate)?;
        trace!(
            eigenvalues = ?eval.iter().map(|l| (l.re, l.im)).collect::<Vec<_>>(),
            "diagonalised rate matrix"
        );
        Ok(Self {
            alph_size: model.alphabet_size(),
            sub_rate: model.sub_rate.clone(),
            eval,
            evec,
            evec_inv,
        })
    }

    /// Alphabet size A.
    pub fn alphabet_size(&self) -> usize {
        self.alph_size
    }

    /// Eigenvalues λ.
    pub fn eigenvalues(&self) -> &[Complex] {
        &self.eval
    }

    /// Right-eigenvector matrix V.
    pub fn evec(&self) -> &ComplexMatrix {
        &self.evec
    }

    /// Inverse eigenvector matrix V⁻¹.
    pub fn evec_inv(&self) -> &ComplexMatrix {
        &self.evec_inv
    }

    /// Fix a branch length, computing the per-eigenvalue exponentials the
    /// time-dependent queries share. The returned view owns its scratch,
    /// so concurrent views over one engine are safe.
    pub fn at(&self, t: f64) -> EigenBasis<'_> {
        let exp_ev_t: Vec<Complex> = self.eval.iter().map(|l| l.scale(t).exp()).collect();
        EigenBasis {
            engine: self,
            t,
            exp_ev_t,
        }
    }

    /// Transition probability P_t(i→j).
    pub fn sub_prob(&self, t: f64, i: usize, j: usize) -> Result<f64> {
        self.at(t).sub_prob(i, j)
    }

    /// Full A×A transition probability matrix P(t).
    pub fn sub_prob_matrix(&self, t: f64) -> Result<Vec<Vec<f64>>> {
        self.at(t).sub_prob_matrix()
    }

    /// The eigen-substitution-count matrix M for a branch of length `t`:
    /// `M[k][l] = ∫₀ᵗ exp(λ_k τ)·exp(λ_l (t−τ)) dτ`, with the degenerate
    /// limit `t·exp(λ_k t)` when the eigenvalues nearly coincide.
    pub fn eigen_sub_count(&self, t: f64) -> ComplexMatrix {
        self.at(t).eigen_sub_count()
    }

    /// Expected number of i→j substitution events on a branch with endpoint
    /// states (a, b), given the branch's probability matrix `sub` and
    /// eigen-count matrix `esub`. The diagonal (i == j) returns the expected
    /// dwell time in state i rather than a jump count. Clamped to ≥ 0.
    pub fn sub_count(
        &self,
        a: usize,
        b: usize,
        i: usize,
        j: usize,
        sub: &[Vec<f64>],
        esub: &ComplexMatrix,
    ) -> Result<f64> {
        let n = self.alph_size;
        let mut c_ij = Complex::ZERO;
        for k in 0..n {
            let mut c_ijk = Complex::ZERO;
            for l in 0..n {
                c_ijk += self.evec.get(j, l) * self.evec_inv.get(l, b) * esub.get(k, l);
            }
            c_ij += self.evec.get(a, k) * self.evec_inv.get(k, i) * c_ijk;
        }
        if !c_ij.near_real(NEAR_EQ_EPSILON) {
            return Err(PhysaliaError::NumericalFailure(format!(
                "substitution count ({},{})->({},{}) has imaginary part: ({}, {})",
                a, b, i, j, c_ij.re, c_ij.im
            )));
        }
        let p_ab = sub[a][b];
        if p_ab <= 0.0 {
            // Conditioning on an impossible endpoint pair contributes nothing.
            return Ok(0.0);
        }
        let factor = if i == j { 1.0 } else { self.sub_rate[i][j] };
        let count = factor * c_ij.re / p_ab;
        if !count.is_finite() {
            return Err(PhysaliaError::NumericalFailure(format!(
                "non-finite substitution count ({},{})->({},{}): {}",
                a, b, i, j, count
            )));
        }
        Ok(count.max(0.0))
    }

    /// Accumulate `weight · C(a,b,·,·)` into `counts` in place.
    pub fn accum_sub_counts(
        &self,
        counts: &mut [Vec<f64>],
        a: usize,
        b: usize,
        weight: f64,
        sub: &[Vec<f64>],
        esub: &ComplexMatrix,
    ) -> Result<()> {
        for i in 0..self.alph_size {
            for j in 0..self.alph_size {
                counts[i][j] += weight * self.sub_count(a, b, i, j, sub, esub)?;
            }
        }
        Ok(())
    }

    /// Reconstitute Q from the stored spectral data (diagnostic).
    pub fn rate_matrix(&self) -> ComplexMatrix {
        let n = self.alph_size;
        let mut out = ComplexMatrix::zeros(n);
        for i in 0..n {
            for j in 0..n {
                let mut r = Complex::ZERO;
                for k in 0..n {
                    r += self.evec.get(i, k) * self.evec_inv.get(k, j) * self.eval[k];
                }
                out.set(i, j, r);
            }
        }
        out
    }
}

/// A borrowed view of the engine at a fixed branch length, owning the
/// `exp(λ_k t)` scratch vector.
#[derive(Debug)]
pub struct EigenBasis<'a> {
    engine: &'a EigenEngine,
    t: f64,
    exp_ev_t: Vec<Complex>,
}

impl EigenBasis<'_> {
    /// Transition probability P_t(i→j) = Σ_k V[i,k]·V⁻¹[k,j]·exp(λ_k t).
    ///
    /// # Errors
    ///
    /// `NumericalFailure` if the reconstructed probability has an imaginary
    /// part beyond tolerance or a real part below −ε. Values in [−ε, 0] and
    /// (1, 1+ε] clamp to the unit interval.
    pub fn sub_prob(&self, i: usize, j: usize) -> Result<f64> {
        let e = self.engine;
        let mut p = Complex::ZERO;
        for k in 0..e.alph_size {
            p += e.evec.get(i, k) * e.evec_inv.get(k, j) * self.exp_ev_t[k];
        }
        if !p.near_real(NEAR_EQ_EPSILON) {
            return Err(PhysaliaError::NumericalFailure(format!(
                "P_t({}->{}) at t={} has imaginary part: ({}, {})",
                i, j, self.t, p.re, p.im
            )));
        }
        if p.re < -NEAR_EQ_EPSILON {
            return Err(PhysaliaError::NumericalFailure(format!(
                "P_t({}->{}) at t={} is negative: {}",
                i, j, self.t, p.re
            )));
        }
        Ok(p.re.clamp(0.0, 1.0))
    }

    /// Full A×A transition probability matrix.
    pub fn sub_prob_matrix(&self) -> Result<Vec<Vec<f64>>> {
        let n = self.engine.alph_size;
        let mut out = vec![vec![0.0; n]; n];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = self.sub_prob(i, j)?;
            }
        }
        Ok(out)
    }

    /// The eigen-substitution-count matrix M at this branch length.
    pub fn eigen_sub_count(&self) -> ComplexMatrix {
        let e = self.engine;
        let n = e.alph_size;
        let mut out = ComplexMatrix::zeros(n);
        for k in 0..n {
            for l in 0..n {
                let degenerate = k == l || e.eval[k].near(e.eval[l], NEAR_EQ_EPSILON);
                let m_kl = if degenerate {
                    self.exp_ev_t[k].scale(self.t)
                } else {
                    (self.exp_ev_t[k] - self.exp_ev_t[l]) / (e.eval[k] - e.eval[l])
                };
                out.set(k, l, m_kl);
            }
        }
        out
    }
}
