//! Continuous-time substitution models with insertion/deletion rates.
//!
//! A [`RateModel`] couples an ordered alphabet with an instantaneous rate
//! matrix Q (rows sum to zero, off-diagonal nonnegative), an insertion
//! distribution π, and the indel rate parameters consumed by the pairwise
//! alignment layer.

use physalia_core::{PhysaliaError, Result};

/// Column character denoting "no residue at this row/column".
pub const GAP_CHARS: [u8; 2] = [b'-', b'.'];

/// Column character at an internal node denoting "unobserved; marginalise
/// over all states".
pub const WILDCARD_CHAR: u8 = b'*';

/// True if `c` is a gap character.
pub fn is_gap(c: u8) -> bool {
    GAP_CHARS.contains(&c)
}

/// Rates and extension probabilities of the insertion/deletion process.
///
/// Consumed only by the pairwise DP layer; the column sum-product engine
/// never reads them.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndelRates {
    /// Insertion events per unit time.
    pub ins_rate: f64,
    /// Deletion events per unit time.
    pub del_rate: f64,
    /// Probability of extending an open insertion by one residue.
    pub ins_ext_prob: f64,
    /// Probability of extending an open deletion by one residue.
    pub del_ext_prob: f64,
}

impl Default for IndelRates {
    fn default() -> Self {
        Self {
            ins_rate: 0.01,
            del_rate: 0.01,
            ins_ext_prob: 0.4,
            del_ext_prob: 0.4,
        }
    }
}

impl IndelRates {
    fn validate(&self) -> Result<()> {
        if self.ins_rate < 0.0 || self.del_rate < 0.0 {
            return Err(PhysaliaError::InvalidInput(format!(
                "indel rates must be nonnegative, got ins={} del={}",
                self.ins_rate, self.del_rate
            )));
        }
        for (label, p) in [
            ("ins_ext_prob", self.ins_ext_prob),
            ("del_ext_prob", self.del_ext_prob),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(PhysaliaError::InvalidInput(format!(
                    "{} must be in [0, 1), got {}",
                    label, p
                )));
            }
        }
        Ok(())
    }
}

/// A substitution model over a finite ordered alphabet.
#[derive(Debug, Clone)]
pub struct RateModel {
    alphabet: Vec<u8>,
    /// Instantaneous rate matrix Q, row-stochastic-generator form.
    pub sub_rate: Vec<Vec<f64>>,
    /// Stationary/insertion distribution π.
    pub ins_prob: Vec<f64>,
    /// Insertion/deletion process parameters.
    pub indel: IndelRates,
}

impl RateModel {
    /// Build and validate a model from its raw parts.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the alphabet contains duplicates or reserved
    /// characters, the rate matrix is not a proper generator, or π is not a
    /// distribution.
    pub fn new(
        alphabet: &[u8],
        sub_rate: Vec<Vec<f64>>,
        ins_prob: Vec<f64>,
        indel: IndelRates,
    ) -> Result<Self> {
        let n = alphabet.len();
        if n == 0 {
            return Err(PhysaliaError::InvalidInput("empty alphabet".into()));
        }
        for (i, &c) in alphabet.iter().enumerate() {
            if is_gap(c) || c == WILDCARD_CHAR {
                return Err(PhysaliaError::InvalidInput(format!(
                    "alphabet contains reserved character '{}'",
                    c as char
                )));
            }
            if alphabet[..i].contains(&c.to_ascii_uppercase())
                || alphabet[..i].contains(&c.to_ascii_lowercase())
            {
                return Err(PhysaliaError::InvalidInput(format!(
                    "duplicate alphabet character '{}'",
                    c as char
                )));
            }
        }

        if sub_rate.len() != n || sub_rate.iter().any(|row| row.len() != n) {
            return Err(PhysaliaError::InvalidInput(format!(
                "rate matrix must be {}x{}",
                n, n
            )));
        }
        for (i, row) in sub_rate.iter().enumerate() {
            let sum: f64 = row.iter().sum();
            if sum.abs() > 1e-6 {
                return Err(PhysaliaError::InvalidInput(format!(
                    "rate matrix row {} sums to {} (expected 0)",
                    i, sum
                )));
            }
            for (j, &q) in row.iter().enumerate() {
                if i != j && q < -1e-12 {
                    return Err(PhysaliaError::InvalidInput(format!(
                        "negative off-diagonal rate Q[{}][{}] = {}",
                        i, j, q
                    )));
                }
            }
        }

        if ins_prob.len() != n {
            return Err(PhysaliaError::InvalidInput(format!(
                "insertion distribution has length {} (expected {})",
                ins_prob.len(),
                n
            )));
        }
        if ins_prob.iter().any(|&p| p < 0.0) {
            return Err(PhysaliaError::InvalidInput(
                "insertion distribution has a negative entry".into(),
            ));
        }
        let total: f64 = ins_prob.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(PhysaliaError::InvalidInput(format!(
                "insertion distribution sums to {} (expected 1)",
                total
            )));
        }

        indel.validate()?;

        Ok(Self {
            alphabet: alphabet.iter().map(|c| c.to_ascii_uppercase()).collect(),
            sub_rate,
            ins_prob,
            indel,
        })
    }

    /// Build a reversible model from a symmetric exchangeability matrix and
    /// equilibrium frequencies: `Q[i][j] = S[i][j] * freqs[j]` for i ≠ j,
    /// normalized so the mean substitution rate at equilibrium is 1.
    pub fn reversible(
        alphabet: &[u8],
        exchangeabilities: &[Vec<f64>],
        freqs: Vec<f64>,
        indel: IndelRates,
    ) -> Result<Self> {
        let n = alphabet.len();
        if exchangeabilities.len() != n || exchangeabilities.iter().any(|r| r.len() != n) {
            return Err(PhysaliaError::InvalidInput(format!(
                "exchangeability matrix must be {}x{}",
                n, n
            )));
        }
        let mut q = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    q[i][j] = exchangeabilities[i][j] * freqs[j];
                }
            }
            let off_diag: f64 = (0..n).filter(|&j| j != i).map(|j| q[i][j]).sum();
            q[i][i] = -off_diag;
        }

        // Normalize so -sum(pi_i * Q_ii) = 1.
        let mu: f64 = (0..n).map(|i| -freqs[i] * q[i][i]).sum();
        if mu > 0.0 {
            for row in q.iter_mut() {
                for entry in row.iter_mut() {
                    *entry /= mu;
                }
            }
        }

        Self::new(alphabet, q, freqs, indel)
    }

    /// Equal-rate, equal-frequency model over the given alphabet: off-diagonal
    /// rates `1/(A-1)`, uniform π. The classic equal-input model.
    pub fn jukes_cantor(alphabet: &[u8], indel: IndelRates) -> Result<Self> {
        let n = alphabet.len();
        if n < 2 {
            return Err(PhysaliaError::InvalidInput(
                "alphabet must have at least two characters".into(),
            ));
        }
        let off = 1.0 / (n as f64 - 1.0);
        let mut q = vec![vec![off; n]; n];
        for (i, row) in q.iter_mut().enumerate() {
            row[i] = -1.0;
        }
        Self::new(alphabet, q, vec![1.0 / n as f64; n], indel)
    }

    /// Number of alphabet tokens.
    pub fn alphabet_size(&self) -> usize {
        self.alphabet.len()
    }

    /// The character for token index `i`.
    pub fn token(&self, i: usize) -> u8 {
        self.alphabet[i]
    }

    /// Map a character to its token index, case-insensitively.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the character is a gap, wildcard, or otherwise
    /// outside the alphabet.
    pub fn tokenize(&self, c: u8) -> Result<usize> {
        let upper = c.to_ascii_uppercase();
        self.alphabet
            .iter()
            .position(|&a| a == upper)
            .ok_or_else(|| {
                PhysaliaError::InvalidInput(format!(
                    "character '{}' is not in the alphabet",
                    c as char
                ))
            })
    }

    /// log π, with zero probabilities mapped to `-inf`.
    pub fn log_ins_prob(&self) -> Vec<f64> {
        self.ins_prob.iter().map(|&p| p.ln()).collect()
    }
}
