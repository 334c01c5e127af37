//! Banded three-state pairwise DP under a substitution model.
//!
//! [`AlignmentMatrix`] aligns two token sequences separated by a single
//! combined branch length. Emissions come from the model through the eigen
//! engine: a match pairs the tokens across the branch
//! (`log π[x] + log P_dist(x→y)`), an indel emits from π alone. Transition
//! probabilities derive from the model's insertion/deletion rates.
//!
//! Cells outside the guide envelope are never stored; the matrices are
//! sparse maps keyed by (i, j). The origin and the terminal cell are always
//! admissible so every band contains at least one complete path.

use crate::envelope::GuideAlignmentEnvelope;
use crate::path::AlignPath;
use physalia_core::{log_sum_exp, PhysaliaError, Result, Xorshift64};
use physalia_phylo::{EigenEngine, RateModel};
use std::collections::HashMap;
use tracing::trace;

const NEG_INF: f64 = f64::NEG_INFINITY;

/// DP state indices: match, x-insert (gap in y), y-insert (gap in x).
const MATCH: usize = 0;
const INS_X: usize = 1;
const INS_Y: usize = 2;

/// Log-space transition table of the three-state pair machine.
#[derive(Debug, Clone, Copy)]
struct Transitions {
    mm: f64,
    mx: f64,
    my: f64,
    xx: f64,
    xm: f64,
    yy: f64,
    ym: f64,
}

impl Transitions {
    /// Derive transition probabilities from the model's indel process at
    /// the given divergence: gap-open `1 − exp(−rate·dist)`, extension
    /// straight from the model.
    fn from_model(model: &RateModel, dist: f64) -> Self {
        let open_x = 1.0 - (-model.indel.ins_rate * dist).exp();
        let open_y = 1.0 - (-model.indel.del_rate * dist).exp();
        Self {
            mm: ((1.0 - open_x) * (1.0 - open_y)).ln(),
            mx: open_x.ln(),
            my: ((1.0 - open_x) * open_y).ln(),
            xx: model.indel.ins_ext_prob.ln(),
            xm: (1.0 - model.indel.ins_ext_prob).ln(),
            yy: model.indel.del_ext_prob.ln(),
            ym: (1.0 - model.indel.del_ext_prob).ln(),
        }
    }

    fn lp_trans(&self, from: usize, to: usize) -> f64 {
        match (from, to) {
            (MATCH, MATCH) => self.mm,
            (MATCH, INS_X) => self.mx,
            (MATCH, INS_Y) => self.my,
            (INS_X, INS_X) => self.xx,
            (INS_X, MATCH) => self.xm,
            (INS_Y, INS_Y) => self.yy,
            (INS_Y, MATCH) => self.ym,
            _ => NEG_INF,
        }
    }
}

/// Banded pairwise DP over two token sequences.
pub struct AlignmentMatrix {
    x_seq: Vec<usize>,
    y_seq: Vec<usize>,
    dist: f64,
    env: GuideAlignmentEnvelope,
    x_env_pos: Vec<usize>,
    y_env_pos: Vec<usize>,
    log_ins: Vec<f64>,
    log_sub: Vec<Vec<f64>>,
    trans: Transitions,
    fwd: HashMap<(usize, usize), [f64; 3]>,
    end_log_like: f64,
}

impl AlignmentMatrix {
    /// Construct the matrix and run the banded forward recursion.
    ///
    /// `x_env_pos` / `y_env_pos` give, for each residue, its position along
    /// the envelope's anchor rows; they must match the sequence lengths
    /// when the envelope is banded.
    pub fn new(
        model: &RateModel,
        x_seq: &[usize],
        y_seq: &[usize],
        dist: f64,
        env: &GuideAlignmentEnvelope,
        x_env_pos: &[usize],
        y_env_pos: &[usize],
    ) -> Result<Self> {
        let eigen = EigenEngine::new(model)?;
        Self::with_engine(model, &eigen, x_seq, y_seq, dist, env, x_env_pos, y_env_pos)
    }

    /// Full-envelope construction reusing a caller-owned engine; the quick
    /// path used per edge by the alignment graph builder.
    pub fn quick(
        model: &RateModel,
        eigen: &EigenEngine,
        x_seq: &[usize],
        y_seq: &[usize],
        dist: f64,
    ) -> Result<Self> {
        Self::with_engine(
            model,
            eigen,
            x_seq,
            y_seq,
            dist,
            &GuideAlignmentEnvelope::unconstrained(),
            &[],
            &[],
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_engine(
        model: &RateModel,
        eigen: &EigenEngine,
        x_seq: &[usize],
        y_seq: &[usize],
        dist: f64,
        env: &GuideAlignmentEnvelope,
        x_env_pos: &[usize],
        y_env_pos: &[usize],
    ) -> Result<Self> {
        let alph = model.alphabet_size();
        for (label, seq) in [("x", x_seq), ("y", y_seq)] {
            if let Some(&bad) = seq.iter().find(|&&t| t >= alph) {
                return Err(PhysaliaError::InvalidInput(format!(
                    "{} sequence contains token {} outside alphabet of size {}",
                    label, bad, alph
                )));
            }
        }
        if dist < 0.0 {
            return Err(PhysaliaError::InvalidInput(format!(
                "negative divergence {}",
                dist
            )));
        }
        if env.is_banded() && (x_env_pos.len() != x_seq.len() || y_env_pos.len() != y_seq.len())
        {
            return Err(PhysaliaError::InvalidInput(format!(
                "envelope positions ({}, {}) do not match sequence lengths ({}, {})",
                x_env_pos.len(),
                y_env_pos.len(),
                x_seq.len(),
                y_seq.len()
            )));
        }

        let sub = eigen.sub_prob_matrix(dist)?;
        let log_sub = sub
            .iter()
            .map(|row| row.iter().map(|&p| p.ln()).collect())
            .collect();

        let mut matrix = Self {
            x_seq: x_seq.to_vec(),
            y_seq: y_seq.to_vec(),
            dist,
            env: env.clone(),
            x_env_pos: x_env_pos.to_vec(),
            y_env_pos: y_env_pos.to_vec(),
            log_ins: model.log_ins_prob(),
            log_sub,
            trans: Transitions::from_model(model, dist),
            fwd: HashMap::new(),
            end_log_like: NEG_INF,
        };
        matrix.fill_forward();
        Ok(matrix)
    }

    fn x_pos(&self, i: usize) -> usize {
        if i == 0 {
            0
        } else {
            self.x_env_pos[i - 1]
        }
    }

    fn y_pos(&self, j: usize) -> usize {
        if j == 0 {
            0
        } else {
            self.y_env_pos[j - 1]
        }
    }

    /// Band membership. The origin and terminal cells are always in-band.
    fn in_band(&self, i: usize, j: usize) -> bool {
        if (i == 0 && j == 0) || (i == self.x_seq.len() && j == self.y_seq.len()) {
            return true;
        }
        !self.env.is_banded() || self.env.in_range(self.x_pos(i), self.y_pos(j))
    }

    fn fwd_cell(&self, i: usize, j: usize) -> [f64; 3] {
        self.fwd.get(&(i, j)).copied().unwrap_or([NEG_INF; 3])
    }

    fn fill_forward(&mut self) {
        let (nx, ny) = (self.x_seq.len(), self.y_seq.len());
        self.fwd.insert((0, 0), [0.0, NEG_INF, NEG_INF]);

        for i in 0..=nx {
            for j in 0..=ny {
                if (i == 0 && j == 0) || !self.in_band(i, j) {
                    continue;
                }
                let mut cell = [NEG_INF; 3];
                if i > 0 && j > 0 {
                    let prev = self.fwd_cell(i - 1, j - 1);
                    let emit = self.log_ins[self.x_seq[i - 1]]
                        + self.log_sub[self.x_seq[i - 1]][self.y_seq[j - 1]];
                    cell[MATCH] = emit
                        + log_sum_exp(
                            log_sum_exp(
                                prev[MATCH] + self.trans.mm,
                                prev[INS_X] + self.trans.xm,
                            ),
                            prev[INS_Y] + self.trans.ym,
                        );
                }
                if i > 0 {
                    let prev = self.fwd_cell(i - 1, j);
                    cell[INS_X] = self.log_ins[self.x_seq[i - 1]]
                        + log_sum_exp(
                            prev[MATCH] + self.trans.mx,
                            prev[INS_X] + self.trans.xx,
                        );
                }
                if j > 0 {
                    let prev = self.fwd_cell(i, j - 1);
                    cell[INS_Y] = self.log_ins[self.y_seq[j - 1]]
                        + log_sum_exp(
                            prev[MATCH] + self.trans.my,
                            prev[INS_Y] + self.trans.yy,
                        );
                }
                if cell.iter().any(|&v| v > NEG_INF) {
                    self.fwd.insert((i, j), cell);
                }
            }
        }

        let end = self.fwd_cell(nx, ny);
        self.end_log_like = log_sum_exp(log_sum_exp(end[MATCH], end[INS_X]), end[INS_Y]);
        trace!(
            nx,
            ny,
            dist = self.dist,
            log_like = self.end_log_like,
            "filled banded forward matrix"
        );
    }

    /// The banded partition function over alignments.
    pub fn forward_log_likelihood(&self) -> f64 {
        self.end_log_like
    }

    /// Predecessor states of `(i, j, state)` with their log transition
    /// weights (forward mass not yet included).
    fn source_states(&self, i: usize, j: usize, state: usize) -> Vec<(usize, usize, usize, f64)> {
        let mut sources = Vec::with_capacity(3);
        let (pi, pj, froms): (usize, usize, &[usize]) = match state {
            MATCH => (i - 1, j - 1, &[MATCH, INS_X, INS_Y]),
            INS_X => (i - 1, j, &[MATCH, INS_X]),
            INS_Y => (i, j - 1, &[MATCH, INS_Y]),
            _ => unreachable!(),
        };
        for &from in froms {
            let lp = self.trans.lp_trans(from, state);
            if lp > NEG_INF {
                sources.push((pi, pj, from, lp));
            }
        }
        sources
    }

    /// Sample a state-path cell among weighted candidates.
    fn sample_choice(
        &self,
        candidates: &[(usize, usize, usize, f64)],
        rng: &mut Xorshift64,
    ) -> Result<(usize, usize, usize)> {
        let finite: Vec<&(usize, usize, usize, f64)> =
            candidates.iter().filter(|c| c.3 > NEG_INF).collect();
        let max = finite.iter().map(|c| c.3).fold(NEG_INF, f64::max);
        if max == NEG_INF {
            return Err(PhysaliaError::InvariantViolation(
                "traceback reached a cell with no finite predecessor".into(),
            ));
        }
        let total: f64 = finite.iter().map(|c| (c.3 - max).exp()).sum();
        let mut r = rng.uniform(0.0, total);
        for &&(pi, pj, state, lp) in &finite {
            r -= (lp - max).exp();
            if r <= 0.0 {
                return Ok((pi, pj, state));
            }
        }
        // Floating-point slack lands on the last finite candidate.
        let &&(pi, pj, state, _) = finite.last().unwrap();
        Ok((pi, pj, state))
    }

    /// Stochastic traceback: sample an alignment path in proportion to its
    /// posterior mass under the forward matrix. The result maps row 0 to x
    /// and row 1 to y.
    ///
    /// # Errors
    ///
    /// `NumericalFailure` if the forward likelihood is zero (empty band).
    pub fn sample_alignment(&self, rng: &mut Xorshift64) -> Result<AlignPath> {
        let (nx, ny) = (self.x_seq.len(), self.y_seq.len());
        if self.end_log_like == NEG_INF {
            return Err(PhysaliaError::NumericalFailure(
                "forward likelihood is zero; traceback impossible".into(),
            ));
        }

        // Sample the terminal state, then walk predecessors.
        let end = self.fwd_cell(nx, ny);
        let terminal: Vec<(usize, usize, usize, f64)> =
            (0..3).map(|s| (nx, ny, s, end[s])).collect();
        let (mut i, mut j, mut state) = self.sample_choice(&terminal, rng)?;

        let mut columns: Vec<(bool, bool)> = Vec::with_capacity(nx + ny);
        while i > 0 || j > 0 {
            columns.push(match state {
                MATCH => (true, true),
                INS_X => (true, false),
                _ => (false, true),
            });
            let candidates: Vec<(usize, usize, usize, f64)> = self
                .source_states(i, j, state)
                .into_iter()
                .map(|(pi, pj, from, lp)| (pi, pj, from, lp + self.fwd_cell(pi, pj)[from]))
                .collect();
            let (pi, pj, from) = self.sample_choice(&candidates, rng)?;
            i = pi;
            j = pj;
            state = from;
        }

        columns.reverse();
        Ok(AlignPath::from_pair(
            0,
            columns.iter().map(|c| c.0).collect(),
            1,
            columns.iter().map(|c| c.1).collect(),
        ))
    }

    /// Viterbi: the single best banded alignment and its log probability.
    pub fn best_alignment(&self) -> Result<(AlignPath, f64)> {
        let (nx, ny) = (self.x_seq.len(), self.y_seq.len());
        let mut vit: HashMap<(usize, usize), [f64; 3]> = HashMap::new();
        let mut back: HashMap<(usize, usize), [usize; 3]> = HashMap::new();
        vit.insert((0, 0), [0.0, NEG_INF, NEG_INF]);
        let get = |vit: &HashMap<(usize, usize), [f64; 3]>, i: usize, j: usize| {
            vit.get(&(i, j)).copied().unwrap_or([NEG_INF; 3])
        };

        for i in 0..=nx {
            for j in 0..=ny {
                if (i == 0 && j == 0) || !self.in_band(i, j) {
                    continue;
                }
                let mut cell = [NEG_INF; 3];
                let mut ptr = [MATCH; 3];
                if i > 0 && j > 0 {
                    let prev = get(&vit, i - 1, j - 1);
                    let emit = self.log_ins[self.x_seq[i - 1]]
                        + self.log_sub[self.x_seq[i - 1]][self.y_seq[j - 1]];
                    for from in 0..3 {
                        let score = prev[from] + self.trans.lp_trans(from, MATCH);
                        if score > cell[MATCH] {
                            cell[MATCH] = score;
                            ptr[MATCH] = from;
                        }
                    }
                    cell[MATCH] += emit;
                }
                if i > 0 {
                    let prev = get(&vit, i - 1, j);
                    for from in [MATCH, INS_X] {
                        let score = prev[from] + self.trans.lp_trans(from, INS_X);
                        if score > cell[INS_X] {
                            cell[INS_X] = score;
                            ptr[INS_X] = from;
                        }
                    }
                    cell[INS_X] += self.log_ins[self.x_seq[i - 1]];
                }
                if j > 0 {
                    let prev = get(&vit, i, j - 1);
                    for from in [MATCH, INS_Y] {
                        let score = prev[from] + self.trans.lp_trans(from, INS_Y);
                        if score > cell[INS_Y] {
                            cell[INS_Y] = score;
                            ptr[INS_Y] = from;
                        }
                    }
                    cell[INS_Y] += self.log_ins[self.y_seq[j - 1]];
                }
                if cell.iter().any(|&v| v > NEG_INF) {
                    vit.insert((i, j), cell);
                    back.insert((i, j), ptr);
                }
            }
        }

        let end = get(&vit, nx, ny);
        let (mut state, &score) = end
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        if score == NEG_INF {
            return Err(PhysaliaError::NumericalFailure(
                "empty band: no admissible alignment".into(),
            ));
        }

        let (mut i, mut j) = (nx, ny);
        let mut columns: Vec<(bool, bool)> = Vec::with_capacity(nx + ny);
        while i > 0 || j > 0 {
            columns.push(match state {
                MATCH => (true, true),
                INS_X => (true, false),
                _ => (false, true),
            });
            let from = back[&(i, j)][state];
            match state {
                MATCH => {
                    i -= 1;
                    j -= 1;
                }
                INS_X => i -= 1,
                _ => j -= 1,
            }
            state = from;
        }
        columns.reverse();
        Ok((
            AlignPath::from_pair(
                0,
                columns.iter().map(|c| c.0).collect(),
                1,
                columns.iter().map(|c| c.1).collect(),
            ),
            score,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::GuideAlignmentEnvelope;
    use physalia_phylo::IndelRates;

    fn model() -> RateModel {
        RateModel::jukes_cantor(
            b"ACGT",
            IndelRates {
                ins_rate: 0.05,
                del_rate: 0.05,
                ins_ext_prob: 0.3,
                del_ext_prob: 0.3,
            },
        )
        .unwrap()
    }

    fn tokens(model: &RateModel, s: &[u8]) -> Vec<usize> {
        s.iter().map(|&c| model.tokenize(c).unwrap()).collect()
    }

    fn full_matrix(m: &RateModel, x: &[u8], y: &[u8], dist: f64) -> AlignmentMatrix {
        let eigen = EigenEngine::new(m).unwrap();
        AlignmentMatrix::quick(m, &eigen, &tokens(m, x), &tokens(m, y), dist).unwrap()
    }

    #[test]
    fn forward_likelihood_is_finite_and_negative() {
        let m = model();
        let mx = full_matrix(&m, b"ACGT", b"ACGT", 0.2);
        let ll = mx.forward_log_likelihood();
        assert!(ll.is_finite() && ll < 0.0, "log-likelihood {}", ll);
    }

    #[test]
    fn identical_sequences_beat_divergent_ones() {
        let m = model();
        let same = full_matrix(&m, b"ACGTACGT", b"ACGTACGT", 0.2).forward_log_likelihood();
        let diff = full_matrix(&m, b"ACGTACGT", b"TGCATGCA", 0.2).forward_log_likelihood();
        assert!(same > diff, "same {} should beat diff {}", same, diff);
    }

    #[test]
    fn forward_dominates_viterbi() {
        let m = model();
        for (x, y) in [
            (b"ACGT".as_slice(), b"ACGT".as_slice()),
            (b"ACGTT".as_slice(), b"ACG".as_slice()),
            (b"A".as_slice(), b"T".as_slice()),
        ] {
            let mx = full_matrix(&m, x, y, 0.3);
            let (_, vit) = mx.best_alignment().unwrap();
            assert!(
                mx.forward_log_likelihood() >= vit - 1e-10,
                "forward {} < viterbi {}",
                mx.forward_log_likelihood(),
                vit
            );
        }
    }

    #[test]
    fn best_alignment_of_identical_sequences_is_all_match() {
        let m = model();
        let mx = full_matrix(&m, b"ACGT", b"ACGT", 0.1);
        let (path, _) = mx.best_alignment().unwrap();
        assert_eq!(path.columns().unwrap(), 4);
        assert!(path.row(0).unwrap().iter().all(|&b| b));
        assert!(path.row(1).unwrap().iter().all(|&b| b));
    }

    #[test]
    fn best_alignment_consumes_both_sequences() {
        let m = model();
        for (x, y) in [
            (b"ACGTACGT".as_slice(), b"ACGT".as_slice()),
            (b"AC".as_slice(), b"ACGTT".as_slice()),
        ] {
            let mx = full_matrix(&m, x, y, 0.3);
            let (path, _) = mx.best_alignment().unwrap();
            assert_eq!(path.residues(0), x.len());
            assert_eq!(path.residues(1), y.len());
            path.columns().unwrap();
        }
    }

    #[test]
    fn sampled_alignment_consumes_both_sequences() {
        let m = model();
        let mx = full_matrix(&m, b"ACGTAC", b"ACTAC", 0.3);
        let mut rng = Xorshift64::new(11);
        for _ in 0..20 {
            let path = mx.sample_alignment(&mut rng).unwrap();
            assert_eq!(path.residues(0), 6);
            assert_eq!(path.residues(1), 5);
            path.columns().unwrap();
        }
    }

    #[test]
    fn sampling_concentrates_on_high_probability_paths() {
        // With identical sequences and mild divergence, the all-match path
        // dominates; most samples should be exactly it.
        let m = model();
        let mx = full_matrix(&m, b"ACGT", b"ACGT", 0.05);
        let mut rng = Xorshift64::new(5);
        let mut all_match = 0;
        let total = 50;
        for _ in 0..total {
            let path = mx.sample_alignment(&mut rng).unwrap();
            if path.columns().unwrap() == 4 {
                all_match += 1;
            }
        }
        assert!(
            all_match > total / 2,
            "only {}/{} samples were the dominant path",
            all_match,
            total
        );
    }

    #[test]
    fn banded_matrix_matches_full_when_band_is_wide() {
        let m = model();
        let x = b"ACGTAC";
        let y = b"ACGTAC";
        let guide = AlignPath::from_pair(0, vec![true; 6], 1, vec![true; 6]);
        let env = GuideAlignmentEnvelope::new(&guide, 0, 1, 12).unwrap();
        let pos: Vec<usize> = (0..6).collect();
        let eigen = EigenEngine::new(&m).unwrap();
        let banded = AlignmentMatrix::with_engine(
            &m,
            &eigen,
            &tokens(&m, x),
            &tokens(&m, y),
            0.2,
            &env,
            &pos,
            &pos,
        )
        .unwrap();
        let full = full_matrix(&m, x, y, 0.2);
        assert!(
            (banded.forward_log_likelihood() - full.forward_log_likelihood()).abs() < 1e-9,
            "banded {} vs full {}",
            banded.forward_log_likelihood(),
            full.forward_log_likelihood()
        );
    }

    #[test]
    fn narrow_band_restricts_mass() {
        let m = model();
        let x = b"ACGTAC";
        let y = b"ACGTAC";
        let guide = AlignPath::from_pair(0, vec![true; 6], 1, vec![true; 6]);
        let env = GuideAlignmentEnvelope::new(&guide, 0, 1, 0).unwrap();
        let pos: Vec<usize> = (0..6).collect();
        let eigen = EigenEngine::new(&m).unwrap();
        let banded = AlignmentMatrix::with_engine(
            &m,
            &eigen,
            &tokens(&m, x),
            &tokens(&m, y),
            0.2,
            &env,
            &pos,
            &pos,
        )
        .unwrap();
        let full = full_matrix(&m, x, y, 0.2);
        assert!(banded.forward_log_likelihood() <= full.forward_log_likelihood() + 1e-12);
        // The diagonal path survives a zero-width band.
        let (path, _) = banded.best_alignment().unwrap();
        assert_eq!(path.columns().unwrap(), 6);
    }

    #[test]
    fn rejects_out_of_alphabet_tokens() {
        let m = model();
        let eigen = EigenEngine::new(&m).unwrap();
        assert!(AlignmentMatrix::quick(&m, &eigen, &[0, 9], &[1], 0.2).is_err());
    }

    #[test]
    fn rejects_negative_distance() {
        let m = model();
        let eigen = EigenEngine::new(&m).unwrap();
        assert!(AlignmentMatrix::quick(&m, &eigen, &[0], &[1], -0.5).is_err());
    }

    #[test]
    fn empty_y_sequence_forces_x_inserts() {
        let m = model();
        let mx = full_matrix(&m, b"ACG", b"", 0.3);
        assert!(mx.forward_log_likelihood().is_finite());
        let (path, _) = mx.best_alignment().unwrap();
        assert_eq!(path.residues(0), 3);
        assert_eq!(path.residues(1), 0);
    }
}
