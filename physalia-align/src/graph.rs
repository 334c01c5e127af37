//! Randomized alignment graph and maximum-weight spanning tree.
//!
//! The builder lays down `min(K(K−1)/2, ⌈K·log₂K⌉)` random pairwise
//! alignments between K sequences — enough, with high probability, for the
//! graph to connect — scoring each edge with its alignment log-likelihood.
//! A Prim-flavoured sweep then extracts the maximum-weight spanning tree,
//! and merging its edge paths yields a multiple-alignment skeleton.

use crate::matrix::AlignmentMatrix;
use crate::path::AlignPath;
use physalia_core::{PhysaliaError, Result, Xorshift64};
use physalia_phylo::{EigenEngine, RateModel};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use tracing::debug;

/// A scored pairwise alignment between two sequence rows (`row1 < row2`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub row1: usize,
    pub row2: usize,
    /// Alignment log-likelihood; higher is better.
    pub lp: f64,
}

impl Eq for Edge {}

impl Ord for Edge {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.lp
            .total_cmp(&other.lp)
            .then_with(|| self.row1.cmp(&other.row1))
            .then_with(|| self.row2.cmp(&other.row2))
    }
}

impl PartialOrd for Edge {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Disjoint sets over `{0..n-1}` with a per-set membership view.
///
/// Merging relabels the members of the larger-indexed set into the smaller
/// index and leaves the vacated set empty in place, keeping set indices
/// stable.
#[derive(Debug, Clone)]
pub struct Partition {
    seq_set_idx: Vec<usize>,
    seq_set: Vec<BTreeSet<usize>>,
    /// Number of nonempty sets.
    pub n_sets: usize,
}

impl Partition {
    /// `n` singleton sets.
    pub fn new(n: usize) -> Self {
        Self {
            seq_set_idx: (0..n).collect(),
            seq_set: (0..n).map(|i| BTreeSet::from([i])).collect(),
            n_sets: n,
        }
    }

    /// Do the edge's endpoints currently share a set?
    pub fn in_same_set(&self, e: &Edge) -> bool {
        self.seq_set_idx[e.row1] == self.seq_set_idx[e.row2]
    }

    /// Merge the sets containing the edge's endpoints (no-op if already
    /// together).
    pub fn merge(&mut self, e: &Edge) {
        if self.in_same_set(e) {
            return;
        }
        let mut idx1 = self.seq_set_idx[e.row1];
        let mut idx2 = self.seq_set_idx[e.row2];
        if idx1 > idx2 {
            std::mem::swap(&mut idx1, &mut idx2);
        }
        let absorbed = std::mem::take(&mut self.seq_set[idx2]);
        for &member in &absorbed {
            self.seq_set_idx[member] = idx1;
        }
        self.seq_set[idx1].extend(absorbed);
        self.n_sets -= 1;
    }

    /// Members of the set holding element `i`.
    pub fn set_of(&self, i: usize) -> &BTreeSet<usize> {
        &self.seq_set[self.seq_set_idx[i]]
    }

    /// Members of set index 0 — always nonempty, since merges collapse
    /// into the smaller index.
    pub fn first_set(&self) -> &BTreeSet<usize> {
        &self.seq_set[0]
    }
}

/// A random graph of scored pairwise alignments over K sequences.
pub struct AlignGraph {
    n_seqs: usize,
    edges: Vec<BinaryHeap<Edge>>,
    edge_path: Vec<BTreeMap<usize, AlignPath>>,
    n_edges: usize,
}

impl AlignGraph {
    /// Lay down random pairwise alignments until the requested edge count
    /// is reached and the graph is connected.
    ///
    /// Pairs are drawn uniformly without replacement via rejection
    /// sampling, canonicalised to `src < dest` before both storage and the
    /// seen-pair check.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for fewer than two sequences or untokenizable
    /// characters; `NumericalFailure` from the eigensolve.
    pub fn new(
        seqs: &[Vec<u8>],
        model: &RateModel,
        time: f64,
        rng: &mut Xorshift64,
    ) -> Result<Self> {
        let k = seqs.len();
        if k < 2 {
            return Err(PhysaliaError::InvalidInput(format!(
                "alignment graph needs at least two sequences, got {}",
                k
            )));
        }
        let eigen = EigenEngine::new(model)?;
        let tokens: Vec<Vec<usize>> = seqs
            .iter()
            .map(|s| s.iter().map(|&c| model.tokenize(c)).collect::<Result<_>>())
            .collect::<Result<_>>()?;

        let n_target = ((k * (k - 1)) / 2).min(((k as f64).log2() * k as f64).ceil() as usize);

        let mut graph = Self {
            n_seqs: k,
            edges: vec![BinaryHeap::new(); k],
            edge_path: vec![BTreeMap::new(); k],
            n_edges: 0,
        };
        let mut part = Partition::new(k);

        while graph.n_edges < n_target || part.n_sets > 1 {
            let (src, dest) = loop {
                let mut src = rng.below(k);
                let mut dest = rng.below(k);
                if src == dest {
                    continue;
                }
                if dest < src {
                    std::mem::swap(&mut src, &mut dest);
                }
                if graph.edge_path[src].contains_key(&dest) {
                    continue;
                }
                break (src, dest);
            };

            let matrix = AlignmentMatrix::quick(model, &eigen, &tokens[src], &tokens[dest], time)?;
            let (pair_path, lp) = matrix.best_alignment()?;

            let mut path = AlignPath::new();
            path.insert_row(src, pair_path.row(0).unwrap().to_vec());
            path.insert_row(dest, pair_path.row(1).unwrap().to_vec());
            graph.edge_path[src].insert(dest, path);

            let edge = Edge {
                row1: src,
                row2: dest,
                lp,
            };
            graph.edges[src].push(edge);
            graph.edges[dest].push(edge);
            graph.n_edges += 1;
            part.merge(&edge);

            debug!(
                src,
                dest,
                lp,
                edges = graph.n_edges,
                disconnected_sets = part.n_sets,
                "aligned sequence pair"
            );
        }
        Ok(graph)
    }

    /// Number of edges laid down during construction.
    pub fn n_edges(&self) -> usize {
        self.n_edges
    }

    /// Extract a maximum-weight spanning tree as a list of edge paths.
    ///
    /// Grows from the set containing sequence 0, repeatedly taking the
    /// best-scoring edge leaving the current component. Heap tops whose
    /// endpoints have already merged are discarded lazily.
    ///
    /// # Errors
    ///
    /// `Disconnected` if no valid edge remains while components are still
    /// unmerged (cannot happen for a graph built by [`AlignGraph::new`]).
    pub fn min_span_tree(&mut self) -> Result<Vec<AlignPath>> {
        let mut paths = Vec::with_capacity(self.n_seqs - 1);
        let mut part = Partition::new(self.n_seqs);

        while part.n_sets > 1 {
            let mut best: Option<Edge> = None;
            let component: Vec<usize> = part.first_set().iter().copied().collect();
            for src in component {
                while let Some(top) = self.edges[src].peek() {
                    if part.in_same_set(top) {
                        self.edges[src].pop();
                    } else {
                        break;
                    }
                }
                if let Some(&top) = self.edges[src].peek() {
                    if best.map_or(true, |b| b < top) {
                        best = Some(top);
                    }
                }
            }
            let best = best.ok_or_else(|| {
                PhysaliaError::Disconnected(format!(
                    "no edge leaves the current component ({} sets remain)",
                    part.n_sets
                ))
            })?;
            paths.push(self.edge_path[best.row1][&best.row2].clone());
            part.merge(&best);

            debug!(
                row1 = best.row1,
                row2 = best.row2,
                lp = best.lp,
                joined = paths.len(),
                disconnected_sets = part.n_sets,
                "joined spanning edge"
            );
        }
        Ok(paths)
    }

    /// Merge the spanning tree's edge paths into one multiple-alignment
    /// path over all K sequences.
    pub fn mst_path(&mut self) -> Result<AlignPath> {
        let paths = self.min_span_tree()?;
        AlignPath::merge(&paths)
    }
}
