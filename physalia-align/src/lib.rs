//! Alignment machinery for the Physalia statistical alignment ecosystem.
//!
//! Provides row-indexed alignment paths with synchronized merging, guide
//! alignment envelopes for banded DP, a three-state pairwise alignment
//! matrix (forward, Viterbi, stochastic traceback), the randomized
//! alignment graph with maximum-weight spanning tree extraction, and the
//! node-resampling move skeleton consumed by an MCMC outer loop.
//!
//! # Quick start
//!
//! ```
//! use physalia_align::AlignGraph;
//! use physalia_core::Xorshift64;
//! use physalia_phylo::{IndelRates, RateModel};
//!
//! let model = RateModel::jukes_cantor(b"ACGT", IndelRates::default()).unwrap();
//! let seqs = vec![b"ACGTACGT".to_vec(), b"ACGTACG".to_vec(), b"ACTACGT".to_vec()];
//! let mut rng = Xorshift64::new(42);
//! let mut graph = AlignGraph::new(&seqs, &model, 0.5, &mut rng).unwrap();
//! let msa = graph.mst_path().unwrap();
//! assert_eq!(msa.n_rows(), 3);
//! ```

pub mod envelope;
pub mod graph;
pub mod matrix;
pub mod path;
pub mod sampler;

pub use envelope::{guide_seq_pos, GuideAlignmentEnvelope};
pub use graph::{AlignGraph, Edge, Partition};
pub use matrix::AlignmentMatrix;
pub use path::{align_path_columns, AlignPath};
pub use sampler::{History, SampleNodeMove, Sampler};
