//! Phylogenetic inference engines for the Physalia statistical alignment
//! ecosystem.
//!
//! Provides substitution rate models, rooted trees in canonical post-order,
//! a spectral substitution engine (transition probabilities and expected
//! substitution counts in closed form), and the column-wise sum-product
//! engine that turns a tree plus gapped alignment into likelihoods,
//! posterior marginals, and EM sufficient statistics.
//!
//! # Quick start
//!
//! ```
//! use physalia_phylo::{ColumnSumProduct, IndelRates, RateModel, Tree};
//!
//! let model = RateModel::jukes_cantor(b"ACGT", IndelRates::default()).unwrap();
//! let tree = Tree::from_newick("(L1:0.1,L2:0.1);").unwrap();
//! let gapped = vec![b"ACG".to_vec(), b"ACG".to_vec(), b"***".to_vec()];
//! let mut engine = ColumnSumProduct::new(&model, &tree, &gapped).unwrap();
//! let log_like = engine.total_log_likelihood().unwrap();
//! assert!(log_like < 0.0);
//! ```

pub mod eigen;
pub mod linalg;
pub mod model;
pub mod sumprod;
pub mod tree;

pub use eigen::{EigenBasis, EigenEngine};
pub use linalg::{Complex, ComplexMatrix};
pub use model::{is_gap, IndelRates, RateModel, GAP_CHARS, WILDCARD_CHAR};
pub use sumprod::ColumnSumProduct;
pub use tree::{Node, NodeId, Tree};
