//! Node-resampling move preparation for MCMC over histories.
//!
//! A history couples a tree with a gapped alignment (one row per node). The
//! sampler picks an internal node, anchors a guide envelope on the closest
//! leaves of its two children, strips and tokenizes the child rows, and
//! prepares the banded DP matrix from which a fresh child–child alignment
//! is proposed. The Metropolis–Hastings acceptance decision lives above
//! this layer.

use crate::envelope::{guide_seq_pos, GuideAlignmentEnvelope};
use crate::matrix::AlignmentMatrix;
use crate::path::AlignPath;
use physalia_core::{PhysaliaError, Result, Xorshift64};
use physalia_phylo::{is_gap, NodeId, RateModel, Tree};

/// A tree with one gapped alignment row per node.
#[derive(Debug, Clone)]
pub struct History {
    pub tree: Tree,
    pub gapped: Vec<Vec<u8>>,
}

impl History {
    /// # Errors
    ///
    /// `MalformedAlignment` if the alignment does not have one row per
    /// node, or rows differ in length.
    pub fn new(tree: Tree, gapped: Vec<Vec<u8>>) -> Result<Self> {
        if gapped.len() != tree.node_count() {
            return Err(PhysaliaError::MalformedAlignment(format!(
                "{} alignment rows for {} tree nodes",
                gapped.len(),
                tree.node_count()
            )));
        }
        let cols = gapped.first().map_or(0, |r| r.len());
        for (r, row) in gapped.iter().enumerate() {
            if row.len() != cols {
                return Err(PhysaliaError::MalformedAlignment(format!(
                    "row {} has {} columns, expected {}",
                    r,
                    row.len(),
                    cols
                )));
            }
        }
        Ok(Self { tree, gapped })
    }

    /// The presence path of this history's alignment.
    pub fn path(&self) -> AlignPath {
        AlignPath::from_gapped_rows(&self.gapped)
    }
}

/// Shared state of the history sampler: the model, the guide alignment
/// used to band proposal DP matrices, and the band half-width.
pub struct Sampler {
    pub model: RateModel,
    pub guide: AlignPath,
    pub max_distance_from_guide: usize,
}

impl Sampler {
    pub fn new(model: RateModel, guide: AlignPath, max_distance_from_guide: usize) -> Self {
        Self {
            model,
            guide,
            max_distance_from_guide,
        }
    }

    /// Pick an internal (non-leaf) node uniformly at random.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the tree has no internal node.
    pub fn random_internal_node(tree: &Tree, rng: &mut Xorshift64) -> Result<NodeId> {
        let internal: Vec<NodeId> = (0..tree.node_count())
            .filter(|&n| !tree.is_leaf(n))
            .collect();
        if internal.is_empty() {
            return Err(PhysaliaError::InvalidInput(
                "tree has no internal node to resample".into(),
            ));
        }
        Ok(internal[rng.below(internal.len())])
    }

    /// Strip gaps from a row and tokenize what remains.
    pub fn remove_gaps_and_tokenize(&self, gapped: &[u8]) -> Result<Vec<usize>> {
        gapped
            .iter()
            .filter(|&&c| !is_gap(c))
            .map(|&c| self.model.tokenize(c))
            .collect()
    }
}

/// A prepared node-resampling move: the chosen node, its relatives, the
/// guide envelope, and the banded DP matrix over the children's tokens.
pub struct SampleNodeMove {
    pub node: NodeId,
    pub parent: NodeId,
    pub left_child: NodeId,
    pub right_child: NodeId,
    /// True when the parent-side envelope anchors on the left child's
    /// closest leaf (the nearer of the two child anchors).
    pub parent_anchor_on_left: bool,
    /// Gap-stripped tokens of the parent row.
    pub parent_tokens: Vec<usize>,
    matrix: AlignmentMatrix,
}

impl SampleNodeMove {
    /// Pick an internal node at random and prepare the move for it.
    pub fn new(history: &History, sampler: &Sampler, rng: &mut Xorshift64) -> Result<Self> {
        let node = Sampler::random_internal_node(&history.tree, rng)?;
        Self::at(history, sampler, node)
    }

    /// Prepare the move for a specific node.
    ///
    /// # Errors
    ///
    /// `NonBinaryNode` unless `node` has exactly two children and a parent.
    pub fn at(history: &History, sampler: &Sampler, node: NodeId) -> Result<Self> {
        let tree = &history.tree;
        if tree.n_children(node) != 2 {
            return Err(PhysaliaError::NonBinaryNode(format!(
                "node {} has {} children; the resampling move needs exactly two",
                node,
                tree.n_children(node)
            )));
        }
        let parent = tree.parent_node(node).ok_or_else(|| {
            PhysaliaError::NonBinaryNode(format!(
                "node {} is the root; the resampling move needs a parent",
                node
            ))
        })?;
        let left_child = tree.get_child(node, 0);
        let right_child = tree.get_child(node, 1);

        let l_dist = tree.branch_length(left_child);
        let r_dist = tree.branch_length(right_child);

        let (left_leaf, left_leaf_dist) = tree.closest_leaf(left_child);
        let (right_leaf, right_leaf_dist) = tree.closest_leaf(right_child);
        let parent_anchor_on_left = left_leaf_dist + l_dist < right_leaf_dist + r_dist;

        let left_env_pos = guide_seq_pos(&sampler.guide, left_child, left_leaf)?;
        let right_env_pos = guide_seq_pos(&sampler.guide, right_child, right_leaf)?;
        let env = GuideAlignmentEnvelope::new(
            &sampler.guide,
            left_leaf,
            right_leaf,
            sampler.max_distance_from_guide,
        )?;

        let left_tokens = sampler.remove_gaps_and_tokenize(&history.gapped[left_child])?;
        let right_tokens = sampler.remove_gaps_and_tokenize(&history.gapped[right_child])?;
        let parent_tokens = sampler.remove_gaps_and_tokenize(&history.gapped[parent])?;

        let matrix = AlignmentMatrix::new(
            &sampler.model,
            &left_tokens,
            &right_tokens,
            l_dist + r_dist,
            &env,
            &left_env_pos,
            &right_env_pos,
        )?;

        Ok(Self {
            node,
            parent,
            left_child,
            right_child,
            parent_anchor_on_left,
            parent_tokens,
            matrix,
        })
    }

    /// The banded partition function of the proposal matrix.
    pub fn forward_log_likelihood(&self) -> f64 {
        self.matrix.forward_log_likelihood()
    }

    /// Propose a fresh left–right child alignment by stochastic traceback.
    /// The returned path maps row 0 to the left child and row 1 to the
    /// right child.
    pub fn propose(&self, rng: &mut Xorshift64) -> Result<AlignPath> {
        self.matrix.sample_alignment(rng)
    }
}
