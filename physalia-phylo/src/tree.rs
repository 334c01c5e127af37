//! Rooted phylogenetic trees in canonical post-order.
//!
//! Nodes live in a flat arena indexed by [`NodeId`]. The arena is kept in
//! post-order: every child index is smaller than its parent index and the
//! root occupies the largest index. This makes the upward/downward passes
//! of the sum-product engine simple index sweeps, and parent/sibling
//! navigation pure index arithmetic with no ownership cycles.

use physalia_core::{PhysaliaError, Result};

/// Index into the tree's node arena.
pub type NodeId = usize;

/// A single node in a phylogenetic tree.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    /// Parent node (None for root).
    pub parent: Option<NodeId>,
    /// Child nodes, in declaration order.
    pub children: Vec<NodeId>,
    /// Branch length from this node to its parent (0.0 at the root).
    pub branch_length: f64,
    /// Taxon or clade label.
    pub name: Option<String>,
}

impl Node {
    /// True if this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A rooted tree stored as a post-ordered arena of nodes.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Create a tree from pre-built nodes.
    ///
    /// # Errors
    ///
    /// `InvalidInput` unless the arena is in post-order (children before
    /// parents, the single root last), parent/child links are mutually
    /// consistent, every non-root branch length is nonnegative, and every
    /// internal node other than the root has exactly two children.
    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(PhysaliaError::InvalidInput("empty node list".into()));
        }
        let n = nodes.len();
        let root = n - 1;
        for (id, node) in nodes.iter().enumerate() {
            match node.parent {
                None => {
                    if id != root {
                        return Err(PhysaliaError::InvalidInput(format!(
                            "parentless node {} is not the last index {}",
                            id, root
                        )));
                    }
                }
                Some(p) => {
                    if p <= id || p >= n {
                        return Err(PhysaliaError::InvalidInput(format!(
                            "node {} has parent {} violating post-order",
                            id, p
                        )));
                    }
                    if !nodes[p].children.contains(&id) {
                        return Err(PhysaliaError::InvalidInput(format!(
                            "node {} is missing from the child list of its parent {}",
                            id, p
                        )));
                    }
                    if node.branch_length < 0.0 {
                        return Err(PhysaliaError::InvalidInput(format!(
                            "node {} has negative branch length {}",
                            id, node.branch_length
                        )));
                    }
                }
            }
            for &c in &node.children {
                if c >= id {
                    return Err(PhysaliaError::InvalidInput(format!(
                        "node {} has child {} violating post-order",
                        id, c
                    )));
                }
                if nodes[c].parent != Some(id) {
                    return Err(PhysaliaError::InvalidInput(format!(
                        "child {} of node {} has mismatched parent link",
                        c, id
                    )));
                }
            }
            if id != root && !node.children.is_empty() && node.children.len() != 2 {
                return Err(PhysaliaError::InvalidInput(format!(
                    "internal node {} has {} children (tree must be binary below the root)",
                    id,
                    node.children.len()
                )));
            }
        }
        Ok(Self { nodes })
    }

    /// Parse a Newick string and renumber the result into canonical
    /// post-order. Missing branch lengths default to zero.
    pub fn from_newick(input: &str) -> Result<Self> {
        let parsed = newick_parse(input)?;
        Tree::from_nodes(renumber_postorder(parsed))
    }

    /// Serialize to a Newick string.
    pub fn to_newick(&self) -> String {
        let mut buf = String::new();
        self.write_subtree(self.root(), &mut buf);
        buf.push(';');
        buf
    }

    fn write_subtree(&self, id: NodeId, buf: &mut String) {
        let node = &self.nodes[id];
        if !node.children.is_empty() {
            buf.push('(');
            for (i, &child) in node.children.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                self.write_subtree(child, buf);
            }
            buf.push(')');
        }
        if let Some(ref name) = node.name {
            buf.push_str(name);
        }
        if id != self.root() {
            buf.push(':');
            let s = format!("{:.10}", node.branch_length);
            let s = s.trim_end_matches('0');
            let s = s.trim_end_matches('.');
            buf.push_str(if s.is_empty() { "0" } else { s });
        }
    }

    /// Access a node by id.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The root node id (always the largest index).
    pub fn root(&self) -> NodeId {
        self.nodes.len() - 1
    }

    /// Parent of `n`, or None at the root.
    pub fn parent_node(&self, n: NodeId) -> Option<NodeId> {
        self.nodes[n].parent
    }

    /// The `k`-th child of `n`.
    pub fn get_child(&self, n: NodeId, k: usize) -> NodeId {
        self.nodes[n].children[k]
    }

    /// Number of children of `n`.
    pub fn n_children(&self, n: NodeId) -> usize {
        self.nodes[n].children.len()
    }

    /// The other child of `n`'s parent.
    ///
    /// # Errors
    ///
    /// `NonBinaryNode` if `n` is the root or its parent is not binary.
    pub fn get_sibling(&self, n: NodeId) -> Result<NodeId> {
        let p = self.nodes[n].parent.ok_or_else(|| {
            PhysaliaError::NonBinaryNode(format!("node {} has no parent, so no sibling", n))
        })?;
        let kids = &self.nodes[p].children;
        if kids.len() != 2 {
            return Err(PhysaliaError::NonBinaryNode(format!(
                "parent {} of node {} has {} children",
                p,
                n,
                kids.len()
            )));
        }
        Ok(if kids[0] == n { kids[1] } else { kids[0] })
    }

    /// Children of `n`'s parent other than `n` itself (empty at the root).
    pub fn siblings(&self, n: NodeId) -> Vec<NodeId> {
        match self.nodes[n].parent {
            None => Vec::new(),
            Some(p) => self.nodes[p]
                .children
                .iter()
                .copied()
                .filter(|&c| c != n)
                .collect(),
        }
    }

    /// True if `n` has no children.
    pub fn is_leaf(&self, n: NodeId) -> bool {
        self.nodes[n].is_leaf()
    }

    /// Branch length from `n` to its parent (0.0 at the root).
    pub fn branch_length(&self, n: NodeId) -> f64 {
        self.nodes[n].branch_length
    }

    /// Branch length between two adjacent nodes.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `a` and `b` are not parent and child.
    pub fn branch_length_between(&self, a: NodeId, b: NodeId) -> Result<f64> {
        if self.nodes[b].parent == Some(a) {
            Ok(self.nodes[b].branch_length)
        } else if self.nodes[a].parent == Some(b) {
            Ok(self.nodes[a].branch_length)
        } else {
            Err(PhysaliaError::InvalidInput(format!(
                "nodes {} and {} are not adjacent",
                a, b
            )))
        }
    }

    /// Display name of a node: its label, or `node<id>` for unnamed nodes.
    pub fn seq_name(&self, n: NodeId) -> String {
        match self.nodes[n].name {
            Some(ref name) => name.clone(),
            None => format!("node{}", n),
        }
    }

    /// All leaf node ids.
    pub fn leaves(&self) -> Vec<NodeId> {
        (0..self.nodes.len())
            .filter(|&id| self.nodes[id].is_leaf())
            .collect()
    }

    /// The closest leaf to `n` by total branch length over the undirected
    /// tree, and its distance. A leaf is its own closest leaf at distance 0.
    pub fn closest_leaf(&self, n: NodeId) -> (NodeId, f64) {
        let count = self.nodes.len();
        let mut dist = vec![f64::INFINITY; count];
        let mut stack = vec![n];
        dist[n] = 0.0;
        while let Some(v) = stack.pop() {
            let mut push = |u: NodeId, d: f64, stack: &mut Vec<NodeId>| {
                if dist[v] + d < dist[u] {
                    dist[u] = dist[v] + d;
                    stack.push(u);
                }
            };
            if let Some(p) = self.nodes[v].parent {
                push(p, self.nodes[v].branch_length, &mut stack);
            }
            for &c in &self.nodes[v].children {
                push(c, self.nodes[c].branch_length, &mut stack);
            }
        }
        let mut best = (n, f64::INFINITY);
        for id in 0..count {
            if self.nodes[id].is_leaf() && dist[id] < best.1 {
                best = (id, dist[id]);
            }
        }
        best
    }
}

// ---------------------------------------------------------------------------
// Newick parsing
// ---------------------------------------------------------------------------

/// Node in parse order, before post-order renumbering.
struct ParsedNode {
    parent: Option<usize>,
    children: Vec<usize>,
    branch_length: f64,
    name: Option<String>,
}

fn newick_parse(input: &str) -> Result<Vec<ParsedNode>> {
    let mut parser = Parser {
        input: input.as_bytes(),
        pos: 0,
        nodes: Vec::new(),
    };
    parser.skip_whitespace();
    parser.parse_subtree(None)?;
    parser.skip_whitespace();
    if parser.peek() != Some(b';') {
        return Err(PhysaliaError::Parse(
            "expected ';' at end of Newick string".into(),
        ));
    }
    Ok(parser.nodes)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    nodes: Vec<ParsedNode>,
}

impl<'a> Parser<'a> {
    fn parse_subtree(&mut self, parent: Option<usize>) -> Result<usize> {
        self.skip_whitespace();
        let id = self.nodes.len();
        self.nodes.push(ParsedNode {
            parent,
            children: Vec::new(),
            branch_length: 0.0,
            name: None,
        });

        if self.peek() == Some(b'(') {
            self.pos += 1;
            let first = self.parse_subtree(Some(id))?;
            self.nodes[id].children.push(first);
            loop {
                self.skip_whitespace();
                if self.peek() == Some(b',') {
                    self.pos += 1;
                    let child = self.parse_subtree(Some(id))?;
                    self.nodes[id].children.push(child);
                } else {
                    break;
                }
            }
            self.skip_whitespace();
            if self.peek() != Some(b')') {
                return Err(PhysaliaError::Parse("expected ')' in Newick string".into()));
            }
            self.pos += 1;
        }

        self.parse_label(id)?;
        Ok(id)
    }

    fn parse_label(&mut self, id: usize) -> Result<()> {
        self.skip_whitespace();
        let name = self.parse_name();
        if !name.is_empty() {
            self.nodes[id].name = Some(name);
        }
        self.skip_whitespace();
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_whitespace();
            let len_str = self.parse_float_str();
            if len_str.is_empty() {
                return Err(PhysaliaError::Parse("expected number after ':'".into()));
            }
            let len: f64 = len_str.parse().map_err(|_| {
                PhysaliaError::Parse(format!("invalid branch length: '{}'", len_str))
            })?;
            if len < 0.0 {
                return Err(PhysaliaError::Parse(format!(
                    "negative branch length: {}",
                    len
                )));
            }
            self.nodes[id].branch_length = len;
        }
        Ok(())
    }

    fn parse_name(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b':' | b',' | b')' | b'(' | b';' => break,
                b' ' | b'\t' | b'\n' | b'\r' => break,
                _ => self.pos += 1,
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn parse_float_str(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E' => self.pos += 1,
                _ => break,
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                _ => break,
            }
        }
    }
}

/// Renumber parse-ordered nodes into canonical post-order (children before
/// parents, root last), preserving child declaration order.
fn renumber_postorder(parsed: Vec<ParsedNode>) -> Vec<Node> {
    let n = parsed.len();
    let mut order = Vec::with_capacity(n);
    // Iterative post-order from the parse root (index 0).
    let mut stack: Vec<(usize, bool)> = vec![(0, false)];
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            order.push(id);
        } else {
            stack.push((id, true));
            for &c in parsed[id].children.iter().rev() {
                stack.push((c, false));
            }
        }
    }

    let mut new_index = vec![0usize; n];
    for (new, &old) in order.iter().enumerate() {
        new_index[old] = new;
    }

    let mut nodes: Vec<Option<Node>> = (0..n).map(|_| None).collect();
    for &old in &order {
        let p = &parsed[old];
        nodes[new_index[old]] = Some(Node {
            parent: p.parent.map(|q| new_index[q]),
            children: p.children.iter().map(|&c| new_index[c]).collect(),
            branch_length: p.branch_length,
            name: p.name.clone(),
        });
    }
    nodes.into_iter().map(Option::unwrap).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cherry_in_postorder() {
        let tree = Tree::from_newick("(A:0.1,B:0.2);").unwrap();
        assert_eq!(tree.node_count(), 3);
        assert_eq!(tree.root(), 2);
        assert!(tree.is_leaf(0));
        assert!(tree.is_leaf(1));
        assert_eq!(tree.parent_node(0), Some(2));
        assert_eq!(tree.parent_node(2), None);
        assert!((tree.branch_length(0) - 0.1).abs() < 1e-12);
        assert!((tree.branch_length(1) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn postorder_invariant_holds_for_nested_tree() {
        let tree = Tree::from_newick("((A:0.1,B:0.2):0.3,(C:0.4,D:0.5):0.6);").unwrap();
        assert_eq!(tree.node_count(), 7);
        for id in 0..tree.node_count() {
            if let Some(p) = tree.parent_node(id) {
                assert!(p > id, "parent {} not above child {}", p, id);
            } else {
                assert_eq!(id, tree.root());
            }
        }
    }

    #[test]
    fn child_order_preserved() {
        let tree = Tree::from_newick("((A,B)ab,(C,D)cd);").unwrap();
        let root = tree.root();
        let left = tree.get_child(root, 0);
        let right = tree.get_child(root, 1);
        assert_eq!(tree.node(left).name.as_deref(), Some("ab"));
        assert_eq!(tree.node(right).name.as_deref(), Some("cd"));
        assert_eq!(
            tree.node(tree.get_child(left, 0)).name.as_deref(),
            Some("A")
        );
    }

    #[test]
    fn sibling_navigation() {
        let tree = Tree::from_newick("(A:0.1,B:0.2);").unwrap();
        assert_eq!(tree.get_sibling(0).unwrap(), 1);
        assert_eq!(tree.get_sibling(1).unwrap(), 0);
        assert!(tree.get_sibling(tree.root()).is_err());
    }

    #[test]
    fn sibling_of_trifurcating_root_child_fails() {
        let tree = Tree::from_newick("(A:0.1,B:0.2,C:0.3);").unwrap();
        assert!(tree.get_sibling(0).is_err());
        assert_eq!(tree.siblings(0), vec![1, 2]);
    }

    #[test]
    fn non_root_multifurcation_rejected() {
        assert!(Tree::from_newick("((A,B,C):0.1,D);").is_err());
    }

    #[test]
    fn closest_leaf_of_leaf_is_itself() {
        let tree = Tree::from_newick("((A:0.1,B:0.2):0.3,C:1.0);").unwrap();
        let a = tree
            .leaves()
            .into_iter()
            .find(|&id| tree.node(id).name.as_deref() == Some("A"))
            .unwrap();
        let (leaf, dist) = tree.closest_leaf(a);
        assert_eq!(leaf, a);
        assert_eq!(dist, 0.0);
    }

    #[test]
    fn closest_leaf_from_internal_node() {
        let tree = Tree::from_newick("((A:0.1,B:0.2):0.3,C:1.0);").unwrap();
        let a = tree
            .leaves()
            .into_iter()
            .find(|&id| tree.node(id).name.as_deref() == Some("A"))
            .unwrap();
        let ab = tree.parent_node(a).unwrap();
        let (leaf, dist) = tree.closest_leaf(ab);
        assert_eq!(leaf, a);
        assert!((dist - 0.1).abs() < 1e-12);

        // From the root, A at distance 0.3 + 0.1 = 0.4 beats C at 1.0.
        let (leaf, dist) = tree.closest_leaf(tree.root());
        assert_eq!(leaf, a);
        assert!((dist - 0.4).abs() < 1e-12);
    }

    #[test]
    fn branch_length_between_adjacent() {
        let tree = Tree::from_newick("(A:0.1,B:0.2);").unwrap();
        let root = tree.root();
        assert!((tree.branch_length_between(root, 0).unwrap() - 0.1).abs() < 1e-12);
        assert!((tree.branch_length_between(0, root).unwrap() - 0.1).abs() < 1e-12);
        assert!(tree.branch_length_between(0, 1).is_err());
    }

    #[test]
    fn newick_roundtrip() {
        let input = "((A:0.1,B:0.2):0.3,(C:0.4,D:0.5):0.6);";
        let tree = Tree::from_newick(input).unwrap();
        let tree2 = Tree::from_newick(&tree.to_newick()).unwrap();
        assert_eq!(tree.node_count(), tree2.node_count());
        for id in 0..tree.node_count() {
            assert_eq!(tree.node(id).name, tree2.node(id).name);
            assert!((tree.branch_length(id) - tree2.branch_length(id)).abs() < 1e-9);
        }
    }

    #[test]
    fn parse_errors() {
        assert!(Tree::from_newick("((A,B);").is_err());
        assert!(Tree::from_newick("(A,B)").is_err());
        assert!(Tree::from_newick("(A:abc,B);").is_err());
        assert!(Tree::from_newick("(A:-0.5,B);").is_err());
    }

    #[test]
    fn from_nodes_rejects_disorder() {
        // Parent before child.
        let nodes = vec![
            Node {
                parent: None,
                children: vec![1, 2],
                branch_length: 0.0,
                name: None,
            },
            Node {
                parent: Some(0),
                children: vec![],
                branch_length: 0.1,
                name: None,
            },
            Node {
                parent: Some(0),
                children: vec![],
                branch_length: 0.1,
                name: None,
            },
        ];
        assert!(Tree::from_nodes(nodes).is_err());
    }
}
