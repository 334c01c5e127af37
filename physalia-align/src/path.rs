//! Alignment paths: row-indexed residue presence bitmaps.
//!
//! An [`AlignPath`] maps each participating row index to one bit per
//! alignment column (true = the row has a residue in that column, false =
//! gap). Pairwise DP produces two-row paths; the graph builder merges many
//! of them into one multiple-alignment path.

use physalia_core::{PhysaliaError, Result};
use physalia_phylo::is_gap;
use std::collections::BTreeMap;

/// A row-indexed set of per-column presence bitmaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlignPath {
    rows: BTreeMap<usize, Vec<bool>>,
}

impl AlignPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a two-row path from per-column presence of rows `x` and `y`.
    pub fn from_pair(x_row: usize, x_bits: Vec<bool>, y_row: usize, y_bits: Vec<bool>) -> Self {
        let mut path = Self::new();
        path.insert_row(x_row, x_bits);
        path.insert_row(y_row, y_bits);
        path
    }

    /// Derive a path from gapped alignment rows: bit r,c is set wherever
    /// row r holds a non-gap character.
    pub fn from_gapped_rows(gapped: &[Vec<u8>]) -> Self {
        let mut path = Self::new();
        for (r, row) in gapped.iter().enumerate() {
            path.insert_row(r, row.iter().map(|&c| !is_gap(c)).collect());
        }
        path
    }

    /// Insert (or replace) a row's bitmap.
    pub fn insert_row(&mut self, row: usize, bits: Vec<bool>) {
        self.rows.insert(row, bits);
    }

    /// A row's bitmap, if present.
    pub fn row(&self, row: usize) -> Option<&[bool]> {
        self.rows.get(&row).map(|v| v.as_slice())
    }

    /// Iterate rows in index order.
    pub fn rows(&self) -> impl Iterator<Item = (usize, &[bool])> {
        self.rows.iter().map(|(&r, bits)| (r, bits.as_slice()))
    }

    /// Row indices in order.
    pub fn row_indices(&self) -> Vec<usize> {
        self.rows.keys().copied().collect()
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of residues (set bits) in a row; 0 for absent rows.
    pub fn residues(&self, row: usize) -> usize {
        self.rows
            .get(&row)
            .map_or(0, |bits| bits.iter().filter(|&&b| b).count())
    }

    /// The common column count of all rows.
    ///
    /// # Errors
    ///
    /// `MalformedAlignment` if rows disagree on length (the path is not
    /// flush).
    pub fn columns(&self) -> Result<usize> {
        let mut iter = self.rows.iter();
        let (first_row, first) = match iter.next() {
            Some((&r, bits)) => (r, bits.len()),
            None => return Ok(0),
        };
        for (&r, bits) in iter {
            if bits.len() != first {
                return Err(PhysaliaError::MalformedAlignment(format!(
                    "path row {} has {} columns but row {} has {}",
                    r,
                    bits.len(),
                    first_row,
                    first
                )));
            }
        }
        Ok(first)
    }

    /// Project an ungapped sequence through a row of this path, producing
    /// the gapped row (`-` where the bit is unset).
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the row is absent or its residue count does not
    /// match the sequence length.
    pub fn project(&self, row: usize, seq: &[u8]) -> Result<Vec<u8>> {
        let bits = self.rows.get(&row).ok_or_else(|| {
            PhysaliaError::InvalidInput(format!("path has no row {}", row))
        })?;
        let residues = bits.iter().filter(|&&b| b).count();
        if residues != seq.len() {
            return Err(PhysaliaError::InvalidInput(format!(
                "row {} has {} residues but sequence has {}",
                row,
                residues,
                seq.len()
            )));
        }
        let mut out = Vec::with_capacity(bits.len());
        let mut pos = 0;
        for &bit in bits {
            if bit {
                out.push(seq[pos]);
                pos += 1;
            } else {
                out.push(b'-');
            }
        }
        Ok(out)
    }

    /// Merge several paths into one, synchronizing on shared rows.
    ///
    /// Paths are folded left to right. Columns carrying a residue in a
    /// shared row must agree across the two paths being merged and fuse
    /// into one output column; columns touching no shared row interleave
    /// (left operand first).
    ///
    /// # Errors
    ///
    /// `InvalidInput` on an empty input; `InvariantViolation` if two paths
    /// share no row or disagree on a shared row's residue order.
    pub fn merge(paths: &[AlignPath]) -> Result<AlignPath> {
        let mut iter = paths.iter();
        let mut merged = iter
            .next()
            .ok_or_else(|| PhysaliaError::InvalidInput("no paths to merge".into()))?
            .clone();
        for path in iter {
            merged = merge_two(&merged, path)?;
        }
        Ok(merged)
    }
}

fn merge_two(a: &AlignPath, b: &AlignPath) -> Result<AlignPath> {
    let shared: Vec<usize> = a
        .row_indices()
        .into_iter()
        .filter(|r| b.row(*r).is_some())
        .collect();
    if shared.is_empty() {
        return Err(PhysaliaError::InvariantViolation(format!(
            "cannot merge paths with no shared rows ({:?} vs {:?})",
            a.row_indices(),
            b.row_indices()
        )));
    }
    for &r in &shared {
        if a.residues(r) != b.residues(r) {
            return Err(PhysaliaError::InvariantViolation(format!(
                "shared row {} has {} residues in one path, {} in the other",
                r,
                a.residues(r),
                b.residues(r)
            )));
        }
    }

    let a_cols = a.columns()?;
    let b_cols = b.columns()?;
    let has_shared = |path: &AlignPath, col: usize| {
        shared.iter().any(|&r| path.row(r).map_or(false, |bits| bits[col]))
    };

    let a_rows = a.row_indices();
    let b_only: Vec<usize> = b
        .row_indices()
        .into_iter()
        .filter(|r| !shared.contains(r))
        .collect();

    let mut out: BTreeMap<usize, Vec<bool>> = BTreeMap::new();
    for &r in a_rows.iter().chain(&b_only) {
        out.insert(r, Vec::new());
    }

    let emit = |a_col: Option<usize>, b_col: Option<usize>, out: &mut BTreeMap<usize, Vec<bool>>| {
        for &r in &a_rows {
            let bit = a_col.map_or(false, |c| a.row(r).unwrap()[c]);
            out.get_mut(&r).unwrap().push(bit);
        }
        for &r in &b_only {
            let bit = b_col.map_or(false, |c| b.row(r).unwrap()[c]);
            out.get_mut(&r).unwrap().push(bit);
        }
    };

    let (mut i, mut j) = (0, 0);
    while i < a_cols || j < b_cols {
        if i < a_cols && !has_shared(a, i) {
            emit(Some(i), None, &mut out);
            i += 1;
        } else if j < b_cols && !has_shared(b, j) {
            emit(None, Some(j), &mut out);
            j += 1;
        } else if i < a_cols && j < b_cols {
            for &r in &shared {
                if a.row(r).unwrap()[i] != b.row(r).unwrap()[j] {
                    return Err(PhysaliaError::InvariantViolation(format!(
                        "paths disagree on shared row {} (columns {} vs {})",
                        r, i, j
                    )));
                }
            }
            emit(Some(i), Some(j), &mut out);
            i += 1;
            j += 1;
        } else {
            return Err(PhysaliaError::InvariantViolation(
                "paths exhausted out of sync during merge".into(),
            ));
        }
    }

    Ok(AlignPath { rows: out })
}

/// The common column count of a path (the flushness check).
pub fn align_path_columns(path: &AlignPath) -> Result<usize> {
    path.columns()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(s: &str) -> Vec<bool> {
        s.chars().map(|c| c == '1').collect()
    }

    #[test]
    fn columns_of_flush_path() {
        let path = AlignPath::from_pair(0, bits("1101"), 1, bits("1011"));
        assert_eq!(path.columns().unwrap(), 4);
        assert_eq!(path.residues(0), 3);
        assert_eq!(path.residues(1), 3);
    }

    #[test]
    fn columns_of_ragged_path_fails() {
        let path = AlignPath::from_pair(0, bits("110"), 1, bits("1011"));
        assert!(path.columns().is_err());
    }

    #[test]
    fn from_gapped_rows_marks_residues() {
        let gapped = vec![b"A-C".to_vec(), b"AGC".to_vec()];
        let path = AlignPath::from_gapped_rows(&gapped);
        assert_eq!(path.row(0).unwrap(), &bits("101")[..]);
        assert_eq!(path.row(1).unwrap(), &bits("111")[..]);
    }

    #[test]
    fn project_restores_gapped_row() {
        let path = AlignPath::from_pair(0, bits("101"), 1, bits("111"));
        assert_eq!(path.project(0, b"AC").unwrap(), b"A-C".to_vec());
        assert!(path.project(0, b"ACG").is_err());
        assert!(path.project(7, b"AC").is_err());
    }

    #[test]
    fn merge_two_paths_on_shared_row() {
        // Path 1: rows 0,1.  Path 2: rows 1,2.  Row 1 has two residues in both.
        let p1 = AlignPath::from_pair(0, bits("110"), 1, bits("011"));
        let p2 = AlignPath::from_pair(1, bits("11"), 2, bits("11"));
        let merged = AlignPath::merge(&[p1, p2]).unwrap();

        assert_eq!(merged.n_rows(), 3);
        let cols = merged.columns().unwrap();
        assert_eq!(cols, 3);
        assert_eq!(merged.residues(0), 2);
        assert_eq!(merged.residues(1), 2);
        assert_eq!(merged.residues(2), 2);
        // Row 2's residues co-occur with row 1's.
        assert_eq!(merged.row(1).unwrap(), merged.row(2).unwrap());
    }

    #[test]
    fn merge_interleaves_unshared_columns() {
        // Row 1 is shared; each path also has a private column.
        let p1 = AlignPath::from_pair(0, bits("11"), 1, bits("01"));
        let p2 = AlignPath::from_pair(1, bits("10"), 2, bits("11"));
        let merged = AlignPath::merge(&[p1, p2]).unwrap();
        assert_eq!(merged.columns().unwrap(), 3);
        assert_eq!(merged.residues(0), 2);
        assert_eq!(merged.residues(1), 1);
        assert_eq!(merged.residues(2), 2);
    }

    #[test]
    fn merge_rejects_disjoint_paths() {
        let p1 = AlignPath::from_pair(0, bits("1"), 1, bits("1"));
        let p2 = AlignPath::from_pair(2, bits("1"), 3, bits("1"));
        assert!(AlignPath::merge(&[p1, p2]).is_err());
    }

    #[test]
    fn merge_rejects_residue_count_mismatch() {
        let p1 = AlignPath::from_pair(0, bits("11"), 1, bits("11"));
        let p2 = AlignPath::from_pair(1, bits("1"), 2, bits("1"));
        assert!(AlignPath::merge(&[p1, p2]).is_err());
    }

    #[test]
    fn merge_preserves_residue_counts_three_way() {
        let p1 = AlignPath::from_pair(0, bits("1011"), 1, bits("1110"));
        let p2 = AlignPath::from_pair(1, bits("111"), 2, bits("011"));
        let p3 = AlignPath::from_pair(2, bits("11"), 3, bits("11"));
        let merged = AlignPath::merge(&[p1.clone(), p2.clone(), p3.clone()]).unwrap();
        for path in [&p1, &p2, &p3] {
            for (r, _) in path.rows() {
                assert_eq!(
                    merged.residues(r),
                    path.residues(r),
                    "row {} residue count changed in merge",
                    r
                );
            }
        }
        merged.columns().unwrap();
    }

    #[test]
    fn merge_single_path_is_identity() {
        let p = AlignPath::from_pair(0, bits("101"), 1, bits("110"));
        assert_eq!(AlignPath::merge(&[p.clone()]).unwrap(), p);
    }

    #[test]
    fn merge_empty_input_fails() {
        assert!(AlignPath::merge(&[]).is_err());
    }
}
