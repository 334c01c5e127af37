//! Banded envelopes around a guide alignment.
//!
//! A [`GuideAlignmentEnvelope`] restricts a pairwise DP to cells near the
//! projection of a guide alignment: cell (i, j) is admissible when the
//! guide maps anchor-row-1 position i to an anchor-row-2 position within
//! `max_distance` of j. The unconstrained variant admits every cell (the
//! full-diagonal envelope the graph builder uses for quick alignments).

use crate::path::AlignPath;
use physalia_core::{PhysaliaError, Result};

#[derive(Debug, Clone)]
struct Band {
    max_distance: usize,
    /// For each prefix count of row-1 residues, the number of row-2
    /// residues seen by that point in the guide.
    row2_pos_at: Vec<usize>,
}

/// Admissible-cell predicate for a banded pairwise DP.
#[derive(Debug, Clone)]
pub struct GuideAlignmentEnvelope {
    band: Option<Band>,
}

impl GuideAlignmentEnvelope {
    /// Build the band around `guide`, anchored on rows `row1` and `row2`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if either anchor row is absent from the guide;
    /// `MalformedAlignment` if the guide is not flush.
    pub fn new(
        guide: &AlignPath,
        row1: usize,
        row2: usize,
        max_distance: usize,
    ) -> Result<Self> {
        let cols = guide.columns()?;
        let bits1 = guide
            .row(row1)
            .ok_or_else(|| PhysaliaError::InvalidInput(format!("guide has no row {}", row1)))?;
        let bits2 = guide
            .row(row2)
            .ok_or_else(|| PhysaliaError::InvalidInput(format!("guide has no row {}", row2)))?;

        let mut row2_pos_at = Vec::with_capacity(cols + 1);
        row2_pos_at.push(0);
        let mut pos2 = 0usize;
        for c in 0..cols {
            if bits2[c] {
                pos2 += 1;
            }
            if bits1[c] {
                row2_pos_at.push(pos2);
            }
        }
        Ok(Self {
            band: Some(Band {
                max_distance,
                row2_pos_at,
            }),
        })
    }

    /// An envelope admitting every cell.
    pub fn unconstrained() -> Self {
        Self { band: None }
    }

    /// True if this envelope actually restricts the DP.
    pub fn is_banded(&self) -> bool {
        self.band.is_some()
    }

    /// Is the cell with `pos1` anchor-row-1 residues consumed and `pos2`
    /// anchor-row-2 residues consumed inside the band?
    pub fn in_range(&self, pos1: usize, pos2: usize) -> bool {
        match &self.band {
            None => true,
            Some(band) => {
                let idx = pos1.min(band.row2_pos_at.len() - 1);
                let projected = band.row2_pos_at[idx] as i64;
                (projected - pos2 as i64).unsigned_abs() as usize <= band.max_distance
            }
        }
    }
}

/// Sequence positions along `guide_row` at each ungapped position of `row`.
///
/// Walking the guide's columns, each residue of `row` is annotated with the
/// number of `guide_row` residues seen strictly before its column. These
/// per-residue anchor positions feed [`GuideAlignmentEnvelope::in_range`].
pub fn guide_seq_pos(path: &AlignPath, row: usize, guide_row: usize) -> Result<Vec<usize>> {
    let cols = path.columns()?;
    let row_bits = path
        .row(row)
        .ok_or_else(|| PhysaliaError::InvalidInput(format!("path has no row {}", row)))?;
    let guide_bits = path
        .row(guide_row)
        .ok_or_else(|| PhysaliaError::InvalidInput(format!("path has no row {}", guide_row)))?;

    let mut out = Vec::with_capacity(row_bits.iter().filter(|&&b| b).count());
    let mut pos = 0usize;
    for c in 0..cols {
        if row_bits[c] {
            out.push(pos);
        }
        if guide_bits[c] {
            pos += 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(s: &str) -> Vec<bool> {
        s.chars().map(|c| c == '1').collect()
    }

    #[test]
    fn unconstrained_admits_everything() {
        let env = GuideAlignmentEnvelope::unconstrained();
        assert!(!env.is_banded());
        assert!(env.in_range(0, 0));
        assert!(env.in_range(1000, 0));
        assert!(env.in_range(0, 1000));
    }

    #[test]
    fn diagonal_guide_yields_diagonal_band() {
        // Rows 0 and 1 perfectly aligned: projection is the identity.
        let guide = AlignPath::from_pair(0, bits("1111"), 1, bits("1111"));
        let env = GuideAlignmentEnvelope::new(&guide, 0, 1, 1).unwrap();
        for p in 0..=4usize {
            assert!(env.in_range(p, p), "diagonal cell ({},{}) out of band", p, p);
            assert!(env.in_range(p, p + 1));
            assert!(!env.in_range(p, p + 2), "cell ({},{}) should be out", p, p + 2);
        }
    }

    #[test]
    fn zero_width_band_is_exactly_the_guide() {
        let guide = AlignPath::from_pair(0, bits("111"), 1, bits("111"));
        let env = GuideAlignmentEnvelope::new(&guide, 0, 1, 0).unwrap();
        assert!(env.in_range(2, 2));
        assert!(!env.in_range(2, 1));
        assert!(!env.in_range(1, 2));
    }

    #[test]
    fn shifted_guide_shifts_the_band() {
        // Row 1 leads with two residues before row 0 starts.
        let guide = AlignPath::from_pair(0, bits("00111"), 1, bits("11111"));
        let env = GuideAlignmentEnvelope::new(&guide, 0, 1, 0).unwrap();
        // After consuming 1 residue of row 0, the guide has seen 3 of row 1.
        assert!(env.in_range(1, 3));
        assert!(!env.in_range(1, 1));
        assert!(env.in_range(0, 0));
    }

    #[test]
    fn missing_anchor_row_fails() {
        let guide = AlignPath::from_pair(0, bits("11"), 1, bits("11"));
        assert!(GuideAlignmentEnvelope::new(&guide, 0, 9, 2).is_err());
    }

    #[test]
    fn guide_seq_pos_counts_prior_guide_residues() {
        // row 2 residues sit at columns 0,2,3; guide row 5 at columns 1,2.
        let mut path = AlignPath::new();
        path.insert_row(2, bits("1011"));
        path.insert_row(5, bits("0110"));
        let pos = guide_seq_pos(&path, 2, 5).unwrap();
        assert_eq!(pos, vec![0, 1, 2]);
    }

    #[test]
    fn guide_seq_pos_self_is_identity_prefix() {
        let mut path = AlignPath::new();
        path.insert_row(0, bits("1111"));
        let pos = guide_seq_pos(&path, 0, 0).unwrap();
        assert_eq!(pos, vec![0, 1, 2, 3]);
    }
}
