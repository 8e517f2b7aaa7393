//! Attention-based word alignment.
//!
//! Derives two directional sub-word alignments from a model's attention
//! output, maps them back to original-token indices, and combines them with
//! a symmetrization strategy from the GROW-DIAG-FINAL family.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Acceptance threshold relative to the per-anchor attention maximum.
const THRESHOLD: f32 = 0.8;

const ORTHOGONAL: [(i64, i64); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
const WITH_DIAGONAL: [(i64, i64); 8] = [
    (-1, 0),
    (1, 0),
    (0, -1),
    (0, 1),
    (-1, -1),
    (-1, 1),
    (1, -1),
    (1, 1),
];

/// One aligned (source token, target token) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlignmentPoint {
    pub source: usize,
    pub target: usize,
}

impl AlignmentPoint {
    pub fn new(source: usize, target: usize) -> Self {
        Self { source, target }
    }
}

/// How the target-anchored and source-anchored alignments are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Symmetrization {
    /// Target-anchored alignment only.
    Direct,
    /// Source-anchored alignment only.
    Inverse,
    Intersect,
    Union,
    Grow,
    GrowDiagonal,
    #[default]
    GrowDiagonalFinalAnd,
}

impl Symmetrization {
    /// Combine the target-anchored alignment `a` with the source-anchored
    /// alignment `b`.
    pub fn combine(
        self,
        a: &BTreeSet<AlignmentPoint>,
        b: &BTreeSet<AlignmentPoint>,
    ) -> BTreeSet<AlignmentPoint> {
        match self {
            Self::Direct => a.clone(),
            Self::Inverse => b.clone(),
            Self::Intersect => a.intersection(b).copied().collect(),
            Self::Union => a.union(b).copied().collect(),
            Self::Grow => grow(a, b, false, false),
            Self::GrowDiagonal => grow(a, b, true, false),
            Self::GrowDiagonalFinalAnd => grow(a, b, true, true),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Inverse => "inverse",
            Self::Intersect => "intersect",
            Self::Union => "union",
            Self::Grow => "grow",
            Self::GrowDiagonal => "grow-diagonal",
            Self::GrowDiagonalFinalAnd => "grow-diagonal-final-and",
        }
    }
}

impl fmt::Display for Symmetrization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Symmetrization {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "inverse" => Ok(Self::Inverse),
            "intersect" => Ok(Self::Intersect),
            "union" => Ok(Self::Union),
            "grow" => Ok(Self::Grow),
            "grow-diagonal" => Ok(Self::GrowDiagonal),
            "grow-diagonal-final-and" => Ok(Self::GrowDiagonalFinalAnd),
            other => Err(Error::InvalidInput(format!(
                "Unknown symmetrization strategy: '{}'",
                other
            ))),
        }
    }
}

/// Build a token-level alignment from raw attention weights.
///
/// `attention` carries (layer, batch, head, target, source) axes; it is
/// averaged over layers and heads, restricted to batch index 0 and to the
/// actual sub-word lengths given by the position arrays, which also map
/// each sub-word index back to its original-token index.
pub fn make_alignment(
    source_positions: &[usize],
    target_positions: &[usize],
    attention: &Tensor,
    symmetrize: Symmetrization,
) -> Result<Vec<AlignmentPoint>> {
    if source_positions.is_empty() || target_positions.is_empty() {
        return Ok(Vec::new());
    }

    let matrix = reduce_attention(attention, target_positions.len(), source_positions.len())?;
    let target_anchored = threshold_by_target(&matrix);
    let source_anchored = threshold_by_source(&matrix);

    let a = to_token_points(&target_anchored, source_positions, target_positions);
    let b = to_token_points(&source_anchored, source_positions, target_positions);

    Ok(symmetrize.combine(&a, &b).into_iter().collect())
}

/// Average over layer and head axes, select batch 0 and crop padding.
fn reduce_attention(
    attention: &Tensor,
    target_len: usize,
    source_len: usize,
) -> Result<Vec<Vec<f32>>> {
    if attention.rank() != 5 {
        return Err(Error::InvalidInput(format!(
            "Attention tensor must carry (layer, batch, head, target, source) axes, got rank {}",
            attention.rank()
        )));
    }

    let averaged = attention.mean(0)?.mean(1)?;
    let matrix = averaged.get(0)?;
    let (rows, cols) = matrix.dims2()?;
    if rows < target_len || cols < source_len {
        return Err(Error::InvalidInput(format!(
            "Attention matrix {}x{} is smaller than the sentence lengths {}x{}",
            rows, cols, target_len, source_len
        )));
    }

    let matrix = matrix
        .narrow(0, 0, target_len)?
        .narrow(1, 0, source_len)?
        .to_dtype(DType::F32)?
        .contiguous()?;
    Ok(matrix.to_vec2::<f32>()?)
}

/// For each target position keep every source whose weight clears the
/// threshold relative to that row's maximum.
fn threshold_by_target(matrix: &[Vec<f32>]) -> BTreeSet<(usize, usize)> {
    let mut points = BTreeSet::new();
    for (t, row) in matrix.iter().enumerate() {
        let best = row.iter().copied().fold(0.0f32, f32::max);
        if best <= 0.0 {
            continue;
        }
        for (s, &weight) in row.iter().enumerate() {
            if weight >= THRESHOLD * best {
                points.insert((s, t));
            }
        }
    }
    points
}

/// Column-wise counterpart of `threshold_by_target`.
fn threshold_by_source(matrix: &[Vec<f32>]) -> BTreeSet<(usize, usize)> {
    let mut points = BTreeSet::new();
    let cols = matrix.first().map(Vec::len).unwrap_or(0);
    for s in 0..cols {
        let best = matrix.iter().map(|row| row[s]).fold(0.0f32, f32::max);
        if best <= 0.0 {
            continue;
        }
        for (t, row) in matrix.iter().enumerate() {
            if row[s] >= THRESHOLD * best {
                points.insert((s, t));
            }
        }
    }
    points
}

/// Collapse sub-word pairs onto original-token indices, deduplicated and
/// ordered by (source, target).
fn to_token_points(
    subword_points: &BTreeSet<(usize, usize)>,
    source_positions: &[usize],
    target_positions: &[usize],
) -> BTreeSet<AlignmentPoint> {
    subword_points
        .iter()
        .filter_map(|&(s, t)| {
            let source = *source_positions.get(s)?;
            let target = *target_positions.get(t)?;
            Some(AlignmentPoint::new(source, target))
        })
        .collect()
}

/// The GROW family. Starts from the intersection and expands with points
/// from the union that touch the current alignment:
/// - first pass: orthogonal neighbors with at least one still-unaligned
///   endpoint, to fixpoint;
/// - `diagonal`: second fixpoint pass widening the neighborhood to the
///   diagonals, under the same endpoint rule;
/// - `final_and`: one last sweep adding union points whose endpoints are
///   both completely unaligned.
fn grow(
    a: &BTreeSet<AlignmentPoint>,
    b: &BTreeSet<AlignmentPoint>,
    diagonal: bool,
    final_and: bool,
) -> BTreeSet<AlignmentPoint> {
    let union: BTreeSet<AlignmentPoint> = a.union(b).copied().collect();
    let mut aligned: BTreeSet<AlignmentPoint> = a.intersection(b).copied().collect();
    let mut sources: BTreeSet<usize> = aligned.iter().map(|p| p.source).collect();
    let mut targets: BTreeSet<usize> = aligned.iter().map(|p| p.target).collect();

    expand(&mut aligned, &mut sources, &mut targets, &union, &ORTHOGONAL);
    if diagonal {
        expand(
            &mut aligned,
            &mut sources,
            &mut targets,
            &union,
            &WITH_DIAGONAL,
        );
    }
    if final_and {
        for point in &union {
            if !sources.contains(&point.source) && !targets.contains(&point.target) {
                aligned.insert(*point);
                sources.insert(point.source);
                targets.insert(point.target);
            }
        }
    }

    aligned
}

/// Repeatedly admit union points adjacent to already-aligned points until
/// nothing new can be added. A candidate needs at least one endpoint that
/// no existing point claims; the fully-claimed ones stay out.
fn expand(
    aligned: &mut BTreeSet<AlignmentPoint>,
    sources: &mut BTreeSet<usize>,
    targets: &mut BTreeSet<usize>,
    union: &BTreeSet<AlignmentPoint>,
    offsets: &[(i64, i64)],
) {
    let mut changed = true;
    while changed {
        changed = false;
        let snapshot: Vec<AlignmentPoint> = aligned.iter().copied().collect();
        for point in snapshot {
            for &(ds, dt) in offsets {
                let source = point.source as i64 + ds;
                let target = point.target as i64 + dt;
                if source < 0 || target < 0 {
                    continue;
                }
                let candidate = AlignmentPoint::new(source as usize, target as usize);
                if !union.contains(&candidate) || aligned.contains(&candidate) {
                    continue;
                }
                let source_free = !sources.contains(&candidate.source);
                let target_free = !targets.contains(&candidate.target);
                if source_free || target_free {
                    aligned.insert(candidate);
                    sources.insert(candidate.source);
                    targets.insert(candidate.target);
                    changed = true;
                }
            }
        }
    }
}
