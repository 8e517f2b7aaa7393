//! Immutable checkpoint metadata shared across engines.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::direction::Direction;
use crate::error::Result;

/// Observed decode-length statistics for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecodeLengthStats {
    pub mean: f32,
    pub std_dev: f32,
}

impl DecodeLengthStats {
    /// Hard decode cap: three standard deviations above the mean.
    pub fn suggested_limit(&self) -> usize {
        (self.mean + 3.0 * self.std_dev).ceil().max(1.0) as usize
    }
}

/// One loaded model checkpoint.
///
/// Created once during registry build and never mutated afterwards; engines
/// serving different directions of a multilingual model share a checkpoint
/// by reference.
#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    vocab_size: usize,
    target_embeddings: Tensor,
    decode_lengths: HashMap<Direction, DecodeLengthStats>,
    multilingual_target: bool,
}

impl Checkpoint {
    pub(crate) fn new(
        path: PathBuf,
        vocab_size: usize,
        target_embeddings: Tensor,
        decode_lengths: HashMap<Direction, DecodeLengthStats>,
        multilingual_target: bool,
    ) -> Self {
        Self {
            path,
            vocab_size,
            target_embeddings,
            decode_lengths,
            multilingual_target,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Vocabulary size after reconciliation to the registry-wide maximum.
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Vocabulary-dependent rows, padded to the shared addressing space.
    pub fn target_embeddings(&self) -> &Tensor {
        &self.target_embeddings
    }

    /// Whether this checkpoint serves more than one direction.
    pub fn multilingual_target(&self) -> bool {
        self.multilingual_target
    }

    /// Length statistics for a direction, falling back to the variantless
    /// key when no exact match is recorded.
    pub fn decode_length(&self, direction: &Direction) -> Option<DecodeLengthStats> {
        if let Some(stats) = self.decode_lengths.get(direction) {
            return Some(*stats);
        }
        if direction.variant().is_some() {
            return self.decode_lengths.get(&direction.without_variant()).copied();
        }
        None
    }
}

/// Zero-pad vocabulary rows up to `vocab_size`, leaving larger tensors as is.
pub(crate) fn pad_vocab_rows(embeddings: Tensor, vocab_size: usize) -> Result<Tensor> {
    let (rows, dim) = embeddings.dims2()?;
    if rows >= vocab_size {
        return Ok(embeddings);
    }
    let padding = Tensor::zeros(
        (vocab_size - rows, dim),
        embeddings.dtype(),
        embeddings.device(),
    )?;
    Ok(Tensor::cat(&[&embeddings, &padding], 0)?)
}
