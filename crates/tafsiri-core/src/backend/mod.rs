//! The model-backend seam.
//!
//! Everything neural lives behind these traits: checkpoint weight loading,
//! beam-search decoding, gradient tuning and baseline restore. The serving
//! core never looks inside a model; it only moves data across this boundary.

pub mod echo;

use std::collections::HashMap;
use std::path::Path;

use candle_core::{Device, Tensor};

use crate::checkpoint::{Checkpoint, DecodeLengthStats};
use crate::direction::Direction;
use crate::error::Result;
use crate::tuning::Suggestion;

/// Raw material a loader hands the registry for one checkpoint file.
#[derive(Debug)]
pub struct CheckpointData {
    pub vocab_size: usize,
    /// Vocabulary-dependent rows, shape (vocab, dim).
    pub target_embeddings: Tensor,
    pub decode_lengths: HashMap<Direction, DecodeLengthStats>,
}

/// Loads checkpoint artifacts from storage, once per distinct path.
pub trait CheckpointLoader {
    fn load_checkpoint(&self, path: &Path, device: &Device) -> Result<CheckpointData>;
}

/// Materializes serving sessions for engines.
pub trait BackendFactory {
    fn open(&self, checkpoint: &Checkpoint, direction: &Direction) -> Result<Box<dyn ModelBackend>>;
}

/// Per-call decode parameters.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub beam_size: usize,
    pub max_sent_length: usize,
    pub n_best: usize,
    pub forced_translation: Option<String>,
}

/// Attention weights for one hypothesis, with the sub-word to original-token
/// index maps for both sides. Only the backend knows its own segmentation,
/// so the maps travel with the tensor.
pub struct AttentionOutput {
    /// Axes: (layer, batch, head, target position, source position).
    pub weights: Tensor,
    pub source_positions: Vec<usize>,
    pub target_positions: Vec<usize>,
}

/// One ranked candidate for one source segment.
pub struct RawHypothesis {
    pub tokens: Vec<String>,
    pub score: f32,
    pub attention: Option<AttentionOutput>,
}

/// An open serving session over one engine's live weights.
///
/// `tune` may bias the live weights in place; callers pair every tuned call
/// with `reset_model` so the pretrained baseline is always restored.
pub trait ModelBackend {
    fn translate(
        &mut self,
        batch: &[String],
        options: &DecodeOptions,
    ) -> Result<Vec<Vec<RawHypothesis>>>;

    fn tune(&mut self, pairs: &[Suggestion], epochs: u32, learning_rate: f64) -> Result<()>;

    fn reset_model(&mut self) -> Result<()>;
}
