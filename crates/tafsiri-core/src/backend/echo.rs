//! Deterministic development backend.
//!
//! A pass-through decoder that copies source tokens (or the forced output)
//! and synthesizes diagonal attention. It runs the serving stack end to end
//! without neural dependencies and stands in for a real backend in tests
//! and smoke deployments.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use serde::Deserialize;
use tracing::debug;

use crate::backend::{
    AttentionOutput, BackendFactory, CheckpointData, CheckpointLoader, DecodeOptions, ModelBackend,
    RawHypothesis,
};
use crate::checkpoint::{Checkpoint, DecodeLengthStats};
use crate::direction::Direction;
use crate::error::{Error, Result};
use crate::tuning::Suggestion;

const EMBEDDING_DIM: usize = 8;

/// Per-checkpoint metadata file read by the echo loader.
#[derive(Debug, Deserialize)]
struct CheckpointFile {
    vocab_size: usize,
    #[serde(default)]
    decode_lengths: HashMap<String, DecodeLengthStats>,
}

/// Loader and factory halves of the echo backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoModel;

impl EchoModel {
    pub fn new() -> Self {
        Self
    }
}

impl CheckpointLoader for EchoModel {
    fn load_checkpoint(&self, path: &Path, device: &Device) -> Result<CheckpointData> {
        let file = path.join("checkpoint.json");
        let raw = fs::read_to_string(&file)
            .map_err(|e| Error::ModelLoad(format!("{}: {}", file.display(), e)))?;
        let parsed: CheckpointFile = serde_json::from_str(&raw)
            .map_err(|e| Error::ModelLoad(format!("{}: {}", file.display(), e)))?;
        if parsed.vocab_size == 0 {
            return Err(Error::ModelLoad(format!(
                "{}: empty vocabulary",
                file.display()
            )));
        }

        let mut decode_lengths = HashMap::new();
        for (key, stats) in parsed.decode_lengths {
            let direction: Direction = key
                .parse()
                .map_err(|e| Error::ModelLoad(format!("{}: {}", file.display(), e)))?;
            decode_lengths.insert(direction, stats);
        }

        let target_embeddings =
            Tensor::zeros((parsed.vocab_size, EMBEDDING_DIM), DType::F32, device)?;
        Ok(CheckpointData {
            vocab_size: parsed.vocab_size,
            target_embeddings,
            decode_lengths,
        })
    }
}

impl BackendFactory for EchoModel {
    fn open(&self, checkpoint: &Checkpoint, direction: &Direction) -> Result<Box<dyn ModelBackend>> {
        debug!(
            "Opening echo session for {} on {}",
            direction,
            checkpoint.path().display()
        );
        Ok(Box::new(EchoBackend {
            device: checkpoint.target_embeddings().device().clone(),
            tuned_steps: 0,
        }))
    }
}

/// An open echo session.
pub struct EchoBackend {
    device: Device,
    tuned_steps: u64,
}

impl EchoBackend {
    fn decode_segment(&self, segment: &str, options: &DecodeOptions) -> Result<Vec<RawHypothesis>> {
        let source_tokens: Vec<String> = segment.split_whitespace().map(str::to_string).collect();
        let output_tokens: Vec<String> = match &options.forced_translation {
            Some(forced) => forced.split_whitespace().map(str::to_string).collect(),
            None => source_tokens.clone(),
        };
        let output_tokens: Vec<String> = output_tokens
            .into_iter()
            .take(options.max_sent_length)
            .collect();

        (0..options.n_best.max(1))
            .map(|rank| -> Result<RawHypothesis> {
                Ok(RawHypothesis {
                    tokens: output_tokens.clone(),
                    score: 1.0 / (1.0 + rank as f32),
                    attention: self.diagonal_attention(source_tokens.len(), output_tokens.len())?,
                })
            })
            .collect()
    }

    fn diagonal_attention(
        &self,
        source_len: usize,
        target_len: usize,
    ) -> Result<Option<AttentionOutput>> {
        if source_len == 0 || target_len == 0 {
            return Ok(None);
        }
        let mut weights = vec![0.0f32; target_len * source_len];
        for t in 0..target_len {
            let s = t.min(source_len - 1);
            weights[t * source_len + s] = 1.0;
        }
        let weights = Tensor::from_vec(weights, (1, 1, 1, target_len, source_len), &self.device)?;
        Ok(Some(AttentionOutput {
            weights,
            source_positions: (0..source_len).collect(),
            target_positions: (0..target_len).collect(),
        }))
    }
}

impl ModelBackend for EchoBackend {
    fn translate(
        &mut self,
        batch: &[String],
        options: &DecodeOptions,
    ) -> Result<Vec<Vec<RawHypothesis>>> {
        batch
            .iter()
            .map(|segment| self.decode_segment(segment, options))
            .collect()
    }

    fn tune(&mut self, pairs: &[Suggestion], epochs: u32, learning_rate: f64) -> Result<()> {
        self.tuned_steps += u64::from(epochs) * pairs.len() as u64;
        debug!(
            "Echo tune: {} pairs, {} epochs, lr {:.6} ({} steps applied)",
            pairs.len(),
            epochs,
            learning_rate,
            self.tuned_steps
        );
        Ok(())
    }

    fn reset_model(&mut self) -> Result<()> {
        self.tuned_steps = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn checkpoint_dir(content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("tafsiri-echo-test-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("checkpoint.json"), content).unwrap();
        dir
    }

    fn options(n_best: usize) -> DecodeOptions {
        DecodeOptions {
            beam_size: 4,
            max_sent_length: 64,
            n_best,
            forced_translation: None,
        }
    }

    #[test]
    fn loader_reads_checkpoint_metadata() {
        let dir = checkpoint_dir(
            r#"{"vocab_size": 32000, "decode_lengths": {"en__it": {"mean": 21.0, "std_dev": 3.0}}}"#,
        );
        let data = EchoModel::new()
            .load_checkpoint(&dir, &Device::Cpu)
            .unwrap();
        assert_eq!(data.vocab_size, 32000);
        assert_eq!(data.target_embeddings.dims2().unwrap(), (32000, EMBEDDING_DIM));
        assert!(data.decode_lengths.contains_key(&"en__it".parse().unwrap()));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_metadata_is_a_model_load_error() {
        let dir = std::env::temp_dir().join(format!("tafsiri-echo-test-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let err = EchoModel::new()
            .load_checkpoint(&dir, &Device::Cpu)
            .unwrap_err();
        assert!(matches!(err, Error::ModelLoad(_)));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn malformed_metadata_is_a_model_load_error() {
        let dir = checkpoint_dir("not json");
        let err = EchoModel::new()
            .load_checkpoint(&dir, &Device::Cpu)
            .unwrap_err();
        assert!(matches!(err, Error::ModelLoad(_)));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn echoes_source_tokens_with_ranked_scores() {
        let mut backend = EchoBackend {
            device: Device::Cpu,
            tuned_steps: 0,
        };
        let results = backend
            .translate(&["habari ya dunia".to_string()], &options(3))
            .unwrap();
        assert_eq!(results.len(), 1);
        let hypotheses = &results[0];
        assert_eq!(hypotheses.len(), 3);
        assert_eq!(hypotheses[0].tokens, ["habari", "ya", "dunia"]);
        assert!(hypotheses[0].score > hypotheses[1].score);
        assert!(hypotheses[1].score > hypotheses[2].score);

        let attention = hypotheses[0].attention.as_ref().unwrap();
        assert_eq!(attention.weights.dims(), [1, 1, 1, 3, 3]);
        assert_eq!(attention.source_positions, vec![0, 1, 2]);
    }

    #[test]
    fn forced_translation_wins_over_the_echo() {
        let mut backend = EchoBackend {
            device: Device::Cpu,
            tuned_steps: 0,
        };
        let mut opts = options(1);
        opts.forced_translation = Some("hello world".to_string());
        let results = backend.translate(&["habari dunia".to_string()], &opts).unwrap();
        assert_eq!(results[0][0].tokens, ["hello", "world"]);
    }

    #[test]
    fn reset_clears_tuning_state() {
        let mut backend = EchoBackend {
            device: Device::Cpu,
            tuned_steps: 0,
        };
        let pairs = vec![Suggestion {
            source: "a".to_string(),
            target: "b".to_string(),
            score: 1.0,
        }];
        backend.tune(&pairs, 5, 0.1).unwrap();
        assert_eq!(backend.tuned_steps, 5);
        backend.reset_model().unwrap();
        assert_eq!(backend.tuned_steps, 0);
    }
}
