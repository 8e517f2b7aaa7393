//! Checkpoint registry.
//!
//! Reconciles independently trained per-direction checkpoints into one
//! process: every distinct checkpoint path is loaded exactly once, all
//! vocabulary-dependent tensors are padded to a common addressing space,
//! and checkpoints mapped by several directions are flagged multilingual.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use candle_core::Device;
use tracing::info;

use crate::backend::CheckpointLoader;
use crate::checkpoint::{pad_vocab_rows, Checkpoint};
use crate::direction::Direction;
use crate::error::{Error, Result};

/// Records direction-to-checkpoint mappings ahead of the one-shot build.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: Vec<(Direction, PathBuf)>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one direction. Registration order is the a-priori priority
    /// order later used for initial tier assignment.
    pub fn register(
        &mut self,
        direction: Direction,
        checkpoint_path: impl Into<PathBuf>,
    ) -> Result<()> {
        if self.entries.iter().any(|(d, _)| *d == direction) {
            return Err(Error::DuplicateName(direction.to_string()));
        }
        self.entries.push((direction, checkpoint_path.into()));
        Ok(())
    }

    /// Load every distinct checkpoint once and build the immutable registry.
    pub fn build(
        self,
        device: &Device,
        loader: &dyn CheckpointLoader,
    ) -> Result<CheckpointRegistry> {
        let mut direction_counts: HashMap<PathBuf, usize> = HashMap::new();
        for (_, path) in &self.entries {
            *direction_counts.entry(path.clone()).or_default() += 1;
        }

        let mut loaded = HashMap::new();
        for (_, path) in &self.entries {
            if loaded.contains_key(path) {
                continue;
            }
            info!("Loading checkpoint from {}", path.display());
            loaded.insert(path.clone(), loader.load_checkpoint(path, device)?);
        }

        let max_vocab_size = loaded.values().map(|d| d.vocab_size).max().unwrap_or(0);
        info!(
            "Registry: {} directions over {} checkpoints, shared vocabulary size {}",
            self.entries.len(),
            loaded.len(),
            max_vocab_size
        );

        let mut checkpoints: HashMap<PathBuf, Arc<Checkpoint>> = HashMap::new();
        for (path, data) in loaded {
            let multilingual = direction_counts.get(&path).copied().unwrap_or(0) > 1;
            let embeddings = pad_vocab_rows(data.target_embeddings, max_vocab_size)?;
            checkpoints.insert(
                path.clone(),
                Arc::new(Checkpoint::new(
                    path,
                    max_vocab_size,
                    embeddings,
                    data.decode_lengths,
                    multilingual,
                )),
            );
        }

        let mut by_direction = HashMap::new();
        let mut directions = Vec::with_capacity(self.entries.len());
        for (direction, path) in self.entries {
            let checkpoint = checkpoints
                .get(&path)
                .cloned()
                .ok_or_else(|| Error::ModelLoad(format!("{}: not loaded", path.display())))?;
            by_direction.insert(direction.clone(), checkpoint);
            directions.push(direction);
        }

        Ok(CheckpointRegistry {
            directions,
            by_direction,
        })
    }
}

/// Immutable direction-to-checkpoint lookup, built once at startup.
#[derive(Debug)]
pub struct CheckpointRegistry {
    directions: Vec<Direction>,
    by_direction: HashMap<Direction, Arc<Checkpoint>>,
}

impl CheckpointRegistry {
    /// Registered directions in declaration order.
    pub fn directions(&self) -> &[Direction] {
        &self.directions
    }

    pub fn len(&self) -> usize {
        self.directions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directions.is_empty()
    }

    /// Resolve a request direction to its registered form: exact variant
    /// match first, then the variantless direction.
    pub fn resolve(&self, direction: &Direction) -> Result<Direction> {
        if self.by_direction.contains_key(direction) {
            return Ok(direction.clone());
        }
        if direction.variant().is_some() {
            let bare = direction.without_variant();
            if self.by_direction.contains_key(&bare) {
                return Ok(bare);
            }
        }
        Err(Error::UnsupportedLanguage(direction.to_string()))
    }

    pub fn load(&self, direction: &Direction) -> Result<Arc<Checkpoint>> {
        let resolved = self.resolve(direction)?;
        self.by_direction
            .get(&resolved)
            .cloned()
            .ok_or_else(|| Error::UnsupportedLanguage(resolved.to_string()))
    }
}
