//! Serving-time wrapper around one loaded checkpoint for one direction.

use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{BackendFactory, DecodeOptions, ModelBackend, RawHypothesis};
use crate::checkpoint::Checkpoint;
use crate::direction::Direction;
use crate::error::{Error, Result};
use crate::tuning::{Suggestion, Tuner};

/// Coarse residency level. HOT and WARM engines hold an open serving
/// session; COLD engines keep only metadata resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Hot,
    Warm,
    Cold,
}

pub struct Engine {
    direction: Direction,
    checkpoint: Arc<Checkpoint>,
    readiness: Readiness,
    backend: Option<Box<dyn ModelBackend>>,
    tuner: Option<Tuner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("direction", &self.direction)
            .field("checkpoint", &self.checkpoint)
            .field("readiness", &self.readiness)
            .field("backend", &self.backend.as_ref().map(|_| "<session>"))
            .field("tuner", &self.tuner)
            .finish()
    }
}

impl Engine {
    pub(crate) fn new(
        direction: Direction,
        checkpoint: Arc<Checkpoint>,
        readiness: Readiness,
    ) -> Self {
        Self {
            direction,
            checkpoint,
            readiness,
            backend: None,
            tuner: None,
        }
    }

    pub fn direction(&self) -> &Direction {
        &self.direction
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub(crate) fn set_readiness(&mut self, readiness: Readiness) {
        self.readiness = readiness;
    }

    /// Whether a serving session is materialized.
    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    /// Materialize the serving session; a no-op when already open.
    /// This is the one suspension point after startup and is paid once
    /// per promotion out of COLD.
    pub fn ensure_open(&mut self, factory: &dyn BackendFactory) -> Result<()> {
        if self.backend.is_none() {
            info!("Materializing weights for {}", self.direction);
            self.backend = Some(factory.open(&self.checkpoint, &self.direction)?);
        }
        Ok(())
    }

    /// Drop the serving session. Called on demotion to COLD, and as a
    /// last resort when a baseline restore fails (a fresh materialization
    /// starts from the pristine checkpoint).
    pub(crate) fn release(&mut self) {
        if self.backend.take().is_some() {
            debug!("Released serving session for {}", self.direction);
        }
    }

    /// The lazily-created tuner handle for this engine.
    pub fn tuner(&mut self, max_epochs: u32, max_learning_rate: f64) -> &Tuner {
        self.tuner
            .get_or_insert_with(|| Tuner::new(max_epochs, max_learning_rate))
    }

    pub fn tune(&mut self, suggestions: &[Suggestion], epochs: u32, learning_rate: f64) -> Result<()> {
        self.session()?.tune(suggestions, epochs, learning_rate)
    }

    pub fn translate(
        &mut self,
        batch: &[String],
        options: &DecodeOptions,
    ) -> Result<Vec<Vec<RawHypothesis>>> {
        self.session()?.translate(batch, options)
    }

    /// Restore the pristine checkpoint weights after tuning.
    pub fn reset_model(&mut self) -> Result<()> {
        self.session()?.reset_model()
    }

    fn session(&mut self) -> Result<&mut (dyn ModelBackend + 'static)> {
        let direction = &self.direction;
        self.backend
            .as_deref_mut()
            .ok_or_else(move || Error::Backend(format!("No open serving session for {}", direction)))
    }
}
