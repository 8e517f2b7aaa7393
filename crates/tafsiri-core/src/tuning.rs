//! Suggestion-driven tuning estimation.
//!
//! Adaptation strength scales with suggestion quality: epoch count grows
//! linearly with the mean score, the learning rate with its square root,
//! so quality differences matter more near zero.

use serde::{Deserialize, Serialize};

/// An example (source, target) pair used to bias a single request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub source: String,
    pub target: String,
    /// Quality in [0, 1]; clamped on use, never trusted.
    pub score: f32,
}

/// Transient adaptation parameters for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningParams {
    pub epochs: u32,
    pub learning_rate: f64,
}

impl TuningParams {
    /// Nothing to do: skip the whole tune/reset sequence.
    pub fn is_noop(&self) -> bool {
        self.epochs == 0 && self.learning_rate == 0.0
    }
}

/// Per-engine tuner handle, created lazily on the first tuned request.
#[derive(Debug, Clone, Copy)]
pub struct Tuner {
    max_epochs: u32,
    max_learning_rate: f64,
}

impl Tuner {
    pub fn new(max_epochs: u32, max_learning_rate: f64) -> Self {
        Self {
            max_epochs,
            max_learning_rate,
        }
    }

    /// Map suggestion quality to (epochs, learning rate).
    ///
    /// The mean score is clamped to [0, 1]; at 0 both outputs are zero and
    /// tuning degenerates to a no-op, at 1 both reach the configured maxima.
    pub fn estimate(&self, suggestions: &[Suggestion]) -> TuningParams {
        if suggestions.is_empty() {
            return TuningParams {
                epochs: 0,
                learning_rate: 0.0,
            };
        }
        let sum: f64 = suggestions.iter().map(|s| f64::from(s.score)).sum();
        let avg = (sum / suggestions.len() as f64).clamp(0.0, 1.0);
        TuningParams {
            epochs: (f64::from(self.max_epochs) * avg).floor() as u32,
            learning_rate: self.max_learning_rate * avg.sqrt(),
        }
    }
}
