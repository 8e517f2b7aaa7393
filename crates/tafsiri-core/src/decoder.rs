//! Request orchestration.
//!
//! Resolves a direction to an engine (promoting it to HOT), optionally
//! biases the engine toward per-request example pairs, delegates decoding
//! to the model backend, restores the pristine weights whenever they were
//! touched, and derives word alignments from the attention output.

use std::cmp::Ordering;

use tracing::{debug, warn};

use crate::align::{make_alignment, AlignmentPoint, Symmetrization};
use crate::backend::{BackendFactory, DecodeOptions, RawHypothesis};
use crate::config::EngineConfig;
use crate::direction::Direction;
use crate::error::{Error, Result};
use crate::pool::EnginePool;
use crate::tuning::{Suggestion, TuningParams};

/// One translation request for a batch of source segments.
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub source: String,
    pub target: String,
    pub variant: Option<String>,
    pub batch: Vec<String>,
    pub suggestions: Vec<Suggestion>,
    pub forced_translation: Option<String>,
    /// Ranked hypotheses to return per segment.
    pub n_best: usize,
    /// Caller-supplied tuning parameters, bypassing the estimator.
    pub tuning: Option<TuningParams>,
    pub symmetrization: Option<Symmetrization>,
}

impl TranslationRequest {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        batch: Vec<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            variant: None,
            batch,
            suggestions: Vec::new(),
            forced_translation: None,
            n_best: 1,
            tuning: None,
            symmetrization: None,
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<Suggestion>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_n_best(mut self, n_best: usize) -> Self {
        self.n_best = n_best;
        self
    }

    pub fn direction(&self) -> Direction {
        let direction = Direction::new(self.source.clone(), self.target.clone());
        match &self.variant {
            Some(variant) => direction.with_variant(variant.clone()),
            None => direction,
        }
    }
}

/// One ranked candidate translation.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    pub text: String,
    pub score: f32,
    pub alignment: Option<Vec<AlignmentPoint>>,
}

/// All hypotheses for one source segment, best first.
#[derive(Debug, Clone)]
pub struct Translation {
    pub hypotheses: Vec<Hypothesis>,
}

pub struct Decoder {
    pool: EnginePool,
    factory: Box<dyn BackendFactory>,
    config: EngineConfig,
}

impl Decoder {
    pub fn new(pool: EnginePool, factory: Box<dyn BackendFactory>, config: EngineConfig) -> Self {
        Self {
            pool,
            factory,
            config,
        }
    }

    pub fn pool(&self) -> &EnginePool {
        &self.pool
    }

    /// Translate one batch, returning per-segment hypotheses ranked by
    /// score descending.
    ///
    /// Tuning effects never outlive this call: whenever the engine's live
    /// weights were touched, the pristine checkpoint weights are restored
    /// before returning, success or not.
    pub fn translate(&mut self, request: &TranslationRequest) -> Result<Vec<Translation>> {
        self.validate(request)?;
        let direction = request.direction();

        let engine = self.pool.get(&direction)?;
        engine.ensure_open(self.factory.as_ref())?;

        let mut reset_pending = false;
        if !request.suggestions.is_empty() {
            let suggestions = clamped(&request.suggestions);
            let params = match request.tuning {
                Some(params) => params,
                None => engine
                    .tuner(
                        self.config.max_tuning_epochs,
                        self.config.max_tuning_learning_rate,
                    )
                    .estimate(&suggestions),
            };
            if params.is_noop() {
                debug!("Suggestions too weak to tune {}", direction);
            } else {
                // the backend may apply some steps before failing, so the
                // restore below runs regardless of the outcome here
                reset_pending = true;
                debug!(
                    "Tuning {} with {} pairs ({} epochs, lr {:.6})",
                    direction,
                    suggestions.len(),
                    params.epochs,
                    params.learning_rate
                );
                if let Err(err) = engine.tune(&suggestions, params.epochs, params.learning_rate) {
                    warn!("Tuning {} failed, serving untuned: {}", direction, err);
                }
            }
        }

        let options = DecodeOptions {
            beam_size: self.config.beam_size,
            max_sent_length: engine
                .checkpoint()
                .decode_length(&direction)
                .map(|stats| stats.suggested_limit())
                .unwrap_or(self.config.max_sent_length),
            n_best: request.n_best.max(1),
            forced_translation: request.forced_translation.clone(),
        };
        let decoded = engine.translate(&request.batch, &options);

        if reset_pending {
            if let Err(err) = engine.reset_model() {
                // weights may still be biased; drop the session so the next
                // materialization starts from the pristine checkpoint
                warn!("Baseline restore for {} failed: {}", direction, err);
                engine.release();
            }
        }

        let decoded = decoded?;
        let symmetrize = request.symmetrization.unwrap_or(self.config.symmetrization);
        decoded
            .into_iter()
            .map(|raw_hypotheses| self.finish_segment(raw_hypotheses, symmetrize))
            .collect()
    }

    fn finish_segment(
        &self,
        raw_hypotheses: Vec<RawHypothesis>,
        symmetrize: Symmetrization,
    ) -> Result<Translation> {
        let mut hypotheses = raw_hypotheses
            .into_iter()
            .map(|raw| self.finish_hypothesis(raw, symmetrize))
            .collect::<Result<Vec<_>>>()?;
        hypotheses.sort_by(|x, y| y.score.partial_cmp(&x.score).unwrap_or(Ordering::Equal));
        Ok(Translation { hypotheses })
    }

    fn finish_hypothesis(
        &self,
        raw: RawHypothesis,
        symmetrize: Symmetrization,
    ) -> Result<Hypothesis> {
        let alignment = match &raw.attention {
            Some(attention) => Some(make_alignment(
                &attention.source_positions,
                &attention.target_positions,
                &attention.weights,
                symmetrize,
            )?),
            None => None,
        };
        Ok(Hypothesis {
            text: raw.tokens.join(" "),
            score: raw.score,
            alignment,
        })
    }

    fn validate(&self, request: &TranslationRequest) -> Result<()> {
        if request.source.is_empty() || request.target.is_empty() {
            return Err(Error::InvalidInput(
                "Source and target languages are required".to_string(),
            ));
        }
        if request.batch.is_empty() {
            return Err(Error::InvalidInput("Empty translation batch".to_string()));
        }
        if request.n_best > self.config.max_n_best {
            return Err(Error::InvalidInput(format!(
                "n_best {} exceeds the configured limit {}",
                request.n_best, self.config.max_n_best
            )));
        }
        Ok(())
    }
}

fn clamped(suggestions: &[Suggestion]) -> Vec<Suggestion> {
    suggestions
        .iter()
        .map(|s| Suggestion {
            source: s.source.clone(),
            target: s.target.clone(),
            score: s.score.clamp(0.0, 1.0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use candle_core::{DType, Device, Tensor};

    use crate::backend::{
        AttentionOutput, BackendFactory, CheckpointData, CheckpointLoader, ModelBackend,
    };
    use crate::checkpoint::Checkpoint;
    use crate::registry::RegistryBuilder;

    use super::*;

    /// Shared call log so tests can observe what reached the backend.
    #[derive(Default)]
    struct CallLog {
        calls: Mutex<Vec<String>>,
    }

    impl CallLog {
        fn push(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct RecordingFactory {
        log: Arc<CallLog>,
        fail_tune: bool,
    }

    struct RecordingBackend {
        log: Arc<CallLog>,
        fail_tune: bool,
        device: Device,
    }

    impl CheckpointLoader for RecordingFactory {
        fn load_checkpoint(&self, _path: &Path, device: &Device) -> Result<CheckpointData> {
            Ok(CheckpointData {
                vocab_size: 8,
                target_embeddings: Tensor::zeros((8, 2), DType::F32, device)?,
                decode_lengths: HashMap::new(),
            })
        }
    }

    impl BackendFactory for RecordingFactory {
        fn open(
            &self,
            _checkpoint: &Checkpoint,
            direction: &Direction,
        ) -> Result<Box<dyn ModelBackend>> {
            self.log.push(format!("open {}", direction));
            Ok(Box::new(RecordingBackend {
                log: self.log.clone(),
                fail_tune: self.fail_tune,
                device: Device::Cpu,
            }))
        }
    }

    impl ModelBackend for RecordingBackend {
        fn translate(
            &mut self,
            batch: &[String],
            options: &DecodeOptions,
        ) -> Result<Vec<Vec<RawHypothesis>>> {
            self.log.push(format!("translate {}", batch.len()));
            batch
                .iter()
                .map(|_| {
                    (0..options.n_best)
                        .map(|rank| -> Result<RawHypothesis> {
                            // emitted worst-first so ranking is observable
                            Ok(RawHypothesis {
                                tokens: vec![format!("hyp{rank}")],
                                score: rank as f32,
                                attention: Some(AttentionOutput {
                                    weights: Tensor::from_vec(
                                        vec![1.0f32],
                                        (1, 1, 1, 1, 1),
                                        &self.device,
                                    )?,
                                    source_positions: vec![0],
                                    target_positions: vec![0],
                                }),
                            })
                        })
                        .collect()
                })
                .collect()
        }

        fn tune(&mut self, pairs: &[Suggestion], epochs: u32, learning_rate: f64) -> Result<()> {
            self.log
                .push(format!("tune {} {} {:.3}", pairs.len(), epochs, learning_rate));
            if self.fail_tune {
                return Err(Error::Backend("optimizer overflow".to_string()));
            }
            Ok(())
        }

        fn reset_model(&mut self) -> Result<()> {
            self.log.push("reset".to_string());
            Ok(())
        }
    }

    fn decoder(log: Arc<CallLog>, fail_tune: bool) -> Decoder {
        let mut builder = RegistryBuilder::new();
        builder
            .register("en__it".parse().unwrap(), "ckpt-en-it")
            .unwrap();
        builder
            .register("it__en".parse().unwrap(), "ckpt-it-en")
            .unwrap();
        let loader = RecordingFactory {
            log: log.clone(),
            fail_tune,
        };
        let registry = builder.build(&Device::Cpu, &loader).unwrap();
        let config = EngineConfig {
            hot_capacity: 1,
            warm_capacity: 1,
            ..EngineConfig::default()
        };
        let pool = EnginePool::build(&registry, &config, &loader).unwrap();
        Decoder::new(pool, Box::new(RecordingFactory { log, fail_tune }), config)
    }

    fn suggestions(score: f32) -> Vec<Suggestion> {
        vec![Suggestion {
            source: "hello".to_string(),
            target: "ciao".to_string(),
            score,
        }]
    }

    #[test]
    fn empty_suggestions_never_touch_the_weights() {
        let log = Arc::new(CallLog::default());
        let mut decoder = decoder(log.clone(), false);
        let request = TranslationRequest::new("en", "it", vec!["hello world".to_string()]);
        decoder.translate(&request).unwrap();

        let calls = log.calls();
        assert!(
            calls.iter().all(|c| !c.starts_with("tune") && c != "reset"),
            "no tune or reset expected, got {:?}",
            calls
        );
    }

    #[test]
    fn worthless_suggestions_skip_the_tune_reset_pair() {
        let log = Arc::new(CallLog::default());
        let mut decoder = decoder(log.clone(), false);
        let request = TranslationRequest::new("en", "it", vec!["hello".to_string()])
            .with_suggestions(suggestions(0.0));
        decoder.translate(&request).unwrap();

        let calls = log.calls();
        assert!(
            calls.iter().all(|c| !c.starts_with("tune") && c != "reset"),
            "zero-strength tuning must be skipped entirely, got {:?}",
            calls
        );
    }

    #[test]
    fn tuned_requests_always_restore_the_baseline() {
        let log = Arc::new(CallLog::default());
        let mut decoder = decoder(log.clone(), false);
        let request = TranslationRequest::new("en", "it", vec!["hello".to_string()])
            .with_suggestions(suggestions(1.0));
        decoder.translate(&request).unwrap();

        let calls = log.calls();
        let tune_at = calls.iter().position(|c| c.starts_with("tune")).unwrap();
        let translate_at = calls.iter().position(|c| c.starts_with("translate")).unwrap();
        let reset_at = calls.iter().position(|c| c == "reset").unwrap();
        assert!(tune_at < translate_at && translate_at < reset_at);
    }

    #[test]
    fn failed_tuning_is_swallowed_and_still_resets() {
        let log = Arc::new(CallLog::default());
        let mut decoder = decoder(log.clone(), true);
        let request = TranslationRequest::new("en", "it", vec!["hello".to_string()])
            .with_suggestions(suggestions(1.0));
        let translations = decoder.translate(&request).unwrap();
        assert_eq!(translations.len(), 1);

        let calls = log.calls();
        assert!(calls.iter().any(|c| c == "reset"), "reset must still run");
    }

    #[test]
    fn hypotheses_are_ranked_best_first() {
        let log = Arc::new(CallLog::default());
        let mut decoder = decoder(log, false);
        let request =
            TranslationRequest::new("en", "it", vec!["hello".to_string()]).with_n_best(3);
        let translations = decoder.translate(&request).unwrap();

        let scores: Vec<f32> = translations[0]
            .hypotheses
            .iter()
            .map(|h| h.score)
            .collect();
        assert_eq!(scores, vec![2.0, 1.0, 0.0]);
        assert_eq!(translations[0].hypotheses[0].text, "hyp2");
    }

    #[test]
    fn alignment_rides_along_with_each_hypothesis() {
        let log = Arc::new(CallLog::default());
        let mut decoder = decoder(log, false);
        let request = TranslationRequest::new("en", "it", vec!["hello".to_string()]);
        let translations = decoder.translate(&request).unwrap();
        let alignment = translations[0].hypotheses[0].alignment.as_ref().unwrap();
        assert_eq!(alignment, &vec![AlignmentPoint::new(0, 0)]);
    }

    #[test]
    fn unknown_direction_is_rejected_per_request() {
        let log = Arc::new(CallLog::default());
        let mut decoder = decoder(log, false);
        let request = TranslationRequest::new("fr", "de", vec!["bonjour".to_string()]);
        let err = decoder.translate(&request).unwrap_err();
        assert!(matches!(err, Error::UnsupportedLanguage(_)));

        // the loop keeps serving afterwards
        let ok = TranslationRequest::new("en", "it", vec!["hello".to_string()]);
        assert!(decoder.translate(&ok).is_ok());
    }

    #[test]
    fn invalid_requests_are_rejected_before_resolution() {
        let log = Arc::new(CallLog::default());
        let mut decoder = decoder(log, false);

        let empty = TranslationRequest::new("en", "it", Vec::new());
        assert!(matches!(
            decoder.translate(&empty),
            Err(Error::InvalidInput(_))
        ));

        let greedy =
            TranslationRequest::new("en", "it", vec!["hello".to_string()]).with_n_best(99);
        assert!(matches!(
            decoder.translate(&greedy),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn cold_promotion_materializes_lazily() {
        let log = Arc::new(CallLog::default());
        // hot=1, warm=1: with two directions nothing starts COLD, so build
        // a third registration to push it__en out
        let mut builder = RegistryBuilder::new();
        for (key, path) in [
            ("en__it", "ckpt-a"),
            ("en__de", "ckpt-b"),
            ("it__en", "ckpt-c"),
        ] {
            builder.register(key.parse().unwrap(), path).unwrap();
        }
        let loader = RecordingFactory {
            log: log.clone(),
            fail_tune: false,
        };
        let registry = builder.build(&Device::Cpu, &loader).unwrap();
        let config = EngineConfig {
            hot_capacity: 1,
            warm_capacity: 1,
            ..EngineConfig::default()
        };
        let pool = EnginePool::build(&registry, &config, &loader).unwrap();
        let mut decoder = Decoder::new(
            pool,
            Box::new(RecordingFactory {
                log: log.clone(),
                fail_tune: false,
            }),
            config,
        );

        let opens_before = log.calls().iter().filter(|c| c.starts_with("open")).count();
        assert_eq!(opens_before, 2, "only HOT and WARM open at build");

        let request = TranslationRequest::new("it", "en", vec!["ciao".to_string()]);
        decoder.translate(&request).unwrap();
        let opens_after = log.calls().iter().filter(|c| c.starts_with("open")).count();
        assert_eq!(opens_after, 3, "COLD promotion pays the open exactly once");

        decoder.translate(&request).unwrap();
        let opens_final = log.calls().iter().filter(|c| c.starts_with("open")).count();
        assert_eq!(opens_final, 3, "repeat hits reuse the session");
    }
}
