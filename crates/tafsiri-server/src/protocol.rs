//! Line-delimited JSON wire contract.
//!
//! One request per line in, one response per line out. Successful
//! responses carry per-segment results with the best hypothesis inlined
//! and the remainder under `alternatives`; failures carry a short error
//! type and a message. Alignments travel as two parallel index arrays.

use serde::{Deserialize, Serialize};
use tafsiri_core::{
    Error, Hypothesis, Suggestion, Translation, TranslationRequest,
};

/// One request line.
#[derive(Debug, Clone, Deserialize)]
pub struct WireRequest {
    /// Source segments to translate.
    pub q: Vec<String>,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub variant: Option<String>,
    /// Example pairs biasing this request.
    #[serde(default)]
    pub hints: Vec<WireHint>,
    /// Forced output text; the decoder scores and aligns it instead of
    /// searching.
    #[serde(default)]
    pub forced: Option<String>,
    /// Extra hypotheses to return beyond the best one.
    #[serde(default)]
    pub alternatives: Option<usize>,
}

/// One example pair. Extra fields a host may attach (such as the
/// originating translation-memory segment id) are accepted and ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct WireHint {
    pub source: String,
    pub target: String,
    pub score: f32,
}

#[derive(Debug, Serialize)]
pub struct WireResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<WireTranslation>>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WireTranslation {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub a: Option<[Vec<usize>; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<Vec<WireTranslation>>,
}

pub fn to_core_request(request: WireRequest) -> TranslationRequest {
    let suggestions = request
        .hints
        .into_iter()
        .map(|hint| Suggestion {
            source: hint.source,
            target: hint.target,
            score: hint.score,
        })
        .collect();

    TranslationRequest {
        source: request.source,
        target: request.target,
        variant: request.variant,
        batch: request.q,
        suggestions,
        forced_translation: request.forced,
        n_best: 1 + request.alternatives.unwrap_or(0),
        tuning: None,
        symmetrization: None,
    }
}

pub fn success_response(translations: Vec<Translation>) -> WireResponse {
    WireResponse {
        success: true,
        data: Some(translations.into_iter().map(to_wire_translation).collect()),
        error_type: None,
        msg: None,
    }
}

pub fn error_response(err: &Error) -> WireResponse {
    WireResponse {
        success: false,
        data: None,
        error_type: Some(error_type(err).to_string()),
        msg: Some(err.to_string()),
    }
}

pub fn invalid_request(msg: &str) -> WireResponse {
    WireResponse {
        success: false,
        data: None,
        error_type: Some("invalid_request".to_string()),
        msg: Some(msg.to_string()),
    }
}

fn error_type(err: &Error) -> &'static str {
    match err {
        Error::UnsupportedLanguage(_) => "unsupported_language",
        Error::DuplicateName(_) => "duplicate_name",
        Error::ModelLoad(_) => "model_load_failed",
        Error::InvalidInput(_) | Error::Json(_) => "invalid_request",
        Error::Backend(_) | Error::Tensor(_) => "backend_error",
        Error::Config(_) | Error::Io(_) => "internal_error",
    }
}

fn to_wire_translation(translation: Translation) -> WireTranslation {
    let mut hypotheses = translation.hypotheses.into_iter();
    let best = hypotheses.next();
    let alternatives: Vec<WireTranslation> = hypotheses.map(hypothesis_to_wire).collect();

    match best {
        Some(best) => {
            let mut wire = hypothesis_to_wire(best);
            if !alternatives.is_empty() {
                wire.alternatives = Some(alternatives);
            }
            wire
        }
        None => WireTranslation {
            text: String::new(),
            s: None,
            a: None,
            alternatives: None,
        },
    }
}

fn hypothesis_to_wire(hypothesis: Hypothesis) -> WireTranslation {
    let a = hypothesis.alignment.map(|alignment| {
        let sources = alignment.iter().map(|p| p.source).collect();
        let targets = alignment.iter().map(|p| p.target).collect();
        [sources, targets]
    });
    WireTranslation {
        text: hypothesis.text,
        s: Some(hypothesis.score),
        a,
        alternatives: None,
    }
}
