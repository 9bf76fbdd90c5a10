// Detection Data Models
// Serialized shapes returned by the detectors and the CLI

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============ Chunking ============

/// A word-window extracted from the analyzed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    pub start_word_index: usize,
    pub word_count: usize,
}

/// Per-chunk score reported by a model-backed detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkScore {
    pub chunk_id: usize,
    pub ai_likelihood: f64,
    pub word_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_b: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f64>,
}

impl ChunkScore {
    pub fn new(chunk_id: usize, ai_likelihood: f64, word_count: usize) -> Self {
        Self {
            chunk_id,
            ai_likelihood: clamp_likelihood(ai_likelihood),
            word_count,
            loss_a: None,
            loss_b: None,
            ratio: None,
        }
    }
}

// ============ Aggregation ============

/// Summary statistics over chunk likelihoods. Recomputed per call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    #[serde(rename = "avg_score")]
    pub mean: f64,
    #[serde(rename = "min_score")]
    pub min: f64,
    #[serde(rename = "max_score")]
    pub max: f64,
    pub std_dev: f64,
}

impl AggregateStats {
    pub fn rounded(&self) -> Self {
        Self {
            mean: round2(self.mean),
            min: round2(self.min),
            max: round2(self.max),
            std_dev: round2(self.std_dev),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkAnalysis {
    pub num_chunks: usize,
    #[serde(flatten)]
    pub stats: AggregateStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_loss_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_loss_b: Option<f64>,
    pub chunks: Vec<ChunkScore>,
}

// ============ Detection Result ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub ai_likelihood: f64,
    pub confidence: f64,
    pub indicators: Vec<String>,
    pub model: String,
    pub note: String,
    /// Classifier sub-score, present only on combined results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roberta_score: Option<f64>,
    /// Perplexity-comparator sub-score, present only on combined results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binoculars_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub individual_results: Option<IndividualResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_analysis: Option<ChunkAnalysis>,
}

impl DetectionResult {
    /// Build a result; likelihood is clamped to [0, 100] and confidence to [0, 1].
    pub fn new(
        ai_likelihood: f64,
        confidence: f64,
        indicators: Vec<String>,
        model: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            ai_likelihood: clamp_likelihood(ai_likelihood),
            confidence: clamp_confidence(confidence),
            indicators,
            model: model.into(),
            note: note.into(),
            roberta_score: None,
            binoculars_score: None,
            individual_results: None,
            chunk_analysis: None,
        }
    }

    pub fn with_chunk_analysis(mut self, analysis: ChunkAnalysis) -> Self {
        self.chunk_analysis = Some(analysis);
        self
    }

    pub fn is_combined(&self) -> bool {
        self.individual_results.is_some()
    }
}

/// Raw sub-results kept on a combined result for transparency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualResults {
    pub roberta: Box<DetectionResult>,
    pub binoculars: Box<DetectionResult>,
}

// ============ CLI Payload ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPath {
    InsufficientInput,
    HeuristicOnly,
    Advanced,
}

/// Which path answered and why. Observability only; never drives control flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugInfo {
    pub request_id: String,
    pub cache_dir: String,
    pub cache_dir_writable: bool,
    pub model_backend: bool,
    pub allow_advanced: bool,
    pub path: AnalysisPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why_failed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced_result_model: Option<String>,
    #[serde(default)]
    pub advanced_success: bool,
    #[serde(default)]
    pub detectors: BTreeMap<String, String>,
    pub elapsed_ms: u64,
}

/// Final JSON object written to stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ai_likelihood: f64,
    pub confidence: f64,
    pub indicators: Vec<String>,
    pub model: String,
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heuristic_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heuristic_indicators: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heuristic_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roberta_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binoculars_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub individual_results: Option<IndividualResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_analysis: Option<ChunkAnalysis>,
    #[serde(rename = "_debug", default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugInfo>,
}

impl DetectionPayload {
    /// Advanced result as primary, heuristic result as auxiliary fields.
    pub fn from_primary(primary: DetectionResult, heuristic: &DetectionResult, debug: DebugInfo) -> Self {
        Self {
            error: None,
            ai_likelihood: primary.ai_likelihood,
            confidence: primary.confidence,
            indicators: primary.indicators,
            model: primary.model,
            note: primary.note,
            heuristic_score: Some(heuristic.ai_likelihood),
            heuristic_indicators: Some(heuristic.indicators.clone()),
            heuristic_model: Some(heuristic.model.clone()),
            roberta_score: primary.roberta_score,
            binoculars_score: primary.binoculars_score,
            individual_results: primary.individual_results,
            chunk_analysis: primary.chunk_analysis,
            debug: Some(debug),
        }
    }

    /// Heuristic result alone; no auxiliary fields.
    pub fn heuristic_only(heuristic: DetectionResult, debug: DebugInfo) -> Self {
        Self {
            error: None,
            ai_likelihood: heuristic.ai_likelihood,
            confidence: heuristic.confidence,
            indicators: heuristic.indicators,
            model: heuristic.model,
            note: heuristic.note,
            heuristic_score: None,
            heuristic_indicators: None,
            heuristic_model: None,
            roberta_score: None,
            binoculars_score: None,
            individual_results: None,
            chunk_analysis: None,
            debug: Some(debug),
        }
    }

    pub fn insufficient_input(debug: DebugInfo) -> Self {
        Self {
            error: Some("Text too short for AI detection".to_string()),
            ai_likelihood: 50.0,
            confidence: 0.0,
            indicators: Vec::new(),
            model: "insufficient_input".to_string(),
            note: "At least 50 characters are required for analysis".to_string(),
            heuristic_score: None,
            heuristic_indicators: None,
            heuristic_model: None,
            roberta_score: None,
            binoculars_score: None,
            individual_results: None,
            chunk_analysis: None,
            debug: Some(debug),
        }
    }
}

/// Structured error written when the input itself cannot be read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputErrorPayload {
    pub error: String,
    pub ai_likelihood: f64,
    pub confidence: f64,
    pub indicators: Vec<String>,
}

impl InputErrorPayload {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ai_likelihood: 50.0,
            confidence: 0.3,
            indicators: vec!["Input error".to_string()],
        }
    }
}

// ============ Numeric Helpers ============

pub fn clamp_likelihood(value: f64) -> f64 {
    if value.is_nan() {
        return 50.0;
    }
    value.clamp(0.0, 100.0)
}

pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
