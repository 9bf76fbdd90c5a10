// Classifier Detector
// Chunk-wise AI probability from a fine-tuned sequence classifier

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::aggregation::{build_chunk_analysis, spread_indicators, DispersionTier, CLASSIFIER_SCALE};
use super::{check_cancelled, Detector, DetectorOutcome};
use crate::models::{round2, AggregateStats, ChunkScore, DetectionResult};
use crate::services::error::DetectorError;
use crate::services::model_cache::ModelCache;
use crate::services::text_processor::Chunker;

pub const DEFAULT_CLASSIFIER_MODEL: &str = "Hello-SimpleAI/chatgpt-detector-roberta";

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierSettings {
    pub model_id: String,
    pub chunk_size: usize,
    pub overlap: usize,
    pub max_tokens: usize,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_CLASSIFIER_MODEL.to_string(),
            chunk_size: 400,
            overlap: 100,
            max_tokens: 512,
        }
    }
}

pub struct ClassifierDetector {
    cache: Arc<ModelCache>,
    settings: ClassifierSettings,
}

impl ClassifierDetector {
    pub fn new(cache: Arc<ModelCache>, settings: ClassifierSettings) -> Self {
        Self { cache, settings }
    }

    pub fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    fn run(&self, text: &str, cancel: &CancellationToken) -> Result<DetectionResult, DetectorError> {
        let start = Instant::now();
        let handle = self.cache.get_or_load_classifier(&self.settings.model_id)?;
        let classifier = handle.classifier()?;

        let chunker = Chunker::new(self.settings.chunk_size, self.settings.overlap);
        let mut chunks = Vec::new();
        for (chunk_id, chunk) in chunker.chunk(text).enumerate() {
            check_cancelled(cancel)?;
            let prob = classifier.ai_probability(&chunk.text, self.settings.max_tokens)?;
            if !prob.is_finite() {
                return Err(DetectorError::Inference(format!(
                    "non-finite probability on chunk {}",
                    chunk_id
                )));
            }
            chunks.push(ChunkScore::new(chunk_id, prob * 100.0, chunk.word_count));
        }

        let scores: Vec<f64> = chunks.iter().map(|c| c.ai_likelihood).collect();
        let stats = AggregateStats::from_scores(&scores).ok_or(DetectorError::EmptyInput)?;
        let num_chunks = chunks.len();
        let tier = stats.tier();

        let note = match tier {
            DispersionTier::Consistent => format!(
                "Consistent AI pattern across {} chunks (std: {:.1}%)",
                num_chunks, stats.std_dev
            ),
            DispersionTier::Moderate => format!(
                "Moderate variance across {} chunks (std: {:.1}%)",
                num_chunks, stats.std_dev
            ),
            DispersionTier::Variable => format!(
                "Variable scores (range: {:.1}%-{:.1}%) suggest mixed human/AI content",
                stats.min, stats.max
            ),
        };

        info!(
            "[CLASSIFIER] {} chunks: avg={:.1}% range=[{:.1}%, {:.1}%] std={:.1}% in {}ms",
            num_chunks,
            stats.mean,
            stats.min,
            stats.max,
            stats.std_dev,
            start.elapsed().as_millis()
        );

        let (average, range, spread) = spread_indicators(num_chunks, &stats);
        Ok(DetectionResult::new(
            round2(stats.mean),
            CLASSIFIER_SCALE.confidence(tier),
            vec![average, range, spread],
            self.settings.model_id.clone(),
            note,
        )
        .with_chunk_analysis(build_chunk_analysis(chunks, &stats)))
    }
}

impl Detector for ClassifierDetector {
    fn detect(&self, text: &str, cancel: &CancellationToken) -> DetectorOutcome {
        DetectorOutcome::from_result("CLASSIFIER", self.run(text, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::detection::test_support::{cache_with, long_text, offline_cache, ScriptedClassifier};
    use crate::services::model_cache::{ModelKind, ModelRole};

    fn detector_with(probs: Vec<f64>) -> ClassifierDetector {
        let classifier = Arc::new(ScriptedClassifier::new(probs));
        let cache = cache_with(move |key| match key.role {
            ModelRole::Classifier => Ok(ModelKind::Classifier(classifier.clone())),
            ModelRole::CausalLm => Err(DetectorError::Inference("not a classifier".to_string())),
        });
        ClassifierDetector::new(cache, ClassifierSettings::default())
    }

    fn unwrap_success(outcome: DetectorOutcome) -> DetectionResult {
        match outcome {
            DetectorOutcome::Success(result) => result,
            DetectorOutcome::Unavailable { reason } => panic!("unexpected failure: {}", reason),
        }
    }

    #[test]
    fn test_single_chunk_consistent() {
        let detector = detector_with(vec![0.8]);
        let result = unwrap_success(detector.detect(&long_text(120), &CancellationToken::new()));

        assert_eq!(result.ai_likelihood, 80.0);
        assert_eq!(result.confidence, 0.92);
        assert_eq!(result.model, DEFAULT_CLASSIFIER_MODEL);
        assert_eq!(result.note, "Consistent AI pattern across 1 chunks (std: 0.0%)");
        assert_eq!(result.indicators[0], "Average across 1 chunks: 80.0%");

        let analysis = result.chunk_analysis.unwrap();
        assert_eq!(analysis.num_chunks, 1);
        assert_eq!(analysis.chunks[0].word_count, 120);
    }

    #[test]
    fn test_variable_chunks_lower_confidence() {
        // 1000 words at 400/100 -> windows at 0, 300, 600, 900
        let detector = detector_with(vec![0.9, 0.1, 0.9, 0.1]);
        let result = unwrap_success(detector.detect(&long_text(1000), &CancellationToken::new()));

        let analysis = result.chunk_analysis.as_ref().unwrap();
        assert_eq!(analysis.num_chunks, 4);
        assert_eq!(result.ai_likelihood, 50.0);
        assert_eq!(analysis.stats.std_dev, 40.0);
        assert_eq!(result.confidence, 0.78);
        assert!(result.note.starts_with("Variable scores (range: 10.0%-90.0%)"));
    }

    #[test]
    fn test_moderate_tier() {
        // 701 words -> windows at 0, 300, 600; scores 50, 70, 80
        let detector = detector_with(vec![0.5, 0.7, 0.8]);
        let result = unwrap_success(detector.detect(&long_text(701), &CancellationToken::new()));
        assert_eq!(result.confidence, 0.85);
        assert!(result.note.starts_with("Moderate variance across 3 chunks"));
    }

    #[test]
    fn test_load_failure_is_unavailable() {
        let detector = ClassifierDetector::new(offline_cache(), ClassifierSettings::default());
        let outcome = detector.detect(&long_text(100), &CancellationToken::new());
        assert!(matches!(outcome, DetectorOutcome::Unavailable { ref reason } if reason.contains("offline")));
    }

    #[test]
    fn test_cancelled_before_first_chunk() {
        let detector = detector_with(vec![0.5]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = detector.detect(&long_text(100), &cancel);
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_nan_probability_is_a_fault() {
        let detector = detector_with(vec![f64::NAN]);
        let outcome = detector.detect(&long_text(100), &CancellationToken::new());
        assert!(!outcome.is_success());
    }
}
