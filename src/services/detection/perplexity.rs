// Perplexity Comparator
// Binoculars-style score from the loss gap between a baseline and a comparison language model

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::aggregation::{build_chunk_analysis, mean, spread_indicators, DispersionTier, PERPLEXITY_SCALE};
use super::{check_cancelled, Detector, DetectorOutcome};
use crate::models::{round2, AggregateStats, ChunkScore, DetectionResult};
use crate::services::error::DetectorError;
use crate::services::model_cache::ModelCache;
use crate::services::text_processor::Chunker;

pub const DEFAULT_BASELINE_MODEL: &str = "distilbert/distilgpt2";
pub const DEFAULT_COMPARISON_MODEL: &str = "openai-community/gpt2";

#[derive(Debug, Clone, PartialEq)]
pub struct PerplexitySettings {
    /// Model A, the weaker baseline
    pub baseline_model: String,
    /// Model B
    pub comparison_model: String,
    pub chunk_size: usize,
    pub overlap: usize,
    pub max_tokens: usize,
    pub epsilon: f64,
    pub steepness: f64,
}

impl Default for PerplexitySettings {
    fn default() -> Self {
        Self {
            baseline_model: DEFAULT_BASELINE_MODEL.to_string(),
            comparison_model: DEFAULT_COMPARISON_MODEL.to_string(),
            chunk_size: 700,
            overlap: 150,
            max_tokens: 1024,
            epsilon: 1e-6,
            steepness: 3.0,
        }
    }
}

impl PerplexitySettings {
    pub fn model_identifier(&self) -> String {
        format!("binoculars:{}|{}", self.baseline_model, self.comparison_model)
    }
}

/// Relative loss gap: positive when the comparison model finds the text easier than the baseline.
pub fn loss_ratio(loss_a: f64, loss_b: f64, epsilon: f64) -> f64 {
    (loss_a - loss_b) / (loss_b.abs() + epsilon)
}

/// Logistic map of the ratio onto [0, 100].
pub fn logistic_score(ratio: f64, steepness: f64) -> f64 {
    100.0 / (1.0 + (-ratio * steepness).exp())
}

pub struct PerplexityComparator {
    cache: Arc<ModelCache>,
    settings: PerplexitySettings,
}

impl PerplexityComparator {
    pub fn new(cache: Arc<ModelCache>, settings: PerplexitySettings) -> Self {
        Self { cache, settings }
    }

    pub fn settings(&self) -> &PerplexitySettings {
        &self.settings
    }

    fn run(&self, text: &str, cancel: &CancellationToken) -> Result<DetectionResult, DetectorError> {
        let start = Instant::now();
        let baseline = self.cache.get_or_load(&self.settings.baseline_model)?.causal_lm()?;
        let comparison = self.cache.get_or_load(&self.settings.comparison_model)?.causal_lm()?;

        let chunker = Chunker::new(self.settings.chunk_size, self.settings.overlap);
        let mut chunks = Vec::new();
        for (chunk_id, chunk) in chunker.chunk(text).enumerate() {
            check_cancelled(cancel)?;
            let loss_a = baseline.mean_token_loss(&chunk.text, self.settings.max_tokens)?;
            check_cancelled(cancel)?;
            let loss_b = comparison.mean_token_loss(&chunk.text, self.settings.max_tokens)?;

            let ratio = loss_ratio(loss_a, loss_b, self.settings.epsilon);
            if !ratio.is_finite() {
                return Err(DetectorError::Inference(format!(
                    "non-finite loss ratio on chunk {} ({} / {})",
                    chunk_id, loss_a, loss_b
                )));
            }

            let mut score = ChunkScore::new(
                chunk_id,
                logistic_score(ratio, self.settings.steepness),
                chunk.word_count,
            );
            score.loss_a = Some(loss_a);
            score.loss_b = Some(loss_b);
            score.ratio = Some(ratio);
            chunks.push(score);
        }

        let scores: Vec<f64> = chunks.iter().map(|c| c.ai_likelihood).collect();
        let stats = AggregateStats::from_scores(&scores).ok_or(DetectorError::EmptyInput)?;
        let avg_loss_a = mean(&chunks.iter().filter_map(|c| c.loss_a).collect::<Vec<_>>());
        let avg_loss_b = mean(&chunks.iter().filter_map(|c| c.loss_b).collect::<Vec<_>>());
        let num_chunks = chunks.len();
        let tier = stats.tier();

        let note = match tier {
            DispersionTier::Consistent => format!(
                "Consistent perplexity pattern across {} chunks (std: {:.1}%)",
                num_chunks, stats.std_dev
            ),
            DispersionTier::Moderate => format!(
                "Moderate variance across {} chunks (std: {:.1}%)",
                num_chunks, stats.std_dev
            ),
            DispersionTier::Variable => format!(
                "Variable perplexity scores (range: {:.1}%-{:.1}%) suggest mixed content",
                stats.min, stats.max
            ),
        };

        info!(
            "[BINOCULARS] {} chunks: avg={:.1}% range=[{:.1}%, {:.1}%] std={:.1}% losses={:.3}/{:.3} in {}ms",
            num_chunks,
            stats.mean,
            stats.min,
            stats.max,
            stats.std_dev,
            avg_loss_a,
            avg_loss_b,
            start.elapsed().as_millis()
        );

        let (average, range, spread) = spread_indicators(num_chunks, &stats);
        let indicators = vec![
            average,
            format!("Avg perplexity ratio: {:.3}/{:.3}", avg_loss_a, avg_loss_b),
            range,
            spread,
        ];

        let mut analysis = build_chunk_analysis(chunks, &stats);
        analysis.avg_loss_a = Some(avg_loss_a);
        analysis.avg_loss_b = Some(avg_loss_b);

        Ok(DetectionResult::new(
            round2(stats.mean),
            PERPLEXITY_SCALE.confidence(tier),
            indicators,
            self.settings.model_identifier(),
            note,
        )
        .with_chunk_analysis(analysis))
    }
}

impl Detector for PerplexityComparator {
    fn detect(&self, text: &str, cancel: &CancellationToken) -> DetectorOutcome {
        DetectorOutcome::from_result("BINOCULARS", self.run(text, cancel))
    }
}
